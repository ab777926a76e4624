use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use position_source::{PositionCache, PositionChain};
use sun_geometry::{ActuatorAngles, AngleMapper};
use tracker_core::{ActuatorDriver, NoopActuator, Tracker, TrackerShared};

mod routes;
mod sim;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<TrackerShared>,
    pub default_hold_seconds: i64,
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|raw| matches!(raw.as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tracker_gateway=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cache_file = std::env::var("TRACKER_CACHE_FILE")
        .unwrap_or_else(|_| ".tracker-cache/position.json".to_string());
    let interval = Duration::from_secs(env_u64("TRACK_INTERVAL_SECS", 60));
    let fix_timeout = Duration::from_secs(env_u64("FIX_TIMEOUT_SECS", 60));
    let default_hold_seconds = env_u64("MANUAL_HOLD_SECS", 180) as i64;

    let mapper = AngleMapper::new(
        env_f64("AZIMUTH_OFFSET", 90.0),
        ActuatorAngles::new(env_f64("PARK_AXIS_A", 90.0), env_f64("PARK_AXIS_B", 45.0)),
    );

    // Simulated collaborators stand in for the serial/I2C drivers; the
    // receiver stage can be disabled to exercise the fallback chain.
    let mut chain = PositionChain::new(PositionCache::new(&cache_file), fix_timeout)
        .with_backup_clock(Box::new(sim::SystemBackupClock));
    if env_flag("SIM_RECEIVER_ENABLED", true) {
        chain = chain.with_receiver(Box::new(sim::SimReceiver::new(
            env_f64("SIM_LATITUDE", 35.10),
            env_f64("SIM_LONGITUDE", 129.00),
        )));
    } else {
        tracing::warn!("receiver disabled; running on cache/clock fallbacks only");
    }

    // Degraded mode: with the actuator disabled the loop and the API
    // stay fully functional, moves just go nowhere.
    let actuator: Box<dyn ActuatorDriver> = if env_flag("SIM_ACTUATOR_ENABLED", true) {
        Box::new(sim::LoggingActuator)
    } else {
        tracing::warn!("actuator disabled; commands will be dropped");
        Box::new(NoopActuator)
    };
    let shared = TrackerShared::new(actuator, mapper.parked());
    let tracker = Tracker::new(shared.clone(), chain, mapper, interval)
        .with_environment_sensor(Box::new(sim::SimEnvironmentSensor))
        .with_power_sensor(Box::new(sim::SimPowerSensor));

    // Dedicated worker: the loop blocks on live acquisition, the HTTP
    // surface only ever touches TrackerShared.
    let shutdown = Arc::new(AtomicBool::new(false));
    let worker = {
        let shutdown = shutdown.clone();
        std::thread::spawn(move || tracker.run(shutdown))
    };

    let state = AppState {
        shared,
        default_hold_seconds,
    };

    let control_routes = Router::new()
        .route("/status", get(routes::get_status))
        .route("/control/override", post(routes::post_override))
        .route("/control/resume", post(routes::post_resume))
        .with_state(state);

    let app = Router::new()
        .route("/health", get(routes::health))
        .nest("/api/v1", control_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let port = std::env::var("TRACKER_GATEWAY_PORT")
        .or_else(|_| std::env::var("PORT"))
        .unwrap_or_else(|_| "18750".to_string());
    let addr = format!("0.0.0.0:{}", port);

    tracing::info!("sun tracker gateway starting on {}", addr);
    tracing::info!(
        interval = ?interval,
        fix_timeout = ?fix_timeout,
        cache = %cache_file,
        "tracker configuration"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the loop between cycles; devices release via Drop.
    shutdown.store(true, Ordering::Relaxed);
    if worker.join().is_err() {
        tracing::error!("tracker worker panicked during shutdown");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
