//! The per-cycle control loop and its shared control surface.
//!
//! One strictly sequential cycle: arbitrate override, resolve
//! position, compute sun angles, point or park, read aux sensors,
//! publish a fresh snapshot. The loop runs on its own worker thread;
//! the HTTP surface touches only `TrackerShared`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use position_source::{GeoFix, PositionChain, SystemClock, TimeSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use sun_geometry::{sun_position, ActuatorAngles, AngleMapper, SunAngles};
use tracing::{info, warn};

use crate::arbiter::OverrideArbiter;
use crate::hardware::{
    ActuatorDriver, ActuatorError, EnvironmentReading, EnvironmentSensor, PowerReading,
    PowerSensor,
};
use crate::status::{SharedStatus, StatusSnapshot, TrackerMode};

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// State shared between the loop worker and the control surface:
/// override arbitration, the actuator channel, and the published
/// snapshot. Everything else stays owned by the worker.
pub struct TrackerShared {
    arbiter: Mutex<OverrideArbiter>,
    actuator: Mutex<Box<dyn ActuatorDriver>>,
    current: Mutex<ActuatorAngles>,
    status: SharedStatus,
    time: Arc<dyn TimeSource>,
}

impl TrackerShared {
    pub fn new(actuator: Box<dyn ActuatorDriver>, initial: ActuatorAngles) -> Arc<Self> {
        Self::with_time_source(actuator, initial, Arc::new(SystemClock))
    }

    pub fn with_time_source(
        actuator: Box<dyn ActuatorDriver>,
        initial: ActuatorAngles,
        time: Arc<dyn TimeSource>,
    ) -> Arc<Self> {
        let now = time.now();
        Arc::new(Self {
            arbiter: Mutex::new(OverrideArbiter::new()),
            actuator: Mutex::new(actuator),
            current: Mutex::new(initial),
            status: SharedStatus::new(StatusSnapshot::idle(initial, now)),
            time,
        })
    }

    pub fn latest_status(&self) -> Arc<StatusSnapshot> {
        self.status.latest()
    }

    /// Engage a manual override: command the actuator now and suspend
    /// auto tracking for `hold_seconds`. The arbiter flips inside the
    /// actuator critical section so an in-flight auto cycle cannot
    /// re-command the mount afterwards.
    pub fn apply_override(
        &self,
        angles: ActuatorAngles,
        hold_seconds: i64,
    ) -> Result<(), ActuatorError> {
        let angles = angles.clamped();
        let now = self.time.now();
        {
            let mut actuator = self.actuator.lock();
            actuator.command(angles)?;
            self.arbiter.lock().request_override(
                angles,
                chrono::Duration::seconds(hold_seconds.max(1)),
                now,
            );
            *self.current.lock() = angles;
        }

        let previous = self.status.latest();
        self.status.publish(StatusSnapshot {
            angles,
            mode: TrackerMode::Manual,
            fix: previous.fix,
            sun: previous.sun,
            environment: previous.environment,
            power: previous.power,
            last_update: now,
        });
        Ok(())
    }

    /// Drop any manual hold and return to auto tracking immediately.
    /// Idempotent: calling while already Auto changes nothing.
    pub fn resume_auto(&self) {
        self.arbiter.lock().resume_auto();
        let previous = self.status.latest();
        let mut snapshot = (*previous).clone();
        snapshot.mode = TrackerMode::Auto;
        snapshot.last_update = self.time.now();
        self.status.publish(snapshot);
    }

    fn commanded(&self) -> ActuatorAngles {
        *self.current.lock()
    }
}

pub struct Tracker {
    shared: Arc<TrackerShared>,
    chain: PositionChain,
    mapper: AngleMapper,
    environment: Option<Box<dyn EnvironmentSensor>>,
    power: Option<Box<dyn PowerSensor>>,
    interval: Duration,
    soft_deadline: Duration,
    last_fix: Option<GeoFix>,
}

impl Tracker {
    pub fn new(
        shared: Arc<TrackerShared>,
        chain: PositionChain,
        mapper: AngleMapper,
        interval: Duration,
    ) -> Self {
        // The live-acquisition timeout dominates worst-case cycle
        // latency; anything much past it means hardware is hanging.
        let soft_deadline = chain.fix_timeout() + Duration::from_secs(5);
        Self {
            shared,
            chain,
            mapper,
            environment: None,
            power: None,
            interval,
            soft_deadline,
            last_fix: None,
        }
    }

    pub fn with_environment_sensor(mut self, sensor: Box<dyn EnvironmentSensor>) -> Self {
        self.environment = Some(sensor);
        self
    }

    pub fn with_power_sensor(mut self, sensor: Box<dyn PowerSensor>) -> Self {
        self.power = Some(sensor);
        self
    }

    pub fn with_soft_deadline(mut self, soft_deadline: Duration) -> Self {
        self.soft_deadline = soft_deadline;
        self
    }

    /// Run cycles forever, sleeping `interval` between them. The
    /// shutdown flag is honored between cycles, never mid-cycle;
    /// devices release through Drop on every exit path.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        info!(interval = ?self.interval, "tracker loop started");
        self.park_on_startup();

        while !shutdown.load(Ordering::Relaxed) {
            self.run_cycle();

            let deadline = Instant::now() + self.interval;
            while !shutdown.load(Ordering::Relaxed) {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                thread::sleep(remaining.min(SHUTDOWN_POLL));
            }
        }
        info!("tracker loop stopped");
    }

    /// One full resolve → compute → move → publish pass. Returns the
    /// mode that was published.
    pub fn run_cycle(&mut self) -> TrackerMode {
        let started = Instant::now();
        let now = self.shared.time.now();

        // 1. Override arbitration, before any tracking decision. While
        //    Manual the actuator stays put; sensors are still refreshed.
        if self.shared.arbiter.lock().tick(now).is_manual() {
            let (environment, power) = self.read_aux();
            let fix = self.last_fix;
            let mode = self.publish(TrackerMode::Manual, fix, None, environment, power);
            self.check_budget(started);
            return mode;
        }

        // 2. Resolve position, or hold and report.
        let fix = match self.chain.resolve() {
            Ok(fix) => fix,
            Err(err) => {
                warn!(error = %err, "position unresolved; holding last position");
                let (environment, power) = self.read_aux();
                let fix = self.last_fix;
                let mode = self.publish(TrackerMode::Error, fix, None, environment, power);
                self.check_budget(started);
                return mode;
            }
        };
        self.last_fix = Some(fix);

        // 3. Sun geometry. A computation failure is contained the same
        //    way as a position failure: hold, report, retry next cycle.
        let sun = match sun_position(fix.latitude, fix.longitude, fix.timestamp) {
            Ok(sun) => sun,
            Err(err) => {
                warn!(error = %err, "sun computation failed; holding last position");
                let (environment, power) = self.read_aux();
                let mode = self.publish(TrackerMode::Error, Some(fix), None, environment, power);
                self.check_budget(started);
                return mode;
            }
        };

        // 4. Point at the sun, or park for the night.
        let (mode, target) = if sun.is_daytime() {
            (TrackerMode::Auto, self.mapper.to_actuator(sun))
        } else {
            (TrackerMode::Night, self.mapper.parked())
        };
        let moved = self.command_tracked(target);

        // 5. Aux sensors, each independent and best-effort.
        let (environment, power) = self.read_aux();

        // 6. Publish. An override that landed mid-cycle wins the cycle.
        let mode = if moved { mode } else { TrackerMode::Manual };
        let mode = self.publish(mode, Some(fix), Some(sun), environment, power);
        self.check_budget(started);
        mode
    }

    fn park_on_startup(&self) {
        let park = self.mapper.parked();
        let mut actuator = self.shared.actuator.lock();
        match actuator.command(park) {
            Ok(()) => *self.shared.current.lock() = park,
            Err(err) => warn!(error = %err, "startup park failed"),
        }
    }

    /// Command the actuator for an auto/night move. Returns false if a
    /// manual override slipped in since arbitration; the held position
    /// is left untouched in that case.
    fn command_tracked(&self, target: ActuatorAngles) -> bool {
        let mut actuator = self.shared.actuator.lock();
        if self.shared.arbiter.lock().mode().is_manual() {
            return false;
        }
        match actuator.command(target) {
            Ok(()) => {
                *self.shared.current.lock() = target;
            }
            Err(err) => {
                // Transient: keep the cycle alive, retry next time.
                warn!(error = %err, "actuator command failed");
            }
        }
        true
    }

    fn read_aux(&mut self) -> (Option<EnvironmentReading>, Option<PowerReading>) {
        let environment = self.environment.as_mut().and_then(|sensor| {
            sensor
                .read()
                .map_err(|err| warn!(error = %err, "environment sensor read failed"))
                .ok()
        });
        let power = self.power.as_mut().and_then(|sensor| {
            sensor
                .read()
                .map_err(|err| warn!(error = %err, "power sensor read failed"))
                .ok()
        });
        (environment, power)
    }

    fn publish(
        &self,
        mode: TrackerMode,
        fix: Option<GeoFix>,
        sun: Option<SunAngles>,
        environment: Option<EnvironmentReading>,
        power: Option<PowerReading>,
    ) -> TrackerMode {
        self.shared.status.publish(StatusSnapshot {
            angles: self.shared.commanded(),
            mode,
            fix,
            sun,
            environment,
            power,
            last_update: self.shared.time.now(),
        });
        mode
    }

    fn check_budget(&self, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed > self.soft_deadline {
            warn!(?elapsed, budget = ?self.soft_deadline, "cycle exceeded soft deadline");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use position_source::{
        CacheRecord, ClockError, PositionCache, ReceiverError, SentenceSource,
    };
    use crate::hardware::SensorError;

    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

    impl ManualClock {
        fn starting_at(at: DateTime<Utc>) -> Self {
            Self(Arc::new(Mutex::new(at)))
        }

        fn advance_secs(&self, secs: i64) {
            let mut now = self.0.lock();
            *now += chrono::Duration::seconds(secs);
        }
    }

    impl TimeSource for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }

    struct SilentReceiver;

    impl SentenceSource for SilentReceiver {
        fn read(&mut self, _buf: &mut [u8], _timeout: Duration) -> Result<usize, ReceiverError> {
            Ok(0)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingActuator(Arc<Mutex<Vec<ActuatorAngles>>>);

    impl RecordingActuator {
        fn last(&self) -> Option<ActuatorAngles> {
            self.0.lock().last().copied()
        }

        fn count(&self) -> usize {
            self.0.lock().len()
        }
    }

    impl ActuatorDriver for RecordingActuator {
        fn command(&mut self, angles: ActuatorAngles) -> Result<(), ActuatorError> {
            self.0.lock().push(angles);
            Ok(())
        }
    }

    struct FixedEnvironment;

    impl EnvironmentSensor for FixedEnvironment {
        fn read(&mut self) -> Result<EnvironmentReading, SensorError> {
            Ok(EnvironmentReading {
                temperature_c: 24.5,
                humidity_pct: 51.0,
            })
        }
    }

    struct BrokenPower;

    impl PowerSensor for BrokenPower {
        fn read(&mut self) -> Result<PowerReading, SensorError> {
            Err(SensorError::Read("bus timeout".into()))
        }
    }

    const NOON_UTC: (i32, u32, u32, u32, u32, u32) = (2024, 6, 1, 3, 0, 0);
    const MIDNIGHT_UTC: (i32, u32, u32, u32, u32, u32) = (2024, 6, 1, 15, 0, 0);

    fn instant(parts: (i32, u32, u32, u32, u32, u32)) -> DateTime<Utc> {
        let (y, mo, d, h, mi, s) = parts;
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    struct Rig {
        tracker: Tracker,
        shared: Arc<TrackerShared>,
        actuator: RecordingActuator,
        clock: ManualClock,
        _dir: tempfile::TempDir,
    }

    /// Tracker whose live stage always times out, driven by a manual
    /// clock, with optionally pre-seeded cached coordinates.
    fn rig(at: DateTime<Utc>, cached: Option<(f64, f64)>) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(at);
        let cache = PositionCache::new(dir.path().join("fix.json"));
        if let Some((latitude, longitude)) = cached {
            cache
                .save(&CacheRecord {
                    latitude,
                    longitude,
                    saved_at: at,
                })
                .unwrap();
        }
        let chain = PositionChain::new(cache, Duration::ZERO)
            .with_receiver(Box::new(SilentReceiver))
            .with_time_source(Arc::new(clock.clone()));

        let actuator = RecordingActuator::default();
        let mapper = AngleMapper::default();
        let shared = TrackerShared::with_time_source(
            Box::new(actuator.clone()),
            mapper.parked(),
            Arc::new(clock.clone()),
        );
        let tracker = Tracker::new(shared.clone(), chain, mapper, Duration::from_secs(30))
            .with_environment_sensor(Box::new(FixedEnvironment))
            .with_power_sensor(Box::new(BrokenPower));

        Rig {
            tracker,
            shared,
            actuator,
            clock,
            _dir: dir,
        }
    }

    #[test]
    fn default_cycle_budget_follows_the_acquisition_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let chain = PositionChain::new(
            PositionCache::new(dir.path().join("fix.json")),
            Duration::from_secs(7),
        );
        let mapper = AngleMapper::default();
        let shared = TrackerShared::new(Box::new(RecordingActuator::default()), mapper.parked());
        let tracker = Tracker::new(shared, chain, mapper, Duration::from_secs(60));
        assert_eq!(tracker.soft_deadline, Duration::from_secs(12));

        let tracker = tracker.with_soft_deadline(Duration::from_secs(3));
        assert_eq!(tracker.soft_deadline, Duration::from_secs(3));
    }

    #[test]
    fn cached_fix_at_noon_tracks_the_sun() {
        let mut rig = rig(instant(NOON_UTC), Some((35.10, 129.00)));
        let mode = rig.tracker.run_cycle();
        assert_eq!(mode, TrackerMode::Auto);

        let snapshot = rig.shared.latest_status();
        assert_eq!(snapshot.mode, TrackerMode::Auto);
        let fix = snapshot.fix.expect("fix published");
        assert_eq!(fix.source, position_source::FixSource::Cached);

        // Actuator was commanded to the mapped angles.
        let commanded = rig.actuator.last().expect("actuator moved");
        assert_eq!(commanded, snapshot.angles);
        assert!(commanded.in_range());
        assert!(commanded.axis_b > 0.0, "midday altitude must be above park");

        // Sensor results: environment present, power absent.
        assert!(snapshot.environment.is_some());
        assert!(snapshot.power.is_none());
    }

    #[test]
    fn night_cycle_parks_the_actuator() {
        let mut rig = rig(instant(MIDNIGHT_UTC), Some((35.10, 129.00)));
        let mode = rig.tracker.run_cycle();
        assert_eq!(mode, TrackerMode::Night);

        let snapshot = rig.shared.latest_status();
        assert_eq!(snapshot.mode, TrackerMode::Night);
        assert_eq!(rig.actuator.last(), Some(ActuatorAngles::new(90.0, 45.0)));
        assert!(snapshot.sun.is_some());
        assert!(!snapshot.sun.unwrap().is_daytime());
    }

    #[test]
    fn override_holds_then_expires_back_to_auto() {
        let mut rig = rig(instant(NOON_UTC), Some((35.10, 129.00)));
        rig.tracker.run_cycle();

        let held = ActuatorAngles::new(45.0, 60.0);
        rig.shared.apply_override(held, 120).unwrap();
        let snapshot = rig.shared.latest_status();
        assert_eq!(snapshot.mode, TrackerMode::Manual);
        assert_eq!(snapshot.angles, held);
        assert_eq!(rig.actuator.last(), Some(held));

        // +60s: still manual, actuator untouched, sensors refreshed.
        rig.clock.advance_secs(60);
        let moves_before = rig.actuator.count();
        assert_eq!(rig.tracker.run_cycle(), TrackerMode::Manual);
        let snapshot = rig.shared.latest_status();
        assert_eq!(snapshot.angles, held);
        assert_eq!(rig.actuator.count(), moves_before);
        assert!(snapshot.environment.is_some());

        // +121s: hold expired, tracking resumes and the mount moves.
        rig.clock.advance_secs(61);
        assert_eq!(rig.tracker.run_cycle(), TrackerMode::Auto);
        let snapshot = rig.shared.latest_status();
        assert_eq!(snapshot.mode, TrackerMode::Auto);
        assert_ne!(snapshot.angles, held);
        assert!(rig.actuator.count() > moves_before);
    }

    #[test]
    fn resume_auto_cuts_the_hold_short() {
        let mut rig = rig(instant(NOON_UTC), Some((35.10, 129.00)));
        rig.shared
            .apply_override(ActuatorAngles::new(10.0, 10.0), 600)
            .unwrap();
        rig.shared.resume_auto();
        assert_eq!(rig.shared.latest_status().mode, TrackerMode::Auto);
        assert_eq!(rig.tracker.run_cycle(), TrackerMode::Auto);
    }

    #[test]
    fn override_angles_are_defensively_clamped() {
        let rig = rig(instant(NOON_UTC), Some((35.10, 129.00)));
        rig.shared
            .apply_override(ActuatorAngles::new(300.0, -20.0), 60)
            .unwrap();
        assert_eq!(
            rig.shared.latest_status().angles,
            ActuatorAngles::new(180.0, 0.0)
        );
    }

    #[test]
    fn total_position_failure_holds_and_reports_error() {
        struct DeadClock;
        impl position_source::BackupClock for DeadClock {
            fn read_utc_time(&mut self) -> Result<DateTime<Utc>, ClockError> {
                Err(ClockError::Bus("no ack".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(instant(NOON_UTC));
        let chain = PositionChain::new(
            PositionCache::new(dir.path().join("fix.json")),
            Duration::ZERO,
        )
        .with_receiver(Box::new(SilentReceiver))
        .with_backup_clock(Box::new(DeadClock))
        .with_time_source(Arc::new(clock.clone()));

        let actuator = RecordingActuator::default();
        let mapper = AngleMapper::default();
        let shared = TrackerShared::with_time_source(
            Box::new(actuator.clone()),
            mapper.parked(),
            Arc::new(clock),
        );
        let mut tracker = Tracker::new(shared.clone(), chain, mapper, Duration::from_secs(30));

        let before = shared.latest_status().angles;
        assert_eq!(tracker.run_cycle(), TrackerMode::Error);

        let snapshot = shared.latest_status();
        assert_eq!(snapshot.mode, TrackerMode::Error);
        assert_eq!(snapshot.angles, before);
        assert_eq!(actuator.count(), 0, "actuator must not move on error");

        // The loop keeps retrying: a later cycle still reports error,
        // never panics out.
        assert_eq!(tracker.run_cycle(), TrackerMode::Error);
    }
}
