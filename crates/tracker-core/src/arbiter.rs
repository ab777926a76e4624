//! Auto/manual arbitration.
//!
//! Two states. `Auto` is initial; an override request always moves to
//! `Manual` with a bounded hold; expiry is checked once per cycle
//! before any tracking decision and is inclusive at the boundary.

use chrono::{DateTime, Duration, Utc};
use sun_geometry::ActuatorAngles;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterMode {
    Auto,
    Manual,
}

impl ArbiterMode {
    pub fn is_manual(self) -> bool {
        self == ArbiterMode::Manual
    }
}

#[derive(Debug, Clone, Copy)]
struct Hold {
    angles: ActuatorAngles,
    expires_at: DateTime<Utc>,
}

/// Owns the override state exclusively. Held angles and expiry are
/// only meaningful while Manual and are cleared on any return to Auto.
#[derive(Debug, Default)]
pub struct OverrideArbiter {
    hold: Option<Hold>,
}

impl OverrideArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter Manual, unconditionally. The hold is floored at one second
    /// so a zero/negative duration cannot wedge the state machine.
    pub fn request_override(
        &mut self,
        angles: ActuatorAngles,
        hold: Duration,
        now: DateTime<Utc>,
    ) {
        let hold = hold.max(Duration::seconds(1));
        let expires_at = now + hold;
        info!(
            axis_a = angles.axis_a,
            axis_b = angles.axis_b,
            %expires_at,
            "manual override engaged"
        );
        self.hold = Some(Hold { angles, expires_at });
    }

    /// Return to Auto immediately. No-op when already Auto.
    pub fn resume_auto(&mut self) {
        if self.hold.take().is_some() {
            info!("manual override released, resuming auto tracking");
        }
    }

    /// Per-cycle expiry check. Must run before any tracking decision.
    pub fn tick(&mut self, now: DateTime<Utc>) -> ArbiterMode {
        if let Some(hold) = self.hold {
            if now >= hold.expires_at {
                info!("manual override expired, resuming auto tracking");
                self.hold = None;
            }
        }
        self.mode()
    }

    pub fn mode(&self) -> ArbiterMode {
        if self.hold.is_some() {
            ArbiterMode::Manual
        } else {
            ArbiterMode::Auto
        }
    }

    pub fn held_angles(&self) -> Option<ActuatorAngles> {
        self.hold.map(|hold| hold.angles)
    }
}
