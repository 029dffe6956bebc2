//! Fuse timer shared by the lightning boss and staked wagers.
//!
//! Time math is a pure `tick` over elapsed milliseconds; expiry is detected
//! separately with `just_expired` so the caller owns every side effect.

use serde::{Deserialize, Serialize};

pub const TICK_INTERVAL_MS: u64 = 100;
/// 30 seconds at 100ms per tick.
pub const LIGHTNING_TICKS: u32 = 300;
/// 45 seconds at 100ms per tick.
pub const WAGER_TICKS: u32 = 450;

const FULL: f64 = 100.0;
// Absorbs float drift from summing 100 / ticks repeatedly.
const EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusePhase {
    Idle,
    Running,
    /// Held while an answer is being scored.
    Paused,
    Expired,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuseTimer {
    /// Percent of the fuse left, in `[0, 100]`.
    pub remaining: f64,
    pub duration_ticks: u32,
    pub phase: FusePhase,
}

impl Default for FuseTimer {
    fn default() -> Self {
        Self::idle()
    }
}

impl FuseTimer {
    pub fn idle() -> Self {
        Self { remaining: FULL, duration_ticks: 0, phase: FusePhase::Idle }
    }

    /// A full fuse, burning.
    pub fn armed(duration_ticks: u32) -> Self {
        Self { remaining: FULL, duration_ticks: duration_ticks.max(1), phase: FusePhase::Running }
    }

    pub fn is_running(&self) -> bool {
        self.phase == FusePhase::Running
    }

    pub fn is_expired(&self) -> bool {
        self.phase == FusePhase::Expired
    }

    /// Burn `elapsed_ms` worth of fuse. Only a running fuse moves.
    pub fn tick(self, elapsed_ms: u64) -> Self {
        if !self.is_running() {
            return self;
        }
        let ticks = elapsed_ms as f64 / TICK_INTERVAL_MS as f64;
        let remaining = self.remaining - ticks * FULL / self.duration_ticks as f64;
        if remaining <= EPSILON {
            Self { remaining: 0.0, phase: FusePhase::Expired, ..self }
        } else {
            Self { remaining: remaining.min(FULL), ..self }
        }
    }

    pub fn pause(self) -> Self {
        if self.is_running() {
            Self { phase: FusePhase::Paused, ..self }
        } else {
            self
        }
    }

    /// Reset to full and stop.
    pub fn cancel(self) -> Self {
        match self.phase {
            FusePhase::Idle => self,
            _ => Self { remaining: FULL, phase: FusePhase::Cancelled, ..self },
        }
    }
}

/// Edge detector: true only on the transition into `Expired`.
pub fn just_expired(before: &FuseTimer, after: &FuseTimer) -> bool {
    !before.is_expired() && after.is_expired()
}
