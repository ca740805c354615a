//! Maps a power sample to the heat pump's operating mode.

use serde::{Deserialize, Serialize};
use types::{OperatingCommand, OperatingMode, PowerSample};

pub const DEFAULT_SURPLUS_THRESHOLD_W: u32 = 100;
pub const DEFAULT_IMPORT_THRESHOLD_W: u32 = 300;

/// Thresholds bounding the dead-band `[-surplus_threshold_w, import_threshold_w]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPolicy {
    /// Surplus that must be exceeded before PV surplus operation is requested.
    pub surplus_threshold_w: u32,
    /// Grid import that must be exceeded before falling back to normal operation.
    pub import_threshold_w: u32,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            surplus_threshold_w: DEFAULT_SURPLUS_THRESHOLD_W,
            import_threshold_w: DEFAULT_IMPORT_THRESHOLD_W,
        }
    }
}

/// Mode carried from one cycle to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HysteresisState {
    pub mode: OperatingMode,
    /// Consecutive cycles `mode` has been emitted without a switch.
    pub held_cycles: u32,
}

impl HysteresisState {
    pub fn new(mode: OperatingMode) -> Self {
        Self {
            mode,
            held_cycles: 0,
        }
    }
}

impl DecisionPolicy {
    pub fn new(surplus_threshold_w: u32, import_threshold_w: u32) -> Self {
        Self {
            surplus_threshold_w,
            import_threshold_w,
        }
    }

    pub fn decide(
        &self,
        sample: PowerSample,
        prior: HysteresisState,
    ) -> (OperatingCommand, HysteresisState) {
        let mode = if sample.surplus_w() > self.surplus_threshold_w {
            OperatingMode::PvSurplus
        } else if sample.import_w() > self.import_threshold_w {
            OperatingMode::Normal
        } else {
            prior.mode
        };

        let next = if mode == prior.mode {
            HysteresisState {
                mode,
                held_cycles: prior.held_cycles.saturating_add(1),
            }
        } else {
            HysteresisState::new(mode)
        };

        (OperatingCommand::for_sample(mode, sample), next)
    }
}
