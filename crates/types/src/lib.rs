use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw point values before SunSpec scale factors are applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointValue {
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
}

/// Basic identity for a meter or heat pump endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.unit_id)
    }
}

/// Net grid power at the meter in watts.
///
/// Positive values are net import (household consumption drawn from the grid),
/// negative values are net export, i.e. PV surplus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PowerSample(i32);

impl PowerSample {
    pub const fn from_watts(watts: i32) -> Self {
        Self(watts)
    }

    pub const fn watts(self) -> i32 {
        self.0
    }

    /// Power available to consumers: the negated net power.
    pub const fn excess_w(self) -> i32 {
        self.0.saturating_neg()
    }

    pub fn surplus_w(self) -> u32 {
        if self.0 < 0 {
            self.0.unsigned_abs()
        } else {
            0
        }
    }

    pub fn import_w(self) -> u32 {
        if self.0 > 0 {
            self.0.unsigned_abs()
        } else {
            0
        }
    }
}

impl fmt::Display for PowerSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} W", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Normal,
    PvSurplus,
}

impl OperatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OperatingMode::Normal => "normal",
            OperatingMode::PvSurplus => "pv_surplus",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the heat pump should be told for one cycle.
///
/// `excess_w` is the power hint handed to the heat pump. It is never negative
/// in [`OperatingMode::PvSurplus`] and never positive in
/// [`OperatingMode::Normal`], where it carries the grid import as a negative
/// number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingCommand {
    pub mode: OperatingMode,
    pub excess_w: i32,
}

impl OperatingCommand {
    pub fn for_sample(mode: OperatingMode, sample: PowerSample) -> Self {
        let excess = sample.excess_w();
        let excess_w = match mode {
            OperatingMode::PvSurplus => excess.max(0),
            OperatingMode::Normal => excess.min(0),
        };
        Self { mode, excess_w }
    }
}

impl fmt::Display for OperatingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} W excess)", self.mode, self.excess_w)
    }
}
