//! Battery pack status reported by the external BMS.

use crate::control::PackLimits;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PackStatus {
    /// Pack voltage in V.
    pub voltage: f32,
    pub current: f32,
    /// State of charge in %.
    pub soc: f32,
    /// State of health in %.
    pub soh: f32,
    pub temperature_max: f32,
    pub temperature_min: f32,
    /// Maximum charge current in A.
    pub charge_limit: f32,
    /// Maximum discharge current in A.
    pub discharge_limit: f32,
    /// Raw BMS status flags.
    pub status: u16,
    /// Background-clock time of the last update in ms.
    pub last_update_ms: u32,
    pub valid: bool,
}

impl PackStatus {
    /// True once no update arrived for longer than `timeout_ms`.
    ///
    /// The clock may wrap.
    pub fn is_stale(&self, now_ms: u32, timeout_ms: u32) -> bool {
        now_ms.wrapping_sub(self.last_update_ms) > timeout_ms
    }

    pub fn limits(&self) -> PackLimits {
        PackLimits {
            charge: self.charge_limit,
            discharge: self.discharge_limit,
        }
    }
}
