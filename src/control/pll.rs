//! Synchronous-reference-frame PLL.
//!
//! Each update Clarke/Park-transforms the grid voltage with the tracked
//! angle and drives Vq to zero with a PI controller whose integral is the
//! angular frequency. The lock flag is recomputed every update and never
//! latches.

use super::pi::PiController;
use crate::{
    config::ControlConfig,
    transform::{abc_to_dq, Abc, Dq},
};
use core::f32::consts::TAU;
use num_traits::Float;

/// Snapshot of the PLL after an update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PllOutput {
    /// Grid angle in `[0, 2π)`.
    pub theta: f32,
    /// Angular frequency in rad/s.
    pub omega: f32,
    /// Frequency in Hz.
    pub frequency: f32,
    /// Grid voltage in the tracked frame.
    pub v: Dq,
    pub locked: bool,
}

#[derive(Debug, Clone)]
pub struct Pll {
    t_s: f32,
    omega_nominal: f32,
    lock_vq: f32,
    freq_min: f32,
    freq_max: f32,
    pi: PiController,
    out: PllOutput,
}

impl Pll {
    pub fn new(config: &ControlConfig) -> Self {
        let omega_nominal = config.omega_nominal();
        let mut pi = PiController::new(
            config.pll_kp,
            config.pll_ki,
            TAU * config.pll_freq_floor,
            TAU * config.pll_freq_ceiling,
        );
        pi.reset(omega_nominal);

        Self {
            t_s: config.t_s,
            omega_nominal,
            lock_vq: config.pll_lock_vq,
            freq_min: config.grid_freq_min,
            freq_max: config.grid_freq_max,
            pi,
            out: PllOutput {
                theta: 0.,
                omega: omega_nominal,
                frequency: config.grid_freq_nominal,
                v: Dq::default(),
                locked: false,
            },
        }
    }

    /// Advance the PLL by one control period.
    pub fn update(&mut self, v_abc: Abc) -> PllOutput {
        let v = abc_to_dq(v_abc, self.out.theta);

        // Negative feedback on Vq
        let omega = self.pi.update(-v.q, self.t_s);

        let frequency = omega / TAU;
        self.out = PllOutput {
            theta: wrap_angle(self.out.theta + omega * self.t_s),
            omega,
            frequency,
            v,
            locked: Float::abs(v.q) < self.lock_vq
                && (self.freq_min..=self.freq_max).contains(&frequency),
        };
        self.out
    }

    /// Zero the angle, restore nominal frequency and drop lock.
    pub fn reset(&mut self) {
        self.pi.reset(self.omega_nominal);
        self.out.theta = 0.;
        self.out.omega = self.omega_nominal;
        self.out.frequency = self.omega_nominal / TAU;
        self.out.locked = false;
    }

    pub fn output(&self) -> PllOutput {
        self.out
    }

    pub fn is_locked(&self) -> bool {
        self.out.locked
    }

    pub fn integral(&self) -> f32 {
        self.pi.integral()
    }
}

/// Wrap into `[0, 2π)`.
pub fn wrap_angle(theta: f32) -> f32 {
    let theta = theta % TAU;
    let theta = if theta < 0. { theta + TAU } else { theta };
    if theta >= TAU {
        0.
    } else {
        theta
    }
}
