use crate::{
    config::PwmConfig,
    transform::{dq_to_abc, Abc, Dq},
};
use core::f32::consts::TAU;

/// Modulation indices and compare values for one switching period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModulatorOutput {
    /// Per-phase indices after injection, within `[-1, 1]`.
    pub m: Abc,
    /// Largest index before common-mode injection.
    pub m_max: f32,
    /// 60° sector of the reference angle, 1 to 6.
    pub sector: u8,
    pub duty: [u16; 3],
}

/// Three-level space-vector modulator with min-max injection.
#[derive(Debug, Clone)]
pub struct Modulator {
    period: u16,
    margin: u16,
    out: ModulatorOutput,
}

impl Modulator {
    pub fn new(config: &PwmConfig) -> Self {
        let mid = config.period / 2;
        Self {
            period: config.period,
            margin: config.margin,
            out: ModulatorOutput {
                duty: [mid; 3],
                sector: 1,
                ..Default::default()
            },
        }
    }

    /// Calculate the compare values for a voltage reference.
    /// Arguments:
    /// `v_ref`: voltage reference in synchronous coordinates.
    /// `theta`: angle of synchronous coordinates.
    /// `vdc`: DC-bus voltage.
    pub fn modulate(&mut self, v_ref: Dq, theta: f32, vdc: f32) -> ModulatorOutput {
        let v_abc = dq_to_abc(v_ref, theta);

        // An absent bus leaves the outputs at the midpoint
        let half = 0.5 * vdc;
        let m = if half > 0. {
            v_abc.map(|v| v / half)
        } else {
            Abc::default()
        };

        let m_max = m.max();
        let m = min_max_injection(m).map(|x| x.clamp(-1., 1.));

        self.out = ModulatorOutput {
            m,
            m_max,
            sector: sector(theta),
            duty: [
                self.duty(m.a),
                self.duty(m.b),
                self.duty(m.c),
            ],
        };
        self.out
    }

    pub fn output(&self) -> ModulatorOutput {
        self.out
    }

    pub fn period(&self) -> u16 {
        self.period
    }

    /// Center-aligned compare value `period/2·(1 + m)`, kept `margin` counts
    /// away from either end of the period.
    fn duty(&self, m: f32) -> u16 {
        let raw = 0.5 * f32::from(self.period) * (1. + m);
        // Saturating float cast, NaN becomes zero
        (raw as u16).clamp(self.margin, self.period - self.margin)
    }
}

/// Symmetrize the phase references by subtracting the mean of the largest
/// and smallest, identical to space-vector PWM.
pub fn min_max_injection(m: Abc) -> Abc {
    let offset = -0.5 * (m.max() + m.min());
    m.map(|x| x + offset)
}

/// One-based 60° sector of `theta`, for diagnostics only.
///
/// Angles outside of `[0, 2π)` are clamped to the first or last sector.
pub fn sector(theta: f32) -> u8 {
    let raw = theta * (6. / TAU);
    // Saturating cast maps negatives and NaN to zero
    (raw as u8).min(5) + 1
}
