//! Control pipeline run by the fast domain.

pub mod current;
pub use current::{CurrentLoop, PackLimits};

pub mod np_balance;
pub use np_balance::NeutralPointBalancer;

pub mod pi;
pub use pi::PiController;

pub mod pll;
pub use pll::{Pll, PllOutput};

pub mod pr;
pub use pr::PrController;

pub mod pwm;
pub use pwm::{Modulator, ModulatorOutput};

/// Power and current references.
///
/// `p_ref`, `q_ref`, `vdc_ref` and `pf_ref` are written by the background
/// domain. `id_ref` and `iq_ref` are derived by the current loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct References {
    /// Active power in W, positive when exporting to the grid.
    pub p_ref: f32,
    /// Reactive power in VAr.
    pub q_ref: f32,
    pub id_ref: f32,
    pub iq_ref: f32,
    pub vdc_ref: f32,
    pub pf_ref: f32,
}

/// Direction of active power flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerDirection {
    #[default]
    Idle,
    /// DC to AC.
    Inverter,
    /// AC to DC.
    Rectifier,
}
