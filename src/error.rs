use core::fmt::Debug;
use thiserror::Error;

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("control period must be positive, got {0} s")]
    ControlPeriod(f32),
    #[error("grid frequency band must nest inside the PLL frequency bounds")]
    FrequencyBand,
    #[error("PWM margin {margin} leaves no usable range in period {period}")]
    PwmMargin { period: u16, margin: u16 },
    #[error("{0} parameters must be positive")]
    Negative(&'static str),
    #[error("{0} warning threshold must lie inside its trip threshold")]
    Hysteresis(&'static str),
    #[error("slow protection period must be non-zero")]
    SlowPeriod,
    #[error("stop ramp factor must lie in (0, 1), got {0}")]
    RampFactor(f32),
}

/// Rejected access on the telemetry register boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("illegal register address {0}")]
    IllegalAddress(u16),
    #[error("illegal value {value:#06x} for register {address}")]
    IllegalValue { address: u16, value: u16 },
}

/// Background-domain I/O failure.
#[derive(Debug, Error)]
pub enum Error<E: Debug> {
    #[error("contactor output failed: {0:?}")]
    Relay(E),
    #[error("indicator output failed: {0:?}")]
    Led(E),
    #[error("emergency-stop input unreadable: {0:?}")]
    EstopInput(E),
}
