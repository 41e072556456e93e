//! Tunables of the control core.
//!
//! `Default` reproduces the 120 kW reference design: 850 V DC link,
//! 480 V / 60 Hz grid, 100 kHz switching with a 200 kHz control rate.

use crate::error::ConfigError;
use core::f32::consts::TAU;

/// Converts a line-line RMS voltage into the magnitude computed from an
/// instantaneous three-phase sample, `sqrt(Va²+Vb²+Vc²)·0.8165`.
pub fn line_rms_to_magnitude(v_ll_rms: f32) -> f32 {
    v_ll_rms * crate::protection::AC_MAGNITUDE_SCALE
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlConfig {
    /// Control period in seconds.
    pub t_s: f32,
    pub grid_freq_nominal: f32,
    pub grid_freq_min: f32,
    pub grid_freq_max: f32,
    pub pll_kp: f32,
    pub pll_ki: f32,
    /// PLL integrator (angular frequency) bounds in Hz.
    pub pll_freq_floor: f32,
    pub pll_freq_ceiling: f32,
    /// |Vq| below which the PLL may report lock.
    pub pll_lock_vq: f32,
    pub current_kp: f32,
    pub current_kr: f32,
    /// Damping of the resonant term in rad/s.
    pub current_omega_c: f32,
    /// Converter-side filter inductance in henries.
    pub inductance: f32,
    /// Minimum Vd for deriving current references from power references.
    pub vd_valid: f32,
    pub np_kp: f32,
    pub np_offset_limit: f32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            t_s: 5e-6,
            grid_freq_nominal: 60.,
            grid_freq_min: 55.,
            grid_freq_max: 65.,
            pll_kp: 100.,
            pll_ki: 5000.,
            pll_freq_floor: 45.,
            pll_freq_ceiling: 70.,
            pll_lock_vq: 20.,
            current_kp: 0.5,
            current_kr: 50.,
            current_omega_c: 10.,
            inductance: 60e-6,
            vd_valid: 50.,
            np_kp: 0.1,
            np_offset_limit: 0.05,
        }
    }
}

impl ControlConfig {
    pub fn omega_nominal(&self) -> f32 {
        TAU * self.grid_freq_nominal
    }

    /// Control period in whole microseconds.
    pub fn period_us(&self) -> u32 {
        (self.t_s * 1e6 + 0.5) as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PwmConfig {
    /// Timer counts per switching period.
    pub period: u16,
    /// Minimum distance of a compare value from either end of the period.
    pub margin: u16,
}

impl Default for PwmConfig {
    fn default() -> Self {
        // 170 MHz timer clock, 100 kHz switching
        Self {
            period: 1700,
            margin: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RatingConfig {
    pub power: f32,
    pub ac_current: f32,
    /// Peak of the rated AC current.
    pub ac_current_peak: f32,
    pub dc_current: f32,
    pub vdc_min: f32,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            power: 120_000.,
            ac_current: 160.,
            ac_current_peak: 226.,
            dc_current: 180.,
            vdc_min: 700.,
        }
    }
}

/// Trip and warning thresholds. Every warning threshold must lie strictly
/// on the safe side of its trip threshold.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtectionLimits {
    pub vdc_ov_trip: f32,
    pub vdc_ov_warning: f32,
    pub vdc_uv_trip: f32,
    pub vdc_uv_warning: f32,
    pub vdc_uv_delay_ms: u32,
    pub idc_trip_factor: f32,
    pub iac_oc_trip: f32,
    pub iac_oc_delay_us: u32,
    pub iac_sc_trip: f32,
    pub vac_ov_trip: f32,
    pub vac_uv_trip: f32,
    pub vac_ov_warning: f32,
    pub vac_uv_warning: f32,
    pub freq_delay_ms: u32,
    /// Frequency clears within nominal ± this band.
    pub freq_clear_band: f32,
    pub mosfet_trip: f32,
    pub mosfet_warning: f32,
    pub heatsink_trip: f32,
    pub heatsink_warning: f32,
    pub inductor_trip: f32,
    pub inductor_warning: f32,
    pub ambient_trip: f32,
    pub ambient_warning: f32,
    /// Rail imbalance as a fraction of the bus voltage.
    pub np_imbalance_trip: f32,
    pub np_imbalance_warning: f32,
    pub bms_timeout_ms: u32,
    pub anti_island_ms: u32,
    pub slow_period_ms: u32,
}

impl Default for ProtectionLimits {
    fn default() -> Self {
        Self {
            vdc_ov_trip: 1050.,
            vdc_ov_warning: 1020.,
            vdc_uv_trip: 680.,
            vdc_uv_warning: 720.,
            vdc_uv_delay_ms: 100,
            idc_trip_factor: 1.2,
            iac_oc_trip: 240.,
            iac_oc_delay_us: 1000,
            iac_sc_trip: 320.,
            vac_ov_trip: line_rms_to_magnitude(528.),
            vac_uv_trip: line_rms_to_magnitude(408.),
            vac_ov_warning: line_rms_to_magnitude(504.),
            vac_uv_warning: line_rms_to_magnitude(456.),
            freq_delay_ms: 100,
            freq_clear_band: 1.,
            mosfet_trip: 160.,
            mosfet_warning: 125.,
            heatsink_trip: 85.,
            heatsink_warning: 75.,
            inductor_trip: 130.,
            inductor_warning: 110.,
            ambient_trip: 60.,
            ambient_warning: 45.,
            np_imbalance_trip: 0.05,
            np_imbalance_warning: 0.025,
            bms_timeout_ms: 5000,
            anti_island_ms: 2000,
            slow_period_ms: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SequencerConfig {
    /// Fraction of `RatingConfig::vdc_min` that counts as bus voltage present.
    pub vdc_presence_ratio: f32,
    /// Fraction of the pack voltage that completes precharge.
    pub precharge_ratio: f32,
    pub precharge_timeout_ms: u32,
    pub contactor_settle_ms: u32,
    pub grid_sync_timeout_ms: u32,
    pub stop_ramp_factor: f32,
    pub stop_power_floor: f32,
    pub efficiency_power_floor: f32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            vdc_presence_ratio: 0.5,
            precharge_ratio: 0.95,
            precharge_timeout_ms: 2000,
            contactor_settle_ms: 50,
            grid_sync_timeout_ms: 5000,
            stop_ramp_factor: 0.9,
            stop_power_floor: 100.,
            efficiency_power_floor: 1000.,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    pub control: ControlConfig,
    pub pwm: PwmConfig,
    pub rating: RatingConfig,
    pub limits: ProtectionLimits,
    pub sequencer: SequencerConfig,
}

impl Config {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.control;
        if !(c.t_s > 0.) {
            return Err(ConfigError::ControlPeriod(c.t_s));
        }
        if !(c.pll_freq_floor < c.grid_freq_min
            && c.grid_freq_min < c.grid_freq_nominal
            && c.grid_freq_nominal < c.grid_freq_max
            && c.grid_freq_max < c.pll_freq_ceiling)
        {
            return Err(ConfigError::FrequencyBand);
        }
        if c.inductance < 0. || !(c.vd_valid > 0.) {
            return Err(ConfigError::Negative("control"));
        }

        let p = &self.pwm;
        if p.period == 0 || u32::from(p.margin) * 2 >= u32::from(p.period) {
            return Err(ConfigError::PwmMargin {
                period: p.period,
                margin: p.margin,
            });
        }

        let r = &self.rating;
        if !(r.power > 0. && r.ac_current > 0. && r.dc_current > 0. && r.vdc_min > 0.) {
            return Err(ConfigError::Negative("rating"));
        }

        let l = &self.limits;
        let below = [
            ("DC over-voltage", l.vdc_ov_warning, l.vdc_ov_trip),
            ("AC over-voltage", l.vac_ov_warning, l.vac_ov_trip),
            ("MOSFET temperature", l.mosfet_warning, l.mosfet_trip),
            ("heatsink temperature", l.heatsink_warning, l.heatsink_trip),
            ("inductor temperature", l.inductor_warning, l.inductor_trip),
            ("ambient temperature", l.ambient_warning, l.ambient_trip),
            ("NP imbalance", l.np_imbalance_warning, l.np_imbalance_trip),
            ("AC over-current", r.ac_current_peak, l.iac_oc_trip),
        ];
        let above = [
            ("DC under-voltage", l.vdc_uv_warning, l.vdc_uv_trip),
            ("AC under-voltage", l.vac_uv_warning, l.vac_uv_trip),
        ];
        for (name, warning, trip) in below {
            if !(warning < trip) {
                return Err(ConfigError::Hysteresis(name));
            }
        }
        for (name, warning, trip) in above {
            if !(warning > trip) {
                return Err(ConfigError::Hysteresis(name));
            }
        }
        if !(l.iac_oc_trip < l.iac_sc_trip) {
            return Err(ConfigError::Hysteresis("AC short circuit"));
        }
        if l.slow_period_ms == 0 {
            return Err(ConfigError::SlowPeriod);
        }

        let s = &self.sequencer;
        if !(s.stop_ramp_factor > 0. && s.stop_ramp_factor < 1.) {
            return Err(ConfigError::RampFactor(s.stop_ramp_factor));
        }

        Ok(())
    }
}

/// Builder for the commonly adjusted parameters.
#[derive(Debug, Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn control_period(mut self, t_s: f32) -> Self {
        self.config.control.t_s = t_s;
        self
    }

    pub fn grid_frequency(mut self, nominal: f32, min: f32, max: f32) -> Self {
        self.config.control.grid_freq_nominal = nominal;
        self.config.control.grid_freq_min = min;
        self.config.control.grid_freq_max = max;
        self
    }

    pub fn pwm_period(mut self, period: u16, margin: u16) -> Self {
        self.config.pwm = PwmConfig { period, margin };
        self
    }

    pub fn rated_power(mut self, power: f32) -> Self {
        self.config.rating.power = power;
        self
    }

    pub fn rated_current(mut self, ac_current: f32) -> Self {
        self.config.rating.ac_current = ac_current;
        self
    }

    pub fn inductance(mut self, inductance: f32) -> Self {
        self.config.control.inductance = inductance;
        self
    }

    pub fn limits(mut self, limits: ProtectionLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn sequencer(mut self, sequencer: SequencerConfig) -> Self {
        self.config.sequencer = sequencer;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
