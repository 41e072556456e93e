//! Two-tier protection.
//!
//! The fast tier runs inside every control tick and reports whether the
//! power stage must be switched off immediately. The slow tier runs from the
//! background loop, throttled to a fixed period, and only accumulates fault
//! bits for the sequencer to act on. Both share one fault register. Bits are
//! removed only by [`Protection::clear`], which checks each requested bit
//! against a warning threshold on the safe side of its trip threshold.

mod debounce;
pub use debounce::Debounce;

mod fault;
pub use fault::{describe, Fault, FaultSet};

use crate::{
    bms::PackStatus,
    config::{Config, ProtectionLimits},
    control::PllOutput,
    model::Measurements,
    transform::Abc,
};
use log::{debug, warn};
use num_traits::Float;

/// Scale from `sqrt(Va²+Vb²+Vc²)` to the AC voltage magnitude.
pub const AC_MAGNITUDE_SCALE: f32 = 0.8165;

/// AC voltage magnitude from one three-phase sample.
pub fn ac_magnitude(v: Abc) -> f32 {
    Float::sqrt(v.a * v.a + v.b * v.b + v.c * v.c) * AC_MAGNITUDE_SCALE
}

/// System status seen by the slow tier and by fault clearing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Status {
    /// Background clock in ms.
    pub now_ms: u32,
    /// In one of the run states.
    pub running: bool,
    pub enable: bool,
    pub grid_connected: bool,
    pub pll: PllOutput,
}

#[derive(Debug, Clone)]
pub struct Protection {
    limits: ProtectionLimits,
    period_us: u32,
    dc_current: f32,
    ac_current_peak: f32,
    rated_power: f32,
    freq_nominal: f32,
    freq_min: f32,
    freq_max: f32,

    faults: FaultSet,
    history: FaultSet,
    events: u32,

    ac_oc: Debounce,
    dc_uv: Debounce,
    freq: Debounce,
    island: Debounce,
    freq_armed: bool,
    last_slow_ms: u32,
    derating: f32,
}

impl Protection {
    pub fn new(config: &Config) -> Self {
        let l = &config.limits;
        Self {
            limits: l.clone(),
            period_us: config.control.period_us(),
            dc_current: config.rating.dc_current,
            ac_current_peak: config.rating.ac_current_peak,
            rated_power: config.rating.power,
            freq_nominal: config.control.grid_freq_nominal,
            freq_min: config.control.grid_freq_min,
            freq_max: config.control.grid_freq_max,
            faults: FaultSet::empty(),
            history: FaultSet::empty(),
            events: 0,
            ac_oc: Debounce::new(l.iac_oc_delay_us),
            dc_uv: Debounce::new(l.vdc_uv_delay_ms),
            freq: Debounce::new(l.freq_delay_ms),
            island: Debounce::new(l.anti_island_ms),
            freq_armed: false,
            last_slow_ms: 0,
            derating: 1.,
        }
    }

    /// Fast tier, called once per control tick.
    ///
    /// Every check runs regardless of the others. Returns true if any fast
    /// fault condition is present on this tick.
    pub fn check_fast(&mut self, m: &Measurements) -> bool {
        let l = &self.limits;
        let i_peak = m.ac.i.peak();

        let dc_ov = m.dc.vdc > l.vdc_ov_trip;
        let dc_oc = Float::abs(m.dc.idc) > l.idc_trip_factor * self.dc_current;
        let ac_sc = i_peak > l.iac_sc_trip;
        let ac_oc = self.ac_oc.update(i_peak > l.iac_oc_trip, self.period_us);
        let mosfet = m.temps.max() > l.mosfet_trip;

        let mut tripped = false;
        for (violated, fault) in [
            (dc_ov, Fault::DcOvervoltage),
            (dc_oc, Fault::DcOvercurrent),
            (ac_sc, Fault::AcShortCircuit),
            (ac_oc, Fault::AcOvercurrent),
            (mosfet, Fault::OvertempMosfet),
        ] {
            if violated {
                self.raise(fault);
                tripped = true;
            }
        }
        tripped
    }

    /// Slow tier. Does nothing until `slow_period_ms` passed since the last
    /// evaluation, returns whether it ran.
    ///
    /// Marks the pack status invalid on a BMS timeout.
    pub fn check_slow(&mut self, m: &Measurements, status: &Status, pack: &mut PackStatus) -> bool {
        let elapsed = status.now_ms.wrapping_sub(self.last_slow_ms);
        if elapsed < self.limits.slow_period_ms {
            return false;
        }
        self.last_slow_ms = status.now_ms;

        let before = self.faults;
        let l = self.limits.clone();

        if status.running {
            if self.dc_uv.update(m.dc.vdc < l.vdc_uv_trip, elapsed) {
                self.raise(Fault::DcUndervoltage);
            }
        } else {
            self.dc_uv.reset();
        }

        let v_mag = ac_magnitude(m.ac.v);
        if v_mag > l.vac_ov_trip {
            self.raise(Fault::AcOvervoltage);
        }
        if status.grid_connected && v_mag < l.vac_uv_trip {
            self.raise(Fault::AcUndervoltage);
        }

        self.check_frequency(status, elapsed);

        let t = &m.temps;
        for (temp, trip, fault) in [
            (t.heatsink, l.heatsink_trip, Fault::OvertempHeatsink),
            (t.inductor, l.inductor_trip, Fault::OvertempInductor),
            (t.ambient, l.ambient_trip, Fault::OvertempAmbient),
        ] {
            if temp > trip {
                self.raise(fault);
            }
        }

        if status.running && pack.is_stale(status.now_ms, l.bms_timeout_ms) {
            pack.valid = false;
            self.raise(Fault::BmsTimeout);
        }

        if Float::abs(m.dc.vdc_pos - m.dc.vdc_neg) > m.dc.vdc * l.np_imbalance_trip {
            self.raise(Fault::NpImbalance);
        }

        let islanded = status.grid_connected && !status.pll.locked;
        if self.island.update(islanded, elapsed) {
            self.raise(Fault::AntiIslanding);
        }

        let t_max = t.max();
        self.derating = if t_max > l.mosfet_warning {
            (1. - (t_max - l.mosfet_warning) / (l.mosfet_trip - l.mosfet_warning)).max(0.)
        } else {
            1.
        };

        for fault in self.faults.difference(before).iter() {
            warn!("fault raised: {}", fault);
        }
        true
    }

    fn check_frequency(&mut self, status: &Status, elapsed: u32) {
        if !status.grid_connected {
            self.freq_armed = false;
            self.freq.reset();
            return;
        }
        if status.pll.locked {
            self.freq_armed = true;
        }
        if !self.freq_armed {
            return;
        }

        let f = status.pll.frequency;
        let out_of_band = f > self.freq_max || f < self.freq_min;
        if self.freq.update(out_of_band, elapsed) {
            if f > self.freq_max {
                self.raise(Fault::OverFrequency);
            } else {
                self.raise(Fault::UnderFrequency);
            }
        }
    }

    /// Record a fault detected outside of the two tiers.
    pub fn raise(&mut self, fault: Fault) {
        if !self.faults.contains(fault) {
            self.events = self.events.wrapping_add(1);
        }
        self.faults.raise(fault);
        self.history.raise(fault);
    }

    /// Remove every requested fault whose clearing condition holds.
    /// Returns the faults actually cleared.
    pub fn clear(
        &mut self,
        requested: FaultSet,
        m: &Measurements,
        status: &Status,
        pack: &PackStatus,
    ) -> FaultSet {
        let cleared: FaultSet = self
            .faults
            .intersection(requested)
            .iter()
            .filter(|f| self.may_clear(*f, m, status, pack))
            .collect();

        self.faults = self.faults.difference(cleared);
        debug!(
            "clear requested {:?}, cleared {:?}, remaining {:?}",
            requested, cleared, self.faults
        );
        cleared
    }

    fn may_clear(&self, fault: Fault, m: &Measurements, status: &Status, pack: &PackStatus) -> bool {
        let l = &self.limits;
        let t = &m.temps;
        match fault {
            Fault::DcOvervoltage => m.dc.vdc < l.vdc_ov_warning,
            Fault::DcUndervoltage => m.dc.vdc > l.vdc_uv_warning,
            Fault::DcOvercurrent => Float::abs(m.dc.idc) < self.dc_current,
            Fault::AcOvervoltage => ac_magnitude(m.ac.v) < l.vac_ov_warning,
            Fault::AcUndervoltage => ac_magnitude(m.ac.v) > l.vac_uv_warning,
            Fault::AcOvercurrent | Fault::AcShortCircuit => m.ac.i.peak() < self.ac_current_peak,
            Fault::OverFrequency | Fault::UnderFrequency => {
                Float::abs(status.pll.frequency - self.freq_nominal) < l.freq_clear_band
            }
            Fault::AntiIslanding => status.pll.locked || !status.grid_connected,
            Fault::OvertempMosfet => t.max() < l.mosfet_warning,
            Fault::OvertempHeatsink => t.heatsink < l.heatsink_warning,
            Fault::OvertempInductor => t.inductor < l.inductor_warning,
            Fault::OvertempAmbient => t.ambient < l.ambient_warning,
            Fault::BmsTimeout => pack.valid && !pack.is_stale(status.now_ms, l.bms_timeout_ms),
            Fault::NpImbalance => {
                Float::abs(m.dc.vdc_pos - m.dc.vdc_neg) < m.dc.vdc * l.np_imbalance_warning
            }
            Fault::PrechargeFail => !status.enable,
            Fault::DcGroundFault
            | Fault::ModbusError
            | Fault::DesatDetected
            | Fault::GateDriver
            | Fault::EstopActive
            | Fault::Watchdog
            | Fault::InternalError => false,
        }
    }

    /// Unconditionally drop the emergency-stop bit once the input released.
    pub(crate) fn release_estop(&mut self) {
        self.faults = self.faults.difference(Fault::EstopActive.into());
    }

    pub fn faults(&self) -> FaultSet {
        self.faults
    }

    /// Every fault raised since start-up.
    pub fn history(&self) -> FaultSet {
        self.history
    }

    /// Number of times a fault bit went from clear to set.
    pub fn events(&self) -> u32 {
        self.events
    }

    pub fn describe(&self) -> &'static str {
        describe(self.faults)
    }

    /// Thermal derating factor in `[0, 1]` from the last slow evaluation.
    pub fn derating(&self) -> f32 {
        self.derating
    }

    /// Limit an active power reference to the derated rating. Never
    /// increases its magnitude.
    pub fn derate(&self, p_ref: f32) -> f32 {
        let max = self.rated_power * self.derating;
        if Float::abs(p_ref) > max {
            if p_ref > 0. {
                max
            } else {
                -max
            }
        } else {
            p_ref
        }
    }
}
