//! Control and protection core for a grid-interactive three-level T-type
//! converter between a battery pack and a three-phase grid.
//!
//! [`Inverter`] owns every piece of shared state and exposes the two timing
//! domains as entry points: [`Inverter::control_tick`] runs once per control
//! period from the PWM-synchronous interrupt, [`Inverter::background_tick`]
//! runs from the best-effort main loop. The fast domain never blocks, never
//! allocates and never logs.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod bms;
pub use bms::PackStatus;

pub mod config;
pub use config::Config;

pub mod control;
pub use control::{PowerDirection, References};

pub mod drive;
pub use drive::{Drive, PwmDrive};

pub mod error;
pub use error::{ConfigError, Error, RegisterError};

pub mod model;
pub use model::{MeasurementSource, Measurements};

pub mod protection;
pub use protection::{Fault, FaultSet, Protection};

pub mod sequencer;
pub use sequencer::{OperationMode, Sequencer, State};

pub mod switchgear;
pub use switchgear::{GpioSwitchgear, Led, Relay, Switchgear};

pub mod telemetry;
pub use telemetry::{Commands, HoldingRegisters, InputRegisters};

pub mod transform;

use control::{CurrentLoop, Modulator, ModulatorOutput, NeutralPointBalancer, Pll};
use embedded_hal::blocking::delay::DelayMs;
use log::error;
use sequencer::{Effects, Inputs};

/// Owned context of the converter.
///
/// Fields written by only one domain per tick boundary:
/// - fast: measurements, PLL, current loop, modulator, NP balancer, tick
///   counter and the trip flag;
/// - background: sequencer, commands, effective references, stop ramp,
///   pack status, contactors and LEDs.
///
/// Commands are never modified by the core. The references the current loop
/// follows are recomputed from them on every background tick.
///
/// The fault register is shared. The fast tier only ever adds bits to it.
pub struct Inverter<D, S, T> {
    pub drive: D,
    pub switchgear: S,
    pub delay: T,

    config: Config,
    pll: Pll,
    current: CurrentLoop,
    modulator: Modulator,
    np_balancer: NeutralPointBalancer,
    protection: Protection,
    sequencer: Sequencer,

    measurements: Measurements,
    pack: PackStatus,
    commands: Commands,
    holding: HoldingRegisters,
    pending_clear: FaultSet,
    /// Stopping-ramp factor on the commanded P and Q.
    ramp: f32,

    fast_trip: bool,
    control_ticks: u32,
    last_background_ms: u32,
    grid_closed: bool,
    status_led: bool,
}

impl<D, S, T> Inverter<D, S, T>
where
    D: Drive,
    S: Switchgear,
    T: DelayMs<u32>,
{
    pub fn new(config: Config, drive: D, switchgear: S, delay: T) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            drive,
            switchgear,
            delay,
            pll: Pll::new(&config.control),
            current: CurrentLoop::new(&config),
            modulator: Modulator::new(&config.pwm),
            np_balancer: NeutralPointBalancer::new(&config.control),
            protection: Protection::new(&config),
            sequencer: Sequencer::new(&config),
            config,
            measurements: Measurements::default(),
            pack: PackStatus::default(),
            commands: Commands::default(),
            holding: HoldingRegisters::default(),
            pending_clear: FaultSet::empty(),
            ramp: 1.,
            fast_trip: false,
            control_ticks: 0,
            last_background_ms: 0,
            grid_closed: false,
            status_led: false,
        })
    }

    /// Fast domain. Call once per control period with a fresh snapshot.
    pub fn control_tick(&mut self, m: Measurements) {
        self.measurements = m;

        if self.protection.check_fast(&m) {
            self.drive.disable_outputs();
            self.sequencer.force_fault();
            self.fast_trip = true;
            return;
        }

        let state = self.sequencer.state();
        if state.tracks_grid() {
            let grid = self.pll.update(m.ac.v);

            if state.is_switching() {
                let v_ref = self.current.update(
                    m.ac.i,
                    &grid,
                    m.dc.vdc,
                    self.sequencer.power_direction(),
                    self.pack.limits(),
                );
                let out = self.modulator.modulate(v_ref, grid.theta, m.dc.vdc);
                self.np_balancer.offset(m.dc.vdc_pos, m.dc.vdc_neg);
                self.drive.set_duties(out.duty);
            }
        }

        self.control_ticks = self.control_ticks.wrapping_add(1);
    }

    /// [`Inverter::control_tick`] with a snapshot pulled from `source`.
    pub fn control_tick_from<M: MeasurementSource>(&mut self, source: &mut M) {
        let m = source.measure();
        self.control_tick(m);
    }

    /// Background domain. `now_ms` is a free-running millisecond clock that
    /// may wrap. Returns the state after this evaluation.
    ///
    /// I/O failures raise [`Fault::InternalError`], force the `Fault` state
    /// and are returned after the outputs were disabled.
    pub fn background_tick(&mut self, now_ms: u32) -> Result<State, Error<S::Error>> {
        let elapsed_ms = now_ms.wrapping_sub(self.last_background_ms);
        self.last_background_ms = now_ms;

        if core::mem::take(&mut self.fast_trip) {
            error!("fast trip: {}", self.protection.describe());
        }

        let estop = self.switchgear.estop_asserted();
        let estop = self.io(estop, Error::EstopInput)?;

        let status = self.status(now_ms);
        self.protection
            .check_slow(&self.measurements, &status, &mut self.pack);

        self.update_references();

        if !self.pending_clear.is_empty() {
            let requested = core::mem::take(&mut self.pending_clear);
            self.protection
                .clear(requested, &self.measurements, &status, &self.pack);
        }

        let m = &self.measurements;
        let inputs = Inputs {
            enable: self.commands.enable,
            estop,
            faults: self.protection.faults(),
            vdc: m.dc.vdc,
            pack_voltage: self.pack.voltage,
            grid_connected: self.commands.grid_connect,
            pll_locked: self.pll.is_locked(),
            p_ref: self.current.references().p_ref,
            pdc: m.dc.pdc,
            pac: m.ac.p,
            elapsed_ms,
        };
        let effects = self.sequencer.step(&inputs);
        self.apply(&effects)?;
        self.update_leds()?;

        Ok(self.sequencer.state())
    }

    fn status(&self, now_ms: u32) -> protection::Status {
        protection::Status {
            now_ms,
            running: self.sequencer.state().is_running(),
            enable: self.commands.enable,
            grid_connected: self.grid_closed,
            pll: self.pll.output(),
        }
    }

    fn apply(&mut self, e: &Effects) -> Result<(), Error<S::Error>> {
        if e.outputs == Some(false) {
            self.drive.disable_outputs();
        }

        for fault in e.raise.iter() {
            self.protection.raise(fault);
        }
        if e.clear.contains(Fault::EstopActive) {
            self.protection.release_estop();
        }

        if e.reset_pll {
            self.pll.reset();
        }
        if e.reset_controllers {
            self.current.reset();
            self.ramp = 1.;
            self.update_references();
        }

        if let Some(closed) = e.main_relay {
            let r = self.switchgear.set_relay(Relay::Main, closed);
            self.io(r, Error::Relay)?;
            if closed && e.settle_ms > 0 {
                self.delay.delay_ms(e.settle_ms);
            }
        }
        if let Some(closed) = e.precharge_relay {
            let r = self.switchgear.set_relay(Relay::Precharge, closed);
            self.io(r, Error::Relay)?;
        }

        if e.outputs == Some(true) {
            self.drive.enable_outputs();
        }
        if let Some(closed) = e.grid_relay {
            let r = self.switchgear.set_relay(Relay::Grid, closed);
            self.io(r, Error::Relay)?;
            self.grid_closed = closed;
        }

        if let Some(k) = e.scale_references {
            self.ramp *= k;
            self.update_references();
        }
        Ok(())
    }

    /// Effective references: the commands scaled by the stop ramp, with
    /// active power limited to the derated rating.
    fn update_references(&mut self) {
        let c = &self.commands;
        let refs = self.current.references_mut();
        refs.p_ref = self.protection.derate(c.p_ref * self.ramp);
        refs.q_ref = c.q_ref * self.ramp;
        refs.pf_ref = c.pf_ref;
        refs.vdc_ref = c.vdc_ref;
    }

    fn update_leds(&mut self) -> Result<(), Error<S::Error>> {
        let fault = !self.protection.faults().is_empty();
        let r = self.switchgear.set_led(Led::Fault, fault);
        self.io(r, Error::Led)?;

        self.status_led = match self.sequencer.state() {
            State::RunInverter | State::RunRectifier => !self.status_led,
            State::Ready => true,
            _ => false,
        };
        let r = self.switchgear.set_led(Led::Status, self.status_led);
        self.io(r, Error::Led)
    }

    fn io<R>(
        &mut self,
        result: Result<R, S::Error>,
        wrap: fn(S::Error) -> Error<S::Error>,
    ) -> Result<R, Error<S::Error>> {
        result.map_err(|e| {
            let e = wrap(e);
            error!("{}", e);
            self.drive.disable_outputs();
            self.protection.raise(Fault::InternalError);
            self.sequencer.force_fault();
            e
        })
    }

    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    /// Take new operator commands. They reach the current loop on the next
    /// background tick. A fault-reset request is queued once.
    pub fn set_commands(&mut self, mut commands: Commands) {
        if commands.fault_reset {
            self.request_fault_clear(FaultSet::all());
            commands.fault_reset = false;
        }
        self.commands = commands;
        self.holding = HoldingRegisters::encode(&commands);
    }

    /// Latest pack status from the BMS link. `last_update_ms` must be on the
    /// background clock.
    pub fn update_pack(&mut self, pack: PackStatus) {
        self.pack = pack;
    }

    /// Ask the next background tick to clear `faults`. Bits whose clearing
    /// condition does not hold stay set.
    pub fn request_fault_clear(&mut self, faults: FaultSet) {
        self.pending_clear |= faults;
    }

    pub fn telemetry(&self) -> InputRegisters {
        InputRegisters::encode(&telemetry::Snapshot {
            state: self.sequencer.state(),
            pll_locked: self.pll.is_locked(),
            grid_connected: self.grid_closed,
            bms_valid: self.pack.valid,
            faults: self.protection.faults(),
            measurements: self.measurements,
            efficiency: self.sequencer.efficiency_percent(),
            soc: self.pack.soc,
        })
    }

    /// Write one holding register and act on the decoded commands.
    pub fn write_holding_register(&mut self, address: u16, value: u16) -> Result<(), RegisterError> {
        let mut holding = self.holding;
        holding.write(address, value)?;
        self.set_commands(holding.decode());
        Ok(())
    }

    pub fn read_holding_register(&self, address: u16) -> Result<u16, RegisterError> {
        self.holding.read(address)
    }

    pub fn state(&self) -> State {
        self.sequencer.state()
    }

    pub fn faults(&self) -> FaultSet {
        self.protection.faults()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn protection(&self) -> &Protection {
        &self.protection
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn pll(&self) -> &Pll {
        &self.pll
    }

    /// References the current loop follows.
    pub fn references(&self) -> &References {
        self.current.references()
    }

    pub fn pack(&self) -> &PackStatus {
        &self.pack
    }

    /// Modulator output of the last switching tick.
    pub fn modulator_output(&self) -> ModulatorOutput {
        self.modulator.output()
    }

    /// Neutral-point offset computed on the last switching tick. Not
    /// applied to the modulator.
    pub fn np_offset(&self) -> f32 {
        self.np_balancer.last()
    }

    /// Control ticks completed without a fast trip.
    pub fn control_ticks(&self) -> u32 {
        self.control_ticks
    }

    pub fn grid_relay_closed(&self) -> bool {
        self.grid_closed
    }
}
