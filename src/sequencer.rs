//! Operational state machine.
//!
//! [`Sequencer::transition`] is a pure function of the current state and the
//! [`Inputs`] sampled by the background domain. Contactor, output-stage and
//! controller actions come back as [`Effects`] for the caller to carry out,
//! so the table can be exercised without hardware.

use crate::{
    config::{Config, SequencerConfig},
    control::PowerDirection,
    protection::{Fault, FaultSet},
};
use log::{info, warn};
use num_traits::Float;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum State {
    #[default]
    Init = 0,
    Standby,
    Precharge,
    Ready,
    GridSync,
    RunInverter,
    RunRectifier,
    Stopping,
    Fault,
    Emergency,
}

impl State {
    pub const fn is_running(self) -> bool {
        matches!(self, State::RunInverter | State::RunRectifier)
    }

    /// States in which the power stage switches and the current loop runs.
    pub const fn is_switching(self) -> bool {
        matches!(
            self,
            State::RunInverter | State::RunRectifier | State::Stopping
        )
    }

    /// States in which the fast domain tracks the grid angle.
    pub const fn tracks_grid(self) -> bool {
        matches!(self, State::GridSync) || self.is_switching()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum OperationMode {
    #[default]
    GridTied = 0,
    OffGrid,
    Droop,
    VfControl,
}

impl OperationMode {
    /// Decode the two low bits of a mode selector.
    pub const fn from_bits(bits: u16) -> Self {
        match bits & 0x3 {
            0 => OperationMode::GridTied,
            1 => OperationMode::OffGrid,
            2 => OperationMode::Droop,
            _ => OperationMode::VfControl,
        }
    }
}

/// Snapshot the sequencer decides on.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Inputs {
    pub enable: bool,
    pub estop: bool,
    pub faults: FaultSet,
    /// Bus voltage in V.
    pub vdc: f32,
    /// Pack voltage reported by the BMS in V.
    pub pack_voltage: f32,
    pub grid_connected: bool,
    pub pll_locked: bool,
    pub p_ref: f32,
    pub pdc: f32,
    pub pac: f32,
    /// Time since the previous evaluation in ms.
    pub elapsed_ms: u32,
}

/// Actions requested by one evaluation. `None` leaves an output unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Effects {
    pub precharge_relay: Option<bool>,
    pub main_relay: Option<bool>,
    pub grid_relay: Option<bool>,
    /// Contactor settling time between closing the main contactor and
    /// opening the precharge contactor.
    pub settle_ms: u32,
    /// `Some(true)` enables the power-stage outputs, `Some(false)` disables them.
    pub outputs: Option<bool>,
    pub reset_pll: bool,
    pub reset_controllers: bool,
    pub raise: FaultSet,
    pub clear: FaultSet,
    /// Factor to apply to the active and reactive power references.
    pub scale_references: Option<f32>,
    pub power_dir: Option<PowerDirection>,
    pub efficiency: Option<f32>,
}

impl Effects {
    fn trip(&mut self) {
        self.outputs = Some(false);
        self.grid_relay = Some(false);
        self.main_relay = Some(false);
        self.power_dir = Some(PowerDirection::Idle);
    }
}

/// Outcome of [`Sequencer::transition`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub next: State,
    /// Time spent in `next`.
    pub timer_ms: u32,
    pub effects: Effects,
}

#[derive(Debug, Clone)]
pub struct Sequencer {
    config: SequencerConfig,
    vdc_presence: f32,
    state: State,
    previous: State,
    timer_ms: u32,
    power_dir: PowerDirection,
    efficiency: f32,
    precharge_complete: bool,
}

impl Sequencer {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.sequencer.clone(),
            vdc_presence: config.sequencer.vdc_presence_ratio * config.rating.vdc_min,
            state: State::Init,
            previous: State::Init,
            timer_ms: 0,
            power_dir: PowerDirection::Idle,
            efficiency: 0.,
            precharge_complete: false,
        }
    }

    /// Evaluate the transition table without changing any state.
    pub fn transition(&self, i: &Inputs) -> Transition {
        let c = &self.config;
        let mut e = Effects::default();
        let timer = self.timer_ms.saturating_add(i.elapsed_ms);

        if i.estop {
            e.trip();
            e.precharge_relay = Some(false);
            if !i.faults.contains(Fault::EstopActive) {
                e.raise = Fault::EstopActive.into();
            }
            return self.stay_or_enter(State::Emergency, timer, e);
        }

        let next = match self.state {
            State::Init => State::Standby,

            State::Standby => {
                if i.enable && i.faults.is_empty() && i.vdc > self.vdc_presence {
                    e.precharge_relay = Some(true);
                    State::Precharge
                } else {
                    State::Standby
                }
            }

            State::Precharge => {
                if i.pack_voltage > 0. && i.vdc >= c.precharge_ratio * i.pack_voltage {
                    e.main_relay = Some(true);
                    e.settle_ms = c.contactor_settle_ms;
                    e.precharge_relay = Some(false);
                    State::Ready
                } else if timer > c.precharge_timeout_ms {
                    e.raise = Fault::PrechargeFail.into();
                    e.precharge_relay = Some(false);
                    State::Fault
                } else {
                    State::Precharge
                }
            }

            State::Ready => {
                if !i.enable {
                    State::Stopping
                } else if i.grid_connected {
                    e.reset_pll = true;
                    State::GridSync
                } else {
                    State::Ready
                }
            }

            State::GridSync => {
                if i.pll_locked && i.faults.is_empty() {
                    e.reset_controllers = true;
                    e.outputs = Some(true);
                    e.grid_relay = Some(true);
                    let (state, dir) = direction(i.p_ref);
                    e.power_dir = Some(dir);
                    state
                } else if timer > c.grid_sync_timeout_ms {
                    State::Ready
                } else {
                    State::GridSync
                }
            }

            State::RunInverter | State::RunRectifier => {
                let next = if !i.enable || !i.faults.is_empty() {
                    State::Stopping
                } else {
                    let (state, dir) = direction(i.p_ref);
                    if dir != self.power_dir {
                        e.power_dir = Some(dir);
                    }
                    state
                };
                let dir = e.power_dir.unwrap_or(self.power_dir);
                e.efficiency = self.efficiency(dir, i.pdc, i.pac);
                next
            }

            State::Stopping => {
                e.scale_references = Some(c.stop_ramp_factor);
                if Float::abs(i.p_ref * c.stop_ramp_factor) < c.stop_power_floor {
                    e.outputs = Some(false);
                    e.grid_relay = Some(false);
                    e.power_dir = Some(PowerDirection::Idle);
                    State::Ready
                } else {
                    State::Stopping
                }
            }

            State::Fault => {
                e.trip();
                if i.faults.is_empty() && !i.enable {
                    State::Standby
                } else {
                    State::Fault
                }
            }

            State::Emergency => {
                e.trip();
                e.precharge_relay = Some(false);
                e.clear = Fault::EstopActive.into();
                State::Standby
            }
        };

        self.stay_or_enter(next, timer, e)
    }

    fn stay_or_enter(&self, next: State, timer: u32, effects: Effects) -> Transition {
        Transition {
            next,
            timer_ms: if next == self.state { timer } else { 0 },
            effects,
        }
    }

    fn efficiency(&self, dir: PowerDirection, pdc: f32, pac: f32) -> Option<f32> {
        let floor = self.config.efficiency_power_floor;
        let (pdc, pac) = (Float::abs(pdc), Float::abs(pac));
        if pdc <= floor || pac <= floor {
            return None;
        }
        match dir {
            PowerDirection::Inverter => Some(pac / pdc * 100.),
            PowerDirection::Rectifier => Some(pdc / pac * 100.),
            PowerDirection::Idle => None,
        }
    }

    /// Commit a transition computed by [`Sequencer::transition`].
    pub fn apply(&mut self, t: &Transition) {
        if t.next != self.state {
            info!("state {:?} -> {:?}", self.state, t.next);
            self.previous = self.state;
        }
        if t.effects.raise.contains(Fault::PrechargeFail) {
            warn!("precharge timed out after {} ms", self.timer_ms);
        }

        match t.next {
            State::Ready if self.state == State::Precharge => self.precharge_complete = true,
            State::Standby | State::Fault | State::Emergency => self.precharge_complete = false,
            _ => {}
        }

        self.state = t.next;
        self.timer_ms = t.timer_ms;
        if let Some(dir) = t.effects.power_dir {
            self.power_dir = dir;
        }
        if let Some(eff) = t.effects.efficiency {
            self.efficiency = eff;
        }
    }

    /// Evaluate and commit one background tick.
    pub fn step(&mut self, inputs: &Inputs) -> Effects {
        let t = self.transition(inputs);
        self.apply(&t);
        t.effects
    }

    /// Enter `Fault` from the fast domain after a trip. Does not log.
    pub fn force_fault(&mut self) {
        if self.state != State::Fault {
            self.previous = self.state;
            self.state = State::Fault;
            self.timer_ms = 0;
        }
        self.power_dir = PowerDirection::Idle;
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn previous(&self) -> State {
        self.previous
    }

    /// Time spent in the current state in ms.
    pub fn timer_ms(&self) -> u32 {
        self.timer_ms
    }

    pub fn power_direction(&self) -> PowerDirection {
        self.power_dir
    }

    /// Conversion efficiency in % from the last run evaluation above the
    /// power floor.
    pub fn efficiency_percent(&self) -> f32 {
        self.efficiency
    }

    pub fn precharge_complete(&self) -> bool {
        self.precharge_complete
    }
}

fn direction(p_ref: f32) -> (State, PowerDirection) {
    if p_ref >= 0. {
        (State::RunInverter, PowerDirection::Inverter)
    } else {
        (State::RunRectifier, PowerDirection::Rectifier)
    }
}
