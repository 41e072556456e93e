use embedded_hal::blocking::delay::DelayMs;
use std::f64::consts::TAU;
use tconv::{
    transform::Abc, Commands, Config, ConfigError, Drive, Error, Fault, FaultSet, Inverter, Led,
    Measurements, PackStatus, Relay, State, Switchgear,
};

/// Control ticks per background millisecond at the default 5 µs period.
const TICKS_PER_MS: u32 = 200;
const GRID_PEAK: f64 = 391.9;

#[derive(Debug, Default)]
struct FakeDrive {
    duties: [u16; 3],
    updates: u32,
    enabled: bool,
    disables: u32,
}

impl Drive for FakeDrive {
    fn set_duties(&mut self, duties: [u16; 3]) {
        self.duties = duties;
        self.updates += 1;
    }

    fn enable_outputs(&mut self) {
        self.enabled = true;
    }

    fn disable_outputs(&mut self) {
        self.enabled = false;
        self.disables += 1;
    }
}

#[derive(Debug, Default)]
struct FakeIo {
    relays: [bool; 3],
    leds: [bool; 2],
    estop: bool,
    broken_relays: bool,
}

impl Switchgear for FakeIo {
    type Error = &'static str;

    fn set_relay(&mut self, relay: Relay, closed: bool) -> Result<(), Self::Error> {
        if self.broken_relays {
            return Err("relay driver not responding");
        }
        self.relays[relay as usize] = closed;
        Ok(())
    }

    fn set_led(&mut self, led: Led, on: bool) -> Result<(), Self::Error> {
        self.leds[led as usize] = on;
        Ok(())
    }

    fn estop_asserted(&mut self) -> Result<bool, Self::Error> {
        Ok(self.estop)
    }
}

#[derive(Debug, Default)]
struct FakeDelay {
    total_ms: u32,
}

impl DelayMs<u32> for FakeDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.total_ms += ms;
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pack(now_ms: u32) -> PackStatus {
    PackStatus {
        voltage: 800.,
        soc: 55.,
        soh: 98.,
        temperature_max: 30.,
        temperature_min: 25.,
        charge_limit: 150.,
        discharge_limit: 150.,
        last_update_ms: now_ms,
        valid: true,
        ..Default::default()
    }
}

fn run_commands(p_ref: f32) -> Commands {
    Commands {
        enable: true,
        grid_connect: true,
        p_ref,
        ..Default::default()
    }
}

struct Rig {
    inv: Inverter<FakeDrive, FakeIo, FakeDelay>,
    tick: u64,
    now_ms: u32,
    /// Phase current override for the next control tick.
    current_spike: Option<f32>,
    junction: f32,
}

impl Rig {
    fn new() -> Self {
        init_logger();
        let mut inv = Inverter::new(
            Config::default(),
            FakeDrive::default(),
            FakeIo::default(),
            FakeDelay::default(),
        )
        .unwrap();
        inv.update_pack(pack(0));
        Self {
            inv,
            tick: 0,
            now_ms: 0,
            current_spike: None,
            junction: 35.,
        }
    }

    fn measurements(&self) -> Measurements {
        let theta = (TAU * 60. * self.tick as f64 * 5e-6) % TAU;
        let phase = |shift: f64| (GRID_PEAK * (theta - shift).cos()) as f32;
        let v = Abc::new(phase(0.), phase(TAU / 3.), phase(2. * TAU / 3.));

        let mut m = Measurements::default();
        m.dc.vdc = 800.;
        m.dc.vdc_pos = 400.;
        m.dc.vdc_neg = 400.;
        m.ac.v = v;
        m.ac.v_ll = [v.a - v.b, v.b - v.c, v.c - v.a];
        m.ac.frequency = 60.;
        m.temps.junction = [[self.junction; 2]; 3];
        m.temps.heatsink = 30.;
        m.temps.inductor = 30.;
        m.temps.ambient = 25.;
        if let Some(i) = self.current_spike {
            m.ac.i = Abc::new(i, -i / 2., -i / 2.);
        }
        m
    }

    fn control_ms(&mut self) {
        for _ in 0..TICKS_PER_MS {
            let m = self.measurements();
            self.inv.control_tick(m);
            self.tick += 1;
        }
    }

    fn step(&mut self) -> State {
        self.try_step().unwrap()
    }

    fn try_step(&mut self) -> Result<State, Error<&'static str>> {
        self.control_ms();
        self.now_ms += 1;
        self.inv.update_pack(pack(self.now_ms));
        self.inv.background_tick(self.now_ms)
    }

    fn run_until(&mut self, state: State, max_ms: u32) -> bool {
        (0..max_ms).any(|_| self.step() == state)
    }

    /// Walk the start-up sequence into the inverter run state.
    fn start(&mut self) {
        assert_eq!(self.step(), State::Standby);
        self.inv.set_commands(run_commands(10_000.));
        assert!(self.run_until(State::RunInverter, 1000));
    }
}

#[test]
fn start_up_reaches_inverter_run() {
    let mut rig = Rig::new();
    assert_eq!(rig.step(), State::Standby);
    assert!(!rig.inv.switchgear.relays.iter().any(|r| *r));

    rig.inv.set_commands(run_commands(10_000.));
    assert_eq!(rig.step(), State::Precharge);
    assert!(rig.inv.switchgear.relays[Relay::Precharge as usize]);

    assert_eq!(rig.step(), State::Ready);
    assert_eq!(rig.inv.switchgear.relays, [false, true, false]);
    assert_eq!(rig.inv.delay.total_ms, 50);
    assert!(rig.inv.sequencer().precharge_complete());
    assert!(rig.inv.switchgear.leds[Led::Status as usize]);

    assert_eq!(rig.step(), State::GridSync);
    assert!(!rig.inv.drive.enabled);

    assert!(rig.run_until(State::RunInverter, 1000));
    assert!(rig.inv.drive.enabled);
    assert_eq!(rig.inv.switchgear.relays, [false, true, true]);
    assert!(rig.inv.grid_relay_closed());

    let updates = rig.inv.drive.updates;
    assert_eq!(rig.step(), State::RunInverter);
    assert_eq!(rig.inv.drive.updates, updates + TICKS_PER_MS);

    let margin = rig.inv.config().pwm.margin;
    let period = rig.inv.config().pwm.period;
    for duty in rig.inv.drive.duties {
        assert!((margin..=period - margin).contains(&duty));
    }
    assert!(rig.inv.faults().is_empty(), "{:?}", rig.inv.faults());
}

#[test]
fn status_led_blinks_while_running() {
    let mut rig = Rig::new();
    rig.start();
    rig.step();
    let first = rig.inv.switchgear.leds[Led::Status as usize];
    rig.step();
    assert_ne!(rig.inv.switchgear.leds[Led::Status as usize], first);
    assert!(!rig.inv.switchgear.leds[Led::Fault as usize]);
}

#[test]
fn power_direction_follows_reference_sign() {
    let mut rig = Rig::new();
    rig.start();
    let disables = rig.inv.drive.disables;

    rig.inv.set_commands(run_commands(-10_000.));
    assert_eq!(rig.step(), State::RunRectifier);
    rig.inv.set_commands(run_commands(5_000.));
    assert_eq!(rig.step(), State::RunInverter);

    assert!(rig.inv.drive.enabled);
    assert_eq!(rig.inv.drive.disables, disables);
    assert!(rig.inv.grid_relay_closed());
}

#[test]
fn withdrawing_enable_ramps_down_to_ready() {
    let mut rig = Rig::new();
    rig.start();

    rig.inv.set_commands(Commands {
        enable: false,
        ..run_commands(10_000.)
    });
    assert_eq!(rig.step(), State::Stopping);
    assert!(rig.inv.drive.enabled);

    rig.step();
    rig.step();
    let ramped = rig.inv.references().p_ref;
    assert!(ramped < 10_000.);

    // Repeating the command does not restart the ramp
    rig.inv.set_commands(Commands {
        enable: false,
        ..run_commands(10_000.)
    });
    assert_eq!(rig.step(), State::Stopping);
    assert!(rig.inv.references().p_ref < ramped);
    assert_eq!(rig.inv.commands().p_ref, 10_000.);

    let mut last = rig.inv.references().p_ref;
    let mut evaluations = 0;
    while rig.step() == State::Stopping {
        let p = rig.inv.references().p_ref;
        assert!(p < last);
        last = p;
        evaluations += 1;
        assert!(evaluations < 100);
    }

    assert_eq!(rig.inv.state(), State::Ready);
    assert!(rig.inv.references().p_ref.abs() < 100.);
    assert!(!rig.inv.drive.enabled);
    assert!(!rig.inv.grid_relay_closed());
    assert!(rig.inv.switchgear.relays[Relay::Main as usize]);
}

#[test]
fn short_circuit_trips_within_one_control_tick() {
    let mut rig = Rig::new();
    rig.start();
    let ticks = rig.inv.control_ticks();

    rig.current_spike = Some(400.);
    let m = rig.measurements();
    rig.inv.control_tick(m);

    assert!(!rig.inv.drive.enabled);
    assert_eq!(rig.inv.state(), State::Fault);
    assert!(rig.inv.faults().contains(Fault::AcShortCircuit));
    assert_eq!(rig.inv.control_ticks(), ticks);

    rig.current_spike = None;
    assert_eq!(rig.step(), State::Fault);
    assert_eq!(rig.inv.switchgear.relays, [false, false, false]);
    assert!(rig.inv.switchgear.leds[Led::Fault as usize]);
    assert!(rig.inv.protection().history().contains(Fault::AcShortCircuit));

    rig.inv.set_commands(Commands {
        enable: false,
        ..run_commands(0.)
    });
    rig.inv.request_fault_clear(Fault::AcShortCircuit.into());
    assert_eq!(rig.step(), State::Standby);
    assert!(rig.inv.faults().is_empty());
    assert!(!rig.inv.switchgear.leds[Led::Fault as usize]);
}

#[test]
fn emergency_stop_opens_everything_until_released() {
    let mut rig = Rig::new();
    rig.start();

    rig.inv.switchgear.estop = true;
    assert_eq!(rig.step(), State::Emergency);
    assert_eq!(rig.inv.switchgear.relays, [false, false, false]);
    assert!(!rig.inv.drive.enabled);
    assert!(rig.inv.faults().contains(Fault::EstopActive));

    assert_eq!(rig.step(), State::Emergency);
    assert_eq!(rig.inv.protection().events(), 1);

    rig.inv.switchgear.estop = false;
    assert_eq!(rig.step(), State::Standby);
    assert!(!rig.inv.faults().contains(Fault::EstopActive));
}

#[test]
fn relay_failure_is_an_internal_error() {
    let mut rig = Rig::new();
    rig.step();
    rig.inv.switchgear.broken_relays = true;
    rig.inv.set_commands(run_commands(0.));

    let err = rig.try_step().unwrap_err();
    assert!(matches!(err, Error::Relay("relay driver not responding")));
    assert_eq!(rig.inv.state(), State::Fault);
    assert!(rig.inv.faults().contains(Fault::InternalError));

    // Internal errors survive a clear request
    rig.inv.switchgear.broken_relays = false;
    rig.inv.request_fault_clear(FaultSet::all());
    rig.inv.set_commands(Commands::default());
    assert_eq!(rig.step(), State::Fault);
    assert!(rig.inv.faults().contains(Fault::InternalError));
}

#[test]
fn register_interface_drives_the_converter() {
    let mut rig = Rig::new();
    rig.step();

    rig.inv.write_holding_register(2, 100).unwrap();
    rig.inv.write_holding_register(0, 0x0005).unwrap();
    assert!(rig.inv.commands().enable && rig.inv.commands().grid_connect);
    assert_eq!(rig.inv.commands().p_ref, 10_000.);
    assert!(rig.inv.write_holding_register(9, 0).is_err());
    rig.step();
    assert_eq!(rig.inv.references().p_ref, 10_000.);

    assert!(rig.run_until(State::RunInverter, 1000));
    rig.step();

    let regs = rig.inv.telemetry();
    assert_eq!(regs.status_word & 0x00ff, State::RunInverter as u16);
    assert_ne!(regs.status_word & 0x0200, 0);
    assert_ne!(regs.status_word & 0x0400, 0);
    assert_eq!(regs.read(3), Ok(i16::MAX as u16));
    assert_eq!(regs.read(15), Ok(5500));
    assert_eq!(regs.fault_code_low, 0);

    // Fault reset is one-shot
    rig.inv.write_holding_register(0, 0x0007).unwrap();
    assert_eq!(rig.inv.read_holding_register(0), Ok(0x0005));
}

#[test]
fn invalid_configuration_is_rejected() {
    let mut config = Config::default();
    config.control.t_s = 0.;
    let err = Inverter::new(
        config,
        FakeDrive::default(),
        FakeIo::default(),
        FakeDelay::default(),
    )
    .err();
    assert_eq!(err, Some(ConfigError::ControlPeriod(0.)));
}

#[test]
fn thermal_derating_releases_once_cooled() {
    let mut rig = Rig::new();
    rig.start();
    rig.inv.set_commands(run_commands(100_000.));
    rig.step();
    assert_eq!(rig.inv.references().p_ref, 100_000.);

    // Halfway between the MOSFET warning and trip temperatures
    rig.junction = 142.5;
    for _ in 0..20 {
        rig.step();
    }
    assert_eq!(rig.inv.protection().derating(), 0.5);
    assert_eq!(rig.inv.references().p_ref, 60_000.);
    assert_eq!(rig.inv.commands().p_ref, 100_000.);
    assert!(rig.inv.faults().is_empty());

    rig.junction = 40.;
    for _ in 0..20 {
        rig.step();
    }
    assert_eq!(rig.inv.protection().derating(), 1.);
    assert_eq!(rig.inv.references().p_ref, 100_000.);
    assert_eq!(rig.inv.state(), State::RunInverter);
}

#[test]
fn commands_reach_the_current_loop_derated() {
    let mut rig = Rig::new();
    rig.start();
    rig.junction = 142.5;
    for _ in 0..20 {
        rig.step();
    }

    // A write between background ticks does not bypass the derating
    rig.inv.write_holding_register(2, 1000).unwrap();
    assert_eq!(rig.inv.commands().p_ref, 100_000.);
    assert!(rig.inv.references().p_ref <= 60_000.);
    rig.step();
    assert_eq!(rig.inv.references().p_ref, 60_000.);
}
