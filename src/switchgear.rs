//! Contactors, indicator LEDs and the emergency-stop input.

use core::fmt::Debug;
use embedded_hal::digital::v2::{InputPin, OutputPin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relay {
    Precharge = 0,
    Main = 1,
    Grid = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    Status = 0,
    Fault = 1,
}

/// Discrete I/O driven by the background domain.
pub trait Switchgear {
    type Error: Debug;

    /// Close (`true`) or open a contactor.
    fn set_relay(&mut self, relay: Relay, closed: bool) -> Result<(), Self::Error>;

    fn set_led(&mut self, led: Led, on: bool) -> Result<(), Self::Error>;

    fn estop_asserted(&mut self) -> Result<bool, Self::Error>;
}

/// [`Switchgear`] over `embedded-hal` digital pins. Outputs and the
/// emergency-stop input are active high.
pub struct GpioSwitchgear<O, I> {
    /// Indexed by [`Relay`].
    pub relays: [O; 3],
    /// Indexed by [`Led`].
    pub leds: [O; 2],
    pub estop: I,
}

impl<O, I> GpioSwitchgear<O, I> {
    pub fn new(relays: [O; 3], leds: [O; 2], estop: I) -> Self {
        Self {
            relays,
            leds,
            estop,
        }
    }
}

fn drive<O: OutputPin>(pin: &mut O, high: bool) -> Result<(), O::Error> {
    if high {
        pin.set_high()
    } else {
        pin.set_low()
    }
}

impl<O, I, E> Switchgear for GpioSwitchgear<O, I>
where
    O: OutputPin<Error = E>,
    I: InputPin<Error = E>,
    E: Debug,
{
    type Error = E;

    fn set_relay(&mut self, relay: Relay, closed: bool) -> Result<(), E> {
        drive(&mut self.relays[relay as usize], closed)
    }

    fn set_led(&mut self, led: Led, on: bool) -> Result<(), E> {
        drive(&mut self.leds[led as usize], on)
    }

    fn estop_asserted(&mut self) -> Result<bool, E> {
        self.estop.is_high()
    }
}
