use embedded_hal::adc::{Channel, OneShot};
use num_traits::{Float, ToPrimitive};

const KELVIN: f32 = 273.15;

/// Linear mapping of an ADC reading onto a physical range.
#[derive(Debug, Clone)]
pub struct LinearSensor<P> {
    pub pin: P,
    pub from_min: f32,
    pub from_max: f32,
    pub to_min: f32,
    pub to_max: f32,
}

impl<P> LinearSensor<P> {
    /// Physical value of a raw reading. Readings outside `from_min..from_max`
    /// extrapolate.
    pub fn scale(&self, raw: f32) -> f32 {
        let span = (raw - self.from_min) / (self.from_max - self.from_min);
        self.to_min + span * (self.to_max - self.to_min)
    }

    /// Convert one sample. `None` while the conversion is pending or failed.
    pub fn read<T, A, W>(&mut self, adc: &mut T) -> Option<f32>
    where
        T: OneShot<A, W, P>,
        P: Channel<A>,
        W: ToPrimitive,
    {
        let raw = adc.read(&mut self.pin).ok()?.to_f32()?;
        Some(self.scale(raw))
    }
}

/// NTC thermistor on the low side of a divider, converted with the β equation.
#[derive(Debug, Clone)]
pub struct NtcSensor<P> {
    pub pin: P,
    /// ADC reading at the divider supply.
    pub full_scale: f32,
    /// Resistance at 25 °C in ohms.
    pub r25: f32,
    pub beta: f32,
    pub series: f32,
}

impl<P> NtcSensor<P> {
    /// 10 kΩ, β = 3950 thermistor with a 10 kΩ series resistor.
    pub fn new(pin: P, full_scale: f32) -> Self {
        Self {
            pin,
            full_scale,
            r25: 10_000.,
            beta: 3950.,
            series: 10_000.,
        }
    }

    /// Temperature in °C, `None` for a shorted or open thermistor.
    pub fn temperature(&self, raw: f32) -> Option<f32> {
        let ratio = raw / self.full_scale;
        if !(ratio > 0. && ratio < 1.) {
            return None;
        }
        let r = self.series * ratio / (1. - ratio);
        let inv_t = 1. / (25. + KELVIN) + Float::ln(r / self.r25) / self.beta;
        Some(1. / inv_t - KELVIN)
    }

    pub fn read<T, A, W>(&mut self, adc: &mut T) -> Option<f32>
    where
        T: OneShot<A, W, P>,
        P: Channel<A>,
        W: ToPrimitive,
    {
        let raw = adc.read(&mut self.pin).ok()?.to_f32()?;
        self.temperature(raw)
    }
}
