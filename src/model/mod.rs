//! Measurement snapshot consumed by the control and protection tiers.

mod sensor;
pub use sensor::{LinearSensor, NtcSensor};

use crate::transform::Abc;
use embedded_hal::adc::{Channel, OneShot};
use num_traits::ToPrimitive;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DcMeasurements {
    /// Bus voltage in V.
    pub vdc: f32,
    pub vdc_pos: f32,
    pub vdc_neg: f32,
    /// Neutral-point voltage in V.
    pub vnp: f32,
    /// Bus current in A, positive when discharging the pack.
    pub idc: f32,
    pub pdc: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AcMeasurements {
    /// Phase voltages in V.
    pub v: Abc,
    /// Phase currents in A.
    pub i: Abc,
    /// Line-line voltages `[Vab, Vbc, Vca]`.
    pub v_ll: [f32; 3],
    pub frequency: f32,
    pub p: f32,
    pub q: f32,
    pub s: f32,
    pub pf: f32,
}

/// Temperatures in °C.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Temperatures {
    /// Junction temperatures, two devices per phase leg.
    pub junction: [[f32; 2]; 3],
    pub heatsink: f32,
    pub inductor: f32,
    pub ambient: f32,
    pub pcb: f32,
}

impl Temperatures {
    /// Hottest junction or heatsink temperature.
    pub fn max(&self) -> f32 {
        self.junction
            .iter()
            .flatten()
            .fold(self.heatsink, |acc, &t| acc.max(t))
    }
}

/// One control tick worth of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Measurements {
    pub dc: DcMeasurements,
    pub ac: AcMeasurements,
    pub temps: Temperatures,
}

/// Source of measurement snapshots, sampled on the control clock edge.
pub trait MeasurementSource {
    fn measure(&mut self) -> Measurements;
}

impl<F: FnMut() -> Measurements> MeasurementSource for F {
    fn measure(&mut self) -> Measurements {
        self()
    }
}

/// Measurement source assembled from ADC channels.
///
/// Only the quantities the control core needs each tick are sampled. Power
/// and line-line voltages are derived from the phase samples.
pub struct SensorModel<P> {
    /// Positive and negative rail.
    pub vdc: [LinearSensor<P>; 2],
    pub idc: LinearSensor<P>,
    pub phase_voltages: [LinearSensor<P>; 3],
    pub phase_currents: [LinearSensor<P>; 3],
    /// One thermistor per phase leg.
    pub junction: [NtcSensor<P>; 3],
    pub heatsink: NtcSensor<P>,
}

impl<P> SensorModel<P> {
    /// Sample every channel once. Channels that fail to convert keep
    /// their value from `last`.
    pub fn sample<T, A, W>(&mut self, adc: &mut T, last: &Measurements) -> Measurements
    where
        T: OneShot<A, W, P>,
        P: Channel<A>,
        W: ToPrimitive,
    {
        let mut m = *last;

        let vdc_pos = self.vdc[0].read(adc).unwrap_or(m.dc.vdc_pos);
        let vdc_neg = self.vdc[1].read(adc).unwrap_or(m.dc.vdc_neg);
        let idc = self.idc.read(adc).unwrap_or(m.dc.idc);
        m.dc = DcMeasurements {
            vdc: vdc_pos + vdc_neg,
            vdc_pos,
            vdc_neg,
            vnp: 0.5 * (vdc_pos - vdc_neg),
            idc,
            pdc: (vdc_pos + vdc_neg) * idc,
        };

        let v = read_abc(&mut self.phase_voltages, adc, m.ac.v);
        let i = read_abc(&mut self.phase_currents, adc, m.ac.i);
        m.ac.v = v;
        m.ac.i = i;
        m.ac.v_ll = [v.a - v.b, v.b - v.c, v.c - v.a];
        m.ac.p = v.a * i.a + v.b * i.b + v.c * i.c;

        for (leg, sensor) in m.temps.junction.iter_mut().zip(self.junction.iter_mut()) {
            if let Some(t) = sensor.read(adc) {
                *leg = [t; 2];
            }
        }
        if let Some(t) = self.heatsink.read(adc) {
            m.temps.heatsink = t;
        }

        m
    }
}

fn read_abc<P, T, A, W>(sensors: &mut [LinearSensor<P>; 3], adc: &mut T, last: Abc) -> Abc
where
    T: OneShot<A, W, P>,
    P: Channel<A>,
    W: ToPrimitive,
{
    Abc::new(
        sensors[0].read(adc).unwrap_or(last.a),
        sensors[1].read(adc).unwrap_or(last.b),
        sensors[2].read(adc).unwrap_or(last.c),
    )
}
