use embedded_hal::Pwm;
use num_traits::{FromPrimitive, ToPrimitive};

/// PWM output sink of the power stage.
pub trait Drive {
    /// Apply three compare values, in modulator period counts, for the next
    /// switching period.
    fn set_duties(&mut self, duties: [u16; 3]);

    fn enable_outputs(&mut self);

    fn disable_outputs(&mut self);
}

/// [`Drive`] over an `embedded-hal` PWM peripheral with one channel per phase.
pub struct PwmDrive<T, C> {
    pub pwm: T,
    pub channels: [C; 3],
    /// Modulator period the incoming compare values refer to.
    pub period: u16,
}

impl<T, C> PwmDrive<T, C> {
    pub fn new(pwm: T, channels: [C; 3], period: u16) -> Self {
        Self {
            pwm,
            channels,
            period,
        }
    }
}

impl<T, C> Drive for PwmDrive<T, C>
where
    T: Pwm<Channel = C>,
    T::Duty: FromPrimitive + ToPrimitive,
    C: Clone,
{
    fn set_duties(&mut self, duties: [u16; 3]) {
        let Some(max) = self.pwm.get_max_duty().to_u64() else {
            return;
        };
        let period = u64::from(self.period.max(1));

        for (channel, duty) in self.channels.iter().cloned().zip(duties) {
            // Rescale onto the peripheral's own duty range. A 16-bit count
            // times a 32-bit maximum always fits in 64 bits.
            let scaled = u64::from(duty) * max / period;
            if let Some(duty) = T::Duty::from_u64(scaled) {
                self.pwm.set_duty(channel, duty);
            }
        }
    }

    fn enable_outputs(&mut self) {
        for channel in self.channels.iter().cloned() {
            self.pwm.enable(channel);
        }
    }

    fn disable_outputs(&mut self) {
        for channel in self.channels.iter().cloned() {
            self.pwm.disable(channel);
        }
    }
}
