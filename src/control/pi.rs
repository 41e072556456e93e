/// Proportional-integral controller with a clamped integrator.
///
/// After every update both the integral and the output lie within
/// `[output_min, output_max]`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PiController {
    pub kp: f32,
    pub ki: f32,
    pub output_min: f32,
    pub output_max: f32,
    integral: f32,
    output: f32,
}

impl PiController {
    pub fn new(kp: f32, ki: f32, output_min: f32, output_max: f32) -> Self {
        Self {
            kp,
            ki,
            output_min,
            output_max,
            integral: 0.,
            output: 0.,
        }
    }

    /// Run one step with sample time `t_s`.
    pub fn update(&mut self, error: f32, t_s: f32) -> f32 {
        self.integral = self.clamp(self.integral + self.ki * error * t_s);
        self.output = self.clamp(self.kp * error + self.integral);
        self.output
    }

    /// Preload the integrator, clamped into the output bounds.
    pub fn reset(&mut self, integral: f32) {
        self.integral = self.clamp(integral);
        self.output = self.integral;
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn output(&self) -> f32 {
        self.output
    }

    fn clamp(&self, x: f32) -> f32 {
        // NaN saturates to the lower bound
        if x >= self.output_max {
            self.output_max
        } else if x >= self.output_min {
            x
        } else {
            self.output_min
        }
    }
}
