/// Proportional-resonant controller.
///
/// The resonant path `2ωc·Kr / (s² + 2ωc·s + ω0²)` is realised as a
/// forward-Euler state-space filter:
///
/// ```text
/// x1' = x1 + Ts·x2
/// x2' = x2 + Ts·(−ω0²·x1 − 2ωc·x2 + 2ωc·Kr·e)
/// y   = Kp·e + x1'
/// ```
///
/// The resonant states are not clamped.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrController {
    pub kp: f32,
    pub kr: f32,
    /// Resonant frequency in rad/s.
    pub omega0: f32,
    /// Damping in rad/s.
    pub omega_c: f32,
    x1: f32,
    x2: f32,
    output: f32,
}

impl PrController {
    pub fn new(kp: f32, kr: f32, omega0: f32, omega_c: f32) -> Self {
        Self {
            kp,
            kr,
            omega0,
            omega_c,
            x1: 0.,
            x2: 0.,
            output: 0.,
        }
    }

    pub fn update(&mut self, error: f32, t_s: f32) -> f32 {
        let x1 = self.x1 + t_s * self.x2;
        let x2 = self.x2
            + t_s
                * (-self.omega0 * self.omega0 * self.x1 - 2. * self.omega_c * self.x2
                    + 2. * self.omega_c * self.kr * error);
        self.x1 = x1;
        self.x2 = x2;

        self.output = self.kp * error + self.x1;
        self.output
    }

    pub fn reset(&mut self) {
        self.x1 = 0.;
        self.x2 = 0.;
        self.output = 0.;
    }

    pub fn states(&self) -> (f32, f32) {
        (self.x1, self.x2)
    }

    pub fn output(&self) -> f32 {
        self.output
    }
}
