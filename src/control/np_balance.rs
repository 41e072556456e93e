use crate::config::ControlConfig;

/// Proportional neutral-point balancing.
///
/// The output is a common-mode offset in modulation-index units. It is not
/// added to the modulator references.
// TODO: sum the offset into `min_max_injection` once the rail-voltage
// sign convention is confirmed against the power stage.
#[derive(Debug, Clone, PartialEq)]
pub struct NeutralPointBalancer {
    kp: f32,
    limit: f32,
    offset: f32,
}

impl NeutralPointBalancer {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            kp: config.np_kp,
            limit: config.np_offset_limit,
            offset: 0.,
        }
    }

    /// Offset for the rail imbalance `vdc_pos - vdc_neg` in volts.
    pub fn offset(&mut self, vdc_pos: f32, vdc_neg: f32) -> f32 {
        let offset = self.kp * (vdc_pos - vdc_neg);
        self.offset = if offset.is_nan() {
            0.
        } else {
            offset.clamp(-self.limit, self.limit)
        };
        self.offset
    }

    /// Offset from the last call.
    pub fn last(&self) -> f32 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn proportional_inside_limit() {
        let mut np = NeutralPointBalancer::new(&ControlConfig::default());
        assert_abs_diff_eq!(np.offset(425.2, 424.9), 0.03, epsilon = 1e-4);
        assert_abs_diff_eq!(np.offset(424.9, 425.2), -0.03, epsilon = 1e-4);
        assert_eq!(np.offset(425., 425.), 0.);
    }

    #[test]
    fn clamped_to_limit() {
        let mut np = NeutralPointBalancer::new(&ControlConfig::default());
        assert_eq!(np.offset(450., 400.), 0.05);
        assert_eq!(np.offset(400., 450.), -0.05);
        assert_eq!(np.last(), -0.05);
        assert_eq!(np.offset(f32::NAN, 400.), 0.);
    }
}
