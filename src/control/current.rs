use super::{pll::PllOutput, pr::PrController, PowerDirection, References};
use crate::{
    config::Config,
    transform::{abc_to_dq, Abc, Dq},
};
use num_complex::Complex32;

/// Externally imposed DC-side current limits in amperes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PackLimits {
    pub charge: f32,
    pub discharge: f32,
}

/// dq current regulation with grid-voltage feed-forward and decoupling.
#[derive(Debug, Clone)]
pub struct CurrentLoop {
    t_s: f32,
    inductance: f32,
    vd_valid: f32,
    rated_current: f32,
    d: PrController,
    q: PrController,
    i_dq: Dq,
    v_ref: Dq,
    limit: f32,
    refs: References,
}

impl CurrentLoop {
    pub fn new(config: &Config) -> Self {
        let c = &config.control;
        let pr = PrController::new(
            c.current_kp,
            c.current_kr,
            c.omega_nominal(),
            c.current_omega_c,
        );

        Self {
            t_s: c.t_s,
            inductance: c.inductance,
            vd_valid: c.vd_valid,
            rated_current: config.rating.ac_current,
            d: pr.clone(),
            q: pr,
            i_dq: Dq::default(),
            v_ref: Dq::default(),
            limit: config.rating.ac_current,
            refs: References::default(),
        }
    }

    /// Calculate the dq voltage reference for the modulator.
    /// Arguments:
    /// `i_abc`: measured phase currents.
    /// `grid`: PLL output of this tick.
    /// `vdc`: DC-bus voltage.
    /// `dir`: active power direction, selects the charge or discharge limit.
    ///
    /// The PLL locks with `Vq` driven to zero through an error of `-Vq`,
    /// which settles at `d ≈ -V̂`. `Vd` is then negative in steady state, so
    /// `vd > vd_valid` does not hold and `p_ref`/`q_ref` are never turned
    /// into current references. `id_ref`/`iq_ref` keep their previous
    /// values (zero after [`CurrentLoop::reset`]) and the loop regulates
    /// them with grid voltage feed-forward only.
    pub fn update(
        &mut self,
        i_abc: Abc,
        grid: &PllOutput,
        vdc: f32,
        dir: PowerDirection,
        pack: PackLimits,
    ) -> Dq {
        let refs = &mut self.refs;
        self.i_dq = abc_to_dq(i_abc, grid.theta);

        let vd = grid.v.d;
        let vd_valid = vd > self.vd_valid;

        // P = 1.5·Vd·Id, Q = −1.5·Vd·Iq
        if vd_valid {
            refs.id_ref = (2. / 3.) * refs.p_ref / vd;
            refs.iq_ref = -(2. / 3.) * refs.q_ref / vd;
        }

        let mut limit = self.rated_current;
        if vd_valid {
            let pack_limit = match dir {
                PowerDirection::Rectifier => pack.charge,
                PowerDirection::Idle | PowerDirection::Inverter => pack.discharge,
            };
            limit = limit.min(pack_limit * vdc / (1.5 * vd));
        }
        self.limit = limit.max(0.);

        refs.id_ref = refs.id_ref.clamp(-self.limit, self.limit);
        refs.iq_ref = refs.iq_ref.clamp(-self.limit, self.limit);

        let v_ctrl = Complex32::new(
            self.d.update(refs.id_ref - self.i_dq.d, self.t_s),
            self.q.update(refs.iq_ref - self.i_dq.q, self.t_s),
        );

        // Feed-forward plus jωL·I cross-coupling
        let i = Complex32::from(self.i_dq);
        let v = v_ctrl + Complex32::from(grid.v) + Complex32::i() * grid.omega * self.inductance * i;

        self.v_ref = v.into();
        self.v_ref
    }

    /// Clear both resonant controllers and the derived current references.
    pub fn reset(&mut self) {
        self.d.reset();
        self.q.reset();
        self.refs.id_ref = 0.;
        self.refs.iq_ref = 0.;
    }

    pub fn references(&self) -> &References {
        &self.refs
    }

    /// Power-side references written by the background domain.
    pub fn references_mut(&mut self) -> &mut References {
        &mut self.refs
    }

    /// Measured currents in the grid frame.
    pub fn currents(&self) -> Dq {
        self.i_dq
    }

    pub fn voltage_reference(&self) -> Dq {
        self.v_ref
    }

    /// Current ceiling applied on the last update.
    pub fn limit(&self) -> f32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::dq_to_abc;
    use approx::assert_abs_diff_eq;
    use core::f32::consts::TAU;

    fn grid(vd: f32) -> PllOutput {
        PllOutput {
            theta: 0.3,
            omega: TAU * 60.,
            frequency: 60.,
            v: Dq::new(vd, 0.),
            locked: true,
        }
    }

    fn generous() -> PackLimits {
        PackLimits {
            charge: 1e4,
            discharge: 1e4,
        }
    }

    fn with_refs(refs: References) -> CurrentLoop {
        let mut cl = CurrentLoop::new(&Config::default());
        *cl.references_mut() = refs;
        cl
    }

    fn tick(cl: &mut CurrentLoop, vd: f32, vdc: f32, dir: PowerDirection, pack: PackLimits) -> Dq {
        cl.update(Abc::default(), &grid(vd), vdc, dir, pack)
    }

    #[test]
    fn power_references_become_current_references() {
        let mut cl = with_refs(References {
            p_ref: 30_000.,
            q_ref: 6_000.,
            ..Default::default()
        });
        tick(&mut cl, 400., 850., PowerDirection::Inverter, generous());
        assert_abs_diff_eq!(cl.references().id_ref, 50., epsilon = 1e-3);
        assert_abs_diff_eq!(cl.references().iq_ref, -10., epsilon = 1e-3);
    }

    #[test]
    fn low_vd_keeps_previous_references() {
        let mut cl = with_refs(References {
            p_ref: 30_000.,
            id_ref: 12.,
            iq_ref: -3.,
            ..Default::default()
        });
        let v = tick(&mut cl, 0., 850., PowerDirection::Inverter, generous());
        assert_eq!(cl.references().id_ref, 12.);
        assert_eq!(cl.references().iq_ref, -3.);
        assert!(v.d.is_finite() && v.q.is_finite());
        assert_eq!(cl.limit(), 160.);
    }

    #[test]
    fn anti_phase_lock_leaves_power_references_unused() {
        let mut cl = with_refs(References {
            p_ref: 30_000.,
            q_ref: 6_000.,
            ..Default::default()
        });
        tick(&mut cl, -391.9, 850., PowerDirection::Inverter, generous());
        assert_eq!(cl.references().id_ref, 0.);
        assert_eq!(cl.references().iq_ref, 0.);
        assert_eq!(cl.limit(), 160.);
    }

    #[test]
    fn rated_current_caps_references() {
        let mut cl = with_refs(References {
            p_ref: 1e6,
            q_ref: -1e6,
            ..Default::default()
        });
        tick(&mut cl, 400., 850., PowerDirection::Inverter, generous());
        assert_eq!(cl.references().id_ref, 160.);
        assert_eq!(cl.references().iq_ref, 160.);
    }

    #[test]
    fn pack_limit_follows_direction() {
        let pack = PackLimits {
            charge: 50.,
            discharge: 100.,
        };
        let mut cl = with_refs(References {
            p_ref: -1e6,
            ..Default::default()
        });

        // 50 A · 800 V / (1.5 · 400 V)
        tick(&mut cl, 400., 800., PowerDirection::Rectifier, pack);
        assert_abs_diff_eq!(cl.limit(), 66.666_67, epsilon = 1e-3);
        assert_abs_diff_eq!(cl.references().id_ref, -66.666_67, epsilon = 1e-3);

        cl.references_mut().p_ref = 1e6;
        tick(&mut cl, 400., 800., PowerDirection::Inverter, pack);
        assert_abs_diff_eq!(cl.limit(), 133.333_33, epsilon = 1e-3);
        assert_abs_diff_eq!(cl.references().id_ref, 133.333_33, epsilon = 1e-3);
    }

    #[test]
    fn negative_pack_limit_means_zero_current() {
        let mut cl = with_refs(References {
            p_ref: 10_000.,
            ..Default::default()
        });
        let pack = PackLimits {
            charge: -5.,
            discharge: -5.,
        };
        tick(&mut cl, 400., 800., PowerDirection::Inverter, pack);
        assert_eq!(cl.limit(), 0.);
        assert_eq!(cl.references().id_ref, 0.);
    }

    #[test]
    fn feed_forward_and_decoupling() {
        let config = Config::default();
        let g = grid(400.);
        // Currents already at reference: the PR output is zero on the first tick
        let mut cl = with_refs(References {
            p_ref: 1.5 * 400. * 100.,
            q_ref: -1.5 * 400. * 20.,
            ..Default::default()
        });
        let i_abc = dq_to_abc(Dq::new(100., 20.), g.theta);
        let v = cl.update(i_abc, &g, 850., PowerDirection::Inverter, generous());

        let omega_l = g.omega * config.control.inductance;
        assert_abs_diff_eq!(cl.currents().d, 100., epsilon = 1e-2);
        assert_abs_diff_eq!(cl.currents().q, 20., epsilon = 1e-2);
        assert_abs_diff_eq!(v.d, 400. - omega_l * 20., epsilon = 1e-2);
        assert_abs_diff_eq!(v.q, omega_l * 100., epsilon = 1e-2);
    }

    #[test]
    fn reset_zeroes_references_and_states() {
        let mut cl = with_refs(References {
            p_ref: 30_000.,
            ..Default::default()
        });
        for _ in 0..10 {
            tick(&mut cl, 400., 850., PowerDirection::Inverter, generous());
        }
        cl.reset();
        assert_eq!(cl.references().id_ref, 0.);
        assert_eq!(cl.references().iq_ref, 0.);
        assert_eq!(cl.references().p_ref, 30_000.);

        // the next update is proportional-only again
        let v = tick(&mut cl, 400., 850., PowerDirection::Inverter, generous());
        assert_abs_diff_eq!(v.d, 400. + 0.5 * 50., epsilon = 1e-2);
    }
}
