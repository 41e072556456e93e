//! Clarke and Park transformations (along with their inverses).
//!
//! The Clarke transform used here is the equal-amplitude form, so a balanced
//! three-phase set of peak amplitude `V` maps onto a space vector of length `V`
//! and, once synchronised, onto `d = V`.
//!
//! Angles are in radians.

use num_complex::Complex32;
use num_traits::Float;

const FRAC_SQRT_3_2: f32 = 0.866_025_4;
const TWO_THIRDS: f32 = 2. / 3.;

/// Three-phase quantities.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Abc {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl Abc {
    pub const fn new(a: f32, b: f32, c: f32) -> Self {
        Self { a, b, c }
    }

    pub fn max(&self) -> f32 {
        self.a.max(self.b).max(self.c)
    }

    pub fn min(&self) -> f32 {
        self.a.min(self.b).min(self.c)
    }

    /// Largest magnitude of the three phases.
    pub fn peak(&self) -> f32 {
        Float::abs(self.a)
            .max(Float::abs(self.b))
            .max(Float::abs(self.c))
    }

    pub fn map(self, f: impl Fn(f32) -> f32) -> Self {
        Self::new(f(self.a), f(self.b), f(self.c))
    }
}

impl From<[f32; 3]> for Abc {
    fn from(u: [f32; 3]) -> Self {
        Self::new(u[0], u[1], u[2])
    }
}

impl From<Abc> for [f32; 3] {
    fn from(u: Abc) -> Self {
        [u.a, u.b, u.c]
    }
}

/// Two-phase stationary orthogonal reference frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlphaBeta {
    pub alpha: f32,
    pub beta: f32,
}

impl From<AlphaBeta> for Complex32 {
    fn from(v: AlphaBeta) -> Self {
        Complex32::new(v.alpha, v.beta)
    }
}

impl From<Complex32> for AlphaBeta {
    fn from(v: Complex32) -> Self {
        Self {
            alpha: v.re,
            beta: v.im,
        }
    }
}

/// Rotating reference frame, synchronous with the grid angle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dq {
    pub d: f32,
    pub q: f32,
}

impl Dq {
    pub const fn new(d: f32, q: f32) -> Self {
        Self { d, q }
    }
}

impl From<Dq> for Complex32 {
    fn from(v: Dq) -> Self {
        Complex32::new(v.d, v.q)
    }
}

impl From<Complex32> for Dq {
    fn from(v: Complex32) -> Self {
        Self { d: v.re, q: v.im }
    }
}

/// Clarke transform, abc -> αβ.
pub fn clarke(u: Abc) -> AlphaBeta {
    AlphaBeta {
        alpha: TWO_THIRDS * (u.a - 0.5 * u.b - 0.5 * u.c),
        beta: TWO_THIRDS * (FRAC_SQRT_3_2 * u.b - FRAC_SQRT_3_2 * u.c),
    }
}

/// Inverse Clarke transform, αβ -> abc.
pub fn inverse_clarke(v: AlphaBeta) -> Abc {
    Abc {
        a: v.alpha,
        b: -0.5 * v.alpha + FRAC_SQRT_3_2 * v.beta,
        c: -0.5 * v.alpha - FRAC_SQRT_3_2 * v.beta,
    }
}

/// Park transform, αβ -> dq.
pub fn park(v: AlphaBeta, theta: f32) -> Dq {
    let (sin, cos) = Float::sin_cos(theta);
    Dq {
        d: v.alpha * cos + v.beta * sin,
        q: -v.alpha * sin + v.beta * cos,
    }
}

/// Inverse Park transform, dq -> αβ.
pub fn inverse_park(v: Dq, theta: f32) -> AlphaBeta {
    let (sin, cos) = Float::sin_cos(theta);
    AlphaBeta {
        alpha: v.d * cos - v.q * sin,
        beta: v.d * sin + v.q * cos,
    }
}

/// Clarke followed by Park.
pub fn abc_to_dq(u: Abc, theta: f32) -> Dq {
    park(clarke(u), theta)
}

/// Inverse Park followed by inverse Clarke.
pub fn dq_to_abc(v: Dq, theta: f32) -> Abc {
    inverse_clarke(inverse_park(v, theta))
}
