//! Mesh assignment kernels.
//!
//! A particle at fractional cell coordinate `g` is spread over the
//! `order` nearest cells along each axis with weights given by the
//! cardinal B-spline of that order evaluated at the offsets from the cell
//! centers. Order 1 is nearest-grid-point, 2 is cloud-in-cell, 3 is
//! triangular-shaped-cloud and 4 is the piecewise-cubic spline. The
//! separable product over the three axes conserves the deposited mass
//! exactly.
//!
//! In Fourier space the assignment multiplies the true field by
//! `sinc(π f / n)^order` per axis; [`Assignment::fourier_window`]
//! evaluates that window so estimators can divide it back out
//! ("compensation").

use libm::{floor, sin};

/// maximum kernel order supported (piecewise-cubic spline)
pub const MAX_ORDER: usize = 4;

/// A mesh assignment scheme, i.e. the B-spline order used to spread
/// particles onto the mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Assignment {
    /// nearest grid point (order 1)
    Ngp,
    /// cloud in cell (order 2)
    Cic,
    /// triangular shaped cloud (order 3)
    Tsc,
    /// piecewise cubic spline (order 4)
    Pcs,
}

impl Assignment {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ngp" => Some(Self::Ngp),
            "cic" => Some(Self::Cic),
            "tsc" => Some(Self::Tsc),
            "pcs" => Some(Self::Pcs),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ngp => "ngp",
            Self::Cic => "cic",
            Self::Tsc => "tsc",
            Self::Pcs => "pcs",
        }
    }

    /// the number of cells touched per axis
    pub fn order(self) -> usize {
        match self {
            Self::Ngp => 1,
            Self::Cic => 2,
            Self::Tsc => 3,
            Self::Pcs => 4,
        }
    }

    /// Compute the deposit weights for a particle at fractional cell
    /// coordinate `g` (cell centers sit at integer coordinates).
    ///
    /// Fills the first `order()` entries of `weights` and returns the
    /// (possibly negative, unwrapped) index of the first touched cell.
    /// The filled weights always sum to 1.
    pub fn weights(self, g: f64, weights: &mut [f64; MAX_ORDER]) -> i64 {
        match self {
            Self::Ngp => {
                weights[0] = 1.0;
                floor(g + 0.5) as i64
            }
            Self::Cic => {
                let i0 = floor(g);
                let u = g - i0;
                weights[0] = 1.0 - u;
                weights[1] = u;
                i0 as i64
            }
            Self::Tsc => {
                // centered on the nearest cell, offset d in [-0.5, 0.5)
                let i1 = floor(g + 0.5);
                let d = g - i1;
                weights[0] = 0.5 * (0.5 - d) * (0.5 - d);
                weights[1] = 0.75 - d * d;
                weights[2] = 0.5 * (0.5 + d) * (0.5 + d);
                i1 as i64 - 1
            }
            Self::Pcs => {
                let i0 = floor(g);
                let u = g - i0;
                let u2 = u * u;
                let u3 = u2 * u;
                weights[0] = (1.0 - u) * (1.0 - u) * (1.0 - u) / 6.0;
                weights[1] = (3.0 * u3 - 6.0 * u2 + 4.0) / 6.0;
                weights[2] = (-3.0 * u3 + 3.0 * u2 + 3.0 * u + 1.0) / 6.0;
                weights[3] = u3 / 6.0;
                i0 as i64 - 1
            }
        }
    }

    /// The per-axis Fourier-space window of the kernel at phase
    /// `t = π f / n` (`f` the signed frequency integer, `n` the mesh
    /// extent): `sinc(t)^order`.
    pub fn fourier_window(self, t: f64) -> f64 {
        let s = if t == 0.0 { 1.0 } else { sin(t) / t };
        let mut w = 1.0;
        for _ in 0..self.order() {
            w *= s;
        }
        w
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Assignment; 4] = [
        Assignment::Ngp,
        Assignment::Cic,
        Assignment::Tsc,
        Assignment::Pcs,
    ];

    #[test]
    fn names_round_trip() {
        for assignment in ALL {
            assert_eq!(Assignment::from_name(assignment.name()), Some(assignment));
        }
        assert_eq!(Assignment::from_name("nearest"), None);
    }

    #[test]
    fn weights_sum_to_one() {
        let coords = [0.0, 0.25, 0.5, 0.75, 3.1, 17.99, -2.4];
        for assignment in ALL {
            for &g in &coords {
                let mut w = [0.0; MAX_ORDER];
                assignment.weights(g, &mut w);
                let total: f64 = w[..assignment.order()].iter().sum();
                assert!(
                    (total - 1.0).abs() < 1e-14,
                    "{} weights at {} sum to {}",
                    assignment.name(),
                    g,
                    total
                );
            }
        }
    }

    #[test]
    fn ngp_picks_nearest_cell() {
        let mut w = [0.0; MAX_ORDER];
        assert_eq!(Assignment::Ngp.weights(3.2, &mut w), 3);
        assert_eq!(Assignment::Ngp.weights(3.6, &mut w), 4);
        assert_eq!(w[0], 1.0);
    }

    #[test]
    fn cic_is_linear() {
        let mut w = [0.0; MAX_ORDER];
        let i0 = Assignment::Cic.weights(5.25, &mut w);
        assert_eq!(i0, 5);
        assert!((w[0] - 0.75).abs() < 1e-15);
        assert!((w[1] - 0.25).abs() < 1e-15);
    }

    #[test]
    fn tsc_centered_on_cell() {
        // a particle exactly on a cell center gets the canonical
        // [1/8, 3/4, 1/8] triangular weights
        let mut w = [0.0; MAX_ORDER];
        let i0 = Assignment::Tsc.weights(4.0, &mut w);
        assert_eq!(i0, 3);
        assert!((w[0] - 0.125).abs() < 1e-15);
        assert!((w[1] - 0.75).abs() < 1e-15);
        assert!((w[2] - 0.125).abs() < 1e-15);
    }

    #[test]
    fn fourier_window_limits() {
        for assignment in ALL {
            // no suppression at k = 0
            assert_eq!(assignment.fourier_window(0.0), 1.0);
            // stronger suppression for higher orders at fixed phase
            let t = 1.0;
            let w = assignment.fourier_window(t);
            assert!(w > 0.0 && w < 1.0);
            let expected = {
                let s = sin(t) / t;
                let mut acc = 1.0;
                for _ in 0..assignment.order() {
                    acc *= s;
                }
                acc
            };
            assert_eq!(w, expected);
        }
    }
}
