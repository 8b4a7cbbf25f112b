//! Line-of-sight conventions.
//!
//! The angle μ of a Fourier mode is measured against a single reference
//! direction. Callers may hand that direction over explicitly, name a box
//! axis, or ask for the `firstpoint`/`endpoint` pair conventions. The
//! pair conventions matter for wide-angle estimators working pair by
//! pair; at the level of this FFT estimator they resolve to the fixed
//! direction from the observer (the coordinate origin) to the box center.

use crate::error::Error;

/// The line-of-sight specification.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LineOfSight {
    /// an explicit direction (need not be normalized)
    Fixed([f64; 3]),
    /// one of the box axes, 0..3
    Axis(usize),
    /// direction to the first member of each pair
    FirstPoint,
    /// direction to the second member of each pair
    EndPoint,
}

impl LineOfSight {
    /// parse an axis or convention name (`x`/`y`/`z`,
    /// `firstpoint`/`endpoint`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x" => Some(Self::Axis(0)),
            "y" => Some(Self::Axis(1)),
            "z" => Some(Self::Axis(2)),
            "firstpoint" => Some(Self::FirstPoint),
            "endpoint" => Some(Self::EndPoint),
            _ => None,
        }
    }

    /// short tag recorded in statistic metadata
    pub fn tag(&self) -> String {
        match self {
            Self::Fixed(v) => format!("fixed:[{},{},{}]", v[0], v[1], v[2]),
            Self::Axis(0) => "x".to_string(),
            Self::Axis(1) => "y".to_string(),
            Self::Axis(_) => "z".to_string(),
            Self::FirstPoint => "firstpoint".to_string(),
            Self::EndPoint => "endpoint".to_string(),
        }
    }

    /// Resolve to a unit vector. The pair conventions use the direction
    /// from the observer at the origin to `boxcenter`.
    pub fn unit_vector(&self, boxcenter: [f64; 3]) -> Result<[f64; 3], Error> {
        let raw = match self {
            Self::Fixed(v) => *v,
            Self::Axis(axis) => {
                if *axis > 2 {
                    return Err(Error::configuration(
                        "line of sight",
                        format!("axis index must be 0, 1 or 2 (got {axis})"),
                    ));
                }
                let mut v = [0.0; 3];
                v[*axis] = 1.0;
                v
            }
            Self::FirstPoint | Self::EndPoint => boxcenter,
        };
        let norm = (raw[0] * raw[0] + raw[1] * raw[1] + raw[2] * raw[2]).sqrt();
        if !(norm > 0.0) || !norm.is_finite() {
            return Err(Error::configuration(
                "line of sight",
                "the line-of-sight direction has zero (or non-finite) norm; \
                 for the pair conventions this means the observer sits at the \
                 box center — pass an explicit direction instead",
            ));
        }
        Ok([raw[0] / norm, raw[1] / norm, raw[2] / norm])
    }
}
