//! The mesh-level estimator driver: Fourier-space fields in, statistic
//! containers out.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use ndarray::{Array1, Array2};
use num_complex::Complex64;

use crate::comm::agree;
use crate::edges::EdgeSpec;
use crate::error::Error;
use crate::los::LineOfSight;
use crate::mesh::{ComplexMeshField, RealMeshField};
use crate::project::{BinningSpec, RawBinnedPower, project_to_basis};
use crate::statistic::{PowerSpectrumMultipole, PowerSpectrumWedge};

/// Options shared by the estimator drivers.
#[derive(Clone, Debug)]
pub struct PowerOptions {
    /// wavenumber bin edges
    pub edges: EdgeSpec,
    /// multipole orders to measure (empty for none)
    pub ells: Vec<usize>,
    /// μ wedge edges; `None` with empty `ells` means a single wedge
    /// spanning the full μ range
    pub muedges: Option<Vec<f64>>,
    /// line-of-sight convention
    pub los: LineOfSight,
    /// normalization override; computed from the inputs when `None`
    pub wnorm: Option<f64>,
    /// shot-noise override; computed from the inputs when `None`
    pub shotnoise: Option<f64>,
}

impl Default for PowerOptions {
    fn default() -> Self {
        Self {
            edges: EdgeSpec::Range {
                min: 0.0,
                max: None,
                step: None,
            },
            ells: vec![0, 2, 4],
            muedges: None,
            los: LineOfSight::Axis(0),
            wnorm: None,
            shotnoise: None,
        }
    }
}

impl PowerOptions {
    /// check the option combination and resolve the implicit defaults
    /// that do not need a mesh (the full-μ wedge, duplicate ells)
    fn resolved_muedges(&self) -> Result<Option<Vec<f64>>, Error> {
        for (i, ell) in self.ells.iter().enumerate() {
            if self.ells[..i].contains(ell) {
                return Err(Error::configuration(
                    "ells",
                    format!("multipole order {ell} is listed twice"),
                ));
            }
        }
        if self.ells.is_empty() && self.muedges.is_none() {
            // wedge output with the default single full-range wedge
            return Ok(Some(vec![-1.0, 1.0]));
        }
        Ok(self.muedges.clone())
    }
}

/// Power spectra measured from one or two mesh fields.
///
/// Holds a multipole container, a wedge container, or both, depending on
/// the requested decomposition.
#[derive(Debug)]
pub struct MeshFFTPower {
    poles: Option<PowerSpectrumMultipole>,
    wedges: Option<PowerSpectrumWedge>,
    wnorm: f64,
    shotnoise: f64,
}

impl MeshFFTPower {
    /// Measure the auto (or cross) spectrum of one (or two) real-space
    /// fields.
    ///
    /// The fields are transformed here. Without an explicit `wnorm` the
    /// mesh-level convention `N_cells² / V` is used (appropriate for
    /// density-contrast fields painted at mean density 1); the default
    /// shot noise is zero — catalog-level drivers know their particle
    /// counts and pass overrides.
    ///
    /// This is a collective call.
    pub fn from_real_fields(
        field1: &RealMeshField,
        field2: Option<&RealMeshField>,
        options: &PowerOptions,
    ) -> Result<Self, Error> {
        let spectrum1 = field1.forward_transform();
        let spectrum2 = field2.map(|f| f.forward_transform());
        Self::from_spectra(&spectrum1, spectrum2.as_ref(), options)
    }

    /// Measure the spectrum of already transformed fields.
    ///
    /// This is a collective call.
    pub fn from_spectra(
        mesh1: &ComplexMeshField,
        mesh2: Option<&ComplexMeshField>,
        options: &PowerOptions,
    ) -> Result<Self, Error> {
        let comm = Arc::clone(mesh1.comm());
        let setup = || -> Result<(BinningSpec, f64, f64), Error> {
            let geometry = mesh1.geometry();
            let muedges = options.resolved_muedges()?;

            // default k range: up to the tightest Nyquist frequency in
            // steps of the finest fundamental
            let default_max = (0..3).map(|d| geometry.nyquist(d)).fold(f64::MAX, f64::min);
            let default_step = (0..3)
                .map(|d| geometry.fundamental(d))
                .fold(f64::MAX, f64::min);
            let kedges = options.edges.materialize(default_max, default_step)?;

            let los = options.los.unit_vector(geometry.boxcenter())?;

            let wnorm = match options.wnorm {
                Some(wnorm) if wnorm > 0.0 && wnorm.is_finite() => wnorm,
                Some(wnorm) => {
                    return Err(Error::configuration(
                        "wnorm",
                        format!("must be positive and finite (got {wnorm})"),
                    ));
                }
                None => geometry.n_cells() as f64 * geometry.n_cells() as f64
                    / geometry.volume(),
            };
            let shotnoise = options.shotnoise.unwrap_or(0.0);

            Ok((
                BinningSpec {
                    kedges,
                    muedges,
                    ells: if options.ells.is_empty() {
                        None
                    } else {
                        Some(options.ells.clone())
                    },
                    los,
                },
                wnorm,
                shotnoise,
            ))
        };
        // configuration problems must surface on every rank before the
        // collective binning pass starts
        let (spec, wnorm, shotnoise) = agree(comm.as_ref(), setup())?;

        debug!(
            "measuring power spectrum: {} k bins, poles {:?}, wedges {:?}",
            spec.kedges.len() - 1,
            spec.ells,
            spec.muedges.as_ref().map(|mu| mu.len() - 1),
        );

        let raw = project_to_basis(mesh1, mesh2, &spec)?;
        let mut attrs = BTreeMap::new();
        attrs.insert("los".to_string(), options.los.tag());
        attrs.insert(
            "autocorrelation".to_string(),
            format!("{}", mesh2.is_none()),
        );

        Self::from_raw(raw, spec, wnorm, shotnoise, attrs)
    }

    fn from_raw(
        raw: RawBinnedPower,
        spec: BinningSpec,
        wnorm: f64,
        shotnoise: f64,
        attrs: BTreeMap<String, String>,
    ) -> Result<Self, Error> {
        let poles = match raw.poles {
            Some(raw_poles) => {
                let n_k = raw_poles.nmodes.len();
                let mut k = Array1::zeros(n_k);
                let mut value = Array2::<Complex64>::zeros((raw_poles.ells.len(), n_k));
                for ik in 0..n_k {
                    let n = raw_poles.nmodes[ik];
                    if n == 0 {
                        k[ik] = 0.5 * (spec.kedges[ik] + spec.kedges[ik + 1]);
                    } else {
                        k[ik] = raw_poles.k_sum[ik] / n as f64;
                        for ell_idx in 0..raw_poles.ells.len() {
                            value[[ell_idx, ik]] =
                                raw_poles.value[[ell_idx, ik]] / (n as f64 * wnorm);
                        }
                    }
                }
                Some(PowerSpectrumMultipole::new(
                    spec.kedges.clone(),
                    raw_poles.ells,
                    k,
                    value,
                    raw_poles.nmodes,
                    wnorm,
                    shotnoise,
                    attrs.clone(),
                )?)
            }
            None => None,
        };

        let wedges = match (raw.wedges, spec.muedges) {
            (Some(raw_wedges), Some(muedges)) => {
                let (n_k, n_mu) = raw_wedges.nmodes.dim();
                let mut k = Array2::zeros((n_k, n_mu));
                let mut mu = Array2::zeros((n_k, n_mu));
                let mut value = Array2::<Complex64>::zeros((n_k, n_mu));
                for ik in 0..n_k {
                    for imu in 0..n_mu {
                        let n = raw_wedges.nmodes[[ik, imu]];
                        if n == 0 {
                            k[[ik, imu]] = 0.5 * (spec.kedges[ik] + spec.kedges[ik + 1]);
                            mu[[ik, imu]] = 0.5 * (muedges[imu] + muedges[imu + 1]);
                        } else {
                            k[[ik, imu]] = raw_wedges.k_sum[[ik, imu]] / n as f64;
                            mu[[ik, imu]] = raw_wedges.mu_sum[[ik, imu]] / n as f64;
                            value[[ik, imu]] =
                                raw_wedges.value[[ik, imu]] / (n as f64 * wnorm);
                        }
                    }
                }
                Some(PowerSpectrumWedge::new(
                    spec.kedges,
                    muedges,
                    k,
                    mu,
                    value,
                    raw_wedges.nmodes,
                    wnorm,
                    shotnoise,
                    attrs,
                )?)
            }
            _ => None,
        };

        Ok(Self {
            poles,
            wedges,
            wnorm,
            shotnoise,
        })
    }

    pub fn poles(&self) -> Option<&PowerSpectrumMultipole> {
        self.poles.as_ref()
    }

    pub fn wedges(&self) -> Option<&PowerSpectrumWedge> {
        self.wedges.as_ref()
    }

    pub fn wnorm(&self) -> f64 {
        self.wnorm
    }

    pub fn shotnoise(&self) -> f64 {
        self.shotnoise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use meshpower_nostd_internal::MeshGeometry;
    use ndarray::Array3;

    fn field_from(data: &Array3<f64>, boxsize: f64) -> RealMeshField {
        let n = data.shape()[0];
        let geometry = MeshGeometry::new([n; 3], [boxsize; 3], [0.0; 3]).unwrap();
        RealMeshField::from_global_array(geometry, Arc::new(SerialComm), data).unwrap()
    }

    #[test]
    fn duplicate_ells_are_rejected() {
        let data = Array3::<f64>::from_elem((4, 4, 4), 1.0);
        let field = field_from(&data, 100.0);
        let options = PowerOptions {
            ells: vec![0, 2, 2],
            ..Default::default()
        };
        let err = MeshFFTPower::from_real_fields(&field, None, &options).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn empty_ells_fall_back_to_a_full_wedge() {
        let mut data = Array3::<f64>::zeros((8, 8, 8));
        for (i, v) in data.iter_mut().enumerate() {
            *v = ((i % 3) as f64) - 1.0;
        }
        let field = field_from(&data, 100.0);
        let options = PowerOptions {
            ells: vec![],
            ..Default::default()
        };
        let result = MeshFFTPower::from_real_fields(&field, None, &options).unwrap();
        assert!(result.poles().is_none());
        let wedges = result.wedges().unwrap();
        assert_eq!(wedges.shape().1, 1);
        assert_eq!(wedges.muedges(), &[-1.0, 1.0]);
    }

    #[test]
    fn both_decompositions_from_one_pass() {
        let mut data = Array3::<f64>::zeros((8, 8, 8));
        for (i, v) in data.iter_mut().enumerate() {
            *v = ((i * 11) % 7) as f64 - 3.0;
        }
        let field = field_from(&data, 100.0);
        let options = PowerOptions {
            ells: vec![0, 2],
            muedges: Some(vec![-1.0, -0.5, 0.0, 0.5, 1.0]),
            los: LineOfSight::Axis(2),
            ..Default::default()
        };
        let result = MeshFFTPower::from_real_fields(&field, None, &options).unwrap();
        let poles = result.poles().unwrap();
        let wedges = result.wedges().unwrap();
        assert_eq!(poles.ells(), &[0, 2]);
        assert_eq!(wedges.shape().1, 4);
        // the same modes feed both decompositions
        let pole_modes: u64 = poles.nmodes().iter().sum();
        let wedge_modes: u64 = wedges.nmodes().iter().sum();
        assert_eq!(pole_modes, wedge_modes);
    }

    #[test]
    fn bad_wnorm_override_is_rejected() {
        let data = Array3::<f64>::from_elem((4, 4, 4), 1.0);
        let field = field_from(&data, 100.0);
        let options = PowerOptions {
            wnorm: Some(-1.0),
            ..Default::default()
        };
        let err = MeshFFTPower::from_real_fields(&field, None, &options).unwrap_err();
        assert!(err.is_configuration());
    }
}
