//! The mode binning engine: turns one or two Fourier-space mesh fields
//! into raw binned power accumulations.
//!
//! For every independent Fourier mode the engine computes the wavenumber
//! magnitude `k = |k⃗|` and the angle cosine `μ = k⃗·l̂ / k`, forms the
//! cross product `conj(A)·B` (or `|A|²` for an auto spectrum) and
//! accumulates it into (k, μ) wedge bins and/or `(2ℓ+1)·P_ℓ(μ)`-weighted
//! multipole bins.
//!
//! Hermitian bookkeeping: a half-spectrum mode strictly inside the last
//! axis stands in for its unstored conjugate mirror as well. The mirror
//! has `μ' = -μ` and the conjugated value, so it lands in the mirrored
//! wedge (with weight 1 on each side) and contributes
//! `(-1)^ℓ P_ℓ(μ) conj(v)` to the multipoles. Modes on the 0/Nyquist
//! planes are stored in full and counted once. The `k = 0` mode is always
//! excluded; modes falling outside every bin are dropped and not counted.
//!
//! Accumulation is local to each worker's slab followed by one collective
//! sum per output array. Summation order across workers is not bitwise
//! deterministic; results are deterministic up to floating-point
//! reassociation.

use ndarray::{Array1, Array2};
use num_complex::Complex64;

use meshpower_nostd_internal::{BinEdges, IrregularBinEdges, legendre};

use crate::error::Error;
use crate::mesh::ComplexMeshField;

/// What to accumulate: k bin edges, optional μ bin edges (wedges) and
/// optional multipole orders, plus the line of sight.
#[derive(Clone, Debug)]
pub struct BinningSpec {
    pub kedges: Vec<f64>,
    pub muedges: Option<Vec<f64>>,
    pub ells: Option<Vec<usize>>,
    pub los: [f64; 3],
}

/// Raw (unnormalized) multipole accumulation: sums, not means.
#[derive(Debug)]
pub struct RawPoles {
    pub ells: Vec<usize>,
    /// Σ (weight · k) per k bin
    pub k_sum: Array1<f64>,
    /// Hermitian-weighted mode count per k bin
    pub nmodes: Array1<u64>,
    /// Σ (2ℓ+1) P_ℓ(μ) · v per (ℓ, k bin), conjugate partners included
    pub value: Array2<Complex64>,
}

/// Raw (unnormalized) wedge accumulation: sums, not means.
#[derive(Debug)]
pub struct RawWedges {
    pub k_sum: Array2<f64>,
    pub mu_sum: Array2<f64>,
    pub nmodes: Array2<u64>,
    pub value: Array2<Complex64>,
}

#[derive(Debug)]
pub struct RawBinnedPower {
    pub poles: Option<RawPoles>,
    pub wedges: Option<RawWedges>,
}

/// μ binning: right-open like every other bin, except that the last bin
/// includes its upper edge so that modes along the line of sight
/// (μ = ±1) are kept.
fn mu_bin_index(mu: f64, edges: &[f64]) -> Option<usize> {
    let n_bins = edges.len() - 1;
    if mu == edges[n_bins] {
        return Some(n_bins - 1);
    }
    if mu < edges[0] || mu > edges[n_bins] {
        return None;
    }
    // a linear scan is fine: μ grids are short
    (0..n_bins).find(|&i| mu >= edges[i] && mu < edges[i + 1])
}

/// Accumulate the binned cross power of `mesh1` and `mesh2` (auto power
/// when `mesh2` is `None`).
///
/// This is a collective call; every rank receives the globally reduced
/// accumulation.
pub fn project_to_basis(
    mesh1: &ComplexMeshField,
    mesh2: Option<&ComplexMeshField>,
    spec: &BinningSpec,
) -> Result<RawBinnedPower, Error> {
    if spec.muedges.is_none() && spec.ells.is_none() {
        return Err(Error::configuration(
            "binning spec",
            "at least one of μ edges (wedges) or multipole orders is required",
        ));
    }
    if let Some(mesh2) = mesh2 {
        if mesh2.geometry() != mesh1.geometry() {
            return Err(Error::shape_mismatch(
                "the second mesh of the cross spectrum",
                format!("{:?}", mesh1.geometry().shape()),
                format!("{:?}", mesh2.geometry().shape()),
            ));
        }
        if mesh2.is_hermitian() != mesh1.is_hermitian() {
            return Err(Error::shape_mismatch(
                "the second mesh of the cross spectrum",
                format!("hermitian = {}", mesh1.is_hermitian()),
                format!("hermitian = {}", mesh2.is_hermitian()),
            ));
        }
    }

    let kbins =
        IrregularBinEdges::new(&spec.kedges).map_err(|what| Error::configuration("kedges", what))?;
    if let Some(muedges) = &spec.muedges {
        meshpower_nostd_internal::validate_bin_edges(muedges)
            .map_err(|what| Error::configuration("muedges", what))?;
    }
    let n_k = kbins.n_bins();

    let geometry = mesh1.geometry();
    let shape = geometry.shape();
    let fundamental = [
        geometry.fundamental(0),
        geometry.fundamental(1),
        geometry.fundamental(2),
    ];
    let los = spec.los;

    let mut poles = spec.ells.as_ref().map(|ells| RawPoles {
        ells: ells.clone(),
        k_sum: Array1::zeros(n_k),
        nmodes: Array1::zeros(n_k),
        value: Array2::zeros((ells.len(), n_k)),
    });
    let mut wedges = spec.muedges.as_ref().map(|muedges| {
        let n_mu = muedges.len() - 1;
        RawWedges {
            k_sum: Array2::zeros((n_k, n_mu)),
            mu_sum: Array2::zeros((n_k, n_mu)),
            nmodes: Array2::zeros((n_k, n_mu)),
            value: Array2::zeros((n_k, n_mu)),
        }
    });

    let local1 = mesh1.local();
    let local_shape = [local1.shape()[0], local1.shape()[1], local1.shape()[2]];
    let slab_start = mesh1.slab_start();

    for i0 in 0..local_shape[0] {
        let f0 = meshpower_nostd_internal::signed_freq(slab_start + i0, shape[0]);
        let k0 = f0 as f64 * fundamental[0];
        for i1 in 0..local_shape[1] {
            let f1 = meshpower_nostd_internal::signed_freq(i1, shape[1]);
            let k1 = f1 as f64 * fundamental[1];
            for i2 in 0..local_shape[2] {
                let f2 = meshpower_nostd_internal::signed_freq(i2, shape[2]);
                if f0 == 0 && f1 == 0 && f2 == 0 {
                    continue;
                }
                let k2 = f2 as f64 * fundamental[2];

                let k = (k0 * k0 + k1 * k1 + k2 * k2).sqrt();
                let Some(ik) = kbins.bin_index(k) else {
                    continue;
                };
                let mu = (k0 * los[0] + k1 * los[1] + k2 * los[2]) / k;

                let a = local1[[i0, i1, i2]];
                let value = match mesh2 {
                    Some(mesh2) => a.conj() * mesh2.local()[[i0, i1, i2]],
                    None => Complex64::new(a.norm_sqr(), 0.0),
                };
                let weight = mesh1.mode_weight(i2);

                if let Some(poles) = poles.as_mut() {
                    poles.k_sum[ik] += weight as f64 * k;
                    poles.nmodes[ik] += weight;
                    for (ell_idx, &ell) in poles.ells.iter().enumerate() {
                        let p_ell = legendre(ell, mu);
                        let contrib = if weight == 2 {
                            // the conjugate mirror sits at -μ
                            let mirrored = if ell % 2 == 0 {
                                value.conj()
                            } else {
                                -value.conj()
                            };
                            p_ell * (value + mirrored)
                        } else {
                            p_ell * value
                        };
                        poles.value[[ell_idx, ik]] += (2 * ell + 1) as f64 * contrib;
                    }
                }

                if let Some(wedges) = wedges.as_mut() {
                    let muedges = spec.muedges.as_deref().unwrap();
                    if let Some(imu) = mu_bin_index(mu, muedges) {
                        wedges.k_sum[[ik, imu]] += k;
                        wedges.mu_sum[[ik, imu]] += mu;
                        wedges.nmodes[[ik, imu]] += 1;
                        wedges.value[[ik, imu]] += value;
                    }
                    if weight == 2 {
                        // conjugate mirror: (k, -μ, conj(v))
                        if let Some(imu) = mu_bin_index(-mu, muedges) {
                            wedges.k_sum[[ik, imu]] += k;
                            wedges.mu_sum[[ik, imu]] -= mu;
                            wedges.nmodes[[ik, imu]] += 1;
                            wedges.value[[ik, imu]] += value.conj();
                        }
                    }
                }
            }
        }
    }

    // one collective sum per accumulated array
    let comm = mesh1.comm();
    if let Some(poles) = poles.as_mut() {
        comm.sum_f64s(poles.k_sum.as_slice_mut().unwrap());
        comm.sum_u64s(poles.nmodes.as_slice_mut().unwrap());
        comm.sum_complex(poles.value.as_slice_mut().unwrap());
    }
    if let Some(wedges) = wedges.as_mut() {
        comm.sum_f64s(wedges.k_sum.as_slice_mut().unwrap());
        comm.sum_f64s(wedges.mu_sum.as_slice_mut().unwrap());
        comm.sum_u64s(wedges.nmodes.as_slice_mut().unwrap());
        comm.sum_complex(wedges.value.as_slice_mut().unwrap());
    }

    Ok(RawBinnedPower { poles, wedges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::mesh::RealMeshField;
    use meshpower_nostd_internal::MeshGeometry;
    use ndarray::Array3;
    use std::sync::Arc;

    fn spectrum_of(data: &Array3<f64>, boxsize: f64) -> ComplexMeshField {
        let n = data.shape()[0];
        let geometry = MeshGeometry::new([n; 3], [boxsize; 3], [0.0; 3]).unwrap();
        let field =
            RealMeshField::from_global_array(geometry, Arc::new(SerialComm), data).unwrap();
        field.forward_transform()
    }

    fn full_range_spec(n: usize, boxsize: f64) -> BinningSpec {
        // one k bin covering every attainable magnitude, one μ wedge
        let kmax = 2.0 * core::f64::consts::PI / boxsize * (n as f64) * 2.0;
        BinningSpec {
            kedges: vec![0.0, kmax],
            muedges: Some(vec![-1.0, 1.0]),
            ells: Some(vec![0]),
            los: [0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn hermitian_mode_count_is_n_cubed_minus_one() {
        for n in [4_usize, 5, 8] {
            let mut data = Array3::<f64>::zeros((n, n, n));
            for (i, v) in data.iter_mut().enumerate() {
                *v = ((i * 7) % 11) as f64 - 5.0;
            }
            let spectrum = spectrum_of(&data, 100.0);
            let raw =
                project_to_basis(&spectrum, None, &full_range_spec(n, 100.0)).unwrap();

            let total = n.pow(3) as u64 - 1;
            let poles = raw.poles.unwrap();
            assert_eq!(poles.nmodes.iter().sum::<u64>(), total, "n = {n}");
            let wedges = raw.wedges.unwrap();
            assert_eq!(wedges.nmodes.iter().sum::<u64>(), total, "n = {n}");
        }
    }

    #[test]
    fn auto_power_monopole_is_real_and_non_negative() {
        let mut data = Array3::<f64>::zeros((8, 8, 8));
        for (i, v) in data.iter_mut().enumerate() {
            *v = ((i * 13) % 17) as f64 * 0.5 - 4.0;
        }
        let spectrum = spectrum_of(&data, 100.0);
        // several k bins so different shells are exercised
        let kf = 2.0 * core::f64::consts::PI / 100.0;
        let spec = BinningSpec {
            kedges: (0..=6).map(|i| kf * i as f64).collect(),
            muedges: None,
            ells: Some(vec![0]),
            los: [0.0, 0.0, 1.0],
        };
        let raw = project_to_basis(&spectrum, None, &spec).unwrap();
        let poles = raw.poles.unwrap();
        for (ik, v) in poles.value.row(0).iter().enumerate() {
            assert!(v.im.abs() < 1e-9, "bin {ik}: imaginary part {}", v.im);
            assert!(v.re >= -1e-9, "bin {ik}: negative monopole {}", v.re);
        }
    }

    #[test]
    fn cross_of_field_with_itself_matches_auto() {
        let mut data = Array3::<f64>::zeros((4, 4, 4));
        for (i, v) in data.iter_mut().enumerate() {
            *v = (i % 5) as f64;
        }
        let spectrum = spectrum_of(&data, 50.0);
        let spec = full_range_spec(4, 50.0);
        let auto = project_to_basis(&spectrum, None, &spec).unwrap();
        let cross = project_to_basis(&spectrum, Some(&spectrum), &spec).unwrap();
        let (a, c) = (auto.poles.unwrap(), cross.poles.unwrap());
        assert_eq!(a.nmodes, c.nmodes);
        for (va, vc) in a.value.iter().zip(c.value.iter()) {
            assert!((va - vc).norm() < 1e-9);
        }
    }

    #[test]
    fn mismatched_meshes_are_rejected() {
        let data4 = Array3::<f64>::zeros((4, 4, 4));
        let data8 = Array3::<f64>::zeros((8, 8, 8));
        let s4 = spectrum_of(&data4, 50.0);
        let s8 = spectrum_of(&data8, 50.0);
        let err = project_to_basis(&s4, Some(&s8), &full_range_spec(4, 50.0)).unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn a_single_plane_wave_lands_in_its_shell() {
        // δ(x) = cos(k_f·x2): power only in the |f| = 1 modes along axis 2
        let n = 8;
        let boxsize = 100.0;
        let kf = 2.0 * core::f64::consts::PI / boxsize;
        let geometry = MeshGeometry::new([n; 3], [boxsize; 3], [0.0; 3]).unwrap();
        let mut data = Array3::<f64>::zeros((n, n, n));
        for i0 in 0..n {
            for i1 in 0..n {
                for i2 in 0..n {
                    let x2 = (i2 as f64 / n as f64 - 0.5) * boxsize;
                    data[[i0, i1, i2]] = (kf * x2).cos();
                }
            }
        }
        let field =
            RealMeshField::from_global_array(geometry, Arc::new(SerialComm), &data).unwrap();
        let spectrum = field.forward_transform();

        let spec = BinningSpec {
            kedges: vec![0.5 * kf, 1.5 * kf, 2.5 * kf],
            muedges: None,
            ells: Some(vec![0, 2]),
            los: [0.0, 0.0, 1.0],
        };
        let raw = project_to_basis(&spectrum, None, &spec).unwrap();
        let poles = raw.poles.unwrap();
        // the |f| = 1 shell along the line of sight: μ = ±1, so the
        // quadrupole picks up the full P_2(1) = 1 weight
        let p0 = poles.value[[0, 0]].re;
        let p2 = poles.value[[1, 0]].re;
        assert!(p0 > 0.0);
        assert!((p2 / p0 - 5.0).abs() < 1e-9, "P2/P0 = {}", p2 / p0);
        // nothing in the second shell
        assert_eq!(poles.value[[0, 1]].re, 0.0);
    }
}
