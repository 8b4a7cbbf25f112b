//! Statistic containers: the persisted results of a power spectrum
//! measurement.
//!
//! Two concrete containers exist, matching the two decompositions the
//! estimator produces: [`PowerSpectrumMultipole`] (one complex spectrum
//! per Legendre order) and [`PowerSpectrumWedge`] (a (k, μ) grid). Both
//! hold their bin edges, the accumulated mean mode coordinates, the
//! normalized (but not shot-subtracted) values, the per-bin mode counts
//! and free-form metadata. They are plain data: construction happens once
//! after a binning pass, copies are deep, and mutation is limited to the
//! metadata map.
//!
//! Empty bins store the arithmetic bin center as their mode coordinate
//! and zero as their value (rather than NaN), which keeps the archives
//! JSON-clean and the round trip exact.
//!
//! On-disk form: a single self-describing JSON archive with a `kind` tag
//! (`"multipole"` or `"wedge"`); loading rejects unrecognized tags with
//! an UNKNOWN_FORMAT error.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2, Axis, s};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::comm::Communicator;
use crate::error::Error;

fn check_edges(name: &str, edges: &[f64]) -> Result<(), Error> {
    meshpower_nostd_internal::validate_bin_edges(edges)
        .map_err(|what| Error::configuration(name.to_string(), what))
}

/// nmodes-weighted mean over a group of bins; falls back to `center`
/// when the group holds no modes
fn weighted_mean(values: &[f64], weights: &[u64], center: f64) -> f64 {
    let total: u64 = weights.iter().sum();
    if total == 0 {
        center
    } else {
        let acc: f64 = values
            .iter()
            .zip(weights)
            .map(|(v, &w)| v * w as f64)
            .sum();
        acc / total as f64
    }
}

fn weighted_mean_complex(values: &[Complex64], weights: &[u64]) -> Complex64 {
    let total: u64 = weights.iter().sum();
    if total == 0 {
        Complex64::new(0.0, 0.0)
    } else {
        let acc: Complex64 = values
            .iter()
            .zip(weights)
            .map(|(&v, &w)| v * w as f64)
            .sum();
        acc / total as f64
    }
}

/// keep every `factor`-th edge (both ends always survive)
fn coarsen_edges(edges: &[f64], factor: usize) -> Vec<f64> {
    edges.iter().copied().step_by(factor).collect()
}

/// A multipole-decomposed power spectrum.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerSpectrumMultipole {
    kedges: Vec<f64>,
    ells: Vec<usize>,
    /// accumulated mean |k| per bin
    k: Array1<f64>,
    /// normalized power per (ell, k-bin); shot noise NOT subtracted
    value: Array2<Complex64>,
    nmodes: Array1<u64>,
    wnorm: f64,
    shotnoise: f64,
    attrs: BTreeMap<String, String>,
}

impl PowerSpectrumMultipole {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kedges: Vec<f64>,
        ells: Vec<usize>,
        k: Array1<f64>,
        value: Array2<Complex64>,
        nmodes: Array1<u64>,
        wnorm: f64,
        shotnoise: f64,
        attrs: BTreeMap<String, String>,
    ) -> Result<Self, Error> {
        check_edges("kedges", &kedges)?;
        let n_k = kedges.len() - 1;
        if ells.is_empty() {
            return Err(Error::configuration(
                "ells",
                "at least one multipole order is required",
            ));
        }
        if value.shape() != [ells.len(), n_k] {
            return Err(Error::shape_mismatch(
                "the multipole value array",
                format!("[{}, {}]", ells.len(), n_k),
                format!("{:?}", value.shape()),
            ));
        }
        if k.len() != n_k || nmodes.len() != n_k {
            return Err(Error::shape_mismatch(
                "the mode arrays",
                format!("[{}]", n_k),
                format!("[{}] and [{}]", k.len(), nmodes.len()),
            ));
        }
        Ok(Self {
            kedges,
            ells,
            k,
            value,
            nmodes,
            wnorm,
            shotnoise,
            attrs,
        })
    }

    pub fn kedges(&self) -> &[f64] {
        &self.kedges
    }

    pub fn ells(&self) -> &[usize] {
        &self.ells
    }

    /// accumulated mean |k| per bin
    pub fn k(&self) -> &Array1<f64> {
        &self.k
    }

    /// arithmetic centers of the k bins
    pub fn kavg(&self) -> Vec<f64> {
        self.kedges
            .windows(2)
            .map(|pair| 0.5 * (pair[0] + pair[1]))
            .collect()
    }

    pub fn nmodes(&self) -> &Array1<u64> {
        &self.nmodes
    }

    /// the stored (normalized, shot-noise-not-subtracted) values
    pub fn value(&self) -> &Array2<Complex64> {
        &self.value
    }

    pub fn wnorm(&self) -> f64 {
        self.wnorm
    }

    pub fn shotnoise(&self) -> f64 {
        self.shotnoise
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.attrs
    }

    /// number of k bins
    pub fn shape(&self) -> usize {
        self.kedges.len() - 1
    }

    /// Evaluate the spectrum at multipole order `ell`: the stored values
    /// with the shot noise subtracted from the monopole.
    ///
    /// Fails with an INVALID_INDEX error for an unmeasured order.
    pub fn power(&self, ell: usize) -> Result<Array1<Complex64>, Error> {
        let row = self.ells.iter().position(|&e| e == ell).ok_or_else(|| {
            Error::invalid_index(format!(
                "multipole ell = {} was not measured (available: {:?})",
                ell, self.ells
            ))
        })?;
        let mut out = self.value.index_axis(Axis(0), row).to_owned();
        if ell == 0 {
            out.mapv_inplace(|v| v - self.shotnoise);
        }
        Ok(out)
    }

    /// Produce a new container with `factor` consecutive k bins merged.
    ///
    /// The new mode coordinates and values are nmodes-weighted means and
    /// the new counts are sums. Fails with a SHAPE_MISMATCH error when
    /// the bin count is not divisible by `factor`.
    pub fn rebin(&self, factor: usize) -> Result<Self, Error> {
        if factor == 0 {
            return Err(Error::configuration("rebin factor", "must be nonzero"));
        }
        let n_k = self.shape();
        if n_k % factor != 0 {
            return Err(Error::shape_mismatch(
                "the rebin factor",
                format!("a divisor of {} k bins", n_k),
                format!("{}", factor),
            ));
        }
        let n_new = n_k / factor;
        let kedges = coarsen_edges(&self.kedges, factor);

        let mut k = Array1::zeros(n_new);
        let mut nmodes = Array1::zeros(n_new);
        let mut value = Array2::zeros((self.ells.len(), n_new));
        for i in 0..n_new {
            let lo = i * factor;
            let hi = lo + factor;
            let weights = &self.nmodes.as_slice().unwrap()[lo..hi];
            let center = 0.5 * (kedges[i] + kedges[i + 1]);
            k[i] = weighted_mean(&self.k.as_slice().unwrap()[lo..hi], weights, center);
            nmodes[i] = weights.iter().sum();
            for (ell_idx, _) in self.ells.iter().enumerate() {
                let row = self.value.slice(s![ell_idx, lo..hi]);
                value[[ell_idx, i]] =
                    weighted_mean_complex(row.as_slice().unwrap(), weights);
            }
        }

        Self::new(
            kedges,
            self.ells.clone(),
            k,
            value,
            nmodes,
            self.wnorm,
            self.shotnoise,
            self.attrs.clone(),
        )
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        save_archive(path, &StatisticArchive::Multipole(self.clone()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        match load_archive(path)? {
            StatisticArchive::Multipole(stat) => Ok(stat),
            StatisticArchive::Wedge(_) => Err(Error::unknown_format(
                "expected a multipole archive, found a wedge archive",
            )),
        }
    }

    /// Root-reads the archive and broadcasts it to every rank
    /// (collective).
    pub fn load_bcast(
        comm: &Arc<dyn Communicator>,
        root: usize,
        path: impl AsRef<Path>,
    ) -> Result<Self, Error> {
        match load_archive_bcast(comm, root, path)? {
            StatisticArchive::Multipole(stat) => Ok(stat),
            StatisticArchive::Wedge(_) => Err(Error::unknown_format(
                "expected a multipole archive, found a wedge archive",
            )),
        }
    }
}

/// A (k, μ)-binned ("wedge") power spectrum.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerSpectrumWedge {
    kedges: Vec<f64>,
    muedges: Vec<f64>,
    /// accumulated mean |k| per (k, μ) bin
    k: Array2<f64>,
    /// accumulated mean μ per (k, μ) bin
    mu: Array2<f64>,
    /// normalized power per (k, μ) bin; shot noise NOT subtracted
    value: Array2<Complex64>,
    nmodes: Array2<u64>,
    wnorm: f64,
    shotnoise: f64,
    attrs: BTreeMap<String, String>,
}

impl PowerSpectrumWedge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kedges: Vec<f64>,
        muedges: Vec<f64>,
        k: Array2<f64>,
        mu: Array2<f64>,
        value: Array2<Complex64>,
        nmodes: Array2<u64>,
        wnorm: f64,
        shotnoise: f64,
        attrs: BTreeMap<String, String>,
    ) -> Result<Self, Error> {
        check_edges("kedges", &kedges)?;
        check_edges("muedges", &muedges)?;
        let shape = [kedges.len() - 1, muedges.len() - 1];
        for (name, actual) in [
            ("k", k.shape()),
            ("mu", mu.shape()),
            ("value", value.shape()),
        ] {
            if actual != shape {
                return Err(Error::shape_mismatch(
                    format!("the wedge {name} array"),
                    format!("{:?}", shape),
                    format!("{:?}", actual),
                ));
            }
        }
        if nmodes.shape() != shape {
            return Err(Error::shape_mismatch(
                "the wedge nmodes array",
                format!("{:?}", shape),
                format!("{:?}", nmodes.shape()),
            ));
        }
        Ok(Self {
            kedges,
            muedges,
            k,
            mu,
            value,
            nmodes,
            wnorm,
            shotnoise,
            attrs,
        })
    }

    pub fn kedges(&self) -> &[f64] {
        &self.kedges
    }

    pub fn muedges(&self) -> &[f64] {
        &self.muedges
    }

    pub fn k(&self) -> &Array2<f64> {
        &self.k
    }

    pub fn mu(&self) -> &Array2<f64> {
        &self.mu
    }

    pub fn value(&self) -> &Array2<Complex64> {
        &self.value
    }

    pub fn nmodes(&self) -> &Array2<u64> {
        &self.nmodes
    }

    pub fn wnorm(&self) -> f64 {
        self.wnorm
    }

    pub fn shotnoise(&self) -> f64 {
        self.shotnoise
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.attrs
    }

    /// `(n_k_bins, n_mu_bins)`
    pub fn shape(&self) -> (usize, usize) {
        (self.kedges.len() - 1, self.muedges.len() - 1)
    }

    /// arithmetic centers of the μ bins
    pub fn muavg(&self) -> Vec<f64> {
        self.muedges
            .windows(2)
            .map(|pair| 0.5 * (pair[0] + pair[1]))
            .collect()
    }

    /// Evaluate the wedge containing `mu`: the stored column with the
    /// shot noise subtracted.
    ///
    /// Fails with an INVALID_INDEX error when `mu` falls outside every
    /// wedge (the last wedge includes its upper edge).
    pub fn power_at_mu(&self, mu: f64) -> Result<Array1<Complex64>, Error> {
        let n_mu = self.muedges.len() - 1;
        let imu = (0..n_mu)
            .find(|&i| {
                let hi_ok = if i + 1 == n_mu {
                    mu <= self.muedges[i + 1]
                } else {
                    mu < self.muedges[i + 1]
                };
                mu >= self.muedges[i] && hi_ok
            })
            .ok_or_else(|| {
                Error::invalid_index(format!(
                    "mu = {} falls outside the measured wedges {:?}",
                    mu, self.muedges
                ))
            })?;
        Ok(self.power_at(imu))
    }

    /// the shot-subtracted spectrum of wedge column `imu`
    fn power_at(&self, imu: usize) -> Array1<Complex64> {
        let mut out = self.value.index_axis(Axis(1), imu).to_owned();
        out.mapv_inplace(|v| v - self.shotnoise);
        out
    }

    /// Produce a new container with `(k factor, μ factor)` consecutive
    /// bins merged along each axis.
    pub fn rebin(&self, factors: (usize, usize)) -> Result<Self, Error> {
        let (fk, fmu) = factors;
        if fk == 0 || fmu == 0 {
            return Err(Error::configuration("rebin factors", "must be nonzero"));
        }
        let (n_k, n_mu) = self.shape();
        if n_k % fk != 0 || n_mu % fmu != 0 {
            return Err(Error::shape_mismatch(
                "the rebin factors",
                format!("divisors of ({}, {}) bins", n_k, n_mu),
                format!("({}, {})", fk, fmu),
            ));
        }
        let (nk_new, nmu_new) = (n_k / fk, n_mu / fmu);
        let kedges = coarsen_edges(&self.kedges, fk);
        let muedges = coarsen_edges(&self.muedges, fmu);

        let mut k = Array2::zeros((nk_new, nmu_new));
        let mut mu = Array2::zeros((nk_new, nmu_new));
        let mut value = Array2::zeros((nk_new, nmu_new));
        let mut nmodes = Array2::zeros((nk_new, nmu_new));

        for i in 0..nk_new {
            for j in 0..nmu_new {
                let block_n = self
                    .nmodes
                    .slice(s![i * fk..(i + 1) * fk, j * fmu..(j + 1) * fmu]);
                let weights: Vec<u64> = block_n.iter().copied().collect();
                let k_block: Vec<f64> = self
                    .k
                    .slice(s![i * fk..(i + 1) * fk, j * fmu..(j + 1) * fmu])
                    .iter()
                    .copied()
                    .collect();
                let mu_block: Vec<f64> = self
                    .mu
                    .slice(s![i * fk..(i + 1) * fk, j * fmu..(j + 1) * fmu])
                    .iter()
                    .copied()
                    .collect();
                let value_block: Vec<Complex64> = self
                    .value
                    .slice(s![i * fk..(i + 1) * fk, j * fmu..(j + 1) * fmu])
                    .iter()
                    .copied()
                    .collect();

                let k_center = 0.5 * (kedges[i] + kedges[i + 1]);
                let mu_center = 0.5 * (muedges[j] + muedges[j + 1]);
                k[[i, j]] = weighted_mean(&k_block, &weights, k_center);
                mu[[i, j]] = weighted_mean(&mu_block, &weights, mu_center);
                value[[i, j]] = weighted_mean_complex(&value_block, &weights);
                nmodes[[i, j]] = weights.iter().sum();
            }
        }

        Self::new(
            kedges,
            muedges,
            k,
            mu,
            value,
            nmodes,
            self.wnorm,
            self.shotnoise,
            self.attrs.clone(),
        )
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        save_archive(path, &StatisticArchive::Wedge(self.clone()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        match load_archive(path)? {
            StatisticArchive::Wedge(stat) => Ok(stat),
            StatisticArchive::Multipole(_) => Err(Error::unknown_format(
                "expected a wedge archive, found a multipole archive",
            )),
        }
    }

    /// Root-reads the archive and broadcasts it to every rank
    /// (collective).
    pub fn load_bcast(
        comm: &Arc<dyn Communicator>,
        root: usize,
        path: impl AsRef<Path>,
    ) -> Result<Self, Error> {
        match load_archive_bcast(comm, root, path)? {
            StatisticArchive::Wedge(stat) => Ok(stat),
            StatisticArchive::Multipole(_) => Err(Error::unknown_format(
                "expected a wedge archive, found a multipole archive",
            )),
        }
    }
}

/// the self-describing on-disk form
#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum StatisticArchive {
    Multipole(PowerSpectrumMultipole),
    Wedge(PowerSpectrumWedge),
}

fn save_archive(path: impl AsRef<Path>, archive: &StatisticArchive) -> Result<(), Error> {
    let bytes = serde_json::to_vec(archive)
        .map_err(|err| Error::unknown_format(format!("failed to serialize: {err}")))?;
    std::fs::write(path.as_ref(), bytes).map_err(|err| {
        Error::unknown_format(format!(
            "failed to write {}: {err}",
            path.as_ref().display()
        ))
    })
}

fn load_archive(path: impl AsRef<Path>) -> Result<StatisticArchive, Error> {
    let bytes = std::fs::read(path.as_ref()).map_err(|err| {
        Error::unknown_format(format!(
            "failed to read {}: {err}",
            path.as_ref().display()
        ))
    })?;
    decode_archive(&bytes)
}

fn decode_archive(bytes: &[u8]) -> Result<StatisticArchive, Error> {
    serde_json::from_slice(bytes)
        .map_err(|err| Error::unknown_format(format!("unrecognized statistic archive: {err}")))
}

fn load_archive_bcast(
    comm: &Arc<dyn Communicator>,
    root: usize,
    path: impl AsRef<Path>,
) -> Result<StatisticArchive, Error> {
    let mut bytes = if comm.rank() == root {
        std::fs::read(path.as_ref()).unwrap_or_default()
    } else {
        Vec::new()
    };
    comm.bcast_bytes(root, &mut bytes);
    if bytes.is_empty() {
        return Err(Error::unknown_format(format!(
            "failed to read {}",
            path.as_ref().display()
        )));
    }
    decode_archive(&bytes)
}
