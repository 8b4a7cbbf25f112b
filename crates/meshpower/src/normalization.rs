//! Normalization (`wnorm`) and shot-noise estimates.
//!
//! The raw FFT accumulation has units of (weighted counts)²; dividing by
//! `wnorm = ∫ n̄²(x) d³x` (in weighted form) turns it into a power with
//! volume units. Three routes to `wnorm` exist:
//!
//! - analytic, for a uniform density: `(Σ w)² / V`;
//! - from the randoms' tabulated density `n̄` ([`normalization_from_nbar`]):
//!   `α · Σ_randoms n̄ᵢ wᵢ`;
//! - from the painted density fields themselves ([`normalization`]):
//!   `α · Σ_cells D(x)·R(x) / V_cell`. Multiplying the two *independent*
//!   catalogs' fields keeps the estimate free of self-pair (shot) bias,
//!   and the two data-driven routes agree at the ten-percent level for
//!   realistic catalogs.
//!
//! Shot noise of an auto spectrum is `(Σ w_d² + α² Σ w_r²) / wnorm`; a
//! cross spectrum of independently sampled catalogs has none.

use std::sync::Arc;

use log::debug;

use crate::catalog_mesh::CatalogMesh;
use crate::comm::Communicator;
use crate::error::Error;

/// The analytic normalization of a uniform-density catalog:
/// `(Σ w)² / V`.
pub fn uniform_normalization(total_weight: f64, volume: f64) -> Result<f64, Error> {
    if volume <= 0.0 || !volume.is_finite() {
        return Err(Error::degenerate_box(format!(
            "cannot normalize over volume {volume}"
        )));
    }
    if total_weight == 0.0 {
        return Err(Error::degenerate_normalization(
            "the catalog has zero total weight",
        ));
    }
    Ok(total_weight * total_weight / volume)
}

/// Normalization from the randoms' tabulated number density:
/// `α · Σ n̄ᵢ wᵢ`, with `α = Σ w_data / Σ w_randoms` when data weights
/// are supplied (1 otherwise).
///
/// This is a collective call.
pub fn normalization_from_nbar(
    nbar: &[f64],
    weights: Option<&[f64]>,
    data_weights: Option<&[f64]>,
    comm: &Arc<dyn Communicator>,
) -> Result<f64, Error> {
    if let Some(w) = weights {
        if w.len() != nbar.len() {
            return Err(Error::configuration(
                "normalization inputs",
                format!(
                    "nbar and weights must have equal lengths (got {} and {})",
                    nbar.len(),
                    w.len()
                ),
            ));
        }
    }

    let local_nbar_weight: f64 = match weights {
        Some(w) => nbar.iter().zip(w).map(|(n, w)| n * w).sum(),
        None => nbar.iter().sum(),
    };
    let local_weight: f64 = match weights {
        Some(w) => w.iter().sum(),
        None => nbar.len() as f64,
    };
    let local_data_weight: f64 = data_weights.map(|w| w.iter().sum()).unwrap_or(0.0);

    let mut totals = [local_nbar_weight, local_weight, local_data_weight];
    comm.sum_f64s(&mut totals);
    let [nbar_weight, weight, data_weight] = totals;

    let alpha = if data_weights.is_some() {
        if weight == 0.0 {
            return Err(Error::degenerate_normalization(
                "the randoms catalog has zero total weight",
            ));
        }
        data_weight / weight
    } else {
        1.0
    };

    let norm = alpha * nbar_weight;
    if norm <= 0.0 || !norm.is_finite() {
        return Err(Error::degenerate_normalization(format!(
            "the nbar-weighted sum gives an unusable normalization ({norm})"
        )));
    }
    Ok(norm)
}

/// Normalization from the painted density fields.
///
/// With randoms attached this is `α · Σ D(x)·R(x) / V_cell` over separate
/// paintings of the two catalogs (no self-pairs, hence no shot bias);
/// without randoms it falls back to the analytic uniform value.
///
/// This is a collective call.
pub fn normalization(mesh: &CatalogMesh) -> Result<f64, Error> {
    if mesh.data_weight() == 0.0 {
        return Err(Error::degenerate_normalization(
            "the data catalog has zero total weight",
        ));
    }
    if !mesh.has_randoms() {
        debug!("no randoms attached; using the analytic uniform normalization");
        return uniform_normalization(mesh.data_weight(), mesh.geometry().volume());
    }

    let data = mesh.paint_data()?;
    let randoms = mesh.paint_randoms()?;
    let dot = data.global_dot(&randoms)?;
    let norm = mesh.alpha() * dot / mesh.geometry().cell_volume();
    if norm <= 0.0 || !norm.is_finite() {
        return Err(Error::degenerate_normalization(format!(
            "the density-field product gives an unusable normalization ({norm})"
        )));
    }
    Ok(norm)
}

/// The unnormalized shot noise of the mesh's auto spectrum:
/// `Σ w_d² + α² Σ w_r²`. Divide by `wnorm` for the physical level; use
/// zero for cross spectra of independent catalogs.
pub fn shotnoise_nonorm(mesh: &CatalogMesh) -> f64 {
    let alpha = mesh.alpha();
    mesh.data_weight_sq() + alpha * alpha * mesh.randoms_weight_sq()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;

    fn serial() -> Arc<dyn Communicator> {
        Arc::new(SerialComm)
    }

    #[test]
    fn uniform_normalization_degeneracies() {
        assert!(uniform_normalization(10.0, 0.0).unwrap_err().is_degenerate_box());
        assert!(
            uniform_normalization(0.0, 1000.0)
                .unwrap_err()
                .is_degenerate_normalization()
        );
        let norm = uniform_normalization(100.0, 1000.0).unwrap();
        assert!((norm - 10.0).abs() < 1e-12);
    }

    #[test]
    fn nbar_normalization_matches_hand_computation() {
        let comm = serial();
        // 4 randoms at nbar = 1e-3, randoms weights 2, data totals 4
        let nbar = [1e-3; 4];
        let weights = [2.0; 4];
        let data_weights = [1.0; 4];
        let norm =
            normalization_from_nbar(&nbar, Some(&weights), Some(&data_weights), &comm).unwrap();
        // alpha = 4/8 = 0.5; sum nbar*w = 8e-3; norm = 4e-3
        assert!((norm - 4e-3).abs() < 1e-15);
    }

    #[test]
    fn nbar_normalization_rejects_degenerate_inputs() {
        let comm = serial();
        let nbar = [1e-3; 4];
        let err = normalization_from_nbar(&nbar, Some(&[0.0; 4]), Some(&[1.0; 4]), &comm)
            .unwrap_err();
        assert!(err.is_degenerate_normalization());

        let err = normalization_from_nbar(&nbar, Some(&[1.0; 3]), None, &comm).unwrap_err();
        assert!(err.is_configuration());

        let err = normalization_from_nbar(&[0.0; 4], None, None, &comm).unwrap_err();
        assert!(err.is_degenerate_normalization());
    }
}
