//! Bin edge specifications for the estimator drivers.
//!
//! Callers either hand over an explicit edge sequence or a
//! `{min, max, step}` range; both are validated up front and materialized
//! into a concrete sequence before any mesh work starts.

use std::sync::Arc;

use meshpower_nostd_internal::{BinEdges, RegularBinEdges, validate_bin_edges};

use crate::comm::Communicator;
use crate::error::Error;

/// A bin edge specification.
#[derive(Clone, Debug, PartialEq)]
pub enum EdgeSpec {
    /// an explicit, strictly increasing sequence of edges
    Explicit(Vec<f64>),
    /// a uniform grid; `max = None` means "up to the attainable maximum"
    /// and `step = None` means "the fundamental step of the box"
    Range {
        min: f64,
        max: Option<f64>,
        step: Option<f64>,
    },
}

impl EdgeSpec {
    /// Materialize into a concrete edge sequence.
    ///
    /// `default_max` and `default_step` fill in the open ends of a
    /// [`EdgeSpec::Range`] (for wavenumber binning: the attainable
    /// maximum of the mesh and the fundamental wavenumber of the box).
    pub fn materialize(&self, default_max: f64, default_step: f64) -> Result<Vec<f64>, Error> {
        let edges = match self {
            EdgeSpec::Explicit(edges) => edges.clone(),
            EdgeSpec::Range { min, max, step } => {
                let max = max.unwrap_or(default_max);
                let step = step.unwrap_or(default_step);
                if !(step > 0.0) || !step.is_finite() {
                    return Err(Error::configuration(
                        "edge step",
                        format!("the step must be positive and finite (got {step})"),
                    ));
                }
                if max <= *min {
                    return Err(Error::configuration(
                        "edge range",
                        format!("max ({max}) must exceed min ({min})"),
                    ));
                }
                // edges are step multiples from min, running while they
                // stay within half a step of max (so an inexact
                // max/step ratio never gains or loses a bin)
                let n_bins = (((max - min) / step + 0.5).floor()).max(1.0) as usize;
                let bins = RegularBinEdges::new(*min, min + step * n_bins as f64, n_bins)
                    .map_err(|what| Error::configuration("edge range", what))?;
                (0..=n_bins).map(|i| bins.edge(i)).collect()
            }
        };
        validate_bin_edges(&edges).map_err(|what| Error::configuration("bin edges", what))?;
        Ok(edges)
    }
}

/// Discover the minimal consistent bin edges covering a set of attainable
/// coordinate values (e.g. the |k| magnitudes of a finite lattice).
///
/// Every rank passes the values it owns; the union is deduplicated
/// (within a relative tolerance), clipped to `[xmin, xmax]`, and the
/// returned edges sit midway between consecutive distinct values with a
/// half-spacing extension at both ends. This is a collective call; every
/// rank receives the same edges.
pub fn find_unique_edges(
    local_values: &[f64],
    xmin: f64,
    xmax: f64,
    comm: &Arc<dyn Communicator>,
) -> Result<Vec<f64>, Error> {
    let in_range: Vec<f64> = local_values
        .iter()
        .copied()
        .filter(|&x| x >= xmin && x <= xmax && x.is_finite())
        .collect();

    let gathered = comm.gather_f64s(0, &in_range);

    let mut edges: Vec<f64> = Vec::new();
    if let Some(mut values) = gathered {
        values.sort_by(|a, b| a.total_cmp(b));
        let mut unique: Vec<f64> = Vec::new();
        for x in values {
            match unique.last() {
                Some(&last) if (x - last).abs() <= 1e-12 * x.abs().max(1.0) => {}
                _ => unique.push(x),
            }
        }
        if unique.len() < 2 {
            // an agreed failure: the other ranks see the empty broadcast
            // below and fail the same way
        } else {
            edges.reserve(unique.len() + 1);
            let first_gap = unique[1] - unique[0];
            edges.push((unique[0] - 0.5 * first_gap).max(xmin));
            for pair in unique.windows(2) {
                edges.push(0.5 * (pair[0] + pair[1]));
            }
            let last_gap = unique[unique.len() - 1] - unique[unique.len() - 2];
            edges.push((unique[unique.len() - 1] + 0.5 * last_gap).min(xmax));
        }
    }

    // share the outcome: length first, then the edges themselves
    let mut header = [edges.len() as f64];
    comm.bcast_f64s(0, &mut header);
    let n_edges = header[0] as usize;
    if n_edges < 2 {
        return Err(Error::configuration(
            "find_unique_edges",
            "need at least two distinct attainable values within [xmin, xmax]",
        ));
    }
    edges.resize(n_edges, 0.0);
    comm.bcast_f64s(0, &mut edges);
    Ok(edges)
}
