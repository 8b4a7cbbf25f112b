//! Particle catalog inputs.
//!
//! Callers hand positions over in one of three layouts (`position_type`):
//! `pos` (one `[x, y, z]` triplet per object), `xyz` (three parallel 1D
//! arrays) or `rdd` (right ascension / declination in degrees plus
//! comoving distance, converted to Cartesian here). Internally everything
//! is normalized to the `(3, n)` component-major layout the painter
//! consumes.

use std::sync::Arc;

use ndarray::ArrayView2;

use meshpower_nostd_internal::ParticleBatch;

use crate::comm::Communicator;
use crate::error::Error;

/// The accepted input layouts for catalog positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionType {
    /// an array of `[x, y, z]` triplets
    Pos,
    /// three parallel 1D arrays
    Xyz,
    /// right ascension (deg), declination (deg), distance
    Rdd,
}

impl PositionType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pos" => Some(Self::Pos),
            "xyz" => Some(Self::Xyz),
            "rdd" => Some(Self::Rdd),
            _ => None,
        }
    }
}

/// convert sky coordinates (ra/dec in degrees, distance) to Cartesian
fn sky_to_cartesian(ra: f64, dec: f64, distance: f64) -> [f64; 3] {
    let (ra, dec) = (ra.to_radians(), dec.to_radians());
    let cos_dec = dec.cos();
    [
        distance * cos_dec * ra.cos(),
        distance * cos_dec * ra.sin(),
        distance * dec.sin(),
    ]
}

/// An owned per-worker catalog: positions in `(3, n)` component-major
/// layout plus optional per-object weights.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    /// flat `(3, n)` storage: all x components, then y, then z
    positions: Vec<f64>,
    weights: Option<Vec<f64>>,
    n_objects: usize,
}

impl Catalog {
    /// build from `[x, y, z]` triplets (`position_type = "pos"`)
    pub fn from_pos(positions: &[[f64; 3]], weights: Option<&[f64]>) -> Result<Self, Error> {
        let n = positions.len();
        let mut flat = vec![0.0; 3 * n];
        for (i, p) in positions.iter().enumerate() {
            flat[i] = p[0];
            flat[n + i] = p[1];
            flat[2 * n + i] = p[2];
        }
        Self::from_flat(flat, n, weights)
    }

    /// build from three parallel component arrays (`position_type = "xyz"`)
    pub fn from_xyz(x: &[f64], y: &[f64], z: &[f64], weights: Option<&[f64]>) -> Result<Self, Error> {
        let n = x.len();
        if y.len() != n || z.len() != n {
            return Err(Error::configuration(
                "position components",
                format!(
                    "the x, y and z arrays must have equal lengths (got {}, {}, {})",
                    n,
                    y.len(),
                    z.len()
                ),
            ));
        }
        let mut flat = Vec::with_capacity(3 * n);
        flat.extend_from_slice(x);
        flat.extend_from_slice(y);
        flat.extend_from_slice(z);
        Self::from_flat(flat, n, weights)
    }

    /// build from sky coordinates (`position_type = "rdd"`)
    pub fn from_rdd(
        ra: &[f64],
        dec: &[f64],
        distance: &[f64],
        weights: Option<&[f64]>,
    ) -> Result<Self, Error> {
        let n = ra.len();
        if dec.len() != n || distance.len() != n {
            return Err(Error::configuration(
                "sky coordinates",
                format!(
                    "the ra, dec and distance arrays must have equal lengths (got {}, {}, {})",
                    n,
                    dec.len(),
                    distance.len()
                ),
            ));
        }
        let mut flat = vec![0.0; 3 * n];
        for i in 0..n {
            let p = sky_to_cartesian(ra[i], dec[i], distance[i]);
            flat[i] = p[0];
            flat[n + i] = p[1];
            flat[2 * n + i] = p[2];
        }
        Self::from_flat(flat, n, weights)
    }

    fn from_flat(positions: Vec<f64>, n: usize, weights: Option<&[f64]>) -> Result<Self, Error> {
        if let Some(w) = weights {
            if w.len() != n {
                return Err(Error::configuration(
                    "catalog weights",
                    format!("expected {} weights, got {}", n, w.len()),
                ));
            }
            if w.iter().any(|v| !v.is_finite()) {
                return Err(Error::configuration(
                    "catalog weights",
                    "weights must be finite",
                ));
            }
        }
        Ok(Self {
            positions,
            weights: weights.map(|w| w.to_vec()),
            n_objects: n,
        })
    }

    pub fn n_objects(&self) -> usize {
        self.n_objects
    }

    /// view of this catalog as a paintable particle batch
    pub fn batch(&self) -> ParticleBatch<'_> {
        let view = ArrayView2::from_shape((3, self.n_objects), &self.positions)
            .expect("catalog storage is (3, n) by construction");
        ParticleBatch::new(view, self.weights.as_deref())
            .expect("catalog invariants guarantee a valid batch")
    }

    /// Distribute a catalog held by a single rank (`mpiroot` semantics):
    /// the root provides `Some(catalog)`, everyone else `None`, and each
    /// rank comes out owning a contiguous share of the objects.
    ///
    /// This is a collective call.
    pub fn scatter_from_root(
        comm: &Arc<dyn Communicator>,
        root: usize,
        catalog: Option<&Catalog>,
    ) -> Result<Catalog, Error> {
        if comm.rank() == root && catalog.is_none() {
            return Err(Error::configuration(
                "mpiroot",
                "the root rank must provide the catalog to scatter",
            ));
        }

        // announce the total size and whether weights ride along
        let mut header = [0.0_f64; 2];
        if comm.rank() == root {
            let catalog = catalog.unwrap();
            header[0] = catalog.n_objects as f64;
            header[1] = if catalog.weights.is_some() { 1.0 } else { 0.0 };
        }
        comm.bcast_f64s(root, &mut header);
        let n_total = header[0] as usize;
        let has_weights = header[1] != 0.0;

        let rank = comm.rank();
        let size = comm.size();
        let start = (rank * n_total) / size;
        let stop = ((rank + 1) * n_total) / size;
        let count = stop - start;

        let mut components: Vec<Vec<f64>> = Vec::with_capacity(3);
        for axis in 0..3 {
            // the root reorders each component into rank-contiguous chunks
            let full: Option<Vec<f64>> = if rank == root {
                let catalog = catalog.unwrap();
                Some(catalog.positions[axis * n_total..(axis + 1) * n_total].to_vec())
            } else {
                None
            };
            components.push(comm.scatter_f64s(root, full.as_deref(), count));
        }

        let weights: Option<Vec<f64>> = if has_weights {
            let full: Option<Vec<f64>> = if rank == root {
                Some(catalog.unwrap().weights.clone().unwrap())
            } else {
                None
            };
            Some(comm.scatter_f64s(root, full.as_deref(), count))
        } else {
            None
        };

        let mut flat = Vec::with_capacity(3 * count);
        for component in &components {
            flat.extend_from_slice(component);
        }
        Ok(Catalog {
            positions: flat,
            weights,
            n_objects: count,
        })
    }
}
