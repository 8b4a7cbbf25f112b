//! Spreads batches of particles onto a mesh ("painting").

use crate::geometry::MeshGeometry;
use crate::resampler::{Assignment, MAX_ORDER};
use ndarray::{ArrayView2, ArrayViewMut3};

/// A batch of particles owned by a single worker.
///
/// We place the following constraints on the positions array:
/// - axis 0 is the slow axis and it corresponds to the spatial components
///   (so its length is always 3).
/// - axis 1 is the fast axis. The length along this axis coincides with
///   the number of particles. We require that it is contiguous (i.e. the
///   stride is unity).
#[derive(Clone)]
pub struct ParticleBatch<'a> {
    positions: ArrayView2<'a, f64>,
    weights: Option<&'a [f64]>,
    n_particles: usize,
}

impl<'a> ParticleBatch<'a> {
    /// create a new instance
    pub fn new(
        positions: ArrayView2<'a, f64>,
        weights: Option<&'a [f64]>,
    ) -> Result<ParticleBatch<'a>, &'static str> {
        let n_particles = positions.shape()[1];
        if positions.shape()[0] != 3 {
            Err("positions must hold 3 spatial components along axis 0")
        } else if n_particles > 0 && positions.strides()[1] != 1 {
            Err("positions must be contiguous along the fast axis")
        } else if weights.is_some_and(|w| w.len() != n_particles) {
            Err("weights must have the same number of particles as positions")
        } else {
            Ok(Self {
                positions,
                weights,
                n_particles,
            })
        }
    }

    /// an empty batch (a worker that owns no particles still participates
    /// in every collective painting call)
    pub fn empty() -> ParticleBatch<'static> {
        static NO_POSITIONS: [f64; 0] = [];
        ParticleBatch {
            positions: ArrayView2::from_shape((3, 0), &NO_POSITIONS[..]).unwrap(),
            weights: None,
            n_particles: 0,
        }
    }

    pub fn n_particles(&self) -> usize {
        self.n_particles
    }

    pub fn position(&self, idx: usize) -> [f64; 3] {
        [
            self.positions[[0, idx]],
            self.positions[[1, idx]],
            self.positions[[2, idx]],
        ]
    }

    /// If no weights are provided, returns 1.0, i.e., weights are just counts.
    pub fn get_weight(&self, idx: usize) -> f64 {
        if let Some(weights) = self.weights {
            weights[idx]
        } else {
            1.0
        }
    }

    /// sum of the particle weights in this batch
    pub fn total_weight(&self) -> f64 {
        match self.weights {
            Some(weights) => weights.iter().sum(),
            None => self.n_particles as f64,
        }
    }

    /// sum of the squared particle weights in this batch
    pub fn total_weight_sq(&self) -> f64 {
        match self.weights {
            Some(weights) => weights.iter().map(|w| w * w).sum(),
            None => self.n_particles as f64,
        }
    }
}

/// Deposit a batch of particles onto `grid` (the full mesh) with the given
/// assignment kernel.
///
/// `shift` is an interlacing offset in units of the cell width, applied
/// along every axis: painting with `shift = j/m` is equivalent to painting
/// onto a lattice displaced by `-j/m` cells. Positions wrap periodically
/// into the box; particles with zero weight are skipped.
///
/// `grid` must have the full mesh shape described by `geometry`.
pub fn deposit(
    grid: &mut ArrayViewMut3<f64>,
    geometry: &MeshGeometry,
    batch: &ParticleBatch,
    assignment: Assignment,
    shift: f64,
) -> Result<(), &'static str> {
    let shape = geometry.shape();
    if grid.shape() != shape {
        return Err("grid shape must match the mesh geometry");
    }

    let order = assignment.order();
    let (n0, n1, n2) = (shape[0] as i64, shape[1] as i64, shape[2] as i64);

    let mut w0 = [0.0; MAX_ORDER];
    let mut w1 = [0.0; MAX_ORDER];
    let mut w2 = [0.0; MAX_ORDER];

    for p in 0..batch.n_particles() {
        let weight = batch.get_weight(p);
        if weight == 0.0 {
            continue;
        }
        let pos = batch.position(p);
        let i0 = assignment.weights(geometry.grid_coord(0, pos[0]) + shift, &mut w0);
        let i1 = assignment.weights(geometry.grid_coord(1, pos[1]) + shift, &mut w1);
        let i2 = assignment.weights(geometry.grid_coord(2, pos[2]) + shift, &mut w2);

        for a in 0..order {
            let ia = wrap(i0 + a as i64, n0);
            let wa = weight * w0[a];
            for b in 0..order {
                let ib = wrap(i1 + b as i64, n1);
                let wab = wa * w1[b];
                for c in 0..order {
                    let ic = wrap(i2 + c as i64, n2);
                    grid[[ia, ib, ic]] += wab * w2[c];
                }
            }
        }
    }
    Ok(())
}

fn wrap(i: i64, n: i64) -> usize {
    let mut v = i % n;
    if v < 0 {
        v += n;
    }
    v as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn geom(n: usize, boxsize: f64) -> MeshGeometry {
        MeshGeometry::new([n; 3], [boxsize; 3], [0.0; 3]).unwrap()
    }

    #[test]
    fn batch_validation() {
        let positions = [0.0; 9];
        // wrong number of spatial components
        let view = ArrayView2::from_shape((9, 1), &positions).unwrap();
        assert!(ParticleBatch::new(view, None).is_err());

        // mismatched weights length
        let view = ArrayView2::from_shape((3, 3), &positions).unwrap();
        let weights = [1.0, 2.0];
        assert!(ParticleBatch::new(view, Some(&weights)).is_err());

        let weights = [1.0, 2.0, 3.0];
        let batch = ParticleBatch::new(view, Some(&weights)).unwrap();
        assert_eq!(batch.n_particles(), 3);
        assert_eq!(batch.total_weight(), 6.0);
        assert_eq!(batch.total_weight_sq(), 14.0);
    }

    #[test]
    fn deposit_conserves_mass() {
        let geometry = geom(8, 100.0);
        let positions = [12.5, -31.0, 49.9, 0.0, 3.2, -49.9];
        let view = ArrayView2::from_shape((3, 2), &positions).unwrap();
        let batch = ParticleBatch::new(view, None).unwrap();

        for assignment in [
            Assignment::Ngp,
            Assignment::Cic,
            Assignment::Tsc,
            Assignment::Pcs,
        ] {
            let mut grid = Array3::<f64>::zeros((8, 8, 8));
            deposit(&mut grid.view_mut(), &geometry, &batch, assignment, 0.0).unwrap();
            let total: f64 = grid.sum();
            assert!(
                (total - 2.0).abs() < 1e-13,
                "{}: painted mass {}",
                assignment.name(),
                total
            );
        }
    }

    #[test]
    fn ngp_lands_in_owning_cell() {
        let geometry = geom(4, 4.0);
        // box spans [-2, 2); cell width 1; a particle at -1.9 maps to
        // fractional coordinate 0.1, whose nearest cell is 0
        let positions = [-1.9, 0.6, 1.6];
        let view = ArrayView2::from_shape((3, 1), &positions).unwrap();
        let batch = ParticleBatch::new(view, None).unwrap();
        let mut grid = Array3::<f64>::zeros((4, 4, 4));
        deposit(
            &mut grid.view_mut(),
            &geometry,
            &batch,
            Assignment::Ngp,
            0.0,
        )
        .unwrap();
        assert_eq!(grid[[0, 3, 0]], 1.0);
    }

    #[test]
    fn zero_weight_particles_are_skipped() {
        let geometry = geom(4, 4.0);
        let positions = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let view = ArrayView2::from_shape((3, 2), &positions).unwrap();
        let weights = [0.0, 2.0];
        let batch = ParticleBatch::new(view, Some(&weights)).unwrap();
        let mut grid = Array3::<f64>::zeros((4, 4, 4));
        deposit(
            &mut grid.view_mut(),
            &geometry,
            &batch,
            Assignment::Cic,
            0.0,
        )
        .unwrap();
        assert!((grid.sum() - 2.0).abs() < 1e-14);
    }

    #[test]
    fn shifted_deposit_moves_mass() {
        let geometry = geom(4, 4.0);
        // particle sits halfway between the centers of cells 2 and 3
        let positions = [0.5, 0.5, 0.5];
        let view = ArrayView2::from_shape((3, 1), &positions).unwrap();
        let batch = ParticleBatch::new(view, None).unwrap();

        let mut unshifted = Array3::<f64>::zeros((4, 4, 4));
        deposit(
            &mut unshifted.view_mut(),
            &geometry,
            &batch,
            Assignment::Cic,
            0.0,
        )
        .unwrap();
        // CIC splits the corner cells evenly without a shift ...
        assert!((unshifted[[2, 2, 2]] - 0.125).abs() < 1e-14);
        assert!((unshifted[[3, 3, 3]] - 0.125).abs() < 1e-14);

        let mut shifted = Array3::<f64>::zeros((4, 4, 4));
        deposit(
            &mut shifted.view_mut(),
            &geometry,
            &batch,
            Assignment::Cic,
            0.5,
        )
        .unwrap();
        // ... and lands squarely on cell 3 once shifted by half a cell
        assert!((shifted[[3, 3, 3]] - 1.0).abs() < 1e-14);
        assert!((shifted.sum() - 1.0).abs() < 1e-14);
    }
}
