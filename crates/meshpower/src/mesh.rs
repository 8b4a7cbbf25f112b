//! Slab-distributed real and complex mesh fields.
//!
//! A mesh field conceptually spans the whole box, but each worker
//! physically owns only a contiguous slab of the first axis (the slab
//! ranges come from [`MeshGeometry::slab_range`]). Mutating a slab never
//! touches another worker's memory; anything global (transforms,
//! integrals) goes through the [`Communicator`].
//!
//! Transforms gather the slabs on the root rank, run the serial 3D FFT
//! from [`crate::fft`] and scatter the result's slabs back. A one-rank
//! communicator makes the gather/scatter plain copies, and a multi-rank
//! run stays bit-identical to the serial one because the actual transform
//! work is the same either way.

use std::sync::Arc;

use log::debug;
use ndarray::Array3;
use num_complex::Complex64;
use rustfft::FftPlanner;

use meshpower_nostd_internal::MeshGeometry;

use crate::comm::Communicator;
use crate::error::Error;
use crate::fft;

fn shape_string(shape: &[usize]) -> String {
    format!("{:?}", shape)
}

/// assemble an `Array3` from a gathered, slab-concatenated buffer
fn array_from_gathered<T: Clone>(buf: Vec<T>, shape: [usize; 3]) -> Array3<T> {
    Array3::from_shape_vec((shape[0], shape[1], shape[2]), buf)
        .expect("gathered slabs must tile the full mesh")
}

/// A real-valued field distributed by slabs of the first axis.
#[derive(Clone)]
pub struct RealMeshField {
    geometry: MeshGeometry,
    comm: Arc<dyn Communicator>,
    slab_start: usize,
    local: Array3<f64>,
}

impl std::fmt::Debug for RealMeshField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealMeshField")
            .field("geometry", &self.geometry)
            .field("slab_start", &self.slab_start)
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

impl RealMeshField {
    /// a zero-filled field
    pub fn zeros(geometry: MeshGeometry, comm: Arc<dyn Communicator>) -> Self {
        let (start, len) = geometry.slab_range(comm.rank(), comm.size());
        let shape = geometry.shape();
        Self {
            geometry,
            comm,
            slab_start: start,
            local: Array3::zeros((len, shape[1], shape[2])),
        }
    }

    /// Build a field from the full mesh array, provided identically on
    /// every rank; each rank keeps its own slab.
    pub fn from_global_array(
        geometry: MeshGeometry,
        comm: Arc<dyn Communicator>,
        data: &Array3<f64>,
    ) -> Result<Self, Error> {
        if data.shape() != geometry.shape() {
            return Err(Error::shape_mismatch(
                "the mesh data array",
                shape_string(&geometry.shape()),
                shape_string(data.shape()),
            ));
        }
        let (start, len) = geometry.slab_range(comm.rank(), comm.size());
        let local = data
            .slice_axis(ndarray::Axis(0), ndarray::Slice::from(start..start + len))
            .to_owned();
        Ok(Self {
            geometry,
            comm,
            slab_start: start,
            local,
        })
    }

    /// Build a field by summing a full-shape scratch grid across all
    /// ranks (each rank deposits only its own particles into `scratch`);
    /// afterwards each rank keeps its slab of the total.
    ///
    /// This is a collective call.
    pub(crate) fn from_summed_scratch(
        geometry: MeshGeometry,
        comm: Arc<dyn Communicator>,
        mut scratch: Array3<f64>,
    ) -> Self {
        debug_assert_eq!(scratch.shape(), geometry.shape());
        let buf = scratch
            .as_slice_mut()
            .expect("scratch grids are standard layout");
        comm.sum_f64s(buf);
        Self::from_global_array(geometry, comm, &scratch)
            .expect("scratch shape was checked above")
    }

    pub fn geometry(&self) -> &MeshGeometry {
        &self.geometry
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    /// first global index of the locally owned slab
    pub fn slab_start(&self) -> usize {
        self.slab_start
    }

    /// the locally owned slab, shape `(slab_len, n1, n2)`
    pub fn local(&self) -> &Array3<f64> {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut Array3<f64> {
        &mut self.local
    }

    /// global sum of the field (collective)
    pub fn global_sum(&self) -> f64 {
        let mut total = [self.local.sum()];
        self.comm.sum_f64s(&mut total);
        total[0]
    }

    /// global sum of the element-wise product with `other` (collective)
    ///
    /// The two fields must live on the same mesh.
    pub fn global_dot(&self, other: &RealMeshField) -> Result<f64, Error> {
        if self.geometry != other.geometry {
            return Err(Error::shape_mismatch(
                "the second mesh operand",
                shape_string(&self.geometry.shape()),
                shape_string(&other.geometry.shape()),
            ));
        }
        let local: f64 = self
            .local
            .iter()
            .zip(other.local.iter())
            .map(|(a, b)| a * b)
            .sum();
        let mut total = [local];
        self.comm.sum_f64s(&mut total);
        Ok(total[0])
    }

    /// Forward transform to the Hermitian half-spectrum (collective).
    pub fn forward_transform(&self) -> ComplexMeshField {
        let shape = self.geometry.shape();
        let half_shape = self.geometry.half_shape();
        debug!(
            "forward r2c transform: mesh {:?} -> half spectrum {:?}",
            shape, half_shape
        );

        let local_flat = self
            .local
            .as_standard_layout()
            .as_slice()
            .expect("standard layout")
            .to_vec();
        let gathered = self.comm.gather_f64s(0, &local_flat);

        let root_half: Option<Vec<Complex64>> = gathered.map(|buf| {
            let full = array_from_gathered(buf, shape);
            let mut planner = FftPlanner::new();
            let half = fft::fft3d_r2c(&full, &mut planner);
            half.as_standard_layout()
                .as_slice()
                .expect("standard layout")
                .to_vec()
        });

        let (start, len) = self.geometry.slab_range(self.comm.rank(), self.comm.size());
        let count = len * half_shape[1] * half_shape[2];
        let received = self.comm.scatter_complex(0, root_half.as_deref(), count);
        ComplexMeshField {
            geometry: self.geometry.clone(),
            comm: Arc::clone(&self.comm),
            slab_start: start,
            local: Array3::from_shape_vec((len, half_shape[1], half_shape[2]), received)
                .expect("scattered slab has the owned extent"),
            hermitian: true,
        }
    }

    /// Promote to a complex-valued field (used for the complex working
    /// representation, where the full spectrum is kept).
    pub fn promote(&self) -> ComplexMeshField {
        ComplexMeshField {
            geometry: self.geometry.clone(),
            comm: Arc::clone(&self.comm),
            slab_start: self.slab_start,
            local: self.local.mapv(|v| Complex64::new(v, 0.0)),
            hermitian: false,
        }
    }
}

/// A complex-valued field distributed by slabs of the first axis.
///
/// Either the Fourier companion of a [`RealMeshField`] (Hermitian
/// half-spectrum layout, last axis `n2/2 + 1`) or a full complex field.
#[derive(Clone)]
pub struct ComplexMeshField {
    geometry: MeshGeometry,
    comm: Arc<dyn Communicator>,
    slab_start: usize,
    local: Array3<Complex64>,
    hermitian: bool,
}

impl ComplexMeshField {
    /// Build a full complex field from a global array provided identically
    /// on every rank.
    pub fn from_global_array(
        geometry: MeshGeometry,
        comm: Arc<dyn Communicator>,
        data: &Array3<Complex64>,
    ) -> Result<Self, Error> {
        if data.shape() != geometry.shape() {
            return Err(Error::shape_mismatch(
                "the mesh data array",
                shape_string(&geometry.shape()),
                shape_string(data.shape()),
            ));
        }
        let (start, len) = geometry.slab_range(comm.rank(), comm.size());
        let local = data
            .slice_axis(ndarray::Axis(0), ndarray::Slice::from(start..start + len))
            .to_owned();
        Ok(Self {
            geometry,
            comm,
            slab_start: start,
            local,
            hermitian: false,
        })
    }

    pub fn geometry(&self) -> &MeshGeometry {
        &self.geometry
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn slab_start(&self) -> usize {
        self.slab_start
    }

    /// whether this field stores the Hermitian half-spectrum of a real
    /// field
    pub fn is_hermitian(&self) -> bool {
        self.hermitian
    }

    pub fn local(&self) -> &Array3<Complex64> {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut Array3<Complex64> {
        &mut self.local
    }

    /// Multiplicity of a locally stored mode with last-axis index `i2`
    /// (1 for full-spectrum fields).
    pub fn mode_weight(&self, i2: usize) -> u64 {
        if self.hermitian {
            self.geometry.hermitian_weight(i2)
        } else {
            1
        }
    }

    /// Visit every locally stored mode, passing its signed frequency
    /// triplet and a mutable reference to the value.
    ///
    /// The iteration order is the local array order, which is
    /// deterministic for a fixed slab decomposition.
    pub fn map_modes_mut(&mut self, mut f: impl FnMut([i64; 3], &mut Complex64)) {
        let shape = self.geometry.shape();
        let slab_start = self.slab_start;
        let local_shape = [
            self.local.shape()[0],
            self.local.shape()[1],
            self.local.shape()[2],
        ];
        for i0 in 0..local_shape[0] {
            let f0 = meshpower_nostd_internal::signed_freq(slab_start + i0, shape[0]);
            for i1 in 0..local_shape[1] {
                let f1 = meshpower_nostd_internal::signed_freq(i1, shape[1]);
                for i2 in 0..local_shape[2] {
                    // on a half-spectrum the stored last-axis indices are
                    // all non-negative frequencies already
                    let f2 = meshpower_nostd_internal::signed_freq(i2, shape[2]);
                    f([f0, f1, f2], &mut self.local[[i0, i1, i2]]);
                }
            }
        }
    }

    /// Forward c2c transform of a full complex field (collective).
    ///
    /// The result keeps the full spectrum (every mode weighs 1).
    pub fn forward_transform(&self) -> Result<ComplexMeshField, Error> {
        if self.hermitian {
            return Err(Error::internal(
                "forward_transform expects a real-space field, not a half-spectrum",
            ));
        }
        let shape = self.geometry.shape();
        debug!("forward c2c transform: mesh {:?}", shape);

        let local_flat = self
            .local
            .as_standard_layout()
            .as_slice()
            .expect("standard layout")
            .to_vec();
        let gathered = self.comm.gather_complex(0, &local_flat);

        let root_full: Option<Vec<Complex64>> = gathered.map(|buf| {
            let mut full = array_from_gathered(buf, shape);
            let mut planner = FftPlanner::new();
            fft::fft3d_forward(&mut full, &mut planner);
            full.as_standard_layout()
                .as_slice()
                .expect("standard layout")
                .to_vec()
        });

        let (start, len) = self.geometry.slab_range(self.comm.rank(), self.comm.size());
        let count = len * shape[1] * shape[2];
        let received = self
            .comm
            .scatter_complex(0, root_full.as_deref(), count);
        Ok(ComplexMeshField {
            geometry: self.geometry.clone(),
            comm: Arc::clone(&self.comm),
            slab_start: start,
            local: Array3::from_shape_vec((len, shape[1], shape[2]), received)
                .expect("scattered slab has the owned extent"),
            hermitian: false,
        })
    }

    /// Inverse transform back to real space (collective).
    ///
    /// Hermitian half-spectra come back as real fields would — the caller
    /// receives the real part; full spectra are inverted in the complex
    /// plane and the real part returned likewise.
    pub fn inverse_transform(&self) -> RealMeshField {
        let shape = self.geometry.shape();
        debug!(
            "inverse transform: mesh {:?} (hermitian: {})",
            shape, self.hermitian
        );

        let local_flat = self
            .local
            .as_standard_layout()
            .as_slice()
            .expect("standard layout")
            .to_vec();
        let gathered = self.comm.gather_complex(0, &local_flat);

        let root_real: Option<Vec<f64>> = gathered.map(|buf| {
            let mut planner = FftPlanner::new();
            let real = if self.hermitian {
                let half_shape = self.geometry.half_shape();
                let half = array_from_gathered(buf, half_shape);
                fft::fft3d_c2r(&half, shape, &mut planner)
            } else {
                let mut full = array_from_gathered(buf, shape);
                fft::fft3d_inverse(&mut full, &mut planner);
                full.mapv(|v| v.re)
            };
            real.as_standard_layout()
                .as_slice()
                .expect("standard layout")
                .to_vec()
        });

        let (start, len) = self.geometry.slab_range(self.comm.rank(), self.comm.size());
        let count = len * shape[1] * shape[2];
        let received = self.comm.scatter_f64s(0, root_real.as_deref(), count);
        RealMeshField {
            geometry: self.geometry.clone(),
            comm: Arc::clone(&self.comm),
            slab_start: start,
            local: Array3::from_shape_vec((len, shape[1], shape[2]), received)
                .expect("scattered slab has the owned extent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;

    fn geometry(n: usize) -> MeshGeometry {
        MeshGeometry::new([n; 3], [100.0; 3], [0.0; 3]).unwrap()
    }

    #[test]
    fn global_array_shape_is_checked() {
        let comm: Arc<dyn Communicator> = Arc::new(SerialComm);
        let data = Array3::<f64>::zeros((4, 4, 4));
        let result = RealMeshField::from_global_array(geometry(8), comm, &data);
        assert!(result.unwrap_err().is_shape_mismatch());
    }

    #[test]
    fn forward_then_inverse_recovers_field() {
        let comm: Arc<dyn Communicator> = Arc::new(SerialComm);
        let mut data = Array3::<f64>::zeros((8, 8, 8));
        for (i, v) in data.iter_mut().enumerate() {
            *v = ((i * 17) % 29) as f64 * 0.25;
        }
        let field = RealMeshField::from_global_array(geometry(8), comm, &data).unwrap();
        let spectrum = field.forward_transform();
        assert!(spectrum.is_hermitian());
        assert_eq!(spectrum.local().shape(), [8, 8, 5]);
        let back = spectrum.inverse_transform();
        for (v, r) in back.local().iter().zip(data.iter()) {
            assert!((v - r).abs() < 1e-10);
        }
    }

    #[test]
    fn promoted_transform_matches_r2c_on_stored_modes() {
        let comm: Arc<dyn Communicator> = Arc::new(SerialComm);
        let mut data = Array3::<f64>::zeros((4, 4, 4));
        for (i, v) in data.iter_mut().enumerate() {
            *v = (i as f64).sin();
        }
        let field = RealMeshField::from_global_array(geometry(4), comm, &data).unwrap();
        let half = field.forward_transform();
        let full = field.promote().forward_transform().unwrap();
        for i0 in 0..4 {
            for i1 in 0..4 {
                for i2 in 0..3 {
                    let a = half.local()[[i0, i1, i2]];
                    let b = full.local()[[i0, i1, i2]];
                    assert!((a - b).norm() < 1e-10);
                }
            }
        }
    }
}
