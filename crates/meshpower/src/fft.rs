//! Serial 3D transforms built on `rustfft`.
//!
//! These helpers operate on a whole (gathered) mesh; the slab-distributed
//! entry points live in [`crate::mesh`]. The forward transform is the
//! plain unnormalized DFT sum; the inverse divides by the cell count so
//! that a forward/inverse round trip is the identity. Real fields use the
//! half-spectrum layout with the LAST axis truncated to `n/2 + 1`
//! non-negative frequencies; [`fft3d_c2r`] reconstructs the suppressed
//! modes from conjugate symmetry before transforming back.

use ndarray::{Array3, Axis};
use num_complex::Complex64;
use rustfft::FftPlanner;
use std::sync::Arc;

/// transform every lane along `axis`, in place
fn transform_axis(data: &mut Array3<Complex64>, axis: usize, fft: &Arc<dyn rustfft::Fft<f64>>) {
    let len = data.shape()[axis];
    let mut scratch = vec![Complex64::new(0.0, 0.0); len];
    for mut lane in data.lanes_mut(Axis(axis)) {
        for (s, v) in scratch.iter_mut().zip(lane.iter()) {
            *s = *v;
        }
        fft.process(&mut scratch);
        for (v, s) in lane.iter_mut().zip(scratch.iter()) {
            *v = *s;
        }
    }
}

/// unnormalized forward c2c transform, in place
pub fn fft3d_forward(data: &mut Array3<Complex64>, planner: &mut FftPlanner<f64>) {
    for axis in 0..3 {
        let fft = planner.plan_fft_forward(data.shape()[axis]);
        transform_axis(data, axis, &fft);
    }
}

/// inverse c2c transform, in place; divides by the cell count so that
/// `inverse(forward(x)) == x`
pub fn fft3d_inverse(data: &mut Array3<Complex64>, planner: &mut FftPlanner<f64>) {
    for axis in 0..3 {
        let fft = planner.plan_fft_inverse(data.shape()[axis]);
        transform_axis(data, axis, &fft);
    }
    let norm = 1.0 / data.len() as f64;
    data.mapv_inplace(|v| v * norm);
}

/// forward r2c transform: promotes to complex, transforms, and keeps the
/// last axis's non-negative frequencies (`n2/2 + 1` entries)
pub fn fft3d_r2c(real: &Array3<f64>, planner: &mut FftPlanner<f64>) -> Array3<Complex64> {
    let mut full = real.mapv(|v| Complex64::new(v, 0.0));
    fft3d_forward(&mut full, planner);
    let n2c = real.shape()[2] / 2 + 1;
    full.slice_axis(Axis(2), ndarray::Slice::from(0..n2c))
        .to_owned()
}

/// inverse of [`fft3d_r2c`]: rebuilds the full spectrum from conjugate
/// symmetry, transforms back and returns the real part
pub fn fft3d_c2r(
    half: &Array3<Complex64>,
    shape: [usize; 3],
    planner: &mut FftPlanner<f64>,
) -> Array3<f64> {
    let [n0, n1, n2] = shape;
    let n2c = n2 / 2 + 1;
    assert_eq!(half.shape(), [n0, n1, n2c]);

    let mut full = Array3::<Complex64>::zeros((n0, n1, n2));
    for i0 in 0..n0 {
        for i1 in 0..n1 {
            for i2 in 0..n2c {
                full[[i0, i1, i2]] = half[[i0, i1, i2]];
            }
            for i2 in n2c..n2 {
                // A(-k) = conj(A(k)) for a real field
                let j0 = (n0 - i0) % n0;
                let j1 = (n1 - i1) % n1;
                let j2 = n2 - i2;
                full[[i0, i1, i2]] = half[[j0, j1, j2]].conj();
            }
        }
    }
    fft3d_inverse(&mut full, planner);
    full.mapv(|v| v.re)
}
