/*!
Estimates auto- and cross power spectra of 3D density fields painted from
particle catalogs (e.g. galaxy surveys or simulation snapshots).

# High-Level: FFT power spectra

The estimator follows the standard mesh pipeline: particles are spread
onto a periodic grid with a B-spline assignment kernel (optionally
interlaced to suppress aliasing and compensated for the kernel's
smoothing), the grid is Fourier transformed, and every independent mode's
`conj(A)·B` is accumulated into wavenumber/angle bins or Legendre
multipoles. Normalization and shot-noise estimates turn the raw
accumulation into a physical power spectrum, stored in persistent
statistic containers that support rebinning and evaluation.

All distributed pieces are written against the [`Communicator`] trait
(SPMD workers coordinated purely through collectives); [`SerialComm`] is
the in-tree single-process implementation.

# Developer Guide

The pure math kernels (bin edges, mesh geometry, assignment kernels,
Legendre polynomials, the deposit loop) live in
[`meshpower_nostd_internal`].
*/

#![deny(rustdoc::broken_intra_doc_links)]

// inform build-system of the crates in this package
mod catalog;
mod catalog_mesh;
mod catalog_power;
mod comm;
mod edges;
mod error;
mod fft;
mod los;
mod mesh;
mod mesh_power;
mod normalization;
mod project;
mod statistic;

// pull in symbols that are visible outside of the package
pub use catalog::{Catalog, PositionType};
pub use catalog_mesh::{CatalogMesh, MeshDtype};
pub use catalog_power::{CatalogFFTPower, CatalogPowerOptions};
pub use comm::{Communicator, SerialComm, agree};
pub use edges::{EdgeSpec, find_unique_edges};
pub use error::Error;
pub use fft::{fft3d_c2r, fft3d_forward, fft3d_inverse, fft3d_r2c};
pub use los::LineOfSight;
pub use mesh::{ComplexMeshField, RealMeshField};
pub use mesh_power::{MeshFFTPower, PowerOptions};
pub use meshpower_nostd_internal::{
    Assignment, BinEdges, IrregularBinEdges, MeshGeometry, ParticleBatch, RegularBinEdges,
    deposit, legendre, signed_freq,
};
pub use normalization::{
    normalization, normalization_from_nbar, shotnoise_nonorm, uniform_normalization,
};
pub use project::{BinningSpec, RawBinnedPower, RawPoles, RawWedges, project_to_basis};
pub use statistic::{PowerSpectrumMultipole, PowerSpectrumWedge};
