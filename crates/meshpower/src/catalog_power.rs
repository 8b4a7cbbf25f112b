//! The catalog-level estimator driver: particle catalogs in, statistic
//! containers out.

use std::sync::Arc;

use log::{debug, info};

use meshpower_nostd_internal::{Assignment, MeshGeometry};

use crate::catalog::Catalog;
use crate::catalog_mesh::{CatalogMesh, MeshDtype};
use crate::comm::{Communicator, agree};
use crate::edges::EdgeSpec;
use crate::error::Error;
use crate::los::LineOfSight;
use crate::mesh_power::{MeshFFTPower, PowerOptions};
use crate::normalization::{normalization, shotnoise_nonorm};
use crate::statistic::{PowerSpectrumMultipole, PowerSpectrumWedge};

/// The full configuration surface of [`CatalogFFTPower`].
#[derive(Clone, Debug)]
pub struct CatalogPowerOptions {
    /// physical box extents (all positive)
    pub boxsize: [f64; 3],
    /// physical box center
    pub boxcenter: [f64; 3],
    /// mesh cells per axis (all positive)
    pub nmesh: [usize; 3],
    /// assignment kernel
    pub resampler: Assignment,
    /// interlacing factor: 1 (off), 2, 3 or 4
    pub interlacing: usize,
    /// working representation of the density field
    pub dtype: MeshDtype,
    /// wavenumber bin edges
    pub edges: EdgeSpec,
    /// multipole orders (empty for wedge-only output)
    pub ells: Vec<usize>,
    /// μ wedge edges
    pub muedges: Option<Vec<f64>>,
    /// line of sight; `None` defaults to the `firstpoint` convention
    pub los: Option<LineOfSight>,
    /// normalization override
    pub wnorm: Option<f64>,
    /// shot-noise override
    pub shotnoise: Option<f64>,
    /// when set, the input catalogs live only on this rank and are
    /// scattered internally
    pub mpiroot: Option<usize>,
}

impl CatalogPowerOptions {
    /// defaults mirroring the common estimator setup: TSC painting with
    /// 2-fold interlacing, multipoles 0/2/4, k bins at the fundamental
    /// up to the Nyquist frequency
    pub fn new(boxsize: f64, nmesh: usize) -> Self {
        Self {
            boxsize: [boxsize; 3],
            boxcenter: [0.0; 3],
            nmesh: [nmesh; 3],
            resampler: Assignment::Tsc,
            interlacing: 2,
            dtype: MeshDtype::Real,
            edges: EdgeSpec::Range {
                min: 0.0,
                max: None,
                step: None,
            },
            ells: vec![0, 2, 4],
            muedges: None,
            los: None,
            wnorm: None,
            shotnoise: None,
            mpiroot: None,
        }
    }
}

/// Auto or cross power spectrum of particle catalogs.
///
/// Composes painting (with interlacing and compensation), normalization
/// and shot-noise bookkeeping, and the mode binning engine.
#[derive(Debug)]
pub struct CatalogFFTPower {
    poles: Option<PowerSpectrumMultipole>,
    wedges: Option<PowerSpectrumWedge>,
    wnorm: f64,
    shotnoise: f64,
}

impl CatalogFFTPower {
    /// Measure the auto spectrum of `data1` (optionally against a
    /// randoms catalog describing the selection function).
    ///
    /// This is a collective call.
    pub fn auto(
        comm: Arc<dyn Communicator>,
        options: &CatalogPowerOptions,
        data1: Option<&Catalog>,
        randoms1: Option<&Catalog>,
    ) -> Result<Self, Error> {
        Self::run(comm, options, data1, randoms1, None, None)
    }

    /// Measure the cross spectrum of two independently sampled catalogs.
    ///
    /// This is a collective call. The cross shot noise is zero.
    pub fn cross(
        comm: Arc<dyn Communicator>,
        options: &CatalogPowerOptions,
        data1: Option<&Catalog>,
        randoms1: Option<&Catalog>,
        data2: Option<&Catalog>,
        randoms2: Option<&Catalog>,
    ) -> Result<Self, Error> {
        if data2.is_none() && options.mpiroot.is_none() {
            return Err(Error::configuration(
                "data2",
                "a cross spectrum requires a second data catalog",
            ));
        }
        Self::run(comm, options, data1, randoms1, data2, randoms2)
    }

    fn run(
        comm: Arc<dyn Communicator>,
        options: &CatalogPowerOptions,
        data1: Option<&Catalog>,
        randoms1: Option<&Catalog>,
        data2: Option<&Catalog>,
        randoms2: Option<&Catalog>,
    ) -> Result<Self, Error> {
        // validate the cheap parts of the configuration first, agreed
        // across ranks so nobody runs ahead into the collectives below
        let geometry = agree(
            comm.as_ref(),
            MeshGeometry::new(options.nmesh, options.boxsize, options.boxcenter)
                .map_err(|what| Error::configuration("box/mesh configuration", what)),
        )?;

        let is_cross = data2.is_some() || randoms2.is_some();

        // under mpiroot semantics the inputs sit on one rank only
        let (data1, randoms1, data2, randoms2) = match options.mpiroot {
            Some(root) => {
                let scatter = |catalog: Option<&Catalog>| -> Result<Option<Catalog>, Error> {
                    // presence is decided by the root
                    let mut present = [if comm.rank() == root {
                        catalog.is_some() as u64 as f64
                    } else {
                        0.0
                    }];
                    comm.bcast_f64s(root, &mut present);
                    if present[0] == 0.0 {
                        return Ok(None);
                    }
                    Catalog::scatter_from_root(&comm, root, catalog).map(Some)
                };
                (
                    scatter(data1)?,
                    scatter(randoms1)?,
                    scatter(data2)?,
                    scatter(randoms2)?,
                )
            }
            None => (
                data1.cloned(),
                randoms1.cloned(),
                data2.cloned(),
                randoms2.cloned(),
            ),
        };

        // every rank enters this agreement, with or without a catalog
        let data1 = agree(
            comm.as_ref(),
            data1.ok_or_else(|| Error::configuration("data1", "the data catalog is required")),
        )?;

        info!(
            "catalog power spectrum: {:?} mesh, {} painting, interlacing {}, {}",
            options.nmesh,
            options.resampler.name(),
            options.interlacing,
            if is_cross { "cross" } else { "auto" },
        );

        let mesh1 = CatalogMesh::new(
            geometry.clone(),
            Arc::clone(&comm),
            options.resampler,
            options.interlacing,
            options.dtype,
            data1,
            randoms1,
        )?;
        let mesh2 = match data2 {
            Some(data2) => Some(CatalogMesh::new(
                geometry.clone(),
                Arc::clone(&comm),
                options.resampler,
                options.interlacing,
                options.dtype,
                data2,
                randoms2,
            )?),
            None => None,
        };

        let wnorm = match options.wnorm {
            Some(wnorm) => wnorm,
            None => {
                let norm1 = normalization(&mesh1)?;
                match &mesh2 {
                    Some(mesh2) => (norm1 * normalization(mesh2)?).sqrt(),
                    None => norm1,
                }
            }
        };
        let shotnoise = match options.shotnoise {
            Some(shotnoise) => shotnoise,
            None if mesh2.is_some() => 0.0,
            None => shotnoise_nonorm(&mesh1) / wnorm,
        };
        debug!("wnorm = {wnorm}, shotnoise = {shotnoise}");

        let spectrum1 = mesh1.to_spectrum()?;
        let spectrum2 = match &mesh2 {
            Some(mesh2) => Some(mesh2.to_spectrum()?),
            None => None,
        };

        let mesh_options = PowerOptions {
            edges: options.edges.clone(),
            ells: options.ells.clone(),
            muedges: options.muedges.clone(),
            los: options.los.unwrap_or(LineOfSight::FirstPoint),
            wnorm: Some(wnorm),
            shotnoise: Some(shotnoise),
        };
        let measured =
            MeshFFTPower::from_spectra(&spectrum1, spectrum2.as_ref(), &mesh_options)?;

        let annotate = |attrs: &mut std::collections::BTreeMap<String, String>| {
            attrs.insert("resampler".to_string(), options.resampler.name().to_string());
            attrs.insert("interlacing".to_string(), options.interlacing.to_string());
            attrs.insert("nmesh".to_string(), format!("{:?}", options.nmesh));
            attrs.insert("boxsize".to_string(), format!("{:?}", options.boxsize));
        };
        let mut poles = measured.poles().cloned();
        if let Some(poles) = poles.as_mut() {
            annotate(poles.attrs_mut());
        }
        let mut wedges = measured.wedges().cloned();
        if let Some(wedges) = wedges.as_mut() {
            annotate(wedges.attrs_mut());
        }

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
