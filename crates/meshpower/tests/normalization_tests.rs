mod common;

use std::sync::Arc;

use common::{isclose, uniform_box_catalog};
use meshpower::{
    Assignment, CatalogMesh, Communicator, MeshDtype, MeshGeometry, SerialComm, normalization,
    normalization_from_nbar, uniform_normalization,
};

fn serial() -> Arc<dyn Communicator> {
    Arc::new(SerialComm)
}

#[test]
fn randoms_and_density_field_normalizations_agree() {
    // a uniform catalog with known analytic number density: the
    // nbar-based and the painted-density-based normalizations must agree
    // at the ten-percent level (and both with the analytic value)
    let boxsize = 500.0;
    let n_data = 10_000;
    let n_randoms = 40_000;
    let volume = boxsize * boxsize * boxsize;
    let nbar = n_data as f64 / volume;

    let data = uniform_box_catalog(n_data, boxsize, 4242);
    let randoms = uniform_box_catalog(n_randoms, boxsize, 4444);

    // the randoms table the survey's density at each object; data and
    // randoms carry unit weights
    let nz = vec![nbar; n_randoms];
    let randoms_weights = vec![1.0; n_randoms];
    let data_weights = vec![1.0; n_data];

    let from_nbar = normalization_from_nbar(
        &nz,
        Some(&randoms_weights),
        Some(&data_weights),
        &serial(),
    )
    .unwrap();

    let geometry = MeshGeometry::new([32; 3], [boxsize; 3], [0.0; 3]).unwrap();
    let mesh = CatalogMesh::new(
        geometry,
        serial(),
        Assignment::Tsc,
        1,
        MeshDtype::Real,
        data,
        Some(randoms),
    )
    .unwrap();
    let from_mesh = normalization(&mesh).unwrap();

    let analytic = uniform_normalization(n_data as f64, volume).unwrap();
    assert!(
        isclose(from_nbar, analytic, 1e-1, 0.0),
        "nbar path {} vs analytic {}",
        from_nbar,
        analytic
    );
    assert!(
        isclose(from_mesh, analytic, 1e-1, 0.0),
        "density-field path {} vs analytic {}",
        from_mesh,
        analytic
    );
    assert!(
        isclose(from_mesh, from_nbar, 1e-1, 0.0),
        "density-field path {} vs nbar path {}",
        from_mesh,
        from_nbar
    );
}

#[test]
fn zero_weight_catalogs_fail_loudly() {
    // an empty catalog paints a zero field without complaint, but any
    // normalization over it must fail rather than divide by zero
    let geometry = MeshGeometry::new([8; 3], [100.0; 3], [0.0; 3]).unwrap();
    let mesh = CatalogMesh::new(
        geometry,
        serial(),
        Assignment::Cic,
        1,
        MeshDtype::Real,
        meshpower::Catalog::default(),
        None,
    )
    .unwrap();

    let painted = mesh.paint().unwrap();
    assert_eq!(painted.global_sum(), 0.0);

    let err = normalization(&mesh).unwrap_err();
    assert!(err.is_degenerate_normalization());
}

#[test]
fn weighted_catalogs_scale_the_normalization() {
    // doubling every data weight quadruples the (weight-squared)
    // normalization
    let boxsize = 400.0;
    let volume = boxsize * boxsize * boxsize;
    let unit = uniform_normalization(5_000.0, volume).unwrap();
    let doubled = uniform_normalization(10_000.0, volume).unwrap();
    assert!(isclose(doubled, 4.0 * unit, 1e-12, 0.0));
}
