// the reason this is named mod.rs has to do with some complexities of how
// testing is handled
//
// we are following the advice of the rust book
// https://doc.rust-lang.org/book/ch11-03-test-organization.html#submodules-in-integration-tests

use meshpower::Catalog;
use rand::distr::{Distribution, Uniform};
use rand_xoshiro::Xoshiro256PlusPlus;
use rand_xoshiro::rand_core::SeedableRng;

// based on numpy!
// https://numpy.org/doc/stable/reference/generated/numpy.isclose.html
pub fn isclose(actual: f64, ref_val: f64, rtol: f64, atol: f64) -> bool {
    let actual_nan = actual.is_nan();
    let ref_nan = ref_val.is_nan();
    if actual_nan || ref_nan {
        actual_nan && ref_nan
    } else {
        (actual - ref_val).abs() <= (atol + rtol * ref_val.abs())
    }
}

/// a reproducible Poisson-ish catalog: `n` uniform points in a centered
/// periodic box
#[allow(dead_code)]
pub fn uniform_box_catalog(n: usize, boxsize: f64, seed: u64) -> Catalog {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let coord = Uniform::try_from(-0.5 * boxsize..0.5 * boxsize).unwrap();
    let positions: Vec<[f64; 3]> = (0..n)
        .map(|_| {
            [
                coord.sample(&mut rng),
                coord.sample(&mut rng),
                coord.sample(&mut rng),
            ]
        })
        .collect();
    Catalog::from_pos(&positions, None).unwrap()
}
