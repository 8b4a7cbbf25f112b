//! Legendre polynomials, used to weight Fourier modes when projecting a
//! power spectrum onto multipoles.

/// Evaluate the Legendre polynomial `P_ell(x)`.
///
/// The orders relevant to power spectrum estimation (ell <= 4) use closed
/// forms; higher orders fall back to the Bonnet recurrence.
pub fn legendre(ell: usize, x: f64) -> f64 {
    match ell {
        0 => 1.0,
        1 => x,
        2 => 1.5 * x * x - 0.5,
        3 => 2.5 * x * x * x - 1.5 * x,
        4 => {
            let x2 = x * x;
            (35.0 * x2 * x2 - 30.0 * x2 + 3.0) / 8.0
        }
        _ => {
            // Bonnet: (n + 1) P_{n+1} = (2n + 1) x P_n - n P_{n-1}
            let mut p_prev = legendre(3, x);
            let mut p = legendre(4, x);
            for n in 4..ell {
                let next = ((2 * n + 1) as f64 * x * p - n as f64 * p_prev) / (n + 1) as f64;
                p_prev = p;
                p = next;
            }
            p
        }
    }
}
