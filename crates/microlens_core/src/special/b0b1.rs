//! Finite-source correction functions of a single lens.
//!
//! With `z = u / rho`, the magnification of a uniform disk is `A_ps(u) B0(z)`
//! and a linearly limb-darkened disk adds `-gamma A_ps(u) B1(z)`. Both
//! functions vanish linearly at `z = 0` and tend to `1` and `0` for large `z`.
//! `B0` has a logarithmic kink at `z = 1`, so its closed-form derivative is
//! not usable there; derivatives come from the shared table instead.

use super::elliptic::{agm_elliptic, complete_elliptic};
use super::quadrature::GAUSS_LEGENDRE_64;
use crate::error::{MulensError, Result};
use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::LazyLock;

/// Upper end of the tabulated range. Beyond it the asymptotic series are
/// accurate to a few times `1e-8`.
pub const TABLE_Z_MAX: f64 = 10.0;
pub const TABLE_STEP: f64 = 1e-3;

/// `B0'(0)`
const B0_SLOPE_AT_ZERO: f64 = 2.0;
/// `B1'(0) = 2 - 3 pi / 4`
const B1_SLOPE_AT_ZERO: f64 = 2.0 - 0.75 * PI;

static TABLE: LazyLock<B0B1Table> = LazyLock::new(B0B1Table::build);

fn check_domain(function: &'static str, z: f64) -> Result<()> {
    if z > 0.0 && z.is_finite() {
        Ok(())
    } else {
        Err(MulensError::Domain { function, value: z })
    }
}

/// `B0(z)` evaluated directly.
pub fn b0(z: f64) -> Result<f64> {
    check_domain("B0", z)?;
    Ok(b0_exact(z))
}

/// `B1(z)` evaluated directly.
pub fn b1(z: f64) -> Result<f64> {
    check_domain("B1", z)?;
    Ok(b1_exact(z))
}

/// `B0'(z)` from the shared table.
pub fn b0_prime(z: f64) -> Result<f64> {
    B0B1Table::shared().b0_prime(z)
}

/// `B1'(z)` from the shared table.
pub fn b1_prime(z: f64) -> Result<f64> {
    B0B1Table::shared().b1_prime(z)
}

fn b0_exact(z: f64) -> f64 {
    if z <= 0.0 {
        return 0.0;
    }
    if z < 1.0 {
        let (_, e) = complete_elliptic(z);
        return 4.0 * z / PI * e;
    }
    let z2 = z * z;
    let integral = GAUSS_LEGENDRE_64.integrate_clustered(0.0, FRAC_PI_2, |theta| {
        let (sin, cos) = theta.sin_cos();
        let radicand = z2 - sin * sin;
        if radicand <= 0.0 {
            0.0
        } else {
            cos * cos / radicand.sqrt()
        }
    });
    4.0 * z / PI * integral
}

fn b1_exact(z: f64) -> f64 {
    if z <= 0.0 {
        return 0.0;
    }
    b0_exact(z) - 1.5 * z * w1(z)
}

/// `(1/pi) int_0^{2 pi} int_0^1 r sqrt(1 - r^2) / |r + z e^{i theta}| dr dtheta`
///
/// The angular integral is `4 K(k) / (r + z)` with `k = 2 sqrt(r z) / (r + z)`.
/// The integrand has a logarithmic singularity at `r = z`, so the radial
/// integral is split there.
fn w1(z: f64) -> f64 {
    let integrand = |r: f64| {
        if r <= 0.0 || r >= 1.0 {
            return 0.0;
        }
        let sum = r + z;
        let k = 2.0 * (r * z).sqrt() / sum;
        if k >= 1.0 {
            return 0.0;
        }
        let k_prime = (r - z).abs() / sum;
        let (k_value, _) = agm_elliptic(k, k_prime);
        r * (1.0 - r * r).sqrt() * k_value / sum
    };

    let radial = if z < 1.0 {
        GAUSS_LEGENDRE_64.integrate_clustered(0.0, z, integrand)
            + GAUSS_LEGENDRE_64.integrate_clustered(z, 1.0, integrand)
    } else {
        GAUSS_LEGENDRE_64.integrate_clustered(0.0, 1.0, integrand)
    };
    4.0 / PI * radial
}

/// `B0`, `B1` and their derivatives on a uniform grid over `[0, TABLE_Z_MAX]`.
///
/// Built once per process on first use and never mutated afterwards.
#[derive(Debug)]
pub struct B0B1Table {
    b0: Vec<f64>,
    b1: Vec<f64>,
    b0_prime: Vec<f64>,
    b1_prime: Vec<f64>,
}

impl B0B1Table {
    pub fn shared() -> &'static B0B1Table {
        &TABLE
    }

    fn build() -> Self {
        let n = (TABLE_Z_MAX / TABLE_STEP).round() as usize + 1;
        let grid = (0..n).map(|i| i as f64 * TABLE_STEP);
        let b0: Vec<f64> = grid.clone().map(b0_exact).collect();
        let b1: Vec<f64> = grid.map(b1_exact).collect();
        let b0_prime = differentiate(&b0, B0_SLOPE_AT_ZERO);
        let b1_prime = differentiate(&b1, B1_SLOPE_AT_ZERO);
        log::debug!("built B0/B1 table with {n} nodes");
        Self {
            b0,
            b1,
            b0_prime,
            b1_prime,
        }
    }

    pub fn len(&self) -> usize {
        self.b0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.b0.is_empty()
    }

    pub fn b0(&self, z: f64) -> Result<f64> {
        check_domain("B0", z)?;
        if z > TABLE_Z_MAX {
            let inv2 = 1.0 / (z * z);
            return Ok(1.0 + inv2 / 8.0 + 3.0 * inv2 * inv2 / 64.0);
        }
        Ok(self.interpolate(&self.b0, z))
    }

    pub fn b1(&self, z: f64) -> Result<f64> {
        check_domain("B1", z)?;
        if z > TABLE_Z_MAX {
            let inv2 = 1.0 / (z * z);
            return Ok(inv2 / 40.0 * (1.0 + 33.0 * inv2 / 56.0));
        }
        Ok(self.interpolate(&self.b1, z))
    }

    pub fn b0_prime(&self, z: f64) -> Result<f64> {
        check_domain("B0'", z)?;
        if z > TABLE_Z_MAX {
            let inv = 1.0 / z;
            let inv3 = inv * inv * inv;
            return Ok(-inv3 / 4.0 - 3.0 * inv3 * inv * inv / 16.0);
        }
        Ok(self.interpolate(&self.b0_prime, z))
    }

    pub fn b1_prime(&self, z: f64) -> Result<f64> {
        check_domain("B1'", z)?;
        if z > TABLE_Z_MAX {
            let inv = 1.0 / z;
            let inv3 = inv * inv * inv;
            return Ok(-inv3 / 20.0 - 33.0 * inv3 * inv * inv / 560.0);
        }
        Ok(self.interpolate(&self.b1_prime, z))
    }

    fn interpolate(&self, values: &[f64], z: f64) -> f64 {
        let position = z / TABLE_STEP;
        let index = (position.floor() as usize).min(values.len() - 2);
        let fraction = position - index as f64;
        values[index] + fraction * (values[index + 1] - values[index])
    }
}

/// Centred differences with a known slope at the origin and a one-sided
/// second-order difference at the upper end.
fn differentiate(values: &[f64], slope_at_zero: f64) -> Vec<f64> {
    let n = values.len();
    let h = TABLE_STEP;
    let mut out = Vec::with_capacity(n);
    out.push(slope_at_zero);
    for i in 1..n - 1 {
        out.push((values[i + 1] - values[i - 1]) / (2.0 * h));
    }
    out.push((3.0 * values[n - 1] - 4.0 * values[n - 2] + values[n - 3]) / (2.0 * h));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b0_is_continuous_across_unit_argument() {
        let below = b0(1.0 - 1e-9).expect("B0 should compute");
        let above = b0(1.0 + 1e-9).expect("B0 should compute");
        let at = b0(1.0).expect("B0 should compute");
        assert!((below - above).abs() < 1e-6);
        assert!((at - 4.0 / PI).abs() < 1e-9);
        assert!((below - 4.0 / PI).abs() < 1e-6);
    }

    #[test]
    fn reference_values() {
        let cases = [
            (0.5, 0.934_215_46, -0.096_619_71),
            (1.0, 1.273_239_54, 0.095_14),
            (2.0, 1.034_631_62, 0.007_351_73),
        ];
        for (z, expected_b0, expected_b1) in cases {
            let value_b0 = b0(z).expect("B0 should compute");
            let value_b1 = b1(z).expect("B1 should compute");
            assert!((value_b0 - expected_b0).abs() < 1e-6, "B0({z}) = {value_b0}");
            assert!((value_b1 - expected_b1).abs() < 1e-4, "B1({z}) = {value_b1}");
        }
    }

    #[test]
    fn small_argument_slopes() {
        let z = 1e-3;
        let b0_over_z = b0(z).expect("B0 should compute") / z;
        let b1_over_z = b1(z).expect("B1 should compute") / z;
        assert!((b0_over_z - B0_SLOPE_AT_ZERO).abs() < 1e-5);
        assert!((b1_over_z - B1_SLOPE_AT_ZERO).abs() < 1e-4);
    }

    #[test]
    fn non_positive_arguments_are_domain_errors() {
        for z in [0.0, -0.5, f64::NAN] {
            let err = b0(z).expect_err("B0 should reject");
            assert!(matches!(err, MulensError::Domain { function: "B0", .. }));
            let err = B0B1Table::shared()
                .b1_prime(z)
                .expect_err("B1' should reject");
            assert!(matches!(err, MulensError::Domain { .. }));
        }
    }

    #[test]
    fn table_matches_direct_evaluation() {
        let table = B0B1Table::shared();
        assert_eq!(table.len(), 10_001);
        for z in [0.0123, 0.4567, 0.9871, 1.0234, 3.3333, 9.9995] {
            let direct_b0 = b0(z).expect("B0 should compute");
            let direct_b1 = b1(z).expect("B1 should compute");
            let tabulated_b0 = table.b0(z).expect("table should compute");
            let tabulated_b1 = table.b1(z).expect("table should compute");
            assert!((direct_b0 - tabulated_b0).abs() < 1e-5, "B0 at {z}");
            assert!((direct_b1 - tabulated_b1).abs() < 1e-5, "B1 at {z}");
        }
    }

    #[test]
    fn asymptotic_tail_joins_the_table() {
        let table = B0B1Table::shared();
        let inside = table.b0(TABLE_Z_MAX).expect("table should compute");
        let outside = table.b0(TABLE_Z_MAX + 1e-9).expect("tail should compute");
        assert!((inside - outside).abs() < 1e-7);
        let inside = table.b1(TABLE_Z_MAX).expect("table should compute");
        let outside = table.b1(TABLE_Z_MAX + 1e-9).expect("tail should compute");
        assert!((inside - outside).abs() < 1e-7);
        assert!((table.b0(1e4).expect("tail should compute") - 1.0).abs() < 1e-8);
        assert!(table.b1(1e4).expect("tail should compute").abs() < 1e-9);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let h = 1e-3;
        for z in [0.3004, 0.7007, 1.6002, 4.0005, 12.0] {
            let numeric_b0 = (b0(z + h).expect("B0") - b0(z - h).expect("B0")) / (2.0 * h);
            let numeric_b1 = (b1(z + h).expect("B1") - b1(z - h).expect("B1")) / (2.0 * h);
            let tabulated_b0 = b0_prime(z).expect("B0' should compute");
            let tabulated_b1 = b1_prime(z).expect("B1' should compute");
            assert!((numeric_b0 - tabulated_b0).abs() < 1e-4, "B0' at {z}");
            assert!((numeric_b1 - tabulated_b1).abs() < 1e-3, "B1' at {z}");
        }
    }
}
