//! Complex polynomial roots by Laguerre's method.
//!
//! Coefficients are stored lowest power first. Roots are found one at a time
//! on the deflated polynomial and then polished against the full one.

use anyhow::{bail, Result};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Step fractions used every `CYCLE_BREAK` iterations to escape limit cycles.
const FRACTIONS: [f64; 8] = [0.5, 0.25, 0.75, 0.13, 0.38, 0.62, 0.88, 1.0];
const CYCLE_BREAK: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RootSettings {
    pub max_iterations: usize,
    /// Re-run Laguerre on the undeflated polynomial from every root.
    pub polish: bool,
}

impl Default for RootSettings {
    fn default() -> Self {
        Self {
            max_iterations: CYCLE_BREAK * FRACTIONS.len(),
            polish: true,
        }
    }
}

/// `a(x) b(x)`
pub fn multiply(a: &[Complex<f64>], b: &[Complex<f64>]) -> Vec<Complex<f64>> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![Complex::new(0.0, 0.0); a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// `a(x) + scale b(x)`
pub fn add_scaled(
    a: &[Complex<f64>],
    b: &[Complex<f64>],
    scale: Complex<f64>,
) -> Vec<Complex<f64>> {
    let n = a.len().max(b.len());
    (0..n)
        .map(|i| {
            let lhs = a.get(i).copied().unwrap_or_default();
            let rhs = b.get(i).copied().unwrap_or_default();
            lhs + scale * rhs
        })
        .collect()
}

pub fn evaluate(coefficients: &[Complex<f64>], x: Complex<f64>) -> Complex<f64> {
    coefficients
        .iter()
        .rev()
        .fold(Complex::new(0.0, 0.0), |acc, &c| acc * x + c)
}

/// All roots of the polynomial, with multiplicity.
pub fn polynomial_roots(
    coefficients: &[Complex<f64>],
    settings: RootSettings,
) -> Result<Vec<Complex<f64>>> {
    let degree = coefficients.len().saturating_sub(1);
    if degree == 0 {
        bail!("Polynomial has no roots.");
    }
    if coefficients[degree].norm() == 0.0 {
        bail!("Leading coefficient is zero.");
    }
    if coefficients.iter().any(|c| !c.re.is_finite() || !c.im.is_finite()) {
        bail!("Polynomial coefficients must be finite.");
    }

    let mut deflated = coefficients.to_vec();
    let mut roots = Vec::with_capacity(degree);
    for current in (1..=degree).rev() {
        let root = laguerre(&deflated[..=current], Complex::new(0.0, 0.0), settings.max_iterations);
        roots.push(root);
        // Synthetic division by (x - root).
        let mut carry = deflated[current];
        for j in (0..current).rev() {
            let coefficient = deflated[j];
            deflated[j] = carry;
            carry = root * carry + coefficient;
        }
        deflated.truncate(current);
    }

    if settings.polish {
        for root in roots.iter_mut() {
            *root = laguerre(coefficients, *root, settings.max_iterations);
        }
    }
    Ok(roots)
}

fn laguerre(a: &[Complex<f64>], start: Complex<f64>, max_iterations: usize) -> Complex<f64> {
    let m = a.len() - 1;
    let m_f = m as f64;
    let mut x = start;

    for iteration in 1..=max_iterations {
        let abs_x = x.norm();
        let mut b = a[m];
        let mut error = b.norm();
        let mut d = Complex::new(0.0, 0.0);
        let mut f = Complex::new(0.0, 0.0);
        for j in (0..m).rev() {
            f = x * f + d;
            d = x * d + b;
            b = x * b + a[j];
            error = b.norm() + abs_x * error;
        }
        if b.norm() <= error * f64::EPSILON {
            return x;
        }

        let g = d / b;
        let g2 = g * g;
        let h = g2 - 2.0 * f / b;
        let root = ((m_f - 1.0) * (m_f * h - g2)).sqrt();
        let plus = g + root;
        let minus = g - root;
        let denominator = if plus.norm() >= minus.norm() { plus } else { minus };
        let dx = if denominator.norm() > 0.0 {
            Complex::new(m_f, 0.0) / denominator
        } else {
            Complex::from_polar(1.0 + abs_x, iteration as f64)
        };

        let next = x - dx;
        if next == x {
            return x;
        }
        if iteration % CYCLE_BREAK == 0 {
            let fraction = FRACTIONS[(iteration / CYCLE_BREAK - 1) % FRACTIONS.len()];
            x -= dx * fraction;
        } else {
            x = next;
        }
    }

    log::debug!("Laguerre iteration stopped after {max_iterations} steps at {x}");
    x
}
