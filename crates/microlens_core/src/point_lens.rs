//! Single-lens magnification.
//!
//! All functions take the lens-source separation `u` in Einstein radii. The
//! finite-source methods multiply the point-source value by `B0(u/rho)` (and
//! `B1` for limb darkening) or integrate it over the disk of the source.

use crate::error::{MulensError, Result};
use crate::methods::Method;
use crate::special::{self, B0B1Table, GAUSS_LEGENDRE_64};
use std::f64::consts::PI;

/// Paczynski magnification `(u^2 + 2) / (u sqrt(u^2 + 4))`.
pub fn point_source_magnification(u: f64) -> f64 {
    let u2 = u * u;
    (u2 + 2.0) / (u * (u2 + 4.0).sqrt())
}

/// `d/du` of [`point_source_magnification`].
pub fn d_point_source_d_u(u: f64) -> f64 {
    let u2 = u * u;
    -8.0 / (u2 * (u2 + 4.0).powf(1.5))
}

/// Analytic derivatives of a single-lens magnification at one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLensDerivative {
    /// Total derivative with respect to the separation.
    pub d_a_d_u: f64,
    /// Partial derivative with respect to the source radius at fixed `u`.
    pub d_a_d_rho: f64,
}

fn require_rho(method: Method, rho: Option<f64>) -> Result<f64> {
    rho.ok_or_else(|| {
        MulensError::config(format!(
            "method {method} needs a source size (rho or t_star)"
        ))
    })
}

/// Magnification of a single lens with the given method.
///
/// `gamma` is the linear limb-darkening coefficient; methods that ignore
/// limb darkening ignore it.
///
/// The B0/B1 methods (`finite_source_uniform_Gould94` and
/// `finite_source_LD_Yoo04`) are undefined at exact alignment: `u = 0` is a
/// [`MulensError::Domain`] error rather than the limit of the finite-source
/// magnification. The Lee09 methods handle `u = 0`.
pub fn magnification(method: Method, u: f64, rho: Option<f64>, gamma: f64) -> Result<f64> {
    match method {
        Method::PointSource => Ok(point_source_magnification(u)),
        Method::FiniteSourceUniformGould94 => {
            let rho = require_rho(method, rho)?;
            Ok(point_source_magnification(u) * special::b0(u / rho)?)
        }
        Method::FiniteSourceLdYoo04 => {
            let rho = require_rho(method, rho)?;
            let z = u / rho;
            let b1 = B0B1Table::shared().b1(z)?;
            Ok(point_source_magnification(u) * (special::b0(z)? - gamma * b1))
        }
        Method::FiniteSourceUniformLee09 => Ok(lee09_uniform(u, require_rho(method, rho)?)),
        Method::FiniteSourceLdLee09 => Ok(lee09_limb_darkened(
            u,
            require_rho(method, rho)?,
            gamma,
        )),
        other => Err(MulensError::MethodLensMismatch {
            method: other.name(),
            n_lenses: 1,
        }),
    }
}

/// `dA/du` and `dA/drho` for the methods that have analytic derivatives.
///
/// Like [`magnification`], the B0/B1 methods reject `u = 0` with a
/// [`MulensError::Domain`] error.
pub fn derivative(
    method: Method,
    u: f64,
    rho: Option<f64>,
    gamma: f64,
) -> Result<PointLensDerivative> {
    let a = point_source_magnification(u);
    let d_a = d_point_source_d_u(u);
    let (gamma, b1_weight) = match method {
        Method::PointSource => {
            return Ok(PointLensDerivative {
                d_a_d_u: d_a,
                d_a_d_rho: 0.0,
            })
        }
        Method::FiniteSourceUniformGould94 => (0.0, false),
        Method::FiniteSourceLdYoo04 => (gamma, true),
        other => {
            return Err(MulensError::not_supported(format!(
                "method {other} has no analytic derivative"
            )))
        }
    };

    let rho = require_rho(method, rho)?;
    let z = u / rho;
    let table = B0B1Table::shared();
    let mut factor = special::b0(z)?;
    let mut factor_prime = table.b0_prime(z)?;
    if b1_weight {
        factor -= gamma * table.b1(z)?;
        factor_prime -= gamma * table.b1_prime(z)?;
    }

    Ok(PointLensDerivative {
        d_a_d_u: d_a * factor + a * factor_prime / rho,
        d_a_d_rho: -a * factor_prime * z / rho,
    })
}

/// `dA/du` of the point-source model. Finite-source methods fold `B0'`
/// into their derivative, so they are rejected here.
pub fn d_magnification_d_u(method: Method, u: f64) -> Result<f64> {
    match method {
        Method::PointSource => Ok(d_point_source_d_u(u)),
        other => Err(MulensError::not_supported(format!(
            "dA/du alone is only defined for point_source, not {other}"
        ))),
    }
}

/// Half-chord of the source disk along the ray at angle `theta` from the
/// lens-source axis: `(u1, u2)` are the distances from the lens where the
/// ray enters and leaves the disk.
fn chord(u: f64, rho: f64, theta: f64) -> (f64, f64) {
    let (sin, cos) = theta.sin_cos();
    let half = (rho * rho - u * u * sin * sin).max(0.0).sqrt();
    let centre = u * cos;
    if u <= rho {
        (0.0, centre + half)
    } else {
        (centre - half, centre + half)
    }
}

fn max_angle(u: f64, rho: f64) -> f64 {
    if u <= rho {
        PI
    } else {
        (rho / u).asin()
    }
}

/// Uniform source by direct integration over the disk (Lee et al. 2009).
pub fn lee09_uniform(u: f64, rho: f64) -> f64 {
    let antiderivative = |r: f64| r * (r * r + 4.0).sqrt();
    let integral = GAUSS_LEGENDRE_64.integrate_clustered(0.0, max_angle(u, rho), |theta| {
        let (u1, u2) = chord(u, rho, theta);
        antiderivative(u2) - antiderivative(u1)
    });
    integral / (PI * rho * rho)
}

/// Linearly limb-darkened source by direct integration over the disk, with
/// surface brightness `1 - gamma (1 - 1.5 sqrt(1 - d^2/rho^2))`.
pub fn lee09_limb_darkened(u: f64, rho: f64, gamma: f64) -> f64 {
    let rho2 = rho * rho;
    let integral = GAUSS_LEGENDRE_64.integrate_clustered(0.0, max_angle(u, rho), |theta| {
        let (u1, u2) = chord(u, rho, theta);
        let cos = theta.cos();
        GAUSS_LEGENDRE_64.integrate_clustered(u1, u2, |r| {
            let d2 = r * r + u * u - 2.0 * r * u * cos;
            let profile = 1.0 - gamma * (1.0 - 1.5 * (1.0 - d2 / rho2).max(0.0).sqrt());
            (r * r + 2.0) / (r * r + 4.0).sqrt() * profile
        })
    });
    2.0 * integral / (PI * rho2)
}
