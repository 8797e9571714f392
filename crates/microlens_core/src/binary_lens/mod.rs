//! Binary-lens magnification.
//!
//! Source positions are in the center-of-mass frame of
//! [`crate::parameters::BinaryGeometry::lens_positions`]. Every method goes
//! through a solver seam: the point-source solver for `point_source` and the
//! multipole expansions, and a contour integrator for `VBBL` and
//! `Adaptive_Contouring`. Solver failures are returned unchanged.

pub mod disk;
pub mod point_source;
pub mod roots;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MulensError, Result};
use crate::methods::{Method, MethodOptions};
use crate::parameters::BinaryGeometry;
use crate::point_lens::point_source_magnification;
use crate::traits::{ContourIntegrator, ContourRequest, PointSourceSolver};

pub use disk::{DiskQuadrature, DiskQuadratureSettings};
pub use point_source::{Image, WittMaoSettings, WittMaoSolver};
pub use roots::RootSettings;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MultipoleSettings {
    /// Largest accepted ratio of the hexadecapole term to the total
    /// magnification before the expansion is reported as unreliable.
    pub hexadecapole_tolerance: f64,
}

impl Default for MultipoleSettings {
    fn default() -> Self {
        Self {
            hexadecapole_tolerance: 1e-2,
        }
    }
}

/// Terms of the ring expansion of Gould (2008) at one source position.
///
/// `a2` and `a4` are the second- and fourth-order coefficients of the ring
/// average at radius `rho`; averaging over the limb-darkened disk weights
/// them by `(1 - gamma/5)/2` and `(1 - 11 gamma/35)/3`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultipoleTerms {
    pub a0: f64,
    pub a2: f64,
    pub a4: f64,
}

impl MultipoleTerms {
    pub fn quadrupole(&self, gamma: f64) -> f64 {
        self.a0 + self.a2 / 2.0 * (1.0 - gamma / 5.0)
    }

    pub fn hexadecapole_term(&self, gamma: f64) -> f64 {
        self.a4 / 3.0 * (1.0 - 11.0 * gamma / 35.0)
    }

    pub fn hexadecapole(&self, gamma: f64) -> f64 {
        self.quadrupole(gamma) + self.hexadecapole_term(gamma)
    }
}

/// The solvers a binary-lens evaluation can call.
#[derive(Clone)]
pub struct BinarySolvers {
    point_source: Arc<dyn PointSourceSolver>,
    vbbl: Option<Arc<dyn ContourIntegrator>>,
    adaptive_contouring: Option<Arc<dyn ContourIntegrator>>,
}

impl Default for BinarySolvers {
    fn default() -> Self {
        Self {
            point_source: Arc::new(WittMaoSolver::default()),
            vbbl: None,
            adaptive_contouring: None,
        }
    }
}

impl std::fmt::Debug for BinarySolvers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinarySolvers")
            .field("vbbl", &self.vbbl.is_some())
            .field("adaptive_contouring", &self.adaptive_contouring.is_some())
            .finish_non_exhaustive()
    }
}

impl BinarySolvers {
    pub fn with_point_source_solver(mut self, solver: Arc<dyn PointSourceSolver>) -> Self {
        self.point_source = solver;
        self
    }

    /// Installs `integrator` for one of the contour-integration methods.
    pub fn with_contour_integrator(
        mut self,
        method: Method,
        integrator: Arc<dyn ContourIntegrator>,
    ) -> Result<Self> {
        match method {
            Method::Vbbl => self.vbbl = Some(integrator),
            Method::AdaptiveContouring => self.adaptive_contouring = Some(integrator),
            other => {
                return Err(MulensError::config(format!(
                    "{other} is not a contour-integration method"
                )))
            }
        }
        Ok(self)
    }

    /// Installs [`DiskQuadrature`] over the current point-source solver for
    /// both contour-integration methods.
    pub fn with_reference_integrators(self) -> Self {
        let integrator: Arc<dyn ContourIntegrator> = Arc::new(DiskQuadrature::new(
            self.point_source.clone(),
            DiskQuadratureSettings::default(),
        ));
        Self {
            vbbl: Some(integrator.clone()),
            adaptive_contouring: Some(integrator),
            ..self
        }
    }

    pub fn point_source(&self) -> &dyn PointSourceSolver {
        self.point_source.as_ref()
    }

    fn contour(&self, method: Method) -> Result<&dyn ContourIntegrator> {
        let installed = match method {
            Method::Vbbl => self.vbbl.as_deref(),
            Method::AdaptiveContouring => self.adaptive_contouring.as_deref(),
            _ => None,
        };
        installed.ok_or(MulensError::SolverUnavailable(method.name()))
    }
}

/// Everything that stays fixed while a binary-lens curve is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct BinaryLens<'a> {
    pub solvers: &'a BinarySolvers,
    pub geometry: BinaryGeometry,
    pub rho: Option<f64>,
    pub gamma: f64,
    pub options: &'a MethodOptions,
    pub multipole: MultipoleSettings,
}

impl BinaryLens<'_> {
    pub fn point_source(&self, x: f64, y: f64) -> Result<f64> {
        let value = self
            .solvers
            .point_source
            .magnification(x, y, self.geometry.s, self.geometry.q)?;
        Ok(value)
    }

    fn require_rho(&self, method: Method) -> Result<f64> {
        self.rho.ok_or_else(|| {
            MulensError::config(format!(
                "method {method} needs a source size (rho or t_star)"
            ))
        })
    }

    /// Ring expansion terms with source radius `rho`.
    pub fn multipole_terms(&self, x: f64, y: f64, rho: f64) -> Result<MultipoleTerms> {
        let a0 = self.point_source(x, y)?;
        let ring = |radius: f64, offset: f64| -> Result<f64> {
            let mut sum = 0.0;
            for j in 0..4 {
                let angle = offset + j as f64 * std::f64::consts::FRAC_PI_2;
                let (sin, cos) = angle.sin_cos();
                sum += self.point_source(x + radius * cos, y + radius * sin)?;
            }
            Ok(sum / 4.0 - a0)
        };

        let plus = ring(rho, 0.0)?;
        let cross = ring(rho, std::f64::consts::FRAC_PI_4)?;
        let half_plus = ring(0.5 * rho, 0.0)?;

        let a2 = (16.0 * half_plus - plus) / 3.0;
        let a4 = 0.5 * (plus + cross) - a2;
        Ok(MultipoleTerms { a0, a2, a4 })
    }

    pub fn magnification(&self, method: Method, x: f64, y: f64) -> Result<f64> {
        match method {
            Method::PointSource => self.point_source(x, y),
            Method::PointSourcePointLens => Ok(point_source_magnification(x.hypot(y))),
            Method::Quadrupole | Method::Hexadecapole => {
                let rho = self.require_rho(method)?;
                let terms = self.multipole_terms(x, y, rho)?;
                let value = if method == Method::Quadrupole {
                    terms.quadrupole(self.gamma)
                } else {
                    terms.hexadecapole(self.gamma)
                };
                let relative = (terms.hexadecapole_term(self.gamma) / value).abs();
                if !(relative <= self.multipole.hexadecapole_tolerance) {
                    log::warn!(
                        "{method} expansion at ({x:.6}, {y:.6}) is unreliable: \
                         hexadecapole term is {relative:.3e} of the magnification"
                    );
                }
                Ok(value)
            }
            Method::Vbbl | Method::AdaptiveContouring => {
                let rho = self.require_rho(method)?;
                let settings = self.options.contour(method);
                let request = ContourRequest {
                    x,
                    y,
                    s: self.geometry.s,
                    q: self.geometry.q,
                    rho,
                    gamma: self.gamma,
                    accuracy: settings.accuracy,
                    ld_accuracy: settings.ld_accuracy,
                };
                let value = self.solvers.contour(method)?.magnification(&request)?;
                Ok(value)
            }
            other => Err(MulensError::MethodLensMismatch {
                method: other.name(),
                n_lenses: 2,
            }),
        }
    }
}
