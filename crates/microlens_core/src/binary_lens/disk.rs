use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::point_source::WittMaoSolver;
use crate::special::GaussLegendre;
use crate::traits::{ContourIntegrator, ContourRequest, PointSourceSolver};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiskQuadratureSettings {
    pub min_radial_nodes: usize,
    pub max_radial_nodes: usize,
    /// Angular samples per radial node.
    pub angular_factor: usize,
}

impl Default for DiskQuadratureSettings {
    fn default() -> Self {
        Self {
            min_radial_nodes: 8,
            max_radial_nodes: 64,
            angular_factor: 2,
        }
    }
}

/// Finite-source magnification by brute-force quadrature of the
/// point-source magnification over the limb-darkened disk.
///
/// Gauss-Legendre in radius, clustered at the limb, and the periodic
/// trapezoid rule in angle. The node count grows as `accuracy^(-1/2)`.
/// Slow, but independent of any image-plane geometry, which makes it a
/// reference for the contour-integration methods.
#[derive(Clone)]
pub struct DiskQuadrature {
    solver: Arc<dyn PointSourceSolver>,
    pub settings: DiskQuadratureSettings,
}

impl DiskQuadrature {
    pub fn new(solver: Arc<dyn PointSourceSolver>, settings: DiskQuadratureSettings) -> Self {
        Self { solver, settings }
    }

    fn radial_nodes(&self, request: &ContourRequest) -> usize {
        let accuracy = if request.gamma != 0.0 {
            request.accuracy.min(request.ld_accuracy)
        } else {
            request.accuracy
        };
        let wanted = (2.0 / accuracy.sqrt()).ceil() as usize;
        wanted.clamp(self.settings.min_radial_nodes, self.settings.max_radial_nodes)
    }
}

impl Default for DiskQuadrature {
    fn default() -> Self {
        Self::new(Arc::new(WittMaoSolver::default()), DiskQuadratureSettings::default())
    }
}

impl std::fmt::Debug for DiskQuadrature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskQuadrature")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ContourIntegrator for DiskQuadrature {
    fn magnification(&self, request: &ContourRequest) -> Result<f64> {
        let rho = request.rho;
        if !(rho > 0.0 && rho.is_finite()) {
            bail!("Source radius must be positive, got {rho}.");
        }
        if !(request.accuracy > 0.0) {
            bail!("Accuracy must be positive, got {}.", request.accuracy);
        }

        let n_radial = self.radial_nodes(request);
        let n_angular = (self.settings.angular_factor * n_radial).max(8);
        let rule = GaussLegendre::new(n_radial);
        let step = std::f64::consts::TAU / n_angular as f64;
        let gamma = request.gamma;

        let mut failure = None;
        let integral = rule.integrate_clustered(0.0, rho, |r| {
            let profile = 1.0 - gamma * (1.0 - 1.5 * (1.0 - (r / rho).powi(2)).max(0.0).sqrt());
            let mut ring = 0.0;
            for k in 0..n_angular {
                let (sin, cos) = (k as f64 * step).sin_cos();
                match self
                    .solver
                    .magnification(request.x + r * cos, request.y + r * sin, request.s, request.q)
                {
                    Ok(value) => ring += value,
                    Err(err) => {
                        failure.get_or_insert(err);
                    }
                }
            }
            ring * step * profile * r
        });
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(integral / (std::f64::consts::PI * rho * rho))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point_lens::{lee09_limb_darkened, lee09_uniform};

    struct SingleLens;

    impl PointSourceSolver for SingleLens {
        fn magnification(&self, x: f64, y: f64, _s: f64, _q: f64) -> Result<f64> {
            Ok(crate::point_lens::point_source_magnification(x.hypot(y)))
        }
    }

    struct Failing;

    impl PointSourceSolver for Failing {
        fn magnification(&self, _x: f64, _y: f64, _s: f64, _q: f64) -> Result<f64> {
            bail!("solver exploded")
        }
    }

    fn request(gamma: f64) -> ContourRequest {
        ContourRequest {
            x: 0.5,
            y: 0.0,
            s: 1.0,
            q: 1e-3,
            rho: 0.1,
            gamma,
            accuracy: 1e-3,
            ld_accuracy: 1e-3,
        }
    }

    #[test]
    fn reproduces_single_lens_disk_integrals() {
        let quadrature =
            DiskQuadrature::new(Arc::new(SingleLens), DiskQuadratureSettings::default());
        let uniform = quadrature.magnification(&request(0.0)).expect("should integrate");
        assert!((uniform - lee09_uniform(0.5, 0.1)).abs() < 1e-6);
        let darkened = quadrature.magnification(&request(0.6)).expect("should integrate");
        assert!((darkened - lee09_limb_darkened(0.5, 0.1, 0.6)).abs() < 1e-6);
    }

    #[test]
    fn node_count_follows_accuracy() {
        let quadrature = DiskQuadrature::default();
        let mut coarse = request(0.0);
        coarse.accuracy = 0.1;
        assert_eq!(quadrature.radial_nodes(&coarse), 8);
        coarse.gamma = 0.5;
        assert_eq!(quadrature.radial_nodes(&coarse), 64);
    }

    #[test]
    fn solver_failures_are_propagated() {
        let quadrature = DiskQuadrature::new(Arc::new(Failing), DiskQuadratureSettings::default());
        let err = quadrature.magnification(&request(0.0)).expect_err("solver fails");
        assert!(format!("{err}").contains("exploded"));
    }
}
