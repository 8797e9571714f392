use anyhow::Result;
use nalgebra::Vector3;

/// Solves the binary lens equation for a point source.
///
/// Positions are in units of the Einstein radius of the total mass, with the
/// origin at the center of mass and the lenses on the x axis (see
/// [`crate::parameters::BinaryGeometry::lens_positions`]).
pub trait PointSourceSolver: Send + Sync {
    /// Total magnification of the images of a source at `(x, y)`.
    fn magnification(&self, x: f64, y: f64, s: f64, q: f64) -> Result<f64>;
}

/// Everything a contour-integration code needs for one source position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContourRequest {
    pub x: f64,
    pub y: f64,
    pub s: f64,
    pub q: f64,
    pub rho: f64,
    pub gamma: f64,
    /// Passed through untouched; its meaning belongs to the integrator.
    pub accuracy: f64,
    /// Second tolerance, only read by integrators that treat limb darkening
    /// separately.
    pub ld_accuracy: f64,
}

/// Finite-source binary-lens magnification computed directly, without
/// reference to any other method.
pub trait ContourIntegrator: Send + Sync {
    fn magnification(&self, request: &ContourRequest) -> Result<f64>;
}

/// Geocentric position of the Sun.
pub trait EarthEphemeris: Send + Sync {
    /// Equatorial Cartesian position of the Sun seen from the Earth, in AU,
    /// at the given Julian Date.
    fn sun_position(&self, julian_date: f64) -> Vector3<f64>;
}
