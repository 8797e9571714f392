//! Source trajectory relative to the lens center of mass.
//!
//! The rectilinear motion `(tau, beta)` is perturbed by parallax (annual
//! and/or satellite) and by a circular xallarap orbit, then rotated by the
//! trajectory angle for two-lens models.

use std::f64::consts::PI;
use std::sync::Arc;

use nalgebra::{Rotation2, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{MulensError, Result};
use crate::parameters::{LensSystem, ModelParameters, Parameter, Xallarap};
use crate::traits::EarthEphemeris;

/// Which parallax effects are applied when the model has a parallax vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallaxEffects {
    pub earth_orbital: bool,
    pub satellite: bool,
}

impl Default for ParallaxEffects {
    fn default() -> Self {
        Self {
            earth_orbital: true,
            satellite: false,
        }
    }
}

/// Event position on the sky, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCoordinates {
    pub ra: f64,
    pub dec: f64,
}

impl SkyCoordinates {
    /// Unit vectors pointing north and east on the plane of the sky.
    fn north_east(&self) -> (Vector3<f64>, Vector3<f64>) {
        let (sin_ra, cos_ra) = self.ra.to_radians().sin_cos();
        let (sin_dec, cos_dec) = self.dec.to_radians().sin_cos();
        let north = Vector3::new(-sin_dec * cos_ra, -sin_dec * sin_ra, cos_dec);
        let east = Vector3::new(-sin_ra, cos_ra, 0.0);
        (north, east)
    }
}

/// Low-precision analytic solar ephemeris (about 0.01 degree).
#[derive(Debug, Clone, Copy, Default)]
pub struct LowPrecisionSun;

impl EarthEphemeris for LowPrecisionSun {
    fn sun_position(&self, julian_date: f64) -> Vector3<f64> {
        let n = julian_date - 2_451_545.0;
        let mean_longitude = (280.460 + 0.985_647_4 * n).to_radians();
        let mean_anomaly = (357.528 + 0.985_600_3 * n).to_radians();
        let longitude = mean_longitude
            + (1.915 * mean_anomaly.sin() + 0.020 * (2.0 * mean_anomaly).sin()).to_radians();
        let obliquity = (23.439 - 0.000_000_4 * n).to_radians();
        let distance =
            1.000_14 - 0.016_71 * mean_anomaly.cos() - 0.000_14 * (2.0 * mean_anomaly).cos();
        let (sin_l, cos_l) = longitude.sin_cos();
        Vector3::new(
            distance * cos_l,
            distance * obliquity.cos() * sin_l,
            distance * obliquity.sin() * sin_l,
        )
    }
}

/// Observer-dependent inputs of the trajectory.
#[derive(Clone)]
pub struct ParallaxSetup {
    pub effects: ParallaxEffects,
    pub coords: Option<SkyCoordinates>,
    /// Projected (north, east) satellite position in AU, one per epoch.
    pub satellite_positions: Option<Vec<Vector2<f64>>>,
    pub ephemeris: Arc<dyn EarthEphemeris>,
}

impl Default for ParallaxSetup {
    fn default() -> Self {
        Self {
            effects: ParallaxEffects::default(),
            coords: None,
            satellite_positions: None,
            ephemeris: Arc::new(LowPrecisionSun),
        }
    }
}

impl std::fmt::Debug for ParallaxSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallaxSetup")
            .field("effects", &self.effects)
            .field("coords", &self.coords)
            .field(
                "satellite_positions",
                &self.satellite_positions.as_ref().map(Vec::len),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Trajectory {
    epochs: Vec<f64>,
    tau: Vec<f64>,
    beta: Vec<f64>,
    x: Vec<f64>,
    y: Vec<f64>,
    /// (north, east) Sun offsets; present only when parallax was applied.
    offsets: Option<Vec<Vector2<f64>>>,
}

impl Trajectory {
    pub fn new(epochs: &[f64], params: &ModelParameters, setup: &ParallaxSetup) -> Result<Self> {
        if let Some(bad) = epochs.iter().find(|t| !t.is_finite()) {
            return Err(MulensError::config(format!("epoch {bad} is not finite")));
        }

        let t_0 = params.t_0();
        let t_e = params.t_e();
        let mut tau: Vec<f64> = epochs.iter().map(|t| (t - t_0) / t_e).collect();
        let mut beta = vec![params.u_0(); epochs.len()];

        let offsets = match params.parallax() {
            Some(parallax) => {
                let offsets = parallax_offsets(epochs, params.t_0_par(), setup)?;
                for (i, delta) in offsets.iter().enumerate() {
                    tau[i] += parallax.pi_e_n * delta.x + parallax.pi_e_e * delta.y;
                    beta[i] += -parallax.pi_e_e * delta.x + parallax.pi_e_n * delta.y;
                }
                Some(offsets)
            }
            None => None,
        };

        if let Some(xallarap) = params.xallarap() {
            let t_0_xi = xallarap.t_0_xi.unwrap_or(t_0);
            for (i, &t) in epochs.iter().enumerate() {
                let shift = xallarap_shift(xallarap, t, t_0_xi);
                tau[i] += shift.x;
                beta[i] += shift.y;
            }
        }

        let (x, y) = match params.lenses() {
            LensSystem::Single => (tau.clone(), beta.clone()),
            LensSystem::Binary(geometry) => {
                let rotation = Rotation2::new(geometry.alpha.to_radians());
                tau.iter()
                    .zip(beta.iter())
                    .map(|(&t, &b)| {
                        let p = rotation * Vector2::new(t, b);
                        (p.x, p.y)
                    })
                    .unzip()
            }
            LensSystem::Triple(_) => {
                return Err(MulensError::not_supported(
                    "trajectories for more than two lenses",
                ))
            }
        };

        Ok(Self {
            epochs: epochs.to_vec(),
            tau,
            beta,
            x,
            y,
            offsets,
        })
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn epochs(&self) -> &[f64] {
        &self.epochs
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Lens-source separation at epoch `index`.
    pub fn u(&self, index: usize) -> f64 {
        self.x[index].hypot(self.y[index])
    }

    /// Derivative of the separation with respect to one model parameter, for
    /// the epochs listed in `indices`.
    pub fn d_u_d_param(
        &self,
        params: &ModelParameters,
        parameter: Parameter,
        indices: &[usize],
    ) -> Result<Vec<f64>> {
        let t_e = params.t_e();
        let t_0 = params.t_0();
        let offsets = self.offsets.as_deref();
        let parallax_offset = |i: usize| {
            offsets
                .map(|o| o[i])
                .ok_or_else(|| MulensError::MissingParameter(parameter.name().to_string()))
        };

        indices
            .iter()
            .map(|&i| {
                let (d_tau, d_beta) = match parameter {
                    Parameter::T0 => (-1.0 / t_e, 0.0),
                    Parameter::U0 => (0.0, 1.0),
                    Parameter::TE => (-(self.epochs[i] - t_0) / (t_e * t_e), 0.0),
                    Parameter::PiEN => {
                        let delta = parallax_offset(i)?;
                        (delta.x, delta.y)
                    }
                    Parameter::PiEE => {
                        let delta = parallax_offset(i)?;
                        (delta.y, -delta.x)
                    }
                    other => {
                        return Err(MulensError::not_supported(format!(
                            "d_u/d_{other} is not defined"
                        )))
                    }
                };
                let u = self.tau[i].hypot(self.beta[i]);
                Ok((self.tau[i] * d_tau + self.beta[i] * d_beta) / u)
            })
            .collect()
    }
}

fn parallax_offsets(
    epochs: &[f64],
    t_0_par: f64,
    setup: &ParallaxSetup,
) -> Result<Vec<Vector2<f64>>> {
    let effects = setup.effects;
    if (effects.earth_orbital || effects.satellite) && setup.coords.is_none() {
        return Err(MulensError::config(
            "parallax requested but no sky coordinates were given",
        ));
    }
    let mut offsets = vec![Vector2::zeros(); epochs.len()];

    if effects.earth_orbital {
        if let Some(coords) = setup.coords {
            let (north, east) = coords.north_east();
            let ephemeris = setup.ephemeris.as_ref();
            let reference = ephemeris.sun_position(t_0_par);
            let velocity = (ephemeris.sun_position(t_0_par + 1.0)
                - ephemeris.sun_position(t_0_par - 1.0))
                / 2.0;
            for (offset, &t) in offsets.iter_mut().zip(epochs) {
                let delta = ephemeris.sun_position(t) - reference - velocity * (t - t_0_par);
                *offset += Vector2::new(delta.dot(&north), delta.dot(&east));
            }
        }
    }

    if effects.satellite {
        let positions = setup.satellite_positions.as_ref().ok_or_else(|| {
            MulensError::config("satellite parallax requested without satellite positions")
        })?;
        if positions.len() != epochs.len() {
            return Err(MulensError::config(format!(
                "satellite position series has {} entries for {} epochs",
                positions.len(),
                epochs.len()
            )));
        }
        for (offset, position) in offsets.iter_mut().zip(positions) {
            *offset -= position;
        }
    }

    Ok(offsets)
}

fn xallarap_shift(xallarap: &Xallarap, t: f64, t_0_xi: f64) -> Vector2<f64> {
    let reference = xallarap.argument_of_latitude_reference.to_radians();
    let phase = 2.0 * PI * (t - t_0_xi) / xallarap.period + reference;
    orbit_position(xallarap, phase) - orbit_position(xallarap, reference)
}

fn orbit_position(xallarap: &Xallarap, phase: f64) -> Vector2<f64> {
    let (sin_node, cos_node) = xallarap.omega_node.to_radians().sin_cos();
    let cos_incl = xallarap.inclination.to_radians().cos();
    let (sin_u, cos_u) = phase.sin_cos();
    xallarap.semimajor_axis
        * Vector2::new(
            cos_node * cos_u - sin_node * sin_u * cos_incl,
            sin_node * cos_u + cos_node * sin_u * cos_incl,
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn pspl() -> ModelParameters {
        ModelParameters::point_lens(3583.0, 0.3, 12.0).expect("valid parameters")
    }

    #[test]
    fn rectilinear_single_lens_trajectory() {
        let epochs = [3571.0, 3583.0, 3589.0];
        let trajectory = Trajectory::new(&epochs, &pspl(), &ParallaxSetup::default())
            .expect("trajectory should compute");
        assert_eq!(trajectory.x(), &[-1.0, 0.0, 0.5]);
        assert_eq!(trajectory.y(), &[0.3, 0.3, 0.3]);
        assert!((trajectory.u(1) - 0.3).abs() < 1e-15);
    }

    #[test]
    fn binary_rotation_preserves_separation() {
        let params = pspl().with_binary(1.5, 0.001, 158.8).unwrap();
        let epochs = [3570.0, 3583.0, 3592.5];
        let rotated = Trajectory::new(&epochs, &params, &ParallaxSetup::default()).unwrap();
        let straight = Trajectory::new(&epochs, &pspl(), &ParallaxSetup::default()).unwrap();
        for i in 0..epochs.len() {
            assert!((rotated.u(i) - straight.u(i)).abs() < 1e-12);
        }
        // At alpha = 90 degrees the source moves along +y.
        let params = pspl().with_binary(1.0, 1.0, 90.0).unwrap();
        let trajectory = Trajectory::new(&[3595.0], &params, &ParallaxSetup::default()).unwrap();
        assert!((trajectory.x()[0] + 0.3).abs() < 1e-12);
        assert!((trajectory.y()[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn parallax_without_coordinates_is_rejected() {
        let params = pspl().with_parallax(0.1, -0.2).unwrap();
        assert_err_contains(
            Trajectory::new(&[3583.0], &params, &ParallaxSetup::default()),
            "sky coordinates",
        );
    }

    #[test]
    fn satellite_series_must_cover_every_epoch() {
        let params = pspl().with_parallax(0.1, -0.2).unwrap();
        let setup = ParallaxSetup {
            effects: ParallaxEffects {
                earth_orbital: false,
                satellite: true,
            },
            coords: Some(SkyCoordinates { ra: 270.0, dec: -28.0 }),
            satellite_positions: Some(vec![Vector2::new(0.1, 0.2)]),
            ..ParallaxSetup::default()
        };
        assert_err_contains(
            Trajectory::new(&[3583.0, 3584.0], &params, &setup),
            "1 entries for 2 epochs",
        );
        let missing = ParallaxSetup {
            satellite_positions: None,
            ..setup
        };
        assert_err_contains(
            Trajectory::new(&[3583.0], &params, &missing),
            "without satellite positions",
        );
    }

    #[test]
    fn satellite_offset_shifts_source_position() {
        let params = pspl().with_parallax(0.0, 0.5).unwrap();
        let setup = ParallaxSetup {
            effects: ParallaxEffects {
                earth_orbital: false,
                satellite: true,
            },
            coords: Some(SkyCoordinates { ra: 270.0, dec: -28.0 }),
            satellite_positions: Some(vec![Vector2::new(0.0, 1.0)]),
            ..ParallaxSetup::default()
        };
        let trajectory = Trajectory::new(&[3583.0], &params, &setup).unwrap();
        // offset (0, -1): delta_tau = -pi_E_E, delta_beta = 0.
        assert!((trajectory.x()[0] + 0.5).abs() < 1e-12);
        assert!((trajectory.y()[0] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn annual_parallax_vanishes_to_first_order_at_reference_epoch() {
        let params = ModelParameters::point_lens(2_456_836.2, 0.9, 22.9)
            .and_then(|p| p.with_parallax(-0.2, 0.5))
            .unwrap();
        let setup = ParallaxSetup {
            coords: Some(SkyCoordinates { ra: 263.6, dec: -32.9 }),
            ..ParallaxSetup::default()
        };
        let epochs = [2_456_836.2, 2_456_836.7, 2_456_936.2];
        let with = Trajectory::new(&epochs, &params, &setup).unwrap();
        let without = Trajectory::new(
            &epochs,
            &ModelParameters::point_lens(2_456_836.2, 0.9, 22.9).unwrap(),
            &setup,
        )
        .unwrap();
        assert!((with.x()[0] - without.x()[0]).abs() < 1e-12);
        assert!((with.x()[1] - without.x()[1]).abs() < 1e-4);
        let far = (with.x()[2] - without.x()[2]).hypot(with.y()[2] - without.y()[2]);
        assert!(far > 1e-2, "parallax should matter 100 days away, got {far}");
    }

    #[test]
    fn low_precision_sun_is_about_one_au_away() {
        let sun = LowPrecisionSun.sun_position(2_459_000.5);
        assert!((sun.norm() - 1.0).abs() < 0.02);
    }

    #[test]
    fn xallarap_shift_is_zero_at_reference_epoch() {
        let xallarap = Xallarap {
            period: 100.0,
            semimajor_axis: 0.5,
            omega_node: 90.0,
            inclination: 0.0,
            argument_of_latitude_reference: 90.0,
            t_0_xi: None,
        };
        let params = pspl().with_xallarap(xallarap).unwrap();
        let trajectory =
            Trajectory::new(&[3583.0, 3633.0], &params, &ParallaxSetup::default()).unwrap();
        assert!((trajectory.x()[0]).abs() < 1e-12);
        assert!((trajectory.y()[0] - 0.3).abs() < 1e-12);
        // Half a period later the source has crossed its orbit diameter.
        let shift = (trajectory.x()[1] - 50.0 / 12.0).hypot(trajectory.y()[1] - 0.3);
        assert!((shift - 1.0).abs() < 1e-12);
    }

    #[test]
    fn d_u_d_params_match_finite_differences() {
        let params = pspl();
        let epochs = [3575.0, 3586.0];
        let trajectory = Trajectory::new(&epochs, &params, &ParallaxSetup::default()).unwrap();
        let h = 1e-6;
        let shifted = ModelParameters::point_lens(3583.0 + h, 0.3, 12.0).unwrap();
        let shifted = Trajectory::new(&epochs, &shifted, &ParallaxSetup::default()).unwrap();
        let analytic = trajectory.d_u_d_param(&params, Parameter::T0, &[0, 1]).unwrap();
        for i in 0..2 {
            let numeric = (shifted.u(i) - trajectory.u(i)) / h;
            assert!((analytic[i] - numeric).abs() < 1e-5);
        }
    }

    #[test]
    fn d_u_d_parallax_needs_parallax() {
        let trajectory = Trajectory::new(&[3583.0], &pspl(), &ParallaxSetup::default()).unwrap();
        let err = trajectory
            .d_u_d_param(&pspl(), Parameter::PiEN, &[0])
            .expect_err("no parallax in model");
        assert!(err.is_key_error());
    }
}
