//! Model parameter snapshot.
//!
//! [`ModelParameters`] is immutable once built: every `with_*` method
//! validates its input and returns a new snapshot. The flat-map form used in
//! configuration files (`{"t_0": ..., "u_0": ..., "t_E": ...}`) deserializes
//! through the same validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MulensError, Result};

/// Names of the model parameters the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Parameter {
    #[serde(rename = "t_0")]
    T0,
    #[serde(rename = "u_0")]
    U0,
    #[serde(rename = "t_E")]
    TE,
    #[serde(rename = "rho")]
    Rho,
    #[serde(rename = "t_star")]
    TStar,
    #[serde(rename = "pi_E_N")]
    PiEN,
    #[serde(rename = "pi_E_E")]
    PiEE,
    #[serde(rename = "s")]
    S,
    #[serde(rename = "q")]
    Q,
    #[serde(rename = "alpha")]
    Alpha,
}

impl Parameter {
    pub const ALL: [Parameter; 10] = [
        Parameter::T0,
        Parameter::U0,
        Parameter::TE,
        Parameter::Rho,
        Parameter::TStar,
        Parameter::PiEN,
        Parameter::PiEE,
        Parameter::S,
        Parameter::Q,
        Parameter::Alpha,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Parameter::T0 => "t_0",
            Parameter::U0 => "u_0",
            Parameter::TE => "t_E",
            Parameter::Rho => "rho",
            Parameter::TStar => "t_star",
            Parameter::PiEN => "pi_E_N",
            Parameter::PiEE => "pi_E_E",
            Parameter::S => "s",
            Parameter::Q => "q",
            Parameter::Alpha => "alpha",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = MulensError;

    fn from_str(s: &str) -> Result<Self> {
        Parameter::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| MulensError::UnknownParameter(s.to_string()))
    }
}

/// Finite source size, given either directly or as a crossing time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SourceSize {
    Rho(f64),
    TStar(f64),
}

/// Two-lens geometry. `alpha` is the trajectory angle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinaryGeometry {
    pub s: f64,
    pub q: f64,
    pub alpha: f64,
}

impl BinaryGeometry {
    /// Mass fractions `(m_1, m_2)` of the primary and the companion.
    pub fn mass_fractions(&self) -> (f64, f64) {
        let total = 1.0 + self.q;
        (1.0 / total, self.q / total)
    }

    /// Lens positions on the x axis with the origin at the center of mass.
    /// The primary sits on the positive side.
    pub fn lens_positions(&self) -> (f64, f64) {
        let total = 1.0 + self.q;
        (self.s * self.q / total, -self.s / total)
    }
}

/// Three-lens geometry. Accepted so that such models can be described; the
/// engine refuses to evaluate them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TripleGeometry {
    pub s_21: f64,
    pub s_31: f64,
    pub q_21: f64,
    pub q_31: f64,
    pub psi: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LensSystem {
    Single,
    Binary(BinaryGeometry),
    Triple(TripleGeometry),
}

/// Microlens parallax vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parallax {
    pub pi_e_n: f64,
    pub pi_e_e: f64,
}

/// Circular source orbit. Angles are in degrees, `semimajor_axis` in units of
/// the Einstein radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Xallarap {
    pub period: f64,
    pub semimajor_axis: f64,
    pub omega_node: f64,
    pub inclination: f64,
    pub argument_of_latitude_reference: f64,
    pub t_0_xi: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FlatParameters", into = "FlatParameters")]
pub struct ModelParameters {
    t_0: f64,
    u_0: f64,
    t_e: f64,
    source_size: Option<SourceSize>,
    lenses: LensSystem,
    parallax: Option<Parallax>,
    t_0_par: Option<f64>,
    xallarap: Option<Xallarap>,
}

impl ModelParameters {
    /// Point-source point-lens model.
    pub fn point_lens(t_0: f64, u_0: f64, t_e: f64) -> Result<Self> {
        require_finite("t_0", t_0)?;
        require_finite("u_0", u_0)?;
        require_positive("t_E", t_e)?;
        Ok(Self {
            t_0,
            u_0,
            t_e,
            source_size: None,
            lenses: LensSystem::Single,
            parallax: None,
            t_0_par: None,
            xallarap: None,
        })
    }

    pub fn with_rho(mut self, rho: f64) -> Result<Self> {
        require_positive("rho", rho)?;
        self.source_size = Some(SourceSize::Rho(rho));
        Ok(self)
    }

    pub fn with_t_star(mut self, t_star: f64) -> Result<Self> {
        require_positive("t_star", t_star)?;
        self.source_size = Some(SourceSize::TStar(t_star));
        Ok(self)
    }

    pub fn with_binary(mut self, s: f64, q: f64, alpha: f64) -> Result<Self> {
        require_positive("s", s)?;
        require_positive("q", q)?;
        require_finite("alpha", alpha)?;
        self.lenses = LensSystem::Binary(BinaryGeometry { s, q, alpha });
        Ok(self)
    }

    pub fn with_triple(mut self, geometry: TripleGeometry) -> Result<Self> {
        require_positive("s_21", geometry.s_21)?;
        require_positive("s_31", geometry.s_31)?;
        require_positive("q_21", geometry.q_21)?;
        require_positive("q_31", geometry.q_31)?;
        require_finite("psi", geometry.psi)?;
        self.lenses = LensSystem::Triple(geometry);
        Ok(self)
    }

    pub fn with_parallax(mut self, pi_e_n: f64, pi_e_e: f64) -> Result<Self> {
        require_finite("pi_E_N", pi_e_n)?;
        require_finite("pi_E_E", pi_e_e)?;
        self.parallax = Some(Parallax { pi_e_n, pi_e_e });
        Ok(self)
    }

    pub fn with_t_0_par(mut self, t_0_par: f64) -> Result<Self> {
        require_finite("t_0_par", t_0_par)?;
        self.t_0_par = Some(t_0_par);
        Ok(self)
    }

    pub fn with_xallarap(mut self, xallarap: Xallarap) -> Result<Self> {
        require_positive("xi_period", xallarap.period)?;
        require_finite("xi_semimajor_axis", xallarap.semimajor_axis)?;
        require_finite("xi_Omega_node", xallarap.omega_node)?;
        require_finite("xi_inclination", xallarap.inclination)?;
        require_finite(
            "xi_argument_of_latitude_reference",
            xallarap.argument_of_latitude_reference,
        )?;
        if let Some(t_0_xi) = xallarap.t_0_xi {
            require_finite("t_0_xi", t_0_xi)?;
        }
        self.xallarap = Some(xallarap);
        Ok(self)
    }

    pub fn t_0(&self) -> f64 {
        self.t_0
    }

    pub fn u_0(&self) -> f64 {
        self.u_0
    }

    pub fn t_e(&self) -> f64 {
        self.t_e
    }

    /// Source radius in Einstein radii, derived from `t_star` when needed.
    pub fn rho(&self) -> Option<f64> {
        match self.source_size? {
            SourceSize::Rho(rho) => Some(rho),
            SourceSize::TStar(t_star) => Some(t_star / self.t_e),
        }
    }

    pub fn source_size(&self) -> Option<SourceSize> {
        self.source_size
    }

    pub fn is_t_star_parametrized(&self) -> bool {
        matches!(self.source_size, Some(SourceSize::TStar(_)))
    }

    pub fn lenses(&self) -> &LensSystem {
        &self.lenses
    }

    pub fn n_lenses(&self) -> usize {
        match self.lenses {
            LensSystem::Single => 1,
            LensSystem::Binary(_) => 2,
            LensSystem::Triple(_) => 3,
        }
    }

    pub fn binary(&self) -> Option<&BinaryGeometry> {
        match &self.lenses {
            LensSystem::Binary(geometry) => Some(geometry),
            _ => None,
        }
    }

    pub fn parallax(&self) -> Option<&Parallax> {
        self.parallax.as_ref()
    }

    /// Reference epoch of the parallax linearization; `t_0` unless set.
    pub fn t_0_par(&self) -> f64 {
        self.t_0_par.unwrap_or(self.t_0)
    }

    pub fn xallarap(&self) -> Option<&Xallarap> {
        self.xallarap.as_ref()
    }

    /// Value of a named parameter, if the model defines it.
    pub fn value(&self, parameter: Parameter) -> Result<f64> {
        let missing = || MulensError::MissingParameter(parameter.name().to_string());
        match parameter {
            Parameter::T0 => Ok(self.t_0),
            Parameter::U0 => Ok(self.u_0),
            Parameter::TE => Ok(self.t_e),
            Parameter::Rho => match self.source_size {
                Some(SourceSize::Rho(rho)) => Ok(rho),
                _ => Err(missing()),
            },
            Parameter::TStar => match self.source_size {
                Some(SourceSize::TStar(t_star)) => Ok(t_star),
                _ => Err(missing()),
            },
            Parameter::PiEN => self.parallax.map(|p| p.pi_e_n).ok_or_else(missing),
            Parameter::PiEE => self.parallax.map(|p| p.pi_e_e).ok_or_else(missing),
            Parameter::S => self.binary().map(|b| b.s).ok_or_else(missing),
            Parameter::Q => self.binary().map(|b| b.q).ok_or_else(missing),
            Parameter::Alpha => self.binary().map(|b| b.alpha).ok_or_else(missing),
        }
    }

    /// Whether the model defines `parameter` explicitly.
    pub fn defines(&self, parameter: Parameter) -> bool {
        self.value(parameter).is_ok()
    }
}

fn require_finite(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(MulensError::config(format!("{name} must be finite, got {value}")));
    }
    Ok(())
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(MulensError::config(format!("{name} must be positive, got {value}")));
    }
    Ok(())
}

/// Flat key/value form of [`ModelParameters`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FlatParameters {
    t_0: f64,
    u_0: f64,
    #[serde(rename = "t_E")]
    t_e: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rho: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    t_star: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    q: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alpha: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s_21: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s_31: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    q_21: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    q_31: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    psi: Option<f64>,
    #[serde(default, rename = "pi_E_N", skip_serializing_if = "Option::is_none")]
    pi_e_n: Option<f64>,
    #[serde(default, rename = "pi_E_E", skip_serializing_if = "Option::is_none")]
    pi_e_e: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    t_0_par: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    xi_period: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    xi_semimajor_axis: Option<f64>,
    #[serde(default, rename = "xi_Omega_node", skip_serializing_if = "Option::is_none")]
    xi_omega_node: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    xi_inclination: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    xi_argument_of_latitude_reference: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    t_0_xi: Option<f64>,
}

impl TryFrom<FlatParameters> for ModelParameters {
    type Error = MulensError;

    fn try_from(flat: FlatParameters) -> Result<Self> {
        let mut params = ModelParameters::point_lens(flat.t_0, flat.u_0, flat.t_e)?;

        params = match (flat.rho, flat.t_star) {
            (Some(_), Some(_)) => {
                return Err(MulensError::config("rho and t_star cannot both be given"))
            }
            (Some(rho), None) => params.with_rho(rho)?,
            (None, Some(t_star)) => params.with_t_star(t_star)?,
            (None, None) => params,
        };

        let triple = [flat.s_21, flat.s_31, flat.q_21, flat.q_31, flat.psi];
        params = match (flat.s, flat.q, flat.alpha) {
            (Some(s), Some(q), Some(alpha)) => {
                if triple.iter().any(Option::is_some) {
                    return Err(MulensError::config(
                        "binary (s, q) and triple (s_21, ...) parameters cannot be mixed",
                    ));
                }
                params.with_binary(s, q, alpha)?
            }
            (None, None, None) => match triple {
                [Some(s_21), Some(s_31), Some(q_21), Some(q_31), Some(psi)] => {
                    params.with_triple(TripleGeometry {
                        s_21,
                        s_31,
                        q_21,
                        q_31,
                        psi,
                    })?
                }
                [None, None, None, None, None] => params,
                _ => {
                    return Err(MulensError::config(
                        "triple lens needs s_21, s_31, q_21, q_31 and psi",
                    ))
                }
            },
            _ => return Err(MulensError::config("binary lens needs s, q and alpha")),
        };

        params = match (flat.pi_e_n, flat.pi_e_e) {
            (Some(n), Some(e)) => params.with_parallax(n, e)?,
            (None, None) => params,
            _ => return Err(MulensError::config("parallax needs both pi_E_N and pi_E_E")),
        };
        if let Some(t_0_par) = flat.t_0_par {
            params = params.with_t_0_par(t_0_par)?;
        }

        let xi = (
            flat.xi_period,
            flat.xi_semimajor_axis,
            flat.xi_omega_node,
            flat.xi_inclination,
            flat.xi_argument_of_latitude_reference,
        );
        params = match xi {
            (
                Some(period),
                Some(semimajor_axis),
                Some(omega_node),
                Some(inclination),
                Some(arg),
            ) => params.with_xallarap(Xallarap {
                period,
                semimajor_axis,
                omega_node,
                inclination,
                argument_of_latitude_reference: arg,
                t_0_xi: flat.t_0_xi,
            })?,
            (None, None, None, None, None) if flat.t_0_xi.is_none() => params,
            _ => return Err(MulensError::config("incomplete set of xallarap parameters")),
        };

        Ok(params)
    }
}

impl From<ModelParameters> for FlatParameters {
    fn from(params: ModelParameters) -> Self {
        let mut flat = FlatParameters {
            t_0: params.t_0,
            u_0: params.u_0,
            t_e: params.t_e,
            t_0_par: params.t_0_par,
            ..FlatParameters::default()
        };
        match params.source_size {
            Some(SourceSize::Rho(rho)) => flat.rho = Some(rho),
            Some(SourceSize::TStar(t_star)) => flat.t_star = Some(t_star),
            None => {}
        }
        match params.lenses {
            LensSystem::Single => {}
            LensSystem::Binary(b) => {
                flat.s = Some(b.s);
                flat.q = Some(b.q);
                flat.alpha = Some(b.alpha);
            }
            LensSystem::Triple(t) => {
                flat.s_21 = Some(t.s_21);
                flat.s_31 = Some(t.s_31);
                flat.q_21 = Some(t.q_21);
                flat.q_31 = Some(t.q_31);
                flat.psi = Some(t.psi);
            }
        }
        if let Some(p) = params.parallax {
            flat.pi_e_n = Some(p.pi_e_n);
            flat.pi_e_e = Some(p.pi_e_e);
        }
        if let Some(xi) = params.xallarap {
            flat.xi_period = Some(xi.period);
            flat.xi_semimajor_axis = Some(xi.semimajor_axis);
            flat.xi_omega_node = Some(xi.omega_node);
            flat.xi_inclination = Some(xi.inclination);
            flat.xi_argument_of_latitude_reference = Some(xi.argument_of_latitude_reference);
            flat.t_0_xi = xi.t_0_xi;
        }
        flat
    }
}
