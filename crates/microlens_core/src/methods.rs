//! Magnification methods and the per-epoch method table.
//!
//! A [`MethodTable`] splits the time axis at strictly increasing breakpoints;
//! the half-open interval `[b_i, b_{i+1})` uses the `i`-th method and every
//! epoch outside all intervals uses the default. Tables are validated when
//! they are built so that a bad table never reaches an evaluation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MulensError, Result};

/// Every magnification algorithm the engine can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    /// Point source. Valid for single and binary lenses.
    PointSource,
    FiniteSourceUniformGould94,
    FiniteSourceLdYoo04,
    FiniteSourceUniformLee09,
    FiniteSourceLdLee09,
    /// Binary-lens model evaluated as a single lens of total mass.
    PointSourcePointLens,
    Quadrupole,
    Hexadecapole,
    Vbbl,
    AdaptiveContouring,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::PointSource,
        Method::FiniteSourceUniformGould94,
        Method::FiniteSourceLdYoo04,
        Method::FiniteSourceUniformLee09,
        Method::FiniteSourceLdLee09,
        Method::PointSourcePointLens,
        Method::Quadrupole,
        Method::Hexadecapole,
        Method::Vbbl,
        Method::AdaptiveContouring,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::PointSource => "point_source",
            Method::FiniteSourceUniformGould94 => "finite_source_uniform_Gould94",
            Method::FiniteSourceLdYoo04 => "finite_source_LD_Yoo04",
            Method::FiniteSourceUniformLee09 => "finite_source_uniform_Lee09",
            Method::FiniteSourceLdLee09 => "finite_source_LD_Lee09",
            Method::PointSourcePointLens => "point_source_point_lens",
            Method::Quadrupole => "quadrupole",
            Method::Hexadecapole => "hexadecapole",
            Method::Vbbl => "VBBL",
            Method::AdaptiveContouring => "Adaptive_Contouring",
        }
    }

    /// Whether the method can be used for a model with `n_lenses` lenses.
    pub fn supports_lenses(self, n_lenses: usize) -> bool {
        match self {
            Method::PointSource => n_lenses == 1 || n_lenses == 2,
            Method::FiniteSourceUniformGould94
            | Method::FiniteSourceLdYoo04
            | Method::FiniteSourceUniformLee09
            | Method::FiniteSourceLdLee09 => n_lenses == 1,
            Method::PointSourcePointLens
            | Method::Quadrupole
            | Method::Hexadecapole
            | Method::Vbbl
            | Method::AdaptiveContouring => n_lenses == 2,
        }
    }

    pub fn is_finite_source(self) -> bool {
        !matches!(self, Method::PointSource | Method::PointSourcePointLens)
    }

    /// Methods that cannot run without a limb-darkening coefficient.
    pub fn requires_limb_darkening(self) -> bool {
        matches!(self, Method::FiniteSourceLdYoo04 | Method::FiniteSourceLdLee09)
    }

    /// Single-lens methods with an analytic derivative.
    pub fn has_derivative(self) -> bool {
        matches!(
            self,
            Method::PointSource | Method::FiniteSourceUniformGould94 | Method::FiniteSourceLdYoo04
        )
    }

    pub fn is_contour_integration(self) -> bool {
        matches!(self, Method::Vbbl | Method::AdaptiveContouring)
    }

    fn accepted_options(self) -> &'static [&'static str] {
        match self {
            Method::Vbbl => &["accuracy"],
            Method::AdaptiveContouring => &["accuracy", "ld_accuracy"],
            _ => &[],
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = MulensError;

    fn from_str(token: &str) -> Result<Self> {
        Method::ALL
            .into_iter()
            .find(|method| method.name() == token)
            .ok_or_else(|| MulensError::UnknownMethod(token.to_string()))
    }
}

impl Serialize for Method {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        token.parse().map_err(serde::de::Error::custom)
    }
}

/// Index of the half-open interval containing `epoch`, if any.
fn locate(breakpoints: &[f64], epoch: f64) -> Option<usize> {
    let first = *breakpoints.first()?;
    let last = *breakpoints.last()?;
    if !(epoch >= first && epoch < last) {
        return None;
    }
    // Number of breakpoints <= epoch, at least 1 here.
    let upper = breakpoints.partition_point(|&b| b <= epoch);
    Some(upper - 1)
}

fn validate_breakpoints(breakpoints: &[f64], n_names: usize) -> Result<()> {
    if breakpoints.is_empty() && n_names == 0 {
        return Ok(());
    }
    if breakpoints.len() != n_names + 1 {
        return Err(MulensError::config(format!(
            "method table has {} breakpoints for {} methods, expected {}",
            breakpoints.len(),
            n_names,
            n_names + 1
        )));
    }
    if let Some(bad) = breakpoints.iter().find(|b| !b.is_finite()) {
        return Err(MulensError::config(format!(
            "method table breakpoint {bad} is not finite"
        )));
    }
    if let Some(pair) = breakpoints.windows(2).find(|pair| pair[1] <= pair[0]) {
        return Err(MulensError::config(format!(
            "method table breakpoints must be strictly increasing, got {} then {}",
            pair[0], pair[1]
        )));
    }
    Ok(())
}

/// Assigns one of `names` (or `default`) to every epoch.
///
/// Epochs in `[breakpoints[i], breakpoints[i + 1])` get `names[i]`; epochs
/// before the first breakpoint, at or after the last one, or any epoch when
/// there are no breakpoints get `default`.
pub fn assign<T: Clone>(
    epochs: &[f64],
    breakpoints: &[f64],
    names: &[T],
    default: &T,
) -> Result<Vec<T>> {
    validate_breakpoints(breakpoints, names.len())?;
    Ok(epochs
        .iter()
        .map(|&epoch| match locate(breakpoints, epoch) {
            Some(i) => names[i].clone(),
            None => default.clone(),
        })
        .collect())
}

/// One element of the flat method-table format:
/// `[t1, "name", t2, "name", t3]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodToken {
    Epoch(f64),
    Name(String),
}

impl From<f64> for MethodToken {
    fn from(value: f64) -> Self {
        MethodToken::Epoch(value)
    }
}

impl From<&str> for MethodToken {
    fn from(value: &str) -> Self {
        MethodToken::Name(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FlatMethodTable", into = "FlatMethodTable")]
pub struct MethodTable {
    breakpoints: Vec<f64>,
    methods: Vec<Method>,
    default: Method,
}

impl MethodTable {
    pub fn new(breakpoints: Vec<f64>, methods: Vec<Method>, default: Method) -> Result<Self> {
        validate_breakpoints(&breakpoints, methods.len())?;
        Ok(Self {
            breakpoints,
            methods,
            default,
        })
    }

    /// A table that uses `method` for every epoch.
    pub fn uniform(method: Method) -> Self {
        Self {
            breakpoints: Vec::new(),
            methods: Vec::new(),
            default: method,
        }
    }

    /// Parses the flat alternating format plus a default method name.
    pub fn from_tokens(tokens: &[MethodToken], default: &str) -> Result<Self> {
        let default: Method = default.parse()?;
        let mut breakpoints = Vec::with_capacity(tokens.len() / 2 + 1);
        let mut methods = Vec::with_capacity(tokens.len() / 2);

        for (position, token) in tokens.iter().enumerate() {
            match (position % 2 == 0, token) {
                (true, MethodToken::Epoch(epoch)) => breakpoints.push(*epoch),
                (false, MethodToken::Name(name)) => methods.push(name.parse::<Method>()?),
                (true, MethodToken::Name(name)) => {
                    return Err(MulensError::config(format!(
                        "expected an epoch at position {position} of the method table, got {name:?}"
                    )))
                }
                (false, MethodToken::Epoch(epoch)) => {
                    return Err(MulensError::config(format!(
                        "expected a method name at position {position} of the method table, \
                         got {epoch}"
                    )))
                }
            }
        }
        if !tokens.is_empty() && tokens.len() % 2 == 0 {
            return Err(MulensError::config(
                "method table must end with a breakpoint epoch",
            ));
        }

        Self::new(breakpoints, methods, default)
    }

    pub fn breakpoints(&self) -> &[f64] {
        &self.breakpoints
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn default_method(&self) -> Method {
        self.default
    }

    pub fn method_at(&self, epoch: f64) -> Method {
        match locate(&self.breakpoints, epoch) {
            Some(i) => self.methods[i],
            None => self.default,
        }
    }

    pub fn assign(&self, epochs: &[f64]) -> Vec<Method> {
        epochs.iter().map(|&epoch| self.method_at(epoch)).collect()
    }

    /// Every method the table can produce, default included.
    pub fn all_methods(&self) -> impl Iterator<Item = Method> + '_ {
        self.methods.iter().copied().chain(std::iter::once(self.default))
    }

    pub fn has_finite_source_method(&self) -> bool {
        self.all_methods().any(Method::is_finite_source)
    }

    /// Rejects any method that does not belong to the lens family.
    pub fn check_lenses(&self, n_lenses: usize) -> Result<()> {
        match self.all_methods().find(|method| !method.supports_lenses(n_lenses)) {
            Some(method) => Err(MulensError::MethodLensMismatch {
                method: method.name(),
                n_lenses,
            }),
            None => Ok(()),
        }
    }

    fn to_tokens(&self) -> Vec<MethodToken> {
        let mut tokens = Vec::with_capacity(2 * self.breakpoints.len());
        for (i, &epoch) in self.breakpoints.iter().enumerate() {
            tokens.push(MethodToken::Epoch(epoch));
            if let Some(method) = self.methods.get(i) {
                tokens.push(MethodToken::Name(method.name().to_string()));
            }
        }
        tokens
    }
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::uniform(Method::PointSource)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlatMethodTable {
    #[serde(default)]
    methods: Vec<MethodToken>,
    #[serde(default = "default_method_name")]
    default_method: String,
}

fn default_method_name() -> String {
    Method::PointSource.name().to_string()
}

impl TryFrom<FlatMethodTable> for MethodTable {
    type Error = MulensError;

    fn try_from(flat: FlatMethodTable) -> Result<Self> {
        MethodTable::from_tokens(&flat.methods, &flat.default_method)
    }
}

impl From<MethodTable> for FlatMethodTable {
    fn from(table: MethodTable) -> Self {
        FlatMethodTable {
            methods: table.to_tokens(),
            default_method: table.default.name().to_string(),
        }
    }
}

/// Tolerances handed to the contour integrators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContourSettings {
    pub accuracy: f64,
    pub ld_accuracy: f64,
}

impl ContourSettings {
    pub fn defaults_for(method: Method) -> Self {
        match method {
            Method::AdaptiveContouring => Self {
                accuracy: 0.1,
                ld_accuracy: 1e-3,
            },
            _ => Self {
                accuracy: 1e-3,
                ld_accuracy: 1e-3,
            },
        }
    }
}

/// Per-method tuning values, e.g. `{"VBBL": {"accuracy": 1e-4}}`.
///
/// Only the contour-integration methods take options; anything else is
/// rejected when set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, BTreeMap<String, f64>>")]
#[serde(into = "BTreeMap<String, BTreeMap<String, f64>>")]
pub struct MethodOptions {
    values: BTreeMap<Method, BTreeMap<String, f64>>,
}

impl MethodOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, method: Method, key: &str, value: f64) -> Result<()> {
        if !method.accepted_options().contains(&key) {
            return Err(MulensError::config(format!(
                "method {method} does not accept option {key:?}"
            )));
        }
        if !(value.is_finite() && value > 0.0) {
            return Err(MulensError::config(format!(
                "option {key} of {method} must be positive, got {value}"
            )));
        }
        self.values
            .entry(method)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    pub fn with(mut self, method: Method, key: &str, value: f64) -> Result<Self> {
        self.set(method, key, value)?;
        Ok(self)
    }

    pub fn get(&self, method: Method, key: &str) -> Option<f64> {
        self.values.get(&method)?.get(key).copied()
    }

    pub fn contour(&self, method: Method) -> ContourSettings {
        let defaults = ContourSettings::defaults_for(method);
        ContourSettings {
            accuracy: self.get(method, "accuracy").unwrap_or(defaults.accuracy),
            ld_accuracy: self
                .get(method, "ld_accuracy")
                .unwrap_or(defaults.ld_accuracy),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl TryFrom<BTreeMap<String, BTreeMap<String, f64>>> for MethodOptions {
    type Error = MulensError;

    fn try_from(raw: BTreeMap<String, BTreeMap<String, f64>>) -> Result<Self> {
        let mut options = MethodOptions::new();
        for (name, entries) in raw {
            let method: Method = name.parse()?;
            for (key, value) in entries {
                options.set(method, &key, value)?;
            }
        }
        Ok(options)
    }
}

impl From<MethodOptions> for BTreeMap<String, BTreeMap<String, f64>> {
    fn from(options: MethodOptions) -> Self {
        options
            .values
            .into_iter()
            .map(|(method, entries)| (method.name().to_string(), entries))
            .collect()
    }
}
