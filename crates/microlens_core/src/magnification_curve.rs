//! Magnification of a model at a set of epochs.
//!
//! A [`MagnificationCurve`] evaluates in fixed stages: validate the
//! configuration, build the trajectory, assign a method to every epoch,
//! group the epochs by method, evaluate each group and scatter the results
//! back into epoch order. The last evaluation is cached until any input
//! changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::binary_lens::{BinaryLens, BinarySolvers, MultipoleSettings};
use crate::derivatives::{DerivativeEngine, GradientResult};
use crate::error::{MulensError, Result};
use crate::methods::{Method, MethodOptions, MethodTable};
use crate::parameters::{LensSystem, ModelParameters, Parameter};
use crate::point_lens;
use crate::trajectory::{ParallaxSetup, Trajectory};

/// Linear limb-darkening coefficients by bandpass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LimbDarkening {
    gammas: BTreeMap<String, f64>,
}

impl LimbDarkening {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, bandpass: &str, gamma: f64) -> Result<()> {
        if !gamma.is_finite() {
            return Err(MulensError::config(format!(
                "limb-darkening coefficient for {bandpass} must be finite, got {gamma}"
            )));
        }
        self.gammas.insert(bandpass.to_string(), gamma);
        Ok(())
    }

    pub fn gamma(&self, bandpass: &str) -> Option<f64> {
        self.gammas.get(bandpass).copied()
    }

    pub fn bandpasses(&self) -> impl Iterator<Item = &str> {
        self.gammas.keys().map(String::as_str)
    }
}

/// Epoch indices per method, each list in increasing order.
pub type Partition = BTreeMap<Method, Vec<usize>>;

/// Groups epoch indices by their assigned method.
pub fn partition(assigned: &[Method]) -> Partition {
    let mut groups = Partition::new();
    for (index, &method) in assigned.iter().enumerate() {
        groups.entry(method).or_default().push(index);
    }
    groups
}

/// Scatters per-group values back into epoch order.
///
/// Every index in `0..len` must appear in exactly one group.
pub fn merge<'a>(
    len: usize,
    groups: impl IntoIterator<Item = (&'a [usize], Vec<f64>)>,
) -> Result<Vec<f64>> {
    let mut merged = vec![f64::NAN; len];
    let mut filled = vec![false; len];
    for (indices, values) in groups {
        if indices.len() != values.len() {
            return Err(MulensError::config(format!(
                "group of {} epochs produced {} values",
                indices.len(),
                values.len()
            )));
        }
        for (&index, value) in indices.iter().zip(values) {
            match filled.get_mut(index) {
                Some(seen) if !*seen => {
                    *seen = true;
                    merged[index] = value;
                }
                Some(_) => {
                    return Err(MulensError::config(format!(
                        "epoch {index} was assigned to two groups"
                    )))
                }
                None => {
                    return Err(MulensError::config(format!(
                        "epoch index {index} is out of range for {len} epochs"
                    )))
                }
            }
        }
    }
    if let Some(missing) = filled.iter().position(|seen| !seen) {
        return Err(MulensError::config(format!(
            "epoch {missing} was not assigned to any group"
        )));
    }
    Ok(merged)
}

/// Result of one evaluation, kept for reuse by gradients.
#[derive(Debug, Clone)]
pub(crate) struct Evaluation {
    pub(crate) trajectory: Trajectory,
    pub(crate) groups: Partition,
    pub(crate) gamma: f64,
    pub(crate) magnification: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct MagnificationCurve {
    epochs: Vec<f64>,
    parameters: ModelParameters,
    methods: MethodTable,
    options: MethodOptions,
    limb_darkening: LimbDarkening,
    bandpass: Option<String>,
    parallax: ParallaxSetup,
    solvers: BinarySolvers,
    multipole: MultipoleSettings,
    cache: Option<Evaluation>,
}

impl MagnificationCurve {
    pub fn new(epochs: &[f64], parameters: ModelParameters) -> Self {
        Self {
            epochs: epochs.to_vec(),
            parameters,
            methods: MethodTable::default(),
            options: MethodOptions::default(),
            limb_darkening: LimbDarkening::default(),
            bandpass: None,
            parallax: ParallaxSetup::default(),
            solvers: BinarySolvers::default(),
            multipole: MultipoleSettings::default(),
            cache: None,
        }
    }

    pub fn with_method_table(mut self, methods: MethodTable) -> Self {
        self.set_method_table(methods);
        self
    }

    pub fn with_parallax(mut self, parallax: ParallaxSetup) -> Self {
        self.set_parallax(parallax);
        self
    }

    pub fn with_solvers(mut self, solvers: BinarySolvers) -> Self {
        self.set_solvers(solvers);
        self
    }

    pub fn epochs(&self) -> &[f64] {
        &self.epochs
    }

    pub fn parameters(&self) -> &ModelParameters {
        &self.parameters
    }

    pub fn method_table(&self) -> &MethodTable {
        &self.methods
    }

    pub fn limb_darkening(&self) -> &LimbDarkening {
        &self.limb_darkening
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    pub fn set_epochs(&mut self, epochs: &[f64]) {
        self.epochs = epochs.to_vec();
        self.cache = None;
    }

    pub fn set_parameters(&mut self, parameters: ModelParameters) {
        self.parameters = parameters;
        self.cache = None;
    }

    pub fn set_method_table(&mut self, methods: MethodTable) {
        self.methods = methods;
        self.cache = None;
    }

    pub fn set_method_options(&mut self, options: MethodOptions) {
        self.options = options;
        self.cache = None;
    }

    pub fn set_limb_darkening(&mut self, bandpass: &str, gamma: f64) -> Result<()> {
        self.limb_darkening.set(bandpass, gamma)?;
        self.cache = None;
        Ok(())
    }

    /// Selects the bandpass whose limb-darkening coefficient is used.
    pub fn use_bandpass(&mut self, bandpass: Option<&str>) {
        self.bandpass = bandpass.map(str::to_string);
        self.cache = None;
    }

    pub fn set_parallax(&mut self, parallax: ParallaxSetup) {
        self.parallax = parallax;
        self.cache = None;
    }

    pub fn set_solvers(&mut self, solvers: BinarySolvers) {
        self.solvers = solvers;
        self.cache = None;
    }

    pub fn set_multipole_settings(&mut self, settings: MultipoleSettings) {
        self.multipole = settings;
        self.cache = None;
    }

    /// Magnification at every epoch, in epoch order.
    pub fn magnification(&mut self) -> Result<Vec<f64>> {
        Ok(self.evaluation()?.magnification.clone())
    }

    /// Analytic derivatives of the magnification for `requested`.
    pub fn gradient(&mut self, requested: &[Parameter]) -> Result<GradientResult> {
        DerivativeEngine::check_request(&self.parameters, requested)?;
        let parameters = self.parameters.clone();
        let evaluation = self.evaluation()?;
        DerivativeEngine::new(&parameters, evaluation).gradient(requested)
    }

    /// Like [`Self::gradient`], with parameters given by name.
    pub fn gradient_by_name(&mut self, requested: &[&str]) -> Result<GradientResult> {
        let parameters = requested
            .iter()
            .map(|name| name.parse())
            .collect::<Result<Vec<Parameter>>>()?;
        self.gradient(&parameters)
    }

    fn evaluation(&mut self) -> Result<&Evaluation> {
        let evaluation = match self.cache.take() {
            Some(cached) => cached,
            None => self.evaluate()?,
        };
        Ok(self.cache.insert(evaluation))
    }

    fn gamma(&self) -> Option<f64> {
        self.bandpass
            .as_deref()
            .and_then(|bandpass| self.limb_darkening.gamma(bandpass))
    }

    fn validate(&self) -> Result<f64> {
        let n_lenses = self.parameters.n_lenses();
        if n_lenses > 2 {
            return Err(MulensError::not_supported(format!(
                "magnification for {n_lenses} lenses"
            )));
        }
        self.methods.check_lenses(n_lenses)?;

        let gamma = self.gamma();
        if let Some(method) = self
            .methods
            .all_methods()
            .find(|m| m.requires_limb_darkening())
        {
            if gamma.is_none() {
                let bandpass = self.bandpass.as_deref().unwrap_or("<none>");
                return Err(MulensError::config(format!(
                    "method {method} needs a limb-darkening coefficient, \
                     none set for bandpass {bandpass}"
                )));
            }
        }
        if self.parameters.rho().is_none() {
            if let Some(method) = self.methods.all_methods().find(|m| m.is_finite_source()) {
                return Err(MulensError::config(format!(
                    "method {method} needs a source size (rho or t_star)"
                )));
            }
        }
        Ok(gamma.unwrap_or(0.0))
    }

    fn evaluate(&self) -> Result<Evaluation> {
        let gamma = self.validate()?;
        let trajectory = Trajectory::new(&self.epochs, &self.parameters, &self.parallax)?;

        let rho = self.parameters.rho();
        if rho.is_some() && !self.methods.has_finite_source_method() {
            log::warn!(
                "source size is set but no finite-source method is configured; \
                 all epochs use point-source magnification"
            );
        }

        let assigned = self.methods.assign(trajectory.epochs());
        let groups = partition(&assigned);
        let mut outputs = Vec::with_capacity(groups.len());
        for (&method, indices) in &groups {
            log::debug!("evaluating {} epochs with {method}", indices.len());
            let values = match self.parameters.lenses() {
                LensSystem::Single => indices
                    .iter()
                    .map(|&i| point_lens::magnification(method, trajectory.u(i), rho, gamma))
                    .collect::<Result<Vec<f64>>>()?,
                LensSystem::Binary(geometry) => {
                    let lens = BinaryLens {
                        solvers: &self.solvers,
                        geometry: *geometry,
                        rho,
                        gamma,
                        options: &self.options,
                        multipole: self.multipole,
                    };
                    indices
                        .iter()
                        .map(|&i| lens.magnification(method, trajectory.x()[i], trajectory.y()[i]))
                        .collect::<Result<Vec<f64>>>()?
                }
                LensSystem::Triple(_) => {
                    return Err(MulensError::not_supported("magnification for 3 lenses"))
                }
            };
            outputs.push((indices.as_slice(), values));
        }
        let magnification = merge(trajectory.len(), outputs)?;

        Ok(Evaluation {
            trajectory,
            groups,
            gamma,
            magnification,
        })
    }
}

/// Magnification of `parameters` at `epochs` using `methods`.
pub fn compute(
    epochs: &[f64],
    parameters: &ModelParameters,
    methods: &MethodTable,
) -> Result<Vec<f64>> {
    MagnificationCurve::new(epochs, parameters.clone())
        .with_method_table(methods.clone())
        .magnification()
}

/// Analytic gradient of the magnification of `parameters` at `epochs`.
pub fn gradient(
    epochs: &[f64],
    parameters: &ModelParameters,
    methods: &MethodTable,
    requested: &[Parameter],
) -> Result<GradientResult> {
    MagnificationCurve::new(epochs, parameters.clone())
        .with_method_table(methods.clone())
        .gradient(requested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::MethodToken;
    use crate::point_lens::point_source_magnification;
    use std::sync::Mutex;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn daily_epochs() -> Vec<f64> {
        (3570..=3596).map(f64::from).collect()
    }

    fn pspl() -> ModelParameters {
        ModelParameters::point_lens(3583.0, 0.3, 12.0).expect("valid parameters")
    }

    fn table(tokens: Vec<MethodToken>, default: &str) -> MethodTable {
        MethodTable::from_tokens(&tokens, default).expect("valid method table")
    }

    #[test]
    fn partition_and_merge_restore_epoch_order() {
        let assigned = [
            Method::PointSource,
            Method::Hexadecapole,
            Method::PointSource,
            Method::Quadrupole,
            Method::Hexadecapole,
        ];
        let groups = partition(&assigned);
        assert_eq!(groups[&Method::PointSource], vec![0, 2]);
        assert_eq!(groups[&Method::Hexadecapole], vec![1, 4]);
        let outputs = groups
            .iter()
            .map(|(_, indices)| {
                let values: Vec<f64> = indices.iter().map(|&i| i as f64 * 10.0).collect();
                (indices.as_slice(), values)
            });
        let merged = merge(assigned.len(), outputs).expect("merge should succeed");
        assert_eq!(merged, vec![0.0, 10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn merge_rejects_incomplete_or_overlapping_groups() {
        assert_err_contains(merge(3, vec![(&[0usize, 2][..], vec![1.0, 2.0])]), "not assigned");
        assert_err_contains(
            merge(2, vec![(&[0usize, 1][..], vec![1.0, 2.0]), (&[1usize][..], vec![3.0])]),
            "two groups",
        );
        assert_err_contains(merge(1, vec![(&[0usize][..], vec![])]), "produced 0 values");
    }

    #[test]
    fn single_lens_scenario_peaks_at_t0() {
        let epochs = daily_epochs();
        let values =
            compute(&epochs, &pspl(), &MethodTable::default()).expect("curve should compute");
        assert_eq!(values.len(), epochs.len());
        let peak = epochs.iter().position(|&t| t == 3583.0).expect("peak epoch present");
        assert!((values[peak] - point_source_magnification(0.3)).abs() < 1e-12);
        for i in 0..peak {
            assert!(values[i] < values[i + 1]);
        }
        for i in peak..values.len() - 1 {
            assert!(values[i] > values[i + 1]);
        }
    }

    #[test]
    fn split_table_is_bit_identical_to_uniform_table() {
        let epochs: Vec<f64> = (0..40).map(|i| 3580.0 + 0.15 * i as f64).collect();
        let parameters = ModelParameters::point_lens(3583.0, 0.01, 12.0)
            .and_then(|p| p.with_rho(0.02))
            .expect("valid parameters");

        let uniform = compute(
            &epochs,
            &parameters,
            &MethodTable::uniform(Method::FiniteSourceUniformGould94),
        )
        .expect("uniform curve");
        let split = compute(
            &epochs,
            &parameters,
            &table(
                vec![
                    3500.0.into(),
                    "finite_source_uniform_Gould94".into(),
                    3583.0.into(),
                    "finite_source_uniform_Gould94".into(),
                    3600.0.into(),
                ],
                "point_source",
            ),
        )
        .expect("split curve");
        assert_eq!(
            uniform.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            split.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn mixed_methods_match_direct_evaluation() {
        let epochs = [3583.5, 3575.0, 3583.0, 3590.0, 3582.9];
        let parameters = ModelParameters::point_lens(3583.0, 0.01, 12.0)
            .and_then(|p| p.with_rho(0.02))
            .expect("valid parameters");
        let methods = table(
            vec![3582.0.into(), "finite_source_uniform_Gould94".into(), 3584.0.into()],
            "point_source",
        );
        let values = compute(&epochs, &parameters, &methods).expect("curve should compute");
        for (i, &t) in epochs.iter().enumerate() {
            let u = ((t - 3583.0) / 12.0_f64).hypot(0.01);
            let method = methods.method_at(t);
            let expected =
                point_lens::magnification(method, u, Some(0.02), 0.0).expect("direct value");
            assert_eq!(values[i].to_bits(), expected.to_bits(), "epoch {t}");
        }
    }

    #[test]
    fn cache_is_invalidated_by_every_setter() {
        let parameters = pspl().with_rho(0.01).expect("valid parameters");
        let mut curve = MagnificationCurve::new(&[3583.0], parameters).with_method_table(table(
            vec![3580.0.into(), "finite_source_LD_Yoo04".into(), 3590.0.into()],
            "point_source",
        ));
        curve.set_limb_darkening("I", 0.5).expect("valid gamma");
        curve.use_bandpass(Some("I"));
        let darkened = curve.magnification().expect("curve should compute");
        assert!(curve.is_cached());

        curve.set_limb_darkening("I", 0.0).expect("valid gamma");
        assert!(!curve.is_cached());
        let uniform = curve.magnification().expect("curve should compute");
        assert_ne!(darkened, uniform);

        curve.set_parameters(pspl().with_rho(0.02).expect("valid parameters"));
        assert!(!curve.is_cached());
        curve.magnification().expect("curve should compute");
        curve.set_method_table(MethodTable::uniform(Method::FiniteSourceUniformGould94));
        assert!(!curve.is_cached());
        curve.magnification().expect("curve should compute");
        curve.use_bandpass(None);
        assert!(!curve.is_cached());
    }

    #[test]
    fn limb_darkened_methods_need_a_coefficient() {
        let parameters = pspl().with_rho(0.01).expect("valid parameters");
        let mut curve = MagnificationCurve::new(&[3583.0], parameters)
            .with_method_table(MethodTable::uniform(Method::FiniteSourceLdYoo04));
        assert_err_contains(curve.magnification(), "limb-darkening");
        curve.set_limb_darkening("V", 0.6).expect("valid gamma");
        curve.use_bandpass(Some("I"));
        assert_err_contains(curve.magnification(), "bandpass I");
        curve.use_bandpass(Some("V"));
        assert!(curve.magnification().is_ok());
    }

    #[test]
    fn finite_source_methods_need_a_source_size() {
        let err = compute(
            &[3583.0],
            &pspl(),
            &MethodTable::uniform(Method::FiniteSourceUniformGould94),
        )
        .expect_err("rho is missing");
        assert!(err.is_configuration());
    }

    #[test]
    fn unknown_and_mismatched_methods_are_value_errors() {
        let tokens: Vec<MethodToken> = vec![1.0.into(), "finite_source_fancy".into(), 2.0.into()];
        let err = MethodTable::from_tokens(&tokens, "point_source").expect_err("unknown method");
        assert!(err.is_value_error());
        assert!(format!("{err}").contains("finite_source_fancy"));

        let err = compute(&[3583.0], &pspl(), &MethodTable::uniform(Method::Hexadecapole))
            .expect_err("binary method for a single lens");
        assert!(err.is_value_error());
    }

    #[test]
    fn more_than_two_lenses_is_not_supported() {
        let parameters = pspl()
            .with_triple(crate::parameters::TripleGeometry {
                s_21: 1.0,
                s_31: 1.2,
                q_21: 0.01,
                q_31: 0.001,
                psi: 30.0,
            })
            .expect("valid parameters");
        let err =
            compute(&[3583.0], &parameters, &MethodTable::default()).expect_err("three lenses");
        assert!(err.is_not_supported());
    }

    #[test]
    fn rho_without_finite_source_method_still_computes_point_source() {
        let parameters = pspl().with_rho(0.01).expect("valid parameters");
        let values =
            compute(&[3583.0], &parameters, &MethodTable::default()).expect("curve should compute");
        assert_eq!(values[0], point_source_magnification(0.3));
    }

    /// Keeps every formatted record so tests can look for a message.
    struct CapturedLog(Mutex<Vec<String>>);

    impl log::Log for CapturedLog {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            if let Ok(mut records) = self.0.lock() {
                records.push(format!("{} {}", record.level(), record.args()));
            }
        }

        fn flush(&self) {}
    }

    static CAPTURED_LOG: CapturedLog = CapturedLog(Mutex::new(Vec::new()));

    fn captured_log() -> &'static CapturedLog {
        // Only the first call installs the logger.
        let _ = log::set_logger(&CAPTURED_LOG);
        log::set_max_level(log::LevelFilter::Warn);
        &CAPTURED_LOG
    }

    #[test]
    fn rho_without_finite_source_method_logs_a_warning() {
        let captured = captured_log();
        let parameters = pspl().with_rho(0.01).expect("valid parameters");
        compute(&[3583.0], &parameters, &MethodTable::default()).expect("curve should compute");

        let records = captured.0.lock().expect("log lock");
        assert!(
            records
                .iter()
                .any(|r| r.starts_with("WARN") && r.contains("no finite-source method")),
            "captured: {records:?}"
        );
    }

    #[test]
    fn binary_scenario_shows_anomaly_only_inside_window() {
        let alpha = 180.0 - 0.37_f64.to_degrees();
        let parameters = pspl()
            .with_rho(0.001)
            .and_then(|p| p.with_binary(1.5, 0.001, alpha))
            .expect("valid parameters");
        let methods = table(
            vec![3592.0.into(), "hexadecapole".into(), 3593.0.into()],
            "point_source",
        );
        let mut epochs = daily_epochs();
        let inside = [3592.2, 3592.25, 3592.3, 3592.4];
        epochs.extend(inside);

        let values = compute(&epochs, &parameters, &methods).expect("curve should compute");
        for (&t, &value) in epochs.iter().zip(&values) {
            let u = ((t - 3583.0) / 12.0_f64).hypot(0.3);
            let reference = point_source_magnification(u);
            let deviation = (value - reference) / reference;
            if t < 3592.0 || t >= 3593.0 {
                assert!(deviation.abs() < 2.5e-2, "epoch {t}: deviation {deviation}");
            } else if inside.contains(&t) {
                assert!(deviation > 0.5, "epoch {t}: no anomaly, deviation {deviation}");
            }
        }
    }

    #[test]
    fn contour_methods_use_installed_integrators() {
        let alpha = 180.0 - 0.37_f64.to_degrees();
        let parameters = pspl()
            .with_rho(0.001)
            .and_then(|p| p.with_binary(1.5, 0.001, alpha))
            .expect("valid parameters");
        let mut curve = MagnificationCurve::new(&[3580.0], parameters)
            .with_method_table(MethodTable::uniform(Method::AdaptiveContouring));
        let err = curve.magnification().expect_err("no integrator installed");
        assert!(matches!(err, MulensError::SolverUnavailable(_)));

        curve.set_solvers(BinarySolvers::default().with_reference_integrators());
        let value = curve.magnification().expect("curve should compute")[0];
        curve.set_method_table(MethodTable::uniform(Method::Hexadecapole));
        let expansion = curve.magnification().expect("curve should compute")[0];
        assert!((value - expansion).abs() / expansion < 1e-4);
    }
}
