//! Analytic gradients of single-lens magnification curves.
//!
//! Gradients are all or nothing: if any requested parameter or any epoch's
//! method lacks an analytic derivative the whole request fails, and no
//! partial result is returned.

use std::collections::BTreeMap;

use crate::error::{MulensError, Result};
use crate::magnification_curve::Evaluation;
use crate::parameters::{ModelParameters, Parameter};
use crate::point_lens;

/// `dA/dp` per requested parameter, aligned with the epochs.
pub type GradientResult = BTreeMap<Parameter, Vec<f64>>;

const DIFFERENTIABLE: [Parameter; 6] = [
    Parameter::T0,
    Parameter::U0,
    Parameter::TE,
    Parameter::Rho,
    Parameter::PiEN,
    Parameter::PiEE,
];

pub struct DerivativeEngine<'a> {
    parameters: &'a ModelParameters,
    evaluation: &'a Evaluation,
}

impl<'a> DerivativeEngine<'a> {
    pub(crate) fn new(parameters: &'a ModelParameters, evaluation: &'a Evaluation) -> Self {
        Self {
            parameters,
            evaluation,
        }
    }

    /// Checks that can be made from the model alone, before anything is
    /// evaluated.
    pub fn check_request(parameters: &ModelParameters, requested: &[Parameter]) -> Result<()> {
        let n_lenses = parameters.n_lenses();
        if n_lenses != 1 {
            return Err(MulensError::not_supported(format!(
                "gradients of {n_lenses}-lens models"
            )));
        }
        if parameters.xallarap().is_some() {
            return Err(MulensError::not_supported("gradients of xallarap models"));
        }
        if parameters.is_t_star_parametrized() {
            return Err(MulensError::MissingParameter(format!(
                "{} (source size is given as {})",
                Parameter::Rho,
                Parameter::TStar
            )));
        }
        for &parameter in requested {
            if !parameters.defines(parameter) {
                return Err(MulensError::MissingParameter(parameter.name().to_string()));
            }
            if !DIFFERENTIABLE.contains(&parameter) {
                return Err(MulensError::not_supported(format!(
                    "gradient with respect to {parameter}"
                )));
            }
        }
        Ok(())
    }

    pub fn gradient(&self, requested: &[Parameter]) -> Result<GradientResult> {
        Self::check_request(self.parameters, requested)?;
        if let Some(method) = self
            .evaluation
            .groups
            .keys()
            .find(|method| !method.has_derivative())
        {
            return Err(MulensError::not_supported(format!(
                "method {method} has no analytic derivative"
            )));
        }

        let trajectory = &self.evaluation.trajectory;
        let rho = self.parameters.rho();
        let gamma = self.evaluation.gamma;
        let mut result: GradientResult = requested
            .iter()
            .map(|&parameter| (parameter, vec![0.0; trajectory.len()]))
            .collect();

        for (&method, indices) in &self.evaluation.groups {
            let derivatives = indices
                .iter()
                .map(|&i| point_lens::derivative(method, trajectory.u(i), rho, gamma))
                .collect::<Result<Vec<_>>>()?;

            for (&parameter, values) in result.iter_mut() {
                if parameter == Parameter::Rho {
                    for (&i, derivative) in indices.iter().zip(&derivatives) {
                        values[i] = derivative.d_a_d_rho;
                    }
                    continue;
                }
                let d_u = trajectory.d_u_d_param(self.parameters, parameter, indices)?;
                for ((&i, derivative), d_u) in indices.iter().zip(&derivatives).zip(d_u) {
                    values[i] = derivative.d_a_d_u * d_u;
                }
            }
        }
        Ok(result)
    }
}
