//! Error taxonomy shared by every stage of a magnification computation.
//!
//! Configuration problems are reported when a value is built (parameters,
//! method tables, trajectories), never halfway through an evaluation.
//! Failures coming out of external solvers are carried as opaque
//! [`anyhow::Error`] values and surfaced unchanged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MulensError {
    /// Malformed parameters, mismatched lengths or invalid method tables.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A special function was evaluated outside of its domain.
    #[error("{function}({value}) is outside of the function domain")]
    Domain { function: &'static str, value: f64 },

    /// A method token that is not part of the known algorithm set.
    #[error("unknown magnification method: {0:?}")]
    UnknownMethod(String),

    /// A known method used with the wrong number of lenses.
    #[error("method {method} cannot be used for a {n_lenses}-lens model")]
    MethodLensMismatch {
        method: &'static str,
        n_lenses: usize,
    },

    /// A parameter name that is not recognised at all.
    #[error("unknown parameter: {0:?}")]
    UnknownParameter(String),

    /// A parameter that is recognised but not defined by the current model.
    #[error("parameter {0} is not defined for this model")]
    MissingParameter(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    /// A method needs an external solver that has not been installed.
    #[error("no solver installed for method {0}")]
    SolverUnavailable(&'static str),

    #[error(transparent)]
    Solver(#[from] anyhow::Error),
}

impl MulensError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        MulensError::Configuration(message.into())
    }

    pub(crate) fn not_supported(message: impl Into<String>) -> Self {
        MulensError::NotSupported(message.into())
    }

    /// True for the lookup failures callers usually treat as a missing key.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            MulensError::UnknownParameter(_) | MulensError::MissingParameter(_)
        )
    }

    /// True for failures caused by a value the caller passed in, such as an
    /// unknown method token.
    pub fn is_value_error(&self) -> bool {
        matches!(
            self,
            MulensError::UnknownMethod(_) | MulensError::MethodLensMismatch { .. }
        )
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, MulensError::NotSupported(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, MulensError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, MulensError>;
