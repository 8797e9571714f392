//! The `microlens_core` crate computes gravitational microlensing
//! magnification curves and their analytic gradients.
//!
//! Key components:
//! - **Parameters**: `ModelParameters`, an immutable, validated snapshot of a
//!   single- or binary-lens model.
//! - **Trajectory**: source position relative to the lens center of mass,
//!   with parallax and xallarap.
//! - **Methods**: the magnification algorithms and the `MethodTable` that
//!   assigns one to each epoch.
//! - **Special**: the finite-source functions B0/B1 and their shared interpolation table.
//! - **Point Lens / Binary Lens**: per-epoch magnification for every method;
//!   binary solvers sit behind traits.
//! - **Magnification Curve**: the orchestrator, plus `compute` and `gradient` entry points.
//! - **Derivatives**: analytic `dA/dp` for the methods that support it.
pub mod binary_lens;
pub mod derivatives;
pub mod error;
pub mod magnification_curve;
pub mod methods;
pub mod parameters;
pub mod point_lens;
pub mod special;
pub mod traits;
pub mod trajectory;

pub use derivatives::GradientResult;
pub use error::{MulensError, Result};
pub use magnification_curve::{compute, gradient, LimbDarkening, MagnificationCurve};
pub use methods::{Method, MethodOptions, MethodTable, MethodToken};
pub use parameters::{ModelParameters, Parameter};
