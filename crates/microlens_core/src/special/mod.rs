//! Special functions used by the finite-source point-lens methods.

pub mod b0b1;
pub mod elliptic;
pub mod quadrature;

pub use b0b1::{b0, b0_prime, b1, b1_prime, B0B1Table};
pub use quadrature::{GaussLegendre, GAUSS_LEGENDRE_64};
