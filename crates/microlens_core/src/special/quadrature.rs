//! Gauss-Legendre quadrature.
//!
//! Nodes are computed once with Newton iterations on the Legendre
//! recurrence. [`GaussLegendre::integrate_clustered`] composes the rule with
//! the map `t -> t^3 (10 - 15t + 6t^2)`, whose first two derivatives vanish
//! at both ends; this tames square-root and logarithmic endpoint
//! singularities.

use std::f64::consts::PI;
use std::sync::LazyLock;

/// The 64-point rule used throughout the crate.
pub static GAUSS_LEGENDRE_64: LazyLock<GaussLegendre> =
    LazyLock::new(|| GaussLegendre::new(64));

#[derive(Debug, Clone)]
pub struct GaussLegendre {
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl GaussLegendre {
    pub fn new(order: usize) -> Self {
        let order = order.max(1);
        let mut nodes = Vec::with_capacity(order);
        let mut weights = Vec::with_capacity(order);
        let n = order as f64;

        for i in 1..=order {
            let mut x = (PI * (i as f64 - 0.25) / (n + 0.5)).cos();
            let mut derivative = 1.0;
            for _ in 0..100 {
                let (p, dp) = legendre(order, x);
                derivative = dp;
                let dx = p / dp;
                x -= dx;
                if dx.abs() < 1e-15 {
                    break;
                }
            }
            let (_, dp) = legendre(order, x);
            if dp.is_finite() {
                derivative = dp;
            }
            nodes.push(x);
            weights.push(2.0 / ((1.0 - x * x) * derivative * derivative));
        }

        Self { nodes, weights }
    }

    pub fn order(&self) -> usize {
        self.nodes.len()
    }

    /// Integral of `f` over `[a, b]`.
    pub fn integrate(&self, a: f64, b: f64, mut f: impl FnMut(f64) -> f64) -> f64 {
        let mid = 0.5 * (a + b);
        let half = 0.5 * (b - a);
        let sum: f64 = self
            .nodes
            .iter()
            .zip(&self.weights)
            .map(|(&x, &w)| w * f(mid + half * x))
            .sum();
        half * sum
    }

    /// Integral of `f` over `[a, b]` with nodes clustered at both endpoints.
    pub fn integrate_clustered(&self, a: f64, b: f64, mut f: impl FnMut(f64) -> f64) -> f64 {
        let width = b - a;
        self.integrate(0.0, 1.0, |t| {
            let s = 1.0 - t;
            let r = a + width * t * t * t * (10.0 - 15.0 * t + 6.0 * t * t);
            f(r) * width * 30.0 * t * t * s * s
        })
    }
}

/// `P_n(x)` and `P_n'(x)`.
fn legendre(order: usize, x: f64) -> (f64, f64) {
    let mut p0 = 1.0;
    let mut p1 = x;
    for k in 2..=order {
        let k = k as f64;
        let p2 = ((2.0 * k - 1.0) * x * p1 - (k - 1.0) * p0) / k;
        p0 = p1;
        p1 = p2;
    }
    let n = order as f64;
    let dp = n * (x * p1 - p0) / (x * x - 1.0);
    (p1, dp)
}
