use anyhow::{bail, Result};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use super::roots::{add_scaled, multiply, polynomial_roots, RootSettings};
use crate::parameters::BinaryGeometry;
use crate::traits::PointSourceSolver;

/// One solution of the lens equation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Image {
    pub position: Complex<f64>,
    /// `1 / det J`; negative for saddle-point images.
    pub signed_magnification: f64,
    /// `|zeta(z) - zeta|` of the accepted root.
    pub residual: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WittMaoSettings {
    pub roots: RootSettings,
    /// Largest lens-equation residual of a root accepted as an image.
    pub residual_tolerance: f64,
    /// Newton steps spent refining each image next to its lens.
    pub polish_iterations: usize,
}

impl Default for WittMaoSettings {
    fn default() -> Self {
        Self {
            roots: RootSettings::default(),
            residual_tolerance: 1e-6,
            polish_iterations: 50,
        }
    }
}

/// Point-source binary-lens magnification from the fifth-degree complex
/// polynomial form of the lens equation (Witt & Mao 1995).
#[derive(Debug, Clone, Copy, Default)]
pub struct WittMaoSolver {
    pub settings: WittMaoSettings,
}

impl WittMaoSolver {
    pub fn new(settings: WittMaoSettings) -> Self {
        Self { settings }
    }

    /// Images of a point source at `(x, y)`.
    ///
    /// A binary lens has either three or five images. Polynomial roots that
    /// satisfy the lens equation within the tolerance are refined with Newton
    /// steps written relative to the closest lens, where the small offsets of
    /// images next to a low-mass companion keep their precision. When that
    /// leaves a count other than three or five, single-lens image positions
    /// around each lens seed the same refinement. Every returned image
    /// satisfies the lens equation within the tolerance; a source whose image
    /// set cannot be completed is an error.
    pub fn images(&self, x: f64, y: f64, s: f64, q: f64) -> Result<Vec<Image>> {
        if !(s > 0.0 && q > 0.0) {
            bail!("Binary lens needs s > 0 and q > 0, got s = {s}, q = {q}.");
        }
        if !(x.is_finite() && y.is_finite()) {
            bail!("Source position ({x}, {y}) is not finite.");
        }
        let geometry = BinaryGeometry { s, q, alpha: 0.0 };
        let (m1, m2) = geometry.mass_fractions();
        let (z1, z2) = geometry.lens_positions();
        let lenses = LensPair {
            masses: [m1, m2],
            positions: [z1, z2],
        };
        let source = Complex::new(x, y);
        let tolerance = self.settings.residual_tolerance;
        let iterations = self.settings.polish_iterations;

        let coefficients = lens_polynomial(source, m1, m2, z1, z2);
        let roots = polynomial_roots(&coefficients, self.settings.roots)?;

        let mut found: Vec<Candidate> = Vec::with_capacity(5);
        for root in roots {
            let (mismatch, _) = lenses.evaluate(0.0, root, source);
            if mismatch.norm() < tolerance {
                if let Some(candidate) = lenses.polish(root, source, iterations, tolerance) {
                    push_distinct(&mut found, candidate);
                }
            }
        }

        if found.len() != 3 && found.len() != 5 {
            log::debug!(
                "{} roots satisfy the lens equation at ({x}, {y}); seeding from single lenses",
                found.len()
            );
            for seed in lenses.seeds(source) {
                if let Some(candidate) = lenses.polish(seed, source, iterations, tolerance) {
                    push_distinct(&mut found, candidate);
                }
            }
        }

        if found.len() != 3 && found.len() != 5 {
            bail!(
                "Found {} images of the source at ({x}, {y}) for s = {s}, q = {q}; \
                 a binary lens has three or five.",
                found.len()
            );
        }

        let mut images: Vec<Image> = found.into_iter().map(|c| c.image).collect();
        images.sort_by(|a, b| a.residual.total_cmp(&b.residual));
        Ok(images)
    }
}

/// Image found by Newton refinement, kept in the frame of the lens it was
/// refined next to.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    anchor: usize,
    offset: Complex<f64>,
    image: Image,
}

impl Candidate {
    fn same_image(&self, other: &Candidate) -> bool {
        if self.anchor == other.anchor {
            let scale = self.offset.norm().max(other.offset.norm());
            (self.offset - other.offset).norm() <= 1e-9 * scale
        } else {
            (self.image.position - other.image.position).norm() <= 1e-12
        }
    }
}

fn push_distinct(found: &mut Vec<Candidate>, candidate: Candidate) {
    if !found.iter().any(|c| c.same_image(&candidate)) {
        found.push(candidate);
    }
}

#[derive(Debug, Clone, Copy)]
struct LensPair {
    masses: [f64; 2],
    positions: [f64; 2],
}

impl LensPair {
    fn nearest(&self, z: Complex<f64>) -> usize {
        let distance = |k: usize| (z - self.positions[k]).norm();
        if distance(1) < distance(0) {
            1
        } else {
            0
        }
    }

    /// Lens-equation mismatch `zeta(z) - zeta` and shear
    /// `sum m_k / conj(z - z_k)^2` at `z = base + offset`.
    fn evaluate(
        &self,
        base: f64,
        offset: Complex<f64>,
        source: Complex<f64>,
    ) -> (Complex<f64>, Complex<f64>) {
        let mut mismatch = offset + base - source;
        let mut shear = Complex::new(0.0, 0.0);
        for (&mass, &position) in self.masses.iter().zip(&self.positions) {
            let separation = offset.conj() + (base - position);
            mismatch -= mass / separation;
            shear += mass / (separation * separation);
        }
        (mismatch, shear)
    }

    /// Newton iterations on the lens equation, solved for the offset from the
    /// lens closest to `start`.
    fn polish(
        &self,
        start: Complex<f64>,
        source: Complex<f64>,
        iterations: usize,
        tolerance: f64,
    ) -> Option<Candidate> {
        let anchor = self.nearest(start);
        let base = self.positions[anchor];
        let mut offset = start - base;
        let converged = 1e-14 * (1.0 + source.norm());

        for _ in 0..iterations {
            let (mismatch, shear) = self.evaluate(base, offset, source);
            if !(mismatch.re.is_finite() && mismatch.im.is_finite()) {
                return None;
            }
            if mismatch.norm() < converged {
                break;
            }
            let determinant = 1.0 - shear.norm_sqr();
            if determinant == 0.0 {
                return None;
            }
            // The map is not holomorphic; this solves the 2x2 real system
            // dz - shear conj(dz) = -mismatch.
            let step = (shear * mismatch.conj() - mismatch) / determinant;
            offset += step;
            if step.norm() <= 1e-15 * offset.norm() {
                break;
            }
        }

        let (mismatch, shear) = self.evaluate(base, offset, source);
        let residual = mismatch.norm();
        if !(residual < tolerance) {
            return None;
        }
        Some(Candidate {
            anchor,
            offset,
            image: Image {
                position: offset + base,
                signed_magnification: 1.0 / (1.0 - shear.norm_sqr()),
                residual,
            },
        })
    }

    /// Starting points for a refinement: the point-lens image pair of each
    /// lens on its own, and the image trapped next to each lens by its
    /// neighbour.
    fn seeds(&self, source: Complex<f64>) -> Vec<Complex<f64>> {
        let mut seeds = Vec::with_capacity(6);
        for k in 0..2 {
            let (mass, position) = (self.masses[k], self.positions[k]);
            let (other_mass, other_position) = (self.masses[1 - k], self.positions[1 - k]);

            let trapped = position - source.conj() - other_mass / (position - other_position);
            if trapped != Complex::new(0.0, 0.0) {
                seeds.push(position + mass / trapped);
            }

            let beta = source - position;
            if beta.norm_sqr() > 0.0 {
                let root = (1.0 + 4.0 * mass / beta.norm_sqr()).sqrt();
                seeds.push(position + beta * (0.5 * (1.0 + root)));
                seeds.push(position + beta * (0.5 * (1.0 - root)));
            }
        }
        seeds
    }
}

impl PointSourceSolver for WittMaoSolver {
    fn magnification(&self, x: f64, y: f64, s: f64, q: f64) -> Result<f64> {
        let images = self.images(x, y, s, q)?;
        let total: f64 = images.iter().map(|i| i.signed_magnification.abs()).sum();
        if !total.is_finite() {
            bail!("Point-source magnification diverges at ({x}, {y}).");
        }
        Ok(total)
    }
}

/// Coefficients, lowest power first, of the polynomial whose roots contain
/// every image position:
/// `(z - zeta) P1 P2 - m1 D P2 - m2 D P1` with `D = (z - z1)(z - z2)`,
/// `N = conj(zeta) D + m1 (z - z2) + m2 (z - z1)` and `Pk = N - zk D`.
fn lens_polynomial(
    source: Complex<f64>,
    m1: f64,
    m2: f64,
    z1: f64,
    z2: f64,
) -> Vec<Complex<f64>> {
    let one = Complex::new(1.0, 0.0);
    let minus = |value: f64| Complex::new(-value, 0.0);

    let factor1 = [minus(z1), one];
    let factor2 = [minus(z2), one];
    let d = multiply(&factor1, &factor2);

    // N = conj(zeta) D + m1 (z - z2) + m2 (z - z1)
    let linear = add_scaled(
        &factor2.map(|c| c * m1),
        &factor1,
        Complex::new(m2, 0.0),
    );
    let n = add_scaled(&linear, &d, source.conj());
    let p1 = add_scaled(&n, &d, minus(z1));
    let p2 = add_scaled(&n, &d, minus(z2));

    let shifted = [-source, one];
    let main = multiply(&multiply(&shifted, &p1), &p2);
    let with_first = add_scaled(&main, &multiply(&d, &p2), Complex::new(-m1, 0.0));
    add_scaled(&with_first, &multiply(&d, &p1), Complex::new(-m2, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary_lens::roots::evaluate;
    use crate::point_lens::point_source_magnification;

    #[test]
    fn polynomial_vanishes_at_images() {
        let solver = WittMaoSolver::default();
        let images = solver.images(0.1, 0.05, 1.2, 0.3).expect("images should compute");
        let (m1, m2) = (1.0 / 1.3, 0.3 / 1.3);
        let (z1, z2) = (1.2 * 0.3 / 1.3, -1.2 / 1.3);
        let poly = lens_polynomial(Complex::new(0.1, 0.05), m1, m2, z1, z2);
        assert_eq!(poly.len(), 6);
        for image in images {
            assert!(evaluate(&poly, image.position).norm() < 1e-8);
        }
    }

    #[test]
    fn tiny_companion_far_away_is_a_single_lens() {
        let solver = WittMaoSolver::default();
        // Companion of 1e-7 of the mass at 10 Einstein radii.
        let a = solver
            .magnification(0.2, 0.25, 10.0, 1e-7)
            .expect("magnification should compute");
        let (primary, _) = BinaryGeometry {
            s: 10.0,
            q: 1e-7,
            alpha: 0.0,
        }
        .lens_positions();
        let u = (0.2 - primary).hypot(0.25);
        assert!((a - point_source_magnification(u)).abs() / a < 1e-5);
    }

    #[test]
    fn low_mass_companion_keeps_its_trapped_image() {
        // The image next to a 1e-7 companion sits about 1e-8 from it; solved
        // around the origin its residual is swamped by rounding.
        let (s, q) = (3.0, 1e-7);
        let (x, y) = (-1.8, 0.04);
        let solver = WittMaoSolver::default();
        let images = solver.images(x, y, s, q).expect("images should compute");
        assert_eq!(images.len(), 3);
        let tolerance = solver.settings.residual_tolerance;
        assert!(images.iter().all(|i| i.residual < tolerance));

        let a = solver.magnification(x, y, s, q).expect("magnification should compute");
        let (primary, _) = BinaryGeometry { s, q, alpha: 0.0 }.lens_positions();
        let expected = point_source_magnification((x - primary).hypot(y));
        assert!((a - expected).abs() / expected < 1e-5, "A = {a}, expected {expected}");
    }

    #[test]
    fn every_returned_image_solves_the_lens_equation() {
        let solver = WittMaoSolver::default();
        let tolerance = solver.settings.residual_tolerance;
        for (s, q) in [(3.0, 1e-7), (1.0, 1e-4), (1.0, 1.0)] {
            for i in 0..12 {
                for j in 0..12 {
                    let x = -2.0 + 4.0 * (i as f64 + 0.5) / 12.0;
                    let y = -2.0 + 4.0 * (j as f64 + 0.5) / 12.0;
                    let images = solver.images(x, y, s, q).expect("images should compute");
                    assert!(images.len() == 3 || images.len() == 5, "at ({x}, {y})");
                    for image in &images {
                        assert!(image.residual < tolerance, "at ({x}, {y}): {image:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn incomplete_image_set_is_an_error() {
        let solver = WittMaoSolver::new(WittMaoSettings {
            residual_tolerance: 0.0,
            ..WittMaoSettings::default()
        });
        assert!(solver.images(0.5, 0.8, 1.0, 1.0).is_err());
        assert!(solver.magnification(0.5, 0.8, 1.0, 1.0).is_err());
    }

    #[test]
    fn settings_without_polish_iterations_deserialize() {
        let settings: WittMaoSettings =
            serde_json::from_str(r#"{"residual_tolerance": 1e-8}"#).expect("settings should parse");
        assert_eq!(settings.residual_tolerance, 1e-8);
        assert_eq!(settings.polish_iterations, 50);
    }

    #[test]
    fn image_count_is_three_outside_caustics() {
        let images = WittMaoSolver::default()
            .images(0.5, 0.8, 1.0, 1.0)
            .expect("images should compute");
        assert_eq!(images.len(), 3);
        assert!(images.iter().all(|i| i.residual < 1e-6));
    }

    #[test]
    fn image_count_is_five_inside_central_caustic() {
        // Equal-mass resonant binary; the origin lies inside the caustic.
        let images = WittMaoSolver::default()
            .images(0.0, 0.01, 1.0, 1.0)
            .expect("images should compute");
        assert_eq!(images.len(), 5);
        // Signed magnifications of the five images sum to one.
        let parity: f64 = images.iter().map(|i| i.signed_magnification).sum();
        assert!((parity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_bad_geometry() {
        let solver = WittMaoSolver::default();
        assert!(solver.magnification(0.1, 0.1, -1.0, 0.5).is_err());
        assert!(solver.magnification(f64::NAN, 0.1, 1.0, 0.5).is_err());
    }
}
