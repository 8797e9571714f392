use std::f64::consts::FRAC_PI_2;

/// Complete elliptic integrals `(K(k), E(k))` for modulus `k`, computed
/// with the arithmetic-geometric mean.
///
/// The complementary modulus `k' = sqrt(1 - k^2)` is taken as an argument
/// so callers that know it in closed form keep full precision near `k = 1`.
pub fn agm_elliptic(k: f64, k_prime: f64) -> (f64, f64) {
    let mut a = 1.0;
    let mut b = k_prime;
    let mut c = k;
    let mut power = 0.5;
    let mut sum = power * c * c;

    for _ in 0..64 {
        if (a - b).abs() <= 1e-16 * a {
            break;
        }
        let a_next = 0.5 * (a + b);
        c = 0.5 * (a - b);
        b = (a * b).sqrt();
        a = a_next;
        power *= 2.0;
        sum += power * c * c;
    }

    let k_value = FRAC_PI_2 / a;
    (k_value, k_value * (1.0 - sum))
}

/// Complete elliptic integrals `(K(k), E(k))` for `0 <= k < 1`.
pub fn complete_elliptic(k: f64) -> (f64, f64) {
    agm_elliptic(k, ((1.0 - k) * (1.0 + k)).sqrt())
}
