use std::time::Duration;

use rand::Rng;

/// Exponential backoff with additive jitter: `min(base * 2^attempt + U(0, base), max)`.
pub fn backoff_delay<R: Rng + ?Sized>(
    base: Duration,
    attempt: u32,
    max: Duration,
    rng: &mut R,
) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.min(16)));
    let jitter = base.mul_f64(rng.random::<f64>());
    exp.saturating_add(jitter).min(max)
}
