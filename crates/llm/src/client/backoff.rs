use std::time::Duration;

/// Delay after the given failed attempt (1-based): `base`, `2 * base`,
/// `4 * base`, ... capped at `max`.
pub(super) fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(max)
}
