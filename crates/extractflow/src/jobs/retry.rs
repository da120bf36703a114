use std::time::Duration;

use rand::Rng;

use crate::jobs::error_codes::ErrorCode;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_seconds: i64,
    pub max_seconds: i64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_seconds: 2,
            max_seconds: 15 * 60,
            jitter_pct: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
}

pub fn classify_error(code: &str) -> ErrorClass {
    match ErrorCode::from_str(code) {
        ErrorCode::BadPayload | ErrorCode::BadMessage | ErrorCode::UnknownJob => {
            ErrorClass::NonRetryable
        }
        _ => ErrorClass::Retryable,
    }
}

pub fn next_delay_seconds(attempt_no: i32, cfg: &RetryConfig, rng: &mut impl Rng) -> i64 {
    let attempt_no = attempt_no.max(1) as u32;

    // exponent = attempt_no - 1
    let exp = attempt_no.saturating_sub(1);

    // 2^exp; past 62 bits let the cap handle it.
    let pow2 = if exp >= 62 { i64::MAX } else { 1_i64 << exp };

    let delay = cfg.base_seconds.saturating_mul(pow2).min(cfg.max_seconds);

    // jitter in range [-jitter_pct, +jitter_pct]
    let jitter_range = (delay as f64) * cfg.jitter_pct;
    if jitter_range <= 0.0 {
        return delay.clamp(0, cfg.max_seconds);
    }
    let jitter = rng.gen_range(-jitter_range..=jitter_range);

    let jittered = (delay as f64 + jitter).round() as i64;
    jittered.clamp(0, cfg.max_seconds)
}

pub fn next_delay(attempt_no: i32, cfg: &RetryConfig) -> Duration {
    let secs = next_delay_seconds(attempt_no, cfg, &mut rand::thread_rng());
    Duration::from_secs(secs.max(0) as u64)
}
