//! Backend recovery delay policy.
//!
//! Pure decision function for reconnect loops: given the last error message
//! and the retry attempt counter, how long to wait before the next attempt.
//! No I/O, no clocks; callers own the actual sleeping.
//!
//! # Example
//!
//! ```
//! use retry_policy::recovery_delay_ms;
//!
//! // Backend is down entirely: back off hard.
//! assert_eq!(recovery_delay_ms("connect ECONNREFUSED 127.0.0.1:8123", Some(3.0)), 20_000);
//!
//! // First attempt after any other failure: retry immediately.
//! assert_eq!(recovery_delay_ms("stream aborted", Some(0.0)), 0);
//!
//! // Subsequent attempts: short fixed delay.
//! assert_eq!(recovery_delay_ms("stream aborted", Some(2.0)), 100);
//! ```

use lazy_static::lazy_static;
use regex::Regex;

/// Delay applied when the backend actively refuses connections. A refused
/// connection means the service is down, not flaky; hammering it faster
/// than this just burns battery and log space.
pub const CONNECTION_REFUSED_DELAY_MS: u64 = 20_000;

/// Delay between retries once at least one attempt has already been made.
pub const RETRY_DELAY_MS: u64 = 100;

lazy_static! {
    /// Word-bounded so e.g. "XECONNREFUSEDY" in a payload dump does not trip it.
    static ref CONNECTION_REFUSED: Regex =
        Regex::new(r"(?i)\bECONNREFUSED\b").expect("static pattern compiles");
}

/// Compute the delay in milliseconds before the next recovery attempt.
///
/// Rules, in order:
/// 1. `last_error` mentions `ECONNREFUSED` (case-insensitive, word-bounded):
///    [`CONNECTION_REFUSED_DELAY_MS`], regardless of the attempt counter.
/// 2. The normalized attempt counter is 0: retry immediately (0 ms).
/// 3. Otherwise: [`RETRY_DELAY_MS`].
///
/// The attempt counter arrives as an optional float because upstream state
/// serialization cannot guarantee an integer. Normalization floors it and
/// treats missing, non-finite, and negative values as attempt 0. Callers with
/// a corrupt counter therefore get an immediate retry rather than a stall.
pub fn recovery_delay_ms(last_error: &str, attempt: Option<f64>) -> u64 {
    if CONNECTION_REFUSED.is_match(last_error) {
        return CONNECTION_REFUSED_DELAY_MS;
    }
    if normalize_attempt(attempt) == 0 {
        return 0;
    }
    RETRY_DELAY_MS
}

/// Floor to a whole attempt count; anything unusable counts as attempt 0.
fn normalize_attempt(attempt: Option<f64>) -> u64 {
    match attempt {
        Some(n) if n.is_finite() && n >= 1.0 => n.floor() as u64,
        _ => 0,
    }
}
