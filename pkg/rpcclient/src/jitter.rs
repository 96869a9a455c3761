//! Pluggable randomness for overload backoff jitter.
//!
//! The original source calls a bare global RNG inline at the call site,
//! which makes the jittered sleep impossible to pin down in a test. Here the
//! source is a trait object threaded into the executor, so tests can swap in
//! a fixed value and assert the exact clamped sleep.

use rand::Rng;

pub trait JitterSource: Send + Sync {
    /// Returns a value uniformly distributed in `[0.0, 1.0)`.
    fn next_unit(&self) -> f64;
}

/// Backed by the same `rand` crate version already used for jitter
/// elsewhere in this codebase.
#[derive(Debug, Default)]
pub struct RandJitterSource;

impl JitterSource for RandJitterSource {
    fn next_unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Returns a fixed value every call. Useful for property tests that need
/// the jittered sleep to land at a known point in its clamped range.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitterSource(pub f64);

impl JitterSource for FixedJitterSource {
    fn next_unit(&self) -> f64 {
        self.0
    }
}
