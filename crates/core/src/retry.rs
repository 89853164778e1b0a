//! Rate-limit classification and exponential backoff.
//!
//! Error text coming back from the vendor API is matched against an
//! auditable table of indicators ([`RATE_LIMIT_INDICATORS`]). Only a
//! rate-limit match sends a job down the retry path; every other error is
//! terminal. Retries wait `2^retry_count + jitter` backoff units, with the
//! jitter drawn uniformly from `[1, 3]` so simultaneous retries spread out.

use std::time::Duration;

use rand::Rng;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Case-insensitive substrings that mark an error as a rate-limit rejection.
pub const RATE_LIMIT_INDICATORS: &[&str] = &[
    "too many requests",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "http 429",
    "quota exceeded",
    "throttl",
    "concurrency limit",
    "request limit",
];

/// Default lower bound of the uniform jitter, in backoff units.
pub const DEFAULT_JITTER_MIN: f64 = 1.0;

/// Default upper bound of the uniform jitter, in backoff units.
pub const DEFAULT_JITTER_MAX: f64 = 3.0;

/// Exponent cap so a misconfigured budget cannot overflow the delay.
const MAX_EXPONENT: u32 = 16;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Coarse classification of an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The remote side asked us to slow down; retryable within budget.
    RateLimited,
    /// Anything else; terminal.
    Other,
}

/// Ordered `pattern -> ErrorKind` table. The first matching rule wins.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<(String, ErrorKind)>,
}

impl ErrorClassifier {
    /// A classifier with no rules; everything is [`ErrorKind::Other`].
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule. Patterns are stored lower-cased.
    pub fn with_rule(mut self, pattern: impl AsRef<str>, kind: ErrorKind) -> Self {
        let pattern = pattern.as_ref().trim().to_lowercase();
        if !pattern.is_empty() {
            self.rules.push((pattern, kind));
        }
        self
    }

    /// Classify an error message.
    pub fn classify(&self, text: &str) -> ErrorKind {
        let haystack = text.to_lowercase();
        self.rules
            .iter()
            .find(|(pattern, _)| haystack.contains(pattern.as_str()))
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::Other)
    }

    pub fn is_rate_limited(&self, text: &str) -> bool {
        self.classify(text) == ErrorKind::RateLimited
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = (&str, ErrorKind)> {
        self.rules.iter().map(|(p, k)| (p.as_str(), *k))
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        RATE_LIMIT_INDICATORS
            .iter()
            .fold(Self::empty(), |c, p| c.with_rule(p, ErrorKind::RateLimited))
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Tunable parameters for the retry backoff.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Length of one backoff unit.
    pub unit: Duration,
    pub jitter_min: f64,
    pub jitter_max: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            jitter_min: DEFAULT_JITTER_MIN,
            jitter_max: DEFAULT_JITTER_MAX,
        }
    }
}

impl BackoffPolicy {
    pub fn with_unit(unit: Duration) -> Self {
        Self {
            unit,
            ..Default::default()
        }
    }

    /// Delay for `retry_count` with a caller-supplied jitter (in units).
    pub fn delay_with_jitter(&self, retry_count: u32, jitter: f64) -> Duration {
        let exp = retry_count.min(MAX_EXPONENT) as i32;
        let units = 2f64.powi(exp) + jitter.max(0.0);
        Duration::try_from_secs_f64(self.unit.as_secs_f64() * units).unwrap_or(Duration::MAX)
    }

    /// Delay for `retry_count` with uniformly random jitter.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let (lo, hi) = if self.jitter_min <= self.jitter_max {
            (self.jitter_min, self.jitter_max)
        } else {
            (self.jitter_max, self.jitter_min)
        };
        let jitter = rand::rng().random_range(lo..=hi);
        self.delay_with_jitter(retry_count, jitter)
    }

    /// Smallest possible delay for `retry_count`.
    pub fn min_delay(&self, retry_count: u32) -> Duration {
        self.delay_with_jitter(retry_count, self.jitter_min.min(self.jitter_max))
    }

    /// Largest possible delay for `retry_count`.
    pub fn max_delay(&self, retry_count: u32) -> Duration {
        self.delay_with_jitter(retry_count, self.jitter_max.max(self.jitter_min))
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue after `delay`; `retry_count` is the incremented count.
    Retry { retry_count: u32, delay: Duration },
    /// Terminal failure.
    Fail,
}

/// Decide between requeue and terminal failure.
///
/// Only [`ErrorKind::RateLimited`] with budget left is retried.
pub fn decide(
    kind: ErrorKind,
    retry_count: u32,
    max_retries: u32,
    policy: &BackoffPolicy,
) -> RetryDecision {
    if kind != ErrorKind::RateLimited || retry_count >= max_retries {
        return RetryDecision::Fail;
    }
    let next = retry_count + 1;
    RetryDecision::Retry {
        retry_count: next,
        delay: policy.delay(next),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
