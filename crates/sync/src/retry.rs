//! Classification-aware retry policy with exponential backoff and jitter.
//!
//! The policy is a pure decision function: given a failure classification
//! and the attempt count it answers whether to re-attempt and after what
//! delay. The orchestrator owns the actual sleeping, so tests can exercise
//! the full decision table without wall-clock waits.

use std::time::Duration;

use rand::Rng;

use crate::error::{Classification, SyncError, SyncResult};

/// Upper bound on the backoff exponent to avoid overflow.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Retry policy configuration.
///
/// All values are explicit and injected at construction; there are no
/// hidden defaults inside the decision logic.
#[derive(Debug, Clone)]
pub struct RetryPolicyConfig {
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    /// Delay before the first re-attempt.
    pub initial_delay: Duration,
    /// Cap applied to the exponential ladder.
    pub max_delay: Duration,
    /// Multiplier applied per failed attempt.
    pub backoff_multiplier: f64,
    /// Upper bound of the uniform jitter added to each delay.
    pub jitter_max: Duration,
    /// Allow crisis-mode requests to shortcut the ladder to a single
    /// best-effort attempt.
    pub crisis_override: bool,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_max: Duration::from_millis(100),
            crisis_override: true,
        }
    }
}

impl RetryPolicyConfig {
    /// Create a configuration builder.
    pub fn builder() -> RetryPolicyConfigBuilder {
        RetryPolicyConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_attempts == 0 {
            return Err(SyncError::config("max_attempts must be greater than 0"));
        }
        if self.initial_delay > self.max_delay {
            return Err(SyncError::config(format!(
                "initial_delay ({:?}) cannot be greater than max_delay ({:?})",
                self.initial_delay, self.max_delay
            )));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(SyncError::config("backoff_multiplier must be at least 1.0"));
        }
        Ok(())
    }
}

/// Builder for `RetryPolicyConfig`.
#[derive(Debug, Default)]
pub struct RetryPolicyConfigBuilder {
    config: RetryPolicyConfig,
}

impl RetryPolicyConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryPolicyConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn jitter_max(mut self, jitter: Duration) -> Self {
        self.config.jitter_max = jitter;
        self
    }

    pub fn crisis_override(mut self, enabled: bool) -> Self {
        self.config.crisis_override = enabled;
        self
    }

    pub fn build(self) -> SyncResult<RetryPolicyConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Decision returned for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    /// Terminal decision: do not retry.
    pub fn stop() -> Self {
        Self { should_retry: false, delay: Duration::ZERO }
    }
}

/// Classifying retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryPolicyConfig,
}

impl RetryPolicy {
    /// Create a policy from a validated configuration.
    pub fn new(config: RetryPolicyConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Maximum attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Decide whether the attempt that just failed should be re-attempted.
    ///
    /// `attempt` is 1-based: the first failed attempt passes `1`. A
    /// non-retryable classification stops immediately regardless of budget.
    /// A crisis-mode request with `crisis_override` enabled gets at most the
    /// single attempt already spent; the crisis fast-path takes over from
    /// there rather than holding the caller through the backoff ladder.
    pub fn decide(
        &self,
        classification: &Classification,
        attempt: u32,
        crisis_mode: bool,
    ) -> RetryDecision {
        if !classification.retryable {
            return RetryDecision::stop();
        }
        if crisis_mode && self.config.crisis_override {
            return RetryDecision::stop();
        }
        if attempt >= self.config.max_attempts {
            return RetryDecision::stop();
        }

        RetryDecision { should_retry: true, delay: self.delay_for(attempt) }
    }

    /// Delay before the attempt following failed attempt number `attempt`.
    ///
    /// `min(max_delay, initial_delay * multiplier^(attempt-1)) + jitter`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let base_ms = self.config.initial_delay.as_millis() as f64;
        let scaled = base_ms * self.config.backoff_multiplier.powi(exponent as i32);
        let capped = scaled.min(self.config.max_delay.as_millis() as f64) as u64;

        Duration::from_millis(capped) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let bound = self.config.jitter_max.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=bound))
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the retry decision table.
    use super::*;
    use crate::error::{ErrorCategory, ErrorSeverity};

    fn retryable() -> Classification {
        Classification::new(ErrorCategory::Network, ErrorSeverity::Medium, true)
    }

    fn terminal() -> Classification {
        Classification::new(ErrorCategory::Security, ErrorSeverity::High, false)
    }

    fn policy_without_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryPolicyConfig::builder()
                .max_attempts(max_attempts)
                .initial_delay(Duration::from_millis(100))
                .max_delay(Duration::from_secs(5))
                .jitter_max(Duration::ZERO)
                .build()
                .unwrap(),
        )
        .unwrap()
    }

    /// Validates `RetryPolicyConfig::validate` behavior for the invalid config
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures zero attempts, inverted delays and sub-unit multipliers are
    ///   rejected.
    #[test]
    fn test_config_validation() {
        assert!(RetryPolicyConfig::builder().max_attempts(0).build().is_err());
        assert!(RetryPolicyConfig::builder()
            .initial_delay(Duration::from_secs(60))
            .max_delay(Duration::from_secs(1))
            .build()
            .is_err());
        assert!(RetryPolicyConfig::builder().backoff_multiplier(0.5).build().is_err());
        assert!(RetryPolicyConfig::builder().build().is_ok());
    }

    /// Validates `RetryPolicy::decide` behavior for the retryable budget
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures attempts 1 and 2 retry, attempt 3 stops.
    #[test]
    fn test_decide_respects_attempt_budget() {
        let policy = policy_without_jitter(3);

        assert!(policy.decide(&retryable(), 1, false).should_retry);
        assert!(policy.decide(&retryable(), 2, false).should_retry);
        assert!(!policy.decide(&retryable(), 3, false).should_retry);
    }

    /// Validates `RetryPolicy::decide` behavior for the non-retryable
    /// classification scenario.
    ///
    /// Assertions:
    /// - Ensures `!decision.should_retry` evaluates to true even with budget
    ///   remaining.
    #[test]
    fn test_decide_stops_on_terminal_classification() {
        let policy = policy_without_jitter(5);
        let decision = policy.decide(&terminal(), 1, false);
        assert!(!decision.should_retry);
        assert_eq!(decision.delay, Duration::ZERO);
    }

    /// Validates crisis override: a crisis caller never waits out the ladder.
    ///
    /// Assertions:
    /// - Ensures crisis mode stops after the single best-effort attempt.
    /// - Ensures crisis mode retries normally when the override is disabled.
    #[test]
    fn test_decide_crisis_override_shortcut() {
        let policy = policy_without_jitter(5);
        assert!(!policy.decide(&retryable(), 1, true).should_retry);

        let no_override = RetryPolicy::new(
            RetryPolicyConfig::builder()
                .max_attempts(5)
                .jitter_max(Duration::ZERO)
                .crisis_override(false)
                .build()
                .unwrap(),
        )
        .unwrap();
        assert!(no_override.decide(&retryable(), 1, true).should_retry);
    }

    /// Tests backoff monotonicity with jitter disabled.
    ///
    /// Verifies:
    /// - Successive delays are non-decreasing
    /// - Delays never exceed max_delay
    #[test]
    fn test_backoff_monotonic_up_to_cap() {
        let policy = policy_without_jitter(10);

        let mut previous = Duration::ZERO;
        for attempt in 1..=10 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "delay must not decrease at attempt {attempt}");
            assert!(delay <= Duration::from_secs(5));
            previous = delay;
        }
    }

    /// Validates the exponential ladder values with jitter disabled.
    ///
    /// Assertions:
    /// - Confirms `delay_for(1)` equals `100ms`.
    /// - Confirms `delay_for(2)` equals `200ms`.
    /// - Confirms `delay_for(3)` equals `400ms`.
    #[test]
    fn test_backoff_ladder_values() {
        let policy = policy_without_jitter(10);

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    /// Tests jitter bounds.
    ///
    /// Verifies:
    /// - Every jittered delay stays within base + jitter_max
    #[test]
    fn test_jitter_within_bound() {
        let policy = RetryPolicy::new(
            RetryPolicyConfig::builder()
                .initial_delay(Duration::from_millis(100))
                .jitter_max(Duration::from_millis(50))
                .build()
                .unwrap(),
        )
        .unwrap();

        for _ in 0..20 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }
}
