//! Circuit breaker guarding the remote sync dependency.
//!
//! Failures are counted in a sliding window; crossing the threshold trips
//! the breaker OPEN and short-circuits calls until a recovery timeout
//! elapses, after which a bounded number of HALF_OPEN probes decide between
//! closing again and re-opening. Crisis-exempt requests are routed around
//! the breaker entirely: they never observe OPEN.
//!
//! State transitions are serialized behind a single `RwLock`; the lock is
//! never held across an await point, so crisis traffic cannot be blocked by
//! a retry loop sleeping through its backoff.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{SyncError, SyncResult};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through; failures are counted in the sliding window.
    Closed,
    /// Calls short-circuit; a timer governs the return to half-open.
    Open,
    /// A bounded number of probe calls are allowed through.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Windowed failures required to trip OPEN.
    pub failure_threshold: u32,
    /// Time spent OPEN before probing.
    pub recovery_timeout: Duration,
    /// Probe calls admitted while HALF_OPEN.
    pub half_open_max_calls: u32,
    /// Consecutive probe successes required to close.
    pub success_threshold: u32,
    /// Sliding window for failure counting.
    pub monitoring_window: Duration,
    /// Whether crisis requests bypass the breaker.
    pub crisis_exempt: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            success_threshold: 2,
            monitoring_window: Duration::from_secs(120),
            crisis_exempt: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.failure_threshold == 0 {
            return Err(SyncError::config("failure_threshold must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(SyncError::config("success_threshold must be greater than 0"));
        }
        if self.half_open_max_calls == 0 {
            return Err(SyncError::config("half_open_max_calls must be greater than 0"));
        }
        if self.monitoring_window.is_zero() {
            return Err(SyncError::config("monitoring_window must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for `CircuitBreakerConfig`.
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn monitoring_window(mut self, window: Duration) -> Self {
        self.config.monitoring_window = window;
        self
    }

    pub fn crisis_exempt(mut self, exempt: bool) -> Self {
        self.config.crisis_exempt = exempt;
        self
    }

    pub fn build(self) -> SyncResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Read-only breaker view for statistics and health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub windowed_failures: u32,
    pub success_streak: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    /// Millis since the breaker last tripped open, if it ever did.
    pub open_for_ms: Option<u64>,
}

/// Callback invoked on every state transition (old, new).
pub type TransitionWatcher = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

struct BreakerState {
    state: CircuitState,
    failures: VecDeque<Instant>,
    success_streak: u32,
    half_open_calls: u32,
    opened_at: Option<Instant>,
}

/// Sliding-window circuit breaker.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerState>,
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
    clock: Arc<C>,
    watcher: Option<TransitionWatcher>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("total_calls", &self.total_calls.load(Ordering::Acquire))
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker with the system clock.
    pub fn new(config: CircuitBreakerConfig) -> SyncResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> SyncResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                success_streak: 0,
                half_open_calls: 0,
                opened_at: None,
            }),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            clock: Arc::new(clock),
            watcher: None,
        })
    }

    /// Register a state-change watcher for observability.
    pub fn with_watcher(mut self, watcher: TransitionWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Check whether a call may proceed.
    ///
    /// Crisis-exempt requests always pass when the configuration allows it;
    /// they are not counted against the half-open probe budget either, so a
    /// burst of crisis traffic cannot exhaust the probes.
    pub fn allow(&self, crisis: bool) -> bool {
        if crisis && self.config.crisis_exempt {
            return true;
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();

        let mut inner = self.write_inner();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| now.duration_since(at));
                if elapsed.is_some_and(|e| e >= self.config.recovery_timeout) {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_calls = 1;
                    inner.success_streak = 0;
                    true
                } else {
                    self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    debug!(state = %CircuitState::Open, "circuit breaker rejecting call");
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.write_inner();
        self.prune_window(&mut inner, now);

        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.success_streak += 1;
                if inner.success_streak >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.failures.clear();
                    inner.opened_at = None;
                    info!(streak = inner.success_streak, "circuit breaker closed after probes");
                }
            }
            CircuitState::Open => {
                // Late completion of a call admitted before the trip.
                debug!("success recorded while circuit open");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.write_inner();
        inner.failures.push_back(now);
        self.prune_window(&mut inner, now);

        match inner.state {
            CircuitState::Closed => {
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                    inner.opened_at = Some(now);
                    warn!(
                        failures = inner.failures.len(),
                        window = ?self.config.monitoring_window,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure re-opens immediately.
                self.transition(&mut inner, CircuitState::Open);
                inner.opened_at = Some(now);
                inner.success_streak = 0;
                warn!("circuit breaker re-opened by half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.read_inner().state
    }

    /// Get a read-only snapshot for statistics; never mutates state.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let inner = self.read_inner();
        let windowed = inner
            .failures
            .iter()
            .filter(|at| now.duration_since(**at) <= self.config.monitoring_window)
            .count() as u32;

        BreakerSnapshot {
            state: inner.state,
            windowed_failures: windowed,
            success_streak: inner.success_streak,
            total_calls: self.total_calls.load(Ordering::Acquire),
            rejected_calls: self.rejected_calls.load(Ordering::Acquire),
            open_for_ms: inner.opened_at.map(|at| now.duration_since(at).as_millis() as u64),
        }
    }

    /// Force the breaker back to closed (operational override).
    pub fn reset(&self) {
        let mut inner = self.write_inner();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        inner.failures.clear();
        inner.success_streak = 0;
        inner.half_open_calls = 0;
        inner.opened_at = None;
        info!("circuit breaker manually reset");
    }

    /// Suggested wait before the breaker will probe again.
    pub fn retry_after(&self) -> Option<Duration> {
        let now = self.clock.now();
        let inner = self.read_inner();
        match inner.state {
            CircuitState::Open => inner.opened_at.map(|at| {
                self.config.recovery_timeout.saturating_sub(now.duration_since(at))
            }),
            _ => None,
        }
    }

    fn prune_window(&self, inner: &mut BreakerState, now: Instant) {
        while let Some(front) = inner.failures.front() {
            if now.duration_since(*front) > self.config.monitoring_window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        debug!(from = %from, to = %to, "circuit breaker transition");
        if let Some(watcher) = &self.watcher {
            watcher(from, to);
        }
    }

    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, BreakerState> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned");
                poisoned.into_inner()
            }
        }
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, BreakerState> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}
