//! Circuit breaker pattern for enrichment-collaborator resilience.
//!
//! Prevents cascading failures when external collaborators (text analysis,
//! image text extraction, scraping) experience issues.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures in window]--> OPEN (rejecting) --[timeout]--> HALF_OPEN (probing)
//!                                                                                   |
//!                                         <--[failure]--                            |
//!                                                                                   |
//! CLOSED <-----------------------------[success threshold]-------------------------+
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::AppError;

/// Capacity of the bounded failure-timestamp window.
const FAILURE_WINDOW_CAPACITY: usize = 100;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
    /// Circuit is half-open - limited trial requests allowed to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures within `window` before opening the circuit.
    pub failure_threshold: u32,

    /// Number of successful trial requests in half-open state to close
    /// the circuit.
    pub success_threshold: u32,

    /// Time to wait before transitioning from Open to Half-Open.
    pub recovery_timeout: Duration,

    /// Maximum concurrent trial calls admitted per half-open episode.
    pub half_open_max_calls: u32,

    /// Sliding window over which failures are counted.
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            window: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Preset for dependencies that fail routinely and recover slowly
    /// (e.g. the scraping collaborator hitting flaky upstream sites).
    pub fn high_tolerance() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(120),
            ..Self::default()
        }
    }
}

/// Internal state tracking for the circuit breaker.
#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    failure_times: VecDeque<Instant>,
    last_failure_time: Option<Instant>,
    last_state_change: Instant,
    last_error_message: Option<String>,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_calls: 0,
            failure_times: VecDeque::with_capacity(FAILURE_WINDOW_CAPACITY),
            last_failure_time: None,
            last_state_change: Instant::now(),
            last_error_message: None,
        }
    }
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub recent_failures: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Error type for circuit breaker operations.
#[derive(Debug)]
pub enum CircuitBreakerError {
    /// Circuit is open - request was rejected without calling the dependency.
    Open { name: String, retry_after: Duration },
    /// The inner operation failed.
    Inner(AppError),
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::Open { name, retry_after } => {
                write!(
                    f,
                    "Circuit breaker '{}' is open. Retry after {} seconds.",
                    name,
                    retry_after.as_secs()
                )
            }
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

impl From<CircuitBreakerError> for AppError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::Open { name, retry_after } => AppError::NetworkError(format!(
                "dependency '{}' unavailable, retry after {}s",
                name,
                retry_after.as_secs()
            )),
            CircuitBreakerError::Inner(e) => e,
        }
    }
}

/// Thread-safe circuit breaker protecting one named dependency.
///
/// Cloning shares the underlying state: one instance per dependency is
/// created at process start and shared across all jobs a worker handles.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(CircuitBreakerInner::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, handling lazy Open → HalfOpen transitions.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// Decide whether a call may proceed, counting it as a trial call when
    /// the circuit is half-open.
    ///
    /// - Closed: always true.
    /// - Open: true only once `recovery_timeout` has elapsed since the last
    ///   failure, transitioning to HalfOpen as a side effect.
    /// - HalfOpen: true while fewer than `half_open_max_calls` trial calls
    ///   have been admitted in the current half-open episode.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        let time_until_half_open = if inner.state == CircuitState::Open {
            inner
                .last_failure_time
                .map(|t| self.config.recovery_timeout.saturating_sub(t.elapsed()))
        } else {
            None
        };
        let recent_failures = Self::count_recent_failures(&mut inner, self.config.window);

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            recent_failures,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// - Closed: executes operation, tracks success/failure
    /// - Open: returns `CircuitBreakerError::Open` immediately
    /// - HalfOpen: executes as a trial call, transitions based on result
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        if !self.can_execute() {
            let retry_after = {
                let inner = self.lock_inner();
                inner
                    .last_failure_time
                    .map(|t| self.config.recovery_timeout.saturating_sub(t.elapsed()))
                    .unwrap_or(self.config.recovery_timeout)
            };
            tracing::warn!(circuit = %self.name, "Circuit breaker rejected call");
            return Err(CircuitBreakerError::Open {
                name: self.name.clone(),
                retry_after,
            });
        }

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success(),
            Err(e) => {
                if e.should_trip_circuit() {
                    self.record_failure(e);
                } else {
                    self.refund_trial_call();
                }
            }
        }

        result.map_err(CircuitBreakerError::Inner)
    }

    /// Like [`call`](Self::call), but substitutes the fallback value when
    /// the circuit is open or the operation fails.
    ///
    /// A substituted fallback is a degraded-but-successful outcome: callers
    /// must not count it as an item failure.
    pub async fn call_with_fallback<F, T, Fut, FB>(&self, operation: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
        FB: FnOnce() -> T,
    {
        match self.call(operation).await {
            Ok(value) => value,
            Err(CircuitBreakerError::Open { name, retry_after }) => {
                tracing::warn!(
                    circuit = %name,
                    retry_after_secs = retry_after.as_secs(),
                    "Substituting fallback value (circuit open)"
                );
                fallback()
            }
            Err(CircuitBreakerError::Inner(e)) => {
                tracing::warn!(circuit = %self.name, error = %e, "Substituting fallback value");
                fallback()
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(
                        circuit = %self.name,
                        "Circuit breaker closing after {} successful probes",
                        inner.success_count
                    );
                    self.transition_to(&mut inner, CircuitState::Closed);
                    inner.last_error_message = None;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock_inner();

        let now = Instant::now();
        if inner.failure_times.len() == FAILURE_WINDOW_CAPACITY {
            inner.failure_times.pop_front();
        }
        inner.failure_times.push_back(now);
        inner.last_failure_time = Some(now);
        inner.failure_count += 1;
        inner.last_error_message = Some(error.to_string());

        match inner.state {
            CircuitState::HalfOpen => {
                // Any failure during probing goes straight back to open.
                tracing::warn!(
                    circuit = %self.name,
                    error = %error,
                    "Circuit breaker probe failed, returning to open state"
                );
                self.transition_to(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed => {
                let recent = Self::count_recent_failures(&mut inner, self.config.window);
                if recent >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures_in_window = recent,
                        error = %error,
                        "Circuit breaker opening"
                    );
                    self.transition_to(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Returns a half-open trial slot consumed by a call whose error says
    /// nothing about dependency health. Without the refund, enough such
    /// errors would exhaust `half_open_max_calls` and strand the circuit
    /// in half-open.
    fn refund_trial_call(&self) {
        let mut inner = self.lock_inner();
        if inner.state == CircuitState::HalfOpen && inner.half_open_calls > 0 {
            inner.half_open_calls -= 1;
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
        self.transition_to(&mut inner, CircuitState::Closed);
        inner.failure_times.clear();
        inner.last_failure_time = None;
        inner.last_error_message = None;
    }

    /// Drop failure timestamps older than the sliding window, return the
    /// count of those remaining.
    fn count_recent_failures(inner: &mut CircuitBreakerInner, window: Duration) -> u32 {
        let now = Instant::now();
        while let Some(&oldest) = inner.failure_times.front() {
            if now.duration_since(oldest) > window {
                inner.failure_times.pop_front();
            } else {
                break;
            }
        }
        inner.failure_times.len() as u32
    }

    fn transition_to(&self, inner: &mut CircuitBreakerInner, new_state: CircuitState) {
        let old_state = inner.state;
        inner.state = new_state;
        inner.last_state_change = Instant::now();

        match new_state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_calls = 0;
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }

        if old_state != new_state {
            tracing::info!(
                circuit = %self.name,
                from = %old_state,
                to = %new_state,
                "Circuit breaker state change"
            );
        }
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(last_failure) = inner.last_failure_time
            && last_failure.elapsed() >= self.config.recovery_timeout
        {
            self.transition_to(inner, CircuitState::HalfOpen);
        }
    }
}

/// One breaker per external dependency, constructed once at process start
/// and passed to the orchestrator by reference (no global registry).
#[derive(Clone)]
pub struct CircuitRegistry {
    text_analysis: CircuitBreaker,
    text_extraction: CircuitBreaker,
    scraper: CircuitBreaker,
}

impl CircuitRegistry {
    /// Registry with the defaults each collaborator is specified to use:
    /// analysis and extraction at 5 failures / 60s recovery, the scraper at
    /// 10 failures / 120s recovery.
    pub fn new() -> Self {
        Self {
            text_analysis: CircuitBreaker::new("text_analysis", CircuitBreakerConfig::default()),
            text_extraction: CircuitBreaker::new(
                "text_extraction",
                CircuitBreakerConfig::default(),
            ),
            scraper: CircuitBreaker::new("scraper", CircuitBreakerConfig::high_tolerance()),
        }
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            text_analysis: CircuitBreaker::new("text_analysis", config.clone()),
            text_extraction: CircuitBreaker::new("text_extraction", config.clone()),
            scraper: CircuitBreaker::new("scraper", config),
        }
    }

    pub fn text_analysis(&self) -> &CircuitBreaker {
        &self.text_analysis
    }

    pub fn text_extraction(&self) -> &CircuitBreaker {
        &self.text_extraction
    }

    pub fn scraper(&self) -> &CircuitBreaker {
        &self.scraper
    }

    /// Snapshot of all breakers for monitoring.
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        vec![
            self.text_analysis.stats(),
            self.text_extraction.stats(),
            self.scraper.stats(),
        ]
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new()
    }
}
