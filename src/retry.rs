//! Retry with exponential backoff, and bidirectional recovery planning
//!
//! Retrying is always the **caller's** decision: the communication bus makes
//! exactly one delivery attempt per call, and callers opt in to retries by
//! wrapping the call with [`with_retry`]. For agent-to-agent exchanges where
//! a plain retry is not always the right move, [`RecoveryPlanner`] consults a
//! decision table keyed by error code and attempt count.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{ErrorCode, OrchestratorError, Result};

/// Tracks attempts and computes backoff delays for one retried operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    attempt: usize,
    next_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            next_delay: config.initial_delay,
            config,
            attempt: 0,
        }
    }

    pub fn should_retry(&self) -> bool {
        self.attempt < self.config.max_retries
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Consume the current delay and advance the exponential schedule,
    /// capped at `max_delay`.
    pub fn next_delay(&mut self) -> Duration {
        let mut delay = self.next_delay;

        if self.config.jitter {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0.0..0.3);
            let jitter_ms = (delay.as_millis() as f64 * jitter) as u64;
            delay += Duration::from_millis(jitter_ms);
        }

        self.attempt += 1;
        self.next_delay = Duration::from_secs_f32(
            (self.next_delay.as_secs_f32() * self.config.backoff_multiplier)
                .min(self.config.max_delay.as_secs_f32()),
        );

        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_delay = self.config.initial_delay;
    }
}

/// Retry an async operation with exponential backoff.
///
/// Errors are classified through [`ErrorCode::retryable`]; a non-retryable
/// error propagates immediately without consuming an attempt.
pub async fn with_retry<F, Fut, T>(operation: F, config: RetryConfig) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(operation, config, |err| err.code().retryable()).await
}

/// Retry with a caller-supplied classifier deciding which errors are
/// transient.
pub async fn with_retry_if<F, Fut, T, C>(
    mut operation: F,
    config: RetryConfig,
    should_retry: C,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&OrchestratorError) -> bool,
{
    let mut policy = RetryPolicy::new(config);
    loop {
        match operation().await {
            Ok(result) => {
                if policy.attempt() > 0 {
                    debug!("Operation succeeded after {} attempts", policy.attempt() + 1);
                }
                return Ok(result);
            }
            Err(error) => {
                if !should_retry(&error) {
                    debug!("Non-retryable error: {}", error);
                    return Err(error);
                }

                if !policy.should_retry() {
                    warn!(
                        "Max retries ({}) exceeded. Last error: {}",
                        policy.config.max_retries, error
                    );
                    return Err(error);
                }

                let delay = policy.next_delay();
                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    policy.attempt(),
                    error,
                    delay
                );

                sleep(delay).await;
            }
        }
    }
}

/// What to do next after a failed agent-to-agent exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Retry the same route after the given delay
    Retry { delay: Duration },
    /// Give up on this route and try a fallback route instead
    Fallback,
    /// Hand the failure up to a human or a supervising component
    Escalate,
    /// Stop; the failure is final
    Abort,
}

/// Decision table for bidirectional agent-to-agent recovery.
///
/// Unlike [`with_retry`], which only ever repeats the same call, the planner
/// can steer toward a different route or an escalation. The table:
///
/// | code | attempts 1..=2 | after |
/// |---|---|---|
/// | `TIMEOUT_ERROR`, `NETWORK_ERROR`, `EXTERNAL_API_FAILURE`, `DATABASE_ERROR` | retry with backoff | escalate |
/// | `AGENT_UNAVAILABLE` | retry once, then fallback route | fallback |
/// | `UNKNOWN_TASK` | fallback route immediately | abort |
/// | `RATE_LIMITED` | retry after the window | escalate |
/// | everything else | abort | abort |
///
/// Callers dispatching to side-effecting agents must only retry operations
/// designed idempotent (e.g. booking guarded by an idempotency key); the
/// planner cannot know which handlers commit side effects.
#[derive(Debug, Clone)]
pub struct RecoveryPlanner {
    retry_config: RetryConfig,
}

impl RecoveryPlanner {
    pub fn new(retry_config: RetryConfig) -> Self {
        Self { retry_config }
    }

    /// Decide the next action after `attempt` failures (1-based) with `code`.
    pub fn plan(&self, code: ErrorCode, attempt: usize) -> RecoveryAction {
        let max = self.retry_config.max_retries.max(2);
        match code {
            ErrorCode::TimeoutError
            | ErrorCode::NetworkError
            | ErrorCode::ExternalApiFailure
            | ErrorCode::DatabaseError => {
                if attempt <= max {
                    RecoveryAction::Retry {
                        delay: self.delay_for(attempt),
                    }
                } else {
                    RecoveryAction::Escalate
                }
            }
            ErrorCode::AgentUnavailable => {
                if attempt < 2 {
                    RecoveryAction::Retry {
                        delay: self.delay_for(attempt),
                    }
                } else {
                    RecoveryAction::Fallback
                }
            }
            ErrorCode::UnknownTask => {
                if attempt < 2 {
                    RecoveryAction::Fallback
                } else {
                    RecoveryAction::Abort
                }
            }
            ErrorCode::RateLimited => {
                if attempt <= max {
                    RecoveryAction::Retry {
                        delay: self.retry_config.max_delay,
                    }
                } else {
                    RecoveryAction::Escalate
                }
            }
            _ => RecoveryAction::Abort,
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let factor = self
            .retry_config
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f32(
            (self.retry_config.initial_delay.as_secs_f32() * factor)
                .min(self.retry_config.max_delay.as_secs_f32()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: usize) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn backoff_schedule_is_exponential_and_capped() {
        let mut policy = RetryPolicy::new(RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            backoff_multiplier: 2.0,
            jitter: false,
        });
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
        assert_eq!(policy.next_delay(), Duration::from_millis(200));
        assert_eq!(policy.next_delay(), Duration::from_millis(300));
        assert_eq!(policy.next_delay(), Duration::from_millis(300));
        policy.reset();
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let result = with_retry(
            move || {
                let counter = counter_clone.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(OrchestratorError::Timeout { timeout_ms: 5 })
                    } else {
                        Ok(42)
                    }
                }
            },
            fast_config(5),
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_propagate_without_consuming_attempts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let result: Result<()> = with_retry(
            move || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OrchestratorError::agent(
                        ErrorCode::PermissionDenied,
                        "not allowed",
                    ))
                }
            },
            fast_config(5),
        )
        .await;
        assert!(matches!(
            result,
            Err(OrchestratorError::Agent {
                code: ErrorCode::PermissionDenied,
                ..
            })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn max_retries_exhausts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let result: Result<()> = with_retry(
            move || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OrchestratorError::agent(ErrorCode::NetworkError, "down"))
                }
            },
            fast_config(2),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[test]
    fn planner_routes_unavailable_to_fallback_after_two_attempts() {
        let planner = RecoveryPlanner::new(fast_config(3));
        assert!(matches!(
            planner.plan(ErrorCode::AgentUnavailable, 1),
            RecoveryAction::Retry { .. }
        ));
        assert_eq!(
            planner.plan(ErrorCode::AgentUnavailable, 2),
            RecoveryAction::Fallback
        );
    }

    #[test]
    fn planner_aborts_on_contract_violations() {
        let planner = RecoveryPlanner::new(fast_config(3));
        assert_eq!(planner.plan(ErrorCode::InvalidInput, 1), RecoveryAction::Abort);
        assert_eq!(
            planner.plan(ErrorCode::BusinessRuleViolation, 1),
            RecoveryAction::Abort
        );
    }

    #[test]
    fn planner_escalates_exhausted_transients() {
        let planner = RecoveryPlanner::new(fast_config(2));
        assert!(matches!(
            planner.plan(ErrorCode::TimeoutError, 1),
            RecoveryAction::Retry { .. }
        ));
        assert_eq!(
            planner.plan(ErrorCode::TimeoutError, 3),
            RecoveryAction::Escalate
        );
    }

    #[test]
    fn planner_tries_fallback_route_for_unknown_task() {
        let planner = RecoveryPlanner::new(fast_config(3));
        assert_eq!(planner.plan(ErrorCode::UnknownTask, 1), RecoveryAction::Fallback);
        assert_eq!(planner.plan(ErrorCode::UnknownTask, 2), RecoveryAction::Abort);
    }
}
