use crate::alert::{Alert, Alerter, Severity};
use crate::health::Health;
use miette::Diagnostic;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// `delay_n = base * 2^n`, uncapped: the setup policy is meant to keep
/// backing off until an operator intervenes.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX))
}

/// Setup errors (auth, permissions, unknown database/schema/table): retried
/// forever with exponential backoff, alerting at every attempt boundary.
/// Never gives up on its own; only cancellation stops it.
#[derive(Debug, Clone)]
pub struct SetupRetryPolicy {
    pub base_delay: Duration,
}

impl SetupRetryPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    pub async fn run<F, Fut, T, E>(
        &self,
        health: &Health,
        alerter: &Arc<dyn Alerter>,
        mut action: F,
    ) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match action().await {
                Ok(value) => {
                    health.set_healthy();
                    return value;
                }
                Err(err) => {
                    health.set_unhealthy(err.to_string());
                    alerter
                        .send(Alert {
                            message: err.to_string(),
                            severity: Severity::Error,
                            attempt,
                        })
                        .await;
                    sleep(backoff_delay(self.base_delay, attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Transient errors (network/server-side): bounded retries, no alerting.
/// Exhaustion surfaces the last error to the caller, who turns it fatal.
#[derive(Debug, Clone)]
pub struct TransientRetryPolicy {
    pub base_delay: Duration,
    pub max_attempts: usize,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("transient retry attempts exhausted")]
pub struct AttemptsExhausted<E>(pub E);

impl TransientRetryPolicy {
    pub fn new(base_delay: Duration, max_attempts: usize) -> Self {
        Self {
            base_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn run<F, Fut, T, E>(
        &self,
        health: &Health,
        mut action: F,
    ) -> Result<T, AttemptsExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match action().await {
                Ok(value) => {
                    health.set_healthy();
                    return Ok(value);
                }
                Err(err) => {
                    health.set_unhealthy(err.to_string());
                    if (attempt as usize) + 1 >= self.max_attempts {
                        return Err(AttemptsExhausted(err));
                    }
                    sleep(backoff_delay(self.base_delay, attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::NullAlerter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn backoff_doubles_each_attempt() {
        let base = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(30));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn setup_retry_never_gives_up_until_success() {
        let health = Health::new();
        let alerter: Arc<dyn Alerter> = Arc::new(NullAlerter);
        let attempts = Arc::new(AtomicUsize::new(0));

        let policy = SetupRetryPolicy::new(Duration::from_millis(0));
        let result = policy
            .run(&health, &alerter, || {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 3 {
                        Err::<(), _>("not yet")
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(result, ());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(health.probe().is_healthy());
    }

    #[tokio::test]
    async fn transient_retry_exhausts_and_surfaces_last_error() {
        let health = Health::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let policy = TransientRetryPolicy::new(Duration::from_millis(0), 3);
        let result = policy
            .run(&health, || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("still failing")
                }
            })
            .await;

        assert!(matches!(result, Err(AttemptsExhausted("still failing"))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(!health.probe().is_healthy());
    }

    #[tokio::test]
    async fn successful_retry_is_a_noop_on_health_churn() {
        let health = Health::new();
        health.set_healthy();

        let policy = TransientRetryPolicy::new(Duration::from_millis(0), 5);
        let result: Result<_, AttemptsExhausted<&str>> =
            policy.run(&health, || async { Ok::<_, &str>(42) }).await;

        assert_eq!(result.unwrap(), 42);
        assert!(health.probe().is_healthy());
    }

    struct TimestampingAlerter {
        start: tokio::time::Instant,
        seen_at_secs: std::sync::Mutex<Vec<u64>>,
    }

    #[async_trait::async_trait]
    impl Alerter for TimestampingAlerter {
        async fn send(&self, _alert: Alert) {
            let elapsed = tokio::time::Instant::now().duration_since(self.start).as_secs();
            self.seen_at_secs.lock().unwrap().push(elapsed);
        }
    }

    // A channel opener that always throws, with
    // setup delay=30s, alerts at t=0, 30, 90, 210 seconds.
    #[tokio::test(start_paused = true)]
    async fn scenario_7_alert_schedule_is_exponential() {
        let health = Health::new();
        let alerter = Arc::new(TimestampingAlerter {
            start: tokio::time::Instant::now(),
            seen_at_secs: std::sync::Mutex::new(Vec::new()),
        });
        let alerter_dyn: Arc<dyn Alerter> = alerter.clone();

        let policy = SetupRetryPolicy::new(Duration::from_secs(30));
        let attempts = Arc::new(AtomicUsize::new(0));

        policy
            .run(&health, &alerter_dyn, || {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 4 {
                        Err::<(), _>("warehouse unreachable")
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(
            *alerter.seen_at_secs.lock().unwrap(),
            vec![0, 30, 90, 210]
        );
        assert!(health.probe().is_healthy());
    }
}
