use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::producer::ProducerError;
use crate::validation::ResponseError;

/// Cooperative stop signal shared by the generators.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    rx: Option<watch::Receiver<bool>>,
}

impl Shutdown {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    /// Fires on the first Ctrl+C. Must be called inside a tokio runtime.
    pub fn on_ctrl_c() -> Self {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl+C received, finishing current verse");
                let _ = tx.send(true);
            }
        });
        Self::new(rx)
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Sleeps for `duration`. Returns `false` if the signal fired first.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }

        let deadline = Instant::now() + duration;
        let Some(rx) = self.rx.as_mut() else {
            tokio::time::sleep_until(deadline).await;
            return true;
        };

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                changed = rx.changed() => {
                    if changed.is_err() {
                        // sender gone; nobody can cancel us any more
                        tokio::time::sleep_until(deadline).await;
                        return true;
                    }
                    if *rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }
}

/// Bounded exponential backoff around one producer request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
        }
    }
}

impl RetryPolicy {
    /// Total attempts; zero retries still means one attempt.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Sleep after failed attempt number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Calls the producer until `parse` accepts a response, a fatal producer
    /// error occurs, attempts run out, or `shutdown` fires during a backoff.
    pub async fn run<T, C, Fut, P>(
        &self,
        label: &str,
        mut call: C,
        mut parse: P,
        shutdown: &mut Shutdown,
    ) -> Option<T>
    where
        C: FnMut() -> Fut,
        Fut: Future<Output = Result<String, ProducerError>>,
        P: FnMut(&str) -> Result<T, ResponseError>,
    {
        let attempts = self.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match call().await {
                Ok(raw) => match parse(&raw) {
                    Ok(parsed) => return Some(parsed),
                    Err(err) => last_error = err.to_string(),
                },
                Err(err) if err.is_retryable() => last_error = err.to_string(),
                Err(err) => {
                    tracing::warn!(label, error = %err, "producer call failed, not retrying");
                    return None;
                }
            }

            if attempt + 1 == attempts {
                break;
            }

            let delay = self.delay_for(attempt);
            tracing::info!(
                label,
                attempt = attempt + 1,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "retrying producer call"
            );
            if !shutdown.sleep(delay).await {
                tracing::info!(label, "shutdown requested during backoff");
                return None;
            }
        }

        tracing::warn!(label, attempts, error = %last_error, "giving up after retries");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }

    fn parse_number(raw: &str) -> Result<u32, ResponseError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        value
            .get("n")
            .and_then(|n| n.as_u64())
            .map(|n| n as u32)
            .ok_or_else(|| ResponseError::Invalid("missing n".to_string()))
    }

    #[test]
    fn delays_double() {
        let policy = policy();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(
            RetryPolicy {
                max_retries: 0,
                base_delay: Duration::ZERO
            }
            .attempts(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn two_malformed_then_valid_sleeps_one_then_two_bases() {
        let responses = ["{broken", r#"{"m": 1}"#, r#"{"n": 7}"#];
        let calls = Cell::new(0usize);
        let started = Instant::now();

        let result = policy()
            .run(
                "test",
                || {
                    let idx = calls.get();
                    calls.set(idx + 1);
                    async move { Ok(responses[idx].to_string()) }
                },
                parse_number,
                &mut Shutdown::never(),
            )
            .await;

        assert_eq!(result, Some(7));
        assert_eq!(calls.get(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_stops_immediately() {
        let calls = Cell::new(0usize);
        let started = Instant::now();

        let result: Option<u32> = policy()
            .run(
                "test",
                || {
                    calls.set(calls.get() + 1);
                    async {
                        Err(ProducerError::Status {
                            status: 401,
                            body: "invalid api key".to_string(),
                        })
                    }
                },
                parse_number,
                &mut Shutdown::never(),
            )
            .await;

        assert_eq!(result, None);
        assert_eq!(calls.get(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_does_not_sleep_after_last_attempt() {
        let calls = Cell::new(0usize);
        let started = Instant::now();

        let result: Option<u32> = policy()
            .run(
                "test",
                || {
                    calls.set(calls.get() + 1);
                    async {
                        Err(ProducerError::Status {
                            status: 503,
                            body: "overloaded".to_string(),
                        })
                    }
                },
                parse_number,
                &mut Shutdown::never(),
            )
            .await;

        assert_eq!(result, None);
        assert_eq!(calls.get(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let (tx, rx) = watch::channel(false);
        let mut shutdown = Shutdown::new(rx);
        let calls = Cell::new(0usize);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = tx.send(true);
        });

        let started = Instant::now();
        let result: Option<u32> = policy()
            .run(
                "test",
                || {
                    calls.set(calls.get() + 1);
                    async { Ok("nope".to_string()) }
                },
                parse_number,
                &mut shutdown,
            )
            .await;

        assert_eq!(result, None);
        assert_eq!(calls.get(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_lets_sleep_finish() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let mut shutdown = Shutdown::new(rx);
        assert!(shutdown.sleep(Duration::from_millis(200)).await);
    }
}
