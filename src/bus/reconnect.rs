//! Bounded exponential backoff for resubscribing after a lost bus.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

use super::{Bus, Subscription, TransportError};
use crate::config::ReconnectSettings;

/// Doubling delay, capped at `max`, optionally limited to `max_attempts`
/// consecutive failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: Option<u32>,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            initial,
            max: max.max(initial),
            max_attempts,
            attempt: 0,
        }
    }

    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.initial_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
            settings.max_attempts,
        )
    }

    /// Delay before the next attempt, or `None` once attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// Delay before retry number `attempt` (zero-based), ignoring the budget.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Forget past failures after the bus proved healthy again.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Sleep for the next delay.
    ///
    /// `Ok(false)` if shutdown was requested while waiting,
    /// `Err(Exhausted)` once the attempt budget is spent.
    pub async fn wait(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<bool, TransportError> {
        let delay = self.next_delay().ok_or(TransportError::Exhausted {
            attempts: self.attempt,
        })?;

        tracing::info!(
            component = "bus",
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "Waiting before resubscribing"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(true),
            _ = wait_for_shutdown(shutdown) => Ok(false),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_settings(&ReconnectSettings::default())
    }
}

/// Resolve once shutdown is requested. Never resolves if the sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Retry `attempt` with backoff until it succeeds.
///
/// `Ok(None)` means shutdown was requested first; `Err(Exhausted)` means the
/// attempt budget ran out.
pub async fn retry_with_backoff<T, F, Fut>(
    what: &str,
    backoff: &mut Backoff,
    shutdown: &mut watch::Receiver<bool>,
    mut attempt: F,
) -> Result<Option<T>, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    loop {
        if *shutdown.borrow() {
            return Ok(None);
        }
        match attempt().await {
            Ok(value) => return Ok(Some(value)),
            Err(e) => {
                tracing::warn!(component = "bus", error = %e, "{} failed", what);
                if !backoff.wait(shutdown).await? {
                    return Ok(None);
                }
            }
        }
    }
}

/// Subscribe, retrying with backoff. `Ok(None)` means shutdown was requested.
pub async fn subscribe_with_backoff(
    bus: &dyn Bus,
    backoff: &mut Backoff,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<Subscription>, TransportError> {
    retry_with_backoff("Subscribe", backoff, shutdown, || bus.subscribe()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_and_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500), None);
        let delays: Vec<u64> = (0..5)
            .map(|_| backoff.next_delay().unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn test_attempt_budget_and_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(10), Some(2));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay().is_some());
    }

    #[tokio::test]
    async fn test_wait_stops_on_shutdown() {
        let mut backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(60), None);
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert!(!backoff.wait(&mut rx).await.unwrap());
    }

    #[test]
    fn test_delay_for_ignores_budget() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000), Some(1));
        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(800));
        assert_eq!(backoff.delay_for(40), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(1), Some(5));
        let (_tx, mut rx) = watch::channel(false);
        let mut calls = 0;

        let value = retry_with_backoff("Connect", &mut backoff, &mut rx, || {
            calls += 1;
            let n = calls;
            async move {
                if n >= 3 {
                    Ok(n)
                } else {
                    Err(TransportError::Publish("refused".to_string()))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, Some(3));
        assert_eq!(backoff.attempts(), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(1), Some(2));
        let (_tx, mut rx) = watch::channel(false);
        let mut calls = 0u32;

        let result: Result<Option<()>, _> = retry_with_backoff("Connect", &mut backoff, &mut rx, || {
            calls += 1;
            async { Err(TransportError::Publish("refused".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(TransportError::Exhausted { attempts: 2 })));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_wait_reports_exhaustion() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(1), Some(0));
        let (_tx, mut rx) = watch::channel(false);
        assert!(matches!(
            backoff.wait(&mut rx).await,
            Err(TransportError::Exhausted { .. })
        ));
    }
}
