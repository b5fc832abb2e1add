//! Bounded retry with exponential backoff for broker calls

use crate::breaker::BreakerState;
use crate::error::BrokerError;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Retry policy for transient broker failures
///
/// Each attempt is bounded by `timeout`; the delay doubles after every
/// failure up to `max_delay`. Rejections are returned immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

/// Stop and halt conditions checked before every attempt and during backoff
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    shutdown: CancellationToken,
    breaker: Option<watch::Receiver<BreakerState>>,
}

impl AbortSignal {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            breaker: None,
        }
    }

    /// Also abort while the breaker is halted
    pub fn with_breaker(mut self, breaker: watch::Receiver<BreakerState>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Why the loop must not continue, if it must not
    pub fn reason(&self) -> Option<String> {
        if self.shutdown.is_cancelled() {
            return Some("stopped".into());
        }
        let state = self.breaker.as_ref().map(|rx| rx.borrow().clone());
        match state {
            Some(BreakerState::Halted { reason, .. }) => Some(format!("halted: {reason}")),
            _ => None,
        }
    }

    /// Resolves once a stop or halt arrives
    async fn triggered(&mut self) {
        let Self { shutdown, breaker } = self;
        let halted = async {
            match breaker.as_mut() {
                Some(rx) => {
                    if rx.wait_for(BreakerState::is_halted).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = halted => {}
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            timeout: Duration::from_secs(5),
        }
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, attempts run
    /// out, or `abort` fires
    ///
    /// A timed-out attempt may still have reached the venue; errors returned
    /// after one report it through [`BrokerError::is_uncertain`].
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        abort: &AbortSignal,
        mut operation: F,
    ) -> Result<T, BrokerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let mut abort = abort.clone();
        let mut uncertain = false;
        let mut attempt = 0;
        loop {
            if let Some(reason) = abort.reason() {
                tracing::warn!(label, attempt, %reason, "Broker call abandoned");
                return Err(BrokerError::Aborted { reason, uncertain });
            }

            attempt += 1;
            let error = match tokio::time::timeout(self.timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if !e.is_transient() => return Err(e),
                Ok(Err(e)) => e,
                Err(_) => BrokerError::Timeout(self.timeout.as_millis() as u64),
            };
            uncertain |= error.is_uncertain();

            if attempt >= self.max_attempts {
                tracing::error!(label, attempt, error = %error, "Retries exhausted");
                return Err(BrokerError::RetriesExhausted {
                    attempts: attempt,
                    last: error.to_string(),
                    uncertain,
                });
            }

            let delay = self.delay_for(attempt);
            tracing::warn!(
                label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Broker call failed, retrying..."
            );
            tokio::select! {
                _ = abort.triggered() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(5))
    }
}
