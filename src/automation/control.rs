//! Operator controls

use crate::breaker::{BreakerState, CircuitBreaker};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Halt, resume and stop signals shared by the loops and the engine
///
/// A halt trips the circuit breaker (no new entries) and pauses the
/// evaluation loops. Stop cancels the shared token; in-flight evaluations
/// abort before submission and already submitted orders are left alone.
#[derive(Clone)]
pub struct ControlHandle {
    breaker: Arc<CircuitBreaker>,
    paused: Arc<watch::Sender<bool>>,
    shutdown: CancellationToken,
}

impl ControlHandle {
    pub fn new(breaker: Arc<CircuitBreaker>, shutdown: CancellationToken) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            breaker,
            paused: Arc::new(paused),
            shutdown,
        }
    }

    pub async fn halt(&self, reason: impl Into<String>) -> BreakerState {
        let reason = reason.into();
        tracing::warn!(%reason, "Operator halt");
        self.paused.send_replace(true);
        self.breaker.halt(reason, Utc::now()).await
    }

    pub async fn resume(&self) -> BreakerState {
        tracing::info!("Operator resume");
        self.paused.send_replace(false);
        self.breaker.resume(Utc::now()).await
    }

    pub fn stop(&self) {
        tracing::info!("Stop requested");
        self.shutdown.cancel();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn subscribe_paused(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }
}
