//! The shared shutdown signal and the stop-hook context.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why the runtime is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Explicit cancellation through a [`ShutdownTrigger`].
    Requested,
    /// The process-level parent token was cancelled.
    ParentCancelled,
    /// Startup failed and the started components are being unwound.
    StartupFailed,
}

#[derive(Debug, Default)]
struct SignalState {
    token: CancellationToken,
    reason: OnceLock<ShutdownReason>,
}

/// Read-only view of the runtime-wide shutdown signal.
///
/// Every component receives a clone of the same signal, so all of them
/// observe shutdown at the same moment. Components cannot trigger it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    state: Arc<SignalState>,
}

impl ShutdownSignal {
    /// Completes once shutdown has been triggered.
    pub async fn triggered(&self) {
        self.state.token.cancelled().await;
    }

    pub fn is_triggered(&self) -> bool {
        self.state.token.is_cancelled()
    }

    /// The reason recorded by the first trigger, if any.
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.state.reason.get().copied()
    }
}

/// Write side of the shutdown signal. Owned by the runtime and the signal
/// propagator.
#[derive(Debug, Clone, Default)]
pub struct ShutdownTrigger {
    signal: ShutdownSignal,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger shutdown. Only the first call has an effect; it returns
    /// `true` when this call was the one that triggered.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let state = &self.signal.state;
        if state.reason.set(reason).is_err() {
            tracing::debug!(
                reason = %reason,
                first = ?state.reason.get(),
                "Shutdown already triggered, ignoring"
            );
            return false;
        }
        tracing::info!(reason = %reason, "Shutdown triggered");
        state.token.cancel();
        true
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }
}

/// Context handed to every stop hook.
///
/// Carries the absolute deadline of this hook. The sequencer aborts the hook
/// when the deadline passes, so long waits inside the hook should finish
/// before [`deadline`](Self::deadline) or select on [`expired`](Self::expired).
#[derive(Debug, Clone)]
pub struct StopContext {
    component: Arc<str>,
    deadline: Instant,
    shutdown: ShutdownSignal,
}

impl StopContext {
    pub(crate) fn new(component: &str, timeout: Duration, shutdown: ShutdownSignal) -> Self {
        Self {
            component: Arc::from(component),
            deadline: Instant::now() + timeout,
            shutdown,
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Completes when this hook's deadline has passed.
    pub async fn expired(&self) {
        tokio::time::sleep_until(self.deadline).await;
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.shutdown.reason()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_trigger_wins() {
        let trigger = ShutdownTrigger::new();
        let signal = trigger.signal();
        assert!(!signal.is_triggered());
        assert_eq!(signal.reason(), None);

        assert!(trigger.trigger(ShutdownReason::Terminate));
        assert!(!trigger.trigger(ShutdownReason::Interrupt));

        signal.triggered().await;
        assert!(signal.is_triggered());
        assert_eq!(signal.reason(), Some(ShutdownReason::Terminate));
    }

    #[tokio::test]
    async fn every_clone_observes_the_same_trigger() {
        let trigger = ShutdownTrigger::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let signal = trigger.signal();
                tokio::spawn(async move {
                    signal.triggered().await;
                    signal.reason()
                })
            })
            .collect();

        trigger.trigger(ShutdownReason::Requested);
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Some(ShutdownReason::Requested));
        }
    }

    #[test]
    fn reason_renders_snake_case() {
        assert_eq!(ShutdownReason::ParentCancelled.to_string(), "parent_cancelled");
        assert_eq!(ShutdownReason::Interrupt.as_ref(), "interrupt");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_context_expires_at_deadline() {
        let ctx = StopContext::new("storage", Duration::from_secs(5), ShutdownSignal::default());
        let start = Instant::now();
        ctx.expired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(ctx.remaining(), Duration::ZERO);
        assert_eq!(ctx.component(), "storage");
    }
}
