//! Shutdown Signal Propagator
//!
//! Turns OS termination signals into the single shared [`ShutdownSignal`].

use super::{ShutdownReason, ShutdownSignal, ShutdownTrigger};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Listens for SIGINT/SIGTERM and triggers the shared shutdown signal.
///
/// Also forwards cancellation of an optional parent token (the process's
/// base cancellation context). The propagator is pure notification; it does
/// not stop anything itself.
///
/// # Example
///
/// ```rust,ignore
/// use keelson::lifecycle::{ShutdownTrigger, SignalPropagator};
///
/// let trigger = ShutdownTrigger::new();
/// let signal = trigger.signal();
/// SignalPropagator::new(trigger).spawn();
///
/// signal.triggered().await;
/// println!("shutting down: {:?}", signal.reason());
/// ```
pub struct SignalPropagator {
    trigger: ShutdownTrigger,
    parent: Option<CancellationToken>,
    os_signals: bool,
}

impl SignalPropagator {
    pub fn new(trigger: ShutdownTrigger) -> Self {
        Self {
            trigger,
            parent: None,
            os_signals: true,
        }
    }

    /// Also trigger shutdown when `parent` is cancelled.
    pub fn with_parent(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Do not install SIGINT/SIGTERM handlers; only the parent token and
    /// explicit triggers end the wait.
    pub fn without_os_signals(mut self) -> Self {
        self.os_signals = false;
        self
    }

    /// Run the propagator on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Wait for the first termination event and trigger the shared signal.
    ///
    /// Returns as soon as the signal is triggered, whoever triggered it.
    pub async fn run(self) {
        let signal = self.trigger.signal();
        let parent = self.parent.unwrap_or_default();

        tokio::select! {
            reason = termination_signal(), if self.os_signals => {
                self.trigger.trigger(reason);
            }
            _ = parent.cancelled() => {
                self.trigger.trigger(ShutdownReason::ParentCancelled);
            }
            _ = signal.triggered() => {}
        }
    }
}

/// Wait for Ctrl+C or SIGTERM and report which one arrived.
///
/// Once tokio has installed its handlers the default "terminate the process"
/// action is gone for the rest of the run, so later signals are ignored.
/// A handler that cannot be installed is logged and that source is skipped.
pub async fn termination_signal() -> ShutdownReason {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
            ShutdownReason::Interrupt
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
            ShutdownReason::Terminate
        },
    }
}

/// Shorthand for code that only needs to wait on an existing signal.
pub async fn wait_for_shutdown(signal: &ShutdownSignal) -> Option<ShutdownReason> {
    signal.triggered().await;
    signal.reason()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn parent_cancellation_is_forwarded() {
        let trigger = ShutdownTrigger::new();
        let signal = trigger.signal();
        let parent = CancellationToken::new();

        let handle = SignalPropagator::new(trigger)
            .with_parent(parent.clone())
            .without_os_signals()
            .spawn();

        parent.cancel();
        assert_eq!(
            wait_for_shutdown(&signal).await,
            Some(ShutdownReason::ParentCancelled)
        );
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn explicit_trigger_ends_the_propagator() {
        let trigger = ShutdownTrigger::new();
        let handle = SignalPropagator::new(trigger.clone())
            .without_os_signals()
            .spawn();

        trigger.trigger(ShutdownReason::Requested);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("propagator should exit once triggered")
            .unwrap();
        assert_eq!(trigger.signal().reason(), Some(ShutdownReason::Requested));
    }

    #[tokio::test]
    async fn later_parent_cancellation_does_not_override_reason() {
        let trigger = ShutdownTrigger::new();
        let parent = CancellationToken::new();
        trigger.trigger(ShutdownReason::Terminate);

        SignalPropagator::new(trigger.clone())
            .with_parent(parent.clone())
            .run()
            .await;
        parent.cancel();
        assert_eq!(trigger.signal().reason(), Some(ShutdownReason::Terminate));
    }
}
