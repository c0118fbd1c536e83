//! Runtime Bootstrap
//!
//! High-level API tying the graph, the sequencer and the signal propagator
//! together.

use super::{
    Result, Sequencer, ShutdownReason, ShutdownReport, ShutdownSignal, ShutdownTrigger,
    SignalPropagator,
};
use crate::component::{CapabilityStore, ComponentDescriptor, HealthProbe};
use crate::graph::resolve_order;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A validated assembly of components, ready to start.
///
/// # Example
///
/// ```rust,ignore
/// use keelson::lifecycle::Runtime;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let runtime = Runtime::builder()
///         .component(config_component(config))
///         .component(log_component())
///         .component(storage_component("primary"))
///         .component(transport_component(registry))
///         .build()?;
///
///     let report = runtime.run().await?;
///     tracing::info!(order = ?report.stop_order(), "Bye");
///     Ok(())
/// }
/// ```
pub struct Runtime {
    ordered: Vec<ComponentDescriptor>,
    trigger: ShutdownTrigger,
    parent: Option<CancellationToken>,
    os_signals: bool,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Component names in the order they will start.
    pub fn start_order(&self) -> Vec<&str> {
        self.ordered.iter().map(|d| d.name()).collect()
    }

    /// Write side of the shutdown signal, for programmatic shutdown.
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.trigger.signal()
    }

    /// Begin listening for termination signals, then construct and start
    /// every component. A signal that arrives mid-startup is recorded and
    /// observed by the start hooks still to run.
    ///
    /// # Errors
    ///
    /// Returns the first construct/start failure after the components that
    /// did start have been stopped again.
    pub async fn start(self) -> Result<RunningRuntime> {
        let Self {
            ordered,
            trigger,
            parent,
            os_signals,
        } = self;

        let mut propagator = SignalPropagator::new(trigger.clone());
        if let Some(parent) = parent {
            propagator = propagator.with_parent(parent);
        }
        if !os_signals {
            propagator = propagator.without_os_signals();
        }
        let propagator = propagator.spawn();

        tracing::info!("Starting runtime...");
        let mut sequencer = Sequencer::new(trigger.clone());
        if let Err(e) = sequencer.start_all(ordered).await {
            propagator.abort();
            return Err(e);
        }

        tracing::info!("Runtime started");
        Ok(RunningRuntime {
            sequencer,
            trigger,
            propagator,
        })
    }

    /// Start, block until shutdown is triggered, stop, and report.
    pub async fn run(self) -> Result<ShutdownReport> {
        let running = self.start().await?;
        let reason = running.wait_for_shutdown().await;
        tracing::info!(reason = ?reason, "Shutdown signal received");
        Ok(running.stop().await)
    }
}

/// Builder for [`Runtime`]. Registration is explicit; nothing is discovered.
pub struct RuntimeBuilder {
    descriptors: Vec<ComponentDescriptor>,
    trigger: ShutdownTrigger,
    parent: Option<CancellationToken>,
    os_signals: bool,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            trigger: ShutdownTrigger::new(),
            parent: None,
            os_signals: true,
        }
    }

    /// Register a component. Declaration order breaks ties in the start order.
    pub fn component(mut self, descriptor: impl Into<ComponentDescriptor>) -> Self {
        self.descriptors.push(descriptor.into());
        self
    }

    pub fn components<I>(mut self, descriptors: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ComponentDescriptor>,
    {
        self.descriptors
            .extend(descriptors.into_iter().map(Into::into));
        self
    }

    /// Trigger shutdown when `parent` is cancelled.
    pub fn parent_token(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Use an existing trigger instead of a fresh one.
    pub fn shutdown_trigger(mut self, trigger: ShutdownTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Leave SIGINT/SIGTERM alone. Useful in tests and when embedding.
    pub fn without_os_signals(mut self) -> Self {
        self.os_signals = false;
        self
    }

    /// Validate the assembly and compute the start order.
    ///
    /// # Errors
    ///
    /// Duplicate names, duplicate providers, missing capabilities and
    /// cycles. Nothing has been constructed when this fails.
    pub fn build(self) -> crate::Result<Runtime> {
        let ordered = resolve_order(self.descriptors)?;
        tracing::debug!(
            order = ?ordered.iter().map(|d| d.name()).collect::<Vec<_>>(),
            "Assembly validated"
        );
        Ok(Runtime {
            ordered,
            trigger: self.trigger,
            parent: self.parent,
            os_signals: self.os_signals,
        })
    }
}

/// A started runtime. Dropping it does not stop anything; call
/// [`stop`](Self::stop).
pub struct RunningRuntime {
    sequencer: Sequencer,
    trigger: ShutdownTrigger,
    propagator: JoinHandle<()>,
}

impl RunningRuntime {
    pub fn signal(&self) -> ShutdownSignal {
        self.trigger.signal()
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Health probes registered by the started components. The runtime
    /// never evaluates them itself.
    pub fn probes(&self) -> &[Arc<dyn HealthProbe>] {
        self.sequencer.probes()
    }

    /// Every capability published during startup.
    pub fn capabilities(&self) -> &CapabilityStore {
        self.sequencer.store()
    }

    pub fn started(&self) -> Vec<&str> {
        self.sequencer.started()
    }

    /// Completes once shutdown is triggered. Does not borrow the runtime, so
    /// it can be awaited from another task.
    pub fn wait_for_shutdown(&self) -> impl Future<Output = Option<ShutdownReason>> + Send + 'static {
        let signal = self.trigger.signal();
        async move { super::wait_for_shutdown(&signal).await }
    }

    /// Stop every component in reverse start order.
    ///
    /// Triggers the shutdown signal with [`ShutdownReason::Requested`] first
    /// if nothing else has.
    pub async fn stop(mut self) -> ShutdownReport {
        self.trigger.trigger(ShutdownReason::Requested);
        let report = self.sequencer.stop_all().await;
        if let Err(e) = self.propagator.await {
            tracing::warn!(error = %e, "Signal propagator ended abnormally");
        }
        report
    }
}
