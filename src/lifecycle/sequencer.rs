//! Lifecycle Sequencer
//!
//! Drives construct/start in dependency order and stop in exact reverse.

use super::{LifecycleError, Result, ShutdownReason, ShutdownSignal, ShutdownTrigger, StopContext};
use crate::component::{
    BoxFuture, CapabilityStore, ComponentDescriptor, HealthProbe, StopFn,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use tokio::time::Instant;

/// How one component's stop hook ended.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case", tag = "outcome", content = "message")]
pub enum StopOutcome {
    Stopped,
    /// The component defined no stop hook.
    NoHook,
    Failed(String),
    TimedOut,
    Panicked,
}

impl StopOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Stopped | Self::NoHook)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StopRecord {
    pub component: String,
    pub outcome: StopOutcome,
    pub elapsed: Duration,
}

/// Result of the stop phase, one record per started component in stop order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub reason: Option<ShutdownReason>,
    pub records: Vec<StopRecord>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn stop_order(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.component.as_str()).collect()
    }

    /// True when every stop hook finished cleanly.
    pub fn all_ok(&self) -> bool {
        self.records.iter().all(|r| r.outcome.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &StopRecord> {
        self.records.iter().filter(|r| !r.outcome.is_ok())
    }

    pub fn get(&self, component: &str) -> Option<&StopRecord> {
        self.records.iter().find(|r| r.component == component)
    }
}

struct StartedComponent {
    name: String,
    stop: Option<StopFn>,
    stop_timeout: Duration,
}

enum HookOutcome<T> {
    Completed(T),
    Failed(anyhow::Error),
    TimedOut,
    Panicked,
}

/// Run one hook on its own task, optionally bounded.
///
/// A panic stays inside the task; an overrun aborts it.
async fn run_hook<T: Send + 'static>(
    hook: BoxFuture<'static, anyhow::Result<T>>,
    limit: Option<Duration>,
) -> HookOutcome<T> {
    let mut task = tokio::spawn(hook);
    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return HookOutcome::TimedOut;
            }
        },
        None => task.await,
    };

    match joined {
        Ok(Ok(value)) => HookOutcome::Completed(value),
        Ok(Err(e)) => HookOutcome::Failed(e),
        Err(e) if e.is_panic() => HookOutcome::Panicked,
        Err(e) => HookOutcome::Failed(anyhow::anyhow!("hook task cancelled: {e}")),
    }
}

/// Starts components in the resolved order and stops them in reverse.
///
/// The sequencer owns the capability store, the list of started components
/// and the health probes they registered. Hooks run one at a time.
pub struct Sequencer {
    trigger: ShutdownTrigger,
    store: CapabilityStore,
    started: Vec<StartedComponent>,
    probes: Vec<Arc<dyn HealthProbe>>,
}

impl Sequencer {
    pub fn new(trigger: ShutdownTrigger) -> Self {
        Self {
            trigger,
            store: CapabilityStore::new(),
            started: Vec::new(),
            probes: Vec::new(),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.trigger.signal()
    }

    pub fn store(&self) -> &CapabilityStore {
        &self.store
    }

    pub fn probes(&self) -> &[Arc<dyn HealthProbe>] {
        &self.probes
    }

    /// Names of the started components, in start order.
    pub fn started(&self) -> Vec<&str> {
        self.started.iter().map(|c| c.name.as_str()).collect()
    }

    /// Construct and start every descriptor in `ordered`.
    ///
    /// On the first failure the shutdown signal is triggered with
    /// [`ShutdownReason::StartupFailed`], the components started so far are
    /// stopped in reverse, and the failure is returned.
    pub async fn start_all(&mut self, ordered: Vec<ComponentDescriptor>) -> Result<()> {
        let total = ordered.len();
        tracing::info!(components = total, "Starting components...");
        let phase_started = Instant::now();

        for descriptor in ordered {
            if let Err(e) = self.start_one(descriptor).await {
                tracing::error!(
                    component = e.component().unwrap_or("-"),
                    error = %e,
                    "Startup aborted, unwinding started components"
                );
                self.trigger.trigger(ShutdownReason::StartupFailed);
                let report = self.stop_all().await;
                tracing::info!(
                    stopped = report.records.len(),
                    clean = report.all_ok(),
                    "Unwind complete"
                );
                return Err(e);
            }
        }

        tracing::info!(
            components = total,
            elapsed_ms = phase_started.elapsed().as_millis() as u64,
            "All components started"
        );
        Ok(())
    }

    async fn start_one(&mut self, descriptor: ComponentDescriptor) -> Result<()> {
        let name = descriptor.name().to_string();
        let start_timeout = descriptor.start_timeout();
        let stop_timeout = descriptor.stop_timeout();
        let started_at = Instant::now();
        tracing::debug!(component = %name, "Constructing");

        let deps = self.store.scoped(&name, descriptor.requires())?;
        let constructed = match run_hook(descriptor.construct(deps), start_timeout).await {
            HookOutcome::Completed(constructed) => constructed,
            HookOutcome::Failed(e) => {
                return Err(self.start_error(LifecycleError::construct_failed(&name, format!("{e:#}"))));
            }
            HookOutcome::TimedOut => {
                return Err(self.start_error(LifecycleError::timeout(
                    "construct",
                    &name,
                    start_timeout.unwrap_or_default(),
                )));
            }
            HookOutcome::Panicked => {
                return Err(self.start_error(LifecycleError::panicked("construct", &name)));
            }
        };

        for (id, value) in constructed.exports {
            tracing::trace!(component = %name, capability = %id, "Publishing capability");
            self.store.publish(id, value);
        }
        self.probes.extend(constructed.probes);

        if let Some(start) = constructed.start {
            tracing::debug!(component = %name, "Starting");
            match run_hook(start(self.trigger.signal()), start_timeout).await {
                HookOutcome::Completed(()) => {}
                HookOutcome::Failed(e) => {
                    return Err(self.start_error(LifecycleError::start_failed(&name, format!("{e:#}"))));
                }
                HookOutcome::TimedOut => {
                    return Err(self.start_error(LifecycleError::timeout(
                        "start",
                        &name,
                        start_timeout.unwrap_or_default(),
                    )));
                }
                HookOutcome::Panicked => {
                    return Err(self.start_error(LifecycleError::panicked("start", &name)));
                }
            }
        }

        let elapsed = started_at.elapsed();
        metrics::counter!("keelson_component_starts_total", "component" => name.clone()).increment(1);
        metrics::histogram!("keelson_component_start_seconds", "component" => name.clone())
            .record(elapsed.as_secs_f64());
        tracing::info!(component = %name, elapsed_ms = elapsed.as_millis() as u64, "Started");

        self.started.push(StartedComponent {
            name,
            stop: constructed.stop,
            stop_timeout,
        });
        Ok(())
    }

    fn start_error(&self, error: LifecycleError) -> LifecycleError {
        if let Some(component) = error.component() {
            metrics::counter!(
                "keelson_component_start_failures_total",
                "component" => component.to_string()
            )
            .increment(1);
        }
        error
    }

    /// Stop every started component in reverse start order.
    ///
    /// Each stop hook runs under its own deadline. Failures, panics and
    /// overruns are logged and recorded; the sequence always continues.
    /// Calling this twice is harmless: the second call has nothing left to stop.
    pub async fn stop_all(&mut self) -> ShutdownReport {
        let signal = self.trigger.signal();
        let phase_started = Instant::now();
        let mut report = ShutdownReport {
            reason: signal.reason(),
            ..Default::default()
        };
        tracing::info!(
            components = self.started.len(),
            reason = ?signal.reason(),
            "Stopping components..."
        );

        while let Some(component) = self.started.pop() {
            let started_at = Instant::now();
            let outcome = match component.stop {
                None => StopOutcome::NoHook,
                Some(stop) => {
                    tracing::debug!(
                        component = %component.name,
                        timeout_ms = component.stop_timeout.as_millis() as u64,
                        "Stopping"
                    );
                    let ctx = StopContext::new(&component.name, component.stop_timeout, signal.clone());
                    match run_hook(stop(ctx), Some(component.stop_timeout)).await {
                        HookOutcome::Completed(()) => StopOutcome::Stopped,
                        HookOutcome::Failed(e) => {
                            tracing::error!(component = %component.name, error = %format!("{e:#}"), "Stop hook failed");
                            StopOutcome::Failed(format!("{e:#}"))
                        }
                        HookOutcome::TimedOut => {
                            tracing::error!(
                                component = %component.name,
                                timeout_ms = component.stop_timeout.as_millis() as u64,
                                "Stop hook exceeded its deadline and was aborted"
                            );
                            StopOutcome::TimedOut
                        }
                        HookOutcome::Panicked => {
                            tracing::error!(component = %component.name, "Stop hook panicked");
                            StopOutcome::Panicked
                        }
                    }
                }
            };

            let elapsed = started_at.elapsed();
            metrics::histogram!("keelson_component_stop_seconds", "component" => component.name.clone())
                .record(elapsed.as_secs_f64());
            if !outcome.is_ok() {
                metrics::counter!(
                    "keelson_component_stop_failures_total",
                    "component" => component.name.clone(),
                    "outcome" => outcome.to_string()
                )
                .increment(1);
            }
            tracing::info!(
                component = %component.name,
                outcome = %outcome,
                elapsed_ms = elapsed.as_millis() as u64,
                "Stopped"
            );

            report.records.push(StopRecord {
                component: component.name,
                outcome,
                elapsed,
            });
        }

        report.elapsed = phase_started.elapsed();
        tracing::info!(
            components = report.records.len(),
            clean = report.all_ok(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Shutdown complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Capability;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn recorded(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    fn tracked(name: &'static str, journal: &Journal) -> ComponentDescriptor {
        let on_start = Arc::clone(journal);
        let on_stop = Arc::clone(journal);
        ComponentDescriptor::new(name, |_deps| async { Ok(()) })
            .on_start(move |_, _signal| async move {
                on_start.lock().unwrap().push(format!("start:{name}"));
                Ok(())
            })
            .on_stop(move |_, _ctx| async move {
                on_stop.lock().unwrap().push(format!("stop:{name}"));
                Ok(())
            })
            .build()
    }

    #[tokio::test]
    async fn stop_order_mirrors_start_order() {
        let journal = Journal::default();
        let mut sequencer = Sequencer::new(ShutdownTrigger::new());
        sequencer
            .start_all(vec![
                tracked("a", &journal),
                tracked("b", &journal),
                tracked("c", &journal),
            ])
            .await
            .unwrap();
        assert_eq!(sequencer.started(), vec!["a", "b", "c"]);

        let report = sequencer.stop_all().await;
        assert_eq!(report.stop_order(), vec!["c", "b", "a"]);
        assert!(report.all_ok());
        assert_eq!(
            recorded(&journal),
            vec!["start:a", "start:b", "start:c", "stop:c", "stop:b", "stop:a"]
        );
    }

    #[tokio::test]
    async fn dependencies_are_published_before_dependents_construct() {
        static PORT: Capability<u16> = Capability::new("port");
        static URL: Capability<String> = Capability::new("url");

        let mut sequencer = Sequencer::new(ShutdownTrigger::new());
        sequencer
            .start_all(vec![
                ComponentDescriptor::new("port", |_deps| async { Ok(8080_u16) })
                    .provides(&PORT)
                    .build(),
                ComponentDescriptor::new("url", |deps: crate::component::Dependencies| async move {
                    let port = deps.get(&PORT)?;
                    Ok(format!("http://localhost:{port}"))
                })
                .requires(&PORT)
                .provides(&URL)
                .build(),
            ])
            .await
            .unwrap();

        assert_eq!(
            sequencer.store().resolve(&URL).unwrap().as_str(),
            "http://localhost:8080"
        );
    }

    #[tokio::test]
    async fn failing_and_panicking_stop_hooks_do_not_block_the_rest() {
        let journal = Journal::default();
        let mut sequencer = Sequencer::new(ShutdownTrigger::new());
        sequencer
            .start_all(vec![
                tracked("first", &journal),
                ComponentDescriptor::new("panics", |_deps| async { Ok(()) })
                    .on_stop(|_, _ctx| async {
                        if true {
                            panic!("boom");
                        }
                        Ok(())
                    })
                    .build(),
                ComponentDescriptor::new("fails", |_deps| async { Ok(()) })
                    .on_stop(|_, _ctx| async { Err::<(), _>(anyhow::anyhow!("disk on fire")) })
                    .build(),
                ComponentDescriptor::new("quiet", |_deps| async { Ok(()) }).build(),
            ])
            .await
            .unwrap();

        let report = sequencer.stop_all().await;
        assert_eq!(report.stop_order(), vec!["quiet", "fails", "panics", "first"]);
        assert_eq!(report.get("quiet").unwrap().outcome, StopOutcome::NoHook);
        assert_eq!(
            report.get("fails").unwrap().outcome,
            StopOutcome::Failed("disk on fire".into())
        );
        assert_eq!(report.get("panics").unwrap().outcome, StopOutcome::Panicked);
        assert_eq!(report.get("first").unwrap().outcome, StopOutcome::Stopped);
        assert!(recorded(&journal).contains(&"stop:first".to_string()));
        assert_eq!(report.failures().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_stop_hook_is_aborted_at_its_deadline() {
        let journal = Journal::default();
        let mut sequencer = Sequencer::new(ShutdownTrigger::new());
        sequencer
            .start_all(vec![
                tracked("after", &journal),
                ComponentDescriptor::new("slow", |_deps| async { Ok(()) })
                    .on_stop(|_, _ctx| async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    })
                    .stop_timeout(Duration::from_secs(2))
                    .build(),
            ])
            .await
            .unwrap();

        let started = Instant::now();
        let report = sequencer.stop_all().await;
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(report.get("slow").unwrap().outcome, StopOutcome::TimedOut);
        assert_eq!(report.get("after").unwrap().outcome, StopOutcome::Stopped);
    }

    #[tokio::test]
    async fn start_failure_unwinds_started_components_in_reverse() {
        let journal = Journal::default();
        let constructed = Arc::new(Mutex::new(false));
        let never = Arc::clone(&constructed);

        let trigger = ShutdownTrigger::new();
        let mut sequencer = Sequencer::new(trigger.clone());
        let err = sequencer
            .start_all(vec![
                tracked("a", &journal),
                tracked("b", &journal),
                ComponentDescriptor::new("broken", |_deps| async { Ok(()) })
                    .on_start(|_, _signal| async { Err::<(), _>(anyhow::anyhow!("port in use")) })
                    .build(),
                ComponentDescriptor::new("later", move |_deps| async move {
                    *never.lock().unwrap() = true;
                    Ok(())
                })
                .build(),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::StartFailed { ref component, .. } if component == "broken"));
        assert_eq!(
            recorded(&journal),
            vec!["start:a", "start:b", "stop:b", "stop:a"]
        );
        assert!(!*constructed.lock().unwrap());
        assert_eq!(trigger.signal().reason(), Some(ShutdownReason::StartupFailed));
        assert!(sequencer.started().is_empty());
    }

    #[tokio::test]
    async fn construct_panic_is_reported_as_start_failure() {
        let mut sequencer = Sequencer::new(ShutdownTrigger::new());
        let err = sequencer
            .start_all(vec![
                ComponentDescriptor::new("explodes", |_deps| async {
                    if true {
                        panic!("constructor exploded");
                    }
                    Ok(())
                })
                .build(),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Panicked { ref phase, .. } if phase == "construct"));
    }

    #[tokio::test(start_paused = true)]
    async fn start_timeout_is_enforced() {
        let mut sequencer = Sequencer::new(ShutdownTrigger::new());
        let err = sequencer
            .start_all(vec![
                ComponentDescriptor::new("hangs", |_deps| async { Ok(()) })
                    .on_start(|_, _signal| std::future::pending::<anyhow::Result<()>>())
                    .start_timeout(Duration::from_millis(500))
                    .build(),
            ])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Timeout { ref phase, timeout, .. }
                if phase == "start" && timeout == Duration::from_millis(500)
        ));
    }

    #[tokio::test]
    async fn stop_hook_sees_the_shutdown_reason() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let trigger = ShutdownTrigger::new();
        let mut sequencer = Sequencer::new(trigger.clone());
        sequencer
            .start_all(vec![
                ComponentDescriptor::new("observer", |_deps| async { Ok(()) })
                    .on_stop(move |_, ctx| async move {
                        let _ = tx.send((ctx.component().to_string(), ctx.reason()));
                        Ok(())
                    })
                    .build(),
            ])
            .await
            .unwrap();

        trigger.trigger(ShutdownReason::Terminate);
        let report = sequencer.stop_all().await;
        assert_eq!(report.reason, Some(ShutdownReason::Terminate));
        assert_eq!(
            rx.await.unwrap(),
            ("observer".to_string(), Some(ShutdownReason::Terminate))
        );
    }
}
