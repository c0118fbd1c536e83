use crate::component::store::{ErasedValue, erase};
use crate::component::{BoxFuture, Capability, CapabilityId, Dependencies, HealthProbe};
use crate::lifecycle::{ShutdownSignal, StopContext};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Stop hooks get this long unless the descriptor says otherwise.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) type HookFuture = BoxFuture<'static, anyhow::Result<()>>;
pub(crate) type StartFn = Box<dyn FnOnce(ShutdownSignal) -> HookFuture + Send>;
pub(crate) type StopFn = Box<dyn FnOnce(StopContext) -> HookFuture + Send>;
type ConstructFn =
    Box<dyn FnOnce(Dependencies) -> BoxFuture<'static, anyhow::Result<Constructed>> + Send>;

type TypedConstructFn<T> =
    Box<dyn FnOnce(Dependencies) -> BoxFuture<'static, anyhow::Result<T>> + Send>;
type ExportFn<T> = Box<dyn Fn(&Arc<T>) -> ErasedValue + Send>;
type ProbeFn<T> = Box<dyn Fn(&Arc<T>) -> Arc<dyn HealthProbe> + Send>;
type TypedStartFn<T> = Box<dyn FnOnce(Arc<T>, ShutdownSignal) -> HookFuture + Send>;
type TypedStopFn<T> = Box<dyn FnOnce(Arc<T>, StopContext) -> HookFuture + Send>;

/// What a successful `construct` leaves behind: the published capability
/// values plus the instance-bound hooks and probes.
pub(crate) struct Constructed {
    pub exports: Vec<(CapabilityId, ErasedValue)>,
    pub probes: Vec<Arc<dyn HealthProbe>>,
    pub start: Option<StartFn>,
    pub stop: Option<StopFn>,
}

/// Declares one unit of the runtime.
///
/// Descriptors are immutable once built. The sequencer consumes them: it
/// constructs the instance from the resolved dependencies, publishes the
/// provided capabilities, and drives the start and stop hooks.
///
/// # Example
///
/// ```rust,ignore
/// use keelson::component::{Capability, ComponentDescriptor};
/// use keelson::drain::{drain, DrainConfig};
///
/// static CONFIG: Capability<RuntimeConfig> = Capability::new("config");
/// static STORAGE: Capability<Pool> = Capability::new("storage");
///
/// let storage = ComponentDescriptor::new("storage", |deps| async move {
///         let config = deps.get(&CONFIG)?;
///         Ok(Pool::new("primary", config.storage[0].max_connections))
///     })
///     .requires(&CONFIG)
///     .provides(&STORAGE)
///     .on_stop(|pool, _ctx| async move {
///         drain(pool.as_ref(), "storage", &DrainConfig::storage()).await;
///         Ok(())
///     })
///     .build();
/// ```
pub struct ComponentDescriptor {
    name: String,
    provides: Vec<CapabilityId>,
    requires: Vec<CapabilityId>,
    start_timeout: Option<Duration>,
    stop_timeout: Duration,
    construct: ConstructFn,
}

impl ComponentDescriptor {
    /// Start describing a component whose instance is produced by `construct`.
    pub fn new<T, F, Fut>(name: impl Into<String>, construct: F) -> DescriptorBuilder<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Dependencies) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        DescriptorBuilder {
            name: name.into(),
            provides: Vec::new(),
            requires: Vec::new(),
            exports: Vec::new(),
            probes: Vec::new(),
            on_start: None,
            on_stop: None,
            start_timeout: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            construct: Box::new(move |deps| -> BoxFuture<'static, anyhow::Result<T>> {
                Box::pin(construct(deps))
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provides(&self) -> &[CapabilityId] {
        &self.provides
    }

    pub fn requires(&self) -> &[CapabilityId] {
        &self.requires
    }

    pub fn start_timeout(&self) -> Option<Duration> {
        self.start_timeout
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    pub(crate) fn construct(self, deps: Dependencies) -> BoxFuture<'static, anyhow::Result<Constructed>> {
        (self.construct)(deps)
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("name", &self.name)
            .field("provides", &self.provides)
            .field("requires", &self.requires)
            .field("start_timeout", &self.start_timeout)
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

/// Typed builder for [`ComponentDescriptor`].
///
/// `T` is the instance type produced by `construct`; hooks and exports are
/// bound to the constructed `Arc<T>` and erased on [`build`](Self::build).
pub struct DescriptorBuilder<T> {
    name: String,
    provides: Vec<CapabilityId>,
    requires: Vec<CapabilityId>,
    exports: Vec<(CapabilityId, ExportFn<T>)>,
    probes: Vec<ProbeFn<T>>,
    on_start: Option<TypedStartFn<T>>,
    on_stop: Option<TypedStopFn<T>>,
    start_timeout: Option<Duration>,
    stop_timeout: Duration,
    construct: TypedConstructFn<T>,
}

impl<T: Send + Sync + 'static> DescriptorBuilder<T> {
    /// Declare a required capability.
    pub fn requires<U: ?Sized>(mut self, capability: &Capability<U>) -> Self {
        if !self.requires.contains(capability.id()) {
            self.requires.push(capability.id().clone());
        }
        self
    }

    /// Publish the instance itself under `capability`.
    pub fn provides(self, capability: &Capability<T>) -> Self {
        self.provides_as(capability, |instance| instance)
    }

    /// Publish a value derived from the instance, typically a trait object
    /// (`|t| t as Arc<dyn Transport>`) or a handle the instance owns.
    pub fn provides_as<U, F>(mut self, capability: &Capability<U>, cast: F) -> Self
    where
        U: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<U> + Send + 'static,
    {
        let id = capability.id().clone();
        if !self.provides.contains(&id) {
            self.provides.push(id.clone());
        }
        self.exports
            .push((id, Box::new(move |instance: &Arc<T>| erase(cast(Arc::clone(instance))))));
        self
    }

    /// Register a health probe derived from the instance.
    pub fn probe<F>(mut self, probe: F) -> Self
    where
        F: Fn(&Arc<T>) -> Arc<dyn HealthProbe> + Send + 'static,
    {
        self.probes.push(Box::new(probe));
        self
    }

    pub fn on_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(Arc<T>, ShutdownSignal) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_start = Some(Box::new(move |instance, signal| -> HookFuture {
            Box::pin(hook(instance, signal))
        }));
        self
    }

    pub fn on_stop<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(Arc<T>, StopContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_stop = Some(Box::new(move |instance, ctx| -> HookFuture {
            Box::pin(hook(instance, ctx))
        }));
        self
    }

    /// Bound the start hook. Unbounded by default.
    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    /// Bound the stop hook. Defaults to [`DEFAULT_STOP_TIMEOUT`].
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn build(self) -> ComponentDescriptor {
        let Self {
            name,
            provides,
            requires,
            exports,
            probes,
            on_start,
            on_stop,
            start_timeout,
            stop_timeout,
            construct,
        } = self;

        let construct: ConstructFn = Box::new(move |deps| -> BoxFuture<'static, anyhow::Result<Constructed>> {
            Box::pin(async move {
                let instance = Arc::new(construct(deps).await?);

                let exports = exports
                    .into_iter()
                    .map(|(id, export)| (id, export(&instance)))
                    .collect();
                let probes = probes.iter().map(|probe| probe(&instance)).collect();
                let start = on_start.map(|hook| {
                    let instance = Arc::clone(&instance);
                    Box::new(move |signal: ShutdownSignal| hook(instance, signal)) as StartFn
                });
                let stop = on_stop.map(|hook| {
                    let instance = Arc::clone(&instance);
                    Box::new(move |ctx: StopContext| hook(instance, ctx)) as StopFn
                });

                Ok(Constructed {
                    exports,
                    probes,
                    start,
                    stop,
                })
            })
        });

        ComponentDescriptor {
            name,
            provides,
            requires,
            start_timeout,
            stop_timeout,
            construct,
        }
    }
}

impl<T: HealthProbe> DescriptorBuilder<T> {
    /// Register the instance itself as a health probe.
    pub fn probe_self(self) -> Self {
        self.probe(|instance| Arc::clone(instance) as Arc<dyn HealthProbe>)
    }
}

impl<T: Send + Sync + 'static> From<DescriptorBuilder<T>> for ComponentDescriptor {
    fn from(builder: DescriptorBuilder<T>) -> Self {
        builder.build()
    }
}
