//! Component descriptors, typed capabilities and health probes.
//!
//! A component declares what it provides and requires through typed
//! [`Capability`] keys. Constructors receive only the capabilities they
//! declared, already resolved, through [`Dependencies`].

mod capability;
mod descriptor;
mod probe;
mod store;

use std::future::Future;
use std::pin::Pin;

pub use capability::{Capability, CapabilityId};
pub use descriptor::{ComponentDescriptor, DEFAULT_STOP_TIMEOUT, DescriptorBuilder};
pub(crate) use descriptor::{Constructed, StartFn, StopFn};
pub use probe::{HealthProbe, ProbeResult};
pub use store::{CapabilityStore, Dependencies};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
