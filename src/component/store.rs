use crate::component::{Capability, CapabilityId};
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Type-erased capability value. The inner value is always an `Arc<T>`
/// boxed once more so unsized `T` (trait objects) survive the round trip.
pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Thread-safe store of every capability published so far.
///
/// Filled by the sequencer as components are constructed; a component only
/// ever sees the slice of it that it declared through [`Dependencies`].
#[derive(Clone, Default)]
pub struct CapabilityStore {
    entries: Arc<DashMap<CapabilityId, ErasedValue>>,
}

impl CapabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, id: CapabilityId, value: ErasedValue) {
        self.entries.insert(id, value);
    }

    /// Resolve a published capability.
    pub fn resolve<T: ?Sized + Send + Sync + 'static>(
        &self,
        capability: &Capability<T>,
    ) -> Result<Arc<T>> {
        let entry = self
            .entries
            .get(capability.id())
            .ok_or_else(|| Error::CapabilityNotFound {
                capability: capability.id().to_string(),
            })?;
        downcast(capability, entry.value().clone())
    }

    pub fn contains(&self, id: &CapabilityId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the capabilities `component` declared it requires.
    pub(crate) fn scoped(&self, component: &str, requires: &[CapabilityId]) -> Result<Dependencies> {
        let mut values = HashMap::with_capacity(requires.len());
        for id in requires {
            let value = self
                .entries
                .get(id)
                .ok_or_else(|| Error::CapabilityNotFound {
                    capability: id.to_string(),
                })?
                .value()
                .clone();
            values.insert(id.clone(), value);
        }
        Ok(Dependencies {
            component: component.to_string(),
            values: Arc::new(values),
        })
    }
}

/// The resolved inputs handed to a component's constructor.
#[derive(Clone)]
pub struct Dependencies {
    component: String,
    values: Arc<HashMap<CapabilityId, ErasedValue>>,
}

impl Dependencies {
    /// An empty set, for components without requirements.
    pub fn empty(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            values: Arc::new(HashMap::new()),
        }
    }

    /// Resolve a required capability.
    ///
    /// # Errors
    /// Fails if the capability was not declared via `requires`, or if it was
    /// published under a different type.
    pub fn get<T: ?Sized + Send + Sync + 'static>(
        &self,
        capability: &Capability<T>,
    ) -> Result<Arc<T>> {
        let value = self
            .values
            .get(capability.id())
            .ok_or_else(|| Error::UndeclaredCapability {
                component: self.component.clone(),
                capability: capability.id().to_string(),
            })?;
        downcast(capability, value.clone())
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub(crate) fn erase<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> ErasedValue {
    Arc::new(value)
}

fn downcast<T: ?Sized + Send + Sync + 'static>(
    capability: &Capability<T>,
    value: ErasedValue,
) -> Result<Arc<T>> {
    // The erased value holds an Arc<T>; downcasting yields Arc<Arc<T>>.
    let wrapper = value
        .downcast::<Arc<T>>()
        .map_err(|_| Error::DowncastFailed {
            capability: capability.id().to_string(),
            type_name: std::any::type_name::<T>().to_string(),
        })?;
    Ok(wrapper.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestService {
        value: i32,
    }

    trait MyTrait: Send + Sync {
        fn get_value(&self) -> i32;
    }

    impl MyTrait for TestService {
        fn get_value(&self) -> i32 {
            self.value
        }
    }

    static SERVICE: Capability<TestService> = Capability::new("service");
    static DYN_SERVICE: Capability<dyn MyTrait> = Capability::new("dyn-service");

    #[test]
    fn test_publish_and_resolve() {
        let store = CapabilityStore::new();
        store.publish(SERVICE.id().clone(), erase(Arc::new(TestService { value: 42 })));
        let service = store.resolve(&SERVICE).unwrap();
        assert_eq!(service.value, 42);
    }

    #[test]
    fn test_publish_and_resolve_trait_object() {
        let store = CapabilityStore::new();
        let service: Arc<dyn MyTrait> = Arc::new(TestService { value: 99 });
        store.publish(DYN_SERVICE.id().clone(), erase(service));
        assert_eq!(store.resolve(&DYN_SERVICE).unwrap().get_value(), 99);
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let store = CapabilityStore::new();
        store.publish(SERVICE.id().clone(), erase(Arc::new(7_u32)));
        let err = store.resolve(&SERVICE).err().unwrap();
        assert!(matches!(err, Error::DowncastFailed { .. }));
    }

    #[test]
    fn test_dependencies_reject_undeclared_capability() {
        let store = CapabilityStore::new();
        store.publish(SERVICE.id().clone(), erase(Arc::new(TestService { value: 1 })));
        store.publish(DYN_SERVICE.id().clone(), erase(Arc::new(TestService { value: 2 }) as Arc<dyn MyTrait>));

        let deps = store.scoped("consumer", &[SERVICE.id().clone()]).unwrap();
        assert_eq!(deps.get(&SERVICE).unwrap().value, 1);

        let err = deps.get(&DYN_SERVICE).err().unwrap();
        assert!(matches!(err, Error::UndeclaredCapability { ref component, .. } if component == "consumer"));
    }
}
