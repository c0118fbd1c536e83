use super::{AdapterType, AxumTransport, HyperTransport, Transport, TransportConfig, TransportError};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a transport from its configuration section.
pub type AdapterFactory =
    Arc<dyn Fn(&TransportConfig) -> std::result::Result<Arc<dyn Transport>, TransportError> + Send + Sync>;

/// Adapter type → factory.
///
/// Filled during assembly, before the dependency graph is built, and only
/// read afterwards. Registration is explicit; see [`register_all_adapters`].
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: HashMap<AdapterType, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in adapter.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        register_all_adapters(&mut registry);
        registry
    }

    /// Register `factory` for `adapter`. The last registration wins; the
    /// replaced factory is returned.
    pub fn register<F>(&mut self, adapter: AdapterType, factory: F) -> Option<AdapterFactory>
    where
        F: Fn(&TransportConfig) -> std::result::Result<Arc<dyn Transport>, TransportError>
            + Send
            + Sync
            + 'static,
    {
        let previous = self.factories.insert(adapter, Arc::new(factory));
        if previous.is_some() {
            tracing::debug!(adapter = %adapter, "Replaced transport adapter factory");
        } else {
            tracing::debug!(adapter = %adapter, "Registered transport adapter");
        }
        previous
    }

    pub fn is_registered(&self, adapter: AdapterType) -> bool {
        self.factories.contains_key(&adapter)
    }

    /// Registered adapter types, sorted.
    pub fn adapters(&self) -> Vec<AdapterType> {
        let mut adapters: Vec<_> = self.factories.keys().copied().collect();
        adapters.sort();
        adapters
    }

    /// Build the transport named by `config.adapter`.
    ///
    /// # Errors
    /// [`Error::UnknownAdapter`] when nothing is registered for that type.
    pub fn create(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        let factory = self
            .factories
            .get(&config.adapter)
            .ok_or_else(|| Error::UnknownAdapter {
                adapter: config.adapter.to_string(),
            })?;
        let transport = factory(config)?;
        tracing::info!(adapter = %config.adapter, "Created transport");
        Ok(transport)
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters())
            .finish()
    }
}

/// Register the built-in `axum` and `hyper` adapters.
pub fn register_all_adapters(registry: &mut AdapterRegistry) {
    registry.register(AdapterType::Axum, |_config| {
        Ok(Arc::new(AxumTransport::new()) as Arc<dyn Transport>)
    });
    registry.register(AdapterType::Hyper, |_config| {
        Ok(Arc::new(HyperTransport::new()) as Arc<dyn Transport>)
    });
}
