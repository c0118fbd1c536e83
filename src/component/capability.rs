use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Untyped capability identifier, used by the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityId(Cow<'static, str>);

impl CapabilityId {
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for CapabilityId {
    fn from(id: &'static str) -> Self {
        Self::from_static(id)
    }
}

impl From<String> for CapabilityId {
    fn from(id: String) -> Self {
        Self(Cow::Owned(id))
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed capability key.
///
/// The identifier drives dependency ordering; the type parameter fixes what
/// value is published under it, so consumers resolve an `Arc<T>` without
/// naming the concrete provider.
///
/// # Example
///
/// ```rust,ignore
/// use keelson::component::Capability;
///
/// pub static STORAGE: Capability<Pool> = Capability::new("storage");
/// pub static TRANSPORT: Capability<dyn Transport> = Capability::new("transport");
/// ```
pub struct Capability<T: ?Sized> {
    id: CapabilityId,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized> Capability<T> {
    pub const fn new(id: &'static str) -> Self {
        Self {
            id: CapabilityId::from_static(id),
            _marker: PhantomData,
        }
    }

    /// A capability whose identifier is only known at runtime (e.g. from config).
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            id: CapabilityId::from(id.into()),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &CapabilityId {
        &self.id
    }
}

impl<T: ?Sized> Clone for Capability<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> fmt::Debug for Capability<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("id", &self.id)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
