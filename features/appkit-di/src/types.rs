use std::{any::Any, borrow::Borrow, fmt, future::Future, pin::Pin, sync::Arc};

/// Factories and hooks may fail with any error type
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed future returned by erased factories and hooks
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// We assume that we are using a multithreaded async runtime
/// So anything a factory produces needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Injectable for T {}

/// Identity of one component within a graph
///
/// Cheap to clone and totally ordered, so schedules and reports can use a
/// stable iteration order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(Arc<str>);

impl ComponentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<&str> for ComponentId {
    fn from(identity: &str) -> Self {
        ComponentId(Arc::from(identity))
    }
}
impl From<String> for ComponentId {
    fn from(identity: String) -> Self {
        ComponentId(Arc::from(identity.as_str()))
    }
}
impl Borrow<str> for ComponentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
impl AsRef<str> for ComponentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

/// Lifetime policy for a component instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// One instance for the whole process, owned by the singleton store
    Singleton,
    /// One instance per logical request context, discarded with its store
    Request,
}

/// Realized value produced by a component factory
#[derive(Clone)]
pub struct Instance {
    pub identity: ComponentId,
    pub type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl Instance {
    pub(crate) fn new<T: Injectable>(identity: ComponentId, value: T) -> Self {
        Instance {
            identity,
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// Downcast to the concrete type, returning the actual type name on mismatch
    pub fn downcast<T: Injectable>(&self) -> Result<Arc<T>, &'static str> {
        match Arc::downcast::<T>(self.value.clone()) {
            Ok(downcasted) => Ok(downcasted),
            Err(_) => Err(self.type_name),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("identity", &self.identity)
            .field("type_name", &self.type_name)
            .finish()
    }
}
