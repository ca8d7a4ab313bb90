use std::{any::type_name, collections::BTreeMap, fmt, future::Future, marker::PhantomData, sync::Arc};

use crate::{
    errors::ResolveError,
    health::Health,
    types::{BoxFuture, ComponentId, DynError, Injectable, Instance, Scope},
};

pub(crate) type Factory = Box<dyn Fn(Deps) -> BoxFuture<Result<Instance, DynError>> + Send + Sync>;
pub(crate) type Hook = Box<dyn Fn(Instance) -> BoxFuture<Result<(), DynError>> + Send + Sync>;
pub(crate) type HealthHook = Box<dyn Fn(Instance) -> BoxFuture<Health> + Send + Sync>;

/// Dependencies handed to a factory
///
/// Every declared dependency is in `Running` state by the time the factory
/// runs; the orchestrator's level barrier guarantees it.
pub struct Deps {
    instances: BTreeMap<ComponentId, Instance>,
}

impl Deps {
    pub(crate) fn new(instances: BTreeMap<ComponentId, Instance>) -> Self {
        Deps { instances }
    }

    /// Get a declared dependency by identity
    pub fn get<T: Injectable>(&self, identity: &str) -> Result<Arc<T>, ResolveError> {
        let instance = self
            .instances
            .get(identity)
            .ok_or_else(|| ResolveError::UnknownIdentity(identity.into()))?;

        instance
            .downcast()
            .map_err(|actual_type| ResolveError::DowncastFailed {
                identity: instance.identity.clone(),
                required_type: type_name::<T>(),
                actual_type,
            })
    }
}

/// Immutable declaration of one component
///
/// Holds the identity, scope, declared dependencies, factory and the optional
/// start/stop/health hooks. Built via [`ComponentDescriptor::builder`]; once
/// registered it never changes.
pub struct ComponentDescriptor {
    pub(crate) identity: ComponentId,
    pub(crate) scope: Scope,
    pub(crate) dependencies: Vec<ComponentId>,
    pub(crate) factory: Factory,
    pub(crate) on_start: Option<Hook>,
    pub(crate) on_stop: Option<Hook>,
    pub(crate) on_health: Option<HealthHook>,
}

impl ComponentDescriptor {
    /// Start declaring a component producing values of type `T`
    ///
    /// The factory receives the declared dependencies and produces the
    /// component value; hooks added afterwards receive that value.
    pub fn builder<T, F, Fut, E>(
        identity: impl Into<ComponentId>,
        scope: Scope,
        factory: F,
    ) -> DescriptorBuilder<T>
    where
        T: Injectable,
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<DynError>,
    {
        let identity = identity.into();
        let factory_identity = identity.clone();
        let factory: Factory = Box::new(move |deps| {
            let identity = factory_identity.clone();
            let fut = factory(deps);
            Box::pin(async move {
                fut.await
                    .map(|value| Instance::new(identity, value))
                    .map_err(Into::into)
            })
        });

        DescriptorBuilder {
            identity,
            scope,
            dependencies: Vec::new(),
            factory,
            on_start: None,
            on_stop: None,
            on_health: None,
            _produces: PhantomData,
        }
    }

    pub fn identity(&self) -> &ComponentId {
        &self.identity
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn dependencies(&self) -> &[ComponentId] {
        &self.dependencies
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("identity", &self.identity)
            .field("scope", &self.scope)
            .field("dependencies", &self.dependencies)
            .field("on_start", &self.on_start.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .field("on_health", &self.on_health.is_some())
            .finish()
    }
}

/// Builder for [`ComponentDescriptor`]
///
/// Typed over the produced value so hooks get an `Arc<T>` instead of having
/// to downcast by hand.
pub struct DescriptorBuilder<T: Injectable> {
    identity: ComponentId,
    scope: Scope,
    dependencies: Vec<ComponentId>,
    factory: Factory,
    on_start: Option<Hook>,
    on_stop: Option<Hook>,
    on_health: Option<HealthHook>,
    _produces: PhantomData<fn() -> T>,
}

impl<T: Injectable> DescriptorBuilder<T> {
    /// Declare the identities this component depends on
    pub fn depends_on<I>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ComponentId>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Hook awaited after the factory, before the component counts as `Running`
    pub fn on_start<F, Fut, E>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<DynError>,
    {
        self.on_start = Some(erase_hook(hook));
        self
    }

    /// Hook awaited during teardown of the owning store
    pub fn on_stop<F, Fut, E>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<DynError>,
    {
        self.on_stop = Some(erase_hook(hook));
        self
    }

    /// Hook invoked by the health aggregator while the component is `Running`
    ///
    /// Components without one are omitted from health reports.
    pub fn on_health<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Health> + Send + 'static,
    {
        self.on_health = Some(Box::new(move |instance: Instance| {
            match instance.downcast::<T>() {
                Ok(value) => {
                    let fut = hook(value);
                    Box::pin(fut)
                }
                Err(actual_type) => {
                    let detail = format!(
                        "failed to downcast '{}', required: '{}' actual: '{}'",
                        instance.identity,
                        type_name::<T>(),
                        actual_type
                    );
                    Box::pin(async move { Health::unhealthy(detail) })
                }
            }
        }));
        self
    }

    pub fn build(mut self) -> ComponentDescriptor {
        // Duplicate edges would skew the in-degree bookkeeping
        self.dependencies.sort();
        self.dependencies.dedup();

        ComponentDescriptor {
            identity: self.identity,
            scope: self.scope,
            dependencies: self.dependencies,
            factory: self.factory,
            on_start: self.on_start,
            on_stop: self.on_stop,
            on_health: self.on_health,
        }
    }
}

fn erase_hook<T, F, Fut, E>(hook: F) -> Hook
where
    T: Injectable,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<DynError>,
{
    Box::new(move |instance: Instance| match instance.downcast::<T>() {
        Ok(value) => {
            let fut = hook(value);
            Box::pin(async move { fut.await.map_err(Into::into) })
        }
        Err(actual_type) => {
            let error = ResolveError::DowncastFailed {
                identity: instance.identity.clone(),
                required_type: type_name::<T>(),
                actual_type,
            };
            Box::pin(async move { Err(error.into()) })
        }
    })
}
