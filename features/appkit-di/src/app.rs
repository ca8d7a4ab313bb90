use std::{any::type_name, sync::Arc};

use crate::{
    descriptor::ComponentDescriptor,
    errors::{GraphError, GraphErrors, ResolveError, ShutdownReport, StartError},
    graph::{DependencyGraph, Schedule},
    health::{self, AggregateHealth},
    lifecycle::{LifecycleOptions, Orchestrator},
    store::ScopeStore,
    types::{Injectable, Scope},
};

/// Application facade
///
/// Owns the dependency graph, the singleton scope store and the lifecycle
/// configuration. Deliberately a plain value rather than an ambient global,
/// so independent graphs (e.g. in tests) stay isolated.
pub struct App {
    graph: DependencyGraph,
    schedule: Option<Schedule>,
    /// The schedule the last successful `start` ran under. Unlike the
    /// validation cache above it survives later registrations, so `stop`
    /// always tears down exactly what was started.
    started_schedule: Option<Schedule>,
    singletons: ScopeStore,
    options: LifecycleOptions,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self::with_options(LifecycleOptions::default())
    }

    pub fn with_options(options: LifecycleOptions) -> Self {
        App {
            graph: DependencyGraph::new(),
            schedule: None,
            started_schedule: None,
            singletons: ScopeStore::new(Scope::Singleton),
            options,
        }
    }

    /// Register a component descriptor
    ///
    /// Fails immediately on a duplicate identity; dangling dependency
    /// references are allowed until resolution time.
    pub fn register(&mut self, descriptor: ComponentDescriptor) -> Result<(), GraphError> {
        // The cached schedule no longer covers the new component
        self.schedule = None;
        self.graph.register(descriptor)
    }

    /// Validate the graph and cache the schedule without starting anything
    pub fn validate(&mut self) -> Result<(), GraphErrors> {
        self.resolved_schedule().map(drop)
    }

    fn resolved_schedule(&mut self) -> Result<Schedule, GraphErrors> {
        if let Some(schedule) = &self.schedule {
            return Ok(schedule.clone());
        }

        let schedule = self.graph.resolve()?;
        self.schedule = Some(schedule.clone());
        Ok(schedule)
    }

    /// Start all singleton components in dependency order
    ///
    /// On any hook failure everything already running is rolled back in
    /// reverse order and the aggregated errors are returned.
    pub async fn start(&mut self) -> Result<(), StartError> {
        let schedule = self.resolved_schedule()?;
        tracing::debug!(
            "starting application [{} component(s), {} level(s)]",
            self.graph.len(),
            schedule.levels().len()
        );

        Orchestrator::new(&self.graph, &schedule, &self.options)
            .start(&mut self.singletons, None)
            .await?;
        self.started_schedule = Some(schedule);
        Ok(())
    }

    /// Tear down all running singletons in reverse schedule order
    ///
    /// Runs under the schedule of the last successful `start`, so components
    /// registered afterwards never mask the teardown. The singleton store is
    /// discarded once teardown finishes; a later `start` begins over a fresh
    /// one. Idempotent: a second call finds nothing started and is a no-op.
    pub async fn stop(&mut self) -> Result<(), ShutdownReport> {
        let Some(schedule) = self.started_schedule.take() else {
            // Never started, nothing to tear down
            return Ok(());
        };

        let result = Orchestrator::new(&self.graph, &schedule, &self.options)
            .stop(&mut self.singletons)
            .await;
        self.singletons = ScopeStore::new(Scope::Singleton);
        result
    }

    /// Resolve a running singleton by identity
    pub fn resolve<T: Injectable>(&self, identity: &str) -> Result<Arc<T>, ResolveError> {
        resolve_in(&self.graph, &self.singletons, None, identity)
    }

    /// Aggregate health over the running singletons
    pub async fn health(&self) -> AggregateHealth {
        health::check(&self.graph, &self.singletons, &self.options).await
    }

    /// Begin a logical request context, realizing request-scoped components
    ///
    /// Running singletons are reused as dependencies without being
    /// restarted. The returned scope must be ended explicitly for its
    /// instances to be torn down.
    pub async fn begin_request_scope(&self) -> Result<RequestScope<'_>, StartError> {
        let schedule = match &self.schedule {
            Some(schedule) => schedule.clone(),
            // Not cached yet - resolution is idempotent, recompute
            None => self.graph.resolve()?,
        };

        let mut store = ScopeStore::new(Scope::Request);
        Orchestrator::new(&self.graph, &schedule, &self.options)
            .start(&mut store, Some(&self.singletons))
            .await?;

        Ok(RequestScope {
            app: self,
            schedule,
            store,
        })
    }

    /// End a request context, tearing down its request-scoped instances only
    pub async fn end_request_scope(&self, scope: RequestScope<'_>) -> Result<(), ShutdownReport> {
        let RequestScope {
            schedule,
            mut store,
            ..
        } = scope;

        Orchestrator::new(&self.graph, &schedule, &self.options)
            .stop(&mut store)
            .await
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("graph", &self.graph)
            .field("singletons", &self.singletons)
            .finish()
    }
}

/// Handle over one logical request context
///
/// Holds its own scope store; singleton lookups read through to the process
/// store. Request stores are never shared across contexts.
pub struct RequestScope<'app> {
    app: &'app App,
    schedule: Schedule,
    store: ScopeStore,
}

impl RequestScope<'_> {
    /// Resolve by identity; singleton identities delegate to the process store
    pub fn resolve<T: Injectable>(&self, identity: &str) -> Result<Arc<T>, ResolveError> {
        resolve_in(&self.app.graph, &self.store, Some(&self.app.singletons), identity)
    }

    /// Aggregate health over this context's running components
    pub async fn health(&self) -> AggregateHealth {
        health::check(&self.app.graph, &self.store, &self.app.options).await
    }

    /// Consume the scope and tear its instances down
    pub async fn end(self) -> Result<(), ShutdownReport> {
        let app = self.app;
        app.end_request_scope(self).await
    }
}

fn resolve_in<T: Injectable>(
    graph: &DependencyGraph,
    store: &ScopeStore,
    fallback: Option<&ScopeStore>,
    identity: &str,
) -> Result<Arc<T>, ResolveError> {
    if !graph.contains(identity) {
        return Err(ResolveError::UnknownIdentity(identity.into()));
    }

    let instance = store
        .running(identity)
        .or_else(|| fallback.and_then(|store| store.running(identity)));

    let Some(instance) = instance else {
        return Err(ResolveError::NotRunning(identity.into()));
    };

    instance
        .downcast()
        .map_err(|actual_type| ResolveError::DowncastFailed {
            identity: instance.identity.clone(),
            required_type: type_name::<T>(),
            actual_type,
        })
}
