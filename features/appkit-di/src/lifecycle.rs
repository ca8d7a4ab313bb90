use std::{collections::BTreeMap, future::Future, thread, time::Duration};

use futures::{
    future::{self, Either},
    stream, StreamExt,
};
use futures_channel::oneshot;

use crate::{
    descriptor::{ComponentDescriptor, Deps},
    errors::{HookFailure, HookStage, HookTimedOut, ResolveError, ShutdownReport, StartupFailed},
    graph::{DependencyGraph, Schedule},
    store::ScopeStore,
    types::{ComponentId, DynError, Instance},
};

/// Tunables for lifecycle and health hook execution
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Bound on each factory/hook invocation; `None` waits indefinitely.
    /// A timeout counts as a hook failure and takes the same rollback path.
    pub hook_timeout: Option<Duration>,
    /// Cap on concurrent hook invocations within one schedule level
    pub max_concurrency: usize,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        LifecycleOptions {
            hook_timeout: None,
            max_concurrency: 16,
        }
    }
}

/// Race a hook future against the configured timeout
///
/// Runtime-agnostic: a throwaway thread signals the deadline over a oneshot,
/// so no timer from any particular executor is needed.
pub(crate) async fn bounded<F>(
    fut: F,
    timeout: Option<Duration>,
) -> Result<F::Output, HookTimedOut>
where
    F: Future + Unpin,
{
    let Some(timeout) = timeout else {
        return Ok(fut.await);
    };

    let (deadline_tx, deadline_rx) = oneshot::channel::<()>();
    // We don't join the thread - it will just die after the timeout
    thread::spawn(move || {
        thread::sleep(timeout);
        let _ = deadline_tx.send(());
    });

    match future::select(fut, deadline_rx).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right((_, _)) => Err(HookTimedOut(timeout)),
    }
}

/// Drives startup and teardown over one schedule and one scope store
///
/// Levels are the serialization points: every hook of a level is awaited
/// before the next level begins, which is what guarantees that dependencies
/// are `Running` before their dependents start.
pub(crate) struct Orchestrator<'a> {
    graph: &'a DependencyGraph,
    schedule: &'a Schedule,
    options: &'a LifecycleOptions,
}

impl<'a> Orchestrator<'a> {
    pub(crate) fn new(
        graph: &'a DependencyGraph,
        schedule: &'a Schedule,
        options: &'a LifecycleOptions,
    ) -> Self {
        Orchestrator {
            graph,
            schedule,
            options,
        }
    }

    /// Start every component of the store's scope, level by level
    ///
    /// Within a level failures are collected, not fail-fast: siblings already
    /// in flight complete deterministically before rollback begins. On any
    /// failure everything that reached `Running` is torn down in strict
    /// reverse level order and the collected errors are returned together.
    pub(crate) async fn start(
        &self,
        store: &mut ScopeStore,
        singletons: Option<&ScopeStore>,
    ) -> Result<(), StartupFailed> {
        for (depth, level) in self.schedule.levels().iter().enumerate() {
            let members: Vec<&ComponentDescriptor> = level
                .iter()
                .filter_map(|identity| self.graph.get(identity))
                .filter(|descriptor| descriptor.scope() == store.scope())
                .filter(|descriptor| !store.is_running(descriptor.identity().as_str()))
                .collect();

            if members.is_empty() {
                continue;
            }

            tracing::debug!("starting level {} [{} component(s)]", depth, members.len());

            let results: Vec<Result<Instance, HookFailure>> = {
                let snapshot: &ScopeStore = store;
                let starts = members
                    .iter()
                    .map(|descriptor| self.start_component(descriptor, snapshot, singletons));
                stream::iter(starts)
                    .buffer_unordered(self.concurrency())
                    .collect()
                    .await
            };

            let mut failures = Vec::new();
            for result in results {
                match result {
                    Ok(instance) => {
                        tracing::debug!("component '{}' is running", instance.identity);
                        store.insert_running(instance);
                    }
                    Err(failure) => {
                        tracing::warn!("component '{}' failed to start: {}", failure.identity, failure);
                        store.mark_failed(&failure.identity);
                        failures.push(failure);
                    }
                }
            }

            if !failures.is_empty() {
                let running = store.all_running().count();
                tracing::warn!("startup aborted, rolling back {} running component(s)", running);
                let rollback_errors = self.teardown(store).await;
                return Err(StartupFailed {
                    errors: failures,
                    rollback_errors,
                });
            }
        }

        Ok(())
    }

    /// Factory plus `on_start` for one component, each bounded by the timeout
    async fn start_component(
        &self,
        descriptor: &ComponentDescriptor,
        store: &ScopeStore,
        singletons: Option<&ScopeStore>,
    ) -> Result<Instance, HookFailure> {
        let identity = descriptor.identity().clone();

        let deps = collect_deps(descriptor, store, singletons)
            .map_err(|error| HookFailure::new(identity.clone(), HookStage::Factory, error.into()))?;

        tracing::debug!("constructing '{}'", identity);
        let instance = match bounded((descriptor.factory)(deps), self.options.hook_timeout).await {
            Ok(Ok(instance)) => instance,
            Ok(Err(error)) => return Err(HookFailure::new(identity, HookStage::Factory, error)),
            Err(elapsed) => return Err(HookFailure::new(identity, HookStage::Factory, elapsed.into())),
        };

        if let Some(on_start) = &descriptor.on_start {
            match bounded(on_start(instance.clone()), self.options.hook_timeout).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => return Err(HookFailure::new(identity, HookStage::Start, error)),
                Err(elapsed) => {
                    return Err(HookFailure::new(identity, HookStage::Start, elapsed.into()))
                }
            }
        }

        Ok(instance)
    }

    /// Tear down everything `Running`, idempotent and best-effort
    pub(crate) async fn stop(&self, store: &mut ScopeStore) -> Result<(), ShutdownReport> {
        let failures = self.teardown(store).await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownReport { failures })
        }
    }

    /// Reverse-level teardown; individual failures are collected and never
    /// abort the remaining steps
    async fn teardown(&self, store: &mut ScopeStore) -> Vec<HookFailure> {
        let mut failures = Vec::new();

        for level in self.schedule.levels().iter().rev() {
            let mut members = Vec::new();
            for identity in level {
                let Some(instance) = store.running(identity.as_str()).cloned() else {
                    continue;
                };
                let Some(descriptor) = self.graph.get(identity) else {
                    continue;
                };
                let stop_future = descriptor.on_stop.as_ref().map(|hook| hook(instance));
                members.push((identity.clone(), stop_future));
            }

            if members.is_empty() {
                continue;
            }

            for (identity, _) in &members {
                store.mark_stopping(identity.as_str());
            }

            let timeout = self.options.hook_timeout;
            let stops = members.into_iter().map(|(identity, stop_future)| async move {
                let result = match stop_future {
                    Some(fut) => match bounded(fut, timeout).await {
                        Ok(result) => result,
                        Err(elapsed) => Err(elapsed.into()),
                    },
                    None => Ok(()),
                };
                (identity, result)
            });

            let results: Vec<(ComponentId, Result<(), DynError>)> = stream::iter(stops)
                .buffer_unordered(self.concurrency())
                .collect()
                .await;

            for (identity, result) in results {
                match result {
                    Ok(()) => {
                        tracing::debug!("component '{}' stopped", identity);
                        store.mark_stopped(identity.as_str());
                    }
                    Err(error) => {
                        let failure = HookFailure::new(identity.clone(), HookStage::Stop, error);
                        tracing::error!("component '{}' failed to stop: {}", identity, failure);
                        store.mark_failed(&identity);
                        failures.push(failure);
                    }
                }
            }
        }

        failures
    }

    fn concurrency(&self) -> usize {
        self.options.max_concurrency.max(1)
    }
}

/// Clone the already-running dependency instances into an owned bag
///
/// Request-scope starts fall back to the singleton store for singleton
/// dependencies; those are reused, never restarted.
fn collect_deps(
    descriptor: &ComponentDescriptor,
    store: &ScopeStore,
    singletons: Option<&ScopeStore>,
) -> Result<Deps, ResolveError> {
    let mut instances = BTreeMap::new();
    for dependency in descriptor.dependencies() {
        let instance = store
            .running(dependency.as_str())
            .or_else(|| singletons.and_then(|fallback| fallback.running(dependency.as_str())));

        match instance {
            Some(instance) => {
                instances.insert(dependency.clone(), instance.clone());
            }
            None => return Err(ResolveError::NotRunning(dependency.clone())),
        }
    }

    Ok(Deps::new(instances))
}
