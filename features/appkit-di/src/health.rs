use futures::{stream, StreamExt};

use crate::{
    graph::DependencyGraph,
    lifecycle::{bounded, LifecycleOptions},
    store::ScopeStore,
    types::ComponentId,
};

/// Outcome of a single health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    /// Unhealthy dominates, then Unknown, then Healthy
    fn combine(self, other: HealthStatus) -> HealthStatus {
        use HealthStatus::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Unknown, _) | (_, Unknown) => Unknown,
            (Healthy, Healthy) => Healthy,
        }
    }
}

/// Status plus an optional human-readable detail
#[derive(Debug, Clone)]
pub struct Health {
    pub status: HealthStatus,
    pub detail: Option<String>,
}

impl Health {
    pub fn healthy() -> Self {
        Health {
            status: HealthStatus::Healthy,
            detail: None,
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Health {
            status: HealthStatus::Unhealthy,
            detail: Some(detail.into()),
        }
    }

    pub fn unknown() -> Self {
        Health {
            status: HealthStatus::Unknown,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// One component's contribution to the aggregate report
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub identity: ComponentId,
    pub health: Health,
}

/// Combined process-wide health
///
/// Components without an `on_health` hook are omitted and do not affect the
/// aggregate status.
#[derive(Debug, Clone)]
pub struct AggregateHealth {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
}

impl AggregateHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Probe every running component exposing a health hook
///
/// Checks run concurrently and independently; a hanging probe is cut off by
/// the same timeout policy as startup hooks and reported as unhealthy.
pub(crate) async fn check(
    graph: &DependencyGraph,
    store: &ScopeStore,
    options: &LifecycleOptions,
) -> AggregateHealth {
    let timeout = options.hook_timeout;

    let mut checks = Vec::new();
    for instance in store.all_running() {
        let Some(descriptor) = graph.get(&instance.identity) else {
            continue;
        };
        let Some(hook) = descriptor.on_health.as_ref() else {
            continue;
        };

        let identity = instance.identity.clone();
        let probe = hook(instance.clone());
        checks.push(async move {
            let health = match bounded(probe, timeout).await {
                Ok(health) => health,
                Err(elapsed) => Health::unhealthy(elapsed.to_string()),
            };
            ComponentHealth { identity, health }
        });
    }

    let mut components: Vec<ComponentHealth> = stream::iter(checks)
        .buffer_unordered(options.max_concurrency.max(1))
        .collect()
        .await;
    components.sort_by(|a, b| a.identity.cmp(&b.identity));

    let status = components
        .iter()
        .fold(HealthStatus::Healthy, |aggregate, component| {
            aggregate.combine(component.health.status)
        });

    AggregateHealth { status, components }
}
