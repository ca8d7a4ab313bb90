use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::types::{ComponentId, DynError};

/// Structural errors found while registering or resolving the graph
///
/// These are configuration-time defects. They are never retried; the graph
/// must not be started until they are fixed.
#[derive(Error, Debug, Clone)]
pub enum GraphError {
    /// A component identity has been registered twice
    #[error("component '{0}' is already registered")]
    DuplicateIdentity(ComponentId),

    /// A descriptor references an identity with no registration
    #[error("'{required_by}' depends on '{missing}' but it is not registered")]
    UnknownDependency {
        required_by: ComponentId,
        missing: ComponentId,
    },

    /// A singleton component must not depend on a request-scoped one
    #[error("singleton '{required_by}' must not depend on request-scoped '{dependency}'")]
    ScopeMismatch {
        required_by: ComponentId,
        dependency: ComponentId,
    },

    /// One or more dependency cycles, naming every implicated identity
    #[error("cyclic dependency involving: {}", join_ids(.identities))]
    CyclicDependency { identities: Vec<ComponentId> },
}

fn join_ids(identities: &[ComponentId]) -> String {
    identities
        .iter()
        .map(ComponentId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// All issues found in one resolution pass
#[derive(Error, Debug, Clone)]
pub struct GraphErrors {
    pub errors: Vec<GraphError>,
}
impl fmt::Display for GraphErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut display = Vec::new();
        display.push("the dependency graph had one or more errors:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}
impl From<GraphError> for GraphErrors {
    fn from(error: GraphError) -> Self {
        GraphErrors {
            errors: vec![error],
        }
    }
}

/// Which hook of a component failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Factory,
    Start,
    Stop,
    Health,
}
impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            HookStage::Factory => "factory",
            HookStage::Start => "start",
            HookStage::Stop => "stop",
            HookStage::Health => "health",
        };
        f.write_str(stage)
    }
}

/// A single failed (or timed out) hook invocation
#[derive(Error, Debug, Clone)]
#[error("{stage} hook for '{identity}' failed - error: {error}")]
pub struct HookFailure {
    pub identity: ComponentId,
    pub stage: HookStage,
    pub error: Arc<DynError>,
}
impl HookFailure {
    pub(crate) fn new(identity: ComponentId, stage: HookStage, error: DynError) -> Self {
        HookFailure {
            identity,
            stage,
            error: Arc::new(error),
        }
    }
}

/// A hook did not complete within the configured timeout
#[derive(Error, Debug, Clone)]
#[error("hook did not complete within {0:?}")]
pub struct HookTimedOut(pub std::time::Duration);

/// Startup failed - every same-level hook failure plus any rollback failures
///
/// No failure is singled out as primary; all are exposed as recorded.
#[derive(Error, Debug, Clone)]
pub struct StartupFailed {
    /// The hook failures that aborted startup
    pub errors: Vec<HookFailure>,
    /// Failures hit while rolling already-running components back
    pub rollback_errors: Vec<HookFailure>,
}
impl fmt::Display for StartupFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut display = Vec::new();
        display.push(format!("startup failed with {} error(s):", self.errors.len()));
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        if !self.rollback_errors.is_empty() {
            display.push(format!(
                "rollback hit {} further error(s):",
                self.rollback_errors.len()
            ));
            for error in &self.rollback_errors {
                display.push(format!("- {}", error));
            }
        }
        f.write_str(&display.join("\n"))
    }
}

/// Teardown failures collected during a stop
///
/// Shutdown always proceeds best-effort; a failing component never prevents
/// the remaining ones from being stopped.
#[derive(Error, Debug, Clone)]
pub struct ShutdownReport {
    pub failures: Vec<HookFailure>,
}
impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut display = Vec::new();
        display.push(format!(
            "shutdown finished with {} failure(s):",
            self.failures.len()
        ));
        for failure in &self.failures {
            display.push(format!("- {}", failure));
        }
        f.write_str(&display.join("\n"))
    }
}

/// Errors when looking a component up in a scope store
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// The identity was never registered
    #[error("component '{0}' is not registered")]
    UnknownIdentity(ComponentId),
    /// The component is registered but not in `Running` state in this store
    #[error("component '{0}' is not running")]
    NotRunning(ComponentId),

    #[error("failed to downcast '{identity}', required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        identity: ComponentId,
        required_type: &'static str,
        actual_type: &'static str,
    },
}

/// Errors surfaced by `App::start` and `App::begin_request_scope`
#[derive(Error, Debug, Clone)]
pub enum StartError {
    /// The graph failed validation
    #[error(transparent)]
    Graph(#[from] GraphErrors),
    /// Startup hooks failed and the store was rolled back
    #[error(transparent)]
    Startup(#[from] StartupFailed),
}
