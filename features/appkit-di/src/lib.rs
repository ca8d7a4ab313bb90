//! appkit-di wires an application together from declaratively registered
//! components: each component names its identity, scope and dependencies and
//! supplies a factory plus optional start/stop/health hooks. The crate
//! resolves a cycle-checked level schedule, starts components level by level
//! with bounded parallelism, rolls back on partial startup failure, tears
//! down in reverse order and aggregates health across the graph.
//!
//! # Examples
//!
//! ```
//! use appkit_di::{App, ComponentDescriptor, Scope};
//! use std::convert::Infallible;
//!
//! futures::executor::block_on(async {
//!     let mut app = App::new();
//!
//!     app.register(
//!         ComponentDescriptor::builder("greeting", Scope::Singleton, |_| async {
//!             Ok::<_, Infallible>("hello".to_string())
//!         })
//!         .build(),
//!     )
//!     .unwrap();
//!
//!     app.register(
//!         ComponentDescriptor::builder("banner", Scope::Singleton, |deps| async move {
//!             let greeting = deps.get::<String>("greeting")?;
//!             Ok::<_, appkit_di::ResolveError>(format!("{} world", greeting))
//!         })
//!         .depends_on(["greeting"])
//!         .build(),
//!     )
//!     .unwrap();
//!
//!     app.start().await.unwrap();
//!     let banner = app.resolve::<String>("banner").unwrap();
//!     assert_eq!(banner.as_str(), "hello world");
//!     app.stop().await.unwrap();
//! });
//! ```
//!
//! appkit-di consists of the following components:
//!
//! 1. descriptor - declaring a component, its scope, dependencies and hooks
//! 2. graph - registration, validation and level scheduling
//! 3. store - realized instances per scope (singleton or request)
//! 4. lifecycle - the level-by-level orchestrator with rollback
//! 5. health - probing running components and combining the results
//! 6. app - the facade tying registration, lifecycle and resolution together

pub mod app;
pub mod descriptor;
pub mod errors;
pub mod graph;
pub mod health;
pub mod lifecycle;
pub mod store;
pub mod types;

pub use app::{App, RequestScope};
pub use descriptor::{ComponentDescriptor, Deps, DescriptorBuilder};
pub use errors::{
    GraphError, GraphErrors, HookFailure, HookStage, HookTimedOut, ResolveError, ShutdownReport,
    StartError, StartupFailed,
};
pub use graph::{DependencyGraph, Schedule};
pub use health::{AggregateHealth, ComponentHealth, Health, HealthStatus};
pub use lifecycle::LifecycleOptions;
pub use store::{InstanceState, ScopeStore};
pub use types::{ComponentId, DynError, Injectable, Instance, Scope};
