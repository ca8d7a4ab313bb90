use std::{
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};

use appkit_di::{
    App, ComponentDescriptor, DynError, GraphError, Health, HealthStatus, HookStage,
    LifecycleOptions, ResolveError, Scope, StartError,
};
use futures::executor::block_on;

/// Shared log of lifecycle events, for asserting ordering across components
#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|recorded| recorded == event)
            .unwrap_or_else(|| panic!("event '{event}' was not recorded"))
    }
}

struct Unit;

/// Register a component that logs its factory and stop hook invocations
fn tracked(app: &mut App, log: &EventLog, identity: &'static str, scope: Scope, deps: &[&str]) {
    let start_log = log.clone();
    let stop_log = log.clone();

    app.register(
        ComponentDescriptor::builder(identity, scope, move |_| {
            let log = start_log.clone();
            async move {
                log.push(format!("start:{identity}"));
                Ok::<_, Infallible>(Unit)
            }
        })
        .depends_on(deps.iter().copied())
        .on_stop(move |_| {
            let log = stop_log.clone();
            async move {
                log.push(format!("stop:{identity}"));
                Ok::<_, Infallible>(())
            }
        })
        .build(),
    )
    .unwrap();
}

#[test]
fn diamond_starts_in_order_and_stops_in_reverse() {
    let log = EventLog::default();
    let mut app = App::new();
    tracked(&mut app, &log, "a", Scope::Singleton, &[]);
    tracked(&mut app, &log, "b", Scope::Singleton, &["a"]);
    tracked(&mut app, &log, "c", Scope::Singleton, &["a"]);
    tracked(&mut app, &log, "d", Scope::Singleton, &["b", "c"]);

    block_on(app.start()).unwrap();
    block_on(app.stop()).unwrap();

    assert_eq!(log.events().len(), 8);

    // Dependencies strictly before dependents
    assert!(log.position("start:a") < log.position("start:b"));
    assert!(log.position("start:a") < log.position("start:c"));
    assert!(log.position("start:b") < log.position("start:d"));
    assert!(log.position("start:c") < log.position("start:d"));

    // Teardown mirrors startup
    assert!(log.position("stop:d") < log.position("stop:b"));
    assert!(log.position("stop:d") < log.position("stop:c"));
    assert!(log.position("stop:b") < log.position("stop:a"));
    assert!(log.position("stop:c") < log.position("stop:a"));
}

#[test]
fn duplicate_identity_is_rejected_at_registration() {
    let log = EventLog::default();
    let mut app = App::new();
    tracked(&mut app, &log, "pg", Scope::Singleton, &[]);

    let err = app
        .register(
            ComponentDescriptor::builder("pg", Scope::Singleton, |_| async {
                Ok::<_, Infallible>(Unit)
            })
            .build(),
        )
        .unwrap_err();

    assert!(matches!(err, GraphError::DuplicateIdentity(id) if id.as_str() == "pg"));
}

#[test]
fn unknown_dependency_fails_validation() {
    let log = EventLog::default();
    let mut app = App::new();
    tracked(&mut app, &log, "dao", Scope::Singleton, &["pg"]);

    let errors = app.validate().unwrap_err().errors;
    assert!(matches!(
        &errors[0],
        GraphError::UnknownDependency { required_by, missing }
            if required_by.as_str() == "dao" && missing.as_str() == "pg"
    ));

    // Start surfaces the same defect without running anything
    match block_on(app.start()) {
        Err(StartError::Graph(_)) => {}
        other => panic!("expected a graph error, got {other:?}"),
    }
    assert!(log.events().is_empty());
}

#[test]
fn singletons_resolve_to_the_same_instance() {
    let mut app = App::new();
    app.register(
        ComponentDescriptor::builder("counter", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Mutex::new(0_u32))
        })
        .build(),
    )
    .unwrap();

    block_on(app.start()).unwrap();

    let first = app.resolve::<Mutex<u32>>("counter").unwrap();
    let second = app.resolve::<Mutex<u32>>("counter").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn resolution_errors_distinguish_unknown_from_not_running() {
    let log = EventLog::default();
    let mut app = App::new();
    tracked(&mut app, &log, "pg", Scope::Singleton, &[]);

    assert!(matches!(
        app.resolve::<Unit>("ghost"),
        Err(ResolveError::UnknownIdentity(_))
    ));
    assert!(matches!(
        app.resolve::<Unit>("pg"),
        Err(ResolveError::NotRunning(_))
    ));

    block_on(app.start()).unwrap();
    assert!(app.resolve::<Unit>("pg").is_ok());

    // Wrong type on a running component reports both sides of the mismatch
    assert!(matches!(
        app.resolve::<String>("pg"),
        Err(ResolveError::DowncastFailed { .. })
    ));
}

#[test]
fn failing_on_start_rolls_back_earlier_levels() {
    let log = EventLog::default();
    let mut app = App::new();
    tracked(&mut app, &log, "a", Scope::Singleton, &[]);
    tracked(&mut app, &log, "c", Scope::Singleton, &["a"]);

    app.register(
        ComponentDescriptor::builder("b", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Unit)
        })
        .depends_on(["a"])
        .on_start(|_| async { Err::<(), DynError>("start hook exploded".into()) })
        .build(),
    )
    .unwrap();

    let failed = match block_on(app.start()) {
        Err(StartError::Startup(failed)) => failed,
        other => panic!("expected startup failure, got {other:?}"),
    };

    assert_eq!(failed.errors.len(), 1);
    assert_eq!(failed.errors[0].identity.as_str(), "b");
    assert_eq!(failed.errors[0].stage, HookStage::Start);
    assert!(failed.rollback_errors.is_empty());

    // Everything that reached Running was torn down, dependents first
    assert!(log.events().contains(&"stop:a".to_string()));
    assert!(log.position("stop:c") < log.position("stop:a"));
    assert!(matches!(
        app.resolve::<Unit>("a"),
        Err(ResolveError::NotRunning(_))
    ));
    assert!(matches!(
        app.resolve::<Unit>("c"),
        Err(ResolveError::NotRunning(_))
    ));
}

#[test]
fn stop_after_late_registration_still_tears_down() {
    let log = EventLog::default();
    let mut app = App::new();
    tracked(&mut app, &log, "a", Scope::Singleton, &[]);

    block_on(app.start()).unwrap();

    // Registering afterwards must not mask the running components
    tracked(&mut app, &log, "late", Scope::Singleton, &[]);

    block_on(app.stop()).unwrap();

    assert!(log.events().contains(&"stop:a".to_string()));
    assert!(matches!(
        app.resolve::<Unit>("a"),
        Err(ResolveError::NotRunning(_))
    ));
}

#[test]
fn restart_after_stop_begins_a_fresh_store() {
    let built = Arc::new(Mutex::new(0_u32));
    let factory_built = built.clone();

    let mut app = App::new();
    app.register(
        ComponentDescriptor::builder("pg", Scope::Singleton, move |_| {
            let built = factory_built.clone();
            async move {
                *built.lock().unwrap() += 1;
                Ok::<_, Infallible>(Unit)
            }
        })
        .build(),
    )
    .unwrap();

    block_on(app.start()).unwrap();
    let first = app.resolve::<Unit>("pg").unwrap();
    block_on(app.stop()).unwrap();

    block_on(app.start()).unwrap();
    let second = app.resolve::<Unit>("pg").unwrap();

    assert_eq!(*built.lock().unwrap(), 2);
    assert!(!Arc::ptr_eq(&first, &second));
}

#[test]
fn stop_twice_only_invokes_on_stop_once() {
    let log = EventLog::default();
    let mut app = App::new();
    tracked(&mut app, &log, "pg", Scope::Singleton, &[]);

    block_on(app.start()).unwrap();
    block_on(app.stop()).unwrap();
    block_on(app.stop()).unwrap();

    let stops = log
        .events()
        .iter()
        .filter(|event| *event == "stop:pg")
        .count();
    assert_eq!(stops, 1);
}

#[test]
fn rollback_failures_are_reported_alongside_start_errors() {
    let mut app = App::new();
    app.register(
        ComponentDescriptor::builder("a", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Unit)
        })
        .on_stop(|_| async { Err::<(), DynError>("stop hook exploded".into()) })
        .build(),
    )
    .unwrap();
    app.register(
        ComponentDescriptor::builder("b", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Unit)
        })
        .depends_on(["a"])
        .on_start(|_| async { Err::<(), DynError>("start hook exploded".into()) })
        .build(),
    )
    .unwrap();

    let failed = match block_on(app.start()) {
        Err(StartError::Startup(failed)) => failed,
        other => panic!("expected startup failure, got {other:?}"),
    };

    assert_eq!(failed.errors.len(), 1);
    assert_eq!(failed.errors[0].identity.as_str(), "b");
    assert_eq!(failed.errors[0].stage, HookStage::Start);

    // a's failing stop hook is recorded against the rollback, not dropped
    assert_eq!(failed.rollback_errors.len(), 1);
    assert_eq!(failed.rollback_errors[0].identity.as_str(), "a");
    assert_eq!(failed.rollback_errors[0].stage, HookStage::Stop);

    // Rollback still took a out of Running despite its failing hook
    assert!(matches!(
        app.resolve::<Unit>("a"),
        Err(ResolveError::NotRunning(_))
    ));
}

#[test]
fn every_failure_within_a_level_is_collected() {
    fn broken(app: &mut App, identity: &'static str) {
        app.register(
            ComponentDescriptor::builder(identity, Scope::Singleton, |_| async {
                Ok::<_, Infallible>(Unit)
            })
            .depends_on(["a"])
            .on_start(|_| async { Err::<(), DynError>("start hook exploded".into()) })
            .build(),
        )
        .unwrap();
    }

    let mut app = App::new();
    app.register(
        ComponentDescriptor::builder("a", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Unit)
        })
        .build(),
    )
    .unwrap();
    broken(&mut app, "x");
    broken(&mut app, "y");

    let failed = match block_on(app.start()) {
        Err(StartError::Startup(failed)) => failed,
        other => panic!("expected startup failure, got {other:?}"),
    };

    let mut identities: Vec<&str> = failed
        .errors
        .iter()
        .map(|failure| failure.identity.as_str())
        .collect();
    identities.sort_unstable();
    assert_eq!(identities, vec!["x", "y"]);
}

#[test]
fn failing_on_stop_does_not_block_remaining_teardown() {
    let log = EventLog::default();
    let mut app = App::new();
    tracked(&mut app, &log, "a", Scope::Singleton, &[]);

    app.register(
        ComponentDescriptor::builder("b", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Unit)
        })
        .depends_on(["a"])
        .on_stop(|_| async { Err::<(), DynError>("stop hook exploded".into()) })
        .build(),
    )
    .unwrap();

    block_on(app.start()).unwrap();

    let report = block_on(app.stop()).unwrap_err();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].identity.as_str(), "b");
    assert_eq!(report.failures[0].stage, HookStage::Stop);

    // a was still stopped despite b's failure
    assert!(log.events().contains(&"stop:a".to_string()));
}

#[test]
fn request_scope_isolates_instances_and_delegates_singletons() {
    let log = EventLog::default();
    let mut app = App::new();
    tracked(&mut app, &log, "pool", Scope::Singleton, &[]);
    tracked(&mut app, &log, "session", Scope::Request, &["pool"]);

    block_on(app.start()).unwrap();

    let scope_one = block_on(app.begin_request_scope()).unwrap();
    let scope_two = block_on(app.begin_request_scope()).unwrap();

    // Identical instance inside one context
    let first = scope_one.resolve::<Unit>("session").unwrap();
    let again = scope_one.resolve::<Unit>("session").unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    // A different instance in another context
    let other = scope_two.resolve::<Unit>("session").unwrap();
    assert!(!Arc::ptr_eq(&first, &other));

    // Singleton lookups read through to the process store
    let pool = scope_one.resolve::<Unit>("pool").unwrap();
    assert!(Arc::ptr_eq(&pool, &app.resolve::<Unit>("pool").unwrap()));

    block_on(scope_one.end()).unwrap();

    // Ending a context tears down its request-scoped instances only
    let session_stops = log
        .events()
        .iter()
        .filter(|event| *event == "stop:session")
        .count();
    assert_eq!(session_stops, 1);
    assert!(app.resolve::<Unit>("pool").is_ok());

    block_on(scope_two.end()).unwrap();
    block_on(app.stop()).unwrap();
}

#[test]
fn request_scope_resolution_fails_outside_a_context() {
    let log = EventLog::default();
    let mut app = App::new();
    tracked(&mut app, &log, "session", Scope::Request, &[]);

    block_on(app.start()).unwrap();

    // The singleton store never realizes request-scoped components
    assert!(matches!(
        app.resolve::<Unit>("session"),
        Err(ResolveError::NotRunning(_))
    ));
}

#[test]
fn health_aggregates_with_precedence() {
    fn probe(status: &'static str) -> impl Fn(Arc<Unit>) -> futures::future::Ready<Health> {
        move |_| {
            futures::future::ready(match status {
                "healthy" => Health::healthy(),
                "unknown" => Health::unknown(),
                _ => Health::unhealthy("backend unreachable"),
            })
        }
    }

    let mut app = App::new();
    app.register(
        ComponentDescriptor::builder("ok", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Unit)
        })
        .on_health(probe("healthy"))
        .build(),
    )
    .unwrap();
    app.register(
        ComponentDescriptor::builder("meh", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Unit)
        })
        .on_health(probe("unknown"))
        .build(),
    )
    .unwrap();
    // No health hook: omitted from the report entirely
    app.register(
        ComponentDescriptor::builder("mute", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Unit)
        })
        .build(),
    )
    .unwrap();

    block_on(app.start()).unwrap();

    let report = block_on(app.health());
    assert_eq!(report.status, HealthStatus::Unknown);
    assert_eq!(report.components.len(), 2);

    // An unhealthy component dominates the aggregate
    let mut app = App::new();
    app.register(
        ComponentDescriptor::builder("ok", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Unit)
        })
        .on_health(probe("healthy"))
        .build(),
    )
    .unwrap();
    app.register(
        ComponentDescriptor::builder("down", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Unit)
        })
        .on_health(probe("unhealthy"))
        .build(),
    )
    .unwrap();

    block_on(app.start()).unwrap();

    let report = block_on(app.health());
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(!report.is_healthy());
}

#[test]
fn hanging_health_probe_reports_unhealthy() {
    let mut app = App::with_options(LifecycleOptions {
        hook_timeout: Some(Duration::from_millis(50)),
        ..LifecycleOptions::default()
    });

    app.register(
        ComponentDescriptor::builder("stuck", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Unit)
        })
        .on_health(|_| futures::future::pending::<Health>())
        .build(),
    )
    .unwrap();

    block_on(app.start()).unwrap();

    let report = block_on(app.health());
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert_eq!(report.components[0].identity.as_str(), "stuck");
}

#[test]
fn hanging_on_start_times_out_and_rolls_back() {
    let log = EventLog::default();
    let mut app = App::with_options(LifecycleOptions {
        hook_timeout: Some(Duration::from_millis(50)),
        ..LifecycleOptions::default()
    });
    tracked(&mut app, &log, "a", Scope::Singleton, &[]);

    app.register(
        ComponentDescriptor::builder("stuck", Scope::Singleton, |_| async {
            Ok::<_, Infallible>(Unit)
        })
        .depends_on(["a"])
        .on_start(|_| futures::future::pending::<Result<(), Infallible>>())
        .build(),
    )
    .unwrap();

    let failed = match block_on(app.start()) {
        Err(StartError::Startup(failed)) => failed,
        other => panic!("expected startup failure, got {other:?}"),
    };

    assert_eq!(failed.errors[0].identity.as_str(), "stuck");
    assert_eq!(failed.errors[0].stage, HookStage::Start);
    assert!(log.events().contains(&"stop:a".to_string()));
}
