//! Integration tests for praya-extension-host.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use praya_extension_host::{
    CallbackResult, CapabilityHandle, CapabilityOutput, CapabilityProvider, Dependency,
    DescriptorBuilder, Error, Event, EventKind, Extension, ExtensionDescriptor, Host, HostBuilder,
    HostConfig, LifecycleState, LoadOutcome, SubscriptionId, Version, MANIFEST_FILE,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Extension that subscribes to ticks on init and records every delivery.
struct TickLogger {
    name: &'static str,
    priority: i32,
    log: Log,
}

impl Extension for TickLogger {
    fn on_init(&mut self, capabilities: CapabilityHandle) -> CallbackResult {
        capabilities.subscribe(EventKind::Tick, self.priority);
        Ok(())
    }

    fn on_event(&mut self, event: &Event) -> CallbackResult {
        if let Event::Tick { number } = event {
            self.log.lock().push(format!("{}:{}", self.name, number));
        }
        Ok(())
    }
}

/// Extension that records enable/disable transitions, optionally faulting.
struct Recorder {
    name: &'static str,
    log: Log,
    fail_enable: bool,
    fail_disable: bool,
}

impl Extension for Recorder {
    fn on_enable(&mut self) -> CallbackResult {
        self.log.lock().push(format!("enable:{}", self.name));
        if self.fail_enable {
            return Err("enable fault".into());
        }
        Ok(())
    }

    fn on_disable(&mut self) -> CallbackResult {
        self.log.lock().push(format!("disable:{}", self.name));
        if self.fail_disable {
            return Err("disable fault".into());
        }
        Ok(())
    }
}

fn descriptor(name: &str, entry: &str, deps: &[(&str, bool)]) -> ExtensionDescriptor {
    let mut builder = DescriptorBuilder::new(name, Version::new(1, 0, 0), entry);
    for &(dep, optional) in deps {
        builder = builder.dependency(if optional {
            Dependency::optional(dep)
        } else {
            Dependency::required(dep)
        });
    }
    builder.build().unwrap()
}

fn outcome<'a>(outcomes: &'a [LoadOutcome], name: &str) -> &'a LoadOutcome {
    outcomes
        .iter()
        .find(|o| o.name == name)
        .unwrap_or_else(|| panic!("no outcome for {}", name))
}

#[test]
fn load_all_reads_artifacts_from_disk() {
    let dir = tempfile::tempdir().unwrap();

    let base = dir.path().join("base");
    std::fs::create_dir(&base).unwrap();
    std::fs::write(
        base.join(MANIFEST_FILE),
        "name = \"base\"\nversion = \"1.0.0\"\nentry = \"base\"\n",
    )
    .unwrap();

    let addon = dir.path().join("addon");
    std::fs::create_dir(&addon).unwrap();
    std::fs::write(
        addon.join(MANIFEST_FILE),
        "name = \"addon\"\nversion = \"0.2.0\"\nentry = \"addon\"\n\n[[dependencies]]\nname = \"base\"\n",
    )
    .unwrap();

    let broken = dir.path().join("broken");
    std::fs::create_dir(&broken).unwrap();
    std::fs::write(broken.join(MANIFEST_FILE), "name = ").unwrap();

    let log: Log = Arc::default();
    let host = {
        let (a, b) = (Arc::clone(&log), Arc::clone(&log));
        HostBuilder::new(HostConfig::default())
            .entry_point("base", move || {
                Box::new(Recorder {
                    name: "base",
                    log: Arc::clone(&a),
                    fail_enable: false,
                    fail_disable: false,
                })
            })
            .entry_point("addon", move || {
                Box::new(Recorder {
                    name: "addon",
                    log: Arc::clone(&b),
                    fail_enable: false,
                    fail_disable: false,
                })
            })
            .boot()
    };

    // Declared out of dependency order on purpose.
    let outcomes = host.load_all(&[addon, broken, base]);
    assert_eq!(outcomes.len(), 3);

    assert!(outcome(&outcomes, "base").result.is_ok());
    assert!(outcome(&outcomes, "addon").result.is_ok());
    let parse_failure = outcomes.iter().find(|o| o.descriptor.is_none()).unwrap();
    assert!(matches!(parse_failure.result, Err(Error::DescriptorParse(_))));

    assert_eq!(host.enable_order(), vec!["base", "addon"]);
    assert_eq!(*log.lock(), vec!["enable:base", "enable:addon"]);
}

#[test]
fn required_dependencies_precede_dependents() {
    // Diamond: a <- b, a <- c, {b, c} <- d.
    let log: Log = Arc::default();
    let mut builder = HostBuilder::new(HostConfig::default());
    for name in ["a", "b", "c", "d"] {
        let log = Arc::clone(&log);
        builder = builder.entry_point(name, move || {
            Box::new(Recorder {
                name: Box::leak(name.to_string().into_boxed_str()),
                log: Arc::clone(&log),
                fail_enable: false,
                fail_disable: false,
            })
        });
    }
    let host = builder.boot();

    let outcomes = host.load_descriptors(vec![
        descriptor("d", "d", &[("b", false), ("c", false)]),
        descriptor("c", "c", &[("a", false)]),
        descriptor("b", "b", &[("a", false)]),
        descriptor("a", "a", &[]),
    ]);
    assert!(outcomes.iter().all(|o| o.result.is_ok()));

    let order = host.enable_order();
    let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
    assert!(pos("a") < pos("b"));
    assert!(pos("a") < pos("c"));
    assert!(pos("b") < pos("d"));
    assert!(pos("c") < pos("d"));
}

#[test]
fn dependency_cycle_enables_neither() {
    let host = HostBuilder::new(HostConfig::default())
        .entry_point("noop", || Box::new(Noop))
        .boot();

    let outcomes = host.load_descriptors(vec![
        descriptor("a", "noop", &[("b", false)]),
        descriptor("b", "noop", &[("a", false)]),
    ]);

    for name in ["a", "b"] {
        assert!(matches!(
            outcome(&outcomes, name).result,
            Err(Error::CyclicDependency { .. })
        ));
        assert!(!host.contains(name));
    }
    assert!(host.enable_order().is_empty());
}

struct Noop;

impl Extension for Noop {}

#[test]
fn enable_fault_skips_transitive_dependents_only() {
    let log: Log = Arc::default();
    let mk = |name: &'static str, fail_enable: bool, log: &Log| {
        let log = Arc::clone(log);
        move || -> Box<dyn Extension> {
            Box::new(Recorder {
                name,
                log: Arc::clone(&log),
                fail_enable,
                fail_disable: false,
            })
        }
    };

    let host = HostBuilder::new(HostConfig::default())
        .entry_point("base", mk("base", true, &log))
        .entry_point("mid", mk("mid", false, &log))
        .entry_point("top", mk("top", false, &log))
        .entry_point("indie", mk("indie", false, &log))
        .boot();

    let outcomes = host.load_descriptors(vec![
        descriptor("base", "base", &[]),
        descriptor("mid", "mid", &[("base", false)]),
        descriptor("top", "top", &[("mid", false)]),
        descriptor("indie", "indie", &[]),
    ]);

    assert!(matches!(
        outcome(&outcomes, "base").result,
        Err(Error::Sandbox(_))
    ));
    for name in ["mid", "top"] {
        assert!(matches!(
            outcome(&outcomes, name).result,
            Err(Error::SkippedDueToDependencyFault { .. })
        ));
    }
    assert!(outcome(&outcomes, "indie").result.is_ok());
    assert_eq!(host.enable_order(), vec!["indie"]);
    assert_eq!(
        host.get("base").unwrap().state(),
        LifecycleState::Unloaded
    );
}

/// Extension that unsubscribes itself on its first delivery.
struct OneShot {
    handle: Option<CapabilityHandle>,
    subscription: Option<SubscriptionId>,
    deliveries: Arc<Mutex<u32>>,
}

impl Extension for OneShot {
    fn on_init(&mut self, capabilities: CapabilityHandle) -> CallbackResult {
        self.subscription = Some(capabilities.subscribe(EventKind::Tick, 0));
        self.handle = Some(capabilities);
        Ok(())
    }

    fn on_event(&mut self, _event: &Event) -> CallbackResult {
        *self.deliveries.lock() += 1;
        if let (Some(handle), Some(id)) = (&self.handle, self.subscription.take()) {
            handle.unsubscribe(id);
        }
        Ok(())
    }
}

#[test]
fn unsubscribe_during_delivery_still_receives_that_delivery() {
    let deliveries = Arc::new(Mutex::new(0u32));
    let host = {
        let deliveries = Arc::clone(&deliveries);
        HostBuilder::new(HostConfig::default())
            .entry_point("oneshot", move || {
                Box::new(OneShot {
                    handle: None,
                    subscription: None,
                    deliveries: Arc::clone(&deliveries),
                })
            })
            .boot()
    };

    let outcomes = host.load_descriptors(vec![descriptor("oneshot", "oneshot", &[])]);
    assert!(outcomes[0].result.is_ok());

    // Delivered once from the snapshot despite unsubscribing mid-pass.
    assert!(host.tick().is_empty());
    assert_eq!(*deliveries.lock(), 1);

    // Subscription is really gone.
    assert!(host.tick().is_empty());
    assert_eq!(*deliveries.lock(), 1);
}

/// Extension that re-subscribes itself during delivery.
struct Multiplier {
    handle: Option<CapabilityHandle>,
    deliveries: Arc<Mutex<u32>>,
    resubscribed: bool,
}

impl Extension for Multiplier {
    fn on_init(&mut self, capabilities: CapabilityHandle) -> CallbackResult {
        capabilities.subscribe(EventKind::Tick, 0);
        self.handle = Some(capabilities);
        Ok(())
    }

    fn on_event(&mut self, _event: &Event) -> CallbackResult {
        *self.deliveries.lock() += 1;
        if !self.resubscribed {
            self.resubscribed = true;
            if let Some(handle) = &self.handle {
                handle.subscribe(EventKind::Tick, 0);
            }
        }
        Ok(())
    }
}

#[test]
fn subscribe_during_delivery_misses_the_in_progress_pass() {
    let deliveries = Arc::new(Mutex::new(0u32));
    let host = {
        let deliveries = Arc::clone(&deliveries);
        HostBuilder::new(HostConfig::default())
            .entry_point("multi", move || {
                Box::new(Multiplier {
                    handle: None,
                    deliveries: Arc::clone(&deliveries),
                    resubscribed: false,
                })
            })
            .boot()
    };

    host.load_descriptors(vec![descriptor("multi", "multi", &[])]);

    // First pass: the new subscription is not in the snapshot.
    host.tick();
    assert_eq!(*deliveries.lock(), 1);

    // Second pass: both subscriptions deliver.
    host.tick();
    assert_eq!(*deliveries.lock(), 3);
}

#[test]
fn delivery_follows_priority_then_registration_order() {
    let log: Log = Arc::default();
    let mk = |name: &'static str, priority: i32, log: &Log| {
        let log = Arc::clone(log);
        move || -> Box<dyn Extension> {
            Box::new(TickLogger {
                name,
                priority,
                log: Arc::clone(&log),
            })
        }
    };

    let host = HostBuilder::new(HostConfig::default())
        .entry_point("low", mk("low", 10, &log))
        .entry_point("high", mk("high", -10, &log))
        .entry_point("mid-a", mk("mid-a", 0, &log))
        .entry_point("mid-b", mk("mid-b", 0, &log))
        .boot();

    // Load order fixes registration order for the priority ties.
    host.load_descriptors(vec![
        descriptor("low", "low", &[]),
        descriptor("mid-a", "mid-a", &[]),
        descriptor("mid-b", "mid-b", &[]),
        descriptor("high", "high", &[]),
    ]);

    host.tick();
    assert_eq!(
        *log.lock(),
        vec!["high:1", "mid-a:1", "mid-b:1", "low:1"]
    );
}

/// Provider that hands out timer tokens and records their release.
struct TimerProvider {
    released: Mutex<Vec<u64>>,
}

impl CapabilityProvider for TimerProvider {
    fn call(&self, method: &str, _payload: Value) -> Result<CapabilityOutput, String> {
        match method {
            "start" => Ok(CapabilityOutput::with_resource(Value::from(42u64), 42)),
            other => Err(format!("no such method: {}", other)),
        }
    }

    fn release(&self, token: u64) {
        self.released.lock().push(token);
    }
}

/// Extension that acquires a timer, then overruns its budget on a tick.
struct Runaway;

impl Extension for Runaway {
    fn on_init(&mut self, capabilities: CapabilityHandle) -> CallbackResult {
        capabilities.call("timers", "start", Value::Null)?;
        capabilities.subscribe(EventKind::Tick, 0);
        Ok(())
    }

    fn on_event(&mut self, _event: &Event) -> CallbackResult {
        std::thread::sleep(Duration::from_millis(500));
        Ok(())
    }
}

#[test]
fn budget_overrun_unloads_and_releases_resources() {
    let timers = Arc::new(TimerProvider {
        released: Mutex::new(Vec::new()),
    });

    let host = HostBuilder::new(
        HostConfig::default().with_callback_budget(Duration::from_millis(50)),
    )
    .provider("timers", Arc::clone(&timers) as Arc<dyn CapabilityProvider>)
    .unwrap()
    .entry_point("runaway", || Box::new(Runaway))
    .boot();

    let mut desc = descriptor("runaway", "runaway", &[]);
    desc.capabilities.push("timers".to_string());
    let outcomes = host.load_descriptors(vec![desc]);
    assert!(outcomes[0].result.is_ok());
    assert!(timers.released.lock().is_empty());

    // Exactly one timeout fault; the extension is unloaded and drained.
    let faults = host.tick();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].is_timeout());
    assert_eq!(faults[0].extension, "runaway");
    assert_eq!(
        host.get("runaway").unwrap().state(),
        LifecycleState::Unloaded
    );
    assert_eq!(*timers.released.lock(), vec![42]);

    let info = host.extension_info("runaway").unwrap();
    assert!(info.last_fault.is_some());

    // No further routing to the dead extension.
    assert!(host.tick().is_empty());
}

#[test]
fn shutdown_unloads_everything_in_reverse_enable_order() {
    let log: Log = Arc::default();
    let mk = |name: &'static str, fail_disable: bool, log: &Log| {
        let log = Arc::clone(log);
        move || -> Box<dyn Extension> {
            Box::new(Recorder {
                name,
                log: Arc::clone(&log),
                fail_enable: false,
                fail_disable,
            })
        }
    };

    let host = HostBuilder::new(HostConfig::default())
        .entry_point("a", mk("a", false, &log))
        .entry_point("b", mk("b", true, &log))
        .entry_point("c", mk("c", false, &log))
        .boot();

    host.load_descriptors(vec![
        descriptor("a", "a", &[]),
        descriptor("b", "b", &[("a", false)]),
        descriptor("c", "c", &[("b", false)]),
    ]);
    assert_eq!(host.enable_order(), vec!["a", "b", "c"]);

    let faults = host.shutdown();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].extension, "b");

    let disables: Vec<String> = log
        .lock()
        .iter()
        .filter(|l| l.starts_with("disable:"))
        .cloned()
        .collect();
    assert_eq!(disables, vec!["disable:c", "disable:b", "disable:a"]);

    for name in ["a", "b", "c"] {
        assert_eq!(host.get(name).unwrap().state(), LifecycleState::Unloaded);
    }

    // Exactly once: a second shutdown finds nothing to do.
    assert!(host.shutdown().is_empty());
}

#[test]
fn undeclared_capability_fails_bind_declared_never_does() {
    struct EchoProvider;

    impl CapabilityProvider for EchoProvider {
        fn call(&self, _method: &str, payload: Value) -> Result<CapabilityOutput, String> {
            Ok(CapabilityOutput::value(payload))
        }
    }

    let host = HostBuilder::new(HostConfig::default())
        .provider("echo", Arc::new(EchoProvider))
        .unwrap()
        .entry_point("noop", || Box::new(Noop))
        .boot();

    // Declaring an unregistered capability fails the bind at load.
    let mut wants_ghost = descriptor("wants-ghost", "noop", &[]);
    wants_ghost.capabilities.push("ghost".to_string());
    let outcomes = host.load_descriptors(vec![wants_ghost]);
    assert!(matches!(
        outcomes[0].result,
        Err(Error::UnknownCapability(ref name)) if name == "ghost"
    ));

    // Declaring registered capabilities never fails.
    let mut wants_echo = descriptor("wants-echo", "noop", &[]);
    wants_echo.capabilities.push("echo".to_string());
    let outcomes = host.load_descriptors(vec![wants_echo]);
    assert!(outcomes[0].result.is_ok());
}

/// Extension whose event handler always fails.
struct SourTick;

impl Extension for SourTick {
    fn on_init(&mut self, capabilities: CapabilityHandle) -> CallbackResult {
        capabilities.subscribe(EventKind::Tick, 0);
        Ok(())
    }

    fn on_event(&mut self, _event: &Event) -> CallbackResult {
        Err("bad tick".into())
    }
}

#[test]
fn event_fault_notifies_lifecycle_observers() {
    let observed: Log = Arc::default();
    let host = {
        let observed = Arc::clone(&observed);
        HostBuilder::new(HostConfig::default())
            .entry_point("sour", || Box::new(SourTick))
            .on_lifecycle_event(move |event| {
                observed
                    .lock()
                    .push(format!("{}:{}", event.event_name(), event.extension_name()));
            })
            .boot()
    };

    let outcomes = host.load_descriptors(vec![descriptor("sour", "sour", &[])]);
    assert!(outcomes[0].result.is_ok());

    let faults = host.tick();
    assert_eq!(faults.len(), 1);
    assert_eq!(
        host.get("sour").unwrap().state(),
        LifecycleState::Unloaded
    );

    // Observers see the event-phase fault and the resulting unload.
    let log = observed.lock();
    assert!(log.contains(&"faulted:sour".to_string()));
    assert!(log.contains(&"unloaded:sour".to_string()));
}

#[test]
fn shutdown_event_reaches_subscribers_before_drain() {
    struct ShutdownListener {
        log: Log,
    }

    impl Extension for ShutdownListener {
        fn on_init(&mut self, capabilities: CapabilityHandle) -> CallbackResult {
            capabilities.subscribe(EventKind::Shutdown, 0);
            Ok(())
        }

        fn on_event(&mut self, event: &Event) -> CallbackResult {
            if matches!(event, Event::Shutdown) {
                self.log.lock().push("shutdown-event".to_string());
            }
            Ok(())
        }

        fn on_disable(&mut self) -> CallbackResult {
            self.log.lock().push("disabled".to_string());
            Ok(())
        }
    }

    let log: Log = Arc::default();
    let host = {
        let log = Arc::clone(&log);
        HostBuilder::new(HostConfig::default())
            .entry_point("listener", move || {
                Box::new(ShutdownListener {
                    log: Arc::clone(&log),
                })
            })
            .boot()
    };

    host.load_descriptors(vec![descriptor("listener", "listener", &[])]);
    host.shutdown();

    assert_eq!(*log.lock(), vec!["shutdown-event", "disabled"]);
}

fn _assert_host_is_send_sync(host: Host) {
    fn check<T: Send + Sync>(_: T) {}
    check(host);
}
