//! Per-extension isolation boundary.
//!
//! Every extension callback runs on a dedicated worker thread owned by the
//! extension's sandbox. The host thread waits for the result with a wall-clock
//! budget; a callback that returns `Err`, panics, or overruns the budget is
//! converted into a [`SandboxFault`] instead of propagating into host control
//! flow, and the extension is unloaded with its tracked resources released.
//!
//! Timeout enforcement is advisory, not preemptive: on budget overrun the
//! worker thread is abandoned (its channel is dropped) and exits at its next
//! scheduling boundary. Until then the callback may continue to run; it can no
//! longer reach the host, but a callback stuck in a pure spin loop will pin a
//! thread until it finishes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;

use crate::capability::CapabilityHandle;
use crate::descriptor::ExtensionDescriptor;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::extension::{Extension, ExtensionInfo};
use crate::lifecycle::LifecycleState;

static NEXT_EXTENSION_ID: AtomicU64 = AtomicU64::new(1);

/// Which callback a fault occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackPhase {
    /// `on_init`.
    Init,
    /// `on_enable`.
    Enable,
    /// `on_event`.
    Event,
    /// `on_disable`.
    Disable,
}

impl std::fmt::Display for CallbackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Enable => "enable",
            Self::Event => "event",
            Self::Disable => "disable",
        };
        write!(f, "{}", name)
    }
}

/// Why a sandboxed callback faulted.
#[derive(Debug, Clone)]
pub enum FaultCause {
    /// The callback returned an error.
    Failure(String),
    /// The callback panicked.
    Panic(String),
    /// The callback exceeded its wall-clock budget.
    Timeout {
        /// The budget that was exceeded.
        budget: Duration,
    },
}

impl std::fmt::Display for FaultCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failure(msg) => write!(f, "callback failed: {}", msg),
            Self::Panic(msg) => write!(f, "callback panicked: {}", msg),
            Self::Timeout { budget } => {
                write!(f, "callback exceeded {}ms budget", budget.as_millis())
            }
        }
    }
}

/// A fault raised by extension code, captured at the sandbox boundary.
#[derive(Debug, Clone, Error)]
#[error("sandbox fault in {extension} during {phase}: {cause}")]
pub struct SandboxFault {
    /// Name of the faulting extension.
    pub extension: String,
    /// Callback the fault occurred in.
    pub phase: CallbackPhase,
    /// What went wrong.
    pub cause: FaultCause,
}

impl SandboxFault {
    /// Returns true if the fault was a budget overrun.
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, FaultCause::Timeout { .. })
    }

    /// Returns true if the fault was a panic.
    pub fn is_panic(&self) -> bool {
        matches!(self.cause, FaultCause::Panic(_))
    }
}

/// Work item sent to the sandbox worker.
enum Job {
    Init(CapabilityHandle),
    Enable,
    Event(Event),
    Disable,
}

/// Worker-side callback outcome.
enum WorkerError {
    Failure(String),
    Panic(String),
}

type WorkerResult = std::result::Result<(), WorkerError>;
type JobSender = Sender<(Job, Sender<WorkerResult>)>;

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Spawn the worker thread that owns the extension instance.
///
/// The worker exits when the job channel disconnects, which happens on unload
/// or when the sandbox abandons it after a timeout.
fn spawn_worker(name: &str, mut instance: Box<dyn Extension>) -> JobSender {
    let (tx, rx) = mpsc::channel::<(Job, Sender<WorkerResult>)>();
    let thread_name = format!("ext-{}", name);

    let spawned = thread::Builder::new().name(thread_name).spawn(move || {
        for (job, reply) in rx {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match job {
                Job::Init(handle) => instance.on_init(handle),
                Job::Enable => instance.on_enable(),
                Job::Event(event) => instance.on_event(&event),
                Job::Disable => instance.on_disable(),
            }));

            let result = match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(WorkerError::Failure(e.to_string())),
                Err(payload) => Err(WorkerError::Panic(panic_message(payload))),
            };

            // The sandbox may have abandoned us after a timeout.
            if reply.send(result).is_err() {
                break;
            }
        }
    });

    if let Err(e) = spawned {
        // Spawn fails only on resource exhaustion; the dropped receiver makes
        // every send fail, which surfaces as a fault on first use.
        tracing::error!(extension = name, error = %e, "failed to spawn sandbox worker");
    }
    tx
}

struct SandboxInner {
    info: ExtensionInfo,
    worker: Option<JobSender>,
    init_done: bool,
}

/// Isolation boundary around one extension's execution.
///
/// Owns the extension instance (via its worker thread), its capability handle,
/// and its lifecycle state. The lifecycle manager is the sole caller of the
/// lifecycle callbacks; the dispatcher routes events through
/// [`dispatch`](ExtensionSandbox::dispatch).
pub struct ExtensionSandbox {
    descriptor: ExtensionDescriptor,
    handle: CapabilityHandle,
    budget: Duration,
    inner: RwLock<SandboxInner>,
}

impl ExtensionSandbox {
    /// Create a sandbox around an extension instance.
    pub fn new(
        descriptor: ExtensionDescriptor,
        handle: CapabilityHandle,
        instance: Box<dyn Extension>,
        budget: Duration,
    ) -> Self {
        let id = NEXT_EXTENSION_ID.fetch_add(1, Ordering::Relaxed);
        let info = ExtensionInfo {
            id,
            name: descriptor.name.clone(),
            version: descriptor.version.to_string(),
            loaded_at: Instant::now(),
            state: LifecycleState::Loaded,
            events_delivered: 0,
            last_fault: None,
        };
        let worker = spawn_worker(&descriptor.name, instance);

        Self {
            descriptor,
            handle,
            budget,
            inner: RwLock::new(SandboxInner {
                info,
                worker: Some(worker),
                init_done: false,
            }),
        }
    }

    /// Get the extension id.
    pub fn id(&self) -> u64 {
        self.inner.read().info.id
    }

    /// Get the extension name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Get the extension descriptor.
    pub fn descriptor(&self) -> &ExtensionDescriptor {
        &self.descriptor
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.read().info.state
    }

    /// Get a snapshot of the extension's runtime state.
    pub fn info(&self) -> ExtensionInfo {
        self.inner.read().info.clone()
    }

    /// Get the extension's capability handle.
    pub fn capability_handle(&self) -> &CapabilityHandle {
        &self.handle
    }

    /// Run `on_init` inside the boundary.
    pub fn init(&self) -> Result<()> {
        {
            let inner = self.inner.read();
            if inner.init_done || inner.info.state != LifecycleState::Loaded {
                return Err(Error::invalid_state(
                    "loaded, uninitialized",
                    inner.info.state.to_string(),
                ));
            }
        }

        self.invoke(CallbackPhase::Init, Job::Init(self.handle.clone()))?;
        self.inner.write().init_done = true;
        Ok(())
    }

    /// Run `on_enable` inside the boundary and transition to `Enabled`.
    pub fn enable(&self) -> Result<()> {
        {
            let inner = self.inner.read();
            if !inner.info.state.can_enable() || !inner.init_done {
                return Err(Error::invalid_state("loaded", inner.info.state.to_string()));
            }
        }

        self.invoke(CallbackPhase::Enable, Job::Enable)?;
        self.inner.write().info.state = LifecycleState::Enabled;
        Ok(())
    }

    /// Deliver an event through the boundary.
    pub fn dispatch(&self, event: &Event) -> Result<()> {
        if !self.state().can_receive_events() {
            return Err(Error::invalid_state("enabled", self.state().to_string()));
        }

        self.invoke(CallbackPhase::Event, Job::Event(event.clone()))?;
        self.inner.write().info.events_delivered += 1;
        Ok(())
    }

    /// Run `on_disable` inside the boundary, then drain.
    ///
    /// The extension always ends in `Unloaded`, even when the callback faults;
    /// the fault is returned for the caller to collect.
    pub fn disable(&self) -> Result<()> {
        {
            let mut inner = self.inner.write();
            if !inner.info.state.can_disable() {
                return Err(Error::invalid_state(
                    "enabled",
                    inner.info.state.to_string(),
                ));
            }
            inner.info.state = LifecycleState::Disabling;
        }

        let result = self.invoke(CallbackPhase::Disable, Job::Disable);
        self.drain();
        result
    }

    /// Force the extension to `Unloaded` without running `on_disable`.
    ///
    /// Used for extensions that were loaded but never enabled. Idempotent.
    pub fn unload(&self) {
        self.drain();
    }

    /// Record why the extension was skipped or faulted without a sandbox call.
    pub fn mark_failed(&self, reason: &str) {
        let mut inner = self.inner.write();
        if inner.info.last_fault.is_none() {
            inner.info.last_fault = Some(reason.to_string());
        }
        drop(inner);
        self.drain();
    }

    fn invoke(&self, phase: CallbackPhase, job: Job) -> Result<()> {
        let worker = match self.inner.read().worker.clone() {
            Some(worker) => worker,
            None => {
                return Err(Error::invalid_state(
                    "worker running",
                    LifecycleState::Unloaded.to_string(),
                ))
            }
        };

        let (reply_tx, reply_rx) = mpsc::channel();
        if worker.send((job, reply_tx)).is_err() {
            // Worker exited; treat as a panic-equivalent fault.
            return Err(self.fault(phase, FaultCause::Panic("worker thread exited".into())));
        }

        match reply_rx.recv_timeout(self.budget) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(WorkerError::Failure(msg))) => {
                Err(self.fault(phase, FaultCause::Failure(msg)))
            }
            Ok(Err(WorkerError::Panic(msg))) => Err(self.fault(phase, FaultCause::Panic(msg))),
            Err(RecvTimeoutError::Timeout) => Err(self.fault(
                phase,
                FaultCause::Timeout {
                    budget: self.budget,
                },
            )),
            Err(RecvTimeoutError::Disconnected) => {
                Err(self.fault(phase, FaultCause::Panic("worker thread exited".into())))
            }
        }
    }

    /// Convert a callback failure into a fault: log it, unload the extension,
    /// release its resources.
    fn fault(&self, phase: CallbackPhase, cause: FaultCause) -> Error {
        let fault = SandboxFault {
            extension: self.descriptor.name.clone(),
            phase,
            cause,
        };

        tracing::error!(
            extension = %fault.extension,
            phase = %fault.phase,
            cause = %fault.cause,
            "extension faulted"
        );

        self.inner.write().info.last_fault = Some(fault.to_string());
        self.drain();

        Error::Sandbox(fault)
    }

    /// Release resources and subscriptions, abandon the worker, and settle in
    /// the terminal state. Idempotent.
    fn drain(&self) {
        let mut inner = self.inner.write();
        if inner.info.state == LifecycleState::Unloaded {
            return;
        }
        inner.info.state = LifecycleState::Unloaded;
        inner.worker = None;
        drop(inner);

        self.handle.release_all();
    }
}

impl std::fmt::Debug for ExtensionSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ExtensionSandbox")
            .field("id", &inner.info.id)
            .field("name", &self.descriptor.name)
            .field("state", &inner.info.state)
            .finish()
    }
}

/// Shared handle to an extension sandbox.
#[derive(Clone)]
pub struct SandboxHandle {
    sandbox: Arc<ExtensionSandbox>,
}

impl SandboxHandle {
    /// Create a new sandbox handle.
    pub fn new(sandbox: ExtensionSandbox) -> Self {
        Self {
            sandbox: Arc::new(sandbox),
        }
    }

    /// Get the extension id.
    pub fn id(&self) -> u64 {
        self.sandbox.id()
    }

    /// Get the extension name.
    pub fn name(&self) -> &str {
        self.sandbox.name()
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.sandbox.state()
    }

    /// Get a snapshot of the extension's runtime state.
    pub fn info(&self) -> ExtensionInfo {
        self.sandbox.info()
    }

    /// Get the underlying sandbox.
    pub fn inner(&self) -> &ExtensionSandbox {
        &self.sandbox
    }
}

impl std::fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.sandbox.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityRegistry;
    use crate::descriptor::{DescriptorBuilder, Version};
    use crate::dispatcher::SubscriptionTable;
    use crate::extension::CallbackResult;

    fn test_sandbox(instance: Box<dyn Extension>, budget: Duration) -> ExtensionSandbox {
        let descriptor =
            DescriptorBuilder::new("test-ext", Version::new(1, 0, 0), "test").build_unchecked();
        let registry = CapabilityRegistry::new();
        let handle = registry
            .bind("test-ext", &[], Arc::new(SubscriptionTable::new()))
            .unwrap();
        ExtensionSandbox::new(descriptor, handle, instance, budget)
    }

    struct WellBehaved;

    impl Extension for WellBehaved {}

    struct FailsOnEnable;

    impl Extension for FailsOnEnable {
        fn on_enable(&mut self) -> CallbackResult {
            Err("refusing to enable".into())
        }
    }

    struct PanicsOnEvent;

    impl Extension for PanicsOnEvent {
        fn on_event(&mut self, _event: &Event) -> CallbackResult {
            panic!("boom");
        }
    }

    struct SleepsOnEvent;

    impl Extension for SleepsOnEvent {
        fn on_event(&mut self, _event: &Event) -> CallbackResult {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        }
    }

    #[test]
    fn test_happy_path() {
        let sandbox = test_sandbox(Box::new(WellBehaved), Duration::from_secs(1));
        assert_eq!(sandbox.state(), LifecycleState::Loaded);

        sandbox.init().unwrap();
        sandbox.enable().unwrap();
        assert_eq!(sandbox.state(), LifecycleState::Enabled);

        sandbox.dispatch(&Event::Tick { number: 1 }).unwrap();
        assert_eq!(sandbox.info().events_delivered, 1);

        sandbox.disable().unwrap();
        assert_eq!(sandbox.state(), LifecycleState::Unloaded);
    }

    #[test]
    fn test_callback_error_becomes_fault() {
        let sandbox = test_sandbox(Box::new(FailsOnEnable), Duration::from_secs(1));
        sandbox.init().unwrap();

        let err = sandbox.enable().unwrap_err();
        match err {
            Error::Sandbox(fault) => {
                assert_eq!(fault.extension, "test-ext");
                assert_eq!(fault.phase, CallbackPhase::Enable);
                assert!(matches!(fault.cause, FaultCause::Failure(_)));
            }
            other => panic!("expected sandbox fault, got {:?}", other),
        }
        assert_eq!(sandbox.state(), LifecycleState::Unloaded);
    }

    #[test]
    fn test_panic_captured() {
        let sandbox = test_sandbox(Box::new(PanicsOnEvent), Duration::from_secs(1));
        sandbox.init().unwrap();
        sandbox.enable().unwrap();

        let err = sandbox.dispatch(&Event::Tick { number: 1 }).unwrap_err();
        match err {
            Error::Sandbox(fault) => {
                assert_eq!(fault.phase, CallbackPhase::Event);
                assert!(fault.is_panic());
            }
            other => panic!("expected sandbox fault, got {:?}", other),
        }
        assert_eq!(sandbox.state(), LifecycleState::Unloaded);
    }

    #[test]
    fn test_budget_overrun_times_out() {
        let sandbox = test_sandbox(Box::new(SleepsOnEvent), Duration::from_millis(50));
        sandbox.init().unwrap();
        sandbox.enable().unwrap();

        let err = sandbox.dispatch(&Event::Tick { number: 1 }).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(sandbox.state(), LifecycleState::Unloaded);

        // No further events reach the extension.
        let err = sandbox.dispatch(&Event::Tick { number: 2 }).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn test_invalid_transitions() {
        let sandbox = test_sandbox(Box::new(WellBehaved), Duration::from_secs(1));

        // Enable before init.
        assert!(matches!(sandbox.enable(), Err(Error::InvalidState { .. })));

        sandbox.init().unwrap();
        // Double init.
        assert!(matches!(sandbox.init(), Err(Error::InvalidState { .. })));
        // Disable before enable.
        assert!(matches!(sandbox.disable(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_unload_idempotent() {
        let sandbox = test_sandbox(Box::new(WellBehaved), Duration::from_secs(1));
        sandbox.init().unwrap();

        sandbox.unload();
        assert_eq!(sandbox.state(), LifecycleState::Unloaded);
        sandbox.unload();
        assert_eq!(sandbox.state(), LifecycleState::Unloaded);
    }
}
