//! # praya-extension-host
//!
//! Extension host for tick-driven simulation servers, with descriptor
//! validation, capability scoping, sandboxed lifecycle, and event dispatch.
//!
//! This crate provides:
//! - **Descriptor Loading** - Parse and validate `extension.toml` manifests
//! - **Capability Scoping** - Extensions reach only the capabilities they declare
//! - **Fault Isolation** - Callback errors, panics, and budget overruns never
//!   escape an extension's sandbox
//! - **Lifecycle Management** - Dependency-ordered enable, reverse-order shutdown
//! - **Event Dispatch** - Priority-ordered, snapshot-consistent delivery of
//!   tick, player action, and shutdown events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use praya_extension_host::{HostBuilder, HostConfig};
//!
//! // Assemble capability providers and entry points, then boot.
//! let host = HostBuilder::new(HostConfig::default())
//!     .provider("world:edit", world_provider)?
//!     .entry_point("terrain", || Box::new(TerrainExtension::new()))
//!     .boot();
//!
//! // Load extensions and drive the simulation.
//! let outcomes = host.load_all(&["extensions/terrain-gen"]);
//! loop {
//!     let faults = host.tick();
//! }
//! ```
//!
//! ## Isolation model
//!
//! Extension callbacks run one at a time on the simulation thread's turn, each
//! routed through its extension's sandbox. Timeout enforcement is advisory:
//! a callback that overruns its budget is abandoned, not preempted, and its
//! worker thread exits at its next scheduling boundary.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod capability;
mod descriptor;
mod dispatcher;
mod error;
mod event;
mod extension;
mod host;
mod lifecycle;
mod loader;
mod manager;
mod registry;
mod sandbox;

pub use capability::{CapabilityHandle, CapabilityOutput, CapabilityProvider, CapabilityRegistry};
pub use descriptor::{
    Dependency, DescriptorBuilder, ExtensionDescriptor, Version, SCHEMA_VERSION,
};
pub use dispatcher::{EventDispatcher, SubscriptionId, SubscriptionTable};
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use extension::{CallbackResult, Extension, ExtensionFactory, ExtensionInfo};
pub use host::{Host, HostBuilder, HostConfig};
pub use lifecycle::{LifecycleEvent, LifecycleHooks, LifecycleState};
pub use loader::{DescriptorLoader, LoaderConfig, MANIFEST_FILE};
pub use manager::{LifecycleManager, LoadOutcome};
pub use registry::{ExtensionRegistry, RegistryConfig, RegistryStats};
pub use sandbox::{
    CallbackPhase, ExtensionSandbox, FaultCause, SandboxFault, SandboxHandle,
};

/// Crate version for compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
