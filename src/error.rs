//! Error types for extension host operations.

use thiserror::Error;

use crate::sandbox::SandboxFault;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during extension host operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Extension not found.
    #[error("extension not found: {0}")]
    ExtensionNotFound(String),

    /// Extension already loaded.
    #[error("extension already loaded: {0}")]
    ExtensionAlreadyLoaded(String),

    /// Malformed descriptor.
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// Missing required descriptor field.
    #[error("missing required descriptor field: {0}")]
    MissingDescriptorField(String),

    /// Descriptor parse error.
    #[error("descriptor parse error: {0}")]
    DescriptorParse(String),

    /// Descriptor schema newer than this host supports.
    #[error("unsupported descriptor schema: descriptor declares {declared}, host supports up to {supported}")]
    UnsupportedSchema {
        /// Schema version declared by the descriptor.
        declared: u32,
        /// Highest schema version the host supports.
        supported: u32,
    },

    /// Capability name registered twice at boot.
    #[error("duplicate capability: {0}")]
    DuplicateCapability(String),

    /// Capability name not registered, or not declared by the extension.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// Capability registration attempted after boot.
    #[error("capability registry sealed: cannot register {0}")]
    RegistrySealed(String),

    /// A capability provider rejected a call.
    #[error("capability call failed: {capability}.{method}: {message}")]
    CapabilityCall {
        /// Capability name.
        capability: String,
        /// Method invoked on the provider.
        method: String,
        /// Provider-reported failure.
        message: String,
    },

    /// Dependency cycle among extensions.
    #[error("cyclic dependency among extensions: {}", members.join(", "))]
    CyclicDependency {
        /// Names participating in the cycle.
        members: Vec<String>,
    },

    /// Required dependency absent.
    #[error("missing dependency: {extension} requires {dependency}")]
    MissingDependency {
        /// Dependent extension.
        extension: String,
        /// Absent dependency.
        dependency: String,
    },

    /// Extension never enabled because a required dependency faulted.
    #[error("skipped due to dependency fault: {extension} requires faulted {dependency}")]
    SkippedDueToDependencyFault {
        /// Skipped extension.
        extension: String,
        /// Faulted dependency.
        dependency: String,
    },

    /// Descriptor names an entry point with no registered factory.
    #[error("unknown entry point: {0}")]
    UnknownEntryPoint(String),

    /// Extension in the wrong lifecycle state for an operation.
    #[error("invalid extension state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state.
        expected: String,
        /// Actual state.
        actual: String,
    },

    /// Extension callback faulted inside its sandbox.
    #[error(transparent)]
    Sandbox(#[from] SandboxFault),

    /// Registry error.
    #[error("registry error: {0}")]
    Registry(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an extension not found error.
    pub fn extension_not_found(name: impl Into<String>) -> Self {
        Self::ExtensionNotFound(name.into())
    }

    /// Create a malformed descriptor error.
    pub fn malformed_descriptor(msg: impl Into<String>) -> Self {
        Self::MalformedDescriptor(msg.into())
    }

    /// Create a missing descriptor field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingDescriptorField(field.into())
    }

    /// Create an unsupported schema error.
    pub fn unsupported_schema(declared: u32, supported: u32) -> Self {
        Self::UnsupportedSchema {
            declared,
            supported,
        }
    }

    /// Create a duplicate capability error.
    pub fn duplicate_capability(name: impl Into<String>) -> Self {
        Self::DuplicateCapability(name.into())
    }

    /// Create an unknown capability error.
    pub fn unknown_capability(name: impl Into<String>) -> Self {
        Self::UnknownCapability(name.into())
    }

    /// Create a cyclic dependency error.
    pub fn cyclic_dependency(members: Vec<String>) -> Self {
        Self::CyclicDependency { members }
    }

    /// Create a missing dependency error.
    pub fn missing_dependency(
        extension: impl Into<String>,
        dependency: impl Into<String>,
    ) -> Self {
        Self::MissingDependency {
            extension: extension.into(),
            dependency: dependency.into(),
        }
    }

    /// Create a skipped-due-to-dependency-fault error.
    pub fn skipped(extension: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::SkippedDueToDependencyFault {
            extension: extension.into(),
            dependency: dependency.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Returns true if this error aborts only the affected extension's load,
    /// never the whole boot.
    pub fn is_per_extension(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Registry(_) | Self::RegistrySealed(_))
    }

    /// Returns true if this error came from a sandboxed callback timing out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Sandbox(fault) if fault.is_timeout())
    }
}
