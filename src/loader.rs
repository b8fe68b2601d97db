//! Loading extension descriptors from packaged artifacts.

use std::path::{Path, PathBuf};

use crate::descriptor::ExtensionDescriptor;
use crate::error::Result;

/// Manifest file name inside an extension artifact.
pub const MANIFEST_FILE: &str = "extension.toml";

/// Configuration for the descriptor loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Base path for resolving relative artifact paths.
    pub base_path: Option<PathBuf>,
    /// Whether to validate descriptors after parsing.
    pub strict_validation: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            strict_validation: true,
        }
    }
}

impl LoaderConfig {
    /// Create a new loader configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base path.
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Set strict validation.
    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }
}

/// Parses extension descriptors from packaged artifacts.
///
/// An artifact is a directory containing an `extension.toml` manifest next to
/// the extension payload, or a path to the manifest itself. Loading is a pure
/// function of the manifest bytes: no side effects, no interaction with other
/// loaded extensions.
pub struct DescriptorLoader {
    config: LoaderConfig,
}

impl DescriptorLoader {
    /// Create a new descriptor loader.
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// Get the loader configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load and validate a descriptor from an artifact path.
    pub fn load(&self, artifact_path: impl AsRef<Path>) -> Result<ExtensionDescriptor> {
        let path = self.resolve_path(artifact_path.as_ref());
        let manifest_path = if path.is_dir() {
            path.join(MANIFEST_FILE)
        } else {
            path
        };

        let content = std::fs::read_to_string(&manifest_path)?;
        self.parse(&content)
    }

    /// Parse and validate a descriptor from manifest text.
    pub fn parse(&self, content: &str) -> Result<ExtensionDescriptor> {
        let descriptor = ExtensionDescriptor::from_toml(content)?;
        if self.config.strict_validation {
            descriptor.validate()?;
        }
        Ok(descriptor)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(ref base) = self.config.base_path {
            base.join(path)
        } else {
            path.to_path_buf()
        }
    }
}

impl std::fmt::Debug for DescriptorLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorLoader")
            .field("config", &self.config)
            .finish()
    }
}
