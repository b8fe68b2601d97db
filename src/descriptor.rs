//! Extension descriptor schema and validation.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Highest descriptor schema version this host understands.
pub const SCHEMA_VERSION: u32 = 1;

/// Semantic version of an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
}

impl Version {
    /// Create a new version.
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse from a string like "1.4.0".
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(Error::malformed_descriptor(format!("invalid version: {}", s)));
        }

        let major = parts[0]
            .parse()
            .map_err(|_| Error::malformed_descriptor(format!("invalid major version: {}", s)))?;
        let minor = parts[1]
            .parse()
            .map_err(|_| Error::malformed_descriptor(format!("invalid minor version: {}", s)))?;
        let patch = match parts.get(2) {
            Some(p) => p
                .parse()
                .map_err(|_| Error::malformed_descriptor(format!("invalid patch version: {}", s)))?,
            None => 0,
        };

        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Extension dependency declaration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Dependency {
    /// Name of the extension depended on.
    pub name: String,
    /// Whether the dependency may be absent.
    #[serde(default)]
    pub optional: bool,
}

impl Dependency {
    /// Create a required dependency.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
        }
    }

    /// Create an optional dependency.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: true,
        }
    }
}

/// Extension descriptor defining identity, entry point, and requirements.
///
/// Immutable once parsed; the lifecycle manager owns it for the extension's
/// lifetime.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExtensionDescriptor {
    /// Extension name (unique identifier).
    pub name: String,

    /// Extension version.
    pub version: Version,

    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,

    /// Extension authors.
    #[serde(default)]
    pub authors: Vec<String>,

    /// Descriptor schema version.
    #[serde(default = "default_schema", rename = "schema-version")]
    pub schema_version: u32,

    /// Entry point name, resolved against the host's registered factories.
    pub entry: String,

    /// Requested capability names, in declaration order.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Declared dependencies, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    /// Custom metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_schema() -> u32 {
    SCHEMA_VERSION
}

impl ExtensionDescriptor {
    /// Create a new descriptor with required fields.
    pub fn new(name: impl Into<String>, version: Version, entry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version,
            description: None,
            authors: Vec::new(),
            schema_version: SCHEMA_VERSION,
            entry: entry.into(),
            capabilities: Vec::new(),
            dependencies: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Parse a descriptor from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::DescriptorParse(e.to_string()))
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::DescriptorParse(e.to_string()))
    }

    /// Validate the descriptor.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::missing_field("name"));
        }

        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(Error::malformed_descriptor(format!(
                "invalid extension name: {}",
                self.name
            )));
        }

        if self.entry.is_empty() {
            return Err(Error::missing_field("entry"));
        }

        if self.schema_version > SCHEMA_VERSION {
            return Err(Error::unsupported_schema(self.schema_version, SCHEMA_VERSION));
        }

        for dep in &self.dependencies {
            if dep.name.is_empty() {
                return Err(Error::malformed_descriptor("dependency with empty name"));
            }
            if dep.name == self.name {
                return Err(Error::malformed_descriptor(format!(
                    "{} declares a dependency on itself",
                    self.name
                )));
            }
        }

        for cap in &self.capabilities {
            if cap.is_empty() {
                return Err(Error::malformed_descriptor("capability with empty name"));
            }
        }

        Ok(())
    }

    /// Check if this descriptor declares a capability.
    pub fn declares_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c == cap)
    }

    /// Required dependency names, in declaration order.
    pub fn required_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| !d.optional)
            .map(|d| d.name.as_str())
    }
}

/// Builder for creating descriptors in code.
pub struct DescriptorBuilder {
    descriptor: ExtensionDescriptor,
}

impl DescriptorBuilder {
    /// Create a new descriptor builder.
    pub fn new(name: impl Into<String>, version: Version, entry: impl Into<String>) -> Self {
        Self {
            descriptor: ExtensionDescriptor::new(name, version, entry),
        }
    }

    /// Set the description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.descriptor.description = Some(desc.into());
        self
    }

    /// Add an author.
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.descriptor.authors.push(author.into());
        self
    }

    /// Set the schema version.
    pub fn schema_version(mut self, version: u32) -> Self {
        self.descriptor.schema_version = version;
        self
    }

    /// Add a requested capability.
    pub fn capability(mut self, cap: impl Into<String>) -> Self {
        self.descriptor.capabilities.push(cap.into());
        self
    }

    /// Add a dependency.
    pub fn dependency(mut self, dep: Dependency) -> Self {
        self.descriptor.dependencies.push(dep);
        self
    }

    /// Add a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.descriptor.metadata.insert(key.into(), value.into());
        self
    }

    /// Build and validate the descriptor.
    pub fn build(self) -> Result<ExtensionDescriptor> {
        self.descriptor.validate()?;
        Ok(self.descriptor)
    }

    /// Build without validation.
    pub fn build_unchecked(self) -> ExtensionDescriptor {
        self.descriptor
    }
}
