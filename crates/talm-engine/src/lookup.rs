//! Live node facts for templates
//!
//! Templates never talk to a node directly. They go through a
//! [`LookupProvider`] injected into the engine, which answers "give me the
//! resource of this kind with this id" either from a running node or from a
//! static snapshot when rendering offline.
//!
//! Resources use the Talos resource shape: a `metadata` block carrying the
//! `id` (and optionally `namespace`) plus a kind-specific `spec`.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::cancel::{Cancellation, Cancelled};

/// Resource kinds a template may look up
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Disks,
    Links,
    Addresses,
    Routes,
    Resolvers,
    MachineConfig,
    Hostname,
    MachineType,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Disks,
        ResourceKind::Links,
        ResourceKind::Addresses,
        ResourceKind::Routes,
        ResourceKind::Resolvers,
        ResourceKind::MachineConfig,
        ResourceKind::Hostname,
        ResourceKind::MachineType,
    ];

    /// Canonical name used in templates and snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disks => "disks",
            Self::Links => "links",
            Self::Addresses => "addresses",
            Self::Routes => "routes",
            Self::Resolvers => "resolvers",
            Self::MachineConfig => "machineconfig",
            Self::Hostname => "hostname",
            Self::MachineType => "machinetype",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', '-'], "");
        match normalized.as_str() {
            "disks" | "disk" => Ok(Self::Disks),
            "links" | "link" => Ok(Self::Links),
            "addresses" | "address" | "nodeaddresses" | "nodeaddress" => Ok(Self::Addresses),
            "routes" | "route" => Ok(Self::Routes),
            "resolvers" | "resolver" | "resolverstatus" => Ok(Self::Resolvers),
            "machineconfig" | "machineconfigs" | "mc" => Ok(Self::MachineConfig),
            "hostname" | "hostnames" | "hostnamestatus" => Ok(Self::Hostname),
            "machinetype" | "machinetypes" => Ok(Self::MachineType),
            _ => Err(LookupError::UnknownKind(s.to_string())),
        }
    }
}

/// Failure reported by a lookup provider
///
/// Any of these aborts the render. A resource that simply does not exist is
/// not an error: providers return `Ok(None)` for it.
#[derive(Error, Debug, Clone)]
pub enum LookupError {
    #[error("unknown resource kind '{0}'")]
    UnknownKind(String),

    #[error("lookup of {kind} '{id}' failed: {message}")]
    Failed {
        kind: ResourceKind,
        id: String,
        message: String,
    },

    #[error("invalid snapshot: {message}")]
    InvalidSnapshot { message: String },

    /// The provider saw the render's cancellation while the call was in flight
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl LookupError {
    pub fn failed(kind: ResourceKind, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Source of node facts for a single render pass
///
/// Implementations must be deterministic: [`list`](Self::list) returns
/// resources in a stable order so repeated renders produce identical text.
///
/// Every call receives the render's [`Cancellation`]. Providers that block
/// (network round trips, retries) poll it and return
/// [`LookupError::Cancelled`] as soon as it fires.
pub trait LookupProvider: Send + Sync {
    /// Fetch one resource by id, `Ok(None)` when it does not exist
    fn lookup(
        &self,
        cancellation: &Cancellation,
        kind: ResourceKind,
        namespace: &str,
        id: &str,
    ) -> Result<Option<JsonValue>, LookupError>;

    /// List every resource of a kind
    fn list(
        &self,
        cancellation: &Cancellation,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<JsonValue>, LookupError>;
}

/// Id of a resource in Talos shape (`metadata.id`, falling back to `id`)
pub fn resource_id(resource: &JsonValue) -> Option<&str> {
    resource
        .pointer("/metadata/id")
        .or_else(|| resource.get("id"))
        .and_then(|v| v.as_str())
}

fn resource_namespace(resource: &JsonValue) -> Option<&str> {
    resource
        .pointer("/metadata/namespace")
        .and_then(|v| v.as_str())
}

/// Snapshot-backed provider for offline rendering
///
/// Loaded from a YAML mapping of kind to a list of resources:
///
/// ```yaml
/// disks:
///   - metadata: { id: sda }
///     spec: { dev_path: /dev/sda, size: 107374182400 }
/// hostname:
///   - metadata: { id: hostname }
///     spec: { hostname: node-1 }
/// ```
///
/// Resources are listed in id order.
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    resources: BTreeMap<ResourceKind, BTreeMap<String, JsonValue>>,
}

impl StaticLookup {
    /// A provider that knows nothing; every lookup comes back empty
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a resource, replacing any previous resource with the same id
    pub fn insert(&mut self, kind: ResourceKind, resource: JsonValue) -> Result<(), LookupError> {
        let id = resource_id(&resource)
            .ok_or_else(|| LookupError::InvalidSnapshot {
                message: format!("{} resource without metadata.id", kind),
            })?
            .to_string();
        self.resources.entry(kind).or_default().insert(id, resource);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, kind: ResourceKind, resource: JsonValue) -> Result<Self, LookupError> {
        self.insert(kind, resource)?;
        Ok(self)
    }

    /// Parse a snapshot document
    pub fn from_yaml(content: &str) -> Result<Self, LookupError> {
        let doc: JsonValue = serde_yaml::from_str(content).map_err(|e| {
            LookupError::InvalidSnapshot {
                message: e.to_string(),
            }
        })?;

        let mut lookup = Self::empty();
        let entries = match doc {
            JsonValue::Null => return Ok(lookup),
            JsonValue::Object(entries) => entries,
            _ => {
                return Err(LookupError::InvalidSnapshot {
                    message: "snapshot must be a mapping of resource kinds".to_string(),
                });
            }
        };

        for (kind_name, resources) in entries {
            let kind: ResourceKind = kind_name.parse()?;
            match resources {
                JsonValue::Array(items) => {
                    for item in items {
                        lookup.insert(kind, item)?;
                    }
                }
                JsonValue::Null => {}
                single @ JsonValue::Object(_) => lookup.insert(kind, single)?,
                _ => {
                    return Err(LookupError::InvalidSnapshot {
                        message: format!("'{}' must be a list of resources", kind_name),
                    });
                }
            }
        }

        Ok(lookup)
    }

    /// Load a snapshot file
    pub fn from_file(path: &Path) -> Result<Self, LookupError> {
        let content = std::fs::read_to_string(path).map_err(|e| LookupError::InvalidSnapshot {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_yaml(&content)
    }

    /// Number of resources across all kinds
    pub fn len(&self) -> usize {
        self.resources.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matches_namespace(resource: &JsonValue, namespace: &str) -> bool {
        namespace.is_empty()
            || resource_namespace(resource).is_none_or(|ns| ns == namespace)
    }
}

impl LookupProvider for StaticLookup {
    fn lookup(
        &self,
        cancellation: &Cancellation,
        kind: ResourceKind,
        namespace: &str,
        id: &str,
    ) -> Result<Option<JsonValue>, LookupError> {
        cancellation.check()?;
        Ok(self
            .resources
            .get(&kind)
            .and_then(|by_id| by_id.get(id))
            .filter(|r| Self::matches_namespace(r, namespace))
            .cloned())
    }

    fn list(
        &self,
        cancellation: &Cancellation,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<JsonValue>, LookupError> {
        cancellation.check()?;
        Ok(self
            .resources
            .get(&kind)
            .map(|by_id| {
                by_id
                    .values()
                    .filter(|r| Self::matches_namespace(r, namespace))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
