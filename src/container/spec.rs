//! Container creation request types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Label carrying the container name.
pub const CONTAINER_NAME_LABEL: &str = "io.kubernetes.container.name";

/// Orchestrator-provided container metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Container name within the sandbox.
    pub name: String,
    /// Creation attempt number.
    pub attempt: u32,
}

/// Host directory mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Path on the host.
    pub host_path: PathBuf,

    /// Path inside the container.
    pub container_path: PathBuf,

    /// Read-only mount.
    pub read_only: bool,
}

impl Mount {
    /// Create a new writable mount.
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// Make this mount read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Linux resource limits as sent by the orchestrator. Zero means unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CFS quota in microseconds.
    pub cpu_quota: i64,
    /// CFS period in microseconds.
    pub cpu_period: i64,
    /// Relative CPU weight.
    pub cpu_shares: i64,
    /// Memory limit in bytes.
    pub memory_limit_bytes: i64,
}

/// Fully resolved container specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Owning sandbox.
    pub sandbox_id: String,
    /// Name and attempt.
    pub metadata: ContainerMetadata,
    /// Image reference.
    pub image: String,
    /// Mounts in declaration order.
    pub mounts: Vec<Mount>,
    /// Container annotations.
    pub annotations: BTreeMap<String, String>,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
    /// Resource limits.
    pub resources: ResourceSpec,
}

impl ContainerSpec {
    /// Create a spec with no mounts, annotations or limits.
    pub fn new(sandbox_id: impl Into<String>, name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            metadata: ContainerMetadata {
                name: name.into(),
                attempt: 0,
            },
            image: image.into(),
            mounts: Vec::new(),
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
            resources: ResourceSpec::default(),
        }
    }

    /// Add a mount.
    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Add an annotation.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set resource limits.
    pub fn with_resources(mut self, resources: ResourceSpec) -> Self {
        self.resources = resources;
        self
    }

    /// Labels to store on the record: the requested ones plus the name label.
    pub fn record_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.insert(CONTAINER_NAME_LABEL.to_string(), self.metadata.name.clone());
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_labels_include_name() {
        let spec = ContainerSpec::new("sb", "web", "cirros").with_label("app", "demo");
        let labels = spec.record_labels();
        assert_eq!(labels.get(CONTAINER_NAME_LABEL).map(String::as_str), Some("web"));
        assert_eq!(labels.get("app").map(String::as_str), Some("demo"));
    }

    #[test]
    fn test_name_label_overrides_request() {
        let spec = ContainerSpec::new("sb", "web", "cirros").with_label(CONTAINER_NAME_LABEL, "other");
        assert_eq!(spec.record_labels()[CONTAINER_NAME_LABEL], "web");
    }
}
