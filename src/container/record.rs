//! Persisted container and sandbox records.

use super::spec::{ContainerMetadata, Mount, ResourceSpec};
use super::state::ContainerState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What an attached volume is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeRole {
    /// Boot disk built from the image.
    Root,
    /// Flexvolume-backed data disk.
    Secondary,
    /// Read-only first-boot configuration image.
    BootConfig,
}

/// Where an attached volume's data lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VolumeRef {
    /// Volume in a storage pool, created for this container.
    Pool {
        /// Pool name.
        pool: String,
        /// Volume name.
        volume: String,
    },
    /// Host block device.
    Block {
        /// Device path.
        path: PathBuf,
    },
    /// Network block storage.
    Network {
        /// Protocol, e.g. `rbd`.
        protocol: String,
        /// Image name.
        name: String,
    },
    /// Boot-config image produced by the provider.
    BootConfig {
        /// Image path.
        path: PathBuf,
    },
}

/// A volume attached to a container's domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedVolume {
    /// Logical name.
    pub name: String,
    /// Device role.
    pub role: VolumeRole,
    /// Backing storage.
    pub backing: VolumeRef,
    /// Guest device name.
    pub target_dev: String,
    /// Mount point inside the guest, when a container mount points at it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_path: Option<PathBuf>,
}

impl AttachedVolume {
    /// Pool and volume name of a pool-backed volume; removal deletes these.
    pub fn pool_volume(&self) -> Option<(&str, &str)> {
        match &self.backing {
            VolumeRef::Pool { pool, volume } => Some((pool.as_str(), volume.as_str())),
            _ => None,
        }
    }
}

/// Container record as kept in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Container ID, also the domain UUID.
    pub id: String,
    /// Owning sandbox.
    pub sandbox_id: String,
    /// Name and attempt.
    pub metadata: ContainerMetadata,
    /// Image reference.
    pub image: String,
    /// Mounts in declaration order.
    pub mounts: Vec<Mount>,
    /// Annotations from the container config, without the sandbox's.
    pub annotations: BTreeMap<String, String>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Finish time.
    pub finished_at: Option<DateTime<Utc>>,
    /// Requested limits.
    pub resources: ResourceSpec,
    /// Effective vCPU count.
    pub vcpus: u32,
    /// Attached volumes in device order.
    pub volumes: Vec<AttachedVolume>,
    /// Domain name.
    pub domain_name: String,
    /// Domain UUID.
    pub domain_uuid: String,
    /// Opaque network namespace handle.
    pub network_namespace: String,
    /// Exit code, set when the container exits.
    pub exit_code: Option<i32>,
    /// Insertion sequence, assigned by the store.
    #[serde(default)]
    pub seq: u64,
}

/// Sandbox record as kept in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRecord {
    /// Sandbox ID.
    pub id: String,
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    pub namespace: String,
    /// Pod UID, locates the pod's volume directories.
    pub uid: String,
    /// Creation attempt.
    pub attempt: u32,
    /// Sandbox annotations, the base layer of VM annotations.
    pub annotations: BTreeMap<String, String>,
    /// Sandbox labels.
    pub labels: BTreeMap<String, String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Insertion sequence, assigned by the store.
    #[serde(default)]
    pub seq: u64,
}

impl SandboxRecord {
    /// Create a sandbox record with empty maps.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
        uid: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            namespace: namespace.into(),
            uid: uid.into(),
            attempt: 0,
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
            created_at,
            seq: 0,
        }
    }

    /// Add an annotation.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}
