//! Hypervisor and storage capabilities.
//!
//! The lifecycle manager only talks to these traits:
//! - [`DomainConnection`] / [`Domain`]: define, start, stop and inspect VMs
//! - [`StorageConnection`] / [`StoragePool`] / [`StorageVolume`]: pool volumes
//!
//! [`virsh`] is the production implementation, [`fake`] the in-memory
//! double used by tests.

pub mod definition;
pub mod fake;
pub mod virsh;
mod xml;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

pub use definition::{
    CpuTune, DiskAuth, DiskBus, DiskDevice, DiskFormat, DiskSource, DomainDefinition, DomainDisk,
    DomainFilesystem, DomainType, NetworkHost, DEFAULT_MEMORY_BYTES,
};

/// Run state of a domain as tracked by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainState {
    /// No state reported.
    NoState,
    /// Running.
    Running,
    /// Blocked on a resource.
    Blocked,
    /// Paused by the user or hypervisor.
    Paused,
    /// Guest is shutting down.
    Shutdown,
    /// Not running.
    Shutoff,
    /// Guest crashed.
    Crashed,
    /// Suspended by guest power management.
    PmSuspended,
}

impl DomainState {
    /// Whether the domain is no longer executing guest code.
    pub fn is_stopped(&self) -> bool {
        matches!(self, DomainState::Shutoff | DomainState::Crashed)
    }

    /// Parse the text printed by `virsh domstate`.
    pub fn from_virsh(s: &str) -> Option<Self> {
        let state = match s.trim() {
            "no state" => DomainState::NoState,
            "running" => DomainState::Running,
            "idle" | "blocked" => DomainState::Blocked,
            "paused" => DomainState::Paused,
            "in shutdown" => DomainState::Shutdown,
            "shut off" => DomainState::Shutoff,
            "crashed" => DomainState::Crashed,
            "pmsuspended" => DomainState::PmSuspended,
            _ => return None,
        };
        Some(state)
    }

    /// Get the state name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            DomainState::NoState => "nostate",
            DomainState::Running => "running",
            DomainState::Blocked => "blocked",
            DomainState::Paused => "paused",
            DomainState::Shutdown => "shutdown",
            DomainState::Shutoff => "shutoff",
            DomainState::Crashed => "crashed",
            DomainState::PmSuspended => "pmsuspended",
        }
    }
}

impl std::fmt::Display for DomainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle to a defined domain.
pub trait Domain: Send {
    /// Domain UUID.
    fn uuid(&self) -> &str;

    /// Domain name.
    fn name(&self) -> &str;

    /// Boot the domain.
    fn create(&self) -> Result<()>;

    /// Ask the guest to power off.
    fn shutdown(&self) -> Result<()>;

    /// Stop the domain immediately.
    fn destroy(&self) -> Result<()>;

    /// Remove the domain definition.
    fn undefine(&self) -> Result<()>;

    /// Current run state.
    fn state(&self) -> Result<DomainState>;
}

/// Connection to the hypervisor's domain namespace.
pub trait DomainConnection: Send + Sync {
    /// Define (but do not start) a domain.
    fn define_domain(&self, definition: &DomainDefinition) -> Result<Box<dyn Domain>>;

    /// Look up a domain by UUID.
    fn lookup_domain_by_uuid(&self, uuid: &str) -> Result<Box<dyn Domain>>;

    /// Look up a domain by name.
    fn lookup_domain_by_name(&self, name: &str) -> Result<Box<dyn Domain>>;
}

/// Parameters for a new pool volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Volume name, unique within the pool.
    pub name: String,
    /// Logical size in bytes.
    pub capacity: u64,
    /// On-disk format.
    pub format: DiskFormat,
    /// Copy-on-write backing file.
    pub backing_store: Option<PathBuf>,
}

impl VolumeSpec {
    /// Create a qcow2 volume spec.
    pub fn qcow2(name: impl Into<String>, capacity: u64) -> Self {
        Self {
            name: name.into(),
            capacity,
            format: DiskFormat::Qcow2,
            backing_store: None,
        }
    }

    /// Set the backing file.
    pub fn backed_by(mut self, path: impl Into<PathBuf>) -> Self {
        self.backing_store = Some(path.into());
        self
    }
}

/// A volume inside a storage pool.
pub trait StorageVolume: Send {
    /// Volume name.
    fn name(&self) -> &str;

    /// Host path of the volume.
    fn path(&self) -> Result<PathBuf>;

    /// Logical size in bytes.
    fn capacity(&self) -> Result<u64>;

    /// Delete the volume.
    fn delete(&self) -> Result<()>;
}

/// A storage pool.
pub trait StoragePool: Send + Sync {
    /// Pool name.
    fn name(&self) -> &str;

    /// Create a volume; fails if one with the same name exists.
    fn create_volume(&self, spec: &VolumeSpec) -> Result<Box<dyn StorageVolume>>;

    /// Look up a volume by name.
    fn lookup_volume_by_name(&self, name: &str) -> Result<Box<dyn StorageVolume>>;

    /// Names of all volumes in the pool.
    fn list_volumes(&self) -> Result<Vec<String>>;

    /// Delete a volume by name.
    fn remove_volume_by_name(&self, name: &str) -> Result<()> {
        self.lookup_volume_by_name(name)?.delete()
    }
}

/// Connection to the storage backend.
pub trait StorageConnection: Send + Sync {
    /// Look up a pool by name.
    fn lookup_pool_by_name(&self, name: &str) -> Result<Arc<dyn StoragePool>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_state_from_virsh() {
        assert_eq!(DomainState::from_virsh("running\n"), Some(DomainState::Running));
        assert_eq!(DomainState::from_virsh("shut off"), Some(DomainState::Shutoff));
        assert_eq!(DomainState::from_virsh("in shutdown"), Some(DomainState::Shutdown));
        assert_eq!(DomainState::from_virsh("bogus"), None);
    }

    #[test]
    fn test_domain_state_is_stopped() {
        assert!(DomainState::Shutoff.is_stopped());
        assert!(DomainState::Crashed.is_stopped());
        assert!(!DomainState::Running.is_stopped());
        assert!(!DomainState::Shutdown.is_stopped());
        assert!(!DomainState::Paused.is_stopped());
    }

    #[test]
    fn test_volume_spec_builder() {
        let spec = VolumeSpec::qcow2("vmlet_root_abc", 1024).backed_by("/images/cirros.qcow2");
        assert_eq!(spec.format, DiskFormat::Qcow2);
        assert_eq!(spec.backing_store, Some(PathBuf::from("/images/cirros.qcow2")));
    }
}
