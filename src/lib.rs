//! vmlet - run hypervisor virtual machines as orchestrator containers.
//!
//! A container maps to one domain named `vmlet-<container id>`, booted from a
//! copy-on-write root volume layered on the container image. Secondary disks
//! come from flexvolume definitions in the pod's volume directory, plain host
//! mounts become 9p shares, and SSH keys or cloud-init user data are delivered
//! on a NoCloud boot-config disk.
//!
//! # Example
//!
//! ```no_run
//! use vmlet::{ContainerSpec, DomainLifecycleManager, ManagerConfig};
//! use std::time::Duration;
//!
//! # fn main() -> vmlet::Result<()> {
//! let manager = DomainLifecycleManager::from_config(ManagerConfig::load()?)?;
//! let id = manager.create_container(&ContainerSpec::new("sandbox-1", "web", "cirros"), "")?;
//! manager.start_container(&id)?;
//! manager.stop_container(&id, Duration::from_secs(30))?;
//! manager.remove_container(&id)?;
//! # Ok(())
//! # }
//! ```

pub mod annotations;
pub mod bootconfig;
pub mod clock;
pub mod config;
pub mod container;
pub mod error;
pub mod image;
pub mod manager;
pub mod metadata;
pub mod resources;
pub mod virt;
pub mod volumes;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ManagerConfig, ShutdownConfig};
pub use container::{
    ContainerFilter, ContainerSpec, ContainerState, ContainerStatus, ContainerSummary, Mount,
    ResourceSpec, SandboxRecord,
};
pub use error::{Error, ErrorKind, Result};
pub use manager::{DomainLifecycleManager, ShutdownPolicy, StopOutcome};
pub use metadata::{MemoryStore, MetadataStore, RedbStore};

/// Version of vmlet.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
