//! Container model.
//!
//! - [`ContainerSpec`]: what the orchestrator asks for
//! - [`ContainerRecord`]: what the metadata store keeps
//! - [`ContainerState`]: the lifecycle state machine
//! - [`ContainerStatus`] / [`ContainerSummary`]: what status and list return

pub mod record;
pub mod spec;
pub mod state;
pub mod status;

pub use record::{AttachedVolume, ContainerRecord, SandboxRecord, VolumeRef, VolumeRole};
pub use spec::{ContainerMetadata, ContainerSpec, Mount, ResourceSpec, CONTAINER_NAME_LABEL};
pub use state::ContainerState;
pub use status::{ContainerFilter, ContainerStatus, ContainerSummary};
