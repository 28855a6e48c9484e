//! Domain definition types.
//!
//! A [`DomainDefinition`] is the structured form of what gets handed to the
//! hypervisor on define. The virsh backend renders it to libvirt XML with
//! [`DomainDefinition::to_xml`]; the fake backend stores it as-is so tests can
//! inspect disks, filesystems and resource limits directly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Memory given to a domain whose container carries no memory limit.
pub const DEFAULT_MEMORY_BYTES: u64 = 1 << 30;

/// Hypervisor domain type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    /// Hardware-accelerated KVM.
    #[default]
    Kvm,
    /// Plain QEMU emulation (nested or CI hosts).
    Qemu,
}

impl DomainType {
    /// libvirt `type` attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainType::Kvm => "kvm",
            DomainType::Qemu => "qemu",
        }
    }
}

/// Disk image format for block devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    /// Raw disk image or block device.
    #[default]
    Raw,
    /// QCOW2 format (copy-on-write).
    Qcow2,
}

impl DiskFormat {
    /// Format name as understood by qemu and libvirt.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Raw => "raw",
            DiskFormat::Qcow2 => "qcow2",
        }
    }
}

/// Bus a disk is attached to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskBus {
    /// virtio-scsi, devices named `sdX`.
    #[default]
    Scsi,
    /// virtio-blk, devices named `vdX`.
    Virtio,
}

impl DiskBus {
    /// Parse a disk-driver annotation value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scsi" => Some(DiskBus::Scsi),
            "virtio" => Some(DiskBus::Virtio),
            _ => None,
        }
    }

    /// Bus name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskBus::Scsi => "scsi",
            DiskBus::Virtio => "virtio",
        }
    }

    /// Device name prefix on this bus.
    pub fn device_prefix(&self) -> &'static str {
        match self {
            DiskBus::Scsi => "sd",
            DiskBus::Virtio => "vd",
        }
    }
}

/// Guest-visible device kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskDevice {
    /// Regular disk.
    #[default]
    Disk,
    /// Read-only optical drive.
    Cdrom,
}

/// Monitor address of a network-backed disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHost {
    /// Host name or address.
    pub name: String,
    /// TCP port.
    pub port: u16,
}

/// Credentials for a network-backed disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskAuth {
    /// cephx user.
    pub username: String,
    /// UUID of the hypervisor secret holding the key.
    pub secret_uuid: String,
    /// Base64 key stored in that secret.
    pub secret_value: String,
}

/// Where a disk's data lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiskSource {
    /// Image file (pool volume or boot-config ISO).
    File {
        /// Host path.
        path: PathBuf,
    },
    /// Host block device.
    Block {
        /// Device path.
        path: PathBuf,
    },
    /// Host directory exposed as a FAT image.
    Dir {
        /// Directory path.
        path: PathBuf,
    },
    /// Network block storage.
    Network {
        /// Protocol, e.g. `rbd`.
        protocol: String,
        /// Image name within the protocol namespace (`pool/volume` for rbd).
        name: String,
        /// Monitors.
        hosts: Vec<NetworkHost>,
        /// Optional credentials.
        auth: Option<DiskAuth>,
    },
}

impl DiskSource {
    /// libvirt disk `type` attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            DiskSource::File { .. } => "file",
            DiskSource::Block { .. } => "block",
            DiskSource::Dir { .. } => "dir",
            DiskSource::Network { .. } => "network",
        }
    }
}

/// A disk attached to a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDisk {
    /// Guest device name (`sda`, `vdb`, ...).
    pub target_dev: String,
    /// Attachment bus.
    pub bus: DiskBus,
    /// Disk or cdrom.
    pub device: DiskDevice,
    /// Data format.
    pub format: DiskFormat,
    /// Backing data.
    pub source: DiskSource,
    /// Whether the guest sees it read-only.
    pub read_only: bool,
}

/// Host directory shared with the guest over 9p.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFilesystem {
    /// Path on the host.
    pub source: PathBuf,

    /// Mount tag the guest uses to find the share.
    pub target_tag: String,

    /// Read-only share.
    pub read_only: bool,
}

/// CPU scheduler limits. `None` leaves the hypervisor default in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTune {
    /// Relative weight.
    pub shares: Option<u64>,
    /// Enforcement period in microseconds.
    pub period: Option<u64>,
    /// Allowed runtime per period in microseconds.
    pub quota: Option<i64>,
}

impl CpuTune {
    /// Whether no limit is set.
    pub fn is_empty(&self) -> bool {
        self.shares.is_none() && self.period.is_none() && self.quota.is_none()
    }
}

/// Structured domain definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDefinition {
    /// Domain name.
    pub name: String,
    /// Domain UUID.
    pub uuid: String,
    /// Hypervisor type.
    pub domain_type: DomainType,
    /// Number of vCPUs.
    pub vcpus: u32,
    /// Memory limit in bytes; `None` uses [`DEFAULT_MEMORY_BYTES`].
    pub memory_bytes: Option<u64>,
    /// CPU limits.
    pub cpu_tune: CpuTune,
    /// Disks in attachment order; the first one boots.
    pub disks: Vec<DomainDisk>,
    /// 9p shares.
    pub filesystems: Vec<DomainFilesystem>,
    /// Opaque network namespace handle.
    pub network_namespace: String,
    /// Owning container ID.
    pub container_id: String,
}

impl DomainDefinition {
    /// Memory the domain actually gets.
    pub fn effective_memory_bytes(&self) -> u64 {
        self.memory_bytes.unwrap_or(DEFAULT_MEMORY_BYTES)
    }

    /// Disk with the given guest device name.
    pub fn disk(&self, target_dev: &str) -> Option<&DomainDisk> {
        self.disks.iter().find(|d| d.target_dev == target_dev)
    }

    /// Render as libvirt domain XML.
    pub fn to_xml(&self) -> String {
        super::xml::render_domain(self)
    }
}
