//! Volume translation.
//!
//! Turns a container's image and mounts into the ordered disk list of its
//! domain:
//!
//! 1. the root volume `vmlet_root_<sandbox id>`, layered on the image
//! 2. every flexvolume of the pod, sorted by name
//!
//! Mounts pointing into the pod's flexvolume directory give those volumes a
//! guest mount point; any other mount becomes a 9p share. The boot-config
//! disk, when there is one, is appended by the lifecycle manager.

pub mod device;
pub mod flexvolume;

pub use device::DeviceNamer;
pub use flexvolume::{discover, volume_root, DiscoveredVolume, RawDevicePolicy};

use crate::bootconfig::GuestMount;
use crate::config::ManagerConfig;
use crate::container::{AttachedVolume, Mount, VolumeRef, VolumeRole};
use crate::error::{Error, Result};
use crate::virt::{
    DiskAuth, DiskBus, DiskDevice, DiskFormat, DiskSource, DomainDisk, DomainFilesystem, NetworkHost,
    StorageConnection, StoragePool, StorageVolume, VolumeSpec,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vmlet_flexvolume::{CephVolume, RawVolume, VolumeDefinition};

/// Logical name of the root volume.
pub const ROOT_VOLUME: &str = "root";

/// Prefix of 9p share tags.
pub const SHARE_TAG_PREFIX: &str = "vmlet";

/// Pool volume name of a sandbox's root disk.
pub fn root_volume_name(sandbox_id: &str) -> String {
    format!("vmlet_root_{}", sandbox_id)
}

/// Pool volume name of a qcow2 flexvolume.
pub fn qcow2_volume_name(uuid: &str, name: &str) -> String {
    format!("vmlet-{}-{}", uuid, name)
}

/// Inputs of a translation.
#[derive(Debug, Clone)]
pub struct VolumeRequest<'a> {
    /// Owning sandbox.
    pub sandbox_id: &'a str,
    /// Pod UID of the sandbox.
    pub pod_uid: &'a str,
    /// Resolved image file.
    pub image_path: &'a Path,
    /// Container mounts.
    pub mounts: &'a [Mount],
    /// Bus for all disks.
    pub bus: DiskBus,
}

/// A pool volume created by a translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedVolume {
    /// Pool name.
    pub pool: String,
    /// Volume name.
    pub volume: String,
}

/// Result of a translation.
#[derive(Debug, Clone)]
pub struct VolumePlan {
    /// Attachment records, parallel to `disks`.
    pub attached: Vec<AttachedVolume>,
    /// Domain disks.
    pub disks: Vec<DomainDisk>,
    /// 9p shares.
    pub filesystems: Vec<DomainFilesystem>,
    /// Guest-side mounts of the shares.
    pub guest_mounts: Vec<GuestMount>,
    /// Pool volumes this translation created (not the reused ones).
    pub created: Vec<CreatedVolume>,
    /// Device namer positioned after the last disk.
    pub namer: DeviceNamer,
}

impl VolumePlan {
    fn new(bus: DiskBus) -> Self {
        Self {
            attached: Vec::new(),
            disks: Vec::new(),
            filesystems: Vec::new(),
            guest_mounts: Vec::new(),
            created: Vec::new(),
            namer: DeviceNamer::new(bus),
        }
    }

    fn push(&mut self, attached: AttachedVolume, disk: DomainDisk) {
        self.attached.push(attached);
        self.disks.push(disk);
    }
}

/// Volume translator bound to one storage backend.
pub struct VolumeTranslator {
    storage: Arc<dyn StorageConnection>,
    pool: String,
    root_capacity: u64,
    kubelet_root_dir: PathBuf,
    raw_devices: RawDevicePolicy,
}

impl VolumeTranslator {
    /// Create a translator from configuration.
    pub fn new(config: &ManagerConfig, storage: Arc<dyn StorageConnection>) -> Result<Self> {
        Ok(Self {
            storage,
            pool: config.storage_pool.clone(),
            root_capacity: config.root_volume_bytes()?,
            kubelet_root_dir: config.kubelet_root_dir.clone(),
            raw_devices: RawDevicePolicy::new(&config.raw_devices)?,
        })
    }

    /// Realize all volumes of `req`. On failure every volume created so far
    /// is deleted again.
    pub fn translate(&self, req: &VolumeRequest<'_>) -> Result<VolumePlan> {
        let mut plan = VolumePlan::new(req.bus);
        match self.fill(&mut plan, req) {
            Ok(()) => Ok(plan),
            Err(e) => {
                self.rollback(&plan.created);
                Err(e)
            }
        }
    }

    fn fill(&self, plan: &mut VolumePlan, req: &VolumeRequest<'_>) -> Result<()> {
        let pool = self.storage.lookup_pool_by_name(&self.pool)?;

        let root_name = root_volume_name(req.sandbox_id);
        let root_spec = VolumeSpec::qcow2(&root_name, self.root_capacity).backed_by(req.image_path);
        let root = self.realize(pool.as_ref(), &root_spec, plan)?;
        let root_disk = DomainDisk {
            target_dev: plan.namer.next_name()?,
            bus: req.bus,
            device: DiskDevice::Disk,
            format: DiskFormat::Qcow2,
            source: DiskSource::File { path: root.path()? },
            read_only: false,
        };
        plan.push(
            AttachedVolume {
                name: ROOT_VOLUME.to_string(),
                role: VolumeRole::Root,
                backing: VolumeRef::Pool {
                    pool: self.pool.clone(),
                    volume: root_name,
                },
                target_dev: root_disk.target_dev.clone(),
                container_path: None,
            },
            root_disk,
        );

        let flex_root = volume_root(&self.kubelet_root_dir, req.pod_uid);
        let discovered = discover(&flex_root)?;
        let mut by_dir: Vec<(PathBuf, usize)> = Vec::with_capacity(discovered.len());
        for volume in &discovered {
            let target_dev = plan.namer.next_name()?;
            let (backing, disk) = self.secondary_disk(pool.as_ref(), volume, target_dev, req.bus, plan)?;
            by_dir.push((volume.dir.clone(), plan.attached.len()));
            plan.push(
                AttachedVolume {
                    name: volume.name.clone(),
                    role: VolumeRole::Secondary,
                    backing,
                    target_dev: disk.target_dev.clone(),
                    container_path: None,
                },
                disk,
            );
        }

        for mount in req.mounts {
            if mount.host_path.starts_with(&flex_root) {
                let index = by_dir
                    .iter()
                    .find(|(dir, _)| mount.host_path.starts_with(dir))
                    .map(|(_, i)| *i)
                    .ok_or_else(|| Error::invalid_mount(&mount.host_path, "no volume definition"))?;
                plan.attached[index].container_path = Some(mount.container_path.clone());
                continue;
            }

            let tag = format!("{}{}", SHARE_TAG_PREFIX, plan.filesystems.len());
            plan.filesystems.push(DomainFilesystem {
                source: mount.host_path.clone(),
                target_tag: tag.clone(),
                read_only: mount.read_only,
            });
            plan.guest_mounts.push(GuestMount {
                tag,
                path: mount.container_path.clone(),
                read_only: mount.read_only,
            });
        }

        Ok(())
    }

    fn secondary_disk(
        &self,
        pool: &dyn StoragePool,
        volume: &DiscoveredVolume,
        target_dev: String,
        bus: DiskBus,
        plan: &mut VolumePlan,
    ) -> Result<(VolumeRef, DomainDisk)> {
        let disk = |format, source| DomainDisk {
            target_dev,
            bus,
            device: DiskDevice::Disk,
            format,
            source,
            read_only: false,
        };

        match &volume.stored.definition {
            VolumeDefinition::Raw(RawVolume { path }) => {
                if !self.raw_devices.allows(path) {
                    return Err(Error::invalid_mount(
                        &volume.dir,
                        format!("raw device {} is not allowed", path),
                    ));
                }
                let path = PathBuf::from(path);
                Ok((
                    VolumeRef::Block { path: path.clone() },
                    disk(DiskFormat::Raw, DiskSource::Block { path }),
                ))
            }
            VolumeDefinition::Qcow2(q) => {
                let name = qcow2_volume_name(&volume.stored.uuid, &volume.name);
                let spec = VolumeSpec::qcow2(&name, q.capacity_bytes()?);
                let vol = self.realize(pool, &spec, plan)?;
                let path = vol.path()?;
                Ok((
                    VolumeRef::Pool {
                        pool: self.pool.clone(),
                        volume: name,
                    },
                    disk(DiskFormat::Qcow2, DiskSource::File { path }),
                ))
            }
            VolumeDefinition::Ceph(ceph) => {
                let (host, port) = ceph.monitor_addr()?;
                let name = ceph_image_name(ceph);
                Ok((
                    VolumeRef::Network {
                        protocol: "rbd".to_string(),
                        name: name.clone(),
                    },
                    disk(
                        DiskFormat::Raw,
                        DiskSource::Network {
                            protocol: "rbd".to_string(),
                            name,
                            hosts: vec![NetworkHost { name: host, port }],
                            auth: Some(DiskAuth {
                                username: ceph.user.clone(),
                                secret_uuid: volume.stored.uuid.clone(),
                                secret_value: ceph.secret.trim().to_string(),
                            }),
                        },
                    ),
                ))
            }
        }
    }

    /// Look up `spec.name`, creating it when absent.
    fn realize(
        &self,
        pool: &dyn StoragePool,
        spec: &VolumeSpec,
        plan: &mut VolumePlan,
    ) -> Result<Box<dyn StorageVolume>> {
        match pool.lookup_volume_by_name(&spec.name) {
            Ok(existing) => {
                tracing::debug!(volume = %spec.name, "reusing existing volume");
                Ok(existing)
            }
            Err(e) if e.is_not_found() => {
                let vol = pool.create_volume(spec)?;
                plan.created.push(CreatedVolume {
                    pool: pool.name().to_string(),
                    volume: spec.name.clone(),
                });
                tracing::info!(volume = %spec.name, capacity = spec.capacity, "created volume");
                Ok(vol)
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort delete of volumes created by a failed create.
    pub fn rollback(&self, created: &[CreatedVolume]) {
        for v in created.iter().rev() {
            let result = self
                .storage
                .lookup_pool_by_name(&v.pool)
                .and_then(|pool| pool.remove_volume_by_name(&v.volume));
            if let Err(e) = result {
                tracing::warn!(pool = %v.pool, volume = %v.volume, error = %e, "volume rollback failed");
            }
        }
    }

    /// Delete the pool volumes among `volumes`. Already missing volumes are
    /// skipped.
    pub fn remove(&self, volumes: &[AttachedVolume]) -> Result<()> {
        let mut pools: HashMap<&str, Arc<dyn StoragePool>> = HashMap::new();
        for (pool_name, volume) in volumes.iter().filter_map(AttachedVolume::pool_volume) {
            let pool = match pools.get(pool_name) {
                Some(pool) => Arc::clone(pool),
                None => {
                    let pool = self.storage.lookup_pool_by_name(pool_name)?;
                    pools.insert(pool_name, Arc::clone(&pool));
                    pool
                }
            };
            match pool.remove_volume_by_name(volume) {
                Ok(()) => tracing::debug!(volume = %volume, "deleted volume"),
                Err(e) if e.is_not_found() => {
                    tracing::debug!(volume = %volume, "volume already gone")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn ceph_image_name(ceph: &CephVolume) -> String {
    format!("{}/{}", ceph.pool, ceph.volume)
}
