//! Domain lifecycle manager.
//!
//! Exposes container operations on top of hypervisor domains:
//!
//! ```text
//! create ──► Created ──start──► Running ──stop──► Exited ──remove──► (gone)
//!               │                                   ▲
//!               └──────────────stop─────────────────┘
//! ```
//!
//! Every operation drives the backend first and writes metadata only after
//! the backend call succeeded. Calls on the same container ID are serialized
//! by [`ContainerLocks`].

mod locks;
pub mod shutdown;

pub use locks::ContainerLocks;
pub use shutdown::{ShutdownPolicy, StopOutcome};

use crate::annotations::{self, VmAnnotations};
use crate::bootconfig::{BootConfig, BootConfigProvider, BootImage, BootImageKind, NoCloudProvider};
use crate::clock::{Clock, SystemClock};
use crate::config::ManagerConfig;
use crate::container::{
    AttachedVolume, ContainerFilter, ContainerRecord, ContainerSpec, ContainerState, ContainerStatus,
    ContainerSummary, SandboxRecord, VolumeRef, VolumeRole,
};
use crate::error::{Error, Result};
use crate::image::{DirectoryImageResolver, ImageResolver};
use crate::metadata::{MetadataStore, RedbStore};
use crate::resources;
use crate::virt::virsh::VirshConnection;
use crate::virt::{
    DiskDevice, DiskFormat, DiskSource, Domain, DomainConnection, DomainDefinition, DomainDisk,
    StorageConnection,
};
use crate::volumes::{VolumePlan, VolumeRequest, VolumeTranslator};
use std::sync::Arc;
use std::time::Duration;

/// Prefix of domain names.
pub const DOMAIN_NAME_PREFIX: &str = "vmlet-";

/// Logical name of the boot-config volume.
pub const BOOT_CONFIG_VOLUME: &str = "cloud-init";

/// Domain name of a container.
pub fn domain_name(container_id: &str) -> String {
    format!("{}{}", DOMAIN_NAME_PREFIX, container_id)
}

/// Container lifecycle on top of a hypervisor.
pub struct DomainLifecycleManager {
    config: ManagerConfig,
    domains: Arc<dyn DomainConnection>,
    volumes: VolumeTranslator,
    images: Arc<dyn ImageResolver>,
    metadata: Arc<dyn MetadataStore>,
    boot_config: Arc<dyn BootConfigProvider>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownPolicy,
    locks: ContainerLocks,
}

impl DomainLifecycleManager {
    /// Create a manager from its collaborators.
    pub fn new(
        config: ManagerConfig,
        domains: Arc<dyn DomainConnection>,
        storage: Arc<dyn StorageConnection>,
        images: Arc<dyn ImageResolver>,
        metadata: Arc<dyn MetadataStore>,
        boot_config: Arc<dyn BootConfigProvider>,
    ) -> Result<Self> {
        let volumes = VolumeTranslator::new(&config, storage)?;
        let shutdown = ShutdownPolicy::from(&config.shutdown);
        Ok(Self {
            config,
            domains,
            volumes,
            images,
            metadata,
            boot_config,
            clock: Arc::new(SystemClock),
            shutdown,
            locks: ContainerLocks::new(),
        })
    }

    /// Production wiring: virsh backend, image directory, redb metadata and
    /// NoCloud boot configs, all taken from `config`.
    pub fn from_config(config: ManagerConfig) -> Result<Self> {
        let virsh = Arc::new(VirshConnection::new(&config.libvirt_uri));
        let images = Arc::new(DirectoryImageResolver::new(&config.images_dir));
        let metadata = Arc::new(RedbStore::open(&config.metadata_path)?);
        let boot_config = Arc::new(NoCloudProvider::new(&config.boot_config_dir, config.iso_tool.clone()));
        Self::new(config, virsh.clone(), virsh, images, metadata, boot_config)
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Register a sandbox so containers can be created in it.
    pub fn register_sandbox(&self, sandbox: SandboxRecord) -> Result<()> {
        if sandbox.id.is_empty() {
            return Err(Error::validation("sandbox id must not be empty"));
        }
        let id = sandbox.id.clone();
        self.metadata
            .save_sandbox(&id, &mut |_| Ok(Some(sandbox.clone())))?;
        tracing::debug!(sandbox_id = %id, "registered sandbox");
        Ok(())
    }

    /// Define a domain for `spec` and record the container as `Created`.
    ///
    /// Returns the new container ID.
    pub fn create_container(&self, spec: &ContainerSpec, network_namespace: &str) -> Result<String> {
        validate_spec(spec)?;
        let sandbox = self
            .metadata
            .retrieve_sandbox(&spec.sandbox_id)?
            .ok_or_else(|| Error::SandboxNotFound(spec.sandbox_id.clone()))?;

        let effective = annotations::effective(&sandbox.annotations, &spec.annotations);
        let vm = VmAnnotations::parse(&effective)?;
        let res = resources::translate(&spec.resources, &effective)?;
        let image_path = self.images.resolve(&spec.image)?;

        let id = uuid::Uuid::new_v4().to_string();
        let lock = self.locks.get(&id);
        let _guard = lock.lock();

        tracing::info!(
            container_id = %id,
            sandbox_id = %spec.sandbox_id,
            name = %spec.metadata.name,
            image = %spec.image,
            "creating container"
        );

        let mut plan = self.volumes.translate(&VolumeRequest {
            sandbox_id: &spec.sandbox_id,
            pod_uid: &sandbox.uid,
            image_path: &image_path,
            mounts: &spec.mounts,
            bus: vm.disk_driver,
        })?;

        let boot_image = match self.attach_boot_config(&id, spec, &vm, &mut plan) {
            Ok(image) => image,
            Err(e) => {
                self.volumes.rollback(&plan.created);
                return Err(e);
            }
        };

        let definition = DomainDefinition {
            name: domain_name(&id),
            uuid: id.clone(),
            domain_type: self.config.domain_type,
            vcpus: res.vcpus,
            memory_bytes: res.memory_bytes,
            cpu_tune: res.cpu_tune,
            disks: plan.disks.clone(),
            filesystems: plan.filesystems.clone(),
            network_namespace: network_namespace.to_string(),
            container_id: id.clone(),
        };

        let domain = match self.domains.define_domain(&definition) {
            Ok(domain) => domain,
            Err(e) => {
                tracing::warn!(container_id = %id, error = %e, "domain definition failed, rolling back");
                self.rollback_create(&id, &plan, boot_image.is_some());
                return Err(e);
            }
        };

        let record = ContainerRecord {
            id: id.clone(),
            sandbox_id: spec.sandbox_id.clone(),
            metadata: spec.metadata.clone(),
            image: spec.image.clone(),
            mounts: spec.mounts.clone(),
            annotations: spec.annotations.clone(),
            labels: spec.record_labels(),
            state: ContainerState::Created,
            created_at: self.clock.now(),
            started_at: None,
            finished_at: None,
            resources: spec.resources,
            vcpus: res.vcpus,
            volumes: plan.attached,
            domain_name: definition.name,
            domain_uuid: definition.uuid,
            network_namespace: definition.network_namespace,
            exit_code: None,
            seq: 0,
        };

        let saved = self.metadata.save_container(&id, &mut |prev| match prev {
            Some(_) => Err(Error::metadata(format!("container {} already recorded", id))),
            None => Ok(Some(record.clone())),
        });
        if let Err(e) = saved {
            tracing::warn!(container_id = %id, error = %e, "saving metadata failed, rolling back");
            if let Err(undefine_err) = domain.undefine() {
                tracing::warn!(container_id = %id, error = %undefine_err, "undefine during rollback failed");
            }
            self.volumes.rollback(&plan.created);
            if boot_image.is_some() {
                self.cleanup_boot_config(&id);
            }
            return Err(e);
        }

        tracing::info!(container_id = %id, domain = %record.domain_name, "container created");
        Ok(id)
    }

    /// Boot a `Created` container.
    pub fn start_container(&self, id: &str) -> Result<()> {
        let lock = self.locks.get(id);
        let _guard = lock.lock();

        let record = self.container(id)?;
        if !record.state.can_start() {
            return Err(Error::invalid_state(ContainerState::Created.name(), record.state));
        }

        tracing::info!(container_id = %id, "starting container");
        self.domain(&record)?.create()?;

        let now = self.clock.now();
        self.update(id, |r| {
            r.state = ContainerState::Running;
            r.started_at = Some(now);
        })?;
        tracing::info!(container_id = %id, "container started");
        Ok(())
    }

    /// Stop a container, giving the guest `timeout` to power off before the
    /// domain is destroyed. Stopping an exited container does nothing.
    pub fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        let lock = self.locks.get(id);
        let _guard = lock.lock();

        let record = self.container(id)?;
        match record.state {
            ContainerState::Exited => {
                tracing::debug!(container_id = %id, "container already exited");
                return Ok(());
            }
            ContainerState::Created => {
                tracing::info!(container_id = %id, "stopping container that never started");
            }
            ContainerState::Running => {
                tracing::info!(container_id = %id, timeout_secs = timeout.as_secs(), "stopping container");
                match self.domain(&record) {
                    Ok(domain) => {
                        let outcome = self.shutdown.stop(domain.as_ref(), timeout, self.clock.as_ref())?;
                        tracing::info!(container_id = %id, outcome = ?outcome, "domain stopped");
                    }
                    Err(e) if e.is_not_found() => {
                        tracing::warn!(container_id = %id, "domain vanished, marking container exited");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let now = self.clock.now();
        self.update(id, |r| {
            r.state = ContainerState::Exited;
            r.finished_at = Some(now);
            r.exit_code = Some(0);
        })
    }

    /// Stop with the configured default timeout.
    pub fn stop_container_default(&self, id: &str) -> Result<()> {
        self.stop_container(id, self.config.default_stop_timeout)
    }

    /// Undefine the domain and delete everything the container created.
    pub fn remove_container(&self, id: &str) -> Result<()> {
        let lock = self.locks.get(id);
        let _guard = lock.lock();

        let record = self.container(id)?;
        if !record.state.can_remove() {
            return Err(Error::invalid_state("created or exited", record.state));
        }

        tracing::info!(container_id = %id, "removing container");
        match self.domain(&record) {
            Ok(domain) => domain.undefine()?,
            Err(e) if e.is_not_found() => {
                tracing::warn!(container_id = %id, domain = %record.domain_name, "domain already gone")
            }
            Err(e) => return Err(e),
        }

        self.volumes.remove(&record.volumes)?;
        if record.volumes.iter().any(|v| v.role == VolumeRole::BootConfig) {
            self.boot_config.cleanup(id)?;
        }

        self.metadata.save_container(id, &mut |_| Ok(None))?;
        drop(_guard);
        self.locks.forget(id);
        tracing::info!(container_id = %id, "container removed");
        Ok(())
    }

    /// Current status of a container.
    ///
    /// A container recorded as running whose domain has shut off or crashed
    /// is reported as exited. The stored record is left as it is.
    pub fn container_status(&self, id: &str) -> Result<ContainerStatus> {
        let record = self.container(id)?;
        let state = self.observed_state(&record);
        Ok(ContainerStatus::from_record(&record, state))
    }

    /// Containers matching `filter`, in creation order.
    pub fn list_containers(&self, filter: Option<&ContainerFilter>) -> Result<Vec<ContainerSummary>> {
        let records = self.metadata.list_containers()?;
        Ok(records
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .map(ContainerSummary::from)
            .collect())
    }

    fn container(&self, id: &str) -> Result<ContainerRecord> {
        self.metadata
            .retrieve_container(id)?
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))
    }

    fn domain(&self, record: &ContainerRecord) -> Result<Box<dyn Domain>> {
        self.domains.lookup_domain_by_uuid(&record.domain_uuid)
    }

    fn update(&self, id: &str, change: impl Fn(&mut ContainerRecord)) -> Result<()> {
        self.metadata.save_container(id, &mut |prev| match prev {
            Some(mut record) => {
                change(&mut record);
                Ok(Some(record))
            }
            None => Err(Error::ContainerNotFound(id.to_string())),
        })
    }

    fn observed_state(&self, record: &ContainerRecord) -> ContainerState {
        if record.state != ContainerState::Running {
            return record.state;
        }
        match self.domain(record).and_then(|d| d.state()) {
            Ok(state) if state.is_stopped() => {
                tracing::debug!(container_id = %record.id, domain_state = %state, "domain no longer running");
                ContainerState::Exited
            }
            Ok(_) => record.state,
            Err(e) => {
                tracing::debug!(container_id = %record.id, error = %e, "domain state unavailable");
                record.state
            }
        }
    }

    /// Produce the boot-config image when the guest needs one and append its
    /// disk to `plan`.
    fn attach_boot_config(
        &self,
        id: &str,
        spec: &ContainerSpec,
        vm: &VmAnnotations,
        plan: &mut VolumePlan,
    ) -> Result<Option<BootImage>> {
        if !vm.needs_boot_config() && plan.guest_mounts.is_empty() {
            return Ok(None);
        }

        let config = BootConfig {
            hostname: spec.metadata.name.clone(),
            ssh_keys: vm.ssh_keys.clone(),
            user_data: vm.user_data.clone(),
            mounts: plan.guest_mounts.clone(),
        };
        let image = match self.boot_config.prepare(id, &config) {
            Ok(image) => image,
            Err(e) => {
                self.cleanup_boot_config(id);
                return Err(e);
            }
        };
        let target_dev = match plan.namer.next_name() {
            Ok(dev) => dev,
            Err(e) => {
                self.cleanup_boot_config(id);
                return Err(e);
            }
        };

        let (device, source) = match image.kind {
            BootImageKind::Iso => (
                DiskDevice::Cdrom,
                DiskSource::File {
                    path: image.path.clone(),
                },
            ),
            BootImageKind::Directory => (
                DiskDevice::Disk,
                DiskSource::Dir {
                    path: image.path.clone(),
                },
            ),
        };
        let disk = DomainDisk {
            target_dev: target_dev.clone(),
            bus: plan.namer.bus(),
            device,
            format: DiskFormat::Raw,
            source,
            read_only: true,
        };
        plan.attached.push(AttachedVolume {
            name: BOOT_CONFIG_VOLUME.to_string(),
            role: VolumeRole::BootConfig,
            backing: VolumeRef::BootConfig {
                path: image.path.clone(),
            },
            target_dev,
            container_path: None,
        });
        plan.disks.push(disk);
        tracing::debug!(container_id = %id, path = %image.path.display(), "attached boot config");
        Ok(Some(image))
    }

    fn rollback_create(&self, id: &str, plan: &VolumePlan, boot_config: bool) {
        self.volumes.rollback(&plan.created);
        if boot_config {
            self.cleanup_boot_config(id);
        }
    }

    fn cleanup_boot_config(&self, id: &str) {
        if let Err(e) = self.boot_config.cleanup(id) {
            tracing::warn!(container_id = %id, error = %e, "boot config cleanup failed");
        }
    }
}

fn validate_spec(spec: &ContainerSpec) -> Result<()> {
    if spec.sandbox_id.is_empty() {
        return Err(Error::validation("sandbox id must not be empty"));
    }
    if spec.metadata.name.is_empty() {
        return Err(Error::validation("container name must not be empty"));
    }
    if spec.image.trim().is_empty() {
        return Err(Error::validation("image must not be empty"));
    }
    for mount in &spec.mounts {
        if !mount.host_path.is_absolute() {
            return Err(Error::invalid_mount(&mount.host_path, "host path must be absolute"));
        }
        if !mount.container_path.is_absolute() {
            return Err(Error::invalid_mount(
                &mount.host_path,
                format!("container path {} must be absolute", mount.container_path.display()),
            ));
        }
    }
    Ok(())
}
