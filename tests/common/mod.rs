//! Shared setup for lifecycle integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vmlet::bootconfig::NoCloudProvider;
use vmlet::image::StaticImageResolver;
use vmlet::virt::fake::{FakeDomainConnection, FakeStorageConnection, Recorder};
use vmlet::volumes::volume_root;
use vmlet::{DomainLifecycleManager, FakeClock, ManagerConfig, MemoryStore, MetadataStore, SandboxRecord};
use vmlet_flexvolume::FlexVolumeDriver;

pub const SANDBOX_ID: &str = "sb1";
pub const POD_UID: &str = "f2a1c0de-0000-4000-8000-000000000001";
pub const IMAGE: &str = "cirros";
pub const IMAGE_PATH: &str = "/images/cirros.qcow2";

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub rec: Recorder,
    pub domains: FakeDomainConnection,
    pub storage: FakeStorageConnection,
    pub clock: Arc<FakeClock>,
    pub metadata: Arc<dyn MetadataStore>,
    pub manager: DomainLifecycleManager,
}

impl Harness {
    /// Harness whose clock advances by itself when slept on.
    pub fn new() -> Self {
        Self::build(Arc::new(FakeClock::auto_advancing(epoch())), Arc::new(MemoryStore::new()))
    }

    /// Harness whose clock only moves when the test advances it.
    pub fn with_blocking_clock() -> Self {
        Self::build(Arc::new(FakeClock::new(epoch())), Arc::new(MemoryStore::new()))
    }

    pub fn build(clock: Arc<FakeClock>, metadata: Arc<dyn MetadataStore>) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let rec = Recorder::new();
        let domains = FakeDomainConnection::new(rec.clone());
        let storage = FakeStorageConnection::new(rec.clone());
        let manager = manager_for(tmp.path(), &domains, &storage, &clock, &metadata);
        manager
            .register_sandbox(SandboxRecord::new(SANDBOX_ID, "web-pod", "default", POD_UID, epoch()))
            .unwrap();
        Self {
            tmp,
            rec,
            domains,
            storage,
            clock,
            metadata,
            manager,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        self.manager.config()
    }

    /// Run the flexvolume driver's mount call for a volume of the sandbox's pod.
    pub fn mount_flexvolume(&self, name: &str, uuid: &str, json: &str) -> PathBuf {
        let dir = volume_root(&self.config().kubelet_root_dir, POD_UID).join(name);
        let uuid = uuid.to_string();
        FlexVolumeDriver::new(move || uuid.clone()).mount(&dir, json).unwrap();
        dir
    }

    pub fn pool_volumes(&self) -> Vec<String> {
        use vmlet::virt::StoragePool;
        self.storage.pool("volumes").list_volumes().unwrap()
    }
}

pub fn manager_for(
    root: &Path,
    domains: &FakeDomainConnection,
    storage: &FakeStorageConnection,
    clock: &Arc<FakeClock>,
    metadata: &Arc<dyn MetadataStore>,
) -> DomainLifecycleManager {
    let config = ManagerConfig {
        kubelet_root_dir: root.join("pods"),
        boot_config_dir: root.join("boot"),
        images_dir: root.join("images"),
        metadata_path: root.join("metadata.redb"),
        iso_tool: None,
        ..ManagerConfig::default()
    };
    let boot = NoCloudProvider::new(&config.boot_config_dir, None);
    DomainLifecycleManager::new(
        config,
        Arc::new(domains.clone()),
        Arc::new(storage.clone()),
        Arc::new(StaticImageResolver::new().with_image(IMAGE, IMAGE_PATH)),
        Arc::clone(metadata),
        Arc::new(boot),
    )
    .unwrap()
    .with_clock(clock.clone())
}
