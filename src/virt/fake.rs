//! In-memory hypervisor and storage doubles.
//!
//! Both fakes share a [`Recorder`] so tests can assert the relative order of
//! storage and domain calls, e.g. that a volume was created before the domain
//! that uses it was defined.

use super::{
    Domain, DomainConnection, DomainDefinition, DomainState, StorageConnection, StoragePool,
    StorageVolume, VolumeSpec,
};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Ordered log of backend calls, formatted as `"<component>: <Op> <arg>"`.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, entry: String) {
        tracing::trace!(call = %entry, "fake backend call");
        self.calls.lock().push(entry);
    }

    /// Snapshot of all calls so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls equal to `entry`.
    pub fn count(&self, entry: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == entry).count()
    }

    /// Position of the first call equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c == entry)
    }

    /// Forget all calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[derive(Debug)]
struct FakeDomainEntry {
    uuid: String,
    definition: DomainDefinition,
    state: DomainState,
}

#[derive(Debug, Default)]
struct FakeDomains {
    domains: BTreeMap<String, FakeDomainEntry>,
    ignore_shutdown: bool,
    fail_define: Option<String>,
    destroy_failures: u32,
    state_queries: u32,
    failing_state_queries: BTreeSet<u32>,
}

/// Fake domain namespace.
#[derive(Debug, Clone)]
pub struct FakeDomainConnection {
    rec: Recorder,
    inner: Arc<Mutex<FakeDomains>>,
}

impl FakeDomainConnection {
    /// Create a connection recording into `rec`.
    pub fn new(rec: Recorder) -> Self {
        Self {
            rec,
            inner: Arc::new(Mutex::new(FakeDomains::default())),
        }
    }

    /// Make running guests ignore graceful shutdown requests.
    pub fn set_ignore_shutdown(&self, ignore: bool) {
        self.inner.lock().ignore_shutdown = ignore;
    }

    /// Make the next define calls fail with `message`.
    pub fn fail_define(&self, message: impl Into<String>) {
        self.inner.lock().fail_define = Some(message.into());
    }

    /// Make the next `count` destroy calls fail.
    pub fn fail_destroy(&self, count: u32) {
        self.inner.lock().destroy_failures = count;
    }

    /// Make the `n`th state query from now on fail (1 is the next one).
    pub fn fail_state_query(&self, n: u32) {
        let mut inner = self.inner.lock();
        let at = inner.state_queries + n;
        inner.failing_state_queries.insert(at);
    }

    /// Stored definition of a domain.
    pub fn definition(&self, name: &str) -> Option<DomainDefinition> {
        self.inner.lock().domains.get(name).map(|d| d.definition.clone())
    }

    /// Current state of a domain, `None` if not defined.
    pub fn domain_state(&self, name: &str) -> Option<DomainState> {
        self.inner.lock().domains.get(name).map(|d| d.state)
    }

    /// Force a domain into `state`, as if the guest changed it.
    pub fn set_domain_state(&self, name: &str, state: DomainState) {
        if let Some(entry) = self.inner.lock().domains.get_mut(name) {
            entry.state = state;
        }
    }

    /// Names of all defined domains.
    pub fn domain_names(&self) -> Vec<String> {
        self.inner.lock().domains.keys().cloned().collect()
    }

    fn handle(&self, name: &str, uuid: &str) -> Box<dyn Domain> {
        Box::new(FakeDomain {
            name: name.to_string(),
            uuid: uuid.to_string(),
            rec: self.rec.clone(),
            inner: Arc::clone(&self.inner),
        })
    }
}

impl DomainConnection for FakeDomainConnection {
    fn define_domain(&self, definition: &DomainDefinition) -> Result<Box<dyn Domain>> {
        self.rec.record(format!("domain conn: DefineDomain {}", definition.name));
        let mut inner = self.inner.lock();
        if let Some(msg) = &inner.fail_define {
            return Err(Error::hypervisor(msg.clone()));
        }
        if let Some(existing) = inner.domains.get(&definition.name) {
            if existing.uuid != definition.uuid {
                return Err(Error::hypervisor(format!(
                    "domain {} already exists with uuid {}",
                    definition.name, existing.uuid
                )));
            }
        }
        inner.domains.insert(
            definition.name.clone(),
            FakeDomainEntry {
                uuid: definition.uuid.clone(),
                definition: definition.clone(),
                state: DomainState::Shutoff,
            },
        );
        drop(inner);
        Ok(self.handle(&definition.name, &definition.uuid))
    }

    fn lookup_domain_by_uuid(&self, uuid: &str) -> Result<Box<dyn Domain>> {
        let name = self
            .inner
            .lock()
            .domains
            .iter()
            .find(|(_, d)| d.uuid == uuid)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| Error::DomainNotFound(uuid.to_string()))?;
        Ok(self.handle(&name, uuid))
    }

    fn lookup_domain_by_name(&self, name: &str) -> Result<Box<dyn Domain>> {
        let uuid = self
            .inner
            .lock()
            .domains
            .get(name)
            .map(|d| d.uuid.clone())
            .ok_or_else(|| Error::DomainNotFound(name.to_string()))?;
        Ok(self.handle(name, &uuid))
    }
}

struct FakeDomain {
    name: String,
    uuid: String,
    rec: Recorder,
    inner: Arc<Mutex<FakeDomains>>,
}

impl FakeDomain {
    fn with_entry<T>(&self, f: impl FnOnce(&mut FakeDomains) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.lock();
        if !inner.domains.contains_key(&self.name) {
            return Err(Error::DomainNotFound(self.name.clone()));
        }
        f(&mut inner)
    }

    fn set_state(inner: &mut FakeDomains, name: &str, state: DomainState) {
        if let Some(entry) = inner.domains.get_mut(name) {
            entry.state = state;
        }
    }

    fn state_of(inner: &FakeDomains, name: &str) -> DomainState {
        inner.domains.get(name).map(|d| d.state).unwrap_or(DomainState::NoState)
    }
}

impl Domain for FakeDomain {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Result<()> {
        self.rec.record(format!("domain: Create {}", self.name));
        self.with_entry(|inner| {
            if Self::state_of(inner, &self.name) == DomainState::Running {
                return Err(Error::hypervisor(format!("domain {} is already running", self.name)));
            }
            Self::set_state(inner, &self.name, DomainState::Running);
            Ok(())
        })
    }

    fn shutdown(&self) -> Result<()> {
        self.rec.record(format!("domain: Shutdown {}", self.name));
        self.with_entry(|inner| {
            if Self::state_of(inner, &self.name) != DomainState::Running {
                return Err(Error::hypervisor(format!("domain {} is not running", self.name)));
            }
            if !inner.ignore_shutdown {
                Self::set_state(inner, &self.name, DomainState::Shutoff);
            }
            Ok(())
        })
    }

    fn destroy(&self) -> Result<()> {
        self.rec.record(format!("domain: Destroy {}", self.name));
        self.with_entry(|inner| {
            if inner.destroy_failures > 0 {
                inner.destroy_failures -= 1;
                return Err(Error::hypervisor("injected destroy failure"));
            }
            if Self::state_of(inner, &self.name).is_stopped() {
                return Err(Error::hypervisor(format!("domain {} is not running", self.name)));
            }
            Self::set_state(inner, &self.name, DomainState::Shutoff);
            Ok(())
        })
    }

    fn undefine(&self) -> Result<()> {
        self.rec.record(format!("domain: Undefine {}", self.name));
        self.with_entry(|inner| {
            inner.domains.remove(&self.name);
            Ok(())
        })
    }

    fn state(&self) -> Result<DomainState> {
        self.with_entry(|inner| {
            inner.state_queries += 1;
            let query = inner.state_queries;
            if inner.failing_state_queries.remove(&query) {
                return Err(Error::hypervisor("injected state query failure"));
            }
            Ok(Self::state_of(inner, &self.name))
        })
    }
}

#[derive(Debug, Clone)]
struct FakeVolumeEntry {
    spec: VolumeSpec,
    path: PathBuf,
}

/// Fake storage pool.
#[derive(Debug)]
pub struct FakeStoragePool {
    name: String,
    rec: Recorder,
    volumes: Arc<Mutex<BTreeMap<String, FakeVolumeEntry>>>,
}

impl FakeStoragePool {
    fn new(name: &str, rec: Recorder) -> Self {
        Self {
            name: name.to_string(),
            rec,
            volumes: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Spec a volume was created with.
    pub fn volume_spec(&self, name: &str) -> Option<VolumeSpec> {
        self.volumes.lock().get(name).map(|v| v.spec.clone())
    }

    fn volume_handle(&self, name: &str) -> Box<dyn StorageVolume> {
        Box::new(FakeStorageVolume {
            name: name.to_string(),
            pool: self.name.clone(),
            rec: self.rec.clone(),
            volumes: Arc::clone(&self.volumes),
        })
    }
}

impl StoragePool for FakeStoragePool {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_volume(&self, spec: &VolumeSpec) -> Result<Box<dyn StorageVolume>> {
        self.rec.record(format!(
            "{}: CreateStorageVol {} {}",
            self.name, spec.name, spec.capacity
        ));
        let mut volumes = self.volumes.lock();
        if volumes.contains_key(&spec.name) {
            return Err(Error::storage(format!("volume {} already exists", spec.name)));
        }
        let path = PathBuf::from("/fake/volumes").join(&self.name).join(&spec.name);
        volumes.insert(
            spec.name.clone(),
            FakeVolumeEntry {
                spec: spec.clone(),
                path,
            },
        );
        drop(volumes);
        Ok(self.volume_handle(&spec.name))
    }

    fn lookup_volume_by_name(&self, name: &str) -> Result<Box<dyn StorageVolume>> {
        if !self.volumes.lock().contains_key(name) {
            return Err(Error::volume_not_found(name));
        }
        Ok(self.volume_handle(name))
    }

    fn list_volumes(&self) -> Result<Vec<String>> {
        Ok(self.volumes.lock().keys().cloned().collect())
    }
}

struct FakeStorageVolume {
    name: String,
    pool: String,
    rec: Recorder,
    volumes: Arc<Mutex<BTreeMap<String, FakeVolumeEntry>>>,
}

impl FakeStorageVolume {
    fn entry(&self) -> Result<FakeVolumeEntry> {
        self.volumes
            .lock()
            .get(&self.name)
            .cloned()
            .ok_or_else(|| Error::volume_not_found(&self.name))
    }
}

impl StorageVolume for FakeStorageVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> Result<PathBuf> {
        Ok(self.entry()?.path)
    }

    fn capacity(&self) -> Result<u64> {
        Ok(self.entry()?.spec.capacity)
    }

    fn delete(&self) -> Result<()> {
        self.rec.record(format!("{}: DeleteStorageVol {}", self.pool, self.name));
        self.volumes
            .lock()
            .remove(&self.name)
            .map(|_| ())
            .ok_or_else(|| Error::volume_not_found(&self.name))
    }
}

/// Fake storage backend. Pools spring into existence on first lookup.
#[derive(Debug, Clone)]
pub struct FakeStorageConnection {
    rec: Recorder,
    pools: Arc<Mutex<BTreeMap<String, Arc<FakeStoragePool>>>>,
}

impl FakeStorageConnection {
    /// Create a storage connection recording into `rec`.
    pub fn new(rec: Recorder) -> Self {
        Self {
            rec,
            pools: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Concrete pool, created if needed.
    pub fn pool(&self, name: &str) -> Arc<FakeStoragePool> {
        let mut pools = self.pools.lock();
        let pool = pools
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(FakeStoragePool::new(name, self.rec.clone())));
        Arc::clone(pool)
    }
}

impl StorageConnection for FakeStorageConnection {
    fn lookup_pool_by_name(&self, name: &str) -> Result<Arc<dyn StoragePool>> {
        let pool: Arc<dyn StoragePool> = self.pool(name);
        Ok(pool)
    }
}
