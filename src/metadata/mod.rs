//! Metadata store for container and sandbox records.
//!
//! Writes go through a mutator: the store hands the current record (or
//! `None`) to a closure and persists whatever it returns, `None` meaning
//! delete. A mutator error leaves the stored record unchanged.

mod db;
mod memory;

pub use db::RedbStore;
pub use memory::MemoryStore;

use crate::container::{ContainerRecord, SandboxRecord};
use crate::error::Result;

/// Read-modify-write callback for a container record.
pub type ContainerMutator<'a> =
    &'a mut dyn FnMut(Option<ContainerRecord>) -> Result<Option<ContainerRecord>>;

/// Read-modify-write callback for a sandbox record.
pub type SandboxMutator<'a> =
    &'a mut dyn FnMut(Option<SandboxRecord>) -> Result<Option<SandboxRecord>>;

/// Persistence for container and sandbox records.
pub trait MetadataStore: Send + Sync {
    /// Atomically transform the container record stored under `id`.
    fn save_container(&self, id: &str, mutator: ContainerMutator<'_>) -> Result<()>;

    /// Fetch a container record.
    fn retrieve_container(&self, id: &str) -> Result<Option<ContainerRecord>>;

    /// All container records in insertion order.
    fn list_containers(&self) -> Result<Vec<ContainerRecord>>;

    /// Atomically transform the sandbox record stored under `id`.
    fn save_sandbox(&self, id: &str, mutator: SandboxMutator<'_>) -> Result<()>;

    /// Fetch a sandbox record.
    fn retrieve_sandbox(&self, id: &str) -> Result<Option<SandboxRecord>>;

    /// All sandbox records in insertion order.
    fn list_sandboxes(&self) -> Result<Vec<SandboxRecord>>;
}

/// Records ordered by an insertion sequence the store assigns.
pub(crate) trait Sequenced {
    fn seq(&self) -> u64;
    fn set_seq(&mut self, seq: u64);
}

impl Sequenced for ContainerRecord {
    fn seq(&self) -> u64 {
        self.seq
    }

    fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }
}

impl Sequenced for SandboxRecord {
    fn seq(&self) -> u64 {
        self.seq
    }

    fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }
}

/// Carry the sequence of the stored record over to `next`, or take a fresh
/// one for new records. Returns whether the counter was consumed.
pub(crate) fn assign_seq<T: Sequenced>(previous_seq: Option<u64>, next: &mut T, next_seq: u64) -> bool {
    match previous_seq {
        Some(seq) => {
            next.set_seq(seq);
            false
        }
        None => {
            next.set_seq(next_seq);
            true
        }
    }
}

/// Store conformance checks run against every implementation.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use crate::container::{ContainerMetadata, ContainerState, ResourceSpec};
    use crate::error::Error;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    pub fn container(id: &str) -> ContainerRecord {
        ContainerRecord {
            id: id.to_string(),
            sandbox_id: "sb".to_string(),
            metadata: ContainerMetadata {
                name: id.to_string(),
                attempt: 0,
            },
            image: "cirros".to_string(),
            mounts: vec![],
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
            state: ContainerState::Created,
            created_at: Utc.with_ymd_and_hms(2017, 5, 30, 20, 19, 0).unwrap(),
            started_at: None,
            finished_at: None,
            resources: ResourceSpec::default(),
            vcpus: 1,
            volumes: vec![],
            domain_name: format!("vmlet-{}", id),
            domain_uuid: id.to_string(),
            network_namespace: String::new(),
            exit_code: None,
            seq: 0,
        }
    }

    fn put(store: &dyn MetadataStore, id: &str) {
        let record = container(id);
        store
            .save_container(id, &mut |_| Ok(Some(record.clone())))
            .unwrap();
    }

    pub fn insert_update_delete(store: &dyn MetadataStore) {
        assert!(store.retrieve_container("a").unwrap().is_none());
        put(store, "a");

        store
            .save_container("a", &mut |r| {
                let mut r = r.expect("record exists");
                r.state = ContainerState::Running;
                Ok(Some(r))
            })
            .unwrap();
        let got = store.retrieve_container("a").unwrap().unwrap();
        assert_eq!(got.state, ContainerState::Running);

        store.save_container("a", &mut |_| Ok(None)).unwrap();
        assert!(store.retrieve_container("a").unwrap().is_none());
        assert!(store.list_containers().unwrap().is_empty());
    }

    pub fn insertion_order(store: &dyn MetadataStore) {
        for id in ["zeta", "alpha", "mid"] {
            put(store, id);
        }
        // Updating must not move a record to the end.
        store
            .save_container("zeta", &mut |r| Ok(r.map(|mut r| {
                r.exit_code = Some(0);
                r
            })))
            .unwrap();

        let ids: Vec<String> = store.list_containers().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
    }

    pub fn failed_mutator_keeps_record(store: &dyn MetadataStore) {
        put(store, "a");
        let err = store
            .save_container("a", &mut |_| Err(Error::validation("nope")))
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
        assert_eq!(store.retrieve_container("a").unwrap().unwrap().state, ContainerState::Created);
    }

    pub fn sandboxes(store: &dyn MetadataStore) {
        let sb = SandboxRecord::new("sb1", "pod", "default", "uid-1", Utc::now())
            .with_annotation("VmletVCPUCount", "2");
        store
            .save_sandbox("sb1", &mut |_| Ok(Some(sb.clone())))
            .unwrap();
        let got = store.retrieve_sandbox("sb1").unwrap().unwrap();
        assert_eq!(got.uid, "uid-1");
        assert_eq!(got.annotations["VmletVCPUCount"], "2");
        assert_eq!(store.list_sandboxes().unwrap().len(), 1);

        store.save_sandbox("sb1", &mut |_| Ok(None)).unwrap();
        assert!(store.retrieve_sandbox("sb1").unwrap().is_none());
    }
}
