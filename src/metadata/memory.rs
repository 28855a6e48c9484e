//! In-memory metadata store.

use super::{assign_seq, ContainerMutator, MetadataStore, SandboxMutator, Sequenced};
use crate::container::{ContainerRecord, SandboxRecord};
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug)]
struct Table<T> {
    records: HashMap<String, T>,
    next_seq: u64,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            next_seq: 1,
        }
    }
}

impl<T: Sequenced + Clone> Table<T> {
    fn save(&mut self, id: &str, mutator: &mut dyn FnMut(Option<T>) -> Result<Option<T>>) -> Result<()> {
        let current = self.records.get(id).cloned();
        match mutator(current)? {
            Some(mut next) => {
                let previous_seq = self.records.get(id).map(Sequenced::seq);
                if assign_seq(previous_seq, &mut next, self.next_seq) {
                    self.next_seq += 1;
                }
                self.records.insert(id.to_string(), next);
            }
            None => {
                self.records.remove(id);
            }
        }
        Ok(())
    }

    fn list(&self) -> Vec<T> {
        let mut all: Vec<T> = self.records.values().cloned().collect();
        all.sort_by_key(|r| r.seq());
        all
    }
}

/// Metadata store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    containers: Mutex<Table<ContainerRecord>>,
    sandboxes: Mutex<Table<SandboxRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryStore {
    fn save_container(&self, id: &str, mutator: ContainerMutator<'_>) -> Result<()> {
        self.containers.lock().save(id, mutator)
    }

    fn retrieve_container(&self, id: &str) -> Result<Option<ContainerRecord>> {
        Ok(self.containers.lock().records.get(id).cloned())
    }

    fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        Ok(self.containers.lock().list())
    }

    fn save_sandbox(&self, id: &str, mutator: SandboxMutator<'_>) -> Result<()> {
        self.sandboxes.lock().save(id, mutator)
    }

    fn retrieve_sandbox(&self, id: &str) -> Result<Option<SandboxRecord>> {
        Ok(self.sandboxes.lock().records.get(id).cloned())
    }

    fn list_sandboxes(&self) -> Result<Vec<SandboxRecord>> {
        Ok(self.sandboxes.lock().list())
    }
}
