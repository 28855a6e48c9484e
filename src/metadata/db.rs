//! redb-backed metadata store.
//!
//! Records are stored as JSON under their ID. A separate table holds the
//! per-kind insertion counter so list order survives restarts.

use super::{assign_seq, ContainerMutator, MetadataStore, SandboxMutator, Sequenced};
use crate::container::{ContainerRecord, SandboxRecord};
use crate::error::{Error, Result};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

const CONTAINERS: RecordTable = TableDefinition::new("containers");
const SANDBOXES: RecordTable = TableDefinition::new("sandboxes");
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

fn db_err(e: impl std::fmt::Display) -> Error {
    Error::metadata(e.to_string())
}

/// Persistent metadata store in a single redb file.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;

        let txn = db.begin_write().map_err(db_err)?;
        {
            txn.open_table(CONTAINERS).map_err(db_err)?;
            txn.open_table(SANDBOXES).map_err(db_err)?;
            txn.open_table(SEQUENCES).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;

        tracing::debug!(path = %path.display(), "opened metadata store");
        Ok(Self { db })
    }

    fn save<T>(
        &self,
        table: RecordTable,
        seq_key: &str,
        id: &str,
        mutator: &mut dyn FnMut(Option<T>) -> Result<Option<T>>,
    ) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Sequenced,
    {
        let txn = self.db.begin_write().map_err(db_err)?;
        match Self::save_in(&txn, table, seq_key, id, mutator) {
            Ok(()) => txn.commit().map_err(db_err),
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    tracing::warn!(error = %abort, "failed to abort metadata transaction");
                }
                Err(e)
            }
        }
    }

    fn save_in<T>(
        txn: &WriteTransaction,
        table: RecordTable,
        seq_key: &str,
        id: &str,
        mutator: &mut dyn FnMut(Option<T>) -> Result<Option<T>>,
    ) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Sequenced,
    {
        let mut records = txn.open_table(table).map_err(db_err)?;
        let current = match records.get(id).map_err(db_err)? {
            Some(guard) => Some(serde_json::from_slice::<T>(guard.value())?),
            None => None,
        };
        let previous_seq = current.as_ref().map(Sequenced::seq);

        match mutator(current)? {
            Some(mut next) => {
                let mut seqs = txn.open_table(SEQUENCES).map_err(db_err)?;
                let counter = seqs.get(seq_key).map_err(db_err)?.map(|g| g.value()).unwrap_or(1);
                if assign_seq(previous_seq, &mut next, counter) {
                    seqs.insert(seq_key, counter + 1).map_err(db_err)?;
                }
                let bytes = serde_json::to_vec(&next)?;
                records.insert(id, bytes.as_slice()).map_err(db_err)?;
            }
            None => {
                records.remove(id).map_err(db_err)?;
            }
        }
        Ok(())
    }

    fn retrieve<T: DeserializeOwned>(&self, table: RecordTable, id: &str) -> Result<Option<T>> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let records = txn.open_table(table).map_err(db_err)?;
        let value = match records.get(id).map_err(db_err)? {
            Some(guard) => Some(serde_json::from_slice(guard.value())?),
            None => None,
        };
        Ok(value)
    }

    fn list<T: DeserializeOwned + Sequenced>(&self, table: RecordTable) -> Result<Vec<T>> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let records = txn.open_table(table).map_err(db_err)?;
        let mut all = Vec::new();
        for entry in records.iter().map_err(db_err)? {
            let (_, value) = entry.map_err(db_err)?;
            all.push(serde_json::from_slice::<T>(value.value())?);
        }
        all.sort_by_key(|r| r.seq());
        Ok(all)
    }
}

impl MetadataStore for RedbStore {
    fn save_container(&self, id: &str, mutator: ContainerMutator<'_>) -> Result<()> {
        self.save(CONTAINERS, "containers", id, mutator)
    }

    fn retrieve_container(&self, id: &str) -> Result<Option<ContainerRecord>> {
        self.retrieve(CONTAINERS, id)
    }

    fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        self.list(CONTAINERS)
    }

    fn save_sandbox(&self, id: &str, mutator: SandboxMutator<'_>) -> Result<()> {
        self.save(SANDBOXES, "sandboxes", id, mutator)
    }

    fn retrieve_sandbox(&self, id: &str) -> Result<Option<SandboxRecord>> {
        self.retrieve(SANDBOXES, id)
    }

    fn list_sandboxes(&self) -> Result<Vec<SandboxRecord>> {
        self.list(SANDBOXES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::conformance;

    fn store() -> (tempfile::TempDir, RedbStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = RedbStore::open(&tmp.path().join("meta").join("metadata.redb")).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_insert_update_delete() {
        let (_tmp, store) = store();
        conformance::insert_update_delete(&store);
    }

    #[test]
    fn test_insertion_order() {
        let (_tmp, store) = store();
        conformance::insertion_order(&store);
    }

    #[test]
    fn test_failed_mutator_keeps_record() {
        let (_tmp, store) = store();
        conformance::failed_mutator_keeps_record(&store);
    }

    #[test]
    fn test_sandboxes() {
        let (_tmp, store) = store();
        conformance::sandboxes(&store);
    }

    #[test]
    fn test_order_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            for id in ["b", "a"] {
                let record = conformance::container(id);
                store.save_container(id, &mut |_| Ok(Some(record.clone()))).unwrap();
            }
        }

        let store = RedbStore::open(&path).unwrap();
        let record = conformance::container("c");
        store.save_container("c", &mut |_| Ok(Some(record.clone()))).unwrap();
        let ids: Vec<String> = store.list_containers().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
