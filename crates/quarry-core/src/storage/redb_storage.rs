//! # redb-backed Storage
//!
//! A disk-backed [`Storage`] using the redb embedded database.
//!
//! Writes go to an in-memory overlay and reach the database only on
//! `commit`, in a single write transaction. Reads merge the overlay over the
//! last committed state, so a transaction sees its own writes.
//!
//! On open, the key generator is seeded past the greatest concept key already
//! in the database.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::{KeyGenerator, Storage, TransactionOptions, merged_counter};
use crate::primitives::{CONCEPT_PREFIX, FIRST_CONCEPT_ID};
use crate::types::QuarryError;

/// Every key lives in one ordered table: prefix byte ++ payload -> bytes.
const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

fn io(e: impl std::fmt::Display) -> QuarryError {
    QuarryError::IoError(e.to_string())
}

pub struct RedbStorage {
    db: Database,
    options: TransactionOptions,
    /// Pending writes; `None` marks a deletion.
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    modified: BTreeSet<Vec<u8>>,
    keys: KeyGenerator,
    closed: bool,
}

impl std::fmt::Debug for RedbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStorage")
            .field("options", &self.options)
            .field("pending_writes", &self.overlay.len())
            .field("next_key", &self.keys.peek())
            .finish_non_exhaustive()
    }
}

impl RedbStorage {
    /// Open or create a database at `path`.
    pub fn open(path: impl AsRef<Path>, options: TransactionOptions) -> Result<Self, QuarryError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        {
            let write_txn = db.begin_write().map_err(io)?;
            let _ = write_txn.open_table(ENTRIES).map_err(io)?;
            write_txn.commit().map_err(io)?;
        }

        let mut storage = Self {
            db,
            options,
            overlay: BTreeMap::new(),
            modified: BTreeSet::new(),
            keys: KeyGenerator::default(),
            closed: false,
        };

        let next = match storage.get_last_key(&[CONCEPT_PREFIX])? {
            Some(key) => decode_id(&key[1..]).saturating_add(1),
            None => FIRST_CONCEPT_ID,
        };
        storage.keys = KeyGenerator::starting_at(next);
        tracing::debug!(next_key = next, "opened redb storage");
        Ok(storage)
    }

    /// Drop pending writes.
    pub fn rollback(&mut self) {
        self.overlay.clear();
        self.modified.clear();
    }

    fn ensure_open(&self) -> Result<(), QuarryError> {
        if self.closed {
            return Err(QuarryError::StorageClosed);
        }
        Ok(())
    }

    /// Committed entries under `prefix`.
    fn committed_range(&self, prefix: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, QuarryError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(ENTRIES).map_err(io)?;

        let mut entries = BTreeMap::new();
        for entry in table.range(prefix..).map_err(io)? {
            let (key, value) = entry.map_err(io)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            entries.insert(key.value().to_vec(), value.value().to_vec());
        }
        Ok(entries)
    }

    /// Committed entries under `prefix` with the overlay applied.
    fn merged_range(&self, prefix: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, QuarryError> {
        let mut entries = self.committed_range(prefix)?;
        for (key, value) in self
            .overlay
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(v) => {
                    entries.insert(key.clone(), v.clone());
                }
                None => {
                    entries.remove(key);
                }
            }
        }
        Ok(entries)
    }
}

/// Concept ids are stored big-endian after the prefix byte.
fn decode_id(bytes: &[u8]) -> u64 {
    match <[u8; 8]>::try_from(bytes) {
        Ok(raw) => u64::from_be_bytes(raw),
        Err(_) => {
            tracing::warn!(len = bytes.len(), "malformed concept key, ignoring");
            0
        }
    }
}

impl Storage for RedbStorage {
    fn options(&self) -> &TransactionOptions {
        &self.options
    }

    fn set_options(&mut self, options: TransactionOptions) {
        self.options = options;
    }

    fn is_open(&self) -> bool {
        !self.closed
    }

    fn key_generator(&self) -> &KeyGenerator {
        &self.keys
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, QuarryError> {
        self.ensure_open()?;
        if let Some(pending) = self.overlay.get(key) {
            return Ok(pending.clone());
        }
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(ENTRIES).map_err(io)?;
        Ok(table.get(key).map_err(io)?.map(|v| v.value().to_vec()))
    }

    fn get_last_key(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>, QuarryError> {
        self.ensure_open()?;
        Ok(self.merged_range(prefix)?.into_keys().next_back())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), QuarryError> {
        self.ensure_open()?;
        self.overlay.insert(key.to_vec(), None);
        self.modified.insert(key.to_vec());
        Ok(())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), QuarryError> {
        self.put_untracked(key, value)?;
        self.modified.insert(key.to_vec());
        Ok(())
    }

    fn put_untracked(&mut self, key: &[u8], value: &[u8]) -> Result<(), QuarryError> {
        self.ensure_open()?;
        self.overlay.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn merge_untracked(&mut self, key: &[u8], delta: i64) -> Result<(), QuarryError> {
        let current = self.get(key)?;
        let merged = merged_counter(current.as_deref(), delta);
        self.overlay.insert(key.to_vec(), Some(merged.to_vec()));
        Ok(())
    }

    fn iterate<T, F>(&self, prefix: &[u8], mut decoder: F) -> Result<Vec<T>, QuarryError>
    where
        F: FnMut(&[u8], &[u8]) -> Option<T>,
    {
        self.ensure_open()?;
        Ok(self
            .merged_range(prefix)?
            .iter()
            .filter_map(|(k, v)| decoder(k, v))
            .collect())
    }

    fn modified_keys(&self) -> Vec<Vec<u8>> {
        self.modified.iter().cloned().collect()
    }

    fn commit(&mut self) -> Result<(), QuarryError> {
        self.ensure_open()?;
        let write_txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = write_txn.open_table(ENTRIES).map_err(io)?;
            for (key, value) in &self.overlay {
                match value {
                    Some(v) => {
                        table.insert(key.as_slice(), v.as_slice()).map_err(io)?;
                    }
                    None => {
                        table.remove(key.as_slice()).map_err(io)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(io)?;
        tracing::debug!(
            writes = self.overlay.len(),
            tracked = self.modified.len(),
            "committed redb transaction"
        );
        self.overlay.clear();
        self.modified.clear();
        Ok(())
    }

    fn close(&mut self) {
        if !self.overlay.is_empty() {
            tracing::warn!(
                pending = self.overlay.len(),
                "closing redb storage with uncommitted writes"
            );
        }
        self.rollback();
        self.closed = true;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn concept_key(id: u64) -> Vec<u8> {
        let mut key = vec![CONCEPT_PREFIX];
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    #[test]
    fn reads_see_pending_writes() {
        let temp = tempdir().expect("temp dir");
        let mut storage =
            RedbStorage::open(temp.path().join("q.redb"), TransactionOptions::data())
                .expect("open");
        storage.put(b"k", b"v").expect("put");
        assert_eq!(storage.get(b"k").expect("get"), Some(b"v".to_vec()));
        storage.delete(b"k").expect("delete");
        assert_eq!(storage.get(b"k").expect("get"), None);
    }

    #[test]
    fn rollback_discards_pending_writes() {
        let temp = tempdir().expect("temp dir");
        let mut storage =
            RedbStorage::open(temp.path().join("q.redb"), TransactionOptions::data())
                .expect("open");
        storage.put(b"k", b"v").expect("put");
        storage.rollback();
        assert_eq!(storage.get(b"k").expect("get"), None);
        assert!(storage.modified_keys().is_empty());
    }

    #[test]
    fn commit_persists_across_reopen() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("q.redb");

        {
            let mut storage = RedbStorage::open(&path, TransactionOptions::data()).expect("open");
            storage.put(b"k", b"v").expect("put");
            storage.merge_untracked(b"n", 4).expect("merge");
            storage.commit().expect("commit");
        }

        let storage = RedbStorage::open(&path, TransactionOptions::data()).expect("reopen");
        assert_eq!(storage.get(b"k").expect("get"), Some(b"v".to_vec()));
        let raw = storage.get(b"n").expect("get").expect("counter");
        assert_eq!(crate::storage::decode_counter(&raw), 4);
    }

    #[test]
    fn key_generator_resumes_after_last_concept() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("q.redb");

        {
            let mut storage = RedbStorage::open(&path, TransactionOptions::data()).expect("open");
            assert_eq!(storage.key_generator().peek(), FIRST_CONCEPT_ID);
            storage.put(&concept_key(41), b"").expect("put");
            storage.commit().expect("commit");
        }

        let storage = RedbStorage::open(&path, TransactionOptions::data()).expect("reopen");
        assert_eq!(storage.key_generator().next_key(), 42);
    }

    #[test]
    fn iterate_merges_overlay() {
        let temp = tempdir().expect("temp dir");
        let mut storage =
            RedbStorage::open(temp.path().join("q.redb"), TransactionOptions::data())
                .expect("open");
        storage.put(&[7, 1], &[1]).expect("put");
        storage.put(&[7, 2], &[2]).expect("put");
        storage.commit().expect("commit");

        storage.delete(&[7, 1]).expect("delete");
        storage.put(&[7, 3], &[3]).expect("put");
        let values = storage
            .iterate(&[7], |_, v| v.first().copied())
            .expect("iterate");
        assert_eq!(values, vec![2, 3]);
        assert_eq!(storage.get_last_key(&[7]).expect("last"), Some(vec![7, 3]));
    }

    #[test]
    fn closed_storage_rejects_reads() {
        let temp = tempdir().expect("temp dir");
        let mut storage =
            RedbStorage::open(temp.path().join("q.redb"), TransactionOptions::data())
                .expect("open");
        storage.close();
        assert_eq!(storage.get(b"k"), Err(QuarryError::StorageClosed));
    }
}
