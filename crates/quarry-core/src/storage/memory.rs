//! # In-Memory Storage
//!
//! A `BTreeMap`-backed [`Storage`]. Writes apply immediately; `commit` only
//! clears the set of tracked keys.

use std::collections::{BTreeMap, BTreeSet};

use super::{KeyGenerator, Storage, TransactionOptions, merged_counter};
use crate::types::QuarryError;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    options: TransactionOptions,
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    modified: BTreeSet<Vec<u8>>,
    keys: KeyGenerator,
    closed: bool,
}

impl MemoryStorage {
    #[must_use]
    pub fn new(options: TransactionOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn ensure_open(&self) -> Result<(), QuarryError> {
        if self.closed {
            return Err(QuarryError::StorageClosed);
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
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
        Ok(self.data.get(key).cloned())
    }

    fn get_last_key(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>, QuarryError> {
        self.ensure_open()?;
        Ok(self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .last()
            .map(|(k, _)| k.clone()))
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), QuarryError> {
        self.ensure_open()?;
        self.data.remove(key);
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
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn merge_untracked(&mut self, key: &[u8], delta: i64) -> Result<(), QuarryError> {
        self.ensure_open()?;
        let merged = merged_counter(self.data.get(key).map(Vec::as_slice), delta);
        self.data.insert(key.to_vec(), merged.to_vec());
        Ok(())
    }

    fn iterate<T, F>(&self, prefix: &[u8], mut decoder: F) -> Result<Vec<T>, QuarryError>
    where
        F: FnMut(&[u8], &[u8]) -> Option<T>,
    {
        self.ensure_open()?;
        Ok(self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter_map(|(k, v)| decoder(k, v))
            .collect())
    }

    fn modified_keys(&self) -> Vec<Vec<u8>> {
        self.modified.iter().cloned().collect()
    }

    fn commit(&mut self) -> Result<(), QuarryError> {
        self.ensure_open()?;
        self.modified.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::decode_counter;

    #[test]
    fn tracked_and_untracked_writes() {
        let mut storage = MemoryStorage::default();
        storage.put(b"a", b"1").expect("put");
        storage.put_untracked(b"b", b"2").expect("put");
        assert_eq!(storage.modified_keys(), vec![b"a".to_vec()]);
        assert_eq!(storage.get(b"b").expect("get"), Some(b"2".to_vec()));

        storage.commit().expect("commit");
        assert!(storage.modified_keys().is_empty());
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn last_key_respects_prefix() {
        let mut storage = MemoryStorage::default();
        storage.put(&[1, 5], b"").expect("put");
        storage.put(&[1, 9], b"").expect("put");
        storage.put(&[2, 0], b"").expect("put");
        assert_eq!(storage.get_last_key(&[1]).expect("last"), Some(vec![1, 9]));
        assert_eq!(storage.get_last_key(&[3]).expect("last"), None);
    }

    #[test]
    fn iterate_decodes_in_order() {
        let mut storage = MemoryStorage::default();
        storage.put(&[1, 2], &[20]).expect("put");
        storage.put(&[1, 1], &[10]).expect("put");
        storage.put(&[1, 3], &[]).expect("put");
        let values = storage
            .iterate(&[1], |_, v| v.first().copied())
            .expect("iterate");
        assert_eq!(values, vec![10, 20]);
    }

    #[test]
    fn merge_accumulates() {
        let mut storage = MemoryStorage::default();
        storage.merge_untracked(b"n", 2).expect("merge");
        storage.merge_untracked(b"n", 3).expect("merge");
        let raw = storage.get(b"n").expect("get").expect("present");
        assert_eq!(decode_counter(&raw), 5);
        assert!(storage.modified_keys().is_empty());
    }

    #[test]
    fn closed_storage_rejects_operations() {
        let mut storage = MemoryStorage::default();
        storage.close();
        assert!(!storage.is_open());
        assert_eq!(storage.get(b"a"), Err(QuarryError::StorageClosed));
        assert_eq!(storage.put(b"a", b"1"), Err(QuarryError::StorageClosed));
    }
}
