//! # Storage
//!
//! The ordered key-value contract the concept model is written against, and
//! two implementations of it:
//! - `MemoryStorage`: a `BTreeMap`, for in-memory sessions and tests
//! - `RedbStorage`: a redb database with a transaction-scoped write overlay
//!
//! Writes are either tracked (recorded in [`Storage::modified_keys`]) or
//! untracked. Untracked writes are for bookkeeping such as instance counters
//! and are never reported as modifications.

pub mod memory;
pub mod redb_storage;

pub use memory::MemoryStorage;
pub use redb_storage::RedbStorage;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::primitives::FIRST_CONCEPT_ID;
use crate::types::QuarryError;

/// Whether a transaction may change the schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Schema,
    #[default]
    Data,
}

/// Per-transaction storage options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    pub kind: TransactionKind,
}

impl TransactionOptions {
    #[must_use]
    pub fn schema() -> Self {
        Self {
            kind: TransactionKind::Schema,
        }
    }

    #[must_use]
    pub fn data() -> Self {
        Self {
            kind: TransactionKind::Data,
        }
    }
}

/// Monotonic source of concept ids, shared by reference.
#[derive(Debug)]
pub struct KeyGenerator {
    next: AtomicU64,
}

impl KeyGenerator {
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Hand out the next id.
    pub fn next_key(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call to [`Self::next_key`] returns.
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::starting_at(FIRST_CONCEPT_ID)
    }
}

/// Ordered byte-keyed storage with transaction-scoped buffering.
pub trait Storage {
    fn options(&self) -> &TransactionOptions;

    fn set_options(&mut self, options: TransactionOptions);

    fn is_open(&self) -> bool;

    fn key_generator(&self) -> &KeyGenerator;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, QuarryError>;

    /// The greatest key starting with `prefix`.
    fn get_last_key(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>, QuarryError>;

    fn delete(&mut self, key: &[u8]) -> Result<(), QuarryError>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), QuarryError>;

    /// Write without recording the key as modified.
    fn put_untracked(&mut self, key: &[u8], value: &[u8]) -> Result<(), QuarryError>;

    /// Add `delta` to the big-endian `i64` stored at `key` (absent is zero).
    fn merge_untracked(&mut self, key: &[u8], delta: i64) -> Result<(), QuarryError>;

    /// Decode every entry under `prefix`, in key order. Entries the decoder
    /// rejects are skipped.
    fn iterate<T, F>(&self, prefix: &[u8], decoder: F) -> Result<Vec<T>, QuarryError>
    where
        F: FnMut(&[u8], &[u8]) -> Option<T>;

    /// Keys written or deleted through tracked operations since the last commit.
    fn modified_keys(&self) -> Vec<Vec<u8>>;

    fn commit(&mut self) -> Result<(), QuarryError>;

    fn close(&mut self);
}

/// `prefix ++ rest`.
#[must_use]
pub fn prefixed(prefix: u8, rest: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(rest.len().saturating_add(1));
    key.push(prefix);
    key.extend_from_slice(rest);
    key
}

/// Decode a counter written by `merge_untracked`.
pub(crate) fn decode_counter(bytes: &[u8]) -> i64 {
    match <[u8; 8]>::try_from(bytes) {
        Ok(raw) => i64::from_be_bytes(raw),
        Err(_) => {
            tracing::warn!(len = bytes.len(), "malformed counter value, treating as zero");
            0
        }
    }
}

/// Apply `delta` to an optional stored counter.
pub(crate) fn merged_counter(current: Option<&[u8]>, delta: i64) -> [u8; 8] {
    let value = current.map(decode_counter).unwrap_or(0);
    value.saturating_add(delta).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_generator_is_monotonic() {
        let keys = KeyGenerator::starting_at(10);
        assert_eq!(keys.next_key(), 10);
        assert_eq!(keys.next_key(), 11);
        assert_eq!(keys.peek(), 12);
    }

    #[test]
    fn counters_merge() {
        let first = merged_counter(None, 3);
        let second = merged_counter(Some(&first), -1);
        assert_eq!(decode_counter(&second), 2);
        assert_eq!(decode_counter(b"bad"), 0);
    }

    #[test]
    fn options_serialize_lowercase() {
        let options = TransactionOptions::schema();
        let bytes = postcard::to_allocvec(&options).expect("encode");
        let back: TransactionOptions = postcard::from_bytes(&bytes).expect("decode");
        assert_eq!(back, options);
        assert_eq!(TransactionOptions::default().kind, TransactionKind::Data);
    }
}
