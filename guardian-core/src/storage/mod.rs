//! Named-record storage backing the persisted [`crate::GuardianConfig`].
//!
//! The secret-store host gives a plugin a small private key/value area; this is
//! the contract Guardian needs from it. Records are opaque bytes, JSON in
//! practice.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use crate::error::{GuardianError, GuardianResult};

mod file;

pub use file::FileRecordStorage;

/// Read/write access to named records.
///
/// Writes replace the whole record. Concurrent writers are last-writer-wins;
/// no version check is performed.
pub trait RecordStorage: Send + Sync {
    /// Reads the record `name`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the record exists
    /// - `Ok(None)` if it does not
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Storage`] if the read fails.
    fn get(&self, name: &str) -> GuardianResult<Option<Vec<u8>>>;

    /// Writes the record `name`, replacing any existing content.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Storage`] if the write fails.
    fn put(&self, name: &str, bytes: &[u8]) -> GuardianResult<()>;
}

/// Process-local record storage. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryRecordStorage {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryRecordStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStorage for MemoryRecordStorage {
    fn get(&self, name: &str) -> GuardianResult<Option<Vec<u8>>> {
        let records = self.records.lock().map_err(poisoned)?;
        Ok(records.get(name).cloned())
    }

    fn put(&self, name: &str, bytes: &[u8]) -> GuardianResult<()> {
        self.records
            .lock()
            .map_err(poisoned)?
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}

fn poisoned<T>(_: PoisonError<T>) -> GuardianError {
    GuardianError::Storage("record storage lock poisoned".to_string())
}
