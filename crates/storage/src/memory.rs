//! In-memory storage backend implementation.
//!
//! This module provides [`MemoryStorage`], the reference implementation of
//! [`SignedUrlStorage`].
//!
//! # Features
//!
//! - **Sharded locking**: Records live in a [`DashMap`], so operations on
//!   identifiers in different shards never contend
//! - **Atomic consume**: Expiry check, usage check, and decrement-or-remove run
//!   under a single shard write lock
//! - **Per-record gc**: Sweeps lock one shard at a time
//!
//! # Example
//!
//! ```
//! use std::{num::NonZeroU32, sync::Arc};
//! use signurl_storage::{Clock, MemoryStorage, SignedUrlRecord, SignedUrlStorage, TestClock};
//!
//! #[tokio::main]
//! async fn main() {
//!     let clock = Arc::new(TestClock::new());
//!     let storage = MemoryStorage::new(clock.clone());
//!
//!     let record = SignedUrlRecord::expiring_in("sig", "/foo", clock.now(), 10, NonZeroU32::MIN);
//!     storage.store(record).await.unwrap();
//!     storage.consume("sig").await.unwrap();
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all records are lost when the process exits
//! - Expired records occupy memory until [`gc`](SignedUrlStorage::gc) runs

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::debug;

use crate::{
    backend::SignedUrlStorage,
    clock::Clock,
    config::StorageConfig,
    error::{ConfigError, StorageError, StorageResult},
    types::SignedUrlRecord,
};

/// In-memory signed URL storage.
///
/// # Cloning
///
/// `MemoryStorage` is cheaply cloneable via [`Arc`]. All clones share the
/// same records and clock.
#[derive(Clone)]
pub struct MemoryStorage {
    records: Arc<DashMap<String, SignedUrlRecord>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").field("records", &self.records.len()).finish_non_exhaustive()
    }
}

impl MemoryStorage {
    /// Creates an empty storage reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { records: Arc::new(DashMap::new()), clock }
    }

    /// Creates an empty storage with the shard count from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn with_config(clock: Arc<dyn Clock>, config: &StorageConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { records: Arc::new(DashMap::with_shard_amount(config.shard_amount)), clock })
    }
}

#[async_trait]
impl SignedUrlStorage for MemoryStorage {
    #[tracing::instrument(skip(self, record), fields(identifier = %record.identifier()))]
    async fn store(&self, record: SignedUrlRecord) -> StorageResult<()> {
        self.records.insert(record.identifier().to_owned(), record);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn consume(&self, identifier: &str) -> StorageResult<()> {
        let now = self.clock.now();

        // The entry holds the shard write lock until it is dropped.
        match self.records.entry(identifier.to_owned()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_usable(now) {
                    entry.remove();
                    debug!("rejected expired or exhausted identifier");
                    return Err(StorageError::bad_identifier(identifier));
                }
                if entry.get_mut().decrement() == 0 {
                    entry.remove();
                }
                Ok(())
            },
            Entry::Vacant(_) => {
                debug!("rejected unknown identifier");
                Err(StorageError::bad_identifier(identifier))
            },
        }
    }

    #[tracing::instrument(skip(self))]
    async fn gc(&self) -> StorageResult<()> {
        let now = self.clock.now();
        let mut evicted = 0usize;
        self.records.retain(|_, record| {
            let live = !record.is_expired(now);
            if !live {
                evicted += 1;
            }
            live
        });
        debug!(evicted, "garbage collection finished");
        Ok(())
    }

    async fn len(&self) -> StorageResult<usize> {
        Ok(self.records.len())
    }
}
