//! Storage engine trait definition.
//!
//! This module defines [`SignedUrlStorage`], the contract every signed URL
//! backend implements. The engine only ever sees an already-validated
//! identifier; signing, URL formatting, and transport concerns live in the
//! layers above it.
//!
//! # Lifecycle per identifier
//!
//! ```text
//!            store                consume (n > 1, not expired)
//! ABSENT ──────────────► LIVE(n) ─────────────────────────────► LIVE(n - 1)
//!   ▲                       │
//!   │  consume (n == 1)     │
//!   ├───────────────────────┤
//!   │  gc (now > expires_at)│
//!   └───────────────────────┘
//! ```
//!
//! # Implementing a Backend
//!
//! 1. Implement [`SignedUrlStorage`]
//! 2. Make `consume` a single critical section per identifier
//! 3. Map backend-specific failures to [`StorageError`] variants other than `BadIdentifier`
//! 4. Run the [`conformance`](crate::conformance) suite against it
//!
//! See [`MemoryStorage`](crate::MemoryStorage) for a reference implementation.

use async_trait::async_trait;

use crate::{error::StorageResult, types::SignedUrlRecord};

#[cfg(doc)]
use crate::error::StorageError;

/// Keyed store of signed URL records.
///
/// Backends are shared between many concurrent callers and must be
/// `Send + Sync`.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`store`](SignedUrlStorage::store) | Persist a record, overwriting any record with the same identifier |
/// | [`consume`](SignedUrlStorage::consume) | Atomically spend one use of a record |
/// | [`gc`](SignedUrlStorage::gc) | Evict every expired record |
/// | [`len`](SignedUrlStorage::len) | Count physically stored records |
///
/// # Example
///
/// ```
/// use std::{num::NonZeroU32, sync::Arc};
/// use signurl_storage::{Clock, MemoryStorage, SignedUrlRecord, SignedUrlStorage, SystemClock};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let clock = Arc::new(SystemClock);
/// let storage = MemoryStorage::new(clock.clone());
///
/// let record = SignedUrlRecord::expiring_in("sig", "/foo", clock.now(), 60, NonZeroU32::MIN);
/// storage.store(record).await.unwrap();
///
/// storage.consume("sig").await.unwrap();
/// assert!(storage.consume("sig").await.unwrap_err().is_bad_identifier());
/// # });
/// ```
#[async_trait]
pub trait SignedUrlStorage: Send + Sync {
    /// Persists a record keyed by its identifier.
    ///
    /// An existing record with the same identifier is replaced. The record's
    /// target and expiry are not validated.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn store(&self, record: SignedUrlRecord) -> StorageResult<()>;

    /// Spends one use of the record stored under `identifier`.
    ///
    /// Checking expiry, checking the remaining usage, and decrementing (or
    /// removing the record when the last use is spent) happen as one atomic
    /// step. Of two concurrent calls racing for the last use, exactly one
    /// succeeds.
    ///
    /// # Errors
    ///
    /// - [`StorageError::BadIdentifier`] if no record exists for `identifier`,
    ///   it has expired, or its usage is exhausted.
    /// - Any other variant signals a backend fault.
    #[must_use = "a failed consume means access must be denied"]
    async fn consume(&self, identifier: &str) -> StorageResult<()>;

    /// Removes every record whose expiry is strictly before the current
    /// instant.
    ///
    /// Never removes a live record and is safe to run concurrently with
    /// `store` and `consume`. Calling it repeatedly has the same effect as
    /// calling it once.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn gc(&self) -> StorageResult<()>;

    /// Returns the number of physically stored records.
    ///
    /// Expired records that have not been collected yet are included.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn len(&self) -> StorageResult<usize>;

    /// Returns `true` when no records are stored.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len().await? == 0)
    }
}
