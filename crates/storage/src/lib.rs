//! Storage for signed URLs with a bounded lifetime and a bounded number of uses.
//!
//! An issuer signs a URL and records it with [`SignedUrlStorage::store`]. Each
//! time the URL is presented, the verifier calls
//! [`SignedUrlStorage::consume`], which succeeds only while the record is
//! unexpired and has uses left. [`SignedUrlStorage::gc`] evicts expired
//! records.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Issuer / Verifier                           │
//! │       (signs URLs, checks signatures, calls consume)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 signurl-storage                             │
//! │              SignedUrlStorage trait                         │
//! │                (store, consume, gc)                         │
//! ├──────────────┬──────────────┬───────────────────────────────┤
//! │ MemoryStorage│  FileStorage │  GarbageCollector / GcTask    │
//! │  (sharded)   │ (JSON file)  │   (sweep scheduling)          │
//! └──────────────┴──────────────┴───────────────────────────────┘
//!                         ▲
//!                       Clock
//!               (SystemClock / TestClock)
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::{num::NonZeroU32, sync::Arc};
//! use signurl_storage::{Clock, MemoryStorage, SignedUrlRecord, SignedUrlStorage, SystemClock};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let clock = Arc::new(SystemClock);
//!     let storage = MemoryStorage::new(clock.clone());
//!
//!     let uses = NonZeroU32::new(2).ok_or("zero uses")?;
//!     let record = SignedUrlRecord::expiring_in(
//!         "3f2a9c",
//!         "/download/report.pdf?signature=3f2a9c",
//!         clock.now(),
//!         600,
//!         uses,
//!     );
//!     storage.store(record).await?;
//!
//!     storage.consume("3f2a9c").await?;
//!     storage.consume("3f2a9c").await?;
//!     assert!(storage.consume("3f2a9c").await.is_err());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Available Backends
//!
//! | Backend | Use Case | Persistence |
//! |---------|----------|-------------|
//! | [`MemoryStorage`] | Single process, tests | No |
//! | [`FileStorage`] | Small deployments | Yes (JSON snapshot) |
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`SignedUrlStorage`] trait
//! 2. Read time only through the injected [`Clock`]
//! 3. Map backend-specific errors to [`StorageError`], reserving
//!    [`StorageError::BadIdentifier`] for rejected consumes
//! 4. Run the [`conformance`] suite against it
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (record builders, assertion macros) and the
//!   `conformance` suite. Enable this in `[dev-dependencies]` for integration tests.
//! - **`failpoints`**: Activates fail points in [`FileStorage`] for fault injection tests.

#![deny(unsafe_code)]

pub mod backend;
pub mod clock;
pub mod config;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod file;
pub mod gc;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use backend::SignedUrlStorage;
pub use clock::{Clock, SystemClock, TestClock};
pub use config::{
    DEFAULT_GC_INTERVAL, DEFAULT_GC_PERCENTAGE, DEFAULT_SHARD_AMOUNT, GcConfig, MIN_GC_INTERVAL,
    StorageConfig,
};
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use file::FileStorage;
pub use gc::{GarbageCollector, GcTask};
pub use memory::MemoryStorage;
pub use types::SignedUrlRecord;
