//! Shared test utilities for signed URL storage backends.
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! signurl-storage = { version = "0.1", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use signurl_storage::testutil::{make_identifier, signed_url};
//! ```

use std::num::NonZeroU32;

use crate::{
    SignedUrlStorage,
    clock::{Clock, TestClock},
    error::{StorageError, StorageResult},
    memory::MemoryStorage,
    types::SignedUrlRecord,
};

/// Create a deterministic identifier from a prefix and index.
///
/// Produces identifiers like `"prefix_000042"`.
#[must_use]
pub fn make_identifier(prefix: &str, idx: usize) -> String {
    format!("{prefix}_{idx:06}")
}

/// Build a record expiring `expires_in` seconds after `clock`'s current instant.
///
/// # Panics
///
/// Panics if `max_usage` is zero.
#[must_use]
pub fn signed_url(
    clock: &TestClock,
    target: &str,
    identifier: &str,
    expires_in: u32,
    max_usage: u32,
) -> SignedUrlRecord {
    let max_usage = NonZeroU32::new(max_usage).expect("max_usage must be positive");
    SignedUrlRecord::expiring_in(identifier, target, clock.now(), expires_in, max_usage)
}

/// Create a [`MemoryStorage`] holding `count` records named
/// `"{prefix}_{idx:06}"`, each with `max_usage` uses and `expires_in` seconds
/// of lifetime.
///
/// # Panics
///
/// Panics if any `store` fails (should not happen with `MemoryStorage`).
pub async fn populated_storage(
    clock: std::sync::Arc<TestClock>,
    prefix: &str,
    count: usize,
    expires_in: u32,
    max_usage: u32,
) -> MemoryStorage {
    let storage = MemoryStorage::new(clock.clone());
    for i in 0..count {
        let id = make_identifier(prefix, i);
        storage
            .store(signed_url(&clock, &format!("/{id}"), &id, expires_in, max_usage))
            .await
            .expect("populate store failed");
    }
    storage
}

/// Assert that a [`StorageResult`] is a [`StorageError::BadIdentifier`] whose
/// message starts with `The identifier [<identifier>] does not exist`.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use signurl_storage::{StorageError, StorageResult, assert_bad_identifier};
///
/// let result: StorageResult<()> = Err(StorageError::bad_identifier("abc"));
/// assert_bad_identifier!(result, "abc");
/// ```
#[macro_export]
macro_rules! assert_bad_identifier {
    ($result:expr, $identifier:expr) => {
        $crate::assert_bad_identifier!($result, $identifier, "consume")
    };
    ($result:expr, $identifier:expr, $msg:expr) => {
        match &$result {
            Err(err @ $crate::error::StorageError::BadIdentifier { .. }) => {
                let expected = format!("The identifier [{}] does not exist", $identifier);
                let message = err.to_string();
                assert!(
                    message.starts_with(&expected),
                    "{}: message {message:?} should start with {expected:?}",
                    $msg,
                );
            },
            other => panic!("{}: expected StorageError::BadIdentifier, got: {other:?}", $msg),
        }
    };
}

/// Assert that a [`StorageResult`] is `Ok`, returning the inner value.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Helper to check whether a result is a `BadIdentifier` error.
pub fn is_bad_identifier<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::BadIdentifier { .. }))
}
