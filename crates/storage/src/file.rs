//! File-backed storage backend implementation.
//!
//! [`FileStorage`] keeps the live record set in memory and writes a full JSON
//! snapshot to disk on every mutation. A mutation only becomes visible after
//! its snapshot has been written to `<path>.tmp`, synced, and renamed over
//! `<path>`, so a crash never leaves a half-written file behind.
//!
//! # Snapshot format
//!
//! ```json
//! {
//!   "version": 1,
//!   "records": {
//!     "foo_signature": {
//!       "identifier": "foo_signature",
//!       "target": "/foo?signature=foo_signature",
//!       "expires_at": "2025-01-01T00:00:10Z",
//!       "remaining_usage": 3
//!     }
//!   }
//! }
//! ```
//!
//! # Limitations
//!
//! - All operations serialize through one lock; this backend trades throughput
//!   for durability and suits small deployments
//! - Each mutation rewrites the whole snapshot, O(n) in the number of records
//! - Only one process may own a snapshot file at a time
//! - Snapshots are validated on open: every record must sit under its own
//!   identifier and have at least one use left

use std::{
    collections::BTreeMap,
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use fail::fail_point;
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{Instrument, debug};

use crate::{
    backend::SignedUrlStorage,
    clock::Clock,
    error::{StorageError, StorageResult},
    types::SignedUrlRecord,
};

const SNAPSHOT_VERSION: u32 = 1;

type Records = BTreeMap<String, SignedUrlRecord>;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    records: &'a Records,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Snapshot {
    version: u32,
    records: Records,
}

/// Signed URL storage persisted to a single JSON file.
///
/// # Cancellation
///
/// Mutations run on a spawned task. Once `store`, `consume` or `gc` has been
/// polled, dropping its future does not stop it: the mutation lands on disk
/// and in memory together, or on neither.
pub struct FileStorage {
    shared: Arc<Shared>,
}

struct Shared {
    path: PathBuf,
    records: Mutex<Records>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage").field("path", &self.shared.path).finish_non_exhaustive()
    }
}

impl FileStorage {
    /// Opens the snapshot at `path`, starting empty if it does not exist.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Io`] if the directory or file cannot be accessed
    /// - [`StorageError::Serialization`] if the file holds an unreadable,
    ///   unsupported, or inconsistent snapshot
    pub async fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> StorageResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::io_with_source(format!("create directory {}", parent.display()), e)
            })?;
        }

        let records = match fs::read(&path).await {
            Ok(bytes) => decode(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Records::new(),
            Err(e) => {
                return Err(StorageError::io_with_source(
                    format!("read snapshot {}", path.display()),
                    e,
                ));
            },
        };
        debug!(path = %path.display(), records = records.len(), "opened snapshot");

        Ok(Self { shared: Arc::new(Shared { path, records: Mutex::new(records), clock }) })
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Runs `op` against the shared state on its own task and waits for it.
    async fn detached<T, F, Fut>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Shared>) -> Fut,
        Fut: Future<Output = StorageResult<T>> + Send + 'static,
    {
        let task = op(Arc::clone(&self.shared)).in_current_span();
        tokio::spawn(task)
            .await
            .map_err(|e| StorageError::internal_with_source("file storage task failed", e))?
    }
}

impl Shared {
    async fn store(&self, record: SignedUrlRecord) -> StorageResult<()> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        next.insert(record.identifier().to_owned(), record);
        self.commit(&mut records, next).await
    }

    async fn consume(&self, identifier: &str) -> StorageResult<()> {
        let mut records = self.records.lock().await;
        let now = self.clock.now();

        let usable = records.get(identifier).is_some_and(|record| record.is_usable(now));
        if !usable {
            debug!("rejected identifier");
            return Err(StorageError::bad_identifier(identifier));
        }

        let mut next = records.clone();
        let exhausted = next.get_mut(identifier).is_some_and(|record| record.decrement() == 0);
        if exhausted {
            next.remove(identifier);
        }
        self.commit(&mut records, next).await
    }

    async fn gc(&self) -> StorageResult<()> {
        let mut records = self.records.lock().await;
        let now = self.clock.now();

        let next: Records = records
            .iter()
            .filter(|(_, record)| !record.is_expired(now))
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();

        let evicted = records.len() - next.len();
        if evicted > 0 {
            self.commit(&mut records, next).await?;
        }
        debug!(evicted, "garbage collection finished");
        Ok(())
    }

    /// Writes `next` to `<path>.tmp`, syncs it, renames it over `<path>`,
    /// and only then makes it the visible state.
    async fn commit(&self, records: &mut Records, next: Records) -> StorageResult<()> {
        fail_point!("file-storage-before-persist", |_| {
            Err(StorageError::internal("injected failure before snapshot persist"))
        });

        let bytes = serde_json::to_vec(&SnapshotRef { version: SNAPSHOT_VERSION, records: &next })
            .map_err(|e| StorageError::serialization_with_source("encode snapshot", e))?;

        let tmp = tmp_path(&self.path);
        let io_err = |what: &str, e: std::io::Error| {
            StorageError::io_with_source(format!("{what} {}", tmp.display()), e)
        };

        let mut file = fs::File::create(&tmp).await.map_err(|e| io_err("create", e))?;
        file.write_all(&bytes).await.map_err(|e| io_err("write", e))?;
        file.sync_all().await.map_err(|e| io_err("sync", e))?;
        drop(file);

        fs::rename(&tmp, &self.path).await.map_err(|e| {
            StorageError::io_with_source(format!("replace snapshot {}", self.path.display()), e)
        })?;
        *records = next;
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> StorageResult<Records> {
    let snapshot: Snapshot = serde_json::from_slice(bytes)
        .map_err(|e| StorageError::serialization_with_source("decode snapshot", e))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StorageError::serialization(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }
    for (key, record) in &snapshot.records {
        if key != record.identifier() {
            return Err(StorageError::serialization(format!(
                "snapshot key {key:?} holds record for identifier {:?}",
                record.identifier()
            )));
        }
        if record.remaining_usage() == 0 {
            return Err(StorageError::serialization(format!(
                "snapshot key {key:?} holds a record with no remaining usage"
            )));
        }
    }
    Ok(snapshot.records)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[async_trait]
impl SignedUrlStorage for FileStorage {
    #[tracing::instrument(skip(self, record), fields(identifier = %record.identifier()))]
    async fn store(&self, record: SignedUrlRecord) -> StorageResult<()> {
        self.detached(|shared| async move { shared.store(record).await }).await
    }

    #[tracing::instrument(skip(self))]
    async fn consume(&self, identifier: &str) -> StorageResult<()> {
        let identifier = identifier.to_owned();
        self.detached(|shared| async move { shared.consume(&identifier).await }).await
    }

    #[tracing::instrument(skip(self))]
    async fn gc(&self) -> StorageResult<()> {
        self.detached(|shared| async move { shared.gc().await }).await
    }

    async fn len(&self) -> StorageResult<usize> {
        Ok(self.shared.records.lock().await.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{num::NonZeroU32, time::Duration};

    use tempfile::TempDir;

    use super::*;
    use crate::clock::TestClock;

    fn uses(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).expect("non-zero")
    }

    #[tokio::test]
    async fn test_open_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let storage =
            FileStorage::open(dir.path().join("nested/urls.json"), Arc::new(TestClock::new()))
                .await
                .unwrap();
        assert!(storage.is_empty().await.unwrap());
        assert!(dir.path().join("nested").is_dir(), "parent directory should be created");
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.json");
        let clock = Arc::new(TestClock::new());

        {
            let storage = FileStorage::open(&path, clock.clone()).await.unwrap();
            storage
                .store(SignedUrlRecord::expiring_in("sig", "/foo", clock.now(), 10, uses(2)))
                .await
                .unwrap();
            storage.consume("sig").await.unwrap();
        }

        let reopened = FileStorage::open(&path, clock.clone()).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 1);
        reopened.consume("sig").await.unwrap();
        assert!(reopened.consume("sig").await.unwrap_err().is_bad_identifier());

        let again = FileStorage::open(&path, clock).await.unwrap();
        assert!(again.is_empty().await.unwrap(), "exhausted record should not be persisted");
    }

    #[tokio::test]
    async fn test_gc_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.json");
        let clock = Arc::new(TestClock::new());

        let storage = FileStorage::open(&path, clock.clone()).await.unwrap();
        storage
            .store(SignedUrlRecord::expiring_in("old", "/a", clock.now(), 1, uses(1)))
            .await
            .unwrap();
        storage
            .store(SignedUrlRecord::expiring_in("new", "/b", clock.now(), 60, uses(1)))
            .await
            .unwrap();

        clock.advance(2);
        storage.gc().await.unwrap();

        let reopened = FileStorage::open(&path, clock).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 1);
        reopened.consume("new").await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = FileStorage::open(&path, Arc::new(TestClock::new())).await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.json");
        std::fs::write(&path, br#"{"version":99,"records":{}}"#).unwrap();

        let err = FileStorage::open(&path, Arc::new(TestClock::new())).await.unwrap_err();
        assert!(err.to_string().contains("unsupported snapshot version 99"), "got {err}");
    }

    #[tokio::test]
    async fn test_snapshot_key_must_match_identifier() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.json");
        std::fs::write(
            &path,
            br#"{"version":1,"records":{"a":{"identifier":"b","target":"/t","expires_at":"2099-01-01T00:00:00Z","remaining_usage":1}}}"#,
        )
        .unwrap();

        let err = FileStorage::open(&path, Arc::new(TestClock::new())).await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }), "got {err:?}");
        assert!(err.to_string().contains("\"a\""), "error should name the key: {err}");
    }

    #[tokio::test]
    async fn test_snapshot_rejects_exhausted_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.json");
        std::fs::write(
            &path,
            br#"{"version":1,"records":{"z":{"identifier":"z","target":"/t","expires_at":"2099-01-01T00:00:00Z","remaining_usage":0}}}"#,
        )
        .unwrap();

        let err = FileStorage::open(&path, Arc::new(TestClock::new())).await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }), "got {err:?}");
        assert!(err.to_string().contains("\"z\""), "error should name the key: {err}");
    }

    #[tokio::test]
    async fn test_valid_snapshot_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.json");
        std::fs::write(
            &path,
            br#"{"version":1,"records":{"ok":{"identifier":"ok","target":"/t","expires_at":"2099-01-01T00:00:00Z","remaining_usage":2}}}"#,
        )
        .unwrap();

        let storage = FileStorage::open(&path, Arc::new(TestClock::new())).await.unwrap();
        storage.consume("ok").await.unwrap();
        storage.consume("ok").await.unwrap();
        assert!(storage.consume("ok").await.unwrap_err().is_bad_identifier());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_operations_still_complete() {
        const ROUNDS: usize = 32;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.json");
        let clock = Arc::new(TestClock::new());
        let storage = FileStorage::open(&path, clock.clone()).await.unwrap();

        for i in 0..ROUNDS {
            let record =
                SignedUrlRecord::expiring_in(format!("sig{i}"), "/foo", clock.now(), 60, uses(1));
            // Polled once, then dropped.
            let _ = tokio::time::timeout(Duration::ZERO, storage.store(record)).await;
        }

        let mut settled = false;
        for _ in 0..500 {
            if storage.len().await.unwrap() == ROUNDS {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled, "dropped stores should still be applied");

        let reopened = FileStorage::open(&path, clock).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), ROUNDS, "memory and snapshot disagree");
        for i in 0..ROUNDS {
            storage.consume(&format!("sig{i}")).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_no_tmp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.json");
        let clock = Arc::new(TestClock::new());
        let storage = FileStorage::open(&path, clock.clone()).await.unwrap();
        storage
            .store(SignedUrlRecord::expiring_in("sig", "/foo", clock.now(), 10, uses(1)))
            .await
            .unwrap();

        assert!(path.exists());
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_tmp_path_appends_suffix() {
        assert_eq!(tmp_path(Path::new("/var/lib/urls.json")), PathBuf::from("/var/lib/urls.json.tmp"));
    }
}
