//! Garbage collection scheduling.
//!
//! [`SignedUrlStorage::gc`] is an explicit operation; nothing in a backend
//! calls it on its own. This module offers the two usual ways of driving it:
//!
//! - [`GarbageCollector`]: a request-path lottery. Each call to
//!   [`maybe_collect`](GarbageCollector::maybe_collect) runs a sweep with a
//!   configured probability.
//! - [`GcTask`]: a background tokio task that sweeps on a fixed interval until
//!   it is shut down or dropped.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::{select, sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, warn};

use crate::{
    backend::SignedUrlStorage,
    config::{GcConfig, MIN_GC_INTERVAL, validate_percentage},
    error::{ConfigError, StorageResult},
};

/// Runs `gc` on a random subset of requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GarbageCollector {
    percentage: u8,
}

impl GarbageCollector {
    /// Creates a collector that sweeps on `percentage` percent of calls.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AboveMaximum`] if `percentage` exceeds 100.
    pub fn new(percentage: u8) -> Result<Self, ConfigError> {
        validate_percentage(percentage)?;
        Ok(Self { percentage })
    }

    /// Creates a collector from the `percentage` of a [`GcConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn from_config(config: &GcConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { percentage: config.percentage })
    }

    /// Sweep probability in percent.
    #[must_use]
    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    /// Rolls the dice and sweeps `storage` on a hit.
    ///
    /// Returns whether a sweep ran.
    ///
    /// # Errors
    ///
    /// Propagates the error of a sweep that ran and failed.
    pub async fn maybe_collect<S>(&self, storage: &S) -> StorageResult<bool>
    where
        S: SignedUrlStorage + ?Sized,
    {
        if !self.roll() {
            return Ok(false);
        }
        storage.gc().await?;
        Ok(true)
    }

    fn roll(&self) -> bool {
        match self.percentage {
            0 => false,
            100.. => true,
            p => rand::rng().random_range(0..100u8) < p,
        }
    }
}

/// Handle to a background sweeper.
///
/// The sweeper stops when [`shutdown`](Self::shutdown) is called or the
/// handle is dropped.
#[derive(Debug)]
pub struct GcTask {
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<()>,
}

impl GcTask {
    /// Spawns a task that sweeps `storage` every `interval`.
    ///
    /// The first sweep happens one `interval` after spawning. Intervals
    /// shorter than [`MIN_GC_INTERVAL`] are raised to it. Must be called from
    /// within a tokio runtime.
    pub fn spawn<S>(storage: Arc<S>, interval: Duration) -> Self
    where
        S: SignedUrlStorage + ?Sized + 'static,
    {
        let interval = interval.max(MIN_GC_INTERVAL);
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(sweep_loop(storage, interval, shutdown_rx));
        Self { shutdown_tx, handle }
    }

    /// Spawns a sweeper using the interval of a [`GcConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn from_config<S>(storage: Arc<S>, config: &GcConfig) -> Result<Self, ConfigError>
    where
        S: SignedUrlStorage + ?Sized + 'static,
    {
        config.validate()?;
        Ok(Self::spawn(storage, config.interval))
    }

    /// Signals the sweeper to stop. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Whether the sweeper task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for GcTask {
    fn drop(&mut self) {
        // The task may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

async fn sweep_loop<S>(storage: Arc<S>, interval: Duration, mut shutdown_rx: watch::Receiver<()>)
where
    S: SignedUrlStorage + ?Sized,
{
    loop {
        select! {
            _ = sleep(interval) => {}
            _ = shutdown_rx.changed() => {
                debug!("gc task shutting down");
                return;
            }
        }

        if let Err(error) = storage.gc().await {
            warn!(%error, "background garbage collection failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rstest::rstest;

    use super::*;
    use crate::{
        clock::TestClock, error::StorageError, memory::MemoryStorage, testutil::signed_url,
        types::SignedUrlRecord,
    };

    /// Storage whose sweeps always fail, counting attempts.
    #[derive(Default)]
    struct FailingGc {
        sweeps: AtomicUsize,
    }

    #[async_trait]
    impl SignedUrlStorage for FailingGc {
        async fn store(&self, _record: SignedUrlRecord) -> StorageResult<()> {
            Ok(())
        }

        async fn consume(&self, identifier: &str) -> StorageResult<()> {
            Err(StorageError::bad_identifier(identifier))
        }

        async fn gc(&self) -> StorageResult<()> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::internal("sweep failed"))
        }

        async fn len(&self) -> StorageResult<usize> {
            Ok(0)
        }
    }

    async fn storage_with_expired_record() -> (Arc<TestClock>, Arc<MemoryStorage>) {
        let clock = Arc::new(TestClock::new());
        let storage = Arc::new(MemoryStorage::new(clock.clone()));
        storage.store(signed_url(&clock, "/old", "old", 1, 1)).await.unwrap();
        clock.advance(2);
        (clock, storage)
    }

    #[rstest]
    #[case(0, false)]
    #[case(100, true)]
    #[tokio::test]
    async fn test_maybe_collect_extremes(#[case] percentage: u8, #[case] swept: bool) {
        let (_clock, storage) = storage_with_expired_record().await;
        let collector = GarbageCollector::new(percentage).unwrap();

        for _ in 0..20 {
            assert_eq!(collector.maybe_collect(storage.as_ref()).await.unwrap(), swept);
        }
        assert_eq!(storage.is_empty().await.unwrap(), swept);
    }

    #[test]
    fn test_percentage_above_100_rejected() {
        let err = GarbageCollector::new(101).unwrap_err();
        assert!(matches!(err, ConfigError::AboveMaximum { field: "gc.percentage", .. }));
    }

    #[test]
    fn test_from_config_uses_percentage() {
        let config = GcConfig::builder().percentage(40).build();
        assert_eq!(GarbageCollector::from_config(&config).unwrap().percentage(), 40);
    }

    #[test]
    fn test_roll_frequency_is_plausible() {
        let collector = GarbageCollector::new(50).unwrap();
        let hits = (0..10_000).filter(|_| collector.roll()).count();
        assert!((4_000..6_000).contains(&hits), "50% roll hit {hits} of 10000");
    }

    #[tokio::test]
    async fn test_maybe_collect_propagates_failure() {
        let storage = FailingGc::default();
        let collector = GarbageCollector::new(100).unwrap();
        assert!(collector.maybe_collect(&storage).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_sweeps_on_interval() {
        let (_clock, storage) = storage_with_expired_record().await;
        let _task = GcTask::spawn(storage.clone(), Duration::from_secs(10));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(storage.len().await.unwrap(), 1, "no sweep before the first interval");

        sleep(Duration::from_secs(6)).await;
        assert!(storage.is_empty().await.unwrap(), "expired record should be swept");
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_survives_failing_sweeps() {
        let storage = Arc::new(FailingGc::default());
        let _task = GcTask::spawn(storage.clone(), Duration::from_secs(1));

        sleep(Duration::from_millis(3_500)).await;
        assert_eq!(storage.sweeps.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_task() {
        let (_clock, storage) = storage_with_expired_record().await;
        let task = GcTask::spawn(storage.clone(), Duration::from_secs(10));

        task.shutdown();
        task.shutdown();
        sleep(Duration::from_secs(20)).await;

        assert!(task.is_finished());
        assert_eq!(storage.len().await.unwrap(), 1, "stopped task must not sweep");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_task() {
        let storage = Arc::new(FailingGc::default());
        let task = GcTask::spawn(storage.clone(), Duration::from_secs(1));
        drop(task);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(storage.sweeps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let storage = Arc::new(FailingGc::default());
        let _task = GcTask::spawn(storage.clone(), Duration::ZERO);

        sleep(Duration::from_millis(10)).await;
        let sweeps = storage.sweeps.load(Ordering::SeqCst);
        assert!((9..=11).contains(&sweeps), "expected about one sweep per ms, got {sweeps}");
    }

    #[tokio::test]
    async fn test_from_config_rejects_zero_interval() {
        let storage = Arc::new(FailingGc::default());
        let config = GcConfig::builder().interval(Duration::ZERO).build();
        assert!(GcTask::from_config(storage, &config).is_err());
    }
}
