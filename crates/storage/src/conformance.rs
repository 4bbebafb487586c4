//! Conformance test suite for [`SignedUrlStorage`] implementations.
//!
//! Every backend (in-memory, file, relational, distributed cache) runs the
//! same scenarios against the public `store`/`consume`/`gc` contract. The
//! suite never inspects backend internals; it only observes which consumes
//! succeed and the shape of `BadIdentifier` errors.
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each conformance function with a
//! fresh backend wired to a fresh [`TestClock`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use signurl_storage::{MemoryStorage, TestClock, conformance};
//!
//! #[tokio::test]
//! async fn gc_evicts_expired_records() {
//!     let clock = Arc::new(TestClock::new());
//!     let storage = MemoryStorage::new(clock.clone());
//!     conformance::gc_evicts_expired_records(&storage, &clock).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Functions | Contract aspect |
//! |----------|-----------|-----------------|
//! | Usage | 4 tests | Exactly `max_usage` consumes succeed |
//! | Expiry | 3 tests | Expiry boundary and gc eviction |
//! | Identifiers | 2 tests | Unknown and mangled identifiers |
//! | Independence | 2 tests | One record's fate never affects another |
//! | GC | 3 tests | Idempotence, live records survive |
//! | Store | 2 tests | Overwrite and re-issue semantics |
//! | Concurrent | 4 tests | Atomic decrement, gc racing consume and store |

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::task::JoinSet;

use crate::{
    assert_bad_identifier,
    backend::SignedUrlStorage,
    clock::TestClock,
    error::StorageError,
    testutil::{make_identifier, signed_url},
};

// ============================================================================
// Usage: exactly max_usage consumes succeed (4 tests)
// ============================================================================

/// After the last allowed use the record is gone.
pub async fn last_usage_removes_record<S: SignedUrlStorage>(storage: &S, clock: &TestClock) {
    let url = signed_url(clock, "/foo?signature=foo_signature", "foo_signature", 10, 3);
    let id = url.identifier().to_owned();
    storage.store(url).await.expect("store");

    storage.consume(&id).await.expect("first consume");
    storage.consume(&id).await.expect("second consume");
    storage.consume(&id).await.expect("third consume");

    let result = storage.consume(&id).await;
    assert_bad_identifier!(result, id, "consuming past max_usage must fail");
}

/// For several budgets `n`, exactly `n` consumes succeed and the next fails.
pub async fn exactly_max_usage_consumes_succeed<S: SignedUrlStorage>(
    storage: &S,
    clock: &TestClock,
) {
    for max_usage in [1u32, 2, 5, 10] {
        let id = format!("budget_{max_usage}");
        storage.store(signed_url(clock, "/budget", &id, 60, max_usage)).await.expect("store");

        for attempt in 1..=max_usage {
            storage
                .consume(&id)
                .await
                .unwrap_or_else(|e| panic!("consume {attempt}/{max_usage} failed: {e}"));
        }
        let result = storage.consume(&id).await;
        assert_bad_identifier!(result, id, format!("consume {} of {max_usage}", max_usage + 1));
    }
}

/// A single-use record admits one consume.
pub async fn single_use_record_is_consumed_once<S: SignedUrlStorage>(
    storage: &S,
    clock: &TestClock,
) {
    storage.store(signed_url(clock, "/once", "once", 60, 1)).await.expect("store");
    storage.consume("once").await.expect("first consume");
    let result = storage.consume("once").await;
    assert_bad_identifier!(result, "once");
}

/// An exhausted record stays rejected even after gc runs.
pub async fn exhausted_record_stays_rejected<S: SignedUrlStorage>(storage: &S, clock: &TestClock) {
    storage.store(signed_url(clock, "/x", "exhaust", 60, 1)).await.expect("store");
    storage.consume("exhaust").await.expect("consume");
    storage.gc().await.expect("gc");
    let first = storage.consume("exhaust").await;
    assert_bad_identifier!(first, "exhaust");
    let second = storage.consume("exhaust").await;
    assert_bad_identifier!(second, "exhaust");
}

// ============================================================================
// Expiry: boundary and gc eviction (3 tests)
// ============================================================================

/// Records are evicted by gc only once the clock is past their expiry.
pub async fn gc_evicts_expired_records<S: SignedUrlStorage>(storage: &S, clock: &TestClock) {
    let foo = signed_url(clock, "/foo?signature=foo_signature", "foo_signature", 2, 10);
    let bar = signed_url(clock, "/bar?signature=bar_signature", "bar_signature", 3, 10);
    let (foo_id, bar_id) = (foo.identifier().to_owned(), bar.identifier().to_owned());
    storage.store(foo).await.expect("store foo");
    storage.store(bar).await.expect("store bar");

    clock.advance(2);
    storage.gc().await.expect("gc");

    storage.consume(&foo_id).await.expect("foo should still be valid");
    storage.consume(&bar_id).await.expect("bar should still be valid");

    clock.advance(1);
    storage.gc().await.expect("gc");

    let result = storage.consume(&foo_id).await;
    assert_bad_identifier!(result, foo_id, "gc did not remove an expired link");
    storage.consume(&bar_id).await.expect("bar should still be valid");

    clock.advance(1);
    storage.gc().await.expect("gc");

    let result = storage.consume(&bar_id).await;
    assert_bad_identifier!(result, bar_id, "gc did not remove an expired link");
}

/// A record is consumable at the exact instant it expires.
pub async fn consume_at_expiry_instant_succeeds<S: SignedUrlStorage>(
    storage: &S,
    clock: &TestClock,
) {
    storage.store(signed_url(clock, "/edge", "edge", 5, 2)).await.expect("store");
    clock.advance(5);
    storage.consume("edge").await.expect("consume at expires_at should succeed");
}

/// Expiry is enforced by `consume` itself, without waiting for gc.
pub async fn consume_after_expiry_fails_without_gc<S: SignedUrlStorage>(
    storage: &S,
    clock: &TestClock,
) {
    storage.store(signed_url(clock, "/late", "late", 5, 10)).await.expect("store");
    clock.advance(6);
    let result = storage.consume("late").await;
    assert_bad_identifier!(result, "late", "expired record must not be consumable");
}

// ============================================================================
// Identifiers: unknown and mangled identifiers (2 tests)
// ============================================================================

/// Consuming an identifier that was never stored fails.
pub async fn unknown_identifier_is_rejected<S: SignedUrlStorage>(storage: &S, _clock: &TestClock) {
    let result = storage.consume("never_stored").await;
    assert_bad_identifier!(result, "never_stored");
}

/// A mangled identifier is rejected, and the error names the mangled value.
pub async fn mangled_identifier_is_rejected<S: SignedUrlStorage>(storage: &S, clock: &TestClock) {
    let url = signed_url(clock, "/foo?signature=foo_signature", "foo_signature", 10, 3);
    let mangled = format!("{}XXX", url.identifier());
    storage.store(url).await.expect("store");

    let result = storage.consume(&mangled).await;
    assert_bad_identifier!(result, mangled);
    storage.consume("foo_signature").await.expect("original identifier must be untouched");
}

// ============================================================================
// Independence: one record's fate never affects another (2 tests)
// ============================================================================

/// Exhausting one record leaves another intact.
pub async fn exhaustion_is_isolated<S: SignedUrlStorage>(storage: &S, clock: &TestClock) {
    storage.store(signed_url(clock, "/a", "iso_a", 60, 1)).await.expect("store a");
    storage.store(signed_url(clock, "/b", "iso_b", 60, 2)).await.expect("store b");

    storage.consume("iso_a").await.expect("consume a");
    let result = storage.consume("iso_a").await;
    assert_bad_identifier!(result, "iso_a");

    storage.consume("iso_b").await.expect("b unaffected");
    storage.consume("iso_b").await.expect("b unaffected");
}

/// Expiry of one record leaves a longer-lived one intact.
pub async fn expiry_is_isolated<S: SignedUrlStorage>(storage: &S, clock: &TestClock) {
    storage.store(signed_url(clock, "/short", "short", 1, 5)).await.expect("store short");
    storage.store(signed_url(clock, "/long", "long", 100, 5)).await.expect("store long");

    clock.advance(2);
    storage.gc().await.expect("gc");

    let result = storage.consume("short").await;
    assert_bad_identifier!(result, "short");
    storage.consume("long").await.expect("long-lived record unaffected");
}

// ============================================================================
// GC: idempotence, live records survive (3 tests)
// ============================================================================

/// gc with nothing expired changes nothing, including usage counts.
pub async fn gc_without_expired_records_is_noop<S: SignedUrlStorage>(
    storage: &S,
    clock: &TestClock,
) {
    storage.store(signed_url(clock, "/n", "noop", 60, 2)).await.expect("store");
    storage.gc().await.expect("gc");
    storage.gc().await.expect("gc");

    storage.consume("noop").await.expect("first use survives gc");
    storage.consume("noop").await.expect("second use survives gc");
    let result = storage.consume("noop").await;
    assert_bad_identifier!(result, "noop");
}

/// Running gc twice in a row has the same observable effect as once.
pub async fn gc_is_idempotent<S: SignedUrlStorage>(storage: &S, clock: &TestClock) {
    storage.store(signed_url(clock, "/e", "gone", 1, 1)).await.expect("store");
    storage.store(signed_url(clock, "/k", "kept", 10, 1)).await.expect("store");
    clock.advance(2);

    storage.gc().await.expect("first gc");
    storage.gc().await.expect("second gc");

    let result = storage.consume("gone").await;
    assert_bad_identifier!(result, "gone");
    storage.consume("kept").await.expect("live record survives repeated gc");
}

/// gc on an empty storage succeeds.
pub async fn gc_on_empty_storage_succeeds<S: SignedUrlStorage>(storage: &S, _clock: &TestClock) {
    storage.gc().await.expect("gc on empty storage");
    storage.gc().await.expect("repeated gc on empty storage");
}

// ============================================================================
// Store: overwrite and re-issue semantics (2 tests)
// ============================================================================

/// Storing under an existing identifier replaces the previous record.
pub async fn store_overwrites_existing_record<S: SignedUrlStorage>(
    storage: &S,
    clock: &TestClock,
) {
    storage.store(signed_url(clock, "/v1", "dup", 60, 1)).await.expect("store v1");
    storage.store(signed_url(clock, "/v2", "dup", 60, 3)).await.expect("store v2");

    for _ in 0..3 {
        storage.consume("dup").await.expect("overwritten budget applies");
    }
    let result = storage.consume("dup").await;
    assert_bad_identifier!(result, "dup");
}

/// An exhausted identifier can be issued again with a fresh `store`.
pub async fn store_after_exhaustion_reissues<S: SignedUrlStorage>(storage: &S, clock: &TestClock) {
    storage.store(signed_url(clock, "/r", "reissue", 60, 1)).await.expect("store");
    storage.consume("reissue").await.expect("consume");

    storage.store(signed_url(clock, "/r", "reissue", 60, 1)).await.expect("re-store");
    storage.consume("reissue").await.expect("re-issued record is consumable");
}

// ============================================================================
// Concurrent: atomic decrement, gc racing consume and store (4 tests)
// ============================================================================

/// Many callers race for a single-use record; exactly one wins.
///
/// Requires `S: 'static` so the storage can be shared across spawned tasks
/// via `Arc`.
pub async fn concurrent_consume_has_one_winner<S: SignedUrlStorage + 'static>(
    storage: Arc<S>,
    clock: &TestClock,
) {
    storage.store(signed_url(clock, "/race", "race", 60, 1)).await.expect("store");
    let (successes, rejections) = race(&storage, "race", 32).await;
    assert_eq!(successes, 1, "exactly one consumer should win the last use");
    assert_eq!(rejections, 31, "remaining consumers should get BadIdentifier");
}

/// Many callers race for an `n`-use record; exactly `n` win.
pub async fn concurrent_consume_respects_budget<S: SignedUrlStorage + 'static>(
    storage: Arc<S>,
    clock: &TestClock,
) {
    storage.store(signed_url(clock, "/budget", "budget", 60, 7)).await.expect("store");
    let (successes, rejections) = race(&storage, "budget", 40).await;
    assert_eq!(successes, 7, "exactly max_usage consumers should succeed");
    assert_eq!(rejections, 33);
}

/// Concurrent consumes of distinct identifiers all succeed.
pub async fn concurrent_consume_distinct_identifiers<S: SignedUrlStorage + 'static>(
    storage: Arc<S>,
    clock: &TestClock,
) {
    for i in 0..50 {
        let id = make_identifier("distinct", i);
        storage.store(signed_url(clock, "/d", &id, 60, 1)).await.expect("store");
    }

    let mut tasks = JoinSet::new();
    for i in 0..50 {
        let storage = Arc::clone(&storage);
        tasks.spawn(async move { storage.consume(&make_identifier("distinct", i)).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.expect("task join").expect("distinct identifiers must not contend");
    }
}

/// A tight gc loop races consumers and a storer.
///
/// Half the pre-stored single-use records are expired. Each live one must be
/// won by exactly one consumer, expired ones by none, and every record
/// stored during the race must survive it.
pub async fn concurrent_gc_and_consume<S: SignedUrlStorage + 'static>(
    storage: Arc<S>,
    clock: &TestClock,
) {
    const RECORDS: usize = 40;
    const CONSUMERS: usize = 8;

    for i in 0..RECORDS {
        let expires_in = if i % 2 == 0 { 1 } else { 3600 };
        let id = make_identifier("gc_race", i);
        storage.store(signed_url(clock, "/gc", &id, expires_in, 1)).await.expect("store");
    }
    clock.advance(2);
    let late: Vec<_> = (0..RECORDS)
        .map(|i| signed_url(clock, "/late", &make_identifier("gc_late", i), 3600, 1))
        .collect();

    let sweeping = Arc::new(AtomicBool::new(true));
    let sweeper = {
        let storage = Arc::clone(&storage);
        let sweeping = Arc::clone(&sweeping);
        tokio::spawn(async move {
            while sweeping.load(Ordering::Relaxed) {
                storage.gc().await.expect("gc must not fail while racing consume");
                tokio::task::yield_now().await;
            }
        })
    };
    let storer = {
        let storage = Arc::clone(&storage);
        tokio::spawn(async move {
            for record in late {
                storage.store(record).await.expect("store must not fail while racing gc");
                tokio::task::yield_now().await;
            }
        })
    };

    let mut tasks = JoinSet::new();
    for _ in 0..CONSUMERS {
        let storage = Arc::clone(&storage);
        tasks.spawn(async move {
            let mut won = Vec::new();
            for i in 0..RECORDS {
                match storage.consume(&make_identifier("gc_race", i)).await {
                    Ok(()) => won.push(i),
                    Err(StorageError::BadIdentifier { .. }) => {},
                    Err(e) => panic!("unexpected error: {e:?}"),
                }
            }
            won
        });
    }

    let mut winners = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        winners.extend(joined.expect("task join"));
    }
    storer.await.expect("storer join");
    sweeping.store(false, Ordering::Relaxed);
    sweeper.await.expect("sweeper join");

    winners.sort_unstable();
    let expected: Vec<usize> = (0..RECORDS).filter(|i| i % 2 == 1).collect();
    assert_eq!(winners, expected, "each live record won exactly once, expired ones never");

    for i in 0..RECORDS {
        let id = make_identifier("gc_late", i);
        storage
            .consume(&id)
            .await
            .unwrap_or_else(|e| panic!("{id} stored during gc was lost: {e}"));
    }
}

async fn race<S: SignedUrlStorage + 'static>(
    storage: &Arc<S>,
    identifier: &'static str,
    callers: usize,
) -> (usize, usize) {
    let mut tasks = JoinSet::new();
    for _ in 0..callers {
        let storage = Arc::clone(storage);
        tasks.spawn(async move { storage.consume(identifier).await });
    }

    let (mut successes, mut rejections) = (0, 0);
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("task join") {
            Ok(()) => successes += 1,
            Err(StorageError::BadIdentifier { .. }) => rejections += 1,
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
    (successes, rejections)
}

// ============================================================================
// Convenience runner: run all conformance tests against one backend kind
// ============================================================================

/// Run the full conformance suite, building a fresh storage per scenario.
///
/// Scenarios reuse identifiers, so `factory` must return an empty storage
/// wired to the clock it is given.
///
/// ```no_run
/// use std::sync::Arc;
/// use signurl_storage::{MemoryStorage, conformance};
///
/// #[tokio::test]
/// async fn memory_storage_conformance() {
///     conformance::run_all(|clock| async move { MemoryStorage::new(clock) }).await;
/// }
/// ```
pub async fn run_all<S, F, Fut>(factory: F)
where
    S: SignedUrlStorage + 'static,
    F: Fn(Arc<TestClock>) -> Fut,
    Fut: Future<Output = S>,
{
    macro_rules! scenario {
        (shared $name:ident) => {{
            let clock = Arc::new(TestClock::new());
            let storage = Arc::new(factory(Arc::clone(&clock)).await);
            $name(storage, &clock).await;
        }};
        ($name:ident) => {{
            let clock = Arc::new(TestClock::new());
            let storage = factory(Arc::clone(&clock)).await;
            $name(&storage, &clock).await;
        }};
    }

    // Usage
    scenario!(last_usage_removes_record);
    scenario!(exactly_max_usage_consumes_succeed);
    scenario!(single_use_record_is_consumed_once);
    scenario!(exhausted_record_stays_rejected);

    // Expiry
    scenario!(gc_evicts_expired_records);
    scenario!(consume_at_expiry_instant_succeeds);
    scenario!(consume_after_expiry_fails_without_gc);

    // Identifiers
    scenario!(unknown_identifier_is_rejected);
    scenario!(mangled_identifier_is_rejected);

    // Independence
    scenario!(exhaustion_is_isolated);
    scenario!(expiry_is_isolated);

    // GC
    scenario!(gc_without_expired_records_is_noop);
    scenario!(gc_is_idempotent);
    scenario!(gc_on_empty_storage_succeeds);

    // Store
    scenario!(store_overwrites_existing_record);
    scenario!(store_after_exhaustion_reissues);

    // Concurrent
    scenario!(shared concurrent_consume_has_one_winner);
    scenario!(shared concurrent_consume_respects_budget);
    scenario!(shared concurrent_consume_distinct_identifiers);
    scenario!(shared concurrent_gc_and_consume);
}
