//! LRU+TTL idempotency set.
//!
//! Uses true insertion-order eviction rather than "whichever entry a
//! `HashMap` iteration happens to yield first", which is not actually
//! oldest-first: a `VecDeque` tracks insertion order explicitly alongside
//! the `HashMap`.
//!
//! Bookkeeping is a plain `std::sync::Mutex`, not `tokio::sync::Mutex`: every
//! method holds it only across synchronous map operations, never across an
//! `.await`, so there is no point paying for an async-aware lock. This also
//! lets [`IdempotencySet::try_mark`] be called from the synchronous half of
//! `EventProvider::emit`, where the idempotency check gates whether
//! delivery is scheduled at all, before anything is awaited.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::ConduitResult;

/// Tuning knobs for an [`IdempotencySet`].
#[derive(Debug, Clone, Copy)]
pub struct IdempotencyConfig {
    /// Maximum number of tracked ids before the oldest is evicted.
    pub max_size: usize,
    /// How long an id is remembered before it may be reprocessed.
    pub ttl: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            ttl: Duration::from_millis(3_600_000),
        }
    }
}

/// The result of [`IdempotencySet::process_once`]: whether the closure
/// actually ran, or the id had already been seen.
#[derive(Debug)]
pub enum ProcessOnceOutcome<T> {
    /// The id was new; the closure ran and produced `T`.
    Executed(T),
    /// The id had already been processed (and not yet expired/evicted); the
    /// closure was not called.
    Deduplicated,
}

impl<T> ProcessOnceOutcome<T> {
    /// `true` if the closure ran.
    pub fn was_executed(&self) -> bool {
        matches!(self, ProcessOnceOutcome::Executed(_))
    }
}

struct Inner {
    seen: HashMap<String, Instant>,
    order: VecDeque<String>,
}

/// Tracks which ids (event ids, message ids, idempotency keys) have already
/// been processed, so at-least-once redelivery does not re-run side
/// effects.
pub struct IdempotencySet {
    config: IdempotencyConfig,
    inner: Mutex<Inner>,
}

impl IdempotencySet {
    /// Build a set with the given config.
    pub fn new(config: IdempotencyConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                seen: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// `true` if `id` is currently marked processed (not expired, not
    /// evicted).
    pub fn contains(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.prune_expired(&mut inner);
        inner.seen.contains_key(id)
    }

    /// Mark `id` processed if it is new. Returns `true` if this call marked
    /// it (first sighting), `false` if it was already marked. Synchronous,
    /// so it can run inline in `emit`'s duplicate-suppression check.
    pub fn try_mark(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.prune_expired(&mut inner);
        if inner.seen.contains_key(id) {
            return false;
        }
        self.mark(&mut inner, id.to_string());
        true
    }

    /// Run `f` at most once for `id`: if `id` has not been seen (or its
    /// entry expired/was evicted), `id` is marked processed *before* `f`
    /// runs, `f` runs, and its result — success or error — is returned. If
    /// `id` has already been marked, `f` is not called and
    /// [`ProcessOnceOutcome::Deduplicated`] is returned.
    ///
    /// `id` stays marked processed even when `f` returns an error:
    /// "attempted" and "succeeded" are treated as the same thing for dedup
    /// purposes, since the caller is responsible for retry semantics.
    pub async fn process_once<F, Fut, T>(&self, id: impl Into<String>, f: F) -> ConduitResult<ProcessOnceOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConduitResult<T>>,
    {
        let id = id.into();
        if !self.try_mark(&id) {
            return Ok(ProcessOnceOutcome::Deduplicated);
        }
        f().await.map(ProcessOnceOutcome::Executed)
    }

    /// Mark `id` processed without running anything, for callers that
    /// perform the side effect themselves (the fan-out dedup path).
    pub fn mark_processed(&self, id: impl Into<String>) {
        self.try_mark(&id.into());
    }

    fn mark(&self, inner: &mut Inner, id: String) {
        if inner.seen.insert(id.clone(), Instant::now()).is_none() {
            inner.order.push_back(id);
        }
        while inner.seen.len() > self.config.max_size {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            } else {
                break;
            }
        }
    }

    fn prune_expired(&self, inner: &mut Inner) {
        let ttl = self.config.ttl;
        let now = Instant::now();
        while let Some(front) = inner.order.front() {
            match inner.seen.get(front) {
                Some(inserted_at) if now.duration_since(*inserted_at) >= ttl => {
                    let expired = inner.order.pop_front().unwrap();
                    inner.seen.remove(&expired);
                }
                Some(_) => break,
                None => {
                    inner.order.pop_front();
                }
            }
        }
    }

    /// Number of currently tracked ids (test/diagnostic helper).
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        self.prune_expired(&mut inner);
        inner.seen.len()
    }

    /// `true` if no ids are currently tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
