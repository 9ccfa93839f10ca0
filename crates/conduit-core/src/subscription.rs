//! One-shot settleable `Subscription`.
//!
//! Backed by `tokio::sync::watch` rather than a bespoke `Notify`/`Mutex`
//! pair: a `watch::Receiver` already gives every clone its own
//! "have I observed the latest value" cursor, so multiple awaiters don't
//! disturb each other, and a value already sent before a receiver is
//! created is still visible to it, making repeated awaits memoized for
//! free.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

use crate::error::{ConduitError, ConduitResult};

#[derive(Debug, Clone)]
enum Settlement<T> {
    Pending,
    Resolved(T),
    Rejected(ConduitError),
}

/// A one-shot value that starts `Pending` and settles exactly once, to
/// either `Resolved(T)` or `Rejected`. Used for request/response event
/// delivery: the caller awaits the subscription the handler's
/// reply settles.
#[derive(Clone)]
pub struct Subscription<T = Value>
where
    T: Clone + Send + Sync + 'static,
{
    tx: Arc<watch::Sender<Settlement<T>>>,
    rx: watch::Receiver<Settlement<T>>,
}

impl<T> Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new, pending subscription.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(Settlement::Pending);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Settle with a success value. Returns `false` if already settled
    /// (settlement is one-shot; the second call is a no-op).
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Settlement::Resolved(value))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub fn reject(&self, error: ConduitError) -> bool {
        self.settle(Settlement::Rejected(error))
    }

    fn settle(&self, settlement: Settlement<T>) -> bool {
        let mut settled = false;
        self.tx.send_if_modified(|current| {
            if matches!(current, Settlement::Pending) {
                *current = settlement.clone();
                settled = true;
                true
            } else {
                false
            }
        });
        settled
    }

    /// `true` once `resolve` or `reject` has been called.
    pub fn is_settled(&self) -> bool {
        !matches!(*self.rx.borrow(), Settlement::Pending)
    }

    /// Await settlement. Calling this again after settlement (from this or
    /// any other clone) returns immediately with the same outcome — the
    /// await is memoized, not consumed.
    pub async fn wait(&self) -> ConduitResult<T> {
        let mut rx = self.rx.clone();
        loop {
            match &*rx.borrow() {
                Settlement::Pending => {}
                Settlement::Resolved(v) => return Ok(v.clone()),
                Settlement::Rejected(e) => return Err(e.clone()),
            }
            if rx.changed().await.is_err() {
                return Err(ConduitError::ProviderNotReady);
            }
        }
    }

    /// Await settlement, or time out after `duration` without disturbing
    /// any other awaiter (the subscription itself is not cancelled; a
    /// later settlement still reaches other waiters).
    pub async fn wait_timeout(&self, duration: Duration) -> ConduitResult<T> {
        match tokio::time::timeout(duration, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(ConduitError::Timeout {
                context: "subscription".to_string(),
                timeout_ms: duration,
            }),
        }
    }

    /// Register a callback invoked with the resolved value. If the
    /// subscription is already resolved, `f` runs immediately, synchronously,
    /// before this call returns. Otherwise it runs on settlement, on a
    /// spawned task.
    pub fn on_success<F>(&self, f: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        if let Settlement::Resolved(v) = &*self.rx.borrow() {
            f(v.clone());
            return;
        }
        if self.is_settled() {
            return;
        }
        let mut rx = self.rx.clone();
        tokio::spawn(async move {
            loop {
                if let Settlement::Resolved(v) = &*rx.borrow() {
                    f(v.clone());
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        });
    }

    /// Register a callback invoked with the rejection error. Same
    /// immediate-if-already-settled semantics as [`Subscription::on_success`].
    pub fn on_error<F>(&self, f: F)
    where
        F: FnOnce(ConduitError) + Send + 'static,
    {
        if let Settlement::Rejected(e) = &*self.rx.borrow() {
            f(e.clone());
            return;
        }
        if self.is_settled() {
            return;
        }
        let mut rx = self.rx.clone();
        tokio::spawn(async move {
            loop {
                if let Settlement::Rejected(e) = &*rx.borrow() {
                    f(e.clone());
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        });
    }
}

impl<T> Default for Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
