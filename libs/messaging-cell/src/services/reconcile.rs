// libs/messaging-cell/src/services/reconcile.rs
//! Read-through cache reconciliation against an external source of truth.
//!
//! A cached record is compared with a fresh observation from the oracle. The
//! record is written back only when something the oracle owns has changed;
//! otherwise just the heartbeat is touched. Oracle failures never surface to
//! the caller, who gets the last-known record instead.

use std::fmt::Display;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use shared_database::StoreError;

#[async_trait]
pub trait ReadThroughCache: Send + Sync {
    type Record: Clone + Send + Sync;
    type Observed: Send;
    type Error: Display + Send;

    /// Asks the oracle for its current view of `cached`.
    async fn observe(&self, cached: &Self::Record) -> Result<Self::Observed, Self::Error>;

    fn differs(&self, cached: &Self::Record, observed: &Self::Observed) -> bool;

    /// Folds the observation into a new record value.
    fn apply(&self, cached: &Self::Record, observed: Self::Observed, now: DateTime<Utc>) -> Self::Record;

    async fn write_back(&self, record: &Self::Record) -> Result<Self::Record, StoreError>;

    async fn heartbeat(&self, record: &Self::Record, now: DateTime<Utc>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled<R> {
    /// The oracle disagreed and the record was written back.
    Changed(R),
    /// Nothing changed; only the heartbeat moved.
    Unchanged(R),
    /// The oracle or the store failed; this is the last-known record.
    Stale(R),
}

impl<R> Reconciled<R> {
    pub fn into_record(self) -> R {
        match self {
            Reconciled::Changed(r) | Reconciled::Unchanged(r) | Reconciled::Stale(r) => r,
        }
    }

    pub fn record(&self) -> &R {
        match self {
            Reconciled::Changed(r) | Reconciled::Unchanged(r) | Reconciled::Stale(r) => r,
        }
    }
}

pub async fn reconcile<C: ReadThroughCache>(
    cache: &C,
    cached: C::Record,
    now: DateTime<Utc>,
) -> Reconciled<C::Record> {
    let observed = match cache.observe(&cached).await {
        Ok(observed) => observed,
        Err(e) => {
            warn!("Reconciliation oracle unavailable, serving cached state: {}", e);
            return Reconciled::Stale(cached);
        }
    };

    if !cache.differs(&cached, &observed) {
        if let Err(e) = cache.heartbeat(&cached, now).await {
            warn!("Failed to record sync heartbeat: {}", e);
        }
        return Reconciled::Unchanged(cached);
    }

    let updated = cache.apply(&cached, observed, now);
    match cache.write_back(&updated).await {
        Ok(stored) => {
            debug!("Reconciled record written back");
            Reconciled::Changed(stored)
        }
        Err(e) => {
            warn!("Failed to write back reconciled record: {}", e);
            Reconciled::Stale(cached)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Cache of a single integer with a scripted oracle.
    struct Counter {
        oracle: Result<i32, String>,
        writes: AtomicUsize,
        heartbeats: AtomicUsize,
    }

    impl Counter {
        fn new(oracle: Result<i32, String>) -> Self {
            Self {
                oracle,
                writes: AtomicUsize::new(0),
                heartbeats: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReadThroughCache for Counter {
        type Record = i32;
        type Observed = i32;
        type Error = String;

        async fn observe(&self, _cached: &i32) -> Result<i32, String> {
            self.oracle.clone()
        }

        fn differs(&self, cached: &i32, observed: &i32) -> bool {
            cached != observed
        }

        fn apply(&self, _cached: &i32, observed: i32, _now: DateTime<Utc>) -> i32 {
            observed
        }

        async fn write_back(&self, record: &i32) -> Result<i32, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(*record)
        }

        async fn heartbeat(&self, _record: &i32, _now: DateTime<Utc>) -> Result<(), StoreError> {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn unchanged_observation_only_touches_heartbeat() {
        let cache = Counter::new(Ok(7));
        assert_eq!(reconcile(&cache, 7, Utc::now()).await, Reconciled::Unchanged(7));
        assert_eq!(cache.writes.load(Ordering::SeqCst), 0);
        assert_eq!(cache.heartbeats.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changed_observation_is_written_back() {
        let cache = Counter::new(Ok(9));
        assert_eq!(reconcile(&cache, 7, Utc::now()).await, Reconciled::Changed(9));
        assert_eq!(cache.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oracle_failure_serves_cached_value() {
        let cache = Counter::new(Err("gateway down".to_string()));
        assert_eq!(reconcile(&cache, 7, Utc::now()).await, Reconciled::Stale(7));
        assert_eq!(cache.writes.load(Ordering::SeqCst), 0);
        assert_eq!(cache.heartbeats.load(Ordering::SeqCst), 0);
    }
}
