use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use rocket::tokio::sync::watch;

use crate::ledger::LedgerError;

/// A value together with the moment it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fresh<T> {
    pub value: T,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// A fresh value was read and is now the last known good one.
    Applied(T),
    /// A read for this resource was already in flight.
    Skipped,
    /// The response arrived after a newer one or after the poller was
    /// invalidated, and was thrown away.
    Stale,
    /// The read failed; the last known good value stands.
    Failed,
}

/// Guards reads of one ledger resource.
///
/// At most one read is in flight at a time. Every read gets a request id,
/// and a response is only applied if no response with a higher id (or an
/// invalidation) has been applied before it.
pub struct StatusPoller<T> {
    resource: &'static str,
    next_request: AtomicU64,
    applied: AtomicU64,
    in_flight: AtomicBool,
    last_good: watch::Sender<Option<Fresh<T>>>,
}

/// Clears the in-flight flag however the read ends, including when the
/// polling task is aborted mid-read.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T> StatusPoller<T>
where
    T: Clone + Send + Sync,
{
    pub fn new(resource: &'static str) -> Self {
        let (last_good, _) = watch::channel(None);
        Self {
            resource,
            next_request: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            last_good,
        }
    }

    pub async fn poll<F, Fut>(&self, read: F) -> PollOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            trace!("Read of {} already in flight, skipping", self.resource);
            return PollOutcome::Skipped;
        }
        let _guard = InFlight(&self.in_flight);
        let request = self.next_request.fetch_add(1, Ordering::AcqRel) + 1;

        let result = read().await;

        match result {
            Ok(value) => {
                if self.applied.fetch_max(request, Ordering::AcqRel) >= request {
                    debug!("Discarding stale {} response #{request}", self.resource);
                    return PollOutcome::Stale;
                }
                self.last_good.send_replace(Some(Fresh {
                    value: value.clone(),
                    refreshed_at: Utc::now(),
                }));
                PollOutcome::Applied(value)
            }
            Err(_) if self.applied.load(Ordering::Acquire) >= request => PollOutcome::Stale,
            Err(e) => {
                warn!("Failed to refresh {}: {e}", self.resource);
                PollOutcome::Failed
            }
        }
    }

    /// Discard every response to a read issued before this call.
    pub fn invalidate(&self) {
        let issued = self.next_request.load(Ordering::Acquire);
        self.applied.fetch_max(issued, Ordering::AcqRel);
    }

    /// Discard every response from now on.
    pub fn close(&self) {
        self.applied.store(u64::MAX, Ordering::Release);
    }

    pub fn last_good(&self) -> Option<Fresh<T>> {
        self.last_good.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Fresh<T>>> {
        self.last_good.subscribe()
    }
}
