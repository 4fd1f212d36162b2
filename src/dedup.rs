//! In-flight request deduplication.
//!
//! Identical concurrent requests share one unit of work. The first caller for
//! a fingerprint becomes the leader and its work is spawned; later callers
//! join as followers and receive a clone of the leader's settled value. The
//! entry leaves the registry in the same critical section that publishes the
//! value, so a request arriving after settlement always starts fresh.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::watch;

use crate::request::Fingerprint;

/// The leader never produced a value: it panicked, or its task was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("deduplicated work did not settle: {0}")]
pub struct WorkLost(pub String);

impl WorkLost {
    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "work panicked".to_string());
        Self(msg)
    }

    fn dropped() -> Self {
        Self("leader dropped before settling".to_string())
    }
}

type Outcome<V> = Result<V, WorkLost>;
type Cell<V> = watch::Sender<Option<Outcome<V>>>;

struct RegistryInner<V> {
    entries: DashMap<Fingerprint, Arc<Cell<V>>>,
    hits: AtomicU64,
}

/// Fingerprint-keyed registry of unsettled work.
///
/// Cloned handles share the same entries and counters.
pub struct DedupRegistry<V> {
    inner: Arc<RegistryInner<V>>,
}

impl<V> Clone for DedupRegistry<V> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<V> Default for DedupRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> DedupRegistry<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                hits: AtomicU64::new(0),
            }),
        }
    }

    /// Number of unsettled entries.
    pub fn active_count(&self) -> usize {
        self.inner.entries.len()
    }

    /// Follower joins since creation. Never decreases.
    pub fn hits_count(&self) -> u64 {
        self.inner.hits.load(Ordering::Relaxed)
    }
}

impl<V> DedupRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Join the unsettled work for `fingerprint`, or start it.
    ///
    /// `work_factory` is only invoked when no entry exists. The work it
    /// returns is spawned onto the current tokio runtime, so it keeps running
    /// even if every handle is dropped. Must be called from within a runtime.
    pub fn join_or_lead<F, Fut>(&self, fingerprint: Fingerprint, work_factory: F) -> Joined<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let cell = match self.inner.entries.entry(fingerprint) {
            Entry::Occupied(existing) => {
                let rx = existing.get().subscribe();
                drop(existing);
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(fingerprint = %fingerprint, "joined in-flight request");
                return Joined { rx, leader: false };
            }
            Entry::Vacant(vacant) => {
                let (tx, _) = watch::channel(None);
                let cell = Arc::new(tx);
                vacant.insert(Arc::clone(&cell));
                cell
            }
        };

        let rx = cell.subscribe();
        // Created before the factory runs so a panicking factory still
        // clears its entry.
        let lease = Lease {
            inner: Arc::clone(&self.inner),
            fingerprint,
            cell,
            settled: false,
        };
        let work = work_factory();
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(value) => Ok(value),
                Err(payload) => Err(WorkLost::from_panic(payload)),
            };
            lease.settle(outcome);
        });

        Joined { rx, leader: true }
    }
}

/// Ownership of one registry entry by its leader task.
struct Lease<V> {
    inner: Arc<RegistryInner<V>>,
    fingerprint: Fingerprint,
    cell: Arc<Cell<V>>,
    settled: bool,
}

impl<V> Lease<V> {
    fn settle(mut self, outcome: Outcome<V>) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: Outcome<V>) {
        if self.settled {
            return;
        }
        self.settled = true;

        // The entry guard holds the shard lock: publish and remove are one step.
        let entry = self.inner.entries.entry(self.fingerprint);
        self.cell.send_replace(Some(outcome));
        if let Entry::Occupied(occupied) = entry {
            if Arc::ptr_eq(occupied.get(), &self.cell) {
                occupied.remove();
            }
        }
    }
}

impl<V> Drop for Lease<V> {
    fn drop(&mut self) {
        if !self.settled {
            self.finish(Err(WorkLost::dropped()));
        }
    }
}

/// Handle on a deduplicated unit of work.
#[derive(Debug)]
pub struct Joined<V> {
    rx: watch::Receiver<Option<Outcome<V>>>,
    leader: bool,
}

impl<V: Clone> Joined<V> {
    /// True if this call started the work.
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    /// Wait for the shared work to settle.
    pub async fn wait(mut self) -> Result<V, WorkLost> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(settled) => (*settled).clone().unwrap_or_else(|| Err(WorkLost::dropped())),
            Err(_) => Err(WorkLost::dropped()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Message, Request};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    fn fp(text: &str) -> Fingerprint {
        Request::new(vec![Message::user(text)]).fingerprint().unwrap()
    }

    #[tokio::test]
    async fn leader_runs_work_and_entry_is_removed() {
        let registry: DedupRegistry<u32> = DedupRegistry::new();
        let joined = registry.join_or_lead(fp("a"), || async { 7 });
        assert!(joined.is_leader());
        assert_eq!(joined.wait().await, Ok(7));
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.hits_count(), 0);
    }

    #[tokio::test]
    async fn follower_shares_leader_value_without_invoking_factory() {
        let registry: DedupRegistry<String> = DedupRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let c = calls.clone();
        let leader = registry.join_or_lead(fp("q"), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async move {
                let _ = release_rx.await;
                "answer".to_string()
            }
        });
        let c = calls.clone();
        let follower = registry.join_or_lead(fp("q"), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { "unused".to_string() }
        });

        assert!(!follower.is_leader());
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.hits_count(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(leader.wait().await.unwrap(), "answer");
        assert_eq!(follower.wait().await.unwrap(), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn next_request_after_settlement_leads_again() {
        let registry: DedupRegistry<u32> = DedupRegistry::new();
        registry.join_or_lead(fp("x"), || async { 1 }).wait().await.unwrap();
        let again = registry.join_or_lead(fp("x"), || async { 2 });
        assert!(again.is_leader());
        assert_eq!(again.wait().await, Ok(2));
    }

    #[tokio::test]
    async fn panicking_work_is_reported_and_cleaned_up() {
        let registry: DedupRegistry<u32> = DedupRegistry::new();
        async fn explode() -> u32 {
            panic!("model crashed")
        }

        let joined = registry.join_or_lead(fp("p"), explode);
        let err = joined.wait().await.unwrap_err();
        assert!(err.0.contains("model crashed"));
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn distinct_fingerprints_do_not_share() {
        let registry: DedupRegistry<&'static str> = DedupRegistry::new();
        let a = registry.join_or_lead(fp("a"), || async { "a" });
        let b = registry.join_or_lead(fp("b"), || async { "b" });
        assert!(a.is_leader() && b.is_leader());
        assert_eq!(a.wait().await, Ok("a"));
        assert_eq!(b.wait().await, Ok("b"));
        assert_eq!(registry.hits_count(), 0);
    }
}
