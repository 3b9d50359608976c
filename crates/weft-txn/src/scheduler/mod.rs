//! Scope admission for transaction isolation.
//!
//! The scheduler decides when a transaction may start. Every request names
//! its [`Scope`] up front, so admission is a single decision per request
//! and no transaction ever waits while holding a scope. That rules out
//! deadlock without a wait-for graph.
//!
//! # Admission Rule
//!
//! A request is admitted iff its scope conflicts with
//! - no running transaction, and
//! - no earlier request that is still waiting.
//!
//! The second clause is what keeps conflicting requests in submission order:
//! a late reader can never overtake an earlier writer on the same store. The
//! rule is re-evaluated on every submission and every release.
//!
//! # Scope Compatibility
//!
//! ```text
//!              │ RO        │ RW        │ VC │
//! ─────────────┼───────────┼───────────┼────┤
//!     RO       │ ✓         │ disjoint  │ ✗  │
//!     RW       │ disjoint  │ disjoint  │ ✗  │
//!     VC       │ ✗         │ ✗         │ ✗  │
//! ```
//!
//! All bookkeeping sits behind one mutex, so checking a request and
//! registering it as running is a single indivisible step.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};
use weft_common::config::SchedulerConfig;
use weft_common::types::{Scope, TxnId};

use crate::error::{TxnError, TxnResult};

/// Statistics about the scheduler.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total requests submitted.
    pub submitted: AtomicU64,
    /// Total requests admitted.
    pub admitted: AtomicU64,
    /// Requests that had to queue before admission.
    pub waited: AtomicU64,
    /// Total scopes released.
    pub released: AtomicU64,
    /// Requests abandoned while queued.
    pub withdrawn: AtomicU64,
}

impl SchedulerStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }

    fn record_submit(&self) {
        self.submitted.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_admit(&self) {
        self.admitted.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_wait(&self) {
        self.waited.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_release(&self) {
        self.released.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_withdraw(&self) {
        self.withdrawn.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// A queued request.
struct Waiter {
    id: TxnId,
    scope: Scope,
    notify: oneshot::Sender<()>,
}

struct SchedulerState {
    next_id: TxnId,
    running: BTreeMap<TxnId, Scope>,
    queue: VecDeque<Waiter>,
}

impl SchedulerState {
    fn conflicts_with_running(&self, scope: &Scope) -> bool {
        self.running.values().any(|s| s.conflicts_with(scope))
    }
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    config: SchedulerConfig,
    stats: SchedulerStats,
}

/// The transaction scheduler.
///
/// Cheap to clone; clones share the same queue. Create one per logical
/// session.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Creates a scheduler with default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a scheduler with custom configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedulerState {
                    next_id: TxnId::MIN,
                    running: BTreeMap::new(),
                    queue: VecDeque::new(),
                }),
                config,
                stats: SchedulerStats::new(),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Registers a request for `scope`.
    ///
    /// The request's place in line is fixed when this returns. Await
    /// [`Admission::wait`] to obtain the scope.
    pub fn submit(&self, scope: Scope) -> TxnResult<Admission> {
        let mut state = self.inner.state.lock();

        let blocked = state.conflicts_with_running(&scope)
            || state.queue.iter().any(|w| w.scope.conflicts_with(&scope));

        let depth = self.inner.config.max_queue_depth;
        if blocked && depth > 0 && state.queue.len() >= depth {
            return Err(TxnError::QueueFull { depth });
        }

        let id = state.next_id;
        state.next_id = id.next();
        self.inner.stats.record_submit();

        let notify = if blocked {
            let (tx, rx) = oneshot::channel();
            trace!(txn_id = %id, scope = %scope, queued = state.queue.len(), "request queued");
            state.queue.push_back(Waiter {
                id,
                scope: scope.clone(),
                notify: tx,
            });
            self.inner.stats.record_wait();
            Some(rx)
        } else {
            debug!(txn_id = %id, scope = %scope, "request admitted");
            state.running.insert(id, scope.clone());
            self.inner.stats.record_admit();
            None
        };

        Ok(Admission {
            id,
            scope,
            notify,
            scheduler: self.clone(),
            armed: true,
        })
    }

    /// Releases a running scope and admits whatever it was blocking.
    fn release(&self, id: TxnId) {
        let mut state = self.inner.state.lock();
        if state.running.remove(&id).is_some() {
            self.inner.stats.record_release();
            debug!(txn_id = %id, "scope released");
            self.pump(&mut state);
        }
    }

    /// Drops a request whose admission handle went away.
    fn withdraw(&self, id: TxnId) {
        let mut state = self.inner.state.lock();
        if let Some(pos) = state.queue.iter().position(|w| w.id == id) {
            state.queue.remove(pos);
            self.inner.stats.record_withdraw();
            trace!(txn_id = %id, "queued request withdrawn");
            self.pump(&mut state);
        } else if state.running.remove(&id).is_some() {
            // Admitted but never claimed.
            self.inner.stats.record_release();
            trace!(txn_id = %id, "unclaimed admission released");
            self.pump(&mut state);
        }
    }

    /// Admits every queued request the admission rule now allows.
    fn pump(&self, state: &mut SchedulerState) {
        let mut still_waiting: Vec<Scope> = Vec::new();
        let mut i = 0;
        while i < state.queue.len() {
            let scope = &state.queue[i].scope;
            let blocked = state.conflicts_with_running(scope)
                || still_waiting.iter().any(|s| s.conflicts_with(scope));
            if blocked {
                still_waiting.push(scope.clone());
                i += 1;
                continue;
            }

            let Some(waiter) = state.queue.remove(i) else {
                break;
            };
            if waiter.notify.send(()).is_err() {
                // The admission handle is already gone.
                self.inner.stats.record_withdraw();
                continue;
            }
            debug!(txn_id = %waiter.id, scope = %waiter.scope, "queued request admitted");
            state.running.insert(waiter.id, waiter.scope);
            self.inner.stats.record_admit();
        }
    }

    /// Returns statistics about the scheduler.
    pub fn stats(&self) -> &SchedulerStats {
        &self.inner.stats
    }

    /// Returns the number of running transactions.
    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    /// Returns the number of queued requests.
    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Returns true if the transaction holds its scope.
    pub fn is_running(&self, id: TxnId) -> bool {
        self.inner.state.lock().running.contains_key(&id)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Scheduler")
            .field("running", &state.running.len())
            .field("queued", &state.queue.len())
            .finish()
    }
}

/// A submitted request waiting for its scope.
///
/// Dropping it withdraws the request, or releases the scope if it was
/// already admitted.
#[must_use = "dropping an Admission withdraws the request"]
pub struct Admission {
    id: TxnId,
    scope: Scope,
    notify: Option<oneshot::Receiver<()>>,
    scheduler: Scheduler,
    armed: bool,
}

impl Admission {
    /// Returns the identifier assigned at submission.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the requested scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Returns true if the scope was granted at submission.
    pub fn is_admitted(&self) -> bool {
        self.notify.is_none()
    }

    /// Waits until the scope is granted.
    pub async fn wait(mut self) -> TxnResult<ScopeLease> {
        if let Some(notify) = self.notify.take() {
            notify
                .await
                .map_err(|_| TxnError::cancelled("scheduler dropped the request"))?;
        }
        self.armed = false;
        Ok(ScopeLease {
            id: self.id,
            scope: self.scope.clone(),
            scheduler: self.scheduler.clone(),
            released: AtomicBool::new(false),
        })
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if self.armed {
            self.scheduler.withdraw(self.id);
        }
    }
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admission")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("admitted", &self.is_admitted())
            .finish()
    }
}

/// A granted scope. Released on [`ScopeLease::release`] or drop.
pub struct ScopeLease {
    id: TxnId,
    scope: Scope,
    scheduler: Scheduler,
    released: AtomicBool,
}

impl ScopeLease {
    /// Returns the transaction id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the granted scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Releases the scope. Idempotent.
    pub fn release(&self) {
        if !self.released.swap(true, AtomicOrdering::AcqRel) {
            self.scheduler.release(self.id);
        }
    }

    /// Returns true once released.
    pub fn is_released(&self) -> bool {
        self.released.load(AtomicOrdering::Acquire)
    }
}

impl Drop for ScopeLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ScopeLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeLease")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use weft_common::types::TxnMode;

    async fn granted(admission: Admission) -> ScopeLease {
        tokio::time::timeout(Duration::from_secs(1), admission.wait())
            .await
            .expect("admission should be granted")
            .unwrap()
    }

    #[tokio::test]
    async fn test_disjoint_writers_run_together() {
        let s = Scheduler::new();
        let a = s.submit(Scope::read_write(["a"])).unwrap();
        let b = s.submit(Scope::read_write(["b"])).unwrap();

        assert!(a.is_admitted());
        assert!(b.is_admitted());
        assert_eq!(s.running_count(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_writers_serialize() {
        let s = Scheduler::new();
        let first = granted(s.submit(Scope::read_write(["a", "b"])).unwrap()).await;
        let second = s.submit(Scope::read_write(["b"])).unwrap();

        assert!(!second.is_admitted());
        assert_eq!(s.queued_count(), 1);
        assert!(first.id() < second.id());

        first.release();
        let second = granted(second).await;
        assert!(s.is_running(second.id()));
        assert!(!s.is_running(first.id()));
    }

    #[tokio::test]
    async fn test_readers_share() {
        let s = Scheduler::new();
        let r1 = s.submit(Scope::read_only(["a"])).unwrap();
        let r2 = s.submit(Scope::read_only(["a", "b"])).unwrap();
        assert!(r1.is_admitted() && r2.is_admitted());
    }

    #[tokio::test]
    async fn test_fifo_blocks_late_reader() {
        let s = Scheduler::new();
        let reader = granted(s.submit(Scope::read_only(["a"])).unwrap()).await;
        let writer = s.submit(Scope::read_write(["a"])).unwrap();
        // Compatible with the running reader, but the writer is ahead of it.
        let late = s.submit(Scope::read_only(["a"])).unwrap();

        assert!(!writer.is_admitted());
        assert!(!late.is_admitted());

        reader.release();
        let writer = granted(writer).await;
        assert_eq!(s.running_count(), 1);
        assert_eq!(s.queued_count(), 1);

        drop(writer);
        granted(late).await;
    }

    #[tokio::test]
    async fn test_non_conflicting_request_passes_queue() {
        let s = Scheduler::new();
        let _w = granted(s.submit(Scope::read_write(["a"])).unwrap()).await;
        let blocked = s.submit(Scope::read_write(["a"])).unwrap();
        let other = s.submit(Scope::read_write(["c"])).unwrap();

        assert!(!blocked.is_admitted());
        assert!(other.is_admitted());
    }

    #[tokio::test]
    async fn test_version_change_is_exclusive() {
        let s = Scheduler::new();
        let reader = granted(s.submit(Scope::read_only(["a"])).unwrap()).await;
        let vc = s.submit(Scope::new(["z"], TxnMode::VersionChange)).unwrap();
        let other = s.submit(Scope::read_only(["q"])).unwrap();

        assert!(!vc.is_admitted());
        assert!(!other.is_admitted());

        drop(reader);
        let vc = granted(vc).await;
        assert_eq!(s.queued_count(), 1);
        vc.release();
        granted(other).await;
    }

    #[tokio::test]
    async fn test_dropped_admission_is_withdrawn() {
        let s = Scheduler::new();
        let w = granted(s.submit(Scope::read_write(["a"])).unwrap()).await;
        let abandoned = s.submit(Scope::read_write(["a"])).unwrap();
        let next = s.submit(Scope::read_only(["a"])).unwrap();

        drop(abandoned);
        assert_eq!(s.queued_count(), 1);
        assert_eq!(s.stats().withdrawn.load(AtomicOrdering::Relaxed), 1);

        w.release();
        granted(next).await;
    }

    #[tokio::test]
    async fn test_unclaimed_admission_releases_scope() {
        let s = Scheduler::new();
        let admitted = s.submit(Scope::read_write(["a"])).unwrap();
        assert!(admitted.is_admitted());
        drop(admitted);
        assert_eq!(s.running_count(), 0);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let s = Scheduler::new();
        let lease = granted(s.submit(Scope::read_write(["a"])).unwrap()).await;
        lease.release();
        lease.release();
        drop(lease);
        assert_eq!(s.stats().released.load(AtomicOrdering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_queue_depth_limit() {
        let s = Scheduler::with_config(SchedulerConfig::new().max_queue_depth(1));
        let _w = s.submit(Scope::read_write(["a"])).unwrap();
        let _queued = s.submit(Scope::read_write(["a"])).unwrap();

        let err = s.submit(Scope::read_write(["a"])).unwrap_err();
        assert!(matches!(err, TxnError::QueueFull { depth: 1 }));

        // Requests that need no queueing are unaffected.
        assert!(s.submit(Scope::read_write(["b"])).is_ok());
    }

    #[test]
    fn test_stats() {
        let s = Scheduler::new();
        let a = s.submit(Scope::read_write(["a"])).unwrap();
        let b = s.submit(Scope::read_write(["a"])).unwrap();
        assert_eq!(s.stats().submitted.load(AtomicOrdering::Relaxed), 2);
        assert_eq!(s.stats().admitted.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(s.stats().waited.load(AtomicOrdering::Relaxed), 1);
        drop(b);
        drop(a);
        assert_eq!(s.running_count(), 0);
        assert_eq!(s.queued_count(), 0);
    }
}
