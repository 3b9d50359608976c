//! Transaction manager: the scheduler glued to a backend.
//!
//! # Transaction States
//!
//! ```text
//! ┌────────┐ submit() ┌────────┐ admitted ┌────────┐
//! │ Submit │─────────▶│ Queued │─────────▶│ Active │
//! └────────┘          └────────┘          └────────┘
//!                                              │
//!                                    ┌─────────┴─────────┐
//!                                    │                   │
//!                         commit() / Ok(_)   abort() / Err(_) / timeout
//!                                    │                   │
//!                                    ▼                   ▼
//!                             ┌───────────┐       ┌──────────┐
//!                             │ Committed │       │ Aborted  │
//!                             └───────────┘       └──────────┘
//! ```
//!
//! Leaving `Active` always releases the scope, so the next conflicting
//! request can be admitted.

mod handle;

pub use handle::{TxnCursor, TxnHandle, TxnState};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};
use weft_common::config::SchedulerConfig;
use weft_common::types::{Scope, TxnId};
use weft_storage::Backend;

use crate::error::{TxnError, TxnResult};
use crate::scheduler::{Admission, Scheduler};

/// Runs transactions against one backend.
///
/// One manager per logical session; clones share the scheduler.
#[derive(Clone)]
pub struct TransactionManager {
    scheduler: Scheduler,
    backend: Arc<dyn Backend>,
}

impl TransactionManager {
    /// Creates a manager with default configuration.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_config(backend, SchedulerConfig::default())
    }

    /// Creates a manager with custom configuration.
    pub fn with_config(backend: Arc<dyn Backend>, config: SchedulerConfig) -> Self {
        Self {
            scheduler: Scheduler::with_config(config),
            backend,
        }
    }

    /// Returns the scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns the backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Waits for `scope` and starts a transaction.
    ///
    /// The caller owns the returned handle and must commit or abort it;
    /// dropping it aborts.
    pub async fn begin(&self, scope: Scope) -> TxnResult<TxnHandle> {
        let admission = self.scheduler.submit(scope)?;
        start(Arc::clone(&self.backend), admission).await
    }

    /// Queues a unit of work.
    ///
    /// The request is registered before this returns, so requests enqueued
    /// one after another are admitted in that order. Once admitted, `work`
    /// runs on its own task with a handle to the transaction. The
    /// transaction commits if `work` returns `Ok`, aborts if it returns
    /// `Err`, and aborts with [`TxnError::Timeout`] if it outlives the
    /// configured limit. If the transaction is aborted through a handle
    /// while `work` is still running, `work` is dropped and the completion
    /// resolves with [`TxnError::Inactive`]. The returned [`Completion`]
    /// resolves exactly once.
    pub fn enqueue<T, E, F, Fut>(&self, scope: Scope, work: F) -> Completion<T, E>
    where
        T: Send + 'static,
        E: From<TxnError> + Send + 'static,
        F: FnOnce(TxnHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let admission = match self.scheduler.submit(scope) {
            Ok(admission) => admission,
            Err(e) => {
                let _ = tx.send(Err(e.into()));
                return Completion::new(TxnId::INVALID, rx);
            }
        };

        let id = admission.id();
        let backend = Arc::clone(&self.backend);
        let timeout = self.scheduler.config().timeout();
        tokio::spawn(async move {
            let result = run_admitted(backend, admission, work, timeout).await;
            // The caller may have stopped waiting.
            let _ = tx.send(result);
        });
        Completion::new(id, rx)
    }

    /// Queues a unit of work and waits for it.
    pub async fn run<T, E, F, Fut>(&self, scope: Scope, work: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<TxnError> + Send + 'static,
        F: FnOnce(TxnHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.enqueue(scope, work).await
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("backend", &self.backend.kind())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

async fn start(backend: Arc<dyn Backend>, admission: Admission) -> TxnResult<TxnHandle> {
    let lease = admission.wait().await?;
    // On failure the lease drops here and the scope is released.
    let txn = backend.begin(lease.id(), lease.scope()).await?;
    debug!(txn_id = %lease.id(), scope = %lease.scope(), backend = %backend.kind(), "transaction started");
    Ok(TxnHandle::new(txn, lease))
}

async fn run_admitted<T, E, F, Fut>(
    backend: Arc<dyn Backend>,
    admission: Admission,
    work: F,
    timeout: Option<Duration>,
) -> Result<T, E>
where
    E: From<TxnError>,
    F: FnOnce(TxnHandle) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let handle = start(backend, admission).await?;
    let id = handle.id();
    let work = work(handle.clone());
    // An abort from outside ends the wait even if `work` never returns.
    let guarded = async {
        tokio::select! {
            outcome = work => Some(outcome),
            () = handle.aborted() => None,
        }
    };

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(txn_id = %id, ?limit, "transaction timed out; aborting");
                handle.abort();
                return Err(TxnError::Timeout {
                    txn_id: id,
                    after: limit,
                }
                .into());
            }
        },
        None => guarded.await,
    };
    let Some(outcome) = outcome else {
        debug!(txn_id = %id, "unit of work abandoned after abort");
        return Err(TxnError::Inactive(id).into());
    };

    match outcome {
        Ok(value) => {
            handle.commit().await?;
            Ok(value)
        }
        Err(e) => {
            handle.abort();
            Err(e)
        }
    }
}

/// Resolves with the outcome of an enqueued unit of work.
#[must_use = "a Completion does nothing unless awaited"]
pub struct Completion<T, E = TxnError> {
    id: TxnId,
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> Completion<T, E> {
    fn new(id: TxnId, rx: oneshot::Receiver<Result<T, E>>) -> Self {
        Self { id, rx }
    }

    /// Returns the id assigned at submission, or [`TxnId::INVALID`] if the
    /// request was rejected.
    pub fn id(&self) -> TxnId {
        self.id
    }
}

impl<T, E: From<TxnError>> Future for Completion<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TxnError::cancelled(
                "unit of work ended without reporting",
            )
            .into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> fmt::Debug for Completion<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::Notify;
    use weft_common::types::{Key, Value};
    use weft_storage::{
        BackendKind, BackendTransaction, Cursor, CursorParams, KeyRange, OrderedBackend, Record,
        StorageError, StorageResult, StoreSchema,
    };

    fn backend() -> Arc<dyn Backend> {
        let backend = OrderedBackend::new([StoreSchema::new("a"), StoreSchema::new("b")]);
        backend
            .preload(
                "a",
                (1..=3).map(|n| Record::new(Key::from_u64(n), Value::from_str("v"))),
            )
            .unwrap();
        Arc::new(backend)
    }

    #[tokio::test]
    async fn test_run_commits_on_ok() {
        let tm = TransactionManager::new(backend());
        let written: TxnResult<()> = tm
            .run(Scope::read_write(["a"]), |txn| async move {
                txn.put("a", Record::new(Key::from_u64(9), Value::from_str("nine")))
                    .await
            })
            .await;
        written.unwrap();

        let txn = tm.begin(Scope::read_only(["a"])).await.unwrap();
        assert!(txn.get("a", &Key::from_u64(9)).await.unwrap().is_some());
        txn.commit().await.unwrap();
        assert_eq!(tm.scheduler().running_count(), 0);
    }

    #[tokio::test]
    async fn test_run_aborts_on_err() {
        let tm = TransactionManager::new(backend());
        let result: TxnResult<()> = tm
            .run(Scope::read_write(["a"]), |txn| async move {
                txn.delete("a", &Key::from_u64(1)).await?;
                Err::<(), _>(TxnError::cancelled("changed my mind"))
            })
            .await;
        assert!(matches!(result, Err(TxnError::Cancelled(_))));

        let txn = tm.begin(Scope::read_only(["a"])).await.unwrap();
        assert!(txn.get("a", &Key::from_u64(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_enqueue_order_for_conflicting_writers() {
        let tm = TransactionManager::new(backend());
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut completions = Vec::new();
        for n in 0..4u64 {
            let log = Arc::clone(&log);
            completions.push(tm.enqueue(Scope::read_write(["a"]), move |_txn| async move {
                log.lock().push(("start", n));
                tokio::task::yield_now().await;
                log.lock().push(("end", n));
                Ok::<_, TxnError>(n)
            }));
        }
        for (n, completion) in completions.into_iter().enumerate() {
            assert_eq!(completion.await.unwrap(), n as u64);
        }

        let expected: Vec<_> = (0..4u64).flat_map(|n| [("start", n), ("end", n)]).collect();
        assert_eq!(*log.lock(), expected);
    }

    #[tokio::test]
    async fn test_timeout_aborts_and_releases() {
        let config = SchedulerConfig::new().txn_timeout(Some(Duration::from_millis(20)));
        let tm = TransactionManager::with_config(backend(), config);

        let stuck = tm.enqueue(Scope::read_write(["a"]), |_txn| async move {
            std::future::pending::<()>().await;
            Ok::<_, TxnError>(())
        });
        let next = tm.enqueue(Scope::read_write(["a"]), |_txn| async move { Ok::<_, TxnError>(7) });

        assert!(matches!(stuck.await, Err(TxnError::Timeout { .. })));
        assert_eq!(next.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_backend_error_releases_scope() {
        let tm = TransactionManager::new(backend());
        let result: TxnResult<()> = tm
            .run(Scope::read_write(["a"]), |txn| async move {
                txn.put("b", Record::new(Key::from_u64(1), Value::from_str("x")))
                    .await
            })
            .await;
        assert!(matches!(
            result,
            Err(TxnError::Storage(StorageError::StoreNotInScope(_)))
        ));
        assert_eq!(tm.scheduler().running_count(), 0);
    }

    #[tokio::test]
    async fn test_queue_full_completes_immediately() {
        let config = SchedulerConfig::new().max_queue_depth(1);
        let tm = TransactionManager::with_config(backend(), config);
        let _holder = tm.begin(Scope::read_write(["a"])).await.unwrap();
        let _queued = tm.enqueue(Scope::read_write(["a"]), |_txn| async move { Ok::<_, TxnError>(()) });

        let rejected = tm.enqueue(Scope::read_write(["a"]), |_txn| async move { Ok::<_, TxnError>(()) });
        assert_eq!(rejected.id(), TxnId::INVALID);
        assert!(matches!(rejected.await, Err(TxnError::QueueFull { .. })));
    }

    #[tokio::test]
    async fn test_abort_invalidates_cursors() {
        let tm = TransactionManager::new(backend());
        let txn = tm.begin(Scope::read_only(["a"])).await.unwrap();
        let mut cursor = txn.open_cursor(CursorParams::store("a")).await.unwrap();
        cursor.open().await.unwrap();

        txn.abort();
        assert_eq!(txn.state(), TxnState::Aborted);
        assert!(matches!(cursor.current(), Err(TxnError::Inactive(_))));
        assert!(matches!(cursor.next().await, Err(TxnError::Inactive(_))));
        assert!(matches!(
            txn.open_cursor(CursorParams::store("a")).await,
            Err(TxnError::Inactive(_))
        ));
        assert_eq!(tm.scheduler().running_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_aborts() {
        let tm = TransactionManager::new(backend());
        let txn = tm.begin(Scope::read_write(["a"])).await.unwrap();
        txn.put("a", Record::new(Key::from_u64(5), Value::from_str("five")))
            .await
            .unwrap();
        let clone = txn.clone();
        drop(txn);
        assert_eq!(tm.scheduler().running_count(), 1);
        drop(clone);
        assert_eq!(tm.scheduler().running_count(), 0);

        let reader = tm.begin(Scope::read_only(["a"])).await.unwrap();
        assert!(reader.get("a", &Key::from_u64(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_twice_is_inactive() {
        let tm = TransactionManager::new(backend());
        let txn = tm.begin(Scope::read_only(["a"])).await.unwrap();
        txn.commit().await.unwrap();
        assert!(matches!(txn.commit().await, Err(TxnError::Inactive(_))));
        txn.abort();
        assert_eq!(txn.state(), TxnState::Committed);
    }

    #[tokio::test]
    async fn test_abort_resolves_pending_completion() {
        let config = SchedulerConfig::new().txn_timeout(None);
        let tm = TransactionManager::with_config(backend(), config);

        let (handle_tx, handle_rx) = oneshot::channel();
        let stuck = tm.enqueue(Scope::read_write(["a"]), move |txn| async move {
            let _ = handle_tx.send(txn);
            std::future::pending::<()>().await;
            Ok::<_, TxnError>(())
        });
        let next = tm.enqueue(Scope::read_write(["a"]), |_txn| async move { Ok::<_, TxnError>(3) });

        let txn = handle_rx.await.unwrap();
        txn.abort();

        let limit = Duration::from_secs(5);
        let result = tokio::time::timeout(limit, stuck).await.unwrap();
        assert!(matches!(result, Err(TxnError::Inactive(id)) if id == txn.id()));
        assert_eq!(tokio::time::timeout(limit, next).await.unwrap().unwrap(), 3);
        assert_eq!(tm.scheduler().running_count(), 0);
    }

    /// Holds every commit until the test opens the gate.
    struct GatedBackend {
        inner: Arc<dyn Backend>,
        entered: Arc<Notify>,
        gate: Arc<Notify>,
    }

    struct GatedTxn {
        inner: Arc<dyn BackendTransaction>,
        entered: Arc<Notify>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Backend for GatedBackend {
        fn kind(&self) -> BackendKind {
            self.inner.kind()
        }

        fn is_ready(&self) -> bool {
            self.inner.is_ready()
        }

        fn schema(&self, store: &str) -> Option<StoreSchema> {
            self.inner.schema(store)
        }

        async fn begin(
            &self,
            id: TxnId,
            scope: &Scope,
        ) -> StorageResult<Arc<dyn BackendTransaction>> {
            Ok(Arc::new(GatedTxn {
                inner: self.inner.begin(id, scope).await?,
                entered: Arc::clone(&self.entered),
                gate: Arc::clone(&self.gate),
            }))
        }

        fn close(&self) {
            self.inner.close();
        }
    }

    #[async_trait]
    impl BackendTransaction for GatedTxn {
        fn id(&self) -> TxnId {
            self.inner.id()
        }

        fn scope(&self) -> &Scope {
            self.inner.scope()
        }

        fn is_active(&self) -> bool {
            self.inner.is_active()
        }

        async fn get(&self, store: &str, key: &Key) -> StorageResult<Option<Value>> {
            self.inner.get(store, key).await
        }

        async fn put(&self, store: &str, record: Record) -> StorageResult<()> {
            self.inner.put(store, record).await
        }

        async fn delete(&self, store: &str, key: &Key) -> StorageResult<bool> {
            self.inner.delete(store, key).await
        }

        async fn count(
            &self,
            store: &str,
            index: Option<&str>,
            range: &KeyRange,
        ) -> StorageResult<usize> {
            self.inner.count(store, index, range).await
        }

        async fn open_cursor(&self, params: CursorParams) -> StorageResult<Box<dyn Cursor>> {
            self.inner.open_cursor(params).await
        }

        async fn commit(&self) -> StorageResult<()> {
            self.entered.notify_one();
            self.gate.notified().await;
            self.inner.commit().await
        }

        fn abort(&self) {
            self.inner.abort();
        }
    }

    #[tokio::test]
    async fn test_abort_during_commit_keeps_commit() {
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let tm = TransactionManager::new(Arc::new(GatedBackend {
            inner: backend(),
            entered: Arc::clone(&entered),
            gate: Arc::clone(&gate),
        }));

        let txn = tm.begin(Scope::read_write(["a"])).await.unwrap();
        txn.put("a", Record::new(Key::from_u64(8), Value::from_str("eight")))
            .await
            .unwrap();
        let committing = {
            let txn = txn.clone();
            tokio::spawn(async move { txn.commit().await })
        };
        entered.notified().await;

        // The backend has the commit; an abort now must not undo it.
        txn.abort();
        assert_eq!(txn.state(), TxnState::Active);
        assert_eq!(tm.scheduler().running_count(), 1);

        gate.notify_one();
        committing.await.unwrap().unwrap();
        assert_eq!(txn.state(), TxnState::Committed);
        assert_eq!(tm.scheduler().running_count(), 0);

        let reader = tm.begin(Scope::read_only(["a"])).await.unwrap();
        assert!(reader.get("a", &Key::from_u64(8)).await.unwrap().is_some());
    }
}
