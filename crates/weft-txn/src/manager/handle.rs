//! Transaction handles and liveness-guarded cursors.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};
use weft_common::types::{Key, Scope, TxnId, TxnMode, Value};
use weft_storage::{
    AdvanceTarget, BackendTransaction, Cursor, CursorEntry, CursorParams, KeyRange, Record,
};

use crate::error::{TxnError, TxnResult};
use crate::scheduler::ScopeLease;

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Transaction is running and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

impl TxnState {
    /// Returns true if the transaction can perform operations.
    pub fn is_active(&self) -> bool {
        *self == TxnState::Active
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnState::Active => write!(f, "Active"),
            TxnState::Committed => write!(f, "Committed"),
            TxnState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Shared flag every cursor of a transaction checks before touching the
/// backend. Cleared the moment the transaction ends.
#[derive(Debug, Clone)]
struct Liveness(Arc<AtomicBool>);

impl Liveness {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    fn check(&self, id: TxnId) -> TxnResult<()> {
        if self.0.load(AtomicOrdering::Acquire) {
            Ok(())
        } else {
            Err(TxnError::Inactive(id))
        }
    }

    fn end(&self) {
        self.0.store(false, AtomicOrdering::Release);
    }
}

struct Status {
    state: TxnState,
    committing: bool,
}

struct HandleInner {
    id: TxnId,
    txn: Arc<dyn BackendTransaction>,
    lease: ScopeLease,
    status: Mutex<Status>,
    live: Liveness,
    aborted: watch::Sender<bool>,
}

impl HandleInner {
    fn state(&self) -> TxnState {
        self.status.lock().state
    }

    /// Marks a backend commit as in flight. Aborts are refused until the
    /// returned guard drops.
    fn start_commit(&self) -> TxnResult<CommitGuard<'_>> {
        let mut status = self.status.lock();
        if !status.state.is_active() || status.committing {
            return Err(TxnError::Inactive(self.id));
        }
        status.committing = true;
        Ok(CommitGuard(self))
    }

    fn finish(&self, to: TxnState) -> bool {
        let mut status = self.status.lock();
        if !status.state.is_active() || (to == TxnState::Aborted && status.committing) {
            return false;
        }
        status.state = to;
        status.committing = false;
        self.live.end();
        true
    }

    fn abort(&self) {
        if self.finish(TxnState::Aborted) {
            self.txn.abort();
            self.lease.release();
            self.aborted.send_replace(true);
            debug!(txn_id = %self.id, "transaction aborted");
        } else if self.status.lock().committing {
            debug!(txn_id = %self.id, "abort ignored; commit in flight");
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if self.state().is_active() {
            warn!(txn_id = %self.id, "transaction dropped while active; aborting");
            self.abort();
        }
    }
}

struct CommitGuard<'a>(&'a HandleInner);

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.0.status.lock().committing = false;
    }
}

/// A running transaction.
///
/// Cheap to clone; all clones refer to the same transaction. Dropping the
/// last clone of an active transaction aborts it.
#[derive(Clone)]
pub struct TxnHandle {
    inner: Arc<HandleInner>,
}

impl TxnHandle {
    pub(crate) fn new(txn: Arc<dyn BackendTransaction>, lease: ScopeLease) -> Self {
        let (aborted, _) = watch::channel(false);
        Self {
            inner: Arc::new(HandleInner {
                id: lease.id(),
                txn,
                lease,
                status: Mutex::new(Status {
                    state: TxnState::Active,
                    committing: false,
                }),
                live: Liveness::new(),
                aborted,
            }),
        }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TxnId {
        self.inner.id
    }

    /// Returns the granted scope.
    pub fn scope(&self) -> &Scope {
        self.inner.lease.scope()
    }

    /// Returns the access mode.
    pub fn mode(&self) -> TxnMode {
        self.scope().mode()
    }

    /// Returns the current state.
    pub fn state(&self) -> TxnState {
        self.inner.state()
    }

    /// Returns true while the transaction can perform operations.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    fn check(&self) -> TxnResult<()> {
        self.inner.live.check(self.inner.id)
    }

    /// Reads one record value.
    pub async fn get(&self, store: &str, key: &Key) -> TxnResult<Option<Value>> {
        self.check()?;
        Ok(self.inner.txn.get(store, key).await?)
    }

    /// Inserts or replaces a record.
    pub async fn put(&self, store: &str, record: Record) -> TxnResult<()> {
        self.check()?;
        Ok(self.inner.txn.put(store, record).await?)
    }

    /// Deletes a record. Returns true if it existed.
    pub async fn delete(&self, store: &str, key: &Key) -> TxnResult<bool> {
        self.check()?;
        Ok(self.inner.txn.delete(store, key).await?)
    }

    /// Counts rows of a store or index within a range.
    pub async fn count(&self, store: &str, index: Option<&str>, range: &KeyRange) -> TxnResult<usize> {
        self.check()?;
        Ok(self.inner.txn.count(store, index, range).await?)
    }

    /// Opens a cursor bound to this transaction. The cursor still has to be
    /// positioned with [`TxnCursor::open`].
    pub async fn open_cursor(&self, params: CursorParams) -> TxnResult<TxnCursor> {
        self.check()?;
        let cursor = self.inner.txn.open_cursor(params).await?;
        Ok(TxnCursor {
            id: self.inner.id,
            live: self.inner.live.clone(),
            cursor,
        })
    }

    /// Commits the transaction and releases its scope.
    ///
    /// A failed commit aborts the transaction. While the backend commit is in
    /// flight, [`abort`](Self::abort) is ignored, so a commit the backend
    /// accepted is never reported as aborted.
    pub async fn commit(&self) -> TxnResult<()> {
        self.check()?;
        let committing = self.inner.start_commit()?;
        match self.inner.txn.commit().await {
            Ok(()) => {
                self.inner.finish(TxnState::Committed);
                self.inner.lease.release();
                debug!(txn_id = %self.inner.id, "transaction committed");
                Ok(())
            }
            Err(e) => {
                drop(committing);
                warn!(txn_id = %self.inner.id, error = %e, "commit failed; aborting");
                self.inner.abort();
                Err(e.into())
            }
        }
    }

    /// Aborts the transaction.
    ///
    /// Synchronous: when this returns, every cursor of the transaction fails
    /// fast and the scope is released. Idempotent.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Resolves once the transaction has been aborted.
    pub(crate) async fn aborted(&self) {
        let mut rx = self.inner.aborted.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|aborted| *aborted).await;
    }
}

impl fmt::Debug for TxnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnHandle")
            .field("id", &self.inner.id)
            .field("scope", self.scope())
            .field("state", &self.state())
            .finish()
    }
}

/// A cursor that stops working as soon as its transaction ends.
pub struct TxnCursor {
    id: TxnId,
    live: Liveness,
    cursor: Box<dyn Cursor>,
}

impl TxnCursor {
    /// Returns the owning transaction's id.
    pub fn txn_id(&self) -> TxnId {
        self.id
    }

    /// Returns the parameters the cursor was opened with.
    pub fn params(&self) -> &CursorParams {
        self.cursor.params()
    }

    /// Positions the cursor on the first row of its range.
    pub async fn open(&mut self) -> TxnResult<Option<CursorEntry>> {
        self.live.check(self.id)?;
        Ok(self.cursor.open().await?)
    }

    /// Moves the cursor.
    pub async fn advance(&mut self, target: AdvanceTarget) -> TxnResult<Option<CursorEntry>> {
        self.live.check(self.id)?;
        Ok(self.cursor.advance(target).await?)
    }

    /// Shorthand for `advance(AdvanceTarget::Next)`.
    pub async fn next(&mut self) -> TxnResult<Option<CursorEntry>> {
        self.advance(AdvanceTarget::Next).await
    }

    /// Returns the row the cursor sits on, opening it first if it was never
    /// opened. `None` if the cursor is exhausted.
    pub async fn resume(&mut self) -> TxnResult<Option<CursorEntry>> {
        self.live.check(self.id)?;
        if !self.cursor.is_open() {
            return Ok(self.cursor.open().await?);
        }
        if self.cursor.is_exhausted() {
            return Ok(None);
        }
        Ok(Some(self.cursor.current()?))
    }

    /// Returns the current row.
    pub fn current(&self) -> TxnResult<CursorEntry> {
        self.live.check(self.id)?;
        Ok(self.cursor.current()?)
    }

    /// Returns true once the cursor has run past its range.
    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_exhausted()
    }

    /// Closes the cursor.
    pub fn close(&mut self) {
        self.cursor.close();
    }
}

impl fmt::Debug for TxnCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnCursor")
            .field("txn_id", &self.id)
            .field("params", self.cursor.params())
            .finish()
    }
}
