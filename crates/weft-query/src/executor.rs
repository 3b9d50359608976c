//! Query execution.
//!
//! ```text
//!   execute(spec)
//!     │ validate
//!     ▼
//!   Scheduler ── admit read-only scope over every participant store
//!     │
//!     ▼
//!   open + position one cursor per participant
//!     │
//!     ▼
//!   JoinSolver ──▶ ResultSequence ── next() … end: commit
//!                                 └─ close():     abort
//! ```
//!
//! Each `execute` runs exactly one transaction, owned by the returned
//! [`ResultSequence`]. The scope is held until the sequence is exhausted,
//! closed or dropped.

use std::fmt;

use tracing::{debug, warn};
use weft_common::config::{QueryConfig, StreamerConfig, WeftConfig};
use weft_common::types::TxnId;
use weft_storage::CursorParams;
use weft_txn::{TransactionManager, TxnCursor, TxnError, TxnHandle};

use crate::error::{QueryError, QueryResult};
use crate::join::{
    JoinRow, JoinSolver, NestedLoopSolver, ScanSolver, SolverInput, ZigZagSolver,
};
use crate::query::{CombineRule, QuerySpec};

/// Runs queries against a transaction manager.
#[derive(Clone)]
pub struct QueryExecutor {
    manager: TransactionManager,
    streamer: StreamerConfig,
    query: QueryConfig,
}

impl QueryExecutor {
    /// Creates an executor with default settings.
    pub fn new(manager: TransactionManager) -> Self {
        Self::with_config(manager, StreamerConfig::default(), QueryConfig::default())
    }

    /// Creates an executor with explicit settings.
    pub fn with_config(
        manager: TransactionManager,
        streamer: StreamerConfig,
        query: QueryConfig,
    ) -> Self {
        Self {
            manager,
            streamer,
            query,
        }
    }

    /// Creates an executor from the `streamer` and `query` sections of a
    /// configuration.
    pub fn from_config(manager: TransactionManager, config: &WeftConfig) -> Self {
        Self::with_config(manager, config.streamer.clone(), config.query.clone())
    }

    /// Returns the transaction manager.
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Executes a query.
    ///
    /// Resolves once the transaction is admitted and every cursor is
    /// positioned. Rows are produced lazily by the returned sequence.
    pub async fn execute(&self, spec: &QuerySpec) -> QueryResult<ResultSequence> {
        spec.validate()?;

        let txn = self
            .manager
            .begin(spec.scope())
            .await
            .map_err(QueryError::Admission)?;
        debug!(
            txn_id = %txn.id(),
            rule = spec.rule.name(),
            participants = spec.iterators.len(),
            "query admitted"
        );

        let solver = match self.prepare(&txn, spec).await {
            Ok(solver) => solver,
            Err(e) => {
                warn!(txn_id = %txn.id(), phase = e.phase(), error = %e, "query failed to start");
                txn.abort();
                return Err(e);
            }
        };

        let limit = spec.limit.or(self.query.default_limit);
        Ok(ResultSequence::new(txn, solver, spec.offset, limit))
    }

    async fn prepare(
        &self,
        txn: &TxnHandle,
        spec: &QuerySpec,
    ) -> QueryResult<Box<dyn JoinSolver>> {
        let mut cursors = Vec::with_capacity(spec.iterators.len());
        for (participant, it) in spec.iterators.iter().enumerate() {
            cursors.push(open_participant(txn, participant, it.params.clone()).await?);
        }

        if !matches!(spec.rule, CombineRule::Custom(_)) && cursors.len() == 1 {
            if let Some(cursor) = cursors.pop() {
                return Ok(Box::new(ScanSolver::new(cursor, &self.streamer)));
            }
        }

        match &spec.rule {
            CombineRule::Intersect => Ok(Box::new(ZigZagSolver::new(cursors)?)),
            CombineRule::CrossProbe => Ok(Box::new(NestedLoopSolver::new(
                txn.clone(),
                cursors,
                &self.streamer,
            )?)),
            CombineRule::Custom(factory) => factory.create(SolverInput {
                txn: txn.clone(),
                cursors,
                streamer: self.streamer.clone(),
            }),
        }
    }
}

impl fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("manager", &self.manager)
            .field("streamer", &self.streamer)
            .field("query", &self.query)
            .finish()
    }
}

async fn open_participant(
    txn: &TxnHandle,
    participant: usize,
    params: CursorParams,
) -> QueryResult<TxnCursor> {
    let failed = |source: TxnError| QueryError::CursorOpen {
        participant,
        source,
    };
    let mut cursor = txn.open_cursor(params).await.map_err(failed)?;
    cursor.open().await.map_err(failed)?;
    Ok(cursor)
}

/// Lifecycle of a [`ResultSequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    /// Rows may still be pulled.
    Open,
    /// All rows were delivered and the transaction committed.
    Exhausted,
    /// The sequence was closed or its transaction ended early.
    Closed,
}

/// The lazy result of a query, bound to the query's transaction.
pub struct ResultSequence {
    txn: TxnHandle,
    solver: Box<dyn JoinSolver>,
    state: SequenceState,
    skip: usize,
    remaining: Option<usize>,
    delivered: usize,
}

impl ResultSequence {
    fn new(
        txn: TxnHandle,
        solver: Box<dyn JoinSolver>,
        offset: usize,
        limit: Option<usize>,
    ) -> Self {
        Self {
            txn,
            solver,
            state: SequenceState::Open,
            skip: offset,
            remaining: limit,
            delivered: 0,
        }
    }

    /// Returns the id of the transaction the sequence reads in.
    pub fn txn_id(&self) -> TxnId {
        self.txn.id()
    }

    /// Returns the current state.
    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// Returns the name of the solver producing rows.
    pub fn solver_name(&self) -> &'static str {
        self.solver.name()
    }

    /// Returns the number of rows delivered so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Pulls the next row.
    ///
    /// Returns `Ok(None)` at the end. Reaching the end commits the
    /// transaction, and every later pull returns `Ok(None)` again without
    /// touching it: the end marker belongs to the sequence, not to the
    /// transaction. Pulling from a closed sequence, or from one whose
    /// transaction was aborted before the end, is [`QueryError::Inactive`].
    pub async fn next(&mut self) -> QueryResult<Option<JoinRow>> {
        match self.state {
            SequenceState::Exhausted => return Ok(None),
            SequenceState::Closed => return Err(QueryError::Inactive(self.txn.id())),
            SequenceState::Open => {}
        }
        if !self.txn.is_active() {
            self.shut();
            return Err(QueryError::Inactive(self.txn.id()));
        }
        if self.remaining == Some(0) {
            return self.finish().await;
        }

        loop {
            match self.solver.next_match().await {
                Ok(Some(_)) if self.skip > 0 => self.skip -= 1,
                Ok(Some(row)) => {
                    if let Some(remaining) = self.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    self.delivered += 1;
                    return Ok(Some(row));
                }
                Ok(None) => return self.finish().await,
                Err(TxnError::Inactive(id)) => {
                    self.shut();
                    return Err(QueryError::Inactive(id));
                }
                Err(e) => {
                    warn!(txn_id = %self.txn.id(), solver = self.solver.name(), error = %e, "join failed; aborting");
                    self.shut();
                    return Err(QueryError::Join(e));
                }
            }
        }
    }

    /// Pulls every remaining row.
    pub async fn collect(mut self) -> QueryResult<Vec<JoinRow>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Closes the sequence. An unfinished transaction is aborted and its
    /// scope released.
    pub fn close(&mut self) {
        if self.state == SequenceState::Open {
            debug!(txn_id = %self.txn.id(), delivered = self.delivered, "result sequence closed");
            self.shut();
        }
        self.state = SequenceState::Closed;
    }

    async fn finish(&mut self) -> QueryResult<Option<JoinRow>> {
        self.solver.close();
        match self.txn.commit().await {
            Ok(()) => {
                self.state = SequenceState::Exhausted;
                debug!(txn_id = %self.txn.id(), delivered = self.delivered, "result sequence exhausted");
                Ok(None)
            }
            Err(TxnError::Inactive(id)) => {
                self.state = SequenceState::Closed;
                Err(QueryError::Inactive(id))
            }
            Err(e) => {
                self.state = SequenceState::Closed;
                Err(QueryError::Commit(e))
            }
        }
    }

    fn shut(&mut self) {
        self.state = SequenceState::Closed;
        self.solver.close();
        self.txn.abort();
    }
}

impl Drop for ResultSequence {
    fn drop(&mut self) {
        if self.state == SequenceState::Open {
            self.shut();
        }
    }
}

impl fmt::Debug for ResultSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSequence")
            .field("txn_id", &self.txn.id())
            .field("solver", &self.solver.name())
            .field("state", &self.state)
            .field("delivered", &self.delivered)
            .finish()
    }
}
