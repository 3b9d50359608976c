//! Join solvers.
//!
//! A solver combines the cursors of one query into a single ordered stream
//! of matches. Solvers pull from their cursors on demand: nothing is read
//! until [`JoinSolver::next_match`] is called, and each call reads only as
//! far as the next match.
//!
//! | Solver                | Combination       | Requirement                    |
//! |-----------------------|-------------------|--------------------------------|
//! | [`ScanSolver`]        | single cursor     | none                           |
//! | [`ZigZagSolver`]      | intersection      | all cursors share a direction  |
//! | [`NestedLoopSolver`]  | outer × probes    | none                           |

mod nested_loop;
mod scan;
mod zigzag;

pub use nested_loop::NestedLoopSolver;
pub use scan::ScanSolver;
pub use zigzag::ZigZagSolver;

use async_trait::async_trait;
use weft_common::config::StreamerConfig;
use weft_common::types::{Key, Value};
use weft_txn::{TxnCursor, TxnHandle, TxnResult};

use crate::error::QueryResult;

/// One match produced by a solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRow {
    /// The key the participants matched on.
    pub key: Key,
    /// Primary key contributed by each participant, in participant order.
    pub primary_keys: Vec<Key>,
    /// Value of participant 0's record, unless it is keys-only.
    pub value: Option<Value>,
}

impl JoinRow {
    /// Returns participant 0's primary key.
    pub fn primary_key(&self) -> Option<&Key> {
        self.primary_keys.first()
    }
}

/// Produces the matches of a query.
#[async_trait]
pub trait JoinSolver: Send {
    /// Returns the solver's name, for logs.
    fn name(&self) -> &'static str;

    /// Returns the next match, or `None` once the join is complete.
    ///
    /// After `None` every further call also returns `None`.
    async fn next_match(&mut self) -> TxnResult<Option<JoinRow>>;

    /// Releases the solver's cursors.
    fn close(&mut self) {}
}

/// Everything a solver is built from.
pub struct SolverInput {
    /// The query's transaction.
    pub txn: TxnHandle,
    /// One opened cursor per participant, in query order.
    pub cursors: Vec<TxnCursor>,
    /// Read-ahead settings for solvers that stream.
    pub streamer: StreamerConfig,
}

/// Builds a caller-selected solver.
pub trait SolverFactory: Send + Sync {
    /// Returns the strategy name, for logs.
    fn name(&self) -> &str;

    /// Builds the solver for one query execution.
    fn create(&self, input: SolverInput) -> QueryResult<Box<dyn JoinSolver>>;
}
