//! Query errors.
//!
//! Every failure of [`QueryExecutor::execute`](crate::QueryExecutor::execute)
//! names the phase it happened in, so callers can tell a busy scheduler from
//! a missing index from a backend that broke mid-join.

use thiserror::Error;
use weft_common::error::{ErrorClass, ErrorCode};
use weft_common::types::TxnId;
use weft_txn::TxnError;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while executing a query or pulling its results.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The query description itself is unusable.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The transaction could not be admitted or started.
    #[error("admission failed: {0}")]
    Admission(#[source] TxnError),

    /// A participant cursor could not be opened.
    #[error("failed to open cursor {participant}: {source}")]
    CursorOpen {
        /// Position of the participant in the query.
        participant: usize,
        /// Underlying error.
        #[source]
        source: TxnError,
    },

    /// The join solver failed while producing rows.
    #[error("join failed: {0}")]
    Join(#[source] TxnError),

    /// The transaction could not be committed after the last row.
    #[error("commit failed: {0}")]
    Commit(#[source] TxnError),

    /// The result sequence was pulled after its transaction ended.
    #[error("result sequence of transaction {0} is closed")]
    Inactive(TxnId),
}

impl QueryError {
    /// Creates a new invalid query error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Returns the phase of query execution that failed.
    pub fn phase(&self) -> &'static str {
        match self {
            QueryError::InvalidQuery(_) => "validation",
            QueryError::Admission(_) => "admission",
            QueryError::CursorOpen { .. } => "cursor open",
            QueryError::Join(_) => "join",
            QueryError::Commit(_) => "commit",
            QueryError::Inactive(_) => "pull",
        }
    }

    /// Returns the underlying transaction error, if any.
    pub fn txn_error(&self) -> Option<&TxnError> {
        match self {
            QueryError::Admission(e)
            | QueryError::CursorOpen { source: e, .. }
            | QueryError::Join(e)
            | QueryError::Commit(e) => Some(e),
            QueryError::InvalidQuery(_) | QueryError::Inactive(_) => None,
        }
    }

    /// Returns the stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            QueryError::InvalidQuery(_) => ErrorCode::InvalidQuery,
            QueryError::Inactive(_) => ErrorCode::SequenceClosed,
            _ => self
                .txn_error()
                .map_or(ErrorCode::Internal, TxnError::code),
        }
    }

    /// Returns how the caller should treat the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            QueryError::InvalidQuery(_) | QueryError::Inactive(_) => ErrorClass::ProtocolMisuse,
            _ => self
                .txn_error()
                .map_or(ErrorClass::Backend, TxnError::class),
        }
    }

    /// Returns true for programmer errors.
    pub fn is_misuse(&self) -> bool {
        self.class().is_misuse()
    }
}

/// Errors coming straight out of a unit of work are attributed to the join.
impl From<TxnError> for QueryError {
    fn from(e: TxnError) -> Self {
        match e {
            TxnError::Inactive(id) => QueryError::Inactive(id),
            e => QueryError::Join(e),
        }
    }
}
