//! Transaction errors.

use std::time::Duration;

use thiserror::Error;
use weft_common::error::{ErrorClass, ErrorCode};
use weft_common::types::TxnId;
use weft_storage::StorageError;

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;

/// Errors raised by the scheduler, the transaction manager and handles.
#[derive(Debug, Clone, Error)]
pub enum TxnError {
    /// The backend rejected an operation.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The transaction already committed or aborted.
    #[error("transaction {0} is no longer active")]
    Inactive(TxnId),

    /// The unit of work held its scope too long and was aborted.
    #[error("transaction {txn_id} timed out after {after:?}")]
    Timeout {
        /// The aborted transaction.
        txn_id: TxnId,
        /// The configured limit.
        after: Duration,
    },

    /// Too many requests are waiting for admission.
    #[error("scheduler queue is full ({depth} waiting)")]
    QueueFull {
        /// Configured queue depth limit.
        depth: usize,
    },

    /// The request was abandoned before it completed.
    #[error("transaction request cancelled: {0}")]
    Cancelled(String),
}

impl TxnError {
    /// Creates a new cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Returns the stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            TxnError::Storage(e) => e.code(),
            TxnError::Inactive(_) => ErrorCode::TransactionInactive,
            TxnError::Timeout { .. } => ErrorCode::Timeout,
            TxnError::QueueFull { .. } => ErrorCode::QueueFull,
            TxnError::Cancelled(_) => ErrorCode::Cancelled,
        }
    }

    /// Returns how the caller should treat the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            TxnError::Storage(e) => e.class(),
            TxnError::Inactive(_) => ErrorClass::ProtocolMisuse,
            TxnError::Timeout { .. } => ErrorClass::Timeout,
            TxnError::QueueFull { .. } => ErrorClass::Scheduling,
            TxnError::Cancelled(_) => ErrorClass::Cancelled,
        }
    }

    /// Returns true for programmer errors.
    pub fn is_misuse(&self) -> bool {
        self.class().is_misuse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_keep_their_class() {
        let err: TxnError = StorageError::CursorNotOpen.into();
        assert!(err.is_misuse());
        assert_eq!(err.code(), ErrorCode::CursorNotOpen);
        assert_eq!(err.to_string(), "cursor is not open");

        let err: TxnError = StorageError::backend("io").into();
        assert_eq!(err.class(), ErrorClass::Backend);
    }

    #[test]
    fn test_error_display() {
        let err = TxnError::Timeout {
            txn_id: TxnId::new(4),
            after: Duration::from_millis(50),
        };
        assert!(err.to_string().contains("50ms"));
        assert_eq!(err.class(), ErrorClass::Timeout);

        assert_eq!(TxnError::QueueFull { depth: 2 }.class(), ErrorClass::Scheduling);
        assert!(TxnError::Inactive(TxnId::new(1)).is_misuse());
    }
}
