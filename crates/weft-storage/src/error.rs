//! Error types for backend adapters and cursors.

use thiserror::Error;
use weft_common::error::{ErrorClass, ErrorCode};
use weft_common::types::{Key, TxnId};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a backend adapter or one of its cursors.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The named store does not exist.
    #[error("store not found: {0}")]
    StoreNotFound(String),

    /// The named index does not exist on the store.
    #[error("index not found: {store}.{index}")]
    IndexNotFound {
        /// Store name.
        store: String,
        /// Index name.
        index: String,
    },

    /// The store is not part of the transaction's scope.
    #[error("store {0} is not in the transaction scope")]
    StoreNotInScope(String),

    /// A write was attempted in a read-only transaction.
    #[error("cannot write to {0} in a read-only transaction")]
    ReadOnlyTransaction(String),

    /// Key is too large.
    #[error("key too large: {size} bytes (max: {max})")]
    KeyTooLarge {
        /// Actual size of the key.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Value is too large.
    #[error("value too large: {size} bytes (max: {max})")]
    ValueTooLarge {
        /// Actual size of the value.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The backend transaction already committed or aborted.
    #[error("transaction {0} is no longer active")]
    TransactionInactive(TxnId),

    /// The backend is closed.
    #[error("backend is not available")]
    BackendUnavailable,

    /// The engine rejected the operation.
    #[error("backend failure: {0}")]
    Backend(String),

    /// Cursor used before `open`.
    #[error("cursor is not open")]
    CursorNotOpen,

    /// Cursor has no current row.
    #[error("cursor is exhausted")]
    CursorExhausted,

    /// Cursor used after `close`.
    #[error("cursor is closed")]
    CursorClosed,

    /// Seek target lies behind the current position.
    #[error("cannot seek backward from {current} to {target}; restart the cursor instead")]
    SeekBackward {
        /// Effective key at the current position.
        current: Key,
        /// Requested target key.
        target: Key,
    },
}

impl StorageError {
    /// Creates a new engine failure.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Creates a new index-not-found error.
    pub fn index_not_found(store: impl Into<String>, index: impl Into<String>) -> Self {
        Self::IndexNotFound {
            store: store.into(),
            index: index.into(),
        }
    }

    /// Returns the stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            StorageError::StoreNotFound(_) => ErrorCode::StoreNotFound,
            StorageError::IndexNotFound { .. } => ErrorCode::IndexNotFound,
            StorageError::StoreNotInScope(_) => ErrorCode::StoreNotInScope,
            StorageError::ReadOnlyTransaction(_) => ErrorCode::ReadOnlyTransaction,
            StorageError::KeyTooLarge { .. } => ErrorCode::KeyTooLarge,
            StorageError::ValueTooLarge { .. } => ErrorCode::ValueTooLarge,
            StorageError::TransactionInactive(_) => ErrorCode::TransactionInactive,
            StorageError::BackendUnavailable => ErrorCode::BackendUnavailable,
            StorageError::Backend(_) => ErrorCode::BackendFailure,
            StorageError::CursorNotOpen => ErrorCode::CursorNotOpen,
            StorageError::CursorExhausted => ErrorCode::CursorExhausted,
            StorageError::CursorClosed => ErrorCode::CursorClosed,
            StorageError::SeekBackward { .. } => ErrorCode::SeekBackward,
        }
    }

    /// Returns how the caller should treat the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            StorageError::StoreNotInScope(_)
            | StorageError::ReadOnlyTransaction(_)
            | StorageError::CursorNotOpen
            | StorageError::CursorExhausted
            | StorageError::CursorClosed
            | StorageError::SeekBackward { .. } => ErrorClass::ProtocolMisuse,
            StorageError::TransactionInactive(_) => ErrorClass::Cancelled,
            _ => ErrorClass::Backend,
        }
    }

    /// Returns true for programmer errors.
    pub fn is_misuse(&self) -> bool {
        self.class().is_misuse()
    }
}
