//! Stable error codes and error classes.

use std::fmt;

/// Error codes for categorizing errors.
///
/// The high byte is the category, the low byte the specific error. Codes are
/// stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,
    /// Operation timed out.
    Timeout = 0x0004,
    /// Operation was cancelled.
    Cancelled = 0x0005,
    /// Invalid configuration.
    InvalidConfig = 0x0006,

    // Storage errors (0x0200 - 0x02FF)
    /// Store does not exist.
    StoreNotFound = 0x0200,
    /// Index does not exist on the store.
    IndexNotFound = 0x0201,
    /// Key too large.
    KeyTooLarge = 0x0205,
    /// Value too large.
    ValueTooLarge = 0x0206,
    /// The backend rejected the operation.
    BackendFailure = 0x0210,
    /// The backend is closed or not ready.
    BackendUnavailable = 0x0211,

    // Transaction errors (0x0300 - 0x03FF)
    /// Transaction was aborted.
    TransactionAborted = 0x0300,
    /// Transaction is no longer active.
    TransactionInactive = 0x0301,
    /// Write attempted in a read-only transaction.
    ReadOnlyTransaction = 0x0302,
    /// Store accessed outside the transaction's scope.
    StoreNotInScope = 0x0303,
    /// Scheduler queue is full.
    QueueFull = 0x0304,

    // Cursor errors (0x0700 - 0x07FF)
    /// Cursor used before it was opened.
    CursorNotOpen = 0x0700,
    /// Cursor has no current row.
    CursorExhausted = 0x0701,
    /// Cursor used after it was closed.
    CursorClosed = 0x0702,
    /// Seek target lies behind the cursor position.
    SeekBackward = 0x0703,

    // Query errors (0x0600 - 0x06FF)
    /// Query specification is invalid.
    InvalidQuery = 0x0600,
    /// Result sequence used after its transaction ended.
    SequenceClosed = 0x0601,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x02 => "Storage",
            0x03 => "Transaction",
            0x06 => "Query",
            0x07 => "Cursor",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#06x})", self, self.as_u16())
    }
}

/// How an error should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Admission could not proceed (queue limits). Not raised under normal use.
    Scheduling,
    /// The engine rejected an operation. Aborts only the owning transaction.
    Backend,
    /// The API was used out of protocol. Fatal to the calling operation only.
    ProtocolMisuse,
    /// A deadline elapsed.
    Timeout,
    /// The operation was abandoned by an abort or close.
    Cancelled,
}

impl ErrorClass {
    /// Returns true for programmer errors.
    #[must_use]
    pub fn is_misuse(self) -> bool {
        self == ErrorClass::ProtocolMisuse
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Scheduling => "scheduling",
            ErrorClass::Backend => "backend",
            ErrorClass::ProtocolMisuse => "protocol misuse",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_categories() {
        assert_eq!(ErrorCode::Timeout.category(), "General");
        assert_eq!(ErrorCode::StoreNotFound.category(), "Storage");
        assert_eq!(ErrorCode::QueueFull.category(), "Transaction");
        assert_eq!(ErrorCode::SeekBackward.category(), "Cursor");
        assert_eq!(ErrorCode::SequenceClosed.category(), "Query");
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::CursorNotOpen.to_string(), "CursorNotOpen(0x0700)");
    }

    #[test]
    fn test_misuse_class() {
        assert!(ErrorClass::ProtocolMisuse.is_misuse());
        assert!(!ErrorClass::Backend.is_misuse());
    }
}
