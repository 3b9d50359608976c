//! Identifier types for Weft.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier.
///
/// Assigned by the scheduler when a request is submitted, so identifiers
/// increase in submission order. That order is what FIFO admission among
/// conflicting requests is defined against.
///
/// # Example
///
/// ```rust
/// use weft_common::types::TxnId;
///
/// let first = TxnId::MIN;
/// assert!(first < first.next());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnId(u64);

impl TxnId {
    /// Sentinel for "no transaction".
    pub const INVALID: Self = Self(0);

    /// First identifier handed out by a scheduler.
    pub const MIN: Self = Self(1);

    /// Creates a `TxnId` from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the identifier submitted after this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks whether this is a real transaction identifier.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "TxnId({})", self.0)
        } else {
            write!(f, "TxnId(INVALID)")
        }
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}
