//! Transaction scopes and access modes.
//!
//! A scope names the stores a transaction touches and how it touches them.
//! Two scopes conflict when they cannot run at the same time:
//!
//! ```text
//!               │ ReadOnly │ ReadWrite │ VersionChange │
//! ──────────────┼──────────┼───────────┼───────────────┤
//!  ReadOnly     │    ✓     │  overlap? │       ✗       │
//!  ReadWrite    │ overlap? │  overlap? │       ✗       │
//!  VersionChange│    ✗     │     ✗     │       ✗       │
//! ```
//!
//! `overlap?` means the pair conflicts only if their store sets intersect.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnMode {
    /// Reads only. Overlapping read-only transactions run concurrently.
    #[default]
    ReadOnly,
    /// Reads and writes. Excludes every overlapping transaction.
    ReadWrite,
    /// Schema/version change. Excludes every other transaction.
    VersionChange,
}

impl TxnMode {
    /// Returns true if transactions in this mode may write.
    #[must_use]
    pub fn is_writable(self) -> bool {
        !matches!(self, TxnMode::ReadOnly)
    }

    /// Checks whether two modes may hold overlapping scopes at the same time.
    #[must_use]
    pub fn is_compatible_with(self, other: TxnMode) -> bool {
        matches!((self, other), (TxnMode::ReadOnly, TxnMode::ReadOnly))
    }

    /// Returns the short name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TxnMode::ReadOnly => "readonly",
            TxnMode::ReadWrite => "readwrite",
            TxnMode::VersionChange => "versionchange",
        }
    }
}

impl fmt::Display for TxnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of stores a transaction runs over, plus its access mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    stores: BTreeSet<String>,
    mode: TxnMode,
}

impl Scope {
    /// Creates a scope over the given stores.
    pub fn new<I, S>(stores: I, mode: TxnMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stores: stores.into_iter().map(Into::into).collect(),
            mode,
        }
    }

    /// Creates a read-only scope.
    pub fn read_only<I, S>(stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(stores, TxnMode::ReadOnly)
    }

    /// Creates a read-write scope.
    pub fn read_write<I, S>(stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(stores, TxnMode::ReadWrite)
    }

    /// Returns the access mode.
    #[must_use]
    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    /// Iterates the store names in order.
    pub fn stores(&self) -> impl Iterator<Item = &str> {
        self.stores.iter().map(String::as_str)
    }

    /// Returns the number of stores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Returns true if the scope names no stores.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Checks whether the scope covers a store.
    #[must_use]
    pub fn contains(&self, store: &str) -> bool {
        self.stores.contains(store)
    }

    /// Returns true if the two store sets intersect.
    #[must_use]
    pub fn overlaps(&self, other: &Scope) -> bool {
        // Walk the smaller set.
        let (small, large) = if self.stores.len() <= other.stores.len() {
            (&self.stores, &other.stores)
        } else {
            (&other.stores, &self.stores)
        };
        small.iter().any(|s| large.contains(s))
    }

    /// Returns true if the two scopes must not run at the same time.
    #[must_use]
    pub fn conflicts_with(&self, other: &Scope) -> bool {
        if self.mode == TxnMode::VersionChange || other.mode == TxnMode::VersionChange {
            return true;
        }
        !self.mode.is_compatible_with(other.mode) && self.overlaps(other)
    }

    /// Adds a store to the scope.
    pub fn insert(&mut self, store: impl Into<String>) {
        self.stores.insert(store.into());
    }

    /// Returns a scope over the stores of both, with the stronger mode.
    #[must_use]
    pub fn union(&self, other: &Scope) -> Scope {
        let mode = match (self.mode, other.mode) {
            (TxnMode::VersionChange, _) | (_, TxnMode::VersionChange) => TxnMode::VersionChange,
            (TxnMode::ReadWrite, _) | (_, TxnMode::ReadWrite) => TxnMode::ReadWrite,
            _ => TxnMode::ReadOnly,
        };
        Scope {
            stores: self.stores.union(&other.stores).cloned().collect(),
            mode,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.mode)?;
        for (i, store) in self.stores.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(store)?;
        }
        f.write_str("]")
    }
}
