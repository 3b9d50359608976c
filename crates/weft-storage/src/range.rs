//! Key ranges and iteration directions.
//!
//! A [`KeyRange`] bounds the effective key of a cursor (the index key for an
//! index cursor, the primary key otherwise). Bounds are expressed in key
//! order; [`Direction`] decides which bound a cursor starts from.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use weft_common::types::Key;

/// Direction of cursor movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    /// Ascending key order.
    #[default]
    Forward,
    /// Descending key order.
    Reverse,
}

impl Direction {
    /// Compares two values in iteration order.
    ///
    /// `Less` means `a` is delivered before `b`.
    #[inline]
    pub fn compare<T: Ord + ?Sized>(self, a: &T, b: &T) -> Ordering {
        match self {
            Direction::Forward => a.cmp(b),
            Direction::Reverse => b.cmp(a),
        }
    }

    /// Returns the opposite direction.
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }

    /// Returns true for ascending iteration.
    #[must_use]
    pub fn is_forward(self) -> bool {
        self == Direction::Forward
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.write_str("next"),
            Direction::Reverse => f.write_str("prev"),
        }
    }
}

/// Range bounds for cursor iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound in key order.
    pub lower: Bound<Key>,
    /// Upper bound in key order.
    pub upper: Bound<Key>,
}

impl KeyRange {
    /// Creates a range covering all keys.
    #[must_use]
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// Creates a range matching exactly one key.
    #[must_use]
    pub fn only(key: Key) -> Self {
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Creates a range with both ends bounded.
    #[must_use]
    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> Self {
        Self {
            lower: bound_of(lower, lower_open),
            upper: bound_of(upper, upper_open),
        }
    }

    /// Creates a range with only a lower bound.
    #[must_use]
    pub fn lower_bound(key: Key, open: bool) -> Self {
        Self {
            lower: bound_of(key, open),
            upper: Bound::Unbounded,
        }
    }

    /// Creates a range with only an upper bound.
    #[must_use]
    pub fn upper_bound(key: Key, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: bound_of(key, open),
        }
    }

    /// Creates a range with a prefix (all keys starting with the prefix).
    #[must_use]
    pub fn prefix(prefix: Key) -> Self {
        let upper = match prefix.successor() {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        Self {
            lower: Bound::Included(prefix),
            upper,
        }
    }

    /// Checks if a key is within the range.
    pub fn contains(&self, key: &Key) -> bool {
        !self.is_before_start(key) && !self.is_after_end(key)
    }

    /// Checks if a key sorts below the lower bound.
    pub fn is_before_start(&self, key: &Key) -> bool {
        match &self.lower {
            Bound::Included(start) => key < start,
            Bound::Excluded(start) => key <= start,
            Bound::Unbounded => false,
        }
    }

    /// Checks if a key sorts above the upper bound.
    pub fn is_after_end(&self, key: &Key) -> bool {
        match &self.upper {
            Bound::Included(end) => key > end,
            Bound::Excluded(end) => key >= end,
            Bound::Unbounded => false,
        }
    }

    /// Checks if a key lies past the far end of the range when iterating in
    /// `direction`.
    pub fn is_beyond(&self, key: &Key, direction: Direction) -> bool {
        match direction {
            Direction::Forward => self.is_after_end(key),
            Direction::Reverse => self.is_before_start(key),
        }
    }

    /// Checks if a key lies before the near end of the range when iterating
    /// in `direction`.
    pub fn precedes(&self, key: &Key, direction: Direction) -> bool {
        match direction {
            Direction::Forward => self.is_before_start(key),
            Direction::Reverse => self.is_after_end(key),
        }
    }

    /// Returns true if no key can satisfy the range.
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo), Bound::Excluded(hi))
            | (Bound::Excluded(lo), Bound::Included(hi))
            | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
            _ => false,
        }
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            Bound::Included(k) => write!(f, "[{k}")?,
            Bound::Excluded(k) => write!(f, "({k}")?,
            Bound::Unbounded => f.write_str("(-")?,
        }
        f.write_str(", ")?;
        match &self.upper {
            Bound::Included(k) => write!(f, "{k}]"),
            Bound::Excluded(k) => write!(f, "{k})"),
            Bound::Unbounded => f.write_str("+)"),
        }
    }
}

fn bound_of(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}
