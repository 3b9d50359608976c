//! The cursor contract shared by every backend.
//!
//! A cursor is a resumable, positioned iteration over one store or index.
//! Rows are ordered by position `(effective_key, primary_key)`, where the
//! effective key is the index key for index cursors and the primary key
//! otherwise. A reverse cursor delivers rows in exactly the opposite order of
//! a forward one, including among rows that share an index key.
//!
//! ```text
//!   Unopened ──open──▶ Positioned ◀──next/seek──┐
//!                         │   └─────────────────┘
//!                         │ past range end
//!                         ▼
//!                     Exhausted ──restart──▶ Positioned
//!
//!   any state ──close──▶ Closed
//! ```
//!
//! Exhaustion is never an error: `advance` answers `Ok(None)` and keeps
//! answering it until the cursor is restarted.

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use tracing::trace;
use weft_common::types::{Key, Value};

use crate::error::{StorageError, StorageResult};
use crate::range::{Direction, KeyRange};

/// Parameters a cursor is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorParams {
    /// Store to iterate.
    pub store: String,
    /// Index to iterate, or `None` for the primary key order.
    pub index: Option<String>,
    /// Bounds on the effective key.
    pub range: KeyRange,
    /// Iteration direction.
    pub direction: Direction,
    /// Skip loading record values.
    pub keys_only: bool,
}

impl CursorParams {
    /// Creates parameters for a full forward scan of a store.
    pub fn store(name: impl Into<String>) -> Self {
        Self {
            store: name.into(),
            index: None,
            range: KeyRange::all(),
            direction: Direction::Forward,
            keys_only: false,
        }
    }

    /// Iterates an index instead of the primary key.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    /// Sets the key range.
    #[must_use]
    pub fn range(mut self, range: KeyRange) -> Self {
        self.range = range;
        self
    }

    /// Sets the direction.
    #[must_use]
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Iterates in descending order.
    #[must_use]
    pub fn reverse(self) -> Self {
        self.direction(Direction::Reverse)
    }

    /// Sets the keys-only flag.
    #[must_use]
    pub fn keys_only(mut self, keys_only: bool) -> Self {
        self.keys_only = keys_only;
        self
    }

    /// Decides how a seek from `current` to `target` must be served.
    pub fn plan_seek(&self, current: &CursorEntry, target: &SeekTarget) -> SeekStep {
        if self.range.is_beyond(&target.key, self.direction) {
            return SeekStep::Exhaust;
        }
        if self.range.precedes(&target.key, self.direction) {
            // Clamped to the range start, which the cursor is already past.
            return SeekStep::Stay;
        }
        if self.direction.compare(current.effective_key(), &target.key) == Ordering::Greater {
            return SeekStep::Backward;
        }
        if target.is_reached_by(current, self.direction) {
            SeekStep::Stay
        } else {
            SeekStep::Forward
        }
    }
}

impl fmt::Display for CursorParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.store)?;
        if let Some(index) = &self.index {
            write!(f, ".{index}")?;
        }
        write!(f, " {} {}", self.range, self.direction)
    }
}

/// One row delivered by a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorEntry {
    /// Primary key of the record.
    pub primary_key: Key,
    /// Index key, for index cursors.
    pub index_key: Option<Key>,
    /// Record value, unless the cursor is keys-only.
    pub value: Option<Value>,
}

impl CursorEntry {
    /// Creates an entry for a primary key cursor.
    pub fn primary(primary_key: Key, value: Option<Value>) -> Self {
        Self {
            primary_key,
            index_key: None,
            value,
        }
    }

    /// Creates an entry for an index cursor.
    pub fn indexed(index_key: Key, primary_key: Key, value: Option<Value>) -> Self {
        Self {
            primary_key,
            index_key: Some(index_key),
            value,
        }
    }

    /// The key the cursor is ordered and bounded by.
    #[inline]
    pub fn effective_key(&self) -> &Key {
        self.index_key.as_ref().unwrap_or(&self.primary_key)
    }

    /// Compares two entries in iteration order.
    pub fn cmp_position(&self, other: &CursorEntry, direction: Direction) -> Ordering {
        direction.compare(
            &(self.effective_key(), &self.primary_key),
            &(other.effective_key(), &other.primary_key),
        )
    }
}

/// Where a seek should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeekTarget {
    /// Effective key to seek to.
    pub key: Key,
    /// Primary key breaking ties within `key`.
    pub primary_key: Option<Key>,
    /// Land strictly after the target instead of at it.
    pub exclusive: bool,
}

impl SeekTarget {
    /// First row at or after `key`.
    pub fn key(key: Key) -> Self {
        Self {
            key,
            primary_key: None,
            exclusive: false,
        }
    }

    /// First row at or after the position `(key, primary_key)`.
    pub fn position(key: Key, primary_key: Key) -> Self {
        Self {
            key,
            primary_key: Some(primary_key),
            exclusive: false,
        }
    }

    /// First row strictly after the position `(key, primary_key)`.
    ///
    /// This is how a cursor resumes past rows it has already delivered.
    pub fn after(key: Key, primary_key: Key) -> Self {
        Self {
            key,
            primary_key: Some(primary_key),
            exclusive: true,
        }
    }

    /// Returns true if `entry` lies at or after this target in `direction`.
    pub fn is_reached_by(&self, entry: &CursorEntry, direction: Direction) -> bool {
        match direction.compare(entry.effective_key(), &self.key) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match &self.primary_key {
                None => !self.exclusive,
                Some(pk) => match direction.compare(&entry.primary_key, pk) {
                    Ordering::Greater => true,
                    Ordering::Equal => !self.exclusive,
                    Ordering::Less => false,
                },
            },
        }
    }
}

/// How a cursor should move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceTarget {
    /// Move exactly one position in the cursor's direction.
    Next,
    /// Move to the first row at or after a target.
    Seek(SeekTarget),
    /// Discard the position and reopen from the range start.
    Restart,
}

/// How a seek is served, as decided by [`CursorParams::plan_seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekStep {
    /// The target is past the range end.
    Exhaust,
    /// The current row already satisfies the target.
    Stay,
    /// The target is behind the current row.
    Backward,
    /// The cursor must move forward.
    Forward,
}

/// A resumable, seekable cursor.
///
/// Implementations must keep the position ordering described in the module
/// docs, report an empty range as exhaustion rather than an error, and answer
/// `Ok(None)` for `Next` and `Seek` once exhausted.
#[async_trait]
pub trait Cursor: Send {
    /// Returns the parameters the cursor was opened with.
    fn params(&self) -> &CursorParams;

    /// Positions the cursor on the first row of its range.
    ///
    /// Opening an already open cursor restarts it.
    async fn open(&mut self) -> StorageResult<Option<CursorEntry>>;

    /// Moves the cursor.
    async fn advance(&mut self, target: AdvanceTarget) -> StorageResult<Option<CursorEntry>>;

    /// Returns the current row without backend I/O.
    fn current(&self) -> StorageResult<CursorEntry>;

    /// Returns true once the cursor has been opened, until it is closed.
    fn is_open(&self) -> bool;

    /// Returns true once the cursor has run past its range.
    fn is_exhausted(&self) -> bool;

    /// Releases the cursor. Every later call fails with `CursorClosed`.
    fn close(&mut self);
}

/// Lifecycle of a cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CursorState {
    /// Created but not yet opened.
    #[default]
    Unopened,
    /// Positioned on a row.
    Positioned(CursorEntry),
    /// Past the end of the range.
    Exhausted,
    /// Closed by the owner.
    Closed,
}

impl CursorState {
    /// Returns the current row, or the misuse error for this state.
    pub fn current(&self) -> StorageResult<CursorEntry> {
        match self {
            CursorState::Positioned(entry) => Ok(entry.clone()),
            CursorState::Unopened => Err(StorageError::CursorNotOpen),
            CursorState::Exhausted => Err(StorageError::CursorExhausted),
            CursorState::Closed => Err(StorageError::CursorClosed),
        }
    }

    fn settle(&mut self, row: Option<CursorEntry>) -> Option<CursorEntry> {
        *self = match &row {
            Some(entry) => CursorState::Positioned(entry.clone()),
            None => CursorState::Exhausted,
        };
        row
    }
}

/// Row lookup primitives a backend provides to [`SourceCursor`].
///
/// Each method returns the row it finds, or `None` when the range has no
/// more rows in the cursor's direction.
pub trait CursorSource: Send {
    /// Finds the first row of the range.
    fn first(&mut self, params: &CursorParams) -> StorageResult<Option<CursorEntry>>;

    /// Finds the row immediately after `current`.
    fn after(
        &mut self,
        params: &CursorParams,
        current: &CursorEntry,
    ) -> StorageResult<Option<CursorEntry>>;

    /// Finds the first row at or after `target`, which lies ahead of
    /// `current`.
    fn seek(
        &mut self,
        params: &CursorParams,
        current: &CursorEntry,
        target: &SeekTarget,
    ) -> StorageResult<Option<CursorEntry>>;
}

/// A [`Cursor`] driven by a backend's [`CursorSource`].
///
/// Owns the state machine so every backend shares the same misuse and
/// exhaustion behavior.
pub struct SourceCursor<S> {
    params: CursorParams,
    state: CursorState,
    source: S,
}

impl<S: CursorSource> SourceCursor<S> {
    /// Creates an unopened cursor.
    pub fn new(params: CursorParams, source: S) -> Self {
        Self {
            params,
            state: CursorState::Unopened,
            source,
        }
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> &CursorState {
        &self.state
    }
}

#[async_trait]
impl<S: CursorSource> Cursor for SourceCursor<S> {
    fn params(&self) -> &CursorParams {
        &self.params
    }

    async fn open(&mut self) -> StorageResult<Option<CursorEntry>> {
        if self.state == CursorState::Closed {
            return Err(StorageError::CursorClosed);
        }
        trace!(cursor = %self.params, "opening cursor");
        let row = self.source.first(&self.params)?;
        Ok(self.state.settle(row))
    }

    async fn advance(&mut self, target: AdvanceTarget) -> StorageResult<Option<CursorEntry>> {
        let current = match &self.state {
            CursorState::Unopened => return Err(StorageError::CursorNotOpen),
            CursorState::Closed => return Err(StorageError::CursorClosed),
            CursorState::Exhausted => {
                if target == AdvanceTarget::Restart {
                    return self.open().await;
                }
                return Ok(None);
            }
            CursorState::Positioned(entry) => entry.clone(),
        };

        let row = match target {
            AdvanceTarget::Restart => return self.open().await,
            AdvanceTarget::Next => self.source.after(&self.params, &current)?,
            AdvanceTarget::Seek(target) => match self.params.plan_seek(&current, &target) {
                SeekStep::Exhaust => None,
                SeekStep::Stay => return Ok(Some(current)),
                SeekStep::Backward => {
                    return Err(StorageError::SeekBackward {
                        current: current.effective_key().clone(),
                        target: target.key,
                    })
                }
                SeekStep::Forward => {
                    trace!(cursor = %self.params, target = %target.key, "seeking");
                    self.source.seek(&self.params, &current, &target)?
                }
            },
        };
        Ok(self.state.settle(row))
    }

    fn current(&self) -> StorageResult<CursorEntry> {
        self.state.current()
    }

    fn is_open(&self) -> bool {
        matches!(self.state, CursorState::Positioned(_) | CursorState::Exhausted)
    }

    fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    fn close(&mut self) {
        self.state = CursorState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(n: u64) -> Key {
        Key::from_u64(n)
    }

    fn row(ik: u64, pk: u64) -> CursorEntry {
        CursorEntry::indexed(k(ik), k(pk), None)
    }

    /// Serves rows from a sorted vector with linear scans.
    struct VecSource(Vec<CursorEntry>);

    impl VecSource {
        fn ordered(&self, direction: Direction) -> Vec<CursorEntry> {
            let mut rows = self.0.clone();
            rows.sort_by(|a, b| a.cmp_position(b, direction));
            rows
        }
    }

    impl CursorSource for VecSource {
        fn first(&mut self, params: &CursorParams) -> StorageResult<Option<CursorEntry>> {
            Ok(self
                .ordered(params.direction)
                .into_iter()
                .find(|e| params.range.contains(e.effective_key())))
        }

        fn after(
            &mut self,
            params: &CursorParams,
            current: &CursorEntry,
        ) -> StorageResult<Option<CursorEntry>> {
            Ok(self.ordered(params.direction).into_iter().find(|e| {
                params.range.contains(e.effective_key())
                    && e.cmp_position(current, params.direction) == Ordering::Greater
            }))
        }

        fn seek(
            &mut self,
            params: &CursorParams,
            _current: &CursorEntry,
            target: &SeekTarget,
        ) -> StorageResult<Option<CursorEntry>> {
            Ok(self.ordered(params.direction).into_iter().find(|e| {
                params.range.contains(e.effective_key()) && target.is_reached_by(e, params.direction)
            }))
        }
    }

    fn cursor(params: CursorParams) -> SourceCursor<VecSource> {
        let rows = vec![row(1, 10), row(2, 20), row(2, 21), row(3, 30)];
        SourceCursor::new(params, VecSource(rows))
    }

    #[test]
    fn test_seek_target_reached() {
        let entry = row(2, 21);
        let fwd = Direction::Forward;

        assert!(SeekTarget::key(k(2)).is_reached_by(&entry, fwd));
        assert!(SeekTarget::position(k(2), k(21)).is_reached_by(&entry, fwd));
        assert!(!SeekTarget::after(k(2), k(21)).is_reached_by(&entry, fwd));
        assert!(!SeekTarget::key(k(3)).is_reached_by(&entry, fwd));
        assert!(SeekTarget::after(k(2), k(22)).is_reached_by(&entry, Direction::Reverse));
    }

    #[test]
    fn test_plan_seek() {
        let params = CursorParams::store("s").range(KeyRange::bound(k(1), k(3), false, false));
        let current = row(2, 20);

        assert_eq!(params.plan_seek(&current, &SeekTarget::key(k(9))), SeekStep::Exhaust);
        assert_eq!(params.plan_seek(&current, &SeekTarget::key(k(0))), SeekStep::Stay);
        assert_eq!(params.plan_seek(&current, &SeekTarget::key(k(2))), SeekStep::Stay);
        assert_eq!(
            params.plan_seek(&current, &SeekTarget::after(k(2), k(20))),
            SeekStep::Forward
        );
        assert_eq!(params.plan_seek(&row(3, 30), &SeekTarget::key(k(2))), SeekStep::Backward);
    }

    #[tokio::test]
    async fn test_state_machine() {
        let mut c = cursor(CursorParams::store("s").index("i"));

        assert!(matches!(c.current(), Err(StorageError::CursorNotOpen)));
        assert!(!c.is_open());
        assert!(matches!(
            c.advance(AdvanceTarget::Next).await,
            Err(StorageError::CursorNotOpen)
        ));

        assert_eq!(c.open().await.unwrap(), Some(row(1, 10)));
        assert_eq!(c.advance(AdvanceTarget::Next).await.unwrap(), Some(row(2, 20)));
        assert_eq!(c.current().unwrap(), row(2, 20));

        let seek = AdvanceTarget::Seek(SeekTarget::key(k(3)));
        assert_eq!(c.advance(seek).await.unwrap(), Some(row(3, 30)));
        assert_eq!(c.advance(AdvanceTarget::Next).await.unwrap(), None);
        assert!(c.is_exhausted());
        assert!(matches!(c.current(), Err(StorageError::CursorExhausted)));

        for _ in 0..3 {
            assert_eq!(c.advance(AdvanceTarget::Next).await.unwrap(), None);
        }

        assert_eq!(c.advance(AdvanceTarget::Restart).await.unwrap(), Some(row(1, 10)));
        c.close();
        assert!(!c.is_open());
        assert!(matches!(c.open().await, Err(StorageError::CursorClosed)));
    }

    #[tokio::test]
    async fn test_reverse_mirrors_forward() {
        let mut fwd = cursor(CursorParams::store("s").index("i"));
        let mut rev = cursor(CursorParams::store("s").index("i").reverse());

        let mut forward = vec![fwd.open().await.unwrap().unwrap()];
        while let Some(e) = fwd.advance(AdvanceTarget::Next).await.unwrap() {
            forward.push(e);
        }
        let mut reverse = vec![rev.open().await.unwrap().unwrap()];
        while let Some(e) = rev.advance(AdvanceTarget::Next).await.unwrap() {
            reverse.push(e);
        }

        reverse.reverse();
        assert_eq!(forward, reverse);
    }

    #[tokio::test]
    async fn test_seek_backward_is_misuse() {
        let mut c = cursor(CursorParams::store("s").index("i"));
        c.open().await.unwrap();
        c.advance(AdvanceTarget::Seek(SeekTarget::key(k(3)))).await.unwrap();

        let err = c
            .advance(AdvanceTarget::Seek(SeekTarget::key(k(1))))
            .await
            .unwrap_err();
        assert!(err.is_misuse());
        // The position is untouched.
        assert_eq!(c.current().unwrap(), row(3, 30));
    }
}
