//! Zig-zag intersection.
//!
//! All participants are ordered the same way. The solver looks at the key
//! each cursor sits on and takes the furthest one, `M`. Every cursor behind
//! `M` seeks straight to `M` instead of stepping towards it, so long runs of
//! non-matching keys cost one seek each. When all cursors sit on the same
//! key, that key is a match.
//!
//! ```text
//!   a: 1 ─────▶ 3 ─────▶ 5 ── 7 ──▶ 9
//!   b:    ──▶ 3 ── 4 ──▶ 5 ──────▶ 8 ──▶ 9
//!             ✓         ✓               ✓
//! ```
//!
//! On a non-unique index several rows share a key. Every row of participant
//! 0 on the matched key is emitted; the other participants then move on by
//! one row each. The key alone decides convergence, primary keys never do.

use async_trait::async_trait;
use tracing::{debug, trace};
use weft_common::types::Key;
use weft_storage::{AdvanceTarget, CursorEntry, Direction, SeekTarget};
use weft_txn::{TxnCursor, TxnResult};

use super::{JoinRow, JoinSolver};
use crate::error::{QueryError, QueryResult};

#[derive(Debug)]
enum State {
    Start,
    Matched(Key),
    Done,
}

/// Intersects cursors that share an ordering.
#[derive(Debug)]
pub struct ZigZagSolver {
    cursors: Vec<TxnCursor>,
    rows: Vec<CursorEntry>,
    direction: Direction,
    state: State,
    seeks: u64,
}

impl ZigZagSolver {
    /// Creates a solver over `cursors`, which must all iterate in the same
    /// direction.
    pub fn new(cursors: Vec<TxnCursor>) -> QueryResult<Self> {
        let direction = cursors
            .first()
            .map(|c| c.params().direction)
            .ok_or_else(|| QueryError::invalid("intersection needs at least one participant"))?;
        if cursors.iter().any(|c| c.params().direction != direction) {
            return Err(QueryError::invalid(
                "intersection participants must share a direction",
            ));
        }
        Ok(Self {
            rows: Vec::with_capacity(cursors.len()),
            cursors,
            direction,
            state: State::Start,
            seeks: 0,
        })
    }

    /// Returns the number of seeks issued so far.
    pub fn seeks(&self) -> u64 {
        self.seeks
    }

    async fn load(&mut self) -> TxnResult<bool> {
        self.rows.clear();
        for cursor in &mut self.cursors {
            match cursor.resume().await? {
                Some(row) => self.rows.push(row),
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Moves past a match. Returns the row to emit if participant 0 has
    /// another row on the same key, and whether every cursor still has rows.
    async fn step_past(&mut self, key: &Key) -> TxnResult<(Option<JoinRow>, bool)> {
        let Some(first) = self.cursors.first_mut() else {
            return Ok((None, false));
        };
        let Some(row) = first.next().await? else {
            return Ok((None, false));
        };
        let same = row.effective_key() == key;
        self.rows[0] = row;
        if same {
            return Ok((Some(self.emit(key.clone())), true));
        }

        for (cursor, slot) in self.cursors.iter_mut().zip(self.rows.iter_mut()).skip(1) {
            match cursor.next().await? {
                Some(row) => *slot = row,
                None => return Ok((None, false)),
            }
        }
        Ok((None, true))
    }

    /// Seeks lagging cursors until all sit on one key. Returns that key, or
    /// `None` when a cursor runs out.
    async fn converge(&mut self) -> TxnResult<Option<Key>> {
        loop {
            let direction = self.direction;
            let Some(target) = self
                .rows
                .iter()
                .map(CursorEntry::effective_key)
                .max_by(|a, b| direction.compare(*a, *b))
                .cloned()
            else {
                return Ok(None);
            };

            let mut converged = true;
            for (cursor, slot) in self.cursors.iter_mut().zip(self.rows.iter_mut()) {
                if slot.effective_key() == &target {
                    continue;
                }
                converged = false;
                self.seeks += 1;
                let seek = AdvanceTarget::Seek(SeekTarget::key(target.clone()));
                match cursor.advance(seek).await? {
                    Some(row) => *slot = row,
                    None => return Ok(None),
                }
            }
            if converged {
                return Ok(Some(target));
            }
        }
    }

    fn emit(&self, key: Key) -> JoinRow {
        trace!(key = %key, "zig-zag match");
        JoinRow {
            key,
            primary_keys: self.rows.iter().map(|r| r.primary_key.clone()).collect(),
            value: self.rows.first().and_then(|r| r.value.clone()),
        }
    }

    fn finish(&mut self) -> Option<JoinRow> {
        debug!(seeks = self.seeks, "zig-zag finished");
        self.state = State::Done;
        for cursor in &mut self.cursors {
            cursor.close();
        }
        None
    }
}

#[async_trait]
impl JoinSolver for ZigZagSolver {
    fn name(&self) -> &'static str {
        "zigzag"
    }

    async fn next_match(&mut self) -> TxnResult<Option<JoinRow>> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Done => return Ok(None),
            State::Start => {
                if !self.load().await? {
                    return Ok(self.finish());
                }
            }
            State::Matched(key) => match self.step_past(&key).await? {
                (Some(row), _) => {
                    self.state = State::Matched(key);
                    return Ok(Some(row));
                }
                (None, true) => {}
                (None, false) => return Ok(self.finish()),
            },
        }

        match self.converge().await? {
            Some(key) => {
                let row = self.emit(key.clone());
                self.state = State::Matched(key);
                Ok(Some(row))
            }
            None => Ok(self.finish()),
        }
    }

    fn close(&mut self) {
        if !matches!(self.state, State::Done) {
            self.finish();
        }
    }
}
