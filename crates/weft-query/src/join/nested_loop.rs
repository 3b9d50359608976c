//! Nested-loop solver.
//!
//! The first participant is the outer side. For every outer row, each inner
//! participant is probed with a fresh cursor bounded to exactly the outer
//! primary key; the row matches when every probe finds something. Inner
//! participants therefore need no ordering in common with the outer one,
//! which makes this the solver for joins across unrelated indexes.

use async_trait::async_trait;
use tracing::{debug, trace};
use weft_common::config::StreamerConfig;
use weft_common::types::Key;
use weft_storage::{CursorEntry, CursorParams, KeyRange};
use weft_txn::{TxnCursor, TxnHandle, TxnResult};

use super::{JoinRow, JoinSolver};
use crate::error::{QueryError, QueryResult};
use crate::streamer::Streamer;

/// Probes every inner participant once per outer row.
#[derive(Debug)]
pub struct NestedLoopSolver {
    txn: TxnHandle,
    outer: Streamer,
    inners: Vec<CursorParams>,
    probes: u64,
    done: bool,
}

impl NestedLoopSolver {
    /// Creates a solver. `cursors[0]` is the outer side; the remaining
    /// cursors only contribute their parameters and are closed.
    pub fn new(
        txn: TxnHandle,
        cursors: Vec<TxnCursor>,
        config: &StreamerConfig,
    ) -> QueryResult<Self> {
        let mut cursors = cursors.into_iter();
        let outer = cursors
            .next()
            .ok_or_else(|| QueryError::invalid("nested loop needs an outer participant"))?;
        let inners = cursors
            .map(|mut cursor| {
                let params = cursor.params().clone();
                cursor.close();
                params
            })
            .collect();
        Ok(Self {
            txn,
            outer: Streamer::spawn(outer, config),
            inners,
            probes: 0,
            done: false,
        })
    }

    async fn probe(&mut self, index: usize, key: &Key) -> TxnResult<Option<CursorEntry>> {
        let inner = &self.inners[index];
        if !inner.range.contains(key) {
            return Ok(None);
        }
        let params = inner.clone().range(KeyRange::only(key.clone()));
        self.probes += 1;
        let mut cursor = self.txn.open_cursor(params).await?;
        let row = cursor.open().await?;
        cursor.close();
        Ok(row)
    }
}

#[async_trait]
impl JoinSolver for NestedLoopSolver {
    fn name(&self) -> &'static str {
        "nested_loop"
    }

    async fn next_match(&mut self) -> TxnResult<Option<JoinRow>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let Some(outer) = self.outer.request_next().await? else {
                self.done = true;
                debug!(txn_id = %self.txn.id(), probes = self.probes, "nested loop finished");
                return Ok(None);
            };

            let key = outer.primary_key;
            let mut primary_keys = Vec::with_capacity(self.inners.len() + 1);
            primary_keys.push(key.clone());
            for index in 0..self.inners.len() {
                match self.probe(index, &key).await? {
                    Some(row) => primary_keys.push(row.primary_key),
                    None => break,
                }
            }

            if primary_keys.len() == self.inners.len() + 1 {
                trace!(txn_id = %self.txn.id(), key = %key, "nested loop match");
                return Ok(Some(JoinRow {
                    key,
                    primary_keys,
                    value: outer.value,
                }));
            }
        }
    }

    fn close(&mut self) {
        self.done = true;
        self.outer.close();
    }
}
