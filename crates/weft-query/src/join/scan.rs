//! Single-cursor solver.

use async_trait::async_trait;
use weft_common::config::StreamerConfig;
use weft_txn::{TxnCursor, TxnResult};

use super::{JoinRow, JoinSolver};
use crate::streamer::Streamer;

/// Streams the rows of one cursor.
#[derive(Debug)]
pub struct ScanSolver {
    streamer: Streamer,
}

impl ScanSolver {
    /// Creates a solver over `cursor`.
    pub fn new(cursor: TxnCursor, config: &StreamerConfig) -> Self {
        Self {
            streamer: Streamer::spawn(cursor, config),
        }
    }
}

#[async_trait]
impl JoinSolver for ScanSolver {
    fn name(&self) -> &'static str {
        "scan"
    }

    async fn next_match(&mut self) -> TxnResult<Option<JoinRow>> {
        Ok(self.streamer.request_next().await?.map(|entry| JoinRow {
            key: entry.effective_key().clone(),
            primary_keys: vec![entry.primary_key],
            value: entry.value,
        }))
    }

    fn close(&mut self) {
        self.streamer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weft_common::types::{Key, Scope, Value};
    use weft_storage::{CursorParams, KeyRange, OrderedBackend, Record, StoreSchema};
    use weft_txn::TransactionManager;

    #[tokio::test]
    async fn test_scan_index() {
        let backend = OrderedBackend::new([StoreSchema::new("people").with_index("age")]);
        backend
            .preload(
                "people",
                [(1, 40), (2, 25), (3, 33)].map(|(id, age)| {
                    Record::new(Key::from_u64(id), Value::from_str("p"))
                        .with_index_key("age", Key::from_u64(age))
                }),
            )
            .unwrap();
        let tm = TransactionManager::new(Arc::new(backend));
        let txn = tm.begin(Scope::read_only(["people"])).await.unwrap();

        let params = CursorParams::store("people")
            .index("age")
            .range(KeyRange::lower_bound(Key::from_u64(30), false))
            .keys_only(true);
        let cursor = txn.open_cursor(params).await.unwrap();
        let mut solver = ScanSolver::new(cursor, &StreamerConfig::default());

        let first = solver.next_match().await.unwrap().unwrap();
        assert_eq!(first.key, Key::from_u64(33));
        assert_eq!(first.primary_keys, vec![Key::from_u64(3)]);
        assert!(first.value.is_none());

        let second = solver.next_match().await.unwrap().unwrap();
        assert_eq!(second.primary_key(), Some(&Key::from_u64(1)));
        assert!(solver.next_match().await.unwrap().is_none());
        assert!(solver.next_match().await.unwrap().is_none());
    }
}
