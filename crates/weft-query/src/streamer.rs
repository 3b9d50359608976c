//! Read-ahead over a cursor.
//!
//! A [`Streamer`] owns a cursor and drives it from a background task, so the
//! backend keeps delivering rows while the consumer is busy with the previous
//! one. Rows travel through a bounded channel: the producer reserves a slot
//! before every read, which caps outstanding reads at the buffer size and
//! stops reading while the consumer falls behind.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;
use weft_common::config::StreamerConfig;
use weft_common::types::TxnId;
use weft_storage::{CursorEntry, CursorParams};
use weft_txn::{TxnCursor, TxnError, TxnResult};

/// Buffered, ordered delivery of one cursor's rows.
pub struct Streamer {
    txn_id: TxnId,
    params: CursorParams,
    rx: mpsc::Receiver<TxnResult<CursorEntry>>,
    task: Option<JoinHandle<()>>,
    end: Option<End>,
}

#[derive(Debug, Clone)]
enum End {
    Exhausted,
    Failed(TxnError),
    Closed,
}

impl Streamer {
    /// Starts streaming `cursor`. An unopened cursor is opened first; an
    /// opened one continues from the row it sits on.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(cursor: TxnCursor, config: &StreamerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_size.max(1));
        let txn_id = cursor.txn_id();
        let params = cursor.params().clone();
        let task = tokio::spawn(produce(cursor, tx));
        Self {
            txn_id,
            params,
            rx,
            task: Some(task),
            end: None,
        }
    }

    /// Returns the owning transaction's id.
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Returns the parameters of the streamed cursor.
    pub fn params(&self) -> &CursorParams {
        &self.params
    }

    /// Waits for the next row.
    ///
    /// `Ok(None)` once the cursor is exhausted, and on every call after that.
    /// A cursor error is returned once and then repeated.
    pub async fn request_next(&mut self) -> TxnResult<Option<CursorEntry>> {
        match &self.end {
            Some(End::Exhausted) => return Ok(None),
            Some(End::Failed(e)) => return Err(e.clone()),
            Some(End::Closed) => return Err(TxnError::cancelled("streamer closed")),
            None => {}
        }
        match self.rx.recv().await {
            Some(Ok(entry)) => Ok(Some(entry)),
            Some(Err(e)) => {
                self.end = Some(End::Failed(e.clone()));
                Err(e)
            }
            None => {
                self.end = Some(End::Exhausted);
                Ok(None)
            }
        }
    }

    /// Returns true once the stream has ended for any reason.
    pub fn is_done(&self) -> bool {
        self.end.is_some()
    }

    /// Stops the producer and drops buffered rows.
    pub fn close(&mut self) {
        if self.end.is_none() {
            self.end = Some(End::Closed);
        }
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Streamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streamer")
            .field("txn_id", &self.txn_id)
            .field("params", &self.params)
            .field("end", &self.end)
            .finish()
    }
}

async fn produce(mut cursor: TxnCursor, tx: mpsc::Sender<TxnResult<CursorEntry>>) {
    let mut delivered = 0usize;
    loop {
        // Consumer dropped or closed the stream.
        let Ok(permit) = tx.reserve().await else {
            break;
        };
        let row = if delivered == 0 {
            cursor.resume().await
        } else {
            cursor.next().await
        };
        match row {
            Ok(Some(entry)) => {
                delivered += 1;
                permit.send(Ok(entry));
            }
            Ok(None) => break,
            Err(e) => {
                permit.send(Err(e));
                break;
            }
        }
    }
    trace!(txn_id = %cursor.txn_id(), cursor = %cursor.params(), delivered, "streamer finished");
    cursor.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weft_common::types::{Key, Scope, Value};
    use weft_storage::{OrderedBackend, Record, StoreSchema};
    use weft_txn::TransactionManager;

    fn manager() -> TransactionManager {
        let backend = OrderedBackend::new([StoreSchema::new("nums")]);
        backend
            .preload(
                "nums",
                (1..=5).map(|n| Record::new(Key::from_u64(n), Value::from_str("v"))),
            )
            .unwrap();
        TransactionManager::new(Arc::new(backend))
    }

    fn config(buffer_size: usize) -> StreamerConfig {
        StreamerConfig { buffer_size }
    }

    async fn drain(streamer: &mut Streamer) -> Vec<u64> {
        let mut keys = Vec::new();
        while let Some(entry) = streamer.request_next().await.unwrap() {
            keys.push(entry.primary_key.to_u64().unwrap());
        }
        keys
    }

    #[tokio::test]
    async fn test_streams_in_cursor_order() {
        let tm = manager();
        let txn = tm.begin(Scope::read_only(["nums"])).await.unwrap();

        let cursor = txn.open_cursor(CursorParams::store("nums")).await.unwrap();
        let mut streamer = Streamer::spawn(cursor, &config(2));
        assert_eq!(drain(&mut streamer).await, vec![1, 2, 3, 4, 5]);

        let cursor = txn
            .open_cursor(CursorParams::store("nums").reverse())
            .await
            .unwrap();
        let mut streamer = Streamer::spawn(cursor, &config(16));
        assert_eq!(drain(&mut streamer).await, vec![5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_end_is_sticky() {
        let tm = manager();
        let txn = tm.begin(Scope::read_only(["nums"])).await.unwrap();
        let cursor = txn.open_cursor(CursorParams::store("nums")).await.unwrap();
        let mut streamer = Streamer::spawn(cursor, &config(1));

        drain(&mut streamer).await;
        assert!(streamer.is_done());
        assert!(streamer.request_next().await.unwrap().is_none());
        assert!(streamer.request_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_continues_from_positioned_cursor() {
        let tm = manager();
        let txn = tm.begin(Scope::read_only(["nums"])).await.unwrap();
        let mut cursor = txn.open_cursor(CursorParams::store("nums")).await.unwrap();
        cursor.open().await.unwrap();
        cursor.next().await.unwrap();

        let mut streamer = Streamer::spawn(cursor, &config(4));
        assert_eq!(drain(&mut streamer).await, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_buffer_bounds_read_ahead() {
        let tm = manager();
        let txn = tm.begin(Scope::read_only(["nums"])).await.unwrap();
        let cursor = txn.open_cursor(CursorParams::store("nums")).await.unwrap();
        let mut streamer = Streamer::spawn(cursor, &config(1));

        // Let the producer fill its single slot.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        txn.abort();

        // Only the buffered row was read before the abort.
        let first = streamer.request_next().await.unwrap().unwrap();
        assert_eq!(first.primary_key, Key::from_u64(1));
        let err = streamer.request_next().await.unwrap_err();
        assert!(matches!(err, TxnError::Inactive(_)));
        assert!(matches!(
            streamer.request_next().await,
            Err(TxnError::Inactive(_))
        ));
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let tm = manager();
        let txn = tm.begin(Scope::read_only(["nums"])).await.unwrap();
        let cursor = txn.open_cursor(CursorParams::store("nums")).await.unwrap();
        let mut streamer = Streamer::spawn(cursor, &config(2));

        assert!(streamer.request_next().await.unwrap().is_some());
        streamer.close();
        assert!(streamer.is_done());
        assert!(matches!(
            streamer.request_next().await,
            Err(TxnError::Cancelled(_))
        ));
    }
}
