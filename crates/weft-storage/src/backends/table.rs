//! Table engine driven by sorted queries.
//!
//! Rows sit unordered in a hash table, the way a SQL table does. A cursor has
//! no native position: opening it runs a query that filters by range, sorts
//! by `(column, primary key)` and returns at most one page of rows. Moving
//! past the page, or seeking beyond it, replays the query narrowed at the
//! resume point and skips every row at or before it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;
use weft_common::types::{Key, Scope, TxnId};

use super::engine::{Catalog, StoreEngine, TxnShared};
use crate::backend::{Backend, BackendKind, BackendTransaction, Record, StoreSchema};
use crate::cursor::{Cursor, CursorEntry, CursorParams, CursorSource, SeekTarget, SourceCursor};
use crate::error::StorageResult;
use crate::range::KeyRange;

/// Default number of rows fetched per query.
pub const DEFAULT_PAGE_SIZE: usize = 64;

/// Backend over unordered row tables.
pub struct TableBackend {
    catalog: Arc<Catalog<TableStore>>,
}

impl TableBackend {
    /// Creates a backend with the given tables, all empty.
    pub fn new(schemas: impl IntoIterator<Item = StoreSchema>) -> Self {
        Self::with_page_size(schemas, DEFAULT_PAGE_SIZE)
    }

    /// Creates a backend whose cursors fetch `page_size` rows per query.
    pub fn with_page_size(schemas: impl IntoIterator<Item = StoreSchema>, page_size: usize) -> Self {
        let options = TableOptions {
            page_size: page_size.max(1),
        };
        Self {
            catalog: Arc::new(Catalog::new(BackendKind::Table, schemas, options)),
        }
    }

    /// Writes records directly into committed state, outside any
    /// transaction. Intended for fixtures.
    pub fn preload(
        &self,
        store: &str,
        records: impl IntoIterator<Item = Record>,
    ) -> StorageResult<()> {
        self.catalog.preload(store, records)
    }
}

#[async_trait]
impl Backend for TableBackend {
    fn kind(&self) -> BackendKind {
        self.catalog.kind()
    }

    fn is_ready(&self) -> bool {
        self.catalog.is_ready()
    }

    fn schema(&self, store: &str) -> Option<StoreSchema> {
        self.catalog.schema(store).cloned()
    }

    async fn begin(&self, id: TxnId, scope: &Scope) -> StorageResult<Arc<dyn BackendTransaction>> {
        self.catalog.begin(id, scope)
    }

    fn close(&self) {
        self.catalog.close();
    }
}

pub(crate) struct TableOptions {
    page_size: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TableStore {
    rows: HashMap<Key, Record>,
}

impl TableStore {
    /// `SELECT .. WHERE column IN range [AND position past resume]
    /// ORDER BY column, primary LIMIT limit`.
    fn query(
        &self,
        params: &CursorParams,
        resume: Option<&SeekTarget>,
        limit: usize,
    ) -> Vec<CursorEntry> {
        let index = params.index.as_deref();
        let mut result: Vec<CursorEntry> = self
            .rows
            .values()
            .filter_map(|record| {
                let column = record.key_for(index)?;
                if !params.range.contains(column) {
                    return None;
                }
                let value = (!params.keys_only).then(|| record.value.clone());
                let entry = match index {
                    Some(_) => CursorEntry::indexed(column.clone(), record.primary_key.clone(), value),
                    None => CursorEntry::primary(record.primary_key.clone(), value),
                };
                match resume {
                    Some(target) if !target.is_reached_by(&entry, params.direction) => None,
                    _ => Some(entry),
                }
            })
            .collect();
        result.sort_by(|a, b| a.cmp_position(b, params.direction));
        result.truncate(limit);
        result
    }
}

impl StoreEngine for TableStore {
    type Options = TableOptions;

    fn get(&self, key: &Key) -> Option<&Record> {
        self.rows.get(key)
    }

    fn put(&mut self, record: Record) {
        self.rows.insert(record.primary_key.clone(), record);
    }

    fn delete(&mut self, key: &Key) -> bool {
        self.rows.remove(key).is_some()
    }

    fn count(&self, index: Option<&str>, range: &KeyRange) -> usize {
        self.rows
            .values()
            .filter_map(|record| record.key_for(index))
            .filter(|column| range.contains(column))
            .count()
    }

    fn cursor(txn: Arc<TxnShared<Self>>, params: CursorParams, options: &TableOptions) -> Box<dyn Cursor> {
        let source = TableSource {
            txn,
            page: Vec::new(),
            pos: 0,
            complete: false,
            page_size: options.page_size,
        };
        Box::new(SourceCursor::new(params, source))
    }
}

/// One page of a query result plus the read position within it.
struct TableSource {
    txn: Arc<TxnShared<TableStore>>,
    page: Vec<CursorEntry>,
    pos: usize,
    /// The page holds every remaining row of the query.
    complete: bool,
    page_size: usize,
}

impl TableSource {
    fn load(
        &mut self,
        params: &CursorParams,
        resume: Option<&SeekTarget>,
    ) -> StorageResult<Option<CursorEntry>> {
        let store = self.txn.read(&params.store)?;
        self.page = store.query(params, resume, self.page_size);
        self.complete = self.page.len() < self.page_size;
        self.pos = 0;
        Ok(self.page.first().cloned())
    }
}

impl CursorSource for TableSource {
    fn first(&mut self, params: &CursorParams) -> StorageResult<Option<CursorEntry>> {
        self.load(params, None)
    }

    fn after(
        &mut self,
        params: &CursorParams,
        current: &CursorEntry,
    ) -> StorageResult<Option<CursorEntry>> {
        if self.pos + 1 < self.page.len() {
            self.pos += 1;
            return Ok(Some(self.page[self.pos].clone()));
        }
        if self.complete {
            return Ok(None);
        }
        trace!(cursor = %params, "replaying query past the page end");
        let resume = SeekTarget::after(current.effective_key().clone(), current.primary_key.clone());
        self.load(params, Some(&resume))
    }

    fn seek(
        &mut self,
        params: &CursorParams,
        _current: &CursorEntry,
        target: &SeekTarget,
    ) -> StorageResult<Option<CursorEntry>> {
        let ahead = self.page.get(self.pos + 1..).unwrap_or_default();
        if let Some(offset) = ahead
            .iter()
            .position(|e| target.is_reached_by(e, params.direction))
        {
            self.pos += 1 + offset;
            return Ok(Some(self.page[self.pos].clone()));
        }
        if self.complete {
            return Ok(None);
        }
        trace!(cursor = %params, target = %target.key, "replaying query at seek target");
        self.load(params, Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::AdvanceTarget;
    use crate::range::Direction;
    use weft_common::types::Value;

    fn k(n: u64) -> Key {
        Key::from_u64(n)
    }

    fn backend(page_size: usize) -> TableBackend {
        let backend = TableBackend::with_page_size([StoreSchema::new("t").with_index("by_tag")], page_size);
        // (pk, tag); several rows share a tag so resumes have to skip by pk.
        let rows = [(1, 7), (2, 3), (3, 7), (4, 7), (5, 3), (6, 9), (7, 7), (8, 1)];
        backend
            .preload(
                "t",
                rows.iter().map(|(pk, tag)| {
                    Record::new(k(*pk), Value::from_str(&format!("r{pk}")))
                        .with_index_key("by_tag", k(*tag))
                }),
            )
            .unwrap();
        backend
    }

    async fn drain(cursor: &mut Box<dyn Cursor>) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        let mut row = cursor.open().await.unwrap();
        while let Some(e) = row {
            out.push((
                e.effective_key().to_u64().unwrap(),
                e.primary_key.to_u64().unwrap(),
            ));
            row = cursor.advance(AdvanceTarget::Next).await.unwrap();
        }
        out
    }

    #[tokio::test]
    async fn test_paged_scan_matches_single_query() {
        let expected = vec![(1, 8), (3, 2), (3, 5), (7, 1), (7, 3), (7, 4), (7, 7), (9, 6)];
        for page_size in [1, 2, 3, 64] {
            let backend = backend(page_size);
            let txn = backend.begin(TxnId::new(1), &Scope::read_only(["t"])).await.unwrap();
            let mut cursor = txn.open_cursor(CursorParams::store("t").index("by_tag")).await.unwrap();
            assert_eq!(drain(&mut cursor).await, expected, "page size {page_size}");
        }
    }

    #[tokio::test]
    async fn test_reverse_paged_scan() {
        let backend = backend(2);
        let txn = backend.begin(TxnId::new(1), &Scope::read_only(["t"])).await.unwrap();
        let params = CursorParams::store("t")
            .index("by_tag")
            .range(KeyRange::bound(k(3), k(7), false, false))
            .direction(Direction::Reverse);
        let mut cursor = txn.open_cursor(params).await.unwrap();
        assert_eq!(
            drain(&mut cursor).await,
            vec![(7, 7), (7, 4), (7, 3), (7, 1), (3, 5), (3, 2)]
        );
    }

    #[tokio::test]
    async fn test_seek_within_and_beyond_page() {
        let backend = backend(2);
        let txn = backend.begin(TxnId::new(1), &Scope::read_only(["t"])).await.unwrap();
        let mut cursor = txn.open_cursor(CursorParams::store("t").index("by_tag")).await.unwrap();
        cursor.open().await.unwrap();

        // In the first page.
        let row = cursor
            .advance(AdvanceTarget::Seek(SeekTarget::key(k(2))))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.primary_key, k(2));

        // Beyond it: replays and skips rows at or before the target.
        let row = cursor
            .advance(AdvanceTarget::Seek(SeekTarget::after(k(7), k(3))))
            .await
            .unwrap()
            .unwrap();
        assert_eq!((row.index_key, row.primary_key), (Some(k(7)), k(4)));

        assert!(cursor
            .advance(AdvanceTarget::Seek(SeekTarget::key(k(10))))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_primary_cursor_and_count() {
        let backend = backend(3);
        let txn = backend.begin(TxnId::new(1), &Scope::read_only(["t"])).await.unwrap();
        let params = CursorParams::store("t").range(KeyRange::bound(k(3), k(6), false, true));
        let mut cursor = txn.open_cursor(params).await.unwrap();
        assert_eq!(drain(&mut cursor).await, vec![(3, 3), (4, 4), (5, 5)]);

        let n = txn.count("t", Some("by_tag"), &KeyRange::only(k(7))).await.unwrap();
        assert_eq!(n, 4);
        let n = txn.count("t", None, &KeyRange::all()).await.unwrap();
        assert_eq!(n, 8);
    }

    #[tokio::test]
    async fn test_keys_only_rows_carry_no_value() {
        let backend = backend(4);
        let txn = backend.begin(TxnId::new(1), &Scope::read_only(["t"])).await.unwrap();
        let mut cursor = txn.open_cursor(CursorParams::store("t").keys_only(true)).await.unwrap();
        let row = cursor.open().await.unwrap().unwrap();
        assert!(row.value.is_none());

        let mut cursor = txn.open_cursor(CursorParams::store("t")).await.unwrap();
        let row = cursor.open().await.unwrap().unwrap();
        assert_eq!(row.value, Some(Value::from_str("r1")));
    }
}
