//! Native ordered-cursor engine.
//!
//! Records live in a `BTreeMap` keyed by primary key and every index is a
//! `BTreeSet<(index_key, primary_key)>`. Cursor moves are range lookups on
//! those trees, so seeking costs a tree descent no matter how far the target
//! is from the current row.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use weft_common::types::{Key, Scope, TxnId};

use super::engine::{Catalog, StoreEngine, TxnShared};
use crate::backend::{Backend, BackendKind, BackendTransaction, Record, StoreSchema};
use crate::cursor::{Cursor, CursorEntry, CursorParams, CursorSource, SeekTarget, SourceCursor};
use crate::error::StorageResult;
use crate::range::{Direction, KeyRange};

/// `(effective_key, primary_key)`.
type Position = (Key, Key);

/// Backend over ordered in-memory trees.
///
/// # Example
///
/// ```rust
/// use weft_storage::{OrderedBackend, Record, StoreSchema};
/// use weft_common::types::{Key, Value};
///
/// let backend = OrderedBackend::new([StoreSchema::new("users").with_index("by_age")]);
/// backend
///     .preload("users", [Record::new(Key::from_u64(1), Value::from_str("ann"))])
///     .unwrap();
/// ```
pub struct OrderedBackend {
    catalog: Arc<Catalog<OrderedStore>>,
}

impl OrderedBackend {
    /// Creates a backend with the given stores, all empty.
    pub fn new(schemas: impl IntoIterator<Item = StoreSchema>) -> Self {
        Self {
            catalog: Arc::new(Catalog::new(BackendKind::Ordered, schemas, ())),
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
impl Backend for OrderedBackend {
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

#[derive(Debug, Clone, Default)]
pub(crate) struct OrderedStore {
    records: BTreeMap<Key, Record>,
    indexes: BTreeMap<String, BTreeSet<Position>>,
}

impl OrderedStore {
    /// Positions strictly inside `(lo, hi)`, ascending.
    fn positions(
        &self,
        index: Option<&str>,
        lo: Bound<Position>,
        hi: Bound<Position>,
    ) -> Box<dyn DoubleEndedIterator<Item = Position> + '_> {
        match index {
            None => {
                let lo = lower_primary(lo);
                let hi = upper_primary(hi);
                if !is_valid(&lo, &hi) {
                    return Box::new(std::iter::empty());
                }
                Box::new(
                    self.records
                        .range((lo, hi))
                        .map(|(pk, _)| (pk.clone(), pk.clone())),
                )
            }
            Some(name) => match self.indexes.get(name) {
                Some(set) if is_valid(&lo, &hi) => Box::new(set.range((lo, hi)).cloned()),
                _ => Box::new(std::iter::empty()),
            },
        }
    }

    fn entry(&self, params: &CursorParams, (ek, pk): Position) -> CursorEntry {
        let value = if params.keys_only {
            None
        } else {
            self.records.get(&pk).map(|r| r.value.clone())
        };
        match params.index {
            Some(_) => CursorEntry::indexed(ek, pk, value),
            None => CursorEntry::primary(pk, value),
        }
    }

    fn pick(
        &self,
        params: &CursorParams,
        lo: Bound<Position>,
        hi: Bound<Position>,
    ) -> Option<CursorEntry> {
        let mut positions = self.positions(params.index.as_deref(), lo, hi);
        let found = match params.direction {
            Direction::Forward => positions.next(),
            Direction::Reverse => positions.next_back(),
        };
        found.map(|pos| self.entry(params, pos))
    }
}

impl StoreEngine for OrderedStore {
    type Options = ();

    fn get(&self, key: &Key) -> Option<&Record> {
        self.records.get(key)
    }

    fn put(&mut self, record: Record) {
        self.delete(&record.primary_key);
        for (index, key) in &record.index_keys {
            self.indexes
                .entry(index.clone())
                .or_default()
                .insert((key.clone(), record.primary_key.clone()));
        }
        self.records.insert(record.primary_key.clone(), record);
    }

    fn delete(&mut self, key: &Key) -> bool {
        let Some(old) = self.records.remove(key) else {
            return false;
        };
        for (index, index_key) in old.index_keys {
            if let Some(set) = self.indexes.get_mut(&index) {
                set.remove(&(index_key, old.primary_key.clone()));
            }
        }
        true
    }

    fn count(&self, index: Option<&str>, range: &KeyRange) -> usize {
        let (lo, hi) = range_positions(range);
        self.positions(index, lo, hi).count()
    }

    fn cursor(txn: Arc<TxnShared<Self>>, params: CursorParams, _options: &()) -> Box<dyn Cursor> {
        Box::new(SourceCursor::new(params, OrderedSource { txn }))
    }
}

struct OrderedSource {
    txn: Arc<TxnShared<OrderedStore>>,
}

impl CursorSource for OrderedSource {
    fn first(&mut self, params: &CursorParams) -> StorageResult<Option<CursorEntry>> {
        let store = self.txn.read(&params.store)?;
        let (lo, hi) = range_positions(&params.range);
        Ok(store.pick(params, lo, hi))
    }

    fn after(
        &mut self,
        params: &CursorParams,
        current: &CursorEntry,
    ) -> StorageResult<Option<CursorEntry>> {
        let store = self.txn.read(&params.store)?;
        let (lo, hi) = range_positions(&params.range);
        let here = Bound::Excluded((current.effective_key().clone(), current.primary_key.clone()));
        Ok(match params.direction {
            Direction::Forward => store.pick(params, here, hi),
            Direction::Reverse => store.pick(params, lo, here),
        })
    }

    fn seek(
        &mut self,
        params: &CursorParams,
        _current: &CursorEntry,
        target: &SeekTarget,
    ) -> StorageResult<Option<CursorEntry>> {
        let store = self.txn.read(&params.store)?;
        let (lo, hi) = range_positions(&params.range);
        Ok(match params.direction {
            Direction::Forward => store.pick(params, target_lower(target), hi),
            Direction::Reverse => store.pick(params, lo, target_upper(target)),
        })
    }
}

/// Smallest key sorting after `key`.
fn just_after(key: &Key) -> Key {
    let mut bytes = key.to_vec();
    bytes.push(0);
    Key::from_vec(bytes)
}

fn range_positions(range: &KeyRange) -> (Bound<Position>, Bound<Position>) {
    let lo = match &range.lower {
        Bound::Included(k) => Bound::Included((k.clone(), Key::empty())),
        Bound::Excluded(k) => Bound::Included((just_after(k), Key::empty())),
        Bound::Unbounded => Bound::Unbounded,
    };
    let hi = match &range.upper {
        Bound::Included(k) => Bound::Excluded((just_after(k), Key::empty())),
        Bound::Excluded(k) => Bound::Excluded((k.clone(), Key::empty())),
        Bound::Unbounded => Bound::Unbounded,
    };
    (lo, hi)
}

/// Lower bound of the rows at or after `target` in ascending order.
fn target_lower(target: &SeekTarget) -> Bound<Position> {
    match (&target.primary_key, target.exclusive) {
        (None, false) => Bound::Included((target.key.clone(), Key::empty())),
        (None, true) => Bound::Included((just_after(&target.key), Key::empty())),
        (Some(pk), false) => Bound::Included((target.key.clone(), pk.clone())),
        (Some(pk), true) => Bound::Excluded((target.key.clone(), pk.clone())),
    }
}

/// Upper bound of the rows at or after `target` in descending order.
fn target_upper(target: &SeekTarget) -> Bound<Position> {
    match (&target.primary_key, target.exclusive) {
        (None, false) => Bound::Excluded((just_after(&target.key), Key::empty())),
        (None, true) => Bound::Excluded((target.key.clone(), Key::empty())),
        (Some(pk), false) => Bound::Included((target.key.clone(), pk.clone())),
        (Some(pk), true) => Bound::Excluded((target.key.clone(), pk.clone())),
    }
}

// Primary key cursors sit at positions `(pk, pk)`; these map a position
// bound onto the primary key tree.

fn lower_primary(bound: Bound<Position>) -> Bound<Key> {
    match bound {
        Bound::Included((k, p)) if k >= p => Bound::Included(k),
        Bound::Included((k, _)) => Bound::Excluded(k),
        Bound::Excluded((k, p)) if k > p => Bound::Included(k),
        Bound::Excluded((k, _)) => Bound::Excluded(k),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn upper_primary(bound: Bound<Position>) -> Bound<Key> {
    match bound {
        Bound::Included((k, p)) if k <= p => Bound::Included(k),
        Bound::Included((k, _)) => Bound::Excluded(k),
        Bound::Excluded((k, p)) if k < p => Bound::Included(k),
        Bound::Excluded((k, _)) => Bound::Excluded(k),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// `BTreeMap::range` panics on inverted bounds.
fn is_valid<T: Ord>(lo: &Bound<T>, hi: &Bound<T>) -> bool {
    match (lo, hi) {
        (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b) | Bound::Excluded(b)) => {
            a < b || (a == b && !matches!((lo, hi), (Bound::Excluded(_), Bound::Excluded(_))))
        }
        _ => true,
    }
}
