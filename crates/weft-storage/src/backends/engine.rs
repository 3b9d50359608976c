//! Transaction machinery shared by the in-process engines.
//!
//! Both engines keep each store as an immutable snapshot behind an `Arc`.
//! A transaction starts from the snapshots of its scope; the first write to a
//! store copies it (`Arc::make_mut`), and commit publishes the copies back to
//! the catalog. Abort simply drops them.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};
use weft_common::types::{Key, Scope, TxnId, TxnMode, Value};

use crate::backend::{BackendKind, BackendTransaction, Record, StoreSchema};
use crate::cursor::{Cursor, CursorParams};
use crate::error::{StorageError, StorageResult};
use crate::range::KeyRange;

/// Data layout of one store inside an engine.
pub(crate) trait StoreEngine: Clone + Default + Send + Sync + 'static {
    /// Engine-wide cursor tuning.
    type Options: Send + Sync + 'static;

    fn get(&self, key: &Key) -> Option<&Record>;

    /// Inserts or replaces a validated record.
    fn put(&mut self, record: Record);

    fn delete(&mut self, key: &Key) -> bool;

    fn count(&self, index: Option<&str>, range: &KeyRange) -> usize;

    /// Creates an unopened cursor reading through `txn`.
    fn cursor(txn: Arc<TxnShared<Self>>, params: CursorParams, options: &Self::Options) -> Box<dyn Cursor>;
}

/// Committed state of an engine.
pub(crate) struct Catalog<E: StoreEngine> {
    kind: BackendKind,
    schemas: BTreeMap<String, StoreSchema>,
    stores: RwLock<BTreeMap<String, Arc<E>>>,
    ready: AtomicBool,
    options: E::Options,
}

impl<E: StoreEngine> Catalog<E> {
    pub(crate) fn new(
        kind: BackendKind,
        schemas: impl IntoIterator<Item = StoreSchema>,
        options: E::Options,
    ) -> Self {
        let schemas: BTreeMap<String, StoreSchema> =
            schemas.into_iter().map(|s| (s.name.clone(), s)).collect();
        let stores = schemas
            .keys()
            .map(|name| (name.clone(), Arc::new(E::default())))
            .collect();
        Self {
            kind,
            schemas,
            stores: RwLock::new(stores),
            ready: AtomicBool::new(true),
            options,
        }
    }

    pub(crate) fn kind(&self) -> BackendKind {
        self.kind
    }

    pub(crate) fn schema(&self, store: &str) -> Option<&StoreSchema> {
        self.schemas.get(store)
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        if self.ready.swap(false, Ordering::AcqRel) {
            debug!(backend = %self.kind, "backend closed");
        }
    }

    /// Writes records straight into committed state.
    pub(crate) fn preload(
        &self,
        store: &str,
        records: impl IntoIterator<Item = Record>,
    ) -> StorageResult<()> {
        let schema = self
            .schemas
            .get(store)
            .ok_or_else(|| StorageError::StoreNotFound(store.to_string()))?;
        let mut stores = self.stores.write();
        let data = stores
            .get_mut(store)
            .ok_or_else(|| StorageError::StoreNotFound(store.to_string()))?;
        let data = Arc::make_mut(data);
        for record in records {
            record.validate(schema)?;
            data.put(record);
        }
        Ok(())
    }

    pub(crate) fn begin(
        self: &Arc<Self>,
        id: TxnId,
        scope: &Scope,
    ) -> StorageResult<Arc<dyn BackendTransaction>> {
        if !self.is_ready() {
            return Err(StorageError::BackendUnavailable);
        }

        let committed = self.stores.read();
        let stores = if scope.mode() == TxnMode::VersionChange {
            committed.clone()
        } else {
            let mut stores = BTreeMap::new();
            for name in scope.stores() {
                let data = committed
                    .get(name)
                    .ok_or_else(|| StorageError::StoreNotFound(name.to_string()))?;
                stores.insert(name.to_string(), Arc::clone(data));
            }
            stores
        };
        drop(committed);

        trace!(backend = %self.kind, txn_id = %id, scope = %scope, "backend transaction started");
        let shared = TxnShared {
            id,
            scope: scope.clone(),
            catalog: Arc::clone(self),
            inner: Mutex::new(TxnInner {
                phase: Phase::Active,
                stores,
                dirty: BTreeSet::new(),
            }),
        };
        Ok(Arc::new(EngineTransaction {
            shared: Arc::new(shared),
        }))
    }

    fn publish(&self, updates: Vec<(String, Arc<E>)>) {
        let mut stores = self.stores.write();
        for (name, data) in updates {
            stores.insert(name, data);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Committed,
    Aborted,
}

struct TxnInner<E> {
    phase: Phase,
    stores: BTreeMap<String, Arc<E>>,
    dirty: BTreeSet<String>,
}

/// State of one transaction, shared with the cursors it opened.
pub(crate) struct TxnShared<E: StoreEngine> {
    id: TxnId,
    scope: Scope,
    catalog: Arc<Catalog<E>>,
    inner: Mutex<TxnInner<E>>,
}

impl<E: StoreEngine> TxnShared<E> {
    /// Returns the transaction's current view of a store.
    pub(crate) fn read(&self, store: &str) -> StorageResult<Arc<E>> {
        let inner = self.inner.lock();
        if inner.phase != Phase::Active {
            return Err(StorageError::TransactionInactive(self.id));
        }
        inner
            .stores
            .get(store)
            .cloned()
            .ok_or_else(|| self.missing(store))
    }

    fn write<R>(
        &self,
        store: &str,
        f: impl FnOnce(&mut E, &StoreSchema) -> StorageResult<R>,
    ) -> StorageResult<R> {
        if !self.scope.mode().is_writable() {
            return Err(StorageError::ReadOnlyTransaction(store.to_string()));
        }
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.phase != Phase::Active {
            return Err(StorageError::TransactionInactive(self.id));
        }
        let schema = self
            .catalog
            .schema(store)
            .ok_or_else(|| StorageError::StoreNotFound(store.to_string()))?;
        let data = inner
            .stores
            .get_mut(store)
            .ok_or_else(|| StorageError::StoreNotInScope(store.to_string()))?;
        let out = f(Arc::make_mut(data), schema)?;
        inner.dirty.insert(store.to_string());
        Ok(out)
    }

    fn check_index(&self, store: &str, index: Option<&str>) -> StorageResult<()> {
        let schema = self
            .catalog
            .schema(store)
            .ok_or_else(|| StorageError::StoreNotFound(store.to_string()))?;
        match index {
            Some(index) if !schema.has_index(index) => {
                Err(StorageError::index_not_found(store, index))
            }
            _ => Ok(()),
        }
    }

    fn missing(&self, store: &str) -> StorageError {
        if self.catalog.schema(store).is_some() {
            StorageError::StoreNotInScope(store.to_string())
        } else {
            StorageError::StoreNotFound(store.to_string())
        }
    }

    fn is_active(&self) -> bool {
        self.inner.lock().phase == Phase::Active
    }

    fn commit(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Active {
            return Err(StorageError::TransactionInactive(self.id));
        }
        if !self.catalog.is_ready() {
            inner.phase = Phase::Aborted;
            inner.stores.clear();
            return Err(StorageError::BackendUnavailable);
        }
        inner.phase = Phase::Committed;
        let dirty = mem::take(&mut inner.dirty);
        let mut stores = mem::take(&mut inner.stores);
        drop(inner);

        let updates: Vec<(String, Arc<E>)> = dirty
            .into_iter()
            .filter_map(|name| stores.remove(&name).map(|data| (name, data)))
            .collect();
        debug!(txn_id = %self.id, stores = updates.len(), "backend transaction committed");
        self.catalog.publish(updates);
        Ok(())
    }

    fn abort(&self) {
        let mut inner = self.inner.lock();
        if inner.phase == Phase::Active {
            inner.phase = Phase::Aborted;
            inner.stores.clear();
            inner.dirty.clear();
            debug!(txn_id = %self.id, "backend transaction aborted");
        }
    }
}

/// [`BackendTransaction`] over a [`StoreEngine`].
pub(crate) struct EngineTransaction<E: StoreEngine> {
    shared: Arc<TxnShared<E>>,
}

#[async_trait]
impl<E: StoreEngine> BackendTransaction for EngineTransaction<E> {
    fn id(&self) -> TxnId {
        self.shared.id
    }

    fn scope(&self) -> &Scope {
        &self.shared.scope
    }

    fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    async fn get(&self, store: &str, key: &Key) -> StorageResult<Option<Value>> {
        let data = self.shared.read(store)?;
        Ok(data.get(key).map(|r| r.value.clone()))
    }

    async fn put(&self, store: &str, record: Record) -> StorageResult<()> {
        self.shared.write(store, |data, schema| {
            record.validate(schema)?;
            data.put(record);
            Ok(())
        })
    }

    async fn delete(&self, store: &str, key: &Key) -> StorageResult<bool> {
        self.shared.write(store, |data, _| Ok(data.delete(key)))
    }

    async fn count(&self, store: &str, index: Option<&str>, range: &KeyRange) -> StorageResult<usize> {
        self.shared.check_index(store, index)?;
        let data = self.shared.read(store)?;
        Ok(data.count(index, range))
    }

    async fn open_cursor(&self, params: CursorParams) -> StorageResult<Box<dyn Cursor>> {
        self.shared.check_index(&params.store, params.index.as_deref())?;
        self.shared.read(&params.store)?;
        Ok(E::cursor(
            Arc::clone(&self.shared),
            params,
            &self.shared.catalog.options,
        ))
    }

    async fn commit(&self) -> StorageResult<()> {
        self.shared.commit()
    }

    fn abort(&self) {
        self.shared.abort();
    }
}
