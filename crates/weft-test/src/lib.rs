//! # weft-test
//!
//! Integration tests for Weft.
//!
//! This crate contains:
//! - Seeded fixtures for both reference backends
//! - Tracing setup for tests
//! - An event log for observing the order of concurrent work

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, Once};

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;
use weft_common::types::{Key, Value};
use weft_query::JoinRow;
use weft_storage::{
    Backend, BackendKind, OrderedBackend, Record, StorageResult, StoreSchema, TableBackend,
};

/// Page size used for table fixtures, small enough that every scan pages.
pub const FIXTURE_PAGE_SIZE: usize = 2;

/// Both reference backends, for tests that must hold on either.
pub const BACKENDS: [BackendKind; 2] = [BackendKind::Ordered, BackendKind::Table];

static TRACING: Once = Once::new();

/// Installs a test subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to warnings from the weft crates.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("weft_storage=warn,weft_txn=warn,weft_query=warn")
        });
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// One store of a fixture: its schema and the records it starts with.
#[derive(Debug, Clone)]
pub struct StoreFixture {
    /// Store schema.
    pub schema: StoreSchema,
    /// Initial records.
    pub records: Vec<Record>,
}

impl StoreFixture {
    /// Creates a store whose records are keyed by `keys`.
    pub fn keys(name: &str, keys: impl IntoIterator<Item = u64>) -> Self {
        Self {
            schema: StoreSchema::new(name),
            records: keys.into_iter().map(record).collect(),
        }
    }

    /// Creates a store with one index; `rows` are `(primary key, index key)`.
    pub fn indexed(name: &str, index: &str, rows: impl IntoIterator<Item = (u64, u64)>) -> Self {
        Self {
            schema: StoreSchema::new(name).with_index(index),
            records: rows
                .into_iter()
                .map(|(pk, ik)| record(pk).with_index_key(index, Key::from_u64(ik)))
                .collect(),
        }
    }
}

/// A record keyed by `n` whose value encodes `n`.
pub fn record(n: u64) -> Record {
    Record::new(Key::from_u64(n), Value::from_vec(format!("v{n}").into_bytes()))
}

/// Builds a backend of `kind` holding `stores`.
pub fn backend_with(
    kind: BackendKind,
    stores: impl IntoIterator<Item = StoreFixture>,
) -> StorageResult<Arc<dyn Backend>> {
    let stores: Vec<StoreFixture> = stores.into_iter().collect();
    let schemas = stores.iter().map(|s| s.schema.clone());
    match kind {
        BackendKind::Ordered => {
            let backend = OrderedBackend::new(schemas);
            for store in stores {
                backend.preload(&store.schema.name, store.records)?;
            }
            Ok(Arc::new(backend))
        }
        BackendKind::Table => {
            let backend = TableBackend::with_page_size(schemas, FIXTURE_PAGE_SIZE);
            for store in stores {
                backend.preload(&store.schema.name, store.records)?;
            }
            Ok(Arc::new(backend))
        }
    }
}

/// The standard fixture shared by the integration tests:
///
/// | store    | contents                                   |
/// |----------|--------------------------------------------|
/// | `odd`    | 1, 3, 5, 7, 9                              |
/// | `mixed`  | 3, 4, 5, 8, 9                              |
/// | `outer`  | 1, 2, 3                                    |
/// | `inner`  | 2, 3                                       |
/// | `people` | ids 1..=6, index `age` with repeated ages  |
pub fn seeded(kind: BackendKind) -> Arc<dyn Backend> {
    let stores = [
        StoreFixture::keys("odd", [1, 3, 5, 7, 9]),
        StoreFixture::keys("mixed", [3, 4, 5, 8, 9]),
        StoreFixture::keys("outer", [1, 2, 3]),
        StoreFixture::keys("inner", [2, 3]),
        StoreFixture::indexed(
            "people",
            "age",
            [(1, 30), (2, 25), (3, 30), (4, 41), (5, 25), (6, 30)],
        ),
    ];
    match backend_with(kind, stores) {
        Ok(backend) => backend,
        Err(e) => panic!("fixture failed to load: {e}"),
    }
}

/// Returns the match keys of `rows` as integers.
pub fn row_keys(rows: &[JoinRow]) -> Vec<u64> {
    rows.iter().filter_map(|r| r.key.to_u64()).collect()
}

/// Returns participant 0's primary keys of `rows` as integers.
pub fn row_primary_keys(rows: &[JoinRow]) -> Vec<u64> {
    rows.iter()
        .filter_map(|r| r.primary_key().and_then(Key::to_u64))
        .collect()
}

/// An append-only log shared between concurrent tasks.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// Returns a copy of the events so far.
    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Returns the position of `event`, if it was logged.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }
}
