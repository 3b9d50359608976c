//! The backend adapter contract.
//!
//! A [`Backend`] is one concrete storage engine. The core never inspects
//! which engine it holds: it begins transactions over a [`Scope`], and
//! everything else goes through the returned [`BackendTransaction`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use weft_common::constants::{MAX_KEY_SIZE, MAX_VALUE_SIZE};
use weft_common::types::{Key, Scope, TxnId, TxnMode, Value};

use crate::cursor::{Cursor, CursorParams};
use crate::error::{StorageError, StorageResult};
use crate::range::KeyRange;

/// Which engine family a backend belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Native ordered-cursor store.
    Ordered,
    /// Table store driven by sorted queries.
    Table,
}

impl BackendKind {
    /// Returns the engine name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Ordered => "ordered",
            BackendKind::Table => "table",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of a store and its secondary indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSchema {
    /// Store name.
    pub name: String,
    /// Index names.
    pub indexes: Vec<String>,
}

impl StoreSchema {
    /// Declares a store without indexes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    /// Adds an index.
    #[must_use]
    pub fn with_index(mut self, name: impl Into<String>) -> Self {
        self.indexes.push(name.into());
        self
    }

    /// Checks whether the store declares an index.
    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|i| i == name)
    }
}

/// A record as written to a store.
///
/// A record that carries no key for an index is absent from that index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Primary key.
    pub primary_key: Key,
    /// Payload.
    pub value: Value,
    /// Index name to index key.
    pub index_keys: BTreeMap<String, Key>,
}

impl Record {
    /// Creates a record with no index keys.
    pub fn new(primary_key: Key, value: Value) -> Self {
        Self {
            primary_key,
            value,
            index_keys: BTreeMap::new(),
        }
    }

    /// Sets the key of one index.
    #[must_use]
    pub fn with_index_key(mut self, index: impl Into<String>, key: Key) -> Self {
        self.index_keys.insert(index.into(), key);
        self
    }

    /// Returns the key under `index`, or the primary key for `None`.
    pub fn key_for(&self, index: Option<&str>) -> Option<&Key> {
        match index {
            None => Some(&self.primary_key),
            Some(name) => self.index_keys.get(name),
        }
    }

    /// Checks sizes and index names against a schema.
    pub fn validate(&self, schema: &StoreSchema) -> StorageResult<()> {
        check_key(&self.primary_key)?;
        if self.value.len() > MAX_VALUE_SIZE {
            return Err(StorageError::ValueTooLarge {
                size: self.value.len(),
                max: MAX_VALUE_SIZE,
            });
        }
        for (index, key) in &self.index_keys {
            if !schema.has_index(index) {
                return Err(StorageError::index_not_found(&schema.name, index));
            }
            check_key(key)?;
        }
        Ok(())
    }
}

fn check_key(key: &Key) -> StorageResult<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(StorageError::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

/// A storage engine.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the engine family.
    fn kind(&self) -> BackendKind;

    /// Returns false once the backend is closed.
    fn is_ready(&self) -> bool;

    /// Returns the declared schema of a store.
    fn schema(&self, store: &str) -> Option<StoreSchema>;

    /// Starts a transaction over `scope`.
    ///
    /// The caller is responsible for isolation between overlapping scopes;
    /// the backend only enforces the scope and mode it is given.
    async fn begin(&self, id: TxnId, scope: &Scope) -> StorageResult<Arc<dyn BackendTransaction>>;

    /// Closes the backend. Later `begin` calls fail.
    fn close(&self);
}

/// One running transaction inside a backend.
#[async_trait]
pub trait BackendTransaction: Send + Sync {
    /// Returns the transaction id.
    fn id(&self) -> TxnId;

    /// Returns the scope the transaction was started with.
    fn scope(&self) -> &Scope;

    /// Returns the access mode.
    fn mode(&self) -> TxnMode {
        self.scope().mode()
    }

    /// Returns true until the transaction commits or aborts.
    fn is_active(&self) -> bool;

    /// Reads one record value by primary key.
    async fn get(&self, store: &str, key: &Key) -> StorageResult<Option<Value>>;

    /// Inserts or replaces a record.
    async fn put(&self, store: &str, record: Record) -> StorageResult<()>;

    /// Deletes a record. Returns true if it existed.
    async fn delete(&self, store: &str, key: &Key) -> StorageResult<bool>;

    /// Counts rows of a store or index within a range.
    async fn count(&self, store: &str, index: Option<&str>, range: &KeyRange) -> StorageResult<usize>;

    /// Opens an unpositioned cursor. Call [`Cursor::open`] to position it.
    async fn open_cursor(&self, params: CursorParams) -> StorageResult<Box<dyn Cursor>>;

    /// Makes the transaction's writes visible.
    async fn commit(&self) -> StorageResult<()>;

    /// Discards the transaction's writes. Idempotent, and a no-op after
    /// commit.
    fn abort(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_validation() {
        let schema = StoreSchema::new("users").with_index("by_age");
        let ok = Record::new(Key::from_u64(1), Value::from_str("ann"))
            .with_index_key("by_age", Key::from_u64(30));
        assert!(ok.validate(&schema).is_ok());
        assert_eq!(ok.key_for(Some("by_age")), Some(&Key::from_u64(30)));
        assert_eq!(ok.key_for(None), Some(&Key::from_u64(1)));

        let bad = Record::new(Key::from_u64(2), Value::from_str("bob"))
            .with_index_key("by_name", Key::from_str("bob"));
        assert!(matches!(
            bad.validate(&schema),
            Err(StorageError::IndexNotFound { .. })
        ));

        let huge = Record::new(Key::from_vec(vec![0; MAX_KEY_SIZE + 1]), Value::from_str(""));
        assert!(matches!(
            huge.validate(&schema),
            Err(StorageError::KeyTooLarge { .. })
        ));
    }

    #[test]
    fn test_backend_kind() {
        assert_eq!(BackendKind::Ordered.to_string(), "ordered");
        assert_eq!(BackendKind::Table.as_str(), "table");
    }
}
