//! # weft-query
//!
//! Query execution over Weft transactions.
//!
//! This crate implements:
//! - Read-ahead streaming of cursors ([`Streamer`])
//! - Zig-zag intersection and nested-loop probing ([`join`])
//! - Query execution with lazily pulled results ([`QueryExecutor`],
//!   [`ResultSequence`])
//!
//! # Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use weft_common::types::{Key, Value};
//! use weft_query::{IteratorSpec, QueryError, QueryExecutor, QuerySpec};
//! use weft_storage::{OrderedBackend, Record, StoreSchema};
//! use weft_txn::TransactionManager;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), QueryError> {
//! let backend = OrderedBackend::new([StoreSchema::new("odd"), StoreSchema::new("square")]);
//! # let rec = |n: u64| Record::new(Key::from_u64(n), Value::from_str("x"));
//! # backend.preload("odd", [1, 3, 5, 7, 9].map(rec)).unwrap();
//! # backend.preload("square", [1, 4, 9].map(rec)).unwrap();
//! let executor = QueryExecutor::new(TransactionManager::new(Arc::new(backend)));
//!
//! let spec = QuerySpec::intersect([IteratorSpec::store("odd"), IteratorSpec::store("square")]);
//! let rows = executor.execute(&spec).await?.collect().await?;
//! assert_eq!(rows.len(), 2);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod executor;
pub mod join;
pub mod query;
pub mod streamer;

pub use error::{QueryError, QueryResult};
pub use executor::{QueryExecutor, ResultSequence, SequenceState};
pub use join::{
    JoinRow, JoinSolver, NestedLoopSolver, ScanSolver, SolverFactory, SolverInput, ZigZagSolver,
};
pub use query::{CombineRule, IteratorSpec, QuerySpec};
pub use streamer::Streamer;
