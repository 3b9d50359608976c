//! # weft-txn
//!
//! Transaction scheduling for Weft.
//!
//! This crate decides when transactions run and keeps them honest while they
//! do:
//!
//! - **Scheduling**: the [`Scheduler`] admits requests over named stores,
//!   running readers side by side and serializing overlapping writers in
//!   submission order.
//!
//! - **Lifecycle**: the [`TransactionManager`] starts backend transactions
//!   for admitted requests and commits, aborts or times them out.
//!
//! - **Liveness**: a [`TxnHandle`] and every [`TxnCursor`] opened through it
//!   stop working the moment the transaction ends.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 TransactionManager                   │
//! │                        │                             │
//! │        ┌───────────────┴───────────────┐             │
//! │        ▼                               ▼             │
//! │ ┌─────────────┐                 ┌─────────────┐      │
//! │ │  Scheduler  │── ScopeLease ──▶│  TxnHandle  │      │
//! │ └─────────────┘                 └─────────────┘      │
//! │                                        │             │
//! │                                        ▼             │
//! │                          ┌──────────────────────────┐│
//! │                          │ BackendTransaction       ││
//! │                          │ (weft-storage)           ││
//! │                          └──────────────────────────┘│
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use weft_common::types::{Key, Scope, Value};
//! use weft_storage::{OrderedBackend, Record, StoreSchema};
//! use weft_txn::{TransactionManager, TxnError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), TxnError> {
//! let backend = Arc::new(OrderedBackend::new([StoreSchema::new("users")]));
//! let tm = TransactionManager::new(backend);
//!
//! tm.run(Scope::read_write(["users"]), |txn| async move {
//!     txn.put("users", Record::new(Key::from_u64(1), Value::from_str("ann"))).await
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

/// Transaction lifecycle management.
///
/// This module provides:
/// - [`manager::TransactionManager`]: Runs units of work in transactions
/// - [`manager::TxnHandle`]: Handle to a running transaction
/// - [`manager::TxnCursor`]: Cursor bound to a transaction's lifetime
pub mod manager;

/// Scope admission.
///
/// This module provides:
/// - [`scheduler::Scheduler`]: FIFO admission over store scopes
/// - [`scheduler::Admission`]: A request waiting for its scope
/// - [`scheduler::ScopeLease`]: A granted scope
pub mod scheduler;

pub use error::{TxnError, TxnResult};
pub use manager::{Completion, TransactionManager, TxnCursor, TxnHandle, TxnState};
pub use scheduler::{Admission, Scheduler, SchedulerStats, ScopeLease};
