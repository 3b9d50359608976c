//! # weft-storage
//!
//! Backend adapter contract for Weft.
//!
//! This crate defines what the transaction and query layers need from a
//! storage engine, and nothing more:
//! - [`Backend`] and [`BackendTransaction`]: begin, read, write, commit, abort
//! - [`Cursor`]: a resumable, seekable iteration over a store or index
//! - [`KeyRange`] and [`Direction`]: what a cursor covers and in which order
//!
//! Two in-process engines implement the contract: [`OrderedBackend`], which
//! seeks natively, and [`TableBackend`], which replays sorted queries.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod backends;
pub mod cursor;
pub mod error;
pub mod range;

pub use backend::{Backend, BackendKind, BackendTransaction, Record, StoreSchema};
pub use backends::{OrderedBackend, TableBackend};
pub use cursor::{
    AdvanceTarget, Cursor, CursorEntry, CursorParams, CursorSource, CursorState, SeekStep,
    SeekTarget, SourceCursor,
};
pub use error::{StorageError, StorageResult};
pub use range::{Direction, KeyRange};
