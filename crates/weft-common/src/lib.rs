//! # weft-common
//!
//! Common types, errors, and configuration for Weft.
//!
//! This crate provides the foundational types shared by the storage,
//! transaction, and query layers:
//!
//! - **Types**: `Key`, `Value`, `TxnId`, and the `Scope`/`TxnMode` pair that
//!   the scheduler's isolation rules are expressed in
//! - **Errors**: `ErrorCode` and `ErrorClass`, the taxonomy every crate
//!   error maps onto
//! - **Config**: `WeftConfig` and its sections, loadable from TOML
//! - **Constants**: shared defaults and limits
//!
//! ## Example
//!
//! ```rust
//! use weft_common::types::{Key, Scope};
//!
//! let reader = Scope::read_only(["users"]);
//! let writer = Scope::read_write(["users", "orders"]);
//! assert!(reader.conflicts_with(&writer));
//! assert!(Key::from_u64(1) < Key::from_u64(2));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::WeftConfig;
pub use error::{ErrorClass, ErrorCode};
pub use types::{Key, Scope, TxnId, TxnMode, Value};
