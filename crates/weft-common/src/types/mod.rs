//! Type definitions for Weft.
//!
//! This module contains the core types shared by the storage, transaction,
//! and query layers.

mod ids;
mod keys;
mod scope;

pub use ids::TxnId;
pub use keys::{Key, Value};
pub use scope::{Scope, TxnMode};
