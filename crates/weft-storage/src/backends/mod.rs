//! In-process reference engines.
//!
//! - [`OrderedBackend`]: native ordered cursors over B-trees
//! - [`TableBackend`]: unordered tables read through sorted, paged queries
//!
//! Both honour the same cursor ordering contract, so anything built on
//! [`crate::Cursor`] behaves identically over either.

mod engine;
mod ordered;
mod table;

pub use ordered::OrderedBackend;
pub use table::{TableBackend, DEFAULT_PAGE_SIZE};
