//! Error taxonomy shared by every Weft crate.
//!
//! Each crate defines its own error enum; all of them map onto the codes and
//! classes here so callers can tell a backend failure from a programmer
//! error without matching on crate-specific variants.

mod codes;

pub use codes::{ErrorClass, ErrorCode};
