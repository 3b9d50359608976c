//! Configuration for Weft.
//!
//! Every section has working defaults; a TOML file only needs to name the
//! values it overrides.

mod weft;

pub use weft::{ConfigError, QueryConfig, SchedulerConfig, StreamerConfig, WeftConfig};
