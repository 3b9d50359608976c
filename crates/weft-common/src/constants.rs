//! System-wide constants for Weft.
//!
//! Defaults that more than one crate needs to agree on live here; crate-local
//! tuning knobs live with their configuration structs.

// =============================================================================
// Key and Value Limits
// =============================================================================

/// Maximum key size in bytes (16 KB).
pub const MAX_KEY_SIZE: usize = 16 * 1024;

/// Maximum value size in bytes (1 MB).
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

// =============================================================================
// Scheduler Defaults
// =============================================================================

/// Default limit on how long a unit of work may hold its scope (30 seconds).
///
/// A transaction that outlives this is aborted and its scope released.
pub const DEFAULT_TXN_TIMEOUT_MS: u64 = 30_000;

/// Default cap on queued (not yet admitted) transaction requests.
///
/// Zero disables the cap.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 0;

// =============================================================================
// Streamer Defaults
// =============================================================================

/// Default look-ahead buffer size of a streamer, in rows.
///
/// This is also the maximum number of backend reads a streamer keeps
/// outstanding ahead of its consumer.
pub const DEFAULT_STREAMER_BUFFER: usize = 16;

/// Upper bound on a streamer's look-ahead buffer.
pub const MAX_STREAMER_BUFFER: usize = 4096;
