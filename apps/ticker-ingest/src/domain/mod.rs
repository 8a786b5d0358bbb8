//! Domain Layer - Core ingestion types.
//!
//! Records, the batch buffer with its overflow bound, and the feed
//! connection state. Nothing here performs I/O.

/// Normalized tick rows.
pub mod record;

/// Batch buffer and overflow policy.
pub mod buffer;

/// Feed connection lifecycle state.
pub mod connection;
