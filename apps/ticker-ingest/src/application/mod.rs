//! Application Layer - Ingestion services and port definitions.
//!
//! The services here hold all retry, batching and shutdown logic. They
//! talk to the feed and the store only through the ports.

/// Port interfaces for the feed and the store.
pub mod ports;

/// Flush scheduling, stream consumption, reconnection and the pipeline.
pub mod services;
