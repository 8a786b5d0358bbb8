//! Configuration Module
//!
//! Configuration loading for the ingester.

mod settings;

pub use settings::{
    BackoffMode, BatchSettings, ConfigError, Credentials, IngestConfig, ReconnectSettings,
    ServerSettings, StoreSettings,
};
