//! Connection settings.

mod config;

pub use config::{ConnectionConfig, DEFAULT_SCHEMA};
