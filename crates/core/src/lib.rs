//! Shared types for the FreshCart storefront client: configuration, errors,
//! wire payloads, and the persisted key/value state the tracker reads.

pub mod config;
pub mod error;
pub mod storage;
pub mod types;

pub use config::AppConfig;
pub use error::{FreshcartError, FreshcartResult};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
