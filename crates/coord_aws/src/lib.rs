//! AWS adapters for `coord_core`.
//!
//! This crate owns the SDK integration: the DynamoDB-backed key-value store,
//! the DynamoDB Streams change log, and the stdout handlers and logging
//! setup shared by the `streamgazer` and `lockctl` binaries.

pub mod adapters;
pub mod handlers;
pub mod logging;

pub use adapters::dynamodb::{DynamoDbStore, DynamoDbStoreConfig};
pub use adapters::streams::DynamoDbStreamsLog;
