//! Contract of an append-only, sharded change log (DynamoDB Streams and
//! similar).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::ChangeRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shard {
    pub log_id: String,
    pub shard_id: String,
    pub parent_shard_id: Option<String>,
    pub starting_sequence_number: Option<String>,
    /// `None` while the shard still receives writes.
    pub ending_sequence_number: Option<String>,
}

impl Shard {
    pub fn is_open(&self) -> bool {
        self.ending_sequence_number.is_none()
    }
}

/// One page of a shard listing. `last_evaluated_shard_id` is the
/// continuation token for the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardPage {
    pub shards: Vec<Shard>,
    pub last_evaluated_shard_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IteratorPosition {
    Latest,
    TrimHorizon,
}

impl IteratorPosition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "LATEST",
            Self::TrimHorizon => "TRIM_HORIZON",
        }
    }
}

impl fmt::Display for IteratorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    pub records: Vec<ChangeRecord>,
    /// `None` once the shard is closed and every record has been read.
    pub next_iterator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangeLogError {
    #[error("throttled: {0}")]
    Throttled(String),

    #[error("change log unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("shard iterator expired: {0}")]
    ExpiredIterator(String),

    #[error("shard listing for '{log_id}' returned its own continuation token '{token}'")]
    PaginationStalled { log_id: String, token: String },

    #[error("{0}")]
    Other(String),
}

impl ChangeLogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Unavailable(_))
    }
}

#[async_trait]
pub trait ChangeLog: Send + Sync {
    async fn describe_shards(
        &self,
        log_id: &str,
        exclusive_start_shard_id: Option<&str>,
    ) -> Result<ShardPage, ChangeLogError>;

    /// `Ok(None)` means there is nothing left to read from the shard at the
    /// requested position.
    async fn get_shard_iterator(
        &self,
        shard: &Shard,
        position: IteratorPosition,
    ) -> Result<Option<String>, ChangeLogError>;

    async fn get_records(&self, iterator: &str) -> Result<RecordBatch, ChangeLogError>;
}
