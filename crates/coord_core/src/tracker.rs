use std::collections::HashSet;
use std::sync::Arc;

use crate::changelog::{ChangeLog, ChangeLogError, Shard};

pub struct ShardTracker<L> {
    log: Arc<L>,
}

impl<L> Clone for ShardTracker<L> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
        }
    }
}

impl<L: ChangeLog> ShardTracker<L> {
    pub fn new(log: Arc<L>) -> Self {
        Self { log }
    }

    /// Walks every page of the listing and returns the shards in page order.
    ///
    /// A shard id repeated on a later page is kept only once. Each call
    /// starts a fresh traversal.
    pub async fn list_all_shards(&self, log_id: &str) -> Result<Vec<Shard>, ChangeLogError> {
        let mut shards = Vec::new();
        let mut seen = HashSet::new();
        let mut exclusive_start: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .log
                .describe_shards(log_id, exclusive_start.as_deref())
                .await?;
            pages += 1;

            for shard in page.shards {
                if seen.insert(shard.shard_id.clone()) {
                    shards.push(shard);
                }
            }

            match page.last_evaluated_shard_id {
                Some(token) if exclusive_start.as_deref() == Some(token.as_str()) => {
                    return Err(ChangeLogError::PaginationStalled {
                        log_id: log_id.to_string(),
                        token,
                    });
                }
                Some(token) => exclusive_start = Some(token),
                None => break,
            }
        }

        tracing::trace!(log_id, pages, shards = shards.len(), "listed shards");
        Ok(shards)
    }

    pub async fn list_open_shards(&self, log_id: &str) -> Result<Vec<Shard>, ChangeLogError> {
        let mut shards = self.list_all_shards(log_id).await?;
        shards.retain(Shard::is_open);
        Ok(shards)
    }

    pub fn log(&self) -> &Arc<L> {
        &self.log
    }
}
