//! Per-shard polling loop.
//!
//! ```text
//! NotStarted --run--> Polling --next iterator is None--> Terminated (Drained)
//!                        |  \--cancelled---------------> Terminated (Cancelled)
//!                        \----retries exhausted--------> Terminated (Failed)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::changelog::{ChangeLog, ChangeLogError, IteratorPosition, Shard};
use crate::config::RetryPolicy;
use crate::handler::ChangeHandler;
use crate::record::ChangeSummary;
use crate::retry::retry_transient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Polling,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The log returned no further iterator: the shard is closed and read
    /// to the end.
    Drained,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub shard_id: String,
    pub records_delivered: u64,
    pub reason: ExitReason,
}

pub type HandlerSet = Arc<[Arc<dyn ChangeHandler>]>;

pub struct ShardWorker<L> {
    log: Arc<L>,
    shard: Shard,
    position: IteratorPosition,
    handlers: HandlerSet,
    poll_interval: Duration,
    retry: RetryPolicy,
    state: watch::Sender<WorkerState>,
}

impl<L: ChangeLog> ShardWorker<L> {
    pub fn new(
        log: Arc<L>,
        shard: Shard,
        position: IteratorPosition,
        handlers: HandlerSet,
        poll_interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::NotStarted);
        Self {
            log,
            shard,
            position,
            handlers,
            poll_interval,
            retry,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    pub fn position(&self) -> IteratorPosition {
        self.position
    }

    pub async fn run(self, cancel: CancellationToken) -> WorkerExit {
        self.state.send_replace(WorkerState::Polling);
        let mut records_delivered = 0u64;
        let reason = self.poll(&cancel, &mut records_delivered).await;
        self.state.send_replace(WorkerState::Terminated);

        match &reason {
            ExitReason::Failed(error) => tracing::error!(
                shard_id = %self.shard.shard_id,
                records_delivered,
                error = %error,
                "shard worker failed"
            ),
            _ => tracing::info!(
                shard_id = %self.shard.shard_id,
                records_delivered,
                reason = ?reason,
                "shard worker stopped"
            ),
        }

        WorkerExit {
            shard_id: self.shard.shard_id.clone(),
            records_delivered,
            reason,
        }
    }

    async fn poll(&self, cancel: &CancellationToken, records_delivered: &mut u64) -> ExitReason {
        let initial = tokio::select! {
            _ = cancel.cancelled() => return ExitReason::Cancelled,
            result = retry_transient(
                &self.retry,
                "get_shard_iterator",
                ChangeLogError::is_transient,
                || self.log.get_shard_iterator(&self.shard, self.position),
            ) => result,
        };
        let mut iterator = match initial {
            Ok(Some(iterator)) => iterator,
            Ok(None) => return ExitReason::Drained,
            Err(error) => return ExitReason::Failed(error.to_string()),
        };

        loop {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return ExitReason::Cancelled,
                result = retry_transient(
                    &self.retry,
                    "get_records",
                    ChangeLogError::is_transient,
                    || self.log.get_records(&iterator),
                ) => result,
            };
            let batch = match fetched {
                Ok(batch) => batch,
                Err(error) => return ExitReason::Failed(error.to_string()),
            };

            for record in &batch.records {
                let summary = ChangeSummary::from_record(record);
                for handler in self.handlers.iter() {
                    if let Err(error) = handler.handle(record, &summary).await {
                        tracing::error!(
                            shard_id = %self.shard.shard_id,
                            handler = handler.name(),
                            event_id = %record.event_id,
                            sequence_number = record.sequence_number.as_deref().unwrap_or("-"),
                            error = %error,
                            "change handler failed"
                        );
                    }
                }
                *records_delivered += 1;
            }

            match batch.next_iterator {
                Some(next) => iterator = next,
                None => return ExitReason::Drained,
            }

            tokio::select! {
                _ = cancel.cancelled() => return ExitReason::Cancelled,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
