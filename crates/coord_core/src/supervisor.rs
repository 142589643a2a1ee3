//! Keeps one worker running per open shard of a change log.
//!
//! Every discovery pass lists the open shards and starts a worker for each
//! shard id not seen before. Workers of the very first pass start at
//! `LATEST` so a fresh watcher does not replay history; workers for shards
//! found later (typically children of a split) start at `TRIM_HORIZON` so
//! records written between passes are not skipped. The split edge is not
//! coordinated with the parent shard's worker, so records around a split can
//! still be delivered out of parent/child order.
//!
//! Workers are never stopped because their shard closed; they end on their
//! own once the shard is drained. Seen shard ids are kept for the lifetime
//! of the supervisor, so a finished shard never gets a second worker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::changelog::{ChangeLog, ChangeLogError, IteratorPosition, Shard};
use crate::config::WatcherConfig;
use crate::handler::ChangeHandler;
use crate::tracker::ShardTracker;
use crate::worker::{ExitReason, HandlerSet, ShardWorker, WorkerExit, WorkerState};

struct WorkerHandle {
    position: IteratorPosition,
    state: watch::Receiver<WorkerState>,
    join: JoinHandle<WorkerExit>,
}

pub struct ShardSupervisor<L> {
    tracker: ShardTracker<L>,
    log_id: String,
    handlers: HandlerSet,
    config: WatcherConfig,
    seen: HashSet<String>,
    workers: HashMap<String, WorkerHandle>,
    completed_passes: u64,
    cancel: CancellationToken,
}

impl<L: ChangeLog + 'static> ShardSupervisor<L> {
    pub fn new(
        log: Arc<L>,
        log_id: impl Into<String>,
        handlers: Vec<Arc<dyn ChangeHandler>>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            tracker: ShardTracker::new(log),
            log_id: log_id.into(),
            handlers: handlers.into(),
            config,
            seen: HashSet::new(),
            workers: HashMap::new(),
            completed_passes: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs one discovery pass and returns the ids of shards that got a new
    /// worker, in listing order.
    pub async fn discover_once(&mut self) -> Result<Vec<String>, ChangeLogError> {
        let open_shards = self.tracker.list_open_shards(&self.log_id).await?;
        let position = if self.completed_passes == 0 {
            IteratorPosition::Latest
        } else {
            IteratorPosition::TrimHorizon
        };

        let mut started = Vec::new();
        for shard in open_shards {
            if self.seen.contains(&shard.shard_id) {
                continue;
            }
            tracing::info!(
                log_id = %self.log_id,
                shard_id = %shard.shard_id,
                parent_shard_id = shard.parent_shard_id.as_deref().unwrap_or("-"),
                position = %position,
                "starting watcher for shard"
            );
            started.push(shard.shard_id.clone());
            self.spawn_worker(shard, position);
        }

        self.completed_passes += 1;
        Ok(started)
    }

    fn spawn_worker(&mut self, shard: Shard, position: IteratorPosition) {
        let shard_id = shard.shard_id.clone();
        let worker = ShardWorker::new(
            Arc::clone(self.tracker.log()),
            shard,
            position,
            Arc::clone(&self.handlers),
            self.config.poll_interval(),
            self.config.retry,
        );
        let state = worker.subscribe();
        let span = tracing::info_span!("shard_worker", shard_id = %shard_id);
        let join = tokio::spawn(worker.run(self.cancel.child_token()).instrument(span));

        self.seen.insert(shard_id.clone());
        self.workers.insert(
            shard_id,
            WorkerHandle {
                position,
                state,
                join,
            },
        );
    }

    /// Collects workers that have finished on their own. Their shard ids
    /// stay registered.
    pub async fn prune_finished(&mut self) -> Vec<WorkerExit> {
        let finished: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, handle)| handle.join.is_finished())
            .map(|(shard_id, _)| shard_id.clone())
            .collect();

        let mut exits = Vec::with_capacity(finished.len());
        for shard_id in finished {
            if let Some(handle) = self.workers.remove(&shard_id) {
                exits.push(join_worker(shard_id, handle).await);
            }
        }
        exits
    }

    /// Discovers shards every `discovery_interval` until cancelled, then
    /// stops all workers and returns how each of them ended.
    pub async fn run(mut self) -> Vec<WorkerExit> {
        let cancel = self.cancel.clone();
        let log_id = self.log_id.clone();
        let mut exits = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.discover_once() => {
                    if let Err(error) = result {
                        tracing::warn!(
                            log_id = %log_id,
                            error = %error,
                            "shard discovery failed, retrying at next interval"
                        );
                    }
                }
            }
            exits.extend(self.prune_finished().await);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.discovery_interval()) => {}
            }
        }

        exits.extend(self.shutdown().await);
        exits
    }

    pub async fn shutdown(&mut self) -> Vec<WorkerExit> {
        self.cancel.cancel();
        let mut exits = Vec::with_capacity(self.workers.len());
        for (shard_id, handle) in self.workers.drain() {
            exits.push(join_worker(shard_id, handle).await);
        }
        exits
    }

    pub fn is_known(&self, shard_id: &str) -> bool {
        self.seen.contains(shard_id)
    }

    pub fn known_shard_count(&self) -> usize {
        self.seen.len()
    }

    pub fn registered_worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_state(&self, shard_id: &str) -> Option<WorkerState> {
        self.workers
            .get(shard_id)
            .map(|handle| *handle.state.borrow())
    }

    pub fn worker_position(&self, shard_id: &str) -> Option<IteratorPosition> {
        self.workers.get(shard_id).map(|handle| handle.position)
    }
}

async fn join_worker(shard_id: String, handle: WorkerHandle) -> WorkerExit {
    match handle.join.await {
        Ok(exit) => exit,
        Err(error) => WorkerExit {
            shard_id,
            records_delivered: 0,
            reason: ExitReason::Failed(format!("worker task aborted: {error}")),
        },
    }
}
