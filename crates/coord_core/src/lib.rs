//! Coordination primitives over a conditional-write key-value store and a
//! sharded change log.
//!
//! This crate owns the lease, idempotent-counter, and shard-supervision
//! behavior. It intentionally excludes AWS SDK concerns; `coord_aws` provides
//! the DynamoDB and DynamoDB Streams adapters for the traits defined here.

pub mod changelog;
pub mod clock;
pub mod config;
pub mod handler;
pub mod keys;
pub mod lease;
pub mod memory;
pub mod record;
pub mod recorder;
pub mod retry;
pub mod store;
pub mod supervisor;
pub mod tracker;
pub mod worker;

pub use changelog::{ChangeLog, ChangeLogError, IteratorPosition, RecordBatch, Shard, ShardPage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LeaseTableConfig, RetryPolicy, WatcherConfig};
pub use handler::{ChangeHandler, EventCountingHandler, FnHandler, HandlerError};
pub use lease::{LeaseError, LeaseManager, LockRecord};
pub use memory::InMemoryStore;
pub use record::{ChangeKind, ChangeRecord, ChangeSummary};
pub use recorder::{EventRecorder, RecordOutcome, RecorderError, ViewEvent};
pub use store::{
    AttrValue, CancellationReason, Condition, Item, ItemKey, KeyValueStore, StoreError, TransactOp,
    Update,
};
pub use supervisor::ShardSupervisor;
pub use tracker::ShardTracker;
pub use worker::{ExitReason, ShardWorker, WorkerExit, WorkerState};
