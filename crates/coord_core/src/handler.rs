use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::RetryPolicy;
use crate::record::{ChangeRecord, ChangeSummary};
use crate::recorder::{EventRecorder, RecordOutcome, RecorderError};
use crate::retry::retry_transient;
use crate::store::KeyValueStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receives every change record of a shard, in log order.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, record: &ChangeRecord, summary: &ChangeSummary)
        -> Result<(), HandlerError>;

    fn name(&self) -> &str {
        "handler"
    }
}

pub struct FnHandler<F> {
    name: String,
    callback: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&ChangeRecord, &ChangeSummary) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

#[async_trait]
impl<F> ChangeHandler for FnHandler<F>
where
    F: Fn(&ChangeRecord, &ChangeSummary) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(
        &self,
        record: &ChangeRecord,
        summary: &ChangeSummary,
    ) -> Result<(), HandlerError> {
        (self.callback)(record, summary)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Counts change records per item, exactly once per stream event.
///
/// The resource key is `<prefix><value of key_attribute>` and the event key
/// is `EVT#<event id>`, so a redelivered record does not move the counter.
/// Point it at a table other than the one being watched, or every counter
/// update produces a new record to count.
pub struct EventCountingHandler<S, C> {
    recorder: Arc<EventRecorder<S, C>>,
    key_attribute: String,
    resource_prefix: String,
    ttl: Option<Duration>,
    retry: RetryPolicy,
}

impl<S: KeyValueStore, C: Clock> EventCountingHandler<S, C> {
    pub fn new(recorder: Arc<EventRecorder<S, C>>, key_attribute: impl Into<String>) -> Self {
        Self {
            recorder,
            key_attribute: key_attribute.into(),
            resource_prefix: "ITEM#".to_string(),
            ttl: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_resource_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.resource_prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl<S: KeyValueStore, C: Clock> ChangeHandler for EventCountingHandler<S, C> {
    async fn handle(
        &self,
        record: &ChangeRecord,
        _summary: &ChangeSummary,
    ) -> Result<(), HandlerError> {
        let key_value = record.keys.get(&self.key_attribute).ok_or_else(|| {
            HandlerError::new(format!(
                "record {} has no key attribute '{}'",
                record.event_id, self.key_attribute
            ))
        })?;
        let resource_key = format!("{}{key_value}", self.resource_prefix);
        let event_sort_key = format!("EVT#{}", record.event_id);

        let outcome = retry_transient(
            &self.retry,
            "record_event",
            RecorderError::is_transient,
            || {
                self.recorder
                    .record_event(&resource_key, &event_sort_key, 1, self.ttl)
            },
        )
        .await
        .map_err(|error| HandlerError::new(error.to_string()))?;

        if outcome == RecordOutcome::AlreadyProcessed {
            tracing::debug!(event_id = %record.event_id, "change record was already counted");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "event_counter"
    }
}
