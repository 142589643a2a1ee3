//! Exactly-once counting of logical events.
//!
//! Each event is written as its own record under a not-exists precondition
//! in the same transaction that increments the aggregate counter. A
//! redelivered event makes the whole transaction fail its condition, so the
//! counter only ever moves together with a newly created event record.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::keys::{
    event_key, statistics_key, url_resource_key, view_event_sort_key, ATTR_COUNTER, ATTR_PK,
    ATTR_SK, ATTR_TTL, STATISTICS_SORT_KEY,
};
use crate::store::{AttrValue, Condition, Item, KeyValueStore, StoreError, TransactOp, Update};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    AlreadyProcessed,
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RecorderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(error) if error.is_transient())
    }
}

/// A page view as emitted by the blog frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEvent {
    pub url: String,
    pub time: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
}

impl ViewEvent {
    pub fn resource_key(&self) -> String {
        url_resource_key(&self.url)
    }

    pub fn event_sort_key(&self) -> String {
        view_event_sort_key(&self.time, &self.client_id)
    }
}

pub struct EventRecorder<S, C = SystemClock> {
    store: Arc<S>,
    clock: C,
}

impl<S: KeyValueStore> EventRecorder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: KeyValueStore, C: Clock> EventRecorder<S, C> {
    pub fn with_clock(store: Arc<S>, clock: C) -> Self {
        Self { store, clock }
    }

    /// Records the event `(resource_key, event_sort_key)` and adds
    /// `increment` to the resource's counter, atomically and at most once.
    ///
    /// When `ttl` is set the event record carries an expiry of
    /// `now + ttl` (epoch seconds) so the ledger can age out.
    pub async fn record_event(
        &self,
        resource_key: &str,
        event_sort_key: &str,
        increment: i64,
        ttl: Option<Duration>,
    ) -> Result<RecordOutcome, RecorderError> {
        validate(resource_key, event_sort_key, increment)?;

        let mut attributes = Item::new();
        if let Some(ttl) = ttl {
            let ttl_secs = i64::try_from(ttl.as_secs()).map_err(|_| {
                RecorderError::InvalidArgument(format!("ttl of {}s is out of range", ttl.as_secs()))
            })?;
            let expires_at = self.clock.now().timestamp().saturating_add(ttl_secs);
            attributes.insert(ATTR_TTL.to_string(), AttrValue::N(expires_at));
        }

        let ops = [
            TransactOp::Put {
                key: event_key(resource_key, event_sort_key),
                attributes,
                condition: Some(Condition::not_exists(ATTR_PK).and(Condition::not_exists(ATTR_SK))),
            },
            TransactOp::Update {
                key: statistics_key(resource_key),
                updates: vec![Update::increment(ATTR_COUNTER, increment)],
                condition: None,
            },
        ];

        match self.store.transact_write(&ops).await {
            Ok(()) => {
                tracing::debug!(
                    resource_key,
                    event_sort_key,
                    increment,
                    "event recorded"
                );
                Ok(RecordOutcome::Recorded)
            }
            Err(error) if error.is_condition_rejection() => {
                tracing::info!(resource_key, event_sort_key, "event was already processed");
                Ok(RecordOutcome::AlreadyProcessed)
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn record_view(
        &self,
        event: &ViewEvent,
        ttl: Option<Duration>,
    ) -> Result<RecordOutcome, RecorderError> {
        self.record_event(&event.resource_key(), &event.event_sort_key(), 1, ttl)
            .await
    }

    pub async fn counter(&self, resource_key: &str) -> Result<i64, RecorderError> {
        if resource_key.trim().is_empty() {
            return Err(RecorderError::InvalidArgument(
                "resource_key cannot be empty".to_string(),
            ));
        }
        let item = self.store.get_item(&statistics_key(resource_key)).await?;
        Ok(item
            .as_ref()
            .and_then(|item| item.get(ATTR_COUNTER))
            .and_then(AttrValue::as_n)
            .unwrap_or(0))
    }
}

fn validate(resource_key: &str, event_sort_key: &str, increment: i64) -> Result<(), RecorderError> {
    if resource_key.trim().is_empty() {
        return Err(RecorderError::InvalidArgument(
            "resource_key cannot be empty".to_string(),
        ));
    }
    if event_sort_key.trim().is_empty() {
        return Err(RecorderError::InvalidArgument(
            "event_sort_key cannot be empty".to_string(),
        ));
    }
    if event_sort_key == STATISTICS_SORT_KEY {
        return Err(RecorderError::InvalidArgument(format!(
            "event_sort_key cannot be the reserved '{STATISTICS_SORT_KEY}' key"
        )));
    }
    if increment <= 0 {
        return Err(RecorderError::InvalidArgument(
            "increment must be a positive integer".to_string(),
        ));
    }
    Ok(())
}
