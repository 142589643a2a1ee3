//! Pessimistic locks with expiry on top of a conditional-write store.
//!
//! A resource is free when it has no lock record or when the record's
//! `timeout` lies in the past. Acquiring is a single conditional update that
//! only succeeds in exactly that situation; releasing is a conditional delete
//! that only succeeds for the current holder. Neither operation retries:
//! contention comes back as `Ok(false)` and the caller decides what to do.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::keys::{lock_key, ATTR_SK, ATTR_TIMEOUT, ATTR_TRANSACTION_ID, LOCK_TIMESTAMP_FORMAT};
use crate::store::{Condition, KeyValueStore, StoreError, Update};

// `%Y` gains a sign past 9999, which breaks string ordering of timeouts.
const MAX_LOCK_YEAR: i32 = 9999;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed lock record for '{resource}': {message}")]
    MalformedRecord { resource: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LeaseError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(error) if error.is_transient())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub resource_name: String,
    pub holder_id: String,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < truncate_to_seconds(now)
    }
}

pub struct LeaseManager<S, C = SystemClock> {
    store: Arc<S>,
    clock: C,
}

impl<S: KeyValueStore> LeaseManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: KeyValueStore, C: Clock> LeaseManager<S, C> {
    pub fn with_clock(store: Arc<S>, clock: C) -> Self {
        Self { store, clock }
    }

    /// Tries to take the lock on `resource_name` for `timeout_seconds`.
    ///
    /// Returns `Ok(true)` when the lock was free (absent or expired) and is
    /// now held by `holder_id`, `Ok(false)` when another unexpired holder
    /// exists. Re-acquiring an unexpired lock you already hold also returns
    /// `Ok(false)`.
    pub async fn acquire(
        &self,
        resource_name: &str,
        timeout_seconds: u64,
        holder_id: &str,
    ) -> Result<bool, LeaseError> {
        validate_name("resource_name", resource_name)?;
        validate_name("holder_id", holder_id)?;
        if timeout_seconds == 0 {
            return Err(LeaseError::InvalidArgument(
                "timeout_seconds must be a positive integer".to_string(),
            ));
        }
        let timeout = i64::try_from(timeout_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                LeaseError::InvalidArgument(format!(
                    "timeout_seconds={timeout_seconds} is out of range"
                ))
            })?;

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(timeout)
            .filter(|expires_at| expires_at.year() <= MAX_LOCK_YEAR)
            .ok_or_else(|| {
                LeaseError::InvalidArgument(format!(
                    "timeout_seconds={timeout_seconds} puts the expiry past year {MAX_LOCK_YEAR}"
                ))
            })?;
        let now_text = format_lock_timestamp(now);
        let new_timeout = format_lock_timestamp(expires_at);

        let condition = Condition::not_exists(ATTR_SK).or(Condition::lt(ATTR_TIMEOUT, now_text));
        let updates = [
            Update::set(ATTR_TRANSACTION_ID, holder_id),
            Update::set(ATTR_TIMEOUT, new_timeout.as_str()),
        ];

        match self
            .store
            .update_item(&lock_key(resource_name), &updates, Some(&condition))
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    resource = resource_name,
                    holder = holder_id,
                    timeout = %new_timeout,
                    "lock acquired"
                );
                Ok(true)
            }
            Err(StoreError::ConditionFailed) => {
                tracing::debug!(
                    resource = resource_name,
                    holder = holder_id,
                    "lock already held"
                );
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Releases the lock if and only if `holder_id` currently holds it.
    pub async fn release(&self, resource_name: &str, holder_id: &str) -> Result<bool, LeaseError> {
        validate_name("resource_name", resource_name)?;
        validate_name("holder_id", holder_id)?;

        let condition = Condition::eq(ATTR_TRANSACTION_ID, holder_id);
        match self
            .store
            .delete_item(&lock_key(resource_name), Some(&condition))
            .await
        {
            Ok(()) => {
                tracing::debug!(resource = resource_name, holder = holder_id, "lock released");
                Ok(true)
            }
            Err(StoreError::ConditionFailed) => {
                tracing::debug!(
                    resource = resource_name,
                    holder = holder_id,
                    "lock not held by caller"
                );
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn holder(&self, resource_name: &str) -> Result<Option<LockRecord>, LeaseError> {
        validate_name("resource_name", resource_name)?;
        let Some(item) = self.store.get_item(&lock_key(resource_name)).await? else {
            return Ok(None);
        };

        let malformed = |message: &str| LeaseError::MalformedRecord {
            resource: resource_name.to_string(),
            message: message.to_string(),
        };
        let holder_id = item
            .get(ATTR_TRANSACTION_ID)
            .and_then(|value| value.as_s())
            .ok_or_else(|| malformed("missing transaction_id"))?;
        let timeout = item
            .get(ATTR_TIMEOUT)
            .and_then(|value| value.as_s())
            .ok_or_else(|| malformed("missing timeout"))?;
        let expires_at = parse_lock_timestamp(timeout)
            .ok_or_else(|| malformed(&format!("unparseable timeout '{timeout}'")))?;

        Ok(Some(LockRecord {
            resource_name: resource_name.to_string(),
            holder_id: holder_id.to_string(),
            expires_at,
        }))
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

fn validate_name(field: &str, value: &str) -> Result<(), LeaseError> {
    if value.trim().is_empty() {
        return Err(LeaseError::InvalidArgument(format!("{field} cannot be empty")));
    }
    Ok(())
}

pub fn format_lock_timestamp(at: DateTime<Utc>) -> String {
    at.format(LOCK_TIMESTAMP_FORMAT).to_string()
}

pub fn parse_lock_timestamp(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, LOCK_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn truncate_to_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::InMemoryStore;

    fn manager() -> (Arc<InMemoryStore>, LeaseManager<InMemoryStore, Arc<ManualClock>>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let manager = LeaseManager::with_clock(store.clone(), clock.clone());
        (store, manager, clock)
    }

    #[test]
    fn lock_timestamps_sort_as_strings() {
        let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 9, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert!(format_lock_timestamp(earlier) < format_lock_timestamp(later));
        assert_eq!(format_lock_timestamp(later), "2024-05-01T10:00:00");
        assert_eq!(parse_lock_timestamp("2024-05-01T10:00:00"), Some(later));
    }

    #[tokio::test]
    async fn acquire_stores_holder_and_expiry() {
        let (store, manager, clock) = manager();

        assert!(manager.acquire("resource", 5, "tx-1").await.expect("acquire"));

        let record = manager
            .holder("resource")
            .await
            .expect("read")
            .expect("record should exist");
        assert_eq!(record.holder_id, "tx-1");
        assert_eq!(record.expires_at, clock.now() + Duration::seconds(5));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn lock_is_not_free_at_the_exact_expiry_second() {
        let (_, manager, clock) = manager();
        assert!(manager.acquire("resource", 1, "tx-1").await.expect("acquire"));

        clock.advance(Duration::seconds(1));
        assert!(!manager.acquire("resource", 5, "tx-2").await.expect("acquire"));

        clock.advance(Duration::seconds(1));
        assert!(manager.acquire("resource", 5, "tx-2").await.expect("acquire"));
    }

    #[tokio::test]
    async fn rejects_misuse_without_touching_the_store() {
        let (store, manager, _) = manager();

        let error = manager.acquire(" ", 5, "tx-1").await.expect_err("empty name");
        assert!(matches!(error, LeaseError::InvalidArgument(_)));
        let error = manager.acquire("resource", 0, "tx-1").await.expect_err("zero timeout");
        assert!(matches!(error, LeaseError::InvalidArgument(_)));
        let error = manager.release("resource", "").await.expect_err("empty holder");
        assert!(matches!(error, LeaseError::InvalidArgument(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn timeouts_past_year_9999_are_rejected() {
        let (store, manager, _) = manager();

        // Expiry in year 11530 and a sum chrono cannot represent.
        for timeout_seconds in [300_000_000_000, 10_000_000_000_000] {
            let error = manager
                .acquire("resource", timeout_seconds, "tx-1")
                .await
                .expect_err("expiry out of range");
            assert!(matches!(error, LeaseError::InvalidArgument(_)));
        }
        assert!(store.is_empty());

        assert!(manager.acquire("resource", 5, "tx-1").await.expect("acquire"));
        assert!(!manager.acquire("resource", 5, "tx-2").await.expect("acquire"));
    }

    #[tokio::test]
    async fn store_failures_propagate_as_errors() {
        let (store, manager, _) = manager();
        store.fail_next(StoreError::throttled("slow down"));

        let error = manager
            .acquire("resource", 5, "tx-1")
            .await
            .expect_err("throttle should propagate");
        assert!(error.is_transient());

        store.fail_next(StoreError::unavailable("network"));
        let error = manager
            .release("resource", "tx-1")
            .await
            .expect_err("network error should propagate");
        assert!(matches!(error, LeaseError::Store(StoreError::Unavailable(_))));
    }
}
