//! Table layout shared by the lease manager and the event recorder.
//!
//! ```text
//! Primary key:
//!   - PK (String, partition key)
//!   - SK (String, sort key)
//!
//! Lock record:       PK = "LOCK",           SK = "RES#<resource>"
//!                    transaction_id: String, timeout: String (ISO-8601, seconds)
//! Event record:      PK = <resource key>,   SK = <event sort key>
//!                    ttl: Number (optional, epoch seconds)
//! Aggregate record:  PK = <resource key>,   SK = "STATISTICS"
//!                    counter: Number
//! ```

use crate::store::ItemKey;

pub const ATTR_PK: &str = "PK";
pub const ATTR_SK: &str = "SK";

pub const ATTR_TRANSACTION_ID: &str = "transaction_id";
pub const ATTR_TIMEOUT: &str = "timeout";

pub const ATTR_COUNTER: &str = "counter";

/// Expiry attribute honoured by the store's time-to-live sweeper.
pub const ATTR_TTL: &str = "ttl";

pub const LOCK_NAMESPACE: &str = "LOCK";
pub const LOCK_RESOURCE_PREFIX: &str = "RES#";
pub const STATISTICS_SORT_KEY: &str = "STATISTICS";

pub const DEFAULT_TABLE_NAME: &str = "locks";

/// Lock timestamps are stored as naive UTC with second precision so they
/// compare correctly as strings inside a condition expression.
pub const LOCK_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn lock_key(resource_name: &str) -> ItemKey {
    ItemKey::new(
        LOCK_NAMESPACE,
        format!("{LOCK_RESOURCE_PREFIX}{resource_name}"),
    )
}

pub fn statistics_key(resource_key: &str) -> ItemKey {
    ItemKey::new(resource_key, STATISTICS_SORT_KEY)
}

pub fn event_key(resource_key: &str, event_sort_key: &str) -> ItemKey {
    ItemKey::new(resource_key, event_sort_key)
}

pub fn url_resource_key(url: &str) -> String {
    format!("URL#{url}")
}

pub fn view_event_sort_key(time: &str, client_id: &str) -> String {
    format!("T#{time}#CID#{client_id}")
}
