use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
    Other(String),
}

impl ChangeKind {
    pub fn from_event_name(name: &str) -> Self {
        match name {
            "INSERT" => Self::Insert,
            "MODIFY" => Self::Modify,
            "REMOVE" => Self::Remove,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "INSERT",
            Self::Modify => "MODIFY",
            Self::Remove => "REMOVE",
            Self::Other(name) => name,
        }
    }
}

/// One entry of the change log as delivered to handlers.
///
/// `keys` holds the primary-key attributes of the changed item rendered as
/// text; `raw` keeps the complete record as the log returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub event_id: String,
    pub event_name: ChangeKind,
    pub approximate_creation_time: Option<DateTime<Utc>>,
    pub keys: BTreeMap<String, String>,
    pub sequence_number: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSummary {
    pub changed_at: Option<DateTime<Utc>>,
    pub event_type: String,
    pub key_attributes: Vec<(String, String)>,
}

impl ChangeSummary {
    pub fn from_record(record: &ChangeRecord) -> Self {
        Self {
            changed_at: record.approximate_creation_time,
            event_type: record.event_name.as_str().to_string(),
            key_attributes: record
                .keys
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }
}

/// `[2022-03-28T13:17:23+00:00] - INSERT - PK=URL#a, SK=STATISTICS`
impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let changed_at = self
            .changed_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, false))
            .unwrap_or_else(|| "-".to_string());
        let keys = self
            .key_attributes
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "[{changed_at}] - {:^6} - {keys}", self.event_type)
    }
}
