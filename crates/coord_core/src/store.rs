//! Abstract conditional-write key-value store.
//!
//! The model is deliberately the subset of DynamoDB semantics the lease
//! manager and the event recorder rely on: items addressed by a `(PK, SK)`
//! pair, single-item writes guarded by a server-evaluated condition, and
//! all-or-nothing multi-item transactions where every operation carries its
//! own condition.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::{ATTR_PK, ATTR_SK};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrValue {
    S(String),
    N(i64),
}

impl AttrValue {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(value) => Some(value),
            Self::N(_) => None,
        }
    }

    pub fn as_n(&self) -> Option<i64> {
        match self {
            Self::N(value) => Some(*value),
            Self::S(_) => None,
        }
    }

    /// Ordering used by `<` in conditions. Values of different types are
    /// incomparable, which makes the comparison evaluate to false.
    pub fn compare(&self, other: &AttrValue) -> Option<Ordering> {
        match (self, other) {
            (Self::S(left), Self::S(right)) => Some(left.cmp(right)),
            (Self::N(left), Self::N(right)) => Some(left.cmp(right)),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S(value) => f.write_str(value),
            Self::N(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::S(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::S(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::N(value)
    }
}

pub type Item = BTreeMap<String, AttrValue>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub pk: String,
    pub sk: String,
}

impl ItemKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    pub fn to_item(&self) -> Item {
        Item::from([
            (ATTR_PK.to_string(), AttrValue::S(self.pk.clone())),
            (ATTR_SK.to_string(), AttrValue::S(self.sk.clone())),
        ])
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    AttributeNotExists(String),
    AttributeExists(String),
    Equals(String, AttrValue),
    LessThan(String, AttrValue),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    pub fn not_exists(name: &str) -> Self {
        Self::AttributeNotExists(name.to_string())
    }

    pub fn exists(name: &str) -> Self {
        Self::AttributeExists(name.to_string())
    }

    pub fn eq(name: &str, value: impl Into<AttrValue>) -> Self {
        Self::Equals(name.to_string(), value.into())
    }

    pub fn lt(name: &str, value: impl Into<AttrValue>) -> Self {
        Self::LessThan(name.to_string(), value.into())
    }

    pub fn and(self, other: Condition) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Condition) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Evaluates the condition against the item as it exists right now
    /// (`None` when there is no item under the key).
    pub fn evaluate(&self, item: Option<&Item>) -> bool {
        let attribute = |name: &str| item.and_then(|item| item.get(name));
        match self {
            Self::AttributeNotExists(name) => attribute(name).is_none(),
            Self::AttributeExists(name) => attribute(name).is_some(),
            Self::Equals(name, expected) => attribute(name) == Some(expected),
            Self::LessThan(name, bound) => attribute(name)
                .and_then(|current| current.compare(bound))
                .map(|ordering| ordering == Ordering::Less)
                .unwrap_or(false),
            Self::And(left, right) => left.evaluate(item) && right.evaluate(item),
            Self::Or(left, right) => left.evaluate(item) || right.evaluate(item),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Set(String, AttrValue),
    /// `name = if_not_exists(name, 0) + by`
    Increment { name: String, by: i64 },
}

impl Update {
    pub fn set(name: &str, value: impl Into<AttrValue>) -> Self {
        Self::Set(name.to_string(), value.into())
    }

    pub fn increment(name: &str, by: i64) -> Self {
        Self::Increment {
            name: name.to_string(),
            by,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactOp {
    Put {
        key: ItemKey,
        attributes: Item,
        condition: Option<Condition>,
    },
    Update {
        key: ItemKey,
        updates: Vec<Update>,
        condition: Option<Condition>,
    },
}

impl TransactOp {
    pub fn key(&self) -> &ItemKey {
        match self {
            Self::Put { key, .. } | Self::Update { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationReason {
    None,
    ConditionalCheckFailed,
    TransactionConflict,
    Throttled,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("conditional check failed")]
    ConditionFailed,

    #[error("transaction cancelled: {reasons:?}")]
    TransactionCanceled { reasons: Vec<CancellationReason> },

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn throttled(msg: impl Into<String>) -> Self {
        Self::Throttled(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn is_condition_rejection(&self) -> bool {
        match self {
            Self::ConditionFailed => true,
            Self::TransactionCanceled { reasons } => reasons
                .iter()
                .any(|reason| *reason == CancellationReason::ConditionalCheckFailed),
            _ => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Throttled(_) | Self::Unavailable(_) => true,
            Self::TransactionCanceled { reasons } => {
                !self.is_condition_rejection()
                    && reasons.iter().any(|reason| {
                        matches!(
                            reason,
                            CancellationReason::TransactionConflict | CancellationReason::Throttled
                        )
                    })
            }
            _ => false,
        }
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &ItemKey) -> Result<Option<Item>, StoreError>;

    /// Applies `updates` to the item under `key`, creating it if needed.
    /// Fails with [`StoreError::ConditionFailed`] when `condition` does not
    /// hold for the current item.
    async fn update_item(
        &self,
        key: &ItemKey,
        updates: &[Update],
        condition: Option<&Condition>,
    ) -> Result<(), StoreError>;

    /// Deletes the item under `key`. Fails with
    /// [`StoreError::ConditionFailed`] when `condition` does not hold, which
    /// includes the case where no item exists.
    async fn delete_item(&self, key: &ItemKey, condition: Option<&Condition>)
        -> Result<(), StoreError>;

    async fn transact_write(&self, ops: &[TransactOp]) -> Result<(), StoreError>;
}
