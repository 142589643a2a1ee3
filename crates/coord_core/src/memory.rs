use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::store::{
    CancellationReason, Condition, Item, ItemKey, KeyValueStore, StoreError, TransactOp, Update,
};

/// Process-local [`KeyValueStore`].
///
/// Every operation runs under one mutex, so conditions are evaluated and
/// writes applied atomically, matching the store-side guarantees the lease
/// manager and the recorder depend on. Queued faults are returned (once
/// each, in order) before any state is touched.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    items: Mutex<BTreeMap<ItemKey, Item>>,
    faults: Mutex<VecDeque<StoreError>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: StoreError) {
        lock(&self.faults).push_back(error);
    }

    pub fn snapshot(&self) -> BTreeMap<ItemKey, Item> {
        lock(&self.items).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    fn take_fault(&self) -> Result<(), StoreError> {
        match lock(&self.faults).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn holds(condition: Option<&Condition>, current: Option<&Item>) -> bool {
    condition.map_or(true, |condition| condition.evaluate(current))
}

fn apply_updates(key: &ItemKey, current: Option<&Item>, updates: &[Update]) -> Result<Item, StoreError> {
    let mut item = current.cloned().unwrap_or_else(|| key.to_item());
    for update in updates {
        match update {
            Update::Set(name, value) => {
                item.insert(name.clone(), value.clone());
            }
            Update::Increment { name, by } => {
                let base = match item.get(name) {
                    None => 0,
                    Some(value) => value.as_n().ok_or_else(|| {
                        StoreError::invalid_request(format!(
                            "cannot increment non-numeric attribute '{name}' on {key}"
                        ))
                    })?,
                };
                let next = base.checked_add(*by).ok_or_else(|| {
                    StoreError::invalid_request(format!("counter '{name}' overflowed on {key}"))
                })?;
                item.insert(name.clone(), next.into());
            }
        }
    }
    Ok(item)
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get_item(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        self.take_fault()?;
        Ok(lock(&self.items).get(key).cloned())
    }

    async fn update_item(
        &self,
        key: &ItemKey,
        updates: &[Update],
        condition: Option<&Condition>,
    ) -> Result<(), StoreError> {
        self.take_fault()?;
        let mut items = lock(&self.items);
        let current = items.get(key);
        if !holds(condition, current) {
            return Err(StoreError::ConditionFailed);
        }
        let next = apply_updates(key, current, updates)?;
        items.insert(key.clone(), next);
        Ok(())
    }

    async fn delete_item(
        &self,
        key: &ItemKey,
        condition: Option<&Condition>,
    ) -> Result<(), StoreError> {
        self.take_fault()?;
        let mut items = lock(&self.items);
        if !holds(condition, items.get(key)) {
            return Err(StoreError::ConditionFailed);
        }
        items.remove(key);
        Ok(())
    }

    async fn transact_write(&self, ops: &[TransactOp]) -> Result<(), StoreError> {
        self.take_fault()?;
        if ops.is_empty() {
            return Err(StoreError::invalid_request("transaction has no operations"));
        }
        let mut seen = HashSet::new();
        if !ops.iter().all(|op| seen.insert(op.key())) {
            return Err(StoreError::invalid_request(
                "transaction touches the same item more than once",
            ));
        }

        let mut items = lock(&self.items);
        let reasons: Vec<CancellationReason> = ops
            .iter()
            .map(|op| {
                let condition = match op {
                    TransactOp::Put { condition, .. } | TransactOp::Update { condition, .. } => {
                        condition.as_ref()
                    }
                };
                if holds(condition, items.get(op.key())) {
                    CancellationReason::None
                } else {
                    CancellationReason::ConditionalCheckFailed
                }
            })
            .collect();
        if reasons.iter().any(|reason| *reason != CancellationReason::None) {
            return Err(StoreError::TransactionCanceled { reasons });
        }

        let mut staged = Vec::with_capacity(ops.len());
        for op in ops {
            let next = match op {
                TransactOp::Put {
                    key, attributes, ..
                } => {
                    let mut item = key.to_item();
                    item.extend(attributes.clone());
                    item
                }
                TransactOp::Update { key, updates, .. } => {
                    apply_updates(key, items.get(key), updates)?
                }
            };
            staged.push((op.key().clone(), next));
        }
        items.extend(staged);
        Ok(())
    }
}
