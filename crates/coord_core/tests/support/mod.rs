#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use coord_core::changelog::{ChangeLog, ChangeLogError, IteratorPosition, RecordBatch, Shard, ShardPage};
use coord_core::handler::{ChangeHandler, HandlerError};
use coord_core::record::{ChangeKind, ChangeRecord, ChangeSummary};

pub const LOG_ID: &str = "arn:aws:dynamodb:eu-central-1:123456789012:table/locks/stream/2024";

pub fn shard(shard_id: &str, parent: Option<&str>) -> Shard {
    Shard {
        log_id: LOG_ID.to_string(),
        shard_id: shard_id.to_string(),
        parent_shard_id: parent.map(str::to_string),
        starting_sequence_number: Some("100".to_string()),
        ending_sequence_number: None,
    }
}

pub fn change(event_id: &str) -> ChangeRecord {
    ChangeRecord {
        event_id: event_id.to_string(),
        event_name: ChangeKind::Insert,
        approximate_creation_time: None,
        keys: BTreeMap::from([
            ("PK".to_string(), format!("ITEM#{event_id}")),
            ("SK".to_string(), "STATE".to_string()),
        ]),
        sequence_number: Some(event_id.to_string()),
        raw: serde_json::json!({ "eventID": event_id }),
    }
}

#[derive(Default)]
struct ShardScript {
    records: Vec<ChangeRecord>,
    closed: bool,
}

/// In-process change log with a scripted shard topology.
///
/// Iterators are `<shard_id>:<offset>` tokens. `LATEST` points past the
/// records present when the iterator is requested, `TRIM_HORIZON` at the
/// first one. A closed shard returns no next iterator once read to the end.
#[derive(Default)]
pub struct ScriptedLog {
    page_size: usize,
    shards: Mutex<Vec<Shard>>,
    scripts: Mutex<HashMap<String, ShardScript>>,
    iterator_requests: Mutex<Vec<(String, IteratorPosition)>>,
    describe_calls: Mutex<usize>,
    get_records_faults: Mutex<VecDeque<ChangeLogError>>,
    describe_faults: Mutex<VecDeque<ChangeLogError>>,
}

impl ScriptedLog {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..Self::default()
        }
    }

    pub fn add_shard(&self, shard: Shard) {
        self.scripts
            .lock()
            .expect("poisoned mutex")
            .entry(shard.shard_id.clone())
            .or_default();
        self.shards.lock().expect("poisoned mutex").push(shard);
    }

    pub fn push_record(&self, shard_id: &str, record: ChangeRecord) {
        self.scripts
            .lock()
            .expect("poisoned mutex")
            .get_mut(shard_id)
            .expect("unknown shard")
            .records
            .push(record);
    }

    pub fn close_shard(&self, shard_id: &str) {
        let mut scripts = self.scripts.lock().expect("poisoned mutex");
        let script = scripts.get_mut(shard_id).expect("unknown shard");
        script.closed = true;
        let ending = format!("{}", 100 + script.records.len());
        drop(scripts);

        for shard in self.shards.lock().expect("poisoned mutex").iter_mut() {
            if shard.shard_id == shard_id {
                shard.ending_sequence_number = Some(ending.clone());
            }
        }
    }

    /// Closes `parent` and opens `children` with it as their parent.
    pub fn split(&self, parent: &str, children: &[&str]) {
        self.close_shard(parent);
        for child in children {
            self.add_shard(shard(child, Some(parent)));
        }
    }

    pub fn iterator_requests(&self) -> Vec<(String, IteratorPosition)> {
        self.iterator_requests.lock().expect("poisoned mutex").clone()
    }

    pub fn position_for(&self, shard_id: &str) -> Option<IteratorPosition> {
        self.iterator_requests()
            .into_iter()
            .find(|(id, _)| id == shard_id)
            .map(|(_, position)| position)
    }

    pub fn describe_calls(&self) -> usize {
        *self.describe_calls.lock().expect("poisoned mutex")
    }

    pub fn fail_next_get_records(&self, error: ChangeLogError) {
        self.get_records_faults
            .lock()
            .expect("poisoned mutex")
            .push_back(error);
    }

    pub fn fail_next_describe(&self, error: ChangeLogError) {
        self.describe_faults
            .lock()
            .expect("poisoned mutex")
            .push_back(error);
    }
}

#[async_trait]
impl ChangeLog for ScriptedLog {
    async fn describe_shards(
        &self,
        _log_id: &str,
        exclusive_start_shard_id: Option<&str>,
    ) -> Result<ShardPage, ChangeLogError> {
        *self.describe_calls.lock().expect("poisoned mutex") += 1;
        if let Some(error) = self.describe_faults.lock().expect("poisoned mutex").pop_front() {
            return Err(error);
        }

        let shards = self.shards.lock().expect("poisoned mutex");
        let start = match exclusive_start_shard_id {
            None => 0,
            Some(id) => {
                shards
                    .iter()
                    .position(|shard| shard.shard_id == id)
                    .ok_or_else(|| ChangeLogError::NotFound(id.to_string()))?
                    + 1
            }
        };
        let page: Vec<Shard> = shards.iter().skip(start).take(self.page_size).cloned().collect();
        let last_evaluated_shard_id = if start + page.len() < shards.len() {
            page.last().map(|shard| shard.shard_id.clone())
        } else {
            None
        };

        Ok(ShardPage {
            shards: page,
            last_evaluated_shard_id,
        })
    }

    async fn get_shard_iterator(
        &self,
        shard: &Shard,
        position: IteratorPosition,
    ) -> Result<Option<String>, ChangeLogError> {
        self.iterator_requests
            .lock()
            .expect("poisoned mutex")
            .push((shard.shard_id.clone(), position));

        let scripts = self.scripts.lock().expect("poisoned mutex");
        let script = scripts
            .get(&shard.shard_id)
            .ok_or_else(|| ChangeLogError::NotFound(shard.shard_id.clone()))?;
        let offset = match position {
            IteratorPosition::Latest => script.records.len(),
            IteratorPosition::TrimHorizon => 0,
        };
        Ok(Some(format!("{}:{offset}", shard.shard_id)))
    }

    async fn get_records(&self, iterator: &str) -> Result<RecordBatch, ChangeLogError> {
        if let Some(error) = self
            .get_records_faults
            .lock()
            .expect("poisoned mutex")
            .pop_front()
        {
            return Err(error);
        }

        let (shard_id, offset) = iterator
            .rsplit_once(':')
            .ok_or_else(|| ChangeLogError::Other(format!("bad iterator {iterator}")))?;
        let offset: usize = offset
            .parse()
            .map_err(|_| ChangeLogError::Other(format!("bad iterator {iterator}")))?;

        let scripts = self.scripts.lock().expect("poisoned mutex");
        let script = scripts
            .get(shard_id)
            .ok_or_else(|| ChangeLogError::NotFound(shard_id.to_string()))?;
        let records: Vec<ChangeRecord> = script.records.iter().skip(offset).cloned().collect();
        let next_offset = offset + records.len();
        let next_iterator = if script.closed && next_offset >= script.records.len() {
            None
        } else {
            Some(format!("{shard_id}:{next_offset}"))
        };

        Ok(RecordBatch {
            records,
            next_iterator,
        })
    }
}

/// Handler that remembers the event ids it has seen.
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl RecordingHandler {
    pub fn failing_on(event_id: &str) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            fail_on: Some(event_id.to_string()),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("poisoned mutex").clone()
    }

    pub fn seen_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter(|id| id.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl ChangeHandler for RecordingHandler {
    async fn handle(
        &self,
        record: &ChangeRecord,
        _summary: &ChangeSummary,
    ) -> Result<(), HandlerError> {
        if self.fail_on.as_deref() == Some(record.event_id.as_str()) {
            return Err(HandlerError::new(format!("refusing {}", record.event_id)));
        }
        self.seen
            .lock()
            .expect("poisoned mutex")
            .push(record.event_id.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
