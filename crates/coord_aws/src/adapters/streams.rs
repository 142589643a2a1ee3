//! DynamoDB Streams implementation of [`ChangeLog`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_dynamodbstreams::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodbstreams::types::{AttributeValue, Record, ShardIteratorType, StreamRecord};
use aws_sdk_dynamodbstreams::Client;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use coord_core::changelog::{
    ChangeLog, ChangeLogError, IteratorPosition, RecordBatch, Shard, ShardPage,
};
use coord_core::record::{ChangeKind, ChangeRecord};
use serde_json::{json, Map, Value};

#[derive(Clone)]
pub struct DynamoDbStreamsLog {
    client: Client,
}

impl DynamoDbStreamsLog {
    pub fn new(
        sdk_config: &aws_config::SdkConfig,
        region: Option<String>,
        endpoint: Option<String>,
    ) -> Self {
        let mut builder = aws_sdk_dynamodbstreams::config::Builder::from(sdk_config);
        if let Some(region) = region {
            builder = builder.region(aws_sdk_dynamodbstreams::config::Region::new(region));
        }
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Self::from_client(Client::from_conf(builder.build()))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChangeLog for DynamoDbStreamsLog {
    async fn describe_shards(
        &self,
        log_id: &str,
        exclusive_start_shard_id: Option<&str>,
    ) -> Result<ShardPage, ChangeLogError> {
        let output = self
            .client
            .describe_stream()
            .stream_arn(log_id)
            .set_exclusive_start_shard_id(exclusive_start_shard_id.map(str::to_string))
            .send()
            .await
            .map_err(|error| classify("DescribeStream", error))?;

        let Some(description) = output.stream_description() else {
            return Ok(ShardPage::default());
        };
        let mut shards = Vec::with_capacity(description.shards().len());
        for shard in description.shards() {
            let Some(shard_id) = shard.shard_id() else {
                tracing::warn!(log_id, "skipping shard without id");
                continue;
            };
            let range = shard.sequence_number_range();
            shards.push(Shard {
                log_id: log_id.to_string(),
                shard_id: shard_id.to_string(),
                parent_shard_id: shard.parent_shard_id().map(str::to_string),
                starting_sequence_number: range
                    .and_then(|range| range.starting_sequence_number())
                    .map(str::to_string),
                ending_sequence_number: range
                    .and_then(|range| range.ending_sequence_number())
                    .map(str::to_string),
            });
        }

        Ok(ShardPage {
            shards,
            last_evaluated_shard_id: description.last_evaluated_shard_id().map(str::to_string),
        })
    }

    async fn get_shard_iterator(
        &self,
        shard: &Shard,
        position: IteratorPosition,
    ) -> Result<Option<String>, ChangeLogError> {
        let iterator_type = match position {
            IteratorPosition::Latest => ShardIteratorType::Latest,
            IteratorPosition::TrimHorizon => ShardIteratorType::TrimHorizon,
        };
        let output = self
            .client
            .get_shard_iterator()
            .stream_arn(&shard.log_id)
            .shard_id(&shard.shard_id)
            .shard_iterator_type(iterator_type)
            .send()
            .await
            .map_err(|error| classify("GetShardIterator", error))?;
        Ok(output.shard_iterator().map(str::to_string))
    }

    async fn get_records(&self, iterator: &str) -> Result<RecordBatch, ChangeLogError> {
        let output = self
            .client
            .get_records()
            .shard_iterator(iterator)
            .send()
            .await
            .map_err(|error| classify("GetRecords", error))?;
        Ok(RecordBatch {
            records: output.records().iter().map(change_record).collect(),
            next_iterator: output.next_shard_iterator().map(str::to_string),
        })
    }
}

/// Converts a stream record into the change log's record model. `raw`
/// carries the record in the DynamoDB Streams JSON shape.
pub fn change_record(record: &Record) -> ChangeRecord {
    let stream = record.dynamodb();
    let keys = stream
        .and_then(StreamRecord::keys)
        .map(|keys| {
            keys.iter()
                .map(|(name, value)| (name.clone(), key_text(value)))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    ChangeRecord {
        event_id: record.event_id().unwrap_or_default().to_string(),
        event_name: ChangeKind::from_event_name(
            record.event_name().map(|name| name.as_str()).unwrap_or(""),
        ),
        approximate_creation_time: stream
            .and_then(StreamRecord::approximate_creation_date_time)
            .and_then(|at| DateTime::<Utc>::from_timestamp(at.secs(), at.subsec_nanos())),
        keys,
        sequence_number: stream
            .and_then(StreamRecord::sequence_number)
            .map(str::to_string),
        raw: record_json(record),
    }
}

/// Value of a key attribute as text; key attributes are always scalars.
fn key_text(value: &AttributeValue) -> String {
    match value {
        AttributeValue::S(text) => text.clone(),
        AttributeValue::N(number) => number.clone(),
        AttributeValue::B(blob) => STANDARD.encode(blob.as_ref()),
        other => attribute_json(other).to_string(),
    }
}

fn attribute_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(text) => json!({ "S": text }),
        AttributeValue::N(number) => json!({ "N": number }),
        AttributeValue::B(blob) => json!({ "B": STANDARD.encode(blob.as_ref()) }),
        AttributeValue::Bool(flag) => json!({ "BOOL": flag }),
        AttributeValue::Null(flag) => json!({ "NULL": flag }),
        AttributeValue::Ss(texts) => json!({ "SS": texts }),
        AttributeValue::Ns(numbers) => json!({ "NS": numbers }),
        AttributeValue::Bs(blobs) => json!({
            "BS": blobs.iter().map(|blob| STANDARD.encode(blob.as_ref())).collect::<Vec<_>>()
        }),
        AttributeValue::L(values) => json!({
            "L": values.iter().map(attribute_json).collect::<Vec<_>>()
        }),
        AttributeValue::M(entries) => json!({ "M": image_json(entries) }),
        _ => Value::Null,
    }
}

fn image_json(image: &std::collections::HashMap<String, AttributeValue>) -> Value {
    let sorted: BTreeMap<&String, Value> = image
        .iter()
        .map(|(name, value)| (name, attribute_json(value)))
        .collect();
    json!(sorted)
}

fn record_json(record: &Record) -> Value {
    let mut object = Map::new();
    let mut put = |name: &str, value: Option<Value>| {
        if let Some(value) = value {
            object.insert(name.to_string(), value);
        }
    };
    put("eventID", record.event_id().map(|id| json!(id)));
    put("eventName", record.event_name().map(|name| json!(name.as_str())));
    put("eventVersion", record.event_version().map(|version| json!(version)));
    put("eventSource", record.event_source().map(|source| json!(source)));
    put("awsRegion", record.aws_region().map(|region| json!(region)));
    put("dynamodb", record.dynamodb().map(stream_record_json));
    Value::Object(object)
}

fn stream_record_json(stream: &StreamRecord) -> Value {
    let mut object = Map::new();
    if let Some(at) = stream
        .approximate_creation_date_time()
        .and_then(|at| DateTime::<Utc>::from_timestamp(at.secs(), at.subsec_nanos()))
    {
        object.insert(
            "ApproximateCreationDateTime".to_string(),
            json!(at.to_rfc3339_opts(SecondsFormat::Secs, false)),
        );
    }
    if let Some(keys) = stream.keys() {
        object.insert("Keys".to_string(), image_json(keys));
    }
    if let Some(image) = stream.new_image() {
        object.insert("NewImage".to_string(), image_json(image));
    }
    if let Some(image) = stream.old_image() {
        object.insert("OldImage".to_string(), image_json(image));
    }
    if let Some(sequence_number) = stream.sequence_number() {
        object.insert("SequenceNumber".to_string(), json!(sequence_number));
    }
    if let Some(size) = stream.size_bytes() {
        object.insert("SizeBytes".to_string(), json!(size));
    }
    if let Some(view_type) = stream.stream_view_type() {
        object.insert("StreamViewType".to_string(), json!(view_type.as_str()));
    }
    Value::Object(object)
}

/// Maps a DynamoDB Streams error code to the change log's error kinds.
pub fn change_log_error_for_code(code: Option<&str>, message: String) -> ChangeLogError {
    match code {
        Some("LimitExceededException" | "ThrottlingException") => ChangeLogError::Throttled(message),
        Some("InternalServerError" | "ServiceUnavailable") => ChangeLogError::Unavailable(message),
        Some("ResourceNotFoundException") => ChangeLogError::NotFound(message),
        Some("ExpiredIteratorException") => ChangeLogError::ExpiredIterator(message),
        _ => ChangeLogError::Other(message),
    }
}

fn classify<E, R>(operation: &str, error: SdkError<E, R>) -> ChangeLogError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let message = format!("{operation}: {}", DisplayErrorContext(&error));
    match &error {
        SdkError::ServiceError(service) => change_log_error_for_code(service.err().code(), message),
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ChangeLogError::Unavailable(message)
        }
        _ => ChangeLogError::Other(message),
    }
}
