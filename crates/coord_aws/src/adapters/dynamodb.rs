//! DynamoDB implementation of [`KeyValueStore`].

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, KeySchemaElement, KeyType, Put, ScalarAttributeType,
    StreamSpecification, StreamViewType, TableStatus, TimeToLiveSpecification, TimeToLiveStatus,
    TransactWriteItem, Update as SdkUpdate,
};
use aws_sdk_dynamodb::Client;
use aws_smithy_types::timeout::TimeoutConfig;
use coord_core::keys::{ATTR_PK, ATTR_SK, ATTR_TTL};
use coord_core::store::{
    CancellationReason, Condition, Item, ItemKey, KeyValueStore, StoreError, TransactOp, Update,
};

use super::convert::{from_sdk_item, to_sdk_item, to_sdk_key, to_sdk_names, to_sdk_values};
use super::expression::ExpressionBuilder;

const TABLE_ACTIVE_POLL: Duration = Duration::from_secs(1);
const TABLE_ACTIVE_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone)]
pub struct DynamoDbStoreConfig {
    pub table_name: String,
    /// Overrides the region of the shared SDK config.
    pub region: Option<String>,
    /// Endpoint override, e.g. DynamoDB Local.
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl DynamoDbStoreConfig {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            region: None,
            endpoint: None,
            timeout_ms: None,
        }
    }
}

/// Items live in one table keyed by the string attributes `PK` and `SK`.
#[derive(Clone)]
pub struct DynamoDbStore {
    client: Client,
    table_name: String,
}

impl std::fmt::Debug for DynamoDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbStore")
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl DynamoDbStore {
    pub fn new(sdk_config: &aws_config::SdkConfig, config: DynamoDbStoreConfig) -> Self {
        let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config);
        if let Some(region) = config.region {
            builder = builder.region(aws_sdk_dynamodb::config::Region::new(region));
        }
        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if let Some(timeout_ms) = config.timeout_ms {
            builder = builder.timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(Duration::from_millis(timeout_ms))
                    .build(),
            );
        }

        Self::from_client(Client::from_conf(builder.build()), config.table_name)
    }

    pub fn from_client(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Creates the table when it is missing, waits for it to become active
    /// and turns on expiry through the `ttl` attribute. Returns whether the
    /// table was created by this call.
    pub async fn ensure_table(&self) -> Result<bool, StoreError> {
        let created = match self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
        {
            Ok(_) => false,
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|error| error.is_resource_not_found_exception()) =>
            {
                self.create_table().await?;
                true
            }
            Err(error) => return Err(classify("DescribeTable", error)),
        };

        self.wait_until_active().await?;
        self.enable_ttl().await?;
        Ok(created)
    }

    /// ARN of the table's current stream, if streams are enabled.
    pub async fn stream_arn(&self) -> Result<Option<String>, StoreError> {
        let output = self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
            .map_err(|error| classify("DescribeTable", error))?;
        Ok(output
            .table()
            .and_then(|table| table.latest_stream_arn())
            .map(str::to_string))
    }

    async fn create_table(&self) -> Result<(), StoreError> {
        tracing::info!(table = %self.table_name, "creating table");
        self.client
            .create_table()
            .table_name(&self.table_name)
            .attribute_definitions(string_attribute(ATTR_PK)?)
            .attribute_definitions(string_attribute(ATTR_SK)?)
            .key_schema(key_element(ATTR_PK, KeyType::Hash)?)
            .key_schema(key_element(ATTR_SK, KeyType::Range)?)
            .billing_mode(BillingMode::PayPerRequest)
            .stream_specification(
                StreamSpecification::builder()
                    .stream_enabled(true)
                    .stream_view_type(StreamViewType::NewAndOldImages)
                    .build()
                    .map_err(build_error)?,
            )
            .send()
            .await
            .map_err(|error| classify("CreateTable", error))?;
        Ok(())
    }

    async fn wait_until_active(&self) -> Result<(), StoreError> {
        for attempt in 1..=TABLE_ACTIVE_ATTEMPTS {
            let output = self
                .client
                .describe_table()
                .table_name(&self.table_name)
                .send()
                .await
                .map_err(|error| classify("DescribeTable", error))?;
            let status = output.table().and_then(|table| table.table_status());
            if status == Some(&TableStatus::Active) {
                return Ok(());
            }
            tracing::debug!(table = %self.table_name, attempt, status = ?status, "waiting for table");
            tokio::time::sleep(TABLE_ACTIVE_POLL).await;
        }
        Err(StoreError::unavailable(format!(
            "table {} did not become active",
            self.table_name
        )))
    }

    async fn enable_ttl(&self) -> Result<(), StoreError> {
        let output = self
            .client
            .describe_time_to_live()
            .table_name(&self.table_name)
            .send()
            .await
            .map_err(|error| classify("DescribeTimeToLive", error))?;
        let status = output
            .time_to_live_description()
            .and_then(|description| description.time_to_live_status());
        if matches!(
            status,
            Some(TimeToLiveStatus::Enabled | TimeToLiveStatus::Enabling)
        ) {
            return Ok(());
        }

        tracing::info!(table = %self.table_name, attribute = ATTR_TTL, "enabling time to live");
        self.client
            .update_time_to_live()
            .table_name(&self.table_name)
            .time_to_live_specification(
                TimeToLiveSpecification::builder()
                    .enabled(true)
                    .attribute_name(ATTR_TTL)
                    .build()
                    .map_err(build_error)?,
            )
            .send()
            .await
            .map_err(|error| classify("UpdateTimeToLive", error))?;
        Ok(())
    }

    fn transact_item(&self, op: &TransactOp) -> Result<TransactWriteItem, StoreError> {
        let mut expressions = ExpressionBuilder::new();
        match op {
            TransactOp::Put {
                key,
                attributes,
                condition,
            } => {
                let mut item: Item = key.to_item();
                item.extend(attributes.clone());
                let condition_expression = condition
                    .as_ref()
                    .map(|condition| expressions.condition(condition));
                let put = Put::builder()
                    .table_name(&self.table_name)
                    .set_item(Some(to_sdk_item(&item)))
                    .set_condition_expression(condition_expression)
                    .set_expression_attribute_names(to_sdk_names(expressions.names()))
                    .set_expression_attribute_values(to_sdk_values(expressions.values()))
                    .build()
                    .map_err(build_error)?;
                Ok(TransactWriteItem::builder().put(put).build())
            }
            TransactOp::Update {
                key,
                updates,
                condition,
            } => {
                let update_expression = expressions.update(updates).ok_or_else(|| {
                    StoreError::invalid_request(format!("update of {key} has no updates"))
                })?;
                let condition_expression = condition
                    .as_ref()
                    .map(|condition| expressions.condition(condition));
                let update = SdkUpdate::builder()
                    .table_name(&self.table_name)
                    .set_key(Some(to_sdk_key(key)))
                    .update_expression(update_expression)
                    .set_condition_expression(condition_expression)
                    .set_expression_attribute_names(to_sdk_names(expressions.names()))
                    .set_expression_attribute_values(to_sdk_values(expressions.values()))
                    .build()
                    .map_err(build_error)?;
                Ok(TransactWriteItem::builder().update(update).build())
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for DynamoDbStore {
    async fn get_item(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(to_sdk_key(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|error| classify("GetItem", error))?;
        Ok(output.item().map(from_sdk_item))
    }

    async fn update_item(
        &self,
        key: &ItemKey,
        updates: &[Update],
        condition: Option<&Condition>,
    ) -> Result<(), StoreError> {
        let mut expressions = ExpressionBuilder::new();
        let update_expression = expressions.update(updates).ok_or_else(|| {
            StoreError::invalid_request(format!("update of {key} has no updates"))
        })?;
        let condition_expression = condition.map(|condition| expressions.condition(condition));

        self.client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(to_sdk_key(key)))
            .update_expression(update_expression)
            .set_condition_expression(condition_expression)
            .set_expression_attribute_names(to_sdk_names(expressions.names()))
            .set_expression_attribute_values(to_sdk_values(expressions.values()))
            .send()
            .await
            .map_err(|error| classify("UpdateItem", error))?;
        Ok(())
    }

    async fn delete_item(
        &self,
        key: &ItemKey,
        condition: Option<&Condition>,
    ) -> Result<(), StoreError> {
        let mut expressions = ExpressionBuilder::new();
        let condition_expression = condition.map(|condition| expressions.condition(condition));

        self.client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(to_sdk_key(key)))
            .set_condition_expression(condition_expression)
            .set_expression_attribute_names(to_sdk_names(expressions.names()))
            .set_expression_attribute_values(to_sdk_values(expressions.values()))
            .send()
            .await
            .map_err(|error| classify("DeleteItem", error))?;
        Ok(())
    }

    async fn transact_write(&self, ops: &[TransactOp]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Err(StoreError::invalid_request("transaction has no operations"));
        }
        let items = ops
            .iter()
            .map(|op| self.transact_item(op))
            .collect::<Result<Vec<_>, _>>()?;

        match self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(error) => {
                if let SdkError::ServiceError(service) = &error {
                    if let TransactWriteItemsError::TransactionCanceledException(canceled) =
                        service.err()
                    {
                        let reasons = canceled
                            .cancellation_reasons()
                            .iter()
                            .map(|reason| cancellation_reason(reason.code()))
                            .collect();
                        return Err(StoreError::TransactionCanceled { reasons });
                    }
                }
                Err(classify("TransactWriteItems", error))
            }
        }
    }
}

fn string_attribute(name: &str) -> Result<AttributeDefinition, StoreError> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ScalarAttributeType::S)
        .build()
        .map_err(build_error)
}

fn key_element(name: &str, key_type: KeyType) -> Result<KeySchemaElement, StoreError> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .map_err(build_error)
}

fn build_error(error: aws_sdk_dynamodb::error::BuildError) -> StoreError {
    StoreError::invalid_request(error.to_string())
}

/// Maps a per-operation cancellation code of `TransactWriteItems`.
pub fn cancellation_reason(code: Option<&str>) -> CancellationReason {
    match code {
        None | Some("None") => CancellationReason::None,
        Some("ConditionalCheckFailed") => CancellationReason::ConditionalCheckFailed,
        Some("TransactionConflict") => CancellationReason::TransactionConflict,
        Some("ThrottlingError" | "ProvisionedThroughputExceeded" | "RequestLimitExceeded") => {
            CancellationReason::Throttled
        }
        Some(other) => CancellationReason::Other(other.to_string()),
    }
}

/// Maps a DynamoDB error code to the store's error kinds.
pub fn store_error_for_code(code: Option<&str>, message: String) -> StoreError {
    match code {
        Some("ConditionalCheckFailedException") => StoreError::ConditionFailed,
        Some(
            "ProvisionedThroughputExceededException"
            | "ThrottlingException"
            | "RequestLimitExceeded"
            | "TransactionConflictException",
        ) => StoreError::Throttled(message),
        Some("InternalServerError" | "ServiceUnavailable") => StoreError::Unavailable(message),
        Some("ValidationException" | "ResourceNotFoundException") => {
            StoreError::InvalidRequest(message)
        }
        _ => StoreError::Other(message),
    }
}

fn classify<E, R>(operation: &str, error: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let message = format!("{operation}: {}", DisplayErrorContext(&error));
    match &error {
        SdkError::ServiceError(service) => store_error_for_code(service.err().code(), message),
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StoreError::Unavailable(message)
        }
        _ => StoreError::Other(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_codes_map_to_reasons() {
        assert_eq!(cancellation_reason(Some("None")), CancellationReason::None);
        assert_eq!(cancellation_reason(None), CancellationReason::None);
        assert_eq!(
            cancellation_reason(Some("ConditionalCheckFailed")),
            CancellationReason::ConditionalCheckFailed
        );
        assert_eq!(
            cancellation_reason(Some("ThrottlingError")),
            CancellationReason::Throttled
        );
        assert_eq!(
            cancellation_reason(Some("ItemCollectionSizeLimitExceeded")),
            CancellationReason::Other("ItemCollectionSizeLimitExceeded".to_string())
        );
    }

    #[test]
    fn condition_failures_and_throttling_are_told_apart() {
        assert_eq!(
            store_error_for_code(Some("ConditionalCheckFailedException"), String::new()),
            StoreError::ConditionFailed
        );

        let throttled = store_error_for_code(
            Some("ProvisionedThroughputExceededException"),
            "slow down".to_string(),
        );
        assert!(throttled.is_transient());

        let invalid = store_error_for_code(Some("ValidationException"), "bad".to_string());
        assert!(!invalid.is_transient());
        assert!(!invalid.is_condition_rejection());
    }

    #[test]
    fn a_cancelled_event_write_is_a_condition_rejection() {
        let error = StoreError::TransactionCanceled {
            reasons: vec![
                cancellation_reason(Some("ConditionalCheckFailed")),
                cancellation_reason(Some("None")),
            ],
        };
        assert!(error.is_condition_rejection());
        assert!(!error.is_transient());
    }

    #[test]
    fn a_missing_table_is_a_request_error_not_a_refusal() {
        let error = store_error_for_code(
            Some("ResourceNotFoundException"),
            "Requested resource not found".to_string(),
        );
        assert!(matches!(error, StoreError::InvalidRequest(_)));
        assert!(!error.is_transient());
    }
}
