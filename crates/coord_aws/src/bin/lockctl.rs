use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use aws_config::BehaviorVersion;
use clap::{Parser, Subcommand};
use coord_aws::logging::init_tracing;
use coord_aws::{DynamoDbStore, DynamoDbStoreConfig};
use coord_core::config::LeaseTableConfig;
use coord_core::keys::DEFAULT_TABLE_NAME;
use coord_core::lease::{LeaseError, LeaseManager};
use coord_core::recorder::{EventRecorder, RecordOutcome, RecorderError, ViewEvent};
use coord_core::store::StoreError;
use serde_json::json;
use thiserror::Error;

/// Distributed locks and idempotent view counting on a DynamoDB table.
#[derive(Debug, Parser)]
#[command(name = "lockctl")]
struct Args {
    #[arg(long, env = "COORD_TABLE", default_value = DEFAULT_TABLE_NAME)]
    table: String,

    #[arg(long, env = "AWS_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Per-request timeout.
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Take the lock on a resource. Exits 1 when someone else holds it.
    Acquire {
        resource: String,
        #[arg(long)]
        timeout_secs: u64,
        #[arg(long)]
        holder: String,
    },
    /// Give the lock back. Exits 1 when it is not held by `holder`.
    Release {
        resource: String,
        #[arg(long)]
        holder: String,
    },
    /// Show the current lock record. Exits 1 when there is none.
    Holder { resource: String },
    /// Count one page view. Exits 1 when the view was already counted.
    RecordView {
        #[arg(long)]
        url: String,
        #[arg(long)]
        time: String,
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Print the counter of a resource key such as `URL#myblog.com/a`.
    Counter { resource_key: String },
    /// Create the table if needed and enable expiry on `ttl`.
    EnsureTable,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

enum Outcome {
    Done,
    Refused,
}

impl From<bool> for Outcome {
    fn from(succeeded: bool) -> Self {
        if succeeded {
            Self::Done
        } else {
            Self::Refused
        }
    }
}

async fn run(args: Args) -> Result<Outcome, CliError> {
    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let table = LeaseTableConfig {
        table_name: args.table.clone(),
        ..LeaseTableConfig::default()
    };
    let store = Arc::new(DynamoDbStore::new(
        &sdk_config,
        DynamoDbStoreConfig {
            table_name: table.table_name.clone(),
            region: args.region,
            endpoint: args.endpoint_url,
            timeout_ms: args.timeout_ms,
        },
    ));

    match args.command {
        Command::Acquire {
            resource,
            timeout_secs,
            holder,
        } => {
            let acquired = LeaseManager::new(store)
                .acquire(&resource, timeout_secs, &holder)
                .await?;
            println!("{}", json!({ "resource": resource, "acquired": acquired }));
            Ok(acquired.into())
        }
        Command::Release { resource, holder } => {
            let released = LeaseManager::new(store).release(&resource, &holder).await?;
            println!("{}", json!({ "resource": resource, "released": released }));
            Ok(released.into())
        }
        Command::Holder { resource } => match LeaseManager::new(store).holder(&resource).await? {
            Some(record) => {
                println!(
                    "{}",
                    json!({
                        "resource": record.resource_name,
                        "holder": record.holder_id,
                        "expires_at": record.expires_at.to_rfc3339(),
                    })
                );
                Ok(Outcome::Done)
            }
            None => {
                println!("{}", json!({ "resource": resource, "holder": null }));
                Ok(Outcome::Refused)
            }
        },
        Command::RecordView {
            url,
            time,
            client_id,
            ttl_secs,
        } => {
            let event = ViewEvent {
                url,
                time,
                client_id,
            };
            let ttl = ttl_secs.map_or_else(|| table.event_ttl(), Duration::from_secs);
            let recorder = EventRecorder::new(store);
            let outcome = recorder.record_view(&event, Some(ttl)).await?;
            let counter = recorder.counter(&event.resource_key()).await?;
            let recorded = outcome == RecordOutcome::Recorded;
            println!(
                "{}",
                json!({
                    "resource_key": event.resource_key(),
                    "recorded": recorded,
                    "counter": counter,
                })
            );
            Ok(recorded.into())
        }
        Command::Counter { resource_key } => {
            let counter = EventRecorder::new(store).counter(&resource_key).await?;
            println!("{}", json!({ "resource_key": resource_key, "counter": counter }));
            Ok(Outcome::Done)
        }
        Command::EnsureTable => {
            let created = store.ensure_table().await?;
            let stream_arn = store.stream_arn().await?;
            println!(
                "{}",
                json!({
                    "table": store.table_name(),
                    "created": created,
                    "stream_arn": stream_arn,
                })
            );
            Ok(Outcome::Done)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Refused) => ExitCode::from(1),
        Err(error) => {
            tracing::error!(error = %error, "lockctl failed");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_takes_resource_timeout_and_holder() {
        let args = Args::try_parse_from([
            "lockctl",
            "--table",
            "locks-test",
            "acquire",
            "orders",
            "--timeout-secs",
            "30",
            "--holder",
            "tx-1",
        ])
        .expect("valid arguments");

        assert_eq!(args.table, "locks-test");
        match args.command {
            Command::Acquire {
                resource,
                timeout_secs,
                holder,
            } => {
                assert_eq!(resource, "orders");
                assert_eq!(timeout_secs, 30);
                assert_eq!(holder, "tx-1");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn record_view_requires_the_client_id() {
        let parsed = Args::try_parse_from([
            "lockctl",
            "record-view",
            "--url",
            "myblog.com/a",
            "--time",
            "2022-03-28T13:17:23+00:00",
        ]);
        assert!(parsed.is_err());
    }
}
