use std::process::ExitCode;
use std::sync::Arc;

use aws_config::BehaviorVersion;
use clap::Parser;
use coord_aws::handlers::print::{PrintRecord, PrintSummary};
use coord_aws::logging::init_tracing;
use coord_aws::{DynamoDbStore, DynamoDbStoreConfig, DynamoDbStreamsLog};
use coord_core::config::{LeaseTableConfig, RetryPolicy, WatcherConfig};
use coord_core::handler::{ChangeHandler, EventCountingHandler};
use coord_core::recorder::EventRecorder;
use coord_core::supervisor::ShardSupervisor;
use coord_core::worker::ExitReason;

/// See what's going on in DynamoDB Streams in near real-time.
#[derive(Debug, Parser)]
#[command(name = "streamgazer")]
struct Args {
    /// ARN of the stream to watch.
    stream_arn: String,

    /// Print each change record as JSON. Default when no other output is selected.
    #[arg(long)]
    print_record: bool,

    /// Print a one-line summary of each change record.
    #[arg(long)]
    print_summary: bool,

    /// Count changes per item into this table, once per stream event.
    #[arg(long, env = "COORD_COUNT_TABLE")]
    count_table: Option<String>,

    /// Key attribute whose value identifies the counted item.
    #[arg(long, default_value = "PK")]
    count_key_attribute: String,

    #[arg(long, default_value_t = 10)]
    discovery_interval_secs: u64,

    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,

    #[arg(long, env = "AWS_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,
}

impl Args {
    fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            discovery_interval_ms: self.discovery_interval_secs.saturating_mul(1_000),
            poll_interval_ms: self.poll_interval_ms,
            retry: RetryPolicy::default(),
        }
    }
}

fn handlers(args: &Args, sdk_config: &aws_config::SdkConfig) -> Vec<Arc<dyn ChangeHandler>> {
    let mut handlers: Vec<Arc<dyn ChangeHandler>> = Vec::new();
    if args.print_record {
        handlers.push(Arc::new(PrintRecord::stdout()));
    }
    if args.print_summary {
        handlers.push(Arc::new(PrintSummary::stdout()));
    }

    if let Some(table_name) = &args.count_table {
        let table = LeaseTableConfig {
            table_name: table_name.clone(),
            ..LeaseTableConfig::default()
        };
        let store = DynamoDbStore::new(
            sdk_config,
            DynamoDbStoreConfig {
                table_name: table.table_name.clone(),
                region: args.region.clone(),
                endpoint: args.endpoint_url.clone(),
                timeout_ms: None,
            },
        );
        let recorder = Arc::new(EventRecorder::new(Arc::new(store)));
        handlers.push(Arc::new(
            EventCountingHandler::new(recorder, args.count_key_attribute.clone())
                .with_ttl(Some(table.event_ttl())),
        ));
    }

    if !args.print_summary && !args.print_record {
        handlers.push(Arc::new(PrintRecord::stdout()));
    }
    handlers
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let log = Arc::new(DynamoDbStreamsLog::new(
        &sdk_config,
        args.region.clone(),
        args.endpoint_url.clone(),
    ));
    let supervisor = ShardSupervisor::new(
        log,
        args.stream_arn.clone(),
        handlers(&args, &sdk_config),
        args.watcher_config(),
    );

    let cancel = supervisor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping shard watchers");
            cancel.cancel();
        }
    });

    tracing::info!(stream_arn = %args.stream_arn, "watching stream");
    let exits = supervisor.run().await;

    let failed = exits
        .iter()
        .filter(|exit| matches!(exit.reason, ExitReason::Failed(_)))
        .count();
    let delivered: u64 = exits.iter().map(|exit| exit.records_delivered).sum();
    tracing::info!(
        workers = exits.len(),
        failed,
        records_delivered = delivered,
        "stopped watching stream"
    );
    ExitCode::SUCCESS
}
