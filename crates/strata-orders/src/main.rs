//! Orders service entry point.
//!
//! Reads one command per stdin line as `<CommandType> <json payload>`,
//! persists the resulting events in `PostgreSQL`, publishes them on an
//! in-process log and keeps an order summary projection up to date. At end of
//! input the log is drained and the summaries are logged.

use std::error::Error;
use std::num::NonZeroUsize;
use std::sync::Arc;

use strata_core::event::AggregateType;
use strata_event_store::aggregate_store::AggregateStore;
use strata_event_store::config::{EventStoreConfig, PgConfig};
use strata_event_store::pg_event_repository::PgEventRepository;
use strata_messaging::broker::LogBroker;
use strata_messaging::cancel::CancelScope;
use strata_messaging::config::{ConsumerGroupConfig, EventBusConfig, ProducerConfig};
use strata_messaging::consumer_group::{ConsumerGroup, FailurePolicy};
use strata_messaging::event_bus::LogEventBus;
use strata_messaging::memory::MemoryLog;
use strata_messaging::producer::Producer;
use strata_messaging::telemetry;
use strata_orders::application::command_handlers::handle_command;
use strata_orders::application::projections::OrderSummaryProjection;
use strata_orders::domain::aggregates::ORDER;
use strata_orders::domain::commands::OrderCommand;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _telemetry = telemetry::init_tracing("strata-orders")?;
    tracing::info!("starting orders service");

    // Read configuration from environment.
    let store_config = EventStoreConfig::from_env()?;
    let pg_config = PgConfig::from_env()?;
    let bus_config = EventBusConfig::from_env()?;
    let producer_config = ProducerConfig::from_env()?;
    // Summaries fold each order's events in version order, so one worker
    // keeps every partition sequential.
    let group_config = ConsumerGroupConfig::from_env()?.with_pool_size(NonZeroUsize::MIN);

    let pool = pg_config.connect().await?;

    // Wire the log, the bus and the store.
    let broker = MemoryLog::with_default_partitions(bus_config.partitions);
    let producer = Arc::new(Producer::from_config(broker.writer(), producer_config, None)?);
    let order_type = AggregateType::new(ORDER);
    let bus = LogEventBus::new(Arc::clone(&producer), bus_config);
    bus.provision_topics(broker.admin().as_ref(), std::slice::from_ref(&order_type))
        .await?;
    let topics = vec![bus.topic_for(&order_type)];
    let store = AggregateStore::new(
        Arc::new(PgEventRepository::new(pool)),
        Arc::new(bus),
        store_config,
    );

    let projection = Arc::new(OrderSummaryProjection::new());
    let consumers = {
        let group = ConsumerGroup::new(Arc::new(broker.clone()), group_config);
        let projection = Arc::clone(&projection);
        tokio::spawn(async move {
            group
                .consume_with_processor(
                    &topics,
                    &CancelScope::new(),
                    projection,
                    FailurePolicy::Continue,
                )
                .await
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command_type, payload) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, "{}"));

        let command = match OrderCommand::decode(command_type, payload.trim().as_bytes()) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(command_type, error = %e, "command not understood");
                continue;
            }
        };
        match handle_command(&command, &store).await {
            Ok(result) => tracing::info!(
                command_type,
                aggregate_id = %result.aggregate_id,
                version = result.version,
                "command handled"
            ),
            Err(e) => tracing::warn!(command_type, error = %e, "command rejected"),
        }
    }

    // Drain the log before reporting.
    producer.close().await;
    broker.close();
    consumers.await??;

    for summary in projection.summaries() {
        tracing::info!(
            order_id = %summary.order_id,
            customer_id = %summary.customer_id,
            status = %summary.status,
            lines = summary.line_count,
            total_cents = summary.total_cents,
            version = summary.version,
            "order summary"
        );
    }

    Ok(())
}
