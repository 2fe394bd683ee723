use std::sync::Arc;

use hashbrown::HashMap;
use loader_db::{ChannelOpener, SkipPattern, TableManager, WarehouseExecutor};
use loader_retry::{Alerter, Health, NullAlerter, SetupRetryPolicy, WebhookTransport};
use tokio_util::sync::CancellationToken;

use crate::channel_provider::ChannelProvider;
use crate::config::LoaderConfig;
use crate::pipeline::{Pipeline, PipelineFatalError};
use crate::sink::{CrashReporter, DeadLetterSink, MetricsCollector, NullCrashReporter};
use crate::source::Source;
use crate::transform::Transformer;

/// Every collaborator this crate only specifies as a contract: the concrete pub/sub
/// client, the streaming-ingest SDK, the warehouse JDBC transactor, the
/// unstruct-event/context resolver, the dead-letter and metrics
/// destinations, and the alert webhook's transport. A deployment supplies
/// real implementations of these; this crate only specifies their
/// contracts and wires them together.
pub struct Collaborators {
    pub transformer: Arc<dyn Transformer>,
    pub channel_opener: Arc<dyn ChannelOpener>,
    pub warehouse_executor: Arc<dyn WarehouseExecutor>,
    pub dead_letter: Arc<dyn DeadLetterSink>,
    pub metrics: Arc<dyn MetricsCollector>,
    pub crash_reporter: Arc<dyn CrashReporter>,
    pub webhook_transport: Option<Arc<dyn WebhookTransport>>,
}

/// Builds the alerter the config calls for: a `WebhookAlerter` over the
/// supplied transport if `monitoring.webhook.endpoint` is set, a
/// `NullAlerter` otherwise.
fn build_alerter(config: &LoaderConfig, transport: Option<Arc<dyn WebhookTransport>>) -> Arc<dyn Alerter> {
    match (&config.monitoring.webhook.endpoint, transport) {
        (Some(_), Some(transport)) => Arc::new(ForwardingAlerter {
            transport,
            tags: config.monitoring.webhook.tags.clone(),
        }),
        _ => Arc::new(NullAlerter),
    }
}

/// `WebhookAlerter` is generic over its transport type for zero-cost
/// dispatch in the common case; here we need a trait object instead, since
/// the concrete transport is chosen at runtime from config.
struct ForwardingAlerter {
    transport: Arc<dyn WebhookTransport>,
    tags: HashMap<String, String>,
}

#[async_trait::async_trait]
impl Alerter for ForwardingAlerter {
    async fn send(&self, alert: loader_retry::Alert) {
        let payload = serde_json::json!({
            "message": alert.message,
            "tags": self.tags,
            "severity": alert.severity,
        });
        if let Err(e) = self.transport.post(payload).await {
            log::warn!("failed to deliver alert (attempt {}): {e}", alert.attempt);
        }
    }
}

/// Assembles the pipeline from config and collaborators, runs the
/// one-time table initialisation, then drives batches until `shutdown`
/// fires or the source is exhausted.
pub async fn run<S: Source + 'static>(
    config: LoaderConfig,
    source: Arc<S>,
    collaborators: Collaborators,
    shutdown: CancellationToken,
) -> Result<(), PipelineFatalError> {
    let health = Arc::new(Health::new());
    let alerter = build_alerter(&config, collaborators.webhook_transport);

    let setup_retry = SetupRetryPolicy::new(std::time::Duration::from_secs(
        config.retries.setup_errors.delay_seconds,
    ));
    let transient_retry = loader_retry::TransientRetryPolicy::new(
        std::time::Duration::from_secs(config.retries.transient_errors.delay_seconds),
        config.retries.transient_errors.attempts,
    );

    let fqn = format!(
        "{}.{}.{}",
        config.output.good.database, config.output.good.schema, config.output.good.table
    );
    let table_manager = Arc::new(TableManager::new(
        fqn,
        collaborators.warehouse_executor,
        setup_retry.clone(),
        health.clone(),
        alerter.clone(),
    ));
    table_manager.initialize().await;

    let channel_provider = Arc::new(ChannelProvider::new(
        collaborators.channel_opener,
        setup_retry,
        health.clone(),
        alerter,
    ));

    let processor = loader_db::Processor {
        name: "analytics-loader".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let skip_schemas: Vec<SkipPattern> = config
        .skip_schemas
        .iter()
        .map(SkipPattern::new)
        .collect();

    let pipeline = Pipeline::new(
        source,
        collaborators.transformer,
        Arc::new(skip_schemas),
        channel_provider.clone(),
        table_manager,
        transient_retry,
        health,
        collaborators.dead_letter,
        collaborators.metrics,
        processor,
        config.batching.upload_concurrency,
    );

    let result = pipeline.run(shutdown).await;
    channel_provider.shutdown().await;

    if let Err(err) = &result {
        collaborators.crash_reporter.report(err);
    }

    result
}

pub fn default_crash_reporter() -> Arc<dyn CrashReporter> {
    Arc::new(NullCrashReporter)
}
