use std::sync::Arc;

use loader_ingest::app::{self, Collaborators};
use loader_ingest::config::LoaderConfig;
use loader_ingest::sink::{BatchMetrics, DeadLetterError, DeadLetterSink, MetricsCollector};
use loader_ingest::source::{Source, TokenedEvents};
use loader_ingest::transform::{Transformer, TransformError};
use async_trait::async_trait;
use log::info;
use miette::IntoDiagnostic;
use tokio_util::sync::CancellationToken;

/// A `Source` that never yields a batch. Production deployments replace
/// this with a real pub/sub or partitioned-log client; the pipeline itself
/// is agnostic to which one.
struct IdleSource;

#[async_trait]
impl Source for IdleSource {
    type Ack = ();

    async fn next_batch(&self) -> Option<TokenedEvents<()>> {
        std::future::pending().await
    }

    async fn ack(&self, _token: ()) {}
}

struct LoggingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for LoggingDeadLetterSink {
    async fn sink_simple(&self, payloads: Vec<Vec<u8>>) -> Result<(), DeadLetterError> {
        log::warn!(
            "no dead-letter destination configured; dropping {} bad rows",
            payloads.len()
        );
        Ok(())
    }
}

struct LoggingMetricsCollector;

impl MetricsCollector for LoggingMetricsCollector {
    fn record_batch(&self, metrics: BatchMetrics) {
        log::debug!(
            "batch processed: {} good, {} bad, {} total",
            metrics.good,
            metrics.bad,
            metrics.original
        );
    }
}

/// A `Transformer` that projects every event to an empty row. Production
/// deployments replace this with the real unstruct-event/context resolver.
struct IdentityTransformer;

#[async_trait]
impl Transformer for IdentityTransformer {
    async fn transform(
        &self,
        _event: &loader_db::Event,
        _skip_schemas: &[loader_db::SkipPattern],
    ) -> Result<loader_db::Row, TransformError> {
        Ok(hashbrown::HashMap::new())
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    env_logger::init();

    let config = LoaderConfig::load().into_diagnostic()?;
    info!("starting analytics loader");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    // Collaborators this crate only specifies as contracts are stubbed here so the
    // binary links. The warehouse/channel stubs always fail, which drives
    // the unbounded setup-retry loop exactly as it would for a genuinely
    // unreachable warehouse — the same code path a real deployment hits
    // during an outage. A real deployment constructs `Collaborators` from
    // its own pub/sub, warehouse, and notification clients and calls
    // `loader_ingest::app::run` directly instead of this `main`.
    let collaborators = Collaborators {
        transformer: Arc::new(IdentityTransformer),
        channel_opener: unimplemented_channel_opener(),
        warehouse_executor: unimplemented_warehouse_executor(),
        dead_letter: Arc::new(LoggingDeadLetterSink),
        metrics: Arc::new(LoggingMetricsCollector),
        crash_reporter: app::default_crash_reporter(),
        webhook_transport: None,
    };

    app::run(config, Arc::new(IdleSource), collaborators, shutdown)
        .await
        .into_diagnostic()
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn unimplemented_channel_opener() -> Arc<dyn loader_db::ChannelOpener> {
    struct Unimplemented;
    #[async_trait]
    impl loader_db::ChannelOpener for Unimplemented {
        async fn open(&self) -> Result<Box<dyn loader_db::Channel>, loader_db::ChannelIoError> {
            Err(loader_db::ChannelIoError::new(
                "no streaming-ingest channel opener configured for this deployment",
            ))
        }
    }
    Arc::new(Unimplemented)
}

fn unimplemented_warehouse_executor() -> Arc<dyn loader_db::WarehouseExecutor> {
    struct Unimplemented;
    #[async_trait]
    impl loader_db::WarehouseExecutor for Unimplemented {
        async fn execute(&self, _sql: String) -> Result<(), loader_db::SqlError> {
            Err(loader_db::SqlError::new(
                None,
                "no warehouse executor configured for this deployment",
            ))
        }
    }
    Arc::new(Unimplemented)
}
