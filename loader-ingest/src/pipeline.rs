use std::sync::Arc;

use humansize::{format_size, DECIMAL};
use log::{debug, info, warn};
use loader_db::{BadRow, Processor, SkipPattern, TableManager};
use loader_retry::{Health, TransientRetryPolicy};
use tokio_util::sync::CancellationToken;

use crate::channel_provider::ChannelProvider;
use crate::insert::{run_pass, PipelineFatalError};
use crate::sink::{BatchMetrics, DeadLetterSink, MetricsCollector};
use crate::source::{Source, TokenedEvents};
use crate::transform::{parse_batch, transform_batch, Transformer};

/// Everything a fully-processed batch still needs before it can be
/// acknowledged: bad rows to dead-letter, counters to record, and the
/// ack token itself. Kept separate from insertion so the prefetch
/// boundary can hand it to a dedicated tail worker while
/// the main loop moves on to the next batch.
struct TailWork<Ack> {
    bad_accumulated: Vec<BadRow>,
    orig_batch_size: usize,
    ack: Ack,
}

/// Component J: the pipeline driver. Owns the fixed stage order
/// (Received → Parsed → Transformed → Inserted1 → [MaybeAltered] →
/// Inserted2 → BadEmitted → Metered → Acked), and
/// decouples dead-letter I/O and acking from insert throughput across a
/// bounded channel — the prefetch boundary.
pub struct Pipeline<S: Source> {
    source: Arc<S>,
    transformer: Arc<dyn Transformer>,
    skip_schemas: Arc<Vec<SkipPattern>>,
    channel_provider: Arc<ChannelProvider>,
    table_manager: Arc<TableManager>,
    transient_retry: TransientRetryPolicy,
    health: Arc<Health>,
    dead_letter: Arc<dyn DeadLetterSink>,
    metrics: Arc<dyn MetricsCollector>,
    processor: Processor,
    prefetch: usize,
}

impl<S: Source + 'static> Pipeline<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<S>,
        transformer: Arc<dyn Transformer>,
        skip_schemas: Arc<Vec<SkipPattern>>,
        channel_provider: Arc<ChannelProvider>,
        table_manager: Arc<TableManager>,
        transient_retry: TransientRetryPolicy,
        health: Arc<Health>,
        dead_letter: Arc<dyn DeadLetterSink>,
        metrics: Arc<dyn MetricsCollector>,
        processor: Processor,
        prefetch: usize,
    ) -> Self {
        Self {
            source,
            transformer,
            skip_schemas,
            channel_provider,
            table_manager,
            transient_retry,
            health,
            dead_letter,
            metrics,
            processor,
            prefetch: prefetch.max(1),
        }
    }

    /// Runs until the source is exhausted or `shutdown` fires. A batch that
    /// is already past insertion when shutdown fires is always drained
    /// through dead-lettering and acking before the pipeline returns
    /// (a fatal error never loses a batch silently, and
    /// neither does a graceful shutdown).
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), PipelineFatalError> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<TailWork<S::Ack>>(self.prefetch);

        let dead_letter = self.dead_letter.clone();
        let metrics = self.metrics.clone();
        let source_for_tail = self.source.clone();
        let tail_handle = tokio::spawn(async move {
            while let Some(work) = rx.recv().await {
                let bad_payloads: Vec<Vec<u8>> =
                    work.bad_accumulated.iter().map(|b| b.to_bytes()).collect();

                if !bad_payloads.is_empty() {
                    let total_bytes: usize = bad_payloads.iter().map(Vec::len).sum();
                    debug!(
                        "sinking {} bad rows ({})",
                        bad_payloads.len(),
                        format_size(total_bytes, DECIMAL)
                    );
                    if let Err(e) = dead_letter.sink_simple(bad_payloads).await {
                        warn!(
                            "dead-letter sink failed, bad rows were not forwarded for this batch: {e}"
                        );
                    }
                }

                metrics.record_batch(BatchMetrics {
                    good: work.orig_batch_size - work.bad_accumulated.len(),
                    bad: work.bad_accumulated.len(),
                    original: work.orig_batch_size,
                });

                source_for_tail.ack(work.ack).await;
            }
        });

        let result = self.drive(&tx, shutdown).await;

        drop(tx);
        let _ = tail_handle.await;
        result
    }

    async fn drive(
        &self,
        tx: &tokio::sync::mpsc::Sender<TailWork<S::Ack>>,
        shutdown: CancellationToken,
    ) -> Result<(), PipelineFatalError> {
        loop {
            let tokened = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, exiting after current batch");
                    return Ok(());
                }
                next = self.source.next_batch() => next,
            };

            let Some(tokened) = tokened else {
                return Ok(());
            };

            let tail = self.process_through_insert(tokened).await?;
            if tx.send(tail).await.is_err() {
                warn!("tail worker gone, batch dropped without acking");
                return Ok(());
            }
        }
    }

    async fn process_through_insert(
        &self,
        tokened: TokenedEvents<S::Ack>,
    ) -> Result<TailWork<S::Ack>, PipelineFatalError> {
        let parsed = parse_batch(tokened, &self.processor);
        let transformed = transform_batch(
            parsed,
            self.transformer.as_ref(),
            &self.skip_schemas,
            &self.processor,
            chrono::Utc::now(),
        )
        .await;

        let after_pass1 = run_pass(
            transformed,
            &self.channel_provider,
            &self.table_manager,
            &self.transient_retry,
            &self.health,
            &self.processor,
            true,
        )
        .await?;
        let after_pass2 = run_pass(
            after_pass1,
            &self.channel_provider,
            &self.table_manager,
            &self.transient_retry,
            &self.health,
            &self.processor,
            false,
        )
        .await?;

        Ok(TailWork {
            bad_accumulated: after_pass2.bad_accumulated,
            orig_batch_size: after_pass2.orig_batch_size,
            ack: after_pass2.ack,
        })
    }
}
