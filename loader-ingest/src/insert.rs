use hashbrown::HashSet;
use loader_db::{to_tsv, BadRow, ChannelIoError, Processor, TableError, VendorError};
use loader_retry::{AttemptsExhausted, Health, TransientRetryPolicy};
use miette::Diagnostic;
use thiserror::Error;

use crate::channel_provider::ChannelProvider;
use crate::transform::BatchAfterTransform;
use loader_db::TableManager;

/// Errors that abort the pipeline outright:
/// a vendor error with a non-whitelisted code, or an I/O failure from the
/// channel or table collaborators themselves.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineFatalError {
    #[error("channel write failed")]
    ChannelIo(#[source] ChannelIoError),
    #[error("table schema evolution failed")]
    Table(#[source] TableError),
    #[error("warehouse reported a non-data-issue vendor error")]
    FatalInsert(#[source] VendorError),
}

/// Runs one insert pass. On the first pass, failures that
/// carry extra columns are set aside for retry and their column names
/// unioned for schema evolution; on the second pass any remaining
/// extra-column report is itself a data error (§9, open question: the
/// reference design maps stray second-pass extra-column reports to bad
/// rows rather than treating them as fatal, since the schema has already
/// been evolved and retrying further would not converge).
///
/// The `channel.write` call itself (as opposed to a per-row `InsertFailure`
/// inside its result) is a `TransientWarehouseError` candidate — a network
/// blip rather than a malformed row — so it runs under the bounded
/// transient-retry policy; exhausting it is what
/// turns it fatal.
pub async fn run_pass<Ack>(
    mut batch: BatchAfterTransform<Ack>,
    channel_provider: &ChannelProvider,
    table_manager: &TableManager,
    transient_retry: &TransientRetryPolicy,
    health: &Health,
    processor: &Processor,
    is_first_pass: bool,
) -> Result<BatchAfterTransform<Ack>, PipelineFatalError> {
    if batch.to_be_inserted.is_empty() {
        return Ok(batch);
    }

    let rows: Vec<_> = batch
        .to_be_inserted
        .iter()
        .map(|(_, row)| row.clone())
        .collect();

    let write_result = transient_retry
        .run(health, || {
            let rows = rows.clone();
            async move {
                channel_provider
                    .opened(move |channel| async move { channel.write(rows).await })
                    .await
                    .map_err(PipelineFatalError::ChannelIo)?
                    .map_err(PipelineFatalError::ChannelIo)
            }
        })
        .await
        .map_err(|AttemptsExhausted(err)| err)?;

    let mut retry_indices: HashSet<usize> = HashSet::new();
    let mut extra_cols_union: HashSet<String> = HashSet::new();
    let mut new_bad: Vec<BadRow> = Vec::new();

    for failure in write_result.failures {
        let has_extra_cols = !failure.extra_cols.is_empty();

        if is_first_pass && has_extra_cols {
            retry_indices.insert(failure.index);
            extra_cols_union.extend(failure.extra_cols);
            continue;
        }

        if has_extra_cols || failure.cause.code.is_data_issue() {
            let (event, _) = &batch.to_be_inserted[failure.index];
            new_bad.push(BadRow::runtime(
                processor.clone(),
                failure.cause.message,
                to_tsv(event).into_bytes(),
            ));
            continue;
        }

        return Err(PipelineFatalError::FatalInsert(failure.cause));
    }

    batch.bad_accumulated.extend(new_bad);

    if is_first_pass && !extra_cols_union.is_empty() {
        let names: Vec<String> = extra_cols_union.into_iter().collect();
        table_manager
            .add_columns(&names)
            .await
            .map_err(PipelineFatalError::Table)?;
        channel_provider.reset().await;

        batch.to_be_inserted = retry_indices
            .into_iter()
            .map(|idx| batch.to_be_inserted[idx].clone())
            .collect();
    } else {
        batch.to_be_inserted.clear();
    }

    Ok(batch)
}
