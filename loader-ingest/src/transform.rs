use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use loader_db::{parse_tsv, to_row, to_tsv, BadRow, Event, Processor, Row, SkipPattern};

use crate::source::TokenedEvents;

/// How many events are in flight against the transformer (unstruct-event /
/// context resolver) at once. The transformer is typically backed by a
/// schema registry lookup, so bounded concurrency here is what keeps a slow
/// registry from serialising an entire batch.
const TRANSFORM_CONCURRENCY: usize = 16;

/// The event struct paired with its fully-projected warehouse row: every
/// `unstruct_event_*`/`contexts_*` column the transformer produced for this
/// event, plus the fixed atomic columns.
pub type EventWithRow = (Event, Row);

/// One payload's worth of parsing: either a typed `Event` or a `BadRow`
/// already carrying the parse failure, in original arrival order.
pub struct ParsedBatch<Ack> {
    pub good: Vec<Event>,
    pub bad: Vec<BadRow>,
    pub ack: Ack,
}

/// Splits a raw batch into well-formed events and parsing `BadRow`s
/// (the Parsed stage).
pub fn parse_batch<Ack>(batch: TokenedEvents<Ack>, processor: &Processor) -> ParsedBatch<Ack> {
    let mut good = Vec::with_capacity(batch.payloads.len());
    let mut bad = Vec::new();

    for payload in batch.payloads {
        let parsed = std::str::from_utf8(&payload)
            .map_err(|e| e.to_string())
            .and_then(|line| parse_tsv(line).map_err(|e| e.to_string()));

        match parsed {
            Ok(event) => good.push(event),
            Err(cause) => bad.push(BadRow::parsing(processor.clone(), cause, payload)),
        }
    }

    ParsedBatch {
        good,
        bad,
        ack: batch.ack,
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransformError(pub String);

/// The out-of-scope collaborator that resolves unstruct-event and context
/// entities into warehouse columns, applying `skip_schemas` and column-name
/// sanitisation along the way. Only its per-event contract is specified
/// here; `skip_schemas` is passed in rather than owned by the implementor
/// so the loader's own configuration stays the single source of truth for
/// which schemas are dropped before column projection.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(
        &self,
        event: &Event,
        skip_schemas: &[SkipPattern],
    ) -> Result<Row, TransformError>;
}

/// A batch that has passed through the transformer: successfully projected
/// events paired with their rows, plus every bad row accumulated so far
/// (parse failures carried over, transform failures appended).
pub struct BatchAfterTransform<Ack> {
    pub to_be_inserted: Vec<EventWithRow>,
    pub orig_batch_size: usize,
    pub bad_accumulated: Vec<BadRow>,
    pub ack: Ack,
}

/// Projects every parsed event into a warehouse row: the fixed atomic
/// columns cast directly from the `Event`, merged with whatever entity
/// columns the transformer resolves (after applying `skip_schemas`), then
/// stamps `load_tstamp` at the moment of projection (the Transformed stage).
/// Transform failures are semantic, not environmental: they become bad rows,
/// never fatal errors.
pub async fn transform_batch<Ack>(
    batch: ParsedBatch<Ack>,
    transformer: &dyn Transformer,
    skip_schemas: &[SkipPattern],
    processor: &Processor,
    load_tstamp: DateTime<Utc>,
) -> BatchAfterTransform<Ack> {
    let orig_batch_size = batch.good.len() + batch.bad.len();
    let mut bad_accumulated = batch.bad;
    let mut to_be_inserted = Vec::with_capacity(batch.good.len());

    let results: Vec<_> = stream::iter(batch.good)
        .map(|event| async move {
            let outcome = transformer.transform(&event, skip_schemas).await;
            (event, outcome)
        })
        .buffer_unordered(TRANSFORM_CONCURRENCY)
        .collect()
        .await;

    for (event, outcome) in results {
        match outcome {
            Ok(entity_row) => {
                let mut row = to_row(&event);
                row.extend(entity_row);
                row.insert(
                    "load_tstamp".to_string(),
                    loader_db::ColumnValue::Timestamp(load_tstamp),
                );
                to_be_inserted.push((event, row));
            }
            Err(TransformError(cause)) => {
                let payload = to_tsv(&event).into_bytes();
                bad_accumulated.push(BadRow::runtime(processor.clone(), cause, payload));
            }
        }
    }

    BatchAfterTransform {
        to_be_inserted,
        orig_batch_size,
        bad_accumulated,
        ack: batch.ack,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;

    fn processor() -> Processor {
        Processor {
            name: "analytics-loader".to_string(),
            version: "0.1.0".to_string(),
        }
    }

    fn sample_tsv() -> Vec<u8> {
        let mut fields = vec![String::new(); 52];
        fields[3] = "2024-01-01T00:00:00Z".to_string();
        fields[6] = "11111111-1111-1111-1111-111111111111".to_string();
        fields[10] = "ssc-2.1.0".to_string();
        fields[11] = "ssc-3.2.0".to_string();
        fields.join("\t").into_bytes()
    }

    #[test]
    fn malformed_payload_becomes_a_bad_row_not_a_panic() {
        let batch = TokenedEvents {
            payloads: vec![b"too\tfew\tfields".to_vec(), sample_tsv()],
            ack: (),
        };
        let parsed = parse_batch(batch, &processor());
        assert_eq!(parsed.good.len(), 1);
        assert_eq!(parsed.bad.len(), 1);
    }

    struct AlwaysFailTransformer;
    #[async_trait]
    impl Transformer for AlwaysFailTransformer {
        async fn transform(
            &self,
            _event: &Event,
            _skip_schemas: &[SkipPattern],
        ) -> Result<Row, TransformError> {
            Err(TransformError("unstruct_event schema not found".to_string()))
        }
    }

    struct OkTransformer;
    #[async_trait]
    impl Transformer for OkTransformer {
        async fn transform(
            &self,
            _event: &Event,
            _skip_schemas: &[SkipPattern],
        ) -> Result<Row, TransformError> {
            Ok(HashMap::new())
        }
    }

    struct EntityColumnTransformer;
    #[async_trait]
    impl Transformer for EntityColumnTransformer {
        async fn transform(
            &self,
            _event: &Event,
            _skip_schemas: &[SkipPattern],
        ) -> Result<Row, TransformError> {
            let mut row = HashMap::new();
            row.insert(
                "unstruct_event_com_acme_click_1".to_string(),
                loader_db::ColumnValue::String("{}".to_string()),
            );
            Ok(row)
        }
    }

    #[tokio::test]
    async fn transform_failure_demotes_event_to_bad_row() {
        let batch = TokenedEvents {
            payloads: vec![sample_tsv()],
            ack: (),
        };
        let parsed = parse_batch(batch, &processor());
        let transformed = transform_batch(
            parsed,
            &AlwaysFailTransformer,
            &[],
            &processor(),
            Utc::now(),
        )
        .await;

        assert!(transformed.to_be_inserted.is_empty());
        assert_eq!(transformed.bad_accumulated.len(), 1);
        assert_eq!(transformed.orig_batch_size, 1);
    }

    #[tokio::test]
    async fn successful_transform_stamps_load_tstamp() {
        let batch = TokenedEvents {
            payloads: vec![sample_tsv()],
            ack: (),
        };
        let parsed = parse_batch(batch, &processor());
        let now = Utc::now();
        let transformed = transform_batch(parsed, &OkTransformer, &[], &processor(), now).await;

        assert_eq!(transformed.to_be_inserted.len(), 1);
        let (_, row) = &transformed.to_be_inserted[0];
        assert!(row.contains_key("load_tstamp"));
    }

    #[tokio::test]
    async fn projected_row_carries_both_fixed_columns_and_entity_columns() {
        let batch = TokenedEvents {
            payloads: vec![sample_tsv()],
            ack: (),
        };
        let parsed = parse_batch(batch, &processor());
        let transformed =
            transform_batch(parsed, &EntityColumnTransformer, &[], &processor(), Utc::now())
                .await;

        assert_eq!(transformed.to_be_inserted.len(), 1);
        let (_, row) = &transformed.to_be_inserted[0];
        assert!(row.contains_key("event_id"));
        assert!(row.contains_key("collector_tstamp"));
        assert!(row.contains_key("unstruct_event_com_acme_click_1"));
        assert!(row.contains_key("load_tstamp"));
    }
}
