use async_trait::async_trait;

/// A batch pulled from the message source, paired with an opaque ack token.
/// Acking the token after every payload has been inserted or dead-lettered
/// triggers the source-side checkpoint.
#[derive(Debug, Clone)]
pub struct TokenedEvents<Ack> {
    pub payloads: Vec<Vec<u8>>,
    pub ack: Ack,
}

/// The out-of-scope collaborator that owns the actual pub/sub or
/// partitioned-log client. Only its pull/ack contract is specified here;
/// concrete implementations (Pub/Sub, Kinesis, Kafka, ...) live outside
/// this crate.
#[async_trait]
pub trait Source: Send + Sync {
    type Ack: Send + Sync + 'static;

    /// Pulls the next batch, or `None` once the source is exhausted (only
    /// relevant for bounded test sources; production sources stream
    /// forever).
    async fn next_batch(&self) -> Option<TokenedEvents<Self::Ack>>;

    /// Triggers the source-side checkpoint past this batch.
    async fn ack(&self, token: Self::Ack);
}
