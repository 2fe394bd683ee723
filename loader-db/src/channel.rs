use crate::vendor_error::VendorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hashbrown::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub enum ColumnValue {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

pub type Row = HashMap<String, ColumnValue>;

/// A per-row failure returned from a `Channel::write` call. `index` refers
/// back into the positional sequence of rows submitted in that call — the
/// only mechanism for associating a failure with its originating event.
#[derive(Debug, Clone)]
pub struct InsertFailure {
    pub index: usize,
    pub extra_cols: HashSet<String>,
    pub cause: VendorError,
}

#[derive(Debug, Clone, Default)]
pub struct WriteResult {
    pub failures: Vec<InsertFailure>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ChannelIoError {
    pub message: String,
}

impl ChannelIoError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A bound, single-writer streaming-ingest session against one warehouse
/// table. At most one live instance exists per process at any time; the
/// cold-swap channel holder (`loader_ingest::channel_holder`) enforces that.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn write(&self, rows: Vec<Row>) -> Result<WriteResult, ChannelIoError>;
    async fn close(&self) -> Result<(), ChannelIoError>;
}

/// Allocates a channel bound to (database, schema, table, channel-name).
/// Open failures propagate as-is; this component has no retry policy of
/// its own (retry belongs to the channel provider, component G).
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Channel>, ChannelIoError>;
}
