use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Processor {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRowKind {
    LoaderParsingError,
    LoaderRuntimeError,
}

impl BadRowKind {
    fn schema_uri(&self) -> &'static str {
        match self {
            BadRowKind::LoaderParsingError => {
                "iglu:com.snowplowanalytics.snowplow.badrows/loader_parsing_error/jsonschema/2-0-0"
            }
            BadRowKind::LoaderRuntimeError => {
                "iglu:com.snowplowanalytics.snowplow.badrows/loader_runtime_error/jsonschema/1-0-0"
            }
        }
    }
}

/// A rejected event, tagged with why it was rejected and carrying enough of
/// the original payload for operators to replay or inspect it later.
#[derive(Debug, Clone)]
pub struct BadRow {
    pub kind: BadRowKind,
    pub processor: Processor,
    pub cause: String,
    pub payload: Vec<u8>,
}

impl BadRow {
    pub fn parsing(processor: Processor, cause: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind: BadRowKind::LoaderParsingError,
            processor,
            cause: cause.into(),
            payload,
        }
    }

    pub fn runtime(processor: Processor, cause: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind: BadRowKind::LoaderRuntimeError,
            processor,
            cause: cause.into(),
            payload,
        }
    }

    /// Serialises this bad row as a self-describing JSON blob, ready for
    /// the dead-letter sink contract.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "schema": self.kind.schema_uri(),
            "data": {
                "processor": {
                    "artifact": self.processor.name,
                    "version": self.processor.version,
                },
                "failure": {
                    "cause": self.cause,
                },
                "payload": String::from_utf8_lossy(&self.payload),
            },
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_json()).expect("bad row json is always serialisable")
    }
}
