use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialPosition {
    Latest,
    TrimHorizon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Polling,
    Push,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub subscription_id: String,
    pub app_name: String,
    pub initial_position: InitialPosition,
    pub retrieval_mode: RetrievalMode,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            app_name: "analytics-loader".to_string(),
            initial_position: InitialPosition::TrimHorizon,
            retrieval_mode: RetrievalMode::Polling,
        }
    }
}

/// Per-JDBC-operation timeouts against the warehouse connection: login,
/// network, and query, each independently configurable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JdbcTimeoutsConfig {
    pub login_seconds: u64,
    pub network_seconds: u64,
    pub query_seconds: u64,
}

impl Default for JdbcTimeoutsConfig {
    fn default() -> Self {
        Self {
            login_seconds: 60,
            network_seconds: 60,
            query_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputGoodConfig {
    pub url: String,
    pub user: String,
    pub private_key: String,
    pub passphrase: Option<String>,
    pub role: Option<String>,
    pub database: String,
    pub schema: String,
    pub table: String,
    pub channel_name: String,
    pub timeouts: JdbcTimeoutsConfig,
}

impl Default for OutputGoodConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: String::new(),
            private_key: String::new(),
            passphrase: None,
            role: None,
            database: String::new(),
            schema: String::new(),
            table: "events".to_string(),
            channel_name: "analytics-loader".to_string(),
            timeouts: JdbcTimeoutsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputBadConfig {
    pub destination: String,
    pub max_batch_size: usize,
    pub max_bytes: usize,
    pub backoff_seconds: u64,
}

impl Default for OutputBadConfig {
    fn default() -> Self {
        Self {
            destination: String::new(),
            max_batch_size: 500,
            max_bytes: 1024 * 1024,
            backoff_seconds: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub good: OutputGoodConfig,
    pub bad: OutputBadConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            good: OutputGoodConfig::default(),
            bad: OutputBadConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatchingConfig {
    pub max_bytes: usize,
    pub max_delay_ms: u64,
    pub upload_concurrency: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_bytes: 16 * 1024 * 1024,
            max_delay_ms: 1_000,
            upload_concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SetupRetryConfig {
    pub delay_seconds: u64,
}

impl Default for SetupRetryConfig {
    fn default() -> Self {
        Self { delay_seconds: 30 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransientRetryConfig {
    pub delay_seconds: u64,
    pub attempts: usize,
}

impl Default for TransientRetryConfig {
    fn default() -> Self {
        Self {
            delay_seconds: 1,
            attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetriesConfig {
    pub setup_errors: SetupRetryConfig,
    pub transient_errors: TransientRetryConfig,
}

impl Default for RetriesConfig {
    fn default() -> Self {
        Self {
            setup_errors: SetupRetryConfig::default(),
            transient_errors: TransientRetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsdConfig {
    pub hostname: String,
    pub port: u16,
    pub tags: HashMap<String, String>,
    pub period_seconds: u64,
    pub prefix: String,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 8125,
            tags: HashMap::new(),
            period_seconds: 60,
            prefix: "snowplow.loader".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    pub statsd: Option<StatsdConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SentryConfig {
    pub dsn: Option<String>,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    pub endpoint: Option<String>,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MonitoringConfig {
    pub metrics: MetricsConfig,
    pub sentry: SentryConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryConfig {
    pub disable: bool,
    pub user_provided_id: Option<String>,
}

/// The loader's full, hierarchical configuration. Layered the way
/// `mmoldb-ingest::config` layers its
/// own `IngestConfig`: typed defaults, overridden by an optional TOML file,
/// overridden again by `LOADER_`-prefixed environment variables so
/// container orchestration can inject secrets without a config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoaderConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub batching: BatchingConfig,
    pub retries: RetriesConfig,
    pub skip_schemas: Vec<String>,
    pub monitoring: MonitoringConfig,
    pub telemetry: TelemetryConfig,
}

impl LoaderConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(LoaderConfig::default()))
            .merge(Toml::file("loader.toml"))
            .merge(Env::prefixed("LOADER_").split("__"))
    }

    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_figment() {
        let config: LoaderConfig = Figment::from(Serialized::defaults(LoaderConfig::default()))
            .extract()
            .unwrap();
        assert_eq!(config.batching.upload_concurrency, 1);
        assert_eq!(config.retries.setup_errors.delay_seconds, 30);
    }

    #[test]
    fn env_override_wins_over_default() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LOADER_BATCHING__UPLOAD_CONCURRENCY", "4");
            let config = LoaderConfig::figment().extract::<LoaderConfig>().unwrap();
            assert_eq!(config.batching.upload_concurrency, 4);
            Ok(())
        });
    }
}
