use async_trait::async_trait;
use itertools::Itertools;
use loader_retry::{Alerter, Health, SetupRetryPolicy};
use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;

/// JDBC-vendor code swallowed by `TableManager::add_columns` because it
/// means "column already exists", i.e. a prior attempt already won.
const COLUMN_ALREADY_EXISTS: i32 = 1430;

/// (column name, SQL type, nullable) for every fixed atomic column plus
/// `load_tstamp`, in the order `event::to_row` emits them. `event_id` is
/// also the table's primary key.
const ATOMIC_COLUMNS: &[(&str, &str, bool)] = &[
    ("app_id", "VARCHAR", true),
    ("platform", "VARCHAR", true),
    ("etl_tstamp", "TIMESTAMP_NTZ", true),
    ("collector_tstamp", "TIMESTAMP_NTZ", false),
    ("dvce_created_tstamp", "TIMESTAMP_NTZ", true),
    ("event", "VARCHAR", true),
    ("event_id", "VARCHAR", false),
    ("txn_id", "INTEGER", true),
    ("name_tracker", "VARCHAR", true),
    ("v_tracker", "VARCHAR", true),
    ("v_collector", "VARCHAR", false),
    ("v_etl", "VARCHAR", false),
    ("user_id", "VARCHAR", true),
    ("user_ipaddress", "VARCHAR", true),
    ("user_fingerprint", "VARCHAR", true),
    ("domain_userid", "VARCHAR", true),
    ("domain_sessionidx", "INTEGER", true),
    ("network_userid", "VARCHAR", true),
    ("geo_country", "VARCHAR", true),
    ("geo_region", "VARCHAR", true),
    ("geo_city", "VARCHAR", true),
    ("geo_zipcode", "VARCHAR", true),
    ("geo_latitude", "FLOAT", true),
    ("geo_longitude", "FLOAT", true),
    ("page_url", "VARCHAR", true),
    ("page_title", "VARCHAR", true),
    ("page_referrer", "VARCHAR", true),
    ("mkt_medium", "VARCHAR", true),
    ("mkt_source", "VARCHAR", true),
    ("mkt_campaign", "VARCHAR", true),
    ("se_category", "VARCHAR", true),
    ("se_action", "VARCHAR", true),
    ("se_label", "VARCHAR", true),
    ("se_value", "FLOAT", true),
    ("tr_orderid", "VARCHAR", true),
    ("tr_total", "FLOAT", true),
    ("ti_sku", "VARCHAR", true),
    ("ti_price", "FLOAT", true),
    ("useragent", "VARCHAR", true),
    ("br_name", "VARCHAR", true),
    ("os_name", "VARCHAR", true),
    ("dvce_type", "VARCHAR", true),
    ("dvce_ismobile", "BOOLEAN", true),
    ("doc_charset", "VARCHAR", true),
    ("domain_sessionid", "VARCHAR", true),
    ("derived_tstamp", "TIMESTAMP_NTZ", true),
    ("event_vendor", "VARCHAR", true),
    ("event_name", "VARCHAR", true),
    ("event_format", "VARCHAR", true),
    ("event_version", "VARCHAR", true),
    ("event_fingerprint", "VARCHAR", true),
    ("true_tstamp", "TIMESTAMP_NTZ", true),
    ("load_tstamp", "TIMESTAMP_NTZ", true),
];

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct SqlError {
    pub vendor_code: Option<i32>,
    pub message: String,
}

impl SqlError {
    pub fn new(vendor_code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            vendor_code,
            message: message.into(),
        }
    }
}

/// The warehouse JDBC transactor, out of scope beyond this single
/// `execute` primitive.
#[async_trait]
pub trait WarehouseExecutor: Send + Sync {
    async fn execute(&self, sql: String) -> Result<(), SqlError>;
}

#[derive(Debug, Error, Diagnostic)]
pub enum TableError {
    #[error("column name '{0}' matches neither unstruct_event_* nor contexts_*; this is a programming bug")]
    UnrecognisedColumnName(String),
}

fn column_type_for(name: &str) -> Result<&'static str, TableError> {
    if name.starts_with("unstruct_event_") {
        Ok("OBJECT")
    } else if name.starts_with("contexts_") {
        Ok("ARRAY")
    } else {
        Err(TableError::UnrecognisedColumnName(name.to_string()))
    }
}

/// Idempotent CREATE TABLE and ALTER TABLE ADD COLUMN against the warehouse
/// (component D). Both operations run under the unbounded setup-retry
/// policy: a broken connection here means the whole loader is useless.
pub struct TableManager {
    fqn: String,
    executor: Arc<dyn WarehouseExecutor>,
    retry: SetupRetryPolicy,
    health: Arc<Health>,
    alerter: Arc<dyn Alerter>,
}

impl TableManager {
    pub fn new(
        fqn: impl Into<String>,
        executor: Arc<dyn WarehouseExecutor>,
        retry: SetupRetryPolicy,
        health: Arc<Health>,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        Self {
            fqn: fqn.into(),
            executor,
            retry,
            health,
            alerter,
        }
    }

    pub async fn initialize(&self) {
        let columns = ATOMIC_COLUMNS
            .iter()
            .map(|(name, ty, nullable)| {
                format!(
                    "\x20\x20{name} {ty}{}",
                    if *nullable { "" } else { " NOT NULL" }
                )
            })
            .collect::<Vec<_>>()
            .join(",\n");

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{},\n\x20\x20CONSTRAINT event_id_pk PRIMARY KEY(event_id)\n)",
            self.fqn, columns
        );

        let executor = self.executor.clone();
        self.retry
            .run(&self.health, &self.alerter, move || {
                let executor = executor.clone();
                let sql = sql.clone();
                async move { executor.execute(sql).await }
            })
            .await;
    }

    pub async fn add_columns(&self, names: &[String]) -> Result<(), TableError> {
        let typed = names
            .iter()
            .map(|name| column_type_for(name).map(|ty| (name.clone(), ty)))
            .collect::<Result<Vec<_>, _>>()?;

        for (name, ty) in typed.into_iter().unique() {
            let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", self.fqn, name, ty);
            let executor = self.executor.clone();
            self.retry
                .run(&self.health, &self.alerter, move || {
                    let executor = executor.clone();
                    let sql = sql.clone();
                    async move {
                        match executor.execute(sql).await {
                            Ok(()) => Ok(()),
                            Err(e) if e.vendor_code == Some(COLUMN_ALREADY_EXISTS) => Ok(()),
                            Err(e) => Err(e),
                        }
                    }
                })
                .await;
        }

        Ok(())
    }
}
