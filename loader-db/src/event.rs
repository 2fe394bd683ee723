use crate::channel::{ColumnValue, Row};
use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// Column order of the fixed, tab-separated analytics schema. This is a
/// representative core subset of the full ~130-column atomic schema; every
/// column not modelled here is out of scope for this crate (it passes
/// through the warehouse layer unchanged) but the parsing/casting mechanism
/// below generalises to the rest without further changes.
const ATOMIC_FIELDS: &[&str] = &[
    "app_id",
    "platform",
    "etl_tstamp",
    "collector_tstamp",
    "dvce_created_tstamp",
    "event",
    "event_id",
    "txn_id",
    "name_tracker",
    "v_tracker",
    "v_collector",
    "v_etl",
    "user_id",
    "user_ipaddress",
    "user_fingerprint",
    "domain_userid",
    "domain_sessionidx",
    "network_userid",
    "geo_country",
    "geo_region",
    "geo_city",
    "geo_zipcode",
    "geo_latitude",
    "geo_longitude",
    "page_url",
    "page_title",
    "page_referrer",
    "mkt_medium",
    "mkt_source",
    "mkt_campaign",
    "se_category",
    "se_action",
    "se_label",
    "se_value",
    "tr_orderid",
    "tr_total",
    "ti_sku",
    "ti_price",
    "useragent",
    "br_name",
    "os_name",
    "dvce_type",
    "dvce_ismobile",
    "doc_charset",
    "domain_sessionid",
    "derived_tstamp",
    "event_vendor",
    "event_name",
    "event_format",
    "event_version",
    "event_fingerprint",
    "true_tstamp",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub app_id: Option<String>,
    pub platform: Option<String>,
    pub etl_tstamp: Option<DateTime<Utc>>,
    pub collector_tstamp: DateTime<Utc>,
    pub dvce_created_tstamp: Option<DateTime<Utc>>,
    pub event: Option<String>,
    pub event_id: String,
    pub txn_id: Option<i32>,
    pub name_tracker: Option<String>,
    pub v_tracker: Option<String>,
    pub v_collector: String,
    pub v_etl: String,
    pub user_id: Option<String>,
    pub user_ipaddress: Option<String>,
    pub user_fingerprint: Option<String>,
    pub domain_userid: Option<String>,
    pub domain_sessionidx: Option<i32>,
    pub network_userid: Option<String>,
    pub geo_country: Option<String>,
    pub geo_region: Option<String>,
    pub geo_city: Option<String>,
    pub geo_zipcode: Option<String>,
    pub geo_latitude: Option<f64>,
    pub geo_longitude: Option<f64>,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub page_referrer: Option<String>,
    pub mkt_medium: Option<String>,
    pub mkt_source: Option<String>,
    pub mkt_campaign: Option<String>,
    pub se_category: Option<String>,
    pub se_action: Option<String>,
    pub se_label: Option<String>,
    pub se_value: Option<f64>,
    pub tr_orderid: Option<String>,
    pub tr_total: Option<f64>,
    pub ti_sku: Option<String>,
    pub ti_price: Option<f64>,
    pub useragent: Option<String>,
    pub br_name: Option<String>,
    pub os_name: Option<String>,
    pub dvce_type: Option<String>,
    pub dvce_ismobile: Option<bool>,
    pub doc_charset: Option<String>,
    pub domain_sessionid: Option<String>,
    pub derived_tstamp: Option<DateTime<Utc>>,
    pub event_vendor: Option<String>,
    pub event_name: Option<String>,
    pub event_format: Option<String>,
    pub event_version: Option<String>,
    pub event_fingerprint: Option<String>,
    pub true_tstamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum TsvParseError {
    #[error("expected {expected} tab-separated fields, found {found}")]
    WrongFieldCount { expected: usize, found: usize },

    #[error("field '{field}' is required but was empty")]
    MissingRequiredField { field: &'static str },

    #[error("field '{field}' could not be parsed as a timestamp: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("field '{field}' could not be parsed as an integer: {value:?}")]
    InvalidInteger { field: &'static str, value: String },

    #[error("field '{field}' could not be parsed as a float: {value:?}")]
    InvalidFloat { field: &'static str, value: String },

    #[error("field '{field}' could not be parsed as a boolean: {value:?}")]
    InvalidBoolean { field: &'static str, value: String },
}

struct Cols<'a>(Vec<&'a str>);

impl<'a> Cols<'a> {
    fn get(&self, idx: usize) -> &'a str {
        self.0[idx]
    }

    fn opt_str(&self, idx: usize) -> Option<String> {
        let s = self.get(idx);
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    }

    fn opt_i32(&self, idx: usize, field: &'static str) -> Result<Option<i32>, TsvParseError> {
        let s = self.get(idx);
        if s.is_empty() {
            return Ok(None);
        }
        s.parse::<i32>()
            .map(Some)
            .map_err(|_| TsvParseError::InvalidInteger {
                field,
                value: s.to_string(),
            })
    }

    fn opt_f64(&self, idx: usize, field: &'static str) -> Result<Option<f64>, TsvParseError> {
        let s = self.get(idx);
        if s.is_empty() {
            return Ok(None);
        }
        s.parse::<f64>()
            .map(Some)
            .map_err(|_| TsvParseError::InvalidFloat {
                field,
                value: s.to_string(),
            })
    }

    fn opt_bool(&self, idx: usize, field: &'static str) -> Result<Option<bool>, TsvParseError> {
        let s = self.get(idx);
        match s {
            "" => Ok(None),
            "1" | "true" => Ok(Some(true)),
            "0" | "false" => Ok(Some(false)),
            _ => Err(TsvParseError::InvalidBoolean {
                field,
                value: s.to_string(),
            }),
        }
    }

    fn opt_timestamp(
        &self,
        idx: usize,
        field: &'static str,
    ) -> Result<Option<DateTime<Utc>>, TsvParseError> {
        let s = self.get(idx);
        if s.is_empty() {
            return Ok(None);
        }
        parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| TsvParseError::InvalidTimestamp {
                field,
                value: s.to_string(),
            })
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parses one tab-separated enriched-event record.
pub fn parse_tsv(line: &str) -> Result<Event, TsvParseError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != ATOMIC_FIELDS.len() {
        return Err(TsvParseError::WrongFieldCount {
            expected: ATOMIC_FIELDS.len(),
            found: fields.len(),
        });
    }
    let cols = Cols(fields);

    let event_id = cols.get(6);
    if event_id.is_empty() {
        return Err(TsvParseError::MissingRequiredField { field: "event_id" });
    }

    let collector_tstamp = cols
        .opt_timestamp(3, "collector_tstamp")?
        .ok_or(TsvParseError::MissingRequiredField {
            field: "collector_tstamp",
        })?;

    let v_collector = cols.get(10);
    if v_collector.is_empty() {
        return Err(TsvParseError::MissingRequiredField { field: "v_collector" });
    }

    let v_etl = cols.get(11);
    if v_etl.is_empty() {
        return Err(TsvParseError::MissingRequiredField { field: "v_etl" });
    }

    Ok(Event {
        app_id: cols.opt_str(0),
        platform: cols.opt_str(1),
        etl_tstamp: cols.opt_timestamp(2, "etl_tstamp")?,
        collector_tstamp,
        dvce_created_tstamp: cols.opt_timestamp(4, "dvce_created_tstamp")?,
        event: cols.opt_str(5),
        event_id: event_id.to_string(),
        txn_id: cols.opt_i32(7, "txn_id")?,
        name_tracker: cols.opt_str(8),
        v_tracker: cols.opt_str(9),
        v_collector: v_collector.to_string(),
        v_etl: v_etl.to_string(),
        user_id: cols.opt_str(12),
        user_ipaddress: cols.opt_str(13),
        user_fingerprint: cols.opt_str(14),
        domain_userid: cols.opt_str(15),
        domain_sessionidx: cols.opt_i32(16, "domain_sessionidx")?,
        network_userid: cols.opt_str(17),
        geo_country: cols.opt_str(18),
        geo_region: cols.opt_str(19),
        geo_city: cols.opt_str(20),
        geo_zipcode: cols.opt_str(21),
        geo_latitude: cols.opt_f64(22, "geo_latitude")?,
        geo_longitude: cols.opt_f64(23, "geo_longitude")?,
        page_url: cols.opt_str(24),
        page_title: cols.opt_str(25),
        page_referrer: cols.opt_str(26),
        mkt_medium: cols.opt_str(27),
        mkt_source: cols.opt_str(28),
        mkt_campaign: cols.opt_str(29),
        se_category: cols.opt_str(30),
        se_action: cols.opt_str(31),
        se_label: cols.opt_str(32),
        se_value: cols.opt_f64(33, "se_value")?,
        tr_orderid: cols.opt_str(34),
        tr_total: cols.opt_f64(35, "tr_total")?,
        ti_sku: cols.opt_str(36),
        ti_price: cols.opt_f64(37, "ti_price")?,
        useragent: cols.opt_str(38),
        br_name: cols.opt_str(39),
        os_name: cols.opt_str(40),
        dvce_type: cols.opt_str(41),
        dvce_ismobile: cols.opt_bool(42, "dvce_ismobile")?,
        doc_charset: cols.opt_str(43),
        domain_sessionid: cols.opt_str(44),
        derived_tstamp: cols.opt_timestamp(45, "derived_tstamp")?,
        event_vendor: cols.opt_str(46),
        event_name: cols.opt_str(47),
        event_format: cols.opt_str(48),
        event_version: cols.opt_str(49),
        event_fingerprint: cols.opt_str(50),
        true_tstamp: cols.opt_timestamp(51, "true_tstamp")?,
    })
}

/// Serialises an `Event` back into the same tab-separated layout `parse_tsv`
/// accepts, preserving the round-trip property (parse-then-serialise is the identity).
pub fn to_tsv(event: &Event) -> String {
    fn opt(s: &Option<String>) -> String {
        s.clone().unwrap_or_default()
    }
    fn opt_i32(v: Option<i32>) -> String {
        v.map(|n| n.to_string()).unwrap_or_default()
    }
    fn opt_f64(v: Option<f64>) -> String {
        v.map(|n| n.to_string()).unwrap_or_default()
    }
    fn opt_bool(v: Option<bool>) -> String {
        v.map(|b| if b { "1".to_string() } else { "0".to_string() })
            .unwrap_or_default()
    }
    fn opt_ts(v: Option<DateTime<Utc>>) -> String {
        v.map(|dt| dt.to_rfc3339()).unwrap_or_default()
    }

    let fields: Vec<String> = vec![
        opt(&event.app_id),
        opt(&event.platform),
        opt_ts(event.etl_tstamp),
        event.collector_tstamp.to_rfc3339(),
        opt_ts(event.dvce_created_tstamp),
        opt(&event.event),
        event.event_id.clone(),
        opt_i32(event.txn_id),
        opt(&event.name_tracker),
        opt(&event.v_tracker),
        event.v_collector.clone(),
        event.v_etl.clone(),
        opt(&event.user_id),
        opt(&event.user_ipaddress),
        opt(&event.user_fingerprint),
        opt(&event.domain_userid),
        opt_i32(event.domain_sessionidx),
        opt(&event.network_userid),
        opt(&event.geo_country),
        opt(&event.geo_region),
        opt(&event.geo_city),
        opt(&event.geo_zipcode),
        opt_f64(event.geo_latitude),
        opt_f64(event.geo_longitude),
        opt(&event.page_url),
        opt(&event.page_title),
        opt(&event.page_referrer),
        opt(&event.mkt_medium),
        opt(&event.mkt_source),
        opt(&event.mkt_campaign),
        opt(&event.se_category),
        opt(&event.se_action),
        opt(&event.se_label),
        opt_f64(event.se_value),
        opt(&event.tr_orderid),
        opt_f64(event.tr_total),
        opt(&event.ti_sku),
        opt_f64(event.ti_price),
        opt(&event.useragent),
        opt(&event.br_name),
        opt(&event.os_name),
        opt(&event.dvce_type),
        opt_bool(event.dvce_ismobile),
        opt(&event.doc_charset),
        opt(&event.domain_sessionid),
        opt_ts(event.derived_tstamp),
        opt(&event.event_vendor),
        opt(&event.event_name),
        opt(&event.event_format),
        opt(&event.event_version),
        opt(&event.event_fingerprint),
        opt_ts(event.true_tstamp),
    ];

    fields.join("\t")
}

/// Casts the fixed atomic columns to their warehouse-native column values,
/// the caster half of component H's "invokes the external transform
/// collaborator with the Event and a caster for warehouse-native column
/// types" responsibility. The entity columns the external transformer
/// resolves (`unstruct_event_*`/`contexts_*`) are merged on top of this by
/// the caller; nothing here collides with those names.
pub fn to_row(event: &Event) -> Row {
    fn opt(s: &Option<String>) -> ColumnValue {
        s.clone().map(ColumnValue::String).unwrap_or(ColumnValue::Null)
    }
    fn opt_i32(v: Option<i32>) -> ColumnValue {
        v.map(|n| ColumnValue::Integer(n as i64)).unwrap_or(ColumnValue::Null)
    }
    fn opt_f64(v: Option<f64>) -> ColumnValue {
        v.map(ColumnValue::Float).unwrap_or(ColumnValue::Null)
    }
    fn opt_bool(v: Option<bool>) -> ColumnValue {
        v.map(ColumnValue::Boolean).unwrap_or(ColumnValue::Null)
    }
    fn opt_ts(v: Option<DateTime<Utc>>) -> ColumnValue {
        v.map(ColumnValue::Timestamp).unwrap_or(ColumnValue::Null)
    }

    let mut row = Row::new();
    row.insert("app_id".to_string(), opt(&event.app_id));
    row.insert("platform".to_string(), opt(&event.platform));
    row.insert("etl_tstamp".to_string(), opt_ts(event.etl_tstamp));
    row.insert(
        "collector_tstamp".to_string(),
        ColumnValue::Timestamp(event.collector_tstamp),
    );
    row.insert(
        "dvce_created_tstamp".to_string(),
        opt_ts(event.dvce_created_tstamp),
    );
    row.insert("event".to_string(), opt(&event.event));
    row.insert(
        "event_id".to_string(),
        ColumnValue::String(event.event_id.clone()),
    );
    row.insert("txn_id".to_string(), opt_i32(event.txn_id));
    row.insert("name_tracker".to_string(), opt(&event.name_tracker));
    row.insert("v_tracker".to_string(), opt(&event.v_tracker));
    row.insert(
        "v_collector".to_string(),
        ColumnValue::String(event.v_collector.clone()),
    );
    row.insert(
        "v_etl".to_string(),
        ColumnValue::String(event.v_etl.clone()),
    );
    row.insert("user_id".to_string(), opt(&event.user_id));
    row.insert("user_ipaddress".to_string(), opt(&event.user_ipaddress));
    row.insert("user_fingerprint".to_string(), opt(&event.user_fingerprint));
    row.insert("domain_userid".to_string(), opt(&event.domain_userid));
    row.insert(
        "domain_sessionidx".to_string(),
        opt_i32(event.domain_sessionidx),
    );
    row.insert("network_userid".to_string(), opt(&event.network_userid));
    row.insert("geo_country".to_string(), opt(&event.geo_country));
    row.insert("geo_region".to_string(), opt(&event.geo_region));
    row.insert("geo_city".to_string(), opt(&event.geo_city));
    row.insert("geo_zipcode".to_string(), opt(&event.geo_zipcode));
    row.insert("geo_latitude".to_string(), opt_f64(event.geo_latitude));
    row.insert("geo_longitude".to_string(), opt_f64(event.geo_longitude));
    row.insert("page_url".to_string(), opt(&event.page_url));
    row.insert("page_title".to_string(), opt(&event.page_title));
    row.insert("page_referrer".to_string(), opt(&event.page_referrer));
    row.insert("mkt_medium".to_string(), opt(&event.mkt_medium));
    row.insert("mkt_source".to_string(), opt(&event.mkt_source));
    row.insert("mkt_campaign".to_string(), opt(&event.mkt_campaign));
    row.insert("se_category".to_string(), opt(&event.se_category));
    row.insert("se_action".to_string(), opt(&event.se_action));
    row.insert("se_label".to_string(), opt(&event.se_label));
    row.insert("se_value".to_string(), opt_f64(event.se_value));
    row.insert("tr_orderid".to_string(), opt(&event.tr_orderid));
    row.insert("tr_total".to_string(), opt_f64(event.tr_total));
    row.insert("ti_sku".to_string(), opt(&event.ti_sku));
    row.insert("ti_price".to_string(), opt_f64(event.ti_price));
    row.insert("useragent".to_string(), opt(&event.useragent));
    row.insert("br_name".to_string(), opt(&event.br_name));
    row.insert("os_name".to_string(), opt(&event.os_name));
    row.insert("dvce_type".to_string(), opt(&event.dvce_type));
    row.insert("dvce_ismobile".to_string(), opt_bool(event.dvce_ismobile));
    row.insert("doc_charset".to_string(), opt(&event.doc_charset));
    row.insert("domain_sessionid".to_string(), opt(&event.domain_sessionid));
    row.insert("derived_tstamp".to_string(), opt_ts(event.derived_tstamp));
    row.insert("event_vendor".to_string(), opt(&event.event_vendor));
    row.insert("event_name".to_string(), opt(&event.event_name));
    row.insert("event_format".to_string(), opt(&event.event_format));
    row.insert("event_version".to_string(), opt(&event.event_version));
    row.insert(
        "event_fingerprint".to_string(),
        opt(&event.event_fingerprint),
    );
    row.insert("true_tstamp".to_string(), opt_ts(event.true_tstamp));
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_line() -> String {
        let mut fields = vec![""; ATOMIC_FIELDS.len()];
        fields[3] = "2024-01-01T00:00:00Z"; // collector_tstamp
        fields[6] = "11111111-1111-1111-1111-111111111111"; // event_id
        fields[10] = "ssc-2.1.0"; // v_collector
        fields[11] = "ssc-3.2.0"; // v_etl
        fields[0] = "my-app";
        fields[42] = "1"; // dvce_ismobile
        fields.join("\t")
    }

    #[test]
    fn parses_minimal_row() {
        let event = parse_tsv(&sample_line()).unwrap();
        assert_eq!(event.event_id, "11111111-1111-1111-1111-111111111111");
        assert_eq!(event.app_id.as_deref(), Some("my-app"));
        assert_eq!(event.dvce_ismobile, Some(true));
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = parse_tsv("a\tb\tc").unwrap_err();
        assert!(matches!(err, TsvParseError::WrongFieldCount { .. }));
    }

    #[test]
    fn rejects_missing_event_id() {
        let mut fields = vec![""; ATOMIC_FIELDS.len()];
        fields[3] = "2024-01-01T00:00:00Z";
        fields[10] = "ssc-2.1.0";
        fields[11] = "ssc-3.2.0";
        let err = parse_tsv(&fields.join("\t")).unwrap_err();
        assert!(matches!(
            err,
            TsvParseError::MissingRequiredField { field: "event_id" }
        ));
    }

    #[test]
    fn round_trips_through_tsv() {
        let original = parse_tsv(&sample_line()).unwrap();
        let serialised = to_tsv(&original);
        let reparsed = parse_tsv(&serialised).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn to_row_casts_every_fixed_column() {
        let event = parse_tsv(&sample_line()).unwrap();
        let row = to_row(&event);

        assert_eq!(row.len(), ATOMIC_FIELDS.len());
        assert!(matches!(row.get("event_id"), Some(ColumnValue::String(s)) if s == &event.event_id));
        assert!(matches!(row.get("dvce_ismobile"), Some(ColumnValue::Boolean(true))));
        assert!(matches!(
            row.get("collector_tstamp"),
            Some(ColumnValue::Timestamp(_))
        ));
        assert!(matches!(row.get("geo_latitude"), Some(ColumnValue::Null)));
    }
}
