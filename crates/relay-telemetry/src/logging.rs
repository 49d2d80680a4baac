use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS failures (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        fields TEXT,
        span_id TEXT,
        flow_id TEXT,
        request_id TEXT,
        error_kind TEXT
    );
    CREATE INDEX IF NOT EXISTS failures_by_flow ON failures(flow_id);
    CREATE INDEX IF NOT EXISTS failures_by_kind ON failures(error_kind);
";

const COLUMNS: &str =
    "id, timestamp, level, target, message, fields, span_id, flow_id, request_id, error_kind";

const DEFAULT_LIMIT: u32 = 100;

/// A persisted warn or error event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Remaining event fields as a JSON object.
    pub fields: Option<String>,
    pub span_id: Option<String>,
    pub flow_id: Option<String>,
    pub request_id: Option<String>,
    pub error_kind: Option<String>,
}

impl LogRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            level: row.get("level")?,
            target: row.get("target")?,
            message: row.get("message")?,
            fields: row.get("fields")?,
            span_id: row.get("span_id")?,
            flow_id: row.get("flow_id")?,
            request_id: row.get("request_id")?,
            error_kind: row.get("error_kind")?,
        })
    }
}

/// Filters for [`SqliteLogSink::query`]. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    /// Substring match on the event target.
    pub target: Option<String>,
    pub flow_id: Option<String>,
    pub error_kind: Option<String>,
    /// RFC 3339 lower bound, inclusive.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

impl LogQuery {
    fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut filter = Filter::default();
        filter.push("level =", self.level.as_ref().map(|l| l.to_uppercase()));
        filter.push("target LIKE", self.target.as_ref().map(|t| format!("%{t}%")));
        filter.push("flow_id =", self.flow_id.clone());
        filter.push("error_kind =", self.error_kind.clone());
        filter.push("timestamp >=", self.since.clone());

        let sql = format!(
            "SELECT {COLUMNS} FROM failures{} ORDER BY id DESC LIMIT {}",
            filter.where_clause(),
            self.limit.unwrap_or(DEFAULT_LIMIT)
        );
        (sql, filter.values)
    }
}

#[derive(Default)]
struct Filter {
    clauses: Vec<String>,
    values: Vec<SqlValue>,
}

impl Filter {
    fn push(&mut self, predicate: &str, value: Option<String>) {
        if let Some(value) = value {
            self.values.push(SqlValue::Text(value));
            self.clauses.push(format!("{predicate} ?{}", self.values.len()));
        }
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

/// Fields that correlate a failure with the request that caused it.
#[derive(Clone, Debug, Default)]
struct Correlation {
    flow_id: Option<String>,
    request_id: Option<String>,
}

impl Correlation {
    fn is_empty(&self) -> bool {
        self.flow_id.is_none() && self.request_id.is_none()
    }

    fn is_complete(&self) -> bool {
        self.flow_id.is_some() && self.request_id.is_some()
    }

    /// Fill gaps from an enclosing span; values already set win.
    fn inherit(&mut self, outer: &Correlation) {
        if self.flow_id.is_none() {
            self.flow_id.clone_from(&outer.flow_id);
        }
        if self.request_id.is_none() {
            self.request_id.clone_from(&outer.request_id);
        }
    }
}

/// An event ready to be written.
struct Failure {
    level: Level,
    target: String,
    message: String,
    fields: Map<String, Value>,
    span_id: Option<String>,
    correlation: Correlation,
    error_kind: Option<String>,
}

/// Append-only failure store backed by SQLite.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    /// Opens (creating if needed) the database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(dir) = db_path.parent() {
            // A missing directory surfaces as an open error below.
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn write(&self, failure: &Failure) -> rusqlite::Result<()> {
        let fields = (!failure.fields.is_empty())
            .then(|| Value::Object(failure.fields.clone()).to_string());
        self.conn.lock().execute(
            "INSERT INTO failures (timestamp, level, target, message, fields, span_id, flow_id, request_id, error_kind)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                Utc::now().to_rfc3339(),
                failure.level.as_str(),
                failure.target,
                failure.message,
                fields,
                failure.span_id,
                failure.correlation.flow_id,
                failure.correlation.request_id,
                failure.error_kind,
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let (sql, values) = q.to_sql();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values), LogRecord::from_row)?
            .collect();
        records
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM failures", [], |row| row.get(0))
    }
}

/// Persists warn and error events through a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

/// Collects every field as JSON; correlation keys are split out afterwards.
#[derive(Default)]
struct JsonFields(Map<String, Value>);

impl JsonFields {
    fn take_string(&mut self, key: &str) -> Option<String> {
        match self.0.remove(key)? {
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    fn take_correlation(&mut self) -> Correlation {
        Correlation {
            flow_id: self.take_string("flow_id"),
            request_id: self.take_string("request_id"),
        }
    }
}

impl Visit for JsonFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().into(), Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().into(), value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().into(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().into(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().into(), value.into());
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut fields = JsonFields::default();
        attrs.record(&mut fields);
        let correlation = fields.take_correlation();
        if correlation.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(correlation);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN {
            return;
        }

        let mut fields = JsonFields::default();
        event.record(&mut fields);
        let mut correlation = fields.take_correlation();
        let mut span_id = None;

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                span_id.get_or_insert_with(|| format!("{:?}", span.id()));
                if correlation.is_complete() {
                    break;
                }
                if let Some(outer) = span.extensions().get::<Correlation>() {
                    correlation.inherit(outer);
                }
            }
        }

        let failure = Failure {
            level: *meta.level(),
            target: meta.target().to_owned(),
            message: fields.take_string("message").unwrap_or_default(),
            error_kind: fields.take_string("error_kind"),
            fields: fields.0,
            span_id,
            correlation,
        };
        // Logging from inside a tracing layer would recurse.
        let _ = self.sink.write(&failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn temp_sink() -> (tempfile::TempDir, Arc<SqliteLogSink>) {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteLogSink::new(&dir.path().join("nested/logs.db")).unwrap();
        (dir, Arc::new(sink))
    }

    fn failure(level: Level, message: &str, flow: Option<&str>, kind: Option<&str>) -> Failure {
        Failure {
            level,
            target: "relay_server::relay".into(),
            message: message.into(),
            fields: Map::new(),
            span_id: None,
            correlation: Correlation {
                flow_id: flow.map(Into::into),
                request_id: None,
            },
            error_kind: kind.map(Into::into),
        }
    }

    #[test]
    fn query_by_error_kind() {
        let (_dir, sink) = temp_sink();
        sink.write(&failure(Level::WARN, "forward failed", None, Some("network_error"))).unwrap();
        sink.write(&failure(Level::WARN, "consent failed", None, Some("widget_access"))).unwrap();

        let results = sink
            .query(&LogQuery {
                error_kind: Some("widget_access".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "consent failed");
    }

    #[test]
    fn query_by_flow_and_limit() {
        let (_dir, sink) = temp_sink();
        for i in 0..5 {
            sink.write(&failure(Level::WARN, &format!("msg {i}"), Some("flow_a"), None)).unwrap();
        }
        sink.write(&failure(Level::ERROR, "other", Some("flow_b"), None)).unwrap();

        let results = sink
            .query(&LogQuery {
                flow_id: Some("flow_a".into()),
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].message, "msg 4");
        assert_eq!(sink.count().unwrap(), 6);
    }

    #[test]
    fn level_filter_is_case_insensitive() {
        let (_dir, sink) = temp_sink();
        sink.write(&failure(Level::ERROR, "boom", None, None)).unwrap();
        sink.write(&failure(Level::WARN, "meh", None, None)).unwrap();
        let results = sink
            .query(&LogQuery {
                level: Some("error".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].level, "ERROR");
    }

    #[test]
    fn unfiltered_query_has_no_where_clause() {
        let (sql, values) = LogQuery::default().to_sql();
        assert!(!sql.contains("WHERE"));
        assert!(sql.ends_with("LIMIT 100"));
        assert!(values.is_empty());
    }

    #[test]
    fn event_fields_override_span_correlation() {
        let mut inner = Correlation {
            flow_id: Some("event".into()),
            request_id: None,
        };
        inner.inherit(&Correlation {
            flow_id: Some("span".into()),
            request_id: Some("req-1".into()),
        });
        assert_eq!(inner.flow_id.as_deref(), Some("event"));
        assert_eq!(inner.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn layer_persists_warnings_with_span_context() {
        let (_dir, sink) = temp_sink();
        let subscriber =
            tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("event_flow", flow_id = "flow_123");
            let _enter = span.enter();
            tracing::info!("not persisted");
            tracing::warn!(error_kind = "status_error", status = 502u64, "transmission failed");
        });

        let results = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(results.len(), 1);
        let rec = &results[0];
        assert_eq!(rec.level, "WARN");
        assert_eq!(rec.message, "transmission failed");
        assert_eq!(rec.flow_id.as_deref(), Some("flow_123"));
        assert_eq!(rec.error_kind.as_deref(), Some("status_error"));
        assert!(rec.span_id.is_some());
        let fields: Value = serde_json::from_str(rec.fields.as_deref().unwrap()).unwrap();
        assert_eq!(fields["status"], 502);
        assert!(fields.get("error_kind").is_none());
    }
}
