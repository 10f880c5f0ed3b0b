use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// SQLite sink that persists warn+ logs.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 span_id TEXT,
                 subscriber_id TEXT,
                 policy_id INTEGER,
                 created_at TEXT NOT NULL DEFAULT (datetime('now'))
             );
             CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
             CREATE INDEX IF NOT EXISTS idx_logs_subscriber ON logs(subscriber_id);
             CREATE INDEX IF NOT EXISTS idx_logs_policy ON logs(policy_id);
             CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &LogInsert) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO logs
                 (timestamp, level, target, message, fields, span_id, subscriber_id, policy_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.span_id,
                record.subscriber_id,
                record.policy_id,
            ],
        );
    }
}

#[derive(Default)]
struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    span_id: Option<String>,
    subscriber_id: Option<String>,
    policy_id: Option<i64>,
}

/// tracing Layer that writes warn+ events to SQLite.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

/// Correlation ids carried by a span or event.
#[derive(Clone, Default)]
struct Correlation {
    subscriber_id: Option<String>,
    policy_id: Option<i64>,
}

impl Correlation {
    fn is_empty(&self) -> bool {
        self.subscriber_id.is_none() && self.policy_id.is_none()
    }

    fn fill_from(&mut self, other: &Correlation) {
        if self.subscriber_id.is_none() {
            self.subscriber_id.clone_from(&other.subscriber_id);
        }
        if self.policy_id.is_none() {
            self.policy_id = other.policy_id;
        }
    }
}

struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    correlation: Correlation,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            correlation: Correlation::default(),
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(val),
            "subscriber_id" => {
                self.correlation.subscriber_id = Some(val.trim_matches('"').to_string())
            }
            "policy_id" => self.correlation.policy_id = val.parse().ok(),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(val));
            }
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "subscriber_id" => self.correlation.subscriber_id = Some(value.to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "policy_id" {
            self.correlation.policy_id = Some(value);
            return;
        }
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "policy_id" {
            self.correlation.policy_id = i64::try_from(value).ok();
            return;
        }
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(inherited) = span.extensions().get::<Correlation>() {
                    visitor.correlation.fill_from(inherited);
                }
            }
        }

        let span_id = ctx
            .event_scope(event)
            .and_then(|mut scope| scope.next())
            .map(|span| format!("{:?}", span.id()));

        let fields_json = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        self.sink.insert(&LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: fields_json,
            span_id,
            subscriber_id: visitor.correlation.subscriber_id,
            policy_id: visitor.correlation.policy_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);

        if !visitor.correlation.is_empty() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(visitor.correlation);
            }
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        values.record(&mut visitor);
        if visitor.correlation.is_empty() {
            return;
        }

        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            match extensions.get_mut::<Correlation>() {
                Some(existing) => {
                    // Later values win over the ones given at span creation.
                    visitor.correlation.fill_from(existing);
                    *existing = visitor.correlation;
                }
                None => extensions.insert(visitor.correlation),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Debug)]
    struct Row {
        level: String,
        message: String,
        fields: Option<String>,
        span_id: Option<String>,
        subscriber_id: Option<String>,
        policy_id: Option<i64>,
    }

    fn temp_db() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("policyd-test-logs-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("test-logs.db")
    }

    fn rows(sink: &SqliteLogSink) -> Vec<Row> {
        let conn = sink.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT level, message, fields, span_id, subscriber_id, policy_id
                 FROM logs ORDER BY id",
            )
            .unwrap();
        let rows = stmt.query_map([], |row| {
            Ok(Row {
                level: row.get(0)?,
                message: row.get(1)?,
                fields: row.get(2)?,
                span_id: row.get(3)?,
                subscriber_id: row.get(4)?,
                policy_id: row.get(5)?,
            })
        })
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
        rows
    }

    fn with_layer(f: impl FnOnce()) -> Vec<Row> {
        let sink = Arc::new(SqliteLogSink::new(&temp_db()).unwrap());
        let subscriber =
            tracing_subscriber::registry().with(SqliteLogLayer::new(Arc::clone(&sink)));
        tracing::subscriber::with_default(subscriber, f);
        rows(&sink)
    }

    #[test]
    fn sink_insert_round_trips_columns() {
        let sink = SqliteLogSink::new(&temp_db()).unwrap();
        sink.insert(&LogInsert {
            timestamp: "2026-02-14T12:00:00Z".into(),
            level: "WARN".into(),
            target: "policy_server::registry".into(),
            message: "subscriber pruned".into(),
            fields: Some(r#"{"reason":"closed"}"#.into()),
            subscriber_id: Some("sub_123".into()),
            ..Default::default()
        });

        let rows = rows(&sink);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "subscriber pruned");
        assert_eq!(rows[0].subscriber_id.as_deref(), Some("sub_123"));
        assert_eq!(rows[0].policy_id, None);
    }

    #[test]
    fn sink_creates_missing_parent_dir() {
        let path = temp_db().with_file_name("nested").join("logs.db");
        SqliteLogSink::new(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn layer_persists_warn_events_only() {
        let rows = with_layer(|| {
            tracing::info!("not persisted");
            tracing::debug!("not persisted either");
            tracing::warn!(policy_id = 5i64, reason = "closed", "delivery failed");
        });

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].level, "WARN");
        assert_eq!(rows[0].message, "delivery failed");
        assert_eq!(rows[0].policy_id, Some(5));
        assert!(rows[0].fields.as_deref().unwrap_or_default().contains("closed"));
    }

    #[test]
    fn layer_inherits_subscriber_id_from_span() {
        let rows = with_layer(|| {
            let span = tracing::info_span!("session", subscriber_id = "sub_xyz");
            let _guard = span.enter();
            tracing::error!("socket write failed");
        });

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subscriber_id.as_deref(), Some("sub_xyz"));
        assert!(rows[0].span_id.is_some());
    }

    #[test]
    fn layer_picks_up_ids_recorded_after_span_creation() {
        let rows = with_layer(|| {
            let span = tracing::info_span!(
                "run_session",
                subscriber_id = tracing::field::Empty,
                policy_id = 3i64
            );
            span.record("subscriber_id", "sub_late");
            let _guard = span.enter();
            tracing::warn!("could not send policy snapshot");
        });

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subscriber_id.as_deref(), Some("sub_late"));
        assert_eq!(rows[0].policy_id, Some(3));
    }

    #[test]
    fn event_fields_override_span_ids() {
        let rows = with_layer(|| {
            let span = tracing::info_span!("request", policy_id = 1i64);
            let _guard = span.enter();
            tracing::warn!(policy_id = 2i64, "update failed");
        });

        assert_eq!(rows[0].policy_id, Some(2));
    }
}
