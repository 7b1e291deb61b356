//! Tracking tables on the warehouse
//!
//! `LOG` holds one row per applied bundle, `LOG_DETAIL` one row per item.

use super::statements::*;
use crate::error::{AppError, AppResult};
use crate::models::{LogEntry, LogItemEntry, TrackingLog};
use crate::target::rendering::{make_string_database_safe, render_template, segment_statements, sql_literal, RenderValues};
use crate::target::session::{Row, Session};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::debug;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Clone)]
pub struct TrackingStore {
    database: String,
    schema: String,
}

fn timestamp_literal(at: &DateTime<Utc>) -> String {
    sql_literal(&at.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
}

fn bool_literal(value: bool) -> String {
    if value { "TRUE" } else { "FALSE" }.to_string()
}

fn text_literal(text: &str) -> String {
    sql_literal(&make_string_database_safe(text))
}

/// Parse a timestamp column as returned by the simple-query protocol
pub fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| AppError::ResultShape(format!("unrecognized timestamp {}", raw)))
}

impl TrackingStore {
    pub fn new(database: &str, schema: &str) -> Self {
        Self {
            database: database.to_string(),
            schema: schema.to_string(),
        }
    }

    fn values(&self) -> RenderValues {
        RenderValues::from([
            ("DATABASE".to_string(), JsonValue::String(self.database.clone())),
            ("TRACKING_SCHEMA".to_string(), JsonValue::String(self.schema.clone())),
        ])
    }

    fn render(&self, template: &str, extra: Vec<(&str, JsonValue)>) -> AppResult<String> {
        let mut values = self.values();
        for (key, value) in extra {
            values.insert(key.to_string(), value);
        }
        render_template(template, &values)
    }

    pub async fn ensure_tables(&self, session: &dyn Session) -> AppResult<()> {
        for statement in segment_statements(&self.render(TRACKING_PREPARE, Vec::new())?) {
            session.execute(&statement).await?;
        }
        Ok(())
    }

    /// Up to `depth` most recent entries (all when zero), oldest first
    pub async fn history(&self, session: &dyn Session, depth: usize) -> AppResult<TrackingLog> {
        let query = self.render(TRACKING_HISTORY, vec![("LIMIT", JsonValue::from(depth))])?;
        let rows = session.query(&query).await?;

        let mut log = TrackingLog::new();
        // Newest first on the wire.
        for row in rows.iter().rev() {
            log.add(log_entry(row)?);
        }
        debug!("Loaded {} tracking entries", log.len());
        Ok(log)
    }

    pub async fn detail(&self, session: &dyn Session, tracking_id: &str) -> AppResult<Vec<LogItemEntry>> {
        let query = self.render(
            TRACKING_DETAIL,
            vec![("TRACKING_ID", JsonValue::String(sql_literal(tracking_id)))],
        )?;
        let rows = session.query(&query).await?;
        rows.iter().map(log_item_entry).collect()
    }

    pub async fn persist_entry(&self, session: &dyn Session, entry: &LogEntry) -> AppResult<()> {
        let statement = self.render(
            INSERT_TRACKING_INFO,
            vec![
                ("TRACKING_ID", JsonValue::String(sql_literal(&entry.tracking_id))),
                ("MESSAGE", JsonValue::String(text_literal(&entry.message))),
                ("START_TIME", JsonValue::String(timestamp_literal(&entry.start))),
                ("END_TIME", JsonValue::String(timestamp_literal(&entry.end))),
                ("APPLIED_BY", JsonValue::String(text_literal(&entry.applied_by))),
                ("TOTAL", JsonValue::from(entry.total)),
                ("SUCCESS", JsonValue::from(entry.success)),
                ("FAILED", JsonValue::from(entry.failed)),
                ("COMPLETED", JsonValue::String(bool_literal(entry.completed))),
                ("FAST_FORWARD", JsonValue::String(bool_literal(entry.fast_forward))),
            ],
        )?;
        session.execute(&statement).await
    }

    pub async fn persist_detail(&self, session: &dyn Session, detail: &LogItemEntry) -> AppResult<()> {
        let statement = self.render(
            INSERT_TRACKING_DETAIL,
            vec![
                ("TRACKING_ID", JsonValue::String(sql_literal(&detail.tracking_id))),
                ("FILE", JsonValue::String(text_literal(&detail.file))),
                ("OBJECT_TYPE", JsonValue::String(sql_literal(&detail.object_type))),
                ("OBJECT_NAME", JsonValue::String(text_literal(&detail.object_name))),
                ("IDENTIFIER_HASH", JsonValue::String(sql_literal(&detail.identifier_hash))),
                ("GIT_HASH", JsonValue::String(sql_literal(&detail.git_hash))),
                ("EXECUTED", JsonValue::String(bool_literal(detail.executed))),
                ("SUCCESS", JsonValue::String(bool_literal(detail.success))),
                ("PARTIAL", JsonValue::String(bool_literal(detail.partial))),
                ("MESSAGE", JsonValue::String(text_literal(&detail.message))),
                ("LOGGED_AT", JsonValue::String(timestamp_literal(&detail.logged_at))),
            ],
        )?;
        session.execute(&statement).await
    }
}

fn log_entry(row: &Row) -> AppResult<LogEntry> {
    Ok(LogEntry {
        tracking_id: row.text(0)?.to_string(),
        message: row.get(1).unwrap_or_default().to_string(),
        start: parse_timestamp(row.text(2)?)?,
        end: parse_timestamp(row.text(3)?)?,
        applied_by: row.get(4).unwrap_or_default().to_string(),
        total: row.parse(5)?,
        success: row.parse(6)?,
        failed: row.parse(7)?,
        completed: row.flag(8)?,
        fast_forward: row.flag(9)?,
    })
}

fn log_item_entry(row: &Row) -> AppResult<LogItemEntry> {
    Ok(LogItemEntry {
        tracking_id: row.text(0)?.to_string(),
        file: row.get(1).unwrap_or_default().to_string(),
        object_type: row.get(2).unwrap_or_default().to_string(),
        object_name: row.get(3).unwrap_or_default().to_string(),
        identifier_hash: row.get(4).unwrap_or_default().to_string(),
        git_hash: row.get(5).unwrap_or_default().to_string(),
        executed: row.flag(6)?,
        success: row.flag(7)?,
        partial: row.flag(8)?,
        message: row.get(9).unwrap_or_default().to_string(),
        logged_at: parse_timestamp(row.text(10)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::session::testing::RecordingSession;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    fn store() -> TrackingStore {
        TrackingStore::new("MGMT", "CHANGE_TRACKING")
    }

    fn history_row<'a>(id: &'a str, end: &'a str) -> Vec<Option<&'a str>> {
        vec![
            Some(id),
            Some("msg"),
            Some("2026-01-01 00:00:00"),
            Some(end),
            Some("deployer"),
            Some("3"),
            Some("2"),
            Some("1"),
            Some("true"),
            Some("f"),
        ]
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_timestamp("2026-03-04 05:06:07").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-03-04 05:06:07.000").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-03-04T05:06:07Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-03-04 05:06:07+00").unwrap(), expected);
        assert_err!(parse_timestamp("yesterday"));
    }

    #[tokio::test]
    async fn test_history_is_oldest_first() {
        let session = RecordingSession::default().respond(
            "CHANGE_TRACKING.LOG",
            vec![
                history_row("c3", "2026-01-03 00:00:00"),
                history_row("c2", "2026-01-02 00:00:00"),
            ],
        );

        let log = store().history(&session, 10).await.unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log.last_processed().unwrap().tracking_id, "c3");
        assert_eq!(log.entries()[0].total, 3);
        assert!(log.entries()[0].completed);
        assert!(!log.entries()[0].fast_forward);
        assert!(session.queries()[0].contains("LIMIT 10"));
    }

    #[tokio::test]
    async fn test_unbounded_history_has_no_limit() {
        let session = RecordingSession::default();
        let log = store().history(&session, 0).await.unwrap();
        assert!(log.is_empty());
        assert!(!session.queries()[0].contains("LIMIT"));
    }

    #[tokio::test]
    async fn test_persist_entry_sanitizes_message() {
        let session = RecordingSession::default();
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let entry = LogEntry {
            tracking_id: "abc".into(),
            message: "it's done; DROP TABLE x".into(),
            start: at,
            end: at,
            applied_by: "deployer".into(),
            total: 2,
            success: 1,
            failed: 1,
            completed: false,
            fast_forward: false,
        };

        assert_ok!(store().persist_entry(&session, &entry).await);

        let statement = &session.executed()[0];
        assert!(statement.contains("INSERT INTO MGMT.CHANGE_TRACKING.LOG"));
        assert!(statement.contains("'it s done  DROP TABLE x'"));
        assert!(statement.contains("'2026-03-04 05:06:07.000'"));
        assert!(statement.contains("2, 1, 1, FALSE, FALSE"));
    }

    #[tokio::test]
    async fn test_entries_with_equal_timestamps_are_sequenced() {
        let session = RecordingSession::default().respond(
            "CHANGE_TRACKING.LOG",
            vec![history_row("c3", "2026-01-01 00:00:00")],
        );
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for id in ["c1", "c2", "c3"] {
            let entry = LogEntry {
                tracking_id: id.into(),
                message: "same run".into(),
                start: at,
                end: at,
                applied_by: "deployer".into(),
                total: 1,
                success: 1,
                failed: 0,
                completed: true,
                fast_forward: false,
            };
            assert_ok!(store().persist_entry(&session, &entry).await);
        }

        let executed = session.executed();
        assert_eq!(executed.len(), 3);
        for (statement, id) in executed.iter().zip(["'c1'", "'c2'", "'c3'"]) {
            assert!(statement.contains(id));
            assert!(statement.contains("COALESCE(MAX(SEQUENCE), 0) + 1"));
        }

        let log = store().history(&session, 1).await.unwrap();
        assert_eq!(log.last_processed().unwrap().tracking_id, "c3");
        let query = &session.queries()[0];
        assert!(query.contains("ORDER BY SEQUENCE DESC"));
        assert!(query.contains("LIMIT 1"));
    }

    #[tokio::test]
    async fn test_ensure_tables_runs_each_statement() {
        let session = RecordingSession::default();
        assert_ok!(store().ensure_tables(&session).await);
        let executed = session.executed();
        assert_eq!(executed.len(), 4);
        assert_eq!(executed[0], "CREATE SCHEMA IF NOT EXISTS MGMT.CHANGE_TRACKING");
        assert_eq!(
            executed[2],
            "ALTER TABLE MGMT.CHANGE_TRACKING.LOG ADD COLUMN IF NOT EXISTS SEQUENCE BIGINT"
        );
    }
}
