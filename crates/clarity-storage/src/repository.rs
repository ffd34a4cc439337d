//! Repository implementations for SQLite-backed persistence.
//!
//! TraceRepository is the ledger of captured frames; SummaryRepository,
//! DailySummaryRepository and ApiRequestRepository hold what the summary
//! pipeline produces. All timestamps are stored as UTC unix seconds.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};

use clarity_core::error::ClarityError;
use clarity_core::types::{
    ApiRequestLog, DailySummary, NewApiRequest, ScreenshotTrace, Summary, TimeWindow, TokenUsage,
};

use crate::db::Database;

/// Convert stored unix seconds back to a UTC timestamp.
pub(crate) fn from_unix(secs: i64) -> Result<DateTime<Utc>, ClarityError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| ClarityError::Storage(format!("Invalid timestamp: {}", secs)))
}

/// Build a `WHERE` fragment for an optional half-open range on `column`.
fn range_clause(
    column: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> (String, Vec<i64>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();
    if let Some(start) = start {
        values.push(start.timestamp());
        conditions.push(format!("{} >= ?{}", column, values.len()));
    }
    if let Some(end) = end {
        values.push(end.timestamp());
        conditions.push(format!("{} < ?{}", column, values.len()));
    }
    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (clause, values)
}

/// `LIMIT` fragment; SQLite treats a negative limit as unbounded.
fn limit_value(limit: Option<u64>) -> i64 {
    limit.map(|l| l.min(i64::MAX as u64) as i64).unwrap_or(-1)
}

// =============================================================================
// Screenshot traces
// =============================================================================

/// Append-only ledger of captured screenshots.
pub struct TraceRepository {
    db: Arc<Database>,
}

impl TraceRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record a persisted frame and return its id.
    pub fn append(
        &self,
        timestamp: DateTime<Utc>,
        file_path: &str,
        width: u32,
        height: u32,
        file_size: u64,
    ) -> Result<i64, ClarityError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO screenshot_traces (timestamp, file_path, width, height, file_size)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    timestamp.timestamp(),
                    file_path,
                    width,
                    height,
                    file_size as i64
                ],
            )
            .map_err(|e| ClarityError::Storage(format!("Failed to save trace: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Traces with `start <= timestamp < end`, oldest first.
    pub fn query(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<u64>,
    ) -> Result<Vec<ScreenshotTrace>, ClarityError> {
        let (clause, mut values) = range_clause("timestamp", start, end);
        values.push(limit_value(limit));
        let sql = format!(
            "SELECT id, timestamp, file_path, width, height, file_size
             FROM screenshot_traces {}
             ORDER BY timestamp ASC, id ASC
             LIMIT ?{}",
            clause,
            values.len()
        );

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| Ok(row_to_trace(row)))
                .map_err(|e| ClarityError::Storage(e.to_string()))?;

            let mut traces = Vec::new();
            for row in rows {
                traces.push(row.map_err(|e| ClarityError::Storage(e.to_string()))??);
            }
            Ok(traces)
        })
    }

    /// Timestamp of the `n`-th (0-based) trace at or after `start`.
    pub fn nth_timestamp_from(
        &self,
        start: DateTime<Utc>,
        n: u32,
    ) -> Result<Option<DateTime<Utc>>, ClarityError> {
        let secs: Option<i64> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT timestamp FROM screenshot_traces
                 WHERE timestamp >= ?1
                 ORDER BY timestamp ASC, id ASC
                 LIMIT 1 OFFSET ?2",
                params![start.timestamp(), n],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ClarityError::Storage(e.to_string()))
        })?;
        secs.map(from_unix).transpose()
    }

    /// Number of traces in `[start, end)`.
    pub fn count_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, ClarityError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM screenshot_traces WHERE timestamp >= ?1 AND timestamp < ?2",
                    params![start.timestamp(), end.timestamp()],
                    |row| row.get(0),
                )
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Total number of traces.
    pub fn count(&self) -> Result<u64, ClarityError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM screenshot_traces", [], |row| row.get(0))
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn row_to_trace(row: &rusqlite::Row<'_>) -> Result<ScreenshotTrace, ClarityError> {
    let map = |e: rusqlite::Error| ClarityError::Storage(e.to_string());
    let timestamp: i64 = row.get(1).map_err(map)?;
    let file_size: i64 = row.get(5).map_err(map)?;
    Ok(ScreenshotTrace {
        id: row.get(0).map_err(map)?,
        timestamp: from_unix(timestamp)?,
        file_path: row.get(2).map_err(map)?,
        width: row.get(3).map_err(map)?,
        height: row.get(4).map_err(map)?,
        file_size: file_size.max(0) as u64,
    })
}

// =============================================================================
// Summaries
// =============================================================================

/// Window summaries produced by the summary pipeline.
pub struct SummaryRepository {
    db: Arc<Database>,
}

impl SummaryRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert the summary for `window`.
    ///
    /// Fails with `Conflict` when the window overlaps an existing summary, so
    /// no trace is ever covered twice.
    pub fn insert(
        &self,
        window: TimeWindow,
        content: &str,
        screenshot_count: u32,
    ) -> Result<Summary, ClarityError> {
        if window.end <= window.start {
            return Err(ClarityError::Storage(format!(
                "Empty summary window [{}, {})",
                window.start, window.end
            )));
        }
        let created_at = Utc::now();
        let id = self.db.with_conn(|conn| {
            let overlapping: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM summaries WHERE start_time < ?2 AND end_time > ?1",
                    params![window.start.timestamp(), window.end.timestamp()],
                    |row| row.get(0),
                )
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            if overlapping > 0 {
                return Err(ClarityError::Conflict(format!(
                    "summary window [{}, {}) overlaps an existing summary",
                    window.start, window.end
                )));
            }

            conn.execute(
                "INSERT INTO summaries (start_time, end_time, content, screenshot_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    window.start.timestamp(),
                    window.end.timestamp(),
                    content,
                    screenshot_count,
                    created_at.timestamp()
                ],
            )
            .map_err(|e| ClarityError::Storage(format!("Failed to save summary: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(Summary {
            id,
            start_time: window.start,
            end_time: window.end,
            content: content.to_string(),
            screenshot_count,
            created_at: from_unix(created_at.timestamp())?,
        })
    }

    /// Summaries whose window starts in `[start, end)`, oldest first.
    pub fn query(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<u64>,
    ) -> Result<Vec<Summary>, ClarityError> {
        let (clause, mut values) = range_clause("start_time", start, end);
        values.push(limit_value(limit));
        let sql = format!(
            "SELECT id, start_time, end_time, content, screenshot_count, created_at
             FROM summaries {}
             ORDER BY start_time ASC, id ASC
             LIMIT ?{}",
            clause,
            values.len()
        );

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| Ok(row_to_summary(row)))
                .map_err(|e| ClarityError::Storage(e.to_string()))?;

            let mut summaries = Vec::new();
            for row in rows {
                summaries.push(row.map_err(|e| ClarityError::Storage(e.to_string()))??);
            }
            Ok(summaries)
        })
    }

    /// End of the most recent summary window, if any.
    pub fn latest_end(&self) -> Result<Option<DateTime<Utc>>, ClarityError> {
        let secs: Option<i64> = self.db.with_conn(|conn| {
            conn.query_row("SELECT MAX(end_time) FROM summaries", [], |row| row.get(0))
                .map_err(|e| ClarityError::Storage(e.to_string()))
        })?;
        secs.map(from_unix).transpose()
    }

    pub fn count(&self) -> Result<u64, ClarityError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM summaries", [], |row| row.get(0))
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> Result<Summary, ClarityError> {
    let map = |e: rusqlite::Error| ClarityError::Storage(e.to_string());
    let start: i64 = row.get(1).map_err(map)?;
    let end: i64 = row.get(2).map_err(map)?;
    let created: i64 = row.get(5).map_err(map)?;
    Ok(Summary {
        id: row.get(0).map_err(map)?,
        start_time: from_unix(start)?,
        end_time: from_unix(end)?,
        content: row.get(3).map_err(map)?,
        screenshot_count: row.get(4).map_err(map)?,
        created_at: from_unix(created)?,
    })
}

// =============================================================================
// Daily summaries
// =============================================================================

/// Fields written by a daily summary upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySummaryInput {
    pub date: NaiveDate,
    pub content: String,
    pub screenshot_count: u64,
    pub summary_count: u64,
    pub total_duration_seconds: i64,
}

/// Day-level roll-ups, one row per local calendar date.
pub struct DailySummaryRepository {
    db: Arc<Database>,
}

impl DailySummaryRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or overwrite the roll-up for `input.date` in one statement.
    ///
    /// `created_at` of an existing row is preserved.
    pub fn upsert(&self, input: &DailySummaryInput) -> Result<DailySummary, ClarityError> {
        let date = input.date.format("%Y-%m-%d").to_string();
        let now = Utc::now().timestamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO daily_summaries
                    (date, content, screenshot_count, summary_count, total_duration_seconds, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(date) DO UPDATE SET
                    content = excluded.content,
                    screenshot_count = excluded.screenshot_count,
                    summary_count = excluded.summary_count,
                    total_duration_seconds = excluded.total_duration_seconds,
                    updated_at = excluded.updated_at",
                params![
                    date,
                    input.content,
                    input.screenshot_count as i64,
                    input.summary_count as i64,
                    input.total_duration_seconds,
                    now
                ],
            )
            .map_err(|e| ClarityError::Storage(format!("Failed to save daily summary: {}", e)))?;
            Ok(())
        })?;

        self.get(input.date)?.ok_or_else(|| {
            ClarityError::Storage(format!("Daily summary for {} vanished after upsert", date))
        })
    }

    pub fn get(&self, date: NaiveDate) -> Result<Option<DailySummary>, ClarityError> {
        let date = date.format("%Y-%m-%d").to_string();
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, date, content, screenshot_count, summary_count,
                            total_duration_seconds, created_at, updated_at
                     FROM daily_summaries WHERE date = ?1",
                    params![date],
                    |row| Ok(row_to_daily(row)),
                )
                .optional()
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            row.transpose()
        })
    }

    pub fn count(&self) -> Result<u64, ClarityError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM daily_summaries", [], |row| row.get(0))
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn row_to_daily(row: &rusqlite::Row<'_>) -> Result<DailySummary, ClarityError> {
    let map = |e: rusqlite::Error| ClarityError::Storage(e.to_string());
    let date: String = row.get(1).map_err(map)?;
    let screenshots: i64 = row.get(3).map_err(map)?;
    let summaries: i64 = row.get(4).map_err(map)?;
    let created: i64 = row.get(6).map_err(map)?;
    let updated: i64 = row.get(7).map_err(map)?;
    Ok(DailySummary {
        id: row.get(0).map_err(map)?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| ClarityError::Storage(format!("Invalid date '{}': {}", date, e)))?,
        content: row.get(2).map_err(map)?,
        screenshot_count: screenshots.max(0) as u64,
        summary_count: summaries.max(0) as u64,
        total_duration_seconds: row.get(5).map_err(map)?,
        created_at: from_unix(created)?,
        updated_at: from_unix(updated)?,
    })
}

// =============================================================================
// API request log
// =============================================================================

/// Append-only log of remote API calls.
pub struct ApiRequestRepository {
    db: Arc<Database>,
}

impl ApiRequestRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, request: &NewApiRequest) -> Result<i64, ClarityError> {
        let opt = |v: Option<u64>| v.map(|n| n.min(i64::MAX as u64) as i64);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO api_request_log
                    (timestamp, model, endpoint, prompt_tokens, completion_tokens, total_tokens,
                     status_code, duration_ms, success, error_kind, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    request.timestamp.timestamp(),
                    request.model,
                    request.endpoint,
                    opt(request.usage.prompt_tokens),
                    opt(request.usage.completion_tokens),
                    opt(request.usage.total_tokens),
                    request.status_code,
                    request.duration_ms.min(i64::MAX as u64) as i64,
                    request.success,
                    request.error_kind,
                    request.error_message,
                ],
            )
            .map_err(|e| ClarityError::Storage(format!("Failed to log api request: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Log rows with `start <= timestamp < end`, oldest first.
    pub fn query(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<u64>,
    ) -> Result<Vec<ApiRequestLog>, ClarityError> {
        let (clause, mut values) = range_clause("timestamp", start, end);
        values.push(limit_value(limit));
        let sql = format!(
            "SELECT id, timestamp, model, endpoint, prompt_tokens, completion_tokens, total_tokens,
                    status_code, duration_ms, success, error_kind, error_message
             FROM api_request_log {}
             ORDER BY timestamp ASC, id ASC
             LIMIT ?{}",
            clause,
            values.len()
        );

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| {
                    Ok(row_to_api_request(row))
                })
                .map_err(|e| ClarityError::Storage(e.to_string()))?;

            let mut logs = Vec::new();
            for row in rows {
                logs.push(row.map_err(|e| ClarityError::Storage(e.to_string()))??);
            }
            Ok(logs)
        })
    }

    pub fn count(&self) -> Result<u64, ClarityError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM api_request_log", [], |row| row.get(0))
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn row_to_api_request(row: &rusqlite::Row<'_>) -> Result<ApiRequestLog, ClarityError> {
    let map = |e: rusqlite::Error| ClarityError::Storage(e.to_string());
    let tokens = |idx: usize| -> Result<Option<u64>, ClarityError> {
        let v: Option<i64> = row.get(idx).map_err(map)?;
        Ok(v.map(|n| n.max(0) as u64))
    };
    let timestamp: i64 = row.get(1).map_err(map)?;
    let duration: i64 = row.get(8).map_err(map)?;
    Ok(ApiRequestLog {
        id: row.get(0).map_err(map)?,
        request: NewApiRequest {
            timestamp: from_unix(timestamp)?,
            model: row.get(2).map_err(map)?,
            endpoint: row.get(3).map_err(map)?,
            usage: TokenUsage {
                prompt_tokens: tokens(4)?,
                completion_tokens: tokens(5)?,
                total_tokens: tokens(6)?,
            },
            status_code: row.get(7).map_err(map)?,
            duration_ms: duration.max(0) as u64,
            success: row.get(9).map_err(map)?,
            error_kind: row.get(10).map_err(map)?,
            error_message: row.get(11).map_err(map)?,
        },
    })
}

// =============================================================================
// Settings
// =============================================================================

/// Key-value store for user-editable runtime settings.
pub struct SettingsRepository {
    db: Arc<Database>,
}

impl SettingsRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, ClarityError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ClarityError::Storage(e.to_string()))
        })
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), ClarityError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value, updated_at)
                 VALUES (?1, ?2, strftime('%s', 'now'))
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![key, value],
            )
            .map_err(|e| ClarityError::Storage(format!("Failed to save setting {}: {}", key, e)))?;
            Ok(())
        })
    }

    /// Remove a key. Returns whether a row existed.
    pub fn delete(&self, key: &str) -> Result<bool, ClarityError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM settings WHERE key = ?1", params![key])
                .map_err(|e| ClarityError::Storage(format!("Failed to delete setting {}: {}", key, e)))?;
            Ok(changed > 0)
        })
    }
}
