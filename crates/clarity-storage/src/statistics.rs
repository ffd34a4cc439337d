//! Read-side aggregation over traces, summaries and the API request log.
//!
//! The aggregator owns its own `Database` handle; in WAL mode it reads a
//! consistent snapshot without waiting on the pipeline's writers.

use std::sync::Arc;

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use clarity_core::error::ClarityError;
use clarity_core::types::TimeWindow;

use crate::db::Database;

/// Largest history the aggregator will compute in one call.
pub const MAX_HISTORY_DAYS: u32 = 365;

/// Aggregates over remote API calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStatistics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    /// Mean duration over successful calls; `None` when there were none.
    pub avg_duration_ms: Option<f64>,
}

/// Counts for an arbitrary time range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeStatistics {
    pub screenshot_count: u64,
    pub summary_count: u64,
    pub api: ApiStatistics,
}

/// One day of history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalStat {
    pub date: NaiveDate,
    pub screenshot_count: u64,
    pub summary_count: u64,
    pub total_duration_seconds: i64,
}

pub struct StatisticsAggregator {
    db: Arc<Database>,
}

impl StatisticsAggregator {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Counts and API aggregates for `[start, end)`.
    pub fn range_statistics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RangeStatistics, ClarityError> {
        let (start, end) = (start.timestamp(), end.timestamp());
        let (screenshot_count, summary_count) = self.db.with_conn(|conn| {
            let screenshots: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM screenshot_traces WHERE timestamp >= ?1 AND timestamp < ?2",
                    params![start, end],
                    |row| row.get(0),
                )
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            let summaries: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM summaries WHERE start_time >= ?1 AND start_time < ?2",
                    params![start, end],
                    |row| row.get(0),
                )
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            Ok((screenshots as u64, summaries as u64))
        })?;

        Ok(RangeStatistics {
            screenshot_count,
            summary_count,
            api: self.api_statistics_raw(Some(start), Some(end))?,
        })
    }

    /// Statistics for the current local calendar day.
    pub fn today_statistics(&self) -> Result<RangeStatistics, ClarityError> {
        let day = TimeWindow::local_day(Local::now().date_naive());
        self.range_statistics(day.start, day.end)
    }

    /// API aggregates over an optional range.
    pub fn api_statistics(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ApiStatistics, ClarityError> {
        self.api_statistics_raw(start.map(|s| s.timestamp()), end.map(|e| e.timestamp()))
    }

    fn api_statistics_raw(
        &self,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<ApiStatistics, ClarityError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(success), 0),
                    COALESCE(SUM(prompt_tokens), 0),
                    COALESCE(SUM(completion_tokens), 0),
                    COALESCE(SUM(total_tokens), 0),
                    AVG(CASE WHEN success = 1 THEN duration_ms END)
                 FROM api_request_log
                 WHERE (?1 IS NULL OR timestamp >= ?1)
                   AND (?2 IS NULL OR timestamp < ?2)",
                params![start, end],
                |row| {
                    let total: i64 = row.get(0)?;
                    let successful: i64 = row.get(1)?;
                    let prompt: i64 = row.get(2)?;
                    let completion: i64 = row.get(3)?;
                    let tokens: i64 = row.get(4)?;
                    let avg: Option<f64> = row.get(5)?;
                    Ok(ApiStatistics {
                        total_requests: total as u64,
                        successful_requests: successful as u64,
                        failed_requests: (total - successful).max(0) as u64,
                        total_prompt_tokens: prompt as u64,
                        total_completion_tokens: completion as u64,
                        total_tokens: tokens as u64,
                        avg_duration_ms: avg,
                    })
                },
            )
            .map_err(|e| ClarityError::Storage(e.to_string()))
        })
    }

    /// One entry per local day for the last `days` days ending today,
    /// oldest first.
    pub fn historical_stats(&self, days: u32) -> Result<Vec<HistoricalStat>, ClarityError> {
        self.historical_stats_until(Local::now().date_naive(), days)
    }

    /// Like [`historical_stats`](Self::historical_stats) with an explicit last day.
    pub fn historical_stats_until(
        &self,
        last_day: NaiveDate,
        days: u32,
    ) -> Result<Vec<HistoricalStat>, ClarityError> {
        if days == 0 || days > MAX_HISTORY_DAYS {
            return Err(ClarityError::Config(format!(
                "days must be within 1..={}, got {}",
                MAX_HISTORY_DAYS, days
            )));
        }

        self.db.with_conn(|conn| {
            let mut screenshots = conn
                .prepare_cached(
                    "SELECT COUNT(*) FROM screenshot_traces WHERE timestamp >= ?1 AND timestamp < ?2",
                )
                .map_err(|e| ClarityError::Storage(e.to_string()))?;
            let mut summaries = conn
                .prepare_cached(
                    "SELECT COUNT(*), COALESCE(SUM(end_time - start_time), 0)
                     FROM summaries WHERE start_time >= ?1 AND start_time < ?2",
                )
                .map_err(|e| ClarityError::Storage(e.to_string()))?;

            let mut stats = Vec::with_capacity(days as usize);
            for offset in (0..days).rev() {
                let date = last_day - Duration::days(i64::from(offset));
                let day = TimeWindow::local_day(date);
                let (from, to) = (day.start.timestamp(), day.end.timestamp());

                let screenshot_count: i64 = screenshots
                    .query_row(params![from, to], |row| row.get(0))
                    .map_err(|e| ClarityError::Storage(e.to_string()))?;
                let (summary_count, duration): (i64, i64) = summaries
                    .query_row(params![from, to], |row| Ok((row.get(0)?, row.get(1)?)))
                    .map_err(|e| ClarityError::Storage(e.to_string()))?;

                stats.push(HistoricalStat {
                    date,
                    screenshot_count: screenshot_count as u64,
                    summary_count: summary_count as u64,
                    total_duration_seconds: duration,
                });
            }
            Ok(stats)
        })
    }
}
