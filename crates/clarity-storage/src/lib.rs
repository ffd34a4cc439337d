//! Clarity Storage crate - SQLite persistence and read-side statistics.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories for
//! traces, summaries, daily summaries, the API request log and settings,
//! and the statistics aggregator.

pub mod db;
pub mod migrations;
pub mod repository;
pub mod statistics;

pub use db::Database;
pub use repository::{
    ApiRequestRepository, DailySummaryInput, DailySummaryRepository, SettingsRepository,
    SummaryRepository, TraceRepository,
};
pub use statistics::{
    ApiStatistics, HistoricalStat, RangeStatistics, StatisticsAggregator, MAX_HISTORY_DAYS,
};
