use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClarityError;

// =============================================================================
// Enums
// =============================================================================

/// Output language for prompts and generated summaries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    #[default]
    Zh,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Zh => "zh",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ClarityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "zh" => Ok(Language::Zh),
            other => Err(ClarityError::Config(format!(
                "unsupported language '{other}', expected 'en' or 'zh'"
            ))),
        }
    }
}

/// Video preset used when assembling a window for the remote service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoResolution {
    #[default]
    Low,
    Default,
}

impl VideoResolution {
    /// Output frame size (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            VideoResolution::Low => (640, 360),
            VideoResolution::Default => (1280, 720),
        }
    }

    /// Value for the `mediaResolution.level` request field.
    pub fn media_resolution(&self) -> &'static str {
        match self {
            VideoResolution::Low => "MEDIA_RESOLUTION_LOW",
            VideoResolution::Default => "MEDIA_RESOLUTION_DEFAULT",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoResolution::Low => "low",
            VideoResolution::Default => "default",
        }
    }
}

impl fmt::Display for VideoResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoResolution {
    type Err = ClarityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(VideoResolution::Low),
            "default" => Ok(VideoResolution::Default),
            other => Err(ClarityError::Config(format!(
                "unsupported video resolution '{other}', expected 'low' or 'default'"
            ))),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Metadata of one persisted screenshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotTrace {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub file_path: String,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
}

/// A natural-language summary of the half-open window `[start_time, end_time)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub content: String,
    pub screenshot_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Day-level roll-up, unique per local calendar date.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub id: i64,
    pub date: NaiveDate,
    pub content: String,
    pub screenshot_count: u64,
    pub summary_count: u64,
    pub total_duration_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Token accounting reported by the remote service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// One row of the remote API request log, before insertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewApiRequest {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub endpoint: String,
    pub usage: TokenUsage,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub success: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

/// A persisted remote API request log row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequestLog {
    pub id: i64,
    #[serde(flatten)]
    pub request: NewApiRequest,
}

/// Half-open time range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }

    /// The UTC range covering one calendar day in the host's local time zone.
    pub fn local_day(date: NaiveDate) -> Self {
        let start = local_midnight(date);
        let end = date
            .succ_opt()
            .map(local_midnight)
            .unwrap_or(start + Duration::days(1));
        Self { start, end }
    }
}

/// Local calendar date of a UTC instant.
pub fn local_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Local).date_naive()
}

fn local_midnight(date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        // Midnight skipped by a DST jump.
        LocalResult::None => Utc.from_utc_datetime(&naive),
    }
}

/// Snapshot returned by the recording commands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub is_recording: bool,
    pub screenshots_count: u64,
    pub storage_path: String,
}
