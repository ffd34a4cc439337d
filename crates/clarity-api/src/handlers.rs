//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/body parameters, calls into the pipeline or
//! the read-side repositories, and returns camelCase JSON.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use clarity_core::events::STATISTICS_UPDATED;
use clarity_core::types::{
    DailySummary, Language, RecordingStatus, ScreenshotTrace, Summary, VideoResolution,
};
use clarity_pipeline::{prompts, CaptureCheck, PipelineReport};
use clarity_storage::{ApiStatistics, HistoricalStat, RangeStatistics, MAX_HISTORY_DAYS};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_HISTORY_DAYS: u32 = 7;

// =============================================================================
// Query parameter types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeParams {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DateParams {
    /// `YYYY-MM-DD`, local calendar date.
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LanguageParams {
    pub language: Option<String>,
}

fn parse_time(field: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ApiError::BadRequest(format!("Invalid {field} '{raw}': {e}")))
        })
        .transpose()
}

fn parse_date(value: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    value
        .map(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| ApiError::BadRequest(format!("Invalid date '{raw}': {e}")))
        })
        .transpose()
}

fn parse_range(params: &RangeParams) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), ApiError> {
    let start = parse_time("startTime", params.start_time.as_deref())?;
    let end = parse_time("endTime", params.end_time.as_deref())?;
    if let (Some(s), Some(e)) = (start, end) {
        if e < s {
            return Err(ApiError::BadRequest("endTime is before startTime".into()));
        }
    }
    Ok((start, end))
}

fn language_or_current(state: &AppState, raw: Option<&str>) -> Result<Language, ApiError> {
    match raw {
        Some(raw) => Ok(raw.parse()?),
        None => Ok(state.settings.language()),
    }
}

// =============================================================================
// Request / response bodies
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub is_recording: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyBody {
    pub api_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyResponse {
    pub api_key: Option<String>,
    pub configured: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelBody {
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IntervalBody {
    pub seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptBody {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    pub language: Language,
    pub prompt: String,
    pub is_default: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LanguageBody {
    pub language: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolutionBody {
    pub resolution: String,
}

// =============================================================================
// Public
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        is_recording: state.controller.status().is_recording,
    })
}

// =============================================================================
// Recording
// =============================================================================

/// POST /recording/start
pub async fn start_recording(
    State(state): State<AppState>,
) -> Result<Json<RecordingStatus>, ApiError> {
    Ok(Json(state.controller.start_recording().await?))
}

/// POST /recording/stop
pub async fn stop_recording(
    State(state): State<AppState>,
) -> Result<Json<RecordingStatus>, ApiError> {
    Ok(Json(state.controller.stop_recording().await?))
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<RecordingStatus> {
    Json(state.controller.status())
}

// =============================================================================
// Traces and summaries
// =============================================================================

/// GET /traces?startTime=&endTime=&limit=
pub async fn traces(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<ScreenshotTrace>>, ApiError> {
    let (start, end) = parse_range(&params)?;
    Ok(Json(state.traces.query(start, end, params.limit)?))
}

/// GET /summaries?startTime=&endTime=&limit=
pub async fn summaries(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<Summary>>, ApiError> {
    let (start, end) = parse_range(&params)?;
    Ok(Json(state.summaries.query(start, end, params.limit)?))
}

// =============================================================================
// Statistics
// =============================================================================

/// GET /statistics/today
pub async fn today_statistics(
    State(state): State<AppState>,
) -> Result<Json<RangeStatistics>, ApiError> {
    Ok(Json(state.statistics.today_statistics()?))
}

/// GET /statistics/history?days=
pub async fn historical_stats(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoricalStat>>, ApiError> {
    let days = params.days.unwrap_or(DEFAULT_HISTORY_DAYS);
    if days == 0 || days > MAX_HISTORY_DAYS {
        return Err(ApiError::BadRequest(format!(
            "days must be within 1..={MAX_HISTORY_DAYS}"
        )));
    }
    Ok(Json(state.statistics.historical_stats(days)?))
}

/// GET /statistics/api?startTime=&endTime=
pub async fn api_statistics(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<ApiStatistics>, ApiError> {
    let (start, end) = parse_range(&params)?;
    Ok(Json(state.statistics.api_statistics(start, end)?))
}

// =============================================================================
// Daily summaries
// =============================================================================

/// POST /daily-summary/generate?date=
pub async fn generate_daily_summary(
    State(state): State<AppState>,
    Query(params): Query<DateParams>,
) -> Result<Json<DailySummary>, ApiError> {
    let date = parse_date(params.date.as_deref())?;
    Ok(Json(state.daily.generate(date).await?))
}

/// GET /daily-summary?date=
pub async fn get_daily_summary(
    State(state): State<AppState>,
    Query(params): Query<DateParams>,
) -> Result<Json<Option<DailySummary>>, ApiError> {
    let date = parse_date(params.date.as_deref())?;
    Ok(Json(state.daily.get(date)?))
}

// =============================================================================
// Diagnostics
// =============================================================================

/// GET /diagnostics
pub async fn diagnostics(
    State(state): State<AppState>,
) -> Result<Json<PipelineReport>, ApiError> {
    Ok(Json(state.diagnostics.report().await?))
}

/// POST /diagnostics/capture
///
/// Takes one screenshot that is not stored.
pub async fn capture_check(State(state): State<AppState>) -> Json<CaptureCheck> {
    Json(state.diagnostics.check_capture().await)
}

// =============================================================================
// Settings
// =============================================================================

/// GET /settings/api-key
pub async fn get_api_key(State(state): State<AppState>) -> Json<ApiKeyResponse> {
    let api_key = state.settings.api_key();
    Json(ApiKeyResponse {
        configured: api_key.is_some(),
        api_key,
    })
}

/// PUT /settings/api-key
pub async fn set_api_key(
    State(state): State<AppState>,
    Json(body): Json<ApiKeyBody>,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    state.settings.set_api_key(&body.api_key)?;
    Ok(get_api_key(State(state)).await)
}

/// GET /settings/model
pub async fn get_model(State(state): State<AppState>) -> Json<ModelBody> {
    Json(ModelBody {
        model: state.settings.model(),
    })
}

/// PUT /settings/model
pub async fn set_model(
    State(state): State<AppState>,
    Json(body): Json<ModelBody>,
) -> Result<Json<ModelBody>, ApiError> {
    state.settings.set_model(&body.model)?;
    Ok(get_model(State(state)).await)
}

/// GET /settings/summary-interval
pub async fn get_summary_interval(State(state): State<AppState>) -> Json<IntervalBody> {
    Json(IntervalBody {
        seconds: state.settings.summary_interval_seconds(),
    })
}

/// PUT /settings/summary-interval
///
/// The running summary loop picks the new value up after its next cycle.
pub async fn set_summary_interval(
    State(state): State<AppState>,
    Json(body): Json<IntervalBody>,
) -> Result<Json<IntervalBody>, ApiError> {
    state.settings.set_summary_interval_seconds(body.seconds)?;
    Ok(get_summary_interval(State(state)).await)
}

fn prompt_response(state: &AppState, language: Language) -> PromptResponse {
    let prompt = state.settings.prompt(language);
    PromptResponse {
        is_default: prompt == prompts::default_video_prompt(language),
        language,
        prompt,
    }
}

/// GET /settings/prompt?language=
pub async fn get_prompt(
    State(state): State<AppState>,
    Query(params): Query<LanguageParams>,
) -> Result<Json<PromptResponse>, ApiError> {
    let language = language_or_current(&state, params.language.as_deref())?;
    Ok(Json(prompt_response(&state, language)))
}

/// PUT /settings/prompt?language=
pub async fn set_prompt(
    State(state): State<AppState>,
    Query(params): Query<LanguageParams>,
    Json(body): Json<PromptBody>,
) -> Result<Json<PromptResponse>, ApiError> {
    let language = language_or_current(&state, params.language.as_deref())?;
    state.settings.set_prompt(language, &body.prompt)?;
    Ok(Json(prompt_response(&state, language)))
}

/// DELETE /settings/prompt?language= - back to the built-in prompt.
pub async fn reset_prompt(
    State(state): State<AppState>,
    Query(params): Query<LanguageParams>,
) -> Result<Json<PromptResponse>, ApiError> {
    let language = language_or_current(&state, params.language.as_deref())?;
    state.settings.reset_prompt(language)?;
    Ok(Json(prompt_response(&state, language)))
}

/// GET /settings/language
pub async fn get_language(State(state): State<AppState>) -> Json<LanguageBody> {
    Json(LanguageBody {
        language: state.settings.language().to_string(),
    })
}

/// PUT /settings/language
pub async fn set_language(
    State(state): State<AppState>,
    Json(body): Json<LanguageBody>,
) -> Result<Json<LanguageBody>, ApiError> {
    let language: Language = body.language.parse()?;
    state.settings.set_language(language)?;
    Ok(get_language(State(state)).await)
}

/// GET /settings/video-resolution
pub async fn get_video_resolution(State(state): State<AppState>) -> Json<ResolutionBody> {
    Json(ResolutionBody {
        resolution: state.settings.video_resolution().to_string(),
    })
}

/// PUT /settings/video-resolution
pub async fn set_video_resolution(
    State(state): State<AppState>,
    Json(body): Json<ResolutionBody>,
) -> Result<Json<ResolutionBody>, ApiError> {
    let resolution: VideoResolution = body.resolution.parse()?;
    state.settings.set_video_resolution(resolution)?;
    Ok(get_video_resolution(State(state)).await)
}

// =============================================================================
// Push
// =============================================================================

/// GET /stream - one `statistics-updated` event per observed change.
///
/// Changes that happen faster than the client reads coalesce into one event.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send> {
    let stream = WatchStream::from_changes(state.events.subscribe()).map(|generation| {
        Ok(Event::default()
            .event(STATISTICS_UPDATED)
            .data(generation.to_string()))
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_accepts_offsets() {
        let parsed = parse_time("startTime", Some("2026-03-10T12:00:00+08:00"))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-03-10T04:00:00+00:00");
        assert!(parse_time("startTime", None).unwrap().is_none());
        assert!(parse_time("startTime", Some("yesterday")).is_err());
    }

    #[test]
    fn test_parse_range_rejects_inverted() {
        let params = RangeParams {
            start_time: Some("2026-03-10T12:00:00Z".into()),
            end_time: Some("2026-03-10T11:00:00Z".into()),
            limit: None,
        };
        assert!(parse_range(&params).is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date(Some("2026-03-10")).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 10)
        );
        assert!(parse_date(Some("10/03/2026")).is_err());
    }
}
