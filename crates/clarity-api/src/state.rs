//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use clarity_core::events::EventBus;
use clarity_pipeline::{
    DailySummarizer, PipelineController, PipelineDiagnostics, PipelineRuntime, RuntimeSettings,
};
use clarity_storage::{StatisticsAggregator, SummaryRepository, TraceRepository};

/// Shared application state.
///
/// Repositories here sit on the read connection; writes go through the
/// controller, the daily summarizer and the settings store.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<PipelineController>,
    pub daily: Arc<DailySummarizer>,
    pub diagnostics: Arc<PipelineDiagnostics>,
    pub settings: Arc<RuntimeSettings>,
    pub traces: Arc<TraceRepository>,
    pub summaries: Arc<SummaryRepository>,
    pub statistics: Arc<StatisticsAggregator>,
    pub events: EventBus,
    /// Bearer token every protected route requires.
    pub api_token: String,
    /// Port the server listens on, used for the CORS allow-list.
    pub port: u16,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(runtime: &PipelineRuntime, api_token: String, port: u16) -> Self {
        Self {
            controller: Arc::clone(&runtime.controller),
            daily: Arc::clone(&runtime.daily),
            diagnostics: Arc::clone(&runtime.diagnostics),
            settings: Arc::clone(&runtime.settings),
            traces: Arc::clone(&runtime.traces),
            summaries: Arc::clone(&runtime.summaries),
            statistics: Arc::clone(&runtime.statistics),
            events: runtime.events.clone(),
            api_token,
            port,
            start_time: Instant::now(),
        }
    }
}
