//! Day-level roll-up of window summaries.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tracing::info;

use clarity_core::error::ClarityError;
use clarity_core::events::EventBus;
use clarity_core::types::{DailySummary, TimeWindow};
use clarity_storage::{DailySummaryInput, DailySummaryRepository, SummaryRepository, TraceRepository};
use clarity_vision::RemoteVisionClient;

use crate::prompts;
use crate::settings::RuntimeSettings;

/// Generates and reads daily summaries. Generation is an upsert, so running
/// it again for the same date replaces the content.
pub struct DailySummarizer {
    traces: Arc<TraceRepository>,
    summaries: Arc<SummaryRepository>,
    daily: Arc<DailySummaryRepository>,
    client: Arc<RemoteVisionClient>,
    settings: Arc<RuntimeSettings>,
    events: EventBus,
}

impl DailySummarizer {
    pub fn new(
        traces: Arc<TraceRepository>,
        summaries: Arc<SummaryRepository>,
        daily: Arc<DailySummaryRepository>,
        client: Arc<RemoteVisionClient>,
        settings: Arc<RuntimeSettings>,
        events: EventBus,
    ) -> Self {
        Self {
            traces,
            summaries,
            daily,
            client,
            settings,
            events,
        }
    }

    /// Build the summary for `date` (default today, local time).
    ///
    /// A day without window summaries gets a fixed text and no remote call.
    /// On a remote failure nothing is written.
    pub async fn generate(&self, date: Option<NaiveDate>) -> Result<DailySummary, ClarityError> {
        let date = date.unwrap_or_else(|| Local::now().date_naive());
        let day = TimeWindow::local_day(date);
        let settings = self.settings.snapshot();

        let summaries = self.summaries.query(Some(day.start), Some(day.end), None)?;
        let screenshot_count = self.traces.count_between(day.start, day.end)?;
        let total_duration_seconds: i64 = summaries
            .iter()
            .map(|s| (s.end_time - s.start_time).num_seconds())
            .sum();

        let content = if summaries.is_empty() {
            prompts::empty_day_text(settings.language).to_string()
        } else {
            let api_key = settings.api_key.clone().ok_or_else(|| {
                ClarityError::Config("Gemini API key is not configured".into())
            })?;
            let prompt = prompts::daily_prompt(settings.language, &summaries);
            self.client
                .generate_text(&api_key, &settings.model, &prompt)
                .await?
                .text
        };

        let daily = self.daily.upsert(&DailySummaryInput {
            date,
            content,
            screenshot_count,
            summary_count: summaries.len() as u64,
            total_duration_seconds,
        })?;
        info!(
            %date,
            summaries = daily.summary_count,
            screenshots = daily.screenshot_count,
            "Daily summary stored"
        );
        self.events.notify_statistics_changed();
        Ok(daily)
    }

    /// Stored summary for `date` (default today, local time).
    pub fn get(&self, date: Option<NaiveDate>) -> Result<Option<DailySummary>, ClarityError> {
        let date = date.unwrap_or_else(|| Local::now().date_naive());
        self.daily.get(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use chrono::Duration;
    use clarity_core::types::Language;
    use clarity_vision::testing::ScriptedTransport;
    use clarity_vision::TransportError;

    fn store_windows(h: &Harness, windows: &[(i64, i64, &str)]) {
        for (start, end, text) in windows {
            h.summaries
                .insert(
                    TimeWindow::new(
                        h.t0 + Duration::seconds(*start),
                        h.t0 + Duration::seconds(*end),
                    ),
                    text,
                    10,
                )
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_day_skips_remote_call() {
        let h = Harness::new(ScriptedTransport::new());
        h.settings.set_language(Language::En).unwrap();

        let daily = h.daily.generate(Some(h.date())).await.unwrap();
        assert_eq!(daily.content, "No activity recorded for this day.");
        assert_eq!(daily.summary_count, 0);
        assert_eq!(daily.total_duration_seconds, 0);
        assert_eq!(h.transport.generates(), 0);
        assert_eq!(h.api_log.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_generate_uses_day_summaries() {
        let h = Harness::new(ScriptedTransport::new().reply("A focused day"));
        h.frames(0..30);
        store_windows(&h, &[(0, 45, "Coding"), (45, 90, "Email")]);

        let daily = h.daily.generate(Some(h.date())).await.unwrap();
        assert_eq!(daily.content, "A focused day");
        assert_eq!(daily.summary_count, 2);
        assert_eq!(daily.screenshot_count, 30);
        assert_eq!(daily.total_duration_seconds, 90);

        let sent = h.transport.last_generate().unwrap();
        assert!(sent.file.is_none());
        assert!(sent.prompt.ends_with("Coding\n\nEmail"));
        assert_eq!(h.api_log.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_generate_twice_keeps_one_row() {
        let h = Harness::new(ScriptedTransport::new());
        store_windows(&h, &[(0, 45, "Coding")]);

        let first = h.daily.generate(Some(h.date())).await.unwrap();
        let second = h.daily.generate(Some(h.date())).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(h.daily_repo.count().unwrap(), 1);
        assert_eq!(h.daily.get(Some(h.date())).unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let h = Harness::new(ScriptedTransport::new());
        h.settings.set_api_key("").unwrap();
        store_windows(&h, &[(0, 45, "Coding")]);

        let err = h.daily.generate(Some(h.date())).await.unwrap_err();
        assert!(matches!(err, ClarityError::Config(_)));
        assert_eq!(h.daily_repo.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_writes_nothing() {
        let h = Harness::new(ScriptedTransport::new().generate_error(TransportError::Status {
            status: 401,
            body: "bad key".into(),
        }));
        store_windows(&h, &[(0, 45, "Coding")]);

        let err = h.daily.generate(Some(h.date())).await.unwrap_err();
        assert!(matches!(err, ClarityError::Remote(_)));
        assert_eq!(h.daily_repo.count().unwrap(), 0);
        assert_eq!(h.api_log.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_other_days_are_excluded() {
        let h = Harness::new(ScriptedTransport::new());
        store_windows(&h, &[(0, 45, "Today")]);
        let yesterday = h.date().pred_opt().unwrap();

        let daily = h.daily.generate(Some(yesterday)).await.unwrap();
        assert_eq!(daily.summary_count, 0);
        assert!(h.daily.get(Some(h.date())).unwrap().is_none());
    }
}
