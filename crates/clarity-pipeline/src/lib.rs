//! Clarity Pipeline crate - settings, window planning and the summary loops.
//!
//! Ties capture, storage and the remote vision client together: the
//! SummaryScheduler turns windows of traces into summaries, the
//! DailySummarizer rolls a day of them up, the PipelineController starts
//! and stops recording, and PipelineDiagnostics checks the prerequisites.

pub mod controller;
pub mod daily;
pub mod diagnostics;
pub mod planner;
pub mod prompts;
pub mod runtime;
pub mod settings;
pub mod summary;

#[cfg(test)]
mod test_support;

pub use controller::PipelineController;
pub use daily::DailySummarizer;
pub use diagnostics::{CaptureCheck, PipelineDiagnostics, PipelineReport, ToolStatus};
pub use planner::{plan_window, PlanParams, WindowPlan};
pub use runtime::{Capabilities, Databases, PipelineRuntime, DATABASE_FILE};
pub use settings::{RuntimeSettings, SettingsSnapshot};
pub use summary::{CycleOutcome, SummaryPolicy, SummaryScheduler};
