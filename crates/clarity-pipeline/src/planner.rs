//! Choosing the next window to summarize.

use chrono::{DateTime, Duration, Utc};

use clarity_core::error::ClarityError;
use clarity_core::types::TimeWindow;
use clarity_storage::TraceRepository;

/// Inputs of one planning step besides the trace store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanParams {
    /// Where the previous summary ended, or the session start.
    pub cursor: DateTime<Utc>,
    pub now: DateTime<Utc>,
    pub interval_seconds: u64,
    pub catch_up_span: u32,
    pub min_frames: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPlan {
    /// Less than one full interval has elapsed since the window start.
    NotReady { start: DateTime<Utc> },
    Ready(TimeWindow),
}

/// Plan the next window `[s, s + span * interval)`.
///
/// `s` is the cursor, moved up to the first trace at or after it since no
/// frame lies in between. The span covers as many whole elapsed intervals as
/// `catch_up_span` allows, widened when needed to reach the `min_frames`-th
/// frame so sparse capture still produces a summary.
pub fn plan_window(traces: &TraceRepository, params: PlanParams) -> Result<WindowPlan, ClarityError> {
    let interval = params.interval_seconds.max(1) as i64;

    let start = match traces.nth_timestamp_from(params.cursor, 0)? {
        Some(first) if first > params.cursor => first,
        _ => params.cursor,
    };

    let elapsed = (params.now - start).num_seconds();
    let available = if elapsed > 0 { elapsed / interval } else { 0 };
    if available == 0 {
        return Ok(WindowPlan::NotReady { start });
    }

    let mut span = available.min(i64::from(params.catch_up_span.max(1)));

    let horizon = start + Duration::seconds(available * interval);
    let last_needed = traces.nth_timestamp_from(start, params.min_frames.max(1) - 1)?;
    if let Some(ts) = last_needed.filter(|ts| *ts < horizon) {
        let needed = (ts - start).num_seconds() / interval + 1;
        span = span.max(needed);
    }

    Ok(WindowPlan::Ready(TimeWindow::new(
        start,
        start + Duration::seconds(span * interval),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clarity_storage::Database;
    use std::sync::Arc;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn traces_at(secs: &[i64]) -> TraceRepository {
        let repo = TraceRepository::new(Arc::new(Database::in_memory().unwrap()));
        for s in secs {
            repo.append(t(*s), &format!("/r/{s}.jpg"), 1, 1, 1).unwrap();
        }
        repo
    }

    fn params(cursor: i64, now: i64) -> PlanParams {
        PlanParams {
            cursor: t(cursor),
            now: t(now),
            interval_seconds: 45,
            catch_up_span: 4,
            min_frames: 5,
        }
    }

    fn window(plan: WindowPlan) -> (i64, i64) {
        match plan {
            WindowPlan::Ready(w) => (
                w.start.timestamp() - 1_700_000_000,
                w.end.timestamp() - 1_700_000_000,
            ),
            other => panic!("expected a window, got {other:?}"),
        }
    }

    #[test]
    fn test_not_ready_before_one_interval() {
        let repo = traces_at(&[0, 1, 2]);
        let plan = plan_window(&repo, params(0, 44)).unwrap();
        assert_eq!(plan, WindowPlan::NotReady { start: t(0) });
    }

    #[test]
    fn test_single_interval_window() {
        let frames: Vec<i64> = (0..60).collect();
        let repo = traces_at(&frames);
        assert_eq!(window(plan_window(&repo, params(0, 50)).unwrap()), (0, 45));
    }

    #[test]
    fn test_start_moves_to_first_frame_after_cursor() {
        let repo = traces_at(&[100, 101, 102, 103, 104]);
        assert_eq!(window(plan_window(&repo, params(0, 150)).unwrap()), (100, 145));
    }

    #[test]
    fn test_no_frames_keeps_cursor() {
        let repo = traces_at(&[]);
        assert_eq!(window(plan_window(&repo, params(10, 60)).unwrap()), (10, 55));
    }

    #[test]
    fn test_catch_up_bounded_by_span() {
        let frames: Vec<i64> = (0..600).collect();
        let repo = traces_at(&frames);
        // Thirteen intervals have elapsed; only four are taken at once.
        assert_eq!(window(plan_window(&repo, params(0, 600)).unwrap()), (0, 180));
    }

    #[test]
    fn test_span_grows_to_reach_min_frames() {
        let repo = traces_at(&[0, 50, 100, 130, 140]);
        let mut p = params(0, 200);
        p.catch_up_span = 1;
        // The fifth frame at 140 lies in the fourth interval.
        assert_eq!(window(plan_window(&repo, p).unwrap()), (0, 180));
    }

    #[test]
    fn test_span_not_grown_past_elapsed_time() {
        let repo = traces_at(&[0, 50, 100, 130, 190]);
        let mut p = params(0, 190);
        p.catch_up_span = 1;
        // Fifth frame is beyond the four elapsed intervals.
        assert_eq!(window(plan_window(&repo, p).unwrap()), (0, 45));
    }
}
