//! Run progress snapshots.

use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use serde::Serialize;

use super::RunState;
use super::timeline::RecipeTimeline;

/// Progress of one recipe step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepProgress {
    /// Step index.
    pub index: usize,
    /// Step offset from the run start.
    pub offset: Duration,
    /// Completion of the span up to the next step, 0 to 100.
    pub percent: f64,
    /// Active time until the span ends.
    pub remaining: Duration,
}

/// Snapshot of a scheduler run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    /// Run state.
    pub state: RunState,
    /// Completion of the whole timeline, 0 to 100.
    pub total_percent: f64,
    /// Active time so far, pauses excluded.
    pub elapsed: Duration,
    /// Active time until the last step.
    pub remaining: Duration,
    /// Estimated wall-clock end. `None` unless running.
    pub eta: Option<DateTime<Local>>,
    /// Index of the latest step whose offset has been reached.
    pub current_step: Option<usize>,
    /// Per-step progress.
    pub steps: Vec<StepProgress>,
}

impl Progress {
    /// Computes progress for `elapsed` active time.
    pub(crate) fn compute(
        timeline: &RecipeTimeline,
        state: RunState,
        elapsed: Duration,
        now: DateTime<Local>,
    ) -> Self {
        let started = !matches!(state, RunState::Idle | RunState::Stopped);
        let elapsed = if started { elapsed } else { Duration::ZERO };
        let total = timeline.total_duration();
        let remaining = total.saturating_sub(elapsed);

        let total_percent = if !started {
            0.0
        } else if total.is_zero() {
            100.0
        } else {
            (elapsed.as_secs_f64() / total.as_secs_f64() * 100.0).min(100.0)
        };

        let eta = match state {
            RunState::Running => TimeDelta::from_std(remaining).ok().map(|d| now + d),
            _ => None,
        };

        let steps = timeline.steps();
        let current_step = if started {
            steps.iter().rposition(|step| step.offset <= elapsed)
        } else {
            None
        };

        let steps = steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let end = steps.get(index + 1).map_or(step.offset, |next| next.offset);
                StepProgress {
                    index,
                    offset: step.offset,
                    percent: step_percent(started, elapsed, step.offset, end),
                    remaining: end.saturating_sub(elapsed),
                }
            })
            .collect();

        Self {
            state,
            total_percent,
            elapsed,
            remaining,
            eta,
            current_step,
            steps,
        }
    }
}

fn step_percent(started: bool, elapsed: Duration, start: Duration, end: Duration) -> f64 {
    if !started || elapsed < start {
        0.0
    } else if end <= start {
        100.0
    } else {
        let span = (end - start).as_secs_f64();
        ((elapsed - start).as_secs_f64() / span * 100.0).clamp(0.0, 100.0)
    }
}

/// Renders a duration as `1 days, 2 hours, 3 minutes, 4.5 seconds`.
///
/// Zero fields are left out; a zero duration renders as `0.0 seconds`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    const DAY: u64 = 86_400;
    const HOUR: u64 = 3_600;
    const MINUTE: u64 = 60;

    let whole = duration.as_secs();
    let days = whole / DAY;
    let hours = whole % DAY / HOUR;
    let minutes = whole % HOUR / MINUTE;
    let seconds = (duration - Duration::from_secs(whole - whole % MINUTE)).as_secs_f64();

    let mut parts = Vec::with_capacity(4);
    if days > 0 {
        parts.push(format!("{days} days"));
    }
    if hours > 0 {
        parts.push(format!("{hours} hours"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes} minutes"));
    }
    if seconds > 0.0 {
        parts.push(format!("{seconds:.1} seconds"));
    }

    if parts.is_empty() {
        "0.0 seconds".into()
    } else {
        parts.join(", ")
    }
}
