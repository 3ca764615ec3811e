//! Recipe scheduler.
//!
//! Drives a [`RecipeTimeline`] against the connected controllers. Time is
//! measured as active time (pauses excluded) on the tokio clock; the driver
//! task sleeps between checks and never busy-waits.
//!
//! Each step is applied idempotently: actuators already in their target
//! state get no command. After the last step, and on stop, every controller
//! is sent its safe-state command.

mod progress;
mod timeline;

pub use progress::{Progress, StepProgress, format_duration};
pub use timeline::{Action, RecipeRow, RecipeStep, RecipeTimeline, TIME_COLUMN, Target};

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Local;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::protocol::Command;
use crate::types::{DeviceKind, DeviceStatus};

/// Default lower bound on the wait between step checks.
pub const DEFAULT_MIN_TICK: Duration = Duration::from_millis(100);

const EVENT_CAPACITY: usize = 64;

/// A controller the scheduler can drive.
///
/// Implemented by [`DeviceSession`](crate::session::DeviceSession).
pub trait Actuator: Send + Sync {
    /// Kind of controller behind this actuator.
    fn device_kind(&self) -> DeviceKind;

    /// Returns true while commands are accepted.
    fn is_ready(&self) -> bool;

    /// Returns the current status.
    fn snapshot(&self) -> Pin<Box<dyn Future<Output = DeviceStatus> + Send + '_>>;

    /// Queues a command without waiting for its reply.
    fn submit(&self, command: Command) -> Result<()>;

    /// Re-reads the actuator state; resolves once the status reflects it.
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Lower bound on the wait between step checks.
    pub min_tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_tick: DEFAULT_MIN_TICK,
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum tick.
    #[must_use]
    pub const fn min_tick(mut self, tick: Duration) -> Self {
        self.min_tick = tick;
        self
    }
}

/// State of a scheduler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum RunState {
    /// Never started.
    #[default]
    Idle,
    /// Steps are being applied on time.
    Running,
    /// Time is frozen; no commands are sent.
    Paused,
    /// Stopped before the end.
    Stopped,
    /// Every step was applied.
    Completed,
}

/// Run lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// The run started.
    Started,
    /// Step `index` was applied.
    StepApplied { index: usize },
    /// The run was paused.
    Paused,
    /// The run was resumed.
    Resumed,
    /// The run was stopped.
    Stopped,
    /// The last step was applied.
    Completed,
}

#[derive(Default)]
struct Run {
    state: RunState,
    started_at: Option<Instant>,
    pause_accumulated: Duration,
    pause_started_at: Option<Instant>,
    index: usize,
    finished: Option<Duration>,
    driver: Option<JoinHandle<()>>,
}

impl Run {
    /// Active time at `now`, frozen while paused and once completed.
    fn elapsed(&self, now: Instant) -> Duration {
        if let Some(finished) = self.finished {
            return finished;
        }
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let now = self.pause_started_at.unwrap_or(now);
        now.saturating_duration_since(started_at)
            .saturating_sub(self.pause_accumulated)
    }
}

struct SchedulerInner {
    timeline: RecipeTimeline,
    actuators: Vec<Arc<dyn Actuator>>,
    config: SchedulerConfig,
    run: Mutex<Run>,
    events: broadcast::Sender<SchedulerEvent>,
}

/// Runs one recipe timeline against a set of controllers.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Creates an idle scheduler.
    #[must_use]
    pub fn new(
        timeline: RecipeTimeline,
        actuators: Vec<Arc<dyn Actuator>>,
        config: SchedulerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(SchedulerInner {
                timeline,
                actuators,
                config,
                run: Mutex::new(Run::default()),
                events,
            }),
        }
    }

    /// Returns the timeline.
    #[must_use]
    pub fn timeline(&self) -> &RecipeTimeline {
        &self.inner.timeline
    }

    /// Subscribes to run lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the run state.
    pub async fn state(&self) -> RunState {
        self.inner.run.lock().await.state
    }

    /// Starts a run from the first step.
    ///
    /// # Errors
    ///
    /// `SchedulerAbort` when a run is already active or no controller is
    /// connected.
    pub async fn start(&self) -> Result<()> {
        let mut run = self.inner.run.lock().await;
        if matches!(run.state, RunState::Running | RunState::Paused) {
            return Err(Error::SchedulerAbort {
                reason: "a run is already active".into(),
            });
        }

        let ready: Vec<DeviceKind> = self
            .inner
            .actuators
            .iter()
            .filter(|a| a.is_ready())
            .map(|a| a.device_kind())
            .collect();
        if ready.is_empty() {
            return Err(Error::SchedulerAbort {
                reason: "no controller is connected".into(),
            });
        }
        for kind in self.inner.timeline.device_kinds() {
            if !ready.contains(&kind) {
                tracing::warn!("no connected {}, its actions will be skipped", kind);
            }
        }

        *run = Run {
            state: RunState::Running,
            started_at: Some(Instant::now()),
            ..Run::default()
        };
        run.driver = Some(tokio::spawn(drive(Arc::downgrade(&self.inner))));
        // Before the driver can take the lock and report a step.
        self.inner.emit(SchedulerEvent::Started);
        drop(run);

        tracing::info!(
            "schedule started: {} steps over {}",
            self.inner.timeline.len(),
            format_duration(self.inner.timeline.total_duration())
        );
        Ok(())
    }

    /// Pauses the run after any step being applied.
    pub async fn pause(&self) -> Result<()> {
        let mut run = self.inner.run.lock().await;
        if run.state != RunState::Running {
            return Err(Error::SchedulerAbort {
                reason: format!("cannot pause a run that is {:?}", run.state),
            });
        }
        if let Some(driver) = run.driver.take() {
            driver.abort();
        }
        run.pause_started_at = Some(Instant::now());
        run.state = RunState::Paused;
        drop(run);

        tracing::info!("schedule paused");
        self.inner.emit(SchedulerEvent::Paused);
        Ok(())
    }

    /// Resumes a paused run.
    pub async fn resume(&self) -> Result<()> {
        let mut run = self.inner.run.lock().await;
        if run.state != RunState::Paused {
            return Err(Error::SchedulerAbort {
                reason: format!("cannot resume a run that is {:?}", run.state),
            });
        }
        if let Some(paused_at) = run.pause_started_at.take() {
            run.pause_accumulated += paused_at.elapsed();
        }
        run.state = RunState::Running;
        run.driver = Some(tokio::spawn(drive(Arc::downgrade(&self.inner))));
        self.inner.emit(SchedulerEvent::Resumed);
        drop(run);

        tracing::info!("schedule resumed");
        Ok(())
    }

    /// Stops the run and sends every controller its safe-state command.
    ///
    /// Stopping an idle or finished run does nothing.
    pub async fn stop(&self) -> Result<()> {
        let mut run = self.inner.run.lock().await;
        if !matches!(run.state, RunState::Running | RunState::Paused) {
            tracing::debug!("stop ignored, run is {:?}", run.state);
            return Ok(());
        }
        if let Some(driver) = run.driver.take() {
            driver.abort();
        }
        self.inner.send_safe_state();
        *run = Run {
            state: RunState::Stopped,
            ..Run::default()
        };
        drop(run);

        tracing::info!("schedule stopped");
        self.inner.emit(SchedulerEvent::Stopped);
        Ok(())
    }

    /// Returns a progress snapshot.
    pub async fn progress(&self) -> Progress {
        let run = self.inner.run.lock().await;
        Progress::compute(
            &self.inner.timeline,
            run.state,
            run.elapsed(Instant::now()),
            Local::now(),
        )
    }
}

/// Applies due steps until the run ends or is interrupted.
async fn drive(weak: Weak<SchedulerInner>) {
    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };

        let wait = {
            let mut run = inner.run.lock().await;
            if run.state != RunState::Running {
                return;
            }

            let now = Instant::now();
            let elapsed = run.elapsed(now);
            match inner.timeline.steps().get(run.index) {
                None => {
                    inner.complete(&mut run, now);
                    return;
                }
                Some(step) if elapsed >= step.offset => {
                    let index = run.index;
                    inner.apply_step(index, step.actions.as_slice()).await;
                    run.index += 1;
                    inner.emit(SchedulerEvent::StepApplied { index });
                    continue;
                }
                Some(step) => ((step.offset - elapsed) / 2).max(inner.config.min_tick),
            }
        };

        drop(inner);
        tokio::time::sleep(wait).await;
    }
}

impl SchedulerInner {
    fn emit(&self, event: SchedulerEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    async fn apply_step(&self, index: usize, actions: &[Action]) {
        let ready: Vec<&Arc<dyn Actuator>> =
            self.actuators.iter().filter(|a| a.is_ready()).collect();
        let snapshots = join_all(ready.iter().map(|a| a.snapshot())).await;

        let mut touched = Vec::new();
        for action in actions {
            let kind = action.device_kind();
            let Some(slot) = ready.iter().position(|a| a.device_kind() == kind) else {
                tracing::warn!("step {}: no connected {}, skipping {}", index, kind, action);
                continue;
            };

            if let Some(command) = command_for(action, &snapshots[slot]) {
                tracing::debug!("step {}: {} via `{}`", index, action, command);
                if let Err(e) = ready[slot].submit(command) {
                    tracing::warn!("step {}: {} not sent: {}", index, action, e);
                }
            } else {
                tracing::debug!("step {}: {} already satisfied or skipped", index, action);
            }
            if !touched.contains(&slot) {
                touched.push(slot);
            }
        }

        // A step due right after this one must see its effect.
        let refreshes = join_all(touched.iter().map(|&slot| ready[slot].refresh())).await;
        for result in refreshes {
            if let Err(e) = result {
                tracing::warn!("step {}: status query failed: {}", index, e);
            }
        }
        tracing::info!("step {} applied", index);
    }

    fn complete(&self, run: &mut Run, now: Instant) {
        let elapsed = run.elapsed(now).max(self.timeline.total_duration());
        run.finished = Some(elapsed);
        run.state = RunState::Completed;
        run.driver = None;

        self.send_safe_state();
        tracing::info!("schedule completed after {}", format_duration(elapsed));
        self.emit(SchedulerEvent::Completed);
    }

    fn send_safe_state(&self) {
        for actuator in self.actuators.iter().filter(|a| a.is_ready()) {
            let Some(command) = actuator.device_kind().safe_state_command() else {
                continue;
            };
            if let Err(e) = actuator.submit(command) {
                tracing::warn!("safe state for {} not sent: {}", actuator.device_kind(), e);
                continue;
            }
            if let Err(e) = actuator.submit(actuator.device_kind().status_query()) {
                tracing::warn!("status query for {} not sent: {}", actuator.device_kind(), e);
            }
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(driver) = self.run.get_mut().driver.take() {
            driver.abort();
        }
    }
}

/// The command that moves an actuator towards the target, if any is needed.
fn command_for(action: &Action, status: &DeviceStatus) -> Option<Command> {
    match action {
        Action::SetPower { pump, state } => match status.pump(*pump) {
            None => {
                tracing::warn!("pump {} is not configured, skipping {}", pump, action);
                None
            }
            Some(info) if info.power == *state => None,
            Some(_) => Some(Command::toggle_power(*pump)),
        },
        Action::SetDirection { valve, direction } => match status.pump(*valve) {
            None => {
                tracing::warn!("valve {} is not configured, skipping {}", valve, action);
                None
            }
            Some(info) if info.direction == *direction => None,
            Some(_) => Some(Command::toggle_direction(*valve)),
        },
        Action::GotoSlot(slot) => match status.slot_position(slot) {
            None => {
                tracing::warn!("unknown slot `{}`, skipping", slot);
                None
            }
            Some(position) if status.position == Some(position) => None,
            Some(_) => Some(Command::goto_slot(slot)),
        },
        Action::GotoPosition(position) => {
            if *position < 0 {
                tracing::warn!("negative position {}, skipping", position);
                None
            } else if status.position == Some(*position) {
                None
            } else {
                Some(Command::goto_position(*position))
            }
        }
    }
}
