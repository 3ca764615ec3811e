//! Recipe timelines.
//!
//! A timeline is a list of steps at strictly increasing offsets from the run
//! start. Each step sets target states for some actuators; an actuator
//! appears at most once per step.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{DeviceKind, Direction, PowerState};

/// Header of the time column in recipe rows, in minutes.
pub const TIME_COLUMN: &str = "Time point (min)";

const PUMP_PREFIX: &str = "Pump";
const VALVE_PREFIX: &str = "Valve";
const SLOT_PREFIX: &str = "Autosampler_slot";
const POSITION_PREFIX: &str = "Autosampler_position";

/// The actuator an action drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Power of pump `id`.
    Pump(u32),
    /// Valve (direction pin) of pump `id`.
    Valve(u32),
    /// The autosampler carriage.
    Autosampler,
}

/// Target state for one actuator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Switch a pump on or off.
    SetPower { pump: u32, state: PowerState },
    /// Set a valve direction.
    SetDirection { valve: u32, direction: Direction },
    /// Move the autosampler to a named slot.
    GotoSlot(String),
    /// Move the autosampler to an absolute position.
    GotoPosition(i64),
}

impl Action {
    /// Returns the actuator this action drives.
    #[must_use]
    pub const fn target(&self) -> Target {
        match self {
            Self::SetPower { pump, .. } => Target::Pump(*pump),
            Self::SetDirection { valve, .. } => Target::Valve(*valve),
            Self::GotoSlot(_) | Self::GotoPosition(_) => Target::Autosampler,
        }
    }

    /// Returns the kind of controller that executes this action.
    #[must_use]
    pub const fn device_kind(&self) -> DeviceKind {
        match self {
            Self::SetPower { .. } | Self::SetDirection { .. } => DeviceKind::Pump,
            Self::GotoSlot(_) | Self::GotoPosition(_) => DeviceKind::Autosampler,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetPower { pump, state } => write!(f, "Pump{pump}={state}"),
            Self::SetDirection { valve, direction } => write!(f, "Valve{valve}={direction}"),
            Self::GotoSlot(slot) => write!(f, "slot {slot}"),
            Self::GotoPosition(position) => write!(f, "position {position}"),
        }
    }
}

/// Actions to apply once `offset` of active time has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeStep {
    /// Offset from the run start.
    pub offset: Duration,
    /// Target states, one per actuator.
    pub actions: Vec<Action>,
}

impl RecipeStep {
    /// Creates a step.
    #[must_use]
    pub const fn new(offset: Duration, actions: Vec<Action>) -> Self {
        Self { offset, actions }
    }
}

/// One row of a recipe table: `(column header, cell)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeRow {
    /// Cells in column order.
    pub cells: Vec<(String, String)>,
}

impl RecipeRow {
    /// Creates a row from header/cell pairs.
    pub fn new<I, K, V>(cells: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            cells: cells
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    fn time_minutes(&self, row: usize) -> Result<f64> {
        let cell = self
            .cells
            .iter()
            .find(|(header, _)| is_time_column(header))
            .map(|(_, cell)| cell.trim())
            .ok_or_else(|| invalid(format!("row {row} has no `{TIME_COLUMN}` column")))?;

        let minutes: f64 = cell
            .parse()
            .map_err(|_| invalid(format!("row {row}: time `{cell}` is not a number")))?;
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(invalid(format!(
                "row {row}: time {minutes} must be finite and non-negative"
            )));
        }
        Ok(minutes)
    }

    fn actions(&self, row: usize) -> Result<Vec<Action>> {
        let mut actions = Vec::new();
        for (header, cell) in &self.cells {
            let header = header.trim();
            let cell = cell.trim();
            if cell.is_empty() || is_time_column(header) {
                continue;
            }

            let action = if let Some(id) = numbered(header, PUMP_PREFIX) {
                let state = cell
                    .parse()
                    .map_err(|e| invalid(format!("row {row}, {header}: {e}")))?;
                Action::SetPower { pump: id, state }
            } else if let Some(id) = numbered(header, VALVE_PREFIX) {
                let direction = cell
                    .parse()
                    .map_err(|e| invalid(format!("row {row}, {header}: {e}")))?;
                Action::SetDirection {
                    valve: id,
                    direction,
                }
            } else if header.starts_with(SLOT_PREFIX) {
                Action::GotoSlot(cell.to_string())
            } else if header.starts_with(POSITION_PREFIX) {
                let position = cell
                    .parse()
                    .map_err(|_| invalid(format!("row {row}, {header}: `{cell}` is not an integer")))?;
                Action::GotoPosition(position)
            } else {
                tracing::trace!("recipe column `{}` ignored", header);
                continue;
            };
            actions.push(action);
        }
        Ok(actions)
    }
}

fn is_time_column(header: &str) -> bool {
    let header = header.trim();
    header.eq_ignore_ascii_case(TIME_COLUMN) || header.eq_ignore_ascii_case("Time (min)")
}

/// Parses `<prefix><id>` headers such as `Pump3`.
fn numbered(header: &str, prefix: &str) -> Option<u32> {
    header.strip_prefix(prefix)?.trim().parse().ok()
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidTimeline {
        reason: reason.into(),
    }
}

/// Validated, ordered list of recipe steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeTimeline {
    steps: Vec<RecipeStep>,
}

impl RecipeTimeline {
    /// Validates and wraps a list of steps.
    ///
    /// # Errors
    ///
    /// `InvalidTimeline` when the list is empty, offsets are not strictly
    /// increasing, or a step targets one actuator twice.
    pub fn new(steps: Vec<RecipeStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(invalid("timeline has no steps"));
        }

        for (index, pair) in steps.windows(2).enumerate() {
            if pair[1].offset <= pair[0].offset {
                return Err(invalid(format!(
                    "step {} at {:?} does not come after step {} at {:?}",
                    index + 1,
                    pair[1].offset,
                    index,
                    pair[0].offset
                )));
            }
        }

        for (index, step) in steps.iter().enumerate() {
            let mut seen = HashSet::new();
            for action in &step.actions {
                if !seen.insert(action.target()) {
                    return Err(invalid(format!(
                        "step {index} targets {:?} more than once",
                        action.target()
                    )));
                }
            }
        }

        Ok(Self { steps })
    }

    /// Builds a timeline from recipe table rows.
    ///
    /// Rows need a `Time point (min)` cell. `Pump<id>` (ON/OFF),
    /// `Valve<id>` (CW/CCW), `Autosampler_slot*` (slot name) and
    /// `Autosampler_position*` (integer) cells become actions; blank cells
    /// and other columns are ignored.
    pub fn from_rows(rows: &[RecipeRow]) -> Result<Self> {
        let mut steps = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let minutes = row.time_minutes(index)?;
            let offset = Duration::try_from_secs_f64(minutes * 60.0)
                .map_err(|e| invalid(format!("row {index}: time {minutes} min: {e}")))?;
            steps.push(RecipeStep::new(offset, row.actions(index)?));
        }
        Self::new(steps)
    }

    /// Returns the steps in order.
    #[must_use]
    pub fn steps(&self) -> &[RecipeStep] {
        &self.steps
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// A validated timeline is never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the offset of the last step.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.steps.last().map_or(Duration::ZERO, |step| step.offset)
    }

    /// Returns the controller kinds the timeline needs.
    #[must_use]
    pub fn device_kinds(&self) -> Vec<DeviceKind> {
        let mut kinds = Vec::new();
        for action in self.steps.iter().flat_map(|step| &step.actions) {
            let kind = action.device_kind();
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }
}
