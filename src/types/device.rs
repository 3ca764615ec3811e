//! Device kinds and the per-session status snapshot.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta};
use serde::{Serialize, Serializer};

use crate::protocol::Command;
use crate::types::autosampler::{SamplerDirection, sort_slot_names};
use crate::types::pump::PumpInfo;

/// The two controller firmwares the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceKind {
    /// Pump/valve controller.
    Pump,
    /// Slot-based autosampler.
    Autosampler,
}

impl DeviceKind {
    /// Marker the identification banner must contain.
    #[must_use]
    pub const fn identity_marker(self) -> &'static str {
        match self {
            Self::Pump => "Pico Pump Control Version",
            Self::Autosampler => "Pico Autosampler Control Version",
        }
    }

    /// Query that returns the full configuration block.
    #[must_use]
    pub fn configuration_query(self) -> Command {
        match self {
            Self::Pump => Command::pump_info(),
            Self::Autosampler => Command::autosampler_config(),
        }
    }

    /// Query that returns the current actuator state.
    #[must_use]
    pub fn status_query(self) -> Command {
        match self {
            Self::Pump => Command::pump_status(),
            Self::Autosampler => Command::autosampler_status(),
        }
    }

    /// Query that returns the controller's RTC time.
    #[must_use]
    pub fn rtc_query(self) -> Command {
        match self {
            Self::Pump => Command::pump_rtc_time(),
            Self::Autosampler => Command::autosampler_rtc_time(),
        }
    }

    /// Command that drives every actuator to its safe state, if any.
    #[must_use]
    pub fn safe_state_command(self) -> Option<Command> {
        match self {
            Self::Pump => Some(Command::shutdown()),
            Self::Autosampler => None,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pump => f.write_str("pump controller"),
            Self::Autosampler => f.write_str("autosampler"),
        }
    }
}

/// What the identification ping reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    /// Firmware family.
    pub kind: DeviceKind,
    /// Full banner line.
    pub banner: String,
    /// Version token after the marker, if present.
    pub version: Option<String>,
}

/// Live snapshot of one device session.
///
/// Owned by the session's `StatusStore`; callers only ever see clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    /// Which firmware this session talks to.
    pub kind: DeviceKind,
    /// Serial port name.
    pub port: String,
    /// When the session was created.
    pub created_at: DateTime<Local>,
    /// True once identification, time sync and initial queries completed.
    pub connected: bool,
    /// Version token from the identification banner.
    pub firmware_version: Option<String>,
    /// Last RTC time reported by the controller.
    pub rtc_time: Option<NaiveDateTime>,
    /// Controller RTC minus host clock at the time of the report.
    #[serde(rename = "rtc_offset_ms", serialize_with = "serialize_offset_ms")]
    pub rtc_offset: Option<TimeDelta>,
    /// Registered pumps by id (pump controller only).
    pub pumps: BTreeMap<u32, PumpInfo>,
    /// Slot names in display order (autosampler only).
    pub slots: Vec<String>,
    /// Slot name to carriage position (autosampler only).
    pub slot_positions: BTreeMap<String, i64>,
    /// Last known carriage position (autosampler only).
    pub position: Option<i64>,
    /// Last known carriage direction (autosampler only).
    pub direction: Option<SamplerDirection>,
}

impl DeviceStatus {
    /// Creates the disconnected defaults for a session.
    #[must_use]
    pub fn new(kind: DeviceKind, port: impl Into<String>) -> Self {
        Self {
            kind,
            port: port.into(),
            created_at: Local::now(),
            connected: false,
            firmware_version: None,
            rtc_time: None,
            rtc_offset: None,
            pumps: BTreeMap::new(),
            slots: Vec::new(),
            slot_positions: BTreeMap::new(),
            position: None,
            direction: None,
        }
    }

    /// Returns to disconnected defaults, keeping identity and creation time.
    pub fn reset(&mut self) {
        *self = Self {
            created_at: self.created_at,
            ..Self::new(self.kind, std::mem::take(&mut self.port))
        };
    }

    /// Looks up a pump by id.
    #[must_use]
    pub fn pump(&self, id: u32) -> Option<&PumpInfo> {
        self.pumps.get(&id)
    }

    /// Position configured for a slot.
    #[must_use]
    pub fn slot_position(&self, slot: &str) -> Option<i64> {
        self.slot_positions.get(slot).copied()
    }

    /// Replaces the slot configuration.
    pub fn set_slots(&mut self, positions: BTreeMap<String, i64>) {
        self.slots = sort_slot_names(positions.keys().cloned());
        self.slot_positions = positions;
    }
}

#[allow(clippy::ref_option)]
fn serialize_offset_ms<S: Serializer>(
    offset: &Option<TimeDelta>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match offset {
        Some(delta) => serializer.serialize_some(&delta.num_milliseconds()),
        None => serializer.serialize_none(),
    }
}
