//! Command lines sent to the controllers.
//!
//! Commands are `<target>:<verb>[:<arg>...]`, target `0` addressing the whole
//! controller. Autosampler firmware takes its own verbs without a target;
//! only the shared handshake (`0:ping`, `0:stime`) is prefixed there.

use std::fmt;

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::types::{PumpRegistration, SamplerDirection};

/// Target id addressing the whole controller.
pub const CONTROLLER_TARGET: u32 = 0;

/// Keyword carried by every successful pump operation reply.
pub const SUCCESS_KEYWORD: &str = "Success";

/// A command line plus the keyword that identifies its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    expected_keyword: Option<String>,
}

impl Command {
    /// Creates a command that expects no particular reply.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            expected_keyword: None,
        }
    }

    /// Sets the keyword a reply line must contain.
    #[must_use]
    pub fn expecting(mut self, keyword: impl Into<String>) -> Self {
        self.expected_keyword = Some(keyword.into());
        self
    }

    /// Line text, without terminator.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Keyword a reply must contain, if the command has a reply.
    #[must_use]
    pub fn expected_keyword(&self) -> Option<&str> {
        self.expected_keyword.as_deref()
    }

    /// True if `line` answers this command.
    #[must_use]
    pub fn is_reply(&self, line: &str) -> bool {
        self.expected_keyword
            .as_deref()
            .is_some_and(|keyword| line.contains(keyword))
    }

    /// True for RTC chatter that is logged at trace level only.
    #[must_use]
    pub fn is_rtc_poll(&self) -> bool {
        self.text == "time" || self.text == "0:time"
    }

    // Handshake

    /// Identification ping.
    #[must_use]
    pub fn ping() -> Self {
        Self::new("0:ping")
    }

    /// RTC synchronisation to the given host local time.
    #[must_use]
    pub fn sync_time(now: NaiveDateTime) -> Self {
        Self::new(format!(
            "0:stime:{}:{}:{}:{}:{}:{}",
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second()
        ))
    }

    // Pump controller

    /// Full pump configuration query.
    #[must_use]
    pub fn pump_info() -> Self {
        Self::new("0:info").expecting("Info:")
    }

    /// Pump state query.
    #[must_use]
    pub fn pump_status() -> Self {
        Self::new("0:st").expecting("Status:")
    }

    /// Pump controller RTC query.
    #[must_use]
    pub fn pump_rtc_time() -> Self {
        Self::new("0:time").expecting("RTC Time")
    }

    /// Toggles pump power.
    #[must_use]
    pub fn toggle_power(pump: u32) -> Self {
        Self::new(format!("{pump}:pw")).expecting(SUCCESS_KEYWORD)
    }

    /// Toggles valve direction.
    #[must_use]
    pub fn toggle_direction(pump: u32) -> Self {
        Self::new(format!("{pump}:di")).expecting(SUCCESS_KEYWORD)
    }

    /// Registers (or re-registers) a pump.
    #[must_use]
    pub fn register_pump(reg: &PumpRegistration) -> Self {
        Self::new(format!(
            "{}:reg:{}:{}:{}:{}:{}:{}",
            reg.id,
            reg.power_pin,
            reg.direction_pin,
            reg.initial_power_value,
            reg.initial_direction_value,
            reg.initial_power,
            reg.initial_direction
        ))
        .expecting(SUCCESS_KEYWORD)
    }

    /// Removes a pump; id 0 clears every pump.
    #[must_use]
    pub fn remove_pump(pump: u32) -> Self {
        Self::new(format!("{pump}:clr")).expecting(SUCCESS_KEYWORD)
    }

    /// Persists the configuration of a pump; id 0 saves all.
    #[must_use]
    pub fn save_config(pump: u32) -> Self {
        Self::new(format!("{pump}:save")).expecting(SUCCESS_KEYWORD)
    }

    /// Drives every pump to its safe state.
    #[must_use]
    pub fn shutdown() -> Self {
        Self::new(format!("{CONTROLLER_TARGET}:shutdown")).expecting(SUCCESS_KEYWORD)
    }

    /// Resets the controller.
    #[must_use]
    pub fn reset() -> Self {
        Self::new(format!("{CONTROLLER_TARGET}:reset")).expecting(SUCCESS_KEYWORD)
    }

    // Autosampler

    /// Slot configuration query.
    #[must_use]
    pub fn autosampler_config() -> Self {
        Self::new("config").expecting("Autosampler Configuration")
    }

    /// Carriage state query.
    #[must_use]
    pub fn autosampler_status() -> Self {
        Self::new("status").expecting("Autosampler Status")
    }

    /// Autosampler RTC query.
    #[must_use]
    pub fn autosampler_rtc_time() -> Self {
        Self::new("time").expecting("RTC Time")
    }

    /// Moves the carriage to an absolute position.
    #[must_use]
    pub fn goto_position(position: i64) -> Self {
        Self::new(format!("position:{position}"))
    }

    /// Moves the carriage to a named slot.
    #[must_use]
    pub fn goto_slot(slot: &str) -> Self {
        Self::new(format!("slot:{slot}"))
    }

    /// Adds (or moves) a named slot.
    #[must_use]
    pub fn add_slot(slot: &str, position: i64) -> Self {
        Self::new(format!("addslot:{slot}:{position}"))
    }

    /// Removes a named slot.
    #[must_use]
    pub fn remove_slot(slot: &str) -> Self {
        Self::new(format!("removeslot:{slot}"))
    }

    /// Moves the carriage in a direction.
    #[must_use]
    pub fn move_direction(direction: SamplerDirection) -> Self {
        Self::new(format!("move:{}", direction.as_verb_arg()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
