//! Pump and valve types.
//!
//! A pump controller drives each actuator through two pins: a power pin
//! (pump on/off) and a direction pin (valve CW/CCW).

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ParseError;

/// Power state of a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PowerState {
    /// Pump running.
    #[serde(rename = "ON")]
    On,
    /// Pump stopped.
    #[serde(rename = "OFF")]
    Off,
}

impl PowerState {
    /// Wire representation (`ON`/`OFF`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    /// The state a power toggle leads to.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }
}

impl FromStr for PowerState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" => Ok(Self::On),
            "OFF" => Ok(Self::Off),
            other => Err(ParseError::grammar(
                "power state",
                format!("expected ON or OFF, got `{other}`"),
            )),
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction (valve position) of a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Clockwise.
    #[serde(rename = "CW")]
    Cw,
    /// Counter-clockwise.
    #[serde(rename = "CCW")]
    Ccw,
}

impl Direction {
    /// Wire representation (`CW`/`CCW`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cw => "CW",
            Self::Ccw => "CCW",
        }
    }

    /// The direction a direction toggle leads to.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Cw => Self::Ccw,
            Self::Ccw => Self::Cw,
        }
    }
}

impl FromStr for Direction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CW" => Ok(Self::Cw),
            "CCW" => Ok(Self::Ccw),
            other => Err(ParseError::grammar(
                "direction",
                format!("expected CW or CCW, got `{other}`"),
            )),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration and current state of one pump, as reported by `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PumpInfo {
    /// GPIO driving the pump power.
    pub power_pin: i32,
    /// GPIO driving the valve direction.
    pub direction_pin: i32,
    /// Pin level that corresponds to the initial power state.
    pub initial_power_value: u8,
    /// Pin level that corresponds to the initial direction.
    pub initial_direction_value: u8,
    /// Current power state.
    pub power: PowerState,
    /// Current direction.
    pub direction: Direction,
}

/// Per-pump state carried by a `Status` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PumpState {
    /// Current power state.
    pub power: PowerState,
    /// Current direction.
    pub direction: Direction,
}

/// Parameters for registering a pump on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpRegistration {
    /// Pump id (1-based; 0 addresses the whole controller).
    pub id: u32,
    /// GPIO driving the pump power.
    pub power_pin: i32,
    /// GPIO driving the valve direction.
    pub direction_pin: i32,
    /// Pin level for the initial power state.
    pub initial_power_value: u8,
    /// Pin level for the initial direction.
    pub initial_direction_value: u8,
    /// Power state after registration.
    pub initial_power: PowerState,
    /// Direction after registration.
    pub initial_direction: Direction,
}

impl PumpRegistration {
    /// The info entry the controller is expected to report once registered.
    #[must_use]
    pub const fn to_info(&self) -> PumpInfo {
        PumpInfo {
            power_pin: self.power_pin,
            direction_pin: self.direction_pin,
            initial_power_value: self.initial_power_value,
            initial_direction_value: self.initial_direction_value,
            power: self.initial_power,
            direction: self.initial_direction,
        }
    }
}
