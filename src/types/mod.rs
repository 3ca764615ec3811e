//! Data types for picolab entities.
//!
//! This module contains the core data structures used throughout the library:
//! - Device kinds and the per-session status snapshot
//! - Pump/valve configuration and state
//! - Autosampler slots, direction and move reports

pub mod autosampler;
pub mod device;
pub mod pump;

pub use autosampler::{MoveReport, SamplerDirection, SamplerState, sort_slot_names};
pub use device::{DeviceIdentity, DeviceKind, DeviceStatus};
pub use pump::{Direction, PowerState, PumpInfo, PumpRegistration, PumpState};
