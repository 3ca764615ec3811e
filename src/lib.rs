//! # picolab
//!
//! Async session engine and recipe scheduler for Pico-based laboratory
//! controllers: a pump/valve controller and a slot-based autosampler, both
//! speaking a line-oriented ASCII protocol over USB serial.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - One supervised session per controller, with identification and RTC sync
//! - Ordered command dispatch with request/reply correlation
//! - Typed status snapshots kept current by a response router
//! - A recipe scheduler with pause/resume and progress reporting
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use picolab::{
//!     Action, Actuator, DeviceSession, PowerState, RecipeStep, RecipeTimeline, Scheduler,
//!     SchedulerConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), picolab::Error> {
//!     let pumps = DeviceSession::pump("/dev/ttyACM0");
//!     let identity = pumps.connect().await?;
//!     println!("Connected to: {}", identity.banner);
//!
//!     let timeline = RecipeTimeline::new(vec![
//!         RecipeStep::new(Duration::ZERO, vec![Action::SetPower { pump: 1, state: PowerState::On }]),
//!         RecipeStep::new(Duration::from_secs(60), vec![Action::SetPower { pump: 1, state: PowerState::Off }]),
//!     ])?;
//!     let actuators: Vec<Arc<dyn Actuator>> = vec![Arc::new(pumps.clone())];
//!     let scheduler = Scheduler::new(timeline, actuators, SchedulerConfig::default());
//!     scheduler.start().await?;
//!
//!     tokio::time::sleep(Duration::from_secs(61)).await;
//!     println!("{:.0}% done", scheduler.progress().await.total_percent);
//!
//!     pumps.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Line codec, command builders, response tags and parsers
//! - [`types`] - Data structures (pumps, autosampler, device status)
//! - [`transport`] - Transport implementations (currently USB/Serial)
//! - [`event`] - Async event system for received lines and lifecycle changes
//! - [`dispatch`] - Ordered command queue with reply correlation
//! - [`status`] - Shared per-session status store
//! - [`session`] - High-level [`DeviceSession`] per controller
//! - [`scheduler`] - Recipe timelines and the [`Scheduler`]

pub mod dispatch;
pub mod error;
pub mod event;
pub mod protocol;
mod router;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use dispatch::CommandQueue;
pub use error::{Error, LineError, ParseError, Result};
pub use event::{Event, EventDispatcher, Subscription};
pub use protocol::{Command, ResponseTag};
pub use scheduler::{
    Action, Actuator, Progress, RecipeRow, RecipeStep, RecipeTimeline, RunState, Scheduler,
    SchedulerConfig, SchedulerEvent, StepProgress, Target, format_duration,
};
pub use session::{DeviceSession, SessionConfig, SessionState};
pub use status::StatusStore;
pub use transport::{SerialConfig, SerialTransport, Transport};
pub use types::{
    DeviceIdentity, DeviceKind, DeviceStatus, Direction, MoveReport, PowerState, PumpInfo,
    PumpRegistration, PumpState, SamplerDirection, SamplerState,
};
