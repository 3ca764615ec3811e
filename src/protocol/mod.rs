//! Protocol definitions for the controller serial link.
//!
//! This module contains the line-level protocol pieces:
//! - Line framing
//! - Command builders
//! - Response classification
//! - Text response parsing

pub mod command;
pub mod line;
pub mod parser;
pub mod response;

pub use command::{CONTROLLER_TARGET, Command, SUCCESS_KEYWORD};
pub use line::{LineDecoder, MAX_LINE_LEN, encode as encode_line};
pub use parser::{
    parse_autosampler_config, parse_autosampler_status, parse_identity, parse_move_report,
    parse_pump_info, parse_pump_status, parse_rtc_time,
};
pub use response::ResponseTag;
