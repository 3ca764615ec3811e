//! Text parsers for controller responses.
//!
//! One pure function per response tag. Parsers never touch session state;
//! a multi-block line either parses completely or yields an error.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDateTime;

use crate::error::ParseError;
use crate::types::{
    DeviceIdentity, DeviceKind, Direction, MoveReport, PowerState, PumpInfo, PumpState,
    SamplerDirection, SamplerState,
};

/// Timestamp layout of `RTC Time:` lines. Fields need no zero padding.
pub const RTC_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Cursor over a response line.
struct Scanner<'a> {
    tag: &'static str,
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    const fn new(tag: &'static str, text: &'a str) -> Self {
        Self { tag, rest: text }
    }

    fn error(&self, expected: &str) -> ParseError {
        let near: String = self.rest.chars().take(24).collect();
        ParseError::grammar(self.tag, format!("expected {expected} at `{near}`"))
    }

    /// Consumes `lit`, ignoring whitespace before it.
    fn literal(&mut self, lit: &str) -> Result<(), ParseError> {
        let trimmed = self.rest.trim_start();
        match trimmed.strip_prefix(lit) {
            Some(rest) => {
                self.rest = rest;
                Ok(())
            }
            None => Err(self.error(&format!("`{lit}`"))),
        }
    }

    fn take_while(&mut self, accept: impl Fn(usize, char) -> bool) -> &'a str {
        self.rest = self.rest.trim_start();
        let end = self
            .rest
            .char_indices()
            .find(|&(i, c)| !accept(i, c))
            .map_or(self.rest.len(), |(i, _)| i);
        let (token, rest) = self.rest.split_at(end);
        self.rest = rest;
        token
    }

    /// Consumes an optionally signed integer.
    fn integer<T: FromStr>(&mut self) -> Result<T, ParseError> {
        let token = self.take_while(|i, c| c.is_ascii_digit() || (i == 0 && c == '-'));
        token.parse().map_err(|_| self.error("an integer"))
    }

    /// Consumes an unsigned decimal number.
    fn decimal(&mut self) -> Result<f64, ParseError> {
        let token = self.take_while(|_, c| c.is_ascii_digit() || c == '.');
        token.parse().map_err(|_| self.error("a decimal number"))
    }

    /// Consumes an alphabetic word and parses it.
    fn word<T: FromStr<Err = ParseError>>(&mut self) -> Result<T, ParseError> {
        let token = self.take_while(|_, c| c.is_ascii_alphabetic());
        token.parse()
    }
}

/// Splits a line into `Pump<id> <label>` blocks.
fn pump_blocks<'a>(line: &'a str, label: &str) -> Vec<&'a str> {
    let is_block_start = |at: usize| {
        let Some(after) = line[at..].strip_prefix("Pump") else {
            return false;
        };
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        digits > 0 && after[digits..].trim_start().starts_with(label)
    };

    let starts: Vec<usize> = line
        .match_indices("Pump")
        .map(|(i, _)| i)
        .filter(|&i| is_block_start(i))
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(line.len());
            &line[start..end]
        })
        .collect()
}

/// Text following `marker`, if the marker is present.
fn after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|i| &line[i + marker.len()..])
}

/// Parses an identification banner for the given firmware.
///
/// Returns `None` when the banner lacks the firmware's identity marker.
#[must_use]
pub fn parse_identity(line: &str, kind: DeviceKind) -> Option<DeviceIdentity> {
    let rest = after(line, kind.identity_marker())?;
    let version = rest.split_whitespace().next().map(str::to_string);
    Some(DeviceIdentity {
        kind,
        banner: line.trim().to_string(),
        version,
    })
}

/// Parses a full pump configuration line.
///
/// A line without any block (`Pump Info: none`) means no pump is registered.
///
/// Format (one or more blocks):
/// ```text
/// Pump1 Info: Power Pin: 2, Direction Pin: 3, Initial Power Pin Value: 0,
/// Initial Direction Pin Value: 0, Current Power Status: OFF, Current Direction Status: CW
/// ```
pub fn parse_pump_info(line: &str) -> Result<BTreeMap<u32, PumpInfo>, ParseError> {
    const TAG: &str = "pump info";

    let mut pumps = BTreeMap::new();
    for block in pump_blocks(line, "Info:") {
        let mut s = Scanner::new(TAG, block);
        s.literal("Pump")?;
        let id = s.integer()?;
        s.literal("Info:")?;
        s.literal("Power Pin:")?;
        let power_pin = s.integer()?;
        s.literal(",")?;
        s.literal("Direction Pin:")?;
        let direction_pin = s.integer()?;
        s.literal(",")?;
        s.literal("Initial Power Pin Value:")?;
        let initial_power_value = s.integer()?;
        s.literal(",")?;
        s.literal("Initial Direction Pin Value:")?;
        let initial_direction_value = s.integer()?;
        s.literal(",")?;
        s.literal("Current Power Status:")?;
        let power: PowerState = s.word()?;
        s.literal(",")?;
        s.literal("Current Direction Status:")?;
        let direction: Direction = s.word()?;

        pumps.insert(
            id,
            PumpInfo {
                power_pin,
                direction_pin,
                initial_power_value,
                initial_direction_value,
                power,
                direction,
            },
        );
    }
    Ok(pumps)
}

/// Parses a pump state line.
///
/// Format (one or more blocks): `Pump1 Status: Power: ON, Direction: CW`
pub fn parse_pump_status(line: &str) -> Result<BTreeMap<u32, PumpState>, ParseError> {
    const TAG: &str = "pump status";

    let mut states = BTreeMap::new();
    for block in pump_blocks(line, "Status:") {
        let mut s = Scanner::new(TAG, block);
        s.literal("Pump")?;
        let id = s.integer()?;
        s.literal("Status:")?;
        s.literal("Power:")?;
        let power = s.word()?;
        s.literal(",")?;
        s.literal("Direction:")?;
        let direction = s.word()?;
        states.insert(id, PumpState { power, direction });
    }
    Ok(states)
}

/// Parses an `RTC Time: Y-M-D h:m:s` line.
pub fn parse_rtc_time(line: &str) -> Result<NaiveDateTime, ParseError> {
    let rest = after(line, "RTC Time:")
        .ok_or_else(|| ParseError::grammar("RTC time", "missing `RTC Time:`"))?;
    let stamp: Vec<&str> = rest.split_whitespace().take(2).collect();
    Ok(NaiveDateTime::parse_from_str(
        &stamp.join(" "),
        RTC_TIME_FORMAT,
    )?)
}

/// Parses the slot map of an `Autosampler Configuration: {...}` line.
pub fn parse_autosampler_config(line: &str) -> Result<BTreeMap<String, i64>, ParseError> {
    let rest = after(line, "Autosampler Configuration:").ok_or_else(|| {
        ParseError::grammar(
            "autosampler configuration",
            "missing `Autosampler Configuration:`",
        )
    })?;
    Ok(serde_json::from_str(rest.trim())?)
}

/// Parses an `Autosampler Status: position: <n>, direction: Left|Right` line.
pub fn parse_autosampler_status(line: &str) -> Result<SamplerState, ParseError> {
    const TAG: &str = "autosampler status";

    let rest =
        after(line, "position:").ok_or_else(|| ParseError::grammar(TAG, "missing `position:`"))?;
    let mut s = Scanner::new(TAG, rest);
    let position = s.integer()?;
    s.literal(",")?;
    s.literal("direction:")?;
    let direction: SamplerDirection = s.word()?;
    Ok(SamplerState {
        position,
        direction,
    })
}

/// Parses a carriage move report.
///
/// Format: `Info: moved to position 1000 in 0.004037 seconds. relative position: 0`
pub fn parse_move_report(line: &str) -> Result<MoveReport, ParseError> {
    const TAG: &str = "move report";

    let rest = after(line, "moved to position")
        .ok_or_else(|| ParseError::grammar(TAG, "missing `moved to position`"))?;
    let mut s = Scanner::new(TAG, rest);
    let position = s.integer()?;
    s.literal("in")?;
    let seconds = s.decimal()?;
    s.literal("seconds.")?;
    s.literal("relative position:")?;
    let relative_position = s.integer()?;
    Ok(MoveReport {
        position,
        seconds,
        relative_position,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    const TWO_PUMPS: &str = "Pump1 Info: Power Pin: 2, Direction Pin: 3, \
        Initial Power Pin Value: 0, Initial Direction Pin Value: 1, \
        Current Power Status: OFF, Current Direction Status: CW, \
        Pump2 Info: Power Pin: 4, Direction Pin: -1, \
        Initial Power Pin Value: 1, Initial Direction Pin Value: 0, \
        Current Power Status: ON, Current Direction Status: CCW";

    #[test]
    fn test_parse_identity() {
        let id = parse_identity("Pico Pump Control Version 2.1", DeviceKind::Pump).unwrap();
        assert_eq!(id.version.as_deref(), Some("2.1"));
        assert!(parse_identity("Pico Pump Control Version 2.1", DeviceKind::Autosampler).is_none());
        assert!(parse_identity("garbage", DeviceKind::Pump).is_none());
    }

    #[test]
    fn test_parse_pump_info_multi_block() {
        let pumps = parse_pump_info(TWO_PUMPS).unwrap();
        assert_eq!(pumps.len(), 2);
        assert_eq!(pumps[&1].power_pin, 2);
        assert_eq!(pumps[&1].initial_direction_value, 1);
        assert_eq!(pumps[&1].power, PowerState::Off);
        assert_eq!(pumps[&2].direction_pin, -1);
        assert_eq!(pumps[&2].direction, Direction::Ccw);
    }

    #[test]
    fn test_parse_pump_info_all_or_nothing() {
        let broken = TWO_PUMPS.replace("Current Power Status: ON", "Current Power Status: MAYBE");
        assert!(parse_pump_info(&broken).is_err());
        assert!(parse_pump_info("Pump Info: none").unwrap().is_empty());
    }

    #[test]
    fn test_parse_pump_status() {
        let states = parse_pump_status(
            "Pump1 Status: Power: ON, Direction: CW, Pump3 Status: Power: OFF, Direction: CCW",
        )
        .unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[&1].power, PowerState::On);
        assert_eq!(states[&3].direction, Direction::Ccw);
    }

    #[test]
    fn test_parse_rtc_time_unpadded() {
        let t = parse_rtc_time("RTC Time: 2024-9-6 1:7:39").unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2024, 9, 6));
        assert_eq!((t.hour(), t.minute(), t.second()), (1, 7, 39));
        assert!(parse_rtc_time("RTC Time: yesterday").is_err());
    }

    #[test]
    fn test_parse_autosampler_config() {
        let slots =
            parse_autosampler_config(r#"Autosampler Configuration: {"1": 100, "waste": 0}"#)
                .unwrap();
        assert_eq!(slots["1"], 100);
        assert_eq!(slots["waste"], 0);
        assert!(matches!(
            parse_autosampler_config("Autosampler Configuration: {oops"),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn test_parse_autosampler_status() {
        let state =
            parse_autosampler_status("Autosampler Status: position:  1200,  direction: Right")
                .unwrap();
        assert_eq!(state.position, 1200);
        assert_eq!(state.direction, SamplerDirection::Right);
        assert!(parse_autosampler_status("Autosampler Status: position: x").is_err());
    }

    #[test]
    fn test_parse_move_report() {
        let report = parse_move_report(
            "Info: moved to position 1000 in 0.004037 seconds. relative position: 0",
        )
        .unwrap();
        assert_eq!(report.position, 1000);
        assert!((report.seconds - 0.004_037).abs() < f64::EPSILON);
        assert_eq!(report.relative_position, 0);
        assert!(parse_move_report("Info: moved to position fast").is_err());
    }
}
