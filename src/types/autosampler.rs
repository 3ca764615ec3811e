//! Autosampler types.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ParseError;

/// Direction of the autosampler carriage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SamplerDirection {
    /// Moving (or last moved) left.
    Left,
    /// Moving (or last moved) right.
    Right,
}

impl SamplerDirection {
    /// Lower-case form used by the `move:` verb.
    #[must_use]
    pub const fn as_verb_arg(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl FromStr for SamplerDirection {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(ParseError::grammar(
                "autosampler direction",
                format!("expected Left or Right, got `{other}`"),
            )),
        }
    }
}

impl fmt::Display for SamplerDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => f.write_str("Left"),
            Self::Right => f.write_str("Right"),
        }
    }
}

/// Carriage state carried by an `Autosampler Status` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SamplerState {
    /// Absolute carriage position.
    pub position: i64,
    /// Last direction of travel.
    pub direction: SamplerDirection,
}

/// Report emitted after the carriage finished moving.
///
/// Wire form: `Info: moved to position 1000 in 0.004037 seconds. relative position: 0`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoveReport {
    /// Absolute position reached.
    pub position: i64,
    /// Time the move took, in seconds.
    pub seconds: f64,
    /// Position relative to the requested target.
    pub relative_position: i64,
}

/// Sorts slot names numerically first, then case-insensitively.
///
/// `["10", "B", "2", "a"]` becomes `["2", "10", "a", "B"]`.
#[must_use]
pub fn sort_slot_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut names: Vec<String> = names.into_iter().collect();
    names.sort_by(|a, b| compare_slot_names(a, b));
    names
}

fn compare_slot_names(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}
