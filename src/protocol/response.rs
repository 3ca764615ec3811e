//! Response line classification.
//!
//! Every line read from a controller gets exactly one tag. Tags are tried in
//! order of precedence (configuration, status, RTC time, success, error,
//! identity) and the first match wins.

/// Tag assigned to a received line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseTag {
    /// `Autosampler Configuration: {...}`.
    AutosamplerConfig,
    /// One or more `Pump<id> Info: ...` blocks.
    PumpInfo,
    /// `Autosampler Status: position: <n>, direction: Left|Right`.
    AutosamplerStatus,
    /// One or more `Pump<id> Status: ...` blocks.
    PumpStatus,
    /// `Info: moved to position <n> in <s> seconds. relative position: <n>`.
    MoveReport,
    /// `RTC Time: Y-M-D h:m:s`.
    RtcTime,
    /// Free-text success acknowledgement.
    Success,
    /// Free-text firmware error.
    Error,
    /// Identification banner.
    Identity,
    /// Anything else.
    Unknown,
}

impl ResponseTag {
    /// Classifies a trimmed line.
    #[must_use]
    pub fn classify(line: &str) -> Self {
        if line.contains("Autosampler Configuration:") {
            Self::AutosamplerConfig
        } else if line.starts_with("Pump") && line.contains("Info:") {
            Self::PumpInfo
        } else if line.contains("Autosampler Status") {
            Self::AutosamplerStatus
        } else if line.starts_with("Pump") && line.contains("Status:") {
            Self::PumpStatus
        } else if line.contains("moved to position") {
            Self::MoveReport
        } else if line.contains("RTC Time") {
            Self::RtcTime
        } else if line.contains("Success") {
            Self::Success
        } else if line.contains("Error") {
            Self::Error
        } else if line.contains("Control Version") {
            Self::Identity
        } else {
            Self::Unknown
        }
    }

    /// Short name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AutosamplerConfig => "autosampler configuration",
            Self::PumpInfo => "pump info",
            Self::AutosamplerStatus => "autosampler status",
            Self::PumpStatus => "pump status",
            Self::MoveReport => "move report",
            Self::RtcTime => "RTC time",
            Self::Success => "success",
            Self::Error => "error",
            Self::Identity => "identity",
            Self::Unknown => "unknown",
        }
    }
}
