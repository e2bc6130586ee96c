use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod envelope;
pub mod topic;

/// The four kinds of configuration commands a plant device accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Schedule,
    PlcSettings,
    PlcControl,
    Action,
}

impl CommandType {
    pub const ALL: [CommandType; 4] = [
        CommandType::Schedule,
        CommandType::PlcSettings,
        CommandType::PlcControl,
        CommandType::Action,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Schedule => "schedule",
            CommandType::PlcSettings => "plc_settings",
            CommandType::PlcControl => "plc_control",
            CommandType::Action => "action",
        }
    }

    /// Segment used in MQTT topic paths. Kebab-case on the wire, unlike
    /// the snake_case JSON representation.
    pub fn topic_suffix(&self) -> &'static str {
        match self {
            CommandType::Schedule => "schedule",
            CommandType::PlcSettings => "plc-settings",
            CommandType::PlcControl => "plc-control",
            CommandType::Action => "action",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "schedule" => Ok(CommandType::Schedule),
            "plc_settings" | "plc-settings" => Ok(CommandType::PlcSettings),
            "plc_control" | "plc-control" => Ok(CommandType::PlcControl),
            "action" => Ok(CommandType::Action),
            other => Err(format!("Unknown command type: {other}")),
        }
    }
}

/// Lifecycle state of a tracked command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Ok,
    Error,
    Timeout,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Ok => "ok",
            CommandStatus::Error => "error",
            CommandStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Pending)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status a device reports in a response envelope. Timeouts are synthesized
/// locally and never appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

impl From<ResponseStatus> for CommandStatus {
    fn from(status: ResponseStatus) -> Self {
        match status {
            ResponseStatus::Ok => CommandStatus::Ok,
            ResponseStatus::Error => CommandStatus::Error,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStatus::Ok => f.write_str("ok"),
            ResponseStatus::Error => f.write_str("error"),
        }
    }
}

/// Error detail in a device response. PLC firmware sends either a free-form
/// string or a bare integer code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Code(i64),
    Message(String),
}

impl ErrorDetail {
    /// Human-readable interpretation of the well-known negative codes.
    pub fn interpretation(&self) -> Option<&'static str> {
        match self {
            ErrorDetail::Code(-1) => Some("general error or command not recognized"),
            ErrorDetail::Code(-2) => Some("invalid format or parameters"),
            ErrorDetail::Code(-3) => Some("device busy or unable to process"),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetail::Code(code) => write!(f, "{code}"),
            ErrorDetail::Message(message) => f.write_str(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_type_round_trips_through_str() {
        for kind in CommandType::ALL {
            assert_eq!(kind.as_str().parse::<CommandType>(), Ok(kind));
        }
    }

    #[test]
    fn command_type_accepts_kebab_aliases() {
        assert_eq!("plc-settings".parse(), Ok(CommandType::PlcSettings));
        assert_eq!("plc-control".parse(), Ok(CommandType::PlcControl));
        assert!("reboot".parse::<CommandType>().is_err());
    }

    #[test]
    fn error_detail_parses_string_or_code() {
        let detail: ErrorDetail = serde_json::from_str("-2").expect("int detail");
        assert_eq!(detail, ErrorDetail::Code(-2));
        assert_eq!(detail.interpretation(), Some("invalid format or parameters"));

        let detail: ErrorDetail = serde_json::from_str("\"bad schedule\"").expect("string detail");
        assert_eq!(detail.to_string(), "bad schedule");
        assert_eq!(detail.interpretation(), None);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CommandStatus::Timeout).expect("serialize"),
            "\"timeout\""
        );
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(CommandStatus::Error.is_terminal());
    }
}
