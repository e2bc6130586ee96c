//! JSON envelopes exchanged with plant devices and with API clients.
//!
//! Every cloud-to-site envelope carries a freshly generated `message_id`;
//! the site-to-cloud response echoes it back so the dispatch layer can
//! correlate the two without any broker-level request/response support.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{CommandStatus, CommandType, ErrorDetail, ResponseStatus};

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// One row of a charging schedule, as sent to the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    pub rec_no: i64,
    pub start_time: NaiveTime,
    pub charge_from_grid: bool,
    pub allow_to_sell: bool,
    pub charge_power: f64,
    pub charge_limit: f64,
    pub discharge_power: f64,
    pub source: i64,
}

/// Payload for the `cmd/cloud-to-site/{plant_id}/schedule` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleCommand {
    pub message_id: String,
    pub plant_id: i64,
    pub date: NaiveDate,
    pub schedule: Vec<ScheduleEntry>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl ScheduleCommand {
    pub fn new(
        plant_id: i64,
        date: NaiveDate,
        schedule: Vec<ScheduleEntry>,
        updated_by: Option<String>,
    ) -> Self {
        Self {
            message_id: new_message_id(),
            plant_id,
            date,
            schedule,
            updated_by,
        }
    }
}

/// A single register update: which data point, and its new value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingUpdate {
    pub data_id: i64,
    pub data: Option<f64>,
}

/// Payload for the `plc-settings` and `plc-control` command topics. Both
/// carry the same shape; only the topic differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsCommand {
    pub message_id: String,
    pub plant_id: i64,
    pub settings: Vec<SettingUpdate>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl SettingsCommand {
    pub fn new(plant_id: i64, settings: Vec<SettingUpdate>, updated_by: Option<String>) -> Self {
        Self {
            message_id: new_message_id(),
            plant_id,
            settings,
            updated_by,
        }
    }
}

/// Instant actions a device executes immediately rather than persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RebootDevice,
    SetChargePower,
}

/// Payload for the `cmd/cloud-to-site/{plant_id}/action` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCommand {
    pub message_id: String,
    pub command: ActionKind,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl ActionCommand {
    pub fn new(command: ActionKind, payload: Value) -> Self {
        Self {
            message_id: new_message_id(),
            command,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Ack/error reply published by a device on a `status/site-to-cloud` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub message_id: String,
    pub status: ResponseStatus,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

/// Message pushed to WebSocket clients when a command resolves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub command_type: CommandType,
    pub message_id: String,
    pub status: CommandStatus,
    pub error: Option<String>,
}

impl CommandNotification {
    pub fn new(
        command_type: CommandType,
        message_id: impl Into<String>,
        status: CommandStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            kind: "command_response".to_string(),
            command_type,
            message_id: message_id.into(),
            status,
            error,
        }
    }
}

/// Body of the `202 Accepted` returned by the command endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAccepted {
    pub message: String,
    pub message_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelopes_get_unique_message_ids() {
        let a = ActionCommand::new(ActionKind::RebootDevice, Value::Null);
        let b = ActionCommand::new(ActionKind::RebootDevice, Value::Null);
        assert_ne!(a.message_id, b.message_id);
        assert!(Uuid::parse_str(&a.message_id).is_ok());
    }

    #[test]
    fn response_envelope_tolerates_missing_error() {
        let raw = r#"{"message_id":"m-1","status":"ok"}"#;
        let envelope: ResponseEnvelope = serde_json::from_str(raw).expect("parse");
        assert_eq!(envelope.status, ResponseStatus::Ok);
        assert!(envelope.error.is_none());
    }

    #[test]
    fn response_envelope_accepts_numeric_error() {
        let raw = r#"{"message_id":"m-2","status":"error","error":-3}"#;
        let envelope: ResponseEnvelope = serde_json::from_str(raw).expect("parse");
        assert_eq!(envelope.error, Some(ErrorDetail::Code(-3)));
    }

    #[test]
    fn notification_serializes_with_null_error() {
        let note = CommandNotification::new(
            CommandType::Schedule,
            "msg-1",
            CommandStatus::Ok,
            None,
        );
        let json = serde_json::to_value(&note).expect("serialize");
        assert_eq!(json["type"], "command_response");
        assert_eq!(json["command_type"], "schedule");
        assert_eq!(json["status"], "ok");
        assert!(json["error"].is_null());
    }
}
