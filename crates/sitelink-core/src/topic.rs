//! MQTT topic construction and parsing.
//!
//! Commands go out on `cmd/cloud-to-site/{plant_id}/{suffix}`; devices
//! acknowledge on `status/site-to-cloud/{plant_id}/{suffix}`. Subscriptions
//! use a `+` wildcard for the plant segment because correlation happens via
//! `message_id`, not via the plant id in the topic.

use crate::CommandType;

pub const COMMAND_PREFIX: &str = "cmd/cloud-to-site";
pub const RESPONSE_PREFIX: &str = "status/site-to-cloud";

/// Topic a command for `plant_id` is published on.
pub fn command_topic(command_type: CommandType, plant_id: i64) -> String {
    format!(
        "{COMMAND_PREFIX}/{plant_id}/{}",
        command_type.topic_suffix()
    )
}

/// Wildcard subscription filter for one response channel.
pub fn response_filter(command_type: CommandType) -> String {
    format!("{RESPONSE_PREFIX}/+/{}", command_type.topic_suffix())
}

/// Classify an incoming response topic. Returns `None` for topics outside
/// the response namespace or with an unknown command segment.
pub fn parse_response_topic(topic: &str) -> Option<CommandType> {
    let mut segments = topic.split('/');
    if segments.next() != Some("status") || segments.next() != Some("site-to-cloud") {
        return None;
    }
    let _plant = segments.next()?;
    let suffix = segments.next()?;
    if segments.next().is_some() {
        return None;
    }
    CommandType::ALL
        .into_iter()
        .find(|kind| kind.topic_suffix() == suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_command_topics() {
        assert_eq!(
            command_topic(CommandType::Schedule, 42),
            "cmd/cloud-to-site/42/schedule"
        );
        assert_eq!(
            command_topic(CommandType::PlcSettings, 7),
            "cmd/cloud-to-site/7/plc-settings"
        );
    }

    #[test]
    fn builds_response_filters() {
        assert_eq!(
            response_filter(CommandType::Action),
            "status/site-to-cloud/+/action"
        );
        assert_eq!(
            response_filter(CommandType::PlcControl),
            "status/site-to-cloud/+/plc-control"
        );
    }

    #[test]
    fn parses_response_topics() {
        assert_eq!(
            parse_response_topic("status/site-to-cloud/42/schedule"),
            Some(CommandType::Schedule)
        );
        assert_eq!(
            parse_response_topic("status/site-to-cloud/9/plc-settings"),
            Some(CommandType::PlcSettings)
        );
    }

    #[test]
    fn rejects_foreign_topics() {
        assert_eq!(parse_response_topic("cmd/cloud-to-site/42/schedule"), None);
        assert_eq!(parse_response_topic("status/site-to-cloud/42/firmware"), None);
        assert_eq!(
            parse_response_topic("status/site-to-cloud/42/schedule/extra"),
            None
        );
        assert_eq!(parse_response_topic(""), None);
    }
}
