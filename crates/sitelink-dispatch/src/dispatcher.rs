//! Bridges inbound transport messages to the command tracker.

use std::sync::Arc;

use sitelink_core::envelope::{CommandNotification, ResponseEnvelope};
use sitelink_core::topic::{parse_response_topic, response_filter};
use sitelink_core::{CommandStatus, CommandType, ResponseStatus};
use tracing::{debug, info, warn};

use crate::registry::TenantRegistry;
use crate::tracker::CommandTracker;

/// Handler invoked by the MQTT worker for every message on a response
/// topic. Parse failures are logged and dropped; nothing here may
/// propagate an error back into the transport's event loop.
pub struct ResponseDispatcher {
    tracker: Arc<CommandTracker>,
    registry: Arc<TenantRegistry>,
}

impl ResponseDispatcher {
    pub fn new(tracker: Arc<CommandTracker>, registry: Arc<TenantRegistry>) -> Self {
        Self { tracker, registry }
    }

    /// Subscription filters the transport must register, one response
    /// channel per command type with a wildcard plant segment.
    pub fn response_filters() -> Vec<String> {
        CommandType::ALL.into_iter().map(response_filter).collect()
    }

    pub async fn on_response(&self, topic: &str, payload: &[u8]) {
        let Some(command_type) = parse_response_topic(topic) else {
            debug!(event = "unrecognized_topic", topic = topic);
            return;
        };

        let envelope: ResponseEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    event = "invalid_response_payload",
                    topic = topic,
                    error = %err,
                    raw = %String::from_utf8_lossy(payload)
                );
                return;
            }
        };

        info!(
            event = "response_received",
            command_type = %command_type,
            message_id = %envelope.message_id,
            status = %envelope.status
        );

        if envelope.status == ResponseStatus::Error {
            if let Some(detail) = &envelope.error {
                match detail.interpretation() {
                    Some(meaning) => warn!(
                        event = "device_error",
                        message_id = %envelope.message_id,
                        detail = %detail,
                        meaning = meaning
                    ),
                    None => warn!(
                        event = "device_error",
                        message_id = %envelope.message_id,
                        detail = %detail
                    ),
                }
            }
        }

        let status: CommandStatus = envelope.status.into();
        let error = envelope.error.as_ref().map(ToString::to_string);
        let transitioned = self
            .tracker
            .update_command_status(&envelope.message_id, status, error.clone())
            .await;
        if !transitioned {
            debug!(
                event = "stale_response",
                message_id = %envelope.message_id
            );
        }

        // Notify regardless: when the record already resolved, the mapping
        // is gone and the broadcast is a no-op.
        let notification = CommandNotification::new(
            command_type,
            envelope.message_id.as_str(),
            status,
            if envelope.status == ResponseStatus::Error {
                error
            } else {
                None
            },
        );
        self.registry
            .broadcast_to_message_originator(&notification, &envelope.message_id)
            .await;
    }
}
