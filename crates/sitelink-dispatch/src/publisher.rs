//! The only place a new command comes into existence.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sitelink_core::envelope::{ActionCommand, ScheduleCommand, SettingsCommand};
use sitelink_core::topic::command_topic;
use sitelink_core::CommandType;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::registry::TenantRegistry;
use crate::tracker::{CommandTracker, TrackerError, DEFAULT_COMMAND_TIMEOUT};

/// One publish handed to the transport worker.
#[derive(Debug, Clone)]
pub struct OutboundPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("failed to serialize command payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transport queue closed")]
    TransportClosed,
}

/// Builds and registers outbound commands, then queues them for the MQTT
/// worker. Registration order matters: the tracker record and the
/// message→tenant mapping are both in place before the payload is handed
/// to the transport.
pub struct CommandPublisher {
    tracker: Arc<CommandTracker>,
    registry: Arc<TenantRegistry>,
    outbound: mpsc::Sender<OutboundPublish>,
    timeout: Duration,
}

impl CommandPublisher {
    pub fn new(
        tracker: Arc<CommandTracker>,
        registry: Arc<TenantRegistry>,
        outbound: mpsc::Sender<OutboundPublish>,
    ) -> Self {
        Self {
            tracker,
            registry,
            outbound,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn send_schedule(
        &self,
        tenant_id: Uuid,
        command: &ScheduleCommand,
    ) -> Result<String, PublishError> {
        self.send_command(
            CommandType::Schedule,
            tenant_id,
            command.plant_id,
            &command.message_id,
            command,
        )
        .await
    }

    /// `plc-settings` and `plc-control` share the payload shape; the
    /// command type picks the topic.
    pub async fn send_settings(
        &self,
        command_type: CommandType,
        tenant_id: Uuid,
        command: &SettingsCommand,
    ) -> Result<String, PublishError> {
        self.send_command(
            command_type,
            tenant_id,
            command.plant_id,
            &command.message_id,
            command,
        )
        .await
    }

    pub async fn send_action(
        &self,
        tenant_id: Uuid,
        plant_id: i64,
        command: &ActionCommand,
    ) -> Result<String, PublishError> {
        self.send_command(
            CommandType::Action,
            tenant_id,
            plant_id,
            &command.message_id,
            command,
        )
        .await
    }

    pub async fn send_command<T: Serialize>(
        &self,
        command_type: CommandType,
        tenant_id: Uuid,
        plant_id: i64,
        message_id: &str,
        envelope: &T,
    ) -> Result<String, PublishError> {
        let payload = serde_json::to_value(envelope)?;
        let bytes = serde_json::to_vec(envelope)?;

        Arc::clone(&self.tracker)
            .register_command(
                message_id,
                command_type,
                tenant_id,
                plant_id,
                payload,
                self.timeout,
            )
            .await?;

        // The mapping must exist before the payload reaches the broker so
        // it wins a race against an unexpectedly fast device response.
        self.registry
            .register_message_tenant_mapping(message_id, tenant_id)
            .await;

        let topic = command_topic(command_type, plant_id);
        info!(
            event = "command_published",
            command_type = %command_type,
            topic = %topic,
            message_id = message_id,
            tenant_id = %tenant_id,
            plant_id = plant_id
        );

        // A failed handoff leaves the record pending; it resolves through
        // the timeout path.
        self.outbound
            .send(OutboundPublish {
                topic,
                payload: bytes,
                qos: 0,
            })
            .await
            .map_err(|_| PublishError::TransportClosed)?;

        Ok(message_id.to_string())
    }
}
