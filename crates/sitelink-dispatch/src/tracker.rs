//! Lifecycle tracking for outbound device commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sitelink_core::envelope::CommandNotification;
use sitelink_core::{CommandStatus, CommandType};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::TenantRegistry;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// When the history table overflows, evict this many entries beyond the
/// excess so consecutive inserts don't each trigger a sort.
const HISTORY_EVICT_SLACK: usize = 10;

/// One outbound command awaiting (or having received) a device response.
///
/// `payload` is the envelope as sent to the device, kept opaque and only
/// for diagnostics; the tracker never inspects it.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub message_id: String,
    pub command_type: CommandType,
    pub tenant_id: Uuid,
    pub plant_id: i64,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub status: CommandStatus,
    pub error: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    /// Message ids come from a UUID generator, so a collision is an
    /// invariant violation rather than something to silently overwrite.
    #[error("duplicate message id: {0}")]
    DuplicateMessageId(String),
}

#[derive(Default)]
struct TrackerState {
    pending: HashMap<String, CommandRecord>,
    history: HashMap<String, CommandRecord>,
    timeouts: HashMap<String, JoinHandle<()>>,
}

/// Tracks every outbound command from registration to its single terminal
/// transition (ok, error, or timeout), and triggers tenant notification
/// when the timeout side wins the race.
pub struct CommandTracker {
    state: Mutex<TrackerState>,
    registry: Arc<TenantRegistry>,
    max_history: usize,
}

impl CommandTracker {
    pub fn new(registry: Arc<TenantRegistry>) -> Self {
        Self::with_max_history(registry, DEFAULT_MAX_HISTORY)
    }

    pub fn with_max_history(registry: Arc<TenantRegistry>, max_history: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            registry,
            max_history,
        }
    }

    /// Insert a new pending record and arm its timeout. The timeout task is
    /// kept beside the record and aborted when a genuine response arrives
    /// first.
    pub async fn register_command(
        self: Arc<Self>,
        message_id: &str,
        command_type: CommandType,
        tenant_id: Uuid,
        plant_id: i64,
        payload: Value,
        timeout: Duration,
    ) -> Result<(), TrackerError> {
        let mut state = self.state.lock().await;
        if state.pending.contains_key(message_id) || state.history.contains_key(message_id) {
            return Err(TrackerError::DuplicateMessageId(message_id.to_string()));
        }

        state.pending.insert(
            message_id.to_string(),
            CommandRecord {
                message_id: message_id.to_string(),
                command_type,
                tenant_id,
                plant_id,
                payload,
                created_at: Utc::now(),
                status: CommandStatus::Pending,
                error: None,
                responded_at: None,
            },
        );

        let tracker = Arc::clone(&self);
        let id = message_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracker.expire_command(&id, timeout).await;
        });
        state.timeouts.insert(message_id.to_string(), handle);

        debug!(
            event = "command_registered",
            message_id = message_id,
            command_type = %command_type,
            tenant_id = %tenant_id,
            plant_id = plant_id,
            timeout_secs = timeout.as_secs_f64()
        );
        Ok(())
    }

    /// Resolve a pending command. Returns `true` if this call performed the
    /// terminal transition; a late or duplicate resolution is a no-op and
    /// returns `false`.
    pub async fn update_command_status(
        &self,
        message_id: &str,
        status: CommandStatus,
        error: Option<String>,
    ) -> bool {
        let mut state = self.state.lock().await;
        let Some(mut record) = state.pending.remove(message_id) else {
            debug!(event = "resolution_ignored", message_id = message_id, status = %status);
            return false;
        };

        if let Some(handle) = state.timeouts.remove(message_id) {
            handle.abort();
        }

        record.status = status;
        record.error = error;
        record.responded_at = Some(Utc::now());
        info!(
            event = "command_resolved",
            message_id = message_id,
            status = %status,
            error = record.error.as_deref().unwrap_or("")
        );
        self.push_history(&mut state, record);
        true
    }

    /// Timeout path: fires only if the command is still pending, then
    /// notifies the originating tenant exactly like a device error would.
    async fn expire_command(&self, message_id: &str, timeout: Duration) {
        let notification = {
            let mut state = self.state.lock().await;
            state.timeouts.remove(message_id);
            let Some(mut record) = state.pending.remove(message_id) else {
                return;
            };

            let error = format!(
                "Command timed out after {} seconds",
                timeout.as_secs_f64()
            );
            warn!(
                event = "command_timeout",
                message_id = message_id,
                command_type = %record.command_type,
                plant_id = record.plant_id,
                timeout_secs = timeout.as_secs_f64()
            );
            record.status = CommandStatus::Timeout;
            record.error = Some(error.clone());
            record.responded_at = Some(Utc::now());
            let notification = CommandNotification::new(
                record.command_type,
                message_id,
                CommandStatus::Timeout,
                Some(error),
            );
            self.push_history(&mut state, record);
            notification
        };

        self.registry
            .broadcast_to_message_originator(&notification, message_id)
            .await;
    }

    /// Look up a command in the pending table, then in history.
    pub async fn get_command_status(&self, message_id: &str) -> Option<CommandRecord> {
        let state = self.state.lock().await;
        state
            .pending
            .get(message_id)
            .or_else(|| state.history.get(message_id))
            .cloned()
    }

    /// Snapshot of all pending commands, oldest first.
    pub async fn get_pending_commands(&self) -> Vec<CommandRecord> {
        let state = self.state.lock().await;
        let mut pending: Vec<CommandRecord> = state.pending.values().cloned().collect();
        pending.sort_by_key(|record| record.created_at);
        pending
    }

    /// Most recently registered resolved commands, newest first.
    pub async fn get_recent_history(&self, limit: usize) -> Vec<CommandRecord> {
        let state = self.state.lock().await;
        let mut history: Vec<CommandRecord> = state.history.values().cloned().collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        history.truncate(limit);
        history
    }

    /// Defensive sweep for pending commands whose timers never fired.
    /// Force-transitions them to timeout through the normal notification
    /// path and returns how many were swept.
    pub async fn cleanup_expired_commands(&self, max_age: Duration) -> usize {
        let now = Utc::now();

        let notifications = {
            let mut state = self.state.lock().await;
            let expired: Vec<String> = state
                .pending
                .values()
                .filter(|record| {
                    (now - record.created_at)
                        .to_std()
                        .map(|age| age > max_age)
                        .unwrap_or(false)
                })
                .map(|record| record.message_id.clone())
                .collect();

            let mut notifications = Vec::with_capacity(expired.len());
            for message_id in expired {
                if let Some(handle) = state.timeouts.remove(&message_id) {
                    handle.abort();
                }
                let Some(mut record) = state.pending.remove(&message_id) else {
                    continue;
                };
                warn!(
                    event = "command_swept",
                    message_id = %message_id,
                    command_type = %record.command_type,
                    age_secs = (Utc::now() - record.created_at).num_seconds()
                );
                let error = format!(
                    "Command expired after {} seconds without a device response",
                    max_age.as_secs()
                );
                record.status = CommandStatus::Timeout;
                record.error = Some(error.clone());
                record.responded_at = Some(Utc::now());
                notifications.push(CommandNotification::new(
                    record.command_type,
                    message_id.clone(),
                    CommandStatus::Timeout,
                    Some(error),
                ));
                self.push_history(&mut state, record);
            }
            notifications
        };

        let count = notifications.len();
        for notification in &notifications {
            self.registry
                .broadcast_to_message_originator(notification, &notification.message_id)
                .await;
        }
        count
    }

    /// Move a resolved record into history, evicting the oldest entries in
    /// one batch once the table overflows.
    fn push_history(&self, state: &mut TrackerState, record: CommandRecord) {
        state.history.insert(record.message_id.clone(), record);
        if state.history.len() <= self.max_history {
            return;
        }

        let excess = state.history.len() - self.max_history;
        let slack = HISTORY_EVICT_SLACK.min(self.max_history / 2);
        let mut by_age: Vec<(DateTime<Utc>, String)> = state
            .history
            .values()
            .map(|record| (record.created_at, record.message_id.clone()))
            .collect();
        by_age.sort();
        for (_, message_id) in by_age.into_iter().take(excess + slack) {
            state.history.remove(&message_id);
        }
        debug!(
            event = "history_evicted",
            evicted = excess + slack,
            retained = state.history.len()
        );
    }
}
