//! Per-tenant notification connections and the message→tenant index.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use sitelink_core::envelope::CommandNotification;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Process-unique identifier for one notification connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Live notification connections grouped by tenant, plus the short-lived
/// mapping from an outbound message id to the tenant that issued it.
///
/// A connection is an `mpsc::Sender<String>` of serialized JSON; the socket
/// owner drains the paired receiver into the actual WebSocket. A send
/// failure means the receiver was dropped, and the connection is pruned.
pub struct TenantRegistry {
    conn_counter: AtomicU64,
    connections: RwLock<HashMap<Uuid, HashMap<ConnId, mpsc::Sender<String>>>>,
    message_tenants: RwLock<HashMap<String, Uuid>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self {
            conn_counter: AtomicU64::new(0),
            connections: RwLock::new(HashMap::new()),
            message_tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection to the tenant's set, creating the set if absent.
    pub async fn connect(&self, tenant_id: Uuid, sender: mpsc::Sender<String>) -> ConnId {
        let conn_id = ConnId(self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1);
        let mut connections = self.connections.write().await;
        let set = connections.entry(tenant_id).or_default();
        set.insert(conn_id, sender);
        info!(
            event = "client_connected",
            tenant_id = %tenant_id,
            conn_id = %conn_id,
            connections = set.len()
        );
        conn_id
    }

    /// Remove a connection; dropping the last one drops the tenant entry so
    /// an idle tenant leaves no footprint.
    pub async fn disconnect(&self, tenant_id: Uuid, conn_id: ConnId) {
        let mut connections = self.connections.write().await;
        let Some(set) = connections.get_mut(&tenant_id) else {
            return;
        };
        set.remove(&conn_id);
        let remaining = set.len();
        if remaining == 0 {
            connections.remove(&tenant_id);
        }
        info!(
            event = "client_disconnected",
            tenant_id = %tenant_id,
            conn_id = %conn_id,
            remaining = remaining
        );
    }

    /// Send a notification to every connection of one tenant. Connections
    /// whose send fails are collected and removed after the loop; the set
    /// is never mutated while iterating.
    pub async fn broadcast_to_tenant(&self, message: &CommandNotification, tenant_id: Uuid) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                warn!(event = "notification_serialize_failed", error = %err);
                return;
            }
        };

        let targets: Vec<(ConnId, mpsc::Sender<String>)> = {
            let connections = self.connections.read().await;
            match connections.get(&tenant_id) {
                Some(set) => set.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return,
            }
        };

        let mut dead = Vec::new();
        for (conn_id, sender) in targets {
            if sender.send(text.clone()).await.is_err() {
                warn!(event = "send_error", tenant_id = %tenant_id, conn_id = %conn_id);
                dead.push(conn_id);
            }
        }

        for conn_id in dead {
            self.disconnect(tenant_id, conn_id).await;
        }
    }

    pub async fn register_message_tenant_mapping(&self, message_id: &str, tenant_id: Uuid) {
        self.message_tenants
            .write()
            .await
            .insert(message_id.to_string(), tenant_id);
    }

    pub async fn get_tenant_by_message_id(&self, message_id: &str) -> Option<Uuid> {
        self.message_tenants.read().await.get(message_id).copied()
    }

    pub async fn remove_message_tenant_mapping(&self, message_id: &str) {
        self.message_tenants.write().await.remove(message_id);
    }

    /// Notify the tenant that originated `message_id`, consuming the
    /// mapping. The entry is taken, not read, so a concurrent or repeated
    /// call finds nothing and becomes a no-op: at most one fan-out per
    /// message id.
    pub async fn broadcast_to_message_originator(
        &self,
        message: &CommandNotification,
        message_id: &str,
    ) {
        let tenant_id = { self.message_tenants.write().await.remove(message_id) };
        let Some(tenant_id) = tenant_id else {
            debug!(event = "originator_unknown", message_id = message_id);
            return;
        };
        self.broadcast_to_tenant(message, tenant_id).await;
    }

    /// Number of tenants with at least one live connection.
    pub async fn tenant_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of live connections for one tenant.
    pub async fn connection_count(&self, tenant_id: Uuid) -> usize {
        self.connections
            .read()
            .await
            .get(&tenant_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Number of outstanding message→tenant mappings.
    pub async fn mapping_count(&self) -> usize {
        self.message_tenants.read().await.len()
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}
