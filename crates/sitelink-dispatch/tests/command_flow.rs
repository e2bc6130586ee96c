use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sitelink_core::envelope::CommandNotification;
use sitelink_core::{CommandStatus, CommandType};
use sitelink_dispatch::{
    CommandPublisher, CommandTracker, PublishError, ResponseDispatcher, TenantRegistry,
    TrackerError,
};
use tokio::sync::mpsc;
use uuid::Uuid;

struct Harness {
    registry: Arc<TenantRegistry>,
    tracker: Arc<CommandTracker>,
    dispatcher: ResponseDispatcher,
    publisher: CommandPublisher,
    outbound: mpsc::Receiver<sitelink_dispatch::OutboundPublish>,
}

fn harness_with_history(max_history: usize, timeout: Duration) -> Harness {
    let registry = Arc::new(TenantRegistry::new());
    let tracker = Arc::new(CommandTracker::with_max_history(
        registry.clone(),
        max_history,
    ));
    let dispatcher = ResponseDispatcher::new(tracker.clone(), registry.clone());
    let (tx, rx) = mpsc::channel(256);
    let publisher = CommandPublisher::new(tracker.clone(), registry.clone(), tx)
        .with_timeout(timeout);
    Harness {
        registry,
        tracker,
        dispatcher,
        publisher,
        outbound: rx,
    }
}

fn harness() -> Harness {
    harness_with_history(100, Duration::from_secs(30))
}

async fn attach(registry: &TenantRegistry, tenant_id: Uuid) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    registry.connect(tenant_id, tx).await;
    rx
}

async fn register(
    h: &Harness,
    message_id: &str,
    tenant_id: Uuid,
    plant_id: i64,
) -> Result<String, PublishError> {
    h.publisher
        .send_command(
            CommandType::Schedule,
            tenant_id,
            plant_id,
            message_id,
            &json!({ "message_id": message_id, "plant_id": plant_id }),
        )
        .await
}

#[tokio::test]
async fn ok_response_notifies_the_originating_tenant() {
    let mut h = harness();
    let tenant = Uuid::new_v4();
    let mut rx = attach(&h.registry, tenant).await;

    register(&h, "msg-1", tenant, 42).await.expect("publish");
    let published = h.outbound.recv().await.expect("outbound publish");
    assert_eq!(published.topic, "cmd/cloud-to-site/42/schedule");
    assert_eq!(published.qos, 0);

    h.dispatcher
        .on_response(
            "status/site-to-cloud/42/schedule",
            br#"{"message_id":"msg-1","status":"ok"}"#,
        )
        .await;

    let text = rx.recv().await.expect("notification");
    let note: serde_json::Value = serde_json::from_str(&text).expect("json");
    assert_eq!(
        note,
        json!({
            "type": "command_response",
            "command_type": "schedule",
            "message_id": "msg-1",
            "status": "ok",
            "error": null
        })
    );

    let record = h
        .tracker
        .get_command_status("msg-1")
        .await
        .expect("record");
    assert_eq!(record.status, CommandStatus::Ok);
    assert!(record.responded_at.is_some());
}

#[tokio::test]
async fn device_error_carries_detail_to_the_notification() {
    let mut h = harness();
    let tenant = Uuid::new_v4();
    let mut rx = attach(&h.registry, tenant).await;

    register(&h, "msg-err", tenant, 7).await.expect("publish");
    let _ = h.outbound.recv().await;

    h.dispatcher
        .on_response(
            "status/site-to-cloud/7/schedule",
            br#"{"message_id":"msg-err","status":"error","error":-2}"#,
        )
        .await;

    let text = rx.recv().await.expect("notification");
    let note: CommandNotification = serde_json::from_str(&text).expect("json");
    assert_eq!(note.status, CommandStatus::Error);
    assert_eq!(note.error.as_deref(), Some("-2"));

    let record = h.tracker.get_command_status("msg-err").await.expect("record");
    assert_eq!(record.status, CommandStatus::Error);
    assert_eq!(record.error.as_deref(), Some("-2"));
}

#[tokio::test]
async fn first_terminal_transition_wins_over_late_response() {
    let h = harness();
    let tenant = Uuid::new_v4();
    register(&h, "msg-2", tenant, 1).await.expect("publish");

    let first = h
        .tracker
        .update_command_status("msg-2", CommandStatus::Ok, None)
        .await;
    assert!(first);

    let second = h
        .tracker
        .update_command_status("msg-2", CommandStatus::Error, Some("late".into()))
        .await;
    assert!(!second);

    let record = h.tracker.get_command_status("msg-2").await.expect("record");
    assert_eq!(record.status, CommandStatus::Ok);
    assert!(record.error.is_none());
}

#[tokio::test]
async fn response_after_timeout_is_a_noop() {
    let h = harness_with_history(100, Duration::from_millis(50));
    let tenant = Uuid::new_v4();
    register(&h, "msg-3", tenant, 1).await.expect("publish");

    tokio::time::sleep(Duration::from_millis(300)).await;

    let late = h
        .tracker
        .update_command_status("msg-3", CommandStatus::Ok, None)
        .await;
    assert!(!late);

    let record = h.tracker.get_command_status("msg-3").await.expect("record");
    assert_eq!(record.status, CommandStatus::Timeout);
    assert!(record.error.as_deref().unwrap_or("").contains("timed out"));
}

#[tokio::test]
async fn timeout_broadcasts_within_a_bounded_wait() {
    let h = harness_with_history(100, Duration::from_millis(100));
    let tenant = Uuid::new_v4();
    let mut rx = attach(&h.registry, tenant).await;

    register(&h, "msg-4", tenant, 9).await.expect("publish");

    let text = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timeout notification within 1s")
        .expect("channel open");
    let note: CommandNotification = serde_json::from_str(&text).expect("json");
    assert_eq!(note.status, CommandStatus::Timeout);
    assert_eq!(note.message_id, "msg-4");
    assert!(note.error.as_deref().unwrap_or("").contains("timed out"));
}

#[tokio::test]
async fn broadcast_to_originator_fans_out_at_most_once() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut rx = attach(&h.registry, tenant).await;

    h.registry
        .register_message_tenant_mapping("msg-5", tenant)
        .await;

    let note = CommandNotification::new(
        CommandType::Action,
        "msg-5",
        CommandStatus::Ok,
        None,
    );
    h.registry
        .broadcast_to_message_originator(&note, "msg-5")
        .await;
    h.registry
        .broadcast_to_message_originator(&note, "msg-5")
        .await;

    assert!(rx.recv().await.is_some());
    assert!(rx.try_recv().is_err());
    assert_eq!(h.registry.mapping_count().await, 0);
}

#[tokio::test]
async fn broadcasts_never_cross_tenants() {
    let h = harness();
    let tenant_a = Uuid::new_v4();
    let tenant_b = Uuid::new_v4();
    let mut rx_a = attach(&h.registry, tenant_a).await;
    let mut rx_b = attach(&h.registry, tenant_b).await;

    let note = CommandNotification::new(
        CommandType::PlcSettings,
        "msg-6",
        CommandStatus::Ok,
        None,
    );
    h.registry.broadcast_to_tenant(&note, tenant_a).await;

    assert!(rx_a.recv().await.is_some());
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn last_disconnect_removes_the_tenant_entry() {
    let h = harness();
    let tenant = Uuid::new_v4();

    let (tx_a, _rx_a) = mpsc::channel(4);
    let (tx_b, _rx_b) = mpsc::channel(4);
    let conn_a = h.registry.connect(tenant, tx_a).await;
    let conn_b = h.registry.connect(tenant, tx_b).await;
    assert_eq!(h.registry.connection_count(tenant).await, 2);

    h.registry.disconnect(tenant, conn_a).await;
    assert_eq!(h.registry.tenant_count().await, 1);
    h.registry.disconnect(tenant, conn_b).await;
    assert_eq!(h.registry.tenant_count().await, 0);
}

#[tokio::test]
async fn dead_connections_are_pruned_and_others_still_receive() {
    let h = harness();
    let tenant = Uuid::new_v4();

    let (dead_tx, dead_rx) = mpsc::channel(4);
    h.registry.connect(tenant, dead_tx).await;
    drop(dead_rx);
    let mut live_rx = attach(&h.registry, tenant).await;
    assert_eq!(h.registry.connection_count(tenant).await, 2);

    let note = CommandNotification::new(
        CommandType::Action,
        "msg-7",
        CommandStatus::Ok,
        None,
    );
    h.registry.broadcast_to_tenant(&note, tenant).await;

    assert!(live_rx.recv().await.is_some());
    assert_eq!(h.registry.connection_count(tenant).await, 1);
}

#[tokio::test]
async fn history_stays_bounded_and_keeps_recent_entries() {
    let max_history = 20;
    let h = harness_with_history(max_history, Duration::from_secs(600));
    let tenant = Uuid::new_v4();

    for i in 0..(max_history + 50) {
        let id = format!("msg-h{i}");
        register(&h, &id, tenant, 1).await.expect("publish");
        assert!(
            h.tracker
                .update_command_status(&id, CommandStatus::Ok, None)
                .await
        );
    }

    let history = h.tracker.get_recent_history(usize::MAX).await;
    assert!(history.len() <= max_history, "history len {}", history.len());

    let newest = format!("msg-h{}", max_history + 49);
    assert!(history.iter().any(|record| record.message_id == newest));
    assert!(h
        .tracker
        .get_command_status(&newest)
        .await
        .is_some());
}

#[tokio::test]
async fn resolving_without_recipients_completes_cleanly() {
    let mut h = harness();
    let tenant = Uuid::new_v4();

    register(&h, "msg-8", tenant, 3).await.expect("publish");
    let _ = h.outbound.recv().await;

    h.dispatcher
        .on_response(
            "status/site-to-cloud/3/schedule",
            br#"{"message_id":"msg-8","status":"ok"}"#,
        )
        .await;

    let record = h.tracker.get_command_status("msg-8").await.expect("record");
    assert_eq!(record.status, CommandStatus::Ok);
    assert_eq!(h.registry.mapping_count().await, 0);
}

#[tokio::test]
async fn malformed_payload_mutates_nothing() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut rx = attach(&h.registry, tenant).await;

    register(&h, "msg-9", tenant, 5).await.expect("publish");

    h.dispatcher
        .on_response("status/site-to-cloud/5/schedule", b"{not json at all")
        .await;

    let record = h.tracker.get_command_status("msg-9").await.expect("record");
    assert_eq!(record.status, CommandStatus::Pending);
    assert!(rx.try_recv().is_err());
    assert_eq!(h.registry.mapping_count().await, 1);
}

#[tokio::test]
async fn unknown_message_id_is_silently_ignored() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut rx = attach(&h.registry, tenant).await;

    h.dispatcher
        .on_response(
            "status/site-to-cloud/5/action",
            br#"{"message_id":"never-registered","status":"ok"}"#,
        )
        .await;

    assert!(h.tracker.get_command_status("never-registered").await.is_none());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn duplicate_message_id_registration_is_rejected() {
    let h = harness();
    let tenant = Uuid::new_v4();

    register(&h, "msg-10", tenant, 1).await.expect("publish");
    let second = register(&h, "msg-10", tenant, 1).await;
    assert!(matches!(
        second,
        Err(PublishError::Tracker(TrackerError::DuplicateMessageId(_)))
    ));

    // The rejected duplicate must not disturb the original's mapping.
    assert_eq!(h.registry.mapping_count().await, 1);
}

#[tokio::test]
async fn cleanup_sweep_force_times_out_stragglers() {
    let h = harness_with_history(100, Duration::from_secs(600));
    let tenant = Uuid::new_v4();
    let mut rx = attach(&h.registry, tenant).await;

    register(&h, "msg-11", tenant, 2).await.expect("publish");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let swept = h
        .tracker
        .cleanup_expired_commands(Duration::from_millis(1))
        .await;
    assert_eq!(swept, 1);

    let record = h.tracker.get_command_status("msg-11").await.expect("record");
    assert_eq!(record.status, CommandStatus::Timeout);

    let text = rx.recv().await.expect("sweep notification");
    let note: CommandNotification = serde_json::from_str(&text).expect("json");
    assert_eq!(note.status, CommandStatus::Timeout);
    assert!(note.error.as_deref().unwrap_or("").contains("expired"));
}

#[tokio::test]
async fn closed_transport_surfaces_an_error_but_keeps_the_record() {
    let h = harness();
    let tenant = Uuid::new_v4();
    drop(h.outbound);

    let result = h
        .publisher
        .send_command(
            CommandType::Action,
            tenant,
            4,
            "msg-12",
            &json!({ "message_id": "msg-12" }),
        )
        .await;
    assert!(matches!(result, Err(PublishError::TransportClosed)));

    // Record stays pending and will resolve via its timeout.
    let record = h.tracker.get_command_status("msg-12").await.expect("record");
    assert_eq!(record.status, CommandStatus::Pending);
    assert_eq!(h.tracker.get_pending_commands().await.len(), 1);
}
