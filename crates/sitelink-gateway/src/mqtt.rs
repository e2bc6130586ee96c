//! MQTT transport worker.
//!
//! One task owns the rumqttc client and event loop: incoming publishes on
//! the response topics go to the dispatcher, queued outbound commands go to
//! the broker. Errors are logged and the loop keeps running; nothing a
//! device sends can take the worker down.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use sitelink_dispatch::{OutboundPublish, ResponseDispatcher};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub fn connect(settings: &MqttSettings) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(
        settings.client_id.clone(),
        settings.host.clone(),
        settings.port,
    );
    options.set_keep_alive(Duration::from_secs(5));
    if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
        options.set_credentials(user.clone(), pass.clone());
    }
    AsyncClient::new(options, 100)
}

fn qos_from(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

pub async fn run(
    client: AsyncClient,
    mut eventloop: EventLoop,
    dispatcher: Arc<ResponseDispatcher>,
    mut outbound: mpsc::Receiver<OutboundPublish>,
) {
    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(event = "mqtt_connected");
                    // Re-subscribing on every ConnAck covers reconnects.
                    for filter in ResponseDispatcher::response_filters() {
                        match client.subscribe(filter.clone(), QoS::AtMostOnce).await {
                            Ok(()) => info!(event = "subscribed", filter = %filter),
                            Err(err) => {
                                error!(event = "subscribe_failed", filter = %filter, error = %err)
                            }
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    dispatcher.on_response(&publish.topic, &publish.payload).await;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(event = "mqtt_error", error = %err);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            },
            maybe = outbound.recv() => match maybe {
                Some(publish) => {
                    if let Err(err) = client
                        .publish(
                            publish.topic.clone(),
                            qos_from(publish.qos),
                            false,
                            publish.payload,
                        )
                        .await
                    {
                        error!(event = "publish_failed", topic = %publish.topic, error = %err);
                    }
                }
                None => {
                    info!(event = "outbound_closed");
                    return;
                }
            },
        }
    }
}
