use crate::config::RelayConfig;
use crate::dispatch::dispatch;
use crate::health::HealthTracker;
use crate::hub::{DeliveryError, PeerSink};
use crate::zones::ZoneBroadcastService;
use corridor_contracts::topics::{downlink_topic, peer_from_uplink, UPLINK_FILTER};
use corridor_contracts::{decode_client_event, ClientEvent, Delivery};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Downlink MQTT d'un peer : `corridor/peers/<peer>/down`
pub struct MqttPeerSink {
    client: AsyncClient,
    topic: String,
}

impl MqttPeerSink {
    pub fn new(client: AsyncClient, peer_id: &str) -> Self {
        Self { client, topic: downlink_topic(peer_id) }
    }
}

impl PeerSink for MqttPeerSink {
    fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
        let payload = serde_json::to_vec(delivery)?;
        self.client
            .try_publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }
}

/// Crée le client MQTT partagé du kernel
pub fn create_mqtt_client(cfg: &RelayConfig) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    opts.set_keep_alive(Duration::from_secs(cfg.mqtt.keep_alive_secs));
    AsyncClient::new(opts, 64)
}

/// Applique un publish uplink ; `make_sink` n'est appelé que pour un peer inconnu
pub fn handle_uplink<F>(zones: &ZoneBroadcastService, topic: &str, payload: &[u8], make_sink: F)
where
    F: FnOnce(&str) -> Arc<dyn PeerSink>,
{
    let Some(peer) = peer_from_uplink(topic) else {
        debug!(%topic, "ignoring publish outside uplink namespace");
        return;
    };

    let event = match decode_client_event(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(%peer, error = %e, "invalid uplink payload");
            return;
        }
    };

    // un last-will d'un peer déjà détaché ne doit pas le ré-attacher
    if !matches!(event, ClientEvent::PeerDisconnect(_)) && !zones.hub().is_attached(peer) {
        zones.hub().attach(peer, make_sink(peer));
        info!(%peer, "peer attached");
    }

    dispatch(zones, peer, event);
}

pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    zones: ZoneBroadcastService,
    health: HealthTracker,
) -> JoinHandle<()> {
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    // abonnement refait à chaque (re)connexion
                    if let Err(e) = client.try_subscribe(UPLINK_FILTER, QoS::AtLeastOnce) {
                        warn!(error = ?e, "uplink subscribe failed");
                    }
                    health.mark_mqtt_connected();
                    info!("connected to broker, listening on {UPLINK_FILTER}");
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    handle_uplink(&zones, &p.topic, &p.payload, |peer: &str| -> Arc<dyn PeerSink> {
                        Arc::new(MqttPeerSink::new(client.clone(), peer))
                    });
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => health.mark_mqtt_disconnected(),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = ?e, "MQTT error");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}
