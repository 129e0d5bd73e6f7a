//! MQTT realisation of the relay transport.
//!
//! Each guardian publishes on its uplink `corridor/peers/<peer>/up` and
//! receives room deliveries on `corridor/peers/<peer>/down`. The broker holds
//! a last will carrying `peer_disconnect` so the kernel releases our rooms on
//! an abrupt loss.
//!
//! Every broker connection gets a fresh session nonce. It is announced with
//! `peer_connect` right after the ConnAck and repeated in the last will, so
//! the kernel can drop a will that outlives the connection it belonged to.

use crate::channel::{RelayChannel, RelayError, RelayTransport, TransportSignal};
use corridor_contracts::topics::{downlink_topic, uplink_topic, validate_peer_id};
use corridor_contracts::{decode_delivery, ClientEvent, PeerConnect, PeerDisconnect};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_MQTT_PORT: u16 = 1883;

/// `mqtt://host[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    pub host: String,
    pub port: u16,
}

impl FromStr for RelayEndpoint {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RelayError::InvalidEndpoint(s.to_string());
        let rest = s.trim().strip_prefix("mqtt://").ok_or_else(invalid)?;
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (rest, DEFAULT_MQTT_PORT),
        };
        if host.is_empty() || host.contains('/') {
            return Err(invalid());
        }
        Ok(Self { host: host.to_string(), port })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MqttTuning {
    pub keep_alive: Duration,
    pub reconnect_backoff: Duration,
}

impl Default for MqttTuning {
    fn default() -> Self {
        Self { keep_alive: Duration::from_secs(30), reconnect_backoff: Duration::from_secs(5) }
    }
}

fn new_session() -> String {
    Uuid::new_v4().simple().to_string()
}

fn last_will(uplink: &str, session: &str) -> Result<LastWill, RelayError> {
    let will = serde_json::to_vec(&ClientEvent::PeerDisconnect(PeerDisconnect::will(session)))?;
    Ok(LastWill::new(uplink, will, QoS::AtLeastOnce, false))
}

pub struct MqttTransport {
    client: AsyncClient,
    uplink: String,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Starts the MQTT event loop; the returned stream feeds a [`RelayChannel`]
    pub fn connect(
        endpoint: &RelayEndpoint,
        peer_id: &str,
        tuning: MqttTuning,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<TransportSignal>), RelayError> {
        validate_peer_id(peer_id)?;

        let uplink = uplink_topic(peer_id);
        let downlink = downlink_topic(peer_id);

        let mut options = MqttOptions::new(format!("corridor-{peer_id}"), &endpoint.host, endpoint.port);
        options.set_keep_alive(tuning.keep_alive);
        options.set_clean_session(true);
        let mut session = new_session();
        options.set_last_will(last_will(&uplink, &session)?);

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let connected = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        let transport = Arc::new(Self {
            client: client.clone(),
            uplink: uplink.clone(),
            connected: connected.clone(),
            closing: closing.clone(),
        });

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        if let Err(e) = client.try_subscribe(&downlink, QoS::AtLeastOnce) {
                            error!(error = ?e, "downlink subscribe failed");
                        }
                        // before any rejoin, so the kernel knows the current session
                        let hello = ClientEvent::PeerConnect(PeerConnect { session: session.clone() });
                        match serde_json::to_vec(&hello) {
                            Ok(payload) => {
                                if let Err(e) = client.try_publish(&uplink, QoS::AtLeastOnce, false, payload) {
                                    warn!(error = ?e, "peer_connect not queued");
                                }
                            }
                            Err(e) => error!(error = %e, "peer_connect not encodable"),
                        }
                        connected.store(true, Ordering::Release);
                        info!(topic = %downlink, %session, "connected to relay");
                        if tx.send(TransportSignal::Connected).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(p))) => match decode_delivery(&p.payload) {
                        Ok(delivery) => {
                            if tx.send(TransportSignal::Delivery(delivery)).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(topic = %p.topic, error = %e, "dropping invalid delivery"),
                    },
                    Ok(_) => {}
                    Err(e) => {
                        if closing.load(Ordering::Acquire) {
                            break;
                        }
                        if connected.swap(false, Ordering::AcqRel) {
                            warn!(error = %e, "relay connection lost");
                            if tx.send(TransportSignal::Disconnected).is_err() {
                                break;
                            }
                        } else {
                            debug!(error = %e, "relay still unreachable");
                        }
                        session = new_session();
                        match last_will(&uplink, &session) {
                            Ok(will) => {
                                eventloop.mqtt_options.set_last_will(will);
                            }
                            Err(e) => error!(error = %e, "last will not encodable"),
                        }
                        tokio::time::sleep(tuning.reconnect_backoff).await;
                    }
                }
            }
            debug!("mqtt event loop stopped");
        });

        Ok((transport, rx))
    }
}

impl RelayTransport for MqttTransport {
    fn send(&self, event: &ClientEvent) -> Result<(), RelayError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(RelayError::NotConnected);
        }
        let payload = serde_json::to_vec(event)?;
        self.client
            .try_publish(&self.uplink, QoS::AtLeastOnce, false, payload)
            .map_err(|e| RelayError::Transport(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closing.store(true, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = ?e, "disconnect request not queued");
        }
    }
}

/// Shared relay channel over MQTT
pub fn connect_relay(endpoint: &str, peer_id: &str, tuning: MqttTuning) -> Result<RelayChannel, RelayError> {
    let endpoint: RelayEndpoint = endpoint.parse()?;
    let (transport, signals) = MqttTransport::connect(&endpoint, peer_id, tuning)?;
    info!(host = %endpoint.host, port = endpoint.port, peer = peer_id, "relay channel opening");
    Ok(RelayChannel::connect(transport, signals))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let e: RelayEndpoint = "mqtt://localhost:1883".parse().unwrap();
        assert_eq!(e, RelayEndpoint { host: "localhost".into(), port: 1883 });

        let e: RelayEndpoint = "mqtt://broker.lan".parse().unwrap();
        assert_eq!(e.port, 1883);

        let e: RelayEndpoint = "mqtt://10.0.0.4:2883/".parse().unwrap();
        assert_eq!(e, RelayEndpoint { host: "10.0.0.4".into(), port: 2883 });
    }

    #[test]
    fn test_reject_bad_endpoints() {
        for bad in ["http://localhost:4000", "mqtt://", "mqtt://host:notaport", "mqtt://host/path:1"] {
            assert!(bad.parse::<RelayEndpoint>().is_err(), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_peer_id() {
        let endpoint: RelayEndpoint = "mqtt://localhost".parse().unwrap();
        let result = MqttTransport::connect(&endpoint, "bad/peer", MqttTuning::default());
        assert!(matches!(result, Err(RelayError::Contract(_))));
    }

    #[tokio::test]
    async fn test_send_before_connack_is_not_connected() {
        let endpoint: RelayEndpoint = "mqtt://127.0.0.1:1".parse().unwrap();
        let (transport, _signals) =
            MqttTransport::connect(&endpoint, "peer-1", MqttTuning::default()).unwrap();
        assert!(!transport.is_connected());
        let bye = ClientEvent::PeerDisconnect(PeerDisconnect::default());
        assert!(matches!(transport.send(&bye), Err(RelayError::NotConnected)));
        transport.close();
    }

    #[test]
    fn test_last_will_carries_session() {
        let first = new_session();
        let second = new_session();
        assert_ne!(first, second);

        let will = last_will("corridor/peers/amb-7/up", &first).unwrap();
        match corridor_contracts::decode_client_event(&will.message[..]).unwrap() {
            ClientEvent::PeerDisconnect(bye) => assert_eq!(bye.session.as_deref(), Some(first.as_str())),
            other => panic!("unexpected will {other:?}"),
        }
    }
}
