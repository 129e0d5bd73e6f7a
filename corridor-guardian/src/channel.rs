//! Shared, reference-counted connection to the kernel relay.
//!
//! One [`RelayChannel`] per process; every consumer holds a clone. Room
//! membership is counted per room: the relay hears `join_room` on the first
//! hold and `leave_room` on the last release. Rooms still held are
//! re-announced after every transport (re)connection. The last handle
//! released sends `peer_disconnect` and closes the transport.

use corridor_contracts::{validate_room_id, ClientEvent, ContractError, Delivery, EventName, PeerDisconnect};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    Connected,
    Disconnected,
    Delivery(Delivery),
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay not connected")]
    NotConnected,
    #[error("relay channel closed")]
    Closed,
    #[error("room {room} is already held as a {held:?}")]
    RoomKindConflict { room: String, held: RoomKind },
    #[error("invalid relay endpoint: {0}")]
    InvalidEndpoint(String),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Uplink side of a relay connection
pub trait RelayTransport: Send + Sync {
    fn send(&self, event: &ClientEvent) -> Result<(), RelayError>;
    fn is_connected(&self) -> bool;
    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    Room,
    Zone,
}

impl RoomKind {
    fn join_event(self, room: &str) -> ClientEvent {
        match self {
            RoomKind::Room => ClientEvent::JoinRoom(room.to_string()),
            RoomKind::Zone => ClientEvent::JoinSirenZone(room.to_string()),
        }
    }
}

struct RoomHold {
    kind: RoomKind,
    refs: usize,
}

type Handler = Arc<dyn Fn(&Delivery) + Send + Sync>;

struct Shared {
    transport: Arc<dyn RelayTransport>,
    /// Serialises join/leave announcements so the wire order matches the room map
    announce: ReentrantMutex<()>,
    rooms: Mutex<HashMap<String, RoomHold>>,
    handlers: Mutex<HashMap<EventName, Vec<Handler>>>,
    consumers: AtomicUsize,
    closed: AtomicBool,
}

impl Shared {
    fn rejoin_all(&self) {
        let held = self.held_snapshot();
        let announced = self.announce_held(&held);
        info!(rooms = announced, "relay connected, rooms re-announced");
    }

    fn held_snapshot(&self) -> Vec<(String, RoomKind)> {
        self.rooms.lock().iter().map(|(room, hold)| (room.clone(), hold.kind)).collect()
    }

    /// Announces each room of `held` that is still held when its turn comes
    fn announce_held(&self, held: &[(String, RoomKind)]) -> usize {
        let mut announced = 0;
        for (room, kind) in held {
            let _announce = self.announce.lock();
            let still_held = self.rooms.lock().get(room).is_some_and(|hold| hold.kind == *kind);
            if !still_held {
                continue;
            }
            match self.transport.send(&kind.join_event(room)) {
                Ok(()) => announced += 1,
                Err(e) => warn!(%room, error = %e, "rejoin failed"),
            }
        }
        announced
    }

    fn deliver(&self, delivery: &Delivery) {
        let handlers = self.handlers.lock().get(&delivery.name()).cloned().unwrap_or_default();
        for handler in handlers {
            handler(delivery);
        }
    }
}

pub struct RelayChannel {
    shared: Arc<Shared>,
    released: bool,
}

impl RelayChannel {
    /// Wraps a connected transport; `signals` drives rejoin and handler dispatch.
    /// Must be called inside a tokio runtime.
    pub fn connect(transport: Arc<dyn RelayTransport>, mut signals: mpsc::UnboundedReceiver<TransportSignal>) -> Self {
        let shared = Arc::new(Shared {
            transport,
            announce: ReentrantMutex::new(()),
            rooms: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            consumers: AtomicUsize::new(1),
            closed: AtomicBool::new(false),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let Some(shared) = weak.upgrade() else { break };
                if shared.closed.load(Ordering::Acquire) {
                    break;
                }
                match signal {
                    TransportSignal::Connected => shared.rejoin_all(),
                    TransportSignal::Disconnected => debug!("relay disconnected, waiting for reconnection"),
                    TransportSignal::Delivery(delivery) => shared.deliver(&delivery),
                }
            }
            debug!("relay signal loop finished");
        });

        Self { shared, released: false }
    }

    pub fn on<F>(&self, event: EventName, handler: F)
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        self.shared.handlers.lock().entry(event).or_default().push(Arc::new(handler));
    }

    /// Channel of every delivery carrying `event`
    pub fn subscribe(&self, event: EventName) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on(event, move |d| {
            let _ = tx.send(d.clone());
        });
        rx
    }

    pub fn join(&self, room: &str) -> Result<(), RelayError> {
        self.hold(room, RoomKind::Room)
    }

    pub fn join_zone(&self, zone: &str) -> Result<(), RelayError> {
        self.hold(zone, RoomKind::Zone)
    }

    fn hold(&self, room: &str, kind: RoomKind) -> Result<(), RelayError> {
        let room = room_key(room)?;
        self.ensure_open()?;

        let _announce = self.shared.announce.lock();
        let first = {
            let mut rooms = self.shared.rooms.lock();
            let hold = rooms.entry(room.to_string()).or_insert(RoomHold { kind, refs: 0 });
            if hold.kind != kind {
                return Err(RelayError::RoomKindConflict { room: room.to_string(), held: hold.kind });
            }
            hold.refs += 1;
            hold.refs == 1
        };
        if first {
            // offline: announced on the next Connected
            if let Err(e) = self.shared.transport.send(&kind.join_event(room)) {
                debug!(%room, error = %e, "join deferred until reconnection");
            }
        }
        Ok(())
    }

    /// Releases one hold on `room`; unknown rooms are ignored
    pub fn leave(&self, room: &str) -> Result<(), RelayError> {
        let room = room_key(room)?;
        let _announce = self.shared.announce.lock();
        let last = {
            let mut rooms = self.shared.rooms.lock();
            match rooms.get_mut(room) {
                None => return Ok(()),
                Some(hold) if hold.refs > 1 => {
                    hold.refs -= 1;
                    false
                }
                Some(_) => {
                    rooms.remove(room);
                    true
                }
            }
        };
        if last && !self.shared.closed.load(Ordering::Acquire) {
            if let Err(e) = self.shared.transport.send(&ClientEvent::LeaveRoom(room.to_string())) {
                debug!(%room, error = %e, "leave not delivered");
            }
        }
        Ok(())
    }

    /// Validated, fire-and-forget publish
    pub fn emit(&self, event: ClientEvent) -> Result<(), RelayError> {
        event.validate()?;
        self.ensure_open()?;
        self.shared.transport.send(&event)
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire) && self.shared.transport.is_connected()
    }

    pub fn ref_count(&self, room: &str) -> usize {
        self.shared.rooms.lock().get(room).map_or(0, |h| h.refs)
    }

    pub fn held_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.shared.rooms.lock().keys().cloned().collect();
        rooms.sort();
        rooms
    }

    pub fn consumers(&self) -> usize {
        self.shared.consumers.load(Ordering::Acquire)
    }

    /// Releases this handle; the last one closes the connection
    pub fn disconnect(mut self) {
        self.release();
    }

    fn ensure_open(&self) -> Result<(), RelayError> {
        if self.shared.closed.load(Ordering::Acquire) {
            Err(RelayError::Closed)
        } else {
            Ok(())
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.shared.consumers.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        self.shared.closed.store(true, Ordering::Release);
        if let Err(e) = self.shared.transport.send(&ClientEvent::PeerDisconnect(PeerDisconnect::default())) {
            debug!(error = %e, "peer_disconnect not delivered");
        }
        self.shared.transport.close();
        info!("relay channel closed");
    }
}

impl Clone for RelayChannel {
    fn clone(&self) -> Self {
        self.shared.consumers.fetch_add(1, Ordering::AcqRel);
        Self { shared: self.shared.clone(), released: false }
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        self.release();
    }
}

fn room_key(room: &str) -> Result<&str, RelayError> {
    validate_room_id(room)?;
    Ok(room)
}


#[cfg(test)]
mod tests {
    use super::testing::{channel, RecordingTransport};
    use super::*;
    use corridor_contracts::{ActiveCorridorUpdate, Battery, CorridorPhase, ServerEvent, TelemetryUpdate};
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_and_leave_are_reference_counted() {
        let (relay, transport, _tx) = channel();
        relay.join("safe-1").unwrap();
        relay.join("safe-1").unwrap();
        assert_eq!(relay.ref_count("safe-1"), 2);
        assert_eq!(transport.take(), vec![ClientEvent::JoinRoom("safe-1".into())]);

        relay.leave("safe-1").unwrap();
        assert!(transport.take().is_empty());
        relay.leave("safe-1").unwrap();
        assert_eq!(transport.take(), vec![ClientEvent::LeaveRoom("safe-1".into())]);

        relay.leave("never-joined").unwrap();
        assert!(transport.take().is_empty());
    }

    #[tokio::test]
    async fn test_blank_room_rejected_before_network() {
        let (relay, transport, _tx) = channel();
        assert!(matches!(relay.join("  "), Err(RelayError::Contract(ContractError::EmptyRoom))));
        assert!(matches!(relay.join_zone(""), Err(RelayError::Contract(_))));
        assert!(transport.take().is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_on_reconnect() {
        let (relay, transport, tx) = channel();
        relay.join("safe-1").unwrap();
        relay.join_zone("city-core").unwrap();
        transport.take();

        transport.connected.store(false, Ordering::SeqCst);
        tx.send(TransportSignal::Disconnected).unwrap();
        transport.connected.store(true, Ordering::SeqCst);
        tx.send(TransportSignal::Connected).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut rejoined = transport.take();
        rejoined.sort_by_key(|e| format!("{e:?}"));
        assert_eq!(
            rejoined,
            vec![ClientEvent::JoinRoom("safe-1".into()), ClientEvent::JoinSirenZone("city-core".into())]
        );
    }

    #[tokio::test]
    async fn test_join_while_offline_is_announced_on_connect() {
        let (relay, transport, tx) = channel();
        transport.connected.store(false, Ordering::SeqCst);
        relay.join("safe-1").unwrap();
        assert!(transport.take().is_empty());

        transport.connected.store(true, Ordering::SeqCst);
        tx.send(TransportSignal::Connected).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.take(), vec![ClientEvent::JoinRoom("safe-1".into())]);
    }

    #[tokio::test]
    async fn test_emit_validates_and_reports_offline() {
        let (relay, transport, _tx) = channel();
        let bad = ClientEvent::TelemetryUpdate(TelemetryUpdate {
            room_id: "safe-1".into(),
            lat: f64::NAN,
            lng: 0.0,
            battery: Battery::Unknown,
            status: "x".into(),
        });
        assert!(matches!(relay.emit(bad), Err(RelayError::Contract(_))));

        transport.connected.store(false, Ordering::SeqCst);
        let ok = ClientEvent::LeaveRoom("safe-1".into());
        assert!(matches!(relay.emit(ok), Err(RelayError::NotConnected)));
    }

    #[tokio::test]
    async fn test_handlers_receive_matching_deliveries() {
        let (relay, _transport, tx) = channel();
        let mut corridor = relay.subscribe(EventName::ActiveCorridorUpdate);
        let mut siren = relay.subscribe(EventName::VirtualSirenAlert);

        let update = Delivery::new(
            "city-core",
            ServerEvent::ActiveCorridorUpdate(ActiveCorridorUpdate { active: true, phase: CorridorPhase::Clearing }),
        );
        tx.send(TransportSignal::Delivery(update.clone())).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), corridor.recv()).await.unwrap().unwrap();
        assert_eq!(got, update);
        assert!(siren.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_last_handle_closes_transport() {
        let (relay, transport, _tx) = channel();
        let second = relay.clone();
        assert_eq!(relay.consumers(), 2);

        relay.disconnect();
        assert!(!transport.closed.load(Ordering::SeqCst));
        assert!(second.is_connected());

        drop(second);
        assert!(transport.closed.load(Ordering::SeqCst));
        assert_eq!(transport.take(), vec![ClientEvent::PeerDisconnect(PeerDisconnect::default())]);
    }

    /// Forwards to a recorder, then runs a one-shot hook on the first uplink after arming
    struct HookTransport {
        inner: Arc<RecordingTransport>,
        hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl RelayTransport for HookTransport {
        fn send(&self, event: &ClientEvent) -> Result<(), RelayError> {
            let sent = self.inner.send(event);
            let hook = self.hook.lock().take();
            if let Some(hook) = hook {
                hook();
            }
            sent
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        fn close(&self) {
            self.inner.close();
        }
    }

    #[tokio::test]
    async fn test_leave_after_rejoin_snapshot_is_not_overtaken() {
        let (relay, transport, _tx) = channel();
        relay.join("safe-1").unwrap();
        relay.join_zone("city-core").unwrap();
        transport.take();

        let held = relay.shared.held_snapshot();
        relay.leave("safe-1").unwrap();
        assert_eq!(relay.shared.announce_held(&held), 1);

        assert_eq!(
            transport.take(),
            vec![ClientEvent::LeaveRoom("safe-1".into()), ClientEvent::JoinSirenZone("city-core".into())]
        );
        assert_eq!(relay.ref_count("safe-1"), 0);
    }

    #[tokio::test]
    async fn test_leave_during_reconnect_leaves_no_stale_join() {
        let recorder = RecordingTransport::connected();
        let hooked = Arc::new(HookTransport { inner: recorder.clone(), hook: Mutex::new(None) });
        let (tx, rx) = mpsc::unbounded_channel();
        let relay = RelayChannel::connect(hooked.clone(), rx);
        relay.join("safe-1").unwrap();
        relay.join_zone("city-core").unwrap();
        recorder.take();

        let stopping = relay.clone();
        *hooked.hook.lock() = Some(Box::new(move || {
            stopping.leave("safe-1").unwrap();
            stopping.leave("city-core").unwrap();
        }));
        tx.send(TransportSignal::Connected).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sent = recorder.take();
        assert_eq!(sent.len(), 3, "one rejoin, then both leaves: {sent:?}");
        assert!(matches!(sent[0], ClientEvent::JoinRoom(_) | ClientEvent::JoinSirenZone(_)));
        assert!(sent[1..].iter().all(|e| matches!(e, ClientEvent::LeaveRoom(_))));
        assert!(relay.held_rooms().is_empty());
    }

    #[tokio::test]
    async fn test_room_kind_conflict_is_rejected() {
        let (relay, transport, _tx) = channel();
        relay.join_zone("city-core").unwrap();
        assert!(matches!(
            relay.join("city-core"),
            Err(RelayError::RoomKindConflict { held: RoomKind::Zone, .. })
        ));
        assert_eq!(relay.ref_count("city-core"), 1);
        assert_eq!(transport.take(), vec![ClientEvent::JoinSirenZone("city-core".into())]);
    }
}
