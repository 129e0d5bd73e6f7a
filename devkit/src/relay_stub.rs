/*!
Transports relay pour tests sans broker

- `MockRelayTransport` : enregistre chaque uplink, connexion pilotable à la main,
  injection de signaux (Connected / Disconnected / Delivery)
- `LoopbackTransport` : branche un `RelayChannel` guardian directement sur le hub
  du kernel (dispatch in-process), avec perte/reprise de connexion simulée
*/

use corridor_contracts::{ClientEvent, Delivery};
use corridor_guardian::channel::{RelayChannel, RelayError, RelayTransport, TransportSignal};
use corridor_kernel::dispatch::dispatch;
use corridor_kernel::hub::{DeliveryError, PeerSink};
use corridor_kernel::zones::ZoneBroadcastService;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Transport qui enregistre les uplinks au lieu de les publier
pub struct MockRelayTransport {
    sent: Mutex<Vec<ClientEvent>>,
    connected: AtomicBool,
    closed: AtomicBool,
    signals: mpsc::UnboundedSender<TransportSignal>,
}

impl MockRelayTransport {
    /// Transport déjà connecté (signal `Connected` en file)
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            signals: tx,
        });
        transport.signal(TransportSignal::Connected);
        (transport, rx)
    }

    /// Canal relay complet au-dessus d'un mock
    pub fn channel() -> (RelayChannel, Arc<Self>) {
        let (transport, rx) = Self::new();
        (RelayChannel::connect(transport.clone(), rx), transport)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.signal(if connected { TransportSignal::Connected } else { TransportSignal::Disconnected });
    }

    /// Simule une livraison venant du kernel
    pub fn inject(&self, delivery: Delivery) {
        self.signal(TransportSignal::Delivery(delivery));
    }

    pub fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<ClientEvent> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn signal(&self, signal: TransportSignal) {
        let _ = self.signals.send(signal);
    }
}

impl RelayTransport for MockRelayTransport {
    fn send(&self, event: &ClientEvent) -> Result<(), RelayError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RelayError::NotConnected);
        }
        debug!(event = %event.name(), "[MOCK] uplink");
        self.sent.lock().push(event.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Downlink d'un peer loopback : les livraisons du hub deviennent des signaux guardian
struct LoopbackSink {
    signals: mpsc::UnboundedSender<TransportSignal>,
}

impl PeerSink for LoopbackSink {
    fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
        self.signals
            .send(TransportSignal::Delivery(delivery.clone()))
            .map_err(|_| DeliveryError::Closed)
    }
}

/// Transport in-process : uplink = `dispatch` du kernel, downlink = sink du hub
pub struct LoopbackTransport {
    peer_id: String,
    zones: ZoneBroadcastService,
    signals: mpsc::UnboundedSender<TransportSignal>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackTransport {
    pub fn attach(zones: &ZoneBroadcastService, peer_id: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            peer_id: peer_id.to_string(),
            zones: zones.clone(),
            signals: tx,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        transport.restore();
        (transport, rx)
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Perte de connexion : le kernel détache le peer comme sur un last-will
    pub fn drop_connection(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.zones.hub().detach(&self.peer_id);
            let _ = self.signals.send(TransportSignal::Disconnected);
        }
    }

    /// Reprise de connexion : nouveau sink, puis `Connected` (le canal refait ses joins)
    pub fn restore(&self) {
        if self.closed.load(Ordering::SeqCst) || self.connected.swap(true, Ordering::SeqCst) {
            return;
        }
        let sink = Arc::new(LoopbackSink { signals: self.signals.clone() });
        self.zones.hub().attach(&self.peer_id, sink);
        let _ = self.signals.send(TransportSignal::Connected);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl RelayTransport for LoopbackTransport {
    fn send(&self, event: &ClientEvent) -> Result<(), RelayError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RelayError::NotConnected);
        }
        dispatch(&self.zones, &self.peer_id, event.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}
