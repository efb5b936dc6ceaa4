use std::{
    collections::HashSet,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
};

use crossbeam_channel::{Receiver, Sender};

use crate::{
    error::TransportError,
    packet::{Packet, PacketCode, PacketType},
    transport::{
        ConnectionId, ConnectionStatus, DeliveryMethod, Transport, TransportEvent,
        TransportResult,
    },
};

use super::{
    BrickServer, FnHandler, PacketHandler, PeerHandler, PeerHandlerFactory, ServerConfig,
    ServerHandle,
};

/// enables the logs for the current test binary
pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[must_use]
pub(crate) fn addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Callback observed by a [`RecordingHandler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Connect(SocketAddr),
    Disconnect(SocketAddr, String),
}

pub(crate) type Journal = Arc<Mutex<Vec<Lifecycle>>>;

pub(crate) fn entries(journal: &Journal) -> Vec<Lifecycle> {
    journal.lock().unwrap().clone()
}

/// [`PeerHandler`] writing its callbacks into a shared journal
pub(crate) struct RecordingHandler {
    address: SocketAddr,
    server: bool,
    journal: Journal,
}

impl PeerHandler for RecordingHandler {
    fn is_server(&self) -> bool {
        self.server
    }

    fn on_connect(&mut self, address: SocketAddr) {
        assert_eq!(address, self.address);
        self.journal.lock().unwrap().push(Lifecycle::Connect(address));
    }

    fn on_disconnect(&mut self, reason: &str) {
        self.journal
            .lock()
            .unwrap()
            .push(Lifecycle::Disconnect(self.address, reason.to_string()));
    }
}

/// Builds [`RecordingHandler`]s, peers at `server_addresses` are servers
#[derive(Default)]
pub(crate) struct RecordingFactory {
    pub(crate) journal: Journal,
    pub(crate) server_addresses: HashSet<SocketAddr>,
}

impl PeerHandlerFactory for RecordingFactory {
    fn create_handler(
        &mut self,
        address: SocketAddr,
        _server: &ServerHandle,
    ) -> Box<dyn PeerHandler> {
        Box::new(RecordingHandler {
            address,
            server: self.server_addresses.contains(&address),
            journal: Arc::clone(&self.journal),
        })
    }
}

/// Send recorded by [`MockTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Sent {
    To(Vec<ConnectionId>, Vec<u8>),
    All(Vec<u8>),
}

/// Transport driven by the test: events are pushed by hand and every
/// outbound operation is recorded
pub(crate) struct MockTransport {
    event_send: Mutex<Option<Sender<TransportEvent>>>,
    event_recv: Receiver<TransportEvent>,
    pub(crate) started: Mutex<bool>,
    pub(crate) approved: Mutex<Vec<ConnectionId>>,
    pub(crate) connects: Mutex<Vec<SocketAddr>>,
    pub(crate) sent: Mutex<Vec<Sent>>,
    pub(crate) shutdown_reason: Mutex<Option<String>>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        let (event_send, event_recv) = crossbeam_channel::unbounded();
        Arc::new(Self {
            event_send: Mutex::new(Some(event_send)),
            event_recv,
            started: Mutex::new(false),
            approved: Mutex::new(Vec::new()),
            connects: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            shutdown_reason: Mutex::new(None),
        })
    }

    pub(crate) fn push(&self, event: TransportEvent) {
        if let Some(s) = self.event_send.lock().unwrap().as_ref() {
            s.send(event).unwrap();
        }
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn start(&self) -> TransportResult<()> {
        *self.started.lock().unwrap() = true;
        Ok(())
    }

    fn shutdown(&self, reason: &str) {
        *self.shutdown_reason.lock().unwrap() = Some(reason.to_string());
        self.event_send.lock().unwrap().take();
    }

    fn local_address(&self) -> SocketAddr {
        addr(9000)
    }

    fn events(&self) -> Receiver<TransportEvent> {
        self.event_recv.clone()
    }

    fn approve(&self, connection: ConnectionId) -> TransportResult<()> {
        self.approved.lock().unwrap().push(connection);
        Ok(())
    }

    fn connect(&self, address: SocketAddr) -> TransportResult<()> {
        if address.port() == 1 {
            return Err(TransportError::Unreachable(address));
        }
        self.connects.lock().unwrap().push(address);
        Ok(())
    }

    fn disconnect(&self, connection: ConnectionId, _reason: &str) -> TransportResult<()> {
        Err(TransportError::UnknownConnection(connection))
    }

    fn send(
        &self,
        data: &[u8],
        recipients: &[ConnectionId],
        _method: DeliveryMethod,
        _channel: u8,
    ) -> TransportResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::To(recipients.to_vec(), data.to_vec()));
        Ok(())
    }

    fn send_to_all(&self, data: &[u8], _method: DeliveryMethod) -> TransportResult<()> {
        self.sent.lock().unwrap().push(Sent::All(data.to_vec()));
        Ok(())
    }
}

/// get a minimal [`BrickServer`] over a [`MockTransport`]
#[must_use]
pub(crate) fn get_dummy_server(
    config: ServerConfig,
    server_addresses: &[SocketAddr],
) -> (BrickServer<RecordingFactory>, Arc<MockTransport>, Journal) {
    let transport: Arc<MockTransport> = MockTransport::new();
    let factory: RecordingFactory = RecordingFactory {
        journal: Journal::default(),
        server_addresses: server_addresses.iter().copied().collect(),
    };
    let journal: Journal = Arc::clone(&factory.journal);
    let server: BrickServer<RecordingFactory> =
        BrickServer::new(config, transport.clone(), factory);
    (server, transport, journal)
}

pub(crate) fn connected(address: SocketAddr, id: u64) -> TransportEvent {
    TransportEvent::StatusChanged {
        sender: address,
        connection: ConnectionId(id),
        status: ConnectionStatus::Connected,
        reason: String::new(),
    }
}

pub(crate) fn connecting(address: SocketAddr, id: u64) -> TransportEvent {
    TransportEvent::StatusChanged {
        sender: address,
        connection: ConnectionId(id),
        status: ConnectionStatus::Connecting,
        reason: String::new(),
    }
}

pub(crate) fn disconnected(address: SocketAddr, id: u64, reason: &str) -> TransportEvent {
    TransportEvent::StatusChanged {
        sender: address,
        connection: ConnectionId(id),
        status: ConnectionStatus::Disconnected,
        reason: reason.to_string(),
    }
}

pub(crate) fn data(address: SocketAddr, packet: &Packet) -> TransportEvent {
    TransportEvent::Data {
        sender: address,
        data: packet.to_wire().unwrap(),
    }
}

/// Calls made to a recorder handler: (handler name, packet, sender)
pub(crate) type Calls = Arc<Mutex<Vec<(String, Packet, SocketAddr)>>>;

/// handler pushing every call into `calls`
pub(crate) fn recorder(
    name: &str,
    code: PacketCode,
    packet_type: PacketType,
    calls: &Calls,
) -> Arc<dyn PacketHandler> {
    let calls: Calls = Arc::clone(calls);
    let owned: String = name.to_string();
    FnHandler::new(name, code, packet_type, move |packet, peer, _peers| {
        calls
            .lock()
            .unwrap()
            .push((owned.clone(), packet.clone(), peer.address()));
        Ok(())
    })
}

pub(crate) fn recorded(calls: &Calls) -> Vec<(String, Packet, SocketAddr)> {
    calls.lock().unwrap().clone()
}
