//! In-process transport.
//!
//! Endpoints bound to the same [`MemoryNetwork`] exchange messages through
//! crossbeam channels without touching the network stack. Used to run
//! several server tiers inside one process and by the test suites.
//!
//! Every link is reliable and ordered, the requested [`DeliveryMethod`]
//! and sequence channel are accepted but not needed.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};

use super::{
    ConnectionId, ConnectionStatus, DeliveryMethod, Transport, TransportConfig, TransportEvent,
    TransportResult,
};
use crate::error::TransportError;

/// first port handed out when binding to port 0
const EPHEMERAL_PORT_START: u16 = 49152;

/// Reason sent to a remote refused because the acceptor is full
pub const SERVER_FULL_REASON: &str = "Server full";
/// Reason sent to a remote using a different application identifier
pub const WRONG_IDENTIFIER_REASON: &str = "Wrong application identifier!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    /// acceptor side, waiting for [`Transport::approve`]
    AwaitingApproval,
    /// initiator side, waiting for the acceptor
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    remote: SocketAddr,
    remote_id: ConnectionId,
    state: LinkState,
}

#[derive(Debug)]
struct Endpoint {
    /// distinguishes successive endpoints bound at the same address
    token: u64,
    app_identifier: String,
    max_connections: usize,
    started: bool,
    events: Sender<TransportEvent>,
    links: HashMap<ConnectionId, Link>,
}

impl Endpoint {
    fn push(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn push_status(
        &self,
        sender: SocketAddr,
        connection: ConnectionId,
        status: ConnectionStatus,
        reason: &str,
    ) {
        self.push(TransportEvent::StatusChanged {
            sender,
            connection,
            status,
            reason: reason.to_string(),
        });
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    endpoints: HashMap<SocketAddr, Endpoint>,
    next_id: u64,
}

impl NetworkState {
    fn next_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(self.next_id)
    }

    fn free_port(&self, ip: IpAddr) -> Option<u16> {
        (EPHEMERAL_PORT_START..=u16::MAX)
            .find(|&port| !self.endpoints.contains_key(&SocketAddr::new(ip, port)))
    }

    /// removes a link from both of its ends and notifies both of them
    fn close_link(&mut self, local: SocketAddr, id: ConnectionId, reason: &str) -> Option<Link> {
        let link: Link = self.endpoints.get_mut(&local)?.links.remove(&id)?;
        if let Some(endpoint) = self.endpoints.get(&local) {
            endpoint.push_status(link.remote, id, ConnectionStatus::Disconnected, reason);
        }
        if let Some(remote) = self.endpoints.get_mut(&link.remote) {
            if remote.links.remove(&link.remote_id).is_some() {
                remote.push_status(local, link.remote_id, ConnectionStatus::Disconnected, reason);
            }
        }
        Some(link)
    }
}

/// Hub shared by every [`MemoryTransport`] that should be able to reach
/// each other. Cloning yields another handle to the same hub.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Creates an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether an endpoint is bound at `address`
    #[must_use]
    pub fn is_bound(&self, address: SocketAddr) -> bool {
        self.state().endpoints.contains_key(&address)
    }
}

/// [`Transport`] endpoint living on a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    token: u64,
    address: SocketAddr,
    events: Receiver<TransportEvent>,
}

impl MemoryTransport {
    /// Binds a new endpoint on `network` at the address in `config`.
    ///
    /// Port 0 picks the first free port starting at 49152.
    ///
    /// # Errors
    /// [`TransportError::AddressInUse`] if another endpoint holds the address
    pub fn bind(network: &MemoryNetwork, config: &TransportConfig) -> TransportResult<Self> {
        let mut state = network.state();
        let address: SocketAddr = if config.port == 0 {
            let port: u16 = state
                .free_port(config.address)
                .ok_or(TransportError::AddressInUse(config.bind_address()))?;
            SocketAddr::new(config.address, port)
        } else {
            config.bind_address()
        };
        if state.endpoints.contains_key(&address) {
            return Err(TransportError::AddressInUse(address));
        }

        let token: u64 = state.next_id().0;
        let (events_send, events_recv) = crossbeam_channel::unbounded();
        state.endpoints.insert(
            address,
            Endpoint {
                token,
                app_identifier: config.app_identifier.clone(),
                max_connections: config.max_connections,
                started: false,
                events: events_send,
                links: HashMap::new(),
            },
        );
        info!("Memory endpoint {} bound at {address}", config.app_identifier);

        Ok(Self {
            network: network.clone(),
            token,
            address,
            events: events_recv,
        })
    }

    /// Number of links (pending or connected) held by this endpoint
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.network
            .state()
            .endpoints
            .get(&self.address)
            .map_or(0, |e| e.links.len())
    }

    fn close(&self, reason: &str) {
        let mut state = self.network.state();
        let ids: Vec<ConnectionId> = match state.endpoints.get(&self.address) {
            Some(endpoint) if endpoint.token == self.token => {
                endpoint.links.keys().copied().collect()
            }
            _ => return,
        };
        for id in ids {
            state.close_link(self.address, id, reason);
        }
        state.endpoints.remove(&self.address);
        debug!("Memory endpoint {} unbound", self.address);
    }
}

impl Transport for MemoryTransport {
    fn start(&self) -> TransportResult<()> {
        let mut state = self.network.state();
        let endpoint: &mut Endpoint = state
            .endpoints
            .get_mut(&self.address)
            .ok_or(TransportError::Closed)?;
        endpoint.started = true;
        endpoint.push(TransportEvent::DebugMessage(format!(
            "Endpoint {} listening on {}",
            endpoint.app_identifier, self.address
        )));
        Ok(())
    }

    fn shutdown(&self, reason: &str) {
        self.close(reason);
    }

    fn local_address(&self) -> SocketAddr {
        self.address
    }

    fn events(&self) -> Receiver<TransportEvent> {
        self.events.clone()
    }

    fn approve(&self, connection: ConnectionId) -> TransportResult<()> {
        let mut state = self.network.state();
        let link: Link = state
            .endpoints
            .get_mut(&self.address)
            .and_then(|e| e.links.get_mut(&connection))
            .filter(|l| l.state == LinkState::AwaitingApproval)
            .map(|l| {
                l.state = LinkState::Connected;
                *l
            })
            .ok_or(TransportError::UnknownConnection(connection))?;

        if let Some(remote) = state.endpoints.get_mut(&link.remote) {
            if let Some(remote_link) = remote.links.get_mut(&link.remote_id) {
                remote_link.state = LinkState::Connected;
                remote.push_status(
                    self.address,
                    link.remote_id,
                    ConnectionStatus::Connected,
                    "",
                );
            }
        }
        if let Some(local) = state.endpoints.get(&self.address) {
            local.push_status(link.remote, connection, ConnectionStatus::Connected, "");
        }
        Ok(())
    }

    fn connect(&self, address: SocketAddr) -> TransportResult<()> {
        let mut state = self.network.state();
        let (identifier, already_linked) = {
            let local: &Endpoint = state
                .endpoints
                .get(&self.address)
                .ok_or(TransportError::Closed)?;
            (
                local.app_identifier.clone(),
                local.links.values().any(|l| l.remote == address),
            )
        };
        if already_linked {
            if let Some(local) = state.endpoints.get(&self.address) {
                local.push(TransportEvent::WarningMessage(format!(
                    "Already connected to {address}"
                )));
            }
            return Ok(());
        }
        match state.endpoints.get(&address) {
            Some(remote) if remote.started => {}
            _ => return Err(TransportError::Unreachable(address)),
        }

        let local_id: ConnectionId = state.next_id();
        let remote_id: ConnectionId = state.next_id();

        // the local side always sees the attempt start
        if let Some(local) = state.endpoints.get(&self.address) {
            local.push_status(address, local_id, ConnectionStatus::Connecting, "");
        }

        let refusal: Option<&str> = state.endpoints.get(&address).and_then(|remote| {
            if remote.app_identifier != identifier {
                Some(WRONG_IDENTIFIER_REASON)
            } else if remote.links.len() >= remote.max_connections {
                Some(SERVER_FULL_REASON)
            } else {
                None
            }
        });
        if let Some(reason) = refusal {
            if let Some(remote) = state.endpoints.get(&address) {
                remote.push(TransportEvent::DebugMessage(format!(
                    "Refused connection from {}: {reason}",
                    self.address
                )));
            }
            if let Some(local) = state.endpoints.get(&self.address) {
                local.push_status(address, local_id, ConnectionStatus::Disconnected, reason);
            }
            return Ok(());
        }

        if let Some(local) = state.endpoints.get_mut(&self.address) {
            local.links.insert(
                local_id,
                Link {
                    remote: address,
                    remote_id,
                    state: LinkState::Connecting,
                },
            );
        }
        if let Some(remote) = state.endpoints.get_mut(&address) {
            remote.links.insert(
                remote_id,
                Link {
                    remote: self.address,
                    remote_id: local_id,
                    state: LinkState::AwaitingApproval,
                },
            );
            remote.push_status(self.address, remote_id, ConnectionStatus::Connecting, "");
            remote.push(TransportEvent::ConnectionApproval {
                sender: self.address,
                connection: remote_id,
            });
        }
        Ok(())
    }

    fn disconnect(&self, connection: ConnectionId, reason: &str) -> TransportResult<()> {
        self.network
            .state()
            .close_link(self.address, connection, reason)
            .map(|_| ())
            .ok_or(TransportError::UnknownConnection(connection))
    }

    fn send(
        &self,
        data: &[u8],
        recipients: &[ConnectionId],
        _method: DeliveryMethod,
        _channel: u8,
    ) -> TransportResult<()> {
        let state = self.network.state();
        let local: &Endpoint = state
            .endpoints
            .get(&self.address)
            .ok_or(TransportError::Closed)?;

        let mut targets: Vec<&Endpoint> = Vec::with_capacity(recipients.len());
        for id in recipients {
            let target: &Endpoint = local
                .links
                .get(id)
                .filter(|l| l.state == LinkState::Connected)
                .and_then(|l| state.endpoints.get(&l.remote))
                .ok_or(TransportError::UnknownConnection(*id))?;
            targets.push(target);
        }
        for target in targets {
            target.push(TransportEvent::Data {
                sender: self.address,
                data: data.to_vec(),
            });
        }
        Ok(())
    }

    fn send_to_all(&self, data: &[u8], _method: DeliveryMethod) -> TransportResult<()> {
        let state = self.network.state();
        let local: &Endpoint = state
            .endpoints
            .get(&self.address)
            .ok_or(TransportError::Closed)?;
        for link in local
            .links
            .values()
            .filter(|l| l.state == LinkState::Connected)
        {
            if let Some(target) = state.endpoints.get(&link.remote) {
                target.push(TransportEvent::Data {
                    sender: self.address,
                    data: data.to_vec(),
                });
            }
        }
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close("endpoint dropped");
    }
}
