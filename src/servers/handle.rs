use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crossbeam_channel::Sender;
use itertools::Itertools;
use log::{debug, info};

use crate::{
    error::{ServerError, TransportError},
    packet::Packet,
    transport::{ConnectionId, DeliveryMethod, Transport},
};

use super::{
    handlers::{HandlerRegistry, PacketHandler},
    peers::Peer,
    ServerCommand, SHUTDOWN_REASON,
};

/// Cloneable access to a running [`super::BrickServer`].
///
/// Handed to every [`super::PeerHandlerFactory`] call and meant to be
/// captured by handlers that need to send packets. Every method can be
/// called from any thread.
#[derive(Clone)]
pub struct ServerHandle {
    transport: Arc<dyn Transport>,
    client_handlers: HandlerRegistry,
    server_handlers: HandlerRegistry,
    command_send: Sender<ServerCommand>,
    running: Arc<AtomicBool>,
    target_topic: String,
}

impl ServerHandle {
    pub(super) fn new(
        transport: Arc<dyn Transport>,
        command_send: Sender<ServerCommand>,
        target_topic: String,
    ) -> Self {
        Self {
            transport,
            client_handlers: HandlerRegistry::new(),
            server_handlers: HandlerRegistry::new(),
            command_send,
            running: Arc::new(AtomicBool::new(false)),
            target_topic,
        }
    }

    #[inline]
    pub(super) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    #[inline]
    pub(super) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// log target of the server
    #[inline]
    pub(super) fn target_topic(&self) -> &str {
        &self.target_topic
    }

    /// Marks the server stopped and shuts the transport down, remotes get
    /// [`SHUTDOWN_REASON`]
    pub(super) fn close(&self) {
        self.set_running(false);
        self.transport.shutdown(SHUTDOWN_REASON);
    }

    /// `false` once a shutdown has been requested or the loop has exited
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// address the server transport is bound to
    #[inline]
    #[must_use]
    pub fn local_address(&self) -> SocketAddr {
        self.transport.local_address()
    }

    /// Sends `packet` to one peer.
    ///
    /// # Errors
    /// if the packet cannot be encoded or the transport refuses the send
    pub fn send(
        &self,
        packet: &Packet,
        peer: &Peer,
        method: DeliveryMethod,
        channel: u8,
    ) -> Result<(), ServerError> {
        let data: Vec<u8> = packet.to_wire()?;
        self.transport
            .send(&data, &[peer.connection().id()], method, channel)?;
        Ok(())
    }

    /// Encodes `packet` once and sends it to every peer in `peers`.
    /// A peer listed twice receives the packet once.
    ///
    /// # Errors
    /// if the packet cannot be encoded or the transport refuses the send
    pub fn send_many<'a>(
        &self,
        packet: &Packet,
        peers: impl IntoIterator<Item = &'a Peer>,
        method: DeliveryMethod,
        channel: u8,
    ) -> Result<(), ServerError> {
        let recipients: Vec<ConnectionId> = peers
            .into_iter()
            .map(|p| p.connection().id())
            .unique()
            .collect_vec();
        if recipients.is_empty() {
            debug!(target: &self.target_topic, "No recipients for packet {:?}, skipping send", packet.key());
            return Ok(());
        }
        let data: Vec<u8> = packet.to_wire()?;
        self.transport.send(&data, &recipients, method, channel)?;
        Ok(())
    }

    /// Sends `packet` to every connected remote, clients and servers alike.
    ///
    /// # Errors
    /// if the packet cannot be encoded or the transport refuses the send
    pub fn send_to_all(&self, packet: &Packet, method: DeliveryMethod) -> Result<(), ServerError> {
        let data: Vec<u8> = packet.to_wire()?;
        self.transport.send_to_all(&data, method)?;
        Ok(())
    }

    /// Registry used for packets coming from client peers
    #[inline]
    #[must_use]
    pub fn client_handlers(&self) -> &HandlerRegistry {
        &self.client_handlers
    }

    /// Registry used for packets coming from federated server peers
    #[inline]
    #[must_use]
    pub fn server_handlers(&self) -> &HandlerRegistry {
        &self.server_handlers
    }

    /// registers `handler` for packets sent by client peers
    pub fn add_handler(&self, handler: Arc<dyn PacketHandler>) {
        self.client_handlers.add(handler);
    }

    /// unregisters a client handler, `false` if it was not registered
    pub fn remove_handler(&self, handler: &Arc<dyn PacketHandler>) -> bool {
        self.client_handlers.remove(handler)
    }

    /// registers `handler` for packets sent by server peers
    pub fn add_server_handler(&self, handler: Arc<dyn PacketHandler>) {
        self.server_handlers.add(handler);
    }

    /// unregisters a server handler, `false` if it was not registered
    pub fn remove_server_handler(&self, handler: &Arc<dyn PacketHandler>) -> bool {
        self.server_handlers.remove(handler)
    }

    /// Opens an outbound connection to another server. Once established it
    /// shows up as an ordinary `Connected` event.
    ///
    /// # Errors
    /// if the transport cannot start the attempt
    pub fn connect_to_server(&self, address: SocketAddr) -> Result<(), ServerError> {
        info!(target: &self.target_topic, "Connecting to server at {address}");
        self.transport.connect(address)?;
        Ok(())
    }

    /// Asks the dispatch worker to close the connection with `address`
    ///
    /// # Errors
    /// [`TransportError::Closed`] if the server is gone
    pub fn disconnect(&self, address: SocketAddr, reason: &str) -> Result<(), ServerError> {
        self.command_send
            .send(ServerCommand::Disconnect {
                address,
                reason: reason.to_string(),
            })
            .map_err(|_| ServerError::Transport(TransportError::Closed))
    }

    /// Requests the dispatch loop to stop
    pub fn shutdown(&self) {
        info!(target: &self.target_topic, "Shutdown requested");
        self.set_running(false);
        let _ = self.command_send.send(ServerCommand::Shutdown);
    }
}
