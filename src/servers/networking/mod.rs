use std::net::SocketAddr;

use log::{info, warn};

use crate::{
    error::ServerError,
    transport::{ConnectionId, ConnectionStatus},
};

use super::{
    peers::{Connection, Peer, PeerHandler},
    BrickServer, PeerHandlerFactory,
};


impl<F: PeerHandlerFactory> BrickServer<F> {
    /// Every remote is accepted, the transport enforces the connection limit
    pub(crate) fn approve_connection(&self, sender: SocketAddr, connection: ConnectionId) {
        match self.handle.transport().approve(connection) {
            Ok(()) => info!(target: &self.target_topic, "Approved connection {connection} from {sender}"),
            Err(e) => warn!(target: &self.target_topic, "Unable to approve connection from {sender}: {e}"),
        }
    }

    pub(crate) fn handle_status(
        &mut self,
        sender: SocketAddr,
        connection: ConnectionId,
        status: ConnectionStatus,
        reason: &str,
    ) -> Result<(), ServerError> {
        info!(target: &self.target_topic, "Status changed for {sender}. New status: {status}");
        match status {
            ConnectionStatus::Connecting => {
                self.pending.insert(sender);
                Ok(())
            }
            ConnectionStatus::Connected => self.handle_connected(sender, connection),
            ConnectionStatus::Disconnected => self.handle_disconnected(sender, reason),
        }
    }

    fn handle_connected(
        &mut self,
        sender: SocketAddr,
        connection: ConnectionId,
    ) -> Result<(), ServerError> {
        self.pending.remove(&sender);
        if self.peers.contains(&sender) {
            return Err(ServerError::DuplicatePeer(sender));
        }

        let handler: Box<dyn PeerHandler> = self.factory.create_handler(sender, &self.handle);
        let peer: Peer = Peer::new(Connection::new(connection, sender), handler);
        let is_server: bool = peer.is_server();
        match self.peers.insert(peer) {
            Ok(peer) => peer.handler_mut().on_connect(sender),
            // checked above, the table is only touched by this thread
            Err(_) => return Err(ServerError::DuplicatePeer(sender)),
        }
        info!(target: &self.target_topic,
            "{} {sender} connected, {} peers online",
            if is_server { "Server" } else { "Client" },
            self.peers.len()
        );
        Ok(())
    }

    fn handle_disconnected(&mut self, sender: SocketAddr, reason: &str) -> Result<(), ServerError> {
        if let Some(mut peer) = self.peers.remove(&sender) {
            peer.handler_mut().on_disconnect(reason);
            info!(target: &self.target_topic,
                "Peer {sender} disconnected ({reason}), {} peers online",
                self.peers.len()
            );
            Ok(())
        } else if self.pending.remove(&sender) {
            warn!(target: &self.target_topic, "Connection attempt with {sender} failed: {reason}");
            Ok(())
        } else {
            self.unknown_peer(sender, "disconnected")
        }
    }
}
