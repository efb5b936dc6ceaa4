use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{select_biased, Receiver};
use log::{debug, error, info, warn};

use crate::{error::ServerError, transport::{Transport, TransportEvent}};

mod config;
mod handle;
/// Packet handlers and their registries
pub mod handlers;
mod networking;
mod packet_handling;
/// Connected peers and their per peer handlers
pub mod peers;
/// Servers federated to an upstream master
pub mod tiered;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{ServerConfig, UnknownPeerPolicy};
pub use handle::ServerHandle;
pub use handlers::{FnHandler, HandlerRegistry, PacketHandler};
pub use peers::{Connection, Peer, PeerHandler, PeerHandlerFactory, PeerTable};

/// reason given to remotes when the loop exits
pub const SHUTDOWN_REASON: &str = "server shutdown";

/// Requests delivered to the dispatch worker through its control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// close the connection with a peer
    Disconnect {
        /// peer address
        address: SocketAddr,
        /// reason sent to the remote
        reason: String,
    },
    /// stop the dispatch loop
    Shutdown,
}

/// Server turning transport events into peers and routing their packets to
/// the registered [`PacketHandler`]s.
///
/// All peer bookkeeping and handler invocations happen on the single thread
/// running [`BrickServer::run`]; handlers are expected to return quickly.
pub struct BrickServer<F: PeerHandlerFactory> {
    config: ServerConfig,
    handle: ServerHandle,
    factory: F,
    peers: PeerTable,
    /// addresses with a connection attempt that has not completed yet
    pending: HashSet<SocketAddr>,
    command_recv: Receiver<ServerCommand>,
    events: Receiver<TransportEvent>,
    target_topic: String,
}

impl<F: PeerHandlerFactory> BrickServer<F> {
    /// Creates a server on top of an already bound `transport`.
    /// Nothing is processed until [`BrickServer::run`] or [`BrickServer::spawn`].
    pub fn new(config: ServerConfig, transport: Arc<dyn Transport>, factory: F) -> Self {
        let target_topic: String = format!("brick[{}]", config.transport.app_identifier);
        let (command_send, command_recv) = crossbeam_channel::unbounded();
        let events: Receiver<TransportEvent> = transport.events();
        BrickServer {
            config,
            handle: ServerHandle::new(transport, command_send, target_topic.clone()),
            factory,
            peers: PeerTable::new(),
            pending: HashSet::new(),
            command_recv,
            events,
            target_topic,
        }
    }

    /// handle to share with handlers and other threads
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    /// live peers, owned by the dispatch worker
    #[inline]
    #[must_use]
    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// settings the server was built with
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn start(&mut self) -> Result<(), ServerError> {
        self.handle.transport().start()?;
        self.handle.set_running(true);
        info!(target: &self.target_topic,
            "Server {} started on {}",
            self.config.transport.app_identifier,
            self.handle.local_address()
        );
        Ok(())
    }

    /// Starts the transport and runs the dispatch loop on the calling
    /// thread until shutdown.
    ///
    /// # Errors
    /// if the transport cannot start or the peer table becomes inconsistent
    pub fn run(&mut self) -> Result<(), ServerError> {
        self.start()?;
        self.serve()
    }

    /// Starts the transport, then moves the server onto its own dispatch
    /// worker thread.
    ///
    /// # Errors
    /// if the transport cannot start or the thread cannot be spawned
    pub fn spawn(mut self) -> Result<ServerThread, ServerError>
    where
        F: 'static,
    {
        self.start()?;
        let handle: ServerHandle = self.handle.clone();
        let worker: JoinHandle<Result<(), ServerError>> = thread::Builder::new()
            .name(format!("{}-dispatch", self.config.transport.app_identifier))
            .spawn(move || self.serve())
            .map_err(|e| {
                error!(target: handle.target_topic(), "Unable to spawn dispatch worker: {e}");
                handle.close();
                ServerError::Spawn(e)
            })?;
        Ok(ServerThread { handle, worker })
    }

    fn serve(&mut self) -> Result<(), ServerError> {
        let commands: Receiver<ServerCommand> = self.command_recv.clone();
        let events: Receiver<TransportEvent> = self.events.clone();

        let result: Result<(), ServerError> = loop {
            if !self.handle.is_running() {
                break Ok(());
            }
            let mut step: Result<bool, ServerError> = Ok(true);
            select_biased! {
                recv(commands) -> command => {
                    if let Ok(command) = command {
                        step = Ok(self.handle_command(command));
                    }
                },
                recv(events) -> event => {
                    step = match event {
                        Ok(event) => self.handle_event(event).map(|()| true),
                        Err(_) => {
                            warn!(target: &self.target_topic, "Transport event queue closed, stopping");
                            Ok(false)
                        }
                    };
                }
            }
            match step {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => {
                    error!(target: &self.target_topic, "CRITICAL: {e}, stopping server");
                    break Err(e);
                }
            }
        };

        self.handle.close();
        info!(target: &self.target_topic, "Server stopped, {} peers dropped", self.peers.len());
        result
    }

    /// Applies a control command, returns `false` if the loop must stop
    pub(crate) fn handle_command(&mut self, command: ServerCommand) -> bool {
        match command {
            ServerCommand::Disconnect { address, reason } => {
                info!(target: &self.target_topic, "Received disconnect command for {address}");
                match self.peers.get(&address) {
                    Some(peer) => {
                        if let Err(e) = self
                            .handle
                            .transport()
                            .disconnect(peer.connection().id(), &reason)
                        {
                            warn!(target: &self.target_topic, "Unable to disconnect {address}: {e}");
                        }
                    }
                    None => warn!(target: &self.target_topic, "Disconnect requested for unknown peer {address}"),
                }
                true
            }
            ServerCommand::Shutdown => {
                info!(target: &self.target_topic, "Received shutdown command");
                false
            }
        }
    }

    /// Processes one transport event.
    ///
    /// # Errors
    /// only for peer table violations, every other failure is logged
    pub fn handle_event(&mut self, event: TransportEvent) -> Result<(), ServerError> {
        match event {
            TransportEvent::Data { sender, data } => self.handle_data(sender, &data),
            TransportEvent::StatusChanged {
                sender,
                connection,
                status,
                reason,
            } => self.handle_status(sender, connection, status, &reason),
            TransportEvent::ConnectionApproval { sender, connection } => {
                self.approve_connection(sender, connection);
                Ok(())
            }
            TransportEvent::DebugMessage(msg) | TransportEvent::VerboseDebugMessage(msg) => {
                debug!(target: &self.target_topic, "{msg}");
                Ok(())
            }
            TransportEvent::WarningMessage(msg) => {
                warn!(target: &self.target_topic, "{msg}");
                Ok(())
            }
            TransportEvent::ErrorMessage(msg) => {
                error!(target: &self.target_topic, "{msg}");
                Ok(())
            }
        }
    }

    /// Reports an event for an address with no peer according to the
    /// configured [`UnknownPeerPolicy`]
    fn unknown_peer(&self, address: SocketAddr, event: &'static str) -> Result<(), ServerError> {
        match self.config.unknown_peer_policy {
            UnknownPeerPolicy::Fatal => Err(ServerError::UnknownPeer { address, event }),
            UnknownPeerPolicy::Ignore => {
                warn!(target: &self.target_topic, "Ignoring {event} event from unknown peer {address}");
                Ok(())
            }
        }
    }
}

/// A [`BrickServer`] running on its dispatch worker thread
pub struct ServerThread {
    handle: ServerHandle,
    worker: JoinHandle<Result<(), ServerError>>,
}

impl ServerThread {
    /// handle of the server running on this thread
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    /// Waits for the dispatch loop to exit
    ///
    /// # Errors
    /// the error that stopped the loop, or [`ServerError::WorkerPanicked`]
    pub fn join(self) -> Result<(), ServerError> {
        self.worker
            .join()
            .map_err(|_| ServerError::WorkerPanicked)?
    }

    /// Requests a shutdown and waits for the loop to exit
    ///
    /// # Errors
    /// see [`ServerThread::join`]
    pub fn shutdown(self) -> Result<(), ServerError> {
        self.handle.shutdown();
        self.join()
    }
}
