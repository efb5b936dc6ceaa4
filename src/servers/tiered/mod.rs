//! Subordinate servers.
//!
//! A [`TieredServer`] is a [`BrickServer`] that, once running, opens one
//! outbound connection to an upstream (master) server. From the master's
//! point of view the result is a plain incoming connection: whether it is
//! treated as a federated server depends only on the handler its factory
//! assigns, never on who initiated the connection.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::{error::ServerError, transport::Transport};

use super::{BrickServer, PeerHandlerFactory, ServerConfig, ServerHandle, ServerThread};


/// Location of the master server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// master address
    pub address: IpAddr,
    /// master port
    pub port: u16,
}

impl UpstreamConfig {
    /// master at `address:port`
    #[must_use]
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }

    /// full socket address of the master
    #[inline]
    #[must_use]
    pub fn socket_address(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        }
    }
}

impl From<SocketAddr> for UpstreamConfig {
    fn from(address: SocketAddr) -> Self {
        Self::new(address.ip(), address.port())
    }
}

/// [`BrickServer`] federated to an upstream master
pub struct TieredServer<F: PeerHandlerFactory> {
    server: BrickServer<F>,
    upstream: UpstreamConfig,
}

impl<F: PeerHandlerFactory> TieredServer<F> {
    /// Creates the server; the upstream is contacted only when it starts
    pub fn new(
        config: ServerConfig,
        upstream: UpstreamConfig,
        transport: Arc<dyn Transport>,
        factory: F,
    ) -> Self {
        Self {
            server: BrickServer::new(config, transport, factory),
            upstream,
        }
    }

    /// configured master
    #[inline]
    #[must_use]
    pub fn upstream(&self) -> &UpstreamConfig {
        &self.upstream
    }

    /// see [`BrickServer::handle`]
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &ServerHandle {
        self.server.handle()
    }

    /// the wrapped server
    #[inline]
    #[must_use]
    pub fn server(&self) -> &BrickServer<F> {
        &self.server
    }

    /// Spawns the dispatch worker, then connects to the upstream.
    ///
    /// A failed connection attempt is logged and leaves the server running
    /// with no upstream.
    ///
    /// # Errors
    /// see [`BrickServer::spawn`]
    pub fn spawn(self) -> Result<ServerThread, ServerError>
    where
        F: 'static,
    {
        let upstream: SocketAddr = self.upstream.socket_address();
        let thread: ServerThread = self.server.spawn()?;
        connect_upstream(thread.handle(), upstream);
        Ok(thread)
    }

    /// Connects to the upstream and runs the dispatch loop on the calling
    /// thread. The connection completes once the loop processes it.
    ///
    /// # Errors
    /// see [`BrickServer::run`]
    pub fn run(&mut self) -> Result<(), ServerError> {
        self.server.start()?;
        connect_upstream(self.server.handle(), self.upstream.socket_address());
        self.server.serve()
    }
}

fn connect_upstream(handle: &ServerHandle, upstream: SocketAddr) {
    match handle.connect_to_server(upstream) {
        Ok(()) => info!(target: handle.target_topic(), "Connection to master {upstream} initiated"),
        Err(e) => error!(target: handle.target_topic(), "Unable to reach master {upstream}: {e}"),
    }
}
