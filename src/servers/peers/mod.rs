use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    net::SocketAddr,
};

use crate::transport::ConnectionId;

use super::ServerHandle;


/// Handle of a live transport connection, owned by exactly one [`Peer`]
#[derive(Debug, PartialEq, Eq)]
pub struct Connection {
    id: ConnectionId,
    remote: SocketAddr,
}

impl Connection {
    #[inline]
    #[must_use]
    pub(crate) fn new(id: ConnectionId, remote: SocketAddr) -> Self {
        Self { id, remote }
    }

    /// transport side identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// remote endpoint
    #[inline]
    #[must_use]
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }
}

/// Per peer behaviour supplied by the application.
///
/// [`PeerHandler::on_connect`] and [`PeerHandler::on_disconnect`] are called
/// exactly once each, in this order, on the dispatch worker. They must return
/// promptly: a slow callback stalls every peer.
pub trait PeerHandler: Send {
    /// `true` if the remote is another server (federation), `false` for an
    /// end client. Selects the handler registry used for its packets.
    fn is_server(&self) -> bool;

    /// Called once the connection with `address` is established
    fn on_connect(&mut self, address: SocketAddr);

    /// Called once the connection is gone, `reason` may be empty
    fn on_disconnect(&mut self, reason: &str);
}

/// Builds one [`PeerHandler`] per new connection.
///
/// The server passes its own [`ServerHandle`] so handlers can keep it to
/// send packets later on.
pub trait PeerHandlerFactory: Send {
    /// Returns the handler for the peer connected at `address`
    fn create_handler(&mut self, address: SocketAddr, server: &ServerHandle)
        -> Box<dyn PeerHandler>;
}

impl<F> PeerHandlerFactory for F
where
    F: FnMut(SocketAddr, &ServerHandle) -> Box<dyn PeerHandler> + Send,
{
    fn create_handler(
        &mut self,
        address: SocketAddr,
        server: &ServerHandle,
    ) -> Box<dyn PeerHandler> {
        self(address, server)
    }
}

/// A connected remote endpoint together with its handler
pub struct Peer {
    connection: Connection,
    handler: Box<dyn PeerHandler>,
}

impl Peer {
    #[inline]
    #[must_use]
    pub(crate) fn new(connection: Connection, handler: Box<dyn PeerHandler>) -> Self {
        Self {
            connection,
            handler,
        }
    }

    /// Remote address, also the key of the peer in the [`PeerTable`]
    #[inline]
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.connection.remote
    }

    /// transport connection of the peer
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// shorthand for `self.handler().is_server()`
    #[inline]
    #[must_use]
    pub fn is_server(&self) -> bool {
        self.handler.is_server()
    }

    /// handler assigned by the factory
    #[inline]
    #[must_use]
    pub fn handler(&self) -> &dyn PeerHandler {
        self.handler.as_ref()
    }

    #[inline]
    pub(crate) fn handler_mut(&mut self) -> &mut dyn PeerHandler {
        self.handler.as_mut()
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("connection", &self.connection)
            .field("is_server", &self.is_server())
            .finish()
    }
}

/// Live peers indexed by remote address.
///
/// Owned and mutated only by the dispatch worker.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<SocketAddr, Peer>,
}

impl PeerTable {
    /// empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `peer`, giving it back if its address is already taken
    pub(crate) fn insert(&mut self, peer: Peer) -> Result<&mut Peer, Peer> {
        match self.peers.entry(peer.address()) {
            Entry::Occupied(_) => Err(peer),
            Entry::Vacant(v) => Ok(v.insert(peer)),
        }
    }

    pub(crate) fn remove(&mut self, address: &SocketAddr) -> Option<Peer> {
        self.peers.remove(address)
    }

    pub(crate) fn get_mut(&mut self, address: &SocketAddr) -> Option<&mut Peer> {
        self.peers.get_mut(address)
    }

    /// peer connected from `address`, if any
    #[inline]
    #[must_use]
    pub fn get(&self, address: &SocketAddr) -> Option<&Peer> {
        self.peers.get(address)
    }

    /// whether a peer is connected from `address`
    #[inline]
    #[must_use]
    pub fn contains(&self, address: &SocketAddr) -> bool {
        self.peers.contains_key(address)
    }

    /// number of live peers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// `true` if no peer is connected
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// every peer, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// peers whose handler is an end client
    pub fn clients(&self) -> impl Iterator<Item = &Peer> {
        self.iter().filter(|p| !p.is_server())
    }

    /// peers whose handler is a federated server
    pub fn servers(&self) -> impl Iterator<Item = &Peer> {
        self.iter().filter(|p| p.is_server())
    }

    /// addresses of every peer
    pub fn addresses(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.peers.keys().copied()
    }
}
