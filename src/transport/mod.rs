use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub mod memory;


/// Result type of every transport operation
pub type TransportResult<T> = Result<T, TransportError>;

/// Opaque handle of a connection inside a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Quality of service requested for a send operation.
///
/// Passed through to the transport untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeliveryMethod {
    /// may be lost, duplicated or reordered
    Unreliable,
    /// may be lost, late messages are dropped
    UnreliableSequenced,
    /// always delivered, in any order
    ReliableUnordered,
    /// always delivered, late messages are dropped
    ReliableSequenced,
    /// always delivered, in send order
    #[default]
    ReliableOrdered,
}

/// Connection status carried by [`TransportEvent::StatusChanged`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// handshake in progress
    Connecting,
    /// handshake completed, data can flow
    Connected,
    /// connection closed or never established
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "Connecting"),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Events yielded by the incoming message queue of a [`Transport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// application data sent by a connected remote
    Data {
        /// remote address of the sender
        sender: SocketAddr,
        /// raw message
        data: Vec<u8>,
    },
    /// the status of a connection changed
    StatusChanged {
        /// remote address of the connection
        sender: SocketAddr,
        /// connection whose status changed
        connection: ConnectionId,
        /// new status
        status: ConnectionStatus,
        /// human readable reason, may be empty
        reason: String,
    },
    /// a remote asks to connect, [`Transport::approve`] must be called
    /// or the connection is rejected
    ConnectionApproval {
        /// remote address of the candidate
        sender: SocketAddr,
        /// pending connection
        connection: ConnectionId,
    },
    /// debug notice
    DebugMessage(String),
    /// verbose debug notice
    VerboseDebugMessage(String),
    /// warning notice
    WarningMessage(String),
    /// error notice
    ErrorMessage(String),
}

/// Parameters needed to bring up a transport endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// identity string, remotes with a different one are refused
    pub app_identifier: String,
    /// local address to bind
    pub address: IpAddr,
    /// local port to bind
    pub port: u16,
    /// maximum number of simultaneous connections
    pub max_connections: usize,
}

impl TransportConfig {
    /// Default number of simultaneous connections
    pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

    /// Config bound to `127.0.0.1:port` with default limits
    #[must_use]
    pub fn new(app_identifier: impl Into<String>, port: u16) -> Self {
        Self {
            app_identifier: app_identifier.into(),
            port,
            ..Self::default()
        }
    }

    /// address the endpoint binds to
    #[inline]
    #[must_use]
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            app_identifier: String::from("brick"),
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Connection oriented datagram transport the servers are built on.
///
/// Implementations take care of framing, delivery guarantees and I/O; the
/// server only consumes the event queue and the outbound primitives below.
/// Every method takes `&self` so a single transport can be shared between
/// the dispatch worker and application threads.
pub trait Transport: Send + Sync {
    /// Starts processing network traffic
    ///
    /// # Errors
    /// if the endpoint cannot be brought up
    fn start(&self) -> TransportResult<()>;

    /// Closes every connection with `reason` and stops the endpoint
    fn shutdown(&self, reason: &str);

    /// Local bound address
    fn local_address(&self) -> SocketAddr;

    /// Incoming message queue
    fn events(&self) -> Receiver<TransportEvent>;

    /// Accepts a connection announced by [`TransportEvent::ConnectionApproval`]
    ///
    /// # Errors
    /// [`TransportError::UnknownConnection`] if nothing is pending on `connection`
    fn approve(&self, connection: ConnectionId) -> TransportResult<()>;

    /// Opens an outbound connection, the outcome is reported through status events
    ///
    /// # Errors
    /// if the connection attempt cannot even be started
    fn connect(&self, address: SocketAddr) -> TransportResult<()>;

    /// Closes a connection
    ///
    /// # Errors
    /// [`TransportError::UnknownConnection`] if the connection does not exist
    fn disconnect(&self, connection: ConnectionId, reason: &str) -> TransportResult<()>;

    /// Sends `data` to every connection in `recipients`
    ///
    /// # Errors
    /// if any of the recipients cannot be reached
    fn send(
        &self,
        data: &[u8],
        recipients: &[ConnectionId],
        method: DeliveryMethod,
        channel: u8,
    ) -> TransportResult<()>;

    /// Sends `data` to every connected remote
    ///
    /// # Errors
    /// if the transport is closed
    fn send_to_all(&self, data: &[u8], method: DeliveryMethod) -> TransportResult<()>;
}
