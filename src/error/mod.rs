use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::packet::{PacketCode, PacketType, HEADER_LEN};
use crate::transport::ConnectionId;


/// Errors produced while converting a [`crate::packet::Packet`] to or from
/// its wire representation.
#[derive(Error, Debug)]
pub enum PacketError {
    /// The message is too short to contain the fixed header
    #[error("malformed packet: {len} bytes received, header needs {HEADER_LEN}")]
    Malformed {
        /// length of the offending message
        len: usize,
    },
    /// The header could not be encoded
    #[error("failed to encode packet header: {0}")]
    Encode(#[from] bincode::error::EncodeError),
}

/// Errors reported by a [`crate::transport::Transport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Nothing is listening at the requested address
    #[error("no endpoint reachable at {0}")]
    Unreachable(SocketAddr),
    /// The local address is already bound by another endpoint
    #[error("address {0} already in use")]
    AddressInUse(SocketAddr),
    /// The connection does not exist or is not connected
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    /// The transport has been shut down
    #[error("transport is closed")]
    Closed,
}

/// Errors that stop a [`crate::servers::BrickServer`].
///
/// Anything in here means the peer table can no longer be trusted or the
/// server could not run at all; recoverable problems are logged instead.
#[derive(Error, Debug)]
pub enum ServerError {
    /// A `Data` or `Disconnected` event referenced an address with no peer
    #[error("{event} event received for unknown peer {address}")]
    UnknownPeer {
        /// remote address carried by the event
        address: SocketAddr,
        /// kind of event that referenced the address
        event: &'static str,
    },
    /// A `Connected` event arrived for an address that already has a peer
    #[error("connected event received for already known peer {0}")]
    DuplicatePeer(SocketAddr),
    /// The transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A packet could not be encoded
    #[error(transparent)]
    Packet(#[from] PacketError),
    /// The dispatch worker thread could not be created
    #[error("failed to spawn dispatch worker: {0}")]
    Spawn(#[source] io::Error),
    /// The dispatch worker panicked
    #[error("dispatch worker panicked")]
    WorkerPanicked,
}

/// A failure raised by application handler code during fan-out.
///
/// Never propagated: the dispatch loop logs it and moves on to the next
/// handler.
#[derive(Error, Debug)]
#[error("handler {handler} failed on packet ({code}, {packet_type}) from {peer}: {cause}")]
pub struct HandlerError {
    /// name of the failing handler
    pub handler: String,
    /// address of the peer that sent the packet
    pub peer: SocketAddr,
    /// code of the packet being handled
    pub code: PacketCode,
    /// type of the packet being handled
    pub packet_type: PacketType,
    /// description of what went wrong
    pub cause: String,
}
