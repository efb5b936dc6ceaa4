/*!
 * # Brick server
 *
 * Small framework for message oriented servers (chat rooms, login
 * routers, game masters) built on a connection oriented datagram
 * [`transport::Transport`].
 *
 * A [`BrickServer`] pumps the transport event queue on one dispatch
 * worker and:
 * - creates a [`servers::Peer`] for every established connection, with a
 *   [`servers::PeerHandler`] built by the application factory
 * - decodes every data message into a [`Packet`] and hands it to every
 *   [`servers::PacketHandler`] registered for its `(code, type)`
 * - drops the peer once the transport reports it disconnected
 *
 * Uses the log crate to trace connections and dispatch, to enable the
 * logs, install a logger (e.g. `env_logger`) and set `RUST_LOG` to the
 * desired level (`debug`, `info`, `warn`, `error`).
 *
 * # Peer classes
 *
 * Every peer is either an end client or a federated server, as declared by
 * [`servers::PeerHandler::is_server`]. The two classes use separate
 * handler registries: a server peer may send codes that overlap with the
 * client ones and still reach different logic.
 *
 * # Federation
 *
 * A [`servers::tiered::TieredServer`] connects to a master at startup.
 * The master sees an ordinary connection and classifies it through its own
 * handler factory, so the dispatch core is the same on both sides.
 *
 * # Wire format
 *
 * ``` text
 *     | code (u16, BE) | type (u16, BE) | payload ... |
 * ```
 * The payload is opaque to the server and only interpreted by handlers.
 */

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(nonstandard_style)]
#![warn(missing_docs)]

#[cfg(test)]
mod integration_test;
/// Error types of packets, transports and servers
pub mod error;
/// This module contains the [`Packet`] envelope and its wire codec
pub mod packet;
/// This module contains the public API of [`BrickServer`], the peer
/// bookkeeping and the handler registries
pub mod servers;
/// Boundary with the datagram transport, plus an in-process implementation
pub mod transport;

#[doc(inline)]
pub use packet::Packet;
#[doc(inline)]
pub use servers::BrickServer;
#[doc(inline)]
pub use servers::ServerHandle;
#[doc(inline)]
pub use servers::tiered::TieredServer;
