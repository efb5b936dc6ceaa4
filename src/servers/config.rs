use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::TransportConfig;

/// What the dispatch loop does when a `Data` or `Disconnected` event names
/// an address that has no peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnknownPeerPolicy {
    /// stop the server with [`crate::error::ServerError::UnknownPeer`]
    #[default]
    Fatal,
    /// log a warning and drop the event
    Ignore,
}

/// Settings of a [`super::BrickServer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// endpoint settings handed to the transport
    pub transport: TransportConfig,
    /// reaction to events naming an address with no peer
    pub unknown_peer_policy: UnknownPeerPolicy,
    /// handler invocations slower than this are reported
    pub slow_handler_threshold: Duration,
}

impl ServerConfig {
    /// Default value of [`ServerConfig::slow_handler_threshold`]
    pub const DEFAULT_SLOW_HANDLER_THRESHOLD: Duration = Duration::from_millis(100);

    /// Config for `app_identifier` listening on `127.0.0.1:port`
    #[must_use]
    pub fn new(app_identifier: impl Into<String>, port: u16) -> Self {
        Self {
            transport: TransportConfig::new(app_identifier, port),
            ..Self::default()
        }
    }

    /// sets the transport connection limit
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.transport.max_connections = max_connections;
        self
    }

    /// sets [`ServerConfig::unknown_peer_policy`]
    #[must_use]
    pub fn with_unknown_peer_policy(mut self, policy: UnknownPeerPolicy) -> Self {
        self.unknown_peer_policy = policy;
        self
    }

    /// sets [`ServerConfig::slow_handler_threshold`]
    #[must_use]
    pub fn with_slow_handler_threshold(mut self, threshold: Duration) -> Self {
        self.slow_handler_threshold = threshold;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            unknown_peer_policy: UnknownPeerPolicy::default(),
            slow_handler_threshold: Self::DEFAULT_SLOW_HANDLER_THRESHOLD,
        }
    }
}
