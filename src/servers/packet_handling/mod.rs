use std::{
    any::Any,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, error, warn};

use crate::{
    error::{HandlerError, ServerError},
    packet::Packet,
};

use super::{
    handlers::{HandlerRegistry, PacketHandler},
    peers::Peer,
    BrickServer, PeerHandlerFactory,
};


/// extracts the message of a caught panic
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        String::from("handler panicked")
    }
}

impl<F: PeerHandlerFactory> BrickServer<F> {
    /// Registry matching the class of `peer`
    #[inline]
    pub(crate) fn registry_for(&self, peer: &Peer) -> &HandlerRegistry {
        if peer.is_server() {
            self.handle.server_handlers()
        } else {
            self.handle.client_handlers()
        }
    }

    pub(crate) fn handle_data(&mut self, sender: SocketAddr, data: &[u8]) -> Result<(), ServerError> {
        let Some(peer) = self.peers.get(&sender) else {
            return self.unknown_peer(sender, "data");
        };

        let packet: Packet = match Packet::from_wire(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(target: &self.target_topic, "Dropping message from {sender}: {e}");
                return Ok(());
            }
        };

        let handlers: Vec<Arc<dyn PacketHandler>> =
            self.registry_for(peer).matching(packet.code(), packet.packet_type());
        if handlers.is_empty() {
            debug!(target: &self.target_topic,
                "No {} handler for packet {:?} from {sender}",
                if peer.is_server() { "server" } else { "client" },
                packet.key()
            );
        }
        for handler in handlers {
            self.invoke(handler.as_ref(), &packet, peer);
        }
        Ok(())
    }

    /// Runs one handler, containing its failure
    fn invoke(&self, handler: &dyn PacketHandler, packet: &Packet, peer: &Peer) {
        let started: Instant = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(packet, peer, &self.peers)
        }));
        let elapsed: Duration = started.elapsed();

        let cause: Option<String> = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        if let Some(cause) = cause {
            let err: HandlerError = HandlerError {
                handler: handler.name().to_string(),
                peer: peer.address(),
                code: packet.code(),
                packet_type: packet.packet_type(),
                cause,
            };
            error!(target: &self.target_topic, "{err}");
        }

        if elapsed > self.config.slow_handler_threshold {
            warn!(target: &self.target_topic,
                "Handler {} took {elapsed:?} on packet {:?} from {}, every peer was stalled meanwhile",
                handler.name(),
                packet.key(),
                peer.address()
            );
        }
    }
}
