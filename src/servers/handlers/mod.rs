use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::packet::{Packet, PacketCode, PacketType};

use super::peers::{Peer, PeerTable};


/// Application code bound to one `(code, type)` pair.
///
/// Every handler registered for the key of an incoming packet is invoked,
/// in registration order, on the dispatch worker. An `Err` (or a panic) is
/// logged and does not keep the other handlers from running.
pub trait PacketHandler: Send + Sync {
    /// category this handler reacts to
    fn code(&self) -> PacketCode;

    /// variant this handler reacts to
    fn packet_type(&self) -> PacketType;

    /// Handles `packet` sent by `peer`; `peers` is the whole peer table
    ///
    /// # Errors
    /// any application failure, it is logged by the dispatcher
    fn handle(&self, packet: &Packet, peer: &Peer, peers: &PeerTable) -> anyhow::Result<()>;

    /// name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

type HandleFn = dyn Fn(&Packet, &Peer, &PeerTable) -> anyhow::Result<()> + Send + Sync;

/// [`PacketHandler`] built from a closure
pub struct FnHandler {
    name: String,
    code: PacketCode,
    packet_type: PacketType,
    handle: Box<HandleFn>,
}

impl FnHandler {
    /// Wraps `handle` so it reacts to `(code, packet_type)`
    #[must_use]
    pub fn new<F>(
        name: impl Into<String>,
        code: PacketCode,
        packet_type: PacketType,
        handle: F,
    ) -> Arc<Self>
    where
        F: Fn(&Packet, &Peer, &PeerTable) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            code,
            packet_type,
            handle: Box::new(handle),
        })
    }
}

impl PacketHandler for FnHandler {
    fn code(&self) -> PacketCode {
        self.code
    }

    fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    fn handle(&self, packet: &Packet, peer: &Peer, peers: &PeerTable) -> anyhow::Result<()> {
        (self.handle)(packet, peer, peers)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("name", &self.name)
            .field("code", &self.code)
            .field("packet_type", &self.packet_type)
            .finish_non_exhaustive()
    }
}

/// Ordered collection of [`PacketHandler`]s for one class of peers.
///
/// Cloning yields another handle to the same collection; it can be mutated
/// from any thread while the dispatch worker reads it.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<Vec<Arc<dyn PacketHandler>>>>,
}

impl HandlerRegistry {
    /// empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn PacketHandler>>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn PacketHandler>>> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `handler`; the same handler may be added more than once
    pub fn add(&self, handler: Arc<dyn PacketHandler>) {
        self.write().push(handler);
    }

    /// Removes the first registration of `handler` (compared by identity).
    /// Returns `false`, changing nothing, if it was not registered.
    pub fn remove(&self, handler: &Arc<dyn PacketHandler>) -> bool {
        let mut handlers = self.write();
        match handlers.iter().position(|h| same_handler(h, handler)) {
            Some(i) => {
                handlers.remove(i);
                true
            }
            None => false,
        }
    }

    /// Whether `handler` is currently registered
    #[must_use]
    pub fn contains(&self, handler: &Arc<dyn PacketHandler>) -> bool {
        self.read().iter().any(|h| same_handler(h, handler))
    }

    /// Snapshot of the handlers registered for `(code, packet_type)`, in
    /// registration order.
    ///
    /// The lock is released before returning, so handlers may mutate the
    /// registry while being invoked.
    #[must_use]
    pub fn matching(&self, code: PacketCode, packet_type: PacketType) -> Vec<Arc<dyn PacketHandler>> {
        self.read()
            .iter()
            .filter(|h| h.code() == code && h.packet_type() == packet_type)
            .cloned()
            .collect()
    }

    /// number of registrations
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// `true` if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.read().iter().map(|h| h.name().to_string()).collect();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &names)
            .finish()
    }
}

/// identity comparison, the vtable part of the fat pointer is ignored
#[inline]
fn same_handler(a: &Arc<dyn PacketHandler>, b: &Arc<dyn PacketHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
