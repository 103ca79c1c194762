//! Named logical channels.
//!
//! A channel is the client-visible abstraction: a named connection to a
//! remote service, bound to a `(src, dst)` address pair. Endpoints are the
//! addressing abstraction the wire sees; a channel owns one primary
//! endpoint (created when a client driver binds) and clients may open
//! ancillary endpoints for sub-protocols.
//!
//! Channels come into being either from the platform's pre-populated list
//! at transport attach or from a name-service create announcement, and die
//! on a destroy announcement or transport teardown.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use remsg_core::Error;

use crate::endpoint::{Endpoint, RxCallback};
use crate::registry::Driver;
use crate::transport::Transport;

/// Driver binding and primary endpoint, mutated only by the registry.
#[derive(Default)]
pub(crate) struct Binding {
    pub driver: Option<Arc<dyn Driver>>,
    pub ept: Option<Arc<Endpoint>>,
}

pub struct Channel {
    name: String,
    /// Monotonic per-transport index, for logs and device naming.
    index: u32,
    /// Local address; written back when the primary endpoint is created.
    src: AtomicU32,
    /// Remote address; may be `ADDR_ANY` until learned.
    dst: AtomicU32,
    transport: Weak<Transport>,
    pub(crate) binding: Mutex<Binding>,
}

impl Channel {
    pub(crate) fn new(
        name: &str,
        index: u32,
        src: u32,
        dst: u32,
        transport: Weak<Transport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            index,
            src: AtomicU32::new(src),
            dst: AtomicU32::new(dst),
            transport,
            binding: Mutex::new(Binding::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn src(&self) -> u32 {
        self.src.load(Ordering::Acquire)
    }

    pub fn dst(&self) -> u32 {
        self.dst.load(Ordering::Acquire)
    }

    pub(crate) fn set_src(&self, addr: u32) {
        self.src.store(addr, Ordering::Release);
    }

    /// Record the remote address once learned (e.g. from the source of the
    /// first incoming message).
    pub fn set_dst(&self, addr: u32) {
        self.dst.store(addr, Ordering::Release);
    }

    /// The channel's primary endpoint, if a driver is bound.
    pub fn endpoint(&self) -> Option<Arc<Endpoint>> {
        self.binding.lock().ept.clone()
    }

    pub(crate) fn bound_driver(&self) -> Option<Arc<dyn Driver>> {
        self.binding.lock().driver.clone()
    }

    /// The owning transport, while it is alive.
    pub fn transport(&self) -> Result<Arc<Transport>, Error> {
        self.transport.upgrade().ok_or(Error::Detached)
    }

    /// Send on the channel's own `(src, dst)` pair.
    pub fn send(&self, payload: &[u8]) -> Result<(), Error> {
        self.send_off_channel(self.src(), self.dst(), payload)
    }

    /// Send with the destination overridden.
    pub fn send_to(&self, payload: &[u8], dst: u32) -> Result<(), Error> {
        self.send_off_channel(self.src(), dst, payload)
    }

    /// Send with both addresses supplied by the caller.
    pub fn send_off_channel(&self, src: u32, dst: u32, payload: &[u8]) -> Result<(), Error> {
        self.transport()?.send_off_channel(src, dst, payload)
    }

    /// Open an ancillary endpoint owned by this channel.
    pub fn create_endpoint(
        self: &Arc<Self>,
        cb: RxCallback,
        addr: u32,
    ) -> Result<Arc<Endpoint>, Error> {
        self.transport()?.create_endpoint(self, cb, addr)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(name: &str, transport: Weak<Transport>) -> Arc<Self> {
        Self::new(name, 0, remsg_core::ADDR_ANY, remsg_core::ADDR_ANY, transport)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("src", &self.src())
            .field("dst", &self.dst())
            .finish()
    }
}
