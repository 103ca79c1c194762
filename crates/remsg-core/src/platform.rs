//! The platform surface the transport attaches against.
//!
//! The platform owns everything the bus treats as given: the shared
//! buffer region and its geometry, the address base the remote expects in
//! descriptors, the queue pair, and an optional list of channels to
//! pre-populate at attach. Each getter corresponds to one keyed
//! configuration request of the original firmware contract.

use crate::error::Error;
use crate::queue::RawQueue;

/// A channel to create at transport attach, before the name service has
/// said anything.
#[derive(Clone, Debug)]
pub struct StaticChannel {
    pub name: String,
    pub src: u32,
    pub dst: u32,
}

/// Per-remote-processor configuration and resources.
///
/// # Safety
///
/// Implementations must guarantee that [`buf_region`](Platform::buf_region)
/// returns a pointer valid for reads and writes of
/// `buf_count() * buf_size()` bytes for as long as any transport attached
/// over this platform is alive, and that the region is not accessed
/// through safe references while a transport owns it.
pub unsafe trait Platform: Send + Sync {
    /// Host-view base of the shared buffer region.
    fn buf_region(&self) -> *mut u8;

    /// Total buffer count `N`. Must be even.
    fn buf_count(&self) -> u32;

    /// Per-buffer size `S` in bytes. Must exceed the datagram header.
    fn buf_size(&self) -> u32;

    /// Base address used when programming buffer descriptors, when the
    /// remote's view of the region differs from the host's pointer.
    fn device_base(&self) -> u64;

    /// Hand over the queue pair, receive queue first. Called once per
    /// attach.
    fn take_queues(&self) -> Result<(Box<dyn RawQueue>, Box<dyn RawQueue>), Error>;

    /// Channels to create at attach, before any name-service traffic.
    fn fixed_channels(&self) -> Vec<StaticChannel> {
        Vec::new()
    }

    /// Remote processor id, for bring-up logs. Id 0 is the loopback
    /// processor.
    fn proc_id(&self) -> u32 {
        0
    }
}
