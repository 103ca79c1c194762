//! The per-remote-processor transport.
//!
//! A [`Transport`] owns the queue pair, the buffer pool, the endpoint
//! table, and the live channels for one remote processor. It is built
//! against a [`Platform`] and a shared [`Registry`]:
//!
//! ```text
//! ┌────────────┐   create/destroy    ┌──────────────┐
//! │  Registry  │◄────────────────────│  Transport   │
//! │ (drivers)  │   bind / probe      │              │
//! └────────────┘                     │  ┌────────┐  │   kick ┌────────┐
//!       ▲                            │  │ send q │──┼───────►│        │
//!       │ callback                   │  └────────┘  │        │ remote │
//! ┌────────────┐      lookup dst     │  ┌────────┐  │   kick │  proc  │
//! │ endpoints  │◄────────────────────┼──│ recv q │◄─┼────────│        │
//! └────────────┘                     │  └────────┘  │        └────────┘
//!                                    └──────────────┘
//! ```
//!
//! Concurrency model: sends may come from any number of threads and
//! serialize on the send-queue lock; receives are dispatched by a single
//! interrupt-like context per transport ([`recv_done`](Transport::recv_done)),
//! so receive-side state needs no external coordination. Endpoint
//! callbacks run under no transport lock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use remsg_core::{
    Direction, Error, MsgHeader, Platform, RawQueue, ADDR_ANY, HDR_LEN, NS_ADDR,
};
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::endpoint::{Endpoint, EndpointTable, RxCallback};
use crate::ns::NS_NAME;
use crate::pool::BufferPool;
use crate::registry::Registry;

/// Send-side state: the queue plus the pool's hand-out cursor, under one
/// lock so buffer acquisition and enqueue are a single critical section.
struct SendState {
    vq: Option<Box<dyn RawQueue>>,
    /// Count of upper-half slots never handed out yet.
    next_unused: u32,
}

pub struct Transport {
    pool: BufferPool,
    endpoints: Mutex<EndpointTable>,
    send: Mutex<SendState>,
    recv: Mutex<Option<Box<dyn RawQueue>>>,
    channels: Mutex<Vec<Arc<Channel>>>,
    registry: Arc<Registry>,
    /// Free-running numbering for channels on this transport.
    next_index: AtomicU32,
    detached: AtomicBool,
    proc_id: u32,
}

impl Transport {
    /// Bring the transport up against a platform.
    ///
    /// Obtains the queue pair (receive, then send), pre-posts the lower
    /// half of the buffer region to the receive queue, kicks it so the
    /// remote knows descriptors are available, suppresses send-side used
    /// notifications, then creates the name-service channel and any
    /// pre-populated channels the platform lists.
    pub fn attach(
        platform: &dyn Platform,
        registry: Arc<Registry>,
    ) -> Result<Arc<Self>, Error> {
        let num_bufs = platform.buf_count();
        let buf_size = platform.buf_size();
        // SAFETY: region validity for `num_bufs * buf_size` bytes is the
        // `Platform` implementor's contract.
        let pool = unsafe {
            BufferPool::new(
                platform.buf_region(),
                platform.device_base(),
                num_bufs,
                buf_size,
            )?
        };

        let (mut rvq, mut svq) = platform.take_queues()?;

        // Hand the remote the entire receive half up front.
        for slot in 0..pool.half() {
            rvq.add_buf(
                pool.device_addr(slot),
                buf_size,
                Direction::DeviceWritable,
                slot,
            )?;
        }
        rvq.kick();

        // Send completions are reclaimed lazily; the doorbell back from
        // the remote would only be noise.
        svq.suppress_used_notify();

        let proc_id = platform.proc_id();
        let transport = Arc::new(Self {
            pool,
            endpoints: Mutex::new(EndpointTable::default()),
            send: Mutex::new(SendState {
                vq: Some(svq),
                next_unused: 0,
            }),
            recv: Mutex::new(Some(rvq)),
            channels: Mutex::new(Vec::new()),
            registry,
            next_index: AtomicU32::new(0),
            detached: AtomicBool::new(false),
            proc_id,
        });

        info!(proc_id, num_bufs, buf_size, "transport attached");

        transport.create_channel(NS_NAME, NS_ADDR, NS_ADDR)?;
        for ch in platform.fixed_channels() {
            transport.create_channel(&ch.name, ch.src, ch.dst)?;
        }

        Ok(transport)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn proc_id(&self) -> u32 {
        self.proc_id
    }

    /// Largest payload a single send can carry.
    pub fn max_payload(&self) -> usize {
        self.pool.max_payload()
    }

    /// Live endpoint count, including the name service.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().len()
    }

    /// Snapshot of the live channels.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.lock().clone()
    }

    /// Create a channel and hand it to the registry for driver matching.
    /// `src` may be `ADDR_ANY`; the effective address is assigned when a
    /// driver binds.
    pub fn create_channel(
        self: &Arc<Self>,
        name: &str,
        src: u32,
        dst: u32,
    ) -> Result<Arc<Channel>, Error> {
        if self.detached.load(Ordering::Acquire) {
            return Err(Error::Detached);
        }
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let channel = Channel::new(name, index, src, dst, Arc::downgrade(self));
        info!(channel = %name, index, src, dst, "channel created");
        self.channels.lock().push(channel.clone());
        self.registry.add_channel(&channel);
        Ok(channel)
    }

    /// Tear a channel down: primary endpoint destroyed, then the bound
    /// driver's `remove` runs, then the channel is forgotten. False if the
    /// channel is not (or no longer) on this transport.
    pub fn destroy_channel(&self, channel: &Arc<Channel>) -> bool {
        let found = {
            let mut channels = self.channels.lock();
            match channels.iter().position(|c| Arc::ptr_eq(c, channel)) {
                Some(i) => {
                    channels.remove(i);
                    true
                }
                None => false,
            }
        };
        if !found {
            return false;
        }
        self.registry.remove_channel(channel);
        info!(channel = %channel.name(), index = channel.index(), "channel destroyed");
        true
    }

    /// Destroy the channel identified by `(name, dst)`, the way the name
    /// service revokes announcements.
    pub fn destroy_channel_by(&self, name: &str, dst: u32) -> bool {
        let target = self
            .channels
            .lock()
            .iter()
            .find(|c| c.name() == name && c.dst() == dst)
            .cloned();
        match target {
            Some(channel) => self.destroy_channel(&channel),
            None => false,
        }
    }

    /// Bind a new local address to a callback. `ADDR_ANY` allocates the
    /// lowest free address outside the reserved range.
    pub fn create_endpoint(
        &self,
        channel: &Arc<Channel>,
        cb: RxCallback,
        addr: u32,
    ) -> Result<Arc<Endpoint>, Error> {
        if self.detached.load(Ordering::Acquire) {
            return Err(Error::Detached);
        }
        let ept = self.endpoints.lock().create(channel, cb, addr)?;
        debug!(addr = ept.addr(), channel = %channel.name(), "endpoint created");
        Ok(ept)
    }

    /// Remove an endpoint. Idempotent per handle; a handle never unmaps a
    /// successor that reused its address.
    pub fn destroy_endpoint(&self, ept: &Endpoint) {
        if ept.retire() {
            self.endpoints.lock().remove(ept);
            debug!(addr = ept.addr(), "endpoint destroyed");
        }
    }

    /// Send a datagram with explicit addresses.
    ///
    /// Non-blocking: when the upper buffer half is exhausted and the
    /// remote has not completed anything, this returns
    /// [`Error::NoBuffer`] and the caller may retry.
    pub fn send_off_channel(&self, src: u32, dst: u32, payload: &[u8]) -> Result<(), Error> {
        if src == ADDR_ANY || dst == ADDR_ANY {
            return Err(Error::InvalidAddress { src, dst });
        }
        if payload.len() > self.pool.max_payload() {
            return Err(Error::TooLarge { len: payload.len() });
        }

        let mut send = self.send.lock();
        let SendState { vq, next_unused } = &mut *send;
        let vq = vq.as_mut().ok_or(Error::Detached)?;

        // Hand out never-used slots first, then reclaim what the remote
        // has drained.
        let slot = if *next_unused < self.pool.half() {
            let slot = self.pool.half() + *next_unused;
            *next_unused += 1;
            slot
        } else {
            match vq.take_used() {
                Some((token, _len)) => token,
                None => return Err(Error::NoBuffer),
            }
        };

        let hdr = MsgHeader::new(payload.len() as u16, src, dst);
        self.pool.write_datagram(slot, &hdr, payload);
        debug!(src, dst, len = payload.len(), "TX");

        vq.add_buf(
            self.pool.device_addr(slot),
            (HDR_LEN + payload.len()) as u32,
            Direction::DeviceReadable,
            slot,
        )?;
        vq.kick();
        Ok(())
    }

    /// Receive-queue "used" notification. Called by the platform from its
    /// interrupt context; one buffer is dispatched per invocation and
    /// reposted afterwards.
    pub fn recv_done(&self) {
        let (slot, used_len) = {
            let mut recv = self.recv.lock();
            let Some(vq) = recv.as_mut() else {
                warn!("receive notification after detach");
                return;
            };
            match vq.take_used() {
                Some(x) => x,
                None => {
                    warn!("receive notification with no used buffer");
                    return;
                }
            }
        };

        self.dispatch(slot, used_len);

        let mut recv = self.recv.lock();
        let Some(vq) = recv.as_mut() else {
            return;
        };
        if let Err(e) = vq.add_buf(
            self.pool.device_addr(slot),
            self.pool.buf_size(),
            Direction::DeviceWritable,
            slot,
        ) {
            warn!(error = %e, "failed to repost receive buffer");
            return;
        }
        vq.kick();
    }

    /// Decode one completed receive buffer and run the destination
    /// endpoint's callback. Anomalies are logged and dropped; nothing may
    /// stall the receive queue.
    fn dispatch(&self, slot: u32, used_len: u32) {
        if (used_len as usize) < HDR_LEN {
            warn!(used_len, "runt datagram");
            return;
        }
        let hdr = self.pool.read_header(slot);
        let payload_len = hdr.len as usize;
        if payload_len > self.pool.max_payload() || HDR_LEN + payload_len > used_len as usize {
            warn!(claimed = payload_len, used_len, "datagram length out of bounds");
            return;
        }
        debug!(src = hdr.src, dst = hdr.dst, len = hdr.len, "RX");

        let ept = self.endpoints.lock().lookup(hdr.dst);
        match ept {
            Some(ept) => ept.deliver(self.pool.payload(slot, payload_len), hdr.src),
            None => warn!(dst = hdr.dst, "message received with no recipient"),
        }
    }

    /// Send-queue "used" notification. Suppressed at attach; its arrival
    /// means the remote is not honouring the suppression.
    pub fn send_done(&self) {
        warn!("unexpected send completion; remote ignored notification suppression");
    }

    /// Tear the transport down: every channel is destroyed (driver
    /// `remove` callbacks run, endpoints unmapped), then the queues are
    /// released. Idempotent. The caller must ensure no sends are in
    /// flight and all receive callbacks have returned.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        let channels: Vec<Arc<Channel>> = std::mem::take(&mut *self.channels.lock());
        for channel in &channels {
            self.registry.remove_channel(channel);
            info!(channel = %channel.name(), "channel destroyed");
        }

        self.recv.lock().take();
        self.send.lock().vq.take();

        let leftover = self.endpoints.lock().clear();
        if leftover != 0 {
            warn!(leftover, "endpoints still registered at teardown");
        }
        info!(proc_id = self.proc_id, "transport detached");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if !self.detached.load(Ordering::Acquire) {
            warn!(proc_id = self.proc_id, "transport dropped without detach");
        }
    }
}
