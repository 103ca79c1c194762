//! Simulated platform and remote processor.
//!
//! [`SimPlatform`] owns a heap-backed "shared" region and two in-memory
//! descriptor queues, and implements the platform contract a transport
//! attaches against. [`SimRemote`] is the other side of those queues: it
//! consumes descriptors the way device firmware would, reading and
//! writing the region through the *device-view* addresses carried in the
//! descriptors, so the host's address translation is exercised for real.
//!
//! Tests can play the remote deterministically (drain/deliver by hand) or
//! spawn an echo loop on its own thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use remsg_core::{
    Direction, Error, MsgHeader, NsMessage, Platform, QueueError, RawQueue, SlotToken,
    StaticChannel, HDR_LEN, NS_ADDR,
};

use crate::doorbell::Doorbell;

/// Device-view base the simulated platform reports, deliberately distinct
/// from the host pointer so translation bugs show up.
const DEVICE_BASE: u64 = 0x1000_0000;

/// Heap memory standing in for the shared region. Accessed only through
/// raw pointers: both the host transport and the simulated remote write
/// into it.
struct SharedRegion {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: access is raw-pointer only and the queue protocol hands each
// slot to exactly one side at a time.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    fn new(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        Self {
            ptr: Box::into_raw(boxed) as *mut u8,
            len,
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from Box::into_raw in new().
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr, self.len,
            )))
        };
    }
}

/// A posted buffer descriptor, as the remote sees it.
#[derive(Clone, Copy, Debug)]
struct Desc {
    device_addr: u64,
    len: u32,
    dir: Direction,
    token: SlotToken,
}

#[derive(Default)]
struct QueueInner {
    avail: VecDeque<Desc>,
    used: VecDeque<(SlotToken, u32)>,
    kicks: u64,
    notify_suppressed: bool,
}

struct QueueShared {
    inner: Mutex<QueueInner>,
    doorbell: Arc<Doorbell>,
}

impl QueueShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(QueueInner::default()),
            doorbell: Arc::new(Doorbell::new()),
        })
    }
}

/// Host-side handle: the `RawQueue` the transport drives.
struct SimQueue {
    shared: Arc<QueueShared>,
}

impl RawQueue for SimQueue {
    fn add_buf(
        &mut self,
        device_addr: u64,
        len: u32,
        dir: Direction,
        token: SlotToken,
    ) -> Result<(), QueueError> {
        self.shared.inner.lock().avail.push_back(Desc {
            device_addr,
            len,
            dir,
            token,
        });
        Ok(())
    }

    fn take_used(&mut self) -> Option<(SlotToken, u32)> {
        self.shared.inner.lock().used.pop_front()
    }

    fn kick(&mut self) {
        self.shared.inner.lock().kicks += 1;
        self.shared.doorbell.signal();
    }

    fn suppress_used_notify(&mut self) {
        self.shared.inner.lock().notify_suppressed = true;
    }
}

/// Simulated per-remote-processor platform.
pub struct SimPlatform {
    region: Arc<SharedRegion>,
    num_bufs: u32,
    buf_size: u32,
    rvq: Arc<QueueShared>,
    svq: Arc<QueueShared>,
    queues: Mutex<Option<(Box<dyn RawQueue>, Box<dyn RawQueue>)>>,
    fixed: Vec<StaticChannel>,
}

impl SimPlatform {
    pub fn new(num_bufs: u32, buf_size: u32) -> Self {
        let region = Arc::new(SharedRegion::new(num_bufs as usize * buf_size as usize));
        let rvq = QueueShared::new();
        let svq = QueueShared::new();
        let queues = Mutex::new(Some((
            Box::new(SimQueue {
                shared: rvq.clone(),
            }) as Box<dyn RawQueue>,
            Box::new(SimQueue {
                shared: svq.clone(),
            }) as Box<dyn RawQueue>,
        )));
        Self {
            region,
            num_bufs,
            buf_size,
            rvq,
            svq,
            queues,
            fixed: Vec::new(),
        }
    }

    /// Add channels to pre-populate at attach.
    pub fn with_fixed_channels(mut self, fixed: Vec<StaticChannel>) -> Self {
        self.fixed = fixed;
        self
    }

    /// The device half of the queues.
    pub fn remote(&self) -> SimRemote {
        SimRemote {
            region: self.region.clone(),
            rvq: self.rvq.clone(),
            svq: self.svq.clone(),
        }
    }
}

// SAFETY: the region is heap memory owned by an Arc that the platform and
// every SimRemote share, valid for num_bufs * buf_size bytes, and nothing
// ever forms a safe reference over it.
unsafe impl Platform for SimPlatform {
    fn buf_region(&self) -> *mut u8 {
        self.region.ptr
    }

    fn buf_count(&self) -> u32 {
        self.num_bufs
    }

    fn buf_size(&self) -> u32 {
        self.buf_size
    }

    fn device_base(&self) -> u64 {
        DEVICE_BASE
    }

    fn take_queues(&self) -> Result<(Box<dyn RawQueue>, Box<dyn RawQueue>), Error> {
        self.queues
            .lock()
            .take()
            .ok_or(Error::Config("queues already taken"))
    }

    fn fixed_channels(&self) -> Vec<StaticChannel> {
        self.fixed.clone()
    }
}

/// A datagram as observed on the remote side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub hdr: MsgHeader,
    pub payload: Vec<u8>,
}

/// The device half: consumes host descriptors and produces completions.
#[derive(Clone)]
pub struct SimRemote {
    region: Arc<SharedRegion>,
    rvq: Arc<QueueShared>,
    svq: Arc<QueueShared>,
}

impl SimRemote {
    fn host_offset(&self, device_addr: u64, len: usize) -> usize {
        let off = device_addr
            .checked_sub(DEVICE_BASE)
            .expect("descriptor address below device base") as usize;
        assert!(off + len <= self.region.len, "descriptor outside region");
        off
    }

    /// Drain one host→remote datagram: consume the next send descriptor,
    /// read the buffer, and report it completed on the used list.
    pub fn drain_one(&self) -> Option<Datagram> {
        let desc = self.svq.inner.lock().avail.pop_front()?;
        assert_eq!(desc.dir, Direction::DeviceReadable, "send buffer posted writable");
        let dg = self.read_datagram(&desc);
        self.svq.inner.lock().used.push_back((desc.token, desc.len));
        Some(dg)
    }

    pub fn drain_all(&self) -> Vec<Datagram> {
        std::iter::from_fn(|| self.drain_one()).collect()
    }

    /// Host→remote descriptors not yet drained.
    pub fn pending_tx(&self) -> usize {
        self.svq.inner.lock().avail.len()
    }

    /// Receive buffers the host currently has posted.
    pub fn posted_rx(&self) -> usize {
        self.rvq.inner.lock().avail.len()
    }

    pub fn send_kicks(&self) -> u64 {
        self.svq.inner.lock().kicks
    }

    pub fn recv_kicks(&self) -> u64 {
        self.rvq.inner.lock().kicks
    }

    /// Whether the host disabled used notifications on the send queue.
    pub fn send_notify_suppressed(&self) -> bool {
        self.svq.inner.lock().notify_suppressed
    }

    /// Doorbell rung by host send-queue kicks.
    pub fn tx_doorbell(&self) -> Arc<Doorbell> {
        self.svq.doorbell.clone()
    }

    /// Fill the next posted receive buffer with a remote→host datagram
    /// and mark it used. False when nothing is posted. The caller still
    /// raises the host's receive notification (`Transport::recv_done`).
    pub fn deliver(&self, src: u32, dst: u32, payload: &[u8]) -> bool {
        let desc = self.rvq.inner.lock().avail.pop_front();
        let Some(desc) = desc else {
            return false;
        };
        assert_eq!(desc.dir, Direction::DeviceWritable, "receive buffer posted readable");
        assert!(
            HDR_LEN + payload.len() <= desc.len as usize,
            "payload overflows posted buffer"
        );
        let hdr = MsgHeader::new(payload.len() as u16, src, dst);
        self.write_datagram(&desc, &hdr, payload);
        self.rvq
            .inner
            .lock()
            .used
            .push_back((desc.token, (HDR_LEN + payload.len()) as u32));
        true
    }

    /// Raise a name-service announcement, as the remote name service
    /// would.
    pub fn announce(&self, msg: &NsMessage) -> bool {
        self.deliver(NS_ADDR, NS_ADDR, &msg.to_bytes())
    }

    /// Bounce every pending host datagram back with the addresses
    /// swapped, on the caller's thread. Returns how many were echoed;
    /// `notify` runs after each delivery.
    pub fn echo_pending(&self, mut notify: impl FnMut()) -> usize {
        let mut echoed = 0;
        for dg in self.drain_all() {
            if self.deliver(dg.hdr.dst, dg.hdr.src, &dg.payload) {
                echoed += 1;
                notify();
            }
        }
        echoed
    }

    /// Run the echo loop on its own thread, woken by send-queue kicks.
    /// `notify` is invoked after each delivery (typically
    /// `Transport::recv_done`).
    pub fn spawn_echo<F>(&self, notify: F) -> EchoRemote
    where
        F: Fn() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let remote = self.clone();
        let thread_stop = stop.clone();
        let handle = std::thread::spawn(move || {
            while !thread_stop.load(Ordering::Acquire) {
                remote
                    .tx_doorbell()
                    .wait_timeout(Duration::from_millis(20));
                remote.echo_pending(|| notify());
            }
        });
        EchoRemote {
            stop,
            doorbell: self.tx_doorbell(),
            handle: Some(handle),
        }
    }

    fn read_datagram(&self, desc: &Desc) -> Datagram {
        let len = desc.len as usize;
        assert!(len >= HDR_LEN, "runt send descriptor");
        let off = self.host_offset(desc.device_addr, len);
        let mut hdr_bytes = [0u8; HDR_LEN];
        // SAFETY: off + len is inside the region per host_offset; the
        // host handed this buffer to the device side.
        unsafe {
            std::ptr::copy_nonoverlapping(self.region.ptr.add(off), hdr_bytes.as_mut_ptr(), HDR_LEN)
        };
        let hdr = MsgHeader::from_bytes(&hdr_bytes);
        let payload_len = (hdr.len as usize).min(len - HDR_LEN);
        let mut payload = vec![0u8; payload_len];
        // SAFETY: as above; payload_len is clamped to the descriptor.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.region.ptr.add(off + HDR_LEN),
                payload.as_mut_ptr(),
                payload_len,
            )
        };
        Datagram { hdr, payload }
    }

    fn write_datagram(&self, desc: &Desc, hdr: &MsgHeader, payload: &[u8]) {
        let total = HDR_LEN + payload.len();
        let off = self.host_offset(desc.device_addr, total);
        let hdr_bytes = hdr.to_bytes();
        // SAFETY: off + total is inside the region per host_offset; the
        // host posted this buffer device-writable.
        unsafe {
            std::ptr::copy_nonoverlapping(hdr_bytes.as_ptr(), self.region.ptr.add(off), HDR_LEN);
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.region.ptr.add(off + HDR_LEN),
                payload.len(),
            );
        }
    }
}

/// Handle to a threaded echo remote; stops and joins on drop.
pub struct EchoRemote {
    stop: Arc<AtomicBool>,
    doorbell: Arc<Doorbell>,
    handle: Option<JoinHandle<()>>,
}

impl EchoRemote {
    pub fn stop(self) {}
}

impl Drop for EchoRemote {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.doorbell.signal();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
