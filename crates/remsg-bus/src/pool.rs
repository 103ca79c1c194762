//! The shared buffer pool.
//!
//! One contiguous region of `N × S` bytes is split in half: slots
//! `0 .. N/2` are receive buffers (posted empty, filled by the remote),
//! slots `N/2 .. N` are send buffers (filled by the host, drained by the
//! remote). Each slot holds exactly one datagram.
//!
//! Slots are identified by index. Descriptors programmed into the queues
//! carry the *device-view* address of a slot, computed from a separately
//! configured base: the remote may map the region at a different address
//! than the host does, so the pool carries both forms and translates at
//! the enqueue/dequeue points.
//!
//! All raw region access lives in this module. Soundness rests on the
//! ownership discipline of the queue protocol: the host only writes
//! send-half slots it has acquired (serialized by the transport's send
//! lock) and only reads receive-half slots the remote has completed
//! (serialized by the receive dispatch context).

use remsg_core::{Error, MsgHeader, HDR_LEN};

pub struct BufferPool {
    /// Host-view base of the region.
    base: *mut u8,
    /// Base used when programming queue descriptors.
    device_base: u64,
    num_bufs: u32,
    buf_size: u32,
}

// SAFETY: the pool hands out no references that outlive a call, and the
// host side touches disjoint halves from the send path (under the send
// lock) and the receive dispatch context. The region pointer itself is
// valid for the transport's lifetime per the `Platform` contract.
unsafe impl Send for BufferPool {}
unsafe impl Sync for BufferPool {}

impl BufferPool {
    /// Wrap a platform-provided region.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of
    /// `num_bufs * buf_size` bytes for the lifetime of the pool, and the
    /// region must not be accessed through safe references while the pool
    /// is live.
    pub unsafe fn new(
        base: *mut u8,
        device_base: u64,
        num_bufs: u32,
        buf_size: u32,
    ) -> Result<Self, Error> {
        if base.is_null() {
            return Err(Error::Config("buffer region is null"));
        }
        if num_bufs == 0 || num_bufs % 2 != 0 {
            return Err(Error::Config("buffer count must be even and nonzero"));
        }
        if (buf_size as usize) <= HDR_LEN {
            return Err(Error::Config("buffer size does not fit a datagram header"));
        }
        Ok(Self {
            base,
            device_base,
            num_bufs,
            buf_size,
        })
    }

    pub fn num_bufs(&self) -> u32 {
        self.num_bufs
    }

    pub fn buf_size(&self) -> u32 {
        self.buf_size
    }

    /// Slot count per half; receive slots are `0..half()`, send slots are
    /// `half()..num_bufs()`.
    pub fn half(&self) -> u32 {
        self.num_bufs / 2
    }

    /// Largest payload a single datagram can carry. Bounded by the slot
    /// size and by the header's 16-bit length field.
    pub fn max_payload(&self) -> usize {
        (self.buf_size as usize - HDR_LEN).min(u16::MAX as usize)
    }

    /// Address of `slot` as the remote expects to see it in a descriptor.
    pub fn device_addr(&self, slot: u32) -> u64 {
        assert!(slot < self.num_bufs, "slot {slot} out of range");
        self.device_base + u64::from(slot) * u64::from(self.buf_size)
    }

    fn slot_ptr(&self, slot: u32) -> *mut u8 {
        assert!(slot < self.num_bufs, "slot {slot} out of range");
        // SAFETY: slot is in range, so the offset stays inside the region.
        unsafe { self.base.add(slot as usize * self.buf_size as usize) }
    }

    /// Fill `slot` with a datagram. The caller must own the slot (an
    /// acquired send buffer).
    pub fn write_datagram(&self, slot: u32, hdr: &MsgHeader, payload: &[u8]) {
        assert!(payload.len() <= self.max_payload(), "payload overflows slot");
        assert_eq!(payload.len(), hdr.len as usize, "header disagrees with payload");
        let p = self.slot_ptr(slot);
        let hdr_bytes = hdr.to_bytes();
        // SAFETY: p points at buf_size bytes the host currently owns;
        // header + payload fit by the assertions above.
        unsafe {
            std::ptr::copy_nonoverlapping(hdr_bytes.as_ptr(), p, HDR_LEN);
            std::ptr::copy_nonoverlapping(payload.as_ptr(), p.add(HDR_LEN), payload.len());
        }
    }

    /// Decode the header of a completed receive buffer.
    pub fn read_header(&self, slot: u32) -> MsgHeader {
        let p = self.slot_ptr(slot);
        let mut b = [0u8; HDR_LEN];
        // SAFETY: the slot is host-owned (taken off the used list) and in
        // range; every slot is at least HDR_LEN + 1 bytes.
        unsafe { std::ptr::copy_nonoverlapping(p, b.as_mut_ptr(), HDR_LEN) };
        MsgHeader::from_bytes(&b)
    }

    /// Borrow the payload of a completed receive buffer. The borrow is
    /// only handed to the endpoint callback, which runs before the slot
    /// is reposted to the remote.
    pub fn payload(&self, slot: u32, len: usize) -> &[u8] {
        assert!(len <= self.max_payload(), "payload length overflows slot");
        let p = self.slot_ptr(slot);
        // SAFETY: in range per the assertions; the slot stays host-owned
        // (not reposted) for the lifetime of the borrow.
        unsafe { std::slice::from_raw_parts(p.add(HDR_LEN), len) }
    }
}
