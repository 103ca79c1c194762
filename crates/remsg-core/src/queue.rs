//! The descriptor-queue surface the platform provides to the transport.
//!
//! A transport is backed by two ring-style queues shared with the remote
//! processor, following the classic descriptor/available/used split-ring
//! discipline: the host posts buffer descriptors, the remote consumes or
//! fills them and places them on a used list, and each side rings a
//! doorbell to wake the other.
//!
//! The transport never sees the ring layout itself; it drives whatever the
//! platform hands it through [`RawQueue`]. Buffers are identified by their
//! pool slot index ([`SlotToken`]), and descriptors carry the device-view
//! address of the buffer, which may differ from the host's pointer.

use thiserror::Error;

/// Pool slot index used as the host-side cookie for a posted buffer. The
/// queue returns it untouched from [`RawQueue::take_used`].
pub type SlotToken = u32;

/// Which side may write the posted buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Receive side: empty buffer for the remote to fill.
    DeviceWritable,
    /// Send side: full buffer for the remote to read.
    DeviceReadable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum QueueError {
    /// No free descriptor; the ring is at capacity.
    #[error("descriptor ring is full")]
    Full,
    /// The queue refused the descriptor outright.
    #[error("descriptor rejected by the queue")]
    Rejected,
}

/// One half of the queue pair shared with the remote processor.
///
/// Within a single queue, buffers become visible to the peer in the order
/// they were added, and `take_used` yields completions in the order the
/// peer produced them. Nothing is ordered across the two queues.
///
/// Inbound "used" notifications are *not* part of this trait: the platform
/// delivers them by calling back into the transport from its interrupt
/// context.
pub trait RawQueue: Send {
    /// Post a buffer descriptor for the remote processor.
    ///
    /// `device_addr` is the buffer's address as the remote expects to see
    /// it in the descriptor; `token` comes back verbatim from
    /// [`take_used`](Self::take_used).
    fn add_buf(
        &mut self,
        device_addr: u64,
        len: u32,
        dir: Direction,
        token: SlotToken,
    ) -> Result<(), QueueError>;

    /// Take one buffer off the used list, with the byte count the remote
    /// reported. `None` when the used list is empty.
    fn take_used(&mut self) -> Option<(SlotToken, u32)>;

    /// Ring the outbound doorbell so the remote notices new descriptors.
    fn kick(&mut self);

    /// Stop delivering host-side "used" notifications for this queue.
    /// Applied to the send queue after setup; completions are then
    /// reclaimed lazily via [`take_used`](Self::take_used).
    fn suppress_used_notify(&mut self);
}
