//! The error surface of the bus.

use thiserror::Error;

use crate::queue::QueueError;

/// Errors surfaced by the bus core.
///
/// `NoBuffer` and `AddressInUse` are recoverable: they leave already
/// committed state untouched and the caller may retry. `QueueFault` means
/// the underlying queue refused a post and is fatal for the transport in
/// practice.
#[derive(Debug, Error)]
pub enum Error {
    /// `src` or `dst` was the `ADDR_ANY` sentinel on send.
    #[error("invalid address (src {src:#x}, dst {dst:#x})")]
    InvalidAddress { src: u32, dst: u32 },

    /// Payload plus header exceeds the per-buffer size.
    #[error("message is too big ({len} bytes)")]
    TooLarge { len: usize },

    /// No free send buffer and nothing to reclaim. Retry later.
    #[error("no free transmit buffer")]
    NoBuffer,

    /// An explicitly requested endpoint address is already occupied.
    #[error("address {addr:#x} already in use")]
    AddressInUse { addr: u32 },

    /// Endpoint or channel allocation failed. Returned by client driver
    /// `probe` implementations; the core itself does not produce it.
    #[error("out of memory")]
    OutOfMemory,

    /// The underlying queue refused a buffer post.
    #[error("queue fault: {0}")]
    QueueFault(#[from] QueueError),

    /// The channel's transport has been torn down.
    #[error("transport has been torn down")]
    Detached,

    /// The platform handed the transport an unusable configuration.
    #[error("invalid transport configuration: {0}")]
    Config(&'static str),
}
