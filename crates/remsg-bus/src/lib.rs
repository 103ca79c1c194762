//! remsg-bus: the shared-memory messaging bus.
//!
//! A host-side driver for exchanging fixed-format datagrams with a remote
//! processor through a shared memory region and a pair of ring queues,
//! multiplexed over 32-bit endpoint addresses.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ client drivers (probe / remove / callback)                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Registry ── name match ──► Channel (name, src, dst)             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Endpoint table (addr ──► callback)        Name service (addr 53)│
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Transport: send queue │ recv queue │ buffer pool (N × S bytes)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data flow on send: client → channel → `(src, dst)` addresses → send
//! buffer → send queue → doorbell. On receive: used notification →
//! dequeue → endpoint lookup by `dst` → callback → repost → doorbell.
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::new();
//! registry.register_driver(Arc::new(EchoDriver))?;
//! let transport = Transport::attach(&platform, registry)?;
//! // ... the remote announces "echo"; EchoDriver::probe runs, and its
//! // callback sees every datagram addressed to the channel's endpoint.
//! transport.detach();
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]

mod channel;
mod endpoint;
pub mod ns;
mod pool;
mod registry;
mod transport;

pub use channel::Channel;
pub use endpoint::{Endpoint, RxCallback};
pub use pool::BufferPool;
pub use registry::{Driver, Registry};
pub use transport::Transport;

pub use remsg_core::{
    Direction, Error, MsgHeader, NsMessage, Platform, QueueError, RawQueue, SlotToken,
    StaticChannel, ADDR_ANY, HDR_LEN, NAME_LEN, NS_ADDR, NS_DESTROY, NS_MSG_LEN,
    RESERVED_ADDRESSES,
};
