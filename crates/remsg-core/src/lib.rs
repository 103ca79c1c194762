//! remsg-core: Core types for the remsg messaging bus.
//!
//! remsg is a point-to-point, address-multiplexed messaging bus between a
//! host processor and one or more auxiliary processors sharing a region of
//! memory. This crate holds the pieces every other crate agrees on:
//!
//! - The **wire format**: a 16-byte packed datagram header followed by the
//!   payload, and the 40-byte name-service announcement message.
//! - The **address space**: 32-bit endpoint addresses, the `ADDR_ANY`
//!   sentinel, the reserved low range for well-known services.
//! - The **queue abstraction**: [`RawQueue`], the descriptor-ring surface
//!   the platform hands to the transport (post buffers, reclaim used ones,
//!   ring the doorbell).
//! - The **platform surface**: [`Platform`], the per-remote-processor
//!   configuration contract (buffer region, geometry, queue pair).
//! - The **error type** shared across the bus.
//!
//! The actual transport, endpoint table, and channel machinery live in
//! `remsg-bus`.

#![forbid(unsafe_op_in_unsafe_fn)]

mod error;
pub mod platform;
pub mod queue;
pub mod wire;

pub use error::Error;
pub use platform::{Platform, StaticChannel};
pub use queue::{Direction, QueueError, RawQueue, SlotToken};
pub use wire::{
    MsgHeader, NsMessage, ADDR_ANY, HDR_LEN, NAME_LEN, NS_ADDR, NS_DESTROY, NS_MSG_LEN,
    RESERVED_ADDRESSES,
};
