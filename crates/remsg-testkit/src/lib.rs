//! remsg-testkit: test harness for the remsg bus.
//!
//! Provides the pieces a test needs to stand in for the platform and the
//! remote processor:
//!
//! - [`SimPlatform`]: a [`Platform`](remsg_core::Platform) implementation
//!   backed by a heap region and a pair of in-memory descriptor queues.
//! - [`SimRemote`]: the device half of those queues. It drains host
//!   datagrams, delivers remote datagrams into posted receive buffers,
//!   and raises name-service announcements.
//! - [`Doorbell`]: in-process signal/wait used to run a remote on its own
//!   thread ([`SimRemote::spawn_echo`]).
//!
//! # Usage
//!
//! ```ignore
//! let sim = SimPlatform::new(4, 512);
//! let remote = sim.remote();
//! let transport = Transport::attach(&sim, Registry::new())?;
//!
//! // Deterministic mode: the test plays the remote by hand.
//! remote.deliver(60, some_addr, b"ping");
//! transport.recv_done();
//! ```

mod doorbell;
mod sim;

pub use doorbell::Doorbell;
pub use sim::{Datagram, EchoRemote, SimPlatform, SimRemote};
