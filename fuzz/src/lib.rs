//! Fuzzing harnesses for the remsg bus.
//!
//! These fuzzers operate on in-memory replicas of the bus structures,
//! without touching real shared memory, to test invariants of the
//! buffer hand-out policy, the address allocator, and the combined
//! send/receive flow.

pub mod link_model;
pub mod pool_model;
pub mod table_model;
