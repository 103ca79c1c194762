//! In-memory model of the send-buffer hand-out policy.
//!
//! The transport hands out never-used upper-half slots in order, then
//! recycles whatever the remote has completed, and reports `NoBuffer`
//! only when both sources are dry. This module replicates that policy so
//! it can be fuzzed without a transport.

use std::collections::VecDeque;

/// Minimum send-half size for fuzzing.
pub const MIN_HALF: u32 = 1;
/// Maximum send-half size for fuzzing (small finds edge cases faster).
pub const MAX_HALF: u32 = 16;

/// Operations the fuzzer can perform.
#[derive(Clone, Copy, Debug)]
pub enum SendOp {
    /// Host acquires a buffer and enqueues a datagram.
    Send,
    /// Remote drains the oldest in-flight buffer.
    Complete,
}

/// Model of the send half of the buffer pool plus the send queue's used
/// list.
pub struct SendPoolModel {
    half: u32,
    /// Count of slots never handed out.
    next_unused: u32,
    /// Enqueued, not yet drained by the remote. Front is oldest.
    in_flight: VecDeque<u32>,
    /// Drained by the remote, reclaimable by the host. Front is oldest.
    completed: VecDeque<u32>,
}

impl SendPoolModel {
    pub fn new(half: u32) -> Self {
        let half = half.clamp(MIN_HALF, MAX_HALF);
        Self {
            half,
            next_unused: 0,
            in_flight: VecDeque::new(),
            completed: VecDeque::new(),
        }
    }

    /// Acquire a slot and enqueue it. `None` models `NoBuffer`.
    pub fn send(&mut self) -> Option<u32> {
        let slot = if self.next_unused < self.half {
            let slot = self.next_unused;
            self.next_unused += 1;
            slot
        } else {
            self.completed.pop_front()?
        };
        self.in_flight.push_back(slot);
        Some(slot)
    }

    /// Remote completes the oldest in-flight buffer.
    pub fn complete(&mut self) -> Option<u32> {
        let slot = self.in_flight.pop_front()?;
        self.completed.push_back(slot);
        Some(slot)
    }

    pub fn half(&self) -> u32 {
        self.half
    }

    pub fn unused_count(&self) -> usize {
        (self.half - self.next_unused) as usize
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn oldest_completed(&self) -> Option<u32> {
        self.completed.front().copied()
    }
}

/// Execute a sequence of operations and verify invariants.
pub fn execute_and_verify(half: u32, ops: &[SendOp]) -> Result<(), String> {
    let mut pool = SendPoolModel::new(half);
    let mut expected_reclaim: Option<u32> = None;

    for (i, op) in ops.iter().enumerate() {
        match op {
            SendOp::Send => {
                let exhausted = pool.unused_count() == 0;
                if exhausted {
                    expected_reclaim = pool.oldest_completed();
                }
                match pool.send() {
                    Some(slot) => {
                        if slot >= pool.half() {
                            return Err(format!("op {}: slot {} out of range", i, slot));
                        }
                        if exhausted {
                            // Reclaim must take the oldest completion.
                            if Some(slot) != expected_reclaim {
                                return Err(format!(
                                    "op {}: reclaimed {} but oldest completed was {:?}",
                                    i, slot, expected_reclaim
                                ));
                            }
                        }
                    }
                    None => {
                        // NoBuffer is only legal when both sources are dry.
                        if pool.unused_count() != 0 || pool.completed_count() != 0 {
                            return Err(format!(
                                "op {}: NoBuffer with {} unused and {} completed",
                                i,
                                pool.unused_count(),
                                pool.completed_count()
                            ));
                        }
                    }
                }
            }
            SendOp::Complete => {
                pool.complete();
            }
        }

        verify_pool_invariants(&pool, i)?;
    }

    Ok(())
}

fn verify_pool_invariants(pool: &SendPoolModel, op_idx: usize) -> Result<(), String> {
    // Invariant 1: every slot is in exactly one place.
    let total = pool.unused_count() + pool.in_flight_count() + pool.completed_count();
    if total != pool.half() as usize {
        return Err(format!(
            "after op {}: unused({}) + in_flight({}) + completed({}) = {} != half({})",
            op_idx,
            pool.unused_count(),
            pool.in_flight_count(),
            pool.completed_count(),
            total,
            pool.half()
        ));
    }

    // Invariant 2: no slot appears twice across the live lists.
    let mut seen = std::collections::HashSet::new();
    for slot in pool.in_flight.iter().chain(pool.completed.iter()) {
        if !seen.insert(*slot) {
            return Err(format!("after op {}: slot {} duplicated", op_idx, slot));
        }
        if *slot >= pool.next_unused {
            return Err(format!(
                "after op {}: slot {} live but never handed out",
                op_idx, slot
            ));
        }
    }

    Ok(())
}
