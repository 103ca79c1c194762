//! Combined model of the full send/receive flow.
//!
//! Wires the send-pool model to a model of the receive loop:
//!
//! 1. Host acquires a send buffer and enqueues a datagram
//! 2. Remote drains it (FIFO) and holds it in its inbox
//! 3. Remote echoes it into a posted receive buffer
//! 4. Host dispatches the receive buffer and reposts it
//!
//! Checked throughout: per-queue FIFO ordering, send-slot conservation,
//! and the receive-half conservation law (posted + awaiting-dispatch is
//! constant).

use std::collections::VecDeque;

use crate::pool_model::SendPoolModel;

/// Operations the fuzzer can perform.
#[derive(Clone, Copy, Debug)]
pub enum LinkOp {
    /// Host sends the next numbered datagram.
    HostSend,
    /// Remote drains one host datagram.
    RemoteDrain,
    /// Remote echoes the oldest drained datagram back.
    RemoteDeliver,
    /// Host dispatches one completed receive buffer and reposts it.
    HostDispatch,
}

pub struct LinkModel {
    send: SendPoolModel,
    /// Datagram ids in flight host→remote, parallel to the send pool's
    /// in-flight list.
    tx_ids: VecDeque<u64>,
    next_id: u64,
    /// Ids drained by the remote, not yet echoed.
    remote_inbox: VecDeque<u64>,
    /// Receive buffers currently posted to the remote.
    posted_rx: u32,
    /// Receive buffers completed by the remote, awaiting dispatch.
    pending_rx: VecDeque<u64>,
    /// Ids seen by the host's callbacks, in order.
    delivered: Vec<u64>,
    rx_half: u32,
}

impl LinkModel {
    pub fn new(tx_half: u32, rx_half: u32) -> Self {
        let send = SendPoolModel::new(tx_half);
        let rx_half = rx_half.clamp(1, 16);
        Self {
            send,
            tx_ids: VecDeque::new(),
            next_id: 0,
            remote_inbox: VecDeque::new(),
            posted_rx: rx_half,
            pending_rx: VecDeque::new(),
            delivered: Vec::new(),
            rx_half,
        }
    }

    pub fn host_send(&mut self) -> bool {
        if self.send.send().is_none() {
            return false;
        }
        self.tx_ids.push_back(self.next_id);
        self.next_id += 1;
        true
    }

    pub fn remote_drain(&mut self) -> Option<u64> {
        let id = self.tx_ids.front().copied()?;
        self.send.complete();
        self.tx_ids.pop_front();
        self.remote_inbox.push_back(id);
        Some(id)
    }

    pub fn remote_deliver(&mut self) -> bool {
        if self.posted_rx == 0 || self.remote_inbox.is_empty() {
            return false;
        }
        let id = self.remote_inbox.pop_front().expect("checked non-empty");
        self.posted_rx -= 1;
        self.pending_rx.push_back(id);
        true
    }

    pub fn host_dispatch(&mut self) -> Option<u64> {
        let id = self.pending_rx.pop_front()?;
        self.delivered.push(id);
        self.posted_rx += 1;
        Some(id)
    }

    pub fn delivered(&self) -> &[u64] {
        &self.delivered
    }
}

/// Execute a sequence of operations and verify invariants.
pub fn execute_and_verify(tx_half: u32, rx_half: u32, ops: &[LinkOp]) -> Result<(), String> {
    let mut link = LinkModel::new(tx_half, rx_half);
    let mut last_drained: Option<u64> = None;

    for (i, op) in ops.iter().enumerate() {
        match op {
            LinkOp::HostSend => {
                link.host_send();
            }
            LinkOp::RemoteDrain => {
                if let Some(id) = link.remote_drain() {
                    // Per-queue FIFO: ids leave in the order they entered.
                    if let Some(prev) = last_drained {
                        if id != prev + 1 {
                            return Err(format!(
                                "op {}: drained id {} after {}, FIFO broken",
                                i, id, prev
                            ));
                        }
                    } else if id != 0 {
                        return Err(format!("op {}: first drained id is {}", i, id));
                    }
                    last_drained = Some(id);
                }
            }
            LinkOp::RemoteDeliver => {
                link.remote_deliver();
            }
            LinkOp::HostDispatch => {
                link.host_dispatch();
            }
        }

        // Receive conservation: every receive buffer is either posted or
        // awaiting dispatch.
        let rx_total = link.posted_rx as usize + link.pending_rx.len();
        if rx_total != link.rx_half as usize {
            return Err(format!(
                "after op {}: posted({}) + pending({}) = {} != rx_half({})",
                i,
                link.posted_rx,
                link.pending_rx.len(),
                rx_total,
                link.rx_half
            ));
        }
    }

    // End-to-end order: the callback saw a strictly increasing id stream.
    for pair in link.delivered().windows(2) {
        if pair[1] <= pair[0] {
            return Err(format!(
                "delivered ids reordered: {} after {}",
                pair[1], pair[0]
            ));
        }
    }

    Ok(())
}
