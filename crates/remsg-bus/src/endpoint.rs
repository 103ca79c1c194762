//! Endpoints and the per-transport address table.
//!
//! An endpoint binds a 32-bit local address to a receive callback. The
//! table is a sparse integer-keyed map under one mutex; holds are short
//! (insert, lookup, remove) and callbacks always run outside the lock.
//!
//! Addresses below [`RESERVED_ADDRESSES`] belong to predefined services
//! and are never produced by the dynamic allocator; they can only be
//! claimed by an explicit request.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use remsg_core::{Error, ADDR_ANY, RESERVED_ADDRESSES};
use tracing::warn;

use crate::channel::Channel;

/// Receive callback of an endpoint: `(channel, payload, src_addr)`.
///
/// Client state rides in the closure's captured environment. The callback
/// runs on the transport's receive dispatch context and must not block
/// indefinitely, or the receive queue stalls.
pub type RxCallback = Arc<dyn Fn(&Arc<Channel>, &[u8], u32) + Send + Sync>;

/// A local address bound to a receive callback, owned by a channel.
pub struct Endpoint {
    addr: u32,
    cb: RxCallback,
    channel: Weak<Channel>,
    alive: AtomicBool,
}

impl Endpoint {
    /// The assigned local address.
    pub fn addr(&self) -> u32 {
        self.addr
    }

    /// Flip this handle to destroyed. True exactly once.
    pub(crate) fn retire(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Invoke the callback for an incoming datagram. Called with no
    /// transport lock held.
    pub(crate) fn deliver(&self, payload: &[u8], src: u32) {
        if !self.alive.load(Ordering::Acquire) {
            return;
        }
        match self.channel.upgrade() {
            Some(chan) => (self.cb)(&chan, payload, src),
            None => warn!(addr = self.addr, "endpoint owner is gone, dropping message"),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("addr", &self.addr)
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish()
    }
}

/// Sparse address → endpoint map. The owning transport wraps it in a
/// mutex; nothing here locks.
#[derive(Default)]
pub(crate) struct EndpointTable {
    map: BTreeMap<u32, Arc<Endpoint>>,
}

impl EndpointTable {
    /// Insert an endpoint for `channel`.
    ///
    /// `ADDR_ANY` allocates the lowest unused address at or above
    /// [`RESERVED_ADDRESSES`]; an explicit address (reserved range
    /// included) succeeds iff it is currently free.
    pub fn create(
        &mut self,
        channel: &Arc<Channel>,
        cb: RxCallback,
        addr: u32,
    ) -> Result<Arc<Endpoint>, Error> {
        let assigned = if addr == ADDR_ANY {
            self.lowest_free(RESERVED_ADDRESSES)
        } else {
            if self.map.contains_key(&addr) {
                return Err(Error::AddressInUse { addr });
            }
            addr
        };

        let ept = Arc::new(Endpoint {
            addr: assigned,
            cb,
            channel: Arc::downgrade(channel),
            alive: AtomicBool::new(true),
        });
        self.map.insert(assigned, ept.clone());
        Ok(ept)
    }

    /// Remove `ept`'s entry, if it is still the occupant of its address.
    pub fn remove(&mut self, ept: &Endpoint) {
        if let Some(cur) = self.map.get(&ept.addr) {
            if std::ptr::eq(Arc::as_ptr(cur), ept) {
                self.map.remove(&ept.addr);
            }
        }
    }

    pub fn lookup(&self, addr: u32) -> Option<Arc<Endpoint>> {
        self.map.get(&addr).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.map.len();
        self.map.clear();
        n
    }

    /// Lowest address ≥ `start` with no occupant. The reserved range is
    /// reserved simply by never being scanned.
    fn lowest_free(&self, start: u32) -> u32 {
        let mut candidate = start;
        for (&addr, _) in self.map.range(start..) {
            if addr == candidate {
                candidate += 1;
            } else {
                break;
            }
        }
        candidate
    }
}
