//! In-memory model of the endpoint address allocator.
//!
//! Replicates the table's rules (dynamic allocation picks the lowest
//! free address at or above the reserved boundary; explicit requests
//! succeed iff the address is free) and checks them against a naive
//! reference after every operation.

use std::collections::BTreeSet;

use remsg_core::{ADDR_ANY, RESERVED_ADDRESSES};

/// Operations the fuzzer can perform.
#[derive(Clone, Copy, Debug)]
pub enum TableOp {
    /// Dynamic allocation (`ADDR_ANY`).
    CreateAny,
    /// Explicit request. `ADDR_ANY` degenerates to `CreateAny`, exactly
    /// like the real table.
    CreateAt(u32),
    /// Remove a live endpoint (index into the live list, modulo its
    /// length).
    Remove(usize),
}

/// Model of the address table, mirroring the range-scan allocator.
pub struct TableModel {
    occupied: BTreeSet<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    AddressInUse,
}

impl TableModel {
    pub fn new() -> Self {
        Self {
            occupied: BTreeSet::new(),
        }
    }

    pub fn create(&mut self, addr: u32) -> Result<u32, TableError> {
        let assigned = if addr == ADDR_ANY {
            self.lowest_free(RESERVED_ADDRESSES)
        } else {
            if self.occupied.contains(&addr) {
                return Err(TableError::AddressInUse);
            }
            addr
        };
        self.occupied.insert(assigned);
        Ok(assigned)
    }

    pub fn remove(&mut self, addr: u32) -> bool {
        self.occupied.remove(&addr)
    }

    pub fn len(&self) -> usize {
        self.occupied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied.is_empty()
    }

    fn lowest_free(&self, start: u32) -> u32 {
        let mut candidate = start;
        for &addr in self.occupied.range(start..) {
            if addr == candidate {
                candidate += 1;
            } else {
                break;
            }
        }
        candidate
    }
}

impl Default for TableModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Execute a sequence of operations and verify invariants.
pub fn execute_and_verify(ops: &[TableOp]) -> Result<(), String> {
    let mut table = TableModel::new();
    let mut live: Vec<u32> = Vec::new();

    for (i, op) in ops.iter().enumerate() {
        match op {
            TableOp::CreateAny | TableOp::CreateAt(ADDR_ANY) => {
                let expected = reference_lowest_free(&live);
                let got = table
                    .create(ADDR_ANY)
                    .map_err(|e| format!("op {}: dynamic create failed: {:?}", i, e))?;
                if got != expected {
                    return Err(format!(
                        "op {}: allocator returned {} but lowest free is {}",
                        i, got, expected
                    ));
                }
                if got < RESERVED_ADDRESSES {
                    return Err(format!("op {}: dynamic address {} in reserved range", i, got));
                }
                if live.contains(&got) {
                    return Err(format!("op {}: address {} handed out twice", i, got));
                }
                live.push(got);
            }
            TableOp::CreateAt(addr) => {
                let was_occupied = live.contains(addr);
                match table.create(*addr) {
                    Ok(got) => {
                        if was_occupied {
                            return Err(format!(
                                "op {}: explicit create at occupied {} succeeded",
                                i, addr
                            ));
                        }
                        if got != *addr {
                            return Err(format!(
                                "op {}: explicit create returned {} for {}",
                                i, got, addr
                            ));
                        }
                        live.push(got);
                    }
                    Err(TableError::AddressInUse) => {
                        if !was_occupied {
                            return Err(format!(
                                "op {}: AddressInUse for free address {}",
                                i, addr
                            ));
                        }
                    }
                }
            }
            TableOp::Remove(idx) => {
                if live.is_empty() {
                    continue;
                }
                let addr = live.remove(idx % live.len());
                if !table.remove(addr) {
                    return Err(format!("op {}: remove lost address {}", i, addr));
                }
            }
        }

        if table.len() != live.len() {
            return Err(format!(
                "after op {}: table has {} entries, reference has {}",
                i,
                table.len(),
                live.len()
            ));
        }
    }

    Ok(())
}

fn reference_lowest_free(live: &[u32]) -> u32 {
    let mut candidate = RESERVED_ADDRESSES;
    while live.contains(&candidate) {
        candidate += 1;
    }
    candidate
}
