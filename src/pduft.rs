// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present NORI Contributors

//! PDU Forwarding Table.
//!
//! Maps a destination address to the lower (N-1) flow that reaches it. The
//! hash map owns the entries; each flow keeps the set of addresses routed
//! through it as the reverse index, so tearing a flow down drains its
//! entries in O(#entries). The table is injective on addresses: re-pointing
//! an address detaches it from the previous flow first.

use crate::error::RmtError;
use crate::flow::Flow;
use std::collections::HashMap;
use std::sync::Arc;

/// One forwarding entry.
#[derive(Debug, Clone)]
pub struct PduftEntry {
    address: u64,
    flow: Arc<Flow>,
}

impl PduftEntry {
    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }
}

/// The forwarding table of one IPCP.
#[derive(Debug, Default)]
pub struct Pduft {
    entries: HashMap<u64, PduftEntry>,
}

impl Pduft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points `address` at `flow`. An existing entry is re-targeted:
    /// detached from its current flow's reverse index and attached to the
    /// new one. Idempotent.
    pub fn set(&mut self, address: u64, flow: &Arc<Flow>) {
        match self.entries.get_mut(&address) {
            Some(entry) => {
                if !Arc::ptr_eq(&entry.flow, flow) {
                    entry.flow.pduft_addrs.lock().unwrap().remove(&address);
                    flow.pduft_addrs.lock().unwrap().insert(address);
                    entry.flow = flow.clone();
                }
            }
            None => {
                self.entries.insert(
                    address,
                    PduftEntry {
                        address,
                        flow: flow.clone(),
                    },
                );
                flow.pduft_addrs.lock().unwrap().insert(address);
            }
        }
    }

    /// Removes the entry for `address`, detaching it from its flow.
    pub fn del(&mut self, address: u64) -> Result<(), RmtError> {
        let entry = self
            .entries
            .remove(&address)
            .ok_or(RmtError::NoRoute(address))?;
        entry.flow.pduft_addrs.lock().unwrap().remove(&address);
        Ok(())
    }

    /// Next-hop lookup.
    pub fn lookup(&self, address: u64) -> Option<Arc<Flow>> {
        self.entries.get(&address).map(|e| e.flow.clone())
    }

    /// Removes every entry routed through `flow` (flow teardown). Returns
    /// the number of entries removed.
    pub fn drain(&mut self, flow: &Arc<Flow>) -> usize {
        let addresses: Vec<u64> = flow.pduft_addrs.lock().unwrap().drain().collect();
        let mut removed = 0;
        for address in addresses {
            if let Some(entry) = self.entries.get(&address) {
                if Arc::ptr_eq(&entry.flow, flow) {
                    self.entries.remove(&address);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &PduftEntry> {
        self.entries.values()
    }
}
