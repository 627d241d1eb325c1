// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present NORI Contributors

//! Flow endpoints.
//!
//! A [`Flow`] ties together the immutable connection identity, the DTP
//! state vector under its lock, the RMT queue with its own finer lock, the
//! TX wait queue and the upward delivery binding. The identity fields are
//! fixed at creation; everything mutable sits behind a lock of its own so
//! the receive and transmit paths can run concurrently.

use crate::buffer::Buffer;
use crate::config::FlowConfig;
use crate::dtp::{Dtp, DtpSnapshot};
use crate::error::SduWriteError;
use crate::ipcp::IpcpOps;
use crate::timer::Timer;
use log::{debug, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::time::Duration;

/// Where SDUs delivered on a flow go.
pub enum Upper {
    /// A user endpoint: SDUs land in the per-flow receive queue and are
    /// read with [`Flow::recv`].
    User,
    /// An N+1 IPCP stacked on this flow: SDUs are handed to its `sdu_rx`.
    Ipcp(Weak<dyn IpcpOps>),
}

/// One flow endpoint.
pub struct Flow {
    local_port: u32,
    remote_port: u32,
    remote_addr: u64,
    cfg: FlowConfig,
    provider: Weak<dyn IpcpOps>,
    upper: Upper,

    pub(crate) dtp: Mutex<Dtp>,

    /// PDUs awaiting room on this flow, parked by the router on
    /// backpressure. Guarded by its own lock, never by the DTP lock.
    rmtq: Mutex<VecDeque<Buffer>>,

    tx_event: Mutex<u64>,
    tx_cond: Condvar,

    rxq: Mutex<VecDeque<Buffer>>,
    rx_cond: Condvar,

    /// Destination addresses whose PDUFT entries point at this flow;
    /// lets teardown drain the table in O(#entries).
    pub(crate) pduft_addrs: Mutex<HashSet<u64>>,

    pub(crate) snd_inact_tmr: OnceLock<Timer>,
    pub(crate) rcv_inact_tmr: OnceLock<Timer>,
}

impl Flow {
    /// Creates a flow endpoint. `provider` is the IPCP whose `sdu_write`
    /// transmits on this flow; `upper` is where delivered SDUs go.
    pub fn new(
        local_port: u32,
        remote_port: u32,
        remote_addr: u64,
        cfg: FlowConfig,
        provider: Weak<dyn IpcpOps>,
        upper: Upper,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_port,
            remote_port,
            remote_addr,
            dtp: Mutex::new(Dtp::init(&cfg)),
            cfg,
            provider,
            upper,
            rmtq: Mutex::new(VecDeque::new()),
            tx_event: Mutex::new(0),
            tx_cond: Condvar::new(),
            rxq: Mutex::new(VecDeque::new()),
            rx_cond: Condvar::new(),
            pduft_addrs: Mutex::new(HashSet::new()),
            snd_inact_tmr: OnceLock::new(),
            rcv_inact_tmr: OnceLock::new(),
        })
    }

    pub fn local_port(&self) -> u32 {
        self.local_port
    }

    pub fn remote_port(&self) -> u32 {
        self.remote_port
    }

    pub fn remote_addr(&self) -> u64 {
        self.remote_addr
    }

    pub fn config(&self) -> &FlowConfig {
        &self.cfg
    }

    /// The IPCP providing this flow, if it is still alive.
    pub fn provider(&self) -> Option<Arc<dyn IpcpOps>> {
        self.provider.upgrade()
    }

    /// Window and queue counters, for diagnostics and tests.
    pub fn dtp_snapshot(&self) -> DtpSnapshot {
        self.dtp.lock().unwrap().snapshot()
    }

    /// Delivers an SDU upward: into the receive queue for user flows, or
    /// recursively into the N+1 IPCP.
    pub(crate) fn deliver_up(&self, buf: Buffer) -> Result<(), SduWriteError> {
        match &self.upper {
            Upper::User => {
                self.rxq.lock().unwrap().push_back(buf);
                self.rx_cond.notify_all();
                Ok(())
            }
            Upper::Ipcp(upper) => match upper.upgrade() {
                Some(ipcp) => ipcp.sdu_rx(buf),
                None => {
                    warn!("flow {}: upper IPCP is gone, dropping SDU", self.local_port);
                    Ok(())
                }
            },
        }
    }

    /// Pops a delivered SDU without blocking.
    pub fn try_recv(&self) -> Option<Buffer> {
        self.rxq.lock().unwrap().pop_front()
    }

    /// Pops a delivered SDU, waiting up to `timeout` for one to arrive.
    pub fn recv(&self, timeout: Duration) -> Option<Buffer> {
        let queue = self.rxq.lock().unwrap();
        let (mut queue, _) = self
            .rx_cond
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap();
        queue.pop_front()
    }

    /// Current TX event count; sample before attempting a write so a
    /// wake-up between failure and sleep is not lost.
    pub(crate) fn tx_event_count(&self) -> u64 {
        *self.tx_event.lock().unwrap()
    }

    /// Blocks until the TX event count moves past `seen`.
    pub(crate) fn tx_wait_for_change(&self, seen: u64) {
        let guard = self.tx_event.lock().unwrap();
        let _unused = self
            .tx_cond
            .wait_while(guard, |count| *count == seen)
            .unwrap();
    }

    /// Signals TX room on this flow, waking blocked writers.
    pub(crate) fn tx_wakeup(&self) {
        *self.tx_event.lock().unwrap() += 1;
        self.tx_cond.notify_all();
    }

    /// Parks a PDU until this flow has TX room again.
    pub(crate) fn rmtq_push(&self, buf: Buffer) {
        let mut rmtq = self.rmtq.lock().unwrap();
        rmtq.push_back(buf);
        debug!("flow {}: rmtq length {}", self.local_port, rmtq.len());
    }

    /// Takes every parked PDU for re-submission.
    pub(crate) fn rmtq_drain(&self) -> Vec<Buffer> {
        self.rmtq.lock().unwrap().drain(..).collect()
    }

    /// Number of PDUs parked on this flow.
    pub fn rmtq_len(&self) -> usize {
        self.rmtq.lock().unwrap().len()
    }

    /// Disarms both inactivity timers (flow teardown).
    pub(crate) fn cancel_timers(&self) {
        if let Some(t) = self.snd_inact_tmr.get() {
            t.try_cancel();
        }
        if let Some(t) = self.rcv_inact_tmr.get() {
            t.try_cancel();
        }
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("local_port", &self.local_port)
            .field("remote_port", &self.remote_port)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}
