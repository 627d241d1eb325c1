// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present NORI Contributors

//! The normal IPC process.
//!
//! [`NormalIpcp`] implements the data-transfer engine: the transmit path
//! (`sdu_write`), the receive path (`sdu_rx` with the DTCP control handler)
//! and the router (`rmt_tx`) that resolves destination addresses through
//! the PDUFT onto N-1 flows.
//!
//! Locking discipline: the per-flow DTP lock is held across state-vector
//! updates and queue operations only. Control PDUs are built under the lock
//! and emitted after it is released; the router is never entered with a
//! lock held.

use crate::buffer::Buffer;
use crate::dtp::{Dtp, SEQ_NONE};
use crate::error::{ConfigError, RmtError, SduWriteError};
use crate::flow::Flow;
use crate::pci::{
    ConnId, PCI_CTRL_LEN, PDU_FLAG_DRF, PDU_T_ACK, PDU_T_ACK_BIT, PDU_T_ACK_MASK, PDU_T_CTRL_MASK,
    PDU_T_DT, PDU_T_FC_BIT, PDU_T_MGMT, Pci, PciCtrl,
};
use crate::pduft::Pduft;
use crate::timer::TimerWheel;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Sender inactivity timeout, 3·(MPL+R+A): 2^30 ns ≈ 1.07 s.
const SND_INACT_TIMEOUT: Duration = Duration::from_nanos(1 << 30);

/// Receiver inactivity timeout, 2·(MPL+R+A): two thirds of the sender's.
const RCV_INACT_TIMEOUT: Duration = Duration::from_nanos((1 << 30) / 3 * 2);

/// The A (ack delay) timer is a policy placeholder: it is never armed, and
/// the receive path treats it as permanently zero.
const A_TIMEOUT: Duration = Duration::ZERO;

/// The capability set shared by every DIF variant (normal, shim, loopback).
/// A lower IPCP is reached exclusively through this trait; a [`Flow`]
/// records the IPCP providing it.
pub trait IpcpOps: Send + Sync {
    /// Transmits one SDU on `flow`. `maysleep` tells whether the calling
    /// context may block on backpressure.
    fn sdu_write(
        &self,
        flow: &Arc<Flow>,
        buf: Buffer,
        maysleep: bool,
    ) -> Result<(), SduWriteError>;

    /// Receives one PDU arriving from below. The buffer is consumed in all
    /// cases.
    fn sdu_rx(&self, buf: Buffer) -> Result<(), SduWriteError>;

    /// Hook run when a flow provided by this IPCP becomes operational.
    fn flow_init(&self, _flow: &Arc<Flow>) {}
}

/// Addressing mode for management PDUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MgmtHdr {
    /// Route towards a destination address through the PDUFT.
    OutDstAddr(u64),
    /// Use the N-1 flow bound on the given local port.
    OutLocalPort(u32),
}

/// A normal IPC process: per-flow DTP/DTCP plus PDU forwarding.
pub struct NormalIpcp {
    addr: AtomicU64,
    pduft: RwLock<Pduft>,
    /// Flows provided by this IPCP, keyed by local port (CEP).
    flows: RwLock<HashMap<u32, Arc<Flow>>>,
    /// N-1 flows this IPCP sits on top of, keyed by their local port.
    lower_flows: RwLock<HashMap<u32, Arc<Flow>>>,
    timers: TimerWheel,
}

impl NormalIpcp {
    /// Creates the IPCP private state: an empty PDUFT, empty flow tables
    /// and the timer worker.
    pub fn new() -> Arc<Self> {
        let ipcp = Arc::new(Self {
            addr: AtomicU64::new(0),
            pduft: RwLock::new(Pduft::new()),
            flows: RwLock::new(HashMap::new()),
            lower_flows: RwLock::new(HashMap::new()),
            timers: TimerWheel::new(),
        });
        info!("new normal IPCP created");
        ipcp
    }

    /// This IPCP's address within its DIF.
    pub fn addr(&self) -> u64 {
        self.addr.load(Ordering::SeqCst)
    }

    /// Sets a configuration parameter. Recognised: `address` (decimal u64).
    pub fn config(&self, name: &str, value: &str) -> Result<(), ConfigError> {
        match name {
            "address" => {
                let address: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                    param: name.into(),
                    value: value.into(),
                })?;
                info!("IPCP address set to {address}");
                self.addr.store(address, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(ConfigError::UnknownParam(name.into())),
        }
    }

    /// Points `dest_addr` at an N-1 flow previously bound with
    /// [`NormalIpcp::lower_flow_bind`].
    pub fn pduft_set(&self, dest_addr: u64, flow: &Arc<Flow>) {
        self.pduft.write().unwrap().set(dest_addr, flow);
    }

    /// Removes the forwarding entry for `dest_addr`.
    pub fn pduft_del(&self, dest_addr: u64) -> Result<(), RmtError> {
        self.pduft.write().unwrap().del(dest_addr)
    }

    /// Registers an N-1 flow whose upper is this IPCP, making it available
    /// to the PDUFT and to management writes by local port.
    pub fn lower_flow_bind(&self, flow: &Arc<Flow>) {
        self.lower_flows
            .write()
            .unwrap()
            .insert(flow.local_port(), flow.clone());
    }

    /// Unregisters an N-1 flow, draining every PDUFT entry routed through
    /// it.
    pub fn lower_flow_unbind(&self, flow: &Arc<Flow>) {
        self.lower_flows.write().unwrap().remove(&flow.local_port());
        let drained = self.pduft.write().unwrap().drain(flow);
        if drained > 0 {
            info!(
                "lower flow {}: drained {drained} forwarding entries",
                flow.local_port()
            );
        }
    }

    /// Tears down a flow provided by this IPCP: unregisters it, drains any
    /// forwarding entries and disarms its timers.
    pub fn flow_teardown(&self, flow: &Arc<Flow>) {
        self.flows.write().unwrap().remove(&flow.local_port());
        self.pduft.write().unwrap().drain(flow);
        flow.cancel_timers();
    }

    /// Router: resolves `remote_addr` to a lower flow and pushes the PDU
    /// down, with backpressure handling. A missing route drops the PDU and
    /// reports success; the self address without a route loops the PDU
    /// back into this IPCP.
    pub fn rmt_tx(
        &self,
        remote_addr: u64,
        buf: Buffer,
        maysleep: bool,
    ) -> Result<(), SduWriteError> {
        let lower = match self.route(remote_addr) {
            Ok(lower) => lower,
            Err(err) => {
                if remote_addr == self.addr() {
                    // Self flow: loop the PDU back into this IPCP.
                    return self.sdu_rx(buf);
                }
                info!("{err}, dropping PDU");
                return Ok(());
            }
        };

        let Some(lower_ipcp) = lower.provider() else {
            warn!("lower flow {} has no IPCP, dropping PDU", lower.local_port());
            return Ok(());
        };

        let mut buf = buf;
        loop {
            // Sample the wake-up count before writing so a wake-up landing
            // between the failure and the wait is not lost.
            let seen = lower.tx_event_count();
            match lower_ipcp.sdu_write(&lower, buf, maysleep) {
                Err(SduWriteError::BackPressure(returned)) => {
                    if !maysleep {
                        lower.rmtq_push(returned);
                        return Ok(());
                    }
                    buf = returned;
                    lower.tx_wait_for_change(seen);
                }
                other => return other,
            }
        }
    }

    /// Stamps a management PDU and pushes it through the addressed lower
    /// flow. Management PDUs carry no connection or sequencing state.
    pub fn mgmt_sdu_write(&self, mhdr: &MgmtHdr, mut buf: Buffer) -> Result<(), SduWriteError> {
        let (lower, dst_addr) = match *mhdr {
            MgmtHdr::OutDstAddr(remote_addr) => match self.route(remote_addr) {
                Ok(lower) => (lower, remote_addr),
                Err(err) => {
                    info!("{err}, dropping management PDU");
                    return Ok(());
                }
            },
            MgmtHdr::OutLocalPort(port) => {
                match self.lower_flows.read().unwrap().get(&port).cloned() {
                    Some(lower) => (lower, 0),
                    None => {
                        info!(
                            "{}, dropping management PDU",
                            RmtError::InvalidPort(port)
                        );
                        return Ok(());
                    }
                }
            }
        };

        let Some(lower_ipcp) = lower.provider() else {
            warn!("lower flow {} has no IPCP, dropping PDU", lower.local_port());
            return Ok(());
        };

        buf.push_pci();
        Pci {
            dst_addr,
            src_addr: self.addr(),
            conn_id: ConnId::default(),
            pdu_type: PDU_T_MGMT,
            pdu_flags: 0,
            seqnum: 0,
        }
        .write(buf.data_mut());

        lower_ipcp.sdu_write(&lower, buf, true)
    }

    /// Wakes writers blocked on `port` and re-submits any PDUs parked in
    /// its RMT queue.
    pub fn write_restart(&self, port: u32) {
        let flow = self
            .flows
            .read()
            .unwrap()
            .get(&port)
            .cloned()
            .or_else(|| self.lower_flows.read().unwrap().get(&port).cloned());
        let Some(flow) = flow else {
            return;
        };
        for buf in flow.rmtq_drain() {
            match Pci::read(buf.data()) {
                Ok(pci) => {
                    let _ = self.rmt_tx(pci.dst_addr, buf, false);
                }
                Err(err) => warn!("rmtq: undecodable PDU ({err}), dropping"),
            }
        }
        flow.tx_wakeup();
    }

    fn route(&self, remote_addr: u64) -> Result<Arc<Flow>, RmtError> {
        self.pduft
            .read()
            .unwrap()
            .lookup(remote_addr)
            .ok_or(RmtError::NoRoute(remote_addr))
    }

    /// Builds a control PDU from the current state vector, consuming one
    /// control sequence number. Must run under the DTP lock.
    fn ctrl_pdu_build(
        &self,
        flow: &Flow,
        dtp: &mut Dtp,
        pdu_type: u8,
        ack_nack_seq_num: u64,
    ) -> Buffer {
        let mut buf = Buffer::alloc(PCI_CTRL_LEN);
        let pcic = PciCtrl {
            base: Pci {
                dst_addr: flow.remote_addr(),
                src_addr: self.addr(),
                conn_id: ConnId {
                    qos_id: 0,
                    dst_cep: flow.remote_port(),
                    src_cep: flow.local_port(),
                },
                pdu_type,
                pdu_flags: 0,
                seqnum: dtp.next_snd_ctl_seq,
            },
            last_ctrl_seq_num_rcvd: dtp.last_ctrl_seq_num_rcvd,
            ack_nack_seq_num,
            new_rwe: dtp.rcv_rwe,
            new_lwe: dtp.rcv_lwe,
            my_rwe: dtp.snd_rwe,
            my_lwe: dtp.snd_lwe,
        };
        dtp.next_snd_ctl_seq += 1;
        pcic.write(buf.data_mut());
        buf
    }

    /// State-vector update after `rcv_lwe` moved: refreshes the advertised
    /// receiver window and, depending on the DTCP configuration, produces
    /// the control PDU to send back. Must run under the DTP lock.
    fn sv_update(&self, flow: &Flow, dtp: &mut Dtp) -> Option<Buffer> {
        let cfg = flow.config();
        if cfg.flow_control() {
            if let Some(w) = cfg.window_fc() {
                let new_rwe = dtp.rcv_lwe + w.initial_credit;
                debug!("sv_update: rcv_rwe [{}] -> [{new_rwe}]", dtp.rcv_rwe);
                // Fixed-credit policy; a buffer-aware policy would look at
                // the receiver memory available instead.
                dtp.rcv_rwe = new_rwe;
            }
        }

        let mut pdu_type = 0u8;
        if cfg.rtx_control() {
            pdu_type = PDU_T_CTRL_MASK | PDU_T_ACK_BIT | PDU_T_ACK;
            if cfg.flow_control() {
                pdu_type |= PDU_T_FC_BIT;
            }
        } else if cfg.flow_control() {
            pdu_type = PDU_T_CTRL_MASK | PDU_T_FC_BIT;
        }

        (pdu_type != 0).then(|| self.ctrl_pdu_build(flow, dtp, pdu_type, 0))
    }

    /// Emits a control PDU produced under the lock, after the lock has
    /// been released.
    fn send_ctrl(&self, flow: &Flow, crb: Option<Buffer>) {
        if let Some(crb) = crb {
            if let Err(err) = self.rmt_tx(flow.remote_addr(), crb, false) {
                warn!("failed to emit control PDU: {err}");
            }
        }
    }

    /// DTCP control handler: window updates drain the closed-window queue,
    /// cumulative ACKs trim the retransmission queue.
    fn sdu_rx_ctrl(&self, flow: &Arc<Flow>, buf: Buffer) -> Result<(), SduWriteError> {
        let pcic = match PciCtrl::read(buf.data()) {
            Ok(pcic) => pcic,
            Err(err) => {
                warn!("sdu_rx_ctrl: {err}, dropping PDU");
                return Ok(());
            }
        };
        if pcic.base.pdu_type & PDU_T_CTRL_MASK != PDU_T_CTRL_MASK {
            error!("unknown PDU type {:#04x}, dropping", pcic.base.pdu_type);
            return Ok(());
        }
        drop(buf);

        let mut qrbs = Vec::new();
        {
            let mut dtp = flow.dtp.lock().unwrap();
            let seq = pcic.base.seqnum;

            if seq > dtp.last_ctrl_seq_num_rcvd + 1 {
                // Gap in the control sequence space; nothing to recover.
                debug!(
                    "lost control PDUs: [{}] -> [{seq}]",
                    dtp.last_ctrl_seq_num_rcvd
                );
            } else if dtp.last_ctrl_seq_num_rcvd > 0 && seq <= dtp.last_ctrl_seq_num_rcvd {
                debug!(
                    "duplicated control PDU [{seq}], last [{}]",
                    dtp.last_ctrl_seq_num_rcvd
                );
                drop(dtp);
                self.write_restart(pcic.base.conn_id.dst_cep);
                return Ok(());
            }
            dtp.last_ctrl_seq_num_rcvd = seq;

            if pcic.base.pdu_type & PDU_T_FC_BIT != 0 {
                if pcic.new_rwe < dtp.snd_rwe {
                    warn!(
                        "broken peer: new_rwe would go backward [{}] -> [{}]",
                        dtp.snd_rwe, pcic.new_rwe
                    );
                } else {
                    debug!("snd_rwe [{}] -> [{}]", dtp.snd_rwe, pcic.new_rwe);
                    dtp.snd_rwe = pcic.new_rwe;
                    qrbs = dtp.cwq_drain();
                }
            }

            if pcic.base.pdu_type & PDU_T_ACK_BIT != 0 {
                match pcic.base.pdu_type & PDU_T_ACK_MASK {
                    PDU_T_ACK => {
                        dtp.rtxq_ack(pcic.ack_nack_seq_num);
                    }
                    _ => {
                        warn!(
                            "missing support for PDU type [{:#04x}]",
                            pcic.base.pdu_type
                        );
                    }
                }
            }
        }

        // Send PDUs popped out from the closed-window queue, if any.
        for qrb in qrbs {
            match Pci::read(qrb.data()) {
                Ok(pci) => {
                    debug!("sending [{}] from cwq", pci.seqnum);
                    let _ = self.rmt_tx(pci.dst_addr, qrb, false);
                }
                Err(err) => warn!("cwq: undecodable PDU ({err}), dropping"),
            }
        }

        self.write_restart(pcic.base.conn_id.dst_cep);
        Ok(())
    }
}

impl IpcpOps for NormalIpcp {
    fn sdu_write(
        &self,
        flow: &Arc<Flow>,
        buf: Buffer,
        maysleep: bool,
    ) -> Result<(), SduWriteError> {
        let cfg = flow.config();
        let dtcp_present = cfg.dtcp_present();
        let window = cfg.window_fc();

        let mut dtp = flow.dtp.lock().unwrap();

        if dtcp_present {
            // Stop the sender inactivity timer if armed or running, without
            // waiting for the callback to finish.
            if let Some(tmr) = flow.snd_inact_tmr.get() {
                tmr.try_cancel();
            }
        }

        if window.is_some()
            && dtp.next_seq_num_to_send > dtp.snd_rwe
            && dtp.cwq.len() >= dtp.max_cwq_len
        {
            drop(dtp);
            // Backpressure: hand the PDU back, the caller will retry.
            return Err(SduWriteError::BackPressure(buf));
        }

        let mut pdu = Some(buf);
        pdu.as_mut().unwrap().push_pci();

        let seqnum = dtp.next_seq_num_to_send;
        dtp.next_seq_num_to_send += 1;
        Pci {
            dst_addr: flow.remote_addr(),
            src_addr: self.addr(),
            conn_id: ConnId {
                qos_id: 0,
                dst_cep: flow.remote_port(),
                src_cep: flow.local_port(),
            },
            pdu_type: PDU_T_DT,
            pdu_flags: if dtp.set_drf { PDU_FLAG_DRF } else { 0 },
            seqnum,
        }
        .write(pdu.as_mut().unwrap().data_mut());
        dtp.set_drf = false;

        if !dtcp_present {
            dtp.snd_lwe = dtp.next_seq_num_to_send;
            dtp.last_seq_num_sent = seqnum;
        } else {
            let in_window = match window {
                Some(_) => seqnum < dtp.snd_rwe,
                None => true,
            };
            if !in_window {
                // Step 2 guarantees there is room in the cwq here.
                debug!("sdu_write: push [{seqnum}] into cwq");
                dtp.cwq.push_back(pdu.take().unwrap());
            } else {
                dtp.snd_lwe = dtp.next_seq_num_to_send;
                dtp.last_seq_num_sent = seqnum;
                debug!("sdu_write: sending [{seqnum}] through sender window");

                if cfg.rtx_control() {
                    match pdu.as_ref().unwrap().try_clone() {
                        Ok(clone) => dtp.rtxq_push(seqnum, clone),
                        Err(_) => {
                            drop(dtp);
                            error!("sdu_write: out of memory cloning [{seqnum}]");
                            drop(pdu);
                            return Err(SduWriteError::OutOfMemory);
                        }
                    }
                }
            }

            if let Some(tmr) = flow.snd_inact_tmr.get() {
                tmr.schedule(SND_INACT_TIMEOUT);
            }
        }

        drop(dtp);

        match pdu {
            Some(buf) => self.rmt_tx(flow.remote_addr(), buf, maysleep),
            None => Ok(()),
        }
    }

    fn sdu_rx(&self, mut buf: Buffer) -> Result<(), SduWriteError> {
        let pci = match Pci::read(buf.data()) {
            Ok(pci) => pci,
            Err(err) => {
                warn!("sdu_rx: {err}, dropping PDU");
                return Ok(());
            }
        };

        if pci.dst_addr != self.addr() {
            // Not for this IPCP: transit forwarding.
            return self.rmt_tx(pci.dst_addr, buf, false);
        }

        let flow = self
            .flows
            .read()
            .unwrap()
            .get(&pci.conn_id.dst_cep)
            .cloned();
        let Some(flow) = flow else {
            info!(
                "no flow for port-id {}: dropping PDU",
                pci.conn_id.dst_cep
            );
            return Ok(());
        };

        if pci.pdu_type != PDU_T_DT {
            return self.sdu_rx_ctrl(&flow, buf);
        }

        let cfg = flow.config();
        let seqnum = pci.seqnum;
        let crb;

        let mut dtp = flow.dtp.lock().unwrap();

        if cfg.dtcp_present() {
            if let Some(tmr) = flow.rcv_inact_tmr.get() {
                tmr.try_cancel();
                tmr.schedule(RCV_INACT_TIMEOUT);
            }
        }

        buf.pop_pci();

        if pci.has_drf() {
            // First PDU of a run: previous receiver state is obsolete.
            dtp.seqq_flush();
            dtp.rcv_lwe = seqnum + 1;
            dtp.max_seq_num_rcvd = seqnum;
            crb = self.sv_update(&flow, &mut dtp);
            drop(dtp);
            let ret = flow.deliver_up(buf);
            self.send_ctrl(&flow, crb);
            return ret;
        }

        if seqnum < dtp.rcv_lwe {
            debug!("dropping duplicate PDU [{seqnum}]");
            drop(buf);
            let mut crb = None;
            if cfg.flow_control() && dtp.rcv_lwe >= dtp.last_snd_data_ack {
                let ack_seq = dtp.rcv_lwe;
                crb = Some(self.ctrl_pdu_build(
                    &flow,
                    &mut dtp,
                    PDU_T_CTRL_MASK | PDU_T_ACK_BIT | PDU_T_ACK | PDU_T_FC_BIT,
                    ack_seq,
                ));
                dtp.last_snd_data_ack = ack_seq;
            }
            drop(dtp);
            self.send_ctrl(&flow, crb);
            return Ok(());
        }

        if dtp.rcv_lwe < seqnum && dtp.max_seq_num_rcvd != SEQ_NONE && seqnum <= dtp.max_seq_num_rcvd
        {
            debug!(
                "possible gap fill, rcv_lwe jumps {} -> {}",
                dtp.rcv_lwe,
                seqnum + 1
            );
        } else if seqnum == dtp.max_seq_num_rcvd.wrapping_add(1) {
            // In-order PDU.
        } else {
            debug!(
                "out of order PDU, rcv_lwe would jump {} -> {}",
                dtp.rcv_lwe,
                seqnum + 1
            );
        }

        if dtp.max_seq_num_rcvd == SEQ_NONE || seqnum > dtp.max_seq_num_rcvd {
            dtp.max_seq_num_rcvd = seqnum;
        }

        // A PDU past the next expected sequence number is never dropped
        // when the flow is completely unreliable, when retransmissions may
        // fill the gap, or when a non-zero A timeout gives out-of-order
        // arrivals time to fill it.
        let drop_pdu = (cfg.in_order_delivery || cfg.dtcp_present())
            && A_TIMEOUT.is_zero()
            && !cfg.rtx_control()
            && seqnum.wrapping_sub(dtp.rcv_lwe) > cfg.max_sdu_gap;

        let deliver = dtp.deliverable(cfg, seqnum) && !drop_pdu;

        if deliver {
            dtp.rcv_lwe = seqnum + 1;
            let qrbs = dtp.seqq_pop_deliverable(cfg);
            crb = self.sv_update(&flow, &mut dtp);
            drop(dtp);

            let mut ret = flow.deliver_up(buf);
            for qrb in qrbs {
                ret = ret.and(flow.deliver_up(qrb));
            }
            self.send_ctrl(&flow, crb);
            return ret;
        }

        if drop_pdu {
            debug!("dropping PDU [{seqnum}] to meet QoS requirements");
            drop(buf);
        } else {
            dtp.seqq_push(seqnum, buf);
        }

        crb = self.sv_update(&flow, &mut dtp);
        drop(dtp);
        self.send_ctrl(&flow, crb);
        Ok(())
    }

    fn flow_init(&self, flow: &Arc<Flow>) {
        let weak = Arc::downgrade(flow);
        let snd = self.timers.timer(move || {
            if let Some(flow) = weak.upgrade() {
                let mut dtp = flow.dtp.lock().unwrap();
                debug!(
                    "flow {}: sender inactivity, starting a new run",
                    flow.local_port()
                );
                dtp.start_new_run();
                // Discarding rtxq/cwq, the zero-length DT and the user
                // notification are staged policies.
            }
        });
        let weak = Arc::downgrade(flow);
        let rcv = self.timers.timer(move || {
            if let Some(flow) = weak.upgrade() {
                let _dtp = flow.dtp.lock().unwrap();
                debug!("flow {}: receiver inactivity", flow.local_port());
            }
        });
        let _ = flow.snd_inact_tmr.set(snd);
        let _ = flow.rcv_inact_tmr.set(rcv);

        self.flows
            .write()
            .unwrap()
            .insert(flow.local_port(), flow.clone());
    }
}
