// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present NORI Contributors

//! Per-flow Data Transfer Protocol state.
//!
//! One [`Dtp`] exists per flow, guarded by the flow's DTP lock. It holds the
//! sender and receiver window edges, the closed-window queue (PDUs stamped
//! beyond the sender window), the retransmission queue (clones held until
//! acknowledged) and the resequencing queue (received but not yet
//! deliverable PDUs).

use crate::buffer::Buffer;
use crate::config::FlowConfig;
use log::debug;
use std::collections::{BTreeMap, VecDeque};

/// Sentinel for "no sequence number yet" (the kernel's `-1` on an unsigned
/// counter). Successor tests use `wrapping_add`.
pub const SEQ_NONE: u64 = u64::MAX;

/// A retransmission-queue element: a deep clone of a sent PDU tagged with
/// its stamped sequence number.
#[derive(Debug)]
pub(crate) struct RtxEntry {
    pub(crate) seqnum: u64,
    pub(crate) buf: Buffer,
}

/// DTP state vector for one flow.
#[derive(Debug, Default)]
pub(crate) struct Dtp {
    // Sender.
    pub(crate) set_drf: bool,
    pub(crate) next_seq_num_to_send: u64,
    pub(crate) snd_lwe: u64,
    pub(crate) snd_rwe: u64,
    pub(crate) last_seq_num_sent: u64,

    pub(crate) cwq: VecDeque<Buffer>,
    pub(crate) max_cwq_len: usize,

    pub(crate) rtxq: VecDeque<RtxEntry>,

    // Receiver.
    pub(crate) rcv_lwe: u64,
    pub(crate) rcv_rwe: u64,
    pub(crate) max_seq_num_rcvd: u64,
    pub(crate) last_snd_data_ack: u64,

    pub(crate) seqq: BTreeMap<u64, Buffer>,

    // Control.
    pub(crate) next_snd_ctl_seq: u64,
    pub(crate) last_ctrl_seq_num_rcvd: u64,
}

impl Dtp {
    /// Initial state for a freshly created flow.
    pub(crate) fn init(cfg: &FlowConfig) -> Self {
        let mut dtp = Self {
            set_drf: true,
            last_seq_num_sent: SEQ_NONE,
            max_seq_num_rcvd: SEQ_NONE,
            ..Self::default()
        };
        if let Some(w) = cfg.window_fc() {
            dtp.max_cwq_len = w.max_cwq_len;
            dtp.snd_rwe += w.initial_credit;
            dtp.rcv_rwe += w.initial_credit;
        }
        dtp
    }

    /// Sender-inactivity reset: the next PDU starts a new run from zero.
    pub(crate) fn start_new_run(&mut self) {
        self.set_drf = true;
        self.next_seq_num_to_send = 0;
    }

    /// True if `seqnum` can be delivered upward right now. With
    /// retransmission control only the next expected PDU is deliverable
    /// (gaps will be filled by retransmissions); otherwise any PDU within
    /// the configured SDU gap is.
    pub(crate) fn deliverable(&self, cfg: &FlowConfig, seqnum: u64) -> bool {
        if cfg.rtx_control() {
            seqnum == self.rcv_lwe
        } else {
            seqnum.wrapping_sub(self.rcv_lwe) <= cfg.max_sdu_gap
        }
    }

    /// Inserts a received PDU into the resequencing queue, keeping it
    /// sorted. A duplicate amongst the gaps is dropped.
    pub(crate) fn seqq_push(&mut self, seqnum: u64, buf: Buffer) {
        use std::collections::btree_map::Entry;
        match self.seqq.entry(seqnum) {
            Entry::Occupied(_) => {
                debug!("seqq: duplicate amongst the gaps [{seqnum}] dropped");
                drop(buf);
            }
            Entry::Vacant(slot) => {
                slot.insert(buf);
                debug!("seqq: [{seqnum}] inserted");
            }
        }
    }

    /// Pops every resequenced PDU that became deliverable, advancing
    /// `rcv_lwe` past each one. Returns them in sequence-number order.
    pub(crate) fn seqq_pop_deliverable(&mut self, cfg: &FlowConfig) -> Vec<Buffer> {
        let mut out = Vec::new();
        loop {
            let Some((&seqnum, _)) = self.seqq.first_key_value() else {
                break;
            };
            if !self.deliverable(cfg, seqnum) {
                break;
            }
            out.push(self.seqq.remove(&seqnum).unwrap());
            self.rcv_lwe = seqnum + 1;
            debug!("seqq: [{seqnum}] popped out");
        }
        out
    }

    /// Discards any pending resequencing state (new data run).
    pub(crate) fn seqq_flush(&mut self) {
        if !self.seqq.is_empty() {
            debug!("seqq: flushing {} pending PDUs", self.seqq.len());
            self.seqq.clear();
        }
    }

    /// Appends a retransmission clone. Stamping is monotonic, so appending
    /// keeps the queue sorted by sequence number.
    pub(crate) fn rtxq_push(&mut self, seqnum: u64, buf: Buffer) {
        debug_assert!(
            self.rtxq.back().is_none_or(|e| e.seqnum < seqnum),
            "rtxq must stay sorted"
        );
        self.rtxq.push_back(RtxEntry { seqnum, buf });
    }

    /// Drops every retransmission clone acknowledged by a cumulative ACK.
    pub(crate) fn rtxq_ack(&mut self, ack_seq: u64) -> usize {
        let mut removed = 0;
        while let Some(head) = self.rtxq.front() {
            if head.seqnum > ack_seq {
                break;
            }
            debug!("rtxq: remove [{}]", head.seqnum);
            self.rtxq.pop_front();
            removed += 1;
        }
        removed
    }

    /// Drains the closed-window queue while the sender window has room,
    /// advancing the window edge for every PDU handed back. The caller
    /// forwards the returned PDUs after releasing the DTP lock.
    pub(crate) fn cwq_drain(&mut self) -> Vec<Buffer> {
        let mut out = Vec::new();
        while !self.cwq.is_empty() && self.snd_lwe < self.snd_rwe {
            let buf = self.cwq.pop_front().unwrap();
            self.last_seq_num_sent = self.snd_lwe;
            self.snd_lwe += 1;
            out.push(buf);
        }
        out
    }

    /// Window/queue counters for diagnostics and tests.
    pub(crate) fn snapshot(&self) -> DtpSnapshot {
        DtpSnapshot {
            set_drf: self.set_drf,
            next_seq_num_to_send: self.next_seq_num_to_send,
            snd_lwe: self.snd_lwe,
            snd_rwe: self.snd_rwe,
            last_seq_num_sent: self.last_seq_num_sent,
            cwq_len: self.cwq.len(),
            rtxq_len: self.rtxq.len(),
            rcv_lwe: self.rcv_lwe,
            rcv_rwe: self.rcv_rwe,
            max_seq_num_rcvd: self.max_seq_num_rcvd,
            last_snd_data_ack: self.last_snd_data_ack,
            seqq_len: self.seqq.len(),
            next_snd_ctl_seq: self.next_snd_ctl_seq,
            last_ctrl_seq_num_rcvd: self.last_ctrl_seq_num_rcvd,
        }
    }
}

/// Read-only view of a flow's DTP counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtpSnapshot {
    pub set_drf: bool,
    pub next_seq_num_to_send: u64,
    pub snd_lwe: u64,
    pub snd_rwe: u64,
    /// `SEQ_NONE` until the first PDU leaves the sender.
    pub last_seq_num_sent: u64,
    pub cwq_len: usize,
    pub rtxq_len: usize,
    pub rcv_lwe: u64,
    pub rcv_rwe: u64,
    /// `SEQ_NONE` until the first PDU reaches the receiver.
    pub max_seq_num_rcvd: u64,
    pub last_snd_data_ack: u64,
    pub seqq_len: usize,
    pub next_snd_ctl_seq: u64,
    pub last_ctrl_seq_num_rcvd: u64,
}
