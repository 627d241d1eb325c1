// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present NORI Contributors

//! Protocol Control Information (PCI) codec.
//!
//! Reads and writes the PCI header in place at the front of a buffer. All
//! fields are little-endian at fixed offsets with natural alignment (two
//! padding bytes keep `seqnum` 8-byte aligned). A control PCI extends the
//! data PCI with the window state-vector fields.

use crate::error::SerdesError;
use byteorder::{ByteOrder, LittleEndian};

/// Data transfer PDU.
pub const PDU_T_DT: u8 = 0x80;
/// Management PDU (layer management, not part of any connection).
pub const PDU_T_MGMT: u8 = 0x40;
/// Both top bits set mark a control PDU; the low bits select the kind.
pub const PDU_T_CTRL_MASK: u8 = 0xC0;
/// Control PDU carries an acknowledgement field.
pub const PDU_T_ACK_BIT: u8 = 0x08;
/// Control PDU carries a flow-control window update.
pub const PDU_T_FC_BIT: u8 = 0x04;
/// Mask selecting the acknowledgement sub-type.
pub const PDU_T_ACK_MASK: u8 = 0x03;
/// Positive cumulative acknowledgement.
pub const PDU_T_ACK: u8 = 0x00;
/// Negative acknowledgement (unsupported, accepted and ignored).
pub const PDU_T_NACK: u8 = 0x01;
/// Selective acknowledgement (unsupported, accepted and ignored).
pub const PDU_T_SACK: u8 = 0x02;
/// Selective negative acknowledgement (unsupported, accepted and ignored).
pub const PDU_T_SNACK: u8 = 0x03;

/// Data-Run Flag: first PDU of a run, previous state is obsolete.
pub const PDU_FLAG_DRF: u8 = 0x01;

/// Wire length of a data PCI.
pub const PCI_LEN: usize = 40;
/// Wire length of a control PCI.
pub const PCI_CTRL_LEN: usize = PCI_LEN + 48;

/// Connection identifier carried in every PCI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnId {
    pub qos_id: u32,
    pub dst_cep: u32,
    pub src_cep: u32,
}

/// Data PCI header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pci {
    pub dst_addr: u64,
    pub src_addr: u64,
    pub conn_id: ConnId,
    pub pdu_type: u8,
    pub pdu_flags: u8,
    pub seqnum: u64,
}

impl Pci {
    /// Decodes a data PCI from the front of `buf`.
    pub fn read(buf: &[u8]) -> Result<Self, SerdesError> {
        if buf.len() < PCI_LEN {
            return Err(SerdesError::Truncated {
                need: PCI_LEN,
                have: buf.len(),
            });
        }
        Ok(Self {
            dst_addr: LittleEndian::read_u64(&buf[0..8]),
            src_addr: LittleEndian::read_u64(&buf[8..16]),
            conn_id: ConnId {
                qos_id: LittleEndian::read_u32(&buf[16..20]),
                dst_cep: LittleEndian::read_u32(&buf[20..24]),
                src_cep: LittleEndian::read_u32(&buf[24..28]),
            },
            pdu_type: buf[28],
            pdu_flags: buf[29],
            seqnum: LittleEndian::read_u64(&buf[32..40]),
        })
    }

    /// Encodes this PCI at the front of `buf`. The caller guarantees room,
    /// either via `Buffer::push_pci` or a control-sized allocation.
    pub fn write(&self, buf: &mut [u8]) {
        assert!(buf.len() >= PCI_LEN, "no room for PCI");
        LittleEndian::write_u64(&mut buf[0..8], self.dst_addr);
        LittleEndian::write_u64(&mut buf[8..16], self.src_addr);
        LittleEndian::write_u32(&mut buf[16..20], self.conn_id.qos_id);
        LittleEndian::write_u32(&mut buf[20..24], self.conn_id.dst_cep);
        LittleEndian::write_u32(&mut buf[24..28], self.conn_id.src_cep);
        buf[28] = self.pdu_type;
        buf[29] = self.pdu_flags;
        buf[30] = 0;
        buf[31] = 0;
        LittleEndian::write_u64(&mut buf[32..40], self.seqnum);
    }

    /// True if this header marks a control PDU.
    pub fn is_ctrl(&self) -> bool {
        self.pdu_type & PDU_T_CTRL_MASK == PDU_T_CTRL_MASK
    }

    /// True if the Data-Run Flag is set.
    pub fn has_drf(&self) -> bool {
        self.pdu_flags & PDU_FLAG_DRF != 0
    }
}

/// Control PCI header: the data PCI plus the sender/receiver window
/// state vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PciCtrl {
    pub base: Pci,
    pub last_ctrl_seq_num_rcvd: u64,
    pub ack_nack_seq_num: u64,
    pub new_rwe: u64,
    pub new_lwe: u64,
    pub my_rwe: u64,
    pub my_lwe: u64,
}

impl PciCtrl {
    /// Decodes a control PCI from the front of `buf`.
    pub fn read(buf: &[u8]) -> Result<Self, SerdesError> {
        if buf.len() < PCI_CTRL_LEN {
            return Err(SerdesError::Truncated {
                need: PCI_CTRL_LEN,
                have: buf.len(),
            });
        }
        Ok(Self {
            base: Pci::read(buf)?,
            last_ctrl_seq_num_rcvd: LittleEndian::read_u64(&buf[40..48]),
            ack_nack_seq_num: LittleEndian::read_u64(&buf[48..56]),
            new_rwe: LittleEndian::read_u64(&buf[56..64]),
            new_lwe: LittleEndian::read_u64(&buf[64..72]),
            my_rwe: LittleEndian::read_u64(&buf[72..80]),
            my_lwe: LittleEndian::read_u64(&buf[80..88]),
        })
    }

    /// Encodes this control PCI at the front of `buf`.
    pub fn write(&self, buf: &mut [u8]) {
        assert!(buf.len() >= PCI_CTRL_LEN, "no room for control PCI");
        self.base.write(buf);
        LittleEndian::write_u64(&mut buf[40..48], self.last_ctrl_seq_num_rcvd);
        LittleEndian::write_u64(&mut buf[48..56], self.ack_nack_seq_num);
        LittleEndian::write_u64(&mut buf[56..64], self.new_rwe);
        LittleEndian::write_u64(&mut buf[64..72], self.new_lwe);
        LittleEndian::write_u64(&mut buf[72..80], self.my_rwe);
        LittleEndian::write_u64(&mut buf[80..88], self.my_lwe);
    }
}
