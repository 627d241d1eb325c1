// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present NORI Contributors

//! The data-transfer engine of a RINA normal IPC process.
//!
//! This crate implements the per-flow Data Transfer Protocol (DTP) and its
//! optional control overlay (DTCP), together with the PDU Forwarding Table
//! and the router that multiplexes PDUs onto lower (N-1) flows. The
//! surrounding IPCP framework (flow allocation, enrollment, the
//! control-plane RPC) lives outside and drives this engine through
//! [`NormalIpcp`] and the [`IpcpOps`] capability set.

// Public module declarations
pub mod buffer;
pub mod config;
pub mod dtp;
pub mod error;
pub mod flow;
pub mod ipcp;
pub mod names;
pub mod pci;
pub mod pduft;
pub mod timer;

// Re-export commonly used types
pub use buffer::{BUF_HEADROOM, Buffer};
pub use config::{DtcpConfig, FcConfig, FlowConfig, FlowProfiles, WindowFcConfig};
pub use dtp::{DtpSnapshot, SEQ_NONE};
pub use error::{ConfigError, NoriError, RmtError, SduWriteError, SerdesError};
pub use flow::{Flow, Upper};
pub use ipcp::{IpcpOps, MgmtHdr, NormalIpcp};
pub use names::{CtrlMsg, MsgLayout, MsgType, RinaName};
pub use pci::{ConnId, PCI_CTRL_LEN, PCI_LEN, Pci, PciCtrl};
pub use pduft::{Pduft, PduftEntry};
pub use timer::{Timer, TimerWheel, TryCancel};
