// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present NORI Contributors

//! Error types for the normal-IPCP data path.
//!
//! Only [`SduWriteError::BackPressure`] is retryable; every other error is
//! terminal for the PDU in flight. Routing misses and peer window
//! regressions are not surfaced at all: the PDU is dropped (or honoured in
//! the safe direction) and the event is logged.

use crate::buffer::Buffer;
use thiserror::Error;

/// Top-level error type aggregating all component errors.
#[derive(Error, Debug)]
pub enum NoriError {
    #[error("data transfer error: {0}")]
    Sdu(#[from] SduWriteError),

    #[error("relaying error: {0}")]
    Rmt(#[from] RmtError),

    #[error("wire codec error: {0}")]
    Serdes(#[from] SerdesError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors surfaced by `sdu_write` (and by the router pushing into a lower
/// IPCP).
#[derive(Error, Debug)]
pub enum SduWriteError {
    /// The sender window and the closed-window queue are both full. The
    /// buffer is handed back untouched; the caller re-submits once the
    /// window reopens.
    #[error("sender window closed, retry later")]
    BackPressure(Buffer),

    /// Cloning the PDU for the retransmission queue failed. The original
    /// buffer has been freed; the PDU is lost.
    #[error("out of memory while queueing for retransmission")]
    OutOfMemory,
}

/// Relaying/forwarding errors. These never escape the router: a missing
/// route drops the PDU and counts as success for the caller.
#[derive(Error, Debug, Clone)]
pub enum RmtError {
    #[error("no route to address {0}")]
    NoRoute(u64),

    #[error("invalid lower port {0}")]
    InvalidPort(u32),
}

/// Wire (de)serialisation errors for PCI headers and control messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerdesError {
    #[error("message truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("malformed message: {extra} trailing bytes")]
    TrailingBytes { extra: usize },

    #[error("unknown message type {0}")]
    UnknownMsgType(u16),

    #[error("name component is not valid UTF-8")]
    BadString,
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown configuration parameter: {0}")]
    UnknownParam(String),

    #[error("invalid value {value:?} for parameter {param}")]
    InvalidValue { param: String, value: String },

    #[error("failed to read profile file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse profile file: {0}")]
    Toml(#[from] toml::de::Error),
}
