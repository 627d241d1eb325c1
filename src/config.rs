// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present NORI Contributors

//! Flow configuration.
//!
//! Everything here is fixed at flow creation and read-only afterwards. The
//! control plane hands configurations over as named TOML profiles; the
//! defaults give a plain unreliable flow with no DTCP machinery.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Per-flow configuration, immutable after flow creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Deliver SDUs upward strictly in sequence-number order.
    #[serde(default)]
    pub in_order_delivery: bool,
    /// Largest `seqnum - rcv_lwe` still deliverable; `u64::MAX` means any
    /// gap is acceptable.
    #[serde(default = "default_max_sdu_gap")]
    pub max_sdu_gap: u64,
    /// DTCP overlay; absent means pure DTP.
    #[serde(default)]
    pub dtcp: Option<DtcpConfig>,
}

fn default_max_sdu_gap() -> u64 {
    u64::MAX
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            in_order_delivery: false,
            max_sdu_gap: default_max_sdu_gap(),
            dtcp: None,
        }
    }
}

impl FlowConfig {
    /// True if the DTCP overlay is enabled.
    pub fn dtcp_present(&self) -> bool {
        self.dtcp.is_some()
    }

    /// True if DTCP flow control is enabled.
    pub fn flow_control(&self) -> bool {
        self.dtcp.as_ref().is_some_and(|d| d.flow_control)
    }

    /// True if DTCP retransmission control is enabled.
    pub fn rtx_control(&self) -> bool {
        self.dtcp.as_ref().is_some_and(|d| d.rtx_control)
    }

    /// The window flow-control parameters, if window FC is configured.
    pub fn window_fc(&self) -> Option<&WindowFcConfig> {
        match self.dtcp.as_ref()?.fc {
            FcConfig::None => None,
            FcConfig::Window(ref w) => Some(w),
        }
    }
}

/// DTCP sub-configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DtcpConfig {
    #[serde(default)]
    pub flow_control: bool,
    #[serde(default)]
    pub rtx_control: bool,
    #[serde(default)]
    pub fc: FcConfig,
}

/// Flow-control policy selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FcConfig {
    /// No flow control.
    #[default]
    None,
    /// Credit-based sliding window.
    Window(WindowFcConfig),
}

/// Window flow-control parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowFcConfig {
    /// Bound on the closed-window queue.
    #[serde(default = "default_max_cwq_len")]
    pub max_cwq_len: usize,
    /// Credit granted to both window edges at flow initialisation.
    #[serde(default = "default_initial_credit")]
    pub initial_credit: u64,
}

fn default_max_cwq_len() -> usize {
    64
}

fn default_initial_credit() -> u64 {
    64
}

impl Default for WindowFcConfig {
    fn default() -> Self {
        Self {
            max_cwq_len: default_max_cwq_len(),
            initial_credit: default_initial_credit(),
        }
    }
}

/// Named flow-configuration profiles, loadable from a TOML file:
///
/// ```toml
/// [profile.reliable]
/// in_order_delivery = true
/// max_sdu_gap = 0
///
/// [profile.reliable.dtcp]
/// flow_control = true
/// rtx_control = true
/// fc = { type = "window", max_cwq_len = 16, initial_credit = 8 }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowProfiles {
    #[serde(default)]
    pub profile: HashMap<String, FlowConfig>,
}

impl FlowProfiles {
    /// Parses profiles from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Loads profiles from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Looks up a profile by name.
    pub fn get(&self, name: &str) -> Option<&FlowConfig> {
        self.profile.get(name)
    }
}
