// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Tunables for recovery.
//!
//! Retry counts and timeouts are hardware tuned and therefore configuration
//! rather than constants. Every field has a default, so a config file only
//! needs to name what it changes.

use std::path::Path;
use std::time::Duration;

use gtreset_core::EngineMask;
use gtreset_hw::OpConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Scoring applied when a hang is attributed to a context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanPolicy {
    pub guilty_penalty: u32,
    pub ban_threshold: u32,
    pub client_fast_hang_window_ms: u64,
    pub client_fast_hang_penalty: u32,
    pub client_context_ban_penalty: u32,
    pub client_ban_threshold: u32,
}

impl Default for BanPolicy {
    fn default() -> Self {
        Self {
            guilty_penalty: 10,
            ban_threshold: 40,
            client_fast_hang_window_ms: 60_000,
            client_fast_hang_penalty: 1,
            client_context_ban_penalty: 3,
            client_ban_threshold: 9,
        }
    }
}

impl BanPolicy {
    pub fn client_fast_hang_window(&self) -> Duration {
        Duration::from_millis(self.client_fast_hang_window_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetPolicy {
    /// 0: no resets, 1: whole device only, 2: engine resets as well.
    pub reset_level: u8,
    pub full_reset_attempts: u32,
    pub retry_delay_ms: u64,
    pub ack_timeout_us: u64,
    pub ready_timeout_us: u64,
    pub stop_timeout_us: u64,
    pub watchdog_timeout_ms: u64,
    pub unwedge_timeout_ms: u64,
    /// When the device has no programmatic reset, how long to wait for the
    /// hang to clear on its own before wedging. Unset disables the fallback.
    pub hang_clear_timeout_ms: Option<u64>,
    pub ban: BanPolicy,
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self {
            reset_level: 2,
            full_reset_attempts: 3,
            retry_delay_ms: 100,
            ack_timeout_us: 500_000,
            ready_timeout_us: 700_000,
            stop_timeout_us: 1_000,
            watchdog_timeout_ms: 5_000,
            unwedge_timeout_ms: 10_000,
            hang_clear_timeout_ms: None,
            ban: BanPolicy::default(),
        }
    }
}

impl ResetPolicy {
    /// Loads a policy from disk; `.json` files are read as json, everything
    /// else as yaml.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json(&contents)
        } else {
            Self::from_yaml(&contents)
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_micros(self.stop_timeout_us)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn unwedge_timeout(&self) -> Duration {
        Duration::from_millis(self.unwedge_timeout_ms)
    }

    pub fn hang_clear_timeout(&self) -> Option<Duration> {
        self.hang_clear_timeout_ms.map(Duration::from_millis)
    }

    pub fn op_config(&self, engines: EngineMask) -> OpConfig {
        OpConfig {
            engines,
            ack_timeout: Duration::from_micros(self.ack_timeout_us),
            ready_timeout: Duration::from_micros(self.ready_timeout_us),
        }
    }
}
