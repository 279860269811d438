// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use gtreset_core::{EngineId, HwResetError};
use serde::Serialize;
use thiserror::Error;

/// Failure reported by one of the [`crate::DeviceHooks`].
#[derive(Clone, Error, Debug, PartialEq, Eq)]
#[error("{hook} failed: {message}")]
pub struct HookError {
    pub hook: &'static str,
    pub message: String,
}

impl HookError {
    pub fn new(hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            hook,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResetError {
    #[error("Hardware reset failed: {0}")]
    Hardware(#[from] HwResetError),

    #[error("Reset of {engine} is already in progress")]
    Busy { engine: EngineId },

    #[error("Recovery is disabled for this device")]
    RecoveryDisabled,

    #[error("Timed out waiting for outstanding requests before unwedging")]
    UnwedgeTimeout,

    #[error("Device is wedged")]
    Wedged,
}

#[derive(Clone, Copy, Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Device is lost, no further work can be submitted until it is unwedged")]
    DeviceLost,

    #[error("Context has been banned")]
    ContextBanned,

    #[error("Client has been banned")]
    ClientBanned,

    #[error("Engine {0} is not present on this device")]
    UnknownEngine(EngineId),
}

/// Error carried by a request's fence once it signals.
#[derive(Clone, Copy, Error, Debug, PartialEq, Eq, Serialize)]
pub enum FenceError {
    /// The request was cancelled or skipped and never ran to completion.
    #[error("request was cancelled (EIO)")]
    Io,

    /// The request was caught up in somebody else's hang and was replayed.
    #[error("request was interrupted by a reset (EAGAIN)")]
    Again,

    #[error("timed out waiting for the fence")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse yaml config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse json config: {0}")]
    Json(#[from] serde_json::Error),
}
