// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Hang recovery for GPU engines.
//!
//! A [`Device`] owns the engines of one GPU and recovers them when work stops
//! making progress. Recovery escalates from resetting a single engine to
//! resetting the whole device, and finally to declaring the device wedged,
//! at which point every outstanding request fails with an I/O error instead
//! of hanging forever. The request that was executing when an engine hung is
//! blamed, and contexts and clients that hang too often are banned.
//!
//! The register level reset sequences live in [`gtreset_hw`]; everything the
//! rest of a driver owns (display, address mapping, workarounds) is reached
//! through [`DeviceHooks`].

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod config;
pub mod controller;
mod coordinator;
pub mod device;
pub mod engine;
pub mod error;
mod flags;
pub mod forcewake;
pub mod guilt;
pub mod hooks;
pub mod notify;
pub mod request;
pub mod watchdog;
mod wedge;

pub use gtreset_core;
pub use gtreset_hw;

pub use config::{BanPolicy, ResetPolicy};
pub use controller::{EngineController, PreparedEngine};
pub use coordinator::{ResetOutcome, ResetReport};
pub use device::{Device, EngineStats, ResetStats};
pub use engine::{Engine, SubmitMode};
pub use error::{ConfigError, FenceError, HookError, ResetError, SubmitError};
pub use forcewake::{Forcewake, ForcewakeGuard};
pub use guilt::GuiltScorer;
pub use hooks::{DeviceHooks, NoHooks};
pub use notify::{ChannelObserver, NotificationBus, ResetEvent, ResetObserver};
pub use request::{Client, Context, Request, RequestState};
pub use watchdog::WedgeWatchdog;

/// Locks `mutex`, ignoring poisoning.
///
/// Every critical section here leaves its data consistent before doing
/// anything that can panic, and recovery must keep working after a panicking
/// caller.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
