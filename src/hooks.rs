// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use gtreset_core::EngineMask;

use crate::error::HookError;

/// Collaborators owned by the rest of the driver.
///
/// Every method defaults to doing nothing, so an implementation only needs to
/// override the steps it actually owns.
pub trait DeviceHooks: Send + Sync {
    /// Snapshot of the device state for later inspection.
    fn capture_error_state(&self, _engines: EngineMask, _reason: &str) {}

    fn clear_error_registers(&self) {}

    fn prepare_display(&self) {}

    fn finish_display(&self) {}

    /// Re-enables the global address mapping after a whole device reset.
    fn enable_address_mapping(&self) -> Result<(), HookError> {
        Ok(())
    }

    fn restore_overlay(&self) {}

    fn init_hw(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// Reapplies the device defaults (workarounds) lost by the reset.
    fn apply_workarounds(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once recovery has given up on the device.
    fn taint(&self) {}
}

/// Hooks for a device with nothing attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl DeviceHooks for NoHooks {}
