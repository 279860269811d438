// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use gtreset_core::{EngineMask, HwResetError};

use super::ResetOp;
use crate::regs::{GdrstCfg, GDRST};
use crate::{wait_for, Hardware, OpConfig, WaitMode};

/// Minimum time the reset request has to stay asserted.
const ASSERT_TIME: Duration = Duration::from_micros(50);

fn in_reset(hw: &dyn Hardware) -> bool {
    GdrstCfg::from(hw.config_read8(GDRST)).reset_status()
}

pub(super) fn reset_complete(hw: &dyn Hardware) -> bool {
    !GdrstCfg::from(hw.config_read8(GDRST)).reset_enable()
}

pub(super) fn settle(mode: WaitMode) {
    if mode == WaitMode::Sleep {
        std::thread::sleep(ASSERT_TIME);
    }
}

/// Gen3/gen4 whole device reset through PCI config space: assert, wait for
/// the hardware to report it is in reset, deassert, wait for it to leave.
pub struct I915Reset {
    timeout: Duration,
}

impl I915Reset {
    pub fn new(config: &OpConfig) -> Self {
        Self {
            timeout: config.ack_timeout,
        }
    }
}

impl ResetOp for I915Reset {
    fn name(&self) -> &'static str {
        "i915"
    }

    fn reset(
        &self,
        hw: &dyn Hardware,
        _engines: EngineMask,
        mode: WaitMode,
    ) -> Result<(), HwResetError> {
        hw.config_write8(GDRST, GdrstCfg::new().with_reset_enable(true).into());
        settle(mode);
        let asserted = wait_for(|| in_reset(hw), self.timeout, mode);

        // Clear the reset request
        hw.config_write8(GDRST, 0);
        settle(mode);
        asserted?;

        wait_for(|| !in_reset(hw), self.timeout, mode)
    }
}

/// G33 and Pineview: a single assert, completion is the enable bit clearing.
pub struct G33Reset {
    timeout: Duration,
}

impl G33Reset {
    pub fn new(config: &OpConfig) -> Self {
        Self {
            timeout: config.ack_timeout,
        }
    }
}

impl ResetOp for G33Reset {
    fn name(&self) -> &'static str {
        "g33"
    }

    fn reset(
        &self,
        hw: &dyn Hardware,
        _engines: EngineMask,
        mode: WaitMode,
    ) -> Result<(), HwResetError> {
        hw.config_write8(GDRST, GdrstCfg::new().with_reset_enable(true).into());
        let result = wait_for(|| reset_complete(hw), self.timeout, mode);
        if result.is_err() {
            hw.config_write8(GDRST, 0);
        }
        result
    }
}
