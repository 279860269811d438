// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use gtreset_core::{EngineMask, HwResetError};

use super::ResetOp;
use crate::regs::{IlkGdsr, ILK_GDSR, ILK_GRDOM_MEDIA, ILK_GRDOM_RENDER};
use crate::{wait_for_register, Hardware, OpConfig, WaitMode};

/// Ironlake: render then media through the MCHBAR mirror of the reset
/// register.
pub struct IronlakeReset {
    timeout: Duration,
}

impl IronlakeReset {
    pub fn new(config: &OpConfig) -> Self {
        Self {
            timeout: config.ack_timeout,
        }
    }

    fn reset_domain(
        &self,
        hw: &dyn Hardware,
        domain: u8,
        mode: WaitMode,
    ) -> Result<(), HwResetError> {
        hw.write32(
            ILK_GDSR,
            IlkGdsr::new()
                .with_domain(domain)
                .with_reset_enable(true)
                .into(),
        );
        let enable: u32 = IlkGdsr::new().with_reset_enable(true).into();
        wait_for_register(hw, ILK_GDSR, enable, 0, self.timeout, mode)
    }
}

impl ResetOp for IronlakeReset {
    fn name(&self) -> &'static str {
        "ironlake"
    }

    fn reset(
        &self,
        hw: &dyn Hardware,
        _engines: EngineMask,
        mode: WaitMode,
    ) -> Result<(), HwResetError> {
        let mut result = self.reset_domain(hw, ILK_GRDOM_RENDER, mode);
        if result.is_err() {
            tracing::debug!("Wait for render reset failed");
        } else {
            result = self.reset_domain(hw, ILK_GRDOM_MEDIA, mode);
            if result.is_err() {
                tracing::debug!("Wait for media reset failed");
            }
        }

        hw.write32(ILK_GDSR, 0);
        result
    }
}
