// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use gtreset_core::{EngineMask, HwResetError};

use super::gen3::reset_complete;
use super::ResetOp;
use crate::regs::{GdrstCfg, GDRST, GRDOM_MEDIA, GRDOM_RENDER};
use crate::{wait_for, Hardware, OpConfig, WaitMode};

/// G4x resets the media and render domains one after the other through
/// config space.
pub struct G4xReset {
    timeout: Duration,
}

impl G4xReset {
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
        hw.config_write8(
            GDRST,
            GdrstCfg::new()
                .with_domain(domain)
                .with_reset_enable(true)
                .into(),
        );
        wait_for(|| reset_complete(hw), self.timeout, mode)
    }
}

impl ResetOp for G4xReset {
    fn name(&self) -> &'static str {
        "g4x"
    }

    fn reset(
        &self,
        hw: &dyn Hardware,
        _engines: EngineMask,
        mode: WaitMode,
    ) -> Result<(), HwResetError> {
        let result = self
            .reset_domain(hw, GRDOM_MEDIA, mode)
            .map_err(|err| {
                tracing::debug!("Wait for media reset failed");
                err
            })
            .and_then(|_| {
                self.reset_domain(hw, GRDOM_RENDER, mode).map_err(|err| {
                    tracing::debug!("Wait for render reset failed");
                    err
                })
            });

        hw.config_write8(GDRST, 0);
        result
    }
}
