// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use gtreset_core::{EngineId, EngineMask, HwResetError};

use super::ResetOp;
use crate::regs::*;
use crate::{wait_for_register, Hardware, OpConfig, WaitMode};

/// Gen6+ reset through the domain reset register.
///
/// Each engine maps onto one hardware domain; a request for every engine uses
/// the dedicated full-device domain instead.
pub struct DomainReset {
    name: &'static str,
    full: u32,
    domains: [u32; EngineId::COUNT],
    timeout: Duration,
}

impl DomainReset {
    pub fn gen6(config: &OpConfig) -> Self {
        let mut domains = [0; EngineId::COUNT];
        domains[EngineId::Rcs0.index()] = GEN6_GRDOM_RENDER;
        domains[EngineId::Bcs0.index()] = GEN6_GRDOM_BLT;
        domains[EngineId::Vcs0.index()] = GEN6_GRDOM_MEDIA;
        domains[EngineId::Vcs1.index()] = GEN8_GRDOM_MEDIA2;
        domains[EngineId::Vecs0.index()] = GEN6_GRDOM_VECS;

        Self {
            name: "gen6",
            full: GEN6_GRDOM_FULL,
            domains,
            timeout: config.ack_timeout,
        }
    }

    pub fn gen11(config: &OpConfig) -> Self {
        let domains = [
            GEN11_GRDOM_RENDER,
            GEN11_GRDOM_BLT,
            GEN11_GRDOM_MEDIA,
            GEN11_GRDOM_MEDIA2,
            GEN11_GRDOM_MEDIA3,
            GEN11_GRDOM_MEDIA4,
            GEN11_GRDOM_VECS,
            GEN11_GRDOM_VECS2,
        ];

        Self {
            name: "gen11",
            full: GEN11_GRDOM_FULL,
            domains,
            timeout: config.ack_timeout,
        }
    }

    /// Hardware domains covering `engines`.
    pub fn hw_mask(&self, engines: EngineMask) -> u32 {
        if engines.is_all() {
            return self.full;
        }
        engines
            .iter()
            .fold(0, |mask, engine| mask | self.domains[engine.index()])
    }

    /// Resets an explicit set of hardware domains.
    pub fn reset_domains(
        &self,
        hw: &dyn Hardware,
        hw_mask: u32,
        mode: WaitMode,
    ) -> Result<(), HwResetError> {
        hw.write32(GEN6_GDRST, hw_mask);

        // Wait for the device to ack the reset requests
        let result = wait_for_register(hw, GEN6_GDRST, hw_mask, 0, self.timeout, mode);
        if result.is_err() {
            tracing::debug!("Wait for {hw_mask:#010x} engines reset failed");
        }
        result
    }
}

impl ResetOp for DomainReset {
    fn name(&self) -> &'static str {
        self.name
    }

    fn reset(
        &self,
        hw: &dyn Hardware,
        engines: EngineMask,
        mode: WaitMode,
    ) -> Result<(), HwResetError> {
        self.reset_domains(hw, self.hw_mask(engines), mode)
    }
}
