// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use gtreset_core::{EngineId, EngineMask, HwResetError};

use super::{DomainReset, ResetOp};
use crate::regs::{self, Masked};
use crate::{wait_for_register, Hardware, OpConfig, WaitMode};

/// Gen8+: every engine has to acknowledge a reset request before its domain
/// may be reset, otherwise in-flight memory traffic can hang the system.
pub struct HandshakeReset {
    name: &'static str,
    domains: DomainReset,
    present: EngineMask,
    timeout: Duration,
}

impl HandshakeReset {
    pub fn new(domains: DomainReset, config: &OpConfig) -> Self {
        let name = if domains.name() == "gen11" {
            "gen11"
        } else {
            "gen8"
        };

        Self {
            name,
            domains,
            present: config.engines,
            timeout: config.ready_timeout,
        }
    }

    fn request(
        &self,
        hw: &dyn Hardware,
        engine: EngineId,
        mode: WaitMode,
    ) -> Result<(), HwResetError> {
        let reg = regs::ring_reset_ctl(engine);
        hw.write32(reg, Masked::enable(regs::RESET_CTL_REQUEST_RESET).into());

        let ready = regs::RESET_CTL_READY_TO_RESET as u32;
        wait_for_register(hw, reg, ready, ready, self.timeout, mode).map_err(|_| {
            tracing::error!("{engine}: reset request timeout");
            HwResetError::NotReady
        })
    }

    fn cancel(&self, hw: &dyn Hardware, engine: EngineId) {
        hw.write32(
            regs::ring_reset_ctl(engine),
            Masked::disable(regs::RESET_CTL_REQUEST_RESET).into(),
        );
    }
}

impl ResetOp for HandshakeReset {
    fn name(&self) -> &'static str {
        self.name
    }

    fn reset(
        &self,
        hw: &dyn Hardware,
        engines: EngineMask,
        mode: WaitMode,
    ) -> Result<(), HwResetError> {
        let targets = engines & self.present;

        let result = targets
            .iter()
            .try_for_each(|engine| self.request(hw, engine, mode))
            .and_then(|_| self.domains.reset(hw, engines, mode));

        for engine in targets.iter() {
            self.cancel(hw, engine);
        }

        result
    }
}
