// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ring buffer control shared by every generation.

use std::time::Duration;

use gtreset_core::{EngineId, HwResetError};

use crate::regs::{self, Masked};
use crate::{wait_for_register, Hardware, WaitMode};

/// Asks the command streamer to stop fetching and waits for it to go idle.
pub fn stop(
    hw: &dyn Hardware,
    engine: EngineId,
    timeout: Duration,
    mode: WaitMode,
) -> Result<(), HwResetError> {
    hw.write32(
        regs::ring_mi_mode(engine),
        Masked::enable(regs::MI_MODE_STOP_RING).into(),
    );
    wait_for_register(
        hw,
        regs::ring_mi_mode(engine),
        regs::MI_MODE_IDLE as u32,
        regs::MI_MODE_IDLE as u32,
        timeout,
        mode,
    )
}

/// Stops the engine and leaves its ring empty and disabled, ready for reset.
pub fn park(hw: &dyn Hardware, engine: EngineId, timeout: Duration, mode: WaitMode) {
    if stop(hw, engine, timeout, mode).is_err() {
        tracing::debug!("{engine}: timed out on STOP_RING");
    }

    hw.write32(regs::ring_head(engine), hw.read32(regs::ring_tail(engine)));
    hw.write32(regs::ring_head(engine), 0);
    hw.write32(regs::ring_tail(engine), 0);

    // The ring must be empty before it is disabled
    hw.write32(regs::ring_ctl(engine), 0);

    if hw.read32(regs::ring_head(engine)) != 0 {
        tracing::debug!("{engine}: ring head not parked");
    }
}

/// Minimal re-programming after a reset: ring position, status page and
/// interrupt mask, then lets the command streamer run again.
pub fn reprogram(hw: &dyn Hardware, engine: EngineId, head: u32) {
    hw.write32(regs::hws_pga(engine), status_page(engine));
    hw.write32(regs::ring_imr(engine), !0);
    hw.write32(regs::ring_head(engine), head);
    hw.write32(regs::ring_tail(engine), head);
    hw.write32(regs::ring_ctl(engine), 1);
    hw.write32(
        regs::ring_mi_mode(engine),
        Masked::disable(regs::MI_MODE_STOP_RING).into(),
    );
}

fn status_page(engine: EngineId) -> u32 {
    0x0010_0000 + ((engine.index() as u32) << 12)
}
