// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! A register level stand-in for a device.
//!
//! Reset registers acknowledge immediately unless a fault has been injected,
//! which is enough to drive every strategy through both its success and its
//! failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use gtreset_core::{EngineId, EngineMask, Platform};

use crate::regs::{self, GdrstCfg, IlkGdsr, Masked};
use crate::Hardware;

#[derive(Default)]
struct SimState {
    regs: HashMap<u32, u32>,
    config: HashMap<u8, u8>,
    ack_faults: u32,
    not_ready: [u32; EngineId::COUNT],
    stuck: EngineMask,
}

impl SimState {
    /// Consumes one injected ack fault, if any.
    fn take_ack_fault(&mut self) -> bool {
        if self.ack_faults > 0 {
            self.ack_faults -= 1;
            true
        } else {
            false
        }
    }
}

pub struct SimHardware {
    platform: Platform,
    state: Mutex<SimState>,
    reset_requests: AtomicU32,
}

impl SimHardware {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            state: Mutex::default(),
            reset_requests: AtomicU32::new(0),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// The next `count` reset requests are never acknowledged.
    pub fn inject_ack_timeouts(&self, count: u32) {
        self.lock().ack_faults = count;
    }

    /// The next `count` reset handshakes on `engine` never report ready.
    pub fn inject_not_ready(&self, engine: EngineId, count: u32) {
        self.lock().not_ready[engine.index()] = count;
    }

    /// A stuck ring never reports idle after being asked to stop.
    pub fn set_ring_stuck(&self, engine: EngineId, stuck: bool) {
        let mut state = self.lock();
        if stuck {
            state.stuck.insert(engine);
        } else {
            state.stuck.remove(engine);
        }
    }

    /// Number of reset requests the hardware acknowledged.
    pub fn reset_requests(&self) -> u32 {
        self.reset_requests.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        // Register state stays consistent even if a test thread panicked
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acked(&self) {
        self.reset_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn engine_register(reg: u32, f: fn(EngineId) -> u32) -> Option<EngineId> {
        EngineId::ALL.into_iter().find(|engine| f(*engine) == reg)
    }

    fn write_reset_ctl(&self, state: &mut SimState, engine: EngineId, reg: u32, value: u32) {
        let current = state.regs.get(&reg).copied().unwrap_or(0);
        let mut next = Masked::from(value).apply(current);

        let request = regs::RESET_CTL_REQUEST_RESET as u32;
        let ready = regs::RESET_CTL_READY_TO_RESET as u32;
        if next & request == 0 {
            next &= !ready;
        } else if current & request == 0 {
            let faults = &mut state.not_ready[engine.index()];
            if *faults > 0 {
                *faults -= 1;
                next &= !ready;
            } else {
                next |= ready;
            }
        }

        state.regs.insert(reg, next);
    }

    fn write_mi_mode(&self, state: &mut SimState, engine: EngineId, reg: u32, value: u32) {
        let current = state.regs.get(&reg).copied().unwrap_or(0);
        let mut next = Masked::from(value).apply(current);

        let stop = regs::MI_MODE_STOP_RING as u32;
        let idle = regs::MI_MODE_IDLE as u32;
        if next & stop != 0 && !state.stuck.contains(engine) {
            next |= idle;
        } else {
            next &= !idle;
        }

        state.regs.insert(reg, next);
    }
}

impl Hardware for SimHardware {
    fn read32(&self, reg: u32) -> u32 {
        self.lock().regs.get(&reg).copied().unwrap_or(0)
    }

    fn write32(&self, reg: u32, value: u32) {
        let mut state = self.lock();

        if reg == regs::GEN6_GDRST {
            let stored = if value != 0 && !state.take_ack_fault() {
                self.acked();
                0
            } else {
                value
            };
            state.regs.insert(reg, stored);
        } else if reg == regs::ILK_GDSR {
            let gdsr = IlkGdsr::from(value);
            let stored = if gdsr.reset_enable() && !state.take_ack_fault() {
                self.acked();
                gdsr.with_reset_enable(false).into()
            } else {
                value
            };
            state.regs.insert(reg, stored);
        } else if reg == regs::FORCEWAKE_MT {
            let current = state.regs.get(&reg).copied().unwrap_or(0);
            let next = Masked::from(value).apply(current);
            state.regs.insert(reg, next);
            state.regs.insert(regs::FORCEWAKE_ACK, next & 0xffff);
        } else if let Some(engine) = Self::engine_register(reg, regs::ring_reset_ctl) {
            self.write_reset_ctl(&mut state, engine, reg, value);
        } else if let Some(engine) = Self::engine_register(reg, regs::ring_mi_mode) {
            self.write_mi_mode(&mut state, engine, reg, value);
        } else {
            state.regs.insert(reg, value);
        }
    }

    fn config_read8(&self, offset: u8) -> u8 {
        self.lock().config.get(&offset).copied().unwrap_or(0)
    }

    fn config_write8(&self, offset: u8, value: u8) {
        let mut state = self.lock();

        let stored = if offset == regs::GDRST {
            let gdrst = GdrstCfg::from(value);
            if gdrst.reset_enable() && !state.take_ack_fault() {
                self.acked();
                gdrst
                    .with_reset_enable(false)
                    .with_reset_status(true)
                    .into()
            } else {
                value
            }
        } else {
            value
        };

        state.config.insert(offset, stored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forcewake_ack_mirrors_request() {
        let hw = SimHardware::new(Platform::Skylake);
        hw.write32(
            regs::FORCEWAKE_MT,
            Masked::enable(regs::FORCEWAKE_KERNEL).into(),
        );
        assert_eq!(hw.read32(regs::FORCEWAKE_ACK), 1);

        hw.write32(
            regs::FORCEWAKE_MT,
            Masked::disable(regs::FORCEWAKE_KERNEL).into(),
        );
        assert_eq!(hw.read32(regs::FORCEWAKE_ACK), 0);
    }

    #[test]
    fn test_ack_faults_are_consumed() {
        let hw = SimHardware::new(Platform::Haswell);
        hw.inject_ack_timeouts(2);

        hw.write32(regs::GEN6_GDRST, regs::GEN6_GRDOM_FULL);
        assert_eq!(hw.read32(regs::GEN6_GDRST), regs::GEN6_GRDOM_FULL);
        hw.write32(regs::GEN6_GDRST, regs::GEN6_GRDOM_FULL);
        assert_eq!(hw.reset_requests(), 0);

        hw.write32(regs::GEN6_GDRST, regs::GEN6_GRDOM_FULL);
        assert_eq!(hw.read32(regs::GEN6_GDRST), 0);
        assert_eq!(hw.reset_requests(), 1);
    }

    #[test]
    fn test_plain_registers() {
        let hw = SimHardware::new(Platform::Skylake);
        assert_eq!(hw.read32(0x1234), 0);
        hw.write32(0x1234, 0xdead_beef);
        assert_eq!(hw.read32(0x1234), 0xdead_beef);

        hw.config_write8(0x10, 0x42);
        assert_eq!(hw.config_read8(0x10), 0x42);
    }
}
