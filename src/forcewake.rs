// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};

use gtreset_hw::regs::{self, Masked};
use gtreset_hw::Hardware;

use crate::lock;

/// Reference counted hold on the power domain.
///
/// Registers are only reliably accessible while at least one
/// [`ForcewakeGuard`] is alive. The domain is woken on the first guard and put
/// back to sleep when the last one is dropped.
pub struct Forcewake {
    hw: Arc<dyn Hardware>,
    count: Mutex<u32>,
}

impl Forcewake {
    pub fn new(hw: Arc<dyn Hardware>) -> Self {
        Self {
            hw,
            count: Mutex::new(0),
        }
    }

    pub fn get(&self) -> ForcewakeGuard<'_> {
        let mut count = lock(&self.count);
        if *count == 0 {
            self.hw.write32(
                regs::FORCEWAKE_MT,
                Masked::enable(regs::FORCEWAKE_KERNEL).into(),
            );
        }
        *count += 1;

        ForcewakeGuard { forcewake: self }
    }

    pub fn count(&self) -> u32 {
        *lock(&self.count)
    }

    fn put(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.hw.write32(
                regs::FORCEWAKE_MT,
                Masked::disable(regs::FORCEWAKE_KERNEL).into(),
            );
        }
    }
}

#[must_use = "the power domain is released as soon as the guard is dropped"]
pub struct ForcewakeGuard<'a> {
    forcewake: &'a Forcewake,
}

impl Drop for ForcewakeGuard<'_> {
    fn drop(&mut self) {
        self.forcewake.put();
    }
}
