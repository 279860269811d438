// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Register-level reset support.
//!
//! Everything generation specific lives here. A device resolves its
//! [`ResetCapability`] once at bring-up and from then on only sees the coarse
//! [`HwResetError`] outcomes.

pub mod ops;
pub mod regs;
mod registry;
pub mod ring;
pub mod sim;
mod wait;

pub use gtreset_core::{EngineId, EngineMask, HwResetError, Platform};
pub use ops::ResetOp;
pub use registry::{OpConfig, ResetCapability};
pub use sim::SimHardware;
pub use wait::{wait_for, wait_for_register, WaitMode};

/// Raw access to a device's register space.
///
/// MMIO accesses go through [`Hardware::read32`]/[`Hardware::write32`], the
/// handful of reset registers that live in PCI config space go through the
/// byte accessors.
pub trait Hardware: Send + Sync {
    fn read32(&self, reg: u32) -> u32;
    fn write32(&self, reg: u32, value: u32);

    fn config_read8(&self, offset: u8) -> u8;
    fn config_write8(&self, offset: u8, value: u8);
}

impl<T: Hardware + ?Sized> Hardware for std::sync::Arc<T> {
    fn read32(&self, reg: u32) -> u32 {
        (**self).read32(reg)
    }

    fn write32(&self, reg: u32, value: u32) {
        (**self).write32(reg, value)
    }

    fn config_read8(&self, offset: u8) -> u8 {
        (**self).config_read8(offset)
    }

    fn config_write8(&self, offset: u8, value: u8) {
        (**self).config_write8(offset, value)
    }
}
