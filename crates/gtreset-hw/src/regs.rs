// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Register model used by the reset strategies.
//!
//! Offsets and bit positions follow the layout of the real parts closely
//! enough to keep the sequences honest, but they are not a datasheet.

use gtreset_core::EngineId;

/// PCI config space graphics reset register (gen3 - gen4).
pub const GDRST: u8 = 0xc0;

/// Domain selector written into [`GdrstCfg::domain`].
pub const GRDOM_FULL: u8 = 0;
pub const GRDOM_RENDER: u8 = 1;
pub const GRDOM_MEDIA: u8 = 3;

#[bitfield_struct::bitfield(u8)]
pub struct GdrstCfg {
    pub reset_enable: bool,
    pub reset_status: bool,
    #[bits(2)]
    pub domain: u8,
    #[bits(4)]
    reserved: u8,
}

/// Ironlake MCHBAR mirrored reset register.
pub const ILK_GDSR: u32 = 0x0014_2ca4;

pub const ILK_GRDOM_RENDER: u8 = 1;
pub const ILK_GRDOM_MEDIA: u8 = 3;

#[bitfield_struct::bitfield(u32)]
pub struct IlkGdsr {
    pub reset_enable: bool,
    #[bits(2)]
    pub domain: u8,
    #[bits(29)]
    reserved: u32,
}

/// Gen6+ domain reset register. Every set bit asks for a domain reset and the
/// hardware clears it once the domain is back.
pub const GEN6_GDRST: u32 = 0x941c;

pub const GEN6_GRDOM_FULL: u32 = 1 << 0;
pub const GEN6_GRDOM_RENDER: u32 = 1 << 1;
pub const GEN6_GRDOM_MEDIA: u32 = 1 << 2;
pub const GEN6_GRDOM_BLT: u32 = 1 << 3;
pub const GEN6_GRDOM_VECS: u32 = 1 << 4;
pub const GEN8_GRDOM_MEDIA2: u32 = 1 << 7;

pub const GEN11_GRDOM_FULL: u32 = GEN6_GRDOM_FULL;
pub const GEN11_GRDOM_RENDER: u32 = GEN6_GRDOM_RENDER;
pub const GEN11_GRDOM_BLT: u32 = 1 << 2;
pub const GEN11_GRDOM_MEDIA: u32 = 1 << 5;
pub const GEN11_GRDOM_MEDIA2: u32 = 1 << 6;
pub const GEN11_GRDOM_MEDIA3: u32 = 1 << 7;
pub const GEN11_GRDOM_MEDIA4: u32 = 1 << 8;
pub const GEN11_GRDOM_VECS: u32 = 1 << 13;
pub const GEN11_GRDOM_VECS2: u32 = 1 << 14;

/// Forcewake request (masked) and acknowledgement.
pub const FORCEWAKE_MT: u32 = 0xa188;
pub const FORCEWAKE_ACK: u32 = 0x0013_0044;
pub const FORCEWAKE_KERNEL: u16 = 1 << 0;

pub const RESET_CTL_REQUEST_RESET: u16 = 1 << 0;
pub const RESET_CTL_READY_TO_RESET: u16 = 1 << 1;

pub const MI_MODE_STOP_RING: u16 = 1 << 8;
pub const MI_MODE_IDLE: u16 = 1 << 9;

/// Layout of a masked register write: the upper half selects which bits of the
/// lower half take effect.
#[bitfield_struct::bitfield(u32)]
pub struct Masked {
    pub value: u16,
    pub mask: u16,
}

impl Masked {
    pub fn enable(bits: u16) -> Self {
        Self::new().with_value(bits).with_mask(bits)
    }

    pub fn disable(bits: u16) -> Self {
        Self::new().with_mask(bits)
    }

    /// Applies this write to the current register contents.
    pub fn apply(&self, current: u32) -> u32 {
        let mask = self.mask() as u32;
        (current & !mask) | (self.value() as u32 & mask)
    }
}

/// Tiling fences of the global address mapping.
pub const NUM_FENCES: usize = 16;

pub fn fence_reg(index: usize) -> u32 {
    0x0010_0000 + 8 * index as u32
}

pub fn ring_tail(engine: EngineId) -> u32 {
    engine.mmio_base() + 0x30
}

pub fn ring_head(engine: EngineId) -> u32 {
    engine.mmio_base() + 0x34
}

pub fn ring_ctl(engine: EngineId) -> u32 {
    engine.mmio_base() + 0x3c
}

pub fn hws_pga(engine: EngineId) -> u32 {
    engine.mmio_base() + 0x80
}

pub fn ring_mi_mode(engine: EngineId) -> u32 {
    engine.mmio_base() + 0x9c
}

pub fn ring_imr(engine: EngineId) -> u32 {
    engine.mmio_base() + 0xa8
}

pub fn ring_reset_ctl(engine: EngineId) -> u32 {
    engine.mmio_base() + 0xd0
}
