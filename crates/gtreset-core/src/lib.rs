// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not, Sub};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hardware platform.
///
/// Platforms are ordered by generation; the reset strategy of a device is
/// picked from ranges of this ordering.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Gen2, no programmatic reset.
    I830,
    I915,
    G33,
    Pineview,
    I965,
    G4x,
    Ironlake,
    Sandybridge,
    Ivybridge,
    Haswell,
    Broadwell,
    #[default]
    Skylake,
    Icelake,
}

impl Platform {
    /// Hardware generation number.
    pub fn gen(&self) -> u8 {
        match self {
            Platform::I830 => 2,
            Platform::I915 | Platform::G33 | Platform::Pineview => 3,
            Platform::I965 | Platform::G4x => 4,
            Platform::Ironlake => 5,
            Platform::Sandybridge => 6,
            Platform::Ivybridge | Platform::Haswell => 7,
            Platform::Broadwell => 8,
            Platform::Skylake => 9,
            Platform::Icelake => 11,
        }
    }

    /// Checks if the platform is [`Platform::G33`] or [`Platform::Pineview`].
    pub fn is_g33(&self) -> bool {
        matches!(self, Platform::G33 | Platform::Pineview)
    }

    /// Checks if the platform is [`Platform::G4x`].
    pub fn is_g4x(&self) -> bool {
        matches!(self, Platform::G4x)
    }

    /// Checks if the platform is [`Platform::Ironlake`].
    pub fn is_ironlake(&self) -> bool {
        matches!(self, Platform::Ironlake)
    }

    /// Whether individual engines can be reset without touching the rest of
    /// the device.
    pub fn has_reset_engine(&self) -> bool {
        self.gen() >= 8
    }

    /// The engines physically present on a typical part of this platform.
    pub fn engines(&self) -> EngineMask {
        let mut mask = EngineMask::from(EngineId::Rcs0);
        if self.gen() >= 4 {
            mask |= EngineId::Vcs0;
        }
        if self.gen() >= 6 {
            mask |= EngineId::Bcs0;
        }
        if self.gen() >= 7 && *self != Platform::Ivybridge {
            mask |= EngineId::Vecs0;
        }
        if self.gen() >= 8 {
            mask |= EngineId::Vcs1;
        }
        if self.gen() >= 11 {
            mask |= EngineId::Vcs2 | EngineId::Vcs3 | EngineId::Vecs1;
        }
        mask
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "i830" => Ok(Platform::I830),
            "i915" => Ok(Platform::I915),
            "g33" => Ok(Platform::G33),
            "pineview" => Ok(Platform::Pineview),
            "i965" => Ok(Platform::I965),
            "g4x" => Ok(Platform::G4x),
            "ironlake" => Ok(Platform::Ironlake),
            "sandybridge" => Ok(Platform::Sandybridge),
            "ivybridge" => Ok(Platform::Ivybridge),
            "haswell" => Ok(Platform::Haswell),
            "broadwell" => Ok(Platform::Broadwell),
            "skylake" => Ok(Platform::Skylake),
            "icelake" => Ok(Platform::Icelake),
            err => Err(err.to_string()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Class of an engine; decides which hardware reset domain it lives in.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineClass {
    Render,
    Copy,
    Video,
    VideoEnhance,
}

/// Identity of an independently schedulable engine.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum EngineId {
    Rcs0 = 0,
    Bcs0 = 1,
    Vcs0 = 2,
    Vcs1 = 3,
    Vcs2 = 4,
    Vcs3 = 5,
    Vecs0 = 6,
    Vecs1 = 7,
}

impl EngineId {
    pub const COUNT: usize = 8;

    pub const ALL: [EngineId; Self::COUNT] = [
        EngineId::Rcs0,
        EngineId::Bcs0,
        EngineId::Vcs0,
        EngineId::Vcs1,
        EngineId::Vcs2,
        EngineId::Vcs3,
        EngineId::Vecs0,
        EngineId::Vecs1,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn class(&self) -> EngineClass {
        match self {
            EngineId::Rcs0 => EngineClass::Render,
            EngineId::Bcs0 => EngineClass::Copy,
            EngineId::Vcs0 | EngineId::Vcs1 | EngineId::Vcs2 | EngineId::Vcs3 => {
                EngineClass::Video
            }
            EngineId::Vecs0 | EngineId::Vecs1 => EngineClass::VideoEnhance,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EngineId::Rcs0 => "rcs0",
            EngineId::Bcs0 => "bcs0",
            EngineId::Vcs0 => "vcs0",
            EngineId::Vcs1 => "vcs1",
            EngineId::Vcs2 => "vcs2",
            EngineId::Vcs3 => "vcs3",
            EngineId::Vecs0 => "vecs0",
            EngineId::Vecs1 => "vecs1",
        }
    }

    /// Base of the engine's ring register block.
    pub fn mmio_base(&self) -> u32 {
        match self {
            EngineId::Rcs0 => 0x02000,
            EngineId::Bcs0 => 0x22000,
            EngineId::Vcs0 => 0x12000,
            EngineId::Vcs1 => 0x1c000,
            EngineId::Vcs2 => 0x1d000,
            EngineId::Vcs3 => 0x1e000,
            EngineId::Vecs0 => 0x1a000,
            EngineId::Vecs1 => 0x1b000,
        }
    }
}

impl FromStr for EngineId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EngineId::ALL
            .iter()
            .copied()
            .find(|id| id.name() == s.to_lowercase())
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of engines.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineMask(u32);

impl EngineMask {
    pub const EMPTY: EngineMask = EngineMask(0);
    pub const ALL: EngineMask = EngineMask((1 << EngineId::COUNT as u32) - 1);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_all(&self) -> bool {
        *self == Self::ALL
    }

    pub fn contains(&self, engine: EngineId) -> bool {
        self.0 & (1 << engine.index()) != 0
    }

    pub fn insert(&mut self, engine: EngineId) {
        self.0 |= 1 << engine.index();
    }

    pub fn remove(&mut self, engine: EngineId) {
        self.0 &= !(1 << engine.index());
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = EngineId> {
        let mask = *self;
        EngineId::ALL
            .into_iter()
            .filter(move |engine| mask.contains(*engine))
    }
}

impl From<EngineId> for EngineMask {
    fn from(value: EngineId) -> Self {
        Self(1 << value.index())
    }
}

impl FromIterator<EngineId> for EngineMask {
    fn from_iter<I: IntoIterator<Item = EngineId>>(iter: I) -> Self {
        let mut mask = EngineMask::EMPTY;
        for engine in iter {
            mask.insert(engine);
        }
        mask
    }
}

impl<T: Into<EngineMask>> BitOr<T> for EngineMask {
    type Output = EngineMask;

    fn bitor(self, rhs: T) -> Self::Output {
        EngineMask(self.0 | rhs.into().0)
    }
}

impl BitOr for EngineId {
    type Output = EngineMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        EngineMask::from(self) | rhs
    }
}

impl<T: Into<EngineMask>> BitOrAssign<T> for EngineMask {
    fn bitor_assign(&mut self, rhs: T) {
        self.0 |= rhs.into().0;
    }
}

impl BitAnd for EngineMask {
    type Output = EngineMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        EngineMask(self.0 & rhs.0)
    }
}

impl Sub for EngineMask {
    type Output = EngineMask;

    fn sub(self, rhs: Self) -> Self::Output {
        EngineMask(self.0 & !rhs.0)
    }
}

impl Not for EngineMask {
    type Output = EngineMask;

    fn not(self) -> Self::Output {
        EngineMask(!self.0 & Self::ALL.0)
    }
}

impl fmt::Debug for EngineMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for EngineMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(|engine| engine.name()).collect();
        f.write_str(&names.join("|"))
    }
}

/// Coarse outcome of a hardware reset operation.
///
/// Generation specific failure detail stops at the reset strategy; everything
/// above only ever sees one of these.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum HwResetError {
    #[error("hardware did not acknowledge the reset in time")]
    TimedOut,

    #[error("engine did not become ready for reset")]
    NotReady,

    #[error("no programmatic reset is available")]
    Unsupported,
}

impl HwResetError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HwResetError::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse() {
        assert_eq!("Skylake".parse::<Platform>(), Ok(Platform::Skylake));
        assert_eq!("g4x".parse::<Platform>(), Ok(Platform::G4x));
        assert!("voodoo".parse::<Platform>().is_err());
        assert!(Platform::Ironlake < Platform::Sandybridge);
    }

    #[test]
    fn test_platform_engines() {
        assert_eq!(Platform::I830.engines(), EngineMask::from(EngineId::Rcs0));
        let icl = Platform::Icelake.engines();
        assert_eq!(icl.len(), 8);
        assert!(icl.is_all());
        assert!(!Platform::Ivybridge.engines().contains(EngineId::Vecs0));
        assert!(Platform::Haswell.engines().contains(EngineId::Vecs0));
    }

    #[test]
    fn test_engine_mask_ops() {
        let mut mask = EngineId::Rcs0 | EngineId::Vcs0;
        assert_eq!(mask.len(), 2);
        assert!(mask.contains(EngineId::Vcs0));
        mask.remove(EngineId::Vcs0);
        assert_eq!(mask, EngineMask::from(EngineId::Rcs0));
        assert_eq!(EngineMask::ALL - mask, !mask);
        assert!((mask & !mask).is_empty());
        assert_eq!(mask.to_string(), "rcs0");
        assert_eq!(EngineMask::EMPTY.to_string(), "none");
    }

    #[test]
    fn test_engine_mask_iter_order() {
        let mask: EngineMask = [EngineId::Vecs0, EngineId::Rcs0, EngineId::Bcs0]
            .into_iter()
            .collect();
        let engines: Vec<EngineId> = mask.iter().collect();
        assert_eq!(engines, vec![EngineId::Rcs0, EngineId::Bcs0, EngineId::Vecs0]);
        assert_eq!(EngineMask::from_bits(u32::MAX), EngineMask::ALL);
    }

    #[test]
    fn test_engine_parse() {
        assert_eq!("VCS1".parse::<EngineId>(), Ok(EngineId::Vcs1));
        assert_eq!(EngineId::from_index(6), Some(EngineId::Vecs0));
        assert_eq!(EngineId::from_index(8), None);
    }
}
