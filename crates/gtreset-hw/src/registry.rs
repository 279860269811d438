// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::time::Duration;

use gtreset_core::{EngineMask, HwResetError, Platform};

use crate::ops::{
    DomainReset, G33Reset, G4xReset, HandshakeReset, I915Reset, IronlakeReset, ResetOp,
};
use crate::{Hardware, WaitMode};

/// Inputs every reset strategy is built from.
#[derive(Clone, Debug)]
pub struct OpConfig {
    /// Engines present on the device.
    pub engines: EngineMask,
    /// How long the hardware gets to acknowledge a domain reset.
    pub ack_timeout: Duration,
    /// How long an engine gets to report it is ready to be reset.
    pub ready_timeout: Duration,
}

struct Entry {
    applies: fn(&Platform) -> bool,
    build: fn(&OpConfig) -> Box<dyn ResetOp>,
}

fn is_gen11(platform: &Platform) -> bool {
    platform.gen() >= 11
}

fn is_gen8(platform: &Platform) -> bool {
    platform.gen() >= 8
}

fn is_gen6(platform: &Platform) -> bool {
    platform.gen() >= 6
}

fn is_gen3(platform: &Platform) -> bool {
    platform.gen() >= 3
}

fn gen11(config: &OpConfig) -> Box<dyn ResetOp> {
    Box::new(HandshakeReset::new(DomainReset::gen11(config), config))
}

fn gen8(config: &OpConfig) -> Box<dyn ResetOp> {
    Box::new(HandshakeReset::new(DomainReset::gen6(config), config))
}

fn gen6(config: &OpConfig) -> Box<dyn ResetOp> {
    Box::new(DomainReset::gen6(config))
}

fn ironlake(config: &OpConfig) -> Box<dyn ResetOp> {
    Box::new(IronlakeReset::new(config))
}

fn g4x(config: &OpConfig) -> Box<dyn ResetOp> {
    Box::new(G4xReset::new(config))
}

fn g33(config: &OpConfig) -> Box<dyn ResetOp> {
    Box::new(G33Reset::new(config))
}

fn i915(config: &OpConfig) -> Box<dyn ResetOp> {
    Box::new(I915Reset::new(config))
}

/// Checked in order; the first matching entry wins.
const TABLE: &[Entry] = &[
    Entry {
        applies: is_gen11,
        build: gen11,
    },
    Entry {
        applies: is_gen8,
        build: gen8,
    },
    Entry {
        applies: is_gen6,
        build: gen6,
    },
    Entry {
        applies: Platform::is_ironlake,
        build: ironlake,
    },
    Entry {
        applies: Platform::is_g4x,
        build: g4x,
    },
    Entry {
        applies: Platform::is_g33,
        build: g33,
    },
    Entry {
        applies: is_gen3,
        build: i915,
    },
];

/// What a device can do to reset itself.
///
/// Resolved once at bring-up. [`ResetCapability::Unsupported`] is a valid
/// terminal state rather than an error: the device simply has no
/// programmatic reset.
pub enum ResetCapability {
    Programmatic(Box<dyn ResetOp>),
    Unsupported,
}

impl ResetCapability {
    /// Picks the reset strategy for `platform`.
    ///
    /// `reset_level` follows the usual module option: 0 disables resets
    /// entirely, 1 allows whole device resets, 2 also allows engine resets.
    pub fn resolve(platform: Platform, reset_level: u8, config: &OpConfig) -> Self {
        if reset_level == 0 {
            return ResetCapability::Unsupported;
        }

        TABLE
            .iter()
            .find(|entry| (entry.applies)(&platform))
            .map(|entry| ResetCapability::Programmatic((entry.build)(config)))
            .unwrap_or(ResetCapability::Unsupported)
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, ResetCapability::Programmatic(_))
    }

    pub fn op(&self) -> Option<&dyn ResetOp> {
        match self {
            ResetCapability::Programmatic(op) => Some(op.as_ref()),
            ResetCapability::Unsupported => None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.op().map(|op| op.name()).unwrap_or("none")
    }

    /// Runs the strategy, reporting [`HwResetError::Unsupported`] when there is
    /// none.
    pub fn reset(
        &self,
        hw: &dyn Hardware,
        engines: EngineMask,
        mode: WaitMode,
    ) -> Result<(), HwResetError> {
        match self {
            ResetCapability::Programmatic(op) => op.reset(hw, engines, mode),
            ResetCapability::Unsupported => Err(HwResetError::Unsupported),
        }
    }
}

impl fmt::Debug for ResetCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResetCapability({})", self.name())
    }
}
