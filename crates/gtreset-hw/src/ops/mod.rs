// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Generation specific reset strategies.
//!
//! Each strategy resets the hardware domains backing an [`EngineMask`]. They
//! are picked once per device by [`crate::ResetCapability::resolve`] and never
//! branched on afterwards.

mod g4x;
mod gen3;
mod gen6;
mod gen8;
mod ironlake;

pub use g4x::G4xReset;
pub use gen3::{G33Reset, I915Reset};
pub use gen6::DomainReset;
pub use gen8::HandshakeReset;
pub use ironlake::IronlakeReset;

use gtreset_core::{EngineId, EngineMask, HwResetError};

use crate::{ring, Hardware, WaitMode};

/// Trait for generation specific reset implementations.
pub trait ResetOp: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Resets the domains backing `engines`.
    ///
    /// [`EngineMask::ALL`] asks for a whole device reset.
    ///
    /// # Errors
    ///
    /// Returns [`HwResetError::TimedOut`] if the hardware did not acknowledge
    /// the reset, or [`HwResetError::NotReady`] if an engine refused to enter
    /// its reset-ready state.
    fn reset(
        &self,
        hw: &dyn Hardware,
        engines: EngineMask,
        mode: WaitMode,
    ) -> Result<(), HwResetError>;

    /// Re-programs an engine that has just come out of reset.
    fn reprogram_engine(&self, hw: &dyn Hardware, engine: EngineId, head: u32) {
        ring::reprogram(hw, engine, head);
    }
}
