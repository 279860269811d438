// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Giving up on a device, and coming back from it.

use gtreset_core::EngineMask;
use gtreset_hw::WaitMode;

use crate::controller::EngineController;
use crate::device::Device;
use crate::engine::SubmitMode;
use crate::error::{FenceError, ResetError};
use crate::lock;
use crate::notify::ResetEvent;

impl Device {
    /// Declares the device lost.
    ///
    /// Every outstanding request is completed with [`FenceError::Io`], which
    /// also releases anyone waiting on them, and every later submission fails
    /// until [`Device::clear_wedged`] succeeds. Safe to call repeatedly.
    pub fn set_wedged(&self) {
        let _wedge = lock(&self.wedge_lock);
        tracing::debug!("{}: wedging", self.platform);

        // Raised before touching the engines so that no new submission gets
        // past the wedged check once we start failing requests
        let already_wedged = self.flags.set_wedged();

        // First stop submission to the hardware, but do not yet complete
        // requests by rolling the breadcrumbs forward
        let controller = EngineController::new(self);
        let prepared: Vec<_> = self
            .engines
            .iter()
            .map(|engine| controller.prepare(engine, WaitMode::Sleep))
            .collect();
        for engine in self.engines.iter() {
            engine.set_mode(SubmitMode::Nop);
        }

        // Even if the reset fails it still stops the engines
        if self.capability.is_supported() {
            if let Err(err) = self.gpu_reset(EngineMask::ALL, WaitMode::Sleep) {
                tracing::debug!("reset while wedging failed: {err}");
            }
        }

        // Nothing can reach the hardware anymore, fail everything in flight
        // and whatever arrives from now on
        for engine in self.engines.iter() {
            engine.cancel_requests();
        }

        for prepared in prepared {
            controller.finish(prepared);
        }

        self.flags.wake_all();

        if !already_wedged {
            tracing::error!("{}: GPU is wedged, further submission will fail", self.platform);
            self.bus.emit(ResetEvent::Wedged);
        }
    }

    /// Brings a wedged device back into service.
    ///
    /// Waits for every request that was outstanding when the device was
    /// wedged to signal, then restores normal submission. A no-op on a device
    /// that is not wedged.
    pub fn clear_wedged(&self) -> Result<(), ResetError> {
        let _wedge = lock(&self.wedge_lock);
        if !self.is_wedged() {
            return Ok(());
        }

        tracing::debug!("{}: start unwedging", self.platform);

        // Everything still queued was failed when the device was wedged, so
        // the last request on each timeline is enough to know they are done
        let timeout = self.policy.unwedge_timeout();
        for engine in self.engines.iter() {
            let Some(rq) = engine.last_request() else {
                continue;
            };
            if let Err(FenceError::Timeout) = rq.wait(timeout) {
                tracing::error!(
                    "{}: timed out waiting for {} to idle",
                    self.platform,
                    engine.name()
                );
                return Err(ResetError::UnwedgeTimeout);
            }
        }

        for engine in self.engines.iter() {
            engine.set_mode(SubmitMode::Normal);
        }

        self.flags.clear_wedged();
        self.flags.wake_all();
        self.bus.emit(ResetEvent::Unwedged);

        tracing::debug!("{}: end unwedging", self.platform);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use gtreset_core::{EngineId, Platform};
    use gtreset_hw::SimHardware;

    use crate::config::ResetPolicy;
    use crate::device::Device;
    use crate::error::{FenceError, SubmitError};
    use crate::notify::ResetEvent;
    use crate::request::{Client, Context, RequestState};

    fn device() -> Arc<Device> {
        Device::new(
            Platform::Skylake,
            Arc::new(SimHardware::new(Platform::Skylake)),
            ResetPolicy::default(),
        )
    }

    #[test]
    fn test_wedge_fails_everything() {
        let device = device();
        let events = device.notifications().channel();
        let context = Context::new(&Client::new("client"), "ctx");

        let running = device.submit(EngineId::Rcs0, &context).unwrap();
        let deferred = device.submit_deferred(EngineId::Bcs0, &context).unwrap();

        device.set_wedged();
        device.set_wedged();

        assert!(device.is_wedged());
        assert_eq!(running.wait(Duration::ZERO), Err(FenceError::Io));
        assert_eq!(deferred.state(), RequestState::Completed);
        assert_eq!(
            device.submit(EngineId::Rcs0, &context).unwrap_err(),
            SubmitError::DeviceLost
        );
        assert_eq!(device.forcewake().count(), 0);

        let events: Vec<ResetEvent> = events.try_iter().collect();
        assert_eq!(events, vec![ResetEvent::Wedged]);
    }

    #[test]
    fn test_unwedge() {
        let device = device();
        assert!(device.clear_wedged().is_ok());

        device.set_wedged();
        assert!(device.clear_wedged().is_ok());
        assert!(!device.is_wedged());
        assert!(device.clear_wedged().is_ok());

        let context = Context::new(&Client::new("client"), "ctx");
        let rq = device.submit(EngineId::Rcs0, &context).unwrap();
        assert_eq!(rq.state(), RequestState::Submitted);
    }
}
