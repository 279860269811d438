// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Recovery entry points.
//!
//! A pass first tries to reset each suspect engine on its own, then escalates
//! whatever is left to a whole device reset. Only one whole device reset is
//! ever in flight; callers losing that race wait for the winner and return
//! without resetting again.

use std::sync::atomic::Ordering;

use gtreset_core::{EngineId, EngineMask, HwResetError};
use gtreset_hw::{wait_for, WaitMode};
use serde::Serialize;

use crate::controller::{EngineController, PreparedEngine};
use crate::device::Device;
use crate::engine::Engine;
use crate::error::ResetError;
use crate::lock;
use crate::notify::ResetEvent;
use crate::watchdog::WedgeWatchdog;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetOutcome {
    /// Nothing needed resetting.
    Nothing,
    /// Every suspect engine was reset on its own.
    EngineReset,
    /// The device was reset as a whole.
    FullReset,
    /// Another caller was already resetting the device.
    Deferred,
    /// Recovery failed and the device is now wedged.
    Wedged,
}

/// Summary of one [`Device::handle_error`] pass.
#[derive(Clone, Debug, Serialize)]
pub struct ResetReport {
    pub reason: String,
    pub outcome: ResetOutcome,
    /// Engines recovered with an engine reset.
    pub engines_reset: EngineMask,
    /// Engines that needed a whole device reset.
    pub escalated: EngineMask,
    /// Hardware reset attempts made by the whole device reset.
    pub hw_attempts: u32,
}

/// State of one recovery pass, gone once the pass returns.
struct ResetAttempt {
    engine_mask: EngineMask,
    reason: String,
    retry_count: u32,
    stalled_mask: EngineMask,
}

impl ResetAttempt {
    fn new(engine_mask: EngineMask, reason: &str) -> Self {
        Self {
            engine_mask,
            reason: reason.to_string(),
            retry_count: 0,
            stalled_mask: engine_mask,
        }
    }

    fn report(&self, outcome: ResetOutcome, engines_reset: EngineMask) -> ResetReport {
        ResetReport {
            reason: self.reason.clone(),
            outcome,
            engines_reset,
            escalated: self.engine_mask,
            hw_attempts: self.retry_count,
        }
    }
}

impl Device {
    pub fn is_reset_supported(&self) -> bool {
        self.capability.is_supported()
    }

    pub fn is_engine_reset_supported(&self) -> bool {
        self.platform.has_reset_engine()
            && self.policy.reset_level >= 2
            && self.capability.is_supported()
    }

    pub fn controller(&self) -> EngineController<'_> {
        EngineController::new(self)
    }

    /// Handles a hang reported on `engine_mask`.
    ///
    /// Tries to reset each engine on its own first, and escalates to a whole
    /// device reset for anything that could not be recovered that way. May
    /// block waiting for a concurrent whole device reset to finish.
    pub fn handle_error(
        &self,
        engine_mask: EngineMask,
        capture_diagnostics: bool,
        reason: &str,
    ) -> Result<ResetReport, ResetError> {
        if !self.is_recovery_allowed() {
            return Err(ResetError::RecoveryDisabled);
        }

        let mut attempt = ResetAttempt::new(engine_mask & self.engine_mask, reason);

        if capture_diagnostics {
            self.hooks.capture_error_state(attempt.engine_mask, reason);
            self.hooks.clear_error_registers();
        }

        let mut engines_reset = EngineMask::EMPTY;

        // Try engine reset when available. We fall back to full reset if a
        // single reset fails, or if the engine failed to reset before.
        if self.is_engine_reset_supported() {
            let candidates = attempt.engine_mask - self.engine_reset_failed();
            for engine in self.engines.iter() {
                let id = engine.id();
                if !candidates.contains(id) || !self.flags.try_acquire_engine_reset(id) {
                    continue;
                }

                match self.reset_engine_locked(engine, reason) {
                    Ok(true) => {
                        attempt.engine_mask.remove(id);
                        engines_reset.insert(id);
                    }
                    Ok(false) => attempt.engine_mask.remove(id),
                    Err(_) => {}
                }

                self.flags.release_engine_reset(id);
            }
        }

        if attempt.engine_mask.is_empty() {
            let outcome = if engines_reset.is_empty() {
                ResetOutcome::Nothing
            } else {
                ResetOutcome::EngineReset
            };
            return Ok(attempt.report(outcome, engines_reset));
        }

        // Full reset needs the mutex, stop any other user trying to do so
        if !self.flags.try_acquire_full_reset() {
            self.flags.wait_full_reset();
            return Ok(attempt.report(ResetOutcome::Deferred, engines_reset));
        }

        // Prevent any other reset-engine attempt
        for engine in self.engines.iter() {
            self.flags.acquire_engine_reset(engine.id());
        }

        attempt.stalled_mask = attempt.engine_mask;
        let result = self.reset_device(&mut attempt);

        for engine in self.engines.iter() {
            self.flags.release_engine_reset(engine.id());
        }
        self.flags.release_full_reset();

        // The watchdog may have wedged the device under a pass that then
        // went on to succeed
        match result {
            _ if self.is_wedged() => Ok(attempt.report(ResetOutcome::Wedged, engines_reset)),
            Ok(()) => Ok(attempt.report(ResetOutcome::FullReset, engines_reset)),
            Err(err) => Err(err),
        }
    }

    /// Resets the whole device.
    ///
    /// Used directly at bring-up and resume; waits for any recovery pass that
    /// is already running. Engines in `stalled_mask` have their active request
    /// treated as guilty.
    pub fn full_reset(&self, stalled_mask: EngineMask, reason: &str) -> Result<(), ResetError> {
        self.flags.acquire_full_reset();
        for engine in self.engines.iter() {
            self.flags.acquire_engine_reset(engine.id());
        }

        let mut attempt = ResetAttempt::new(stalled_mask & self.engine_mask, reason);
        let result = self.full_reset_locked(&mut attempt);

        for engine in self.engines.iter() {
            self.flags.release_engine_reset(engine.id());
        }
        self.flags.release_full_reset();

        result
    }

    /// Resets a single engine whose work timed out.
    ///
    /// Never sleeps. A failure is remembered so that the next
    /// [`Device::handle_error`] for this engine resets the whole device.
    pub fn reset_single_engine(&self, id: EngineId, reason: &str) -> Result<(), ResetError> {
        if !self.is_engine_reset_supported() {
            return Err(HwResetError::Unsupported.into());
        }
        let engine = self.engine(id).ok_or(HwResetError::Unsupported)?;
        if self.is_wedged() {
            return Err(ResetError::Wedged);
        }

        if !self.flags.try_acquire_engine_reset(id) {
            return Err(ResetError::Busy { engine: id });
        }
        let result = self.reset_engine_locked(engine, reason);
        self.flags.release_engine_reset(id);

        result.map(|_| ())
    }

    /// Joins the deferred restart job, if one is running.
    pub fn flush_restart(&self) {
        let handle = lock(&self.restart).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("{}: restart job panicked", self.platform);
            }
        }
    }

    /// Engine reset with the engine's reset bit held. Returns false if the
    /// engine had already gone idle and was left alone.
    fn reset_engine_locked(&self, engine: &Engine, reason: &str) -> Result<bool, ResetError> {
        let id = engine.id();
        tracing::debug!(
            "{id} reset, full reset pending? {}",
            if self.flags.is_full_reset_in_progress() { "yes" } else { "no" }
        );
        debug_assert!(self.flags.is_engine_reset_in_progress(id));

        if engine.is_idle() {
            return Ok(false);
        }

        let controller = self.controller();
        let prepared = controller.prepare(engine, WaitMode::Atomic);

        tracing::info!("Resetting {id} for {reason}");
        engine.bump_reset_count();

        let result = self.gpu_reset(id.into(), WaitMode::Atomic);
        match result {
            Ok(()) => controller.reset(&prepared, true),
            Err(err) => {
                tracing::debug!("Failed to reset {id}, ret={err}");
                self.mark_engine_reset_failed(id);
            }
        }

        controller.finish(prepared);
        result?;
        Ok(true)
    }

    fn reset_device(&self, attempt: &mut ResetAttempt) -> Result<(), ResetError> {
        self.bus.emit(ResetEvent::ErrorDetected {
            reason: attempt.reason.clone(),
        });
        self.bus.emit(ResetEvent::ResetStarting);

        let watchdog = self.me.upgrade().map(|device| {
            WedgeWatchdog::arm(device, self.policy.watchdog_timeout(), &attempt.reason)
        });

        self.hooks.prepare_display();
        let result = self.full_reset_locked(attempt);
        self.hooks.finish_display();

        drop(watchdog);

        if !self.is_wedged() {
            self.bus.emit(ResetEvent::ResetFinished);
        }
        result
    }

    /// Whole device reset with the full reset bit and every engine bit held.
    fn full_reset_locked(&self, attempt: &mut ResetAttempt) -> Result<(), ResetError> {
        tracing::debug!("{}: full reset, stalled {}", self.platform, attempt.stalled_mask);

        // Clear any previous failed attempts first
        self.clear_wedged()?;

        tracing::info!("Resetting chip for {}", attempt.reason);
        self.bump_reset_count();

        let controller = self.controller();
        let prepared: Vec<PreparedEngine<'_>> = self
            .engines
            .iter()
            .map(|engine| controller.prepare(engine, WaitMode::Sleep))
            .collect();

        let result = self.reset_and_restore(&controller, &prepared, attempt);

        for prepared in prepared {
            controller.finish(prepared);
        }

        if result.is_ok() && !self.is_wedged() {
            self.schedule_restart();
        }
        result
    }

    fn reset_and_restore(
        &self,
        controller: &EngineController<'_>,
        prepared: &[PreparedEngine<'_>],
        attempt: &mut ResetAttempt,
    ) -> Result<(), ResetError> {
        if !self.capability.is_supported() {
            self.wait_for_hang_to_clear()?;
            attempt.stalled_mask = EngineMask::EMPTY;
        } else if let Err(err) = self.reset_with_retries(attempt) {
            tracing::error!("Failed to reset chip: {err}");
            self.taint();
            return Err(self.wedge());
        }

        if let Err(err) = self.hooks.enable_address_mapping() {
            tracing::error!("Failed to re-enable address mapping: {err}");
            return Err(self.wedge());
        }

        {
            let fences = lock(&self.fences);
            fences.revoke(self.hardware());
            for prepared in prepared {
                let stalled = attempt.stalled_mask.contains(prepared.engine().id());
                controller.reset(prepared, stalled);
            }
            fences.restore(self.hardware());
        }

        self.hooks.restore_overlay();

        if let Err(err) = self
            .hooks
            .init_hw()
            .and_then(|_| self.hooks.apply_workarounds())
        {
            tracing::error!("Failed to initialise HW following reset ({err})");
            return Err(self.wedge());
        }

        self.clear_engine_reset_failed();
        Ok(())
    }

    fn reset_with_retries(&self, attempt: &mut ResetAttempt) -> Result<(), HwResetError> {
        let attempts = self.policy.full_reset_attempts.max(1);

        let mut result = Err(HwResetError::TimedOut);
        for i in 0..attempts {
            if i > 0 {
                std::thread::sleep(self.policy.retry_delay());
            }

            attempt.retry_count += 1;
            result = self.gpu_reset(EngineMask::ALL, WaitMode::Sleep);
            match result {
                Ok(()) => break,
                Err(err) if !err.is_timeout() => break,
                Err(err) => tracing::debug!("GPU reset attempt {} failed: {err}", i + 1),
            }
        }
        result
    }

    /// Without a programmatic reset the only hope is that the engines drain
    /// on their own.
    fn wait_for_hang_to_clear(&self) -> Result<(), ResetError> {
        let Some(timeout) = self.policy.hang_clear_timeout() else {
            if self.policy.reset_level > 0 {
                tracing::error!("GPU reset not supported");
            } else {
                tracing::debug!("GPU reset disabled");
            }
            return Err(self.wedge());
        };

        let idle = || self.engines.iter().all(|engine| engine.is_idle());
        if wait_for(idle, timeout, WaitMode::Sleep).is_err() {
            tracing::error!("GPU hang did not clear within {timeout:?}");
            return Err(self.wedge());
        }

        tracing::info!("GPU hang cleared without a reset");
        Ok(())
    }

    fn wedge(&self) -> ResetError {
        self.set_wedged();
        ResetError::Wedged
    }

    fn schedule_restart(&self) {
        if self.restart_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(device) = self.me.upgrade() else {
            self.restart_pending.store(false, Ordering::SeqCst);
            return;
        };

        let spawned = std::thread::Builder::new()
            .name("gtreset-restart".to_string())
            .spawn(move || {
                device.restart_idle_engines();
                device.restart_pending.store(false, Ordering::SeqCst);
            });

        match spawned {
            Ok(handle) => {
                let previous = lock(&self.restart).replace(handle);
                if let Some(previous) = previous {
                    if previous.join().is_err() {
                        tracing::warn!("{}: restart job panicked", self.platform);
                    }
                }
            }
            Err(err) => {
                tracing::warn!("Failed to start restart job: {err}");
                self.restart_pending.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Gives every idle engine a request from the kernel context, so that
    /// each one has a known context loaded after the reset.
    fn restart_idle_engines(&self) {
        for engine in self.engines.iter() {
            if !engine.is_idle() {
                continue;
            }
            if let Err(err) = self.submit(engine.id(), &self.kernel_context) {
                tracing::debug!("{}: restart submission failed: {err}", engine.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use gtreset_core::Platform;
    use gtreset_hw::SimHardware;

    use super::*;
    use crate::config::ResetPolicy;
    use crate::error::FenceError;
    use crate::request::{Client, Context, RequestState};

    fn fast_policy() -> ResetPolicy {
        ResetPolicy {
            retry_delay_ms: 1,
            ack_timeout_us: 2_000,
            ready_timeout_us: 2_000,
            unwedge_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    fn device(platform: Platform, policy: ResetPolicy) -> (Arc<SimHardware>, Arc<Device>) {
        let hw = Arc::new(SimHardware::new(platform));
        let device = Device::new(platform, hw.clone(), policy);
        (hw, device)
    }

    #[test]
    fn test_engine_reset_blames_active_request() {
        let (hw, device) = device(Platform::Skylake, fast_policy());
        let context = Context::new(&Client::new("client"), "ctx");
        let hung = device.submit(EngineId::Rcs0, &context).unwrap();
        let next = device.submit(EngineId::Rcs0, &context).unwrap();

        let report = device
            .handle_error(EngineId::Rcs0.into(), false, "hang on rcs0")
            .unwrap();

        assert_eq!(report.outcome, ResetOutcome::EngineReset);
        assert_eq!(report.engines_reset, EngineId::Rcs0.into());
        assert!(report.escalated.is_empty());
        assert_eq!(hung.wait(Duration::ZERO), Err(FenceError::Io));
        assert_eq!(next.state(), RequestState::Submitted);
        assert_eq!(next.error(), None);
        assert_eq!(device.engine(EngineId::Rcs0).unwrap().reset_count(), 1);
        assert_eq!(device.reset_count(), 0);
        assert_eq!(hw.reset_requests(), 1);
    }

    #[test]
    fn test_idle_engine_is_left_alone() {
        let (hw, device) = device(Platform::Skylake, fast_policy());

        let report = device.handle_error(EngineMask::ALL, false, "spurious").unwrap();
        assert_eq!(report.outcome, ResetOutcome::Nothing);
        assert_eq!(hw.reset_requests(), 0);
    }

    #[test]
    fn test_failed_engine_reset_escalates() {
        let (hw, device) = device(Platform::Skylake, fast_policy());
        let context = Context::new(&Client::new("client"), "ctx");
        let hung = device.submit(EngineId::Vcs0, &context).unwrap();
        hw.inject_not_ready(EngineId::Vcs0, 1);

        let report = device
            .handle_error(EngineId::Vcs0.into(), false, "hang on vcs0")
            .unwrap();
        device.flush_restart();

        assert_eq!(report.outcome, ResetOutcome::FullReset);
        assert_eq!(report.escalated, EngineId::Vcs0.into());
        assert_eq!(report.hw_attempts, 1);
        assert_eq!(hung.wait(Duration::ZERO), Err(FenceError::Io));
        assert_eq!(context.guilty_count(), 1);
        assert_eq!(device.reset_count(), 1);
        assert!(device.engine_reset_failed().is_empty());
        assert!(!device.is_wedged());
    }

    #[test]
    fn test_reset_retries_then_wedges() {
        let policy = ResetPolicy {
            reset_level: 1,
            ..fast_policy()
        };
        let (hw, device) = device(Platform::Skylake, policy);
        let events = device.notifications().channel();
        let context = Context::new(&Client::new("client"), "ctx");
        let rq = device.submit(EngineId::Bcs0, &context).unwrap();
        hw.inject_ack_timeouts(16);

        let report = device
            .handle_error(EngineId::Bcs0.into(), false, "hang on bcs0")
            .unwrap();

        assert_eq!(report.outcome, ResetOutcome::Wedged);
        assert_eq!(report.hw_attempts, 3);
        assert!(device.is_wedged());
        assert!(device.is_tainted());
        assert_eq!(rq.wait(Duration::ZERO), Err(FenceError::Io));

        let events: Vec<ResetEvent> = events.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ResetEvent::ErrorDetected {
                    reason: "hang on bcs0".to_string()
                },
                ResetEvent::ResetStarting,
                ResetEvent::Wedged,
            ]
        );
    }

    #[test]
    fn test_no_reset_available_wedges_without_taint() {
        let (_hw, device) = device(Platform::I830, fast_policy());
        let context = Context::new(&Client::new("client"), "ctx");
        device.submit(EngineId::Rcs0, &context).unwrap();

        assert!(!device.is_reset_supported());
        let report = device.handle_error(EngineMask::ALL, false, "hang").unwrap();
        assert_eq!(report.outcome, ResetOutcome::Wedged);
        assert!(!device.is_tainted());
    }

    #[test]
    fn test_hang_clears_on_its_own() {
        let policy = ResetPolicy {
            hang_clear_timeout_ms: Some(5_000),
            ..fast_policy()
        };
        let (_hw, device) = device(Platform::I830, policy);
        let context = Context::new(&Client::new("client"), "ctx");
        let rq = device.submit(EngineId::Rcs0, &context).unwrap();

        let finisher = {
            let device = device.clone();
            let seqno = rq.seqno().unwrap();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                device.engine(EngineId::Rcs0).unwrap().complete_through(seqno);
            })
        };

        let report = device.handle_error(EngineMask::ALL, false, "hang").unwrap();
        finisher.join().unwrap();
        device.flush_restart();

        assert_eq!(report.outcome, ResetOutcome::FullReset);
        assert_eq!(rq.wait(Duration::ZERO), Ok(()));
        assert!(!device.is_wedged());
    }

    #[test]
    fn test_back_to_back_restart_jobs() {
        let (_hw, device) = device(Platform::Broadwell, fast_policy());

        for _ in 0..5 {
            device.full_reset(EngineMask::EMPTY, "resume").unwrap();
        }
        device.flush_restart();

        assert!(lock(&device.restart).is_none());
        assert!(!device.restart_pending.load(Ordering::SeqCst));
        for engine in device.engines() {
            let last = engine.last_request().unwrap();
            assert!(Arc::ptr_eq(last.context(), device.kernel_context()));
        }
    }

    #[test]
    fn test_recovery_disabled() {
        let (_hw, device) = device(Platform::Skylake, fast_policy());
        device.set_recovery_allowed(false);
        assert!(matches!(
            device.handle_error(EngineMask::ALL, false, "hang"),
            Err(ResetError::RecoveryDisabled)
        ));
    }

    #[test]
    fn test_single_engine_reset_busy() {
        let (_hw, device) = device(Platform::Skylake, fast_policy());
        assert!(device.flags.try_acquire_engine_reset(EngineId::Rcs0));

        assert!(matches!(
            device.reset_single_engine(EngineId::Rcs0, "timeout"),
            Err(ResetError::Busy {
                engine: EngineId::Rcs0
            })
        ));
        device.flags.release_engine_reset(EngineId::Rcs0);
        assert!(device.reset_single_engine(EngineId::Rcs0, "timeout").is_ok());
    }

    #[test]
    fn test_single_engine_reset_unsupported() {
        let (_hw, device) = device(Platform::Haswell, fast_policy());
        assert!(!device.is_engine_reset_supported());
        assert!(matches!(
            device.reset_single_engine(EngineId::Rcs0, "timeout"),
            Err(ResetError::Hardware(HwResetError::Unsupported))
        ));
    }

    #[test]
    fn test_loser_waits_for_full_reset() {
        let policy = ResetPolicy {
            reset_level: 1,
            ..fast_policy()
        };
        let (hw, device) = device(Platform::Skylake, policy);
        let context = Context::new(&Client::new("client"), "ctx");
        device.submit(EngineId::Rcs0, &context).unwrap();

        assert!(device.flags.try_acquire_full_reset());
        let loser = {
            let device = device.clone();
            std::thread::spawn(move || {
                device
                    .handle_error(EngineId::Rcs0.into(), false, "hang")
                    .unwrap()
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(!loser.is_finished());
        device.flags.release_full_reset();

        let report = loser.join().unwrap();
        assert_eq!(report.outcome, ResetOutcome::Deferred);
        assert_eq!(hw.reset_requests(), 0);
        assert_eq!(device.reset_count(), 0);
    }
}
