// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use gtreset_hw::{regs, ring, WaitMode};

use crate::device::Device;
use crate::engine::Engine;
use crate::forcewake::ForcewakeGuard;
use crate::request::Request;

/// An engine stopped for reset.
///
/// Holds the power domain awake until it is handed back to
/// [`EngineController::finish`], or dropped on an error path.
pub struct PreparedEngine<'a> {
    engine: &'a Engine,
    head: u32,
    active: Option<Arc<Request>>,
    _forcewake: ForcewakeGuard<'a>,
}

impl<'a> PreparedEngine<'a> {
    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    /// The request that was executing when the engine was stopped.
    pub fn active(&self) -> Option<&Arc<Request>> {
        self.active.as_ref()
    }
}

/// Stop, reset and restart of a single engine.
pub struct EngineController<'a> {
    device: &'a Device,
}

impl<'a> EngineController<'a> {
    pub fn new(device: &'a Device) -> Self {
        Self { device }
    }

    pub fn prepare(&self, engine: &'a Engine, mode: WaitMode) -> PreparedEngine<'a> {
        let forcewake = self.device.forcewake().get();
        engine.pause();

        let hw = self.device.hardware();
        let head = hw.read32(regs::ring_head(engine.id()));
        if ring::stop(hw, engine.id(), self.device.policy().stop_timeout(), mode).is_err() {
            // Carry on regardless, leaving one engine out would hang the rest
            tracing::warn!("{}: timed out on STOP_RING, resetting anyway", engine.name());
        }

        PreparedEngine {
            engine,
            head,
            active: engine.active_request(),
            _forcewake: forcewake,
        }
    }

    /// Settles the interrupted request and reprograms the engine.
    pub fn reset(&self, prepared: &PreparedEngine<'_>, stalled: bool) {
        let engine = prepared.engine;

        if let Some(rq) = prepared.active.as_ref().filter(|rq| !rq.is_signalled()) {
            let timeline = engine.timeline();
            self.device.scorer().reset_request(&timeline, rq, stalled);
            drop(timeline);

            if stalled {
                // The hung request will never write its own breadcrumb
                if let Some(seqno) = rq.seqno() {
                    engine.advance_hw_seqno(seqno);
                }
            }
        }

        let hw = self.device.hardware();
        match self.device.capability.op() {
            Some(op) => op.reprogram_engine(hw, engine.id(), prepared.head),
            None => ring::reprogram(hw, engine.id(), prepared.head),
        }
    }

    /// Lets the engine accept work again and releases the power domain.
    pub fn finish(&self, prepared: PreparedEngine<'_>) {
        prepared.engine.resume(self.device.is_wedged());
    }
}
