// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gtreset_core::{EngineClass, EngineId};
use serde::Serialize;

use crate::error::FenceError;
use crate::lock;
use crate::request::{Request, RequestState};

/// What happens to a request once it is ready to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Assign a sequence number and hand it to the hardware.
    Normal,
    /// Engine is being reset; hold on to the request until it is finished.
    Paused,
    /// Device is being wedged; fail the request but leave it outstanding.
    Nop,
    /// Device is wedged; fail and complete the request immediately.
    NopComplete,
}

pub(crate) struct Timeline {
    pub(crate) requests: VecDeque<Arc<Request>>,
    next_seqno: u32,
    last: Option<Arc<Request>>,
    mode: SubmitMode,
}

impl Timeline {
    fn last_seqno(&self) -> u32 {
        self.next_seqno - 1
    }
}

pub struct Engine {
    id: EngineId,
    timeline: Mutex<Timeline>,
    hw_seqno: AtomicU32,
    reset_count: AtomicU64,
    retired: Condvar,
}

impl Engine {
    pub(crate) fn new(id: EngineId) -> Self {
        Self {
            id,
            timeline: Mutex::new(Timeline {
                requests: VecDeque::new(),
                next_seqno: 1,
                last: None,
                mode: SubmitMode::Normal,
            }),
            hw_seqno: AtomicU32::new(0),
            reset_count: AtomicU64::new(0),
            retired: Condvar::new(),
        }
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    pub fn class(&self) -> EngineClass {
        self.id.class()
    }

    /// Last sequence number the hardware reported as complete.
    pub fn hw_seqno(&self) -> u32 {
        self.hw_seqno.load(Ordering::SeqCst)
    }

    /// Last sequence number handed out on this timeline.
    pub fn last_seqno(&self) -> u32 {
        self.timeline().last_seqno()
    }

    pub fn reset_count(&self) -> u64 {
        self.reset_count.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> SubmitMode {
        self.timeline().mode
    }

    /// The oldest request the hardware is still working on.
    pub fn active_request(&self) -> Option<Arc<Request>> {
        self.timeline()
            .requests
            .iter()
            .filter(|rq| rq.state() == RequestState::Submitted)
            .min_by_key(|rq| rq.seqno())
            .cloned()
    }

    pub fn is_idle(&self) -> bool {
        !self
            .timeline()
            .requests
            .iter()
            .any(|rq| rq.state() == RequestState::Submitted)
    }

    /// Number of requests not yet retired from the timeline.
    pub fn outstanding(&self) -> usize {
        self.timeline().requests.len()
    }

    /// Hands a request whose dependencies have signalled to the engine.
    pub fn release(&self, rq: &Arc<Request>) {
        rq.mark_ready();
        let mut timeline = self.timeline();
        self.dispatch_ready(&mut timeline);
        self.retire(&mut timeline);
    }

    /// Breadcrumb write: everything up to and including `seqno` has finished.
    pub fn complete_through(&self, seqno: u32) {
        self.hw_seqno.fetch_max(seqno, Ordering::SeqCst);

        let mut timeline = self.timeline();
        for rq in timeline.requests.iter() {
            if rq.state() == RequestState::Submitted
                && rq.seqno().map(|s| s <= seqno).unwrap_or(false)
            {
                rq.complete();
            }
        }
        self.retire(&mut timeline);
    }

    /// Blocks until no submitted work is left, or `timeout` passes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let timeline = self.timeline();
        let (timeline, _) = self
            .retired
            .wait_timeout_while(timeline, timeout, |timeline| {
                timeline
                    .requests
                    .iter()
                    .any(|rq| rq.state() == RequestState::Submitted)
            })
            .unwrap_or_else(PoisonError::into_inner);

        !timeline
            .requests
            .iter()
            .any(|rq| rq.state() == RequestState::Submitted)
    }

    pub(crate) fn timeline(&self) -> MutexGuard<'_, Timeline> {
        lock(&self.timeline)
    }

    pub(crate) fn submit(&self, rq: Arc<Request>) {
        let mut timeline = self.timeline();
        timeline.last = Some(rq.clone());
        timeline.requests.push_back(rq);
        self.dispatch_ready(&mut timeline);
        self.retire(&mut timeline);
    }

    pub(crate) fn last_request(&self) -> Option<Arc<Request>> {
        self.timeline().last.clone()
    }

    pub(crate) fn bump_reset_count(&self) {
        self.reset_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn advance_hw_seqno(&self, seqno: u32) {
        self.hw_seqno.fetch_max(seqno, Ordering::SeqCst);
    }

    pub(crate) fn set_mode(&self, mode: SubmitMode) {
        self.timeline().mode = mode;
    }

    /// Stops handing out work until [`Engine::resume`].
    pub(crate) fn pause(&self) {
        self.set_mode(SubmitMode::Paused);
    }

    /// Restores submission and flushes whatever became ready while paused.
    pub(crate) fn resume(&self, wedged: bool) {
        let mut timeline = self.timeline();
        timeline.mode = if wedged {
            SubmitMode::NopComplete
        } else {
            SubmitMode::Normal
        };
        self.dispatch_ready(&mut timeline);
        self.retire(&mut timeline);
    }

    /// Fails every outstanding request with [`FenceError::Io`], rolls the
    /// breadcrumb forward past all of them and switches to
    /// [`SubmitMode::NopComplete`] so that later arrivals fail straight away.
    pub(crate) fn cancel_requests(&self) {
        let mut timeline = self.timeline();
        timeline.mode = SubmitMode::NopComplete;
        for rq in timeline.requests.iter() {
            rq.set_error(FenceError::Io);
            rq.complete();
        }
        self.hw_seqno
            .fetch_max(timeline.last_seqno(), Ordering::SeqCst);
        self.retire(&mut timeline);
    }

    fn dispatch_ready(&self, timeline: &mut Timeline) {
        let mode = timeline.mode;
        if mode == SubmitMode::Paused {
            return;
        }

        let ready: Vec<Arc<Request>> = timeline
            .requests
            .iter()
            .filter(|rq| rq.is_dispatchable())
            .cloned()
            .collect();
        for rq in ready {
            let seqno = timeline.next_seqno;
            timeline.next_seqno += 1;

            if mode != SubmitMode::Normal {
                rq.set_error(FenceError::Io);
            }
            rq.assign(seqno);
            if mode == SubmitMode::NopComplete {
                self.hw_seqno.fetch_max(seqno, Ordering::SeqCst);
                rq.complete();
            }
        }
    }

    fn retire(&self, timeline: &mut Timeline) {
        while timeline
            .requests
            .front()
            .map(|rq| rq.is_signalled())
            .unwrap_or(false)
        {
            timeline.requests.pop_front();
        }
        self.retired.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Context;

    fn request(engine: &Engine, ready: bool) -> Arc<Request> {
        let rq = Request::new(engine.id(), Context::kernel(), ready);
        engine.submit(rq.clone());
        rq
    }

    #[test]
    fn test_submit_and_retire() {
        let engine = Engine::new(EngineId::Rcs0);
        let first = request(&engine, true);
        let second = request(&engine, true);

        assert_eq!(first.seqno(), Some(1));
        assert_eq!(second.seqno(), Some(2));
        assert_eq!(engine.active_request().unwrap().seqno(), Some(1));

        engine.complete_through(1);
        assert_eq!(first.state(), RequestState::Completed);
        assert_eq!(engine.active_request().unwrap().seqno(), Some(2));
        assert_eq!(engine.outstanding(), 1);

        engine.complete_through(2);
        assert!(engine.is_idle());
        assert!(engine.wait_idle(Duration::ZERO));
        assert_eq!(engine.hw_seqno(), 2);
    }

    #[test]
    fn test_paused_engine_holds_requests() {
        let engine = Engine::new(EngineId::Vcs0);
        engine.pause();
        let rq = request(&engine, true);
        assert_eq!(rq.state(), RequestState::Pending);

        engine.resume(false);
        assert_eq!(rq.state(), RequestState::Submitted);
        assert_eq!(engine.mode(), SubmitMode::Normal);
    }

    #[test]
    fn test_deferred_release() {
        let engine = Engine::new(EngineId::Bcs0);
        let deferred = request(&engine, false);
        let ready = request(&engine, true);

        assert_eq!(deferred.state(), RequestState::Pending);
        assert_eq!(ready.seqno(), Some(1));

        engine.release(&deferred);
        assert_eq!(deferred.seqno(), Some(2));
    }

    #[test]
    fn test_cancel_requests() {
        let engine = Engine::new(EngineId::Rcs0);
        let submitted = request(&engine, true);
        let deferred = request(&engine, false);

        engine.cancel_requests();
        assert_eq!(submitted.wait(Duration::ZERO), Err(FenceError::Io));
        assert_eq!(deferred.wait(Duration::ZERO), Err(FenceError::Io));
        assert_eq!(engine.outstanding(), 0);
        assert_eq!(engine.hw_seqno(), 1);

        let late = request(&engine, true);
        assert_eq!(late.wait(Duration::ZERO), Err(FenceError::Io));
        assert!(engine.is_idle());
    }

    #[test]
    fn test_nop_complete_mode() {
        let engine = Engine::new(EngineId::Rcs0);
        engine.set_mode(SubmitMode::NopComplete);
        let rq = request(&engine, true);
        assert_eq!(rq.state(), RequestState::Completed);
        assert_eq!(rq.error(), Some(FenceError::Io));
        assert!(engine.is_idle());
    }
}
