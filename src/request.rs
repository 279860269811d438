// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Submitted work and the parties it is accounted to.
//!
//! Requests, contexts and clients are owned by the submission layers; the
//! recovery engine only reads them, scores them and moves requests into their
//! terminal states.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use gtreset_core::EngineId;
use serde::Serialize;

use crate::error::FenceError;
use crate::lock;

fn saturating_add(counter: &AtomicU32, value: u32) -> u32 {
    let previous = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |score| {
            Some(score.saturating_add(value))
        })
        .unwrap_or_else(|score| score);
    previous.saturating_add(value)
}

/// Owner of one or more contexts, usually one open file.
#[derive(Debug)]
pub struct Client {
    name: String,
    ban_score: AtomicU32,
    hang_timestamp: Mutex<Option<Instant>>,
}

impl Client {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            ban_score: AtomicU32::new(0),
            hang_timestamp: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ban_score(&self) -> u32 {
        self.ban_score.load(Ordering::SeqCst)
    }

    pub(crate) fn add_score(&self, value: u32) -> u32 {
        saturating_add(&self.ban_score, value)
    }

    /// Stamps a hang at `now`; true if the previous one was less than `window`
    /// ago.
    pub(crate) fn record_hang(&self, now: Instant, window: Duration) -> bool {
        let previous = lock(&self.hang_timestamp).replace(now);
        previous
            .map(|previous| now.saturating_duration_since(previous) < window)
            .unwrap_or(false)
    }
}

/// A stream of work submitted by one client.
#[derive(Debug)]
pub struct Context {
    name: String,
    client: Weak<Client>,
    bannable: bool,
    ban_score: AtomicU32,
    guilty_count: AtomicU32,
    active_count: AtomicU32,
    banned: AtomicBool,
}

impl Context {
    fn build(name: String, client: Weak<Client>, bannable: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            client,
            bannable,
            ban_score: AtomicU32::new(0),
            guilty_count: AtomicU32::new(0),
            active_count: AtomicU32::new(0),
            banned: AtomicBool::new(false),
        })
    }

    pub fn new(client: &Arc<Client>, name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), Arc::downgrade(client), true)
    }

    /// A context that is never banned; its client is still penalized for
    /// hangs.
    pub fn unbannable(client: &Arc<Client>, name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), Arc::downgrade(client), false)
    }

    /// The driver's own context, owned by no client.
    pub fn kernel() -> Arc<Self> {
        Self::build("kernel".to_string(), Weak::new(), false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> Option<Arc<Client>> {
        self.client.upgrade()
    }

    pub fn is_bannable(&self) -> bool {
        self.bannable
    }

    pub fn is_banned(&self) -> bool {
        self.banned.load(Ordering::SeqCst)
    }

    pub fn ban_score(&self) -> u32 {
        self.ban_score.load(Ordering::SeqCst)
    }

    pub fn guilty_count(&self) -> u32 {
        self.guilty_count.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> u32 {
        self.active_count.load(Ordering::SeqCst)
    }

    pub(crate) fn add_score(&self, value: u32) -> u32 {
        saturating_add(&self.ban_score, value)
    }

    pub(crate) fn ban(&self) {
        self.banned.store(true, Ordering::SeqCst);
    }

    pub(crate) fn inc_guilty(&self) {
        self.guilty_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn inc_active(&self) {
        self.active_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Waiting on a dependency or on a paused engine.
    Pending,
    /// Handed to the hardware with a sequence number.
    Submitted,
    Completed,
    Skipped,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Skipped)
    }
}

#[derive(Debug)]
struct Fence {
    state: RequestState,
    seqno: Option<u32>,
    ready: bool,
    error: Option<FenceError>,
}

/// One unit of work on one engine timeline.
#[derive(Debug)]
pub struct Request {
    engine: EngineId,
    context: Arc<Context>,
    fence: Mutex<Fence>,
    signalled: Condvar,
}

impl Request {
    pub(crate) fn new(engine: EngineId, context: Arc<Context>, ready: bool) -> Arc<Self> {
        Arc::new(Self {
            engine,
            context,
            fence: Mutex::new(Fence {
                state: RequestState::Pending,
                seqno: None,
                ready,
                error: None,
            }),
            signalled: Condvar::new(),
        })
    }

    pub fn engine(&self) -> EngineId {
        self.engine
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn state(&self) -> RequestState {
        lock(&self.fence).state
    }

    pub fn seqno(&self) -> Option<u32> {
        lock(&self.fence).seqno
    }

    pub fn error(&self) -> Option<FenceError> {
        lock(&self.fence).error
    }

    pub fn is_signalled(&self) -> bool {
        self.state().is_terminal()
    }

    /// Blocks until the request reaches a terminal state.
    pub fn wait(&self, timeout: Duration) -> Result<(), FenceError> {
        let fence = lock(&self.fence);
        let (fence, _) = self
            .signalled
            .wait_timeout_while(fence, timeout, |fence| !fence.state.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);

        if !fence.state.is_terminal() {
            return Err(FenceError::Timeout);
        }
        match fence.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub(crate) fn mark_ready(&self) {
        lock(&self.fence).ready = true;
    }

    pub(crate) fn is_dispatchable(&self) -> bool {
        let fence = lock(&self.fence);
        fence.ready && fence.state == RequestState::Pending
    }

    pub(crate) fn set_error(&self, error: FenceError) {
        let mut fence = lock(&self.fence);
        if !fence.state.is_terminal() {
            fence.error = Some(error);
        }
    }

    pub(crate) fn assign(&self, seqno: u32) {
        let mut fence = lock(&self.fence);
        if fence.state == RequestState::Pending {
            fence.state = RequestState::Submitted;
            fence.seqno = Some(seqno);
        }
    }

    fn signal(&self, state: RequestState, error: Option<FenceError>) -> bool {
        let mut fence = lock(&self.fence);
        if fence.state.is_terminal() {
            return false;
        }
        fence.state = state;
        if error.is_some() {
            fence.error = error;
        }
        drop(fence);

        self.signalled.notify_all();
        true
    }

    pub(crate) fn complete(&self) -> bool {
        self.signal(RequestState::Completed, None)
    }

    pub(crate) fn skip(&self, error: FenceError) -> bool {
        self.signal(RequestState::Skipped, Some(error))
    }
}
