// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

use gtreset_core::EngineId;

use crate::lock;

/// Serializes the single whole device reset.
const BACKOFF: u32 = 0;
/// First of the per-engine reset bits.
const RESET_ENGINE: u32 = 2;
const WEDGED: u32 = 63;

fn bit(nr: u32) -> u64 {
    1 << nr
}

fn engine_bit(engine: EngineId) -> u32 {
    RESET_ENGINE + engine.index() as u32
}

/// The device's reset state word.
///
/// Lock order is the full reset bit, then engine bits in engine order. Engine
/// paths only ever try to take their own bit and never wait while holding it.
pub(crate) struct ResetFlags {
    bits: AtomicU64,
    lock: Mutex<()>,
    queue: Condvar,
}

impl ResetFlags {
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(0),
            lock: Mutex::new(()),
            queue: Condvar::new(),
        }
    }

    fn is_set(&self, nr: u32) -> bool {
        self.bits.load(Ordering::SeqCst) & bit(nr) != 0
    }

    /// Returns true if the bit was clear and is now ours.
    fn test_and_set(&self, nr: u32) -> bool {
        self.bits.fetch_or(bit(nr), Ordering::SeqCst) & bit(nr) == 0
    }

    fn clear_and_wake(&self, nr: u32) {
        self.bits.fetch_and(!bit(nr), Ordering::SeqCst);
        self.wake_all();
    }

    /// Blocks until bit `nr` is clear.
    fn wait_on(&self, nr: u32) {
        let guard = lock(&self.lock);
        let _guard = self
            .queue
            .wait_while(guard, |_| self.is_set(nr))
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn acquire(&self, nr: u32) {
        while !self.test_and_set(nr) {
            self.wait_on(nr);
        }
    }

    pub fn wake_all(&self) {
        // Taking the lock orders this wake-up after any waiter's last check
        drop(lock(&self.lock));
        self.queue.notify_all();
    }

    pub fn try_acquire_full_reset(&self) -> bool {
        self.test_and_set(BACKOFF)
    }

    pub fn acquire_full_reset(&self) {
        self.acquire(BACKOFF)
    }

    pub fn release_full_reset(&self) {
        self.clear_and_wake(BACKOFF)
    }

    pub fn wait_full_reset(&self) {
        self.wait_on(BACKOFF)
    }

    pub fn is_full_reset_in_progress(&self) -> bool {
        self.is_set(BACKOFF)
    }

    pub fn try_acquire_engine_reset(&self, engine: EngineId) -> bool {
        self.test_and_set(engine_bit(engine))
    }

    pub fn acquire_engine_reset(&self, engine: EngineId) {
        self.acquire(engine_bit(engine))
    }

    pub fn release_engine_reset(&self, engine: EngineId) {
        self.clear_and_wake(engine_bit(engine))
    }

    pub fn is_engine_reset_in_progress(&self, engine: EngineId) -> bool {
        self.is_set(engine_bit(engine))
    }

    /// Returns true if the device was already wedged.
    pub fn set_wedged(&self) -> bool {
        !self.test_and_set(WEDGED)
    }

    pub fn clear_wedged(&self) {
        self.bits.fetch_and(!bit(WEDGED), Ordering::SeqCst);
    }

    pub fn is_wedged(&self) -> bool {
        self.is_set(WEDGED)
    }
}
