// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

use gtreset_core::HwResetError;

use crate::Hardware;

/// How a bounded wait spends its time.
///
/// A single call path uses one of these throughout; single engine resets may
/// run where sleeping is not allowed and always use [`WaitMode::Atomic`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitMode {
    /// Spin on the condition, never yield the thread.
    Atomic,
    /// Poll with short, growing sleeps between checks.
    Sleep,
}

const MIN_BACKOFF: Duration = Duration::from_micros(10);
const MAX_BACKOFF: Duration = Duration::from_millis(1);

/// Polls `cond` until it holds or `timeout` elapses.
///
/// The condition is checked once more after the deadline so that a slow
/// scheduler cannot turn a success into a timeout.
pub fn wait_for(
    mut cond: impl FnMut() -> bool,
    timeout: Duration,
    mode: WaitMode,
) -> Result<(), HwResetError> {
    let start = Instant::now();
    let mut backoff = MIN_BACKOFF;
    loop {
        if cond() {
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return if cond() {
                Ok(())
            } else {
                Err(HwResetError::TimedOut)
            };
        }

        match mode {
            WaitMode::Atomic => std::hint::spin_loop(),
            WaitMode::Sleep => {
                std::thread::sleep(backoff.min(timeout - elapsed));
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// Waits for `(read32(reg) & mask) == value`.
pub fn wait_for_register(
    hw: &dyn Hardware,
    reg: u32,
    mask: u32,
    value: u32,
    timeout: Duration,
    mode: WaitMode,
) -> Result<(), HwResetError> {
    wait_for(|| hw.read32(reg) & mask == value, timeout, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_wait_for_immediate() {
        assert_eq!(
            wait_for(|| true, Duration::ZERO, WaitMode::Atomic),
            Ok(())
        );
    }

    #[test]
    fn test_wait_for_eventually() {
        let polls = Cell::new(0);
        let result = wait_for(
            || {
                polls.set(polls.get() + 1);
                polls.get() > 3
            },
            Duration::from_secs(1),
            WaitMode::Sleep,
        );
        assert_eq!(result, Ok(()));
        assert_eq!(polls.get(), 4);
    }

    #[test]
    fn test_wait_for_timeout() {
        let start = Instant::now();
        let result = wait_for(|| false, Duration::from_millis(5), WaitMode::Sleep);
        assert_eq!(result, Err(HwResetError::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
