// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::device::Device;

/// Wedges the device unless it is disarmed within `timeout`.
///
/// The timer thread holds no reset bit, so it can always make progress even
/// when the pass it is guarding is stuck holding them. Dropping the watchdog
/// disarms it and waits for an expiry that is already running.
pub struct WedgeWatchdog {
    cancel: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WedgeWatchdog {
    pub fn arm(device: Arc<Device>, timeout: Duration, name: &str) -> Self {
        let (cancel, expired) = mpsc::channel::<()>();
        let name = name.to_string();

        let thread = std::thread::Builder::new()
            .name("gtreset-watchdog".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = expired.recv_timeout(timeout) {
                    tracing::error!("{name} timed out, cancelling all in-flight rendering.");
                    device.set_wedged();
                }
            });

        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(err) => {
                tracing::warn!("Failed to start wedge watchdog: {err}");
                None
            }
        };

        Self {
            cancel: Some(cancel),
            thread,
        }
    }

    pub fn disarm(self) {}
}

impl Drop for WedgeWatchdog {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("wedge watchdog panicked");
            }
        }
    }
}
