// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

/// Lifecycle of a recovery, as seen from outside the device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResetEvent {
    ErrorDetected { reason: String },
    ResetStarting,
    ResetFinished,
    Wedged,
    Unwedged,
}

impl ResetEvent {
    /// Key/value form handed to userspace listeners.
    pub fn uevent(&self) -> &'static str {
        match self {
            ResetEvent::ErrorDetected { .. } => "ERROR=1",
            ResetEvent::ResetStarting => "RESET=1",
            ResetEvent::ResetFinished => "ERROR=0",
            ResetEvent::Wedged => "WEDGED=1",
            ResetEvent::Unwedged => "WEDGED=0",
        }
    }
}

pub trait ResetObserver: Send + Sync {
    fn notify(&self, event: &ResetEvent);
}

/// Forwards every event into a channel.
pub struct ChannelObserver {
    sender: Sender<ResetEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<ResetEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl ResetObserver for ChannelObserver {
    fn notify(&self, event: &ResetEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.sender.send(event.clone());
    }
}

#[derive(Default)]
pub struct NotificationBus {
    observers: RwLock<Vec<Arc<dyn ResetObserver>>>,
}

impl NotificationBus {
    pub fn subscribe(&self, observer: Arc<dyn ResetObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Convenience for [`ChannelObserver`].
    pub fn channel(&self) -> Receiver<ResetEvent> {
        let (observer, receiver) = ChannelObserver::new();
        self.subscribe(Arc::new(observer));
        receiver
    }

    pub fn emit(&self, event: ResetEvent) {
        tracing::debug!("{}", event.uevent());

        // Observers run without the list locked so they may subscribe others
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.notify(&event);
        }
    }
}
