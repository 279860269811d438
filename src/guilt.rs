// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Blame for hangs.
//!
//! The request executing when an engine hung is guilty; everything else
//! caught up in the reset is innocent and gets replayed. Guilty contexts
//! accumulate a ban score and their client is penalized on top when it keeps
//! producing hangs in quick succession.

use std::sync::Arc;
use std::time::Instant;

use crate::config::BanPolicy;
use crate::engine::Timeline;
use crate::error::FenceError;
use crate::request::{Client, Context, Request};

pub struct GuiltScorer {
    policy: BanPolicy,
}

impl GuiltScorer {
    pub fn new(policy: BanPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &BanPolicy {
        &self.policy
    }

    /// Scores a hang against `context`, returns true if it is now banned.
    pub fn mark_guilty(&self, context: &Context) -> bool {
        context.inc_guilty();

        let banned = if context.is_bannable() {
            let score = context.add_score(self.policy.guilty_penalty);
            let banned = score >= self.policy.ban_threshold;
            tracing::debug!(
                "context {}: guilty {}, score {score}, banned? {}",
                context.name(),
                context.guilty_count(),
                if banned { "yes" } else { "no" }
            );
            if banned {
                context.ban();
            }
            banned
        } else {
            false
        };

        if let Some(client) = context.client() {
            self.client_mark_guilty(&client, banned);
        }

        banned
    }

    pub fn mark_innocent(&self, context: &Context) {
        context.inc_active();
    }

    /// Whether `client` may still submit work.
    pub fn is_client_banned(&self, client: &Client) -> bool {
        client.ban_score() >= self.policy.client_ban_threshold
    }

    fn client_mark_guilty(&self, client: &Client, context_banned: bool) {
        let mut score = 0;
        if context_banned {
            score += self.policy.client_context_ban_penalty;
        }
        if client.record_hang(Instant::now(), self.policy.client_fast_hang_window()) {
            score += self.policy.client_fast_hang_penalty;
        }

        if score > 0 {
            let banned = client.add_score(score) >= self.policy.client_ban_threshold;
            tracing::debug!(
                "client {} has been banned? {}",
                client.name(),
                if banned { "yes" } else { "no" }
            );
        }
    }

    /// Settles the request that was running when its engine was reset.
    ///
    /// Must be called with `timeline` locked, as a ban cascades to every other
    /// request of the same context on it. Returns whether the context ended up
    /// banned.
    pub(crate) fn reset_request(
        &self,
        timeline: &Timeline,
        rq: &Arc<Request>,
        guilty: bool,
    ) -> bool {
        let context = rq.context();

        if !guilty {
            rq.set_error(FenceError::Again);
            self.mark_innocent(context);
            return false;
        }

        rq.skip(FenceError::Io);
        let was_banned = context.is_banned();
        let banned = self.mark_guilty(context);
        if banned && !was_banned {
            skip_context(timeline, context);
        }
        banned
    }
}

fn skip_context(timeline: &Timeline, context: &Arc<Context>) {
    let mut skipped = 0;
    for rq in timeline.requests.iter() {
        if Arc::ptr_eq(rq.context(), context) && rq.skip(FenceError::Io) {
            skipped += 1;
        }
    }
    tracing::debug!("context {}: skipped {skipped} queued requests", context.name());
}
