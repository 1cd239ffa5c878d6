// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Per-client, per-event token buckets over a one-second window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What to do when an event exceeds its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitAction {
    /// Reply with a `WS_RATE_LIMITED` error.
    Reject,
    /// Drop the event silently (resize storms are expected).
    Drop,
}

/// Budget for one event name.
#[derive(Debug, Clone, Copy)]
pub struct Limit {
    pub per_second: u32,
    pub action: LimitAction,
}

/// The rate-limit table. Events not listed are unlimited.
pub fn limit_for(event: &str) -> Option<Limit> {
    match event {
        "terminal:input" => Some(Limit { per_second: 1000, action: LimitAction::Reject }),
        "terminal:resize" | "ssh:resize" => {
            Some(Limit { per_second: 10, action: LimitAction::Drop })
        }
        "ssh:input" => Some(Limit { per_second: 100, action: LimitAction::Reject }),
        _ => None,
    }
}

struct Bucket {
    window_start: Instant,
    count: u32,
}

/// One client's buckets, keyed by event name.
#[derive(Default)]
pub struct RateBuckets {
    buckets: HashMap<String, Bucket>,
}

/// Outcome of admitting one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected,
    Dropped,
}

const WINDOW: Duration = Duration::from_secs(1);

impl RateBuckets {
    /// Count the event against its bucket.
    pub fn admit(&mut self, event: &str) -> Admission {
        let Some(limit) = limit_for(event) else {
            return Admission::Allowed;
        };

        let now = Instant::now();
        let bucket = self
            .buckets
            .entry(event.to_owned())
            .or_insert(Bucket { window_start: now, count: 0 });

        if now.duration_since(bucket.window_start) >= WINDOW {
            bucket.window_start = now;
            bucket.count = 0;
        }

        bucket.count += 1;
        if bucket.count <= limit.per_second {
            Admission::Allowed
        } else {
            match limit.action {
                LimitAction::Reject => Admission::Rejected,
                LimitAction::Drop => Admission::Dropped,
            }
        }
    }
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;
