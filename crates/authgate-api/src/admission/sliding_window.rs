//! Keyed sliding-window log limiter
//!
//! Every admitted request leaves a timestamp in its key's log. A request is
//! admitted while fewer than `limit` timestamps fall inside the trailing
//! window, so there are no bucket edges to burst across.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Idle keys are swept once the table grows past this many entries
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    client: String,
    limit: u32,
    window: Duration,
}

/// Sliding-window counters for many clients
#[derive(Debug, Default)]
pub struct KeyedSlidingWindow {
    logs: Mutex<HashMap<WindowKey, VecDeque<Instant>>>,
}

impl KeyedSlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request for `client` if it fits in the window.
    ///
    /// Counters are kept separately per `(limit, window)` rule. A limit of
    /// zero never admits.
    pub fn try_acquire(&self, client: &str, limit: u32, window: Duration) -> bool {
        self.try_acquire_at(client, limit, window, Instant::now())
    }

    pub(crate) fn try_acquire_at(
        &self,
        client: &str,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> bool {
        if limit == 0 {
            return false;
        }

        let mut logs = self.logs.lock();
        if logs.len() > SWEEP_THRESHOLD {
            logs.retain(|key, log| {
                evict_expired(log, key.window, now);
                !log.is_empty()
            });
        }

        let log = logs
            .entry(WindowKey {
                client: client.to_string(),
                limit,
                window,
            })
            .or_insert_with(|| VecDeque::with_capacity(limit as usize));

        evict_expired(log, window, now);

        if log.len() < limit as usize {
            log.push_back(now);
            true
        } else {
            false
        }
    }
}

fn evict_expired(log: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(front) = log.front() {
        if now.duration_since(*front) >= window {
            log.pop_front();
        } else {
            break;
        }
    }
}
