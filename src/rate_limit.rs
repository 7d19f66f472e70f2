//! IP-keyed minimum-gap rate limiter (process local).
//!
//! Every observed request stamps its IP with "now", then the previous stamp
//! decides admission: inside the gap means denied. Because the stamp updates
//! unconditionally, rapid repeats keep resetting the window; this is a fixed
//! min-gap limiter, not a token bucket.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use tracing::warn;

use crate::totp::unix_now;

/// Entries untouched for this long are purged.
pub const PURGE_WINDOW_SECS: u64 = 60;
/// Cap on the recently-limited-IPs set kept for deduplicated logging.
pub const LIMITED_LOG_CAP: usize = 250;

/// Arrival-ordered set of IPs that have been denied at least once, so each
/// offender produces a single log line rather than one per rejected request.
#[derive(Default)]
struct LimitedIpLog {
    order: VecDeque<String>,
    present: HashSet<String>,
}

pub struct RateLimiter {
    last_seen: DashMap<String, u64>,
    /// Epoch seconds of the last cleanup. A compare-and-swap here picks the
    /// single caller that runs cleanup per window, keeping the admit path
    /// lock-free for everyone else.
    last_cleared: AtomicU64,
    limited: Mutex<LimitedIpLog>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            last_seen: DashMap::new(),
            last_cleared: AtomicU64::new(unix_now()),
            limited: Mutex::new(LimitedIpLog::default()),
        }
    }

    /// Returns true if admitted. `route_key` only labels the log line.
    pub fn admit(&self, ip: &str, route_key: &str, min_interval_secs: u64) -> bool {
        self.admit_at(ip, route_key, min_interval_secs, unix_now())
    }

    pub fn admit_at(&self, ip: &str, route_key: &str, min_interval_secs: u64, now: u64) -> bool {
        let prev = self.last_seen.insert(ip.to_string(), now);
        self.maybe_purge(now);

        match prev {
            None => true,
            Some(last) if last + min_interval_secs < now => true,
            Some(_) => {
                self.note_limited(ip, route_key);
                false
            }
        }
    }

    fn maybe_purge(&self, now: u64) {
        let last = self.last_cleared.load(Ordering::Acquire);
        if last + PURGE_WINDOW_SECS >= now {
            return;
        }
        if self
            .last_cleared
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            // Another caller won this window.
            return;
        }

        let cutoff = now.saturating_sub(PURGE_WINDOW_SECS);
        self.last_seen.retain(|_, seen| *seen >= cutoff);

        let mut log = self.limited.lock().unwrap();
        while log.present.len() > LIMITED_LOG_CAP {
            let Some(ip) = log.order.pop_front() else { break };
            log.present.remove(&ip);
        }
    }

    fn note_limited(&self, ip: &str, route_key: &str) {
        let mut log = self.limited.lock().unwrap();
        if log.present.insert(ip.to_string()) {
            log.order.push_back(ip.to_string());
            warn!(%ip, route = route_key, "rate limited");
        }
    }

    /// Test introspection.
    pub fn tracked_ips(&self) -> usize {
        self.last_seen.len()
    }

    pub fn limited_ips(&self) -> usize {
        self.limited.lock().unwrap().present.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
