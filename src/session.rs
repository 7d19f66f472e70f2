//! In-memory session token registry.
//!
//! Tokens are opaque bearer strings mapped to (identity, issuance time).
//! Expiry is lazy: every validation first sweeps the whole table. That pass
//! is O(n) per check, which is fine for the tens-to-hundreds of concurrent
//! sessions this serves; there is no guaranteed upper bound on how long an
//! expired entry lingers between lookups.
//!
//! A token's lifetime is judged against the identity's CURRENT ttl (updated
//! at each issuance), not a value frozen on the token, so re-provisioning an
//! identity with a shorter ttl retroactively shortens outstanding sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use tracing::info;
use uuid::Uuid;

use crate::totp::unix_now;

/// Emit one sweep summary per this many cumulative evictions.
const SWEEP_REPORT_EVERY: u64 = 40;

struct TokenInfo {
    id: String,
    issued_at: u64,
}

pub struct SessionRegistry {
    tokens: RwLock<HashMap<String, TokenInfo>>,
    /// Identity -> ttl seconds, as of that identity's latest issuance.
    ttls: RwLock<HashMap<String, u64>>,
    default_ttl: u64,
    evicted_since_report: AtomicU64,
    evicted_total: AtomicU64,
    started: Instant,
}

impl SessionRegistry {
    pub fn new(default_ttl: u64) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            ttls: RwLock::new(HashMap::new()),
            default_ttl,
            evicted_since_report: AtomicU64::new(0),
            evicted_total: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Issues a fresh token for `id` and records `ttl_secs` as the identity's
    /// current ttl. Two v4 UUIDs back the token (244 random bits).
    pub fn issue(&self, id: &str, ttl_secs: u64) -> String {
        self.issue_at(id, ttl_secs, unix_now())
    }

    pub fn issue_at(&self, id: &str, ttl_secs: u64, now: u64) -> String {
        let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        self.ttls.write().unwrap().insert(id.to_string(), ttl_secs);
        self.tokens.write().unwrap().insert(
            token.clone(),
            TokenInfo { id: id.to_string(), issued_at: now },
        );
        token
    }

    /// True iff the token exists, is unexpired against its identity's current
    /// ttl, and its identity is one of `expected_ids` (callers split comma
    /// lists). Expired entries found along the way are removed.
    pub fn validate(&self, token: &str, expected_ids: &[&str]) -> bool {
        self.validate_at(token, expected_ids, unix_now())
    }

    pub fn validate_at(&self, token: &str, expected_ids: &[&str], now: u64) -> bool {
        self.sweep_expired_at(now);
        let mut tokens = self.tokens.write().unwrap();
        let Some(info) = tokens.get(token) else {
            return false;
        };
        if self.expired(info, now) {
            tokens.remove(token);
            return false;
        }
        expected_ids.iter().any(|candidate| *candidate == info.id)
    }

    /// Explicit logout of a single token.
    pub fn revoke(&self, token: &str) {
        self.tokens.write().unwrap().remove(token);
    }

    /// Drops every token owned by `id`. Used on identity deletion and for
    /// admin mass logout; visible to `validate` before this returns.
    pub fn revoke_all_for(&self, id: &str) {
        self.tokens.write().unwrap().retain(|_, info| info.id != id);
    }

    /// Drops everything (reload-with-logout).
    pub fn clear(&self) {
        self.tokens.write().unwrap().clear();
    }

    /// Full-table eviction of expired entries.
    pub fn sweep_expired(&self) {
        self.sweep_expired_at(unix_now());
    }

    fn sweep_expired_at(&self, now: u64) {
        let mut tokens = self.tokens.write().unwrap();
        let before = tokens.len();
        tokens.retain(|_, info| !self.expired(info, now));
        let removed = (before - tokens.len()) as u64;
        drop(tokens);

        if removed == 0 {
            return;
        }
        let total = self.evicted_total.fetch_add(removed, Ordering::Relaxed) + removed;
        let since = self.evicted_since_report.fetch_add(removed, Ordering::Relaxed) + removed;
        if since >= SWEEP_REPORT_EVERY {
            self.evicted_since_report.store(0, Ordering::Relaxed);
            info!(
                removed = since,
                lifetime_total = total,
                uptime_secs = self.started.elapsed().as_secs(),
                "swept expired session tokens"
            );
        }
    }

    fn expired(&self, info: &TokenInfo, now: u64) -> bool {
        let ttl = self
            .ttls
            .read()
            .unwrap()
            .get(&info.id)
            .copied()
            .unwrap_or(self.default_ttl);
        now.saturating_sub(info.issued_at) >= ttl
    }

    /// Test introspection.
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.read().unwrap().contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
