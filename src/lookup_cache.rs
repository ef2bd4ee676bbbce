//! Failed-lookup cache and diagnostic log limiter
//!
//! Accounts that the venue has just confirmed absent are remembered for a
//! short TTL so repeated reads return defaults without a vendor round-trip.
//! Per-process and advisory only: nothing in the fund path consults it.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::CacheConfig;

/// What was looked up, and for which entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey {
    pub entity: String,
    pub data_type: &'static str,
}

impl LookupKey {
    pub fn new(entity: impl ToString, data_type: &'static str) -> Self {
        Self {
            entity: entity.to_string(),
            data_type,
        }
    }
}

impl std::fmt::Display for LookupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.data_type, self.entity)
    }
}

#[derive(Debug, Clone, Copy)]
struct FailedLookupEntry {
    first_seen: Instant,
    expires_at: Instant,
    occurrences: u32,
}

#[derive(Debug, Clone, Default)]
struct LogWindow {
    /// Instants of the occurrences that were allowed to log
    logged: VecDeque<Instant>,
    suppressed: u32,
}

#[derive(Debug, Clone)]
pub struct FailedLookupCache {
    failures: Arc<DashMap<LookupKey, FailedLookupEntry>>,
    log_windows: Arc<DashMap<LookupKey, LogWindow>>,
    ttl: Duration,
    log_window: Duration,
    max_log_rate: usize,
    log_ceiling: u32,
    max_entries: usize,
}

impl FailedLookupCache {
    pub fn new(config: &CacheConfig) -> Self {
        let ttl = Duration::from_secs(config.failed_lookup_ttl_secs);
        Self {
            failures: Arc::new(DashMap::new()),
            log_windows: Arc::new(DashMap::new()),
            ttl,
            log_window: ttl,
            max_log_rate: config.max_log_rate.max(1) as usize,
            log_ceiling: config.log_ceiling,
            max_entries: config.max_entries.max(1),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&CacheConfig::default())
    }

    pub fn default_ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_log_rate(&self) -> usize {
        self.max_log_rate
    }

    /// False while a non-expired failure sentinel exists for `key`
    pub fn should_call_vendor(&self, key: &LookupKey) -> bool {
        self.should_call_vendor_at(key, Instant::now())
    }

    pub fn should_call_vendor_at(&self, key: &LookupKey, now: Instant) -> bool {
        let expired = match self.failures.get(key) {
            None => return true,
            Some(entry) => now >= entry.expires_at,
        };
        if expired {
            self.failures
                .remove_if(key, |_, entry| now >= entry.expires_at);
        }
        expired
    }

    /// Remember a confirmed miss for `ttl`
    pub fn record_failure(&self, key: &LookupKey, ttl: Duration) {
        self.record_failure_at(key, ttl, Instant::now());
    }

    pub fn record_failure_at(&self, key: &LookupKey, ttl: Duration, now: Instant) {
        if self.failures.len() >= self.max_entries && !self.failures.contains_key(key) {
            self.sweep_expired_at(now);
            if self.failures.len() >= self.max_entries {
                self.evict_soonest_expiring();
            }
        }

        self.failures
            .entry(key.clone())
            .and_modify(|entry| {
                if now >= entry.expires_at {
                    entry.first_seen = now;
                    entry.occurrences = 0;
                }
                entry.expires_at = now + ttl;
                entry.occurrences = entry.occurrences.saturating_add(1);
            })
            .or_insert(FailedLookupEntry {
                first_seen: now,
                expires_at: now + ttl,
                occurrences: 1,
            });
    }

    /// Number of misses recorded since the sentinel was (re)created
    pub fn occurrences(&self, key: &LookupKey) -> u32 {
        self.failures.get(key).map(|e| e.occurrences).unwrap_or(0)
    }

    /// How long ago the current sentinel was first created
    pub fn first_seen_age(&self, key: &LookupKey) -> Option<Duration> {
        self.failures.get(key).map(|e| e.first_seen.elapsed())
    }

    /// Sliding-window limiter: at most `max_log_rate` trues per window per key
    pub fn should_log(&self, key: &LookupKey) -> bool {
        self.should_log_at(key, Instant::now())
    }

    pub fn should_log_at(&self, key: &LookupKey, now: Instant) -> bool {
        if self.log_windows.len() >= self.max_entries && !self.log_windows.contains_key(key) {
            self.sweep_expired_at(now);
            if self.log_windows.len() >= self.max_entries {
                self.evict_stalest_window();
            }
        }

        let mut window = self.log_windows.entry(key.clone()).or_default();
        while let Some(oldest) = window.logged.front() {
            if now.saturating_duration_since(*oldest) >= self.log_window {
                window.logged.pop_front();
            } else {
                break;
            }
        }
        if window.logged.is_empty() {
            window.suppressed = 0;
        }

        if window.logged.len() < self.max_log_rate {
            window.logged.push_back(now);
            true
        } else {
            if window.suppressed < self.log_ceiling {
                window.suppressed += 1;
            }
            false
        }
    }

    /// Occurrences silenced in the current window (capped at the ceiling)
    pub fn suppressed(&self, key: &LookupKey) -> u32 {
        self.log_windows.get(key).map(|w| w.suppressed).unwrap_or(0)
    }

    /// Drop expired sentinels and idle log windows
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    fn sweep_expired_at(&self, now: Instant) -> usize {
        let before = self.failures.len();
        self.failures.retain(|_, entry| now < entry.expires_at);
        let window = self.log_window;
        self.log_windows.retain(|_, w| {
            w.logged
                .back()
                .is_some_and(|last| now.saturating_duration_since(*last) < window)
        });
        let removed = before.saturating_sub(self.failures.len());
        if removed > 0 {
            debug!("Swept {} expired failed-lookup entries", removed);
        }
        removed
    }

    /// Still-live sentinels fill the map: drop the one closest to expiry
    fn evict_soonest_expiring(&self) {
        let victim = self
            .failures
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());
        if let Some(victim) = victim {
            self.failures.remove(&victim);
            debug!("Failed-lookup cache full, evicted {}", victim);
        }
    }

    fn evict_stalest_window(&self) {
        let victim = self
            .log_windows
            .iter()
            .min_by_key(|entry| entry.value().logged.back().copied())
            .map(|entry| entry.key().clone());
        if let Some(victim) = victim {
            self.log_windows.remove(&victim);
        }
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Keys with a live log window
    pub fn log_window_count(&self) -> usize {
        self.log_windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn clear(&self) {
        self.failures.clear();
        self.log_windows.clear();
    }
}
