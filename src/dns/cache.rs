//! Answer cache for the proxy-server resolver
//!
//! Answers are keyed by host and lookup mode, so A, AAAA and merged answers
//! for one host are cached independently.

use super::LookupMode;
use lru::LruCache;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: NonZeroUsize = NonZeroUsize::MIN.saturating_add(4095);
const MAX_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    host: String,
    mode: LookupMode,
}

#[derive(Debug, Clone)]
struct Answer {
    ips: Vec<IpAddr>,
    expires: Instant,
}

/// LRU answer cache with per-entry expiry
pub struct DnsCache {
    entries: Mutex<LruCache<Key, Answer>>,
    max_ttl: Duration,
}

impl DnsCache {
    /// Cache holding up to `capacity` answers (0 picks the default capacity)
    pub fn new(capacity: usize) -> Self {
        Self::with_max_ttl(capacity, MAX_TTL)
    }

    pub fn with_max_ttl(capacity: usize, max_ttl: Duration) -> Self {
        DnsCache {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY),
            )),
            max_ttl,
        }
    }

    /// Live answer for `host` in `mode`; an expired one is evicted.
    pub fn get(&self, host: &str, mode: LookupMode) -> Option<Vec<IpAddr>> {
        let key = Key {
            host: host.to_string(),
            mode,
        };
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(answer) if answer.expires > Instant::now() => Some(answer.ips.clone()),
            Some(_) => {
                entries.pop(&key);
                None
            }
            None => None,
        }
    }

    /// Store an answer for `ttl`, capped at the cache's maximum TTL.
    pub fn insert(&self, host: &str, mode: LookupMode, ips: Vec<IpAddr>, ttl: Duration) {
        let answer = Answer {
            ips,
            expires: Instant::now() + ttl.min(self.max_ttl),
        };
        self.entries.lock().put(
            Key {
                host: host.to_string(),
                mode,
            },
            answer,
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop every expired answer
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let stale: Vec<Key> = entries
            .iter()
            .filter(|(_, answer)| answer.expires <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new(0)
    }
}
