//! Eviction policy: which idle sessions to drop
//!
//! Pure decision logic over a snapshot of the registry. Two independent passes:
//!
//! 1. TTL: every idle handle unused for longer than `ttl` goes, whatever the size.
//! 2. Capacity: while the survivors still exceed `max_sessions`, the least-recently-used
//!    idle handle goes. When only in-flight handles remain the pass stops and the
//!    registry stays over capacity.
//!
//! Handles with `in_flight > 0` are never selected. LRU ties on `last_used` are broken
//! by insertion order, earlier first.

use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time view of one handle
#[derive(Debug, Clone)]
pub struct HandleSnapshot {
    pub id: String,
    pub last_used: Instant,
    pub in_flight: usize,
    pub seq: u64,
}

impl HandleSnapshot {
    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub max_sessions: usize,
    pub ttl: Duration,
}

impl EvictionPolicy {
    pub fn new(max_sessions: usize, ttl: Duration) -> Self {
        Self { max_sessions, ttl }
    }

    /// Idle for strictly longer than the TTL
    pub fn is_expired(&self, handle: &HandleSnapshot, now: Instant) -> bool {
        handle.is_idle() && now.saturating_duration_since(handle.last_used) > self.ttl
    }

    /// Ids to evict, TTL expirations first, then capacity victims in LRU order.
    pub fn select(&self, snapshot: &[HandleSnapshot], now: Instant) -> Vec<String> {
        let mut idle: Vec<&HandleSnapshot> = snapshot.iter().filter(|h| h.is_idle()).collect();
        idle.sort_by(|a, b| a.last_used.cmp(&b.last_used).then(a.seq.cmp(&b.seq)));

        let (expired, survivors): (Vec<&HandleSnapshot>, Vec<&HandleSnapshot>) =
            idle.into_iter().partition(|h| self.is_expired(h, now));

        let mut evict: Vec<String> = expired.iter().map(|h| h.id.clone()).collect();
        let mut remaining = snapshot.len() - evict.len();

        for handle in survivors {
            if remaining <= self.max_sessions {
                break;
            }
            evict.push(handle.id.clone());
            remaining -= 1;
        }

        evict
    }
}
