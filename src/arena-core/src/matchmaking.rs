//! Matchmaking queue.
//!
//! Holds waiting users and pairs the two longest-waiting entries whose
//! rating gap fits inside both entries' widening tolerance bands. The queue
//! itself is a plain data structure; the server serializes access behind a
//! single async mutex so pair removal is atomic.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::MatchmakingConfig;
use crate::error::ArenaError;
use crate::participant::{UserHandle, UserId};

/// One waiting user. A user has at most one live entry.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub handle: UserHandle,
    pub enqueued_at: Instant,
}

pub struct MatchQueue {
    cfg: MatchmakingConfig,
    // Arrival order; the front has waited longest.
    entries: Vec<QueueEntry>,
}

impl MatchQueue {
    pub fn new(cfg: MatchmakingConfig) -> Self {
        Self {
            cfg,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.entries.iter().any(|e| e.handle.id == *user)
    }

    /// Insert a waiting user. Fails if the user already has a live entry.
    pub fn join(&mut self, handle: UserHandle, now: Instant) -> Result<(), ArenaError> {
        if self.contains(&handle.id) {
            return Err(ArenaError::AlreadyQueued(handle.id));
        }
        debug!(user = %handle.id, rating = handle.rating, "queued");
        self.entries.push(QueueEntry {
            handle,
            enqueued_at: now,
        });
        Ok(())
    }

    /// Remove a user's entry if present. A no-op when absent: the client
    /// may race a server-side pairing that already consumed the entry.
    pub fn leave(&mut self, user: &UserId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.handle.id != *user);
        before != self.entries.len()
    }

    fn tolerance(&self, waited: Duration) -> i32 {
        let widened = self
            .cfg
            .base_tolerance
            .saturating_add(self.cfg.growth_per_second.saturating_mul(waited.as_secs() as i32));
        widened.min(self.cfg.max_tolerance)
    }

    /// One pairing pass: pick the two longest-waiting compatible entries,
    /// remove them atomically, and return them ordered so the lower user id
    /// is participant A (and opens round 1).
    pub fn pairing_pass(&mut self, now: Instant) -> Option<(UserHandle, UserHandle)> {
        for i in 0..self.entries.len() {
            for j in (i + 1)..self.entries.len() {
                let a = &self.entries[i];
                let b = &self.entries[j];
                let gap = (a.handle.rating - b.handle.rating).abs();
                let band_a = self.tolerance(now.saturating_duration_since(a.enqueued_at));
                let band_b = self.tolerance(now.saturating_duration_since(b.enqueued_at));
                if gap <= band_a.min(band_b) {
                    // Remove the higher index first so the lower stays valid.
                    let second = self.entries.remove(j);
                    let first = self.entries.remove(i);
                    let (lo, hi) = if first.handle.id <= second.handle.id {
                        (first.handle, second.handle)
                    } else {
                        (second.handle, first.handle)
                    };
                    debug!(a = %lo.id, b = %hi.id, gap, "paired");
                    return Some((lo, hi));
                }
            }
        }
        None
    }
}
