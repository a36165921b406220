//! Optimistic counter cache.
//!
//! Holds the like count each episode currently displays, plus the set of
//! episodes with a request in flight. The cache is a disposable projection
//! of the store; it is never persisted.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::catalog::{Episode, EpisodeId};

/// Identifies which request owns an episode's pending mark
pub(crate) type PendingToken = u64;

#[derive(Debug, Default)]
struct CacheState {
    counts: HashMap<EpisodeId, u64>,
    pending: HashMap<EpisodeId, PendingToken>,
    next_token: PendingToken,
}

/// Displayed like counts keyed by episode
#[derive(Debug, Default)]
pub struct CounterCache {
    state: Mutex<CacheState>,
}

impl CounterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the store's last-known values
    pub fn seed<I, K>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, u64)>,
        K: Into<EpisodeId>,
    {
        let mut state = self.state.lock();
        for (id, likes) in entries {
            state.counts.insert(id.into(), likes);
        }
    }

    /// Seed from a loaded episode list
    pub fn seed_episodes(&self, episodes: &[Episode]) {
        self.seed(episodes.iter().map(|e| (e.id.clone(), e.likes)));
    }

    /// Cached count, or 0 for an unseen episode
    pub fn get(&self, episode_id: &str) -> u64 {
        self.state
            .lock()
            .counts
            .get(episode_id)
            .copied()
            .unwrap_or(0)
    }

    /// Overwrite the cached count unconditionally
    pub fn set(&self, episode_id: &str, likes: u64) {
        self.state.lock().counts.insert(episode_id.to_string(), likes);
    }

    /// Overwrite the cached count unless a like for it is pending.
    ///
    /// Returns whether the value was written.
    pub fn set_if_idle(&self, episode_id: &str, likes: u64) -> bool {
        let mut state = self.state.lock();
        if state.pending.contains_key(episode_id) {
            return false;
        }
        state.counts.insert(episode_id.to_string(), likes);
        true
    }

    /// Whether a like for this episode is awaiting the store
    pub fn is_busy(&self, episode_id: &str) -> bool {
        self.state.lock().pending.contains_key(episode_id)
    }

    /// Whether any like is awaiting the store
    pub fn is_any_busy(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Copy of all cached counts
    pub fn snapshot(&self) -> HashMap<EpisodeId, u64> {
        self.state.lock().counts.clone()
    }

    /// Write the optimistic value and mark the episode pending in one step.
    ///
    /// Returns `None` without touching anything if the episode is already
    /// pending, otherwise the token that owns the new mark.
    pub(crate) fn begin(&self, episode_id: &str, optimistic: u64) -> Option<PendingToken> {
        let mut state = self.state.lock();
        if state.pending.contains_key(episode_id) {
            return None;
        }
        state.next_token = state.next_token.wrapping_add(1);
        let token = state.next_token;
        state.pending.insert(episode_id.to_string(), token);
        state.counts.insert(episode_id.to_string(), optimistic);
        Some(token)
    }

    /// Store the settled value and clear the pending mark.
    ///
    /// Does nothing unless `token` still owns the mark, which is no longer
    /// the case after `clear`. Returns whether the value was written.
    pub(crate) fn settle(&self, episode_id: &str, token: PendingToken, likes: u64) -> bool {
        let mut state = self.state.lock();
        if state.pending.get(episode_id) != Some(&token) {
            return false;
        }
        state.pending.remove(episode_id);
        state.counts.insert(episode_id.to_string(), likes);
        true
    }

    /// Forget everything, e.g. when the owning view goes away
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.counts.clear();
        state.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_is_zero() {
        let cache = CounterCache::new();
        assert_eq!(cache.get("ep1"), 0);
        assert!(!cache.is_busy("ep1"));
        assert!(!cache.is_any_busy());
    }

    #[test]
    fn test_seed_and_set() {
        let cache = CounterCache::new();
        cache.seed([("ep1", 842), ("ep2", 450)]);
        assert_eq!(cache.get("ep1"), 842);

        cache.set("ep1", 900);
        assert_eq!(cache.get("ep1"), 900);
        assert_eq!(cache.snapshot().len(), 2);
    }

    #[test]
    fn test_begin_marks_only_that_episode() {
        let cache = CounterCache::new();
        assert!(cache.begin("ep1", 11).is_some());
        assert_eq!(cache.get("ep1"), 11);
        assert!(cache.is_busy("ep1"));
        assert!(!cache.is_busy("ep2"));
        assert!(cache.is_any_busy());

        // Second begin is refused and leaves the value alone
        assert!(cache.begin("ep1", 12).is_none());
        assert_eq!(cache.get("ep1"), 11);

        // Other episodes are independent
        assert!(cache.begin("ep2", 1).is_some());
        assert_eq!(cache.pending_count(), 2);
    }

    #[test]
    fn test_settle_clears_pending() {
        let cache = CounterCache::new();
        let token = cache.begin("ep1", 11).unwrap();
        assert!(cache.settle("ep1", token, 10));
        assert_eq!(cache.get("ep1"), 10);
        assert!(!cache.is_busy("ep1"));
        assert!(!cache.is_any_busy());
    }

    #[test]
    fn test_clear() {
        let cache = CounterCache::new();
        cache.seed([("ep1", 5)]);
        cache.begin("ep2", 1);
        cache.clear();
        assert_eq!(cache.get("ep1"), 0);
        assert!(!cache.is_any_busy());
    }

    #[test]
    fn test_settle_after_clear_leaves_newer_mark() {
        let cache = CounterCache::new();
        let old = cache.begin("ep1", 11).unwrap();
        cache.clear();
        let new = cache.begin("ep1", 1).unwrap();
        assert_ne!(old, new);

        assert!(!cache.settle("ep1", old, 99));
        assert!(cache.is_busy("ep1"));
        assert_eq!(cache.get("ep1"), 1);

        assert!(cache.settle("ep1", new, 2));
        assert!(!cache.is_busy("ep1"));
    }

    #[test]
    fn test_set_if_idle() {
        let cache = CounterCache::new();
        assert!(cache.set_if_idle("ep1", 7));
        let token = cache.begin("ep1", 8).unwrap();
        assert!(!cache.set_if_idle("ep1", 20));
        assert_eq!(cache.get("ep1"), 8);
        cache.settle("ep1", token, 8);
        assert!(cache.set_if_idle("ep1", 20));
        assert_eq!(cache.get("ep1"), 20);
    }
}
