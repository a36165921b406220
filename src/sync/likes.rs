//! Optimistic like requests with reconciliation and rollback.
//!
//! A request moves through `Idle -> OptimisticallyApplied -> {Reconciled |
//! RolledBack}`. The optimistic value is written before any I/O; the
//! increment and its read-back then run on a spawned task bounded by the
//! configured timeout. Every non-success path restores the pre-like value.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::cache::{CounterCache, PendingToken};
use super::{CounterError, CounterStore, LikeError, LikeEvent, LikeOutcome, LikeSyncConfig};
use crate::catalog::{Episode, EpisodeId};

/// Client-side like synchronization over a `CounterStore`
pub struct LikeSync<S: CounterStore> {
    store: Arc<S>,
    cache: Arc<CounterCache>,
    config: LikeSyncConfig,
    events: broadcast::Sender<LikeEvent>,
}

impl<S: CounterStore> LikeSync<S> {
    pub fn new(store: Arc<S>, config: LikeSyncConfig) -> Self {
        Self::with_cache(store, Arc::new(CounterCache::new()), config)
    }

    /// Share an existing cache, e.g. one already seeded by the view
    pub fn with_cache(store: Arc<S>, cache: Arc<CounterCache>, config: LikeSyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            store,
            cache,
            config,
            events,
        }
    }

    pub fn cache(&self) -> &Arc<CounterCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Seed displayed counts from a loaded episode list
    pub fn seed(&self, episodes: &[Episode]) {
        self.cache.seed_episodes(episodes);
    }

    /// Currently displayed count
    pub fn likes(&self, episode_id: &str) -> u64 {
        self.cache.get(episode_id)
    }

    pub fn is_busy(&self, episode_id: &str) -> bool {
        self.cache.is_busy(episode_id)
    }

    /// Subscribe to applied/reconciled/rolled-back notifications
    pub fn subscribe(&self) -> broadcast::Receiver<LikeEvent> {
        self.events.subscribe()
    }

    /// Record one like for `episode_id`.
    ///
    /// `displayed` is the count the caller currently shows. The cache holds
    /// `displayed + 1` by the time this returns; the increment runs on a
    /// spawned task, so this must be called from within a Tokio runtime.
    /// Fails with `InFlight` if this episode already has a like pending.
    pub fn record_like(&self, episode_id: &str, displayed: u64) -> Result<LikeHandle, LikeError> {
        let optimistic = displayed.saturating_add(1);
        let Some(token) = self.cache.begin(episode_id, optimistic) else {
            debug!("Like for {} ignored, request already in flight", episode_id);
            return Err(LikeError::InFlight(episode_id.to_string()));
        };

        let _ = self.events.send(LikeEvent::Applied {
            episode_id: episode_id.to_string(),
            likes: optimistic,
        });

        let guard = PendingLike {
            cache: self.cache.clone(),
            events: self.events.clone(),
            episode_id: episode_id.to_string(),
            token,
            pre_image: displayed,
            settled: false,
        };
        let store = self.store.clone();
        let timeout = self.config.request_timeout;

        let task = tokio::spawn(run_request(store, guard, timeout));

        Ok(LikeHandle {
            episode_id: episode_id.to_string(),
            pre_image: displayed,
            optimistic,
            task,
        })
    }

    /// Record a like and wait for it to settle
    pub async fn record_like_and_wait(
        &self,
        episode_id: &str,
        displayed: u64,
    ) -> Result<LikeOutcome, LikeError> {
        Ok(self.record_like(episode_id, displayed)?.outcome().await)
    }

    /// Re-read the authoritative count.
    ///
    /// The cache is only overwritten when no like is pending for the episode,
    /// so a refresh never clobbers an optimistic value.
    pub async fn refresh(&self, episode_id: &str) -> Result<u64, LikeError> {
        let timeout = self.config.request_timeout;
        let likes = tokio::time::timeout(timeout, self.store.read_counter(episode_id))
            .await
            .map_err(|_| LikeError::TimedOut(timeout))??;

        if !self.cache.set_if_idle(episode_id, likes) {
            debug!("Refresh of {} kept the pending optimistic value", episode_id);
        }
        Ok(likes)
    }
}

/// Handle to one in-flight like
#[derive(Debug)]
pub struct LikeHandle {
    episode_id: EpisodeId,
    pre_image: u64,
    optimistic: u64,
    task: JoinHandle<LikeOutcome>,
}

impl LikeHandle {
    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    /// Value written to the cache before the request was sent
    pub fn optimistic_likes(&self) -> u64 {
        self.optimistic
    }

    /// Cancel the request; the cache rolls back to the pre-like value
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the request to settle
    pub async fn outcome(self) -> LikeOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Like task for {} ended early: {}", self.episode_id, e);
                LikeOutcome::RolledBack {
                    error: LikeError::Abandoned(self.episode_id.clone()),
                    episode_id: self.episode_id,
                    likes: self.pre_image,
                }
            }
        }
    }
}

/// Compensating action for an optimistic bump.
///
/// Restores the pre-image and clears the pending mark if the request is
/// dropped before it settles.
struct PendingLike {
    cache: Arc<CounterCache>,
    events: broadcast::Sender<LikeEvent>,
    episode_id: EpisodeId,
    token: PendingToken,
    pre_image: u64,
    settled: bool,
}

impl PendingLike {
    fn reconcile(&mut self, likes: u64) {
        self.finish(likes);
    }

    fn roll_back(&mut self) -> u64 {
        self.finish(self.pre_image);
        self.pre_image
    }

    fn finish(&mut self, likes: u64) {
        if !self.cache.settle(&self.episode_id, self.token, likes) {
            debug!(
                "Cache for {} was reset while the like was in flight, leaving it alone",
                self.episode_id
            );
        }
        self.settled = true;
    }
}

impl Drop for PendingLike {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(
            "Like request for {} abandoned, rolling back to {}",
            self.episode_id, self.pre_image
        );
        let likes = self.roll_back();
        let _ = self.events.send(LikeEvent::RolledBack {
            episode_id: self.episode_id.clone(),
            likes,
            error: LikeError::Abandoned(self.episode_id.clone()),
        });
    }
}

async fn increment_and_read<S: CounterStore>(store: &S, episode_id: &str) -> Result<u64, CounterError> {
    store.apply_increment(episode_id, 1).await?;
    store.read_counter(episode_id).await
}

async fn run_request<S: CounterStore>(
    store: Arc<S>,
    mut guard: PendingLike,
    timeout: Duration,
) -> LikeOutcome {
    let episode_id = guard.episode_id.clone();

    let result = match tokio::time::timeout(timeout, increment_and_read(store.as_ref(), &episode_id)).await {
        Ok(Ok(likes)) => Ok(likes),
        Ok(Err(e)) => Err(LikeError::Store(e)),
        Err(_) => Err(LikeError::TimedOut(timeout)),
    };

    match result {
        Ok(likes) => {
            guard.reconcile(likes);
            debug!("Like for {} reconciled at {}", episode_id, likes);
            let _ = guard.events.send(LikeEvent::Reconciled {
                episode_id: episode_id.clone(),
                likes,
            });
            LikeOutcome::Reconciled { episode_id, likes }
        }
        Err(error) => {
            let likes = guard.roll_back();
            warn!(
                "Like for {} failed, rolled back to {}: {}",
                episode_id, likes, error
            );
            let _ = guard.events.send(LikeEvent::RolledBack {
                episode_id: episode_id.clone(),
                likes,
                error: error.clone(),
            });
            if error.is_stale_view() {
                let _ = guard.events.send(LikeEvent::Stale {
                    episode_id: episode_id.clone(),
                });
            }
            LikeOutcome::RolledBack {
                episode_id,
                likes,
                error,
            }
        }
    }
}
