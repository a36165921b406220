//! Like synchronization between a presentation layer and the counter store.
//!
//! This module implements optimistic like counters:
//! - A narrow `CounterStore` port over any atomic-increment-capable backend
//! - An in-memory cache of displayed counts with per-episode pending marks
//! - `LikeSync`, which bumps the cache immediately, issues the increment and
//!   then reconciles with the authoritative value or rolls back
//!
//! Likes are increment-only: there is no per-viewer liked state, so every
//! call records one more like.

pub mod adapters;
pub mod cache;
pub mod likes;

pub use adapters::{HttpCounterStore, LikeCount};
pub use cache::CounterCache;
pub use likes::{LikeHandle, LikeSync};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::catalog::EpisodeId;

/// Errors reported by a counter store
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterError {
    /// The episode does not exist; nothing was mutated
    #[error("Episode not found: {0}")]
    NotFound(EpisodeId),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Network, storage or decoding failure
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Unsupported increment: {0}")]
    Unsupported(i64),
}

/// Errors surfaced by `LikeSync`
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LikeError {
    #[error(transparent)]
    Store(#[from] CounterError),

    /// A like for this episode is already awaiting the store
    #[error("Like already in flight for episode {0}")]
    InFlight(EpisodeId),

    #[error("Counter store did not answer within {0:?}")]
    TimedOut(Duration),

    /// The request task ended without settling (panic or cancellation)
    #[error("Like request for episode {0} was abandoned")]
    Abandoned(EpisodeId),
}

impl LikeError {
    /// Whether the failure means the caller's episode list is stale
    pub fn is_stale_view(&self) -> bool {
        matches!(self, LikeError::Store(CounterError::NotFound(_)))
    }
}

/// Narrow interface over the authoritative counter storage.
///
/// Implementations must make concurrent `apply_increment` calls on the same
/// identifier linearizable, so no increment is ever lost.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Read the current like count of an episode
    async fn read_counter(&self, episode_id: &str) -> Result<u64, CounterError>;

    /// Atomically add `delta` to the like count of an episode
    async fn apply_increment(&self, episode_id: &str, delta: i64) -> Result<(), CounterError>;
}

/// Lifecycle of a single like request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LikePhase {
    /// No request in flight
    Idle,
    /// Cache bumped, request sent, awaiting the store
    OptimisticallyApplied,
    /// Cache holds the authoritative value
    Reconciled,
    /// Cache restored to the pre-like value
    RolledBack,
}

impl LikePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LikePhase::Reconciled | LikePhase::RolledBack)
    }
}

/// Final result of a like request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LikeOutcome {
    Reconciled {
        episode_id: EpisodeId,
        likes: u64,
    },
    RolledBack {
        episode_id: EpisodeId,
        likes: u64,
        error: LikeError,
    },
}

impl LikeOutcome {
    pub fn phase(&self) -> LikePhase {
        match self {
            LikeOutcome::Reconciled { .. } => LikePhase::Reconciled,
            LikeOutcome::RolledBack { .. } => LikePhase::RolledBack,
        }
    }

    pub fn episode_id(&self) -> &str {
        match self {
            LikeOutcome::Reconciled { episode_id, .. }
            | LikeOutcome::RolledBack { episode_id, .. } => episode_id,
        }
    }

    /// Count left in the cache once the request settled
    pub fn likes(&self) -> u64 {
        match self {
            LikeOutcome::Reconciled { likes, .. } | LikeOutcome::RolledBack { likes, .. } => *likes,
        }
    }

    pub fn error(&self) -> Option<&LikeError> {
        match self {
            LikeOutcome::Reconciled { .. } => None,
            LikeOutcome::RolledBack { error, .. } => Some(error),
        }
    }
}

/// Notifications for the presentation layer and operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LikeEvent {
    /// Optimistic value written to the cache
    Applied { episode_id: EpisodeId, likes: u64 },
    /// Cache overwritten with the authoritative value
    Reconciled { episode_id: EpisodeId, likes: u64 },
    /// Cache restored after a failure
    RolledBack {
        episode_id: EpisodeId,
        likes: u64,
        error: LikeError,
    },
    /// The episode is gone server-side; the caller should refetch its list
    Stale { episode_id: EpisodeId },
}

/// Configuration for like synchronization
#[derive(Debug, Clone)]
pub struct LikeSyncConfig {
    /// Upper bound for increment plus read-back; expiry forces a rollback
    pub request_timeout: Duration,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for LikeSyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(8),
            event_capacity: 256,
        }
    }
}

impl LikeSyncConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
