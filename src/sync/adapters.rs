//! `CounterStore` implementations.
//!
//! - `ContentStore`: the embedded Sled store, for in-process use
//! - `HttpCounterStore`: the public HTTP API of a running server

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{CounterError, CounterStore};
use crate::storage::{ContentStore, CounterField, StorageError};

/// Like count of one episode as exchanged over HTTP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeCount {
    pub episode_id: String,
    pub likes: u64,
}

fn storage_to_counter(err: StorageError) -> CounterError {
    match err {
        StorageError::NotFound(id) => CounterError::NotFound(id),
        other => CounterError::Transport(other.to_string()),
    }
}

#[async_trait]
impl CounterStore for ContentStore {
    async fn read_counter(&self, episode_id: &str) -> Result<u64, CounterError> {
        self.counter(episode_id, CounterField::Likes)
            .map_err(storage_to_counter)
    }

    async fn apply_increment(&self, episode_id: &str, delta: i64) -> Result<(), CounterError> {
        self.increment(episode_id, CounterField::Likes, delta)
            .map(|_| ())
            .map_err(storage_to_counter)
    }
}

/// Default per-request timeout for the HTTP client
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Counter store reached through the server's public API
#[derive(Debug, Clone)]
pub struct HttpCounterStore {
    client: Client,
    base_url: Url,
}

impl HttpCounterStore {
    /// Create a client for the server at `base_url`, e.g. `http://localhost:5000`
    pub fn new(base_url: &str) -> Result<Self, CounterError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| CounterError::Transport(e.to_string()))?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, CounterError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| CounterError::Transport(format!("invalid base url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(CounterError::Transport(format!(
                "base url '{}' can not carry a path",
                base_url
            )));
        }
        Ok(Self { client, base_url })
    }

    fn episode_url(&self, episode_id: &str, action: &str) -> Result<Url, CounterError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CounterError::Transport("base url can not carry a path".to_string()))?
            .pop_if_empty()
            .extend(["api", "episodes", episode_id, action]);
        Ok(url)
    }

    async fn read_like_count(
        &self,
        episode_id: &str,
        response: reqwest::Response,
    ) -> Result<u64, CounterError> {
        let status = response.status();
        if !status.is_success() {
            return Err(status_to_counter(episode_id, status));
        }
        let body: LikeCount = response
            .json()
            .await
            .map_err(|e| CounterError::Transport(e.to_string()))?;
        Ok(body.likes)
    }
}

fn status_to_counter(episode_id: &str, status: StatusCode) -> CounterError {
    match status {
        StatusCode::NOT_FOUND => CounterError::NotFound(episode_id.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CounterError::PermissionDenied(status.to_string())
        }
        other => CounterError::Transport(format!("unexpected status {}", other)),
    }
}

#[async_trait]
impl CounterStore for HttpCounterStore {
    async fn read_counter(&self, episode_id: &str) -> Result<u64, CounterError> {
        let url = self.episode_url(episode_id, "likes")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CounterError::Transport(e.to_string()))?;
        self.read_like_count(episode_id, response).await
    }

    /// The public API only accepts single increments
    async fn apply_increment(&self, episode_id: &str, delta: i64) -> Result<(), CounterError> {
        if delta != 1 {
            return Err(CounterError::Unsupported(delta));
        }
        let url = self.episode_url(episode_id, "like")?;
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| CounterError::Transport(e.to_string()))?;
        let likes = self.read_like_count(episode_id, response).await?;
        debug!("Remote like for {} accepted, now {}", episode_id, likes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Category, EpisodeDraft};
    use crate::storage::StorageConfig;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_episode_url() {
        let store = HttpCounterStore::new("http://localhost:5000/").unwrap();
        let url = store.episode_url("ep 1", "like").unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/episodes/ep%201/like");

        let nested = HttpCounterStore::new("http://example.org/podcast").unwrap();
        assert_eq!(
            nested.episode_url("abc", "likes").unwrap().as_str(),
            "http://example.org/podcast/api/episodes/abc/likes"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = tokio_test::assert_err!(HttpCounterStore::new("not a url"));
        assert!(matches!(err, CounterError::Transport(_)));
        tokio_test::assert_err!(HttpCounterStore::new("mailto:someone@example.org"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_to_counter("ep1", StatusCode::NOT_FOUND),
            CounterError::NotFound("ep1".to_string())
        );
        assert!(matches!(
            status_to_counter("ep1", StatusCode::FORBIDDEN),
            CounterError::PermissionDenied(_)
        ));
        assert!(matches!(
            status_to_counter("ep1", StatusCode::BAD_GATEWAY),
            CounterError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_http_store_rejects_non_unit_delta() {
        let store = HttpCounterStore::new("http://localhost:1").unwrap();
        assert_eq!(
            store.apply_increment("ep1", -1).await,
            Err(CounterError::Unsupported(-1))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_content_store_counts_concurrent_likes() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("likes.sled").to_string_lossy().to_string());
        let store = Arc::new(ContentStore::open(config).unwrap());
        let episode = store
            .create_episode(EpisodeDraft {
                title: "Héroes de la Independencia".to_string(),
                description: String::new(),
                author: "Maria y Juan".to_string(),
                grade: "6° Grado".to_string(),
                category: Category::Historia,
                duration: "15 min".to_string(),
                date: String::new(),
                image_url: String::new(),
                spotify_url: String::new(),
                featured: false,
                image: None,
            })
            .unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                let id = episode.id.clone();
                tokio::spawn(async move { store.apply_increment(&id, 1).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.read_counter(&episode.id).await.unwrap(), 20);
        assert_eq!(
            store.read_counter("missing").await,
            Err(CounterError::NotFound("missing".to_string()))
        );
    }
}
