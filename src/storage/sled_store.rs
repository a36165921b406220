//! Sled-based implementation of the content store.
//!
//! Each collection lives in its own tree, keyed by document id, with records
//! encoded by bincode. It supports:
//! - Create/read/update/delete per collection
//! - Atomic counter increments via compare-and-swap loops
//! - Unique subscriber emails through a secondary index
//! - Binary media objects for uploaded images

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::{new_document_id, CounterField, MediaObject, StorageConfig};
use crate::catalog::{
    Episode, EpisodeDraft, GalleryItem, Subscriber, TeamMember, TeamMemberDraft,
};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    #[error("Corruption detected in document: {0}")]
    Corruption(String),

    #[error("Storage initialization failed: {0}")]
    InitFailed(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Tree names for the collections
const TREE_EPISODES: &str = "episodes";
const TREE_TEAM: &str = "team";
const TREE_GALLERY: &str = "gallery";
const TREE_SUBSCRIBERS: &str = "subscribers";
const TREE_SUBSCRIBER_EMAILS: &str = "subscriber_emails";
const TREE_MEDIA: &str = "media";

/// Sled-backed store for all podcast content
#[derive(Clone)]
pub struct ContentStore {
    db: Arc<Db>,
    episodes: Tree,
    team: Tree,
    gallery: Tree,
    subscribers: Tree,
    /// email -> subscriber id
    subscriber_emails: Tree,
    media: Tree,
}

impl ContentStore {
    /// Open or create a store at the configured path
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let path = Path::new(&config.path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::InitFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_size)
            .flush_every_ms(if config.flush_interval_ms > 0 {
                Some(config.flush_interval_ms)
            } else {
                None
            })
            .open()?;

        Ok(Self {
            episodes: db.open_tree(TREE_EPISODES)?,
            team: db.open_tree(TREE_TEAM)?,
            gallery: db.open_tree(TREE_GALLERY)?,
            subscribers: db.open_tree(TREE_SUBSCRIBERS)?,
            subscriber_emails: db.open_tree(TREE_SUBSCRIBER_EMAILS)?,
            media: db.open_tree(TREE_MEDIA)?,
            db: Arc::new(db),
        })
    }

    // ------------------------------------------------------------------
    // Episodes
    // ------------------------------------------------------------------

    /// Create an episode; the store assigns its identifier
    pub fn create_episode(&self, draft: EpisodeDraft) -> StorageResult<Episode> {
        let episode = Episode::from_draft(new_document_id(), draft);
        put(&self.episodes, &episode.id, &episode)?;
        debug!("Created episode {} ({})", episode.title, episode.id);
        Ok(episode)
    }

    pub fn get_episode(&self, id: &str) -> StorageResult<Option<Episode>> {
        fetch(&self.episodes, id)
    }

    pub fn list_episodes(&self) -> StorageResult<Vec<Episode>> {
        scan(&self.episodes)
    }

    pub fn episode_exists(&self, id: &str) -> StorageResult<bool> {
        Ok(self.episodes.contains_key(id.as_bytes())?)
    }

    /// Replace the editable fields of an episode.
    ///
    /// Runs inside the same compare-and-swap loop as counter increments, so
    /// an edit racing with likes keeps every increment.
    pub fn update_episode(&self, id: &str, draft: EpisodeDraft) -> StorageResult<Episode> {
        update_record(&self.episodes, id, |episode: &mut Episode| {
            episode.apply_draft(draft.clone())
        })
    }

    /// Delete an episode, returning whether it existed
    pub fn delete_episode(&self, id: &str) -> StorageResult<bool> {
        Ok(self.episodes.remove(id.as_bytes())?.is_some())
    }

    /// Atomically add `delta` to a counter and return the new value.
    ///
    /// Fails with `NotFound` and mutates nothing when the episode is missing.
    pub fn increment(&self, id: &str, field: CounterField, delta: i64) -> StorageResult<u64> {
        let episode = update_record(&self.episodes, id, |episode: &mut Episode| {
            field.apply(episode, delta);
        })?;
        Ok(field.read(&episode))
    }

    /// Current value of a counter
    pub fn counter(&self, id: &str, field: CounterField) -> StorageResult<u64> {
        self.get_episode(id)?
            .map(|episode| field.read(&episode))
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    // ------------------------------------------------------------------
    // Team
    // ------------------------------------------------------------------

    pub fn create_team_member(&self, draft: TeamMemberDraft) -> StorageResult<TeamMember> {
        let member = TeamMember::from_draft(new_document_id(), draft);
        put(&self.team, &member.id, &member)?;
        Ok(member)
    }

    pub fn get_team_member(&self, id: &str) -> StorageResult<Option<TeamMember>> {
        fetch(&self.team, id)
    }

    pub fn list_team(&self) -> StorageResult<Vec<TeamMember>> {
        scan(&self.team)
    }

    pub fn update_team_member(&self, id: &str, draft: TeamMemberDraft) -> StorageResult<TeamMember> {
        update_record(&self.team, id, |member: &mut TeamMember| {
            *member = TeamMember::from_draft(member.id.clone(), draft.clone());
        })
    }

    pub fn delete_team_member(&self, id: &str) -> StorageResult<bool> {
        Ok(self.team.remove(id.as_bytes())?.is_some())
    }

    // ------------------------------------------------------------------
    // Gallery
    // ------------------------------------------------------------------

    pub fn create_gallery_item(
        &self,
        title: impl Into<String>,
        cols: u8,
        rows: u8,
        image_url: impl Into<String>,
    ) -> StorageResult<GalleryItem> {
        let item = GalleryItem {
            id: new_document_id(),
            image_url: image_url.into(),
            title: title.into(),
            cols,
            rows,
        };
        put(&self.gallery, &item.id, &item)?;
        Ok(item)
    }

    pub fn list_gallery(&self) -> StorageResult<Vec<GalleryItem>> {
        scan(&self.gallery)
    }

    pub fn delete_gallery_item(&self, id: &str) -> StorageResult<bool> {
        Ok(self.gallery.remove(id.as_bytes())?.is_some())
    }

    // ------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------

    /// Record a sign-up. `email` must already be normalized.
    pub fn add_subscriber(&self, email: &str) -> StorageResult<Subscriber> {
        let subscriber = Subscriber::new(new_document_id(), email);

        let record = bincode::serialize(&subscriber)?;

        // The email claim and the record are written together or not at all
        let result = (&self.subscriber_emails, &self.subscribers).transaction(|(emails, subscribers)| {
            if emails.get(email.as_bytes())?.is_some() {
                return Err(ConflictableTransactionError::Abort(()));
            }
            emails.insert(email.as_bytes(), subscriber.id.as_bytes())?;
            subscribers.insert(subscriber.id.as_bytes(), record.as_slice())?;
            Ok(())
        });

        match result {
            Ok(()) => Ok(subscriber),
            Err(TransactionError::Abort(())) => Err(StorageError::AlreadyExists(email.to_string())),
            Err(TransactionError::Storage(e)) => Err(StorageError::Sled(e)),
        }
    }

    pub fn list_subscribers(&self) -> StorageResult<Vec<Subscriber>> {
        scan(&self.subscribers)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // ------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------

    /// Store an uploaded object under `"{folder}/{unix_millis}_{file_name}"`
    pub fn put_media(
        &self,
        folder: &str,
        file_name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> StorageResult<String> {
        let key = format!(
            "{}/{}_{}",
            sanitize_segment(folder),
            chrono::Utc::now().timestamp_millis(),
            sanitize_segment(file_name)
        );
        let object = MediaObject::new(content_type, data);
        put(&self.media, &key, &object)?;
        debug!("Stored media object {} ({} bytes)", key, object.data.len());
        Ok(key)
    }

    pub fn get_media(&self, key: &str) -> StorageResult<Option<MediaObject>> {
        fetch(&self.media, key)
    }

    pub fn delete_media(&self, key: &str) -> StorageResult<bool> {
        Ok(self.media.remove(key.as_bytes())?.is_some())
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Force flush all pending writes to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Get storage statistics
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            episode_count: self.episodes.len(),
            team_count: self.team.len(),
            gallery_count: self.gallery.len(),
            subscriber_count: self.subscribers.len(),
            media_count: self.media.len(),
            total_size_bytes: self.db.size_on_disk().unwrap_or(0),
        }
    }
}

/// Statistics about the storage
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub episode_count: usize,
    pub team_count: usize,
    pub gallery_count: usize,
    pub subscriber_count: usize,
    pub media_count: usize,
    pub total_size_bytes: u64,
}

fn put<T: Serialize>(tree: &Tree, key: &str, value: &T) -> StorageResult<()> {
    let bytes = bincode::serialize(value)?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(())
}

fn fetch<T: DeserializeOwned>(tree: &Tree, key: &str) -> StorageResult<Option<T>> {
    match tree.get(key.as_bytes())? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

fn scan<T: DeserializeOwned>(tree: &Tree) -> StorageResult<Vec<T>> {
    let mut records = Vec::new();
    for item in tree.iter() {
        let (_, value) = item?;
        records.push(bincode::deserialize(&value)?);
    }
    Ok(records)
}

/// Read-modify-write a record atomically.
///
/// Sled retries the closure until its compare-and-swap wins, so `f` may run
/// more than once and must not have side effects outside the record.
fn update_record<T, F>(tree: &Tree, key: &str, mut f: F) -> StorageResult<T>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(&mut T),
{
    let mut failure: Option<StorageError> = None;

    let updated = tree.update_and_fetch(key.as_bytes(), |old| {
        failure = None;
        let bytes = old?;
        let mut record: T = match bincode::deserialize(bytes) {
            Ok(record) => record,
            Err(e) => {
                failure = Some(StorageError::Corruption(format!("{}: {}", key, e)));
                return Some(bytes.to_vec());
            }
        };
        f(&mut record);
        match bincode::serialize(&record) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                failure = Some(StorageError::Serialization(e));
                Some(bytes.to_vec())
            }
        }
    })?;

    if let Some(err) = failure {
        return Err(err);
    }

    let bytes = updated.ok_or_else(|| StorageError::NotFound(key.to_string()))?;
    Ok(bincode::deserialize(&bytes)?)
}

/// Keep object keys to a safe character set
fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

impl Drop for ContentStore {
    fn drop(&mut self) {
        // Attempt to flush on drop, but don't panic
        let _ = self.flush();
    }
}
