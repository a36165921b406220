//! Catalog module for the podcast's published content.
//!
//! This module holds the records served to visitors and edited by operators:
//! - Episodes with their like and play counters
//! - Team member profiles
//! - Gallery items
//! - Newsletter subscribers
//!
//! Drafts carry only the operator-editable fields. Counters never travel
//! through a draft, so an edit can not reset likes or plays.

pub mod export;
pub mod query;

pub use export::{export_file_name, subscribers_csv};
pub use query::{EpisodePage, EpisodeQuery};

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opaque identifier of an episode, assigned by the store at creation
pub type EpisodeId = String;

/// Maximum accepted length of an email address
const MAX_EMAIL_LEN: usize = 254;

/// Gallery tiles span between one and this many grid cells per axis
const MAX_GALLERY_SPAN: u8 = 4;

/// Errors raised while validating catalog input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Already subscribed: {0}")]
    DuplicateSubscriber(String),

    #[error("Invalid image upload: {0}")]
    InvalidImage(String),
}

impl CatalogError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        CatalogError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Episode category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Cuentos,
    Ciencia,
    Historia,
    Entrevistas,
    Debate,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Cuentos,
        Category::Ciencia,
        Category::Historia,
        Category::Entrevistas,
        Category::Debate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Cuentos => "Cuentos",
            Category::Ciencia => "Ciencia",
            Category::Historia => "Historia",
            Category::Entrevistas => "Entrevistas",
            Category::Debate => "Debate",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CatalogError::invalid("category", format!("unknown category '{}'", s)))
    }
}

/// A published podcast episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub title: String,
    pub description: String,
    pub author: String,
    /// School grade of the authors, e.g. "4° Grado"
    pub grade: String,
    pub category: Category,
    /// Human readable duration, e.g. "10 min"
    pub duration: String,
    pub plays: u64,
    pub likes: u64,
    /// Publication date as displayed on the site
    pub date: String,
    pub image_url: String,
    pub spotify_url: String,
    pub featured: bool,
    /// Unix timestamp of creation
    pub created_at: i64,
}

impl Episode {
    /// Build a new episode from a validated draft. Counters start at zero.
    pub fn from_draft(id: impl Into<String>, draft: EpisodeDraft) -> Self {
        Self {
            id: id.into(),
            title: draft.title.trim().to_string(),
            description: draft.description,
            author: draft.author.trim().to_string(),
            grade: draft.grade,
            category: draft.category,
            duration: draft.duration,
            plays: 0,
            likes: 0,
            date: draft.date,
            image_url: draft.image_url,
            spotify_url: draft.spotify_url,
            featured: draft.featured,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Replace the editable fields, keeping id, counters and creation time
    pub fn apply_draft(&mut self, draft: EpisodeDraft) {
        self.title = draft.title.trim().to_string();
        self.description = draft.description;
        self.author = draft.author.trim().to_string();
        self.grade = draft.grade;
        self.category = draft.category;
        self.duration = draft.duration;
        self.date = draft.date;
        self.image_url = draft.image_url;
        self.spotify_url = draft.spotify_url;
        self.featured = draft.featured;
    }
}

/// Operator-editable episode fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub author: String,
    #[serde(default)]
    pub grade: String,
    pub category: Category,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub spotify_url: String,
    #[serde(default)]
    pub featured: bool,
    /// New cover image; replaces `image_url` once stored
    #[serde(default)]
    pub image: Option<ImageUpload>,
}

impl EpisodeDraft {
    pub fn validate(&self) -> Result<(), CatalogError> {
        require_text("title", &self.title)?;
        require_text("author", &self.author)?;
        check_url("image_url", &self.image_url)?;
        check_url("spotify_url", &self.spotify_url)?;
        if let Some(image) = &self.image {
            image.validate()?;
        }
        Ok(())
    }
}

/// A member of the podcast team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: String,
    pub name: String,
    pub role: String,
    pub area: String,
    pub image_url: String,
    pub quote: String,
}

impl TeamMember {
    pub fn from_draft(id: impl Into<String>, draft: TeamMemberDraft) -> Self {
        Self {
            id: id.into(),
            name: draft.name.trim().to_string(),
            role: draft.role,
            area: draft.area,
            image_url: draft.image_url,
            quote: draft.quote,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMemberDraft {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub quote: String,
    #[serde(default)]
    pub image: Option<ImageUpload>,
}

impl TeamMemberDraft {
    pub fn validate(&self) -> Result<(), CatalogError> {
        require_text("name", &self.name)?;
        check_url("image_url", &self.image_url)?;
        if let Some(image) = &self.image {
            image.validate()?;
        }
        Ok(())
    }
}

/// A photo in the gallery grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryItem {
    pub id: String,
    pub image_url: String,
    pub title: String,
    /// Grid columns spanned
    pub cols: u8,
    /// Grid rows spanned
    pub rows: u8,
}

/// Gallery items are created together with their image and never edited
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_span")]
    pub cols: u8,
    #[serde(default = "default_span")]
    pub rows: u8,
    pub image: ImageUpload,
}

fn default_span() -> u8 {
    1
}

impl GalleryDraft {
    pub fn validate(&self) -> Result<(), CatalogError> {
        for (field, span) in [("cols", self.cols), ("rows", self.rows)] {
            if span == 0 || span > MAX_GALLERY_SPAN {
                return Err(CatalogError::invalid(
                    field,
                    format!("must be between 1 and {}", MAX_GALLERY_SPAN),
                ));
            }
        }
        self.image.validate()
    }
}

/// A newsletter sign-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    pub email: String,
    /// Unix timestamp of the sign-up
    pub subscribed_at: i64,
}

impl Subscriber {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            subscribed_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Trim, lowercase and sanity-check an email address
pub fn normalize_email(raw: &str) -> Result<String, CatalogError> {
    let email = raw.trim().to_lowercase();
    let invalid = || CatalogError::InvalidEmail(raw.trim().to_string());

    if email.is_empty() || email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(invalid());
    }

    Ok(email)
}

/// An uploaded image, base64 encoded in the JSON body
#[derive(Clone, Serialize, Deserialize)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub data_base64: String,
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("encoded_len", &self.data_base64.len())
            .finish()
    }
}

impl ImageUpload {
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.file_name.trim().is_empty() {
            return Err(CatalogError::InvalidImage("missing file name".to_string()));
        }
        if !self.content_type.starts_with("image/") {
            return Err(CatalogError::InvalidImage(format!(
                "unsupported content type '{}'",
                self.content_type
            )));
        }
        Ok(())
    }

    /// Decode the payload, enforcing an upper size bound
    pub fn decode(&self, max_bytes: usize) -> Result<Vec<u8>, CatalogError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(self.data_base64.trim())
            .map_err(|e| CatalogError::InvalidImage(e.to_string()))?;

        if bytes.is_empty() {
            return Err(CatalogError::InvalidImage("empty image".to_string()));
        }
        if bytes.len() > max_bytes {
            return Err(CatalogError::InvalidImage(format!(
                "{} bytes exceeds the {} byte limit",
                bytes.len(),
                max_bytes
            )));
        }
        Ok(bytes)
    }
}

/// Totals shown on the admin dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub episodes: usize,
    pub team_members: usize,
    pub gallery_items: usize,
    pub subscribers: usize,
    pub total_plays: u64,
    pub total_likes: u64,
}

impl DashboardStats {
    pub fn with_episodes(mut self, episodes: &[Episode]) -> Self {
        self.episodes = episodes.len();
        self.total_plays = episodes.iter().map(|e| e.plays).sum();
        self.total_likes = episodes.iter().map(|e| e.likes).sum();
        self
    }
}

fn require_text(field: &'static str, value: &str) -> Result<(), CatalogError> {
    if value.trim().is_empty() {
        return Err(CatalogError::invalid(field, "must not be empty"));
    }
    Ok(())
}

/// Empty, absolute http(s) or a path to a stored media object
fn check_url(field: &'static str, value: &str) -> Result<(), CatalogError> {
    let value = value.trim();
    if value.is_empty()
        || value.starts_with("https://")
        || value.starts_with("http://")
        || value.starts_with("/media/")
    {
        return Ok(());
    }
    Err(CatalogError::invalid(field, format!("'{}' is not a URL", value)))
}
