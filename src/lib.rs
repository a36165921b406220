//! Podcast Server - school podcast catalog with optimistic like counters
//!
//! - Sled embedded database for episodes, team, gallery, subscribers and media
//! - Axum HTTP API with a WebSocket change feed
//! - Client-side like synchronization with optimistic updates and rollback

pub mod api;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod storage;
pub mod sync;

pub use api::{router, AppState};
pub use config::ServerConfig;
pub use error::ApiError;
