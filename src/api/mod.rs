//! HTTP surface of the podcast server.
//!
//! - `public`: episodes, likes, plays, team, gallery, sign-ups and media
//! - `admin`: login and operator CRUD behind a bearer token
//! - `feed`: WebSocket change feed

pub mod admin;
pub mod feed;
pub mod public;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::Duration, time::Instant};
use tokio::sync::broadcast;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

use crate::auth::{AuthError, AuthService};
use crate::catalog::EpisodeId;
use crate::config::ServerConfig;
use crate::storage::ContentStore;

/// Capacity of the change feed channel
const FEED_CAPACITY: usize = 1024;

/// How often storage is flushed and revocations are purged
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Kind of change to a catalog record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Change notifications pushed over the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentEvent {
    /// First message on a feed connection: every episode's like count
    Snapshot {
        server_time: i64,
        likes: BTreeMap<EpisodeId, u64>,
    },
    LikesChanged { episode_id: EpisodeId, likes: u64 },
    PlaysChanged { episode_id: EpisodeId, plays: u64 },
    EpisodeChanged { episode_id: EpisodeId, change: ChangeKind },
    TeamChanged { member_id: String, change: ChangeKind },
    GalleryChanged { item_id: String, change: ChangeKind },
    SubscriberAdded { total: usize },
}

/// Shared application state
pub struct AppState {
    pub store: ContentStore,
    pub auth: AuthService,
    pub config: ServerConfig,
    events: broadcast::Sender<ContentEvent>,
    shutdown_tx: broadcast::Sender<()>,
    started_at: Instant,
}

impl AppState {
    pub fn new(store: ContentStore, config: ServerConfig) -> Result<Self, AuthError> {
        let auth = AuthService::new(config.admins.clone(), &config.jwt_secret, config.session_ttl_secs)?;
        let (events, _) = broadcast::channel(FEED_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            store,
            auth,
            config,
            events,
            shutdown_tx,
            started_at: Instant::now(),
        })
    }

    /// Push a change to every feed listener
    pub fn publish(&self, event: ContentEvent) {
        // No listeners is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContentEvent> {
        self.events.subscribe()
    }

    pub fn feed_listeners(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop background tasks and open feeds
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    fn maintenance(&self) {
        self.auth.purge_revoked();
        if let Err(e) = self.store.flush() {
            error!("Periodic flush failed: {}", e);
        }
    }

    /// Start periodic maintenance
    pub fn start_background_tasks(self: Arc<Self>) -> BackgroundTaskHandles {
        let state = self.clone();

        let maintenance_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            let mut shutdown = state.shutdown_receiver();

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        state.maintenance();
                        debug!("Maintenance pass done");
                    }
                    _ = shutdown.recv() => {
                        info!("Maintenance task shutting down");
                        // Final flush
                        state.maintenance();
                        break;
                    }
                }
            }
        });

        BackgroundTaskHandles { maintenance_task }
    }
}

/// Handles for background tasks
pub struct BackgroundTaskHandles {
    pub maintenance_task: tokio::task::JoinHandle<()>,
}

impl BackgroundTaskHandles {
    /// Wait for all tasks to complete
    pub async fn wait(self) {
        let _ = self.maintenance_task.await;
    }
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.map(HeaderValue::from_str) {
        Some(Ok(value)) => AllowOrigin::exact(value),
        Some(Err(e)) => {
            warn!("Ignoring invalid CORS_ORIGIN: {}", e);
            AllowOrigin::from(Any)
        }
        None => AllowOrigin::from(Any),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

/// Build the full application router
pub fn router(state: Arc<AppState>) -> Router {
    // Base64 inflates uploads by a third; leave room for the other fields
    let body_limit = state.config.max_upload_bytes / 3 * 4 + 64 * 1024;
    let cors = cors_layer(state.config.cors_origin.as_deref());

    Router::new()
        // Health check
        .route("/health", get(public::health_check))
        // Public catalog
        .route("/api/episodes", get(public::list_episodes))
        .route("/api/episodes/featured", get(public::featured_episodes))
        .route("/api/episodes/:id", get(public::get_episode))
        .route("/api/episodes/:id/likes", get(public::get_likes))
        .route("/api/episodes/:id/like", post(public::like_episode))
        .route("/api/episodes/:id/play", post(public::play_episode))
        .route("/api/team", get(public::list_team))
        .route("/api/gallery", get(public::list_gallery))
        .route("/api/subscribers", post(public::subscribe))
        .route("/media/*key", get(public::get_media))
        // Change feed
        .route("/ws/feed", get(feed::ws_handler))
        // Sessions
        .route("/api/auth/login", post(admin::login))
        .route("/api/auth/logout", post(admin::logout))
        .route("/api/auth/me", get(admin::me))
        // Operator CRUD
        .route("/api/admin/episodes", post(admin::create_episode))
        .route(
            "/api/admin/episodes/:id",
            put(admin::update_episode).delete(admin::delete_episode),
        )
        .route("/api/admin/team", post(admin::create_team_member))
        .route(
            "/api/admin/team/:id",
            put(admin::update_team_member).delete(admin::delete_team_member),
        )
        .route("/api/admin/gallery", post(admin::create_gallery_item))
        .route("/api/admin/gallery/:id", delete(admin::delete_gallery_item))
        .route("/api/admin/subscribers", get(admin::list_subscribers))
        .route("/api/admin/subscribers.csv", get(admin::export_subscribers))
        .route("/api/admin/stats", get(admin::dashboard_stats))
        // Add state and middleware
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
