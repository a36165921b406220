//! Visitor-facing handlers.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::{AppState, ContentEvent};
use crate::catalog::{normalize_email, CatalogError, Episode, EpisodePage, EpisodeQuery, GalleryItem, Subscriber, TeamMember};
use crate::error::{ApiError, ApiResult};
use crate::storage::{CounterField, StorageError};
use crate::sync::LikeCount;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    episodes: usize,
    subscribers: usize,
    feed_listeners: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayCount {
    pub episode_id: String,
    pub plays: u64,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub email: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.store.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        episodes: stats.episode_count,
        subscribers: stats.subscriber_count,
        feed_listeners: state.feed_listeners(),
    })
}

pub async fn list_episodes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EpisodeQuery>,
) -> ApiResult<Json<EpisodePage>> {
    let episodes = state.store.list_episodes()?;
    Ok(Json(query.apply(episodes)))
}

pub async fn featured_episodes(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Episode>>> {
    let episodes = state.store.list_episodes()?;
    Ok(Json(EpisodeQuery::featured().apply(episodes).items))
}

pub async fn get_episode(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Episode>> {
    state
        .store
        .get_episode(&id)?
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

/// Authoritative like count
pub async fn get_likes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<LikeCount>> {
    let likes = state.store.counter(&id, CounterField::Likes)?;
    Ok(Json(LikeCount { episode_id: id, likes }))
}

/// Record one like and answer with the count after it was applied
pub async fn like_episode(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<LikeCount>> {
    let likes = state.store.increment(&id, CounterField::Likes, 1)?;
    debug!("Episode {} now has {} likes", id, likes);

    state.publish(ContentEvent::LikesChanged {
        episode_id: id.clone(),
        likes,
    });
    Ok(Json(LikeCount { episode_id: id, likes }))
}

pub async fn play_episode(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<PlayCount>> {
    let plays = state.store.increment(&id, CounterField::Plays, 1)?;

    state.publish(ContentEvent::PlaysChanged {
        episode_id: id.clone(),
        plays,
    });
    Ok(Json(PlayCount { episode_id: id, plays }))
}

pub async fn list_team(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<TeamMember>>> {
    let mut team = state.store.list_team()?;
    team.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(team))
}

pub async fn list_gallery(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<GalleryItem>>> {
    Ok(Json(state.store.list_gallery()?))
}

/// Newsletter sign-up
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubscribeRequest>,
) -> ApiResult<(StatusCode, Json<Subscriber>)> {
    let email = normalize_email(&payload.email)?;

    let subscriber = state.store.add_subscriber(&email).map_err(|e| match e {
        StorageError::AlreadyExists(email) => ApiError::from(CatalogError::DuplicateSubscriber(email)),
        other => ApiError::from(other),
    })?;
    info!("New subscriber {}", subscriber.id);

    state.publish(ContentEvent::SubscriberAdded {
        total: state.store.subscriber_count(),
    });
    Ok((StatusCode::CREATED, Json(subscriber)))
}

/// Serve an uploaded image
pub async fn get_media(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    let object = state
        .store
        .get_media(&key)?
        .ok_or(ApiError::NotFound(key))?;

    Ok((
        [
            (header::CONTENT_TYPE, object.content_type),
            (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
        ],
        object.data,
    )
        .into_response())
}
