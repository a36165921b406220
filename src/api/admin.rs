//! Operator handlers. Everything except login requires a bearer token.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{AppState, ChangeKind, ContentEvent};
use crate::auth::{AuthError, SessionClaims};
use crate::catalog::{
    export_file_name, subscribers_csv, DashboardStats, Episode, EpisodeDraft, GalleryDraft,
    GalleryItem, ImageUpload, Subscriber, TeamMember, TeamMemberDraft,
};
use crate::error::{ApiError, ApiResult};

/// An authenticated operator session
#[derive(Debug, Clone)]
pub struct AdminSession(pub SessionClaims);

/// Token from an `Authorization: Bearer <token>` header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        let claims = state.auth.authenticate(token)?;
        Ok(AdminSession(claims))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub email: String,
    pub name: String,
    pub role: String,
}

impl From<&SessionClaims> for UserInfo {
    fn from(claims: &SessionClaims) -> Self {
        Self {
            email: claims.sub.clone(),
            name: claims.name.clone(),
            role: claims.role.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: u64,
    pub user: UserInfo,
}

// ----------------------------------------------------------------------
// Sessions
// ----------------------------------------------------------------------

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let session = state.auth.login(&payload.email, &payload.password)?;

    Ok(Json(LoginResponse {
        user: UserInfo::from(&session.claims),
        token: session.token,
        expires_at: session.expires_at,
    }))
}

pub async fn logout(State(state): State<Arc<AppState>>, AdminSession(claims): AdminSession) -> StatusCode {
    state.auth.logout(&claims);
    StatusCode::NO_CONTENT
}

pub async fn me(AdminSession(claims): AdminSession) -> Json<UserInfo> {
    Json(UserInfo::from(&claims))
}

// ----------------------------------------------------------------------
// Uploads
// ----------------------------------------------------------------------

/// Store an uploaded image and return the URL it is served under
fn store_upload(state: &AppState, folder: &str, upload: Option<ImageUpload>) -> ApiResult<Option<String>> {
    let Some(upload) = upload else {
        return Ok(None);
    };
    upload.validate()?;
    let bytes = upload.decode(state.config.max_upload_bytes)?;
    let key = state
        .store
        .put_media(folder, &upload.file_name, &upload.content_type, bytes)?;
    Ok(Some(format!("/media/{}", key)))
}

// ----------------------------------------------------------------------
// Episodes
// ----------------------------------------------------------------------

pub async fn create_episode(
    State(state): State<Arc<AppState>>,
    AdminSession(claims): AdminSession,
    Json(mut draft): Json<EpisodeDraft>,
) -> ApiResult<(StatusCode, Json<Episode>)> {
    draft.validate()?;
    if let Some(url) = store_upload(&state, "episodes", draft.image.take())? {
        draft.image_url = url;
    }

    let episode = state.store.create_episode(draft)?;
    info!("{} created episode {} ({})", claims.sub, episode.title, episode.id);

    state.publish(ContentEvent::EpisodeChanged {
        episode_id: episode.id.clone(),
        change: ChangeKind::Created,
    });
    Ok((StatusCode::CREATED, Json(episode)))
}

/// Replace the editable fields; likes and plays are kept
pub async fn update_episode(
    State(state): State<Arc<AppState>>,
    AdminSession(claims): AdminSession,
    Path(id): Path<String>,
    Json(mut draft): Json<EpisodeDraft>,
) -> ApiResult<Json<Episode>> {
    draft.validate()?;
    if !state.store.episode_exists(&id)? {
        return Err(ApiError::NotFound(id));
    }
    if let Some(url) = store_upload(&state, "episodes", draft.image.take())? {
        draft.image_url = url;
    }

    let episode = state.store.update_episode(&id, draft)?;
    info!("{} updated episode {}", claims.sub, episode.id);

    state.publish(ContentEvent::EpisodeChanged {
        episode_id: episode.id.clone(),
        change: ChangeKind::Updated,
    });
    Ok(Json(episode))
}

pub async fn delete_episode(
    State(state): State<Arc<AppState>>,
    AdminSession(claims): AdminSession,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state.store.delete_episode(&id)? {
        return Err(ApiError::NotFound(id));
    }
    info!("{} deleted episode {}", claims.sub, id);

    state.publish(ContentEvent::EpisodeChanged {
        episode_id: id,
        change: ChangeKind::Deleted,
    });
    Ok(StatusCode::NO_CONTENT)
}

// ----------------------------------------------------------------------
// Team
// ----------------------------------------------------------------------

pub async fn create_team_member(
    State(state): State<Arc<AppState>>,
    AdminSession(_): AdminSession,
    Json(mut draft): Json<TeamMemberDraft>,
) -> ApiResult<(StatusCode, Json<TeamMember>)> {
    draft.validate()?;
    if let Some(url) = store_upload(&state, "team", draft.image.take())? {
        draft.image_url = url;
    }

    let member = state.store.create_team_member(draft)?;
    state.publish(ContentEvent::TeamChanged {
        member_id: member.id.clone(),
        change: ChangeKind::Created,
    });
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn update_team_member(
    State(state): State<Arc<AppState>>,
    AdminSession(_): AdminSession,
    Path(id): Path<String>,
    Json(mut draft): Json<TeamMemberDraft>,
) -> ApiResult<Json<TeamMember>> {
    draft.validate()?;
    if state.store.get_team_member(&id)?.is_none() {
        return Err(ApiError::NotFound(id));
    }
    if let Some(url) = store_upload(&state, "team", draft.image.take())? {
        draft.image_url = url;
    }

    let member = state.store.update_team_member(&id, draft)?;
    state.publish(ContentEvent::TeamChanged {
        member_id: member.id.clone(),
        change: ChangeKind::Updated,
    });
    Ok(Json(member))
}

pub async fn delete_team_member(
    State(state): State<Arc<AppState>>,
    AdminSession(_): AdminSession,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state.store.delete_team_member(&id)? {
        return Err(ApiError::NotFound(id));
    }
    state.publish(ContentEvent::TeamChanged {
        member_id: id,
        change: ChangeKind::Deleted,
    });
    Ok(StatusCode::NO_CONTENT)
}

// ----------------------------------------------------------------------
// Gallery
// ----------------------------------------------------------------------

pub async fn create_gallery_item(
    State(state): State<Arc<AppState>>,
    AdminSession(_): AdminSession,
    Json(draft): Json<GalleryDraft>,
) -> ApiResult<(StatusCode, Json<GalleryItem>)> {
    draft.validate()?;
    let GalleryDraft { title, cols, rows, image } = draft;

    let image_url = store_upload(&state, "gallery", Some(image))?
        .ok_or_else(|| ApiError::BadRequest("Gallery items need an image".to_string()))?;

    let item = state.store.create_gallery_item(title, cols, rows, image_url)?;
    state.publish(ContentEvent::GalleryChanged {
        item_id: item.id.clone(),
        change: ChangeKind::Created,
    });
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn delete_gallery_item(
    State(state): State<Arc<AppState>>,
    AdminSession(_): AdminSession,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state.store.delete_gallery_item(&id)? {
        return Err(ApiError::NotFound(id));
    }
    state.publish(ContentEvent::GalleryChanged {
        item_id: id,
        change: ChangeKind::Deleted,
    });
    Ok(StatusCode::NO_CONTENT)
}

// ----------------------------------------------------------------------
// Subscribers and dashboard
// ----------------------------------------------------------------------

/// Newest sign-ups first
pub async fn list_subscribers(
    State(state): State<Arc<AppState>>,
    AdminSession(_): AdminSession,
) -> ApiResult<Json<Vec<Subscriber>>> {
    let mut subscribers = state.store.list_subscribers()?;
    subscribers.sort_by(|a, b| b.subscribed_at.cmp(&a.subscribed_at).then_with(|| a.email.cmp(&b.email)));
    Ok(Json(subscribers))
}

pub async fn export_subscribers(
    State(state): State<Arc<AppState>>,
    AdminSession(claims): AdminSession,
) -> ApiResult<impl IntoResponse> {
    let subscribers = state.store.list_subscribers()?;
    let file_name = export_file_name(chrono::Utc::now().date_naive());
    info!("{} exported {} subscribers", claims.sub, subscribers.len());

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        subscribers_csv(&subscribers),
    ))
}

pub async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
    AdminSession(_): AdminSession,
) -> ApiResult<Json<DashboardStats>> {
    let episodes = state.store.list_episodes()?;
    let stats = state.store.stats();

    Ok(Json(
        DashboardStats {
            team_members: stats.team_count,
            gallery_items: stats.gallery_count,
            subscribers: stats.subscriber_count,
            ..Default::default()
        }
        .with_episodes(&episodes),
    ))
}
