use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use base64::Engine;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use podcast_server::{
    auth::AdminAccount,
    router,
    storage::{ContentStore, StorageConfig},
    sync::{HttpCounterStore, LikeOutcome, LikeSync, LikeSyncConfig},
    AppState, ServerConfig,
};

const ADMIN_EMAIL: &str = "direccion@escuela.example.org";
const ADMIN_PASSWORD: &str = "podcast-2024";

struct TestApp {
    _dir: TempDir,
    state: Arc<AppState>,
    app: Router,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("podcast.sled").to_string_lossy().to_string();

    let config = ServerConfig {
        storage: StorageConfig::new(path),
        jwt_secret: "integration-test-secret".to_string(),
        admins: vec![AdminAccount::from_password(
            ADMIN_EMAIL,
            ADMIN_PASSWORD,
            "Dirección",
            "admin",
        )],
        max_upload_bytes: 1024,
        ..Default::default()
    };
    let store = ContentStore::open(config.storage.clone()).unwrap();
    let state = Arc::new(AppState::new(store, config).unwrap());
    let app = router(state.clone());

    TestApp {
        _dir: dir,
        state,
        app,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    with_json("POST", uri, body, token)
}

fn with_json(method: &str, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn authed(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

async fn login(app: &Router) -> String {
    let (status, body) = send(
        app,
        post_json(
            "/api/auth/login",
            json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

fn episode_json(title: &str, category: &str, grade: &str, featured: bool) -> Value {
    json!({
        "title": title,
        "description": "Un episodio del podcast escolar",
        "author": "Maria y Juan",
        "grade": grade,
        "category": category,
        "duration": "15 min",
        "featured": featured
    })
}

async fn create_episode(app: &Router, token: &str, body: Value) -> Value {
    let (status, episode) = send(app, post_json("/api/admin/episodes", body, Some(token))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", episode);
    episode
}

#[tokio::test]
async fn test_health() {
    let t = test_app();
    let (status, body) = send(&t.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["episodes"], 0);
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let t = test_app();

    let (status, body) = send(
        &t.app,
        post_json("/api/admin/episodes", episode_json("x", "Cuentos", "1°", false), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(&t.app, authed("GET", "/api/admin/stats", "not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &t.app,
        post_json(
            "/api/auth/login",
            json!({ "email": ADMIN_EMAIL, "password": "wrong" }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_me_logout() {
    let t = test_app();
    let token = login(&t.app).await;

    let (status, me) = send(&t.app, authed("GET", "/api/auth/me", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], ADMIN_EMAIL);
    assert_eq!(me["role"], "admin");

    let (status, _) = send(&t.app, authed("POST", "/api/auth/logout", &token)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&t.app, authed("GET", "/api/auth/me", &token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_like_flow() {
    let t = test_app();
    let token = login(&t.app).await;
    let episode = create_episode(&t.app, &token, episode_json("Héroes", "Historia", "6° Grado", true)).await;
    let id = episode["id"].as_str().unwrap();
    assert_eq!(id.len(), 20);
    assert_eq!(episode["likes"], 0);

    let (status, body) = send(&t.app, post_json(&format!("/api/episodes/{}/like", id), json!({}), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "episode_id": id, "likes": 1 }));

    send(&t.app, post_json(&format!("/api/episodes/{}/like", id), json!({}), None)).await;
    let (status, body) = send(&t.app, get(&format!("/api/episodes/{}/likes", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["likes"], 2);

    let (status, body) = send(&t.app, post_json(&format!("/api/episodes/{}/play", id), json!({}), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plays"], 1);

    // Missing episodes are reported, never created
    let (status, body) = send(&t.app, post_json("/api/episodes/missing/like", json!({}), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("missing"));
    let (status, _) = send(&t.app, get("/api/episodes/missing/likes")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_edit_keeps_counters() {
    let t = test_app();
    let token = login(&t.app).await;
    let episode = create_episode(&t.app, &token, episode_json("Borrador", "Ciencia", "4°", false)).await;
    let id = episode["id"].as_str().unwrap().to_string();

    for _ in 0..3 {
        send(&t.app, post_json(&format!("/api/episodes/{}/like", id), json!({}), None)).await;
    }

    let (status, updated) = send(
        &t.app,
        with_json(
            "PUT",
            &format!("/api/admin/episodes/{}", id),
            episode_json("El Sistema Solar", "Ciencia", "4°", true),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], "El Sistema Solar");
    assert_eq!(updated["likes"], 3);
    assert_eq!(updated["featured"], true);

    let (status, _) = send(
        &t.app,
        with_json(
            "PUT",
            "/api/admin/episodes/missing",
            episode_json("x", "Ciencia", "4°", false),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.app, authed("DELETE", &format!("/api/admin/episodes/{}", id), &token)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&t.app, get(&format!("/api/episodes/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_draft_rejected() {
    let t = test_app();
    let token = login(&t.app).await;

    let (status, body) = send(
        &t.app,
        post_json("/api/admin/episodes", episode_json("  ", "Cuentos", "1°", false), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("title"));
}

#[tokio::test]
async fn test_listing_filters() {
    let t = test_app();
    let token = login(&t.app).await;
    create_episode(&t.app, &token, episode_json("Cuento del bosque", "Cuentos", "1° Grado", false)).await;
    create_episode(&t.app, &token, episode_json("Volcanes", "Ciencia", "5° Grado", true)).await;
    create_episode(&t.app, &token, episode_json("Independencia", "Historia", "6° Grado", true)).await;

    let (_, page) = send(&t.app, get("/api/episodes")).await;
    assert_eq!(page["total"], 3);

    let (_, page) = send(&t.app, get("/api/episodes?category=Ciencia")).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["title"], "Volcanes");

    let (_, page) = send(&t.app, get("/api/episodes?category=Todos&q=volc")).await;
    assert_eq!(page["total"], 1);

    let (_, page) = send(&t.app, get("/api/episodes?limit=2")).await;
    assert_eq!(page["items"].as_array().unwrap().len(), 2);
    assert_eq!(page["has_more"], true);

    let (_, featured) = send(&t.app, get("/api/episodes/featured")).await;
    assert_eq!(featured.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_subscribe_and_export() {
    let t = test_app();
    let token = login(&t.app).await;

    let (status, sub) = send(
        &t.app,
        post_json("/api/subscribers", json!({ "email": "  Ana@Example.org " }), None),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sub["email"], "ana@example.org");

    let (status, _) = send(
        &t.app,
        post_json("/api/subscribers", json!({ "email": "ana@example.org" }), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&t.app, post_json("/api/subscribers", json!({ "email": "nope" }), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, list) = send(&t.app, authed("GET", "/api/admin/subscribers", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let response = t
        .app
        .clone()
        .oneshot(authed("GET", "/api/admin/subscribers.csv", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.contains("subscribers_"));
    assert!(disposition.contains(".csv"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(csv.starts_with("Email,Date,Status\r\n"));
    assert!(csv.contains("ana@example.org,"));
    assert!(csv.contains(",Active"));
}

#[tokio::test]
async fn test_team_gallery_and_media() {
    let t = test_app();
    let token = login(&t.app).await;
    let png = base64::engine::general_purpose::STANDARD.encode([0x89, b'P', b'N', b'G', 1, 2, 3]);

    let (status, member) = send(
        &t.app,
        post_json(
            "/api/admin/team",
            json!({
                "name": "Sofía",
                "role": "Locutora",
                "area": "Contenido",
                "image": { "file_name": "sofia.png", "content_type": "image/png", "data_base64": png }
            }),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let image_url = member["image_url"].as_str().unwrap().to_string();
    assert!(image_url.starts_with("/media/team/"));

    let response = t.app.clone().oneshot(get(&image_url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let (status, item) = send(
        &t.app,
        post_json(
            "/api/admin/gallery",
            json!({
                "title": "Grabación",
                "cols": 2,
                "image": { "file_name": "foto.png", "content_type": "image/png", "data_base64": png }
            }),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(item["cols"], 2);
    assert_eq!(item["rows"], 1);

    // Over the configured upload limit
    let big = base64::engine::general_purpose::STANDARD.encode(vec![0u8; 2048]);
    let (status, _) = send(
        &t.app,
        post_json(
            "/api/admin/gallery",
            json!({ "image": { "file_name": "big.png", "content_type": "image/png", "data_base64": big } }),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, team) = send(&t.app, get("/api/team")).await;
    assert_eq!(team.as_array().unwrap().len(), 1);
    let (_, gallery) = send(&t.app, get("/api/gallery")).await;
    assert_eq!(gallery.as_array().unwrap().len(), 1);

    let (status, stats) = send(&t.app, authed("GET", "/api/admin/stats", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["team_members"], 1);
    assert_eq!(stats["gallery_items"], 1);

    let (status, _) = send(&t.app, get("/media/team/missing.png")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_likes_are_published_on_the_feed() {
    let t = test_app();
    let token = login(&t.app).await;
    let episode = create_episode(&t.app, &token, episode_json("Debate", "Debate", "6°", false)).await;
    let id = episode["id"].as_str().unwrap();

    let mut feed = t.state.subscribe();
    send(&t.app, post_json(&format!("/api/episodes/{}/like", id), json!({}), None)).await;

    let event = serde_json::to_value(feed.recv().await.unwrap()).unwrap();
    assert_eq!(event, json!({ "type": "likes_changed", "episode_id": id, "likes": 1 }));
}

async fn next_feed_frame<S>(ws: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("feed frame within 5s")
            .expect("feed still open")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_feed_sends_snapshot_then_changes() {
    let t = test_app();
    let token = login(&t.app).await;
    let episode = create_episode(&t.app, &token, episode_json("Debate", "Debate", "6°", false)).await;
    let id = episode["id"].as_str().unwrap().to_string();
    send(&t.app, post_json(&format!("/api/episodes/{}/like", id), json!({}), None)).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = t.app.clone();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/feed", addr))
        .await
        .unwrap();

    let snapshot = next_feed_frame(&mut ws).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["likes"].as_object().unwrap().len(), 1);
    assert_eq!(snapshot["likes"][id.as_str()], 1);
    assert!(snapshot["server_time"].as_i64().unwrap() > 0);

    send(&t.app, post_json(&format!("/api/episodes/{}/like", id), json!({}), None)).await;

    let event = next_feed_frame(&mut ws).await;
    assert_eq!(event, json!({ "type": "likes_changed", "episode_id": id, "likes": 2 }));
}

/// Full loop: optimistic client over HTTP against a running server
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_like_sync_over_http() {
    let t = test_app();
    let episode = t
        .state
        .store
        .create_episode(serde_json::from_value(episode_json("Entrevista", "Entrevistas", "3°", false)).unwrap())
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = t.app.clone();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let store = Arc::new(HttpCounterStore::with_client(client, &format!("http://{}", addr)).unwrap());
    let sync = LikeSync::new(store, LikeSyncConfig::default().with_timeout(Duration::from_secs(5)));
    sync.cache().seed([(episode.id.clone(), 0)]);

    let outcome = sync.record_like_and_wait(&episode.id, 0).await.unwrap();
    assert_eq!(
        outcome,
        LikeOutcome::Reconciled {
            episode_id: episode.id.clone(),
            likes: 1
        }
    );

    let outcome = sync.record_like_and_wait("missing", 4).await.unwrap();
    assert!(outcome.error().unwrap().is_stale_view());
    assert_eq!(sync.likes("missing"), 4);

    assert_eq!(sync.refresh(&episode.id).await, Ok(1));
    let outcome = sync.record_like_and_wait(&episode.id, 1).await.unwrap();
    assert_eq!(outcome.likes(), 2);
    assert_eq!(sync.likes(&episode.id), 2);
    assert!(!sync.is_busy(&episode.id));
}
