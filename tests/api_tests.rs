use atelier::config::Config;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

struct TestApp {
    router: Router,
    data_dir: TempDir,
}

async fn spawn_app() -> TestApp {
    let data_dir = tempfile::tempdir().expect("Failed to create temp dir");

    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();
    config.general.max_db_connections = 1;
    config.general.min_db_connections = 1;
    config.general.data_dir = data_dir.path().to_string_lossy().into_owned();
    config.security.token_secret = Some("integration-test-secret".to_string());
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;

    let state = atelier::api::create_app_state_from_config(config, None)
        .await
        .expect("Failed to create app state");

    TestApp {
        router: atelier::api::router(state),
        data_dir,
    }
}

impl TestApp {
    async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_string(&json).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn signup(&self, username: &str, password: &str) -> String {
        let (status, _) = self
            .request(
                "POST",
                "/api/users",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        self.login(username, password).await
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let (status, body) = self
            .request(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["data"]["token"].as_str().unwrap().to_string()
    }
}

fn png_base64() -> String {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(b"pixels");
    STANDARD.encode(bytes)
}

#[tokio::test]
async fn test_signup_login_and_me() {
    let app = spawn_app().await;
    let token = app.signup("alice", "hunter2").await;

    let (status, body) = app.request("GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "alice");
    assert!(body["data"].get("password_hash").is_none());

    let (status, _) = app
        .request(
            "POST",
            "/api/users",
            None,
            Some(json!({ "username": "ALICE", "password": "other" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "wrong" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_rejections_use_fixed_messages() {
    let app = spawn_app().await;
    let token = app.signup("alice", "hunter2").await;

    let (status, body) = app.request("GET", "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Could not verify");

    let (status, body) = app
        .request("GET", "/api/auth/me", Some("not a token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Token is incorrect format");

    let (head, signature) = token.rsplit_once('.').unwrap();
    let mut flipped: Vec<char> = signature.chars().collect();
    flipped[0] = if flipped[0] == 'A' { 'B' } else { 'A' };
    let tampered = format!("{head}.{}", flipped.into_iter().collect::<String>());

    let (status, body) = app
        .request("GET", "/api/auth/me", Some(&tampered), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Token compromised");
}

#[tokio::test]
async fn test_profile_privacy_and_self_only_updates() {
    let app = spawn_app().await;
    let alice = app.signup("alice", "hunter2").await;
    let bob = app.signup("bob", "swordfish").await;

    let update = json!({
        "name": { "value": "Alice A.", "public": true },
        "email": { "value": "alice@example.com", "public": false }
    });
    let (status, _) = app
        .request("PUT", "/api/users/alice", Some(&alice), Some(update.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.request("GET", "/api/users/alice", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Alice A.");
    assert!(body["data"].get("email").is_none());

    let (status, _) = app
        .request("PUT", "/api/users/alice", Some(&bob), Some(update))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_rename_reissues_token_and_retires_old_one() {
    let app = spawn_app().await;
    let old_token = app.signup("alice", "hunter2").await;

    let (status, body) = app
        .request(
            "PUT",
            "/api/users/alice",
            Some(&old_token),
            Some(json!({ "username": "alicia" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let new_token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body) = app
        .request("GET", "/api/auth/me", Some(&old_token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Could not verify");

    let (status, body) = app
        .request("GET", "/api/auth/me", Some(&new_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "alicia");

    let (status, _) = app.request("GET", "/api/users/alice", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_leaderboard_hides_soft_deleted_players() {
    let app = spawn_app().await;
    let alice = app.signup("alice", "hunter2").await;
    let bob = app.signup("bob", "swordfish").await;

    for (token, score) in [(&alice, 120), (&bob, 300), (&bob, 80)] {
        let (status, _) = app
            .request(
                "POST",
                "/api/games/snake/scores",
                Some(token),
                Some(json!({ "score": score })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app
        .request("GET", "/api/games/snake/leaderboard", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let board = body["data"].as_array().unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0]["username"], "bob");
    assert_eq!(board[0]["score"], 300);

    let (status, _) = app.request("DELETE", "/api/users/bob", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app
        .request("GET", "/api/games/snake/leaderboard", None, None)
        .await;
    let board = body["data"].as_array().unwrap();
    assert_eq!(board.len(), 1);
    assert_eq!(board[0]["username"], "alice");

    let (status, _) = app
        .request("GET", "/api/games/pong/leaderboard", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_drawings_upload_list_image_and_like() {
    let app = spawn_app().await;
    let alice = app.signup("alice", "hunter2").await;
    let bob = app.signup("bob", "swordfish").await;

    let (status, body) = app
        .request(
            "POST",
            "/api/drawings",
            Some(&alice),
            Some(json!({ "title": "sunset", "image": png_base64() })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(
            "POST",
            "/api/drawings",
            Some(&alice),
            Some(json!({ "title": "gif", "image": STANDARD.encode(b"GIF89a") })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app
        .request("GET", "/api/drawings?artist=alice", None, None)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["artist"], "alice");

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/drawings/{id}/image"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(bytes.starts_with(PNG_SIGNATURE));

    let like_uri = format!("/api/drawings/{id}/like");
    let (_, body) = app.request("POST", &like_uri, Some(&bob), None).await;
    assert_eq!(body["data"]["liked"], true);
    assert_eq!(body["data"]["likes"], 1);

    let (_, body) = app.request("GET", "/api/auth/me", Some(&bob), None).await;
    assert_eq!(body["data"]["liked_drawings"][0], id.as_str());

    let (_, body) = app.request("POST", &like_uri, Some(&bob), None).await;
    assert_eq!(body["data"]["liked"], false);
    assert_eq!(body["data"]["likes"], 0);
}

#[tokio::test]
async fn test_posts_comments_and_owner_only_delete() {
    let app = spawn_app().await;
    let alice = app.signup("alice", "hunter2").await;
    let bob = app.signup("bob", "swordfish").await;

    let (status, body) = app
        .request("POST", "/api/posts", Some(&alice), Some(json!({ "body": "hello" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let post_id = body["data"]["id"].as_i64().unwrap();

    let comments_uri = format!("/api/posts/{post_id}/comments");
    let (status, _) = app
        .request("POST", &comments_uri, Some(&bob), Some(json!({ "body": "hi alice" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = app.request("GET", "/api/posts", None, None).await;
    assert_eq!(body["data"][0]["comment_count"], 1);
    assert_eq!(body["data"][0]["author"], "alice");

    let (_, body) = app.request("GET", &comments_uri, None, None).await;
    assert_eq!(body["data"][0]["author"], "bob");

    let post_uri = format!("/api/posts/{post_id}");
    let (status, _) = app.request("DELETE", &post_uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.request("DELETE", &post_uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.request("GET", "/api/auth/me", Some(&bob), None).await;
    assert_eq!(body["data"]["comment_count"], 0);
    let (_, body) = app.request("GET", "/api/auth/me", Some(&alice), None).await;
    assert_eq!(body["data"]["post_count"], 0);

    let (status, _) = app.request("GET", &comments_uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_purge_cascades_and_frees_the_name() {
    let app = spawn_app().await;
    let carol = app.signup("carol", "pa55word").await;
    let dave = app.signup("dave", "pa55word").await;

    let (_, body) = app
        .request(
            "POST",
            "/api/drawings",
            Some(&carol),
            Some(json!({ "title": "cat", "image": png_base64() })),
        )
        .await;
    let drawing_id = body["data"]["id"].as_str().unwrap().to_string();
    app.request("POST", &format!("/api/drawings/{drawing_id}/like"), Some(&dave), None)
        .await;
    app.request("POST", "/api/posts", Some(&carol), Some(json!({ "body": "bye" })))
        .await;
    app.request(
        "POST",
        "/api/games/tetris/scores",
        Some(&carol),
        Some(json!({ "score": 42 })),
    )
    .await;

    let (status, body) = app
        .request("DELETE", "/api/users/carol/purge", Some(&carol), None)
        .await;
    assert_eq!(status, StatusCode::OK, "purge failed: {body}");
    assert_eq!(body["data"]["account_removed"], true);
    assert_eq!(body["data"]["drawings_removed"], 1);
    assert_eq!(body["data"]["posts_removed"], 1);
    assert_eq!(body["data"]["leaderboard_entries_removed"], 1);

    let (status, _) = app.request("GET", "/api/auth/me", Some(&carol), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = app.request("GET", "/api/auth/me", Some(&dave), None).await;
    assert!(body["data"]["liked_drawings"].as_array().unwrap().is_empty());

    let (_, body) = app.request("GET", "/api/drawings", None, None).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = app
        .request(
            "POST",
            "/api/users",
            None,
            Some(json!({ "username": "carol", "password": "again" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_partial_purge_is_a_500_naming_failed_steps() {
    let app = spawn_app().await;
    let carol = app.signup("carol", "pa55word").await;
    app.request(
        "POST",
        "/api/drawings",
        Some(&carol),
        Some(json!({ "title": "cat", "image": png_base64() })),
    )
    .await;

    // A directory where the lock file should be makes every lock attempt fail.
    let lock_path = app.data_dir.path().join("drawings.lock");
    let _ = std::fs::remove_file(&lock_path);
    std::fs::create_dir(&lock_path).unwrap();

    let (status, body) = app
        .request("DELETE", "/api/users/carol/purge", Some(&carol), None)
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("remove_drawings"), "{message}");
    assert!(message.contains("strip_likes"), "{message}");
    assert!(!message.contains("soft_delete"), "{message}");

    // The account itself is gone even though the cascade is unfinished.
    let (status, _) = app.request("GET", "/api/auth/me", Some(&carol), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health() {
    let app = spawn_app().await;
    let (status, body) = app.request("GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}
