/// Drive the REST router in-process: register, befriend, chat and post
/// without opening a socket.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use ping_api::auth::AppStateInner;
use ping_sync::{Backend, Services};

const SECRET: &str = "test-secret";

fn app() -> Router {
    let services = Services::new(Backend::in_memory().unwrap());
    ping_api::router(Arc::new(AppStateInner {
        services,
        jwt_secret: SECRET.into(),
        feed_limit: 20,
    }))
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(v) => {
            req = req.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn register(app: &Router, name: &str, ping_id: &str) -> (String, String) {
    let (status, body) = call(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "email": format!("{}@example.com", name),
            "password": "secret1",
            "display_name": name,
            "ping_id": ping_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    (
        body["user_id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn protected_routes_need_a_token() {
    let app = app();
    let (status, _) = call(&app, "GET", "/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/users/me", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_login_and_lookup() {
    let app = app();
    let (alice_id, token) = register(&app, "alice", "alice01").await;

    let (status, body) = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "email": "other@example.com",
            "password": "secret1",
            "display_name": "Other",
            "ping_id": "alice01",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("alice01"));

    let (status, body) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": "alice@example.com", "password": "secret1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ping_id"], "alice01");

    let (status, _) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": "alice@example.com", "password": "nope-nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&app, "GET", "/users/by-ping-id/alice01", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], alice_id.as_str());
    assert_eq!(body["user"]["displayName"], "alice");

    let (status, _) = call(&app, "GET", "/users/by-ping-id/nobody", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &app,
        "PATCH",
        "/users/me",
        Some(&token),
        Some(json!({ "display_name": "Alice A." })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["displayName"], "Alice A.");
}

#[tokio::test]
async fn friends_and_messages() {
    let app = app();
    let (alice_id, alice) = register(&app, "alice", "alice01").await;
    let (bob_id, bob) = register(&app, "bob", "bob002").await;
    let (_, carol) = register(&app, "carol", "carol01").await;

    let (status, _) = call(&app, "POST", "/friends", Some(&alice), Some(json!({ "friend_id": alice_id }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, "POST", "/friends", Some(&alice), Some(json!({ "friend_id": bob_id }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let chat_id = body["chat_id"].as_str().unwrap().to_string();

    let (_, body) = call(&app, "GET", "/friends", Some(&bob), None).await;
    assert_eq!(body["friends"][0]["friendUserId"], alice_id.as_str());

    let uri = format!("/chats/{}/messages", chat_id);
    let (status, _) = call(&app, "POST", &uri, Some(&alice), Some(json!({ "text": "hi bob" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(&app, "GET", &uri, Some(&carol), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = call(&app, "GET", &uri, Some(&bob), None).await;
    assert_eq!(body["messages"][0]["text"], "hi bob");
    assert_eq!(body["messages"][0]["status"], "sent");

    let read = format!("/chats/{}/read", chat_id);
    let (_, body) = call(&app, "POST", &read, Some(&bob), None).await;
    assert_eq!(body["marked"], 1);
    let (_, body) = call(&app, "POST", &read, Some(&bob), None).await;
    assert_eq!(body["marked"], 0);
}

#[tokio::test]
async fn posts_likes_and_visibility() {
    let app = app();
    let (_, alice) = register(&app, "alice", "alice01").await;
    let (bob_id, bob) = register(&app, "bob", "bob002").await;
    let (_, carol) = register(&app, "carol", "carol01").await;
    call(&app, "POST", "/friends", Some(&alice), Some(json!({ "friend_id": bob_id }))).await;

    let (status, post) = call(&app, "POST", "/posts", Some(&alice), Some(json!({ "text": "hello" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let post_id = post["id"].as_str().unwrap().to_string();

    let (_, like) = call(&app, "POST", &format!("/posts/{}/likes", post_id), Some(&bob), None).await;
    assert_eq!(like["liked"], true);
    assert_eq!(like["like_count"], 1);

    let (_, feed) = call(&app, "GET", "/feed", Some(&bob), None).await;
    assert_eq!(feed["posts"][0]["is_liked_by_me"], true);
    assert_eq!(feed["posts"][0]["author_name"], "alice");

    let (_, feed) = call(&app, "GET", "/feed", Some(&alice), None).await;
    assert_eq!(feed["posts"][0]["like_count"], 1);
    assert_eq!(feed["posts"][0]["is_liked_by_me"], false);

    let (_, feed) = call(&app, "GET", "/feed?limit=5", Some(&carol), None).await;
    assert_eq!(feed["posts"].as_array().unwrap().len(), 0);

    let comments = format!("/posts/{}/comments", post_id);
    let (status, _) = call(&app, "POST", &comments, Some(&bob), Some(json!({ "text": "nice" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, body) = call(&app, "GET", &comments, Some(&alice), None).await;
    assert_eq!(body["comments"][0]["text"], "nice");

    let (status, _) = call(&app, "DELETE", &format!("/posts/{}", post_id), Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "DELETE", &format!("/posts/{}", post_id), Some(&alice), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn avatar_upload_and_download() {
    let app = app();
    let (_, token) = register(&app, "alice", "alice01").await;

    let req = Request::builder()
        .method("PUT")
        .uri("/users/me/avatar")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(&b"\x89PNG fake"[..]))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&resp.into_body().collect().await.unwrap().to_bytes()).unwrap();
    let blob_id = body["user"]["profileImage"].as_str().unwrap().to_string();

    let req = Request::builder()
        .uri(format!("/blobs/{}", blob_id))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"\x89PNG fake");
}
