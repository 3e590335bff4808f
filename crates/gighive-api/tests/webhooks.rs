mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;

use common::{TestApp, token, user_event};

#[tokio::test]
async fn created_user_becomes_freelancer_after_profile_upsert() {
    let app = TestApp::new();

    let status = app.webhook(&user_event("user.created", "u_1", "a@example.com"), false).await;
    assert_eq!(status, StatusCode::OK);

    let user = app.state.db.get_user_by_clerk_id("u_1").unwrap().unwrap().into_model();
    assert_eq!(user.email.as_deref(), Some("a@example.com"));
    assert!(!user.is_freelancer);

    let (status, profile) =
        app.json("PUT", "/profile", Some(&token("u_1")), Some(json!({ "occupation": "designer" }))).await;
    assert_eq!(status, StatusCode::OK, "{profile}");
    assert_eq!(profile["occupation"], "designer");
    assert_eq!(profile["user_id"], user.id.to_string());

    let user = app.state.db.get_user_by_clerk_id("u_1").unwrap().unwrap().into_model();
    assert!(user.is_freelancer);
}

#[tokio::test]
async fn updated_event_refreshes_email_only() {
    let app = TestApp::new();
    app.webhook(&user_event("user.created", "u_1", "a@example.com"), false).await;
    let before = app.state.db.get_user_by_clerk_id("u_1").unwrap().unwrap();

    let status = app.webhook(&user_event("user.updated", "u_1", "b@example.com"), false).await;
    assert_eq!(status, StatusCode::OK);

    let after = app.state.db.get_user_by_clerk_id("u_1").unwrap().unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.email.as_deref(), Some("b@example.com"));
}

#[tokio::test]
async fn tampered_signature_is_rejected_without_writes() {
    let app = TestApp::new();

    let status = app.webhook(&user_event("user.created", "u_1", "a@example.com"), true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.state.db.get_user_by_clerk_id("u_1").unwrap().is_none());
}

#[tokio::test]
async fn missing_headers_are_rejected() {
    let app = TestApp::new();
    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/clerk")
        .body(Body::from(user_event("user.created", "u_1", "a@example.com").to_string()))
        .unwrap();

    assert_eq!(app.send(req).await.status(), StatusCode::BAD_REQUEST);
    assert!(app.state.db.get_user_by_clerk_id("u_1").unwrap().is_none());
}

#[tokio::test]
async fn missing_secret_is_a_server_error() {
    let app = TestApp::with_webhook_secret(None);
    let status = app.webhook(&user_event("user.created", "u_1", "a@example.com"), false).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn deleting_unknown_user_is_a_no_op() {
    let app = TestApp::new();
    let status = app.webhook(&json!({ "type": "user.deleted", "data": { "id": "u_missing", "deleted": true } }), false).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn deleted_event_removes_user_and_profile() {
    let app = TestApp::new();
    app.webhook(&user_event("user.created", "u_1", "a@example.com"), false).await;
    let (status, _) = app.json("PUT", "/profile", Some(&token("u_1")), Some(json!({ "skills": ["figma"] }))).await;
    assert_eq!(status, StatusCode::OK);

    let status = app.webhook(&json!({ "type": "user.deleted", "data": { "id": "u_1", "deleted": true } }), false).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.state.db.get_user_by_clerk_id("u_1").unwrap().is_none());

    // The session token no longer maps to a user.
    let (status, _) = app.json("GET", "/me", Some(&token("u_1")), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_event_types_are_acknowledged() {
    let app = TestApp::new();
    let status = app.webhook(&json!({ "type": "session.created", "data": { "id": "sess_1" } }), false).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn ignored_events_need_no_user_shaped_data() {
    let app = TestApp::new();
    let status = app.webhook(&json!({ "type": "organization.created", "data": { "name": "Acme" } }), false).await;
    assert_eq!(status, StatusCode::OK);

    let status = app.webhook(&json!({ "type": "email.created" }), false).await;
    assert_eq!(status, StatusCode::OK);

    // Events we do handle still require a user id.
    let status = app.webhook(&json!({ "type": "user.created", "data": { "email_addresses": [] } }), false).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
