mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::Value;

use gighive_api::identity::Session;

use common::{TestApp, body_json};

fn location(response: &axum::http::Response<Body>) -> String {
    response.headers()[header::LOCATION].to_str().unwrap().to_string()
}

async fn get(app: &TestApp, uri: &str) -> axum::http::Response<Body> {
    app.send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn form(app: &TestApp, uri: &str, token: Option<&str>, body: &str) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = app.send(builder.body(Body::from(body.to_string())).unwrap()).await;
    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test]
async fn callback_provisions_user_and_freelancer_profile() {
    let app = TestApp::new();
    app.identity.sessions.lock().unwrap().insert(
        "good-code".into(),
        Session {
            subject: "u_oauth".into(),
            email: Some("ada@example.com".into()),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            is_freelancer: true,
        },
    );

    let response = get(&app, "/auth/callback?code=good-code&next=%2Fdashboard").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/dashboard");

    let user = app.state.db.get_user_by_clerk_id("u_oauth").unwrap().unwrap().into_model();
    assert_eq!(user.email.as_deref(), Some("ada@example.com"));
    assert!(user.is_freelancer);
    let profile = app.state.db.get_profile(user.id).unwrap().unwrap();
    assert_eq!(profile.display_name.as_deref(), Some("Ada Lovelace"));

    // A second sign-in does not duplicate anything.
    let response = get(&app, "/auth/callback?code=good-code").await;
    assert_eq!(location(&response), "/account");
    let again = app.state.db.get_user_by_clerk_id("u_oauth").unwrap().unwrap();
    assert_eq!(again.id, user.id.to_string());
}

#[tokio::test]
async fn callback_ignores_offsite_next() {
    let app = TestApp::new();
    app.identity
        .sessions
        .lock()
        .unwrap()
        .insert("code".into(), Session { subject: "u_2".into(), ..Default::default() });

    let response = get(&app, "/auth/callback?code=code&next=%2F%2Fevil.example.com").await;
    assert_eq!(location(&response), "/account");
    let user = app.state.db.get_user_by_clerk_id("u_2").unwrap().unwrap();
    assert!(!user.is_freelancer);
}

#[tokio::test]
async fn callback_failures_redirect_to_error_page() {
    let app = TestApp::new();

    let response = get(&app, "/auth/callback?code=unknown").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/auth/error?error="));

    let response = get(&app, "/auth/callback").await;
    assert_eq!(location(&response), "/auth/error?error=Missing+authorization+code");
}

#[tokio::test]
async fn password_reset_uses_site_redirect() {
    let app = TestApp::new();

    let (status, body) = form(&app, "/auth/password/reset", None, "email=ada%40example.com").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "success": true }));
    assert_eq!(
        app.identity.resets.lock().unwrap().as_slice(),
        [("ada@example.com".to_string(), "http://localhost:3000/auth/update-password".to_string())]
    );

    let (status, body) = form(&app, "/auth/password/reset", None, "email=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn password_update_enforces_minimum_length() {
    let app = TestApp::new();
    let (_, token) = app.user("u_1");

    let (status, body) = form(&app, "/auth/password/update", Some(&token), "password=12345").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Password must be at least 6 characters");
    assert!(app.identity.password_updates.lock().unwrap().is_empty());

    let (status, body) = form(&app, "/auth/password/update", Some(&token), "password=123456").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(app.identity.password_updates.lock().unwrap()[0].0, "u_1");

    let (status, _) = form(&app, "/auth/password/update", None, "password=123456").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_returns_the_local_user() {
    let app = TestApp::new();
    let (user_id, token) = app.user("u_1");

    let (status, me) = app.json("GET", "/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], user_id.to_string());
    assert_eq!(me["clerk_id"], "u_1");

    // Valid token, but no local row.
    let (status, _) = app.json("GET", "/me", Some(&common::token("u_ghost")), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
