mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::json;

use common::{TestApp, body_json};

#[tokio::test]
async fn upsert_replaces_collections_and_keeps_unset_fields() {
    let app = TestApp::new();
    let (user_id, token) = app.user("u_1");

    let (status, profile) = app
        .json(
            "PUT",
            "/profile",
            Some(&token),
            Some(json!({
                "display_name": "Ada",
                "occupation": "designer",
                "hourly_rate": 45.0,
                "categories": ["graphics-design", "photography"],
                "skills": ["figma", "illustrator"],
                "languages": [{ "language": "English", "proficiency": "native" }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{profile}");
    assert_eq!(profile["categories"].as_array().unwrap().len(), 2);

    let (status, profile) =
        app.json("PUT", "/profile", Some(&token), Some(json!({ "skills": ["photoshop"] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["display_name"], "Ada");
    assert_eq!(profile["occupation"], "designer");
    assert_eq!(profile["skills"], json!(["photoshop"]));
    assert_eq!(profile["categories"].as_array().unwrap().len(), 2);

    let (_, token_other) = app.user("u_2");
    let (status, seen) = app.json("GET", &format!("/profiles/{user_id}"), Some(&token_other), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seen["id"], profile["id"]);
}

#[tokio::test]
async fn unknown_category_rejects_the_whole_upsert() {
    let app = TestApp::new();
    let (_, token) = app.user("u_1");

    let (status, body) = app
        .json(
            "PUT",
            "/profile",
            Some(&token),
            Some(json!({ "occupation": "designer", "categories": ["graphics-design", "basket-weaving"] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("basket-weaving"));

    let (status, _) = app.json("GET", "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let user = app.state.db.get_user_by_clerk_id("u_1").unwrap().unwrap();
    assert!(!user.is_freelancer);
}

#[tokio::test]
async fn avatar_upload_records_path_and_type() {
    let app = TestApp::new();
    let (user_id, token) = app.user("u_1");
    app.json("PUT", "/profile", Some(&token), Some(json!({ "occupation": "designer" }))).await;

    let upload = |content_type: &'static str, body: Vec<u8>| {
        Request::builder()
            .method("POST")
            .uri("/profile/avatar")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    };

    let response = app.send(upload("text/plain", b"hello".to_vec())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send(upload("image/png", vec![0u8; 5 * 1024 * 1024 + 1])).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let response = app.send(upload("image/jpeg", b"\xff\xd8\xff fake jpeg".to_vec())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let stored = body_json(response).await;
    assert_eq!(stored["path"], format!("{user_id}/avatar.jpg"));

    let (_, profile) = app.json("GET", "/profile", Some(&token), None).await;
    assert_eq!(profile["avatar"]["bucket"], "avatars");
    assert_eq!(profile["avatar"]["content_type"], "image/jpeg");

    // Avatars are public.
    let download = app
        .send(Request::builder().uri(format!("/storage/avatars/{user_id}/avatar.jpg")).body(Body::empty()).unwrap())
        .await;
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.headers()[header::CONTENT_TYPE], "image/jpeg");
}

#[tokio::test]
async fn payment_info_keeps_only_last_four_digits() {
    let app = TestApp::new();
    let (_, token) = app.user("u_1");
    let payment = json!({
        "method": "bank_transfer",
        "account_holder": "Ada Lovelace",
        "account_number": "GB29 NWBK 6016 1331 9268 19",
        "currency": "gbp"
    });

    let (status, _) = app.json("PUT", "/profile/payment", Some(&token), Some(payment.clone())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.json("PUT", "/profile", Some(&token), Some(json!({ "occupation": "writer" }))).await;
    let (status, stored) = app.json("PUT", "/profile/payment", Some(&token), Some(payment)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["account_last4"], "6819");
    assert_eq!(stored["currency"], "GBP");

    let (_, profile) = app.json("GET", "/profile", Some(&token), None).await;
    assert_eq!(profile["payment_info"]["account_last4"], "6819");
    assert!(profile["payment_info"].get("account_number").is_none());
}

#[tokio::test]
async fn delete_profile_cascades_and_clears_flag() {
    let app = TestApp::new();
    let (user_id, token) = app.user("u_1");
    app.json(
        "PUT",
        "/profile",
        Some(&token),
        Some(json!({
            "occupation": "translator",
            "categories": ["writing-translation"],
            "skills": ["german"],
            "languages": [{ "language": "German", "proficiency": "fluent" }],
            "education": [{ "institution": "Uni", "degree": "BA" }],
            "certificates": [{ "name": "DELF", "issuer": "CIEP", "year": 2019 }]
        })),
    )
    .await;

    let document = Request::builder()
        .method("POST")
        .uri("/profile/documents")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/pdf")
        .header("x-file-name", "cv.pdf")
        .header("x-document-kind", "resume")
        .body(Body::from("cv"))
        .unwrap();
    let response = app.send(document).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let document_path = format!("{user_id}/cv.pdf");
    assert!(app.state.storage.exists(gighive_api::storage::Bucket::FreelancerDocuments, &document_path).await.unwrap());

    let (status, deleted) = app.json("DELETE", "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "{deleted}");
    assert_eq!(deleted["deleted"], true);
    // 6 child rows + the profile itself.
    assert_eq!(deleted["removed_rows"], 7);

    let (status, _) = app.json("GET", "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!app.state.db.get_user_by_clerk_id("u_1").unwrap().unwrap().is_freelancer);
    assert!(!app.state.storage.exists(gighive_api::storage::Bucket::FreelancerDocuments, &document_path).await.unwrap());

    let (status, _) = app.json("DELETE", "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_cascade_names_the_table_and_is_reconciled_later() {
    let app = TestApp::new();
    let (_, token) = app.user("u_1");
    app.json(
        "PUT",
        "/profile",
        Some(&token),
        Some(json!({ "occupation": "editor", "skills": ["copy"], "certificates": [{ "name": "CPE" }] })),
    )
    .await;

    app.state
        .db
        .with_conn_mut(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER block_certificates BEFORE DELETE ON freelancer_certificates
                 BEGIN SELECT RAISE(ABORT, 'certificates locked'); END;",
            )?;
            Ok(())
        })
        .unwrap();

    let (status, body) = app.json("DELETE", "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("freelancer_certificates"), "{body}");

    let (status, profile) = app.json("GET", "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["skills"], json!(["copy"]));
    assert!(app.state.db.get_user_by_clerk_id("u_1").unwrap().unwrap().is_freelancer);

    app.state
        .db
        .with_conn_mut(|conn| {
            conn.execute_batch("DROP TRIGGER block_certificates;")?;
            Ok(())
        })
        .unwrap();

    let resolved = gighive_api::reconcile::reconcile_profile_deletions(&app.state).await.unwrap();
    assert_eq!(resolved, 1);
    let (status, _) = app.json("GET", "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(gighive_api::reconcile::reconcile_profile_deletions(&app.state).await.unwrap(), 0);
}

#[tokio::test]
async fn categories_are_public() {
    let app = TestApp::new();
    let (status, categories) = app.json("GET", "/categories", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let slugs: Vec<&str> = categories.as_array().unwrap().iter().map(|c| c["slug"].as_str().unwrap()).collect();
    assert!(slugs.contains(&"programming-tech"));
    assert_eq!(slugs.len(), 9);
}

#[tokio::test]
async fn reconciliation_never_touches_a_newer_profile() {
    let app = TestApp::new();
    let (user_id, token) = app.user("u_1");
    let (_, first) = app.json("PUT", "/profile", Some(&token), Some(json!({ "occupation": "editor" }))).await;
    let (status, _) = app.json("DELETE", "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    // A crash between the cascade commit and closing the intent leaves it pending.
    let first_id = first["id"].as_str().unwrap().to_string();
    app.state.db.mark_deletion(&first_id, "pending", None, None).unwrap();

    let (_, second) = app.json("PUT", "/profile", Some(&token), Some(json!({ "occupation": "illustrator" }))).await;
    assert_ne!(second["id"], first["id"]);

    let resolved = gighive_api::reconcile::reconcile_profile_deletions(&app.state).await.unwrap();
    assert_eq!(resolved, 1);

    let (status, profile) = app.json("GET", "/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["id"], second["id"]);
    assert_eq!(profile["occupation"], "illustrator");
    assert!(app.state.db.get_user_by_id(user_id).unwrap().unwrap().is_freelancer);
    assert!(app.state.db.pending_profile_deletions(5).unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_document_names_do_not_overwrite() {
    let app = TestApp::new();
    let (user_id, token) = app.user("u_1");
    app.json("PUT", "/profile", Some(&token), Some(json!({ "occupation": "translator" }))).await;

    let upload = |body: &'static str| {
        Request::builder()
            .method("POST")
            .uri("/profile/documents")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/pdf")
            .header("x-file-name", "cv.pdf")
            .body(Body::from(body))
            .unwrap()
    };

    assert_eq!(app.send(upload("first")).await.status(), StatusCode::CREATED);
    let response = app.send(upload("second")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(body_json(response).await["error"].as_str().unwrap().contains("cv.pdf"));

    let (_, profile) = app.json("GET", "/profile", Some(&token), None).await;
    assert_eq!(profile["documents"].as_array().unwrap().len(), 1);

    let path = format!("{user_id}/cv.pdf");
    let (file, len) = app.state.storage.open(gighive_api::storage::Bucket::FreelancerDocuments, &path).await.unwrap();
    drop(file);
    assert_eq!(len, "first".len() as u64);
}

#[tokio::test]
async fn svg_avatars_are_refused() {
    let app = TestApp::new();
    let (_, token) = app.user("u_1");
    app.json("PUT", "/profile", Some(&token), Some(json!({ "occupation": "designer" }))).await;

    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/profile/avatar")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(header::CONTENT_TYPE, "image/svg+xml")
                .body(Body::from("<svg onload=\"alert(1)\"/>"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (_, profile) = app.json("GET", "/profile", Some(&token), None).await;
    assert!(profile["avatar"].is_null());
}
