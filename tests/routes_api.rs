#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use actix_web::{test, App};
use serial_test::serial;
use sha2::{Digest, Sha256};

use folio::auth::{create_jwt, Role};
use folio::cache::QueryCache;
use folio::lockout::LoginLockout;
use folio::mutate::MutationCoordinator;
use folio::repo::inmem::InMemRepo;
use folio::routes::{config, AppState};
use folio::security::SecurityHeaders;
use folio::storage::FsMediaStore;

const PASSWORD: &str = "correct-horse-battery-staple";

// Helper to ensure env present & unique temp data dir per test
fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::set_var("ADMIN_EMAIL", "admin@example.com");
    std::env::set_var(
        "ADMIN_PASSWORD_SHA256",
        format!("{:x}", Sha256::digest(PASSWORD.as_bytes())),
    );
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("FOLIO_DATA_DIR", tmp.path().to_str().unwrap());
}

fn state() -> AppState {
    AppState {
        coordinator: Arc::new(MutationCoordinator::new(
            Arc::new(InMemRepo::new()),
            Arc::new(QueryCache::new()),
        )),
        media_store: Arc::new(FsMediaStore::new()),
        lockout: LoginLockout::new(),
    }
}

fn editor_token() -> String {
    create_jwt("admin@example.com", vec![Role::Admin]).unwrap()
}

fn valid_post_json(title: &str) -> serde_json::Value {
    serde_json::json!({
        "title": title,
        "content": "This is a perfectly reasonable amount of blog post content for testing.",
        "tags": ["rust", "web"]
    })
}

#[actix_web::test]
#[serial]
async fn test_post_crud_flow_routes() {
    setup_env();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;
    let token = editor_token();

    // list posts empty
    let req = test::TestRequest::get().uri("/api/v1/posts").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["total"], 0);

    // create requires auth
    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(&valid_post_json("No Auth"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    // create post (editor)
    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(&valid_post_json("Hello Folio World"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let post: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let post_id = post["id"].as_i64().unwrap();
    assert_eq!(post["slug"], "hello-folio-world");
    assert_eq!(post["published"], false);

    // duplicate slug → 409
    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(&valid_post_json("Hello Folio World"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    // anonymous readers do not see unpublished posts
    let req = test::TestRequest::get().uri("/api/v1/posts").to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["total"], 0);
    let req = test::TestRequest::get().uri(&format!("/api/v1/posts/{post_id}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    // but the editor does
    let req = test::TestRequest::get()
        .uri("/api/v1/posts")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["total"], 1);

    // publish via PATCH
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(&serde_json::json!({"published": true}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let updated: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(updated["published"], true);
    assert!(!updated["published_at"].is_null(), "publishing must set published_at");

    // now visible publicly, by id and by slug
    let req = test::TestRequest::get().uri(&format!("/api/v1/posts/{post_id}")).to_request();
    assert!(test::call_service(&app, req).await.status().is_success());
    let req = test::TestRequest::get().uri("/api/v1/posts/slug/hello-folio-world").to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    // delete
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    let req = test::TestRequest::get().uri(&format!("/api/v1/posts/{post_id}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn test_validation_errors_carry_field_map() {
    setup_env();
    let app = test::init_service(
        App::new().app_data(actix_web::web::Data::new(state())).configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(("Authorization", format!("Bearer {}", editor_token())))
        .set_json(&serde_json::json!({"title": "ab", "content": "too short"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 422);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(body["fields"]["title"].is_string());
    assert!(body["fields"]["content"].is_string());
}

#[actix_web::test]
#[serial]
async fn test_patch_excerpt_must_stay_shorter_than_content() {
    setup_env();
    let app = test::init_service(
        App::new().app_data(actix_web::web::Data::new(state())).configure(config),
    )
    .await;
    let token = editor_token();

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(&valid_post_json("Excerpt Guard"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let post: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let post_id = post["id"].as_i64().unwrap();

    // both fields in the patch: rejected up front
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(&serde_json::json!({"content": "x".repeat(60), "excerpt": "y".repeat(70)}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 422);

    // excerpt alone, longer than the stored content: rejected by the store
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(&serde_json::json!({"excerpt": "y".repeat(250)}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 422);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(body["fields"]["excerpt"].is_string());
}

#[actix_web::test]
#[serial]
async fn test_bulk_delete_route() {
    setup_env();
    let app = test::init_service(
        App::new().app_data(actix_web::web::Data::new(state())).configure(config),
    )
    .await;
    let token = editor_token();

    let mut ids = Vec::new();
    for i in 0..3 {
        let req = test::TestRequest::post()
            .uri("/api/v1/posts")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .set_json(&valid_post_json(&format!("Bulk Target {i}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let post: serde_json::Value =
            serde_json::from_slice(&test::read_body(resp).await).unwrap();
        ids.push(post["id"].as_i64().unwrap());
    }

    let req = test::TestRequest::post()
        .uri("/api/v1/posts/bulk-delete")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(&serde_json::json!({"ids": [ids[0], ids[2]]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["deleted"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::get()
        .uri("/api/v1/posts")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["total"], 1);
}

#[actix_web::test]
#[serial]
async fn test_login_lockout_and_session() {
    setup_env();
    let app = test::init_service(
        App::new().app_data(actix_web::web::Data::new(state())).configure(config),
    )
    .await;

    // five bad attempts
    for _ in 0..5 {
        let req = test::TestRequest::post()
            .uri("/api/v1/auth/login")
            .set_json(&serde_json::json!({"email": "admin@example.com", "password": "wrong"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    // the sixth is locked out even with the right password
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(&serde_json::json!({"email": "admin@example.com", "password": PASSWORD}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 423);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(body["retry_after_secs"].as_u64().unwrap() > 0);
}

#[actix_web::test]
#[serial]
async fn test_login_success_me_and_refresh() {
    setup_env();
    let app = test::init_service(
        App::new().app_data(actix_web::web::Data::new(state())).configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(&serde_json::json!({"email": "admin@example.com", "password": PASSWORD}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    // auth/me
    let req = test::TestRequest::get()
        .uri("/api/v1/auth/me")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let me: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(me["role"], "admin");
    assert_eq!(me["email"], "admin@example.com");

    // refresh
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/refresh")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let refreshed: serde_json::Value =
        serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(refreshed["token"].as_str().unwrap().len() > 10);
}

// Minimal test for get_media after upload (PNG bytes)
#[actix_web::test]
#[serial]
async fn test_get_media_after_upload() {
    setup_env();
    let app = test::init_service(
        App::new().app_data(actix_web::web::Data::new(state())).configure(config),
    )
    .await;
    let token = editor_token();

    let boundary = "BOUNDARYHASH";
    let png: Vec<u8> = vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H',
        b'D', b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
        0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, b'I', b'D', b'A', b'T', 0x78,
        0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00,
        0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
    ];
    let mut body: Vec<u8> = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&png);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let req = test::TestRequest::post()
        .uri("/api/v1/media")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .insert_header(("Content-Type", format!("multipart/form-data; boundary={boundary}")))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let uploaded: serde_json::Value =
        serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let hash = uploaded["hash"].as_str().unwrap();
    assert!(uploaded["url"].as_str().unwrap().ends_with(hash));

    // fetch media back
    let req = test::TestRequest::get().uri(&format!("/media/{hash}")).to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let ct = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert_eq!(ct, "image/png");
}
