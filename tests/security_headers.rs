#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use actix_web::{test, web, App, HttpResponse};
use folio::cache::QueryCache;
use folio::lockout::LoginLockout;
use folio::mutate::MutationCoordinator;
use folio::repo::inmem::InMemRepo;
use folio::storage::FsMediaStore;
use folio::{config, AppState, SecurityHeaders};

fn state() -> AppState {
    std::env::set_var("FOLIO_DATA_DIR", tempfile::tempdir().unwrap().path());
    AppState {
        coordinator: Arc::new(MutationCoordinator::new(
            Arc::new(InMemRepo::new()),
            Arc::new(QueryCache::new()),
        )),
        media_store: Arc::new(FsMediaStore::new()),
        lockout: LoginLockout::new(),
    }
}

#[actix_web::test]
#[serial_test::serial]
async fn test_security_headers_present() {
    std::env::remove_var("ENABLE_HSTS");
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;
    let req = test::TestRequest::get().uri("/api/v1/posts").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let headers = resp.headers();
    assert!(headers.get("content-security-policy").is_some());
    assert_eq!(headers.get("referrer-policy").unwrap(), "no-referrer");
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert!(headers.get("strict-transport-security").is_none()); // not enabled
}

#[actix_web::test]
#[serial_test::serial]
async fn test_csp_admits_the_accepted_video_hosts() {
    std::env::remove_var("ENABLE_HSTS");
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;
    let req = test::TestRequest::get().uri("/api/v1/posts").to_request();
    let resp = test::call_service(&app, req).await;
    let csp = resp.headers().get("content-security-policy").unwrap().to_str().unwrap();
    for host in ["youtube.com", "player.vimeo.com", "dailymotion.com"] {
        assert!(csp.contains(host), "CSP missing {host}: {csp}");
    }
}

#[actix_web::test]
#[serial_test::serial]
async fn test_hsts_enabled_via_builder() {
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env().with_hsts(true))
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;
    let req = test::TestRequest::get().uri("/api/v1/posts").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.headers().get("strict-transport-security").is_some(), "HSTS header missing");
}

#[actix_web::test]
#[serial_test::serial]
async fn test_env_var_enables_hsts_without_builder_override() {
    std::env::set_var("ENABLE_HSTS", "1");
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;
    let req = test::TestRequest::get().uri("/api/v1/posts").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.headers().get("strict-transport-security").is_some());
    std::env::remove_var("ENABLE_HSTS");
}

#[actix_web::test]
#[serial_test::serial]
async fn test_existing_csp_header_preserved() {
    std::env::remove_var("ENABLE_HSTS");
    let app = test::init_service(
        App::new().wrap(SecurityHeaders::from_env()).route(
            "/custom",
            web::get().to(|| async {
                HttpResponse::Ok()
                    .insert_header((
                        actix_web::http::header::CONTENT_SECURITY_POLICY,
                        "custom-src 'none'",
                    ))
                    .finish()
            }),
        ),
    )
    .await;
    let req = test::TestRequest::get().uri("/custom").to_request();
    let resp = test::call_service(&app, req).await;
    let csp = resp.headers().get("content-security-policy").unwrap().to_str().unwrap();
    assert_eq!(csp, "custom-src 'none'");
}
