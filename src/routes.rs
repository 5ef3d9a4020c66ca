use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt as _;
use sha2::{Digest, Sha256};

use crate::auth::{create_jwt, verify_credentials, Auth, Role};
use crate::error::ApiError;
use crate::lockout::LoginLockout;
use crate::models::*;
use crate::mutate::MutationCoordinator;
use crate::storage::{MediaStore, MediaStoreError};
use crate::validate::{validate_field, validate_post, FieldValue, PostDraft};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/posts")
                    .route(web::get().to(list_posts))
                    .route(web::post().to(create_post)),
            )
            .service(
                web::resource("/posts/bulk-delete").route(web::post().to(bulk_delete_posts)),
            )
            .service(web::resource("/posts/slug/{slug}").route(web::get().to(get_post_by_slug)))
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(get_post))
                    .route(web::patch().to(update_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/auth/refresh").route(web::post().to(refresh_token)))
            .service(web::resource("/media").route(web::post().to(upload_media))),
    );
    // public fetch route (no /api/v1 prefix so <img src="/media/{hash}"> works)
    cfg.route("/media/{hash}", web::get().to(get_media));
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<MutationCoordinator>,
    pub media_store: Arc<dyn MediaStore>,
    pub lockout: LoginLockout,
}

fn reconcile_later(data: &web::Data<AppState>) {
    let coordinator = data.coordinator.clone();
    actix_web::rt::spawn(async move {
        coordinator.reconcile().await;
    });
}

#[utoipa::path(
    get,
    path = "/api/v1/posts",
    params(
        ("page" = Option<u32>, Query, description = "1-based page number"),
        ("per_page" = Option<u32>, Query, description = "Page size, capped at 50"),
        ("search" = Option<String>, Query, description = "Title/content substring match"),
        ("tag" = Option<String>, Query, description = "Filter by tag"),
        ("post_type" = Option<String>, Query, description = "article | tutorial | project | note"),
        ("published" = Option<bool>, Query, description = "Editors only: filter by published state")
    ),
    responses((status = 200, description = "Page of posts", body = PostPage))
)]
pub async fn list_posts(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    query: web::Query<PostQuery>,
) -> Result<HttpResponse, ApiError> {
    let mut query = query.into_inner();
    // anonymous readers only ever see published posts
    let is_editor = auth.as_ref().map(|a| a.can_edit()).unwrap_or(false);
    if !is_editor {
        query.published = Some(true);
    }
    let page = data.coordinator.list_posts(&query).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post", body = BlogPost),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = data.coordinator.get_post(path.into_inner()).await?;
    let is_editor = auth.as_ref().map(|a| a.can_edit()).unwrap_or(false);
    if !post.published && !is_editor {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::Ok().json(post))
}

pub async fn get_post_by_slug(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let post = data.coordinator.get_post_by_slug(&path.into_inner()).await?;
    let is_editor = auth.as_ref().map(|a| a.can_edit()).unwrap_or(false);
    if !post.published && !is_editor {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts",
    request_body = PostDraft,
    responses(
        (status = 201, description = "Post created", body = BlogPost),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Duplicate slug"),
        (status = 422, description = "Validation failed")
    )
)]
pub async fn create_post(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<PostDraft>,
) -> Result<HttpResponse, ApiError> {
    if !auth.can_edit() {
        return Err(ApiError::Forbidden);
    }
    let validation = validate_post(&payload);
    let Some(new) = validation.data else {
        return Err(ApiError::Validation(validation.errors));
    };
    let result = data.coordinator.create_post(new).await;
    reconcile_later(&data);
    let post = result?;
    Ok(HttpResponse::Created().json(post))
}

/// Validate only the fields a patch actually carries.
fn validate_patch(upd: &UpdateBlogPost) -> std::collections::HashMap<String, String> {
    fn check(
        errors: &mut std::collections::HashMap<String, String>,
        field: &str,
        value: FieldValue<'_>,
    ) {
        let report = validate_field(field, value);
        if let Some(e) = report.error {
            errors.insert(field.to_string(), e);
        }
    }

    let mut errors = std::collections::HashMap::new();
    if let Some(title) = upd.title.as_deref() {
        check(&mut errors, "title", FieldValue::Text(title));
    }
    if let Some(slug) = upd.slug.as_deref() {
        check(&mut errors, "slug", FieldValue::Text(slug));
    }
    if let Some(content) = upd.content.as_deref() {
        check(&mut errors, "content", FieldValue::Text(content));
    }
    if let Some(Some(excerpt)) = upd.excerpt.as_ref() {
        check(&mut errors, "excerpt", FieldValue::Text(excerpt));
        if let Some(content) = upd.content.as_deref() {
            if !excerpt.is_empty()
                && !errors.contains_key("excerpt")
                && excerpt.chars().count() >= content.chars().count()
            {
                errors.insert("excerpt".into(), "excerpt must be shorter than content".into());
            }
        }
    }
    if let Some(Some(url)) = upd.image_url.as_ref() {
        check(&mut errors, "image_url", FieldValue::Text(url));
    }
    if let Some(Some(url)) = upd.video_url.as_ref() {
        check(&mut errors, "video_url", FieldValue::Text(url));
    }
    if let Some(tags) = upd.tags.as_deref() {
        check(&mut errors, "tags", FieldValue::Items(tags));
    }
    errors
}

#[utoipa::path(
    patch,
    path = "/api/v1/posts/{id}",
    request_body = UpdateBlogPost,
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post updated", body = BlogPost),
        (status = 404, description = "Post not found"),
        (status = 409, description = "Duplicate slug"),
        (status = 422, description = "Validation failed")
    )
)]
pub async fn update_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateBlogPost>,
) -> Result<HttpResponse, ApiError> {
    if !auth.can_edit() {
        return Err(ApiError::Forbidden);
    }
    let upd = payload.into_inner();
    let errors = validate_patch(&upd);
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    let result = data.coordinator.update_post(path.into_inner(), upd).await;
    reconcile_later(&data);
    let post = result?;
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    delete,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn delete_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    if !auth.can_edit() {
        return Err(ApiError::Forbidden);
    }
    let result = data.coordinator.delete_post(path.into_inner()).await;
    reconcile_later(&data);
    result?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct BulkDeleteRequest {
    pub ids: Vec<Id>,
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct BulkDeleteResponse {
    pub deleted: Vec<Id>,
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/bulk-delete",
    request_body = BulkDeleteRequest,
    responses(
        (status = 200, description = "Posts deleted", body = BulkDeleteResponse),
        (status = 404, description = "No matching posts")
    )
)]
pub async fn bulk_delete_posts(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<BulkDeleteRequest>,
) -> Result<HttpResponse, ApiError> {
    if !auth.can_edit() {
        return Err(ApiError::Forbidden);
    }
    if payload.ids.is_empty() {
        return Err(ApiError::BadRequest);
    }
    let result = data.coordinator.delete_posts(&payload.ids).await;
    reconcile_later(&data);
    let deleted = result?;
    Ok(HttpResponse::Ok().json(BulkDeleteResponse { deleted }))
}

// ---------------- Auth -----------------------------------------------

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

fn client_key(req: &HttpRequest) -> String {
    req.connection_info().realip_remote_addr().unwrap_or("unknown").to_string()
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in; returns a session token"),
        (status = 401, description = "Invalid credentials"),
        (status = 423, description = "Locked out after repeated failures")
    )
)]
pub async fn login(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let key = client_key(&req);
    let now = std::time::Instant::now();
    if data.lockout.is_blocked_at(&key, now) {
        let retry_after_secs = data.lockout.retry_after_at(&key, now).unwrap_or(0);
        return Err(ApiError::Locked { retry_after_secs });
    }
    if !verify_credentials(&payload.email, &payload.password) {
        data.lockout.record_failure_at(&key, now);
        return Err(ApiError::Unauthorized);
    }
    data.lockout.clear(&key);
    let token =
        create_jwt(&payload.email, vec![Role::Admin]).map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "token": token })))
}

#[derive(serde::Serialize)]
struct MeResponse {
    email: String,
    role: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current session info"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth) -> Result<HttpResponse, ApiError> {
    let role = if auth.is_admin() { "admin" } else { "editor" };
    let me = MeResponse { email: auth.0.sub.clone(), role: role.to_string() };
    Ok(HttpResponse::Ok().json(me))
}

pub async fn refresh_token(auth: Auth) -> Result<HttpResponse, ApiError> {
    let token = create_jwt(&auth.0.sub, auth.0.roles).map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "token": token })))
}

// ---------------- Media -----------------------------------------------

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct MediaUploadResponse {
    pub hash: String,
    pub mime: String,
    pub size: usize,
    pub url: String,
    pub duplicate: bool, // true when upload was a duplicate (idempotent)
}

const MEDIA_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] =
    &["image/png", "image/jpeg", "image/gif", "image/webp", "video/mp4", "video/webm"];

#[utoipa::path(
    post,
    path = "/api/v1/media",
    responses(
        (status = 201, description = "Media stored (new)", body = MediaUploadResponse),
        (status = 200, description = "Media already existed (idempotent)", body = MediaUploadResponse),
        (status = 415, description = "Unsupported media type"),
        (status = 413, description = "Payload too large")
    )
)]
pub async fn upload_media(
    auth: Auth,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    if !auth.can_edit() {
        return Err(ApiError::Forbidden);
    }
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        if let Some(name) = field.content_disposition().get_name() {
            if name != "file" {
                continue;
            }
        } else {
            continue;
        }
        let mut field_stream = field;
        let mut hasher = Sha256::new();
        while let Some(chunk) = field_stream.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > MEDIA_SIZE_LIMIT {
                return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish());
            }
            hasher.update(&chunk);
            bytes.extend_from_slice(&chunk);
        }
        let hash = format!("{:x}", hasher.finalize());
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        if !ALLOWED_MIME.contains(&mime.as_str()) {
            return Ok(HttpResponse::UnsupportedMediaType().finish());
        }
        let (status_code, url, duplicate) =
            match data.media_store.save(&hash, &mime, &bytes).await {
                Ok(url) => (StatusCode::CREATED, url, false),
                Err(MediaStoreError::Duplicate) => {
                    (StatusCode::OK, data.media_store.public_url(&hash), true)
                }
                Err(e) => {
                    log::error!("media_store save error: {e}");
                    return Err(ApiError::Internal);
                }
            };
        let resp = MediaUploadResponse { hash, mime, size: bytes.len(), url, duplicate };
        return Ok(HttpResponse::build(status_code).json(resp));
    }
    Ok(HttpResponse::BadRequest().finish())
}

/// Serve stored media by hash.
pub async fn get_media(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let hash = path.into_inner();
    if hash.len() < 2 {
        return Err(ApiError::NotFound);
    }
    match data.media_store.load(&hash).await {
        Ok((bytes, mime)) => {
            Ok(HttpResponse::Ok().insert_header(("Content-Type", mime)).body(bytes))
        }
        Err(MediaStoreError::NotFound) => Err(ApiError::NotFound),
        Err(e) => {
            log::error!("media_store load error: {e}");
            Err(ApiError::Internal)
        }
    }
}
