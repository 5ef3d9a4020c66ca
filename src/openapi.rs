use crate::models::{BlogPost, NewBlogPost, PostPage, PostType, UpdateBlogPost};
use crate::validate::PostDraft;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_posts,
        crate::routes::get_post,
        crate::routes::create_post,
        crate::routes::update_post,
        crate::routes::delete_post,
        crate::routes::bulk_delete_posts,
        crate::routes::login,
        crate::routes::auth_me,
        crate::routes::upload_media,
    ),
    components(schemas(
        BlogPost, NewBlogPost, UpdateBlogPost, PostPage, PostType, PostDraft,
        crate::routes::BulkDeleteRequest, crate::routes::BulkDeleteResponse,
        crate::routes::LoginRequest, crate::routes::MediaUploadResponse
    )),
    tags(
        (name = "posts", description = "Blog post CRUD"),
        (name = "auth", description = "Editor sign-in"),
        (name = "media", description = "Media upload/serving"),
    )
)]
pub struct ApiDoc;
