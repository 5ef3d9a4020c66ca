use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    /// A write that would break a record invariant the store enforces.
    #[error("invalid {field}: {message}")]
    Invalid { field: String, message: String },
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl RepoError {
    /// Transient store/network failures are worth retrying; logical errors
    /// (missing record, duplicate slug) are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepoError::Unavailable(_))
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// The excerpt must stay strictly shorter than the content it summarizes.
/// Record-level validation catches this on create; the store re-checks on
/// partial updates, where only one side of the pair may be in the patch.
fn check_excerpt_rule(excerpt: Option<&str>, content: &str) -> RepoResult<()> {
    if let Some(e) = excerpt {
        if !e.is_empty() && e.chars().count() >= content.chars().count() {
            return Err(RepoError::Invalid {
                field: "excerpt".into(),
                message: "excerpt must be shorter than content".into(),
            });
        }
    }
    Ok(())
}

use async_trait::async_trait;

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// Filtered, paginated listing plus the total match count.
    async fn list_posts(&self, query: &PostQuery) -> RepoResult<PostPage>;
    /// Single post; bumps the view counter as a side effect.
    async fn get_post(&self, id: Id) -> RepoResult<BlogPost>;
    async fn get_post_by_slug(&self, slug: &str) -> RepoResult<BlogPost>;
    async fn create_post(&self, new: NewBlogPost) -> RepoResult<BlogPost>;
    async fn update_post(&self, id: Id, upd: UpdateBlogPost) -> RepoResult<BlogPost>;
    /// Hard delete. Returns the ids actually removed.
    async fn delete_posts(&self, ids: &[Id]) -> RepoResult<Vec<Id>>;
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/posts.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        posts: HashMap<Id, BlogPost>,
        next_id: Id,
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("FOLIO_DATA_DIR") {
                Ok(dir) => {
                    let mut p = PathBuf::from(dir);
                    p.push("posts.json");
                    p
                }
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        log::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!(
                            "failed to parse snapshot '{}': {e}. Starting empty.",
                            path.display()
                        );
                        State::default()
                    }
                },
                Err(e) => {
                    log::info!("no snapshot at '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    log::error!("failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self { state: Arc::new(RwLock::new(state)), snapshot_path: Arc::new(snapshot_path) }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }

        fn matches(post: &BlogPost, query: &PostQuery) -> bool {
            if let Some(published) = query.published {
                if post.published != published {
                    return false;
                }
            }
            if let Some(t) = query.post_type {
                if post.post_type != Some(t) {
                    return false;
                }
            }
            if let Some(tag) = query.tag.as_deref() {
                if !post.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                    return false;
                }
            }
            if let Some(search) = query.search.as_deref() {
                let needle = search.to_lowercase();
                if !post.title.to_lowercase().contains(&needle)
                    && !post.content.to_lowercase().contains(&needle)
                {
                    return false;
                }
            }
            true
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn list_posts(&self, query: &PostQuery) -> RepoResult<PostPage> {
            let s = self.state.read().unwrap();
            let mut matched: Vec<_> =
                s.posts.values().filter(|p| Self::matches(p, query)).cloned().collect();
            // newest first
            matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let total = matched.len() as u64;
            let page = query.page();
            let per_page = query.per_page();
            let start = ((page - 1) * per_page) as usize;
            let items: Vec<_> =
                matched.into_iter().skip(start).take(per_page as usize).collect();
            Ok(PostPage { items, total, page, per_page })
        }

        async fn get_post(&self, id: Id) -> RepoResult<BlogPost> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            post.views += 1;
            let post = post.clone();
            drop(s);
            self.persist();
            Ok(post)
        }

        async fn get_post_by_slug(&self, slug: &str) -> RepoResult<BlogPost> {
            let s = self.state.read().unwrap();
            s.posts.values().find(|p| p.slug == slug).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_post(&self, new: NewBlogPost) -> RepoResult<BlogPost> {
            check_excerpt_rule(new.excerpt.as_deref(), &new.content)?;
            let mut s = self.state.write().unwrap();
            if s.posts.values().any(|p| p.slug == new.slug) {
                return Err(RepoError::Conflict);
            }
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let post = BlogPost {
                id,
                reading_time: reading_time_minutes(&new.content),
                title: new.title,
                slug: new.slug,
                content: new.content,
                excerpt: new.excerpt,
                image_url: new.image_url,
                video_url: new.video_url,
                tags: new.tags,
                post_type: new.post_type,
                published: new.published,
                views: 0,
                created_at: now,
                updated_at: now,
                published_at: new.published.then_some(now),
            };
            s.posts.insert(id, post.clone());
            drop(s);
            self.persist();
            Ok(post)
        }

        async fn update_post(&self, id: Id, upd: UpdateBlogPost) -> RepoResult<BlogPost> {
            let mut s = self.state.write().unwrap();

            // slug uniqueness check before taking the mutable borrow
            if let Some(ref slug) = upd.slug {
                if s.posts.values().any(|p| p.slug == *slug && p.id != id) {
                    return Err(RepoError::Conflict);
                }
            }

            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            let now = Utc::now();

            // cross-field invariant against the merged record, since a patch
            // may carry only one side of the excerpt/content pair
            let content_after = upd.content.as_deref().unwrap_or(&post.content);
            let excerpt_after = match &upd.excerpt {
                Some(e) => e.as_deref(),
                None => post.excerpt.as_deref(),
            };
            check_excerpt_rule(excerpt_after, content_after)?;

            if let Some(title) = upd.title {
                post.title = title;
            }
            if let Some(slug) = upd.slug {
                post.slug = slug;
            }
            if let Some(content) = upd.content {
                post.reading_time = reading_time_minutes(&content);
                post.content = content;
            }
            if let Some(excerpt) = upd.excerpt {
                post.excerpt = excerpt;
            }
            if let Some(image_url) = upd.image_url {
                post.image_url = image_url;
            }
            if let Some(video_url) = upd.video_url {
                post.video_url = video_url;
            }
            if let Some(tags) = upd.tags {
                post.tags = tags;
            }
            if let Some(t) = upd.post_type {
                post.post_type = Some(t);
            }
            if let Some(published) = upd.published {
                // published_at is set on the first transition to published
                // and cleared again on unpublish
                if published && !post.published {
                    post.published_at = Some(now);
                } else if !published {
                    post.published_at = None;
                }
                post.published = published;
            }
            post.updated_at = now;

            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_posts(&self, ids: &[Id]) -> RepoResult<Vec<Id>> {
            let mut s = self.state.write().unwrap();
            let removed: Vec<Id> =
                ids.iter().copied().filter(|id| s.posts.remove(id).is_some()).collect();
            drop(s);
            if removed.is_empty() {
                return Err(RepoError::NotFound);
            }
            self.persist();
            Ok(removed)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres, Row};

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    const POST_COLUMNS: &str = "id, title, slug, content, excerpt, image_url, video_url, tags, \
                                post_type, published, views, reading_time, created_at, updated_at, \
                                published_at";

    fn map_db_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.constraint().is_some() => RepoError::Conflict,
            sqlx::Error::Io(io) => RepoError::Unavailable(io.to_string()),
            sqlx::Error::PoolTimedOut => RepoError::Unavailable("pool timed out".into()),
            other => RepoError::Internal(other.to_string()),
        }
    }

    fn row_to_post(row: &sqlx::postgres::PgRow) -> Result<BlogPost, sqlx::Error> {
        Ok(BlogPost {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            slug: row.try_get("slug")?,
            content: row.try_get("content")?,
            excerpt: row.try_get("excerpt")?,
            image_url: row.try_get("image_url")?,
            video_url: row.try_get("video_url")?,
            tags: row.try_get("tags")?,
            post_type: row
                .try_get::<Option<String>, _>("post_type")?
                .as_deref()
                .and_then(PostType::parse),
            published: row.try_get("published")?,
            views: row.try_get("views")?,
            reading_time: row.try_get::<i32, _>("reading_time")? as u32,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            published_at: row.try_get("published_at")?,
        })
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn list_posts(&self, query: &PostQuery) -> RepoResult<PostPage> {
            let page = query.page();
            let per_page = query.per_page();
            let search = query.search.as_deref().map(|s| format!("%{}%", s.to_lowercase()));
            let sql = format!(
                "SELECT {POST_COLUMNS}, count(*) OVER () AS total FROM blog_posts
                 WHERE ($1::bool IS NULL OR published = $1)
                   AND ($2::text IS NULL OR post_type = $2)
                   AND ($3::text IS NULL OR $3 = ANY(tags))
                   AND ($4::text IS NULL OR lower(title) LIKE $4 OR lower(content) LIKE $4)
                 ORDER BY created_at DESC
                 LIMIT $5 OFFSET $6"
            );
            let rows = sqlx::query(&sql)
                .bind(query.published)
                .bind(query.post_type.map(|t| t.as_str()))
                .bind(query.tag.as_deref())
                .bind(search)
                .bind(per_page as i64)
                .bind(((page - 1) * per_page) as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(map_db_err)?;
            let total = rows
                .first()
                .map(|r| r.try_get::<i64, _>("total").unwrap_or(0) as u64)
                .unwrap_or(0);
            let items = rows
                .iter()
                .map(row_to_post)
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_db_err)?;
            Ok(PostPage { items, total, page, per_page })
        }

        async fn get_post(&self, id: Id) -> RepoResult<BlogPost> {
            let sql = format!(
                "UPDATE blog_posts SET views = views + 1 WHERE id = $1 RETURNING {POST_COLUMNS}"
            );
            let row =
                sqlx::query(&sql).bind(id).fetch_one(&self.pool).await.map_err(map_db_err)?;
            row_to_post(&row).map_err(map_db_err)
        }

        async fn get_post_by_slug(&self, slug: &str) -> RepoResult<BlogPost> {
            let sql = format!("SELECT {POST_COLUMNS} FROM blog_posts WHERE slug = $1");
            let row =
                sqlx::query(&sql).bind(slug).fetch_one(&self.pool).await.map_err(map_db_err)?;
            row_to_post(&row).map_err(map_db_err)
        }

        async fn create_post(&self, new: NewBlogPost) -> RepoResult<BlogPost> {
            check_excerpt_rule(new.excerpt.as_deref(), &new.content)?;
            let sql = format!(
                "INSERT INTO blog_posts
                   (title, slug, content, excerpt, image_url, video_url, tags, post_type,
                    published, reading_time, published_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,
                         CASE WHEN $9 THEN now() ELSE NULL END)
                 RETURNING {POST_COLUMNS}"
            );
            let row = sqlx::query(&sql)
                .bind(&new.title)
                .bind(&new.slug)
                .bind(&new.content)
                .bind(&new.excerpt)
                .bind(&new.image_url)
                .bind(&new.video_url)
                .bind(&new.tags)
                .bind(new.post_type.map(|t| t.as_str()))
                .bind(new.published)
                .bind(reading_time_minutes(&new.content) as i32)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)?;
            row_to_post(&row).map_err(map_db_err)
        }

        async fn update_post(&self, id: Id, upd: UpdateBlogPost) -> RepoResult<BlogPost> {
            // the excerpt/content invariant needs the stored record when the
            // patch carries only one side of the pair
            if upd.excerpt.is_some() || upd.content.is_some() {
                let row = sqlx::query("SELECT excerpt, content FROM blog_posts WHERE id = $1")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_db_err)?;
                let stored_excerpt: Option<String> =
                    row.try_get("excerpt").map_err(map_db_err)?;
                let stored_content: String = row.try_get("content").map_err(map_db_err)?;
                let excerpt = match &upd.excerpt {
                    Some(e) => e.as_deref(),
                    None => stored_excerpt.as_deref(),
                };
                let content = upd.content.as_deref().unwrap_or(&stored_content);
                check_excerpt_rule(excerpt, content)?;
            }
            let reading_time = upd.content.as_deref().map(|c| reading_time_minutes(c) as i32);
            let sql = format!(
                "UPDATE blog_posts SET
                   title = COALESCE($2, title),
                   slug = COALESCE($3, slug),
                   content = COALESCE($4, content),
                   reading_time = COALESCE($5, reading_time),
                   excerpt = CASE WHEN $6 THEN $7 ELSE excerpt END,
                   image_url = CASE WHEN $8 THEN $9 ELSE image_url END,
                   video_url = CASE WHEN $10 THEN $11 ELSE video_url END,
                   tags = COALESCE($12, tags),
                   post_type = COALESCE($13, post_type),
                   published_at = CASE
                     WHEN $14::bool IS NULL THEN published_at
                     WHEN $14 AND NOT published THEN now()
                     WHEN NOT $14 THEN NULL
                     ELSE published_at END,
                   published = COALESCE($14, published),
                   updated_at = now()
                 WHERE id = $1 RETURNING {POST_COLUMNS}"
            );
            let row = sqlx::query(&sql)
                .bind(id)
                .bind(upd.title)
                .bind(upd.slug)
                .bind(upd.content)
                .bind(reading_time)
                .bind(upd.excerpt.is_some())
                .bind(upd.excerpt.flatten())
                .bind(upd.image_url.is_some())
                .bind(upd.image_url.flatten())
                .bind(upd.video_url.is_some())
                .bind(upd.video_url.flatten())
                .bind(upd.tags)
                .bind(upd.post_type.map(|t| t.as_str()))
                .bind(upd.published)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)?;
            row_to_post(&row).map_err(map_db_err)
        }

        async fn delete_posts(&self, ids: &[Id]) -> RepoResult<Vec<Id>> {
            let rows = sqlx::query("DELETE FROM blog_posts WHERE id = ANY($1) RETURNING id")
                .bind(ids)
                .fetch_all(&self.pool)
                .await
                .map_err(map_db_err)?;
            let removed: Vec<Id> = rows
                .iter()
                .map(|r| r.try_get::<Id, _>("id"))
                .collect::<Result<_, _>>()
                .map_err(map_db_err)?;
            if removed.is_empty() {
                return Err(RepoError::NotFound);
            }
            Ok(removed)
        }
    }
}
