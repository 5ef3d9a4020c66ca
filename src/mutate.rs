//! Optimistic mutation coordinator.
//!
//! Every mutation follows the same protocol against the query cache:
//! cancel in-flight refetches for the affected keys, snapshot them, write a
//! predicted post-mutation value, issue the real call, restore the snapshots
//! verbatim on failure, and invalidate every affected key on settle so the
//! optimistic guess is reconciled with store truth either way.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::cache::{CacheEntry, CachedValue, QueryCache, QueryKey};
use crate::models::{reading_time_minutes, BlogPost, Id, NewBlogPost, PostPage, PostQuery, UpdateBlogPost};
use crate::repo::{PostRepo, RepoError, RepoResult};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Retry transient failures with exponential backoff. Logical errors
/// (not-found, conflict) surface immediately.
pub async fn with_retry<T, F, Fut>(mut op: F) -> RepoResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RepoResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                let backoff = BACKOFF_BASE * 2u32.pow(attempt - 1);
                tracing::warn!(attempt, ?backoff, "retrying store call after {e}");
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}

/// Placeholder id for an optimistically created record, always negative so
/// it can never collide with a server-assigned one.
fn temp_id() -> Id {
    let raw = Uuid::new_v4().as_u128() as i64 & i64::MAX;
    -raw.max(1)
}

pub struct MutationCoordinator {
    repo: Arc<dyn PostRepo>,
    cache: Arc<QueryCache>,
    /// Remembered list queries so invalidated keys can be refetched.
    known_queries: DashMap<String, PostQuery>,
}

impl MutationCoordinator {
    pub fn new(repo: Arc<dyn PostRepo>, cache: Arc<QueryCache>) -> Self {
        Self { repo, cache, known_queries: DashMap::new() }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Cache-first list read. A fresh entry is served as-is; otherwise the
    /// store is queried through the cancellation-aware fetch pair.
    pub async fn list_posts(&self, query: &PostQuery) -> RepoResult<PostPage> {
        let key = QueryKey::List(query.canonical_key());
        self.known_queries.insert(query.canonical_key(), query.clone());
        if let Some(CachedValue::Page(page)) = self.cache.get_fresh(&key) {
            return Ok(page);
        }
        let generation = self.cache.begin_fetch(&key);
        let page = with_retry(|| self.repo.list_posts(query)).await?;
        self.cache.complete_fetch(key, generation, CachedValue::Page(page.clone()));
        Ok(page)
    }

    /// Single-record read. Always hits the store (the view counter is a
    /// server-side read effect) but keeps the cache entry current.
    pub async fn get_post(&self, id: Id) -> RepoResult<BlogPost> {
        let key = QueryKey::Post(id);
        let generation = self.cache.begin_fetch(&key);
        let post = with_retry(|| self.repo.get_post(id)).await?;
        self.cache.complete_fetch(key, generation, CachedValue::Post(post.clone()));
        Ok(post)
    }

    /// Slug lookup for public detail pages. Slugs are not query-cache keys,
    /// so this is a plain pass-through.
    pub async fn get_post_by_slug(&self, slug: &str) -> RepoResult<BlogPost> {
        with_retry(|| self.repo.get_post_by_slug(slug)).await
    }

    pub async fn create_post(&self, new: NewBlogPost) -> RepoResult<BlogPost> {
        let affected = self.cache.list_keys();
        let snapshots = self.prepare(&affected);

        let predicted = predict_created(&new);
        for key in &affected {
            if let Some(CacheEntry { value: CachedValue::Page(mut page), .. }) =
                self.cache.get(key)
            {
                page.items.insert(0, predicted.clone());
                page.total += 1;
                self.cache.put(key.clone(), CachedValue::Page(page));
            }
        }

        let result = with_retry(|| self.repo.create_post(new.clone())).await;
        self.settle(&affected, snapshots, result)
    }

    pub async fn update_post(&self, id: Id, upd: UpdateBlogPost) -> RepoResult<BlogPost> {
        let mut affected = self.cache.list_keys();
        affected.push(QueryKey::Post(id));
        let snapshots = self.prepare(&affected);

        let now = Utc::now();
        for key in &affected {
            match self.cache.get(key) {
                Some(CacheEntry { value: CachedValue::Page(mut page), .. }) => {
                    for post in page.items.iter_mut().filter(|p| p.id == id) {
                        apply_patch(post, &upd, now);
                    }
                    self.cache.put(key.clone(), CachedValue::Page(page));
                }
                Some(CacheEntry { value: CachedValue::Post(mut post), .. }) => {
                    apply_patch(&mut post, &upd, now);
                    self.cache.put(key.clone(), CachedValue::Post(post));
                }
                None => {}
            }
        }

        let result = with_retry(|| self.repo.update_post(id, upd.clone())).await;
        self.settle(&affected, snapshots, result)
    }

    pub async fn delete_post(&self, id: Id) -> RepoResult<Vec<Id>> {
        self.delete_posts(&[id]).await
    }

    /// Hard delete, single or bulk; one uniform protocol run.
    pub async fn delete_posts(&self, ids: &[Id]) -> RepoResult<Vec<Id>> {
        let mut affected = self.cache.list_keys();
        affected.extend(ids.iter().map(|id| QueryKey::Post(*id)));
        let snapshots = self.prepare(&affected);

        for key in &affected {
            match self.cache.get(key) {
                Some(CacheEntry { value: CachedValue::Page(mut page), .. }) => {
                    let before = page.items.len();
                    page.items.retain(|p| !ids.contains(&p.id));
                    // predict with the count actually pruned; unknown ids
                    // must not shrink the total
                    let pruned = (before - page.items.len()) as u64;
                    page.total = page.total.saturating_sub(pruned);
                    self.cache.put(key.clone(), CachedValue::Page(page));
                }
                Some(CacheEntry { value: CachedValue::Post(_), .. }) => {
                    // predicted outcome of a delete is simply absence
                    self.cache.evict(key);
                }
                None => {}
            }
        }

        let result = with_retry(|| self.repo.delete_posts(ids)).await;
        self.settle(&affected, snapshots, result)
    }

    /// Refetch every invalidated key, reconciling optimistic guesses with
    /// store truth. Fetches whose key was cancelled mid-flight are dropped
    /// by the cache itself.
    pub async fn reconcile(&self) -> usize {
        let keys = self.cache.drain_invalidated();
        let mut refreshed = 0;
        for key in keys {
            let generation = self.cache.begin_fetch(&key);
            let fetched = match &key {
                QueryKey::List(filters) => {
                    let Some(query) = self.known_queries.get(filters).map(|q| q.clone()) else {
                        continue;
                    };
                    self.repo.list_posts(&query).await.map(CachedValue::Page)
                }
                QueryKey::Post(id) => self.repo.get_post(*id).await.map(CachedValue::Post),
            };
            match fetched {
                Ok(value) => {
                    if self.cache.complete_fetch(key, generation, value) {
                        refreshed += 1;
                    }
                }
                Err(RepoError::NotFound) => self.cache.evict(&key),
                Err(e) => {
                    tracing::warn!("reconcile fetch failed for {key:?}: {e}");
                    // leave the key stale; it will be retried on the next pass
                    self.cache.invalidate(&key);
                }
            }
        }
        refreshed
    }

    /// Steps 1–2: cancel in-flight refetches and snapshot current entries.
    fn prepare(&self, affected: &[QueryKey]) -> Vec<(QueryKey, Option<CacheEntry>)> {
        affected
            .iter()
            .map(|key| {
                self.cache.cancel(key);
                (key.clone(), self.cache.get(key))
            })
            .collect()
    }

    /// Steps 5–6: roll back on failure, then invalidate every affected key
    /// regardless of outcome.
    fn settle<T>(
        &self,
        affected: &[QueryKey],
        snapshots: Vec<(QueryKey, Option<CacheEntry>)>,
        result: RepoResult<T>,
    ) -> RepoResult<T> {
        if result.is_err() {
            for (key, snapshot) in snapshots {
                self.cache.restore(key, snapshot);
            }
        }
        for key in affected {
            self.cache.invalidate(key);
        }
        result
    }
}

/// Predicted record for an optimistic create: temporary id, derived reading
/// time, zero views, timestamps of "now".
fn predict_created(new: &NewBlogPost) -> BlogPost {
    let now = Utc::now();
    BlogPost {
        id: temp_id(),
        title: new.title.clone(),
        slug: new.slug.clone(),
        content: new.content.clone(),
        excerpt: new.excerpt.clone(),
        image_url: new.image_url.clone(),
        video_url: new.video_url.clone(),
        tags: new.tags.clone(),
        post_type: new.post_type,
        published: new.published,
        views: 0,
        reading_time: reading_time_minutes(&new.content),
        created_at: now,
        updated_at: now,
        published_at: new.published.then_some(now),
    }
}

/// Merge a patch into a cached record the way the store will.
fn apply_patch(post: &mut BlogPost, upd: &UpdateBlogPost, now: chrono::DateTime<Utc>) {
    if let Some(title) = &upd.title {
        post.title = title.clone();
    }
    if let Some(slug) = &upd.slug {
        post.slug = slug.clone();
    }
    if let Some(content) = &upd.content {
        post.reading_time = reading_time_minutes(content);
        post.content = content.clone();
    }
    if let Some(excerpt) = &upd.excerpt {
        post.excerpt = excerpt.clone();
    }
    if let Some(image_url) = &upd.image_url {
        post.image_url = image_url.clone();
    }
    if let Some(video_url) = &upd.video_url {
        post.video_url = video_url.clone();
    }
    if let Some(tags) = &upd.tags {
        post.tags = tags.clone();
    }
    if let Some(t) = upd.post_type {
        post.post_type = Some(t);
    }
    if let Some(published) = upd.published {
        if published && !post.published {
            post.published_at = Some(now);
        } else if !published {
            post.published_at = None;
        }
        post.published = published;
    }
    post.updated_at = now;
}
