use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

pub const WORDS_PER_MINUTE: usize = 200;

/// Reading time in whole minutes, always at least 1 for non-empty content.
pub fn reading_time_minutes(content: &str) -> u32 {
    let words = content.split_whitespace().count();
    words.div_ceil(WORDS_PER_MINUTE).max(1) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres-store", sqlx(type_name = "text", rename_all = "lowercase"))]
pub enum PostType {
    Article,
    Tutorial,
    Project,
    Note,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Article => "article",
            PostType::Tutorial => "tutorial",
            PostType::Project => "project",
            PostType::Note => "note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "article" => Some(PostType::Article),
            "tutorial" => Some(PostType::Tutorial),
            "project" => Some(PostType::Project),
            "note" => Some(PostType::Note),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BlogPost {
    pub id: Id,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub tags: Vec<String>,
    pub post_type: Option<PostType>,
    pub published: bool,
    pub views: i64,
    pub reading_time: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Validated payload for an insert. `slug` is always present here: the
/// validation layer derives it from the title when the author left it blank.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewBlogPost {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub post_type: Option<PostType>,
    #[serde(default)]
    pub published: bool,
}

/// Partial patch; `None` means "leave unchanged". Optional text fields use a
/// nested Option so a client can clear them with an explicit null.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateBlogPost {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub content: Option<String>,
    #[serde(default, with = "double_option", skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<Option<String>>,
    #[serde(default, with = "double_option", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Option<String>>,
    #[serde(default, with = "double_option", skip_serializing_if = "Option::is_none")]
    pub video_url: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub post_type: Option<PostType>,
    pub published: Option<bool>,
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(v: &Option<Option<T>>, s: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match v {
            Some(inner) => inner.serialize(s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(d: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(d).map(Some)
    }
}

/// List-query descriptor. Doubles as the canonical cache key input, so the
/// field order in `canonical_key` must stay stable.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, ToSchema)]
pub struct PostQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub search: Option<String>,
    pub tag: Option<String>,
    pub post_type: Option<PostType>,
    pub published: Option<bool>,
}

pub const MAX_PER_PAGE: u32 = 50;
pub const DEFAULT_PER_PAGE: u32 = 10;

impl PostQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> u32 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    /// Stable textual form used as the list cache key.
    pub fn canonical_key(&self) -> String {
        format!(
            "page={};per_page={};search={};tag={};type={};published={}",
            self.page(),
            self.per_page(),
            self.search.as_deref().unwrap_or(""),
            self.tag.as_deref().unwrap_or(""),
            self.post_type.map(|t| t.as_str()).unwrap_or(""),
            self.published.map(|p| p.to_string()).unwrap_or_default(),
        )
    }
}

/// One page of results plus the total match count (pre-pagination).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostPage {
    pub items: Vec<BlogPost>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}
