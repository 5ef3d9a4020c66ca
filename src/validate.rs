//! Declarative field validation for blog posts.
//!
//! A static rule table maps each field to its constraints; pure evaluator
//! functions check a candidate value against the table and report per-field
//! errors. Record-level validation additionally derives the slug from the
//! title when absent and applies cross-field rules.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::models::{NewBlogPost, PostType};

pub const SLUG_MAX_LEN: usize = 100;

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());
static IMAGE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://\S+\.(png|jpe?g|gif|webp|svg)(\?\S*)?$").unwrap());
static VIDEO_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https?://(www\.)?(youtube\.com/watch\?v=[\w-]+|youtu\.be/[\w-]+|vimeo\.com/\d+|dailymotion\.com/video/[\w-]+)\S*$",
    )
    .unwrap()
});
static TAG_ITEM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\- ]+$").unwrap());

/// Constraint set for one field. Plain data consumed by the evaluator.
pub struct FieldRule {
    pub required: bool,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub pattern: Option<(&'static Lazy<Regex>, &'static str)>,
    pub allowed: Option<&'static [&'static str]>,
    pub max_items: Option<usize>,
    pub item_max_len: Option<usize>,
    pub item_pattern: Option<(&'static Lazy<Regex>, &'static str)>,
}

impl FieldRule {
    const fn none() -> Self {
        FieldRule {
            required: false,
            min_len: None,
            max_len: None,
            pattern: None,
            allowed: None,
            max_items: None,
            item_max_len: None,
            item_pattern: None,
        }
    }
}

pub const POST_TYPES: &[&str] = &["article", "tutorial", "project", "note"];

/// All validated fields, in the order record-level validation walks them.
pub const FIELDS: &[&str] = &[
    "title", "slug", "content", "excerpt", "image_url", "video_url", "tags", "post_type",
];

pub fn rule_for(field: &str) -> Option<&'static FieldRule> {
    static TITLE: FieldRule = FieldRule {
        required: true,
        min_len: Some(3),
        max_len: Some(200),
        ..FieldRule::none()
    };
    static SLUG: FieldRule = FieldRule {
        required: false,
        min_len: Some(3),
        max_len: Some(SLUG_MAX_LEN),
        pattern: Some((&SLUG_RE, "only lowercase letters, digits and hyphens")),
        ..FieldRule::none()
    };
    static CONTENT: FieldRule = FieldRule {
        required: true,
        min_len: Some(50),
        max_len: Some(50_000),
        ..FieldRule::none()
    };
    static EXCERPT: FieldRule =
        FieldRule { required: false, max_len: Some(300), ..FieldRule::none() };
    static IMAGE_URL: FieldRule = FieldRule {
        required: false,
        pattern: Some((&IMAGE_URL_RE, "must be an image URL (png, jpg, gif, webp, svg)")),
        ..FieldRule::none()
    };
    static VIDEO_URL: FieldRule = FieldRule {
        required: false,
        pattern: Some((&VIDEO_URL_RE, "must be a YouTube, Vimeo or Dailymotion URL")),
        ..FieldRule::none()
    };
    static TAGS: FieldRule = FieldRule {
        required: false,
        max_items: Some(10),
        item_max_len: Some(30),
        item_pattern: Some((&TAG_ITEM_RE, "letters, digits, hyphen, underscore and space only")),
        ..FieldRule::none()
    };
    static POST_TYPE: FieldRule =
        FieldRule { required: false, allowed: Some(POST_TYPES), ..FieldRule::none() };

    match field {
        "title" => Some(&TITLE),
        "slug" => Some(&SLUG),
        "content" => Some(&CONTENT),
        "excerpt" => Some(&EXCERPT),
        "image_url" => Some(&IMAGE_URL),
        "video_url" => Some(&VIDEO_URL),
        "tags" => Some(&TAGS),
        "post_type" => Some(&POST_TYPE),
        _ => None,
    }
}

/// Candidate value handed to the evaluator.
#[derive(Debug, Clone)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Items(&'a [String]),
    Missing,
}

impl<'a> From<&'a str> for FieldValue<'a> {
    fn from(s: &'a str) -> Self {
        FieldValue::Text(s)
    }
}

/// Outcome of validating one field. `error` is the first violation found;
/// `errors` carries all of them.
#[derive(Debug, Clone, Serialize)]
pub struct FieldReport {
    pub is_valid: bool,
    pub error: Option<String>,
    pub errors: Vec<String>,
}

impl FieldReport {
    fn ok() -> Self {
        FieldReport { is_valid: true, error: None, errors: Vec::new() }
    }

    fn from_errors(errors: Vec<String>) -> Self {
        FieldReport { is_valid: errors.is_empty(), error: errors.first().cloned(), errors }
    }
}

/// Evaluate one field against its rule.
///
/// Order: a missing required value fails alone; an empty optional value
/// passes trivially; otherwise length and pattern checks are all evaluated
/// (not short-circuited) and every violation is collected.
pub fn validate_field(field: &str, value: FieldValue<'_>) -> FieldReport {
    let Some(rule) = rule_for(field) else {
        return FieldReport::from_errors(vec![format!("unknown field '{field}'")]);
    };

    let is_empty = match &value {
        FieldValue::Text(s) => s.trim().is_empty(),
        FieldValue::Items(items) => items.is_empty(),
        FieldValue::Missing => true,
    };
    if is_empty {
        if rule.required {
            return FieldReport::from_errors(vec![format!("{field} is required")]);
        }
        return FieldReport::ok();
    }

    let mut errors = Vec::new();
    match value {
        FieldValue::Text(s) => {
            let len = s.chars().count();
            if let Some(min) = rule.min_len {
                if len < min {
                    errors.push(format!("{field} must be at least {min} characters"));
                }
            }
            if let Some(max) = rule.max_len {
                if len > max {
                    errors.push(format!("{field} must be at most {max} characters"));
                }
            }
            if let Some((re, hint)) = rule.pattern {
                if !re.is_match(s) {
                    errors.push(format!("{field}: {hint}"));
                }
            }
            if let Some(allowed) = rule.allowed {
                if !allowed.contains(&s) {
                    errors.push(format!("{field} must be one of: {}", allowed.join(", ")));
                }
            }
        }
        FieldValue::Items(items) => {
            if let Some(max) = rule.max_items {
                if items.len() > max {
                    errors.push(format!("{field} allows at most {max} items"));
                }
            }
            for (i, item) in items.iter().enumerate() {
                if let Some(max) = rule.item_max_len {
                    if item.chars().count() > max {
                        errors.push(format!("{field}[{i}] must be at most {max} characters"));
                        continue;
                    }
                }
                if let Some((re, hint)) = rule.item_pattern {
                    if !re.is_match(item) {
                        errors.push(format!("{field}[{i}]: {hint}"));
                    }
                }
            }
        }
        FieldValue::Missing => unreachable!("handled by the empty check above"),
    }
    FieldReport::from_errors(errors)
}

/// URL-safe slug derived from a title. Deterministic and idempotent:
/// lowercase, strip anything outside `[a-z0-9\s_-]`, collapse
/// whitespace/underscore/hyphen runs into one hyphen, trim hyphens,
/// truncate to [`SLUG_MAX_LEN`].
pub fn generate_slug(title: &str) -> String {
    let lowered = title.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_sep = false;
    for c in lowered.chars() {
        match c {
            'a'..='z' | '0'..='9' => {
                if pending_sep && !out.is_empty() {
                    out.push('-');
                }
                pending_sep = false;
                out.push(c);
            }
            c if c.is_whitespace() || c == '-' || c == '_' => pending_sep = true,
            _ => {}
        }
    }
    let truncated: String = out.chars().take(SLUG_MAX_LEN).collect();
    // truncation can land on a separator; the trailing hyphen must go or
    // re-slugging the result would not be a fixed point
    truncated.trim_end_matches('-').to_string()
}

/// Raw, unvalidated form payload as submitted by a client.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct PostDraft {
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub content: String,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub post_type: Option<String>,
    #[serde(default)]
    pub published: bool,
}

/// Result of record-level validation. `data` is only present when valid.
#[derive(Debug)]
pub struct PostValidation {
    pub is_valid: bool,
    pub errors: HashMap<String, String>,
    pub data: Option<NewBlogPost>,
}

fn record(errors: &mut HashMap<String, String>, field: &str, report: FieldReport) {
    if let Some(e) = report.error {
        errors.insert(field.to_string(), e);
    }
}

/// Validate a full draft: every declared field, slug derivation when the
/// author left it blank, and the excerpt-shorter-than-content rule.
pub fn validate_post(draft: &PostDraft) -> PostValidation {
    let mut errors: HashMap<String, String> = HashMap::new();

    record(&mut errors, "title", validate_field("title", FieldValue::Text(&draft.title)));
    record(&mut errors, "content", validate_field("content", FieldValue::Text(&draft.content)));

    let slug = match draft.slug.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => generate_slug(&draft.title),
    };
    record(&mut errors, "slug", validate_field("slug", FieldValue::Text(&slug)));

    if let Some(excerpt) = draft.excerpt.as_deref() {
        record(&mut errors, "excerpt", validate_field("excerpt", FieldValue::Text(excerpt)));
        // Cross-field rule: an excerpt that is not shorter than the content
        // it summarizes is rejected even when both pass their own rules.
        if !excerpt.is_empty()
            && !errors.contains_key("excerpt")
            && excerpt.chars().count() >= draft.content.chars().count()
        {
            errors.insert("excerpt".into(), "excerpt must be shorter than content".into());
        }
    }
    if let Some(url) = draft.image_url.as_deref() {
        record(&mut errors, "image_url", validate_field("image_url", FieldValue::Text(url)));
    }
    if let Some(url) = draft.video_url.as_deref() {
        record(&mut errors, "video_url", validate_field("video_url", FieldValue::Text(url)));
    }
    record(&mut errors, "tags", validate_field("tags", FieldValue::Items(&draft.tags)));
    if let Some(t) = draft.post_type.as_deref() {
        record(&mut errors, "post_type", validate_field("post_type", FieldValue::Text(t)));
    }

    if !errors.is_empty() {
        return PostValidation { is_valid: false, errors, data: None };
    }

    let post_type = draft.post_type.as_deref().and_then(PostType::parse);
    let none_if_blank = |o: &Option<String>| {
        o.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
    };
    PostValidation {
        is_valid: true,
        errors,
        data: Some(NewBlogPost {
            title: draft.title.trim().to_string(),
            slug,
            content: draft.content.clone(),
            excerpt: none_if_blank(&draft.excerpt),
            image_url: none_if_blank(&draft.image_url),
            video_url: none_if_blank(&draft.video_url),
            tags: draft.tags.clone(),
            post_type,
            published: draft.published,
        }),
    }
}

/// Live character-count numbers for one field, derived purely from the rule
/// table. Display aid only; limits are still enforced by `validate_field`.
#[derive(Debug, Clone, Serialize)]
pub struct CharacterCount {
    pub current: usize,
    pub max: Option<usize>,
    pub min: Option<usize>,
    pub remaining: Option<usize>,
    pub is_over_limit: bool,
    pub is_under_minimum: bool,
    pub percentage: Option<u8>,
}

pub fn character_count(field: &str, value: &str) -> CharacterCount {
    let current = value.chars().count();
    let (min, max) = rule_for(field).map(|r| (r.min_len, r.max_len)).unwrap_or((None, None));
    CharacterCount {
        current,
        max,
        min,
        remaining: max.map(|m| m.saturating_sub(current)),
        is_over_limit: max.is_some_and(|m| current > m),
        is_under_minimum: min.is_some_and(|m| current > 0 && current < m),
        percentage: max.map(|m| ((current * 100) / m.max(1)).min(100) as u8),
    }
}
