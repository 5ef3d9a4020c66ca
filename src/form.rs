//! Form state for the post editor.
//!
//! Tracks values, per-field errors and touched flags, recomputes the slug
//! from the title until the author customizes it, and re-validates the whole
//! record after a quiet period. Time only enters through explicit `Instant`
//! parameters: callers feed the clock in, tests fake it.
//!
//! A draft snapshot is persisted through a [`DraftStore`] after two seconds
//! of inactivity so an interrupted editing session can be restored.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Id;
use crate::validate::{
    character_count, generate_slug, validate_post, CharacterCount, PostDraft, PostValidation,
};

pub const VALIDATE_QUIET: Duration = Duration::from_millis(500);
pub const AUTOSAVE_QUIET: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit(Id),
}

impl FormMode {
    /// Draft key scoped to (mode, record id).
    pub fn draft_key(&self) -> String {
        match self {
            FormMode::Create => "create".to_string(),
            FormMode::Edit(id) => format!("edit-{id}"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DraftError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt draft: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftSnapshot {
    pub draft: PostDraft,
    pub saved_at: DateTime<Utc>,
}

/// Side-channel persistence for unsubmitted form content.
pub trait DraftStore: Send + Sync {
    fn save(&self, key: &str, snapshot: &DraftSnapshot) -> Result<(), DraftError>;
    fn load(&self, key: &str) -> Result<Option<DraftSnapshot>, DraftError>;
    fn delete(&self, key: &str) -> Result<(), DraftError>;
}

/// One JSON file per draft key under the data dir.
pub struct FsDraftStore {
    dir: PathBuf,
}

impl FsDraftStore {
    pub fn new() -> Self {
        let base = std::env::var("FOLIO_DATA_DIR").unwrap_or_else(|_| "data".into());
        Self { dir: PathBuf::from(base).join("drafts") }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Default for FsDraftStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DraftStore for FsDraftStore {
    fn save(&self, key: &str, snapshot: &DraftSnapshot) -> Result<(), DraftError> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        std::fs::write(self.path_for(key), bytes)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<DraftSnapshot>, DraftError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<(), DraftError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Rendering-oriented view of one field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldStatus {
    pub has_error: bool,
    pub error: Option<String>,
    pub is_valid: bool,
    pub is_touched: bool,
    pub character_count: CharacterCount,
}

#[derive(Debug, Default)]
pub struct PollOutcome {
    pub validated: bool,
    pub saved_draft: bool,
}

pub struct FormState {
    mode: FormMode,
    draft: PostDraft,
    errors: HashMap<String, String>,
    touched: HashSet<String>,
    is_custom_slug: bool,
    // single-slot pending deadlines; re-arming replaces the old one
    validate_at: Option<Instant>,
    autosave_at: Option<Instant>,
}

impl FormState {
    pub fn new(mode: FormMode) -> Self {
        Self {
            mode,
            draft: PostDraft::default(),
            errors: HashMap::new(),
            touched: HashSet::new(),
            is_custom_slug: false,
            validate_at: None,
            autosave_at: None,
        }
    }

    /// Resume from a restored snapshot. An explicit slug that differs from
    /// the auto-derived one counts as customized.
    pub fn from_snapshot(mode: FormMode, snapshot: DraftSnapshot) -> Self {
        let mut state = Self::new(mode);
        state.is_custom_slug = snapshot
            .draft
            .slug
            .as_deref()
            .is_some_and(|s| !s.is_empty() && s != generate_slug(&snapshot.draft.title));
        state.draft = snapshot.draft;
        state
    }

    pub fn draft(&self) -> &PostDraft {
        &self.draft
    }

    pub fn is_custom_slug(&self) -> bool {
        self.is_custom_slug
    }

    /// Apply one keystroke's worth of change.
    ///
    /// Editing the title re-derives the slug unless the author has taken it
    /// over; editing the slug directly takes it over. The field's displayed
    /// error clears immediately; the full re-validation only runs after the
    /// quiet period ([`VALIDATE_QUIET`]) via [`poll`](FormState::poll).
    pub fn update_field(&mut self, name: &str, value: &str, now: Instant) {
        match name {
            "title" => {
                self.draft.title = value.to_string();
                if !self.is_custom_slug {
                    self.draft.slug = Some(generate_slug(value));
                }
            }
            "slug" => {
                self.is_custom_slug = true;
                self.draft.slug = Some(value.to_string());
            }
            "content" => self.draft.content = value.to_string(),
            "excerpt" => self.draft.excerpt = Some(value.to_string()),
            "image_url" => self.draft.image_url = Some(value.to_string()),
            "video_url" => self.draft.video_url = Some(value.to_string()),
            "post_type" => self.draft.post_type = Some(value.to_string()),
            "tags" => {
                self.draft.tags = value
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => return,
        }
        self.touched.insert(name.to_string());
        self.errors.remove(name);
        if name == "title" && !self.is_custom_slug {
            self.errors.remove("slug");
        }
        self.validate_at = Some(now + VALIDATE_QUIET);
        if !self.draft.title.trim().is_empty() || !self.draft.content.trim().is_empty() {
            self.autosave_at = Some(now + AUTOSAVE_QUIET);
        }
    }

    /// Hand the slug back to auto-derivation.
    pub fn reset_auto_slug(&mut self, now: Instant) {
        self.is_custom_slug = false;
        self.draft.slug = Some(generate_slug(&self.draft.title));
        self.errors.remove("slug");
        self.validate_at = Some(now + VALIDATE_QUIET);
    }

    /// Fire whichever quiet-period deadlines have elapsed.
    pub fn poll(&mut self, now: Instant, drafts: &dyn DraftStore) -> PollOutcome {
        let mut outcome = PollOutcome::default();
        if self.validate_at.is_some_and(|at| now >= at) {
            self.validate_at = None;
            let result = validate_post(&self.draft);
            self.errors = result.errors;
            outcome.validated = true;
        }
        if self.autosave_at.is_some_and(|at| now >= at) {
            self.autosave_at = None;
            let snapshot = DraftSnapshot { draft: self.draft.clone(), saved_at: Utc::now() };
            match drafts.save(&self.mode.draft_key(), &snapshot) {
                Ok(()) => outcome.saved_draft = true,
                // best-effort: a failed auto-save never disturbs the form
                Err(e) => log::warn!("draft auto-save failed: {e}"),
            }
        }
        outcome
    }

    /// Immediate full validation for the submit path: every field is marked
    /// touched and the result is returned synchronously.
    pub fn validate_now(&mut self) -> PostValidation {
        let result = validate_post(&self.draft);
        for field in crate::validate::FIELDS {
            self.touched.insert((*field).to_string());
        }
        self.errors.clone_from(&result.errors);
        self.validate_at = None;
        result
    }

    /// The submitted record was accepted; the draft snapshot is obsolete.
    pub fn submit_succeeded(&mut self, drafts: &dyn DraftStore) {
        if let Err(e) = drafts.delete(&self.mode.draft_key()) {
            log::warn!("failed to delete draft: {e}");
        }
        self.autosave_at = None;
    }

    fn field_text(&self, name: &str) -> String {
        match name {
            "title" => self.draft.title.clone(),
            "slug" => self.draft.slug.clone().unwrap_or_default(),
            "content" => self.draft.content.clone(),
            "excerpt" => self.draft.excerpt.clone().unwrap_or_default(),
            "image_url" => self.draft.image_url.clone().unwrap_or_default(),
            "video_url" => self.draft.video_url.clone().unwrap_or_default(),
            "post_type" => self.draft.post_type.clone().unwrap_or_default(),
            "tags" => self.draft.tags.join(", "),
            _ => String::new(),
        }
    }

    /// An error is only shown for a field the author has actually touched.
    pub fn field_status(&self, name: &str) -> FieldStatus {
        let error = self.errors.get(name).cloned();
        let is_touched = self.touched.contains(name);
        FieldStatus {
            has_error: error.is_some() && is_touched,
            is_valid: error.is_none(),
            error: if is_touched { error } else { None },
            is_touched,
            character_count: character_count(name, &self.field_text(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDrafts;
    impl DraftStore for NullDrafts {
        fn save(&self, _: &str, _: &DraftSnapshot) -> Result<(), DraftError> {
            Ok(())
        }
        fn load(&self, _: &str) -> Result<Option<DraftSnapshot>, DraftError> {
            Ok(None)
        }
        fn delete(&self, _: &str) -> Result<(), DraftError> {
            Ok(())
        }
    }

    #[test]
    fn title_drives_slug_until_customized() {
        let t0 = Instant::now();
        let mut form = FormState::new(FormMode::Create);
        form.update_field("title", "Hello World", t0);
        assert_eq!(form.draft().slug.as_deref(), Some("hello-world"));

        form.update_field("slug", "my-own-slug", t0);
        form.update_field("title", "Another Title", t0);
        assert_eq!(form.draft().slug.as_deref(), Some("my-own-slug"));

        form.reset_auto_slug(t0);
        assert_eq!(form.draft().slug.as_deref(), Some("another-title"));
        form.update_field("title", "Third", t0);
        assert_eq!(form.draft().slug.as_deref(), Some("third"));
    }

    #[test]
    fn debounced_validation_fires_after_quiet_period() {
        let t0 = Instant::now();
        let mut form = FormState::new(FormMode::Create);
        form.update_field("title", "ab", t0);
        // before the deadline nothing happens
        let out = form.poll(t0 + Duration::from_millis(100), &NullDrafts);
        assert!(!out.validated);
        assert!(!form.field_status("title").has_error);
        // a later keystroke replaces the pending deadline
        form.update_field("title", "ab", t0 + Duration::from_millis(400));
        let out = form.poll(t0 + Duration::from_millis(600), &NullDrafts);
        assert!(!out.validated);
        let out = form.poll(t0 + Duration::from_millis(901), &NullDrafts);
        assert!(out.validated);
        assert!(form.field_status("title").has_error);
    }

    #[test]
    fn error_clears_immediately_on_edit() {
        let t0 = Instant::now();
        let mut form = FormState::new(FormMode::Create);
        form.update_field("title", "ab", t0);
        form.poll(t0 + VALIDATE_QUIET, &NullDrafts);
        assert!(form.field_status("title").has_error);
        form.update_field("title", "abc", t0 + VALIDATE_QUIET);
        assert!(!form.field_status("title").has_error);
    }

    #[test]
    fn untouched_fields_never_show_errors() {
        let mut form = FormState::new(FormMode::Create);
        form.update_field("title", "A valid title", Instant::now());
        form.poll(Instant::now() + VALIDATE_QUIET, &NullDrafts);
        // content is invalid (empty+required) but untouched
        assert!(!form.field_status("content").has_error);
        form.validate_now();
        assert!(form.field_status("content").has_error);
    }

    #[test]
    fn snapshot_restore_detects_custom_slug() {
        let snap = DraftSnapshot {
            draft: PostDraft {
                title: "My Post".into(),
                slug: Some("custom".into()),
                ..Default::default()
            },
            saved_at: Utc::now(),
        };
        let form = FormState::from_snapshot(FormMode::Edit(3), snap);
        assert!(form.is_custom_slug());

        let snap = DraftSnapshot {
            draft: PostDraft {
                title: "My Post".into(),
                slug: Some("my-post".into()),
                ..Default::default()
            },
            saved_at: Utc::now(),
        };
        let form = FormState::from_snapshot(FormMode::Edit(3), snap);
        assert!(!form.is_custom_slug());
    }
}
