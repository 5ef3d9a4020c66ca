use folio::validate::{
    character_count, generate_slug, validate_field, validate_post, FieldValue, PostDraft,
};

fn draft(title: &str, content: &str) -> PostDraft {
    PostDraft { title: title.into(), content: content.into(), ..Default::default() }
}

#[test]
fn slug_generation_is_idempotent() {
    let titles = [
        "My Great Blog Post!",
        "  Spaces   everywhere  ",
        "under_scores_and-hyphens",
        "Ünïcode & Punctuation!!!",
        "123 starts with digits",
        "ALL CAPS TITLE",
    ];
    for t in titles {
        let once = generate_slug(t);
        assert_eq!(generate_slug(&once), once, "generate_slug not idempotent for {t:?}");
    }
}

#[test]
fn slug_idempotence_survives_truncation_at_a_separator() {
    // long enough that the 100-char cut falls on what was a word boundary
    let title = "a ".repeat(51);
    let once = generate_slug(&title);
    assert!(once.len() <= 100);
    assert!(!once.ends_with('-'));
    assert_eq!(generate_slug(&once), once);
}

#[test]
fn content_length_bounds() {
    assert!(!validate_field("content", FieldValue::Text(&"x".repeat(49))).is_valid);
    assert!(validate_field("content", FieldValue::Text(&"x".repeat(50))).is_valid);
    assert!(validate_field("content", FieldValue::Text(&"x".repeat(50_000))).is_valid);
    assert!(!validate_field("content", FieldValue::Text(&"x".repeat(50_001))).is_valid);
}

#[test]
fn more_than_ten_tags_is_rejected() {
    let ten: Vec<String> = (0..10).map(|i| format!("tag{i}")).collect();
    assert!(validate_field("tags", FieldValue::Items(&ten)).is_valid);
    let eleven: Vec<String> = (0..11).map(|i| format!("tag{i}")).collect();
    assert!(!validate_field("tags", FieldValue::Items(&eleven)).is_valid);
}

#[test]
fn record_validation_derives_slug_from_title() {
    let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod \
                tempor incididunt ut labore et dolore magna aliqua ut enim.";
    let result = validate_post(&draft("My Great Blog Post!", text));
    assert!(result.is_valid, "unexpected errors: {:?}", result.errors);
    assert_eq!(result.data.unwrap().slug, "my-great-blog-post");
}

#[test]
fn explicit_slug_wins_over_derivation() {
    let mut d = draft("My Great Blog Post!", &"words and more words ".repeat(10));
    d.slug = Some("hand-picked".into());
    let result = validate_post(&d);
    assert!(result.is_valid);
    assert_eq!(result.data.unwrap().slug, "hand-picked");
}

#[test]
fn excerpt_must_be_shorter_than_content() {
    let mut d = draft("T is fine", &"x".repeat(60));
    d.excerpt = Some("y".repeat(70));
    let result = validate_post(&d);
    assert!(!result.is_valid);
    assert!(result.errors.contains_key("excerpt"), "errors: {:?}", result.errors);
    // and a genuinely shorter excerpt passes
    d.excerpt = Some("y".repeat(40));
    assert!(validate_post(&d).is_valid);
}

#[test]
fn invalid_records_collect_errors_per_field() {
    let mut d = draft("ab", "too short");
    d.video_url = Some("ftp://nope".into());
    d.tags = (0..12).map(|i| format!("t{i}")).collect();
    let result = validate_post(&d);
    assert!(!result.is_valid);
    assert!(result.data.is_none());
    for field in ["title", "content", "video_url", "tags"] {
        assert!(result.errors.contains_key(field), "missing {field}: {:?}", result.errors);
    }
}

#[test]
fn derived_slug_of_valid_title_revalidates_clean() {
    // any syntactically valid title produces a slug the slug rule accepts
    for title in ["Hello World", "Rust & WebAssembly in 2025", "a b c"] {
        assert!(validate_field("title", FieldValue::Text(title)).is_valid);
        let slug = generate_slug(title);
        assert!(
            validate_field("slug", FieldValue::Text(&slug)).is_valid,
            "derived slug {slug:?} failed for {title:?}"
        );
    }
}

#[test]
fn character_count_is_pure_display_data() {
    let over = character_count("title", &"x".repeat(250));
    assert!(over.is_over_limit);
    assert_eq!(over.remaining, Some(0));
    assert_eq!(over.percentage, Some(100));
    // the validator independently rejects the same value
    assert!(!validate_field("title", FieldValue::Text(&"x".repeat(250))).is_valid);
}
