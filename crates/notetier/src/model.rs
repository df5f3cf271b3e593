//! # Domain Model: Notes, Metadata and Derived Caches
//!
//! This module defines the core data structures for notetier: [`Note`],
//! [`NoteMetadata`], [`NoteStorage`] and [`Template`].
//!
//! ## Where Does a Note's Body Live?
//!
//! A note's body occupies exactly one storage tier at a time:
//!
//! ```text
//! Embedded { body }       <-- text kept on the entity itself (never migrated yet)
//! LegacyFile { path }     <-- raw file without a metadata header (old format)
//! Indexed { path }        <-- header + body file, metadata mirrored in the index
//! ```
//!
//! The tier is a closed enum rather than a set of nullable fields, so a note can
//! never claim to be both embedded and file-backed. The transition
//! `Embedded | LegacyFile -> Indexed` happens once, in [`crate::resolver`].
//!
//! ## Derived Caches
//!
//! Every write recomputes the same caches on both the note and its metadata:
//!
//! - **Word count**: whitespace-delimited non-empty tokens.
//! - **Char count**: Unicode scalar values.
//! - **Excerpt**: verbatim up to 200 characters, else the first 200 plus `…`.
//! - **Content hash**: lowercase hex SHA-256 of the body.
//!
//! ## Title Generation
//!
//! Notes created without a usable title get one from [`generate_title`]:
//! a timestamp title for an empty body, else the first markdown heading, else the
//! first non-empty line, truncated to 100 characters.

use std::collections::BTreeSet;

use chrono::{DateTime, SubsecRound, Utc};
use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const EXCERPT_LIMIT: usize = 200;
pub const EXCERPT_ELLIPSIS: char = '…';
pub const GENERATED_TITLE_LIMIT: usize = 100;

/// Structured fields persisted in a note file's header and mirrored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteMetadata {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub status: String,
    /// Root-relative location, set once the note is file-backed.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub word_count: Option<usize>,
    #[serde(default)]
    pub char_count: Option<usize>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
}

impl NoteMetadata {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: id.into(),
            title: title.into(),
            tags: BTreeSet::new(),
            created: now,
            modified: now,
            progress: 0.0,
            status: String::new(),
            path: None,
            word_count: None,
            char_count: None,
            content_hash: None,
            excerpt: None,
        }
    }

    /// Replaces the tag set, dropping blank tags.
    pub fn set_tags<I, T>(&mut self, tags: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = normalize_tags(tags);
    }

    pub fn set_progress(&mut self, progress: f64) {
        self.progress = clamp_progress(progress);
    }

    /// Recomputes the word/char counts, hash and excerpt for `body`.
    pub fn refresh_derived(&mut self, body: &str) {
        self.word_count = Some(word_count(body));
        self.char_count = Some(char_count(body));
        self.content_hash = Some(content_hash(body));
        self.excerpt = Some(excerpt(body));
    }
}

/// The storage tier currently holding a note's body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum NoteStorage {
    Embedded { body: String },
    LegacyFile { path: String },
    Indexed { path: String },
}

impl Default for NoteStorage {
    fn default() -> Self {
        NoteStorage::Embedded {
            body: String::new(),
        }
    }
}

impl NoteStorage {
    pub fn is_indexed(&self) -> bool {
        matches!(self, NoteStorage::Indexed { .. })
    }

    /// The file pointer for either file-backed tier.
    pub fn file_path(&self) -> Option<&str> {
        match self {
            NoteStorage::Embedded { .. } => None,
            NoteStorage::LegacyFile { path } | NoteStorage::Indexed { path } => Some(path),
        }
    }
}

/// The addressable entity a user edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub is_trashed: bool,
    #[serde(default)]
    pub storage: NoteStorage,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    // Signed because the surrounding store may hand back corrupt negatives;
    // validation coerces them to zero.
    #[serde(default)]
    pub word_count: i64,
    #[serde(default)]
    pub char_count: i64,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl Note {
    /// A fresh embedded note with a new identity.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = now();
        let body = body.into();
        let mut note = Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            container_id: None,
            is_trashed: false,
            storage: NoteStorage::Embedded { body: String::new() },
            created: Some(now),
            modified: Some(now),
            status: String::new(),
            progress: 0.0,
            tags: BTreeSet::new(),
            word_count: 0,
            char_count: 0,
            excerpt: String::new(),
            content_hash: None,
        };
        note.refresh_derived(&body, now);
        note.storage = NoteStorage::Embedded { body };
        note
    }

    /// A note whose body still lives in a header-less legacy file.
    pub fn legacy(title: impl Into<String>, path: impl Into<String>) -> Self {
        let mut note = Self::new(title, "");
        note.storage = NoteStorage::LegacyFile { path: path.into() };
        note
    }

    pub fn in_container(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }

    /// Embedded text, if this note has not been migrated to a file.
    pub fn embedded_body(&self) -> Option<&str> {
        match &self.storage {
            NoteStorage::Embedded { body } => Some(body),
            _ => None,
        }
    }

    /// Recomputes every derived cache and bumps `modified` to `now`.
    pub fn refresh_derived(&mut self, body: &str, now: DateTime<Utc>) {
        self.word_count = word_count(body) as i64;
        self.char_count = char_count(body) as i64;
        self.excerpt = excerpt(body);
        self.content_hash = Some(content_hash(body));
        self.modified = Some(now);
    }
}

/// A template-like entity. Only the validation gate looks at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub body: String,
}

/// The current time at the millisecond precision note headers store.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn word_count(body: &str) -> usize {
    body.split_whitespace().count()
}

pub fn char_count(body: &str) -> usize {
    body.chars().count()
}

pub fn excerpt(body: &str) -> String {
    if body.chars().count() <= EXCERPT_LIMIT {
        return body.to_string();
    }
    let mut out: String = body.chars().take(EXCERPT_LIMIT).collect();
    out.push(EXCERPT_ELLIPSIS);
    out
}

pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

pub fn normalize_tags<I, T>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    tags.into_iter()
        .map(Into::into)
        .filter(|tag| !tag.trim().is_empty())
        .collect()
}

/// Whether `title` needs replacing before persistence.
pub fn is_placeholder_title(title: &str, placeholder: &str) -> bool {
    let trimmed = title.trim();
    trimmed.is_empty() || trimmed == placeholder
}

/// Derives a title for a note that has none.
///
/// Order of preference:
/// 1. empty body: `Note YYYY-MM-DD HH:MM` from `now`
/// 2. text of the first markdown heading
/// 3. first non-empty line
///
/// The candidate is truncated to [`GENERATED_TITLE_LIMIT`] characters; if nothing
/// usable remains, `placeholder` is returned.
pub fn generate_title(body: &str, now: DateTime<Utc>, placeholder: &str) -> String {
    if body.trim().is_empty() {
        return format!("Note {}", now.format("%Y-%m-%d %H:%M"));
    }

    let candidate = first_heading(body)
        .or_else(|| {
            body.lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let truncated: String = candidate.chars().take(GENERATED_TITLE_LIMIT).collect();
    let truncated = truncated.trim();
    if truncated.is_empty() {
        placeholder.to_string()
    } else {
        truncated.to_string()
    }
}

fn first_heading(body: &str) -> Option<String> {
    let mut in_heading = false;
    let mut text = String::new();

    for event in Parser::new(body) {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                in_heading = true;
                text.clear();
            }
            Event::End(TagEnd::Heading(_)) => {
                let heading = text.trim();
                if !heading.is_empty() {
                    return Some(heading.to_string());
                }
                in_heading = false;
            }
            Event::Text(t) | Event::Code(t) if in_heading => text.push_str(&t),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap()
    }

    #[test]
    fn test_word_count_ignores_runs_of_whitespace() {
        assert_eq!(word_count("Hello world"), 2);
        assert_eq!(word_count("  one\n\n two\tthree  "), 3);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn test_excerpt_verbatim_when_short() {
        let body = "a".repeat(EXCERPT_LIMIT);
        assert_eq!(excerpt(&body), body);
    }

    #[test]
    fn test_excerpt_truncates_with_ellipsis() {
        let body = "é".repeat(EXCERPT_LIMIT + 5);
        let out = excerpt(&body);
        assert_eq!(out.chars().count(), EXCERPT_LIMIT + 1);
        assert!(out.ends_with(EXCERPT_ELLIPSIS));
    }

    #[test]
    fn test_content_hash_is_stable_hex() {
        let hash = content_hash("Hello world");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, content_hash("Hello world"));
        assert_ne!(hash, content_hash("Hello world!"));
    }

    #[test]
    fn test_clamp_progress() {
        assert_eq!(clamp_progress(-0.5), 0.0);
        assert_eq!(clamp_progress(1.7), 1.0);
        assert_eq!(clamp_progress(0.25), 0.25);
        assert_eq!(clamp_progress(f64::NAN), 0.0);
    }

    #[test]
    fn test_normalize_tags_drops_blank_and_dedupes() {
        let tags = normalize_tags(vec!["work", "", "  ", "home", "work"]);
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["home", "work"]);
    }

    #[test]
    fn test_generate_title_for_empty_body_uses_timestamp() {
        assert_eq!(
            generate_title("   \n", fixed_now(), "Untitled"),
            "Note 2024-03-09 14:05"
        );
    }

    #[test]
    fn test_generate_title_prefers_heading() {
        let body = "intro line\n\n## Shopping *list*\n\nmilk";
        assert_eq!(generate_title(body, fixed_now(), "Untitled"), "Shopping list");
    }

    #[test]
    fn test_generate_title_falls_back_to_first_line() {
        let body = "\n\n  first real line  \nsecond";
        assert_eq!(
            generate_title(body, fixed_now(), "Untitled"),
            "first real line"
        );
    }

    #[test]
    fn test_generate_title_truncates() {
        let body = "x".repeat(150);
        let title = generate_title(&body, fixed_now(), "Untitled");
        assert_eq!(title.chars().count(), GENERATED_TITLE_LIMIT);
    }

    #[test]
    fn test_placeholder_title_detection() {
        assert!(is_placeholder_title("", "Untitled"));
        assert!(is_placeholder_title("  Untitled ", "Untitled"));
        assert!(!is_placeholder_title("Groceries", "Untitled"));
    }

    #[test]
    fn test_new_note_is_embedded_with_caches() {
        let note = Note::new("Title", "two words");
        assert_eq!(note.embedded_body(), Some("two words"));
        assert_eq!(note.word_count, 2);
        assert_eq!(note.char_count, 9);
        assert!(note.content_hash.is_some());
        assert!(!note.storage.is_indexed());
    }

    #[test]
    fn test_storage_file_path() {
        let legacy = NoteStorage::LegacyFile {
            path: "old.txt".into(),
        };
        assert_eq!(legacy.file_path(), Some("old.txt"));
        assert_eq!(NoteStorage::default().file_path(), None);
    }
}
