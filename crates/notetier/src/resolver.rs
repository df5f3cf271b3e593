//! # Content Resolver
//!
//! Every read and write of a note's body goes through [`ContentResolver`]. It
//! decides which storage tier holds the body and performs the one-time migration
//! from the embedded or legacy tiers into an indexed file.
//!
//! ## Reading
//!
//! In priority order:
//!
//! 1. **Indexed**: the index knows the note and its file is readable, so the body
//!    is the file's parsed body.
//! 2. **File pointer**: the note points at a readable file. A legacy file is
//!    returned raw; an indexed file whose index entry went missing is parsed, or
//!    returned raw when its header is broken.
//! 3. **Embedded**: the note's own text, empty by default.
//!
//! Reading never fails and never mutates anything.
//!
//! ## Writing
//!
//! ```text
//!  Embedded ──┐                      ┌── success ──> Indexed { path }
//!             ├── migrate (once) ────┤
//!  LegacyFile ┘                      └── failure ──> Embedded { attempted body }
//!
//!  Indexed ── trash flip / title change? ── yes ──> move file, then rewrite
//!                                         └─ no ──> rewrite in place
//! ```
//!
//! The file is always written before the index is touched. A failed file write
//! leaves the index as it was; a failed index upsert is only logged, since
//! [`reconcile`](ContentResolver::reconcile) can rebuild it from the files.
//!
//! ## Collaborators
//!
//! Tags, progress and the container hierarchy are computed elsewhere. They are
//! passed per write through [`Collaborators`]; plain closures work for the first
//! two.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::folders::{folder_for, Container, ContainerHierarchy};
use crate::index::{self, NoteIndex, ReconcileReport};
use crate::model::{self, Note, NoteMetadata, NoteStorage};
use crate::store::{is_trash_path, parent_folder, NoteFileStore, TRASH_FOLDER};

/// Source of a note's tag set, typically scanned from its body.
pub trait TagSource {
    fn tags_for(&self, note: &Note, body: &str) -> BTreeSet<String>;
}

impl<F> TagSource for F
where
    F: Fn(&Note, &str) -> BTreeSet<String>,
{
    fn tags_for(&self, note: &Note, body: &str) -> BTreeSet<String> {
        self(note, body)
    }
}

/// Source of a note's completion ratio. Values are clamped to `[0, 1]`.
pub trait ProgressSource {
    fn progress_for(&self, note: &Note, body: &str) -> f64;
}

impl<F> ProgressSource for F
where
    F: Fn(&Note, &str) -> f64,
{
    fn progress_for(&self, note: &Note, body: &str) -> f64 {
        self(note, body)
    }
}

/// Keeps whatever tags the note already carries.
pub struct KeepTags;

impl TagSource for KeepTags {
    fn tags_for(&self, note: &Note, _body: &str) -> BTreeSet<String> {
        note.tags.clone()
    }
}

/// Keeps the note's current progress.
pub struct KeepProgress;

impl ProgressSource for KeepProgress {
    fn progress_for(&self, note: &Note, _body: &str) -> f64 {
        note.progress
    }
}

/// A hierarchy with no containers: every note lives at the root.
pub struct FlatHierarchy;

impl ContainerHierarchy for FlatHierarchy {
    fn ancestors(&self, _container_id: &str) -> Vec<Container> {
        Vec::new()
    }
}

pub struct Collaborators<'a> {
    pub tags: &'a dyn TagSource,
    pub progress: &'a dyn ProgressSource,
    pub hierarchy: &'a dyn ContainerHierarchy,
}

impl<'a> Collaborators<'a> {
    pub fn new(
        tags: &'a dyn TagSource,
        progress: &'a dyn ProgressSource,
        hierarchy: &'a dyn ContainerHierarchy,
    ) -> Self {
        Self {
            tags,
            progress,
            hierarchy,
        }
    }

    /// Default tag and progress sources over `hierarchy`.
    pub fn with_hierarchy(hierarchy: &'a dyn ContainerHierarchy) -> Self {
        Self::new(&KeepTags, &KeepProgress, hierarchy)
    }
}

impl Default for Collaborators<'static> {
    fn default() -> Self {
        Self::new(&KeepTags, &KeepProgress, &FlatHierarchy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A user-facing note about what a write did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub level: MessageLevel,
    pub content: String,
}

impl Message {
    pub fn info(content: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Info,
            content: content.into(),
        }
    }

    pub fn success(content: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Success,
            content: content.into(),
        }
    }

    pub fn warning(content: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Warning,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Error,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The indexed file was rewritten where it was.
    UpdatedInPlace,
    /// The indexed file moved before being rewritten.
    Relocated { from: String, to: String },
    /// The body moved from the embedded or legacy tier into a new file.
    Migrated { path: String },
    /// Migration was not possible; the body is embedded on the note.
    KeptEmbedded,
    /// The indexed file could not be written; its previous content is intact.
    WriteFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub outcome: WriteOutcome,
    pub messages: Vec<Message>,
}

impl WriteReport {
    fn new(outcome: WriteOutcome) -> Self {
        Self {
            outcome,
            messages: Vec::new(),
        }
    }

    fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Whether the body reached a file.
    pub fn is_file_backed(&self) -> bool {
        matches!(
            self.outcome,
            WriteOutcome::UpdatedInPlace
                | WriteOutcome::Relocated { .. }
                | WriteOutcome::Migrated { .. }
        )
    }
}

pub struct ContentResolver<S: NoteFileStore, I: NoteIndex> {
    store: S,
    index: I,
    config: EngineConfig,
}

impl<S: NoteFileStore, I: NoteIndex> ContentResolver<S, I> {
    pub fn new(store: S, index: I, config: EngineConfig) -> Self {
        Self {
            store,
            index,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut I {
        &mut self.index
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn into_parts(self) -> (S, I) {
        (self.store, self.index)
    }

    /// The current body of `note`.
    pub fn read(&self, note: &Note) -> String {
        if !note.id.trim().is_empty() {
            if let Some(path) = self.index.get_note(&note.id).and_then(|m| m.path) {
                if let Some((_, body)) = self.store.read_file(&path) {
                    return body;
                }
                debug!(note_id = %note.id, path = %path, "index entry points at an unreadable file");
            }
        }

        match &note.storage {
            NoteStorage::Embedded { body } => body.clone(),
            NoteStorage::Indexed { path } => match self.store.read_raw(path) {
                Some(text) => match codec::parse(&text) {
                    Ok((_, body)) => body,
                    Err(e) => {
                        debug!(note_id = %note.id, path = %path, "header did not parse, using whole file: {}", e);
                        text
                    }
                },
                None => {
                    warn!(note_id = %note.id, path = %path, "note file is missing");
                    String::new()
                }
            },
            NoteStorage::LegacyFile { path } => self.store.read_raw(path).unwrap_or_else(|| {
                warn!(note_id = %note.id, path = %path, "legacy note file is missing");
                String::new()
            }),
        }
    }

    /// Best known metadata for `note` with caches derived from `body`.
    pub fn metadata(&self, note: &Note, body: &str) -> NoteMetadata {
        let mut metadata = self
            .index
            .get_note(&note.id)
            .unwrap_or_else(|| self.metadata_from_note(note));
        if metadata.path.is_none() {
            metadata.path = note.storage.file_path().map(str::to_string);
        }
        metadata.refresh_derived(body);
        metadata
    }

    /// Persists `body` for `note`, migrating or relocating its file as needed.
    ///
    /// When the file cannot be written the note's caches are put back, so they
    /// keep describing the body that is actually persisted.
    pub fn write(&mut self, note: &mut Note, body: &str, collaborators: &Collaborators) -> WriteReport {
        let previous = note.clone();
        let now = model::now();
        note.refresh_derived(body, now);
        note.tags = model::normalize_tags(collaborators.tags.tags_for(note, body));
        note.progress = model::clamp_progress(collaborators.progress.progress_for(note, body));

        let report = match note.storage.clone() {
            NoteStorage::Indexed { path } => self.write_indexed(note, path, body, collaborators),
            NoteStorage::Embedded { .. } | NoteStorage::LegacyFile { .. } => {
                self.migrate(note, body, collaborators)
            }
        };
        if report.outcome == WriteOutcome::WriteFailed {
            restore_caches(note, previous);
        }
        report
    }

    /// Moves `note` into or out of the trash by rewriting its current body.
    pub fn set_trashed(
        &mut self,
        note: &mut Note,
        trashed: bool,
        collaborators: &Collaborators,
    ) -> WriteReport {
        let body = self.read(note);
        note.is_trashed = trashed;
        self.write(note, &body, collaborators)
    }

    /// Removes the note's file and index entry. The note is left embedded and empty.
    pub fn delete_permanently(&mut self, note: &mut Note) -> Result<()> {
        if let NoteStorage::Indexed { path } = &note.storage {
            if let Err(e) = self.store.delete_file(path) {
                if self.store.read_raw(path).is_some() {
                    return Err(e);
                }
                debug!(note_id = %note.id, path = %path, "note file was already gone");
            }
        }
        if let Err(e) = self.index.remove_note(&note.id) {
            warn!(note_id = %note.id, "could not drop index entry: {}", e);
        }
        note.storage = NoteStorage::default();
        note.refresh_derived("", model::now());
        info!(note_id = %note.id, "deleted note permanently");
        Ok(())
    }

    /// Rebuilds the index from the files in the store.
    pub fn reconcile(&mut self) -> Result<ReconcileReport> {
        index::reconcile(&self.store, &mut self.index)
    }

    fn write_indexed(
        &mut self,
        note: &mut Note,
        pointer: String,
        body: &str,
        collaborators: &Collaborators,
    ) -> WriteReport {
        let (mut metadata, current_path) = match self.index.get_note(&note.id) {
            Some(metadata) => {
                let path = self.indexed_location(note, &metadata, pointer);
                (metadata, path)
            }
            None => {
                debug!(note_id = %note.id, "index miss, re-deriving metadata from file");
                let metadata = self
                    .store
                    .read_file(&pointer)
                    .map(|(metadata, _)| metadata)
                    .unwrap_or_else(|| self.metadata_from_note(note));
                (metadata, pointer)
            }
        };
        note.storage = NoteStorage::Indexed {
            path: current_path.clone(),
        };

        if note.title.trim().is_empty() {
            note.title = self.config.placeholder_title.clone();
        }

        let was_trashed = is_trash_path(&current_path);
        let trash_changed = was_trashed != note.is_trashed;
        let title_changed = metadata.title != note.title;

        let mut report = WriteReport::new(WriteOutcome::UpdatedInPlace);
        let mut path = current_path.clone();

        if trash_changed || title_changed {
            match self.relocate(note, &current_path, trash_changed, title_changed, collaborators) {
                Ok(Some(target)) => {
                    info!(note_id = %note.id, from = %current_path, to = %target, "relocated note file");
                    note.storage = NoteStorage::Indexed {
                        path: target.clone(),
                    };
                    report.outcome = WriteOutcome::Relocated {
                        from: current_path.clone(),
                        to: target.clone(),
                    };
                    path = target;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(note_id = %note.id, path = %current_path, "could not move note file, keeping it in place: {}", e);
                    report.messages.push(Message::warning(format!(
                        "Could not move \"{}\"; it stays at {}",
                        note.title, current_path
                    )));
                }
            }
        }

        metadata.id = note.id.clone();
        metadata.title = note.title.clone();
        metadata.tags = note.tags.clone();
        metadata.progress = note.progress;
        metadata.status = note.status.clone();
        metadata.modified = note.modified.unwrap_or_else(model::now);
        metadata.path = Some(path.clone());
        metadata.refresh_derived(body);

        if let Err(e) = self.store.update_file(&metadata, body) {
            error!(note_id = %note.id, path = %path, "failed to write note file: {}", e);
            report.outcome = WriteOutcome::WriteFailed;
            report
                .messages
                .push(Message::error(format!("Could not save \"{}\": {}", note.title, e)));
            return report;
        }
        debug!(note_id = %note.id, path = %path, "wrote note file");

        if let Err(e) = self.index.upsert_note(metadata) {
            warn!(note_id = %note.id, "index update failed: {}", e);
        }
        report
    }

    /// Where the note's file lives now. The indexed path wins over the note's
    /// own pointer while that file exists; reconcile moves index entries along
    /// with files moved outside the engine.
    fn indexed_location(&self, note: &Note, metadata: &NoteMetadata, pointer: String) -> String {
        match metadata.path.as_deref() {
            Some(indexed) if indexed != pointer && self.store.read_raw(indexed).is_some() => {
                debug!(note_id = %note.id, from = %pointer, to = %indexed, "following indexed path");
                indexed.to_string()
            }
            _ => pointer,
        }
    }

    /// Moves the file for a trash flip or title change. `Ok(None)` when the
    /// first-choice path is where the file already is.
    fn relocate(
        &self,
        note: &Note,
        current_path: &str,
        trash_changed: bool,
        title_changed: bool,
        collaborators: &Collaborators,
    ) -> Result<Option<String>> {
        if trash_changed && note.is_trashed && !title_changed {
            return self.store.move_to_trash(current_path).map(Some);
        }

        let folder = if note.is_trashed {
            Some(TRASH_FOLDER.to_string())
        } else if trash_changed {
            folder_for(
                collaborators.hierarchy,
                note.container_id.as_deref(),
                self.config.restore_policy(),
                &self.config.placeholder_folder_name,
            )
        } else {
            parent_folder(current_path).map(str::to_string)
        };

        if self.store.file_path_for(&note.title, folder.as_deref()) == current_path {
            return Ok(None);
        }
        let target = self.store.unique_file_path(&note.title, folder.as_deref());
        self.store.move_file(current_path, &target)?;
        Ok(Some(target))
    }

    fn migrate(&mut self, note: &mut Note, body: &str, collaborators: &Collaborators) -> WriteReport {
        if note.id.trim().is_empty() {
            warn!("note without identity stays embedded");
            note.storage = NoteStorage::Embedded {
                body: body.to_string(),
            };
            return WriteReport::new(WriteOutcome::KeptEmbedded)
                .with_message(Message::warning("Note has no identity; kept in place"));
        }

        let now = note.modified.unwrap_or_else(model::now);
        if model::is_placeholder_title(&note.title, &self.config.placeholder_title) {
            note.title = model::generate_title(body, now, &self.config.placeholder_title);
        }
        let created = *note.created.get_or_insert(now);

        let folder = if note.is_trashed {
            Some(TRASH_FOLDER.to_string())
        } else {
            folder_for(
                collaborators.hierarchy,
                note.container_id.as_deref(),
                self.config.migration_policy(),
                &self.config.placeholder_folder_name,
            )
        };

        let mut metadata = self.metadata_from_note(note);
        metadata.created = created;
        metadata.modified = now;

        match self
            .store
            .create_file(&note.title, body, folder.as_deref(), &note.tags, metadata)
        {
            Ok(created) => {
                let path = created.path.clone().unwrap_or_default();
                if let Err(e) = self.index.upsert_note(created) {
                    warn!(note_id = %note.id, "index update failed after migration: {}", e);
                }
                note.storage = NoteStorage::Indexed { path: path.clone() };
                info!(note_id = %note.id, path = %path, "migrated note to file");
                WriteReport::new(WriteOutcome::Migrated { path: path.clone() })
                    .with_message(Message::success(format!("Saved \"{}\" to {}", note.title, path)))
            }
            Err(e) => {
                warn!(note_id = %note.id, "migration failed, keeping body embedded: {}", e);
                note.storage = NoteStorage::Embedded {
                    body: body.to_string(),
                };
                WriteReport::new(WriteOutcome::KeptEmbedded).with_message(Message::warning(
                    format!("Could not create a file for \"{}\": {}", note.title, e),
                ))
            }
        }
    }

    fn metadata_from_note(&self, note: &Note) -> NoteMetadata {
        let mut metadata = NoteMetadata::new(note.id.clone(), note.title.clone());
        if let Some(created) = note.created {
            metadata.created = created;
        }
        if let Some(modified) = note.modified {
            metadata.modified = modified;
        }
        metadata.tags = note.tags.clone();
        metadata.set_progress(note.progress);
        metadata.status = note.status.clone();
        metadata
    }
}

/// Puts back the caches `write` recomputed before the file write failed. Title,
/// trash flag and file pointer keep the values the write settled on.
fn restore_caches(note: &mut Note, previous: Note) {
    note.modified = previous.modified;
    note.tags = previous.tags;
    note.progress = previous.progress;
    note.word_count = previous.word_count;
    note.char_count = previous.char_count;
    note.excerpt = previous.excerpt;
    note.content_hash = previous.content_hash;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folders::ContainerTree;
    use crate::index::MemoryIndex;
    use crate::store::mem_backend::MemBackend;
    use crate::store::note_store::NoteStore;

    type TestResolver = ContentResolver<NoteStore<MemBackend>, MemoryIndex>;

    fn make_resolver() -> TestResolver {
        ContentResolver::new(
            NoteStore::with_backend(MemBackend::new()),
            MemoryIndex::new(),
            EngineConfig::default(),
        )
    }

    fn backend(resolver: &TestResolver) -> &MemBackend {
        &resolver.store().backend
    }

    fn indexed_path(note: &Note) -> &str {
        match &note.storage {
            NoteStorage::Indexed { path } => path,
            other => panic!("expected indexed storage, got {:?}", other),
        }
    }

    // --- Migration ---

    #[test]
    fn test_first_write_migrates_embedded_note() {
        let mut resolver = make_resolver();
        let mut note = Note::new("My Note", "");

        let report = resolver.write(&mut note, "Hello world", &Collaborators::default());

        assert_eq!(
            report.outcome,
            WriteOutcome::Migrated {
                path: "My Note.md".to_string()
            }
        );
        assert_eq!(indexed_path(&note), "My Note.md");
        assert_eq!(note.embedded_body(), None);
        assert_eq!(note.word_count, 2);

        let raw = resolver.store().read_raw("My Note.md").unwrap();
        assert!(raw.contains("title: My Note\n"));
        let (metadata, body) = resolver.store().read_file("My Note.md").unwrap();
        assert_eq!(body, "Hello world");
        assert_eq!(metadata.word_count, Some(2));
        assert_eq!(resolver.index().get_note(&note.id), Some(metadata));
    }

    #[test]
    fn test_migration_happens_at_most_once() {
        let mut resolver = make_resolver();
        let mut note = Note::new("Once", "");
        let collab = Collaborators::default();

        resolver.write(&mut note, "v1", &collab);
        let second = resolver.write(&mut note, "v2", &collab);
        let third = resolver.write(&mut note, "v3", &collab);

        assert_eq!(second.outcome, WriteOutcome::UpdatedInPlace);
        assert_eq!(third.outcome, WriteOutcome::UpdatedInPlace);
        assert_eq!(backend(&resolver).file_count(), 1);
        assert_eq!(resolver.read(&note), "v3");
    }

    #[test]
    fn test_failed_migration_keeps_attempted_body_embedded() {
        let mut resolver = make_resolver();
        let mut note = Note::new("Fragile", "old text");
        backend(&resolver).set_simulate_write_error(true);

        let report = resolver.write(&mut note, "new text here", &Collaborators::default());

        assert_eq!(report.outcome, WriteOutcome::KeptEmbedded);
        assert_eq!(report.messages[0].level, MessageLevel::Warning);
        assert_eq!(note.embedded_body(), Some("new text here"));
        assert_eq!(note.word_count, 3);
        assert!(resolver.index().get_note(&note.id).is_none());
        assert_eq!(resolver.read(&note), "new text here");

        backend(&resolver).set_simulate_write_error(false);
        let retry = resolver.write(&mut note, "new text here", &Collaborators::default());
        assert!(matches!(retry.outcome, WriteOutcome::Migrated { .. }));
    }

    #[test]
    fn test_legacy_note_migrates_and_leaves_legacy_file() {
        let mut resolver = make_resolver();
        backend(&resolver).insert_raw("old/legacy.txt", "legacy body");
        let mut note = Note::legacy("Legacy", "old/legacy.txt");

        assert_eq!(resolver.read(&note), "legacy body");
        let report = resolver.write(&mut note, "legacy body, edited", &Collaborators::default());

        assert!(matches!(report.outcome, WriteOutcome::Migrated { .. }));
        assert_eq!(resolver.read(&note), "legacy body, edited");
        assert_eq!(
            resolver.store().read_raw("old/legacy.txt").as_deref(),
            Some("legacy body")
        );
    }

    #[test]
    fn test_note_without_identity_is_never_migrated() {
        let mut resolver = make_resolver();
        let mut note = Note::new("Anon", "");
        note.id = String::new();

        let report = resolver.write(&mut note, "text", &Collaborators::default());
        assert_eq!(report.outcome, WriteOutcome::KeptEmbedded);
        assert_eq!(note.embedded_body(), Some("text"));
        assert_eq!(backend(&resolver).file_count(), 0);
    }

    #[test]
    fn test_placeholder_title_is_generated_on_migration() {
        let mut resolver = make_resolver();
        let mut note = Note::new("Untitled", "");

        resolver.write(&mut note, "# Weekly Review\n\nstuff", &Collaborators::default());
        assert_eq!(note.title, "Weekly Review");
        assert_eq!(indexed_path(&note), "Weekly Review.md");
    }

    #[test]
    fn test_migration_uses_container_folder() {
        let mut resolver = make_resolver();
        let tree: ContainerTree = [
            Container::new("work", "Work"),
            Container::new("blank", "").with_parent("work"),
        ]
        .into_iter()
        .collect();
        let mut note = Note::new("Plan", "").in_container("blank");

        resolver.write(&mut note, "x", &Collaborators::with_hierarchy(&tree));
        assert_eq!(indexed_path(&note), "Work/Plan.md");
    }

    #[test]
    fn test_container_named_like_trash_stays_live() {
        let mut resolver = make_resolver();
        let tree: ContainerTree = [Container::new("odd", ".trash")].into_iter().collect();
        let collab = Collaborators::with_hierarchy(&tree);
        let mut note = Note::new("Live", "").in_container("odd");

        resolver.write(&mut note, "x", &collab);
        assert_eq!(indexed_path(&note), "-trash/Live.md");

        let trashed = resolver.set_trashed(&mut note, true, &collab);
        assert!(matches!(trashed.outcome, WriteOutcome::Relocated { .. }));
        assert_eq!(indexed_path(&note), ".trash/Live.md");
    }

    #[test]
    fn test_collaborator_tags_and_progress_reach_header() {
        let mut resolver = make_resolver();
        let mut note = Note::new("Tasks", "");
        let tags = |_: &Note, body: &str| -> BTreeSet<String> {
            body.split_whitespace()
                .filter_map(|w| w.strip_prefix('#'))
                .map(str::to_string)
                .collect()
        };
        let progress = |_: &Note, _: &str| -> f64 { 1.5 };
        let collab = Collaborators::new(&tags, &progress, &FlatHierarchy);

        resolver.write(&mut note, "do it #home #urgent", &collab);

        let (metadata, _) = resolver.store().read_file("Tasks.md").unwrap();
        assert_eq!(metadata.tags.into_iter().collect::<Vec<_>>(), vec!["home", "urgent"]);
        assert_eq!(metadata.progress, 1.0);
    }

    #[test]
    fn test_index_failure_does_not_block_migration() {
        let mut resolver = make_resolver();
        resolver.index_mut().set_simulate_write_error(true);
        let mut note = Note::new("Cached", "");

        let report = resolver.write(&mut note, "body", &Collaborators::default());
        assert!(matches!(report.outcome, WriteOutcome::Migrated { .. }));
        assert!(resolver.index().get_note(&note.id).is_none());
        assert_eq!(resolver.read(&note), "body");
    }

    // --- Indexed writes ---

    #[test]
    fn test_rename_relocates_file() {
        let mut resolver = make_resolver();
        let collab = Collaborators::default();
        let mut note = Note::new("Draft", "");
        resolver.write(&mut note, "text", &collab);

        note.title = "Final".to_string();
        let report = resolver.write(&mut note, "text", &collab);

        assert_eq!(
            report.outcome,
            WriteOutcome::Relocated {
                from: "Draft.md".to_string(),
                to: "Final.md".to_string()
            }
        );
        assert!(resolver.store().read_raw("Draft.md").is_none());
        assert_eq!(
            resolver.index().get_note(&note.id).unwrap().path.as_deref(),
            Some("Final.md")
        );
    }

    #[test]
    fn test_same_title_in_same_folder_gets_suffix() {
        let mut resolver = make_resolver();
        let collab = Collaborators::default();
        let mut first = Note::new("Notes", "");
        let mut second = Note::new("Notes", "");

        resolver.write(&mut first, "a", &collab);
        resolver.write(&mut second, "b", &collab);

        assert_eq!(indexed_path(&first), "Notes.md");
        assert_eq!(indexed_path(&second), "Notes 2.md");
    }

    #[test]
    fn test_trash_and_restore_round_trip() {
        let mut resolver = make_resolver();
        let tree: ContainerTree = [Container::new("work", "Work")].into_iter().collect();
        let collab = Collaborators::with_hierarchy(&tree);
        let mut note = Note::new("Plan", "").in_container("work");
        resolver.write(&mut note, "body", &collab);
        assert_eq!(indexed_path(&note), "Work/Plan.md");

        let trashed = resolver.set_trashed(&mut note, true, &collab);
        assert!(matches!(trashed.outcome, WriteOutcome::Relocated { .. }));
        assert_eq!(indexed_path(&note), ".trash/Plan.md");

        let restored = resolver.set_trashed(&mut note, false, &collab);
        assert!(matches!(restored.outcome, WriteOutcome::Relocated { .. }));
        assert_eq!(indexed_path(&note), "Work/Plan.md");
        assert_eq!(resolver.read(&note), "body");
        assert!(resolver.store().read_raw(".trash/Plan.md").is_none());
    }

    #[test]
    fn test_failed_move_keeps_old_path() {
        let mut resolver = make_resolver();
        let collab = Collaborators::default();
        let mut note = Note::new("Stuck", "");
        resolver.write(&mut note, "body", &collab);

        backend(&resolver).set_simulate_rename_error(true);
        note.title = "Moved".to_string();
        let report = resolver.write(&mut note, "body 2", &collab);

        assert_eq!(report.outcome, WriteOutcome::UpdatedInPlace);
        assert_eq!(report.messages[0].level, MessageLevel::Warning);
        assert_eq!(indexed_path(&note), "Stuck.md");
        let (metadata, body) = resolver.store().read_file("Stuck.md").unwrap();
        assert_eq!(metadata.title, "Moved");
        assert_eq!(body, "body 2");
    }

    #[test]
    fn test_failed_indexed_write_keeps_file_and_index() {
        let mut resolver = make_resolver();
        let collab = Collaborators::default();
        let mut note = Note::new("Safe", "");
        resolver.write(&mut note, "original", &collab);
        let before = resolver.index().get_note(&note.id);

        backend(&resolver).set_simulate_write_error(true);
        let report = resolver.write(&mut note, "lost?", &collab);

        assert_eq!(report.outcome, WriteOutcome::WriteFailed);
        assert_eq!(report.messages[0].level, MessageLevel::Error);
        assert_eq!(resolver.index().get_note(&note.id), before);
        assert_eq!(resolver.read(&note), "original");
        assert_eq!(indexed_path(&note), "Safe.md");
    }

    #[test]
    fn test_failed_indexed_write_keeps_note_caches() {
        let mut resolver = make_resolver();
        let collab = Collaborators::default();
        let mut note = Note::new("Cached", "");
        resolver.write(&mut note, "one two", &collab);
        let saved = note.clone();

        backend(&resolver).set_simulate_write_error(true);
        let report = resolver.write(&mut note, "three four five six", &collab);

        assert_eq!(report.outcome, WriteOutcome::WriteFailed);
        assert_eq!(note.word_count, 2);
        assert_eq!(note.excerpt, "one two");
        assert_eq!(note.content_hash, saved.content_hash);
        assert_eq!(note.modified, saved.modified);
    }

    #[test]
    fn test_write_follows_path_refreshed_by_reconcile() {
        let mut resolver = make_resolver();
        let collab = Collaborators::default();
        let mut note = Note::new("Draft", "");
        resolver.write(&mut note, "v1", &collab);

        resolver.store().move_file("Draft.md", "Work/Draft.md").unwrap();
        let report = resolver.reconcile().unwrap();
        assert_eq!(report.refreshed, 1);

        let written = resolver.write(&mut note, "v2", &collab);
        assert_eq!(written.outcome, WriteOutcome::UpdatedInPlace);
        assert_eq!(indexed_path(&note), "Work/Draft.md");
        assert_eq!(backend(&resolver).file_count(), 1);
        let (metadata, body) = resolver.store().read_file("Work/Draft.md").unwrap();
        assert_eq!(metadata.id, note.id);
        assert_eq!(body, "v2");
    }

    #[test]
    fn test_index_miss_rederives_from_file() {
        let mut resolver = make_resolver();
        let collab = Collaborators::default();
        let mut note = Note::new("Evicted", "");
        resolver.write(&mut note, "first", &collab);
        let created = resolver.index().get_note(&note.id).unwrap().created;
        resolver.index_mut().remove_note(&note.id).unwrap();

        assert_eq!(resolver.read(&note), "first");
        let report = resolver.write(&mut note, "second", &collab);

        assert_eq!(report.outcome, WriteOutcome::UpdatedInPlace);
        let restored = resolver.index().get_note(&note.id).unwrap();
        assert_eq!(restored.created, created);
        assert_eq!(backend(&resolver).file_count(), 1);
    }

    // --- Reading ---

    #[test]
    fn test_read_indexed_pointer_with_broken_header_returns_raw() {
        let resolver = make_resolver();
        backend(&resolver).insert_raw("Broken.md", "---\nid: x\n---\n\nbody");
        let mut note = Note::new("Broken", "");
        note.storage = NoteStorage::Indexed {
            path: "Broken.md".to_string(),
        };

        assert_eq!(resolver.read(&note), "---\nid: x\n---\n\nbody");
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let resolver = make_resolver();
        let note = Note::legacy("Gone", "gone.txt");
        assert_eq!(resolver.read(&note), "");
    }

    // --- Deletion ---

    #[test]
    fn test_delete_permanently_removes_file_and_entry() {
        let mut resolver = make_resolver();
        let mut note = Note::new("Temp", "");
        resolver.write(&mut note, "bye", &Collaborators::default());

        resolver.delete_permanently(&mut note).unwrap();
        assert_eq!(backend(&resolver).file_count(), 0);
        assert!(resolver.index().get_note(&note.id).is_none());
        assert_eq!(note.embedded_body(), Some(""));

        // Already gone is fine
        note.storage = NoteStorage::Indexed {
            path: "Temp.md".to_string(),
        };
        resolver.delete_permanently(&mut note).unwrap();
    }
}
