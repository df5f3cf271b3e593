//! # Storage Layer
//!
//! This module owns the root directory of note files. The [`NoteFileStore`]
//! trait is what the resolver talks to; [`note_store::NoteStore`] implements it on
//! top of a raw [`backend::StorageBackend`].
//!
//! ## Files Are Truth
//!
//! Once a note is file-backed its file is authoritative for the body. The index
//! (see [`crate::index`]) mirrors header metadata and may always be rebuilt from
//! the files.
//!
//! ## Naming
//!
//! File names come from titles:
//!
//! 1. **Sanitize**: `: / \ ? % * | " < >` (and control characters) become `-`,
//!    surrounding whitespace and trailing periods are trimmed, an empty result
//!    becomes `Untitled`.
//! 2. **Extension**: the configured `file_ext` (default `.md`) is appended.
//! 3. **Collisions**: `Notes.md` is taken → `Notes 2.md`, then `Notes 3.md`, ...
//!
//! ## Trash
//!
//! Trashed notes live in a flat top-level `.trash/` folder, not a mirrored
//! substructure, under the same collision rule. Nothing is permanently deleted
//! except through [`NoteFileStore::delete_file`].
//!
//! ## Storage Layout
//!
//! ```text
//! <root>/
//! ├── .notes-index.json       # Metadata index (cache)
//! ├── .trash/
//! │   └── Old Idea.md
//! ├── Inbox.md
//! └── Work/
//!     └── Projects/
//!         ├── Notes.md
//!         └── Notes 2.md
//! ```
//!
//! ## Implementations
//!
//! - [`fs_backend::FsBackend`]: Production backend rooted at a directory.
//! - [`mem_backend::MemBackend`]: For testing logic without filesystem I/O,
//!   including simulated write and rename failures.

use crate::error::Result;
use crate::model::NoteMetadata;
use std::collections::BTreeSet;

pub mod backend;
pub mod fs_backend;
pub mod mem_backend;
pub mod note_store;

/// Reserved top-level folder for trashed notes.
pub const TRASH_FOLDER: &str = ".trash";

/// Replacement for titles that sanitize to nothing.
pub const UNTITLED_FILENAME: &str = "Untitled";

/// File-level operations the resolver drives.
pub trait NoteFileStore {
    /// Writes a new note file under a collision-free name derived from `title`.
    /// Returns the finalized metadata: path, tags and derived caches set.
    fn create_file(
        &self,
        title: &str,
        body: &str,
        folder: Option<&str>,
        tags: &BTreeSet<String>,
        metadata: NoteMetadata,
    ) -> Result<NoteMetadata>;

    /// Loads and decodes a note file. `None` on a missing file, non-UTF-8 bytes
    /// or a header that does not parse.
    fn read_file(&self, path: &str) -> Option<(NoteMetadata, String)>;

    /// The whole file as text, header or not.
    fn read_raw(&self, path: &str) -> Option<String>;

    /// Overwrites the file at `metadata.path` without ever truncating it on failure.
    fn update_file(&self, metadata: &NoteMetadata, body: &str) -> Result<()>;

    /// Relocates a file without touching its content. Refuses to overwrite.
    fn move_file(&self, from: &str, to: &str) -> Result<()>;

    /// The first-choice path for `title` in `folder`, without probing.
    fn file_path_for(&self, title: &str, folder: Option<&str>) -> String;

    /// The first path for `title` in `folder` that is not taken.
    fn unique_file_path(&self, title: &str, folder: Option<&str>) -> String;

    fn delete_file(&self, path: &str) -> Result<()>;

    /// Moves a file into [`TRASH_FOLDER`] and returns its new path.
    fn move_to_trash(&self, path: &str) -> Result<String>;

    /// Every note file under the root, trash included.
    fn list_note_files(&self) -> Result<Vec<String>>;
}

/// Turns a title into a file name stem.
pub fn sanitize_filename(title: &str) -> String {
    let mapped: String = title
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | '?' | '%' | '*' | '|' | '"' | '<' | '>' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let trimmed = mapped
        .trim_start()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        UNTITLED_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Joins an optional folder and a file name with `/`.
pub fn join_path(folder: Option<&str>, name: &str) -> String {
    match folder.map(|f| f.trim_matches('/')).filter(|f| !f.is_empty()) {
        Some(folder) => format!("{}/{}", folder, name),
        None => name.to_string(),
    }
}

/// The folder part of a root-relative path, `None` for root-level files.
pub fn parent_folder(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(folder, _)| folder)
}

pub fn is_trash_path(path: &str) -> bool {
    parent_folder(path)
        .map(|folder| folder == TRASH_FOLDER || folder.starts_with(".trash/"))
        .unwrap_or(false)
}
