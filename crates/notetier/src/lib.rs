//! # notetier Architecture
//!
//! notetier keeps user notes coherent across three storage representations and
//! never drops content on a failure path: not on a full disk, a name collision,
//! a malformed file or a concurrent edit.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Note Graph (graph.rs) + Validation Gate (validation.rs)    │
//! │  - Owns notes, containers, templates with revisions         │
//! │  - All-or-nothing commits, bounded conflict retry           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Content Resolver (resolver.rs)                             │
//! │  - Single entry point for reading and writing bodies        │
//! │  - One-time migration, relocation on rename/trash           │
//! └─────────────────────────────────────────────────────────────┘
//!                │                              │
//!                ▼                              ▼
//! ┌────────────────────────────┐  ┌────────────────────────────┐
//! │  Note Store (store/)       │  │  Index (index.rs)          │
//! │  - Header codec, naming    │  │  - Metadata by identity    │
//! │  - Filesystem or memory    │  │  - Rebuildable cache       │
//! └────────────────────────────┘  └────────────────────────────┘
//! ```
//!
//! ## Storage Tiers
//!
//! A note's body lives in exactly one of: embedded on the note, a header-less
//! legacy file, or an indexed file with a metadata header. See [`model`] for the
//! representation and [`resolver`] for the transitions.
//!
//! ## Invariants
//!
//! - The file is written before the index is updated.
//! - A note migrates to a file at most once.
//! - A failed write keeps the last known-good persisted state.
//! - The index can always be rebuilt from the files ([`index::reconcile`]).
//!
//! ## Module Overview
//!
//! - **[`model`]**: Notes, metadata, storage tiers, derived caches
//! - **[`codec`]**: The `---` delimited metadata header
//! - **[`store`]**: File naming, trash, atomic writes
//! - **[`index`]**: Identity-keyed metadata cache and reconciliation
//! - **[`folders`]**: Folder paths from container chains
//! - **[`validation`]**: Entity checks and the unit of work
//! - **[`resolver`]**: Read/write policy and migration
//! - **[`graph`]**: Transactional note graph, fork and merge
//! - **[`retry`]**: Conflict retry policies
//! - **[`snapshot`]**: Bundling everything for backup upload
//! - **[`config`]**: Engine settings
//! - **[`logging`]**: Subscriber setup
//! - **[`error`]**: Error types

pub mod codec;
pub mod config;
pub mod error;
pub mod folders;
pub mod graph;
pub mod index;
pub mod logging;
pub mod model;
pub mod resolver;
pub mod retry;
pub mod snapshot;
pub mod store;
pub mod validation;

pub use config::EngineConfig;
pub use error::{NoteError, Result};
pub use folders::{BlankNamePolicy, Container, ContainerHierarchy, ContainerTree};
pub use graph::{NoteGraph, SharedGraph};
pub use index::{JsonIndex, MemoryIndex, NoteIndex, ReconcileReport};
pub use model::{Note, NoteMetadata, NoteStorage, Template};
pub use resolver::{Collaborators, ContentResolver, Message, MessageLevel, WriteOutcome, WriteReport};
pub use store::fs_backend::FsBackend;
pub use store::note_store::NoteStore;
pub use store::NoteFileStore;
pub use validation::{UnitOfWork, ValidationError};

use std::path::Path;

/// A resolver over files under `root` with a JSON index beside them.
pub type FsResolver = ContentResolver<NoteStore<FsBackend>, JsonIndex<FsBackend>>;

/// Opens the notes directory at `root`, creating it if needed.
pub fn open(root: impl AsRef<Path>, config: EngineConfig) -> Result<FsResolver> {
    let root = root.as_ref();
    std::fs::create_dir_all(root)?;
    let store = NoteStore::open(root).with_file_ext(&config.file_ext());
    let index = JsonIndex::open(FsBackend::new(root));
    tracing::debug!(root = %root.display(), "opened notes directory");
    Ok(ContentResolver::new(store, index, config))
}
