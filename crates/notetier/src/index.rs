//! # Identity-Keyed Metadata Index
//!
//! The index answers "what is the latest known metadata for note X?" without
//! opening X's file. It is a cache: every entry can be re-derived from the header
//! of the file it points at.
//!
//! ## Self-Healing
//!
//! The index assumes it is *always potentially stale*:
//!
//! 1. **Orphan Adoption**: a note file whose identity is not indexed is added.
//! 2. **Staleness Check**: an entry that differs from its file's header (moved
//!    file, external edit) is replaced by the file's view.
//! 3. **Zombie Cleanup**: an entry whose file no longer exists is dropped.
//!
//! [`reconcile`] runs all three. Lookups that miss or point at a missing file are
//! handled by callers as cache misses, never as hard failures.
//!
//! ## Implementations
//!
//! - [`JsonIndex`]: persisted as `.notes-index.json` at the store root.
//! - [`MemoryIndex`]: in-process only, for tests.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{NoteError, Result};
use crate::model::NoteMetadata;
use crate::store::backend::StorageBackend;
use crate::store::NoteFileStore;

pub const INDEX_FILE: &str = ".notes-index.json";

pub trait NoteIndex {
    fn get_note(&self, id: &str) -> Option<NoteMetadata>;

    /// Inserts or replaces the entry for `metadata.id`. Idempotent.
    fn upsert_note(&mut self, metadata: NoteMetadata) -> Result<()>;

    fn remove_note(&mut self, id: &str) -> Result<()>;

    fn entries(&self) -> Vec<NoteMetadata>;
}

#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: HashMap<String, NoteMetadata>,
    simulate_write_error: bool,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable write error simulation for testing error handling.
    pub fn set_simulate_write_error(&mut self, simulate: bool) {
        self.simulate_write_error = simulate;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NoteIndex for MemoryIndex {
    fn get_note(&self, id: &str) -> Option<NoteMetadata> {
        self.entries.get(id).cloned()
    }

    fn upsert_note(&mut self, metadata: NoteMetadata) -> Result<()> {
        if self.simulate_write_error {
            return Err(NoteError::Index("Simulated write error".to_string()));
        }
        self.entries.insert(metadata.id.clone(), metadata);
        Ok(())
    }

    fn remove_note(&mut self, id: &str) -> Result<()> {
        self.entries.remove(id);
        Ok(())
    }

    fn entries(&self) -> Vec<NoteMetadata> {
        self.entries.values().cloned().collect()
    }
}

/// Index persisted as JSON next to the notes it describes.
pub struct JsonIndex<B: StorageBackend> {
    backend: B,
    entries: BTreeMap<String, NoteMetadata>,
}

impl<B: StorageBackend> JsonIndex<B> {
    /// Loads the index file. A missing, unreadable or corrupt file yields an
    /// empty index; [`reconcile`] can rebuild it.
    pub fn open(backend: B) -> Self {
        let entries = match backend.read(INDEX_FILE) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("index file is corrupt, starting empty: {}", e);
                    BTreeMap::new()
                }
            },
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("index file unreadable, starting empty: {}", e);
                BTreeMap::new()
            }
        };
        debug!(entries = entries.len(), "opened note index");
        Self { backend, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.entries)?;
        self.backend
            .write_atomic(INDEX_FILE, content.as_bytes())
            .map_err(|e| NoteError::Index(e.to_string()))
    }
}

impl<B: StorageBackend> NoteIndex for JsonIndex<B> {
    fn get_note(&self, id: &str) -> Option<NoteMetadata> {
        self.entries.get(id).cloned()
    }

    fn upsert_note(&mut self, metadata: NoteMetadata) -> Result<()> {
        if self.entries.get(&metadata.id) == Some(&metadata) {
            return Ok(());
        }
        let id = metadata.id.clone();
        let previous = self.entries.insert(id.clone(), metadata);
        if let Err(e) = self.save() {
            // Keep memory in step with what is on disk.
            match previous {
                Some(previous) => self.entries.insert(id, previous),
                None => self.entries.remove(&id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_note(&mut self, id: &str) -> Result<()> {
        if let Some(previous) = self.entries.remove(id) {
            if let Err(e) = self.save() {
                self.entries.insert(id.to_string(), previous);
                return Err(e);
            }
        }
        Ok(())
    }

    fn entries(&self) -> Vec<NoteMetadata> {
        self.entries.values().cloned().collect()
    }
}

/// Report from [`reconcile`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub adopted: usize,
    pub refreshed: usize,
    pub removed: usize,
    /// Note files without a parseable header (legacy or foreign files).
    pub unparsed: usize,
}

/// Re-derives the index from the note files in `store`.
pub fn reconcile<S, I>(store: &S, index: &mut I) -> Result<ReconcileReport>
where
    S: NoteFileStore + ?Sized,
    I: NoteIndex + ?Sized,
{
    let mut report = ReconcileReport::default();
    let mut seen: HashSet<String> = HashSet::new();

    for path in store.list_note_files()? {
        let Some((metadata, _)) = store.read_file(&path) else {
            report.unparsed += 1;
            continue;
        };
        if !seen.insert(metadata.id.clone()) {
            warn!(note_id = %metadata.id, path = %path, "duplicate note identity, keeping first file");
            continue;
        }
        match index.get_note(&metadata.id) {
            None => {
                index.upsert_note(metadata)?;
                report.adopted += 1;
            }
            Some(existing) if existing != metadata => {
                index.upsert_note(metadata)?;
                report.refreshed += 1;
            }
            Some(_) => {}
        }
    }

    for entry in index.entries() {
        if !seen.contains(&entry.id) {
            index.remove_note(&entry.id)?;
            report.removed += 1;
        }
    }

    info!(
        adopted = report.adopted,
        refreshed = report.refreshed,
        removed = report.removed,
        unparsed = report.unparsed,
        "reconciled note index"
    );
    Ok(report)
}
