use crate::error::{NoteError, Result};

/// Abstract interface for raw storage I/O.
/// This trait handles the "how" of storage (filesystem vs memory),
/// while [`NoteStore`](super::note_store::NoteStore) handles the "what"
/// (naming, collisions, header encoding).
///
/// All paths are root-relative and `/`-separated. Implementations must reject
/// paths that would escape the root (see [`validate_relative`]).
pub trait StorageBackend {
    fn exists(&self, path: &str) -> bool;

    /// Read raw bytes.
    /// Returns Ok(None) if the file does not exist.
    /// Returns Err only on actual I/O errors (permissions, disk failure).
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Write bytes, creating parent folders.
    /// MUST be atomic (e.g. write to tmp then rename) so a failed write never
    /// truncates an existing file or leaves a partial one behind.
    fn write_atomic(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Move a file, creating parent folders. Fails if `to` already exists.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    fn remove(&self, path: &str) -> Result<()>;

    /// Every file under the root, recursively.
    fn list_files(&self) -> Result<Vec<String>>;
}

/// Rejects empty, absolute, drive-qualified and `.`/`..`-containing paths.
pub fn validate_relative(path: &str) -> Result<()> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.contains(':')
        || path
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(NoteError::Store(format!("invalid note path: {:?}", path)));
    }
    Ok(())
}
