use super::backend::StorageBackend;
use super::fs_backend::FsBackend;
use super::{join_path, sanitize_filename, NoteFileStore, TRASH_FOLDER};
use crate::codec;
use crate::error::{NoteError, Result};
use crate::model::NoteMetadata;
use crate::validation::ValidationError;
use chrono::SubsecRound;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct NoteStore<B: StorageBackend> {
    /// The underlying storage backend.
    /// Exposed as pub(crate) for testing and internal access only.
    pub(crate) backend: B,
    file_ext: String,
}

impl NoteStore<FsBackend> {
    /// A store rooted at `root` on the local filesystem.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::with_backend(FsBackend::new(root))
    }
}

impl<B: StorageBackend> NoteStore<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            file_ext: ".md".to_string(),
        }
    }

    pub fn with_file_ext(mut self, ext: &str) -> Self {
        if ext.starts_with('.') {
            self.file_ext = ext.to_string();
        } else {
            self.file_ext = format!(".{}", ext);
        }
        self
    }

    pub fn file_ext(&self) -> &str {
        &self.file_ext
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn file_name(&self, stem: &str, suffix: Option<u32>) -> String {
        match suffix {
            Some(n) => format!("{} {}{}", stem, n, self.file_ext),
            None => format!("{}{}", stem, self.file_ext),
        }
    }

    fn read_text(&self, path: &str) -> Option<String> {
        let bytes = match self.backend.read(path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(path, "failed to read note file: {}", e);
                return None;
            }
        };
        match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                warn!(path, "note file is not valid UTF-8");
                None
            }
        }
    }
}

fn ensure_persistable(metadata: &NoteMetadata) -> Result<()> {
    if metadata.id.trim().is_empty() {
        return Err(ValidationError::MissingIdentity { kind: "note" }.into());
    }
    if metadata.title.trim().is_empty() {
        return Err(ValidationError::BlankTitle {
            id: metadata.id.clone(),
        }
        .into());
    }
    Ok(())
}

impl<B: StorageBackend> NoteFileStore for NoteStore<B> {
    fn create_file(
        &self,
        title: &str,
        body: &str,
        folder: Option<&str>,
        tags: &BTreeSet<String>,
        metadata: NoteMetadata,
    ) -> Result<NoteMetadata> {
        ensure_persistable(&metadata)?;

        let path = self.unique_file_path(title, folder);
        let mut finalized = metadata;
        finalized.set_tags(tags.iter().cloned());
        finalized.path = Some(path.clone());
        finalized.created = finalized.created.trunc_subsecs(3);
        finalized.modified = finalized.modified.trunc_subsecs(3);
        finalized.refresh_derived(body);

        self.backend
            .write_atomic(&path, codec::serialize(&finalized, body).as_bytes())?;
        debug!(note_id = %finalized.id, path = %path, "created note file");
        Ok(finalized)
    }

    fn read_file(&self, path: &str) -> Option<(NoteMetadata, String)> {
        let text = self.read_text(path)?;
        match codec::parse(&text) {
            Ok((mut metadata, body)) => {
                metadata.path = Some(path.to_string());
                Some((metadata, body))
            }
            Err(e) => {
                debug!(path, "note header did not parse: {}", e);
                None
            }
        }
    }

    fn read_raw(&self, path: &str) -> Option<String> {
        self.read_text(path)
    }

    fn update_file(&self, metadata: &NoteMetadata, body: &str) -> Result<()> {
        ensure_persistable(metadata)?;
        let path = metadata
            .path
            .as_deref()
            .ok_or_else(|| NoteError::Store(format!("note {} has no file path", metadata.id)))?;
        self.backend
            .write_atomic(path, codec::serialize(metadata, body).as_bytes())
    }

    fn move_file(&self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        self.backend.rename(from, to)?;
        debug!(from, to, "moved note file");
        Ok(())
    }

    fn file_path_for(&self, title: &str, folder: Option<&str>) -> String {
        join_path(folder, &self.file_name(&sanitize_filename(title), None))
    }

    fn unique_file_path(&self, title: &str, folder: Option<&str>) -> String {
        let stem = sanitize_filename(title);
        let mut candidate = join_path(folder, &self.file_name(&stem, None));
        let mut suffix = 2;
        while self.backend.exists(&candidate) {
            candidate = join_path(folder, &self.file_name(&stem, Some(suffix)));
            suffix += 1;
        }
        candidate
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        self.backend.remove(path)?;
        debug!(path, "deleted note file");
        Ok(())
    }

    fn move_to_trash(&self, path: &str) -> Result<String> {
        if super::is_trash_path(path) {
            return Ok(path.to_string());
        }
        let name = path.rsplit('/').next().unwrap_or(path);
        let stem = match name.strip_suffix(self.file_ext.as_str()) {
            Some(stem) => stem,
            None => Path::new(name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default(),
        };
        let target = self.unique_file_path(stem, Some(TRASH_FOLDER));
        self.backend.rename(path, &target)?;
        debug!(from = path, to = %target, "moved note file to trash");
        Ok(target)
    }

    fn list_note_files(&self) -> Result<Vec<String>> {
        Ok(self
            .backend
            .list_files()?
            .into_iter()
            .filter(|path| path.ends_with(&self.file_ext))
            .collect())
    }
}
