use super::backend::{validate_relative, StorageBackend};
use crate::error::{NoteError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_relative(path)?;
        Ok(path.split('/').fold(self.root.clone(), |acc, part| acc.join(part)))
    }

    fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(NoteError::Io)?;
            }
        }
        Ok(())
    }

    fn walk(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir).map_err(NoteError::Io)? {
            let entry = entry.map_err(NoteError::Io)?;
            let name = entry.file_name().to_string_lossy().to_string();
            let rel = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };
            let file_type = entry.file_type().map_err(NoteError::Io)?;
            if file_type.is_dir() {
                self.walk(&entry.path(), &rel, out)?;
            } else if file_type.is_file() {
                out.push(rel);
            }
        }
        Ok(())
    }
}

impl StorageBackend for FsBackend {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.resolve(path)?;
        match fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NoteError::Io(e)),
        }
    }

    fn write_atomic(&self, path: &str, content: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        self.ensure_parent(&target)?;

        // Atomic Write
        let dir = target.parent().unwrap_or(&self.root);
        let tmp = dir.join(format!(".note-{}.tmp", Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, content) {
            let _ = fs::remove_file(&tmp);
            return Err(NoteError::Io(e));
        }
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(NoteError::Io(e));
        }
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if target.exists() {
            return Err(NoteError::Store(format!("{} already exists", to)));
        }
        self.ensure_parent(&target)?;
        fs::rename(source, target).map_err(NoteError::Io)
    }

    fn remove(&self, path: &str) -> Result<()> {
        fs::remove_file(self.resolve(path)?).map_err(NoteError::Io)
    }

    fn list_files(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        self.walk(&self.root, "", &mut files)?;
        files.sort();
        Ok(files)
    }
}
