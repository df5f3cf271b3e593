use super::backend::{validate_relative, StorageBackend};
use crate::error::{NoteError, Result};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

/// In-memory storage backend for testing.
///
/// Uses `RefCell` for interior mutability since the engine is driven from a
/// single context. This keeps the `StorageBackend` trait on `&self`.
#[derive(Default)]
pub struct MemBackend {
    files: RefCell<BTreeMap<String, Vec<u8>>>,
    simulate_write_error: Cell<bool>,
    simulate_rename_error: Cell<bool>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable write error simulation for testing error handling.
    pub fn set_simulate_write_error(&self, simulate: bool) {
        self.simulate_write_error.set(simulate);
    }

    /// Enable rename error simulation for testing relocation failures.
    pub fn set_simulate_rename_error(&self, simulate: bool) {
        self.simulate_rename_error.set(simulate);
    }

    /// Test helper to drop raw bytes in place, bypassing every check.
    pub fn insert_raw(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.into());
    }

    pub fn file_count(&self) -> usize {
        self.files.borrow().len()
    }
}

impl StorageBackend for MemBackend {
    fn exists(&self, path: &str) -> bool {
        self.files.borrow().contains_key(path)
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        validate_relative(path)?;
        Ok(self.files.borrow().get(path).cloned())
    }

    fn write_atomic(&self, path: &str, content: &[u8]) -> Result<()> {
        validate_relative(path)?;
        if self.simulate_write_error.get() {
            return Err(NoteError::Store("Simulated write error".to_string()));
        }
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        validate_relative(from)?;
        validate_relative(to)?;
        if self.simulate_rename_error.get() {
            return Err(NoteError::Store("Simulated rename error".to_string()));
        }
        let mut files = self.files.borrow_mut();
        if files.contains_key(to) {
            return Err(NoteError::Store(format!("{} already exists", to)));
        }
        let content = files
            .remove(from)
            .ok_or_else(|| NoteError::Store(format!("{} does not exist", from)))?;
        files.insert(to.to_string(), content);
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.files
            .borrow_mut()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| NoteError::Store(format!("{} does not exist", path)))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.files.borrow().keys().cloned().collect())
    }
}
