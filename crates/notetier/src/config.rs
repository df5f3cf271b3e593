//! # Configuration
//!
//! Engine configuration is managed by [`confique`], layered in priority order:
//! 1. **Environment variables**: `NOTETIER_FILE_EXT`, `NOTETIER_LOG`, ...
//! 2. **Config file**: an optional TOML file passed to [`EngineConfig::load`].
//! 3. **Compiled defaults**: via `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `file_ext` | `.md` | Extension for note files |
//! | `placeholder_title` | `Untitled` | Title used when none can be derived |
//! | `placeholder_folder_name` | `Untitled Folder` | Name substituted for blank containers |
//! | `migration_folder_policy` | `skip_blank` | Blank-container handling when migrating |
//! | `restore_folder_policy` | `placeholder_blank` | Blank-container handling when restoring from trash |
//! | `conflict_retry_attempts` | `3` | Attempts before a conflicting save is abandoned |
//! | `conflict_retry_delay_ms` | `100` | Pause between conflict retries |
//! | `log_level` | `info` | Default `tracing` filter |

use std::path::{Path, PathBuf};
use std::time::Duration;

use confique::Config;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{NoteError, Result};
use crate::folders::BlankNamePolicy;
use crate::retry::FixedDelay;

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Extension for note files (e.g. ".md", ".txt")
    #[config(env = "NOTETIER_FILE_EXT", default = ".md")]
    pub file_ext: String,

    #[config(default = "Untitled")]
    pub placeholder_title: String,

    #[config(default = "Untitled Folder")]
    pub placeholder_folder_name: String,

    /// `skip_blank` or `placeholder_blank`
    #[config(default = "skip_blank")]
    pub migration_folder_policy: String,

    /// `skip_blank` or `placeholder_blank`
    #[config(default = "placeholder_blank")]
    pub restore_folder_policy: String,

    #[config(default = 3)]
    pub conflict_retry_attempts: u32,

    #[config(default = 100)]
    pub conflict_retry_delay_ms: u64,

    #[config(env = "NOTETIER_LOG", default = "info")]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            file_ext: ".md".to_string(),
            placeholder_title: "Untitled".to_string(),
            placeholder_folder_name: "Untitled Folder".to_string(),
            migration_folder_policy: "skip_blank".to_string(),
            restore_folder_policy: "placeholder_blank".to_string(),
            conflict_retry_attempts: 3,
            conflict_retry_delay_ms: 100,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from the environment and an optional TOML file.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = EngineConfig::builder().env();
        if let Some(path) = file {
            builder = builder.file(path);
        }
        builder
            .load()
            .map_err(|e| NoteError::Config(e.to_string()))
    }

    /// The file extension, normalized to start with a dot.
    pub fn file_ext(&self) -> String {
        if self.file_ext.starts_with('.') {
            self.file_ext.clone()
        } else {
            format!(".{}", self.file_ext)
        }
    }

    pub fn migration_policy(&self) -> BlankNamePolicy {
        parse_policy(&self.migration_folder_policy, BlankNamePolicy::SkipBlank)
    }

    pub fn restore_policy(&self) -> BlankNamePolicy {
        parse_policy(&self.restore_folder_policy, BlankNamePolicy::PlaceholderBlank)
    }

    pub fn retry_policy(&self) -> FixedDelay {
        FixedDelay::new(
            self.conflict_retry_attempts,
            Duration::from_millis(self.conflict_retry_delay_ms),
        )
    }
}

fn parse_policy(value: &str, fallback: BlankNamePolicy) -> BlankNamePolicy {
    value.parse().unwrap_or_else(|_| {
        warn!(value, "unknown folder policy, using {:?}", fallback);
        fallback
    })
}

/// Platform data directory for notes, e.g. `~/.local/share/notetier/notes`.
pub fn default_notes_root() -> Option<PathBuf> {
    ProjectDirs::from("", "", "notetier").map(|dirs| dirs.data_dir().join("notes"))
}
