//! # Snapshots
//!
//! A snapshot serializes every note (resolved body plus metadata) and every
//! container into one gzip'd tar bundle and hands it to a [`SnapshotUploader`]:
//!
//! ```text
//! snapshot/
//! ├── manifest.json          # taken_at, note metadata, containers
//! └── notes/
//!     ├── <id>.md            # header + body, same format as note files
//!     └── ...
//! ```
//!
//! Bodies are resolved on the calling thread through the
//! [`ContentResolver`]; packing and uploading can then run in the background
//! ([`spawn_snapshot`]).
//!
//! ## One at a Time
//!
//! At most one snapshot is in flight per [`SnapshotGate`]. A request arriving
//! while one is running is dropped with a warning and reported as
//! [`SnapshotOutcome::Skipped`]. [`SnapshotGate::global`] is the process-wide
//! gate; [`SnapshotGate::new`] makes an independent one.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{NoteError, Result};
use crate::folders::Container;
use crate::graph::NoteGraph;
use crate::index::NoteIndex;
use crate::model::{self, NoteMetadata};
use crate::resolver::ContentResolver;
use crate::store::{sanitize_filename, NoteFileStore};

pub const MANIFEST_PATH: &str = "snapshot/manifest.json";
pub const NOTES_DIR: &str = "snapshot/notes";

/// Receives finished bundles.
pub trait SnapshotUploader {
    fn upload(&self, bundle: &[u8]) -> Result<()>;
}

impl<F> SnapshotUploader for F
where
    F: Fn(&[u8]) -> Result<()>,
{
    fn upload(&self, bundle: &[u8]) -> Result<()> {
        self(bundle)
    }
}

/// Writes each bundle as a timestamped file in a directory.
pub struct DirectoryUploader {
    dir: PathBuf,
}

impl DirectoryUploader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SnapshotUploader for DirectoryUploader {
    fn upload(&self, bundle: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let name = format!(
            "notetier-{}-{}.tar.gz",
            Utc::now().format("%Y-%m-%d_%H-%M-%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let path = self.dir.join(name);
        std::fs::write(&path, bundle)?;
        debug!(path = %path.display(), "wrote snapshot bundle");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub taken_at: DateTime<Utc>,
    pub notes: Vec<NoteMetadata>,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub metadata: NoteMetadata,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<SnapshotEntry>,
    pub containers: Vec<Container>,
}

impl Snapshot {
    /// Resolves every note in `graph` to its current body and metadata.
    pub fn collect<S, I>(graph: &NoteGraph, resolver: &ContentResolver<S, I>) -> Self
    where
        S: NoteFileStore,
        I: NoteIndex,
    {
        let mut entries: Vec<SnapshotEntry> = graph
            .notes()
            .map(|note| {
                let body = resolver.read(note);
                let mut metadata = resolver.metadata(note, &body);
                if metadata.title.trim().is_empty() {
                    metadata.title = resolver.config().placeholder_title.clone();
                }
                SnapshotEntry { metadata, body }
            })
            .collect();
        entries.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));

        let mut containers: Vec<Container> = graph.containers().iter().cloned().collect();
        containers.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            taken_at: model::now(),
            entries,
            containers,
        }
    }

    pub fn note_count(&self) -> usize {
        self.entries.len()
    }

    /// Packs the snapshot as a gzip'd tar archive.
    pub fn to_bundle(&self) -> Result<Vec<u8>> {
        let manifest = Manifest {
            taken_at: self.taken_at,
            notes: self.entries.iter().map(|e| e.metadata.clone()).collect(),
            containers: self.containers.clone(),
        };
        let mtime = self.taken_at.timestamp().max(0) as u64;

        let enc = GzEncoder::new(Vec::new(), Compression::default());
        let mut tar = tar::Builder::new(enc);

        let manifest_json = serde_json::to_vec_pretty(&manifest)?;
        append_entry(&mut tar, MANIFEST_PATH, &manifest_json, mtime)?;

        for entry in &self.entries {
            let name = note_entry_path(&entry.metadata.id);
            let content = codec::serialize(&entry.metadata, &entry.body);
            append_entry(&mut tar, &name, content.as_bytes(), mtime)?;
        }

        let enc = tar.into_inner()?;
        Ok(enc.finish()?)
    }

    /// Reads a bundle produced by [`Snapshot::to_bundle`].
    pub fn from_bundle(bytes: &[u8]) -> Result<Self> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        let mut manifest: Option<Manifest> = None;
        let mut bodies: HashMap<String, String> = HashMap::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().into_owned();
            let mut text = String::new();
            entry.read_to_string(&mut text)?;

            if path == MANIFEST_PATH {
                manifest = Some(serde_json::from_str(&text)?);
            } else if path.starts_with(NOTES_DIR) {
                let body = match codec::parse(&text) {
                    Ok((_, body)) => body,
                    Err(e) => {
                        warn!(path = %path, "note header did not parse, keeping whole text: {}", e);
                        text
                    }
                };
                bodies.insert(path, body);
            }
        }

        let manifest =
            manifest.ok_or_else(|| NoteError::Store("snapshot has no manifest".to_string()))?;
        let entries = manifest
            .notes
            .into_iter()
            .map(|metadata| {
                let body = bodies
                    .remove(&note_entry_path(&metadata.id))
                    .unwrap_or_else(|| {
                        warn!(note_id = %metadata.id, "snapshot has no body for note");
                        String::new()
                    });
                SnapshotEntry { metadata, body }
            })
            .collect();

        Ok(Self {
            taken_at: manifest.taken_at,
            entries,
            containers: manifest.containers,
        })
    }
}

fn note_entry_path(id: &str) -> String {
    format!("{}/{}.md", NOTES_DIR, sanitize_filename(id))
}

fn append_entry<W: std::io::Write>(
    tar: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
    mtime: u64,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_cksum();
    tar.append_data(&mut header, name, data)?;
    Ok(())
}

static GLOBAL_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Single in-flight flag for snapshots.
#[derive(Debug, Clone, Default)]
pub struct SnapshotGate {
    flag: Arc<AtomicBool>,
}

impl SnapshotGate {
    /// An independent gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide gate. Every call returns a handle to the same flag.
    pub fn global() -> Self {
        Self {
            flag: GLOBAL_FLAG
                .get_or_init(|| Arc::new(AtomicBool::new(false)))
                .clone(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Claims the gate, or `None` if a snapshot is already running.
    pub fn try_acquire(&self) -> Option<SnapshotGuard> {
        self.flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SnapshotGuard {
                flag: Arc::clone(&self.flag),
            })
    }
}

/// Releases the gate on drop.
#[derive(Debug)]
pub struct SnapshotGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SnapshotOutcome {
    Uploaded { notes: usize, bytes: usize },
    Skipped,
}

/// Packs and uploads `snapshot` unless another snapshot holds `gate`.
pub fn run_snapshot<U>(
    gate: &SnapshotGate,
    snapshot: &Snapshot,
    uploader: &U,
) -> Result<SnapshotOutcome>
where
    U: SnapshotUploader + ?Sized,
{
    let Some(guard) = gate.try_acquire() else {
        warn!("snapshot already in progress, dropping request");
        return Ok(SnapshotOutcome::Skipped);
    };
    upload_guarded(guard, snapshot, uploader)
}

/// Like [`run_snapshot`], but packs and uploads on a new thread.
///
/// The gate is claimed before spawning, so a second request made right after
/// this returns is already dropped. Returns `None` when the gate was busy.
pub fn spawn_snapshot<U>(
    gate: &SnapshotGate,
    snapshot: Snapshot,
    uploader: U,
) -> Option<JoinHandle<Result<SnapshotOutcome>>>
where
    U: SnapshotUploader + Send + 'static,
{
    let Some(guard) = gate.try_acquire() else {
        warn!("snapshot already in progress, dropping request");
        return None;
    };
    Some(thread::spawn(move || {
        upload_guarded(guard, &snapshot, &uploader)
    }))
}

fn upload_guarded<U>(
    _guard: SnapshotGuard,
    snapshot: &Snapshot,
    uploader: &U,
) -> Result<SnapshotOutcome>
where
    U: SnapshotUploader + ?Sized,
{
    let bundle = snapshot.to_bundle()?;
    if let Err(e) = uploader.upload(&bundle) {
        warn!("snapshot upload failed: {}", e);
        return Err(e);
    }
    info!(
        notes = snapshot.note_count(),
        bytes = bundle.len(),
        "uploaded snapshot"
    );
    Ok(SnapshotOutcome::Uploaded {
        notes: snapshot.note_count(),
        bytes: bundle.len(),
    })
}
