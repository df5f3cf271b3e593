//! # Folder Paths From Containers
//!
//! Notes belong to at most one container; containers nest. A file-backed note is
//! placed in a folder mirroring its container chain:
//!
//! ```text
//! Work (root)
//! └── Projects
//!     └── Q3          -> "Work/Projects/Q3"
//! ```
//!
//! Containers with a blank name are handled by a [`BlankNamePolicy`]. Migration
//! and restore-from-trash use different policies (see
//! [`EngineConfig`](crate::config::EngineConfig)), so both stay distinct here.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::sanitize_filename;

/// Upper bound on hierarchy walks. Deeper chains are treated as corrupt.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub position: i64,
}

impl Container {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent: None,
            position: 0,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlankNamePolicy {
    /// Blank containers contribute no path segment.
    SkipBlank,
    /// Blank containers contribute the placeholder folder name.
    PlaceholderBlank,
}

impl FromStr for BlankNamePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "skip_blank" => Ok(BlankNamePolicy::SkipBlank),
            "placeholder_blank" => Ok(BlankNamePolicy::PlaceholderBlank),
            other => Err(format!("unknown folder policy: {}", other)),
        }
    }
}

/// Source of a container's ancestor chain.
pub trait ContainerHierarchy {
    /// The chain from `container_id` itself up to its root, leaf first.
    /// Unknown identities yield an empty chain.
    fn ancestors(&self, container_id: &str) -> Vec<Container>;
}

/// Joins a leaf-to-root chain into a root-first relative folder path.
///
/// Returns `None` when nothing remains, meaning the store root.
pub fn folder_path(
    chain: &[Container],
    policy: BlankNamePolicy,
    placeholder: &str,
) -> Option<String> {
    let segments: Vec<String> = chain
        .iter()
        .rev()
        .filter_map(|container| {
            if !container.name.trim().is_empty() {
                Some(folder_segment(&container.name))
            } else {
                match policy {
                    BlankNamePolicy::SkipBlank => None,
                    BlankNamePolicy::PlaceholderBlank => Some(folder_segment(placeholder)),
                }
            }
        })
        .collect();

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// A sanitized folder name. A leading `.` becomes `-`, so no container can
/// land a live note in the trash folder or another hidden folder.
fn folder_segment(name: &str) -> String {
    let sanitized = sanitize_filename(name);
    match sanitized.strip_prefix('.') {
        Some(rest) => format!("-{}", rest),
        None => sanitized,
    }
}

/// Folder for the note in `container_id`, or `None` for the root.
pub fn folder_for<H: ContainerHierarchy + ?Sized>(
    hierarchy: &H,
    container_id: Option<&str>,
    policy: BlankNamePolicy,
    placeholder: &str,
) -> Option<String> {
    let chain = hierarchy.ancestors(container_id?);
    folder_path(&chain, policy, placeholder)
}

/// Containers keyed by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerTree {
    containers: HashMap<String, Container>,
}

impl ContainerTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, container: Container) -> Option<Container> {
        self.containers.insert(container.id.clone(), container)
    }

    pub fn remove(&mut self, id: &str) -> Option<Container> {
        self.containers.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Container> {
        self.containers.get(id)
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Container> {
        self.containers.values()
    }
}

impl FromIterator<Container> for ContainerTree {
    fn from_iter<T: IntoIterator<Item = Container>>(iter: T) -> Self {
        let mut tree = ContainerTree::new();
        for container in iter {
            tree.insert(container);
        }
        tree
    }
}

impl ContainerHierarchy for ContainerTree {
    fn ancestors(&self, container_id: &str) -> Vec<Container> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(container_id.to_string());

        while let Some(id) = current {
            if !visited.insert(id.clone()) || chain.len() >= MAX_DEPTH {
                warn!(container_id, "container hierarchy has a cycle, truncating path");
                break;
            }
            let Some(container) = self.containers.get(&id) else {
                break;
            };
            current = container.parent.clone();
            chain.push(container.clone());
        }
        chain
    }
}
