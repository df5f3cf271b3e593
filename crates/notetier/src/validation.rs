//! # Validation Gate and Unit of Work
//!
//! Nothing reaches the transactional store without passing through here. Each
//! queued entity is checked (and where possible repaired) before the batch is
//! applied:
//!
//! | Entity | Rejected | Coerced |
//! |--------|----------|---------|
//! | Note | blank identity, missing timestamps, modified < created | blank title, negative counters |
//! | Container | blank identity, cyclic or runaway parent chain | blank name |
//! | Template | blank identity | blank name |
//!
//! ## Commit Discipline
//!
//! [`UnitOfWork::commit`] is all-or-nothing:
//!
//! 1. Validate every pending insert and update. One failure aborts the commit
//!    before anything is written.
//! 2. Hand the whole batch to [`CommitTarget::apply`], which applies it atomically.
//! 3. On a write failure the batch is rolled back: nothing of it remains pending
//!    or applied.
//!
//! The pending list is empty afterwards in every case.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::folders::{Container, MAX_DEPTH};
use crate::model::{Note, Template};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{kind} has no identity")]
    MissingIdentity { kind: &'static str },

    #[error("note {id} has a blank title")]
    BlankTitle { id: String },

    #[error("note {id} has no {field} timestamp")]
    MissingTimestamp { id: String, field: &'static str },

    #[error("note {id} was modified before it was created")]
    ModifiedBeforeCreated { id: String },

    #[error("container {id} is its own ancestor")]
    CyclicHierarchy { id: String },

    #[error("container {id} is nested too deeply")]
    HierarchyTooDeep { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Note,
    Container,
    Template,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Note(Note),
    Container(Container),
    Template(Template),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Entity::Note(note) => &note.id,
            Entity::Container(container) => &container.id,
            Entity::Template(template) => &template.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Note(_) => EntityKind::Note,
            Entity::Container(_) => EntityKind::Container,
            Entity::Template(_) => EntityKind::Template,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert(Entity),
    Update(Entity),
    Delete { kind: EntityKind, id: String },
}

/// The store a [`UnitOfWork`] commits into.
pub trait CommitTarget {
    /// A committed container, for hierarchy checks.
    fn container(&self, id: &str) -> Option<Container>;

    /// Applies the whole batch or none of it.
    fn apply(&mut self, changes: &[Change]) -> Result<()>;
}

pub fn validate_note(
    note: &mut Note,
    placeholder_title: &str,
) -> std::result::Result<(), ValidationError> {
    if note.id.trim().is_empty() {
        return Err(ValidationError::MissingIdentity { kind: "note" });
    }
    if note.title.trim().is_empty() {
        debug!(note_id = %note.id, "blank title replaced with placeholder");
        note.title = placeholder_title.to_string();
    }
    let created = note.created.ok_or_else(|| ValidationError::MissingTimestamp {
        id: note.id.clone(),
        field: "created",
    })?;
    let modified = note.modified.ok_or_else(|| ValidationError::MissingTimestamp {
        id: note.id.clone(),
        field: "modified",
    })?;
    if modified < created {
        return Err(ValidationError::ModifiedBeforeCreated {
            id: note.id.clone(),
        });
    }
    note.word_count = note.word_count.max(0);
    note.char_count = note.char_count.max(0);
    Ok(())
}

/// Checks `container` and walks its parent chain through `lookup`.
pub fn validate_container<F>(
    container: &mut Container,
    placeholder_folder_name: &str,
    lookup: F,
) -> std::result::Result<(), ValidationError>
where
    F: Fn(&str) -> Option<Container>,
{
    if container.id.trim().is_empty() {
        return Err(ValidationError::MissingIdentity { kind: "container" });
    }
    if container.name.trim().is_empty() {
        container.name = placeholder_folder_name.to_string();
    }

    let mut visited = HashSet::from([container.id.clone()]);
    let mut current = container.parent.clone();
    let mut depth = 0;
    while let Some(parent_id) = current {
        if !visited.insert(parent_id.clone()) {
            return Err(ValidationError::CyclicHierarchy {
                id: container.id.clone(),
            });
        }
        depth += 1;
        if depth > MAX_DEPTH {
            return Err(ValidationError::HierarchyTooDeep {
                id: container.id.clone(),
            });
        }
        current = lookup(&parent_id).and_then(|parent| parent.parent);
    }
    Ok(())
}

pub fn validate_template(
    template: &mut Template,
    placeholder_title: &str,
) -> std::result::Result<(), ValidationError> {
    if template.id.trim().is_empty() {
        return Err(ValidationError::MissingIdentity { kind: "template" });
    }
    if template.name.trim().is_empty() {
        template.name = placeholder_title.to_string();
    }
    Ok(())
}

/// Pending changes awaiting an all-or-nothing commit.
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    pending: Vec<Change>,
    placeholder_title: String,
    placeholder_folder_name: String,
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl UnitOfWork {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            pending: Vec::new(),
            placeholder_title: config.placeholder_title.clone(),
            placeholder_folder_name: config.placeholder_folder_name.clone(),
        }
    }

    pub fn insert(&mut self, entity: Entity) {
        self.pending.push(Change::Insert(entity));
    }

    pub fn update(&mut self, entity: Entity) {
        self.pending.push(Change::Update(entity));
    }

    pub fn delete(&mut self, kind: EntityKind, id: impl Into<String>) {
        self.pending.push(Change::Delete {
            kind,
            id: id.into(),
        });
    }

    pub fn pending(&self) -> &[Change] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops every pending change.
    pub fn rollback(&mut self) {
        if !self.pending.is_empty() {
            debug!(changes = self.pending.len(), "rolled back unit of work");
        }
        self.pending.clear();
    }

    /// Validates then applies every pending change. Returns the number applied.
    pub fn commit<T: CommitTarget + ?Sized>(&mut self, target: &mut T) -> Result<usize> {
        let mut changes = std::mem::take(&mut self.pending);
        let total = changes.len();

        let pending_containers: HashMap<String, Container> = changes
            .iter()
            .filter_map(|change| match change {
                Change::Insert(Entity::Container(c)) | Change::Update(Entity::Container(c)) => {
                    Some((c.id.clone(), c.clone()))
                }
                _ => None,
            })
            .collect();

        for change in changes.iter_mut() {
            let entity = match change {
                Change::Insert(entity) | Change::Update(entity) => entity,
                Change::Delete { .. } => continue,
            };
            let checked = match entity {
                Entity::Note(note) => validate_note(note, &self.placeholder_title),
                Entity::Container(container) => {
                    validate_container(container, &self.placeholder_folder_name, |id| {
                        pending_containers
                            .get(id)
                            .cloned()
                            .or_else(|| target.container(id))
                    })
                }
                Entity::Template(template) => validate_template(template, &self.placeholder_title),
            };
            if let Err(e) = checked {
                warn!(changes = total, "commit aborted by validation: {}", e);
                return Err(e.into());
            }
        }

        if let Err(e) = target.apply(&changes) {
            warn!(changes = total, "commit failed, rolled back: {}", e);
            return Err(e);
        }
        debug!(changes = total, "committed unit of work");
        Ok(total)
    }
}
