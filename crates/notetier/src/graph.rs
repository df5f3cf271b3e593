//! # Note Graph
//!
//! The in-memory transactional store that owns notes, containers and templates.
//! It is the [`CommitTarget`] for [`UnitOfWork`](crate::validation::UnitOfWork)
//! and the source of the container hierarchy used for folder paths.
//!
//! ## Revisions
//!
//! Every stored note carries a revision number, bumped on each save. A save names
//! the revision it was based on; if someone else saved in between, it fails with
//! [`NoteError::Conflict`] and the caller refreshes and retries (see
//! [`SharedGraph::edit_note`]).
//!
//! ## Foreground and Background
//!
//! One graph is owned by the foreground. Background work runs on a [`fork`]
//! and is folded back with [`merge_from`]:
//!
//! - changed only in the fork: taken
//! - changed on both sides: the foreground wins and a conflict is counted
//! - added in the fork: taken
//!
//! Notes are compared by revision. Containers and templates carry no revision,
//! so they are compared with their fork-time copies. A container deleted in the
//! fork is removed only if the foreground left it untouched. Note deletions are
//! not propagated.
//!
//! [`fork`]: NoteGraph::fork
//! [`merge_from`]: NoteGraph::merge_from

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{NoteError, Result};
use crate::folders::{Container, ContainerTree};
use crate::model::{Note, Template};
use crate::retry::{with_conflict_retry, RetryPolicy};
use crate::validation::{Change, CommitTarget, Entity, EntityKind};

#[derive(Debug, Clone, PartialEq)]
struct StoredNote {
    note: Note,
    revision: u64,
}

/// What a fork started from.
#[derive(Debug, Clone, Default)]
struct ForkBase {
    revisions: HashMap<String, u64>,
    containers: ContainerTree,
    templates: HashMap<String, Template>,
}

#[derive(Debug, Clone, Default)]
pub struct NoteGraph {
    notes: HashMap<String, StoredNote>,
    containers: ContainerTree,
    templates: HashMap<String, Template>,
    /// `None` for a foreground graph.
    fork_base: Option<ForkBase>,
    simulate_commit_failure: bool,
}

/// Report from [`NoteGraph::merge_from`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub taken: usize,
    pub conflicts: usize,
    pub containers_taken: usize,
    pub templates_taken: usize,
}

impl NoteGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following [`CommitTarget::apply`] fail.
    pub fn set_simulate_commit_failure(&mut self, simulate: bool) {
        self.simulate_commit_failure = simulate;
    }

    pub fn fetch_note(&self, id: &str) -> Option<(Note, u64)> {
        self.notes
            .get(id)
            .map(|stored| (stored.note.clone(), stored.revision))
    }

    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.get(id).map(|stored| &stored.note)
    }

    pub fn revision(&self, id: &str) -> Option<u64> {
        self.notes.get(id).map(|stored| stored.revision)
    }

    /// All notes, in no particular order.
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.values().map(|stored| &stored.note)
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    pub fn containers(&self) -> &ContainerTree {
        &self.containers
    }

    pub fn template(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn save_container(&mut self, container: Container) {
        self.containers.insert(container);
    }

    pub fn save_template(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }

    /// Stores `note` if nobody saved it since `base_revision` (0 for a new note).
    /// Returns the new revision.
    pub fn save_note(&mut self, note: Note, base_revision: u64) -> Result<u64> {
        let current = self.revision(&note.id).unwrap_or(0);
        if current != base_revision {
            debug!(note_id = %note.id, current, base_revision, "revision mismatch");
            return Err(NoteError::Conflict(note.id));
        }
        let revision = current + 1;
        self.notes
            .insert(note.id.clone(), StoredNote { note, revision });
        Ok(revision)
    }

    /// An isolated copy for background work.
    pub fn fork(&self) -> NoteGraph {
        let base = ForkBase {
            revisions: self
                .notes
                .iter()
                .map(|(id, stored)| (id.clone(), stored.revision))
                .collect(),
            containers: self.containers.clone(),
            templates: self.templates.clone(),
        };
        NoteGraph {
            notes: self.notes.clone(),
            containers: self.containers.clone(),
            templates: self.templates.clone(),
            fork_base: Some(base),
            simulate_commit_failure: false,
        }
    }

    /// Folds a fork's changes back into this graph.
    pub fn merge_from(&mut self, fork: NoteGraph) -> MergeReport {
        let mut report = MergeReport::default();
        let base = fork.fork_base.unwrap_or_default();

        for (id, stored) in fork.notes {
            let base_revision = base.revisions.get(&id).copied();
            if base_revision == Some(stored.revision) {
                continue;
            }
            let current = self.revision(&id);
            if current.is_some() && current != base_revision {
                warn!(note_id = %id, "note changed in foreground and background, keeping foreground");
                report.conflicts += 1;
                continue;
            }
            let revision = current.unwrap_or(0) + 1;
            self.notes.insert(
                id,
                StoredNote {
                    note: stored.note,
                    revision,
                },
            );
            report.taken += 1;
        }

        for container in fork.containers.iter() {
            let at_fork = base.containers.get(&container.id);
            match merge_side(at_fork, self.containers.get(&container.id), container) {
                MergeSide::Unchanged => {}
                MergeSide::Conflict => {
                    warn!(container_id = %container.id, "container changed in foreground and background, keeping foreground");
                    report.conflicts += 1;
                }
                MergeSide::TakeFork => {
                    self.containers.insert(container.clone());
                    report.containers_taken += 1;
                }
            }
        }

        for removed in base.containers.iter() {
            if fork.containers.get(&removed.id).is_none()
                && self.containers.get(&removed.id) == Some(removed)
            {
                self.containers.remove(&removed.id);
                report.containers_taken += 1;
            }
        }

        for (id, template) in &fork.templates {
            match merge_side(base.templates.get(id), self.templates.get(id), template) {
                MergeSide::Unchanged => {}
                MergeSide::Conflict => {
                    warn!(template_id = %id, "template changed in foreground and background, keeping foreground");
                    report.conflicts += 1;
                }
                MergeSide::TakeFork => {
                    self.templates.insert(id.clone(), template.clone());
                    report.templates_taken += 1;
                }
            }
        }

        info!(
            taken = report.taken,
            containers = report.containers_taken,
            templates = report.templates_taken,
            conflicts = report.conflicts,
            "merged background changes"
        );
        report
    }

    fn apply_change(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::Insert(entity) => {
                if self.contains(entity.kind(), entity.id()) {
                    return Err(NoteError::Commit(format!(
                        "{} already exists",
                        entity.id()
                    )));
                }
                self.put(entity.clone());
            }
            Change::Update(entity) => self.put(entity.clone()),
            Change::Delete { kind, id } => match kind {
                EntityKind::Note => {
                    self.notes.remove(id);
                }
                EntityKind::Container => {
                    self.containers.remove(id);
                }
                EntityKind::Template => {
                    self.templates.remove(id);
                }
            },
        }
        Ok(())
    }

    fn contains(&self, kind: EntityKind, id: &str) -> bool {
        match kind {
            EntityKind::Note => self.notes.contains_key(id),
            EntityKind::Container => self.containers.get(id).is_some(),
            EntityKind::Template => self.templates.contains_key(id),
        }
    }

    fn put(&mut self, entity: Entity) {
        match entity {
            Entity::Note(note) => {
                let revision = self.revision(&note.id).unwrap_or(0) + 1;
                self.notes
                    .insert(note.id.clone(), StoredNote { note, revision });
            }
            Entity::Container(container) => {
                self.containers.insert(container);
            }
            Entity::Template(template) => {
                self.templates.insert(template.id.clone(), template);
            }
        }
    }
}

enum MergeSide {
    Unchanged,
    TakeFork,
    Conflict,
}

/// Three-way decision for an entity without revisions.
fn merge_side<T: PartialEq>(at_fork: Option<&T>, foreground: Option<&T>, fork: &T) -> MergeSide {
    if at_fork == Some(fork) || foreground == Some(fork) {
        MergeSide::Unchanged
    } else if foreground == at_fork {
        MergeSide::TakeFork
    } else {
        MergeSide::Conflict
    }
}

impl CommitTarget for NoteGraph {
    fn container(&self, id: &str) -> Option<Container> {
        self.containers.get(id).cloned()
    }

    fn apply(&mut self, changes: &[Change]) -> Result<()> {
        if self.simulate_commit_failure {
            return Err(NoteError::Commit("Simulated write error".to_string()));
        }
        let mut next = self.clone();
        for change in changes {
            next.apply_change(change)?;
        }
        *self = next;
        Ok(())
    }
}

/// A [`NoteGraph`] shared between threads.
#[derive(Debug, Clone, Default)]
pub struct SharedGraph {
    inner: Arc<Mutex<NoteGraph>>,
}

impl SharedGraph {
    pub fn new(graph: NoteGraph) -> Self {
        Self {
            inner: Arc::new(Mutex::new(graph)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NoteGraph> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` with the graph locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut NoteGraph) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn fetch_note(&self, id: &str) -> Option<(Note, u64)> {
        self.lock().fetch_note(id)
    }

    pub fn save_note(&self, note: Note, base_revision: u64) -> Result<u64> {
        self.lock().save_note(note, base_revision)
    }

    /// Applies `edit` to the latest version of note `id` and saves it.
    ///
    /// The edit runs without holding the lock. A save that conflicts is retried
    /// from a fresh fetch under `policy`; `Ok(None)` means every attempt
    /// conflicted and the edit was abandoned.
    pub fn edit_note<P, F>(&self, id: &str, policy: &P, mut edit: F) -> Result<Option<Note>>
    where
        P: RetryPolicy + ?Sized,
        F: FnMut(&mut Note),
    {
        with_conflict_retry(policy, |_attempt| {
            let (mut note, revision) = self
                .fetch_note(id)
                .ok_or_else(|| NoteError::Store(format!("note {} does not exist", id)))?;
            edit(&mut note);
            self.save_note(note.clone(), revision)?;
            Ok(note)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Immediate;
    use crate::validation::UnitOfWork;
    use std::cell::Cell;

    fn graph_with(notes: &[&Note]) -> NoteGraph {
        let mut graph = NoteGraph::new();
        for note in notes {
            graph.save_note((*note).clone(), 0).unwrap();
        }
        graph
    }

    // --- Revisions ---

    #[test]
    fn test_save_bumps_revision_and_detects_conflicts() {
        let note = Note::new("A", "");
        let mut graph = graph_with(&[&note]);
        assert_eq!(graph.revision(&note.id), Some(1));

        assert_eq!(graph.save_note(note.clone(), 1).unwrap(), 2);
        let stale = graph.save_note(note.clone(), 1);
        assert!(matches!(stale, Err(NoteError::Conflict(_))));
    }

    #[test]
    fn test_edit_note_retries_after_concurrent_save() {
        let note = Note::new("Shared", "");
        let shared = SharedGraph::new(graph_with(&[&note]));
        let interfering = Cell::new(2);

        let edited = shared
            .edit_note(&note.id, &Immediate(3), |n| {
                if interfering.get() > 0 {
                    interfering.set(interfering.get() - 1);
                    let (other, rev) = shared.fetch_note(&n.id).unwrap();
                    shared.save_note(other, rev).unwrap();
                }
                n.status = "done".to_string();
            })
            .unwrap();

        assert_eq!(edited.unwrap().status, "done");
        assert_eq!(shared.fetch_note(&note.id).unwrap().0.status, "done");
    }

    #[test]
    fn test_edit_note_gives_up_after_budget() {
        let note = Note::new("Contended", "");
        let shared = SharedGraph::new(graph_with(&[&note]));

        let edited = shared
            .edit_note(&note.id, &Immediate(3), |n| {
                let (other, rev) = shared.fetch_note(&n.id).unwrap();
                shared.save_note(other, rev).unwrap();
                n.status = "never".to_string();
            })
            .unwrap();

        assert!(edited.is_none());
        assert_eq!(shared.fetch_note(&note.id).unwrap().0.status, "");
    }

    // --- Fork / merge ---

    #[test]
    fn test_merge_takes_background_only_changes() {
        let a = Note::new("A", "");
        let b = Note::new("B", "");
        let mut foreground = graph_with(&[&a, &b]);
        let mut background = foreground.fork();

        let (mut bg_a, rev) = background.fetch_note(&a.id).unwrap();
        bg_a.status = "background".to_string();
        background.save_note(bg_a, rev).unwrap();
        let fresh = Note::new("C", "");
        background.save_note(fresh.clone(), 0).unwrap();

        let report = foreground.merge_from(background);
        assert_eq!(report.taken, 2);
        assert_eq!(report.conflicts, 0);
        assert_eq!(foreground.note(&a.id).unwrap().status, "background");
        assert!(foreground.note(&fresh.id).is_some());
    }

    #[test]
    fn test_merge_keeps_foreground_on_conflict() {
        let a = Note::new("A", "");
        let mut foreground = graph_with(&[&a]);
        let mut background = foreground.fork();

        let (mut bg, rev) = background.fetch_note(&a.id).unwrap();
        bg.status = "background".to_string();
        background.save_note(bg, rev).unwrap();

        let (mut fg, rev) = foreground.fetch_note(&a.id).unwrap();
        fg.status = "foreground".to_string();
        foreground.save_note(fg, rev).unwrap();

        let report = foreground.merge_from(background);
        assert_eq!(report.conflicts, 1);
        assert_eq!(foreground.note(&a.id).unwrap().status, "foreground");
    }

    #[test]
    fn test_merge_takes_background_container_rename_and_reparent() {
        let mut foreground = NoteGraph::new();
        foreground.save_container(Container::new("home", "Home"));
        foreground.save_container(Container::new("recipes", "Recipes"));
        let mut background = foreground.fork();

        background.save_container(Container::new("recipes", "Cooking").with_parent("home"));
        background.save_template(Template {
            id: "t1".to_string(),
            name: "Daily".to_string(),
            body: String::new(),
        });

        let report = foreground.merge_from(background);
        assert_eq!(report.containers_taken, 1);
        assert_eq!(report.templates_taken, 1);
        let recipes = foreground.containers().get("recipes").unwrap();
        assert_eq!(recipes.name, "Cooking");
        assert_eq!(recipes.parent.as_deref(), Some("home"));
        assert_eq!(foreground.template("t1").unwrap().name, "Daily");
    }

    #[test]
    fn test_merge_removes_container_deleted_in_background() {
        let mut foreground = NoteGraph::new();
        foreground.save_container(Container::new("old", "Old"));
        let mut background = foreground.fork();
        background.containers.remove("old");

        let report = foreground.merge_from(background);
        assert_eq!(report.containers_taken, 1);
        assert!(foreground.containers().get("old").is_none());
    }

    #[test]
    fn test_merge_keeps_foreground_container_on_conflict() {
        let mut foreground = NoteGraph::new();
        foreground.save_container(Container::new("c", "Inbox"));
        let mut background = foreground.fork();

        background.save_container(Container::new("c", "Background"));
        foreground.save_container(Container::new("c", "Foreground"));

        let report = foreground.merge_from(background);
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.containers_taken, 0);
        assert_eq!(foreground.containers().get("c").unwrap().name, "Foreground");
    }

    // --- Commit target ---

    #[test]
    fn test_unit_of_work_commits_into_graph() {
        let mut graph = NoteGraph::new();
        let mut uow = UnitOfWork::default();
        let note = Note::new("Committed", "");
        uow.insert(Entity::Container(Container::new("c", "Inbox")));
        uow.insert(Entity::Note(note.clone()));

        uow.commit(&mut graph).unwrap();
        assert_eq!(graph.note_count(), 1);
        assert_eq!(graph.containers().get("c").unwrap().name, "Inbox");
    }

    #[test]
    fn test_failed_apply_leaves_graph_untouched() {
        let existing = Note::new("Existing", "");
        let mut graph = graph_with(&[&existing]);
        let mut uow = UnitOfWork::default();
        uow.insert(Entity::Container(Container::new("c", "Inbox")));
        uow.insert(Entity::Note(existing.clone()));

        let result = uow.commit(&mut graph);
        assert!(matches!(result, Err(NoteError::Commit(_))));
        assert!(graph.containers().is_empty());
        assert_eq!(graph.revision(&existing.id), Some(1));
    }

    #[test]
    fn test_simulated_commit_failure() {
        let mut graph = NoteGraph::new();
        graph.set_simulate_commit_failure(true);
        let mut uow = UnitOfWork::default();
        uow.insert(Entity::Note(Note::new("X", "")));

        assert!(uow.commit(&mut graph).is_err());
        assert_eq!(graph.note_count(), 0);
        assert!(uow.is_empty());
    }
}
