/// Undo functionality for reverting organization runs.
///
/// Every non-dry run that moved at least one file leaves a [`RunHistory`] on
/// a bounded [`UndoStack`]. Undoing pops the most recent run, moves its files
/// back in reverse order, and prunes the now-empty folders the run created,
/// never touching the run's root.
use crate::organizer::RunObserver;
use crate::planner::{self, display_relative};
use crate::store::{StoreResult, read_json, write_json};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

/// Number of runs kept when no capacity is given.
pub const DEFAULT_UNDO_CAPACITY: usize = 5;

/// One completed move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    destination: PathBuf,
    original: PathBuf,
}

impl MoveRecord {
    pub fn new(destination: PathBuf, original: PathBuf) -> Self {
        Self {
            destination,
            original,
        }
    }

    /// Where the file was moved to.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Where the file came from.
    pub fn original(&self) -> &Path {
        &self.original
    }
}

/// All moves performed by one organize run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    /// ISO 8601 timestamp of when the run started.
    pub started_at: String,
    pub source_root: PathBuf,
    records: Vec<MoveRecord>,
}

impl RunHistory {
    pub fn new(source_root: PathBuf) -> Self {
        Self {
            started_at: chrono::Local::now().to_rfc3339(),
            source_root,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: MoveRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[MoveRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outcome of undoing one run.
#[derive(Debug, Default)]
pub struct UndoReport {
    /// Number of files moved back.
    pub restored_files: usize,
    /// Files that could not be restored, with the reason.
    pub failed_restores: Vec<(PathBuf, String)>,
    /// Files restored next to an occupied original path, as `(original, used)`.
    pub renamed_restores: Vec<(PathBuf, PathBuf)>,
    /// Empty folders removed after restoring.
    pub removed_dirs: usize,
}

impl UndoReport {
    /// Returns true if every file was restored.
    pub fn is_complete_success(&self) -> bool {
        self.failed_restores.is_empty()
    }
}

/// Bounded LIFO of completed runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoStack {
    capacity: usize,
    runs: VecDeque<RunHistory>,
}

impl UndoStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            runs: VecDeque::new(),
        }
    }

    /// Pushes a run, evicting the oldest one when over capacity.
    pub fn push(&mut self, history: RunHistory) {
        self.runs.push_back(history);
        while self.runs.len() > self.capacity {
            self.runs.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The run `undo_last` would revert.
    pub fn peek(&self) -> Option<&RunHistory> {
        self.runs.back()
    }

    /// Reverts the most recent run.
    ///
    /// Undo is best-effort per file: a missing destination or a failed move is
    /// reported and the remaining records are still processed.
    pub fn undo_last(&mut self, observer: &mut dyn RunObserver) -> UndoReport {
        match self.runs.pop_back() {
            Some(history) => Self::revert(history, observer),
            None => {
                observer.log("Nothing to undo.");
                UndoReport::default()
            }
        }
    }

    /// Reverts `history` without touching any stack.
    ///
    /// Used for rollback of a run that was never pushed, so a full stack does
    /// not lose its oldest entry.
    pub fn revert(history: RunHistory, observer: &mut dyn RunObserver) -> UndoReport {
        observer.log("--- Undoing Changes ---");
        let root = history.source_root.as_path();
        let mut report = UndoReport::default();
        let mut touched_dirs = BTreeSet::new();

        for record in history.records.iter().rev() {
            match restore(record) {
                Ok(used) => {
                    report.restored_files += 1;
                    if let Some(parent) = record.destination.parent() {
                        touched_dirs.insert(parent.to_path_buf());
                    }
                    if used != record.original {
                        observer.log(&format!(
                            "Restored as {} (original name was taken)",
                            display_relative(&used, root)
                        ));
                        report.renamed_restores.push((record.original.clone(), used));
                    }
                }
                Err(reason) => {
                    let name = record
                        .destination
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    observer.log(&format!("Failed to undo {}: {}", name, reason));
                    report
                        .failed_restores
                        .push((record.destination.clone(), reason));
                }
            }
        }

        report.removed_dirs = prune_empty_parents(touched_dirs, root);
        if report.removed_dirs > 0 {
            observer.log(&format!(
                "Cleaned up {} empty folders during undo.",
                report.removed_dirs
            ));
        }

        observer.log(&format!(
            "--- Undo Complete. Restored {} files. ---",
            report.restored_files
        ));
        report
    }

    /// Loads a persisted stack, or an empty one if the file does not exist.
    pub fn load(path: &Path, capacity: usize) -> StoreResult<Self> {
        let mut stack = read_json::<Self>(path)?.unwrap_or_else(|| Self::new(capacity));
        stack.capacity = capacity.max(1);
        while stack.runs.len() > stack.capacity {
            stack.runs.pop_front();
        }
        Ok(stack)
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        write_json(path, self)
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_CAPACITY)
    }
}

/// Moves one file back. Returns the path it was restored to.
fn restore(record: &MoveRecord) -> Result<PathBuf, String> {
    if fs::symlink_metadata(&record.destination).is_err() {
        return Err("file not found at expected location".to_string());
    }

    if let Some(parent) = record.original.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("could not recreate {}: {}", parent.display(), e))?;
    }

    planner::move_no_clobber(&record.destination, &record.original)
        .map_err(|e| format!("failed to restore file: {}", e))
}

/// Removes each directory in `dirs` and its ancestors while they are empty,
/// stopping below `root`. Deepest directories go first.
fn prune_empty_parents(dirs: BTreeSet<PathBuf>, root: &Path) -> usize {
    let mut ordered: Vec<_> = dirs.into_iter().collect();
    ordered.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

    let mut removed = 0;
    for dir in ordered {
        let mut current = dir.as_path();
        while current != root && current.starts_with(root) {
            let is_empty = match fs::read_dir(current) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => false,
            };
            if !is_empty {
                break;
            }
            if let Err(e) = fs::remove_dir(current) {
                tracing::warn!("could not remove {}: {}", current.display(), e);
                break;
            }
            removed += 1;
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }
    removed
}
