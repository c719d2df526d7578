/// Batch processing of several folders.
///
/// A [`BatchList`] is the persisted list of folders, each with optional
/// per-folder settings. [`run_batch`] organizes them one after another on the
/// caller's thread; a failing folder is marked and the batch moves on.
use crate::organizer::{Organizer, RunObserver, RunOptions, RunStats};
use crate::store::{StoreError, StoreResult, read_json, write_json};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// Per-folder run switches. Missing keys default to off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderSettings {
    pub recursive: bool,
    pub date_sort: bool,
    #[serde(alias = "del_empty")]
    pub delete_empty_dirs: bool,
    pub dry_run: bool,
    pub use_content_classification: bool,
    pub rollback_on_error: bool,
}

impl FolderSettings {
    /// Short label for listings, e.g. `Rec,Date`.
    pub fn summary(&self) -> String {
        let flags = [
            (self.recursive, "Rec"),
            (self.date_sort, "Date"),
            (self.delete_empty_dirs, "Del"),
            (self.dry_run, "Dry"),
            (self.use_content_classification, "Content"),
            (self.rollback_on_error, "Rollback"),
        ];
        let parts: Vec<_> = flags
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, label)| *label)
            .collect();
        if parts.is_empty() {
            "Custom".to_string()
        } else {
            parts.join(",")
        }
    }
}

impl From<FolderSettings> for RunOptions {
    fn from(settings: FolderSettings) -> Self {
        RunOptions {
            recursive: settings.recursive,
            date_sort: settings.date_sort,
            delete_empty_dirs: settings.delete_empty_dirs,
            dry_run: settings.dry_run,
            use_content_classification: settings.use_content_classification,
            rollback_on_error: settings.rollback_on_error,
        }
    }
}

/// Processing state of one batch entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BatchStatus {
    #[default]
    Pending,
    Running,
    Done,
    NotFound,
    Error(String),
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Pending => write!(f, "Pending"),
            BatchStatus::Running => write!(f, "Running"),
            BatchStatus::Done => write!(f, "Done"),
            BatchStatus::NotFound => write!(f, "Not Found"),
            BatchStatus::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

/// One folder in the batch list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub path: PathBuf,
    /// `None` means "use the defaults".
    #[serde(default)]
    pub settings: Option<FolderSettings>,
    #[serde(skip)]
    pub status: BatchStatus,
}

impl BatchEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            settings: None,
            status: BatchStatus::Pending,
        }
    }

    pub fn with_settings(mut self, settings: FolderSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// The entry's settings merged over the defaults.
    pub fn run_options(&self) -> RunOptions {
        self.settings.unwrap_or_default().into()
    }

    pub fn settings_label(&self) -> String {
        match &self.settings {
            Some(settings) => settings.summary(),
            None => "Default".to_string(),
        }
    }
}

/// On-disk entry shape; older files stored bare path strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Legacy(PathBuf),
    Current(BatchEntry),
}

impl From<StoredEntry> for BatchEntry {
    fn from(stored: StoredEntry) -> Self {
        match stored {
            StoredEntry::Legacy(path) => BatchEntry::new(path),
            StoredEntry::Current(entry) => entry,
        }
    }
}

/// The persisted list of batch folders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchList {
    entries: Vec<BatchEntry>,
}

impl BatchList {
    /// Loads the list; a missing file is an empty list.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let stored: Option<Vec<StoredEntry>> = read_json(path)?;
        Ok(Self {
            entries: stored
                .unwrap_or_default()
                .into_iter()
                .map(BatchEntry::from)
                .collect(),
        })
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        write_json(path, &self.entries)
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [BatchEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a folder. Returns false if it is already listed.
    pub fn add(&mut self, entry: BatchEntry) -> bool {
        if self.entries.iter().any(|e| e.path == entry.path) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Removes a folder. Returns false if it was not listed.
    pub fn remove(&mut self, path: &Path) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.path != path);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replaces a folder's settings. Returns an error if it is not listed.
    pub fn set_settings(
        &mut self,
        path: &Path,
        settings: Option<FolderSettings>,
    ) -> StoreResult<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.path == path)
            .ok_or_else(|| StoreError::UnknownEntry(path.to_path_buf()))?;
        entry.settings = settings;
        Ok(())
    }
}

/// Receives batch-level notifications on top of the per-run callbacks.
pub trait BatchObserver: RunObserver {
    /// Called when an entry starts and again when it reaches its final
    /// status; `fraction` is the share of entries completed.
    fn entry_status(&mut self, _index: usize, _entry: &BatchEntry, _fraction: f32) {}

    /// Called once after the last entry.
    fn batch_finished(&mut self, _report: &BatchReport) {}
}

impl BatchObserver for crate::organizer::RecordingObserver {}

impl BatchObserver for crate::organizer::SilentObserver {}

/// What happened to one folder.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub path: PathBuf,
    pub status: BatchStatus,
    /// Present when the engine ran.
    pub stats: Option<RunStats>,
}

/// Result of a whole batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    pub fn total_moved(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| o.stats.as_ref())
            .map(|s| s.moved)
            .sum()
    }

    pub fn count(&self, status: &BatchStatus) -> usize {
        self.outcomes.iter().filter(|o| &o.status == status).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, BatchStatus::Error(_) | BatchStatus::NotFound))
            .count()
    }
}

/// Organizes every entry in order, updating each entry's status.
///
/// Each folder's run goes onto the organizer's undo stack like any other run,
/// so undo reverts the most recently processed folder.
pub fn run_batch<O: BatchObserver>(
    organizer: &mut Organizer,
    entries: &mut [BatchEntry],
    observer: &mut O,
) -> BatchReport {
    let total = entries.len();
    let mut report = BatchReport::default();

    for (index, entry) in entries.iter_mut().enumerate() {
        let stats = if !entry.path.is_dir() {
            entry.status = BatchStatus::NotFound;
            observer.log(&format!("Skipping {}: folder not found", entry.path.display()));
            None
        } else {
            entry.status = BatchStatus::Running;
            observer.entry_status(index, entry, index as f32 / total as f32);
            observer.log(&format!(
                "=== Batch {}/{}: {} ===",
                index + 1,
                total,
                entry.path.display()
            ));

            let options = entry.run_options();
            let path = entry.path.clone();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                organizer.organize(&path, &options, &mut *observer)
            }));

            match outcome {
                Ok(stats) => {
                    entry.status = match &stats.failure {
                        Some(reason) => BatchStatus::Error(reason.clone()),
                        None => BatchStatus::Done,
                    };
                    Some(stats)
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!("batch entry {} aborted: {}", entry.path.display(), message);
                    entry.status = BatchStatus::Error(message);
                    None
                }
            }
        };

        report.outcomes.push(BatchOutcome {
            path: entry.path.clone(),
            status: entry.status.clone(),
            stats,
        });
        observer.entry_status(index, entry, (index + 1) as f32 / total as f32);
    }

    observer.batch_finished(&report);
    report
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unexpected failure".to_string()
    }
}
