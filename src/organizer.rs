/// The organize engine.
///
/// [`Organizer::organize`] drives one run: scan the root, resolve each file's
/// category, plan its destination and move it, recording every move so the
/// run can be undone. Progress, log lines and cancellation go through a
/// caller-supplied [`RunObserver`].
use crate::category::{CategoryResolver, CategoryTable, ClassificationMethod};
use crate::classifier::ContentClassifier;
use crate::planner::{self, MovePlanner, display_relative};
use crate::scanner::{ExclusionSet, Scanner};
use crate::undo::{MoveRecord, RunHistory, UndoReport, UndoStack};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Default confidence a content result must exceed.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;

/// Errors that can occur while organizing a single file, or while acquiring
/// the organizer.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// Failed to create a category directory.
    #[error("Failed to create directory {}: {source}", .path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to move a file to its category directory.
    #[error("Failed to move {} to {}: {source}", .file.display(), .destination.display())]
    FileMoveFailure {
        file: PathBuf,
        destination: PathBuf,
        source: std::io::Error,
    },
    /// The destination for a file could not be computed.
    #[error("Cannot plan a destination for {}: {source}", .path.display())]
    PlanFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Another organize, undo or batch operation is in flight.
    #[error("Another operation is already running")]
    Busy,
}

/// Result type for organizer operations.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

/// Progress notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// Per-file progress; `current` is 1-based.
    Files {
        current: usize,
        total: usize,
        file_name: String,
    },
    /// Progress through a setup phase such as loading classifier models.
    Phase { fraction: f32, label: String },
}

/// Receives progress and log lines from a run and decides when to stop.
///
/// All methods have no-op defaults.
pub trait RunObserver {
    fn progress(&mut self, _progress: Progress) {}

    fn log(&mut self, _message: &str) {}

    /// Polled once per file, before the file is touched.
    fn should_stop(&self) -> bool {
        false
    }
}

/// Observer that ignores everything.
pub struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Observer that keeps every notification, for inspection after the run.
///
/// Useful when embedding the engine without a live UI: run headless, then
/// read `logs` for the user-facing lines. `stop_after` simulates a stop
/// request after the given number of files.
///
/// ```
/// use tidybox::{CategoryTable, ExclusionSet, Organizer, RecordingObserver, RunOptions};
///
/// let dir = std::env::temp_dir().join("tidybox-recording-doc");
/// std::fs::create_dir_all(&dir).unwrap();
/// let mut organizer = Organizer::new(CategoryTable::default(), ExclusionSet::default());
/// let mut observer = RecordingObserver::default();
/// let options = RunOptions { dry_run: true, ..Default::default() };
/// organizer.organize(&dir, &options, &mut observer);
/// assert!(observer.logs.last().unwrap().starts_with("--- Done. Would move"));
/// ```
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub logs: Vec<String>,
    pub progress: Vec<Progress>,
    /// Requests a stop once this many files have been reported.
    pub stop_after: Option<usize>,
}

impl RunObserver for RecordingObserver {
    fn progress(&mut self, progress: Progress) {
        self.progress.push(progress);
    }

    fn log(&mut self, message: &str) {
        self.logs.push(message.to_string());
    }

    fn should_stop(&self) -> bool {
        let files_seen = self
            .progress
            .iter()
            .filter(|p| matches!(p, Progress::Files { .. }))
            .count();
        self.stop_after.is_some_and(|limit| files_seen >= limit)
    }
}

/// Switches for one organize run. All default to off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    pub recursive: bool,
    pub date_sort: bool,
    pub delete_empty_dirs: bool,
    pub dry_run: bool,
    pub use_content_classification: bool,
    pub rollback_on_error: bool,
}

/// Counters returned by a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Files moved, or that would move in a dry run.
    pub moved: usize,
    pub errors: usize,
    /// Moved files whose name changed to avoid a collision.
    pub renamed: usize,
    /// Empty folders removed by the cleanup pass.
    pub removed_dirs: usize,
    pub rolled_back: bool,
    pub stopped: bool,
    /// Set when the run could not start (unreadable root).
    pub failure: Option<String>,
}

impl RunStats {
    fn scan_failure(reason: String) -> Self {
        Self {
            errors: 1,
            failure: Some(reason),
            ..Self::default()
        }
    }
}

enum FileOutcome {
    AlreadyOrganized,
    WouldMove,
    Moved { landed: PathBuf, renamed: bool },
}

/// Sorts folders into category subfolders and keeps the undo history.
pub struct Organizer {
    table: CategoryTable,
    exclusions: ExclusionSet,
    classifier: Option<Box<dyn ContentClassifier + Send>>,
    confidence_threshold: f32,
    undo: UndoStack,
}

impl Organizer {
    pub fn new(table: CategoryTable, exclusions: ExclusionSet) -> Self {
        Self {
            table,
            exclusions,
            classifier: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            undo: UndoStack::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn ContentClassifier + Send>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_undo_stack(mut self, undo: UndoStack) -> Self {
        self.undo = undo;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn table(&self) -> &CategoryTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut CategoryTable {
        &mut self.table
    }

    pub fn set_exclusions(&mut self, exclusions: ExclusionSet) {
        self.exclusions = exclusions;
    }

    pub fn undo_stack(&self) -> &UndoStack {
        &self.undo
    }

    /// Reverts the most recent run.
    pub fn undo_last(&mut self, observer: &mut dyn RunObserver) -> UndoReport {
        self.undo.undo_last(observer)
    }

    /// Organizes `root` according to `options`.
    ///
    /// Per-file failures are counted and logged. With `rollback_on_error` the
    /// first failure reverts every move made so far and ends the run. An
    /// unreadable root ends the run before anything is touched.
    pub fn organize(
        &mut self,
        root: &Path,
        options: &RunOptions,
        observer: &mut dyn RunObserver,
    ) -> RunStats {
        let use_content =
            options.use_content_classification && self.prepare_classifier(observer);

        observer.log(&format!(
            "--- Starting {}Organization ---",
            if options.dry_run { "Dry Run " } else { "" }
        ));

        let scanner = Scanner::new(&self.exclusions);
        let scan = scanner
            .count(root, options.recursive)
            .and_then(|total| Ok((total, scanner.scan(root, options.recursive)?)));
        let (total, files) = match scan {
            Ok(scan) => scan,
            Err(e) => {
                observer.log(&format!("Error scanning files: {}", e));
                return RunStats::scan_failure(e.to_string());
            }
        };

        let classifier = if use_content {
            self.classifier
                .as_deref()
                .map(|c| c as &dyn ContentClassifier)
        } else {
            None
        };
        let resolver = CategoryResolver::new(&self.table).with_classifier(classifier);
        let planner = MovePlanner::new(root, options.date_sort);

        let mut history = RunHistory::new(root.to_path_buf());
        let mut stats = RunStats::default();
        // Files this run moved into folders the walk has not opened yet.
        let mut landed_here: HashSet<PathBuf> = HashSet::new();
        let mut current = 0;

        for file in files {
            if observer.should_stop() {
                observer.log("Operation stopped by user.");
                stats.stopped = true;
                break;
            }
            if landed_here.contains(&file) {
                continue;
            }

            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            current = (current + 1).min(total);
            observer.progress(Progress::Files {
                current,
                total,
                file_name: file_name.clone(),
            });

            let step = FileStep {
                file: &file,
                file_name: &file_name,
                root,
                options,
                use_content,
                threshold: self.confidence_threshold,
            };
            match step.run(&resolver, &planner, &mut history, observer) {
                Ok(FileOutcome::AlreadyOrganized) => {}
                Ok(FileOutcome::WouldMove) => stats.moved += 1,
                Ok(FileOutcome::Moved { landed, renamed }) => {
                    landed_here.insert(landed);
                    stats.moved += 1;
                    if renamed {
                        stats.renamed += 1;
                    }
                }
                Err(e) => {
                    stats.errors += 1;
                    observer.log(&format!("ERROR moving {}: {}", file_name, e));

                    if options.rollback_on_error && !options.dry_run {
                        observer.log("Critical error encountered. Rolling back changes...");
                        UndoStack::revert(history, observer);
                        stats.rolled_back = true;
                        return stats;
                    }
                }
            }
        }

        if options.delete_empty_dirs && !options.dry_run {
            observer.log("Cleaning up empty folders...");
            stats.removed_dirs = remove_empty_dirs(root, &self.exclusions);
            if stats.removed_dirs > 0 {
                observer.log(&format!("Removed {} empty folders.", stats.removed_dirs));
            }
        }

        let mut summary = format!(
            "--- Done. {} {} files.",
            if options.dry_run { "Would move" } else { "Moved" },
            stats.moved
        );
        if stats.renamed > 0 {
            summary.push_str(&format!(" ({} renamed)", stats.renamed));
        }
        summary.push_str(&format!(" ({} errors) ---", stats.errors));
        observer.log(&summary);

        if !options.dry_run && stats.moved > 0 {
            self.undo.push(history);
        }

        stats
    }

    /// Makes sure the classifier is loaded. Returns false if content
    /// classification has to be disabled for this run.
    fn prepare_classifier(&mut self, observer: &mut dyn RunObserver) -> bool {
        let Some(classifier) = self.classifier.as_mut() else {
            observer.log("Content classifier unavailable. Using extension mode.");
            return false;
        };
        if classifier.is_loaded() {
            return true;
        }

        if !classifier.are_models_present() {
            observer.log("Content models are not cached yet; fetching them now.");
        }
        observer.log("Initializing content classifier (this may take a while)...");

        let loaded = classifier.load_models(&mut |fraction, message| {
            observer.log(&format!("[Classifier Init] {}", message));
            observer.progress(Progress::Phase {
                fraction,
                label: format!("Loading content models: {}%", (fraction * 100.0).round() as u32),
            });
        });

        match loaded {
            Ok(()) => true,
            Err(e) => {
                observer.log(&format!(
                    "Failed to load content classifier: {}. Falling back to extension mode.",
                    e
                ));
                false
            }
        }
    }
}

/// Everything needed to resolve, plan and move one file.
struct FileStep<'a> {
    file: &'a Path,
    file_name: &'a str,
    root: &'a Path,
    options: &'a RunOptions,
    use_content: bool,
    threshold: f32,
}

impl FileStep<'_> {
    fn run(
        &self,
        resolver: &CategoryResolver<'_>,
        planner: &MovePlanner<'_>,
        history: &mut RunHistory,
        observer: &mut dyn RunObserver,
    ) -> OrganizeResult<FileOutcome> {
        let classification = resolver.resolve(self.file, self.use_content, self.threshold);

        let plan = planner
            .plan(self.file, &classification.category)
            .map_err(|source| OrganizeError::PlanFailed {
                path: self.file.to_path_buf(),
                source,
            })?;
        if let Some(reason) = &plan.date_error {
            observer.log(&format!("Date error for {}: {}", self.file_name, reason));
        }

        if planner::is_already_organized(self.file, &plan.target_dir) {
            return Ok(FileOutcome::AlreadyOrganized);
        }

        let suffix = if classification.method != ClassificationMethod::Extension {
            format!(
                " ({}, {:.2})",
                classification.method, classification.confidence
            )
        } else {
            String::new()
        };

        if self.options.dry_run {
            let preview = planner::unique_path(&plan.destination);
            observer.log(&format!(
                "[Dry Run] would move: {} -> {}{}",
                self.file_name,
                display_relative(&preview, self.root),
                suffix
            ));
            return Ok(FileOutcome::WouldMove);
        }

        fs::create_dir_all(&plan.target_dir).map_err(|source| {
            OrganizeError::DirectoryCreationFailed {
                path: plan.target_dir.clone(),
                source,
            }
        })?;

        let landed = planner::move_no_clobber(self.file, &plan.destination).map_err(|source| {
            OrganizeError::FileMoveFailure {
                file: self.file.to_path_buf(),
                destination: plan.destination.clone(),
                source,
            }
        })?;
        history.push(MoveRecord::new(landed.clone(), self.file.to_path_buf()));
        tracing::debug!("moved {} -> {}", self.file.display(), landed.display());

        let renamed = landed.file_name() != self.file.file_name();
        if renamed {
            let new_name = landed
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            observer.log(&format!(
                "Renamed & Moved: {} -> {} (in {}){}",
                self.file_name,
                new_name,
                display_relative(&plan.target_dir, self.root),
                suffix
            ));
        } else {
            observer.log(&format!(
                "Moved: {} -> {}{}",
                self.file_name,
                display_relative(&landed, self.root),
                suffix
            ));
        }

        Ok(FileOutcome::Moved { landed, renamed })
    }
}

/// Removes every empty directory under `root`, deepest first. Excluded
/// folders and their contents are left alone; failures are ignored.
fn remove_empty_dirs(root: &Path, exclusions: &ExclusionSet) -> usize {
    WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir() && exclusions.is_excluded_folder(entry.file_name()))
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| match fs::remove_dir(entry.path()) {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!("kept {}: {}", entry.path().display(), e);
                false
            }
        })
        .count()
}
