//! Command-line interface module for tidybox.
//!
//! This module handles all CLI-related functionality:
//! - Command definitions (clap derive)
//! - Loading and saving persisted state around each command
//! - Driving organize runs on a worker thread with a progress bar
//! - Mirroring every engine log line into the activity log

use crate::batch::{BatchEntry, BatchList, BatchObserver, BatchStatus, FolderSettings};
use crate::config::{ConfigError, Settings};
use crate::organizer::{OrganizeError, Progress, RunObserver, RunOptions, RunStats};
use crate::output::OutputFormatter;
use crate::store::{ActivityLog, AppPaths, RecentFolders, StoreError};
use crate::undo::{DEFAULT_UNDO_CAPACITY, UndoStack};
use crate::worker::{OrganizerHandle, StopFlag, WorkerEvent};
use clap::{Args, Parser, Subcommand};
use indicatif::ProgressBar;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "tidybox", version)]
#[command(about = "Sort a folder into category subfolders, with dry runs, batches and undo", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding settings, batch list, history and log
    #[arg(long, global = true, env = "TIDYBOX_HOME")]
    pub data_dir: Option<PathBuf>,

    /// Print debug diagnostics to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Switches shared by `organize` and `batch add`.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct RunFlags {
    /// Include subfolders
    #[arg(short, long)]
    pub recursive: bool,

    /// Nest into year and month folders by modification time
    #[arg(short, long)]
    pub date_sort: bool,

    /// Remove empty folders afterwards
    #[arg(long)]
    pub delete_empty: bool,

    /// Only report what would move
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Classify by file content before falling back to the extension
    #[arg(short, long)]
    pub content: bool,

    /// Undo the whole run on the first error
    #[arg(long)]
    pub rollback: bool,
}

impl From<RunFlags> for FolderSettings {
    fn from(flags: RunFlags) -> Self {
        FolderSettings {
            recursive: flags.recursive,
            date_sort: flags.date_sort,
            delete_empty_dirs: flags.delete_empty,
            dry_run: flags.dry_run,
            use_content_classification: flags.content,
            rollback_on_error: flags.rollback,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Organize a folder
    Organize {
        #[arg(required = true)]
        dir: PathBuf,

        #[command(flatten)]
        flags: RunFlags,
    },
    /// Undo the most recent run
    Undo,
    /// Manage and run the batch list
    Batch {
        #[command(subcommand)]
        action: BatchCommand,
    },
    /// Inspect or change settings
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// List recently organized folders
    Recent,
}

#[derive(Subcommand)]
pub enum BatchCommand {
    /// Show the batch list
    List,
    /// Add a folder, optionally with its own settings
    Add {
        dir: PathBuf,

        #[command(flatten)]
        flags: RunFlags,
    },
    /// Replace the settings of a listed folder
    Set {
        dir: PathBuf,

        #[command(flatten)]
        flags: RunFlags,

        /// Use the default settings for this folder
        #[arg(long, conflicts_with_all = ["recursive", "date_sort", "delete_empty", "dry_run", "content", "rollback"])]
        default: bool,
    },
    /// Remove a folder
    Remove { dir: PathBuf },
    /// Remove every folder
    Clear,
    /// Organize every folder in order
    Run,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the current settings as JSON
    Show,
    /// Check the settings and list every problem
    Validate,
    /// Write the settings to a file (.toml or JSON)
    Export { path: PathBuf },
    /// Replace the settings with a file written by export
    Import { path: PathBuf },
    /// Create or replace a category
    SetCategory {
        name: String,
        #[arg(required = true)]
        extensions: Vec<String>,
    },
    /// Delete a category
    RemoveCategory { name: String },
    /// Never enter folders with this name
    ExcludeFolder { name: String },
}

/// Errors surfaced to the user by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Organize(#[from] OrganizeError),
    #[error("{} is not a readable directory: {source}", .path.display())]
    InvalidDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to render settings: {0}")]
    Render(#[from] serde_json::Error),
    #[error("the worker thread stopped without reporting a result")]
    WorkerLost,
}

pub type CliResult<T> = Result<T, CliError>;

/// Prints engine output and mirrors it into the activity log.
struct ConsoleObserver<'a> {
    log: &'a ActivityLog,
    bar: Option<ProgressBar>,
}

impl<'a> ConsoleObserver<'a> {
    fn new(log: &'a ActivityLog) -> Self {
        Self { log, bar: None }
    }
}

impl RunObserver for ConsoleObserver<'_> {
    fn progress(&mut self, progress: Progress) {
        let bar = self
            .bar
            .get_or_insert_with(|| OutputFormatter::create_progress_bar(0));
        match progress {
            Progress::Files {
                current,
                total,
                file_name,
            } => {
                bar.set_length(total as u64);
                bar.set_position(current as u64);
                bar.set_message(file_name);
            }
            Progress::Phase { fraction, label } => {
                bar.set_length(100);
                bar.set_position((fraction * 100.0).round() as u64);
                bar.set_message(label);
            }
        }
    }

    fn log(&mut self, message: &str) {
        self.log.append(message);
        let line = OutputFormatter::styled_log_line(message);
        match &self.bar {
            Some(bar) => bar.println(line),
            None => OutputFormatter::plain(&line),
        }
    }
}

impl BatchObserver for ConsoleObserver<'_> {
    fn entry_status(&mut self, index: usize, entry: &BatchEntry, _fraction: f32) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        if entry.status != BatchStatus::Running {
            self.log(&format!(
                "[{}] {}: {}",
                index + 1,
                entry.path.display(),
                entry.status
            ));
        }
    }
}

/// Runs the CLI application.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use tidybox::cli::{Cli, run};
///
/// let cli = Cli::parse_from(["tidybox", "organize", "/path/to/directory", "--dry-run"]);
/// if let Err(e) = run(cli) {
///     eprintln!("Error: {}", e);
/// }
/// ```
pub fn run(cli: Cli) -> CliResult<()> {
    let paths = AppPaths::resolve(cli.data_dir)?;
    paths.ensure()?;
    tracing::debug!("data directory: {}", paths.root().display());

    match cli.command {
        Commands::Organize { dir, flags } => {
            organize(&paths, &dir, FolderSettings::from(flags).into())
        }
        Commands::Undo => undo(&paths),
        Commands::Batch { action } => batch(&paths, action),
        Commands::Config { action } => config(&paths, action),
        Commands::Recent => {
            let recent = RecentFolders::load(&paths.recent());
            if recent.paths().is_empty() {
                OutputFormatter::info("No recent folders.");
            } else {
                OutputFormatter::header("RECENT FOLDERS");
                OutputFormatter::path_list(recent.paths());
            }
            Ok(())
        }
    }
}

/// Loads the settings, falling back to the defaults when the file is broken.
fn load_settings(paths: &AppPaths) -> Settings {
    Settings::load(&paths.config()).unwrap_or_else(|e| {
        OutputFormatter::warning(&format!("{}. Using default settings.", e));
        Settings::default()
    })
}

fn open_handle(paths: &AppPaths) -> OrganizerHandle {
    let undo = UndoStack::load(&paths.undo(), DEFAULT_UNDO_CAPACITY).unwrap_or_else(|e| {
        OutputFormatter::warning(&format!("{}. Starting with an empty undo history.", e));
        UndoStack::default()
    });
    OrganizerHandle::new(load_settings(paths).organizer().with_undo_stack(undo))
}

fn save_undo(handle: &OrganizerHandle, paths: &AppPaths) -> CliResult<()> {
    handle.with_organizer(|organizer| organizer.undo_stack().save(&paths.undo()))??;
    Ok(())
}

fn resolve_dir(dir: &Path) -> CliResult<PathBuf> {
    let resolved = fs::canonicalize(dir).map_err(|source| CliError::InvalidDirectory {
        path: dir.to_path_buf(),
        source,
    })?;
    fs::read_dir(&resolved).map_err(|source| CliError::InvalidDirectory {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(resolved)
}

fn organize(paths: &AppPaths, dir: &Path, options: RunOptions) -> CliResult<()> {
    let root = resolve_dir(dir)?;
    let log = ActivityLog::new(paths.log());
    let handle = open_handle(paths);

    OutputFormatter::info(&format!("Organizing contents of: {}", root.display()));
    if options.dry_run {
        OutputFormatter::dry_run_notice("No files will be moved.");
    }

    let (events, worker) = handle.spawn_organize(root.clone(), options, StopFlag::new());
    let mut observer = ConsoleObserver::new(&log);
    let mut finished: Option<Result<RunStats, OrganizeError>> = None;
    for event in events {
        match event {
            WorkerEvent::Progress(progress) => observer.progress(progress),
            WorkerEvent::Log(line) => observer.log(&line),
            WorkerEvent::Finished(result) => finished = Some(result),
        }
    }
    if let Some(bar) = observer.bar.take() {
        bar.finish_and_clear();
    }
    if worker.join().is_err() {
        tracing::error!("organize worker panicked");
    }

    let stats = finished.ok_or(CliError::WorkerLost)??;
    OutputFormatter::run_summary(&stats, options.dry_run);

    let mut recent = RecentFolders::load(&paths.recent());
    recent.add(root);
    if let Err(e) = recent.save(&paths.recent()) {
        tracing::warn!("could not save recent folders: {}", e);
    }

    if !options.dry_run {
        save_undo(&handle, paths)?;
        if stats.moved > 0 && !stats.rolled_back {
            OutputFormatter::success("History saved. Use 'tidybox undo' to revert changes.");
        }
    }
    Ok(())
}

fn undo(paths: &AppPaths) -> CliResult<()> {
    let log = ActivityLog::new(paths.log());
    let handle = open_handle(paths);

    let report = handle.undo_last(&mut ConsoleObserver::new(&log))?;
    save_undo(&handle, paths)?;

    if !report.is_complete_success() {
        OutputFormatter::warning(&format!(
            "{} files could not be restored.",
            report.failed_restores.len()
        ));
    }
    Ok(())
}

fn batch(paths: &AppPaths, action: BatchCommand) -> CliResult<()> {
    let mut list = BatchList::load(&paths.batch())?;

    match action {
        BatchCommand::List => {
            if list.is_empty() {
                OutputFormatter::info("The batch list is empty.");
            }
            for entry in list.entries() {
                OutputFormatter::plain(&format!(
                    "{}  [{}]",
                    entry.path.display(),
                    entry.settings_label()
                ));
            }
        }
        BatchCommand::Add { dir, flags } => {
            let root = resolve_dir(&dir)?;
            let settings = FolderSettings::from(flags);
            let mut entry = BatchEntry::new(&root);
            if settings != FolderSettings::default() {
                entry = entry.with_settings(settings);
            }
            if list.add(entry) {
                list.save(&paths.batch())?;
                OutputFormatter::success(&format!("Added {}", root.display()));
            } else {
                OutputFormatter::warning(&format!("{} is already listed", root.display()));
            }
        }
        BatchCommand::Set {
            dir,
            flags,
            default,
        } => {
            let settings = (!default).then(|| FolderSettings::from(flags));
            let listed = fs::canonicalize(&dir)
                .ok()
                .filter(|resolved| list.entries().iter().any(|e| &e.path == resolved))
                .unwrap_or_else(|| dir.clone());
            list.set_settings(&listed, settings)?;
            list.save(&paths.batch())?;
            OutputFormatter::success(&format!("Updated {}", listed.display()));
        }
        BatchCommand::Remove { dir } => {
            // Listed folders may no longer exist, so match the path as given too.
            let removed = list.remove(&dir)
                || fs::canonicalize(&dir).is_ok_and(|resolved| list.remove(&resolved));
            if removed {
                list.save(&paths.batch())?;
                OutputFormatter::success(&format!("Removed {}", dir.display()));
            } else {
                OutputFormatter::warning(&format!("{} is not in the batch list", dir.display()));
            }
        }
        BatchCommand::Clear => {
            list.clear();
            list.save(&paths.batch())?;
            OutputFormatter::success("Batch list cleared.");
        }
        BatchCommand::Run => {
            if list.is_empty() {
                OutputFormatter::info("The batch list is empty.");
                return Ok(());
            }
            let log = ActivityLog::new(paths.log());
            let handle = open_handle(paths);
            let report = handle.run_batch(list.entries_mut(), &mut ConsoleObserver::new(&log))?;
            save_undo(&handle, paths)?;
            OutputFormatter::batch_table(&report);
        }
    }
    Ok(())
}

fn config(paths: &AppPaths, action: ConfigCommand) -> CliResult<()> {
    let config_path = paths.config();

    match action {
        ConfigCommand::Show => {
            let settings = load_settings(paths);
            OutputFormatter::plain(&serde_json::to_string_pretty(&settings)?);
        }
        ConfigCommand::Validate => {
            let errors = Settings::load(&config_path)?.validate();
            if errors.is_empty() {
                OutputFormatter::success("Configuration is valid.");
            } else {
                for error in &errors {
                    OutputFormatter::error(error);
                }
                return Err(ConfigError::Invalid(errors).into());
            }
        }
        ConfigCommand::Export { path } => {
            load_settings(paths).export(&path)?;
            OutputFormatter::success(&format!("Exported settings to {}", path.display()));
        }
        ConfigCommand::Import { path } => {
            Settings::import(&path)?.save(&config_path)?;
            OutputFormatter::success(&format!("Imported settings from {}", path.display()));
        }
        ConfigCommand::SetCategory { name, extensions } => {
            let mut settings = load_settings(paths);
            let extensions: Vec<&str> = extensions.iter().map(String::as_str).collect();
            settings.directories.set_category(name.as_str(), &extensions);
            settings.save(&config_path)?;
            OutputFormatter::success(&format!("Category '{}' saved.", name));
        }
        ConfigCommand::RemoveCategory { name } => {
            let mut settings = load_settings(paths);
            if settings.directories.remove_category(&name).is_none() {
                OutputFormatter::warning(&format!("No category named '{}'.", name));
                return Ok(());
            }
            settings.save(&config_path)?;
            OutputFormatter::success(&format!("Category '{}' removed.", name));
        }
        ConfigCommand::ExcludeFolder { name } => {
            let mut settings = load_settings(paths);
            settings.excluded_folders.insert(name.clone());
            settings.save(&config_path)?;
            OutputFormatter::success(&format!("Folders named '{}' will be skipped.", name));
        }
    }
    Ok(())
}
