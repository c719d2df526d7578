//! tidybox - sort a folder into category subfolders
//!
//! This library classifies files by extension (or, optionally, by content),
//! moves them into category folders with collision-free names, and records
//! every run so it can be undone. Folders can be processed one at a time or
//! as a batch, and settings are persisted as JSON.

pub mod batch;
pub mod category;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod organizer;
pub mod output;
pub mod planner;
pub mod scanner;
pub mod store;
pub mod undo;
pub mod worker;

pub use batch::{BatchEntry, BatchList, BatchReport, BatchStatus, FolderSettings, run_batch};
pub use category::{CategoryResolver, CategoryTable, ClassificationMethod, ClassificationResult};
pub use classifier::{ContentClassifier, SignatureClassifier};
pub use config::{ConfigError, Settings};
pub use organizer::{
    OrganizeError, Organizer, Progress, RecordingObserver, RunObserver, RunOptions, RunStats,
};
pub use scanner::{ExclusionSet, Scanner};
pub use undo::{MoveRecord, RunHistory, UndoReport, UndoStack};
pub use worker::{OrganizerHandle, StopFlag, WorkerEvent};
