//! Shared, thread-safe access to an [`Organizer`].
//!
//! At most one organize, undo or batch operation runs at a time: every entry
//! point takes the lock with `try_lock` and reports [`OrganizeError::Busy`]
//! instead of queueing behind a running operation.
use crate::batch::{BatchEntry, BatchObserver, BatchReport, run_batch};
use crate::organizer::{
    OrganizeError, OrganizeResult, Organizer, Progress, RunObserver, RunOptions, RunStats,
};
use crate::undo::UndoReport;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};

/// Cooperative cancellation flag shared between a caller and a worker.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Messages sent from a background run.
#[derive(Debug)]
pub enum WorkerEvent {
    Progress(Progress),
    Log(String),
    /// Always the last event of a run.
    Finished(OrganizeResult<RunStats>),
}

/// Forwards engine callbacks over a channel.
struct ChannelObserver {
    events: Sender<WorkerEvent>,
    stop: StopFlag,
}

impl RunObserver for ChannelObserver {
    fn progress(&mut self, progress: Progress) {
        // A dropped receiver only means nobody is watching.
        let _ = self.events.send(WorkerEvent::Progress(progress));
    }

    fn log(&mut self, message: &str) {
        let _ = self.events.send(WorkerEvent::Log(message.to_string()));
    }

    fn should_stop(&self) -> bool {
        self.stop.is_stopped()
    }
}

/// Cloneable handle to one organizer.
#[derive(Clone)]
pub struct OrganizerHandle {
    inner: Arc<Mutex<Organizer>>,
}

impl OrganizerHandle {
    pub fn new(organizer: Organizer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(organizer)),
        }
    }

    fn acquire(&self) -> OrganizeResult<MutexGuard<'_, Organizer>> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(OrganizeError::Busy),
            // A panicked run leaves the organizer itself consistent.
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }

    /// Whether an operation currently holds the organizer.
    pub fn is_busy(&self) -> bool {
        matches!(self.inner.try_lock(), Err(TryLockError::WouldBlock))
    }

    pub fn organize(
        &self,
        root: &std::path::Path,
        options: &RunOptions,
        observer: &mut dyn RunObserver,
    ) -> OrganizeResult<RunStats> {
        let mut organizer = self.acquire()?;
        Ok(organizer.organize(root, options, observer))
    }

    pub fn undo_last(&self, observer: &mut dyn RunObserver) -> OrganizeResult<UndoReport> {
        let mut organizer = self.acquire()?;
        Ok(organizer.undo_last(observer))
    }

    pub fn run_batch<O: BatchObserver>(
        &self,
        entries: &mut [BatchEntry],
        observer: &mut O,
    ) -> OrganizeResult<BatchReport> {
        let mut organizer = self.acquire()?;
        Ok(run_batch(&mut organizer, entries, observer))
    }

    /// Runs `f` with exclusive access, e.g. to edit the category table.
    pub fn with_organizer<R>(&self, f: impl FnOnce(&mut Organizer) -> R) -> OrganizeResult<R> {
        let mut organizer = self.acquire()?;
        Ok(f(&mut organizer))
    }

    /// Runs an organize on a background thread.
    ///
    /// Progress and log lines arrive on the returned receiver, followed by
    /// exactly one [`WorkerEvent::Finished`].
    pub fn spawn_organize(
        &self,
        root: PathBuf,
        options: RunOptions,
        stop: StopFlag,
    ) -> (Receiver<WorkerEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel();
        let handle = self.clone();

        let join = thread::spawn(move || {
            let mut observer = ChannelObserver {
                events: tx.clone(),
                stop,
            };
            let result = handle.organize(&root, &options, &mut observer);
            let _ = tx.send(WorkerEvent::Finished(result));
        });

        (rx, join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryTable;
    use crate::organizer::SilentObserver;
    use crate::scanner::ExclusionSet;
    use std::fs;
    use tempfile::TempDir;

    fn handle() -> OrganizerHandle {
        OrganizerHandle::new(Organizer::new(
            CategoryTable::default(),
            ExclusionSet::default(),
        ))
    }

    #[test]
    fn test_spawn_organize_reports_and_finishes() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.jpg"), "x").unwrap();
        fs::write(temp_dir.path().join("b.pdf"), "x").unwrap();

        let handle = handle();
        let (events, join) = handle.spawn_organize(
            temp_dir.path().to_path_buf(),
            RunOptions::default(),
            StopFlag::new(),
        );
        let events: Vec<_> = events.iter().collect();
        join.join().unwrap();

        let file_progress = events
            .iter()
            .filter(|e| matches!(e, WorkerEvent::Progress(Progress::Files { .. })))
            .count();
        assert_eq!(file_progress, 2);
        match events.last() {
            Some(WorkerEvent::Finished(Ok(stats))) => assert_eq!(stats.moved, 2),
            other => panic!("unexpected last event: {:?}", other),
        }
        assert!(temp_dir.path().join("Images/a.jpg").exists());
    }

    #[test]
    fn test_stop_flag_before_start_moves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.jpg"), "x").unwrap();

        let stop = StopFlag::new();
        stop.stop();
        let (events, join) =
            handle().spawn_organize(temp_dir.path().to_path_buf(), RunOptions::default(), stop);
        let last = events.iter().last();
        join.join().unwrap();

        match last {
            Some(WorkerEvent::Finished(Ok(stats))) => {
                assert!(stats.stopped);
                assert_eq!(stats.moved, 0);
            }
            other => panic!("unexpected last event: {:?}", other),
        }
        assert!(temp_dir.path().join("a.jpg").exists());
    }

    #[test]
    fn test_second_operation_is_rejected_while_busy() {
        let handle = handle();
        let other = handle.clone();

        let result = handle
            .with_organizer(|_| other.undo_last(&mut SilentObserver))
            .unwrap();
        assert!(matches!(result, Err(OrganizeError::Busy)));
        assert!(!handle.is_busy());
    }
}
