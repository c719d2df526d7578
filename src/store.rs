//! Application data directory and the small stores kept in it.
//!
//! Everything tidybox persists lives in one directory: the settings, the batch
//! list, the recent-folders list, the undo history and the activity log.

use chrono::Local;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const APP_DIR_NAME: &str = "tidybox";
pub const CONFIG_FILE: &str = "config.json";
pub const BATCH_FILE: &str = "batch_config.json";
pub const RECENT_FILE: &str = "recent.json";
pub const UNDO_FILE: &str = "undo_history.json";
pub const LOG_FILE: &str = "organizer.log";

/// Number of entries kept in the recent-folders list.
pub const MAX_RECENT: usize = 10;

/// Errors reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid data in {}: {source}", .path.display())]
    Format {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{} is not in the batch list", .0.display())]
    UnknownEntry(PathBuf),
    #[error("no configuration directory available; pass --data-dir or set TIDYBOX_HOME")]
    NoDataDir,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Reads a JSON file. A missing file yields `None`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Format {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes `value` as pretty JSON, creating the parent directory if needed.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let io_error = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Format {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_error)
}

/// Locations of the persisted files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Uses `override_dir` if given, otherwise the platform config directory.
    pub fn resolve(override_dir: Option<PathBuf>) -> StoreResult<Self> {
        match override_dir {
            Some(dir) => Ok(Self::new(dir)),
            None => dirs::config_dir()
                .map(|dir| Self::new(dir.join(APP_DIR_NAME)))
                .ok_or(StoreError::NoDataDir),
        }
    }

    /// Creates the data directory.
    pub fn ensure(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn batch(&self) -> PathBuf {
        self.root.join(BATCH_FILE)
    }

    pub fn recent(&self) -> PathBuf {
        self.root.join(RECENT_FILE)
    }

    pub fn undo(&self) -> PathBuf {
        self.root.join(UNDO_FILE)
    }

    pub fn log(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Names of every file kept in the data directory.
    pub fn file_names() -> [&'static str; 5] {
        [CONFIG_FILE, BATCH_FILE, RECENT_FILE, UNDO_FILE, LOG_FILE]
    }
}

/// Most-recently-used list of organized folders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentFolders {
    paths: Vec<PathBuf>,
}

impl RecentFolders {
    /// Loads the list. Unreadable or malformed files give an empty list.
    pub fn load(path: &Path) -> Self {
        match read_json::<Vec<PathBuf>>(path) {
            Ok(paths) => {
                let mut recent = Self::default();
                for path in paths.unwrap_or_default().into_iter().rev() {
                    recent.add(path);
                }
                recent
            }
            Err(e) => {
                tracing::warn!("ignoring recent folders: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        write_json(path, &self.paths)
    }

    /// Moves `path` to the front, dropping duplicates and the oldest entries.
    pub fn add(&mut self, path: PathBuf) {
        self.paths.retain(|p| p != &path);
        self.paths.insert(0, path);
        self.paths.truncate(MAX_RECENT);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// Append-only log file mirroring every line shown to the user.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Appends one timestamped line. Write failures are ignored.
    pub fn append(&self, message: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| {
                writeln!(
                    file,
                    "[{}] {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    message
                )
            });
        if let Err(e) = result {
            tracing::debug!("could not write {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_app_paths_layout() {
        let paths = AppPaths::resolve(Some(PathBuf::from("/data/tidybox"))).unwrap();
        assert_eq!(paths.config(), PathBuf::from("/data/tidybox/config.json"));
        assert_eq!(paths.undo(), PathBuf::from("/data/tidybox/undo_history.json"));
        assert!(AppPaths::file_names().contains(&"organizer.log"));
    }

    #[test]
    fn test_recent_folders_mru_order() {
        let mut recent = RecentFolders::default();
        for i in 0..12 {
            recent.add(PathBuf::from(format!("/data/{}", i)));
        }
        recent.add(PathBuf::from("/data/5"));

        assert_eq!(recent.paths().len(), MAX_RECENT);
        assert_eq!(recent.paths()[0], PathBuf::from("/data/5"));
        assert_eq!(recent.paths()[1], PathBuf::from("/data/11"));
        assert_eq!(
            recent.paths().iter().filter(|p| *p == Path::new("/data/5")).count(),
            1
        );
    }

    #[test]
    fn test_recent_folders_round_trip_and_tolerant_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(RECENT_FILE);

        let mut recent = RecentFolders::default();
        recent.add(PathBuf::from("/a"));
        recent.add(PathBuf::from("/b"));
        recent.save(&path).unwrap();
        assert_eq!(RecentFolders::load(&path), recent);

        fs::write(&path, "not json").unwrap();
        assert!(RecentFolders::load(&path).paths().is_empty());
    }

    #[test]
    fn test_activity_log_appends() {
        let temp_dir = TempDir::new().unwrap();
        let log = ActivityLog::new(temp_dir.path().join(LOG_FILE));
        log.append("first");
        log.append("second");

        let content = fs::read_to_string(temp_dir.path().join(LOG_FILE)).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] first"));
        assert!(lines[1].ends_with("] second"));
    }

    #[test]
    fn test_read_json_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let value: Option<Vec<String>> = read_json(&temp_dir.path().join("none.json")).unwrap();
        assert!(value.is_none());
    }
}
