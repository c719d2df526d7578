/// Candidate file discovery.
///
/// The scanner walks a root folder (optionally recursively) and yields the
/// files eligible for organization. Excluded folders are pruned before they
/// are entered, and excluded names, extensions and glob patterns are applied
/// to every file.
use crate::category::dotted_extension;
use glob::Pattern;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Compiled exclusion rules.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    names: HashSet<String>,
    extensions: HashSet<String>,
    folders: HashSet<String>,
    patterns: Vec<Pattern>,
}

impl ExclusionSet {
    /// Builds the set. Extensions are lowercased; invalid glob patterns are
    /// dropped with a warning (validation reports them before save).
    pub fn new<I, J, K, L>(names: I, extensions: J, folders: K, patterns: L) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
        K: IntoIterator<Item = String>,
        L: IntoIterator<Item = String>,
    {
        let patterns = patterns
            .into_iter()
            .filter_map(|p| match Pattern::new(&p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!("ignoring invalid exclusion pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();

        Self {
            names: names.into_iter().collect(),
            extensions: extensions.into_iter().map(|e| e.to_lowercase()).collect(),
            folders: folders.into_iter().collect(),
            patterns,
        }
    }

    pub fn is_excluded_folder(&self, name: &OsStr) -> bool {
        self.folders.contains(name.to_string_lossy().as_ref())
    }

    /// Whether a file should be skipped, judged by its name alone.
    pub fn is_excluded_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return true;
        };

        if self.names.contains(name.as_ref()) {
            return true;
        }

        if self.extensions.contains(&dotted_extension(path)) {
            return true;
        }

        self.patterns.iter().any(|pattern| pattern.matches(&name))
    }
}

/// Enumerates candidate files under a root.
pub struct Scanner<'a> {
    exclusions: &'a ExclusionSet,
}

impl<'a> Scanner<'a> {
    pub fn new(exclusions: &'a ExclusionSet) -> Self {
        Self { exclusions }
    }

    /// Starts a scan of `root`.
    ///
    /// Fails only if `root` itself cannot be read. The returned iterator is
    /// lazy and yields entries sorted by file name within each directory, so
    /// two scans of an unchanged tree agree.
    pub fn scan(&self, root: &Path, recursive: bool) -> io::Result<Scan<'a>> {
        // Surface an unreadable root up front; deeper failures are skipped.
        fs::read_dir(root)?;

        let excluded_root = root
            .file_name()
            .is_some_and(|name| self.exclusions.is_excluded_folder(name));

        let max_depth = if recursive { usize::MAX } else { 1 };
        let exclusions = self.exclusions;
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                !(entry.file_type().is_dir() && exclusions.is_excluded_folder(entry.file_name()))
            });

        Ok(Scan {
            walker: if excluded_root { None } else { Some(Box::new(walker)) },
            exclusions,
        })
    }

    /// Counts the files a fresh scan would yield.
    pub fn count(&self, root: &Path, recursive: bool) -> io::Result<usize> {
        Ok(self.scan(root, recursive)?.count())
    }
}

/// Lazy sequence of candidate files produced by [`Scanner::scan`].
pub struct Scan<'a> {
    walker: Option<Box<dyn Iterator<Item = walkdir::Result<walkdir::DirEntry>> + 'a>>,
    exclusions: &'a ExclusionSet,
}

impl Iterator for Scan<'_> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        let walker = self.walker.as_mut()?;
        for entry in walker.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let is_file = entry.file_type().is_file()
                || (entry.path_is_symlink() && entry.path().is_file());
            if !is_file || self.exclusions.is_excluded_file(entry.path()) {
                continue;
            }

            return Some(entry.into_path());
        }
        None
    }
}
