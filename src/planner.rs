/// Destination planning and collision-free moves.
///
/// For each file the planner computes the target directory (category, then
/// optionally year and month), decides whether the file is already where it
/// belongs, and finds a destination name that does not clobber anything.
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Upper bound on destination claims before a move gives up.
const MAX_CLAIM_ATTEMPTS: usize = 100;

/// The planned destination for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Directory the file belongs in.
    pub target_dir: PathBuf,
    /// `target_dir` joined with the file's own name.
    pub destination: PathBuf,
    /// Set when the date subdivision could not be computed.
    pub date_error: Option<String>,
}

/// Computes target directories under a root folder.
pub struct MovePlanner<'a> {
    root: &'a Path,
    date_sort: bool,
}

impl<'a> MovePlanner<'a> {
    pub fn new(root: &'a Path, date_sort: bool) -> Self {
        Self { root, date_sort }
    }

    /// Plans where `file_path` goes for `category`.
    ///
    /// A nested category such as `Images/Photos` becomes nested folders; a
    /// category with a `.` or `..` segment is rejected. If
    /// the modification time cannot be read the plan falls back to the plain
    /// category folder and records why in `date_error`.
    pub fn plan(&self, file_path: &Path, category: &str) -> io::Result<Plan> {
        let file_name = file_path.file_name().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "file has no name component")
        })?;

        let mut target_dir = self.root.to_path_buf();
        for part in category.split(['/', '\\']).filter(|p| !p.is_empty()) {
            // Only plain names; anything else could leave the root.
            match Path::new(part).components().next() {
                Some(Component::Normal(_)) => target_dir.push(part),
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("category '{}' is not a plain folder name", category),
                    ));
                }
            }
        }

        let mut date_error = None;
        if self.date_sort {
            match date_folders(file_path) {
                Ok((year, month)) => {
                    target_dir.push(year);
                    target_dir.push(month);
                }
                Err(e) => date_error = Some(e.to_string()),
            }
        }

        let destination = target_dir.join(file_name);
        Ok(Plan {
            target_dir,
            destination,
            date_error,
        })
    }
}

/// Returns `(YYYY, MonthName)` from the file's modification time in local time.
pub fn date_folders(file_path: &Path) -> io::Result<(String, String)> {
    let modified = fs::metadata(file_path)?.modified()?;
    let local: DateTime<Local> = modified.into();
    Ok((
        local.format("%Y").to_string(),
        local.format("%B").to_string(),
    ))
}

/// Whether the file already sits in `target_dir`.
///
/// Both sides are fully resolved; a target that does not exist yet never
/// matches.
pub fn is_already_organized(file_path: &Path, target_dir: &Path) -> bool {
    let Some(parent) = file_path.parent() else {
        return false;
    };
    match (fs::canonicalize(parent), fs::canonicalize(target_dir)) {
        (Ok(current), Ok(target)) => current == target,
        _ => false,
    }
}

/// Returns `candidate` if nothing exists there, otherwise the first free
/// `stem_N.ext` sibling (N = 1, 2, ...).
pub fn unique_path(candidate: &Path) -> PathBuf {
    if !exists(candidate) {
        return candidate.to_path_buf();
    }

    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| candidate.with_file_name(format!("{}_{}{}", stem, n, ext)))
        .find(|path| !exists(path))
        .unwrap_or_else(|| candidate.to_path_buf())
}

fn exists(path: &Path) -> bool {
    // Dangling symlinks still occupy the name.
    fs::symlink_metadata(path).is_ok()
}

/// Moves `source` to `destination` or to the next free `_N` name, never
/// overwriting an existing file. Returns the path actually used.
///
/// The destination is claimed with a hard link, which fails atomically if the
/// name is taken, so a file appearing between the check and the move costs a
/// retry rather than data. Filesystems without hard links fall back to a
/// checked rename.
pub fn move_no_clobber(source: &Path, destination: &Path) -> io::Result<PathBuf> {
    for _ in 0..MAX_CLAIM_ATTEMPTS {
        let target = unique_path(destination);
        match fs::hard_link(source, &target) {
            Ok(()) => {
                if let Err(e) = fs::remove_file(source) {
                    let _ = fs::remove_file(&target);
                    return Err(e);
                }
                return Ok(target);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e),
            Err(e) => {
                tracing::debug!("hard link unavailable ({}), falling back to rename", e);
                let target = unique_path(&target);
                rename_or_copy(source, &target)?;
                return Ok(target);
            }
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!(
            "no free destination name for {} after {} attempts",
            destination.display(),
            MAX_CLAIM_ATTEMPTS
        ),
    ))
}

/// `fs::rename`, with a copy-and-remove fallback across devices.
pub fn rename_or_copy(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(source, destination)?;
            fs::remove_file(source)
        }
        other => other,
    }
}

/// Renders `path` relative to `root` for log lines.
pub fn display_relative(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs::File;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_unique_path_returns_candidate_when_free() {
        let temp_dir = TempDir::new().unwrap();
        let candidate = temp_dir.path().join("report.txt");
        assert_eq!(unique_path(&candidate), candidate);
    }

    #[test]
    fn test_unique_path_appends_counter() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("report.txt"), "a").unwrap();
        assert_eq!(
            unique_path(&temp_dir.path().join("report.txt")),
            temp_dir.path().join("report_1.txt")
        );

        fs::write(temp_dir.path().join("report_1.txt"), "b").unwrap();
        assert_eq!(
            unique_path(&temp_dir.path().join("report.txt")),
            temp_dir.path().join("report_2.txt")
        );
    }

    #[test]
    fn test_unique_path_without_extension() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("Makefile"), "a").unwrap();
        assert_eq!(
            unique_path(&temp_dir.path().join("Makefile")),
            temp_dir.path().join("Makefile_1")
        );
    }

    #[test]
    fn test_plan_category_folder() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.jpg");
        fs::write(&file, "x").unwrap();

        let plan = MovePlanner::new(temp_dir.path(), false).plan(&file, "Images").unwrap();
        assert_eq!(plan.target_dir, temp_dir.path().join("Images"));
        assert_eq!(plan.destination, temp_dir.path().join("Images").join("a.jpg"));
        assert!(plan.date_error.is_none());
    }

    #[test]
    fn test_plan_nested_category() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.jpg");
        fs::write(&file, "x").unwrap();

        let plan = MovePlanner::new(temp_dir.path(), false)
            .plan(&file, "Images/Photos")
            .unwrap();
        assert_eq!(plan.target_dir, temp_dir.path().join("Images").join("Photos"));
    }

    #[test]
    fn test_plan_rejects_relative_segments() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.jpg");
        fs::write(&file, "x").unwrap();
        let planner = MovePlanner::new(temp_dir.path(), false);

        for category in ["..", ".", "Images/../..", "Images/./Photos"] {
            let err = planner.plan(&file, category).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{}", category);
        }
    }

    #[test]
    fn test_plan_date_sort() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("photo.jpg");
        fs::write(&file, "x").unwrap();
        let when = Local.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap();
        set_mtime(&file, when.into());

        let plan = MovePlanner::new(temp_dir.path(), true).plan(&file, "Images").unwrap();
        assert_eq!(
            plan.target_dir,
            temp_dir.path().join("Images").join("2023").join("January")
        );
    }

    #[test]
    fn test_plan_date_error_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("gone.jpg");

        let plan = MovePlanner::new(temp_dir.path(), true).plan(&missing, "Images").unwrap();
        assert_eq!(plan.target_dir, temp_dir.path().join("Images"));
        assert!(plan.date_error.is_some());
    }

    #[test]
    fn test_already_organized() {
        let temp_dir = TempDir::new().unwrap();
        let images = temp_dir.path().join("Images");
        fs::create_dir(&images).unwrap();
        let inside = images.join("a.jpg");
        let outside = temp_dir.path().join("b.jpg");
        fs::write(&inside, "x").unwrap();
        fs::write(&outside, "x").unwrap();

        assert!(is_already_organized(&inside, &images));
        assert!(!is_already_organized(&outside, &images));
        assert!(!is_already_organized(&outside, &temp_dir.path().join("Missing")));
    }

    #[test]
    fn test_move_no_clobber_renames_on_collision() {
        let temp_dir = TempDir::new().unwrap();
        let dest_dir = temp_dir.path().join("Documents");
        fs::create_dir(&dest_dir).unwrap();
        fs::write(dest_dir.join("report.txt"), "existing").unwrap();
        let source = temp_dir.path().join("report.txt");
        fs::write(&source, "new").unwrap();

        let landed = move_no_clobber(&source, &dest_dir.join("report.txt")).unwrap();
        assert_eq!(landed, dest_dir.join("report_1.txt"));
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(dest_dir.join("report.txt")).unwrap(), "existing");
        assert_eq!(fs::read_to_string(landed).unwrap(), "new");
    }

    #[test]
    fn test_move_no_clobber_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let result = move_no_clobber(
            &temp_dir.path().join("nope.txt"),
            &temp_dir.path().join("dest.txt"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_display_relative() {
        let root = Path::new("/data/root");
        assert_eq!(
            display_relative(Path::new("/data/root/Images/2023/a.jpg"), root),
            "Images/2023/a.jpg"
        );
        assert_eq!(display_relative(Path::new("/elsewhere/a.jpg"), root), "a.jpg");
    }
}
