//! Persistent settings.
//!
//! Settings are stored as JSON in the application data directory:
//!
//! ```json
//! {
//!   "theme_mode": "System",
//!   "ml_confidence": 0.3,
//!   "excluded_names": ["config.json"],
//!   "excluded_extensions": [".tmp"],
//!   "excluded_folders": ["node_modules", ".git"],
//!   "excluded_patterns": ["~$*"],
//!   "directories": { "Images": [".jpg", ".png"] },
//!   "content_categories": { "Documents/PDF": ["application/pdf"] }
//! }
//! ```
//!
//! Loading is tolerant: missing keys take their defaults, and an older file
//! holding only the category map is read as `directories`. Saving refuses
//! settings that do not pass [`Settings::validate`]. Import and export accept
//! the same structure as TOML when the path ends in `.toml`.

use crate::category::CategoryTable;
use crate::classifier::{SignatureClassifier, default_content_categories};
use crate::organizer::{DEFAULT_CONFIDENCE_THRESHOLD, Organizer};
use crate::scanner::ExclusionSet;
use crate::store::AppPaths;
use glob::Pattern;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Characters that cannot appear in a folder name on common filesystems.
const ILLEGAL_NAME_CHARS: &str = r#"[<>:"|?*\x00-\x1f]"#;

/// Errors that can occur while loading, saving or converting settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file exists but its content is not valid settings.
    #[error("invalid configuration in {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    /// The settings did not pass validation; nothing was written.
    #[error("configuration is invalid: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Everything the user can configure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub theme_mode: String,
    /// Minimum confidence a content classification must exceed.
    pub ml_confidence: f32,
    pub excluded_names: BTreeSet<String>,
    pub excluded_extensions: BTreeSet<String>,
    pub excluded_folders: BTreeSet<String>,
    /// Glob patterns matched against file names.
    pub excluded_patterns: Vec<String>,
    pub directories: CategoryTable,
    /// MIME types (or `type/*`) per content category.
    pub content_categories: BTreeMap<String, Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme_mode: "System".to_string(),
            ml_confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            excluded_names: AppPaths::file_names()
                .iter()
                .map(|name| name.to_string())
                .collect(),
            excluded_extensions: BTreeSet::new(),
            excluded_folders: BTreeSet::new(),
            excluded_patterns: Vec::new(),
            directories: CategoryTable::default(),
            content_categories: default_content_categories(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = read(path)?;
        Self::from_json(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Validates, then writes JSON to `path`.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        self.ensure_valid()?;
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        write(path, &json)
    }

    /// Writes the settings to an arbitrary path, as TOML for `.toml` paths
    /// and JSON otherwise.
    pub fn export(&self, path: &Path) -> ConfigResult<()> {
        if !is_toml(path) {
            return self.save(path);
        }
        self.ensure_valid()?;
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        write(path, &text)
    }

    /// Reads settings previously written by [`Settings::export`].
    pub fn import(path: &Path) -> ConfigResult<Self> {
        let content = read(path)?;
        let parsed = if is_toml(path) {
            toml::from_str(&content).map_err(|e| e.to_string())
        } else {
            Self::from_json(&content)
        };
        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    fn from_json(content: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;

        let is_legacy_map = value.get("directories").is_none()
            && value
                .as_object()
                .is_some_and(|map| !map.is_empty() && map.values().all(Value::is_array));
        if is_legacy_map {
            let directories: IndexMap<String, Vec<String>> =
                serde_json::from_value(value).map_err(|e| e.to_string())?;
            return Ok(Self {
                directories: directories.into(),
                ..Self::default()
            });
        }

        serde_json::from_value(value).map_err(|e| e.to_string())
    }

    /// Returns every problem with the settings as a readable message. An
    /// empty list means the settings can be saved.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let illegal = Regex::new(ILLEGAL_NAME_CHARS).ok();

        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (category, extensions) in self.directories.iter() {
            if category.trim().is_empty() {
                errors.push("Category name cannot be empty.".to_string());
            }
            if category.contains(['/', '\\']) {
                errors.push(format!(
                    "Category name '{}' cannot contain path separators.",
                    category
                ));
            } else if matches!(category.trim(), "." | "..") {
                errors.push(format!(
                    "Category name '{}' is not a valid folder name.",
                    category
                ));
            } else if illegal.as_ref().is_some_and(|re| re.is_match(category)) {
                errors.push(format!(
                    "Category name '{}' contains characters not allowed in folder names.",
                    category
                ));
            }

            for ext in extensions {
                if !ext.starts_with('.') {
                    errors.push(format!(
                        "Invalid extension '{}' in category '{}': Must start with '.'",
                        ext, category
                    ));
                }
                match seen.get(ext.as_str()) {
                    Some(other) => errors.push(format!(
                        "Duplicate extension '{}' found in '{}' and '{}'",
                        ext, category, other
                    )),
                    None => {
                        seen.insert(ext, category);
                    }
                }
            }
        }

        // Content categories may nest, but every level must be a plain name.
        for category in self.content_categories.keys() {
            let bad_segment = category
                .split(['/', '\\'])
                .any(|part| matches!(part.trim(), "" | "." | ".."));
            if bad_segment {
                errors.push(format!(
                    "Content category '{}' has an empty or relative folder segment.",
                    category
                ));
            }
        }

        for ext in &self.excluded_extensions {
            if !ext.starts_with('.') {
                errors.push(format!("Excluded extension '{}' must start with '.'", ext));
            }
        }

        for pattern in &self.excluded_patterns {
            if let Err(e) = Pattern::new(pattern) {
                errors.push(format!("Invalid exclusion pattern '{}': {}", pattern, e));
            }
        }

        if !(0.0..=1.0).contains(&self.ml_confidence) {
            errors.push(format!(
                "Confidence threshold {} must be between 0 and 1.",
                self.ml_confidence
            ));
        }

        errors
    }

    fn ensure_valid(&self) -> ConfigResult<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Compiles the exclusion rules for the scanner.
    pub fn exclusion_set(&self) -> ExclusionSet {
        ExclusionSet::new(
            self.excluded_names.iter().cloned(),
            self.excluded_extensions.iter().cloned(),
            self.excluded_folders.iter().cloned(),
            self.excluded_patterns.iter().cloned(),
        )
    }

    /// Builds an organizer with the built-in content classifier.
    pub fn organizer(&self) -> Organizer {
        Organizer::new(self.directories.clone(), self.exclusion_set())
            .with_classifier(Box::new(SignatureClassifier::new(
                self.content_categories.clone(),
            )))
            .with_confidence_threshold(self.ml_confidence)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

fn read(path: &Path) -> ConfigResult<String> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, content: &str) -> ConfigResult<()> {
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::write(path, content).map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_empty());
        assert_eq!(settings.ml_confidence, 0.3);
        assert!(settings.excluded_names.contains("config.json"));
        assert!(settings.excluded_names.contains("batch_config.json"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load(&temp_dir.path().join("config.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_missing_keys_fall_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"directories": {"Pics": [".png"]}, "excluded_folders": [".git"]}"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.directories.category_for_extension(".png"), Some("Pics"));
        assert_eq!(settings.directories.category_for_extension(".jpg"), None);
        assert!(settings.excluded_folders.contains(".git"));
        assert_eq!(settings.theme_mode, "System");
        assert_eq!(settings.ml_confidence, 0.3);
    }

    #[test]
    fn test_legacy_bare_map() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"Books": [".epub"], "Music": [".mp3"]}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.directories.len(), 2);
        assert_eq!(settings.directories.category_for_extension(".epub"), Some("Books"));
        assert!(settings.excluded_names.contains("config.json"));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validation_messages() {
        let mut settings = Settings::default();
        settings.directories.set_category("Bad/Name", &[".x1"]);
        settings.directories.set_category("Odd?", &[".x2"]);
        settings.directories.set_category("  ", &[".x3"]);
        settings.directories.set_category("NoDot", &["png"]);
        settings.directories.set_category("Pictures", &[".jpg"]);
        settings.excluded_patterns.push("[oops".to_string());
        settings.ml_confidence = 1.5;

        let errors = settings.validate();
        assert!(errors.contains(&"Category name 'Bad/Name' cannot contain path separators.".to_string()));
        assert!(errors.iter().any(|e| e.starts_with("Category name 'Odd?' contains characters")));
        assert!(errors.contains(&"Category name cannot be empty.".to_string()));
        assert!(errors.contains(&"Invalid extension 'png' in category 'NoDot': Must start with '.'".to_string()));
        assert!(errors.iter().any(|e| e.starts_with("Duplicate extension '.jpg'")));
        assert!(errors.iter().any(|e| e.starts_with("Invalid exclusion pattern '[oops'")));
        assert!(errors.iter().any(|e| e.starts_with("Confidence threshold")));
    }

    #[test]
    fn test_relative_category_names_are_rejected() {
        let mut settings = Settings::default();
        settings.directories.set_category("..", &[".x1"]);
        settings.directories.set_category(".", &[".x2"]);
        settings
            .content_categories
            .insert("Images/../..".to_string(), vec!["image/png".to_string()]);
        settings
            .content_categories
            .insert("Docs//Scans".to_string(), vec!["application/pdf".to_string()]);

        let errors = settings.validate();
        assert!(errors.contains(&"Category name '..' is not a valid folder name.".to_string()));
        assert!(errors.contains(&"Category name '.' is not a valid folder name.".to_string()));
        assert!(errors.contains(
            &"Content category 'Images/../..' has an empty or relative folder segment.".to_string()
        ));
        assert!(errors.iter().any(|e| e.starts_with("Content category 'Docs//Scans'")));
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_save_refuses_invalid_settings() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        let mut settings = Settings::default();
        settings.directories.set_category("Broken", &["txt"]);

        assert!(matches!(settings.save(&path), Err(ConfigError::Invalid(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        let mut settings = Settings::default();
        settings.excluded_folders.insert("node_modules".to_string());
        settings.theme_mode = "Dark".to_string();
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_export_import_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("profile.toml");
        let mut settings = Settings::default();
        settings.excluded_patterns.push("~$*".to_string());
        settings.directories.set_category("Fonts", &[".ttf", ".otf"]);
        settings.export(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[directories]"));
        assert_eq!(Settings::import(&path).unwrap(), settings);
    }

    #[test]
    fn test_import_bad_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("profile.toml");
        fs::write(&path, "directories = [").unwrap();
        assert!(Settings::import(&path).is_err());
        assert!(Settings::import(&temp_dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_exclusion_set_uses_settings() {
        let mut settings = Settings::default();
        settings.excluded_extensions.insert(".tmp".to_string());
        settings.excluded_patterns.push("~$*".to_string());
        let set = settings.exclusion_set();

        assert!(set.is_excluded_file(Path::new("config.json")));
        assert!(set.is_excluded_file(Path::new("draft.TMP")));
        assert!(set.is_excluded_file(Path::new("~$report.docx")));
        assert!(!set.is_excluded_file(Path::new("report.docx")));
    }
}
