/// Category table and category resolution.
///
/// This module maps files to the name of the category folder they belong in.
/// Extension lookup goes through a [`CategoryTable`]; content-based results
/// come from an injected [`ContentClassifier`] and take precedence when it is
/// confident.
///
/// # Examples
///
/// ```
/// use tidybox::category::{CategoryTable, OTHERS};
///
/// let table = CategoryTable::default();
/// assert_eq!(table.category_for_extension(".JPG"), Some("Images"));
/// assert_eq!(table.category_for_extension(".xyz"), None);
/// assert_eq!(OTHERS, "Others");
/// ```
use crate::classifier::ContentClassifier;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

/// Fallback category for extensions that no category claims.
///
/// Never stored in a [`CategoryTable`].
pub const OTHERS: &str = "Others";

/// How a [`ClassificationResult`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassificationMethod {
    /// Extension table lookup (or the `Others` fallback).
    Extension,
    /// Content classifier, document/text path.
    ContentText,
    /// Content classifier, image path.
    ContentImage,
    /// Content classifier ran but was not confident.
    Fallback,
    /// Content classifier is not loaded.
    ClassifierUnavailable,
}

impl ClassificationMethod {
    /// Returns true for results that should override extension matching.
    pub fn is_content(&self) -> bool {
        matches!(self, Self::ContentText | Self::ContentImage)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extension => "extension",
            Self::ContentText => "content-text",
            Self::ContentImage => "content-image",
            Self::Fallback => "fallback",
            Self::ClassifierUnavailable => "classifier-unavailable",
        }
    }
}

impl fmt::Display for ClassificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The category chosen for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Category name, possibly nested (`Images/Photos`).
    pub category: String,
    /// Confidence in `[0, 1]`; always 1.0 for extension results.
    pub confidence: f32,
    pub method: ClassificationMethod,
}

impl ClassificationResult {
    pub fn by_extension(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            confidence: 1.0,
            method: ClassificationMethod::Extension,
        }
    }

    /// Result returned by a classifier that declines to decide.
    pub fn fallback() -> Self {
        Self {
            category: OTHERS.to_string(),
            confidence: 0.0,
            method: ClassificationMethod::Fallback,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            category: OTHERS.to_string(),
            confidence: 0.0,
            method: ClassificationMethod::ClassifierUnavailable,
        }
    }
}

/// Ordered mapping from category name to the lowercase extensions it claims.
///
/// Categories keep the order they were added in, which is also the order they
/// are saved in. Each extension is expected to appear in at most one category.
/// This is not enforced on mutation; [`crate::config::Settings::validate`]
/// checks it before the table is saved. When duplicates exist the later
/// category wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "IndexMap<String, Vec<String>>", into = "IndexMap<String, Vec<String>>")]
pub struct CategoryTable {
    categories: IndexMap<String, Vec<String>>,
    index: HashMap<String, String>,
}

impl CategoryTable {
    /// Creates an empty table. Every file resolves to [`OTHERS`].
    pub fn empty() -> Self {
        Self::from(IndexMap::new())
    }

    /// Iterates `(category, extensions)` in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.categories
            .iter()
            .map(|(name, exts)| (name.as_str(), exts.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn extensions(&self, category: &str) -> Option<&[String]> {
        self.categories.get(category).map(Vec::as_slice)
    }

    /// Replaces (or creates) a category with the given extensions.
    ///
    /// Extensions are lowercased; no other normalization happens so that
    /// validation can still report malformed entries.
    pub fn set_category(&mut self, name: impl Into<String>, extensions: &[&str]) {
        let exts = extensions.iter().map(|e| e.to_lowercase()).collect();
        self.categories.insert(name.into(), exts);
        self.rebuild_index();
    }

    /// Appends one extension to an existing or new category.
    pub fn add_extension(&mut self, category: &str, extension: &str) {
        let ext = extension.to_lowercase();
        let exts = self.categories.entry(category.to_string()).or_default();
        if !exts.contains(&ext) {
            exts.push(ext);
        }
        self.rebuild_index();
    }

    pub fn remove_category(&mut self, name: &str) -> Option<Vec<String>> {
        let removed = self.categories.shift_remove(name);
        self.rebuild_index();
        removed
    }

    /// Looks up the category claiming `extension` (with leading dot, any case).
    pub fn category_for_extension(&self, extension: &str) -> Option<&str> {
        self.index
            .get(&extension.to_lowercase())
            .map(String::as_str)
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (name, exts) in &self.categories {
            for ext in exts {
                self.index.insert(ext.clone(), name.clone());
            }
        }
    }
}

impl From<IndexMap<String, Vec<String>>> for CategoryTable {
    fn from(categories: IndexMap<String, Vec<String>>) -> Self {
        let categories = categories
            .into_iter()
            .map(|(name, exts)| (name, exts.iter().map(|e| e.to_lowercase()).collect()))
            .collect();
        let mut table = Self {
            categories,
            index: HashMap::new(),
        };
        table.rebuild_index();
        table
    }
}

impl From<CategoryTable> for IndexMap<String, Vec<String>> {
    fn from(table: CategoryTable) -> Self {
        table.categories
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for (name, exts) in DEFAULT_CATEGORIES {
            table.set_category(*name, exts);
        }
        table
    }
}

const DEFAULT_CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Images",
        &[
            ".jpeg", ".jpg", ".tiff", ".gif", ".bmp", ".png", ".bpg", ".svg", ".heif", ".psd",
            ".webp",
        ],
    ),
    (
        "Videos",
        &[
            ".avi", ".flv", ".wmv", ".mov", ".mp4", ".webm", ".vob", ".mng", ".qt", ".mpg",
            ".mpeg", ".3gp", ".mkv",
        ],
    ),
    (
        "Documents",
        &[
            ".oxps", ".epub", ".pages", ".docx", ".doc", ".fdf", ".ods", ".odt", ".pwi", ".xsn",
            ".xps", ".dotx", ".docm", ".dox", ".rvg", ".rtf", ".rtfd", ".wpd", ".xls", ".xlsx",
            ".ppt", ".pptx", ".csv", ".pdf", ".txt", ".md",
        ],
    ),
    (
        "Archives",
        &[
            ".a", ".ar", ".cpio", ".iso", ".tar", ".gz", ".rz", ".7z", ".dmg", ".rar", ".xar",
            ".zip",
        ],
    ),
    (
        "Audio",
        &[
            ".aac", ".aa", ".dvf", ".m4a", ".m4b", ".m4p", ".mp3", ".msv", ".ogg", ".oga", ".raw",
            ".vox", ".wav", ".wma", ".flac",
        ],
    ),
    (
        "Code",
        &[
            ".py", ".js", ".html", ".css", ".php", ".c", ".cpp", ".h", ".java", ".cs", ".rs",
        ],
    ),
    ("Executables", &[".exe", ".msi", ".bat", ".sh"]),
];

/// Returns the lowercase extension of `path` with its leading dot, or an
/// empty string when there is none.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Decides the category for a file.
///
/// Pure with respect to the filesystem apart from whatever the classifier reads.
pub struct CategoryResolver<'a> {
    table: &'a CategoryTable,
    classifier: Option<&'a dyn ContentClassifier>,
}

impl<'a> CategoryResolver<'a> {
    pub fn new(table: &'a CategoryTable) -> Self {
        Self {
            table,
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Option<&'a dyn ContentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Resolves the category for `file_path`.
    ///
    /// A confident content result wins outright. Anything else, including a
    /// panicking classifier, falls through to the extension table.
    pub fn resolve(
        &self,
        file_path: &Path,
        use_content_classification: bool,
        confidence_threshold: f32,
    ) -> ClassificationResult {
        if use_content_classification
            && let Some(classifier) = self.classifier
        {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                classifier.classify(file_path, confidence_threshold)
            }));
            match outcome {
                Ok(result) if result.method.is_content() => return result,
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(
                        "content classifier panicked on {}, using extension",
                        file_path.display()
                    );
                }
            }
        }

        let ext = dotted_extension(file_path);
        let category = self.table.category_for_extension(&ext).unwrap_or(OTHERS);
        ClassificationResult::by_extension(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierError;

    struct FixedClassifier(ClassificationResult);

    impl ContentClassifier for FixedClassifier {
        fn are_models_present(&self) -> bool {
            true
        }
        fn is_loaded(&self) -> bool {
            true
        }
        fn load_models(&mut self, _progress: &mut dyn FnMut(f32, &str)) -> Result<(), ClassifierError> {
            Ok(())
        }
        fn classify(&self, _file_path: &Path, _threshold: f32) -> ClassificationResult {
            self.0.clone()
        }
    }

    struct PanickingClassifier;

    impl ContentClassifier for PanickingClassifier {
        fn are_models_present(&self) -> bool {
            true
        }
        fn is_loaded(&self) -> bool {
            true
        }
        fn load_models(&mut self, _progress: &mut dyn FnMut(f32, &str)) -> Result<(), ClassifierError> {
            Ok(())
        }
        fn classify(&self, _file_path: &Path, _threshold: f32) -> ClassificationResult {
            panic!("model exploded")
        }
    }

    #[test]
    fn test_extension_lookup_is_case_insensitive() {
        let table = CategoryTable::default();
        let resolver = CategoryResolver::new(&table);
        let result = resolver.resolve(Path::new("/tmp/HOLIDAY.JPG"), false, 0.3);
        assert_eq!(result.category, "Images");
        assert_eq!(result.method, ClassificationMethod::Extension);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_unknown_extension_goes_to_others() {
        let table = CategoryTable::default();
        let resolver = CategoryResolver::new(&table);
        assert_eq!(resolver.resolve(Path::new("c.xyz"), false, 0.3).category, OTHERS);
        assert_eq!(resolver.resolve(Path::new("Makefile"), false, 0.3).category, OTHERS);
    }

    #[test]
    fn test_content_result_wins_over_extension() {
        let table = CategoryTable::default();
        let classifier = FixedClassifier(ClassificationResult {
            category: "Documents/Financial".to_string(),
            confidence: 0.41,
            method: ClassificationMethod::ContentText,
        });
        let resolver = CategoryResolver::new(&table).with_classifier(Some(&classifier));

        let result = resolver.resolve(Path::new("invoice.jpg"), true, 0.3);
        assert_eq!(result.category, "Documents/Financial");
        assert_eq!(result.method, ClassificationMethod::ContentText);
    }

    #[test]
    fn test_content_ignored_when_disabled() {
        let table = CategoryTable::default();
        let classifier = FixedClassifier(ClassificationResult {
            category: "Images/Photos".to_string(),
            confidence: 0.9,
            method: ClassificationMethod::ContentImage,
        });
        let resolver = CategoryResolver::new(&table).with_classifier(Some(&classifier));
        assert_eq!(resolver.resolve(Path::new("a.jpg"), false, 0.3).category, "Images");
    }

    #[test]
    fn test_fallback_and_unavailable_use_extension() {
        let table = CategoryTable::default();
        for declined in [ClassificationResult::fallback(), ClassificationResult::unavailable()] {
            let classifier = FixedClassifier(declined);
            let resolver = CategoryResolver::new(&table).with_classifier(Some(&classifier));
            let result = resolver.resolve(Path::new("b.pdf"), true, 0.3);
            assert_eq!(result.category, "Documents");
            assert_eq!(result.method, ClassificationMethod::Extension);
        }
    }

    #[test]
    fn test_panicking_classifier_falls_back() {
        let table = CategoryTable::default();
        let classifier = PanickingClassifier;
        let resolver = CategoryResolver::new(&table).with_classifier(Some(&classifier));
        assert_eq!(resolver.resolve(Path::new("b.pdf"), true, 0.3).category, "Documents");
    }

    #[test]
    fn test_table_mutation_rebuilds_index() {
        let mut table = CategoryTable::default();
        table.set_category("Custom", &[".XYZ"]);
        assert_eq!(table.category_for_extension(".xyz"), Some("Custom"));

        table.add_extension("Custom", ".abc");
        assert_eq!(table.extensions("Custom"), Some(&[".xyz".to_string(), ".abc".to_string()][..]));

        table.remove_category("Custom");
        assert_eq!(table.category_for_extension(".xyz"), None);
    }

    #[test]
    fn test_table_serializes_as_plain_map() {
        let mut table = CategoryTable::empty();
        table.set_category("Docs", &[".pdf"]);
        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, r#"{"Docs":[".pdf"]}"#);

        let back: CategoryTable = serde_json::from_str(r#"{"Pics":[".PNG"]}"#).unwrap();
        assert_eq!(back.category_for_extension(".png"), Some("Pics"));
    }

    #[test]
    fn test_table_keeps_insertion_order_and_later_category_wins() {
        let mut table = CategoryTable::empty();
        table.set_category("Zips", &[".zip"]);
        table.set_category("Backups", &[".zip", ".bak"]);
        table.set_category("Art", &[".png"]);

        let names: Vec<_> = table.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["Zips", "Backups", "Art"]);
        assert_eq!(table.category_for_extension(".zip"), Some("Backups"));

        table.remove_category("Backups");
        let names: Vec<_> = table.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["Zips", "Art"]);
        assert_eq!(table.category_for_extension(".zip"), Some("Zips"));

        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, r#"{"Zips":[".zip"],"Art":[".png"]}"#);
        let back: CategoryTable = serde_json::from_str(r#"{"B":[".b"],"A":[".a"]}"#).unwrap();
        let names: Vec<_> = back.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["B", "A"]);
    }

    #[test]
    fn test_default_table_has_no_duplicate_extensions() {
        let table = CategoryTable::default();
        let mut seen = std::collections::HashSet::new();
        for (_, exts) in table.iter() {
            for ext in exts {
                assert!(seen.insert(ext.clone()), "duplicate {}", ext);
            }
        }
    }
}
