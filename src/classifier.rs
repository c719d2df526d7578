/// Content-based classification.
///
/// The organizer never reaches for ambient classifier state: a
/// [`ContentClassifier`] is handed to it explicitly, and tests substitute
/// their own. [`SignatureClassifier`] is the built-in implementation; it sniffs
/// magic bytes with `infer` and maps the detected MIME type onto the
/// configured content categories.
use crate::category::{ClassificationMethod, ClassificationResult};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Bytes read from the head of a file for signature detection.
const SNIFF_LEN: u64 = 8192;

/// Confidence for an exact MIME type match.
pub const EXACT_MATCH_CONFIDENCE: f32 = 0.9;
/// Confidence for a `type/*` wildcard match.
pub const WILDCARD_MATCH_CONFIDENCE: f32 = 0.6;

/// Errors raised while initializing a classifier.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier models are not available: {0}")]
    ModelsMissing(String),
    #[error("invalid content category '{category}': {reason}")]
    InvalidCategory { category: String, reason: String },
}

/// Interface to an external content classifier.
///
/// `classify` must never fail: problems are reported as a
/// [`ClassificationMethod::Fallback`] result.
pub trait ContentClassifier {
    /// Whether the models can be loaded without a download.
    fn are_models_present(&self) -> bool;

    fn is_loaded(&self) -> bool;

    /// Loads the models. `progress` receives `(fraction, message)`.
    fn load_models(&mut self, progress: &mut dyn FnMut(f32, &str))
    -> Result<(), ClassifierError>;

    fn classify(&self, file_path: &Path, threshold: f32) -> ClassificationResult;
}

/// Default MIME patterns per content category.
pub fn default_content_categories() -> BTreeMap<String, Vec<String>> {
    let entries: &[(&str, &[&str])] = &[
        (
            "Images/Photos",
            &["image/jpeg", "image/heif", "image/x-canon-cr2", "image/tiff"],
        ),
        (
            "Images/Graphics",
            &["image/png", "image/gif", "image/webp", "image/bmp", "image/vnd.adobe.photoshop"],
        ),
        ("Images", &["image/*"]),
        ("Documents/PDF", &["application/pdf"]),
        (
            "Documents/Office",
            &[
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "application/vnd.ms-excel",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "application/vnd.ms-powerpoint",
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                "application/vnd.oasis.opendocument.text",
            ],
        ),
        ("Documents/Ebooks", &["application/epub+zip"]),
    ];
    entries
        .iter()
        .map(|(name, mimes)| {
            (
                name.to_string(),
                mimes.iter().map(|m| m.to_string()).collect(),
            )
        })
        .collect()
}

/// Magic-byte classifier backed by the `infer` crate.
#[derive(Debug, Clone)]
pub struct SignatureClassifier {
    categories: BTreeMap<String, Vec<String>>,
    exact: BTreeMap<String, String>,
    wildcard: BTreeMap<String, String>,
    loaded: bool,
}

impl SignatureClassifier {
    pub fn new(categories: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            categories,
            exact: BTreeMap::new(),
            wildcard: BTreeMap::new(),
            loaded: false,
        }
    }

    fn detect_mime(file_path: &Path) -> Option<String> {
        let mut head = Vec::with_capacity(SNIFF_LEN as usize);
        File::open(file_path)
            .and_then(|f| f.take(SNIFF_LEN).read_to_end(&mut head))
            .ok()?;
        infer::get(&head).map(|kind| kind.mime_type().to_string())
    }

    fn lookup(&self, mime: &str) -> Option<(&str, f32)> {
        if let Some(category) = self.exact.get(mime) {
            return Some((category.as_str(), EXACT_MATCH_CONFIDENCE));
        }
        let top_level = mime.split('/').next()?;
        self.wildcard
            .get(top_level)
            .map(|category| (category.as_str(), WILDCARD_MATCH_CONFIDENCE))
    }
}

impl Default for SignatureClassifier {
    fn default() -> Self {
        Self::new(default_content_categories())
    }
}

impl ContentClassifier for SignatureClassifier {
    fn are_models_present(&self) -> bool {
        true
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn load_models(
        &mut self,
        progress: &mut dyn FnMut(f32, &str),
    ) -> Result<(), ClassifierError> {
        if self.loaded {
            progress(1.0, "Signatures already loaded.");
            return Ok(());
        }

        progress(0.1, "Building signature table...");
        let mut exact = BTreeMap::new();
        let mut wildcard = BTreeMap::new();
        for (category, patterns) in &self.categories {
            if category.trim().is_empty() {
                return Err(ClassifierError::InvalidCategory {
                    category: category.clone(),
                    reason: "name is empty".to_string(),
                });
            }
            for pattern in patterns {
                let pattern = pattern.to_lowercase();
                match pattern.strip_suffix("/*") {
                    Some(top_level) => {
                        wildcard.insert(top_level.to_string(), category.clone());
                    }
                    None if pattern.contains('/') => {
                        exact.insert(pattern, category.clone());
                    }
                    None => {
                        return Err(ClassifierError::InvalidCategory {
                            category: category.clone(),
                            reason: format!("'{}' is not a MIME type", pattern),
                        });
                    }
                }
            }
        }

        self.exact = exact;
        self.wildcard = wildcard;
        self.loaded = true;
        progress(1.0, "Signatures loaded.");
        Ok(())
    }

    fn classify(&self, file_path: &Path, threshold: f32) -> ClassificationResult {
        if !self.loaded {
            return ClassificationResult::unavailable();
        }

        let Some(mime) = Self::detect_mime(file_path) else {
            return ClassificationResult::fallback();
        };

        match self.lookup(&mime) {
            Some((category, confidence)) if confidence > threshold => {
                let method = if mime.starts_with("image/") {
                    ClassificationMethod::ContentImage
                } else {
                    ClassificationMethod::ContentText
                };
                ClassificationResult {
                    category: category.to_string(),
                    confidence,
                    method,
                }
            }
            _ => ClassificationResult::fallback(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PNG_HEADER: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52,
    ];
    const PDF_HEADER: &[u8] = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n";
    const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];

    fn loaded() -> SignatureClassifier {
        let mut classifier = SignatureClassifier::default();
        classifier.load_models(&mut |_, _| {}).unwrap();
        classifier
    }

    #[test]
    fn test_classify_before_load_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.png");
        fs::write(&path, PNG_HEADER).unwrap();

        let classifier = SignatureClassifier::default();
        assert_eq!(
            classifier.classify(&path, 0.3).method,
            ClassificationMethod::ClassifierUnavailable
        );
    }

    #[test]
    fn test_load_reports_progress() {
        let mut classifier = SignatureClassifier::default();
        let mut fractions = Vec::new();
        classifier
            .load_models(&mut |fraction, _| fractions.push(fraction))
            .unwrap();
        assert!(classifier.is_loaded());
        assert_eq!(fractions.last(), Some(&1.0));
    }

    #[test]
    fn test_classify_image_by_signature() {
        let temp_dir = TempDir::new().unwrap();
        // Misleading extension: the content decides.
        let path = temp_dir.path().join("scan.dat");
        fs::write(&path, JPEG_HEADER).unwrap();

        let result = loaded().classify(&path, 0.3);
        assert_eq!(result.category, "Images/Photos");
        assert_eq!(result.method, ClassificationMethod::ContentImage);
        assert_eq!(result.confidence, EXACT_MATCH_CONFIDENCE);
    }

    #[test]
    fn test_classify_document_by_signature() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("report");
        fs::write(&path, PDF_HEADER).unwrap();

        let result = loaded().classify(&path, 0.3);
        assert_eq!(result.category, "Documents/PDF");
        assert_eq!(result.method, ClassificationMethod::ContentText);
    }

    #[test]
    fn test_wildcard_match_respects_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.png");
        fs::write(&path, PNG_HEADER).unwrap();

        let mut categories = BTreeMap::new();
        categories.insert("Pictures".to_string(), vec!["image/*".to_string()]);
        let mut classifier = SignatureClassifier::new(categories);
        classifier.load_models(&mut |_, _| {}).unwrap();

        assert_eq!(classifier.classify(&path, 0.3).category, "Pictures");
        assert_eq!(
            classifier.classify(&path, 0.7).method,
            ClassificationMethod::Fallback
        );
    }

    #[test]
    fn test_unknown_content_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.txt");
        fs::write(&path, "just some words").unwrap();

        assert_eq!(loaded().classify(&path, 0.3).method, ClassificationMethod::Fallback);
        assert_eq!(
            loaded().classify(&temp_dir.path().join("missing"), 0.3).method,
            ClassificationMethod::Fallback
        );
    }

    #[test]
    fn test_malformed_pattern_fails_load() {
        let mut categories = BTreeMap::new();
        categories.insert("Broken".to_string(), vec!["png".to_string()]);
        let mut classifier = SignatureClassifier::new(categories);
        assert!(classifier.load_models(&mut |_, _| {}).is_err());
        assert!(!classifier.is_loaded());
    }
}
