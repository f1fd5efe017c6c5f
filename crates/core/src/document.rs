// crates/core/src/document.rs
//! A document awaiting submission, and the local checks it must pass.

use std::fmt;
use std::path::Path;

use bytes::Bytes;

use crate::config::TrackerConfig;
use crate::error::ValidationError;

/// Document bytes plus the metadata the job service needs.
///
/// Kept in memory only: a document waiting on a password prompt is not
/// persisted, so it cannot survive a restart.
#[derive(Clone)]
pub struct Document {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl Document {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn pdf(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self::new(filename, "application/pdf", bytes)
    }

    /// Read a file from disk, guessing the content type from its extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let content_type = match extension_of(&filename).as_deref() {
            Some("pdf") => "application/pdf",
            _ => "application/octet-stream",
        };
        Ok(Self::new(filename, content_type, bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn extension(&self) -> Option<String> {
        extension_of(&self.filename)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Size and type constraints checked before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLimits {
    pub max_bytes: u64,
    pub content_types: Vec<String>,
    pub extensions: Vec<String>,
}

impl DocumentLimits {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            max_bytes: config.max_document_bytes,
            content_types: config.accepted_content_types.clone(),
            extensions: config
                .accepted_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// A document passes when it is non-empty, within the size cap, and
    /// matches either an accepted content type or an accepted extension.
    pub fn check(&self, document: &Document) -> Result<(), ValidationError> {
        if document.bytes.is_empty() {
            return Err(ValidationError::Empty {
                filename: document.filename.clone(),
            });
        }
        if document.size() > self.max_bytes {
            return Err(ValidationError::TooLarge {
                filename: document.filename.clone(),
                size: document.size(),
                max: self.max_bytes,
            });
        }
        let type_ok = self
            .content_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(document.content_type.trim()));
        let ext_ok = document
            .extension()
            .is_some_and(|ext| self.extensions.contains(&ext));
        if !type_ok && !ext_ok {
            return Err(ValidationError::UnsupportedType {
                filename: document.filename.clone(),
                content_type: document.content_type.clone(),
            });
        }
        Ok(())
    }
}

impl Default for DocumentLimits {
    fn default() -> Self {
        Self::from_config(&TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max: u64) -> DocumentLimits {
        DocumentLimits {
            max_bytes: max,
            ..DocumentLimits::default()
        }
    }

    #[test]
    fn test_accepts_pdf_within_limit() {
        let doc = Document::pdf("march.pdf", vec![b'%'; 2 * 1024 * 1024]);
        assert!(DocumentLimits::default().check(&doc).is_ok());
    }

    #[test]
    fn test_rejects_oversized() {
        let doc = Document::pdf("big.pdf", vec![0u8; 11]);
        assert!(matches!(
            limits(10).check(&doc),
            Err(ValidationError::TooLarge { size: 11, max: 10, .. })
        ));
    }

    #[test]
    fn test_rejects_empty() {
        let doc = Document::pdf("empty.pdf", Vec::new());
        assert!(matches!(
            limits(10).check(&doc),
            Err(ValidationError::Empty { .. })
        ));
    }

    #[test]
    fn test_extension_or_type_is_enough() {
        let generic_type = Document::new("scan.PDF", "application/octet-stream", vec![1u8]);
        assert!(limits(10).check(&generic_type).is_ok());

        let no_ext = Document::new("scan", "application/pdf", vec![1u8]);
        assert!(limits(10).check(&no_ext).is_ok());

        let wrong = Document::new("notes.txt", "text/plain", vec![1u8]);
        assert!(matches!(
            limits(10).check(&wrong),
            Err(ValidationError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_from_path_guesses_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stmt.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();
        let doc = Document::from_path(&path).unwrap();
        assert_eq!(doc.filename, "stmt.pdf");
        assert_eq!(doc.content_type, "application/pdf");
        assert_eq!(doc.size(), 8);
    }

    #[test]
    fn test_debug_omits_bytes() {
        let doc = Document::pdf("a.pdf", vec![7u8; 3]);
        let dbg = format!("{doc:?}");
        assert!(dbg.contains("size: 3"));
        assert!(!dbg.contains("bytes"));
    }
}
