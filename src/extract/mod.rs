//! Source detection and text extraction.
//!
//! Each supported source kind maps to a [`TextExtractor`] implementation in a
//! registry. Plain text is built in; richer extractors (PDF, HTML, video
//! transcripts) are injected by the embedding application.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// The kinds of sources the ingest stage can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    PlainText,
    Pdf,
    Html,
    Docx,
    Pptx,
    Url,
    VideoUrl,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SourceKind::PlainText => "text",
            SourceKind::Pdf => "pdf",
            SourceKind::Html => "html",
            SourceKind::Docx => "docx",
            SourceKind::Pptx => "pptx",
            SourceKind::Url => "url",
            SourceKind::VideoUrl => "video",
        };
        f.write_str(name)
    }
}

/// Classifies a source string by URL scheme or file extension.
/// Returns `None` for unrecognized extensions.
pub fn detect(source: &str) -> Option<SourceKind> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let lowered = source.to_lowercase();
        if lowered.contains("youtube.com") || lowered.contains("youtu.be") || lowered.contains("vimeo.com")
        {
            return Some(SourceKind::VideoUrl);
        }
        return Some(SourceKind::Url);
    }

    let ext = Path::new(source).extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "txt" | "md" => Some(SourceKind::PlainText),
        "pdf" => Some(SourceKind::Pdf),
        "html" | "htm" => Some(SourceKind::Html),
        "docx" => Some(SourceKind::Docx),
        "pptx" => Some(SourceKind::Pptx),
        _ => None,
    }
}

#[derive(Debug, Error)]
#[error("Extraction failed: {0}")]
pub struct ExtractionError(pub String);

/// Extracts plain text from a source. `source` is a real filesystem path for
/// file kinds and the URL itself for URL kinds.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, source: &str) -> Result<String, ExtractionError>;
}

/// Reads `.txt` / `.md` files verbatim.
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, source: &str) -> Result<String, ExtractionError> {
        tokio::fs::read_to_string(source)
            .await
            .map_err(|e| ExtractionError(format!("failed to read {source}: {e}")))
    }
}

/// Maps source kinds to extractor implementations.
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<SourceKind, Arc<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    /// Registry with only the built-in plain-text extractor.
    pub fn new() -> Self {
        let mut extractors: HashMap<SourceKind, Arc<dyn TextExtractor>> = HashMap::new();
        extractors.insert(SourceKind::PlainText, Arc::new(PlainTextExtractor));
        Self { extractors }
    }

    pub fn register(&mut self, kind: SourceKind, extractor: Arc<dyn TextExtractor>) {
        self.extractors.insert(kind, extractor);
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn TextExtractor>> {
        self.extractors.get(&kind).cloned()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_file_kinds() {
        assert_eq!(detect("doc.txt"), Some(SourceKind::PlainText));
        assert_eq!(detect("notes.MD"), Some(SourceKind::PlainText));
        assert_eq!(detect("paper.pdf"), Some(SourceKind::Pdf));
        assert_eq!(detect("page.html"), Some(SourceKind::Html));
        assert_eq!(detect("deck.pptx"), Some(SourceKind::Pptx));
        assert_eq!(detect("report.docx"), Some(SourceKind::Docx));
    }

    #[test]
    fn test_detect_unknown_extension() {
        assert_eq!(detect("archive.zip"), None);
        assert_eq!(detect("noextension"), None);
    }

    #[test]
    fn test_detect_urls() {
        assert_eq!(detect("https://example.com/page"), Some(SourceKind::Url));
        assert_eq!(
            detect("https://www.youtube.com/watch?v=abc123"),
            Some(SourceKind::VideoUrl)
        );
        assert_eq!(detect("https://youtu.be/abc123"), Some(SourceKind::VideoUrl));
        assert_eq!(
            detect("https://vimeo.com/12345"),
            Some(SourceKind::VideoUrl)
        );
    }

    #[tokio::test]
    async fn test_plain_text_extractor() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "hello world").unwrap();

        let registry = ExtractorRegistry::new();
        let extractor = registry.get(SourceKind::PlainText).unwrap();
        let text = extractor.extract(path.to_str().unwrap()).await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        let extractor = PlainTextExtractor;
        let err = extractor.extract("/nonexistent/doc.txt").await.unwrap_err();
        assert!(err.to_string().contains("doc.txt"));
    }
}
