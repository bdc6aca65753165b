//! Ingest stage: source document or URL to extracted plain text.

use async_trait::async_trait;
use tracing::info;

use crate::extract::{detect, ExtractorRegistry, SourceKind};
use crate::paths::{timestamped_name, ArtifactRoot, PathResolver};
use crate::store::Job;

use super::{StageExecutor, StageFailure, StageOutcome};

/// Extracts text from the job's input source into the output root.
pub struct IngestExecutor {
    resolver: PathResolver,
    extractors: ExtractorRegistry,
}

impl IngestExecutor {
    pub fn new(resolver: PathResolver, extractors: ExtractorRegistry) -> Self {
        Self {
            resolver,
            extractors,
        }
    }
}

#[async_trait]
impl StageExecutor for IngestExecutor {
    async fn execute(&self, job: &Job) -> Result<StageOutcome, StageFailure> {
        let source = job
            .input_file
            .as_deref()
            .ok_or_else(|| StageFailure::Other("ingest job has no input".to_string()))?;

        let kind = detect(source)
            .ok_or_else(|| StageFailure::UnsupportedFormat(source.to_string()))?;
        let extractor = self
            .extractors
            .get(kind)
            .ok_or_else(|| {
                StageFailure::UnsupportedFormat(format!("no extractor registered for {kind}"))
            })?;

        // File sources are sandboxed under uploads; URLs pass through as-is.
        let target = match kind {
            SourceKind::Url | SourceKind::VideoUrl => source.to_string(),
            _ => self
                .resolver
                .resolve(source, ArtifactRoot::Uploads)?
                .display()
                .to_string(),
        };

        let text = extractor
            .extract(&target)
            .await
            .map_err(|e| StageFailure::ExtractionFailure(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(StageFailure::ExtractionFailure(format!(
                "no text extracted from {source}"
            )));
        }

        let name = timestamped_name(&format!("processed_{}", source_slug(source, kind)), "txt");
        let output_path = self.resolver.resolve(&name, ArtifactRoot::Output)?;
        tokio::fs::write(&output_path, &text).await?;

        let output_file = self.resolver.relative_logical(&output_path, ArtifactRoot::Output);
        info!(job_id = %job.id, source = %source, output = %output_file, chars = text.len(), "ingest complete");

        Ok(StageOutcome {
            output_file,
            stats: serde_json::json!({
                "source_kind": kind.to_string(),
                "characters": text.len(),
                "sha256": crate::utils::checksum::sha256_hex(text.as_bytes()),
            }),
        })
    }
}

/// A short, filesystem-safe slug identifying the source.
fn source_slug(source: &str, kind: SourceKind) -> String {
    let raw = match kind {
        SourceKind::VideoUrl => source
            .split("v=")
            .nth(1)
            .map(|rest| rest.split('&').next().unwrap_or(rest))
            .or_else(|| source.rsplit('/').next())
            .unwrap_or(source)
            .to_string(),
        SourceKind::Url => source
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string(),
        _ => std::path::Path::new(source)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string(),
    };

    let slug: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    slug.chars().take(30).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractionError, TextExtractor};
    use crate::store::{JobStatus, JobType};
    use std::sync::Arc;
    use uuid::Uuid;

    fn job(input: &str) -> Job {
        let now = chrono::Utc::now();
        Job {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            job_type: JobType::Ingest,
            status: JobStatus::Running,
            input_file: Some(input.to_string()),
            output_file: None,
            config: serde_json::json!({}),
            stats: None,
            error: None,
            created_at: now,
            updated_at: now,
            heartbeat_at: None,
        }
    }

    fn executor() -> (tempfile::TempDir, IngestExecutor, PathResolver) {
        let dir = tempfile::TempDir::new().unwrap();
        let resolver = PathResolver::new(dir.path());
        resolver.ensure_roots().unwrap();
        let executor = IngestExecutor::new(resolver.clone(), ExtractorRegistry::new());
        (dir, executor, resolver)
    }

    #[tokio::test]
    async fn test_ingest_plain_text() {
        let (_dir, executor, resolver) = executor();
        std::fs::write(
            resolver.root_dir(ArtifactRoot::Uploads).join("notes.txt"),
            "Some document text.",
        )
        .unwrap();

        let outcome = executor.execute(&job("notes.txt")).await.unwrap();
        assert!(outcome.output_file.starts_with("output/processed_notes_"));
        assert_eq!(outcome.stats["characters"], 19);

        let written = resolver
            .resolve(&outcome.output_file, ArtifactRoot::Output)
            .unwrap();
        assert_eq!(std::fs::read_to_string(written).unwrap(), "Some document text.");
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let (_dir, executor, _resolver) = executor();
        let err = executor.execute(&job("archive.zip")).await.unwrap_err();
        assert!(matches!(err, StageFailure::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_no_extractor_for_kind() {
        let (_dir, executor, _resolver) = executor();
        // pdf detected, but no pdf extractor registered
        let err = executor.execute(&job("paper.pdf")).await.unwrap_err();
        assert!(matches!(err, StageFailure::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (_dir, executor, _resolver) = executor();
        let err = executor.execute(&job("../../etc/passwd.txt")).await.unwrap_err();
        assert!(matches!(err, StageFailure::Path(_)));
    }

    #[tokio::test]
    async fn test_empty_extraction_fails() {
        let (_dir, executor, resolver) = executor();
        std::fs::write(
            resolver.root_dir(ArtifactRoot::Uploads).join("empty.txt"),
            "   \n",
        )
        .unwrap();

        let err = executor.execute(&job("empty.txt")).await.unwrap_err();
        assert!(matches!(err, StageFailure::ExtractionFailure(_)));
    }

    #[tokio::test]
    async fn test_url_extractor_receives_url() {
        struct UrlEcho;
        #[async_trait]
        impl TextExtractor for UrlEcho {
            async fn extract(&self, source: &str) -> Result<String, ExtractionError> {
                Ok(format!("fetched: {source}"))
            }
        }

        let (_dir, mut executor, _resolver) = executor();
        executor
            .extractors
            .register(crate::extract::SourceKind::Url, Arc::new(UrlEcho));

        let outcome = executor
            .execute(&job("https://example.com/page"))
            .await
            .unwrap();
        assert_eq!(outcome.stats["source_kind"], "url");
    }

    #[test]
    fn test_source_slug() {
        assert_eq!(source_slug("dir/report.pdf", SourceKind::Pdf), "report");
        assert_eq!(
            source_slug("https://www.youtube.com/watch?v=abc123&t=4", SourceKind::VideoUrl),
            "abc123"
        );
        let url_slug = source_slug("https://example.com/a/b", SourceKind::Url);
        assert!(url_slug.starts_with("example_com"));
        assert!(url_slug.len() <= 30);
    }
}
