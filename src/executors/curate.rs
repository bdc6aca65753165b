//! Curate stage: generated items to quality-filtered items.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::CurationConfig;
use crate::curate::{CurationScorer, ScoringError};
use crate::llm::LlmProvider;
use crate::paths::{timestamped_name, ArtifactRoot, PathResolver};
use crate::qa::GeneratedDocument;
use crate::store::Job;

use super::{StageExecutor, StageFailure, StageOutcome};

/// Scores a generated artifact and writes the retained items to the cleaned
/// root.
pub struct CurateExecutor {
    resolver: PathResolver,
    provider: Arc<dyn LlmProvider>,
    model: String,
    defaults: CurationConfig,
}

impl CurateExecutor {
    pub fn new(
        resolver: PathResolver,
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        defaults: CurationConfig,
    ) -> Self {
        Self {
            resolver,
            provider,
            model: model.into(),
            defaults,
        }
    }
}

#[async_trait]
impl StageExecutor for CurateExecutor {
    async fn execute(&self, job: &Job) -> Result<StageOutcome, StageFailure> {
        let input = job
            .input_file
            .as_deref()
            .ok_or_else(|| StageFailure::Other("curate job has no input".to_string()))?;

        let threshold = job
            .config
            .get("threshold")
            .and_then(|v| v.as_f64())
            .unwrap_or(self.defaults.threshold)
            .clamp(0.0, 10.0);
        let batch_size = job
            .config
            .get("batch_size")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(self.defaults.batch_size);

        let input_path = self.resolver.resolve(input, ArtifactRoot::Generated)?;
        let raw = tokio::fs::read_to_string(&input_path).await?;
        let document = GeneratedDocument::from_json(serde_json::from_str(&raw)?)?;

        let scorer = CurationScorer::new(
            Arc::clone(&self.provider),
            &self.model,
            self.defaults.temperature,
            batch_size,
        );
        let outcome = scorer
            .score_and_filter(document.items, threshold)
            .await
            .map_err(|e: ScoringError| StageFailure::ScoringUnavailable(e.to_string()))?;

        let stem = std::path::Path::new(input)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let name = timestamped_name(&format!("{stem}_curated"), "json");
        let output_path = self.resolver.resolve(&name, ArtifactRoot::Cleaned)?;

        let curated = GeneratedDocument {
            summary: document.summary,
            items: outcome.retained,
        };
        let payload = serde_json::to_string_pretty(&curated)?;
        tokio::fs::write(&output_path, &payload).await?;

        let output_file = self
            .resolver
            .relative_logical(&output_path, ArtifactRoot::Cleaned);
        info!(
            job_id = %job.id,
            output = %output_file,
            original = outcome.summary.original_count,
            curated = outcome.summary.curated_count,
            threshold,
            "curation complete"
        );

        let mut stats = serde_json::to_value(&outcome.summary)?;
        stats["sha256"] = serde_json::Value::String(crate::utils::checksum::sha256_hex(
            payload.as_bytes(),
        ));

        Ok(StageOutcome {
            output_file,
            stats,
        })
    }
}
