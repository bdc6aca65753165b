//! Save-as stage: curated items to a training-format dataset.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::export::{encode, DatasetSink, ExportFormat};
use crate::paths::{timestamped_name, ArtifactRoot, PathResolver};
use crate::qa::GeneratedDocument;
use crate::store::Job;

use super::{StageExecutor, StageFailure, StageOutcome};

/// Converts a curated artifact into an export format. The file lands under
/// the final root; with `storage: "dataset"` it is additionally published
/// through the configured sink.
pub struct ExportExecutor {
    resolver: PathResolver,
    sink: Option<Arc<dyn DatasetSink>>,
}

impl ExportExecutor {
    pub fn new(resolver: PathResolver, sink: Option<Arc<dyn DatasetSink>>) -> Self {
        Self { resolver, sink }
    }
}

#[async_trait]
impl StageExecutor for ExportExecutor {
    async fn execute(&self, job: &Job) -> Result<StageOutcome, StageFailure> {
        let input = job
            .input_file
            .as_deref()
            .ok_or_else(|| StageFailure::Other("save-as job has no input".to_string()))?;

        let format_name = job
            .config
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("jsonl");
        let format = ExportFormat::parse(format_name)
            .ok_or_else(|| StageFailure::UnknownFormat(format_name.to_string()))?;
        let storage = job
            .config
            .get("storage")
            .and_then(|v| v.as_str())
            .unwrap_or("local");

        let input_path = self.resolver.resolve(input, ArtifactRoot::Cleaned)?;
        let raw = tokio::fs::read_to_string(&input_path).await?;
        let document = GeneratedDocument::from_json(serde_json::from_str(&raw)?)?;

        let payload = encode(&document.items, format)
            .map_err(|e| StageFailure::Other(e.to_string()))?;

        let stem = std::path::Path::new(input)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset");
        let name = timestamped_name(&format!("{stem}_{format}"), format.extension());
        let output_path = self.resolver.resolve(&name, ArtifactRoot::Final)?;
        tokio::fs::write(&output_path, &payload).await?;

        if storage == "dataset" {
            let sink = self.sink.as_ref().ok_or_else(|| {
                StageFailure::Other("dataset storage requested but no sink configured".to_string())
            })?;
            sink.publish(&name, format, &payload)
                .await
                .map_err(|e| StageFailure::Other(e.to_string()))?;
        }

        let output_file = self
            .resolver
            .relative_logical(&output_path, ArtifactRoot::Final);
        info!(
            job_id = %job.id,
            output = %output_file,
            format = %format,
            storage,
            items = document.items.len(),
            "export complete"
        );

        Ok(StageOutcome {
            output_file,
            stats: serde_json::json!({
                "format": format.as_str(),
                "storage": storage,
                "items": document.items.len(),
                "sha256": crate::utils::checksum::sha256_hex(payload.as_bytes()),
            }),
        })
    }
}
