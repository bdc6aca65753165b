//! Pipeline coordination.
//!
//! The coordinator validates stage preconditions before any job row is
//! created: each stage must consume the completed output of its upstream
//! stage. Invalid submissions are rejected up front and leave no trace in
//! the store.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::export::ExportFormat;
use crate::extract::detect;
use crate::paths::{ArtifactRoot, PathResolver, PathViolation};
use crate::runner::TaskRunner;
use crate::store::{Job, JobStore, JobStatus, JobType, StoreError};

/// Errors from pipeline job submission.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The input artifact does not satisfy the stage's upstream requirement.
    #[error("InvalidPipelineTransition: {0}")]
    InvalidPipelineTransition(String),

    #[error("UnknownFormat: {0}")]
    UnknownFormat(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("PathViolation: {0}")]
    Path(#[from] PathViolation),
}

/// Submits jobs in dependency order and delegates execution to the runner.
pub struct PipelineCoordinator {
    store: JobStore,
    runner: Arc<TaskRunner>,
    resolver: PathResolver,
}

impl PipelineCoordinator {
    pub fn new(store: JobStore, runner: Arc<TaskRunner>, resolver: PathResolver) -> Self {
        Self {
            store,
            runner,
            resolver,
        }
    }

    /// Submits an ingest job for a source file (under uploads) or URL.
    pub async fn submit_ingest(
        &self,
        project_id: Uuid,
        source: &str,
        config: serde_json::Value,
    ) -> Result<Job, PipelineError> {
        detect(source).ok_or_else(|| {
            PipelineError::InvalidPipelineTransition(format!("unsupported source: {source}"))
        })?;

        // File sources must resolve inside the uploads sandbox before a row
        // is created; URLs pass through.
        if !source.starts_with("http://") && !source.starts_with("https://") {
            self.resolver.resolve(source, ArtifactRoot::Uploads)?;
        }

        self.submit(project_id, JobType::Ingest, source, config).await
    }

    /// Submits a create job consuming a completed ingest output.
    pub async fn submit_create(
        &self,
        project_id: Uuid,
        input_file: &str,
        config: serde_json::Value,
    ) -> Result<Job, PipelineError> {
        self.require_upstream(input_file, JobType::Create).await?;
        self.submit(project_id, JobType::Create, input_file, config).await
    }

    /// Submits a curate job consuming a completed create output.
    pub async fn submit_curate(
        &self,
        project_id: Uuid,
        input_file: &str,
        config: serde_json::Value,
    ) -> Result<Job, PipelineError> {
        self.require_upstream(input_file, JobType::Curate).await?;
        self.submit(project_id, JobType::Curate, input_file, config).await
    }

    /// Submits a save-as job consuming a completed curate output.
    pub async fn submit_save_as(
        &self,
        project_id: Uuid,
        input_file: &str,
        config: serde_json::Value,
    ) -> Result<Job, PipelineError> {
        if let Some(format) = config.get("format").and_then(|v| v.as_str()) {
            if ExportFormat::parse(format).is_none() {
                return Err(PipelineError::UnknownFormat(format.to_string()));
            }
        }
        self.require_upstream(input_file, JobType::SaveAs).await?;
        self.submit(project_id, JobType::SaveAs, input_file, config).await
    }

    /// Submits a curate job against the project's most recent completed
    /// create output.
    pub async fn submit_curate_auto(
        &self,
        project_id: Uuid,
        config: serde_json::Value,
    ) -> Result<Job, PipelineError> {
        let upstream = self.latest_upstream(project_id, JobType::Create).await?;
        self.submit_curate(project_id, &upstream, config).await
    }

    /// Submits a save-as job against the project's most recent completed
    /// curate output.
    pub async fn submit_save_as_auto(
        &self,
        project_id: Uuid,
        config: serde_json::Value,
    ) -> Result<Job, PipelineError> {
        let upstream = self.latest_upstream(project_id, JobType::Curate).await?;
        self.submit_save_as(project_id, &upstream, config).await
    }

    /// Cancels a job. Returns true when the job was still pending and will
    /// never start; running and terminal jobs are unaffected.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool, PipelineError> {
        let job = self.store.get(job_id).await?;
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        self.runner.cancel(job_id);
        Ok(true)
    }

    /// Previews the output artifact of a completed job: the first `limit`
    /// items for generated/curated artifacts, the first `limit` lines
    /// otherwise.
    pub async fn preview(
        &self,
        job_id: Uuid,
        limit: usize,
    ) -> Result<serde_json::Value, PipelineError> {
        let job = self.store.get(job_id).await?;
        let output = match (&job.status, &job.output_file) {
            (JobStatus::Completed, Some(output)) => output.clone(),
            _ => {
                return Err(PipelineError::InvalidPipelineTransition(format!(
                    "job {job_id} is {} and has no output to preview",
                    job.status
                )))
            }
        };

        let root = output_root(job.job_type);
        let path = self.resolver.resolve(&output, root)?;
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            PipelineError::InvalidPipelineTransition(format!(
                "output artifact {output} unreadable: {e}"
            ))
        })?;

        match job.job_type {
            JobType::Create | JobType::Curate => {
                let document = serde_json::from_str::<serde_json::Value>(&raw)
                    .map_err(StoreError::Serialization)
                    .and_then(|v| {
                        crate::qa::GeneratedDocument::from_json(v)
                            .map_err(StoreError::Serialization)
                    })?;
                Ok(serde_json::json!({
                    "output_file": output,
                    "summary": document.summary,
                    "total_items": document.items.len(),
                    "items": document.items.iter().take(limit).collect::<Vec<_>>(),
                }))
            }
            JobType::Ingest | JobType::SaveAs => {
                let lines: Vec<&str> = raw.lines().take(limit).collect();
                Ok(serde_json::json!({
                    "output_file": output,
                    "total_lines": raw.lines().count(),
                    "lines": lines,
                }))
            }
        }
    }

    /// Runs stale-job reconciliation now.
    pub async fn reconcile(&self) -> Result<crate::runner::ReconcileReport, PipelineError> {
        self.runner
            .reconcile()
            .await
            .map_err(|e| match e {
                crate::runner::RunnerError::Store(s) => PipelineError::Store(s),
                other => PipelineError::InvalidPipelineTransition(other.to_string()),
            })
    }

    async fn submit(
        &self,
        project_id: Uuid,
        job_type: JobType,
        input_file: &str,
        config: serde_json::Value,
    ) -> Result<Job, PipelineError> {
        let job = self
            .store
            .create(project_id, job_type, Some(input_file), config)
            .await?;
        self.runner.enqueue(job.id);
        info!(job_id = %job.id, job_type = %job_type, input = %input_file, "job submitted");
        Ok(job)
    }

    /// Verifies `input_file` is the output of a completed job of the stage
    /// upstream of `job_type`.
    async fn require_upstream(
        &self,
        input_file: &str,
        job_type: JobType,
    ) -> Result<(), PipelineError> {
        let expected = match job_type.expected_upstream() {
            Some(upstream) => upstream,
            None => return Ok(()),
        };

        let producer = self
            .store
            .find_by_output(input_file)
            .await?
            .ok_or_else(|| {
                PipelineError::InvalidPipelineTransition(format!(
                    "{input_file} is not the output of any job; {job_type} requires a completed {expected} output"
                ))
            })?;

        if producer.job_type != expected {
            return Err(PipelineError::InvalidPipelineTransition(format!(
                "{input_file} was produced by a {} job; {job_type} requires a {expected} output",
                producer.job_type
            )));
        }
        if producer.status != JobStatus::Completed {
            return Err(PipelineError::InvalidPipelineTransition(format!(
                "{input_file} comes from a {} {} job; {job_type} requires a completed one",
                producer.status, producer.job_type
            )));
        }
        Ok(())
    }

    async fn latest_upstream(
        &self,
        project_id: Uuid,
        upstream: JobType,
    ) -> Result<String, PipelineError> {
        let job = self
            .store
            .latest_completed(project_id, upstream)
            .await?
            .ok_or_else(|| {
                PipelineError::InvalidPipelineTransition(format!(
                    "project {project_id} has no completed {upstream} job"
                ))
            })?;
        job.output_file.ok_or_else(|| {
            StoreError::Corrupt(format!("completed job {} has no output", job.id)).into()
        })
    }
}

/// The artifact root a stage writes its output under.
fn output_root(job_type: JobType) -> ArtifactRoot {
    match job_type {
        JobType::Ingest => ArtifactRoot::Output,
        JobType::Create => ArtifactRoot::Generated,
        JobType::Curate => ArtifactRoot::Cleaned,
        JobType::SaveAs => ArtifactRoot::Final,
    }
}
