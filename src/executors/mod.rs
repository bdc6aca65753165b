//! Stage executors.
//!
//! An executor performs the work of one pipeline stage. It reads the job's
//! input artifact, writes a new output artifact, and reports the result; it
//! never touches the job row itself. The runner owns all status transitions.

mod curate;
mod export;
mod generate;
mod ingest;

pub use curate::CurateExecutor;
pub use export::ExportExecutor;
pub use generate::GenerateExecutor;
pub use ingest::IngestExecutor;

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::LlmError;
use crate::paths::PathViolation;
use crate::store::Job;

/// A stage execution failure. The variant name becomes the stable prefix of
/// the job's recorded error string.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("UnsupportedFormat: {0}")]
    UnsupportedFormat(String),

    #[error("ExtractionFailure: {0}")]
    ExtractionFailure(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// The curate stage got no response from any scoring request.
    #[error("ScoringUnavailable: {0}")]
    ScoringUnavailable(String),

    #[error("UnknownFormat: {0}")]
    UnknownFormat(String),

    #[error("PathViolation: {0}")]
    Path(#[from] PathViolation),

    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),

    #[error("SerializationError: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<LlmError> for StageFailure {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout(d) => StageFailure::Timeout(format!("LLM request timed out after {d:?}")),
            other => StageFailure::Other(other.to_string()),
        }
    }
}

/// Result of a successful stage execution.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Logical path of the artifact this stage produced.
    pub output_file: String,
    /// Stage statistics, recorded on the job row.
    pub stats: serde_json::Value,
}

/// One pipeline stage.
///
/// Implementations are pure with respect to the job row: the same job input
/// produces the same kind of output regardless of how many times the stage
/// runs, and all persistence of results goes through the runner.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<StageOutcome, StageFailure>;
}
