//! Row types and SQL schema for projects and jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub(crate) const CREATE_PROJECTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

pub(crate) const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    input_file TEXT,
    output_file TEXT,
    config TEXT NOT NULL DEFAULT '{}',
    stats TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    heartbeat_at TEXT
)
"#;

pub(crate) const CREATE_JOBS_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_jobs_project ON jobs(project_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_output ON jobs(output_file)",
];

/// The four pipeline stages a job can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    /// Extract text from a source document or URL.
    Ingest,
    /// Generate QA items from extracted text.
    Create,
    /// Score and filter generated items.
    Curate,
    /// Export curated items in a training format.
    SaveAs,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Ingest => "ingest",
            JobType::Create => "create",
            JobType::Curate => "curate",
            JobType::SaveAs => "save-as",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingest" => Some(JobType::Ingest),
            "create" => Some(JobType::Create),
            "curate" => Some(JobType::Curate),
            "save-as" => Some(JobType::SaveAs),
            _ => None,
        }
    }

    /// The stage whose completed output this stage consumes, if any.
    pub fn expected_upstream(&self) -> Option<JobType> {
        match self {
            JobType::Ingest => None,
            JobType::Create => Some(JobType::Ingest),
            JobType::Curate => Some(JobType::Create),
            JobType::SaveAs => Some(JobType::Curate),
        }
    }

    /// Whether a stale job of this type can be safely re-run from its input.
    /// Save-as may have partially published to an external destination, so it
    /// is not resumable.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, JobType::SaveAs)
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle status.
///
/// The only legal transitions are pending -> running, running -> completed
/// and running -> failed. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Logical input path (or URL for ingest jobs).
    pub input_file: Option<String>,
    /// Logical output path. Set if and only if the job completed.
    pub output_file: Option<String>,
    /// Stage parameters, opaque to the store.
    pub config: serde_json::Value,
    /// Execution statistics recorded on completion.
    pub stats: Option<serde_json::Value>,
    /// Failure reason, set on failed jobs.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last liveness signal from the worker running this job.
    pub heartbeat_at: Option<DateTime<Utc>>,
}

/// A project grouping related jobs and artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_round_trip() {
        for jt in [JobType::Ingest, JobType::Create, JobType::Curate, JobType::SaveAs] {
            assert_eq!(JobType::parse(jt.as_str()), Some(jt));
        }
        assert_eq!(JobType::parse("unknown"), None);
    }

    #[test]
    fn test_job_type_serde_kebab() {
        let json = serde_json::to_string(&JobType::SaveAs).unwrap();
        assert_eq!(json, "\"save-as\"");
    }

    #[test]
    fn test_expected_upstream_chain() {
        assert_eq!(JobType::Ingest.expected_upstream(), None);
        assert_eq!(JobType::Create.expected_upstream(), Some(JobType::Ingest));
        assert_eq!(JobType::Curate.expected_upstream(), Some(JobType::Create));
        assert_eq!(JobType::SaveAs.expected_upstream(), Some(JobType::Curate));
    }

    #[test]
    fn test_resumability() {
        assert!(JobType::Ingest.is_resumable());
        assert!(JobType::Create.is_resumable());
        assert!(JobType::Curate.is_resumable());
        assert!(!JobType::SaveAs.is_resumable());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
