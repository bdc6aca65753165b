//! synthforge: curated instruction-tuning datasets from raw documents.
//!
//! This library turns documents and URLs into fine-tuning data through a
//! four-stage pipeline: ingest (text extraction), create (QA / chain-of-thought
//! generation), curate (LLM quality scoring), and save-as (format export).
//! Stages run as background jobs against a shared job store.

// Core modules
pub mod chunker;
pub mod cli;
pub mod config;
pub mod curate;
pub mod executors;
pub mod export;
pub mod extract;
pub mod llm;
pub mod paths;
pub mod pipeline;
pub mod qa;
pub mod runner;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executors::{StageExecutor, StageFailure, StageOutcome};
pub use paths::{ArtifactRoot, PathResolver, PathViolation};
pub use pipeline::{PipelineCoordinator, PipelineError};
pub use store::{Job, JobStatus, JobType, JobStore, StoreError};
