//! Command handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::executors::{CurateExecutor, ExportExecutor, GenerateExecutor, IngestExecutor};
use crate::extract::ExtractorRegistry;
use crate::llm::OpenAiClient;
use crate::paths::PathResolver;
use crate::pipeline::PipelineCoordinator;
use crate::runner::{Executors, RunnerConfig, TaskRunner};
use crate::store::{JobFilter, JobStatus, JobStore, JobType, Project};

pub struct RunArgs {
    pub source: String,
    pub project: String,
    pub qa_type: String,
    pub num_pairs: Option<usize>,
    pub threshold: Option<f64>,
    pub format: String,
}

/// `init`: create directories and database schema.
pub async fn init(config: &Config) -> anyhow::Result<()> {
    let resolver = PathResolver::new(&config.data_root);
    resolver
        .ensure_roots()
        .with_context(|| format!("creating data root {}", config.data_root.display()))?;
    JobStore::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;

    println!("Initialized data root at {}", config.data_root.display());
    Ok(())
}

/// `run`: drive one source through all four stages.
pub async fn run_pipeline(config: &Config, args: RunArgs) -> anyhow::Result<()> {
    let resolver = PathResolver::new(&config.data_root);
    resolver.ensure_roots()?;
    let store = JobStore::connect(&config.database_url).await?;
    let provider = Arc::new(OpenAiClient::from_config(&config.llm)?);

    let executors = Executors {
        ingest: Arc::new(IngestExecutor::new(resolver.clone(), ExtractorRegistry::new())),
        create: Arc::new(GenerateExecutor::new(
            resolver.clone(),
            provider.clone(),
            config.llm.model.clone(),
            config.generation.clone(),
        )),
        curate: Arc::new(CurateExecutor::new(
            resolver.clone(),
            provider.clone(),
            config.llm.model.clone(),
            config.curation.clone(),
        )),
        save_as: Arc::new(ExportExecutor::new(resolver.clone(), None)),
    };

    let runner = Arc::new(TaskRunner::new(
        store.clone(),
        executors,
        RunnerConfig::default()
            .with_workers(config.workers)
            .with_job_timeout(config.job_timeout())
            .with_stale_after(config.stale_after()),
    ));
    runner.start().await?;

    let coordinator = PipelineCoordinator::new(store.clone(), runner.clone(), resolver);
    let project = find_or_create_project(&store, &args.project).await?;

    info!(project = %project.name, source = %args.source, "starting pipeline run");

    let ingest = coordinator
        .submit_ingest(project.id, &args.source, serde_json::json!({}))
        .await?;
    let ingest = wait_for(&store, ingest.id).await?;
    println!("ingest   -> {}", ingest.output_file.as_deref().unwrap_or("?"));

    let mut create_config = serde_json::json!({"qa_type": args.qa_type});
    if let Some(num_pairs) = args.num_pairs {
        create_config["num_pairs"] = serde_json::json!(num_pairs);
    }
    let create = coordinator
        .submit_create(
            project.id,
            ingest.output_file.as_deref().unwrap_or_default(),
            create_config,
        )
        .await?;
    let create = wait_for(&store, create.id).await?;
    println!("create   -> {}", create.output_file.as_deref().unwrap_or("?"));

    let mut curate_config = serde_json::json!({});
    if let Some(threshold) = args.threshold {
        curate_config["threshold"] = serde_json::json!(threshold);
    }
    let curate = coordinator
        .submit_curate(
            project.id,
            create.output_file.as_deref().unwrap_or_default(),
            curate_config,
        )
        .await?;
    let curate = wait_for(&store, curate.id).await?;
    println!("curate   -> {}", curate.output_file.as_deref().unwrap_or("?"));

    let save_as = coordinator
        .submit_save_as(
            project.id,
            curate.output_file.as_deref().unwrap_or_default(),
            serde_json::json!({"format": args.format}),
        )
        .await?;
    let save_as = wait_for(&store, save_as.id).await?;
    println!("save-as  -> {}", save_as.output_file.as_deref().unwrap_or("?"));

    runner.shutdown().await?;
    Ok(())
}

/// `jobs`: list job rows.
pub async fn list_jobs(
    config: &Config,
    status: Option<String>,
    job_type: Option<String>,
    limit: u32,
    offset: u32,
) -> anyhow::Result<()> {
    let store = JobStore::connect(&config.database_url).await?;

    let status = status
        .map(|s| JobStatus::parse(&s).with_context(|| format!("unknown status: {s}")))
        .transpose()?;
    let job_type = job_type
        .map(|t| JobType::parse(&t).with_context(|| format!("unknown job type: {t}")))
        .transpose()?;

    let jobs = store
        .list(&JobFilter {
            project_id: None,
            status,
            job_type,
            limit: Some(limit),
            offset: Some(offset),
        })
        .await?;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    println!(
        "{:<36}  {:<8}  {:<9}  {:<19}  OUTPUT",
        "ID", "TYPE", "STATUS", "CREATED"
    );
    for job in jobs {
        println!(
            "{:<36}  {:<8}  {:<9}  {:<19}  {}",
            job.id.to_string(),
            job.job_type.as_str(),
            job.status.as_str(),
            job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            job.output_file
                .or(job.error)
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

/// `reconcile`: requeue or fail stale running jobs.
pub async fn reconcile(config: &Config) -> anyhow::Result<()> {
    let store = JobStore::connect(&config.database_url).await?;
    let cutoff = chrono::Utc::now()
        - chrono::Duration::from_std(config.stale_after()).unwrap_or_else(|_| chrono::Duration::hours(1));

    let stale = store.find_stale_running(cutoff).await?;
    let mut requeued = 0;
    let mut abandoned = 0;
    for job in stale {
        if job.job_type.is_resumable() {
            if store.requeue_stale(job.id).await? {
                requeued += 1;
            }
        } else if store
            .fail_stale(job.id, "StaleJobAbandoned: worker heartbeat expired")
            .await?
        {
            abandoned += 1;
        }
    }

    println!("Requeued {requeued} job(s), abandoned {abandoned} job(s)");
    Ok(())
}

async fn find_or_create_project(store: &JobStore, name: &str) -> anyhow::Result<Project> {
    // Project lookup by name is not part of the store surface; a run always
    // creates a fresh project grouping for its jobs.
    Ok(store.create_project(name, None).await?)
}

/// Polls a job until it reaches a terminal state.
async fn wait_for(store: &JobStore, job_id: Uuid) -> anyhow::Result<crate::store::Job> {
    loop {
        let job = store.get(job_id).await?;
        if job.status.is_terminal() {
            if job.status == JobStatus::Failed {
                bail!(
                    "job {job_id} ({}) failed: {}",
                    job.job_type,
                    job.error.as_deref().unwrap_or("unknown error")
                );
            }
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
