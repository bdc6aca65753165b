//! SQLite-backed job store with guarded status transitions.
//!
//! Every status change goes through a compare-and-swap `UPDATE ... WHERE
//! status = <expected>`; a zero row count on an existing row means another
//! worker won the race, reported as `InvalidTransition` with the row
//! untouched.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::schema::{
    Job, JobStatus, JobType, Project, CREATE_JOBS_INDEXES, CREATE_JOBS_TABLE,
    CREATE_PROJECTS_TABLE,
};
use super::StoreError;

/// Filter and pagination for job listing.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub project_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Fields written atomically alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    pub output_file: Option<String>,
    pub stats: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Handle to the projects/jobs database.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

const JOB_COLUMNS: &str = "id, project_id, job_type, status, input_file, output_file, \
                           config, stats, error, created_at, updated_at, heartbeat_at";

impl JobStore {
    /// Connects to the database at `url` and runs schema setup.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Connects to an in-memory database. A single connection keeps the
    /// memory database alive and visible across all queries.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_PROJECTS_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_JOBS_TABLE).execute(&self.pool).await?;
        for index in CREATE_JOBS_INDEXES {
            sqlx::query(index).execute(&self.pool).await?;
        }
        info!("database schema initialized");
        Ok(())
    }

    // ---- projects ----

    pub async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project, StoreError> {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(String::from),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO projects (id, name, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(project.id.to_string())
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(project_id = %project.id, name = %project.name, "project created");
        Ok(project)
    }

    pub async fn get_project(&self, id: Uuid) -> Result<Project, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, description, created_at, updated_at FROM projects WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::ProjectNotFound(id))?;

        row_to_project(&row)
    }

    // ---- jobs ----

    /// Inserts a new pending job.
    pub async fn create(
        &self,
        project_id: Uuid,
        job_type: JobType,
        input_file: Option<&str>,
        config: serde_json::Value,
    ) -> Result<Job, StoreError> {
        // FK enforcement is not guaranteed on by default in SQLite; validate
        // the project explicitly.
        self.get_project(project_id).await?;

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            project_id,
            job_type,
            status: JobStatus::Pending,
            input_file: input_file.map(String::from),
            output_file: None,
            config,
            stats: None,
            error: None,
            created_at: now,
            updated_at: now,
            heartbeat_at: None,
        };

        sqlx::query(
            "INSERT INTO jobs (id, project_id, job_type, status, input_file, config, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(job.project_id.to_string())
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(&job.input_file)
        .bind(serde_json::to_string(&job.config)?)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job.id, job_type = %job.job_type, "job created");
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        row_to_job(&row)
    }

    /// Lists jobs newest-first, applying any filters set.
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let mut sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE 1 = 1");
        if filter.project_id.is_some() {
            sql.push_str(" AND project_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.job_type.is_some() {
            sql.push_str(" AND job_type = ?");
        }
        // id as a tie-break keeps pagination stable when timestamps collide
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        sql.push_str(" LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(project_id) = filter.project_id {
            query = query.bind(project_id.to_string());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(job_type) = filter.job_type {
            query = query.bind(job_type.as_str());
        }
        query = query
            .bind(filter.limit.unwrap_or(100))
            .bind(filter.offset.unwrap_or(0));

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_job).collect()
    }

    /// Atomically transitions a job to `to`, failing with `InvalidTransition`
    /// if the row is not in the required predecessor state.
    ///
    /// `Completed` requires `update.output_file`; `Failed` requires
    /// `update.error`. Transitions into `Pending` are rejected here; crash
    /// recovery uses [`requeue_stale`](Self::requeue_stale).
    pub async fn transition(
        &self,
        job_id: Uuid,
        to: JobStatus,
        update: TransitionUpdate,
    ) -> Result<Job, StoreError> {
        let now = Utc::now();
        let result = match to {
            JobStatus::Running => {
                sqlx::query(
                    "UPDATE jobs SET status = 'running', heartbeat_at = ?, updated_at = ? \
                     WHERE id = ? AND status = 'pending'",
                )
                .bind(now)
                .bind(now)
                .bind(job_id.to_string())
                .execute(&self.pool)
                .await?
            }
            JobStatus::Completed => {
                let output = update.output_file.as_deref().ok_or_else(|| {
                    StoreError::Corrupt(format!(
                        "completion of job {job_id} requires an output file"
                    ))
                })?;
                let stats = match &update.stats {
                    Some(s) => Some(serde_json::to_string(s)?),
                    None => None,
                };
                sqlx::query(
                    "UPDATE jobs SET status = 'completed', output_file = ?, stats = ?, \
                     updated_at = ? WHERE id = ? AND status = 'running'",
                )
                .bind(output)
                .bind(stats)
                .bind(now)
                .bind(job_id.to_string())
                .execute(&self.pool)
                .await?
            }
            JobStatus::Failed => {
                let error = update.error.as_deref().ok_or_else(|| {
                    StoreError::Corrupt(format!("failure of job {job_id} requires an error"))
                })?;
                sqlx::query(
                    "UPDATE jobs SET status = 'failed', error = ?, updated_at = ? \
                     WHERE id = ? AND status = 'running'",
                )
                .bind(error)
                .bind(now)
                .bind(job_id.to_string())
                .execute(&self.pool)
                .await?
            }
            JobStatus::Pending => {
                let job = self.get(job_id).await?;
                return Err(StoreError::InvalidTransition {
                    job_id,
                    from: job.status,
                    to,
                });
            }
        };

        if result.rows_affected() == 0 {
            // Row unchanged: either missing or in the wrong state.
            let job = self.get(job_id).await?;
            return Err(StoreError::InvalidTransition {
                job_id,
                from: job.status,
                to,
            });
        }

        self.get(job_id).await
    }

    /// pending -> running.
    pub async fn start(&self, job_id: Uuid) -> Result<Job, StoreError> {
        self.transition(job_id, JobStatus::Running, TransitionUpdate::default())
            .await
    }

    /// running -> completed, recording the output artifact and stats.
    pub async fn complete(
        &self,
        job_id: Uuid,
        output_file: &str,
        stats: Option<serde_json::Value>,
    ) -> Result<Job, StoreError> {
        self.transition(
            job_id,
            JobStatus::Completed,
            TransitionUpdate {
                output_file: Some(output_file.to_string()),
                stats,
                error: None,
            },
        )
        .await
    }

    /// running -> failed, recording the failure reason.
    pub async fn fail(&self, job_id: Uuid, error: &str) -> Result<Job, StoreError> {
        self.transition(
            job_id,
            JobStatus::Failed,
            TransitionUpdate {
                error: Some(error.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    /// Updates the heartbeat of a running job. A no-op if the job has already
    /// left the running state.
    pub async fn touch_heartbeat(&self, job_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET heartbeat_at = ? WHERE id = ? AND status = 'running'")
            .bind(Utc::now())
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replaces the stats blob on a job. Status-independent; used for
    /// post-hoc annotation of existing rows.
    pub async fn record_stats(
        &self,
        job_id: Uuid,
        stats: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE jobs SET stats = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(stats)?)
            .bind(Utc::now())
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(job_id));
        }
        Ok(())
    }

    /// The most recent job whose output artifact is `output_file`.
    pub async fn find_by_output(&self, output_file: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE output_file = ? \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(output_file)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// The most recent completed job of `job_type` in a project.
    pub async fn latest_completed(
        &self,
        project_id: Uuid,
        job_type: JobType,
    ) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE project_id = ? AND job_type = ? \
             AND status = 'completed' ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(project_id.to_string())
        .bind(job_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Running jobs whose heartbeat (or start, if no heartbeat was ever
    /// recorded) is older than `cutoff`.
    pub async fn find_stale_running(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'running' \
             AND COALESCE(heartbeat_at, updated_at) < ?"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    /// Returns a stale running job to the pending queue. Crash recovery only;
    /// guarded so a job that moved on in the meantime is left alone.
    pub async fn requeue_stale(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', heartbeat_at = NULL, updated_at = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(Utc::now())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        let requeued = result.rows_affected() > 0;
        if requeued {
            warn!(job_id = %job_id, "stale job requeued");
        }
        Ok(requeued)
    }

    /// Marks a stale running job failed with the given reason. Guarded like
    /// [`requeue_stale`](Self::requeue_stale).
    pub async fn fail_stale(&self, job_id: Uuid, error: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error = ?, updated_at = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        let failed = result.rows_affected() > 0;
        if failed {
            warn!(job_id = %job_id, error = %error, "stale job abandoned");
        }
        Ok(failed)
    }
}

fn row_to_project(row: &SqliteRow) -> Result<Project, StoreError> {
    Ok(Project {
        id: parse_uuid(row.try_get("id")?)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_job(row: &SqliteRow) -> Result<Job, StoreError> {
    let job_type_raw: String = row.try_get("job_type")?;
    let job_type = JobType::parse(&job_type_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown job type: {job_type_raw}")))?;

    let status_raw: String = row.try_get("status")?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown status: {status_raw}")))?;

    let config_raw: String = row.try_get("config")?;
    let config = serde_json::from_str(&config_raw)?;

    let stats_raw: Option<String> = row.try_get("stats")?;
    let stats = stats_raw.as_deref().map(serde_json::from_str).transpose()?;

    Ok(Job {
        id: parse_uuid(row.try_get("id")?)?,
        project_id: parse_uuid(row.try_get("project_id")?)?,
        job_type,
        status,
        input_file: row.try_get("input_file")?,
        output_file: row.try_get("output_file")?,
        config,
        stats,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        heartbeat_at: row.try_get("heartbeat_at")?,
    })
}

fn parse_uuid(raw: String) -> Result<Uuid, StoreError> {
    Uuid::parse_str(&raw).map_err(|e| StoreError::Corrupt(format!("bad uuid {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_project() -> (JobStore, Uuid) {
        let store = JobStore::connect_in_memory().await.unwrap();
        let project = store.create_project("test", None).await.unwrap();
        (store, project.id)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (store, project_id) = store_with_project().await;

        let job = store
            .create(project_id, JobType::Ingest, Some("doc.txt"), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let fetched = store.get(job.id).await.unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.input_file.as_deref(), Some("doc.txt"));
        assert!(fetched.output_file.is_none());
    }

    #[tokio::test]
    async fn test_create_requires_project() {
        let store = JobStore::connect_in_memory().await.unwrap();
        let err = store
            .create(Uuid::new_v4(), JobType::Ingest, None, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn test_happy_path_transitions() {
        let (store, project_id) = store_with_project().await;
        let job = store
            .create(project_id, JobType::Ingest, Some("doc.txt"), serde_json::json!({}))
            .await
            .unwrap();

        let running = store.start(job.id).await.unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.heartbeat_at.is_some());

        let done = store
            .complete(job.id, "output/doc.txt", Some(serde_json::json!({"chars": 42})))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.output_file.as_deref(), Some("output/doc.txt"));
        assert_eq!(done.stats.unwrap()["chars"], 42);
    }

    #[tokio::test]
    async fn test_double_start_conflicts() {
        let (store, project_id) = store_with_project().await;
        let job = store
            .create(project_id, JobType::Ingest, None, serde_json::json!({}))
            .await
            .unwrap();

        store.start(job.id).await.unwrap();
        let err = store.start(job.id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::Running,
                to: JobStatus::Running,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_terminal_states_frozen() {
        let (store, project_id) = store_with_project().await;
        let job = store
            .create(project_id, JobType::Ingest, None, serde_json::json!({}))
            .await
            .unwrap();
        store.start(job.id).await.unwrap();
        store.fail(job.id, "boom").await.unwrap();

        let err = store.complete(job.id, "output/x.txt", None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { from: JobStatus::Failed, .. }));

        // Still failed, error preserved
        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_complete_requires_output() {
        let (store, project_id) = store_with_project().await;
        let job = store
            .create(project_id, JobType::Ingest, None, serde_json::json!({}))
            .await
            .unwrap();
        store.start(job.id).await.unwrap();

        let err = store
            .transition(job.id, JobStatus::Completed, TransitionUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));

        // Job still running
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_cannot_complete_pending() {
        let (store, project_id) = store_with_project().await;
        let job = store
            .create(project_id, JobType::Ingest, None, serde_json::json!({}))
            .await
            .unwrap();

        let err = store.complete(job.id, "output/x.txt", None).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition { from: JobStatus::Pending, to: JobStatus::Completed, .. }
        ));
    }

    #[tokio::test]
    async fn test_list_filters_and_order() {
        let (store, project_id) = store_with_project().await;
        let a = store
            .create(project_id, JobType::Ingest, None, serde_json::json!({}))
            .await
            .unwrap();
        let b = store
            .create(project_id, JobType::Create, None, serde_json::json!({}))
            .await
            .unwrap();
        store.start(b.id).await.unwrap();

        let all = store.list(&JobFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let running = store
            .list(&JobFilter {
                status: Some(JobStatus::Running),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, b.id);

        let ingests = store
            .list(&JobFilter {
                job_type: Some(JobType::Ingest),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ingests.len(), 1);
        assert_eq!(ingests[0].id, a.id);

        let limited = store
            .list(&JobFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        // Pagination is stable: page 1 + page 2 cover both rows once
        let page_two = store
            .list(&JobFilter {
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page_two.len(), 1);
        assert_ne!(limited[0].id, page_two[0].id);
    }

    #[tokio::test]
    async fn test_pagination_stable_with_tied_timestamps() {
        let (store, project_id) = store_with_project().await;
        let mut ids = Vec::new();
        for _ in 0..4 {
            let job = store
                .create(project_id, JobType::Ingest, None, serde_json::json!({}))
                .await
                .unwrap();
            ids.push(job.id);
        }
        // Collapse every created_at to the same instant
        sqlx::query("UPDATE jobs SET created_at = ?")
            .bind(Utc::now())
            .execute(store.pool())
            .await
            .unwrap();

        let mut seen = Vec::new();
        for offset in 0..4 {
            let page = store
                .list(&JobFilter {
                    limit: Some(1),
                    offset: Some(offset),
                    ..Default::default()
                })
                .await
                .unwrap();
            assert_eq!(page.len(), 1);
            seen.push(page[0].id);
        }
        // Every row appears exactly once across the pages
        seen.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_record_stats() {
        let (store, project_id) = store_with_project().await;
        let job = store
            .create(project_id, JobType::Ingest, None, serde_json::json!({}))
            .await
            .unwrap();

        store
            .record_stats(job.id, &serde_json::json!({"annotated": true}))
            .await
            .unwrap();
        assert_eq!(store.get(job.id).await.unwrap().stats.unwrap()["annotated"], true);

        let err = store
            .record_stats(Uuid::new_v4(), &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_by_output() {
        let (store, project_id) = store_with_project().await;
        let job = store
            .create(project_id, JobType::Ingest, None, serde_json::json!({}))
            .await
            .unwrap();
        store.start(job.id).await.unwrap();
        store.complete(job.id, "output/doc.txt", None).await.unwrap();

        let found = store.find_by_output("output/doc.txt").await.unwrap().unwrap();
        assert_eq!(found.id, job.id);
        assert!(store.find_by_output("output/other.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_detection_and_requeue() {
        let (store, project_id) = store_with_project().await;
        let job = store
            .create(project_id, JobType::Ingest, None, serde_json::json!({}))
            .await
            .unwrap();
        store.start(job.id).await.unwrap();

        // Fresh heartbeat: not stale
        let stale = store
            .find_stale_running(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(stale.is_empty());

        // Backdate the heartbeat
        sqlx::query("UPDATE jobs SET heartbeat_at = ? WHERE id = ?")
            .bind(Utc::now() - chrono::Duration::hours(2))
            .bind(job.id.to_string())
            .execute(store.pool())
            .await
            .unwrap();

        let stale = store
            .find_stale_running(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);

        assert!(store.requeue_stale(job.id).await.unwrap());
        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.heartbeat_at.is_none());

        // Guarded: no longer running, second requeue is a no-op
        assert!(!store.requeue_stale(job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_stale() {
        let (store, project_id) = store_with_project().await;
        let job = store
            .create(project_id, JobType::SaveAs, None, serde_json::json!({}))
            .await
            .unwrap();
        store.start(job.id).await.unwrap();

        assert!(store.fail_stale(job.id, "StaleJobAbandoned: worker heartbeat expired").await.unwrap());
        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("StaleJobAbandoned"));
    }
}
