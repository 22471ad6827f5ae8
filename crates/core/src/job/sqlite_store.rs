//! SQLite-backed job store implementation.
//!
//! Claims and claimed updates are implemented as conditional UPDATEs; the
//! affected-row count is the compare-and-swap result. Rich state (params,
//! stage results, error) is stored as JSON columns.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};

use super::{
    Claim, CreateJobRequest, Job, JobError, JobFilter, JobParams, JobPatch, JobStatus,
    JobStore, JobStoreError, SlideTask, StageResult, TaskStatus,
};

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobStoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, JobStoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                slide_count INTEGER NOT NULL,
                params TEXT NOT NULL,
                status TEXT NOT NULL,
                progress_percent INTEGER NOT NULL DEFAULT 0,
                stage_results TEXT NOT NULL DEFAULT '{}',
                attempts TEXT NOT NULL DEFAULT '{}',
                error TEXT,
                owner_token TEXT,
                claim_expires_at_ms INTEGER,
                artifact_uri TEXT,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);

            CREATE TABLE IF NOT EXISTS slide_tasks (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                slide_index INTEGER NOT NULL,
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                result_ref TEXT,
                last_error TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE(job_id, slide_index)
            );

            CREATE INDEX IF NOT EXISTS idx_slide_tasks_job ON slide_tasks(job_id);
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let id: String = row.get(0)?;
        let topic: String = row.get(1)?;
        let slide_count: u32 = row.get(2)?;
        let params_json: String = row.get(3)?;
        let status_str: String = row.get(4)?;
        let progress_percent: u8 = row.get(5)?;
        let stage_results_json: String = row.get(6)?;
        let attempts_json: String = row.get(7)?;
        let error_json: Option<String> = row.get(8)?;
        let owner_token: Option<String> = row.get(9)?;
        let claim_expires_at_ms: Option<i64> = row.get(10)?;
        let artifact_uri: Option<String> = row.get(11)?;
        let cancel_requested: bool = row.get(12)?;
        let created_at_str: String = row.get(13)?;
        let updated_at_str: String = row.get(14)?;

        let created_at = parse_timestamp(&created_at_str);
        let updated_at = parse_timestamp(&updated_at_str);

        let params: JobParams = serde_json::from_str(&params_json).unwrap_or_default();
        let stage_results: BTreeMap<String, StageResult> =
            serde_json::from_str(&stage_results_json).unwrap_or_default();
        let attempts: BTreeMap<String, u32> =
            serde_json::from_str(&attempts_json).unwrap_or_default();
        let error: Option<JobError> = error_json.and_then(|json| serde_json::from_str(&json).ok());
        let status = JobStatus::parse(&status_str).unwrap_or(JobStatus::Pending);
        let claim_expires_at = claim_expires_at_ms.and_then(DateTime::<Utc>::from_timestamp_millis);

        Ok(Job {
            id,
            topic,
            slide_count,
            params,
            status,
            progress_percent,
            stage_results,
            attempts,
            error,
            owner_token,
            claim_expires_at,
            artifact_uri,
            cancel_requested,
            created_at,
            updated_at,
        })
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<SlideTask> {
        let id: String = row.get(0)?;
        let job_id: String = row.get(1)?;
        let slide_index: u32 = row.get(2)?;
        let status_str: String = row.get(3)?;
        let attempt_count: u32 = row.get(4)?;
        let result_ref: Option<String> = row.get(5)?;
        let last_error: Option<String> = row.get(6)?;
        let updated_at_str: String = row.get(7)?;

        Ok(SlideTask {
            id,
            job_id,
            slide_index,
            status: TaskStatus::parse(&status_str).unwrap_or(TaskStatus::Pending),
            attempt_count,
            result_ref,
            last_error,
            updated_at: parse_timestamp(&updated_at_str),
        })
    }

    fn get_locked(conn: &Connection, id: &str) -> Result<Option<Job>, JobStoreError> {
        let result = conn.query_row(
            "SELECT id, topic, slide_count, params, status, progress_percent, stage_results, attempts, error, owner_token, claim_expires_at_ms, artifact_uri, cancel_requested, created_at, updated_at FROM jobs WHERE id = ?",
            params![id],
            Self::row_to_job,
        );

        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }
}

fn db_err(e: impl std::fmt::Display) -> JobStoreError {
    JobStoreError::Database(e.to_string())
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl JobStore for SqliteJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let params_json = serde_json::to_string(&request.params).map_err(db_err)?;

        conn.execute(
            "INSERT INTO jobs (id, topic, slide_count, params, status, progress_percent, stage_results, attempts, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 0, '{}', '{}', ?, ?)",
            params![
                id,
                request.topic,
                request.slide_count,
                params_json,
                JobStatus::Pending.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        Ok(Job {
            id,
            topic: request.topic,
            slide_count: request.slide_count,
            params: request.params,
            status: JobStatus::Pending,
            progress_percent: 0,
            stage_results: BTreeMap::new(),
            attempts: BTreeMap::new(),
            error: None,
            owner_token: None,
            claim_expires_at: None,
            artifact_uri: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        let conn = self.conn.lock().unwrap();
        Self::get_locked(&conn, id)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        let (sql, has_status) = match filter.status {
            Some(_) => (
                "SELECT id, topic, slide_count, params, status, progress_percent, stage_results, attempts, error, owner_token, claim_expires_at_ms, artifact_uri, cancel_requested, created_at, updated_at FROM jobs WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
                true,
            ),
            None => (
                "SELECT id, topic, slide_count, params, status, progress_percent, stage_results, attempts, error, owner_token, claim_expires_at_ms, artifact_uri, cancel_requested, created_at, updated_at FROM jobs ORDER BY created_at DESC LIMIT ? OFFSET ?",
                false,
            ),
        };

        let mut stmt = conn.prepare(sql).map_err(db_err)?;

        let mut jobs = Vec::new();
        let mut push_rows = |rows: rusqlite::MappedRows<'_, _>| -> Result<(), JobStoreError> {
            for row in rows {
                jobs.push(row.map_err(db_err)?);
            }
            Ok(())
        };

        if has_status {
            let status = filter.status.clone().unwrap_or_default();
            let rows = stmt
                .query_map(
                    params![status, filter.limit, filter.offset],
                    Self::row_to_job,
                )
                .map_err(db_err)?;
            push_rows(rows)?;
        } else {
            let rows = stmt
                .query_map(params![filter.limit, filter.offset], Self::row_to_job)
                .map_err(db_err)?;
            push_rows(rows)?;
        }

        Ok(jobs)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        let count = match filter.status {
            Some(ref status) => conn
                .query_row(
                    "SELECT COUNT(*) FROM jobs WHERE status = ?",
                    params![status],
                    |row| row.get(0),
                )
                .map_err(db_err)?,
            None => conn
                .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
                .map_err(db_err)?,
        };

        Ok(count)
    }

    fn claim(
        &self,
        id: &str,
        expected_status: JobStatus,
        worker_id: &str,
        ttl: Duration,
    ) -> Result<Claim, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        let now = Utc::now();
        let token = uuid::Uuid::new_v4().to_string();
        let expires_at = now + ttl;

        // The single compare-and-swap primitive: succeeds only when the status
        // matches and no unexpired claim exists.
        let affected = conn
            .execute(
                "UPDATE jobs SET owner_token = ?, claim_expires_at_ms = ?, updated_at = ? WHERE id = ? AND status = ? AND (owner_token IS NULL OR claim_expires_at_ms IS NULL OR claim_expires_at_ms < ?)",
                params![
                    token,
                    expires_at.timestamp_millis(),
                    now.to_rfc3339(),
                    id,
                    expected_status.as_str(),
                    now.timestamp_millis(),
                ],
            )
            .map_err(db_err)?;

        if affected == 1 {
            return Ok(Claim {
                job_id: id.to_string(),
                worker_id: worker_id.to_string(),
                token,
                expires_at,
            });
        }

        match Self::get_locked(&conn, id)? {
            None => Err(JobStoreError::NotFound(id.to_string())),
            Some(job) if job.status != expected_status => Err(JobStoreError::Conflict {
                job_id: id.to_string(),
                reason: format!(
                    "status is {}, expected {}",
                    job.status, expected_status
                ),
            }),
            Some(_) => Err(JobStoreError::Conflict {
                job_id: id.to_string(),
                reason: "another worker holds an unexpired claim".to_string(),
            }),
        }
    }

    fn update(&self, id: &str, patch: JobPatch, claim: &Claim) -> Result<Job, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        let current = Self::get_locked(&conn, id)?
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        if current.status.is_terminal() {
            return Err(JobStoreError::Conflict {
                job_id: id.to_string(),
                reason: format!("job is terminal ({})", current.status),
            });
        }

        let mut job = current;
        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(percent) = patch.progress_percent {
            // Progress is monotone non-decreasing until terminal.
            job.progress_percent = job.progress_percent.max(percent.min(100));
        }
        if let Some(result) = patch.stage_result {
            let key = match &result {
                StageResult::Outline { .. } => super::Stage::Outline,
                StageResult::Content { .. } => super::Stage::Content,
                StageResult::Images { .. } => super::Stage::Images,
                StageResult::Compile { .. } => super::Stage::Compile,
            };
            job.stage_results.insert(key.name().to_string(), result);
        }
        if let Some(stage) = patch.bump_attempt {
            *job.attempts.entry(stage.name().to_string()).or_insert(0) += 1;
        }
        if let Some(error) = patch.error {
            job.error = Some(error);
        }
        if let Some(uri) = patch.artifact_uri {
            job.artifact_uri = Some(uri);
        }

        let now = Utc::now();
        job.updated_at = now;

        // Terminal statuses release the claim; the record becomes immutable.
        let (owner_token, claim_expires_at_ms) = if job.status.is_terminal() {
            (None, None)
        } else {
            (
                Some(claim.token.clone()),
                Some(claim.expires_at.timestamp_millis()),
            )
        };

        let stage_results_json = serde_json::to_string(&job.stage_results).map_err(db_err)?;
        let attempts_json = serde_json::to_string(&job.attempts).map_err(db_err)?;
        let error_json = job
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(db_err)?;

        let affected = conn
            .execute(
                "UPDATE jobs SET status = ?, progress_percent = ?, stage_results = ?, attempts = ?, error = ?, owner_token = ?, claim_expires_at_ms = ?, artifact_uri = ?, updated_at = ? WHERE id = ? AND owner_token = ?",
                params![
                    job.status.as_str(),
                    job.progress_percent,
                    stage_results_json,
                    attempts_json,
                    error_json,
                    owner_token,
                    claim_expires_at_ms,
                    job.artifact_uri,
                    now.to_rfc3339(),
                    id,
                    claim.token,
                ],
            )
            .map_err(db_err)?;

        if affected == 0 {
            return Err(JobStoreError::Conflict {
                job_id: id.to_string(),
                reason: "claim token no longer matches".to_string(),
            });
        }

        job.owner_token = owner_token;
        job.claim_expires_at = if job.status.is_terminal() {
            None
        } else {
            Some(claim.expires_at)
        };

        Ok(job)
    }

    fn release(&self, id: &str, claim: &Claim) -> Result<(), JobStoreError> {
        let conn = self.conn.lock().unwrap();

        // Releasing a claim we no longer hold is a no-op, not an error.
        conn.execute(
            "UPDATE jobs SET owner_token = NULL, claim_expires_at_ms = NULL, updated_at = ? WHERE id = ? AND owner_token = ?",
            params![Utc::now().to_rfc3339(), id, claim.token],
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn request_cancel(&self, id: &str) -> Result<Job, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        let job = Self::get_locked(&conn, id)?
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        if job.status.is_terminal() {
            return Err(JobStoreError::Conflict {
                job_id: id.to_string(),
                reason: format!("job is terminal ({})", job.status),
            });
        }

        conn.execute(
            "UPDATE jobs SET cancel_requested = 1, updated_at = ? WHERE id = ?",
            params![Utc::now().to_rfc3339(), id],
        )
        .map_err(db_err)?;

        Self::get_locked(&conn, id)?.ok_or_else(|| JobStoreError::NotFound(id.to_string()))
    }

    fn create_tasks(
        &self,
        job_id: &str,
        slide_count: u32,
    ) -> Result<Vec<SlideTask>, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        let now = Utc::now();
        for slide_index in 0..slide_count {
            conn.execute(
                "INSERT OR IGNORE INTO slide_tasks (id, job_id, slide_index, status, attempt_count, updated_at) VALUES (?, ?, ?, ?, 0, ?)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    job_id,
                    slide_index,
                    TaskStatus::Pending.as_str(),
                    now.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        }

        let mut stmt = conn
            .prepare("SELECT id, job_id, slide_index, status, attempt_count, result_ref, last_error, updated_at FROM slide_tasks WHERE job_id = ? ORDER BY slide_index ASC")
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![job_id], Self::row_to_task)
            .map_err(db_err)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(db_err)?);
        }

        Ok(tasks)
    }

    fn update_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        result_ref: Option<String>,
        last_error: Option<String>,
    ) -> Result<SlideTask, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        // Each transition to Running counts as an attempt.
        let attempt_bump = if status == TaskStatus::Running { 1 } else { 0 };

        let affected = conn
            .execute(
                "UPDATE slide_tasks SET status = ?, attempt_count = attempt_count + ?, result_ref = COALESCE(?, result_ref), last_error = COALESCE(?, last_error), updated_at = ? WHERE id = ?",
                params![
                    status.as_str(),
                    attempt_bump,
                    result_ref,
                    last_error,
                    Utc::now().to_rfc3339(),
                    task_id,
                ],
            )
            .map_err(db_err)?;

        if affected == 0 {
            return Err(JobStoreError::NotFound(task_id.to_string()));
        }

        conn.query_row(
            "SELECT id, job_id, slide_index, status, attempt_count, result_ref, last_error, updated_at FROM slide_tasks WHERE id = ?",
            params![task_id],
            Self::row_to_task,
        )
        .map_err(db_err)
    }

    fn list_tasks(&self, job_id: &str) -> Result<Vec<SlideTask>, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare("SELECT id, job_id, slide_index, status, attempt_count, result_ref, last_error, updated_at FROM slide_tasks WHERE job_id = ? ORDER BY slide_index ASC")
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![job_id], Self::row_to_task)
            .map_err(db_err)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(db_err)?);
        }

        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Stage;

    fn store() -> SqliteJobStore {
        SqliteJobStore::in_memory().unwrap()
    }

    fn create_job(store: &SqliteJobStore) -> Job {
        store
            .create(CreateJobRequest {
                topic: "rust async runtimes".to_string(),
                slide_count: 5,
                params: JobParams::default(),
            })
            .unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let store = store();
        let job = create_job(&store);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress_percent, 0);

        let fetched = store.get(&job.id).unwrap().unwrap();
        assert_eq!(fetched.topic, "rust async runtimes");
        assert_eq!(fetched.slide_count, 5);
    }

    #[test]
    fn test_get_unknown_returns_none() {
        let store = store();
        assert!(store.get("no-such-job").unwrap().is_none());
    }

    #[test]
    fn test_claim_succeeds_once() {
        let store = store();
        let job = create_job(&store);

        let claim = store
            .claim(&job.id, JobStatus::Pending, "worker-a", Duration::seconds(60))
            .unwrap();
        assert_eq!(claim.worker_id, "worker-a");

        // Second claim must observe the unexpired claim and fail.
        let err = store
            .claim(&job.id, JobStatus::Pending, "worker-b", Duration::seconds(60))
            .unwrap_err();
        assert!(matches!(err, JobStoreError::Conflict { .. }));
    }

    #[test]
    fn test_claim_wrong_status() {
        let store = store();
        let job = create_job(&store);

        let err = store
            .claim(
                &job.id,
                JobStatus::ContentRunning,
                "worker-a",
                Duration::seconds(60),
            )
            .unwrap_err();
        assert!(matches!(err, JobStoreError::Conflict { .. }));
    }

    #[test]
    fn test_expired_claim_can_be_taken_over() {
        let store = store();
        let job = create_job(&store);

        let stale = store
            .claim(&job.id, JobStatus::Pending, "worker-a", Duration::seconds(-1))
            .unwrap();

        let fresh = store
            .claim(&job.id, JobStatus::Pending, "worker-b", Duration::seconds(60))
            .unwrap();
        assert_ne!(stale.token, fresh.token);

        // The stale token must no longer be able to write.
        let err = store
            .update(
                &job.id,
                JobPatch::new().with_status(JobStatus::OutlineRunning),
                &stale,
            )
            .unwrap_err();
        assert!(matches!(err, JobStoreError::Conflict { .. }));
    }

    #[test]
    fn test_update_requires_matching_token() {
        let store = store();
        let job = create_job(&store);

        let claim = store
            .claim(&job.id, JobStatus::Pending, "worker-a", Duration::seconds(60))
            .unwrap();

        let forged = Claim {
            token: "forged".to_string(),
            ..claim.clone()
        };
        let err = store
            .update(
                &job.id,
                JobPatch::new().with_status(JobStatus::OutlineRunning),
                &forged,
            )
            .unwrap_err();
        assert!(matches!(err, JobStoreError::Conflict { .. }));

        let updated = store
            .update(
                &job.id,
                JobPatch::new().with_status(JobStatus::OutlineRunning),
                &claim,
            )
            .unwrap();
        assert_eq!(updated.status, JobStatus::OutlineRunning);
    }

    #[test]
    fn test_progress_never_decreases() {
        let store = store();
        let job = create_job(&store);
        let claim = store
            .claim(&job.id, JobStatus::Pending, "w", Duration::seconds(60))
            .unwrap();

        let job = store
            .update(&job.id, JobPatch::new().with_progress(50), &claim)
            .unwrap();
        assert_eq!(job.progress_percent, 50);

        let job = store
            .update(&job.id, JobPatch::new().with_progress(10), &claim)
            .unwrap();
        assert_eq!(job.progress_percent, 50);

        let job = store
            .update(&job.id, JobPatch::new().with_progress(85), &claim)
            .unwrap();
        assert_eq!(job.progress_percent, 85);
    }

    #[test]
    fn test_terminal_jobs_are_immutable() {
        let store = store();
        let job = create_job(&store);
        let claim = store
            .claim(&job.id, JobStatus::Pending, "w", Duration::seconds(60))
            .unwrap();

        let job = store
            .update(
                &job.id,
                JobPatch::new()
                    .with_status(JobStatus::Failed)
                    .with_error(JobError {
                        stage: "outline".to_string(),
                        kind: "dependency".to_string(),
                        message: "boom".to_string(),
                    }),
                &claim,
            )
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.owner_token.is_none());

        let err = store
            .update(
                &job.id,
                JobPatch::new().with_status(JobStatus::Completed),
                &claim,
            )
            .unwrap_err();
        assert!(matches!(err, JobStoreError::Conflict { .. }));

        let err = store.request_cancel(&job.id).unwrap_err();
        assert!(matches!(err, JobStoreError::Conflict { .. }));
    }

    #[test]
    fn test_stage_result_and_attempts() {
        let store = store();
        let job = create_job(&store);
        let claim = store
            .claim(&job.id, JobStatus::Pending, "w", Duration::seconds(60))
            .unwrap();

        let outline = DeckOutlineFixture::outline(2);
        let job = store
            .update(
                &job.id,
                JobPatch::new()
                    .with_stage_result(StageResult::Outline {
                        outline: outline.clone(),
                    })
                    .bumping_attempt(Stage::Outline),
                &claim,
            )
            .unwrap();

        assert!(job.stage_completed(Stage::Outline));
        assert_eq!(job.attempts.get("outline"), Some(&1));

        match job.stage_results.get("outline") {
            Some(StageResult::Outline { outline: stored }) => assert_eq!(stored, &outline),
            other => panic!("unexpected stage result: {:?}", other),
        }
    }

    #[test]
    fn test_cancel_flag() {
        let store = store();
        let job = create_job(&store);

        let job = store.request_cancel(&job.id).unwrap();
        assert!(job.cancel_requested);
    }

    #[test]
    fn test_tasks_idempotent_creation() {
        let store = store();
        let job = create_job(&store);

        let tasks = store.create_tasks(&job.id, 3).unwrap();
        assert_eq!(tasks.len(), 3);
        let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();

        // Recreating must keep the same identities.
        let again = store.create_tasks(&job.id, 3).unwrap();
        let again_ids: Vec<String> = again.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, again_ids);
    }

    #[test]
    fn test_task_updates() {
        let store = store();
        let job = create_job(&store);
        let tasks = store.create_tasks(&job.id, 2).unwrap();

        let running = store
            .update_task(&tasks[0].id, TaskStatus::Running, None, None)
            .unwrap();
        assert_eq!(running.attempt_count, 1);

        let done = store
            .update_task(
                &tasks[0].id,
                TaskStatus::Succeeded,
                Some("mem://img-0".to_string()),
                None,
            )
            .unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert_eq!(done.result_ref.as_deref(), Some("mem://img-0"));
        assert_eq!(done.attempt_count, 1);

        let failed = store
            .update_task(
                &tasks[1].id,
                TaskStatus::Failed,
                None,
                Some("prompt rejected".to_string()),
            )
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("prompt rejected"));
    }

    #[test]
    fn test_list_and_count_by_status() {
        let store = store();
        create_job(&store);
        create_job(&store);

        let all = store.list(&JobFilter::new()).unwrap();
        assert_eq!(all.len(), 2);

        let pending = store
            .count(&JobFilter::new().with_status("pending"))
            .unwrap();
        assert_eq!(pending, 2);

        let completed = store
            .count(&JobFilter::new().with_status("completed"))
            .unwrap();
        assert_eq!(completed, 0);
    }

    struct DeckOutlineFixture;

    impl DeckOutlineFixture {
        fn outline(sections: usize) -> crate::job::DeckOutline {
            crate::job::DeckOutline {
                title: "Test Deck".to_string(),
                sections: (0..sections)
                    .map(|i| crate::job::SectionSpec {
                        heading: format!("Section {}", i + 1),
                        summary: format!("Summary {}", i + 1),
                    })
                    .collect(),
            }
        }
    }
}
