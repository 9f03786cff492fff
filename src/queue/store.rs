//! Job queue storage and persistence.
//!
//! SQLite-backed storage for jobs, the dead-letter set and published results. All access
//! goes through a single connection behind a mutex, which makes `claim_next` atomic.

use super::schema::JOB_QUEUE_VERSIONED_SCHEMAS;
use crate::jobs::{DeadLetter, Job, JobKind, JobState};
use crate::sqlite_persistence::open_versioned;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};

const JOB_COLUMNS: &str = "id, kind, target, config, priority, state, attempts, last_error, \
     claimed_by, created_at, updated_at, available_at, results, security_meta, ai_analysis";

const IN_FLIGHT_STATES: &str = "('claimed', 'security_configuring', 'scraping', 'analyzing')";
const TERMINAL_STATES: &str = "('completed', 'failed', 'dead_lettered')";

/// A persisted job row that no longer decodes into a [`Job`].
#[derive(Debug, Error)]
#[error("job {id} is corrupt: {reason}")]
pub struct CorruptJob {
    pub id: String,
    pub reason: String,
}

/// Storage operations backing the job queue.
///
/// Every mutation of a claimed job is guarded by the claim owner, so a worker whose
/// claim was released can no longer write.
pub trait JobStore: Send + Sync {
    /// Insert a queued job unless `capacity` non-terminal jobs already exist.
    /// Returns false when the queue is full.
    fn insert_job(&self, job: &Job, capacity: usize) -> Result<bool>;

    fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// Atomically claim the best claimable job for `owner`
    /// (highest priority, then oldest, then submission order) and count the attempt.
    fn claim_next(&self, owner: &str, now_ms: i64) -> Result<Option<Job>>;

    /// Earliest `available_at` among queued jobs.
    fn next_available_at(&self) -> Result<Option<i64>>;

    /// Persist the mutable fields of a job held by `owner`.
    /// Returns false if `owner` no longer holds the claim.
    fn save_claimed(&self, job: &Job, owner: &str) -> Result<bool>;

    /// Persist a dead-lettered job and add it to the dead-letter set.
    fn dead_letter(&self, job: &Job, owner: &str) -> Result<bool>;

    /// Return in-flight jobs whose owner starts with `owner_prefix` to the queue.
    fn release_owned(&self, owner_prefix: &str) -> Result<usize>;

    /// Return job `id` to the queue if `owner` still holds it.
    fn release_claimed(&self, id: &str, owner: &str) -> Result<bool>;

    /// Return every in-flight job to the queue. Used at startup after a crash.
    fn requeue_orphaned(&self) -> Result<usize>;

    fn count_by_state(&self) -> Result<Vec<(JobState, usize)>>;

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>>;

    // === Result sink ===

    /// Record the final state of a job. Returns false if it was already recorded.
    fn store_result(&self, job: &Job) -> Result<bool>;

    fn get_result(&self, id: &str) -> Result<Option<Job>>;

    /// Terminal jobs with no recorded result.
    fn unpublished_terminal(&self) -> Result<Vec<Job>>;
}

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), JOB_QUEUE_VERSIONED_SCHEMAS)?;
        info!("Opened job queue database at {:?}", db_path.as_ref());
        Ok(SqliteJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store, for tests and ephemeral runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        JOB_QUEUE_VERSIONED_SCHEMAS
            .last()
            .ok_or_else(|| anyhow!("No schemas defined"))?
            .create(&conn)?;
        Ok(SqliteJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("job store connection mutex poisoned"))
    }

    fn query_jobs(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Job>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, JobRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|row| row.into_job().map_err(anyhow::Error::from))
            .collect()
    }

    fn write_claimed(conn: &Connection, job: &Job, owner: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE jobs SET state = ?3, attempts = ?4, last_error = ?5, claimed_by = ?6,
                 updated_at = ?7, available_at = ?8, results = ?9, security_meta = ?10,
                 ai_analysis = ?11
             WHERE id = ?1 AND claimed_by = ?2",
            params![
                job.id,
                owner,
                job.state.as_str(),
                job.attempts,
                job.last_error,
                job.claimed_by,
                job.updated_at.timestamp_millis(),
                job.available_at.timestamp_millis(),
                to_json_opt(&job.results)?,
                to_json_opt(&job.security_meta)?,
                to_json_opt(&job.ai_analysis)?,
            ],
        )?;
        Ok(changed == 1)
    }
}

impl JobStore for SqliteJobStore {
    fn insert_job(&self, job: &Job, capacity: usize) -> Result<bool> {
        let conn = self.lock()?;
        let active: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM jobs WHERE state NOT IN {TERMINAL_STATES}"),
            [],
            |row| row.get(0),
        )?;
        if active as usize >= capacity {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO jobs (id, kind, target, config, priority, seq, state, attempts,
                 last_error, claimed_by, created_at, updated_at, available_at)
             VALUES (?1, ?2, ?3, ?4, ?5, (SELECT COALESCE(MAX(seq), 0) + 1 FROM jobs),
                 ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id,
                job.kind.as_str(),
                job.target,
                serde_json::to_string(&job.config)?,
                job.priority,
                job.state.as_str(),
                job.attempts,
                job.last_error,
                job.claimed_by,
                job.created_at.timestamp_millis(),
                job.updated_at.timestamp_millis(),
                job.available_at.timestamp_millis(),
            ],
        )?;
        Ok(true)
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        match row {
            Some(row) => Ok(Some(row.into_job()?)),
            None => Ok(None),
        }
    }

    fn claim_next(&self, owner: &str, now_ms: i64) -> Result<Option<Job>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let id: Option<String> = tx
            .query_row(
                "SELECT id FROM jobs WHERE state = 'queued' AND available_at <= ?1
                 ORDER BY priority DESC, created_at ASC, seq ASC LIMIT 1",
                params![now_ms],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = id else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE jobs SET state = 'claimed', claimed_by = ?2, attempts = attempts + 1,
                 updated_at = ?3
             WHERE id = ?1 AND state = 'queued'",
            params![id, owner, now_ms],
        )?;
        let row = tx.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id],
            JobRow::from_row,
        )?;

        match row.into_job() {
            Ok(job) => {
                tx.commit()?;
                Ok(Some(job))
            }
            Err(corrupt) => {
                // Park it as failed so it is not handed out again.
                tx.execute(
                    "UPDATE jobs SET state = 'failed', claimed_by = NULL, last_error = ?2
                     WHERE id = ?1",
                    params![id, corrupt.reason],
                )?;
                tx.commit()?;
                warn!("Parked corrupt job {} as failed: {}", id, corrupt.reason);
                Err(corrupt.into())
            }
        }
    }

    fn next_available_at(&self) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let next: Option<i64> = conn.query_row(
            "SELECT MIN(available_at) FROM jobs WHERE state = 'queued'",
            [],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    fn save_claimed(&self, job: &Job, owner: &str) -> Result<bool> {
        let conn = self.lock()?;
        Self::write_claimed(&conn, job, owner)
    }

    fn dead_letter(&self, job: &Job, owner: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if !Self::write_claimed(&tx, job, owner)? {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO dead_letters (job_id, kind, attempts, error, dead_lettered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job.id,
                job.kind.as_str(),
                job.attempts,
                job.last_error.as_deref().unwrap_or("unknown error"),
                job.updated_at.timestamp_millis(),
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn release_owned(&self, owner_prefix: &str) -> Result<usize> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp_millis();
        // A released claim does not count as an attempt.
        let released = conn.execute(
            &format!(
                "UPDATE jobs SET state = 'queued', claimed_by = NULL,
                     attempts = MAX(attempts - 1, 0), updated_at = ?2, available_at = ?2
                 WHERE state IN {IN_FLIGHT_STATES}
                   AND substr(claimed_by, 1, length(?1)) = ?1"
            ),
            params![owner_prefix, now],
        )?;
        Ok(released)
    }

    fn release_claimed(&self, id: &str, owner: &str) -> Result<bool> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp_millis();
        let released = conn.execute(
            &format!(
                "UPDATE jobs SET state = 'queued', claimed_by = NULL,
                     attempts = MAX(attempts - 1, 0), updated_at = ?3, available_at = ?3
                 WHERE id = ?1 AND claimed_by = ?2 AND state IN {IN_FLIGHT_STATES}"
            ),
            params![id, owner, now],
        )?;
        Ok(released == 1)
    }

    fn requeue_orphaned(&self) -> Result<usize> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp_millis();
        let requeued = conn.execute(
            &format!(
                "UPDATE jobs SET state = 'queued', claimed_by = NULL,
                     attempts = MAX(attempts - 1, 0), updated_at = ?1, available_at = ?1
                 WHERE state IN {IN_FLIGHT_STATES}"
            ),
            params![now],
        )?;
        Ok(requeued)
    }

    fn count_by_state(&self) -> Result<Vec<(JobState, usize)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(state, count)| {
                JobState::from_db_str(&state).map(|state| (state, count as usize))
            })
            .collect())
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT job_id, kind, attempts, error, dead_lettered_at FROM dead_letters
             ORDER BY dead_lettered_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(job_id, kind, attempts, error, at)| -> Result<DeadLetter> {
                let kind = kind.parse::<JobKind>().map_err(|_| CorruptJob {
                    id: job_id.clone(),
                    reason: format!("unknown kind '{}'", kind),
                })?;
                let dead_lettered_at = from_millis(&job_id, at)?;
                Ok(DeadLetter {
                    job_id,
                    kind,
                    attempts,
                    error,
                    dead_lettered_at,
                })
            })
            .collect()
    }

    fn store_result(&self, job: &Job) -> Result<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO job_results (job_id, state, payload, published_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                job.id,
                job.state.as_str(),
                serde_json::to_string(job)?,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get_result(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM job_results WHERE job_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(payload) => {
                let job = serde_json::from_str(&payload).map_err(|e| CorruptJob {
                    id: id.to_string(),
                    reason: format!("undecodable result payload: {}", e),
                })?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    fn unpublished_terminal(&self) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let columns = JOB_COLUMNS
            .split(", ")
            .map(|c| format!("j.{c} AS {c}", c = c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        Self::query_jobs(
            &conn,
            &format!(
                "SELECT {columns} FROM jobs j
                 LEFT JOIN job_results r ON r.job_id = j.id
                 WHERE j.state IN {TERMINAL_STATES} AND r.job_id IS NULL
                 ORDER BY j.seq"
            ),
            [],
        )
    }
}

/// Raw column values, decoded into a [`Job`] in a second step so that malformed data is
/// reported as [`CorruptJob`] rather than a generic SQL error.
struct JobRow {
    id: String,
    kind: String,
    target: String,
    config: String,
    priority: i32,
    state: String,
    attempts: u32,
    last_error: Option<String>,
    claimed_by: Option<String>,
    created_at: i64,
    updated_at: i64,
    available_at: i64,
    results: Option<String>,
    security_meta: Option<String>,
    ai_analysis: Option<String>,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(JobRow {
            id: row.get("id")?,
            kind: row.get("kind")?,
            target: row.get("target")?,
            config: row.get("config")?,
            priority: row.get("priority")?,
            state: row.get("state")?,
            attempts: row.get("attempts")?,
            last_error: row.get("last_error")?,
            claimed_by: row.get("claimed_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            available_at: row.get("available_at")?,
            results: row.get("results")?,
            security_meta: row.get("security_meta")?,
            ai_analysis: row.get("ai_analysis")?,
        })
    }

    fn into_job(self) -> Result<Job, CorruptJob> {
        let id = self.id;
        let corrupt = |reason: String| CorruptJob {
            id: id.clone(),
            reason,
        };

        let kind = self
            .kind
            .parse::<JobKind>()
            .map_err(|_| corrupt(format!("unknown kind '{}'", self.kind)))?;
        let state = JobState::from_db_str(&self.state)
            .ok_or_else(|| corrupt(format!("unknown state '{}'", self.state)))?;
        let config = serde_json::from_str(&self.config)
            .map_err(|e| corrupt(format!("config: {}", e)))?;
        let results = from_json_opt(self.results.as_deref())
            .map_err(|e| corrupt(format!("results: {}", e)))?;
        let security_meta = from_json_opt(self.security_meta.as_deref())
            .map_err(|e| corrupt(format!("security_meta: {}", e)))?;
        let ai_analysis = from_json_opt(self.ai_analysis.as_deref())
            .map_err(|e| corrupt(format!("ai_analysis: {}", e)))?;
        let created_at = from_millis(&id, self.created_at)?;
        let updated_at = from_millis(&id, self.updated_at)?;
        let available_at = from_millis(&id, self.available_at)?;

        Ok(Job {
            id,
            kind,
            target: self.target,
            config,
            priority: self.priority,
            created_at,
            updated_at,
            available_at,
            state,
            attempts: self.attempts,
            last_error: self.last_error,
            claimed_by: self.claimed_by,
            results,
            security_meta,
            ai_analysis,
        })
    }
}

fn from_millis(id: &str, ms: i64) -> Result<DateTime<Utc>, CorruptJob> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| CorruptJob {
        id: id.to_string(),
        reason: format!("timestamp {} out of range", ms),
    })
}

fn to_json_opt<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    Ok(match value {
        Some(v) => Some(serde_json::to_string(v)?),
        None => None,
    })
}

fn from_json_opt<T: serde::de::DeserializeOwned>(
    raw: Option<&str>,
) -> serde_json::Result<Option<T>> {
    raw.map(serde_json::from_str).transpose()
}
