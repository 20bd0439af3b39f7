//! SQLite-backed job store.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use slm_protocol::{JobRegistration, JobStatus, JobUpdate};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::record::{DurationSummary, JobRecord, JobStatistics, StatusCount, StoredEvent};
use crate::StoreError;

/// How long a writer waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL UNIQUE,
        job_name TEXT NOT NULL,
        submission_source TEXT,
        script_path TEXT,
        command TEXT,
        nodes TEXT,
        cpus TEXT,
        gpus TEXT,
        memory TEXT,
        partition_name TEXT,
        submitted_at TEXT,
        started_at TEXT,
        completed_at TEXT,
        status TEXT,
        exit_code INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
    CREATE INDEX IF NOT EXISTS idx_jobs_submitted_at ON jobs(submitted_at);

    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        event_status TEXT NOT NULL,
        details TEXT NOT NULL DEFAULT '',
        metadata TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_events_job_id ON events(job_id);
    CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);
";

const JOB_COLUMNS: &str = "id, job_id, job_name, submission_source, script_path, command, \
     nodes, cpus, gpus, memory, partition_name, status, exit_code, \
     submitted_at, started_at, completed_at, created_at, updated_at";

/// Timestamp column stamped when a job enters `status`, if any.
pub fn timestamp_column(status: JobStatus) -> Option<&'static str> {
    match status {
        JobStatus::Submitted => Some("submitted_at"),
        JobStatus::Running => Some("started_at"),
        JobStatus::Completed | JobStatus::Failed | JobStatus::Terminating => Some("completed_at"),
        _ => None,
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

/// Job and event store over a single SQLite connection.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::bootstrap(conn)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(target: "slm::store", "tables verified");
        Ok(Self { conn })
    }

    /// Run a trivial query to check the connection is usable.
    pub fn ping(&self) -> Result<(), StoreError> {
        self.conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Insert a job, or fill in the supplied fields of an existing one.
    ///
    /// On update only fields that are `Some` are written; `job_name` and
    /// `status` of an existing record are left alone. New records start
    /// as `SUBMITTED`. Returns the record id.
    pub fn register_job(&self, registration: &JobRegistration) -> Result<i64, StoreError> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM jobs WHERE job_id = ?1",
                params![registration.job_id],
                |row| row.get(0),
            )
            .optional()?;

        let supplied: Vec<(&'static str, &str)> = registration
            .optional_fields()
            .into_iter()
            .filter_map(|(column, value)| value.map(|v| (column, v)))
            .collect();

        let stamp = now();

        if let Some(id) = existing {
            if !supplied.is_empty() {
                let mut assignments: Vec<String> = supplied
                    .iter()
                    .enumerate()
                    .map(|(i, (column, _))| format!("{} = ?{}", column, i + 1))
                    .collect();
                assignments.push(format!("updated_at = ?{}", supplied.len() + 1));

                let mut values: Vec<Value> = supplied.iter().map(|(_, v)| text(v)).collect();
                values.push(text(&stamp));
                values.push(text(&registration.job_id));

                let sql = format!(
                    "UPDATE jobs SET {} WHERE job_id = ?{}",
                    assignments.join(", "),
                    values.len()
                );
                self.conn.execute(&sql, params_from_iter(values.iter()))?;
            }
            return Ok(id);
        }

        let mut columns = vec!["job_id", "job_name", "status", "created_at", "updated_at"];
        let mut values = vec![
            text(&registration.job_id),
            text(&registration.job_name),
            text(&JobStatus::Submitted.as_str()),
            text(&stamp),
            text(&stamp),
        ];
        for (column, value) in &supplied {
            columns.push(*column);
            values.push(text(value));
        }

        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO jobs ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Set a job's status, stamp the matching timestamp column and apply
    /// the supplied field updates.
    ///
    /// A record never leaves COMPLETED or FAILED and never goes back to
    /// SUBMITTED; such updates are skipped whole. Returns `false` when no
    /// record has this `job_id`.
    pub fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        update: &JobUpdate,
    ) -> Result<bool, StoreError> {
        let current: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT status FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(false);
        };
        if let Some(current) = current.as_deref().and_then(|s| s.parse::<JobStatus>().ok()) {
            if !status.may_replace(current) {
                tracing::debug!(target: "slm::store", %job_id, %current, %status, "status kept");
                return Ok(true);
            }
        }

        let stamp = now();
        let mut assignments = vec!["status".to_string()];
        let mut values = vec![text(&status.as_str())];

        if let Some(column) = timestamp_column(status) {
            assignments.push(column.to_string());
            values.push(text(&stamp));
        }
        if let Some(code) = update.exit_code {
            assignments.push("exit_code".to_string());
            values.push(Value::Integer(i64::from(code)));
        }
        for (column, value) in update.text_fields() {
            if let Some(value) = value {
                assignments.push(column.to_string());
                values.push(text(value));
            }
        }
        assignments.push("updated_at".to_string());
        values.push(text(&stamp));

        let set: Vec<String> = assignments
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 1))
            .collect();
        values.push(text(job_id));

        let sql = format!(
            "UPDATE jobs SET {} WHERE job_id = ?{}",
            set.join(", "),
            values.len()
        );
        let changed = self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(changed > 0)
    }

    /// Append an event. The job does not need to exist.
    pub fn log_event(
        &self,
        job_id: &str,
        event_type: &str,
        event_status: &str,
        details: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<i64, StoreError> {
        let metadata = metadata.map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO events (job_id, event_type, event_status, details, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![job_id, event_type, event_status, details, metadata, now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Fetch one job record.
    pub fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let sql = format!("SELECT {} FROM jobs WHERE job_id = ?1", JOB_COLUMNS);
        let record = self
            .conn
            .query_row(&sql, params![job_id], map_job)
            .optional()?;
        Ok(record)
    }

    /// Most recently created jobs, newest first.
    pub fn recent_jobs(&self, limit: u32) -> Result<Vec<JobRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?1",
            JOB_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit], map_job)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Jobs currently in `status`, most recently submitted first. Jobs
    /// never seen as SUBMITTED are ordered by their creation time.
    pub fn jobs_by_status(&self, status: JobStatus, limit: u32) -> Result<Vec<JobRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE status = ?1
             ORDER BY COALESCE(submitted_at, created_at) DESC, id DESC LIMIT ?2",
            JOB_COLUMNS
        );
        let status = status.to_string();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status, limit], map_job)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Status distribution, exit-code outcome of finished jobs and run
    /// time figures.
    pub fn statistics(&self) -> Result<JobStatistics, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) AS n FROM jobs GROUP BY status ORDER BY n DESC, status",
        )?;
        let by_status = stmt
            .query_map([], |row| {
                Ok(StatusCount {
                    status: row.get(0)?,
                    count: row.get::<_, i64>(1)?.max(0) as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let (finished, succeeded, failed): (i64, i64, i64) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN exit_code = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN exit_code != 0 THEN 1 ELSE 0 END), 0)
             FROM jobs WHERE completed_at IS NOT NULL",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT started_at, completed_at FROM jobs
             WHERE started_at IS NOT NULL AND completed_at IS NOT NULL",
        )?;
        let spans = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let seconds: Vec<i64> = spans
            .iter()
            .filter_map(|(started, completed)| {
                let started = DateTime::parse_from_rfc3339(started).ok()?;
                let completed = DateTime::parse_from_rfc3339(completed).ok()?;
                Some((completed - started).num_seconds())
            })
            .collect();

        Ok(JobStatistics {
            by_status,
            finished: finished.max(0) as u64,
            succeeded: succeeded.max(0) as u64,
            failed: failed.max(0) as u64,
            duration: summarize_durations(&seconds),
        })
    }

    /// Events of one job, newest first.
    pub fn get_job_events(&self, job_id: &str, limit: u32) -> Result<Vec<StoredEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_id, event_type, event_status, details, metadata, created_at
             FROM events
             WHERE job_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![job_id, limit], |row| {
            Ok((
                StoredEvent {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    event_type: row.get(2)?,
                    event_status: row.get(3)?,
                    details: row.get(4)?,
                    metadata: None,
                    created_at: row.get(6)?,
                },
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (mut event, raw) = row?;
            event.metadata = raw.as_deref().map(serde_json::from_str).transpose()?;
            events.push(event);
        }
        Ok(events)
    }
}

fn summarize_durations(seconds: &[i64]) -> Option<DurationSummary> {
    let min_seconds = *seconds.iter().min()?;
    let max_seconds = *seconds.iter().max()?;
    let total: i64 = seconds.iter().sum();
    Some(DurationSummary {
        jobs: seconds.len() as u64,
        average_seconds: total as f64 / seconds.len() as f64,
        min_seconds,
        max_seconds,
    })
}

fn map_job(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        job_name: row.get(2)?,
        submission_source: row.get(3)?,
        script_path: row.get(4)?,
        command: row.get(5)?,
        nodes: row.get(6)?,
        cpus: row.get(7)?,
        gpus: row.get(8)?,
        memory: row.get(9)?,
        partition_name: row.get(10)?,
        status: row.get(11)?,
        exit_code: row.get(12)?,
        submitted_at: row.get(13)?,
        started_at: row.get(14)?,
        completed_at: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use slm_protocol::SubmissionSource;

    fn registration(job_id: &str) -> JobRegistration {
        JobRegistration {
            submission_source: Some(SubmissionSource::PreRegistered),
            script_path: Some("/home/u/job.sh".to_string()),
            nodes: Some("unknown".to_string()),
            ..JobRegistration::new(job_id, "train")
        }
    }

    #[test]
    fn test_register_inserts_submitted() {
        let store = JobStore::in_memory().unwrap();
        let id = store.register_job(&registration("slurm-1")).unwrap();
        assert!(id > 0);

        let job = store.get_job("slurm-1").unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.job_name, "train");
        assert_eq!(job.status.as_deref(), Some("SUBMITTED"));
        assert_eq!(job.submission_source.as_deref(), Some("slm_submit"));
        assert_eq!(job.script_path.as_deref(), Some("/home/u/job.sh"));
        assert_eq!(job.command, None);
    }

    #[test]
    fn test_register_existing_keeps_non_null_fields() {
        let store = JobStore::in_memory().unwrap();
        let first = store.register_job(&registration("slurm-2")).unwrap();

        let mut later = JobRegistration::new("slurm-2", "renamed");
        later.command = Some("python train.py".to_string());
        let second = store.register_job(&later).unwrap();
        assert_eq!(first, second);

        let job = store.get_job("slurm-2").unwrap().unwrap();
        assert_eq!(job.job_name, "train");
        assert_eq!(job.script_path.as_deref(), Some("/home/u/job.sh"));
        assert_eq!(job.submission_source.as_deref(), Some("slm_submit"));
        assert_eq!(job.command.as_deref(), Some("python train.py"));
    }

    #[test]
    fn test_register_existing_does_not_reset_status() {
        let store = JobStore::in_memory().unwrap();
        store.register_job(&registration("slurm-3")).unwrap();
        store
            .update_status("slurm-3", JobStatus::Running, &JobUpdate::default())
            .unwrap();
        store.register_job(&registration("slurm-3")).unwrap();

        let job = store.get_job("slurm-3").unwrap().unwrap();
        assert_eq!(job.status.as_deref(), Some("RUNNING"));
    }

    #[test]
    fn test_update_status_stamps_timestamps() {
        let store = JobStore::in_memory().unwrap();
        store.register_job(&registration("slurm-4")).unwrap();

        assert!(store
            .update_status("slurm-4", JobStatus::Running, &JobUpdate::default())
            .unwrap());
        let job = store.get_job("slurm-4").unwrap().unwrap();
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_none());

        assert!(store
            .update_status("slurm-4", JobStatus::Paused, &JobUpdate::default())
            .unwrap());
        let job = store.get_job("slurm-4").unwrap().unwrap();
        assert_eq!(job.status.as_deref(), Some("PAUSED"));
        assert!(job.completed_at.is_none());

        assert!(store
            .update_status("slurm-4", JobStatus::Failed, &JobUpdate::exit_code(7))
            .unwrap());
        let job = store.get_job("slurm-4").unwrap().unwrap();
        assert_eq!(job.status.as_deref(), Some("FAILED"));
        assert_eq!(job.exit_code, Some(7));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_update_status_keeps_finished_record() {
        let store = JobStore::in_memory().unwrap();
        store.register_job(&registration("slurm-5")).unwrap();
        store
            .update_status("slurm-5", JobStatus::Completed, &JobUpdate::exit_code(0))
            .unwrap();

        let found = store
            .update_status("slurm-5", JobStatus::Submitted, &JobUpdate::script_path("/tmp/other.sh"))
            .unwrap();
        assert!(found);

        let job = store.get_job("slurm-5").unwrap().unwrap();
        assert_eq!(job.status.as_deref(), Some("COMPLETED"));
        assert_eq!(job.exit_code, Some(0));
        assert_eq!(job.script_path.as_deref(), Some("/home/u/job.sh"));
    }

    #[test]
    fn test_update_status_never_returns_to_submitted() {
        let store = JobStore::in_memory().unwrap();
        store.register_job(&registration("slurm-6")).unwrap();
        store
            .update_status("slurm-6", JobStatus::Running, &JobUpdate::default())
            .unwrap();
        store
            .update_status("slurm-6", JobStatus::Submitted, &JobUpdate::default())
            .unwrap();

        let job = store.get_job("slurm-6").unwrap().unwrap();
        assert_eq!(job.status.as_deref(), Some("RUNNING"));
    }

    #[test]
    fn test_update_status_unknown_job() {
        let store = JobStore::in_memory().unwrap();
        let found = store
            .update_status("slurm-404", JobStatus::Running, &JobUpdate::default())
            .unwrap();
        assert!(!found);
    }

    #[test]
    fn test_events_without_job_and_ordering() {
        let store = JobStore::in_memory().unwrap();
        let meta = serde_json::json!({"timestamp": "2026-01-01T00:00:00Z"});
        store
            .log_event("raw-x", "lifecycle", "RUNNING", "Command: true", Some(&meta))
            .unwrap();
        store
            .log_event("raw-x", "lifecycle", "COMPLETED", "", None)
            .unwrap();

        let events = store.get_job_events("raw-x", 100).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_status, "COMPLETED");
        assert_eq!(events[1].event_status, "RUNNING");
        assert_eq!(events[1].metadata.as_ref().unwrap()["timestamp"], "2026-01-01T00:00:00Z");
        assert!(store.get_job("raw-x").unwrap().is_none());
    }

    #[test]
    fn test_recent_jobs_limit() {
        let store = JobStore::in_memory().unwrap();
        for i in 0..5 {
            store
                .register_job(&JobRegistration::new(format!("slurm-{}", i), "job"))
                .unwrap();
        }
        let recent = store.recent_jobs(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].job_id, "slurm-4");
    }

    fn finished(store: &JobStore, job_id: &str, code: i32, started: &str, completed: &str) {
        store.register_job(&JobRegistration::new(job_id, "job")).unwrap();
        let status = if code == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        store
            .update_status(job_id, status, &JobUpdate::exit_code(code))
            .unwrap();
        store
            .conn
            .execute(
                "UPDATE jobs SET started_at = ?1, completed_at = ?2 WHERE job_id = ?3",
                params![started, completed, job_id],
            )
            .unwrap();
    }

    #[test]
    fn test_jobs_by_status() {
        let store = JobStore::in_memory().unwrap();
        for id in ["slurm-10", "slurm-11", "slurm-12"] {
            store.register_job(&JobRegistration::new(id, "job")).unwrap();
        }
        store
            .update_status("slurm-10", JobStatus::Running, &JobUpdate::default())
            .unwrap();
        store
            .update_status("slurm-12", JobStatus::Running, &JobUpdate::default())
            .unwrap();

        let running = store.jobs_by_status(JobStatus::Running, 20).unwrap();
        let ids: Vec<&str> = running.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, vec!["slurm-12", "slurm-10"]);

        assert_eq!(store.jobs_by_status(JobStatus::Running, 1).unwrap().len(), 1);
        assert!(store.jobs_by_status(JobStatus::Paused, 20).unwrap().is_empty());
    }

    #[test]
    fn test_statistics() {
        let store = JobStore::in_memory().unwrap();
        finished(&store, "slurm-20", 0, "2026-01-01T10:00:00.000000Z", "2026-01-01T10:01:00.000000Z");
        finished(&store, "slurm-21", 0, "2026-01-01T10:00:00.000000Z", "2026-01-01T11:00:00.000000Z");
        finished(&store, "slurm-22", 2, "2026-01-01T10:00:00.000000Z", "2026-01-01T10:00:30.000000Z");
        store.register_job(&JobRegistration::new("slurm-23", "job")).unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(
            stats.by_status[0],
            StatusCount {
                status: Some("COMPLETED".to_string()),
                count: 2
            }
        );
        assert_eq!(stats.by_status.len(), 3);
        assert_eq!(stats.finished, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);

        let duration = stats.duration.unwrap();
        assert_eq!(duration.jobs, 3);
        assert_eq!(duration.min_seconds, 30);
        assert_eq!(duration.max_seconds, 3600);
        assert!((duration.average_seconds - 1230.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_statistics_empty_store() {
        let stats = JobStore::in_memory().unwrap().statistics().unwrap();
        assert!(stats.by_status.is_empty());
        assert_eq!(stats.finished, 0);
        assert_eq!(stats.duration, None);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("slm.db");
        {
            let store = JobStore::open(&path).unwrap();
            store.register_job(&registration("slurm-9")).unwrap();
        }
        let reopened = JobStore::open(&path).unwrap();
        assert!(reopened.get_job("slurm-9").unwrap().is_some());
    }
}
