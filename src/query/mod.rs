//! `slm query`: read job records and events straight from the store

use slm_protocol::JobStatus;
use slm_store::{JobRecord, JobStatistics, JobStore, StoreError, StoredEvent};
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::config::SlmConfig;
use crate::identity::slurm_job_id;

/// Events shown per job
pub const EVENT_LIMIT: u32 = 100;

/// Jobs listed per status
pub const STATUS_LIMIT: u32 = 20;

/// Longest command shown in text output
const COMMAND_WIDTH: usize = 100;

/// Query errors
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Database not available: direct store access is disabled")]
    Disabled,

    #[error("Database not found at {}", .0.display())]
    Missing(PathBuf),

    #[error("No job id given and SLURM_JOB_ID is not set")]
    NoJobId,

    #[error("No information found for job {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Query options as given on the command line
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub job_id: Option<String>,
    pub events: bool,
    pub recent: Option<u32>,
    pub status: Option<JobStatus>,
    pub stats: bool,
}

/// What to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    Job(String),
    Events(String),
    Recent(u32),
    Status(JobStatus),
    Statistics,
}

impl QueryTarget {
    /// Build a target from CLI arguments.
    ///
    /// Store-wide views win over a job id. A bare numeric id is taken to
    /// be a Slurm id; with no id the current job (`SLURM_JOB_ID`) is
    /// queried.
    pub fn from_args<F>(args: &QueryArgs, env: F) -> Result<Self, QueryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if args.stats {
            return Ok(QueryTarget::Statistics);
        }
        if let Some(status) = args.status {
            return Ok(QueryTarget::Status(status));
        }
        if let Some(limit) = args.recent {
            return Ok(QueryTarget::Recent(limit));
        }

        let job_id = match args.job_id.as_deref() {
            Some(id) if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => {
                slurm_job_id(id)
            }
            Some(id) => id.to_string(),
            None => env("SLURM_JOB_ID")
                .filter(|v| !v.is_empty())
                .map(|id| slurm_job_id(&id))
                .ok_or(QueryError::NoJobId)?,
        };

        Ok(if args.events {
            QueryTarget::Events(job_id)
        } else {
            QueryTarget::Job(job_id)
        })
    }
}

/// Open the configured store for reading.
pub fn open_store(config: &SlmConfig) -> Result<JobStore, QueryError> {
    if !config.db_enabled {
        return Err(QueryError::Disabled);
    }
    if !config.db_path.exists() {
        return Err(QueryError::Missing(config.db_path.clone()));
    }
    Ok(JobStore::open(&config.db_path)?)
}

/// Run a query and render its output, as text or pretty JSON.
pub fn run(store: &JobStore, target: &QueryTarget, json: bool) -> Result<String, QueryError> {
    match target {
        QueryTarget::Job(job_id) => {
            let job = store
                .get_job(job_id)?
                .ok_or_else(|| QueryError::NotFound(job_id.clone()))?;
            if json {
                Ok(serde_json::to_string_pretty(&job)?)
            } else {
                Ok(render_job(&job))
            }
        }
        QueryTarget::Events(job_id) => {
            let events = store.get_job_events(job_id, EVENT_LIMIT)?;
            if events.is_empty() {
                return Err(QueryError::NotFound(job_id.clone()));
            }
            if json {
                Ok(serde_json::to_string_pretty(&events)?)
            } else {
                Ok(render_events(job_id, &events))
            }
        }
        QueryTarget::Recent(limit) => {
            let jobs = store.recent_jobs(*limit)?;
            if json {
                Ok(serde_json::to_string_pretty(&jobs)?)
            } else {
                Ok(render_recent(*limit, &jobs))
            }
        }
        QueryTarget::Status(status) => {
            let jobs = store.jobs_by_status(*status, STATUS_LIMIT)?;
            if json {
                Ok(serde_json::to_string_pretty(&jobs)?)
            } else {
                Ok(render_status(*status, &jobs))
            }
        }
        QueryTarget::Statistics => {
            let stats = store.statistics()?;
            if json {
                Ok(serde_json::to_string_pretty(&stats)?)
            } else {
                Ok(render_statistics(&stats))
            }
        }
    }
}

fn separator(out: &mut String) {
    out.push_str(&"-".repeat(80));
    out.push('\n');
}

fn or_na(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("N/A")
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() > width {
        let mut cut: String = value.chars().take(width).collect();
        cut.push_str("...");
        cut
    } else {
        value.to_string()
    }
}

pub fn render_job(job: &JobRecord) -> String {
    let exit_code = job
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let command = truncate(or_na(&job.command), COMMAND_WIDTH);

    let rows = [
        ("Job ID", job.job_id.as_str()),
        ("Job Name", job.job_name.as_str()),
        ("Status", or_na(&job.status)),
        ("Source", or_na(&job.submission_source)),
        ("Partition", or_na(&job.partition_name)),
        ("Nodes", or_na(&job.nodes)),
        ("CPUs", or_na(&job.cpus)),
        ("GPUs", or_na(&job.gpus)),
        ("Memory", or_na(&job.memory)),
        ("Submitted", or_na(&job.submitted_at)),
        ("Started", or_na(&job.started_at)),
        ("Completed", or_na(&job.completed_at)),
        ("Exit Code", exit_code.as_str()),
        ("Script", or_na(&job.script_path)),
        ("Command", command.as_str()),
    ];

    let mut out = String::new();
    separator(&mut out);
    for (label, value) in rows {
        let _ = writeln!(out, "{:<15} {}", format!("{}:", label), value);
    }
    out
}

pub fn render_events(job_id: &str, events: &[StoredEvent]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Events for job {}:", job_id);
    separator(&mut out);
    for event in events {
        let _ = writeln!(
            out,
            "  {} | {:<15} | {:<12} | {}",
            event.created_at,
            event.event_type,
            event.event_status,
            truncate(&event.details, 60)
        );
    }
    out
}

fn job_table(out: &mut String, jobs: &[JobRecord]) {
    let _ = writeln!(
        out,
        "{:<24} | {:<25} | {:<12} | {:<6} | {}",
        "Job ID", "Name", "Status", "Exit", "Submitted"
    );
    separator(out);
    for job in jobs {
        let exit = job.exit_code.map(|c| c.to_string()).unwrap_or_default();
        let _ = writeln!(
            out,
            "{:<24} | {:<25} | {:<12} | {:<6} | {}",
            truncate(&job.job_id, 24),
            truncate(&job.job_name, 25),
            or_na(&job.status),
            exit,
            or_na(&job.submitted_at)
        );
    }
}

pub fn render_recent(limit: u32, jobs: &[JobRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Recent {} jobs:", limit);
    separator(&mut out);
    job_table(&mut out, jobs);
    out
}

pub fn render_status(status: JobStatus, jobs: &[JobRecord]) -> String {
    let mut out = String::new();
    if jobs.is_empty() {
        let _ = writeln!(out, "No jobs found with status '{}'", status);
        return out;
    }
    let _ = writeln!(out, "Jobs with status '{}':", status);
    separator(&mut out);
    job_table(&mut out, jobs);
    out
}

/// `3725` seconds as `1h 2m 5s`.
fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}h {}m {}s", total / 3600, (total % 3600) / 60, total % 60)
}

fn percent(part: u64, total: u64) -> u64 {
    if total == 0 {
        0
    } else {
        part * 100 / total
    }
}

pub fn render_statistics(stats: &JobStatistics) -> String {
    let mut out = String::new();
    out.push_str("Job Statistics:\n");
    separator(&mut out);

    out.push_str("Status Distribution:\n");
    for entry in &stats.by_status {
        let _ = writeln!(out, "  {:<15}: {:>5} jobs", or_na(&entry.status), entry.count);
    }
    separator(&mut out);

    out.push_str("Completion Statistics:\n");
    let _ = writeln!(out, "  Total completed: {}", stats.finished);
    let _ = writeln!(
        out,
        "  Successful:      {} ({}%)",
        stats.succeeded,
        percent(stats.succeeded, stats.finished)
    );
    let _ = writeln!(
        out,
        "  Failed:          {} ({}%)",
        stats.failed,
        percent(stats.failed, stats.finished)
    );

    if let Some(duration) = &stats.duration {
        separator(&mut out);
        out.push_str("Duration Statistics:\n");
        let _ = writeln!(out, "  Average: {}", format_duration(duration.average_seconds));
        let _ = writeln!(out, "  Minimum: {}", format_duration(duration.min_seconds as f64));
        let _ = writeln!(out, "  Maximum: {}", format_duration(duration.max_seconds as f64));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use slm_protocol::{JobRegistration, JobStatus, JobUpdate};

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn seeded() -> JobStore {
        let store = JobStore::in_memory().unwrap();
        store
            .register_job(&JobRegistration::new("slurm-7", "train"))
            .unwrap();
        store
            .update_status("slurm-7", JobStatus::Completed, &JobUpdate::exit_code(0))
            .unwrap();
        store
            .log_event("slurm-7", "lifecycle", "COMPLETED", "Job completed successfully", None)
            .unwrap();
        store
    }

    fn job_args(job_id: Option<&str>, events: bool) -> QueryArgs {
        QueryArgs {
            job_id: job_id.map(String::from),
            events,
            ..QueryArgs::default()
        }
    }

    #[test]
    fn test_target_from_args() {
        assert_eq!(
            QueryTarget::from_args(&job_args(Some("123"), false), no_env).unwrap(),
            QueryTarget::Job("slurm-123".to_string())
        );
        assert_eq!(
            QueryTarget::from_args(&job_args(Some("raw-abc"), true), no_env).unwrap(),
            QueryTarget::Events("raw-abc".to_string())
        );
        assert_eq!(
            QueryTarget::from_args(
                &QueryArgs {
                    recent: Some(5),
                    ..QueryArgs::default()
                },
                no_env
            )
            .unwrap(),
            QueryTarget::Recent(5)
        );
        assert_eq!(
            QueryTarget::from_args(&job_args(None, false), |k| {
                (k == "SLURM_JOB_ID").then(|| "99".to_string())
            })
            .unwrap(),
            QueryTarget::Job("slurm-99".to_string())
        );
        assert!(matches!(
            QueryTarget::from_args(&job_args(None, false), no_env),
            Err(QueryError::NoJobId)
        ));
    }

    #[test]
    fn test_store_wide_targets_need_no_job_id() {
        let status = QueryArgs {
            status: Some(JobStatus::Failed),
            ..QueryArgs::default()
        };
        assert_eq!(
            QueryTarget::from_args(&status, no_env).unwrap(),
            QueryTarget::Status(JobStatus::Failed)
        );

        let stats = QueryArgs {
            stats: true,
            recent: Some(3),
            ..QueryArgs::default()
        };
        assert_eq!(
            QueryTarget::from_args(&stats, no_env).unwrap(),
            QueryTarget::Statistics
        );
    }

    #[test]
    fn test_query_job_text_and_json() {
        let store = seeded();
        let target = QueryTarget::Job("slurm-7".to_string());

        let text = run(&store, &target, false).unwrap();
        assert!(text.contains("Job Name:       train"));
        assert!(text.contains("Status:         COMPLETED"));
        assert!(text.contains("Exit Code:      0"));

        let json: serde_json::Value = serde_json::from_str(&run(&store, &target, true).unwrap()).unwrap();
        assert_eq!(json["status"], "COMPLETED");
    }

    #[test]
    fn test_query_events_and_recent() {
        let store = seeded();
        let events = run(&store, &QueryTarget::Events("slurm-7".to_string()), false).unwrap();
        assert!(events.contains("COMPLETED"));
        assert!(events.contains("Job completed successfully"));

        let recent = run(&store, &QueryTarget::Recent(10), false).unwrap();
        assert!(recent.contains("slurm-7"));
    }

    #[test]
    fn test_query_by_status() {
        let store = seeded();
        store
            .register_job(&JobRegistration::new("slurm-8", "eval"))
            .unwrap();

        let text = run(&store, &QueryTarget::Status(JobStatus::Completed), false).unwrap();
        assert!(text.starts_with("Jobs with status 'COMPLETED':"));
        assert!(text.contains("slurm-7"));
        assert!(!text.contains("slurm-8"));

        let none = run(&store, &QueryTarget::Status(JobStatus::Paused), false).unwrap();
        assert_eq!(none, "No jobs found with status 'PAUSED'\n");

        let json: serde_json::Value =
            serde_json::from_str(&run(&store, &QueryTarget::Status(JobStatus::Submitted), true).unwrap())
                .unwrap();
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["job_id"], "slurm-8");
    }

    #[test]
    fn test_query_statistics() {
        let store = seeded();
        store
            .register_job(&JobRegistration::new("slurm-8", "eval"))
            .unwrap();
        store
            .update_status("slurm-8", JobStatus::Failed, &JobUpdate::exit_code(2))
            .unwrap();

        let text = run(&store, &QueryTarget::Statistics, false).unwrap();
        assert!(text.contains("Status Distribution:"));
        assert!(text.contains("  COMPLETED      :     1 jobs"));
        assert!(text.contains("  Total completed: 2"));
        assert!(text.contains("  Successful:      1 (50%)"));
        assert!(text.contains("  Failed:          1 (50%)"));

        let json: serde_json::Value =
            serde_json::from_str(&run(&store, &QueryTarget::Statistics, true).unwrap()).unwrap();
        assert_eq!(json["finished"], 2);
        assert_eq!(json["succeeded"], 1);
        assert_eq!(json["failed"], 1);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(3725.4), "1h 2m 5s");
        assert_eq!(format_duration(59.0), "0h 0m 59s");
        assert_eq!(percent(1, 0), 0);
    }

    #[test]
    fn test_query_unknown_job() {
        let store = seeded();
        assert!(matches!(
            run(&store, &QueryTarget::Job("slurm-1".to_string()), false),
            Err(QueryError::NotFound(_))
        ));
        assert!(matches!(
            run(&store, &QueryTarget::Events("slurm-1".to_string()), false),
            Err(QueryError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_store_requirements() {
        let config = SlmConfig {
            db_enabled: false,
            ..SlmConfig::default()
        };
        assert!(matches!(open_store(&config), Err(QueryError::Disabled)));

        let dir = tempfile::tempdir().unwrap();
        let config = SlmConfig {
            db_path: dir.path().join("absent.db"),
            ..SlmConfig::default()
        };
        assert!(matches!(open_store(&config), Err(QueryError::Missing(_))));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
