//! `slm submit`: hand a batch script to sbatch and pre-register the job
//!
//! The job is only registered once sbatch has printed its id, so a failed
//! or unparseable submission leaves no record behind.

use regex_lite::Regex;
use slm_protocol::{JobStatus, JobUpdate, SubmissionSource};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::SlmConfig;
use crate::identity::{slurm_job_id, JobIdentity};
use crate::recorder::{LifecycleRecorder, RecordError};
use crate::transport;

const SUBMITTED_PATTERN: &str = r"Submitted batch job (\d+)";

/// Submission errors
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("sbatch failed with code {code}: {stderr}")]
    Sbatch { code: i32, stderr: String },

    #[error("Failed to parse sbatch output: {0:?}")]
    Parse(String),
}

impl SubmitError {
    /// Process exit code for this failure; sbatch's own code is passed on.
    pub fn exit_code(&self) -> i32 {
        match self {
            SubmitError::Sbatch { code, .. } => *code,
            _ => 1,
        }
    }
}

/// A successfully submitted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Id as printed by sbatch
    pub raw_id: String,
    /// Qualified id used in the store
    pub job_id: String,
    pub script_path: PathBuf,
}

/// Extract the numeric job id from sbatch's stdout.
pub fn parse_sbatch_output(stdout: &str) -> Option<&str> {
    let re = Regex::new(SUBMITTED_PATTERN).ok()?;
    re.captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Submit `script` and register the job with the configured transport.
pub fn submit(
    config: &SlmConfig,
    script: &Path,
    sbatch_args: Option<&str>,
) -> Result<Submission, SubmitError> {
    if !script.is_file() {
        return Err(SubmitError::ScriptNotFound(script.to_path_buf()));
    }
    let script_path = std::fs::canonicalize(script).unwrap_or_else(|_| script.to_path_buf());

    let mut command = Command::new(&config.sbatch);
    if let Some(args) = sbatch_args {
        command.args(args.split_whitespace());
    }
    command.arg(script);

    tracing::info!(script = %script.display(), "submitting job");
    let output = command.output().map_err(|source| SubmitError::Spawn {
        program: config.sbatch.clone(),
        source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::error!("sbatch failed: {}", stderr);
        return Err(SubmitError::Sbatch {
            code: output.status.code().unwrap_or(1),
            stderr,
        });
    }

    let raw_id = parse_sbatch_output(&stdout)
        .ok_or_else(|| SubmitError::Parse(stdout.trim().to_string()))?
        .to_string();
    let submission = Submission {
        job_id: slurm_job_id(&raw_id),
        raw_id,
        script_path,
    };

    let recorder = LifecycleRecorder::new(submission_identity(&submission), transport::select(config));
    record_submission(&recorder, &submission);
    recorder.close();

    Ok(submission)
}

/// Sbatch names a job after its script unless told otherwise. Resources
/// are left to the job itself; only name, id and source are used here.
fn submission_identity(submission: &Submission) -> JobIdentity {
    let job_name = submission
        .script_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| slm_protocol::UNKNOWN.to_string());

    JobIdentity {
        job_name,
        ..JobIdentity::resolve_from(|_| None)
    }
    .with_job_id(submission.job_id.clone())
    .with_source(SubmissionSource::PreRegistered)
}

/// Register the job and move it to SUBMITTED. A record the job has
/// already written keeps its resources and its later status.
fn record_submission(recorder: &LifecycleRecorder, submission: &Submission) {
    let script = submission.script_path.to_string_lossy().into_owned();
    let steps: [Result<(), RecordError>; 3] = [
        recorder.register_submitted(&script).map(drop),
        recorder
            .transition(JobStatus::Submitted, JobUpdate::script_path(script.as_str()))
            .map(drop),
        recorder
            .log(
                JobStatus::Submitted,
                &format!("Script: {}, Job ID: {}", script, submission.raw_id),
            )
            .map(drop),
    ];

    for result in steps {
        match result {
            Ok(()) | Err(RecordError::Disabled) => {}
            Err(e) => tracing::warn!(job_id = %submission.job_id, "failed to record submission: {}", e),
        }
    }
}
