//! Job status and submission source enumerations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a job.
///
/// `SUBMITTED → RUNNING → {PAUSED ⇄ RUNNING (via RESUMED)} → TERMINATING → {COMPLETED | FAILED}`
///
/// Signals without a dedicated status are carried as [`JobStatus::Signal`],
/// which serializes as `SIGNAL_<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JobStatus {
    /// Accepted by the scheduler, not yet started
    Submitted,
    /// Command is executing
    Running,
    /// Suspended by the scheduler
    Paused,
    /// Resumed after a suspension
    Resumed,
    /// Termination requested; the supervisor is exiting
    Terminating,
    /// Command exited with code 0
    Completed,
    /// Command exited nonzero or could not be launched
    Failed,
    /// Unrecognised signal, by number
    Signal(i32),
}

impl JobStatus {
    /// Statuses after which the record is not expected to change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a record currently at `current` may move to `self`.
    ///
    /// Terminal records keep their status, and SUBMITTED is only written
    /// over SUBMITTED.
    pub fn may_replace(&self, current: JobStatus) -> bool {
        if current.is_terminal() {
            return false;
        }
        *self != JobStatus::Submitted || current == JobStatus::Submitted
    }

    /// Canonical upper-case name, as stored and sent over the wire.
    pub fn as_str(&self) -> std::borrow::Cow<'static, str> {
        use std::borrow::Cow;
        match self {
            JobStatus::Submitted => Cow::Borrowed("SUBMITTED"),
            JobStatus::Running => Cow::Borrowed("RUNNING"),
            JobStatus::Paused => Cow::Borrowed("PAUSED"),
            JobStatus::Resumed => Cow::Borrowed("RESUMED"),
            JobStatus::Terminating => Cow::Borrowed("TERMINATING"),
            JobStatus::Completed => Cow::Borrowed("COMPLETED"),
            JobStatus::Failed => Cow::Borrowed("FAILED"),
            JobStatus::Signal(n) => Cow::Owned(format!("SIGNAL_{}", n)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Error for status strings outside the known vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(JobStatus::Submitted),
            "RUNNING" => Ok(JobStatus::Running),
            "PAUSED" => Ok(JobStatus::Paused),
            "RESUMED" => Ok(JobStatus::Resumed),
            "TERMINATING" => Ok(JobStatus::Terminating),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => other
                .strip_prefix("SIGNAL_")
                .and_then(|n| n.parse::<i32>().ok())
                .map(JobStatus::Signal)
                .ok_or_else(|| ParseStatusError(other.to_string())),
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().into_owned()
    }
}

/// How a job record came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionSource {
    /// Registered by `slm submit` before the scheduler started it
    #[serde(rename = "slm_submit")]
    PreRegistered,
    /// Started by the scheduler with no prior registration
    #[serde(rename = "direct_sbatch")]
    Direct,
    /// Run outside any scheduler
    #[serde(rename = "local_test")]
    Local,
}

impl SubmissionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionSource::PreRegistered => "slm_submit",
            SubmissionSource::Direct => "direct_sbatch",
            SubmissionSource::Local => "local_test",
        }
    }
}

impl fmt::Display for SubmissionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionSource {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slm_submit" => Ok(SubmissionSource::PreRegistered),
            "direct_sbatch" => Ok(SubmissionSource::Direct),
            "local_test" => Ok(SubmissionSource::Local),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(JobStatus::Running.to_string(), "RUNNING");
        assert_eq!(JobStatus::Terminating.to_string(), "TERMINATING");
        assert_eq!(JobStatus::Signal(10).to_string(), "SIGNAL_10");
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("PAUSED".parse::<JobStatus>().unwrap(), JobStatus::Paused);
        assert_eq!("SIGNAL_12".parse::<JobStatus>().unwrap(), JobStatus::Signal(12));
        assert!("SIGNAL_x".parse::<JobStatus>().is_err());
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_serde_as_string() {
        let json = serde_json::to_string(&JobStatus::Resumed).unwrap();
        assert_eq!(json, "\"RESUMED\"");
        let back: JobStatus = serde_json::from_str("\"SIGNAL_15\"").unwrap();
        assert_eq!(back, JobStatus::Signal(15));
        assert!(serde_json::from_str::<JobStatus>("\"BOGUS\"").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Terminating.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }

    #[test]
    fn test_status_only_moves_forward() {
        assert!(JobStatus::Running.may_replace(JobStatus::Submitted));
        assert!(JobStatus::Failed.may_replace(JobStatus::Terminating));
        assert!(JobStatus::Submitted.may_replace(JobStatus::Submitted));
        assert!(!JobStatus::Submitted.may_replace(JobStatus::Running));
        assert!(!JobStatus::Submitted.may_replace(JobStatus::Completed));
        assert!(!JobStatus::Running.may_replace(JobStatus::Failed));
        assert!(!JobStatus::Failed.may_replace(JobStatus::Completed));
    }

    #[test]
    fn test_submission_source_wire_names() {
        assert_eq!(
            serde_json::to_string(&SubmissionSource::Direct).unwrap(),
            "\"direct_sbatch\""
        );
        assert_eq!(
            "local_test".parse::<SubmissionSource>().unwrap(),
            SubmissionSource::Local
        );
    }
}
