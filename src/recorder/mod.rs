//! Lifecycle recorder
//!
//! Binds a [`JobIdentity`] to the transport chosen at startup and turns
//! lifecycle steps into registrations, status transitions and events.
//! Every failure is contained here: callers get a [`RecordError`] to log,
//! never a panic, and a missing transport only degrades reporting to the
//! console.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use slm_protocol::{
    EventRequest, JobRegistration, JobStatus, JobUpdate, SubmissionSource, EVENT_TYPE_LIFECYCLE,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::identity::JobIdentity;
use crate::transport::{StatusTransport, TransportError};

/// Recorder errors
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("No reporting transport configured")]
    Disabled,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Records one job's lifecycle through an optional transport.
pub struct LifecycleRecorder {
    identity: JobIdentity,
    transport: Option<Arc<dyn StatusTransport>>,
    closed: AtomicBool,
}

impl LifecycleRecorder {
    pub fn new(identity: JobIdentity, transport: Option<Arc<dyn StatusTransport>>) -> Self {
        Self {
            identity,
            transport,
            closed: AtomicBool::new(false),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.identity.job_id
    }

    fn transport(&self) -> Result<&Arc<dyn StatusTransport>, RecordError> {
        self.transport.as_ref().ok_or(RecordError::Disabled)
    }

    /// Register the job, or fill in fields of an existing record.
    ///
    /// Resource fields come from the identity; absent arguments are left
    /// out so existing values are never cleared.
    pub fn register(
        &self,
        script_path: Option<&str>,
        command: Option<&str>,
        source: Option<SubmissionSource>,
    ) -> Result<Option<i64>, RecordError> {
        let transport = self.transport()?;
        let mut registration = self.identity.registration();
        registration.script_path = script_path.map(String::from);
        registration.command = command.map(String::from);
        registration.submission_source = source;
        Ok(transport.register_job(&registration)?)
    }

    /// Register a job the scheduler has accepted but not started.
    ///
    /// Only name, script and source are sent; resources are unknown at
    /// this point and a record the job has already written keeps its own.
    pub fn register_submitted(&self, script_path: &str) -> Result<Option<i64>, RecordError> {
        let transport = self.transport()?;
        let registration = JobRegistration {
            script_path: Some(script_path.to_string()),
            submission_source: Some(self.identity.submission_source),
            ..JobRegistration::new(&self.identity.job_id, &self.identity.job_name)
        };
        Ok(transport.register_job(&registration)?)
    }

    /// Move the job to `status`.
    ///
    /// `Ok(false)` means the transport has no record for this job.
    pub fn transition(&self, status: JobStatus, update: JobUpdate) -> Result<bool, RecordError> {
        let transport = self.transport()?;
        match transport.update_status(&self.identity.job_id, status, &update) {
            Ok(()) => Ok(true),
            Err(TransportError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Append a lifecycle event and echo it to the console.
    pub fn log(&self, status: JobStatus, details: &str) -> Result<Option<i64>, RecordError> {
        self.log_with(status, details, Value::Null)
    }

    /// Like [`log`](Self::log), merging the members of `extra` into the
    /// event metadata.
    pub fn log_with(
        &self,
        status: JobStatus,
        details: &str,
        extra: Value,
    ) -> Result<Option<i64>, RecordError> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        tracing::info!(
            target: "slm::lifecycle",
            job_id = %self.identity.job_id,
            %status,
            "{}",
            details
        );

        let transport = self.transport()?;
        let mut metadata = json!({ "timestamp": timestamp });
        if let (Some(meta), Value::Object(extra)) = (metadata.as_object_mut(), extra) {
            meta.extend(extra);
        }

        let event = EventRequest {
            job_id: self.identity.job_id.clone(),
            event_type: EVENT_TYPE_LIFECYCLE.to_string(),
            event_status: status.to_string(),
            details: details.to_string(),
            metadata: Some(metadata),
        };
        Ok(transport.log_event(&event)?)
    }

    /// Record the move to RUNNING and settle the submission source.
    ///
    /// Local runs register first. Scheduled runs try the transition
    /// first: a hit means `slm submit` registered the job, a miss means it
    /// came straight from sbatch and gets registered before one retry.
    pub fn start_running(&mut self, command: &str) -> SubmissionSource {
        let source = match self.identity.submission_source {
            SubmissionSource::Local => self.start_local(command),
            _ => self.start_scheduled(command),
        };
        self.identity.submission_source = source;
        source
    }

    fn running_update(&self, command: &str) -> JobUpdate {
        JobUpdate {
            command: Some(command.to_string()),
            ..self.identity.resource_update()
        }
    }

    fn start_local(&self, command: &str) -> SubmissionSource {
        if let Err(e) = self.register(None, Some(command), Some(SubmissionSource::Local)) {
            tracing::warn!(job_id = %self.identity.job_id, "failed to register local job: {}", e);
        }
        match self.transition(JobStatus::Running, self.running_update(command)) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job_id = %self.identity.job_id, "local job missing after registration")
            }
            Err(e) => {
                tracing::warn!(job_id = %self.identity.job_id, "failed to record RUNNING: {}", e)
            }
        }
        SubmissionSource::Local
    }

    fn start_scheduled(&self, command: &str) -> SubmissionSource {
        let job_id = &self.identity.job_id;
        match self.transition(JobStatus::Running, self.running_update(command)) {
            Ok(true) => {
                tracing::info!(%job_id, "job was registered at submission");
                SubmissionSource::PreRegistered
            }
            Ok(false) => {
                tracing::info!(%job_id, "no submission record; registering direct sbatch job");
                if let Err(e) = self.register(None, Some(command), Some(SubmissionSource::Direct)) {
                    tracing::warn!(%job_id, "failed to register job: {}", e);
                }
                match self.transition(JobStatus::Running, self.running_update(command)) {
                    Ok(true) => {}
                    Ok(false) => tracing::warn!(%job_id, "job still missing after registration"),
                    Err(e) => tracing::warn!(%job_id, "failed to record RUNNING: {}", e),
                }
                SubmissionSource::Direct
            }
            Err(e) => {
                tracing::warn!(%job_id, "failed to record RUNNING: {}", e);
                self.identity.submission_source
            }
        }
    }

    /// Close the transport. Only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(transport) = &self.transport {
            transport.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryRecord, MemoryTransport, TransportCall};

    fn attach(memory: &Arc<MemoryTransport>) -> Option<Arc<dyn StatusTransport>> {
        let transport: Arc<dyn StatusTransport> = memory.clone();
        Some(transport)
    }

    fn local_identity() -> JobIdentity {
        JobIdentity::resolve_from(|_| None)
    }

    fn scheduled_identity(id: &str) -> JobIdentity {
        let id = id.to_string();
        JobIdentity::resolve_from(move |key| match key {
            "SLURM_JOB_ID" => Some(id.clone()),
            "SLURM_JOB_NAME" => Some("train".to_string()),
            "SLURM_CPUS_PER_TASK" => Some("4".to_string()),
            "SLURM_MEM_PER_CPU" => Some("1000".to_string()),
            _ => None,
        })
    }

    #[test]
    fn test_disabled_recorder_never_panics() {
        let mut recorder = LifecycleRecorder::new(local_identity(), None);
        assert!(matches!(recorder.register(None, None, None), Err(RecordError::Disabled)));
        assert!(matches!(
            recorder.transition(JobStatus::Running, JobUpdate::default()),
            Err(RecordError::Disabled)
        ));
        assert!(matches!(recorder.log(JobStatus::Paused, "x"), Err(RecordError::Disabled)));
        assert_eq!(recorder.start_running("true"), SubmissionSource::Local);
        recorder.close();
    }

    #[test]
    fn test_log_metadata_has_timestamp() {
        let memory = Arc::new(MemoryTransport::new());
        let recorder = LifecycleRecorder::new(local_identity(), attach(&memory));

        recorder
            .log_with(JobStatus::Paused, "Received signal: SIGTSTP", json!({"signal": 20}))
            .unwrap();

        let events = memory.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EVENT_TYPE_LIFECYCLE);
        assert_eq!(events[0].event_status, "PAUSED");
        let metadata = events[0].metadata.as_ref().unwrap();
        assert!(metadata["timestamp"].is_string());
        assert_eq!(metadata["signal"], 20);
    }

    #[test]
    fn test_transition_missing_record_is_false() {
        let memory = Arc::new(MemoryTransport::new());
        let recorder = LifecycleRecorder::new(scheduled_identity("1"), attach(&memory));
        assert!(!recorder
            .transition(JobStatus::Running, JobUpdate::default())
            .unwrap());
    }

    #[test]
    fn test_start_running_local() {
        let memory = Arc::new(MemoryTransport::new());
        let mut recorder = LifecycleRecorder::new(local_identity(), attach(&memory));

        assert_eq!(recorder.start_running("echo hi"), SubmissionSource::Local);

        let record = memory.record(recorder.job_id()).unwrap();
        assert_eq!(record.submission_source, Some(SubmissionSource::Local));
        assert_eq!(record.status, JobStatus::Running);
        assert_eq!(record.fields.command.as_deref(), Some("echo hi"));
    }

    #[test]
    fn test_start_running_direct_registers_once() {
        let memory = Arc::new(MemoryTransport::new());
        let mut recorder = LifecycleRecorder::new(scheduled_identity("77"), attach(&memory));

        assert_eq!(recorder.start_running("python x.py"), SubmissionSource::Direct);
        assert_eq!(recorder.identity.submission_source, SubmissionSource::Direct);

        let calls = memory.calls();
        let registrations = calls
            .iter()
            .filter(|c| matches!(c, TransportCall::Register { .. }))
            .count();
        assert_eq!(registrations, 1);
        assert_eq!(
            calls.last(),
            Some(&TransportCall::UpdateStatus {
                job_id: "slurm-77".to_string(),
                status: JobStatus::Running,
                found: true,
            })
        );

        let record = memory.record("slurm-77").unwrap();
        assert_eq!(record.submission_source, Some(SubmissionSource::Direct));
        assert_eq!(record.fields.memory.as_deref(), Some("4000MB"));
    }

    #[test]
    fn test_start_running_pre_registered() {
        let memory = Arc::new(MemoryTransport::new());
        memory.insert_record(
            "slurm-5",
            MemoryRecord {
                job_name: "train".to_string(),
                submission_source: Some(SubmissionSource::PreRegistered),
                status: JobStatus::Submitted,
                fields: JobUpdate::script_path("/work/train.sh"),
            },
        );
        let mut recorder = LifecycleRecorder::new(scheduled_identity("5"), attach(&memory));

        assert_eq!(recorder.start_running("python x.py"), SubmissionSource::PreRegistered);
        assert!(!memory
            .calls()
            .iter()
            .any(|c| matches!(c, TransportCall::Register { .. })));

        let record = memory.record("slurm-5").unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert_eq!(record.fields.script_path.as_deref(), Some("/work/train.sh"));
    }

    #[test]
    fn test_start_running_transport_down_keeps_provisional_source() {
        let memory = Arc::new(MemoryTransport::new());
        memory.set_failing(true);
        let mut recorder = LifecycleRecorder::new(scheduled_identity("8"), attach(&memory));
        assert_eq!(recorder.start_running("true"), SubmissionSource::Direct);
    }

    #[test]
    fn test_close_once() {
        let memory = Arc::new(MemoryTransport::new());
        let recorder = LifecycleRecorder::new(local_identity(), attach(&memory));
        recorder.close();
        recorder.close();
        assert_eq!(memory.close_count(), 1);
    }
}
