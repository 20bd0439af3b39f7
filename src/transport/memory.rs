//! In-process transport for tests

use slm_protocol::{EventRequest, JobRegistration, JobStatus, JobUpdate, SubmissionSource};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{StatusTransport, TransportError, TransportKind};

/// A call made through a [`MemoryTransport`], in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Register {
        job_id: String,
        source: Option<SubmissionSource>,
    },
    UpdateStatus {
        job_id: String,
        status: JobStatus,
        found: bool,
    },
    LogEvent {
        job_id: String,
        status: String,
    },
}

/// A job record held by a [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    pub job_name: String,
    pub submission_source: Option<SubmissionSource>,
    pub status: JobStatus,
    pub fields: JobUpdate,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, MemoryRecord>,
    events: Vec<EventRequest>,
    calls: Vec<TransportCall>,
    closed: u32,
    failing: bool,
}

/// Transport that keeps records and events in memory and logs every call.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

fn merge(fields: &mut JobUpdate, update: &JobUpdate) {
    if update.exit_code.is_some() {
        fields.exit_code = update.exit_code;
    }
    let assign = |slot: &mut Option<String>, value: &Option<String>| {
        if value.is_some() {
            slot.clone_from(value);
        }
    };
    assign(&mut fields.command, &update.command);
    assign(&mut fields.script_path, &update.script_path);
    assign(&mut fields.nodes, &update.nodes);
    assign(&mut fields.cpus, &update.cpus);
    assign(&mut fields.gpus, &update.gpus);
    assign(&mut fields.memory, &update.memory);
    assign(&mut fields.partition_name, &update.partition_name);
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every subsequent operation fail as if the backend were down.
    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    /// Seed a record, as a prior `slm submit` would.
    pub fn insert_record(&self, job_id: &str, record: MemoryRecord) {
        self.state().records.insert(job_id.to_string(), record);
    }

    pub fn record(&self, job_id: &str) -> Option<MemoryRecord> {
        self.state().records.get(job_id).cloned()
    }

    pub fn events(&self) -> Vec<EventRequest> {
        self.state().events.clone()
    }

    /// Event statuses in append order.
    pub fn event_statuses(&self) -> Vec<String> {
        self.state()
            .events
            .iter()
            .map(|e| e.event_status.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state().calls.clone()
    }

    /// Number of `close` calls received.
    pub fn close_count(&self) -> u32 {
        self.state().closed
    }
}

impl StatusTransport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn register_job(&self, registration: &JobRegistration) -> Result<Option<i64>, TransportError> {
        let mut state = self.state();
        state.calls.push(TransportCall::Register {
            job_id: registration.job_id.clone(),
            source: registration.submission_source,
        });
        if state.failing {
            return Err(TransportError::Unavailable("memory transport failing".to_string()));
        }

        let update = JobUpdate {
            exit_code: None,
            command: registration.command.clone(),
            script_path: registration.script_path.clone(),
            nodes: registration.nodes.clone(),
            cpus: registration.cpus.clone(),
            gpus: registration.gpus.clone(),
            memory: registration.memory.clone(),
            partition_name: registration.partition_name.clone(),
        };

        let next_id = state.records.len() as i64 + 1;
        match state.records.get_mut(&registration.job_id) {
            Some(record) => {
                if registration.submission_source.is_some() {
                    record.submission_source = registration.submission_source;
                }
                merge(&mut record.fields, &update);
                Ok(None)
            }
            None => {
                state.records.insert(
                    registration.job_id.clone(),
                    MemoryRecord {
                        job_name: registration.job_name.clone(),
                        submission_source: registration.submission_source,
                        status: JobStatus::Submitted,
                        fields: update,
                    },
                );
                Ok(Some(next_id))
            }
        }
    }

    fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        update: &JobUpdate,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.failing {
            state.calls.push(TransportCall::UpdateStatus {
                job_id: job_id.to_string(),
                status,
                found: false,
            });
            return Err(TransportError::Unavailable("memory transport failing".to_string()));
        }

        let found = match state.records.get_mut(job_id) {
            Some(record) => {
                if status.may_replace(record.status) {
                    record.status = status;
                    merge(&mut record.fields, update);
                }
                true
            }
            None => false,
        };
        state.calls.push(TransportCall::UpdateStatus {
            job_id: job_id.to_string(),
            status,
            found,
        });

        if found {
            Ok(())
        } else {
            Err(TransportError::NotFound(job_id.to_string()))
        }
    }

    fn log_event(&self, event: &EventRequest) -> Result<Option<i64>, TransportError> {
        let mut state = self.state();
        state.calls.push(TransportCall::LogEvent {
            job_id: event.job_id.clone(),
            status: event.event_status.clone(),
        });
        if state.failing {
            return Err(TransportError::Unavailable("memory transport failing".to_string()));
        }
        state.events.push(event.clone());
        Ok(Some(state.events.len() as i64))
    }

    fn close(&self) {
        self.state().closed += 1;
    }
}
