//! Job identity resolution
//!
//! Derives the job id and resource descriptor from the Slurm environment.
//! Three situations are distinguished:
//! - pre-registered by `slm submit` (`slurm-<id>`, confirmed later)
//! - started by the scheduler without registration (`slurm-<id>`)
//! - running outside any scheduler (`raw-<uuid>`)
//!
//! Resolution never fails: missing variables become [`UNKNOWN`].

use slm_protocol::{JobRegistration, JobUpdate, SubmissionSource, UNKNOWN};
use uuid::Uuid;

/// Prefix for scheduler-assigned job ids.
pub const SCHEME_SLURM: &str = "slurm";

/// Prefix for generated ids of unscheduled runs.
pub const SCHEME_RAW: &str = "raw";

/// Identity and resources of the supervised job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIdentity {
    pub job_id: String,
    pub job_name: String,
    pub node_list: String,
    pub cpu_spec: String,
    pub gpu_spec: String,
    pub memory_spec: String,
    pub partition: String,
    pub submission_source: SubmissionSource,
}

/// Qualified job id for a scheduler-assigned id.
pub fn slurm_job_id(raw_id: &str) -> String {
    format!("{}-{}", SCHEME_SLURM, raw_id)
}

impl JobIdentity {
    /// Resolve from the process environment.
    pub fn resolve() -> Self {
        Self::resolve_from(|key| std::env::var(key).ok())
    }

    /// Resolve with an injected environment lookup.
    pub fn resolve_from<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env(key).filter(|v| !v.is_empty());
        let or_unknown = |value: Option<String>| value.unwrap_or_else(|| UNKNOWN.to_string());

        let Some(raw_id) = var("SLURM_JOB_ID") else {
            return Self {
                job_id: format!("{}-{}", SCHEME_RAW, Uuid::new_v4()),
                job_name: or_unknown(var("SLURM_JOB_NAME")),
                node_list: UNKNOWN.to_string(),
                cpu_spec: UNKNOWN.to_string(),
                gpu_spec: UNKNOWN.to_string(),
                memory_spec: UNKNOWN.to_string(),
                partition: UNKNOWN.to_string(),
                submission_source: SubmissionSource::Local,
            };
        };

        let cpu_spec = or_unknown(var("SLURM_CPUS_PER_TASK").or_else(|| var("SLURM_CPUS_ON_NODE")));
        let memory_spec = resolve_memory(
            var("SLURM_MEM_PER_NODE"),
            var("SLURM_MEM_PER_CPU"),
            &cpu_spec,
        );

        Self {
            job_id: slurm_job_id(&raw_id),
            job_name: or_unknown(var("SLURM_JOB_NAME")),
            node_list: or_unknown(var("SLURM_JOB_NODELIST")),
            cpu_spec,
            gpu_spec: or_unknown(var("SLURM_JOB_GRES")),
            memory_spec,
            partition: or_unknown(var("SLURM_JOB_PARTITION")),
            // Provisional until the first RUNNING transition shows whether
            // a submission record exists.
            submission_source: SubmissionSource::Direct,
        }
    }

    /// Same identity under another job id.
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    /// Same identity with a settled submission source.
    pub fn with_source(mut self, source: SubmissionSource) -> Self {
        self.submission_source = source;
        self
    }

    /// Registration carrying this identity's resource fields.
    pub fn registration(&self) -> JobRegistration {
        JobRegistration {
            nodes: Some(self.node_list.clone()),
            cpus: Some(self.cpu_spec.clone()),
            gpus: Some(self.gpu_spec.clone()),
            memory: Some(self.memory_spec.clone()),
            partition_name: Some(self.partition.clone()),
            ..JobRegistration::new(&self.job_id, &self.job_name)
        }
    }

    /// Status-update fields carrying this identity's resources.
    pub fn resource_update(&self) -> JobUpdate {
        JobUpdate {
            nodes: Some(self.node_list.clone()),
            cpus: Some(self.cpu_spec.clone()),
            gpus: Some(self.gpu_spec.clone()),
            memory: Some(self.memory_spec.clone()),
            partition_name: Some(self.partition.clone()),
            ..JobUpdate::default()
        }
    }
}

/// Total job memory.
///
/// Per-node memory wins; otherwise per-CPU memory is multiplied by the
/// CPU count (1 when unknown). Slurm reports both in megabytes. A per-CPU
/// value that is not a number is kept verbatim with a `/cpu` marker so
/// it cannot be mistaken for a total.
fn resolve_memory(per_node: Option<String>, per_cpu: Option<String>, cpu_spec: &str) -> String {
    if let Some(per_node) = per_node {
        return match per_node.parse::<u64>() {
            Ok(mb) => format!("{}MB", mb),
            Err(_) => per_node,
        };
    }

    let Some(per_cpu) = per_cpu else {
        return UNKNOWN.to_string();
    };

    let cpus = cpu_spec.parse::<u64>().unwrap_or(1);
    match per_cpu.parse::<u64>() {
        Ok(mb) => format!("{}MB", mb.saturating_mul(cpus)),
        Err(_) => {
            tracing::warn!(
                value = %per_cpu,
                "SLURM_MEM_PER_CPU is not a number; recording it as per-CPU memory"
            );
            format!("{}/cpu", per_cpu)
        }
    }
}
