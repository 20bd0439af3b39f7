//! Process supervisor
//!
//! Runs one child command and turns scheduler job-control signals and the
//! child's exit into lifecycle transitions:
//!
//! | Input              | Status                      |
//! |--------------------|-----------------------------|
//! | SIGTSTP            | PAUSED                      |
//! | SIGCONT            | RESUMED                     |
//! | SIGTERM / SIGINT   | TERMINATING, exit 143       |
//! | other signal N     | SIGNAL_N                    |
//! | child exit 0       | COMPLETED                   |
//! | child exit N != 0  | FAILED, exit N              |
//! | launch failure     | FAILED, exit 1              |
//!
//! On TERMINATING the child, which shares our process group, is sent
//! SIGTERM and given a grace period before SIGKILL.

mod machine;
mod signals;

pub use machine::{SignalClass, SignalDecision, SupervisorMachine, SupervisorState};
use signals::ChildWatch;

use nix::errno::Errno;
use nix::sys::signal::{kill, SigSet, Signal};
use nix::unistd::Pid;
use serde_json::json;
use slm_protocol::{JobStatus, JobUpdate};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::config::SlmConfig;
use crate::identity::JobIdentity;
use crate::recorder::LifecycleRecorder;
use crate::transport;

/// Exit code after forced termination, whatever signal caused it.
pub const EXIT_TERMINATED: i32 = 143;

/// Exit code when the child cannot be started.
pub const EXIT_LAUNCH_FAILURE: i32 = 1;

/// Supervisor errors
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("No command provided to run")]
    EmptyCommand,

    #[error("Failed to block supervised signals: {0}")]
    Signals(#[from] Errno),

    #[error("Failed to start signal thread: {0}")]
    Thread(#[source] io::Error),
}

/// Process exit code for a child's wait status; death by signal N is 128+N.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signo| 128 + signo))
        .unwrap_or(EXIT_LAUNCH_FAILURE)
}

/// Supervise `command` with identity and transport taken from the
/// environment and `config`. Returns the process exit code.
pub fn run(config: &SlmConfig, command: &[String]) -> Result<i32, SupervisorError> {
    if command.is_empty() {
        return Err(SupervisorError::EmptyCommand);
    }

    // Before anything spawns a thread (the HTTP client does).
    let signals = signals::block()?;

    let identity = JobIdentity::resolve();
    tracing::debug!(job_id = %identity.job_id, source = %identity.submission_source, "resolved job identity");
    let transport = transport::select(config);
    let recorder = LifecycleRecorder::new(identity, transport);

    Supervisor::new(recorder, config.terminate_grace()).supervise(command, signals)
}

struct Shared {
    machine: SupervisorMachine,
    recorder: LifecycleRecorder,
}

/// Owns the recorder and state machine for one supervised run.
///
/// Signal dispatch and the final transition go through one mutex, so each
/// decision and its transport I/O happen as a unit.
pub struct Supervisor {
    shared: Mutex<Shared>,
    watch: ChildWatch,
    terminate_grace: Duration,
}

impl Supervisor {
    pub fn new(recorder: LifecycleRecorder, terminate_grace: Duration) -> Self {
        Self {
            shared: Mutex::new(Shared {
                machine: SupervisorMachine::new(),
                recorder,
            }),
            watch: ChildWatch::new(),
            terminate_grace,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the child to completion. `signals` must already be blocked in
    /// every thread of this process.
    pub fn supervise(self, command: &[String], signals: SigSet) -> Result<i32, SupervisorError> {
        let Some((program, args)) = command.split_first() else {
            return Err(SupervisorError::EmptyCommand);
        };
        let command_line = command.join(" ");
        let supervisor = Arc::new(self);

        {
            let mut shared = supervisor.lock();
            let source = shared.recorder.start_running(&command_line);
            shared.machine.start();
            tracing::info!(job_id = %shared.recorder.job_id(), %source, "starting command: {}", command_line);
            report(
                shared.recorder.log(JobStatus::Running, &format!("Command: {}", command_line)),
            );
        }

        let mut child_command = Command::new(program);
        child_command.args(args);
        signals::unblock_in_child(&mut child_command, signals);

        let mut child = match child_command.spawn() {
            Ok(child) => child,
            Err(e) => return Ok(supervisor.launch_failed(&e)),
        };
        let pid = Pid::from_raw(child.id() as i32);

        let handler = Arc::clone(&supervisor);
        let spawned = thread::Builder::new()
            .name("slm-signals".to_string())
            .spawn(move || handler.signal_loop(signals, pid));
        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            supervisor.lock().recorder.close();
            return Err(SupervisorError::Thread(e));
        }

        let status = child.wait();
        supervisor.watch.mark_exited();
        match status {
            Ok(status) => Ok(supervisor.finish(exit_code_of(status))),
            Err(e) => Ok(supervisor.launch_failed(&e)),
        }
    }

    /// Record the final status for a reaped child.
    fn finish(&self, code: i32) -> i32 {
        let mut shared = self.lock();
        let outcome = match shared.machine.on_exit(code) {
            Some(status) => {
                let details = if status == JobStatus::Completed {
                    "Job completed successfully".to_string()
                } else {
                    format!("Exit code: {}", code)
                };
                report(shared.recorder.transition(status, JobUpdate::exit_code(code)));
                report(shared.recorder.log_with(status, &details, json!({ "exit_code": code })));
                code
            }
            None if shared.machine.state() == SupervisorState::Terminating => EXIT_TERMINATED,
            None => code,
        };
        shared.recorder.close();
        outcome
    }

    fn launch_failed(&self, error: &io::Error) -> i32 {
        let details = format!("Execution error: {}", error);
        tracing::error!("{}", details);

        let mut shared = self.lock();
        if let Some(status) = shared.machine.on_launch_failure() {
            report(
                shared
                    .recorder
                    .transition(status, JobUpdate::exit_code(EXIT_LAUNCH_FAILURE)),
            );
            report(shared.recorder.log_with(
                status,
                &details,
                json!({ "exit_code": EXIT_LAUNCH_FAILURE }),
            ));
        }
        shared.recorder.close();
        EXIT_LAUNCH_FAILURE
    }

    fn signal_loop(&self, signals: SigSet, pid: Pid) {
        loop {
            let signal = match signals.wait() {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::error!("sigwait failed, no longer handling signals: {}", e);
                    return;
                }
            };
            if self.dispatch(signal) {
                self.terminate_child(pid);
                return;
            }
        }
    }

    /// Handle one signal. Returns true when it started termination.
    fn dispatch(&self, signal: Signal) -> bool {
        let class = SignalClass::from_signal(signal);
        let shared = &mut *self.lock();

        match shared.machine.on_signal(class) {
            SignalDecision::Suppress => {
                tracing::debug!(signal = signal.as_str(), "duplicate signal suppressed");
                false
            }
            SignalDecision::Dispatch(status) => {
                let details = format!("Received signal: {}", signal.as_str());
                match shared.recorder.transition(status, JobUpdate::default()) {
                    Ok(false) => tracing::debug!(%status, "no job record for signal transition"),
                    other => report(other),
                }
                report(shared.recorder.log_with(
                    status,
                    &details,
                    json!({ "signal": signal as i32 }),
                ));
                status == JobStatus::Terminating
            }
        }
    }

    /// Stop the child after TERMINATING was recorded.
    fn terminate_child(&self, pid: Pid) {
        tracing::warn!("termination requested, stopping child {}", pid);
        if self.watch.has_exited() {
            return;
        }
        send(pid, Signal::SIGTERM);
        if self.watch.wait_exit(self.terminate_grace) {
            return;
        }

        tracing::warn!(
            "child {} still running after {:?}, sending SIGKILL",
            pid,
            self.terminate_grace
        );
        send(pid, Signal::SIGKILL);
        if self.watch.wait_exit(self.terminate_grace.max(Duration::from_secs(1))) {
            return;
        }

        // The main thread is stuck in wait(); leave without it.
        tracing::error!("child {} did not exit after SIGKILL", pid);
        self.lock().recorder.close();
        std::process::exit(EXIT_TERMINATED);
    }
}

fn send(pid: Pid, signal: Signal) {
    match kill(pid, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!("failed to send {} to {}: {}", signal, pid, e),
    }
}

/// Log a contained recorder failure.
fn report<T>(result: Result<T, crate::recorder::RecordError>) {
    match result {
        Ok(_) | Err(crate::recorder::RecordError::Disabled) => {}
        Err(e) => tracing::warn!("failed to record lifecycle step: {}", e),
    }
}
