//! Supervisor state machine
//!
//! Pure bookkeeping: decides which signals and exits produce a lifecycle
//! transition. All I/O happens in the caller while it holds the lock
//! around this machine.

use nix::sys::signal::Signal;
use slm_protocol::JobStatus;

/// Supervisor states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Init,
    Running,
    Paused,
    Terminating,
    Completed,
    Failed,
}

impl SupervisorState {
    /// No further transitions are reported once here.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            SupervisorState::Terminating | SupervisorState::Completed | SupervisorState::Failed
        )
    }
}

/// Class a received signal maps to. Dedup compares classes, not numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalClass {
    Paused,
    Resumed,
    Terminating,
    Other(i32),
}

impl SignalClass {
    pub fn from_signal(signal: Signal) -> Self {
        match signal {
            Signal::SIGTSTP => SignalClass::Paused,
            Signal::SIGCONT => SignalClass::Resumed,
            Signal::SIGTERM | Signal::SIGINT => SignalClass::Terminating,
            other => SignalClass::Other(other as i32),
        }
    }

    /// Status recorded when this class is dispatched
    pub fn status(self) -> JobStatus {
        match self {
            SignalClass::Paused => JobStatus::Paused,
            SignalClass::Resumed => JobStatus::Resumed,
            SignalClass::Terminating => JobStatus::Terminating,
            SignalClass::Other(signo) => JobStatus::Signal(signo),
        }
    }
}

/// What to do with a received signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDecision {
    /// Same class as the last dispatched one, or the job is already final
    Suppress,
    /// Record a transition and an event with this status
    Dispatch(JobStatus),
}

#[derive(Debug)]
pub struct SupervisorMachine {
    state: SupervisorState,
    last_dispatched: Option<SignalClass>,
}

impl Default for SupervisorMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorMachine {
    pub fn new() -> Self {
        Self {
            state: SupervisorState::Init,
            last_dispatched: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn last_dispatched(&self) -> Option<SignalClass> {
        self.last_dispatched
    }

    pub fn start(&mut self) {
        if self.state == SupervisorState::Init {
            self.state = SupervisorState::Running;
        }
    }

    /// Decide on a signal and record it as dispatched.
    ///
    /// A dispatched signal counts as handled even if persisting it later
    /// fails.
    pub fn on_signal(&mut self, class: SignalClass) -> SignalDecision {
        if self.state.is_final() || self.last_dispatched == Some(class) {
            return SignalDecision::Suppress;
        }

        self.last_dispatched = Some(class);
        match class {
            SignalClass::Paused => self.state = SupervisorState::Paused,
            SignalClass::Resumed => self.state = SupervisorState::Running,
            SignalClass::Terminating => self.state = SupervisorState::Terminating,
            SignalClass::Other(_) => {}
        }
        SignalDecision::Dispatch(class.status())
    }

    /// Final status for a child exit code, or `None` when termination
    /// already owns the outcome.
    pub fn on_exit(&mut self, code: i32) -> Option<JobStatus> {
        if self.state.is_final() {
            return None;
        }
        if code == 0 {
            self.state = SupervisorState::Completed;
            Some(JobStatus::Completed)
        } else {
            self.state = SupervisorState::Failed;
            Some(JobStatus::Failed)
        }
    }

    /// The child could not be started.
    pub fn on_launch_failure(&mut self) -> Option<JobStatus> {
        if self.state.is_final() {
            return None;
        }
        self.state = SupervisorState::Failed;
        Some(JobStatus::Failed)
    }
}
