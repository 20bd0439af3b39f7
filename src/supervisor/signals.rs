//! Synchronous signal delivery
//!
//! The supervised signals are blocked before any thread exists so that
//! every thread inherits the mask; one dedicated thread then takes them
//! with `sigwait`. The child gets the mask cleared before `exec`.

use nix::sys::signal::{SigSet, Signal};
use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Signals the supervisor reports on.
pub const SUPERVISED: [Signal; 6] = [
    Signal::SIGTSTP,
    Signal::SIGCONT,
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
];

pub fn supervised_set() -> SigSet {
    let mut set = SigSet::empty();
    for signal in SUPERVISED {
        set.add(signal);
    }
    set
}

/// Block the supervised signals in the calling thread.
///
/// Must run before any other thread is spawned.
pub fn block() -> nix::Result<SigSet> {
    let set = supervised_set();
    set.thread_block()?;
    Ok(set)
}

/// Restore default delivery of `set` in the child before it execs.
pub fn unblock_in_child(command: &mut Command, set: SigSet) {
    // SAFETY: the closure only calls pthread_sigmask, which is
    // async-signal-safe.
    unsafe {
        command.pre_exec(move || set.thread_unblock().map_err(io::Error::from));
    }
}

/// Tells the signal thread when the child has been reaped.
#[derive(Debug, Default)]
pub struct ChildWatch {
    exited: Mutex<bool>,
    cond: Condvar,
}

impl ChildWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_exited(&self) {
        let mut exited = self.exited.lock().unwrap_or_else(|e| e.into_inner());
        *exited = true;
        self.cond.notify_all();
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait up to `timeout` for the child to be reaped.
    pub fn wait_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut exited = self.exited.lock().unwrap_or_else(|e| e.into_inner());
        while !*exited {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            exited = match self.cond.wait_timeout(exited, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}
