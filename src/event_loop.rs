//! Syscall stop dispatch for every task in the traced group
//!
//! Each task alternates between awaiting a syscall entry and awaiting the
//! matching exit. `TaskTable::observe` is the pure transition function: it
//! turns one stop description into the step the loop must perform, without
//! touching the tracing primitives. `SyscallEventLoop` feeds it from
//! `waitpid` and carries the steps out.

use std::collections::HashMap;

use nix::errno::Errno;
use nix::sys::ptrace::{self, Event};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, trace};

use crate::anchors::ClockSource;
use crate::error::{Result, TardisError};
use crate::remote::{ensure_64bit, PtraceTask};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    AwaitingEntry,
    AwaitingExit,
}

impl TaskPhase {
    pub fn flipped(self) -> Self {
        match self {
            TaskPhase::AwaitingEntry => TaskPhase::AwaitingExit,
            TaskPhase::AwaitingExit => TaskPhase::AwaitingEntry,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracedTask {
    pub pid: Pid,
    pub phase: TaskPhase,
}

impl TracedTask {
    fn new(pid: Pid) -> Self {
        Self {
            pid,
            phase: TaskPhase::AwaitingEntry,
        }
    }
}

/// One trace stop, as reported by `waitpid`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopEvent {
    Exited { pid: Pid, status: i32 },
    Killed { pid: Pid, signal: Signal },
    /// Syscall entry or exit, tagged by `PTRACE_O_TRACESYSGOOD`
    Syscall { pid: Pid },
    /// `PTRACE_EVENT_EXEC`; `former` is the thread id that called exec
    Exec { pid: Pid, former: Pid },
    /// `PTRACE_EVENT_FORK`, `_VFORK` or `_CLONE`
    NewTask { pid: Pid, child: Pid },
    /// Any other ptrace event stop, including the seize group-stop trap
    Trap { pid: Pid },
    /// Signal-delivery stop
    Signal { pid: Pid, signal: Signal },
}

/// What the loop must do after a stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The root task is gone; the session ends with this exit status
    Finish(i32),
    /// A non-root task is gone; nothing to resume
    Dropped,
    /// Run the `phase` handler, then resume without a signal
    Dispatch { pid: Pid, phase: TaskPhase },
    /// Check the new image's architecture, then resume without a signal
    Exec { pid: Pid },
    Resume { pid: Pid, signal: Option<Signal> },
}

/// Per-task phase records for the traced group
#[derive(Debug, Clone)]
pub struct TaskTable {
    root: Pid,
    tasks: HashMap<Pid, TracedTask>,
}

impl TaskTable {
    pub fn new(root: Pid) -> Self {
        let mut tasks = HashMap::new();
        tasks.insert(root, TracedTask::new(root));
        Self { root, tasks }
    }

    pub fn root(&self) -> Pid {
        self.root
    }

    pub fn phase(&self, pid: Pid) -> Option<TaskPhase> {
        self.tasks.get(&pid).map(|task| task.phase)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn task(&mut self, pid: Pid) -> &mut TracedTask {
        self.tasks.entry(pid).or_insert_with(|| TracedTask::new(pid))
    }

    fn exit_status(&mut self, pid: Pid, status: i32) -> Step {
        self.tasks.remove(&pid);
        if pid == self.root {
            Step::Finish(status)
        } else {
            Step::Dropped
        }
    }

    /// Advance the state machine by one stop
    pub fn observe(&mut self, event: StopEvent) -> Step {
        match event {
            StopEvent::Exited { pid, status } => self.exit_status(pid, status),
            StopEvent::Killed { pid, signal } => self.exit_status(pid, 128 + signal as i32),
            StopEvent::Syscall { pid } => {
                let task = self.task(pid);
                let phase = task.phase;
                task.phase = phase.flipped();
                Step::Dispatch { pid, phase }
            }
            StopEvent::Exec { pid, former } => {
                if former != pid {
                    // A non-leader thread exec'd and took over the leader's id
                    self.tasks.remove(&former);
                }
                self.task(pid).phase = TaskPhase::AwaitingExit;
                Step::Exec { pid }
            }
            StopEvent::NewTask { pid, child } => {
                self.task(pid);
                self.task(child);
                Step::Resume { pid, signal: None }
            }
            StopEvent::Trap { pid } => {
                self.task(pid);
                Step::Resume { pid, signal: None }
            }
            StopEvent::Signal { pid, signal } => {
                self.task(pid);
                let signal = match signal {
                    Signal::SIGTRAP | Signal::SIGSTOP => None,
                    other => Some(other),
                };
                Step::Resume { pid, signal }
            }
        }
    }
}

fn event_message(pid: Pid) -> Result<Pid> {
    let msg = ptrace::getevent(pid).map_err(TardisError::tracing("PTRACE_GETEVENTMSG", pid))?;
    Ok(Pid::from_raw(msg as libc::pid_t))
}

/// Translate a wait status into a stop description
fn describe(status: WaitStatus) -> Result<Option<StopEvent>> {
    let event = match status {
        WaitStatus::Exited(pid, status) => StopEvent::Exited { pid, status },
        WaitStatus::Signaled(pid, signal, _) => StopEvent::Killed { pid, signal },
        WaitStatus::PtraceSyscall(pid) => StopEvent::Syscall { pid },
        WaitStatus::PtraceEvent(pid, _, event) => {
            if event == Event::PTRACE_EVENT_EXEC as i32 {
                StopEvent::Exec {
                    pid,
                    former: event_message(pid)?,
                }
            } else if event == Event::PTRACE_EVENT_FORK as i32
                || event == Event::PTRACE_EVENT_VFORK as i32
                || event == Event::PTRACE_EVENT_CLONE as i32
            {
                StopEvent::NewTask {
                    pid,
                    child: event_message(pid)?,
                }
            } else {
                StopEvent::Trap { pid }
            }
        }
        WaitStatus::Stopped(pid, signal) => StopEvent::Signal { pid, signal },
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Resume a stopped task until its next syscall stop
pub fn resume(pid: Pid, signal: Option<Signal>) -> Result<()> {
    ptrace::syscall(pid, signal).map_err(TardisError::tracing("PTRACE_SYSCALL", pid))
}

/// A task killed while stopped (for example by another thread's
/// `exit_group`) rejects further requests with `ESRCH`; its exit status is
/// still reported by `waitpid`.
fn vanished(err: &TardisError) -> bool {
    matches!(
        err,
        TardisError::Tracing {
            source: Errno::ESRCH,
            ..
        }
    )
}

/// Waits for stops from any task in the group and dispatches them
pub struct SyscallEventLoop<'a, C: ClockSource> {
    session: &'a Session<C>,
    tasks: TaskTable,
}

impl<'a, C: ClockSource> SyscallEventLoop<'a, C> {
    pub fn new(session: &'a Session<C>, root: Pid) -> Self {
        Self {
            session,
            tasks: TaskTable::new(root),
        }
    }

    /// Run until the root task exits and return its exit status
    pub fn run(&mut self) -> Result<i32> {
        let root = self.tasks.root();
        loop {
            let status = waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL))
                .map_err(TardisError::tracing("waitpid", root))?;
            let event = match describe(status) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) if vanished(&err) => {
                    debug!("{}", err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            trace!("{:?}", event);

            let step = self.tasks.observe(event);
            match self.perform(step) {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(err) if vanished(&err) => debug!("task vanished: {}", err),
                Err(err) => return Err(err),
            }
        }
    }

    fn perform(&self, step: Step) -> Result<Option<i32>> {
        match step {
            Step::Finish(status) => {
                debug!("root task {} finished with status {}", self.tasks.root(), status);
                return Ok(Some(status));
            }
            Step::Dropped => {}
            Step::Dispatch { pid, phase } => {
                let mut task = PtraceTask::new(pid);
                self.session.dispatch(phase, &mut task)?;
                resume(pid, None)?;
            }
            Step::Exec { pid } => {
                ensure_64bit(pid)?;
                resume(pid, None)?;
            }
            Step::Resume { pid, signal } => resume(pid, signal)?,
        }
        Ok(None)
    }
}
