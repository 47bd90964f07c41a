//! Process lifecycle for a traced session
//!
//! The child stops itself before exec so the parent can seize it with the
//! full option set before the target image runs a single instruction.

use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::sys::ptrace;
use nix::sys::signal::{raise, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{debug, warn};

use crate::anchors::ClockSource;
use crate::config::{preload_exists, LaunchConfig};
use crate::error::{Result, TardisError, FAILURE_EXIT_CODE};
use crate::event_loop::{resume, SyscallEventLoop};
use crate::remote::ensure_64bit;
use crate::session::Session;

/// Options applied when seizing the root; inherited by every new task
pub fn seize_options() -> ptrace::Options {
    ptrace::Options::PTRACE_O_TRACESYSGOOD
        | ptrace::Options::PTRACE_O_TRACEEXEC
        | ptrace::Options::PTRACE_O_EXITKILL
        | ptrace::Options::PTRACE_O_TRACEFORK
        | ptrace::Options::PTRACE_O_TRACEVFORK
        | ptrace::Options::PTRACE_O_TRACECLONE
}

/// Owns the traced root task from spawn to exit
pub struct ProcessController<'a, C: ClockSource> {
    session: &'a Session<C>,
    root: Pid,
}

/// Outcome of starting the target
pub enum Spawned<'a, C: ClockSource> {
    Traced(ProcessController<'a, C>),
    /// The child terminated before it could be seized
    Exited(i32),
}

impl<'a, C: ClockSource> ProcessController<'a, C> {
    /// Fork the target, seize it and verify it is a 64-bit process
    pub fn spawn(launch: &LaunchConfig, session: &'a Session<C>) -> Result<Spawned<'a, C>> {
        let launch = resolve_preload(launch);

        match unsafe { fork() }.map_err(|source| TardisError::Spawn {
            command: launch.program().to_string(),
            source,
        })? {
            ForkResult::Parent { child } => {
                debug!("child spawned with pid {}", child);
                match seize_child(child)? {
                    Some(status) => Ok(Spawned::Exited(status)),
                    None => Ok(Spawned::Traced(Self {
                        session,
                        root: child,
                    })),
                }
            }
            ForkResult::Child => exec_child(&launch),
        }
    }

    /// Trace until the root task exits and return its exit status
    pub fn run(self) -> Result<i32> {
        resume(self.root, None)?;
        SyscallEventLoop::new(self.session, self.root).run()
    }
}

/// Drop a shim that does not exist and make an existing one absolute, so
/// the target can still find it after changing directory
fn resolve_preload(launch: &LaunchConfig) -> LaunchConfig {
    let mut launch = launch.clone();
    if let Some(path) = launch.preload.take() {
        if preload_exists(&path) {
            launch.preload = Some(std::fs::canonicalize(&path).unwrap_or(path));
        } else {
            warn!(
                "preload shim {} not found; vDSO time reads will not be scaled",
                path.display()
            );
        }
    }
    launch
}

/// Attach to the self-stopped child
///
/// Returns the child's exit status if it terminated instead of stopping.
fn seize_child(child: Pid) -> Result<Option<i32>> {
    // Wait for the child's own SIGSTOP so the seize cannot race the exec
    match waitpid(child, Some(WaitPidFlag::WUNTRACED)).map_err(TardisError::tracing("waitpid", child))? {
        WaitStatus::Exited(_, status) => return Ok(Some(status)),
        WaitStatus::Signaled(_, signal, _) => return Ok(Some(128 + signal as i32)),
        _ => {}
    }

    ptrace::seize(child, seize_options()).map_err(TardisError::tracing("PTRACE_SEIZE", child))?;

    // Seizing a stopped task re-reports the stop as a trace trap
    match waitpid(child, Some(WaitPidFlag::__WALL)).map_err(TardisError::tracing("waitpid", child))? {
        WaitStatus::Exited(_, status) => return Ok(Some(status)),
        WaitStatus::Signaled(_, signal, _) => return Ok(Some(128 + signal as i32)),
        status => debug!("seized {}: {:?}", child, status),
    }

    ensure_64bit(child)?;
    Ok(None)
}

fn exec_child(launch: &LaunchConfig) -> ! {
    if let Err(err) = raise(Signal::SIGSTOP) {
        eprintln!("tardis: failed to stop before exec: {}", err);
        std::process::exit(FAILURE_EXIT_CODE);
    }

    let mut command = Command::new(launch.program());
    command.args(launch.args());
    if let Some(preload) = launch.preload_value(std::env::var_os("LD_PRELOAD")) {
        command.env("LD_PRELOAD", preload);
    }

    // exec only returns on failure
    let err = command.exec();
    eprintln!("tardis: failed to exec {}: {}", launch.program(), err);
    std::process::exit(FAILURE_EXIT_CODE);
}
