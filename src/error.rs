//! Error taxonomy for a tardis session
//!
//! Every variant here is fatal to the session. A clock identifier outside the
//! anchor table is not an error: the handler reports it as a skipped rewrite
//! and the raw kernel value passes through.

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

/// Fixed process exit code for internal failures
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Errors that terminate a tardis session
#[derive(Error, Debug)]
pub enum TardisError {
    #[error("Invalid invocation: {0}")]
    Usage(String),

    #[error("Unsupported target: pid {pid} is not a 64-bit process (register set is {regset_len} bytes, expected {expected})")]
    UnsupportedTarget {
        pid: Pid,
        regset_len: usize,
        expected: usize,
    },

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: Errno,
    },

    #[error("Tracing operation {op} failed for pid {pid}: {source}")]
    Tracing {
        op: &'static str,
        pid: Pid,
        #[source]
        source: Errno,
    },
}

impl TardisError {
    /// Wrap a failed ptrace/wait primitive
    pub fn tracing(op: &'static str, pid: Pid) -> impl FnOnce(Errno) -> Self {
        move |source| TardisError::Tracing { op, pid, source }
    }
}

/// Result type for tardis operations
pub type Result<T> = std::result::Result<T, TardisError>;
