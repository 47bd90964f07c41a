//! Tardis - run an unmodified program with scaled time
//!
//! The target is traced with ptrace. Requested sleeps and timeouts are
//! divided by a delay factor on their way into the kernel, and clock
//! readings are rescaled around a per-clock anchor on their way out.

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("tardis only supports x86_64 Linux");

pub mod anchors;
pub mod cli;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod handlers;
pub mod remote;
pub mod scaling;
pub mod session;
pub mod syscalls;
pub mod tracer;
