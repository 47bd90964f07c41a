//! The session: configuration, anchors and handler tables for one run
//!
//! Built once at startup, before the target exists, and shared read-only by
//! every stop the event loop handles.

use tracing::trace;

use crate::anchors::{ClockAnchorTable, ClockSource, SystemClocks};
use crate::config::ScalingConfig;
use crate::error::Result;
use crate::event_loop::TaskPhase;
use crate::handlers::{Outcome, RewriteContext, SyscallHandlerRegistry};
use crate::remote::RemoteTask;
use crate::syscalls::syscall_name;

pub struct Session<C: ClockSource = SystemClocks> {
    config: ScalingConfig,
    anchors: ClockAnchorTable,
    registry: SyscallHandlerRegistry,
    clocks: C,
}

impl Session<SystemClocks> {
    /// Sample the host clocks and build the handler tables
    pub fn start(config: ScalingConfig) -> Self {
        Self::with_clocks(config, SystemClocks)
    }
}

impl<C: ClockSource> Session<C> {
    pub fn with_clocks(config: ScalingConfig, clocks: C) -> Self {
        let anchors = ClockAnchorTable::capture(&clocks);
        Self {
            config,
            anchors,
            registry: SyscallHandlerRegistry::new(),
            clocks,
        }
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    pub fn anchors(&self) -> &ClockAnchorTable {
        &self.anchors
    }

    /// Apply the rewrite registered for the syscall `task` is stopped in
    ///
    /// `phase` is the phase the task was in when the stop arrived. Returns
    /// `None` when no handler is registered for that phase; in that case
    /// nothing is written to the task.
    pub fn dispatch<T: RemoteTask>(&self, phase: TaskPhase, task: &mut T) -> Result<Option<Outcome>> {
        let regs = task.registers()?;
        let ctx = RewriteContext {
            config: &self.config,
            anchors: &self.anchors,
            clocks: &self.clocks,
        };

        let outcome = match phase {
            TaskPhase::AwaitingEntry => {
                trace!(
                    "[pid {}]   {}({:#x}, {:#x}, {:#x}) = ...",
                    task.pid(),
                    syscall_name(regs.number),
                    regs.arg(0),
                    regs.arg(1),
                    regs.arg(2)
                );
                match self.registry.entry_handler(regs.number) {
                    Some(rewrite) => Some(rewrite.apply(&ctx, task, regs)?),
                    None => None,
                }
            }
            TaskPhase::AwaitingExit => {
                trace!(
                    "[pid {}]   ... {} = {:#x}",
                    task.pid(),
                    syscall_name(regs.number),
                    regs.ret
                );
                match self.registry.exit_handler(regs.number) {
                    Some(rewrite) => Some(rewrite.apply(&ctx, task, regs)?),
                    None => None,
                }
            }
        };

        if let Some(Outcome::Skipped(reason)) = outcome {
            trace!(
                "[pid {}] {} left untouched: {:?}",
                task.pid(),
                syscall_name(regs.number),
                reason
            );
        }
        Ok(outcome)
    }
}
