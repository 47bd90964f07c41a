//! Syscall rewrite handlers
//!
//! Each time-family syscall carries an optional entry rewrite (applied before
//! the kernel sees the arguments) and an optional exit rewrite (applied to the
//! result before user code sees it). The registry keeps two independent
//! tables keyed by syscall number; a number missing from a table means the
//! stop passes through without any register or memory access.

use std::collections::HashMap;

use nix::errno::Errno;
use tracing::trace;

use crate::anchors::{AnchorLookup, ClockAnchorTable, ClockSource};
use crate::config::ScalingConfig;
use crate::error::Result;
use crate::remote::{RemoteTask, SyscallRegs};
use crate::scaling::{Scaling, TimeRecord, Timespec, Timeval};
use crate::syscalls::TimeSyscall;

/// `TIMER_ABSTIME` flag of `clock_nanosleep`
const TIMER_ABSTIME: i32 = libc::TIMER_ABSTIME;

/// Rewrites applied at syscall entry, scaling requested waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRewrite {
    /// `nanosleep`: timespec behind arg 0
    SleepRequest,
    /// `poll`: millisecond timeout passed by value in arg 2
    PollTimeout,
    /// `select`: timeval behind arg 4
    SelectTimeout,
    /// `clock_nanosleep`: timespec behind arg 2, relative or absolute
    ClockSleepRequest,
    /// `pselect6`: timespec behind arg 4
    PselectTimeout,
    /// `ppoll`: timespec behind arg 2
    PpollTimeout,
}

/// Rewrites applied at syscall exit, scaling reported time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitRewrite {
    /// `gettimeofday`: timeval behind arg 0, realtime anchor
    WallClock,
    /// `clock_gettime`: timespec behind arg 1, anchor of the clock in arg 0
    ClockReading,
    /// `time`: seconds in the return value (and behind arg 0 if set)
    EpochSeconds,
    /// `nanosleep`: unslept time behind arg 1
    SleepRemaining,
    /// `clock_nanosleep`: unslept time behind arg 3
    ClockSleepRemaining,
    /// `select`: unslept time written back into the timeval behind arg 4
    SelectRemaining,
    /// `pselect6`: unslept time written back into the timespec behind arg 4
    PselectRemaining,
    /// `ppoll`: unslept time written back into the timespec behind arg 2
    PpollRemaining,
}

/// Entry and exit rewrite attached to one syscall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerPair {
    pub entry: Option<EntryRewrite>,
    pub exit: Option<ExitRewrite>,
}

impl TimeSyscall {
    pub fn handlers(self) -> HandlerPair {
        let (entry, exit) = match self {
            TimeSyscall::Nanosleep => (
                Some(EntryRewrite::SleepRequest),
                Some(ExitRewrite::SleepRemaining),
            ),
            TimeSyscall::Poll => (Some(EntryRewrite::PollTimeout), None),
            TimeSyscall::Select => (
                Some(EntryRewrite::SelectTimeout),
                Some(ExitRewrite::SelectRemaining),
            ),
            TimeSyscall::ClockNanosleep => (
                Some(EntryRewrite::ClockSleepRequest),
                Some(ExitRewrite::ClockSleepRemaining),
            ),
            TimeSyscall::Gettimeofday => (None, Some(ExitRewrite::WallClock)),
            TimeSyscall::ClockGettime => (None, Some(ExitRewrite::ClockReading)),
            TimeSyscall::Time => (None, Some(ExitRewrite::EpochSeconds)),
            TimeSyscall::Pselect6 => (
                Some(EntryRewrite::PselectTimeout),
                Some(ExitRewrite::PselectRemaining),
            ),
            TimeSyscall::Ppoll => (
                Some(EntryRewrite::PpollTimeout),
                Some(ExitRewrite::PpollRemaining),
            ),
        };
        HandlerPair { entry, exit }
    }
}

/// Fixed mapping from syscall number to rewrite, built once per session
#[derive(Debug, Clone)]
pub struct SyscallHandlerRegistry {
    entry: HashMap<u64, EntryRewrite>,
    exit: HashMap<u64, ExitRewrite>,
}

impl SyscallHandlerRegistry {
    pub fn new() -> Self {
        let mut entry = HashMap::new();
        let mut exit = HashMap::new();
        for call in TimeSyscall::ALL {
            let pair = call.handlers();
            if let Some(rewrite) = pair.entry {
                entry.insert(call.number(), rewrite);
            }
            if let Some(rewrite) = pair.exit {
                exit.insert(call.number(), rewrite);
            }
        }
        Self { entry, exit }
    }

    pub fn entry_handler(&self, number: u64) -> Option<EntryRewrite> {
        self.entry.get(&number).copied()
    }

    pub fn exit_handler(&self, number: u64) -> Option<ExitRewrite> {
        self.exit.get(&number).copied()
    }
}

impl Default for SyscallHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a registered handler left the syscall untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NullPointer,
    /// The kernel reported an error, so the output is not meaningful
    SyscallFailed,
    /// The sleep completed, so there is no remaining time to report
    NotInterrupted,
    /// Absolute sleeps never report remaining time
    AbsoluteSleep,
    /// The kernel will reject this record itself
    InvalidRecord,
    NonPositiveTimeout,
    /// No anchor for the requested clock (undefined or out of range)
    Unanchored(AnchorLookup),
    /// The clock of an absolute deadline could not be read
    ClockUnreadable,
}

/// What a handler did at one stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Rewritten,
    Skipped(Skip),
}

/// Everything a handler may consult besides the stopped task
pub struct RewriteContext<'a, C: ClockSource> {
    pub config: &'a ScalingConfig,
    pub anchors: &'a ClockAnchorTable,
    pub clocks: &'a C,
}

impl<C: ClockSource> RewriteContext<'_, C> {
    fn request(&self) -> Scaling {
        Scaling::duration(self.config.request_factor())
    }

    fn remaining(&self) -> Scaling {
        Scaling::duration(self.config.remaining_factor())
    }

    fn reading(&self, anchor: AnchorLookup) -> std::result::Result<Scaling, Skip> {
        match anchor {
            AnchorLookup::Defined(anchor) => {
                Ok(Scaling::point_in_time(self.config.time_factor(), anchor))
            }
            other => Err(Skip::Unanchored(other)),
        }
    }
}

/// Which records a rewrite accepts; anything else goes to the kernel as is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accept {
    /// Output written by the kernel
    Any,
    /// A normalized duration, as the sleep calls and `pselect6`/`ppoll` demand
    Duration,
    /// Non-negative fields; `select` normalizes the rest itself
    NonNegative,
}

impl Accept {
    fn admits<R: TimeRecord>(self, record: &R) -> bool {
        match self {
            Accept::Any => true,
            Accept::Duration => record.is_valid_duration(),
            Accept::NonNegative => record.is_non_negative(),
        }
    }
}

/// Read the record behind `addr`, rescale it and write it back
fn rewrite_record<R, T>(task: &mut T, addr: u64, scaling: Scaling, accept: Accept) -> Result<Outcome>
where
    R: TimeRecord,
    T: RemoteTask,
{
    if addr == 0 {
        return Ok(Outcome::Skipped(Skip::NullPointer));
    }
    let record: R = task.read_record(addr)?;
    if !accept.admits(&record) {
        return Ok(Outcome::Skipped(Skip::InvalidRecord));
    }
    let scaled = scaling.apply_record(record);
    task.write_record(addr, &scaled)?;
    trace!(
        "[pid {}] {:#x}: {:?} -> {:?}",
        task.pid(),
        addr,
        record,
        scaled
    );
    Ok(Outcome::Rewritten)
}

/// Unslept time the wait calls write back, on success and on `EINTR`
fn wait_remaining<R, T, C>(ctx: &RewriteContext<'_, C>, task: &mut T, regs: &SyscallRegs, index: usize) -> Result<Outcome>
where
    R: TimeRecord,
    T: RemoteTask,
    C: ClockSource,
{
    if regs.is_error() && !regs.returned_errno(Errno::EINTR) {
        return Ok(Outcome::Skipped(Skip::SyscallFailed));
    }
    rewrite_record::<R, _>(task, regs.arg(index), ctx.remaining(), Accept::Any)
}

/// `clockid_t` and the `flags` of `clock_nanosleep` are C `int`s
fn int_arg(regs: &SyscallRegs, index: usize) -> i32 {
    regs.arg(index) as u32 as i32
}

impl EntryRewrite {
    pub fn apply<T, C>(self, ctx: &RewriteContext<'_, C>, task: &mut T, regs: SyscallRegs) -> Result<Outcome>
    where
        T: RemoteTask,
        C: ClockSource,
    {
        match self {
            EntryRewrite::SleepRequest => {
                rewrite_record::<Timespec, _>(task, regs.arg(0), ctx.request(), Accept::Duration)
            }
            EntryRewrite::SelectTimeout => {
                rewrite_record::<Timeval, _>(task, regs.arg(4), ctx.request(), Accept::NonNegative)
            }
            EntryRewrite::PselectTimeout => {
                rewrite_record::<Timespec, _>(task, regs.arg(4), ctx.request(), Accept::Duration)
            }
            EntryRewrite::PpollTimeout => {
                rewrite_record::<Timespec, _>(task, regs.arg(2), ctx.request(), Accept::Duration)
            }
            EntryRewrite::PollTimeout => {
                let mut regs = regs;
                let timeout = int_arg(&regs, 2);
                if timeout <= 0 {
                    return Ok(Outcome::Skipped(Skip::NonPositiveTimeout));
                }
                let scaled = (f64::from(timeout) * ctx.config.request_factor())
                    .floor()
                    .clamp(1.0, f64::from(i32::MAX)) as i32;
                regs.set_arg(2, i64::from(scaled) as u64);
                task.set_registers(&regs)?;
                trace!("[pid {}] poll timeout {}ms -> {}ms", task.pid(), timeout, scaled);
                Ok(Outcome::Rewritten)
            }
            EntryRewrite::ClockSleepRequest => {
                if int_arg(&regs, 1) & TIMER_ABSTIME != 0 {
                    return absolute_deadline(ctx, task, &regs);
                }
                rewrite_record::<Timespec, _>(task, regs.arg(2), ctx.request(), Accept::Duration)
            }
        }
    }
}

/// `clock_nanosleep` with `TIMER_ABSTIME`
///
/// The deadline was computed from rescaled readings of the same clock, so it
/// is first mapped back to the real clock through the anchor. The wait left
/// from the real current reading is then divided by the delay factor.
fn absolute_deadline<T, C>(ctx: &RewriteContext<'_, C>, task: &mut T, regs: &SyscallRegs) -> Result<Outcome>
where
    T: RemoteTask,
    C: ClockSource,
{
    let clock = i64::from(int_arg(regs, 0));
    let anchor = match ctx.anchors.lookup(clock) {
        AnchorLookup::Defined(anchor) => anchor,
        other => return Ok(Outcome::Skipped(Skip::Unanchored(other))),
    };
    let Some(now) = ctx.clocks.now(clock) else {
        return Ok(Outcome::Skipped(Skip::ClockUnreadable));
    };

    let addr = regs.arg(2);
    if addr == 0 {
        return Ok(Outcome::Skipped(Skip::NullPointer));
    }
    let deadline: Timespec = task.read_record(addr)?;
    if !Accept::Duration.admits(&deadline) {
        return Ok(Outcome::Skipped(Skip::InvalidRecord));
    }
    let real = Scaling::point_in_time(1.0 / ctx.config.time_factor(), anchor).apply(deadline.to_nanos());
    let shortened = Scaling {
        factor: ctx.config.request_factor(),
        anchor: Some(now),
    }
    .apply(real);
    let scaled = Timespec::from_nanos(shortened);
    task.write_record(addr, &scaled)?;
    trace!(
        "[pid {}] deadline on clock {}: {:?} -> {:?}",
        task.pid(),
        clock,
        deadline,
        scaled
    );
    Ok(Outcome::Rewritten)
}

impl ExitRewrite {
    pub fn apply<T, C>(self, ctx: &RewriteContext<'_, C>, task: &mut T, regs: SyscallRegs) -> Result<Outcome>
    where
        T: RemoteTask,
        C: ClockSource,
    {
        match self {
            ExitRewrite::WallClock => {
                if regs.is_error() {
                    return Ok(Outcome::Skipped(Skip::SyscallFailed));
                }
                match ctx.reading(ctx.anchors.realtime()) {
                    Ok(scaling) => rewrite_record::<Timeval, _>(task, regs.arg(0), scaling, Accept::Any),
                    Err(skip) => Ok(Outcome::Skipped(skip)),
                }
            }
            ExitRewrite::ClockReading => {
                if regs.is_error() {
                    return Ok(Outcome::Skipped(Skip::SyscallFailed));
                }
                // The clock id register is preserved across the call
                let clock = i64::from(int_arg(&regs, 0));
                match ctx.reading(ctx.anchors.lookup(clock)) {
                    Ok(scaling) => rewrite_record::<Timespec, _>(task, regs.arg(1), scaling, Accept::Any),
                    Err(skip) => Ok(Outcome::Skipped(skip)),
                }
            }
            ExitRewrite::EpochSeconds => {
                if regs.is_error() {
                    return Ok(Outcome::Skipped(Skip::SyscallFailed));
                }
                let scaling = match ctx.reading(ctx.anchors.realtime()) {
                    Ok(scaling) => scaling,
                    Err(skip) => return Ok(Outcome::Skipped(skip)),
                };
                let mut regs = regs;
                let raw = regs.ret_value();
                let scaled = scaling.apply_seconds(raw);
                let tloc = regs.arg(0);
                if tloc != 0 {
                    task.write_span(tloc, &scaled.to_ne_bytes())?;
                }
                regs.ret = scaled as u64;
                task.set_registers(&regs)?;
                trace!("[pid {}] time {} -> {}", task.pid(), raw, scaled);
                Ok(Outcome::Rewritten)
            }
            ExitRewrite::SleepRemaining => {
                if !regs.returned_errno(Errno::EINTR) {
                    return Ok(Outcome::Skipped(Skip::NotInterrupted));
                }
                rewrite_record::<Timespec, _>(task, regs.arg(1), ctx.remaining(), Accept::Any)
            }
            ExitRewrite::ClockSleepRemaining => {
                if !regs.returned_errno(Errno::EINTR) {
                    return Ok(Outcome::Skipped(Skip::NotInterrupted));
                }
                if int_arg(&regs, 1) & TIMER_ABSTIME != 0 {
                    return Ok(Outcome::Skipped(Skip::AbsoluteSleep));
                }
                rewrite_record::<Timespec, _>(task, regs.arg(3), ctx.remaining(), Accept::Any)
            }
            ExitRewrite::SelectRemaining => wait_remaining::<Timeval, _, _>(ctx, task, &regs, 4),
            ExitRewrite::PselectRemaining => wait_remaining::<Timespec, _, _>(ctx, task, &regs, 4),
            ExitRewrite::PpollRemaining => wait_remaining::<Timespec, _, _>(ctx, task, &regs, 2),
        }
    }
}
