//! Remote register and memory access for a stopped tracee
//!
//! Memory moves in native 8-byte words through PTRACE_PEEKDATA and
//! PTRACE_POKEDATA. A trailing partial word is read-modify-written so bytes
//! past the span are preserved. Everything here is only valid between a
//! trace stop and the next resume of the same task.

use std::mem::{size_of, MaybeUninit};

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::error::{Result, TardisError};
use crate::scaling::{TimeRecord, RECORD_SIZE};

/// Native word size of the target architecture
pub const WORD_SIZE: usize = size_of::<u64>();

/// Size of the full x86_64 general-purpose register set
pub const REGSET_SIZE: usize = size_of::<libc::user_regs_struct>();

/// `NT_PRSTATUS` regset note type
const NT_PRSTATUS: usize = 1;

/// Syscall view of a stopped task's registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyscallRegs {
    /// Syscall identifier (`orig_rax`)
    pub number: u64,
    /// Arguments in calling-convention order (`rdi, rsi, rdx, r10, r8, r9`)
    pub args: [u64; 6],
    /// Return value (`rax`), meaningful at syscall exit
    pub ret: u64,
}

impl SyscallRegs {
    pub fn arg(&self, index: usize) -> u64 {
        self.args[index]
    }

    pub fn set_arg(&mut self, index: usize, value: u64) {
        self.args[index] = value;
    }

    pub fn ret_value(&self) -> i64 {
        self.ret as i64
    }

    /// The kernel returns `-errno` in `[-4095, -1]` on failure
    pub fn is_error(&self) -> bool {
        (-4095..0).contains(&self.ret_value())
    }

    pub fn returned_errno(&self, errno: Errno) -> bool {
        self.ret_value() == -(errno as i64)
    }

    fn from_user_regs(raw: &libc::user_regs_struct) -> Self {
        Self {
            number: raw.orig_rax,
            args: [raw.rdi, raw.rsi, raw.rdx, raw.r10, raw.r8, raw.r9],
            ret: raw.rax,
        }
    }

    fn store_into(&self, raw: &mut libc::user_regs_struct) {
        raw.orig_rax = self.number;
        raw.rdi = self.args[0];
        raw.rsi = self.args[1];
        raw.rdx = self.args[2];
        raw.r10 = self.args[3];
        raw.r8 = self.args[4];
        raw.r9 = self.args[5];
        raw.rax = self.ret;
    }
}

/// Word-granular access to a tracee's address space
pub trait WordAccess {
    fn peek_word(&mut self, addr: u64) -> Result<u64>;
    fn poke_word(&mut self, addr: u64, word: u64) -> Result<()>;
}

fn word_addr(pid: Pid, base: u64, offset: usize) -> Result<u64> {
    base.checked_add(offset as u64).ok_or(TardisError::Tracing {
        op: "address arithmetic",
        pid,
        source: Errno::EFAULT,
    })
}

/// Copy `buf.len()` bytes starting at `addr` out of the tracee
pub fn read_words<W: WordAccess>(mem: &mut W, pid: Pid, addr: u64, buf: &mut [u8]) -> Result<()> {
    for (index, chunk) in buf.chunks_mut(WORD_SIZE).enumerate() {
        let word = mem.peek_word(word_addr(pid, addr, index * WORD_SIZE)?)?;
        chunk.copy_from_slice(&word.to_ne_bytes()[..chunk.len()]);
    }
    Ok(())
}

/// Copy `data` into the tracee starting at `addr`
pub fn write_words<W: WordAccess>(mem: &mut W, pid: Pid, addr: u64, data: &[u8]) -> Result<()> {
    for (index, chunk) in data.chunks(WORD_SIZE).enumerate() {
        let at = word_addr(pid, addr, index * WORD_SIZE)?;
        let mut bytes = if chunk.len() == WORD_SIZE {
            [0u8; WORD_SIZE]
        } else {
            mem.peek_word(at)?.to_ne_bytes()
        };
        bytes[..chunk.len()].copy_from_slice(chunk);
        mem.poke_word(at, u64::from_ne_bytes(bytes))?;
    }
    Ok(())
}

/// A stopped task whose registers and memory can be rewritten
pub trait RemoteTask {
    fn pid(&self) -> Pid;
    fn registers(&mut self) -> Result<SyscallRegs>;
    fn set_registers(&mut self, regs: &SyscallRegs) -> Result<()>;
    fn read_span(&mut self, addr: u64, buf: &mut [u8]) -> Result<()>;
    fn write_span(&mut self, addr: u64, data: &[u8]) -> Result<()>;

    fn read_record<R: TimeRecord>(&mut self, addr: u64) -> Result<R>
    where
        Self: Sized,
    {
        let mut bytes = [0u8; RECORD_SIZE];
        self.read_span(addr, &mut bytes)?;
        Ok(R::decode(&bytes))
    }

    fn write_record<R: TimeRecord>(&mut self, addr: u64, record: &R) -> Result<()>
    where
        Self: Sized,
    {
        self.write_span(addr, &record.encode())
    }
}

/// A task stopped under ptrace
///
/// Holds the raw register set fetched at this stop so that writing the
/// syscall view back leaves every other register as the kernel reported it.
pub struct PtraceTask {
    pid: Pid,
    raw: Option<libc::user_regs_struct>,
}

impl PtraceTask {
    pub fn new(pid: Pid) -> Self {
        Self { pid, raw: None }
    }

    fn raw_registers(&mut self) -> Result<libc::user_regs_struct> {
        match self.raw {
            Some(raw) => Ok(raw),
            None => {
                let raw = ptrace::getregs(self.pid)
                    .map_err(TardisError::tracing("PTRACE_GETREGS", self.pid))?;
                self.raw = Some(raw);
                Ok(raw)
            }
        }
    }
}

impl WordAccess for PtraceTask {
    fn peek_word(&mut self, addr: u64) -> Result<u64> {
        ptrace::read(self.pid, addr as usize as ptrace::AddressType)
            .map(|word| word as u64)
            .map_err(TardisError::tracing("PTRACE_PEEKDATA", self.pid))
    }

    fn poke_word(&mut self, addr: u64, word: u64) -> Result<()> {
        ptrace::write(
            self.pid,
            addr as usize as ptrace::AddressType,
            word as libc::c_long,
        )
        .map_err(TardisError::tracing("PTRACE_POKEDATA", self.pid))
    }
}

impl RemoteTask for PtraceTask {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn registers(&mut self) -> Result<SyscallRegs> {
        Ok(SyscallRegs::from_user_regs(&self.raw_registers()?))
    }

    fn set_registers(&mut self, regs: &SyscallRegs) -> Result<()> {
        let mut raw = self.raw_registers()?;
        regs.store_into(&mut raw);
        ptrace::setregs(self.pid, raw).map_err(TardisError::tracing("PTRACE_SETREGS", self.pid))?;
        self.raw = Some(raw);
        Ok(())
    }

    fn read_span(&mut self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let pid = self.pid;
        read_words(self, pid, addr, buf)
    }

    fn write_span(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let pid = self.pid;
        write_words(self, pid, addr, data)
    }
}

/// Size in bytes of the general-purpose register set the kernel reports
/// for `pid`
///
/// A 64-bit tracee fills the whole `user_regs_struct`; a 32-bit (compat)
/// tracee reports its shorter i386 layout.
pub fn register_set_len(pid: Pid) -> Result<usize> {
    let mut raw = MaybeUninit::<libc::user_regs_struct>::zeroed();
    let mut iov = libc::iovec {
        iov_base: raw.as_mut_ptr().cast::<libc::c_void>(),
        iov_len: REGSET_SIZE,
    };
    let result = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            pid.as_raw(),
            NT_PRSTATUS as *mut libc::c_void,
            (&mut iov as *mut libc::iovec).cast::<libc::c_void>(),
        )
    };
    Errno::result(result).map_err(TardisError::tracing("PTRACE_GETREGSET", pid))?;
    Ok(iov.iov_len)
}

/// Fail with `UnsupportedTarget` unless `pid` has the full 64-bit register set
pub fn ensure_64bit(pid: Pid) -> Result<()> {
    let regset_len = register_set_len(pid)?;
    if regset_len != REGSET_SIZE {
        return Err(TardisError::UnsupportedTarget {
            pid,
            regset_len,
            expected: REGSET_SIZE,
        });
    }
    Ok(())
}
