//! Time-family syscalls for x86_64
//!
//! Only the calls tardis rewrites are named here; everything else is a bare
//! number and passes through untouched.

/// x86_64 syscall numbers
pub mod nr {
    pub const POLL: u64 = 7;
    pub const SELECT: u64 = 23;
    pub const NANOSLEEP: u64 = 35;
    pub const GETTIMEOFDAY: u64 = 96;
    pub const TIME: u64 = 201;
    pub const CLOCK_GETTIME: u64 = 228;
    pub const CLOCK_NANOSLEEP: u64 = 230;
    pub const PSELECT6: u64 = 270;
    pub const PPOLL: u64 = 271;
}

/// A syscall whose arguments or results carry time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeSyscall {
    /// `nanosleep(req, rem)`
    Nanosleep,
    /// `poll(fds, nfds, timeout_ms)`
    Poll,
    /// `select(nfds, readfds, writefds, exceptfds, timeout)`
    Select,
    /// `clock_nanosleep(clockid, flags, request, remain)`
    ClockNanosleep,
    /// `gettimeofday(tv, tz)`
    Gettimeofday,
    /// `clock_gettime(clockid, tp)`
    ClockGettime,
    /// `time(tloc)`
    Time,
    /// `pselect6(nfds, readfds, writefds, exceptfds, timeout, sigmask)`;
    /// glibc's `select` and `pselect` land here
    Pselect6,
    /// `ppoll(fds, nfds, timeout, sigmask, sigsetsize)`
    Ppoll,
}

impl TimeSyscall {
    pub const ALL: [TimeSyscall; 9] = [
        TimeSyscall::Nanosleep,
        TimeSyscall::Poll,
        TimeSyscall::Select,
        TimeSyscall::ClockNanosleep,
        TimeSyscall::Gettimeofday,
        TimeSyscall::ClockGettime,
        TimeSyscall::Time,
        TimeSyscall::Pselect6,
        TimeSyscall::Ppoll,
    ];

    pub fn number(self) -> u64 {
        match self {
            TimeSyscall::Nanosleep => nr::NANOSLEEP,
            TimeSyscall::Poll => nr::POLL,
            TimeSyscall::Select => nr::SELECT,
            TimeSyscall::ClockNanosleep => nr::CLOCK_NANOSLEEP,
            TimeSyscall::Gettimeofday => nr::GETTIMEOFDAY,
            TimeSyscall::ClockGettime => nr::CLOCK_GETTIME,
            TimeSyscall::Time => nr::TIME,
            TimeSyscall::Pselect6 => nr::PSELECT6,
            TimeSyscall::Ppoll => nr::PPOLL,
        }
    }

    pub fn from_number(num: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.number() == num)
    }

    pub fn name(self) -> &'static str {
        match self {
            TimeSyscall::Nanosleep => "nanosleep",
            TimeSyscall::Poll => "poll",
            TimeSyscall::Select => "select",
            TimeSyscall::ClockNanosleep => "clock_nanosleep",
            TimeSyscall::Gettimeofday => "gettimeofday",
            TimeSyscall::ClockGettime => "clock_gettime",
            TimeSyscall::Time => "time",
            TimeSyscall::Pselect6 => "pselect6",
            TimeSyscall::Ppoll => "ppoll",
        }
    }
}

/// Name for log output: the time-family name, or "syscall_NNN"
pub fn syscall_name(num: u64) -> String {
    match TimeSyscall::from_number(num) {
        Some(call) => call.name().to_string(),
        None => format!("syscall_{}", num),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_syscall_numbers() {
        assert_eq!(TimeSyscall::from_number(35), Some(TimeSyscall::Nanosleep));
        assert_eq!(TimeSyscall::from_number(228), Some(TimeSyscall::ClockGettime));
        assert_eq!(TimeSyscall::from_number(201), Some(TimeSyscall::Time));
        assert_eq!(TimeSyscall::from_number(230), Some(TimeSyscall::ClockNanosleep));
        assert_eq!(TimeSyscall::from_number(270), Some(TimeSyscall::Pselect6));
        assert_eq!(TimeSyscall::from_number(271), Some(TimeSyscall::Ppoll));
    }

    #[test]
    fn test_number_round_trips() {
        for call in TimeSyscall::ALL {
            assert_eq!(TimeSyscall::from_number(call.number()), Some(call));
        }
    }

    #[test]
    fn test_unknown_syscall() {
        assert_eq!(TimeSyscall::from_number(0), None);
        assert_eq!(TimeSyscall::from_number(9999), None);
        assert_eq!(syscall_name(1), "syscall_1");
        assert_eq!(syscall_name(96), "gettimeofday");
    }
}
