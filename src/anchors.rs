//! Per-clock baselines sampled once before the target is spawned

use nix::time::{clock_gettime, ClockId};
use tracing::debug;

use crate::scaling::{Nanos, NANOS_PER_SEC};

/// Number of clock identifiers sampled at startup, starting at `CLOCK_REALTIME`
pub const ANCHORED_CLOCKS: usize = 16;

pub const CLOCK_REALTIME: i64 = libc::CLOCK_REALTIME as i64;

/// A readable set of system clocks
pub trait ClockSource {
    /// Current reading of `clock`, or `None` if the clock cannot be read
    fn now(&self, clock: i64) -> Option<Nanos>;
}

/// The host's clocks via `clock_gettime(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClocks;

impl ClockSource for SystemClocks {
    fn now(&self, clock: i64) -> Option<Nanos> {
        let id = libc::clockid_t::try_from(clock).ok()?;
        let ts = clock_gettime(ClockId::from_raw(id)).ok()?;
        Some(Nanos::from(ts.tv_sec()) * NANOS_PER_SEC + Nanos::from(ts.tv_nsec()))
    }
}

/// Result of looking up a clock identifier requested by the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorLookup {
    Defined(Nanos),
    /// Sampling this clock failed at startup
    Undefined,
    /// The identifier is outside the table
    OutOfRange,
}

impl AnchorLookup {
    pub fn defined(self) -> Option<Nanos> {
        match self {
            AnchorLookup::Defined(anchor) => Some(anchor),
            _ => None,
        }
    }
}

/// Baseline time per clock identifier, immutable once captured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockAnchorTable {
    anchors: Vec<Option<Nanos>>,
}

impl ClockAnchorTable {
    /// Sample clock ids `0..ANCHORED_CLOCKS` from `source`
    ///
    /// A clock that cannot be read is left undefined rather than failing
    /// startup.
    pub fn capture<C: ClockSource>(source: &C) -> Self {
        let anchors = (0..ANCHORED_CLOCKS as i64)
            .map(|clock| {
                let anchor = source.now(clock);
                if anchor.is_none() {
                    debug!("clock {} has no anchor", clock);
                }
                anchor
            })
            .collect();
        Self { anchors }
    }

    pub fn from_anchors(anchors: Vec<Option<Nanos>>) -> Self {
        Self { anchors }
    }

    pub fn lookup(&self, clock: i64) -> AnchorLookup {
        let slot = usize::try_from(clock)
            .ok()
            .and_then(|index| self.anchors.get(index));
        match slot {
            Some(Some(anchor)) => AnchorLookup::Defined(*anchor),
            Some(None) => AnchorLookup::Undefined,
            None => AnchorLookup::OutOfRange,
        }
    }

    pub fn realtime(&self) -> AnchorLookup {
        self.lookup(CLOCK_REALTIME)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}
