//! Time scaling arithmetic and the time records it applies to
//!
//! Time is carried as signed nanoseconds so a factor of exactly 1.0 is an
//! identity even for epoch-sized readings. The core formula is
//!
//! ```text
//! scale(value, factor, anchor) = anchor + (value - anchor) * factor
//! scale(value, factor, none)   = value * factor
//! ```
//!
//! The records mirror the x86_64 layouts of `struct timespec` and
//! `struct timeval`: two native-endian `i64` fields at offsets 0 and 8.

/// Time in nanoseconds, either since an epoch or as a duration
pub type Nanos = i128;

pub const NANOS_PER_SEC: Nanos = 1_000_000_000;
pub const NANOS_PER_MICRO: Nanos = 1_000;

/// Size in bytes of both time records on x86_64
pub const RECORD_SIZE: usize = 16;

/// Rescale `value` by `factor`, relative to `anchor` when one is given
///
/// The scaled offset is floored to whole nanoseconds. A factor of 1.0
/// returns `value` as is: offsets past 2^53 ns do not survive `f64`.
pub fn scale(value: Nanos, factor: f64, anchor: Option<Nanos>) -> Nanos {
    if factor == 1.0 {
        return value;
    }
    match anchor {
        Some(anchor) if anchor != 0 => anchor + floor_nanos((value - anchor) as f64 * factor),
        _ => floor_nanos(value as f64 * factor),
    }
}

fn floor_nanos(value: f64) -> Nanos {
    // `as` saturates on overflow and maps NaN to zero
    value.floor() as Nanos
}

fn saturate_i64(value: Nanos) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

/// How a single value is rewritten
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub factor: f64,
    pub anchor: Option<Nanos>,
}

impl Scaling {
    /// An amount of time to wait: scaled from zero
    pub fn duration(factor: f64) -> Self {
        Self {
            factor,
            anchor: None,
        }
    }

    /// A clock reading: elapsed time since `anchor` is scaled
    pub fn point_in_time(factor: f64, anchor: Nanos) -> Self {
        Self {
            factor,
            anchor: Some(anchor),
        }
    }

    pub fn apply(&self, value: Nanos) -> Nanos {
        scale(value, self.factor, self.anchor)
    }

    pub fn apply_record<R: TimeRecord>(&self, record: R) -> R {
        R::from_nanos(self.apply(record.to_nanos()))
    }

    /// Rescale whole seconds, flooring the result back to seconds
    pub fn apply_seconds(&self, seconds: i64) -> i64 {
        let scaled = self.apply(Nanos::from(seconds) * NANOS_PER_SEC);
        saturate_i64(scaled.div_euclid(NANOS_PER_SEC))
    }
}

/// A fixed-layout time structure living in tracee memory
pub trait TimeRecord: Copy + std::fmt::Debug {
    fn decode(bytes: &[u8; RECORD_SIZE]) -> Self;
    fn encode(&self) -> [u8; RECORD_SIZE];
    fn to_nanos(&self) -> Nanos;
    /// Build a record from nanoseconds, flooring the integer seconds and
    /// truncating the remainder to the record's sub-second unit
    fn from_nanos(nanos: Nanos) -> Self;
    /// Whether the kernel would accept this record as a duration
    fn is_valid_duration(&self) -> bool;
    /// Both fields non-negative; `select` folds excess microseconds into
    /// seconds instead of rejecting them
    fn is_non_negative(&self) -> bool;
}

fn split_fields(bytes: &[u8; RECORD_SIZE]) -> (i64, i64) {
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&bytes[..8]);
    hi.copy_from_slice(&bytes[8..]);
    (i64::from_ne_bytes(lo), i64::from_ne_bytes(hi))
}

fn join_fields(first: i64, second: i64) -> [u8; RECORD_SIZE] {
    let mut out = [0u8; RECORD_SIZE];
    out[..8].copy_from_slice(&first.to_ne_bytes());
    out[8..].copy_from_slice(&second.to_ne_bytes());
    out
}

/// `struct timespec { time_t tv_sec; long tv_nsec; }`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl TimeRecord for Timespec {
    fn decode(bytes: &[u8; RECORD_SIZE]) -> Self {
        let (sec, nsec) = split_fields(bytes);
        Self { sec, nsec }
    }

    fn encode(&self) -> [u8; RECORD_SIZE] {
        join_fields(self.sec, self.nsec)
    }

    fn to_nanos(&self) -> Nanos {
        Nanos::from(self.sec) * NANOS_PER_SEC + Nanos::from(self.nsec)
    }

    fn from_nanos(nanos: Nanos) -> Self {
        Self {
            sec: saturate_i64(nanos.div_euclid(NANOS_PER_SEC)),
            nsec: nanos.rem_euclid(NANOS_PER_SEC) as i64,
        }
    }

    fn is_valid_duration(&self) -> bool {
        self.sec >= 0 && (0..NANOS_PER_SEC as i64).contains(&self.nsec)
    }

    fn is_non_negative(&self) -> bool {
        self.sec >= 0 && self.nsec >= 0
    }
}

/// `struct timeval { time_t tv_sec; suseconds_t tv_usec; }`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeval {
    pub sec: i64,
    pub usec: i64,
}

impl TimeRecord for Timeval {
    fn decode(bytes: &[u8; RECORD_SIZE]) -> Self {
        let (sec, usec) = split_fields(bytes);
        Self { sec, usec }
    }

    fn encode(&self) -> [u8; RECORD_SIZE] {
        join_fields(self.sec, self.usec)
    }

    fn to_nanos(&self) -> Nanos {
        Nanos::from(self.sec) * NANOS_PER_SEC + Nanos::from(self.usec) * NANOS_PER_MICRO
    }

    fn from_nanos(nanos: Nanos) -> Self {
        Self {
            sec: saturate_i64(nanos.div_euclid(NANOS_PER_SEC)),
            usec: (nanos.rem_euclid(NANOS_PER_SEC) / NANOS_PER_MICRO) as i64,
        }
    }

    fn is_valid_duration(&self) -> bool {
        self.sec >= 0 && (0..(NANOS_PER_SEC / NANOS_PER_MICRO) as i64).contains(&self.usec)
    }

    fn is_non_negative(&self) -> bool {
        self.sec >= 0 && self.usec >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Nanos = NANOS_PER_SEC;

    #[test]
    fn test_duration_scaling_halves_sleep() {
        let ts = Timespec { sec: 4, nsec: 0 };
        let scaled = Scaling::duration(1.0 / 2.0).apply_record(ts);
        assert_eq!(scaled, Timespec { sec: 2, nsec: 0 });
    }

    #[test]
    fn test_duration_scaling_keeps_subsecond_unit() {
        let ts = Timespec {
            sec: 1,
            nsec: 500_000_000,
        };
        let scaled = Scaling::duration(0.5).apply_record(ts);
        assert_eq!(
            scaled,
            Timespec {
                sec: 0,
                nsec: 750_000_000
            }
        );

        let tv = Timeval {
            sec: 3,
            usec: 0,
        };
        let scaled = Scaling::duration(0.25).apply_record(tv);
        assert_eq!(
            scaled,
            Timeval {
                sec: 0,
                usec: 750_000
            }
        );
    }

    #[test]
    fn test_point_in_time_doubles_elapsed() {
        let anchor = 1_700_000_000 * SEC;
        let reading = anchor + 10 * SEC;
        let scaled = Scaling::point_in_time(2.0, anchor).apply(reading);
        assert_eq!(scaled, anchor + 20 * SEC);
    }

    #[test]
    fn test_identity_factor_is_exact_for_epoch_readings() {
        let anchor = 1_700_000_000 * SEC + 123_456_789;
        let reading = Timespec {
            sec: 1_700_000_042,
            nsec: 987_654_321,
        };
        let scaled = Scaling::point_in_time(1.0, anchor).apply_record(reading);
        assert_eq!(scaled, reading);
    }

    #[test]
    fn test_zero_anchor_scales_from_epoch() {
        assert_eq!(scale(10 * SEC, 0.5, Some(0)), 5 * SEC);
        assert_eq!(scale(10 * SEC, 0.5, None), 5 * SEC);
    }

    #[test]
    fn test_scale_floors_integer_part() {
        // 1ns * 0.5 floors to zero
        assert_eq!(scale(1, 0.5, None), 0);
        // Negative offsets floor downward
        assert_eq!(scale(-1, 0.5, None), -1);
    }

    #[test]
    fn test_from_nanos_floors_negative_values() {
        let ts = Timespec::from_nanos(-SEC / 4);
        assert_eq!(
            ts,
            Timespec {
                sec: -1,
                nsec: 750_000_000
            }
        );
    }

    #[test]
    fn test_timeval_truncates_to_microseconds() {
        let tv = Timeval::from_nanos(2 * SEC + 1_999);
        assert_eq!(tv, Timeval { sec: 2, usec: 1 });
    }

    #[test]
    fn test_record_layout_is_two_native_words() {
        let ts = Timespec { sec: 5, nsec: 7 };
        let bytes = ts.encode();
        assert_eq!(&bytes[..8], &5i64.to_ne_bytes());
        assert_eq!(&bytes[8..], &7i64.to_ne_bytes());
        assert_eq!(Timespec::decode(&bytes), ts);

        let tv = Timeval { sec: -2, usec: 999_999 };
        assert_eq!(Timeval::decode(&tv.encode()), tv);
    }

    #[test]
    fn test_duration_validity() {
        assert!(Timespec { sec: 0, nsec: 0 }.is_valid_duration());
        assert!(!Timespec { sec: -1, nsec: 0 }.is_valid_duration());
        assert!(!Timespec { sec: 1, nsec: 1_000_000_000 }.is_valid_duration());
        assert!(Timeval { sec: 1, usec: 999_999 }.is_valid_duration());
        assert!(!Timeval { sec: 1, usec: 1_000_000 }.is_valid_duration());

        assert!(Timeval { sec: 0, usec: 1_500_000 }.is_non_negative());
        assert!(!Timeval { sec: 0, usec: -1 }.is_non_negative());
        assert!(!Timespec { sec: -1, nsec: 0 }.is_non_negative());
    }

    #[test]
    fn test_unnormalized_timeval_scales_its_full_length() {
        let tv = Timeval {
            sec: 0,
            usec: 1_500_000,
        };
        assert_eq!(tv.to_nanos(), 3 * SEC / 2);
        let scaled = Scaling::duration(0.5).apply_record(tv);
        assert_eq!(scaled, Timeval { sec: 0, usec: 750_000 });
    }

    #[test]
    fn test_identity_factor_survives_offsets_beyond_f64_precision() {
        let anchor = 17_569_458_685_789_068;
        assert_eq!(scale(-3, 1.0, Some(anchor)), -3);
        assert_eq!(scale(i64::MAX as Nanos + 7, 1.0, None), i64::MAX as Nanos + 7);
    }

    #[test]
    fn test_apply_seconds() {
        let anchor = 1_000 * SEC;
        let scaling = Scaling::point_in_time(2.0, anchor);
        assert_eq!(scaling.apply_seconds(1_010), 1_020);
        assert_eq!(Scaling::point_in_time(1.0, anchor + SEC / 2).apply_seconds(1_005), 1_005);
    }

    #[test]
    fn test_huge_values_saturate() {
        let ts = Scaling::duration(1e30).apply_record(Timespec { sec: 1, nsec: 0 });
        assert_eq!(ts.sec, i64::MAX);
    }
}
