//! File timestamps as stored in 7z headers.
//!
//! The format stores times as Windows FILETIME values: 64-bit counts of
//! 100-nanosecond intervals since January 1, 1601 (UTC).
//!
//! ```rust
//! use sevenz_extract::Timestamp;
//! use std::time::SystemTime;
//!
//! let ts = Timestamp::from_filetime(116_444_736_000_000_000);
//! assert_eq!(ts.as_unix_secs(), 0);
//! assert_eq!(ts.as_system_time(), SystemTime::UNIX_EPOCH);
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// FILETIME value of the Unix epoch.
const FILETIME_UNIX_DIFF: u64 = 116_444_736_000_000_000;

/// Number of 100-nanosecond intervals per second.
const INTERVALS_PER_SECOND: u64 = 10_000_000;

/// A timestamp read from an archive, kept at full FILETIME precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    filetime: u64,
}

impl Timestamp {
    /// Creates a timestamp from a raw Windows FILETIME value.
    #[inline]
    pub const fn from_filetime(filetime: u64) -> Self {
        Self { filetime }
    }

    /// Returns the raw FILETIME value.
    #[inline]
    pub const fn as_filetime(&self) -> u64 {
        self.filetime
    }

    /// Returns whole seconds relative to the Unix epoch (negative before 1970).
    pub fn as_unix_secs(&self) -> i64 {
        if self.filetime >= FILETIME_UNIX_DIFF {
            ((self.filetime - FILETIME_UNIX_DIFF) / INTERVALS_PER_SECOND) as i64
        } else {
            -((FILETIME_UNIX_DIFF - self.filetime).div_ceil(INTERVALS_PER_SECOND) as i64)
        }
    }

    /// Converts to a `SystemTime`.
    pub fn as_system_time(&self) -> SystemTime {
        let to_duration = |intervals: u64| {
            Duration::new(
                intervals / INTERVALS_PER_SECOND,
                ((intervals % INTERVALS_PER_SECOND) * 100) as u32,
            )
        };
        if self.filetime >= FILETIME_UNIX_DIFF {
            UNIX_EPOCH + to_duration(self.filetime - FILETIME_UNIX_DIFF)
        } else {
            UNIX_EPOCH - to_duration(FILETIME_UNIX_DIFF - self.filetime)
        }
    }
}

impl From<Timestamp> for SystemTime {
    fn from(ts: Timestamp) -> Self {
        ts.as_system_time()
    }
}
