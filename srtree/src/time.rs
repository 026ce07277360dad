//! Millisecond time types.
//!
//! The protocol never reads a clock directly: every handler receives `now`
//! explicitly, which keeps the simulator deterministic.

use core::ops::{Add, Mul, Sub};

/// Point in time, in milliseconds since the node's clock origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1000))
    }

    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1000
    }

    /// Elapsed time since `earlier`, zero if `earlier` is in the future.
    #[inline]
    pub const fn saturating_sub(self, earlier: Timestamp) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    #[inline]
    pub const fn saturating_add(self, d: Duration) -> Self {
        Timestamp(self.0.saturating_add(d.0))
    }

    /// Index of the period of length `period` containing this instant.
    ///
    /// A zero period maps everything to index 0.
    #[inline]
    pub const fn period_index(self, period: Duration) -> u64 {
        if period.0 == 0 {
            0
        } else {
            self.0 / period.0
        }
    }

    /// Start of the `index`-th period of length `period`.
    #[inline]
    pub const fn period_start(index: u64, period: Duration) -> Self {
        Timestamp(index.saturating_mul(period.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: Duration) -> Timestamp {
        self.saturating_add(rhs)
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Timestamp) -> Duration {
        self.saturating_sub(rhs)
    }
}

/// Span of time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Duration(ms)
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Duration(secs.saturating_mul(1000))
    }

    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1000
    }

    #[inline]
    pub const fn saturating_sub(self, other: Duration) -> Self {
        Duration(self.0.saturating_sub(other.0))
    }

    #[inline]
    pub const fn saturating_mul(self, n: u64) -> Self {
        Duration(self.0.saturating_mul(n))
    }
}

impl Add for Duration {
    type Output = Duration;

    #[inline]
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl Mul<u64> for Duration {
    type Output = Duration;

    #[inline]
    fn mul(self, rhs: u64) -> Duration {
        self.saturating_mul(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_units() {
        let t = Timestamp::from_millis(1500);
        assert_eq!(t.as_millis(), 1500);
        assert_eq!(t.as_secs(), 1);
        assert_eq!(Timestamp::from_secs(5).as_millis(), 5000);
    }

    #[test]
    fn test_arithmetic_saturates() {
        assert_eq!(Timestamp::MAX + Duration::from_secs(1), Timestamp::MAX);
        assert_eq!(
            Timestamp::from_secs(5) - Timestamp::from_secs(10),
            Duration::ZERO
        );
        assert_eq!(
            Duration::from_millis(100).saturating_sub(Duration::from_millis(300)),
            Duration::ZERO
        );
        assert_eq!((Duration::from_millis(310) * 3).as_millis(), 930);
    }

    #[test]
    fn test_period_index() {
        let epoch = Duration::from_secs(40);
        assert_eq!(Timestamp::ZERO.period_index(epoch), 0);
        assert_eq!(Timestamp::from_millis(39_999).period_index(epoch), 0);
        assert_eq!(Timestamp::from_secs(40).period_index(epoch), 1);
        assert_eq!(Timestamp::from_secs(85).period_index(epoch), 2);
        assert_eq!(Timestamp::from_secs(85).period_index(Duration::ZERO), 0);
    }

    #[test]
    fn test_period_start() {
        let epoch = Duration::from_secs(40);
        assert_eq!(Timestamp::period_start(0, epoch), Timestamp::ZERO);
        assert_eq!(Timestamp::period_start(3, epoch), Timestamp::from_secs(120));
    }
}
