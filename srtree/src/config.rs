//! Compile-time protocol timing configuration.
//!
//! The `ProtocolConfig` trait carries every timing constant of the protocol.
//! `DefaultConfig` holds the deployed values; `FastConfig` compresses the
//! timeline for quick simulations while keeping the same ratios.
//!
//! # Derived timing
//!
//! | Quantity | Formula | DefaultConfig |
//! |----------|---------|--------------:|
//! | beacon period | `EPOCH_PERIOD / BEACONS_PER_EPOCH` | 10 s |
//! | staleness window | `SEND_CHECK + LOST_TASK_PERIOD` | 70.1 s |
//! | hold-down after loss | one beacon period | 10 s |
//! | loss guard | staleness window + beacon period | 80.1 s |
//! | depth slot | `MAX_STEP + AVG_STEP` | 310 ms |
//! | flush offset at depth d | `EPOCH_PERIOD - OFFSET_FIX - d * slot` | 39.3 s at d=0 |
//!
//! # Example
//!
//! ```ignore
//! use srtree::{Node, DefaultConfig, FastConfig};
//!
//! let node = Node::<_, _, _, _, DefaultConfig>::new(7, Role::Sensor, transport, random, clock, sensor);
//!
//! // Custom profile
//! struct BenchConfig;
//! impl ProtocolConfig for BenchConfig {
//!     const EPOCH_PERIOD_MILLIS: u64 = 4_000;
//!     // ... other constants
//! }
//! ```

use crate::time::Duration;
use crate::types::MAX_DEPTH;

/// Timing and capacity profile of the protocol.
///
/// All periods must be non-zero.
pub trait ProtocolConfig {
    /// Length of one aggregation epoch.
    const EPOCH_PERIOD_MILLIS: u64;

    /// Steady-state beacons per epoch.
    const BEACONS_PER_EPOCH: u64;

    /// Parent liveness check interval; base of the staleness window.
    const SEND_CHECK_MILLIS: u64;

    /// Period of the bootstrap fast timer.
    const TIMER_FAST_PERIOD_MILLIS: u64;

    /// How long the bootstrap fast timer may run after boot.
    const BOOTSTRAP_WINDOW_MILLIS: u64;

    /// Grace period added to the staleness window; also the beacon jitter bound.
    const LOST_TASK_PERIOD_MILLIS: u64;

    /// Transmission window of a max-aggregate packet per tree level.
    const MAX_STEP_MILLIS: u64;

    /// Transmission window of an average-aggregate packet per tree level.
    const AVG_STEP_MILLIS: u64;

    /// Guard between the root's flush and the epoch boundary.
    const OFFSET_FIX_MILLIS: u64;

    /// Maximum tracked neighbors.
    const MAX_NEIGHBORS: usize;

    /// Whether the root folds its own sensor reading into the epoch.
    const ROOT_SAMPLES: bool;

    fn epoch_period() -> Duration {
        Duration::from_millis(Self::EPOCH_PERIOD_MILLIS)
    }

    fn beacon_period() -> Duration {
        Duration::from_millis(Self::EPOCH_PERIOD_MILLIS / Self::BEACONS_PER_EPOCH.max(1))
    }

    fn fast_period() -> Duration {
        Duration::from_millis(Self::TIMER_FAST_PERIOD_MILLIS)
    }

    fn bootstrap_window() -> Duration {
        Duration::from_millis(Self::BOOTSTRAP_WINDOW_MILLIS)
    }

    fn beacon_jitter() -> Duration {
        Duration::from_millis(Self::LOST_TASK_PERIOD_MILLIS)
    }

    /// Silence from the parent after which it is presumed lost.
    fn staleness_window() -> Duration {
        Duration::from_millis(Self::SEND_CHECK_MILLIS + Self::LOST_TASK_PERIOD_MILLIS)
    }

    /// Time after a parent loss during which no new parent is accepted.
    fn hold_down() -> Duration {
        Self::beacon_period()
    }

    /// Time after a parent loss during which candidates at or below the lost
    /// depth are refused. Every former child has timed us out by then.
    fn loss_guard() -> Duration {
        Self::staleness_window() + Self::beacon_period()
    }

    /// Per-level transmission slot inside an epoch.
    fn depth_slot() -> Duration {
        Duration::from_millis(Self::MAX_STEP_MILLIS + Self::AVG_STEP_MILLIS)
    }

    /// Offset inside an epoch at which a node of the given depth flushes.
    ///
    /// Deeper nodes flush earlier so that parents merge them in the same epoch.
    fn flush_offset(depth: u8) -> Duration {
        let depth = depth.min(MAX_DEPTH) as u64;
        Self::epoch_period()
            .saturating_sub(Duration::from_millis(Self::OFFSET_FIX_MILLIS))
            .saturating_sub(Self::depth_slot() * depth)
    }
}

/// Deployed timing profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl ProtocolConfig for DefaultConfig {
    const EPOCH_PERIOD_MILLIS: u64 = 40 * 1000;
    const BEACONS_PER_EPOCH: u64 = 4;
    const SEND_CHECK_MILLIS: u64 = 70_000;
    const TIMER_FAST_PERIOD_MILLIS: u64 = 20;
    const BOOTSTRAP_WINDOW_MILLIS: u64 = 1_000;
    const LOST_TASK_PERIOD_MILLIS: u64 = 100;
    const MAX_STEP_MILLIS: u64 = 130;
    const AVG_STEP_MILLIS: u64 = 180;
    const OFFSET_FIX_MILLIS: u64 = 700;
    const MAX_NEIGHBORS: usize = 32;
    const ROOT_SAMPLES: bool = false;
}

/// Compressed profile (10x faster) for simulations and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastConfig;

impl ProtocolConfig for FastConfig {
    const EPOCH_PERIOD_MILLIS: u64 = 4_000;
    const BEACONS_PER_EPOCH: u64 = 4;
    const SEND_CHECK_MILLIS: u64 = 7_000;
    const TIMER_FAST_PERIOD_MILLIS: u64 = 20;
    const BOOTSTRAP_WINDOW_MILLIS: u64 = 200;
    const LOST_TASK_PERIOD_MILLIS: u64 = 10;
    const MAX_STEP_MILLIS: u64 = 13;
    const AVG_STEP_MILLIS: u64 = 18;
    const OFFSET_FIX_MILLIS: u64 = 70;
    const MAX_NEIGHBORS: usize = 16;
    const ROOT_SAMPLES: bool = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        assert_eq!(DefaultConfig::EPOCH_PERIOD_MILLIS, 40_000);
        assert_eq!(DefaultConfig::SEND_CHECK_MILLIS, 70_000);
        assert_eq!(DefaultConfig::TIMER_FAST_PERIOD_MILLIS, 20);
        assert_eq!(DefaultConfig::LOST_TASK_PERIOD_MILLIS, 100);
        assert_eq!(DefaultConfig::MAX_STEP_MILLIS, 130);
        assert_eq!(DefaultConfig::AVG_STEP_MILLIS, 180);
        assert_eq!(DefaultConfig::OFFSET_FIX_MILLIS, 700);
    }

    #[test]
    fn test_derived_timing() {
        assert_eq!(DefaultConfig::beacon_period().as_millis(), 10_000);
        assert_eq!(DefaultConfig::staleness_window().as_millis(), 70_100);
        assert_eq!(DefaultConfig::depth_slot().as_millis(), 310);
        assert!(DefaultConfig::staleness_window() > DefaultConfig::beacon_period() * 6);
        assert_eq!(DefaultConfig::loss_guard().as_millis(), 80_100);
        assert_eq!(DefaultConfig::hold_down(), DefaultConfig::beacon_period());
    }

    #[test]
    fn test_flush_offset_deeper_is_earlier() {
        assert_eq!(DefaultConfig::flush_offset(0).as_millis(), 39_300);
        assert_eq!(DefaultConfig::flush_offset(1).as_millis(), 38_990);
        for d in 0..20u8 {
            assert!(DefaultConfig::flush_offset(d + 1) < DefaultConfig::flush_offset(d));
        }
    }

    #[test]
    fn test_flush_offset_saturates() {
        // 39_300 / 310 = 126.7, so depth 127 and beyond flush at the epoch start
        assert_eq!(DefaultConfig::flush_offset(127), Duration::ZERO);
        assert_eq!(DefaultConfig::flush_offset(MAX_DEPTH), Duration::ZERO);
        assert_eq!(DefaultConfig::flush_offset(u8::MAX), Duration::ZERO);
    }

    #[test]
    fn test_fast_config_keeps_ratios() {
        assert_eq!(
            DefaultConfig::EPOCH_PERIOD_MILLIS / FastConfig::EPOCH_PERIOD_MILLIS,
            10
        );
        assert_eq!(
            DefaultConfig::staleness_window().as_millis() / 10,
            FastConfig::staleness_window().as_millis()
        );
        assert_eq!(FastConfig::flush_offset(0).as_millis(), 3_930);
    }
}
