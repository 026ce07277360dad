//! Collaborator traits for transport, time, randomness and sensing.
//!
//! These traits let the protocol run on:
//! - Different radios (TinyOS-style active messages, 802.15.4, simulation)
//! - Real hardware time or simulated time
//! - Any sensor that yields an 8-bit reading

use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::types::{Event, Frame, Incoming, RECEIVER_QUEUE_SIZE, SENDER_QUEUE_SIZE};

/// Queue size for event channel.
pub(crate) const EVENT_QUEUE_SIZE: usize = 16;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// Outgoing frame queue (protocol task -> radio task).
pub type TransportOutChannel = Channel<ChannelMutex, Frame, SENDER_QUEUE_SIZE>;

/// Incoming frame queue (radio ISR / simulator -> protocol task).
pub type TransportInChannel = Channel<ChannelMutex, Incoming, RECEIVER_QUEUE_SIZE>;

/// Protocol event channel.
pub type EventChannel = Channel<ChannelMutex, Event, EVENT_QUEUE_SIZE>;

/// Transport trait for radio backends.
///
/// Provides two bounded channels:
/// - `outgoing()`: frames queued by the node, drained by the radio task
/// - `incoming()`: frames delivered by the radio, drained by the node
///
/// A full outgoing queue is the "radio busy" condition: the node counts the
/// drop and relies on the next periodic packet to supersede it.
///
/// # Usage Contract
///
/// - Radio ISR → `transport.incoming().try_send()`
/// - Protocol task → `transport.outgoing().try_send(frame)`
/// - Transmit task → `transport.outgoing().receive().await`
///
/// ```ignore
/// use srtree::traits::test_impls::MockTransport;
/// use srtree::traits::Transport;
/// use srtree::{Destination, Frame, AM_MAXMSG};
///
/// let transport = MockTransport::new();
/// let frame = Frame::new(AM_MAXMSG, 3, Destination::Unicast(1), vec![42]);
/// assert!(transport.outgoing().try_send(frame.clone()).is_ok());
/// assert_eq!(transport.take_sent(), vec![frame]);
/// ```
pub trait Transport {
    /// Queue for outgoing frames.
    fn outgoing(&self) -> &TransportOutChannel;

    /// Queue for received frames.
    fn incoming(&self) -> &TransportInChannel;

    /// Check if the given RSSI indicates acceptable link quality.
    ///
    /// Default implementation accepts everything.
    fn is_acceptable_rssi(&self, rssi: Option<i16>) -> bool {
        let _ = rssi;
        true
    }
}

/// Time source trait for real or simulated time.
///
/// # Example (testing with MockClock)
///
/// ```ignore
/// use srtree::traits::test_impls::MockClock;
/// use srtree::{Clock, Duration, Timestamp};
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now(), Timestamp::ZERO);
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), Timestamp::from_secs(10));
/// ```
///
/// # Example (embedded with embassy)
///
/// ```text
/// struct EmbassyClock;
///
/// impl Clock for EmbassyClock {
///     type SleepFuture<'a> = embassy_time::Timer;
///
///     fn now(&self) -> Timestamp {
///         Timestamp::from_millis(embassy_time::Instant::now().as_millis())
///     }
///
///     fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
///         embassy_time::Timer::at(embassy_time::Instant::from_millis(time.as_millis()))
///     }
/// }
/// ```
pub trait Clock {
    /// Future type returned by sleep_until.
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    /// Get the current timestamp.
    fn now(&self) -> Timestamp;

    /// Sleep until the given timestamp.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Random number generator trait.
///
/// Used for beacon jitter.
pub trait Random {
    /// Generate a random u64 in the range [min, max).
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}

/// Local sensor.
///
/// Read once per epoch, at flush time.
pub trait Sensor {
    fn read(&mut self) -> u8;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use alloc::vec::Vec;
    use core::cell::Cell;
    use core::future::{ready, Ready};

    use super::*;

    /// Mock transport backed by the real bounded channels.
    pub struct MockTransport {
        outgoing: TransportOutChannel,
        incoming: TransportInChannel,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self {
                outgoing: Channel::new(),
                incoming: Channel::new(),
            }
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Inject a frame as if it was received.
        pub fn inject_rx(&self, frame: Frame, rssi: Option<i16>) {
            let _ = self.incoming.try_send(Incoming::new(frame, rssi));
        }

        /// Take all queued outgoing frames in FIFO order.
        pub fn take_sent(&self) -> Vec<Frame> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.outgoing.try_receive() {
                frames.push(frame);
            }
            frames
        }
    }

    impl Transport for MockTransport {
        fn outgoing(&self) -> &TransportOutChannel {
            &self.outgoing
        }

        fn incoming(&self) -> &TransportInChannel {
            &self.incoming
        }
    }

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(time: Timestamp) -> Self {
            Self {
                current: Cell::new(time),
            }
        }

        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        pub fn advance(&self, duration: crate::time::Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // Tests advance time manually.
            ready(())
        }
    }

    /// Mock random for testing (deterministic LCG).
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let range = max.saturating_sub(min);
            if range == 0 {
                return min;
            }
            min + (self.state % range)
        }
    }

    /// Mock sensor returning a settable constant.
    #[derive(Debug, Default)]
    pub struct MockSensor {
        value: u8,
        reads: u32,
    }

    impl MockSensor {
        pub fn new(value: u8) -> Self {
            Self { value, reads: 0 }
        }

        pub fn set(&mut self, value: u8) {
            self.value = value;
        }

        /// How many times the node sampled this sensor.
        pub fn reads(&self) -> u32 {
            self.reads
        }
    }

    impl Sensor for MockSensor {
        fn read(&mut self) -> u8 {
            self.reads += 1;
            self.value
        }
    }

}
