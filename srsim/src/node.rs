//! SimNode wrapper for simulated srtree nodes.

use std::cell::Cell;
use std::future::{ready, Ready};
use std::rc::Rc;

use embassy_sync::channel::Channel;
use srtree::config::{DefaultConfig, ProtocolConfig};
use srtree::traits::{Clock, Random, Sensor, Transport, TransportInChannel, TransportOutChannel};
use srtree::{Event, Frame, Incoming, Node, NodeId, Role, Timestamp, TreeState};

/// Simulated radio.
///
/// Frames the node queues are drained by the simulator after every handler
/// call. An optional RSSI floor rejects weak beacons, like a real radio's
/// sensitivity limit.
pub struct SimTransport {
    outgoing: TransportOutChannel,
    incoming: TransportInChannel,
    rssi_floor: Option<i16>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            outgoing: Channel::new(),
            incoming: Channel::new(),
            rssi_floor: None,
        }
    }

    pub fn with_rssi_floor(mut self, floor: i16) -> Self {
        self.rssi_floor = Some(floor);
        self
    }

    /// Take all outgoing frames in FIFO order.
    pub fn take_sent(&self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outgoing.try_receive() {
            frames.push(frame);
        }
        frames
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    fn outgoing(&self) -> &TransportOutChannel {
        &self.outgoing
    }

    fn incoming(&self) -> &TransportInChannel {
        &self.incoming
    }

    fn is_acceptable_rssi(&self, rssi: Option<i16>) -> bool {
        match (self.rssi_floor, rssi) {
            (Some(floor), Some(rssi)) => rssi >= floor,
            _ => true,
        }
    }
}

/// Simulated clock.
///
/// Clones share the same time source, so the simulator keeps a handle and
/// moves time forward while the node owns its copy.
#[derive(Clone)]
pub struct SimClock {
    current: Rc<Cell<Timestamp>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::at(Timestamp::ZERO)
    }

    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Rc::new(Cell::new(time)),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
        ready(())
    }
}

/// Deterministic LCG.
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let range = max.saturating_sub(min);
        if range == 0 {
            return min;
        }
        min + (self.state % range)
    }
}

/// Sensor with a reading the scenario can change at any time.
#[derive(Debug, Default)]
pub struct SimSensor {
    value: u8,
    reads: u32,
}

impl SimSensor {
    pub fn new(value: u8) -> Self {
        Self { value, reads: 0 }
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn set(&mut self, value: u8) {
        self.value = value;
    }

    pub fn reads(&self) -> u32 {
        self.reads
    }
}

impl Sensor for SimSensor {
    fn read(&mut self) -> u8 {
        self.reads += 1;
        self.value
    }
}

/// Type alias for simulated nodes.
pub type SimNodeInner<C = DefaultConfig> = Node<SimTransport, SimRandom, SimClock, SimSensor, C>;

/// How a node is set up before it boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSpec {
    pub id: NodeId,
    pub role: Role,
    pub reading: u8,
    pub boot_at: Timestamp,
    pub rssi_floor: Option<i16>,
}

impl NodeSpec {
    pub fn new(id: NodeId, role: Role, reading: u8) -> Self {
        Self {
            id,
            role,
            reading,
            boot_at: Timestamp::ZERO,
            rssi_floor: None,
        }
    }

    pub fn boot_at(mut self, at: Timestamp) -> Self {
        self.boot_at = at;
        self
    }

    pub fn rssi_floor(mut self, floor: Option<i16>) -> Self {
        self.rssi_floor = floor;
        self
    }
}

/// Wrapper around an srtree Node for simulation.
pub struct SimNode<C = DefaultConfig> {
    inner: SimNodeInner<C>,
    clock: SimClock,
    /// When the node's radio comes up.
    pub boot_at: Timestamp,
    booted: bool,
}

impl<C: ProtocolConfig> SimNode<C> {
    /// Create a node whose timers start at `spec.boot_at`. It stays off the
    /// air until [`SimNode::boot`] is called.
    pub fn new(spec: NodeSpec, seed: u64) -> Self {
        let clock = SimClock::at(spec.boot_at);
        let mut transport = SimTransport::new();
        if let Some(floor) = spec.rssi_floor {
            transport = transport.with_rssi_floor(floor);
        }
        let random = SimRandom::with_seed(seed ^ (spec.id as u64).wrapping_mul(0x9E37_79B9));

        let inner = Node::new(
            spec.id,
            spec.role,
            transport,
            random,
            clock.clone(),
            SimSensor::new(spec.reading),
        );

        Self {
            inner,
            clock,
            boot_at: spec.boot_at,
            booted: false,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id()
    }

    pub fn inner(&self) -> &SimNodeInner<C> {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut SimNodeInner<C> {
        &mut self.inner
    }

    pub fn is_booted(&self) -> bool {
        self.booted
    }

    pub fn boot(&mut self) {
        self.booted = true;
    }

    pub fn is_root(&self) -> bool {
        self.inner.is_root()
    }

    pub fn depth(&self) -> u8 {
        self.inner.depth()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.inner.parent()
    }

    pub fn tree_state(&self) -> TreeState {
        self.inner.tree_state()
    }

    pub fn next_wakeup(&self) -> Timestamp {
        self.inner.next_wakeup()
    }

    /// Change the value the sensor reports from now on.
    pub fn set_reading(&mut self, value: u8) {
        self.inner.sensor_mut().set(value);
    }

    /// Handle a frame heard on the air.
    pub fn handle_frame(&mut self, incoming: Incoming, now: Timestamp) {
        self.clock.set(now);
        self.inner.handle_frame(incoming, now);
    }

    /// Handle a timer wakeup.
    pub fn handle_timer(&mut self, now: Timestamp) {
        self.clock.set(now);
        self.inner.handle_timer(now);
    }

    /// Take all frames the node queued for the radio.
    pub fn take_outgoing(&self) -> Vec<Frame> {
        self.inner.transport().take_sent()
    }

    /// Drain the node's event channel.
    pub fn take_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.inner.events().try_receive() {
            events.push(event);
        }
        events
    }
}
