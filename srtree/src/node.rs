//! Node implementation - the main protocol state machine.
//!
//! The Node struct holds all per-device state and provides an async `run()`
//! method that drives the protocol. It is fully event-driven:
//! - Incoming transport frames trigger tree and aggregation handling
//! - The scheduler's single deadline triggers staleness checks, beacons and
//!   the epoch flush
//!
//! State is mutated only through [`Node::handle_frame`] and
//! [`Node::handle_timer`]; `run()` is a thin loop around the two.
//!
//! # Usage
//!
//! ```ignore
//! let mut node = Node::<_, _, _, _, DefaultConfig>::new(
//!     7, Role::Sensor, transport, random, clock, sensor,
//! );
//!
//! // Spawn the node's run loop
//! spawn(async move {
//!     node.run().await;
//! });
//!
//! // At the root, consume epoch reports
//! if let Event::EpochAggregate(report) = node.events().receive().await {
//!     // report.max_seen, report.average()
//! }
//! ```

use core::marker::PhantomData;

use embassy_sync::channel::{Channel, TrySendError};
use hashbrown::HashMap;
use log::{info, warn};

use crate::aggregate::EpochAccumulator;
use crate::config::{DefaultConfig, ProtocolConfig};
use crate::scheduler::EpochScheduler;
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, EventChannel, Random, Sensor, Transport};
use crate::types::{
    Destination, Event, Frame, Incoming, NodeId, NodeMetrics, Role, SendError, TreeState,
    MAX_DEPTH, ROOT_DEPTH,
};
use crate::wire::Message;

/// What we last heard from a neighbor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborInfo {
    /// Depth the neighbor advertised.
    pub depth: u8,
    /// Last time we received a beacon from it.
    pub last_seen: Timestamp,
    /// Last observed signal strength in dBm (if available).
    pub rssi: Option<i16>,
}

pub type NeighborMap = HashMap<NodeId, NeighborInfo>;

/// The main protocol node.
///
/// Generic over:
/// - `T`: Transport implementation
/// - `R`: Random number generator
/// - `Clk`: Clock/timer implementation
/// - `S`: Local sensor
/// - `C`: Timing profile
pub struct Node<T, R, Clk, S, C = DefaultConfig> {
    // Dependencies (injected)
    transport: T,
    random: R,
    clock: Clk,
    sensor: S,

    events: EventChannel,

    // Identity
    node_id: NodeId,
    role: Role,

    // Tree position
    depth: u8,
    parent: Option<NodeId>,
    last_parent_beacon: Option<Timestamp>,
    hold_down_until: Option<Timestamp>,
    /// Depth held when the last parent was lost, and until when candidates
    /// at or below it are refused.
    loss_guard: Option<(u8, Timestamp)>,
    neighbors: NeighborMap,

    scheduler: EpochScheduler<C>,
    accumulator: EpochAccumulator,

    metrics: NodeMetrics,

    _config: PhantomData<C>,
}

impl<T, R, Clk, S, C> Node<T, R, Clk, S, C>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    S: Sensor,
    C: ProtocolConfig,
{
    /// Create and boot a node. Timers start from `clock.now()`.
    pub fn new(
        node_id: NodeId,
        role: Role,
        transport: T,
        mut random: R,
        clock: Clk,
        sensor: S,
    ) -> Self {
        let now = clock.now();
        let jitter = Self::draw_jitter(&mut random);
        let depth = match role {
            Role::Root => ROOT_DEPTH,
            Role::Sensor => MAX_DEPTH,
        };

        info!(
            "[{}] boot as {:?} at t={}",
            node_id,
            role,
            now.as_millis()
        );

        Self {
            transport,
            random,
            clock,
            sensor,

            events: Channel::new(),

            node_id,
            role,

            depth,
            parent: None,
            last_parent_beacon: None,
            hold_down_until: None,
            loss_guard: None,
            neighbors: HashMap::new(),

            scheduler: EpochScheduler::new(now, jitter),
            accumulator: EpochAccumulator::new(),

            metrics: NodeMetrics::new(),

            _config: PhantomData,
        }
    }

    /// Shorthand for a root node.
    pub fn new_root(node_id: NodeId, transport: T, random: R, clock: Clk, sensor: S) -> Self {
        Self::new(node_id, Role::Root, transport, random, clock, sensor)
    }

    fn draw_jitter(random: &mut R) -> Duration {
        let bound = C::beacon_jitter().as_millis().max(1);
        Duration::from_millis(random.gen_range(0, bound))
    }

    // --- Public accessors ---

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_root(&self) -> bool {
        self.role == Role::Root
    }

    /// Hop count to the root; `MAX_DEPTH` when disconnected.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn tree_state(&self) -> TreeState {
        match (self.role, self.parent) {
            (Role::Root, _) => TreeState::IsRoot,
            (Role::Sensor, Some(_)) => TreeState::HasParent,
            (Role::Sensor, None) => TreeState::Disconnected,
        }
    }

    pub fn last_parent_beacon(&self) -> Option<Timestamp> {
        self.last_parent_beacon
    }

    pub fn hold_down_until(&self) -> Option<Timestamp> {
        self.hold_down_until
    }

    pub fn loss_guard(&self) -> Option<(u8, Timestamp)> {
        self.loss_guard
    }

    pub fn neighbors(&self) -> &NeighborMap {
        &self.neighbors
    }

    /// Protocol events (epoch reports at the root, parent changes).
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    pub fn accumulator(&self) -> &EpochAccumulator {
        &self.accumulator
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn last_flushed_epoch(&self) -> Option<u64> {
        self.scheduler.last_flushed_epoch()
    }

    /// Earliest instant at which `handle_timer` has work to do.
    pub fn next_wakeup(&self) -> Timestamp {
        let mut next = self.scheduler.next_deadline(self.flush_depth());
        if let Some(t) = self.parent_deadline() {
            next = next.min(t);
        }
        if let Some(t) = self.hold_down_until {
            next = next.min(t);
        }
        next
    }

    /// Depth whose flush slot this node uses. A disconnected node takes the
    /// latest slot so that joining mid-epoch still contributes.
    fn flush_depth(&self) -> u8 {
        if self.tree_state() == TreeState::Disconnected {
            ROOT_DEPTH
        } else {
            self.depth
        }
    }

    /// Run the node's main loop.
    ///
    /// Waits on either an incoming frame or the next scheduler deadline and
    /// dispatches to `handle_frame` / `handle_timer`. Runs forever.
    pub async fn run(&mut self) -> ! {
        use embassy_futures::select::{select, Either};

        loop {
            let wake = self.next_wakeup();

            let result = select(
                self.transport.incoming().receive(),
                self.clock.sleep_until(wake),
            )
            .await;

            match result {
                Either::First(incoming) => {
                    let now = self.clock.now();
                    self.handle_frame(incoming, now);
                }
                Either::Second(()) => {
                    let now = self.clock.now();
                    self.handle_timer(now);
                }
            }
        }
    }

    /// Handle one received frame.
    pub fn handle_frame(&mut self, incoming: Incoming, now: Timestamp) {
        let Incoming { frame, rssi } = incoming;

        if frame.source == self.node_id || !frame.dest.accepts(self.node_id) {
            return;
        }
        self.metrics.frames_received += 1;

        let msg = match Message::decode(frame.am_type, &frame.payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    "[{}] dropping frame from {}: {}",
                    self.node_id, frame.source, e
                );
                self.metrics.malformed_dropped += 1;
                return;
            }
        };

        match msg {
            Message::Routing(m) => self.handle_routing(frame.source, m, rssi, now),
            Message::Max(m) => self.handle_max(frame.source, m),
            Message::Avg(m) => self.handle_avg(frame.source, m),
        }
    }

    /// Handle a timer wakeup. Order within one tick: staleness, hold-down
    /// expiry, beacon, flush.
    pub fn handle_timer(&mut self, now: Timestamp) {
        if !self.is_root() {
            self.handle_staleness(now);
            self.handle_hold_down(now);
        }

        let fast = self.scheduler.fast_due(now);
        if fast {
            self.scheduler.fast_fired(now);
        }
        if fast || self.scheduler.beacon_due(now) {
            self.send_beacon(now);
            let jitter = Self::draw_jitter(&mut self.random);
            self.scheduler.beacon_fired(now, jitter);
        }

        if let Some(epoch) = self.scheduler.flush_due(now, self.flush_depth()) {
            self.flush_epoch(epoch, now);
        }
    }

    // --- Internal accessors for other modules ---

    /// Publish a protocol event. A full channel drops it, counted.
    pub(crate) fn push_event(&mut self, event: Event) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            warn!("[{}] event channel full, dropping {:?}", self.node_id, event);
            self.metrics.events_dropped += 1;
        }
    }

    pub(crate) fn frame_for(&self, msg: &Message, dest: Destination) -> Frame {
        Frame::new(msg.am_type(), self.node_id, dest, msg.encode_to_vec())
    }

    /// Queue a frame for the radio.
    pub(crate) fn enqueue(&self, frame: Frame) -> Result<(), SendError> {
        self.transport
            .outgoing()
            .try_send(frame)
            .map_err(|_| SendError::QueueFull)
    }

    pub(crate) fn set_depth(&mut self, depth: u8) {
        self.depth = depth;
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    pub(crate) fn set_last_parent_beacon(&mut self, at: Option<Timestamp>) {
        self.last_parent_beacon = at;
    }

    pub(crate) fn set_hold_down_until(&mut self, until: Option<Timestamp>) {
        self.hold_down_until = until;
    }

    pub(crate) fn set_loss_guard(&mut self, guard: Option<(u8, Timestamp)>) {
        self.loss_guard = guard;
    }

    pub(crate) fn neighbors_mut(&mut self) -> &mut NeighborMap {
        &mut self.neighbors
    }

    pub(crate) fn scheduler_mut(&mut self) -> &mut EpochScheduler<C> {
        &mut self.scheduler
    }

    pub(crate) fn accumulator_mut(&mut self) -> &mut EpochAccumulator {
        &mut self.accumulator
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut NodeMetrics {
        &mut self.metrics
    }

    // --- Bounded insertion helpers ---

    /// Evict the entry heard from least recently. Returns true if one was evicted.
    fn evict_oldest(map: &mut NeighborMap) -> bool {
        if let Some(oldest) = map
            .iter()
            .min_by_key(|(_, n)| n.last_seen)
            .map(|(k, _)| *k)
        {
            map.remove(&oldest);
            true
        } else {
            false
        }
    }

    pub(crate) fn insert_neighbor(&mut self, node_id: NodeId, info: NeighborInfo) {
        if self.neighbors.len() >= C::MAX_NEIGHBORS && !self.neighbors.contains_key(&node_id) {
            // Never evict the current parent.
            let parent = self.parent;
            let parent_entry = parent.and_then(|p| self.neighbors.remove(&p));
            Self::evict_oldest(&mut self.neighbors);
            if let (Some(p), Some(entry)) = (parent, parent_entry) {
                self.neighbors.insert(p, entry);
            }
        }
        self.neighbors.insert(node_id, info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FastConfig;
    use crate::traits::test_impls::{MockClock, MockRandom, MockSensor, MockTransport};
    use crate::types::{RoutingMsg, AM_ROUTINGMSG};
    use crate::wire::Encode;

    type TestNode = Node<MockTransport, MockRandom, MockClock, MockSensor, FastConfig>;

    fn sensor_node(id: NodeId) -> TestNode {
        Node::new(
            id,
            Role::Sensor,
            MockTransport::new(),
            MockRandom::new(),
            MockClock::new(),
            MockSensor::new(1),
        )
    }

    fn beacon_from(src: NodeId, depth: u8) -> Incoming {
        Incoming::new(
            Frame::new(
                AM_ROUTINGMSG,
                src,
                Destination::Broadcast,
                RoutingMsg::beacon(depth).encode_to_vec(),
            ),
            None,
        )
    }

    #[test]
    fn test_initial_state() {
        let node = sensor_node(3);
        assert_eq!(node.depth(), MAX_DEPTH);
        assert_eq!(node.parent(), None);
        assert_eq!(node.tree_state(), TreeState::Disconnected);
        assert_eq!(node.next_wakeup(), Timestamp::ZERO);

        let root: TestNode = Node::new_root(
            0,
            MockTransport::new(),
            MockRandom::new(),
            MockClock::new(),
            MockSensor::new(0),
        );
        assert_eq!(root.depth(), 0);
        assert_eq!(root.tree_state(), TreeState::IsRoot);
    }

    #[test]
    fn test_own_and_foreign_frames_ignored() {
        let mut node = sensor_node(3);
        node.handle_frame(beacon_from(3, 0), Timestamp::ZERO);
        assert_eq!(node.parent(), None);
        assert_eq!(node.metrics().frames_received, 0);

        let foreign = Incoming::new(
            Frame::new(
                AM_ROUTINGMSG,
                1,
                Destination::Unicast(9),
                RoutingMsg::beacon(0).encode_to_vec(),
            ),
            None,
        );
        node.handle_frame(foreign, Timestamp::ZERO);
        assert_eq!(node.parent(), None);
        assert_eq!(node.metrics().frames_received, 0);
    }

    #[test]
    fn test_malformed_frame_counted() {
        let mut node = sensor_node(3);
        let bad = Incoming::new(
            Frame::new(AM_ROUTINGMSG, 1, Destination::Broadcast, alloc::vec![0]),
            None,
        );
        node.handle_frame(bad, Timestamp::ZERO);
        let out_of_range = Incoming::new(
            Frame::new(
                AM_ROUTINGMSG,
                1,
                Destination::Broadcast,
                alloc::vec![MAX_DEPTH + 5, 0],
            ),
            None,
        );
        node.handle_frame(out_of_range, Timestamp::ZERO);
        assert_eq!(node.metrics().frames_received, 2);
        assert_eq!(node.metrics().malformed_dropped, 2);
        assert_eq!(node.tree_state(), TreeState::Disconnected);
    }

    #[test]
    fn test_neighbor_table_bounded() {
        let mut node = sensor_node(1000);
        node.handle_frame(beacon_from(1, 0), Timestamp::ZERO);
        for id in 2..(2 + FastConfig::MAX_NEIGHBORS as NodeId + 5) {
            node.handle_frame(beacon_from(id, 3), Timestamp::from_millis(id as u64));
        }
        assert_eq!(node.neighbors().len(), FastConfig::MAX_NEIGHBORS);
        // Parent survives eviction even though it is the oldest entry
        assert!(node.neighbors().contains_key(&1));
        assert_eq!(node.parent(), Some(1));
    }

    #[test]
    fn test_beacon_jitter_bounded() {
        for seed in 0..50 {
            let jitter = TestNode::draw_jitter(&mut MockRandom::with_seed(seed));
            assert!(jitter < FastConfig::beacon_jitter());
        }
    }

    #[test]
    fn test_full_event_channel_counts_drops() {
        let mut root: TestNode = Node::new_root(
            0,
            MockTransport::new(),
            MockRandom::new(),
            MockClock::new(),
            MockSensor::new(0),
        );
        let epochs = crate::traits::EVENT_QUEUE_SIZE as u64 + 4;
        for k in 0..epochs {
            root.handle_timer(Timestamp::from_millis(3_930 + k * 4_000));
        }
        assert_eq!(root.last_flushed_epoch(), Some(epochs - 1));
        assert_eq!(root.metrics().events_dropped, 4);

        // The oldest reports are the ones kept.
        match root.events().try_receive() {
            Ok(Event::EpochAggregate(r)) => assert_eq!(r.epoch, 0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_timer_sends_bootstrap_beacons() {
        let mut node = sensor_node(3);
        node.handle_timer(Timestamp::ZERO);
        let sent = node.transport().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dest, Destination::Broadcast);
        assert_eq!(sent[0].payload, alloc::vec![MAX_DEPTH, 0]);
        assert_eq!(node.next_wakeup(), Timestamp::from_millis(20));
    }
}
