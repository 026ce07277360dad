//! Discrete event simulator for srtree networks.

use std::collections::BinaryHeap;

use hashbrown::HashMap;
use log::{debug, trace};
use srtree::config::{DefaultConfig, ProtocolConfig};
use srtree::{Destination, Duration, Event as NodeEvent, Frame, Incoming, NodeId, Timestamp};

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{RootReport, SimMetrics, SimulationResult, TreeSnapshot};
use crate::node::{NodeSpec, SimNode};
use crate::topology::Topology;

/// Discrete event simulator for srtree networks.
pub struct Simulator<C = DefaultConfig> {
    /// All nodes in the simulation.
    nodes: HashMap<NodeId, SimNode<C>>,
    /// Network topology.
    topology: Topology,
    /// Current simulation time.
    current_time: Timestamp,
    /// Priority queue of scheduled events.
    event_queue: BinaryHeap<ScheduledEvent>,
    /// Collected metrics.
    metrics: SimMetrics,
    /// Next sequence number for event ordering.
    next_seq: u64,
    /// RNG state for packet loss.
    rng_state: u64,
    /// Seed mixed into every node's RNG.
    seed: u64,
    /// The one live timer per node; older `TimerFire` events are stale.
    wakeups: HashMap<NodeId, Timestamp>,
    /// Interval for automatic snapshots.
    snapshot_interval: Option<Duration>,
    /// Next snapshot time.
    next_snapshot: Option<Timestamp>,
}

impl<C: ProtocolConfig> Simulator<C> {
    /// Create a new simulator with given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            rng_state: seed,
            seed,
            wakeups: HashMap::new(),
            snapshot_interval: None,
            next_snapshot: None,
        }
    }

    /// Set the network topology.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the snapshot interval for automatic tree state recording.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Add a node. It powers on at `spec.boot_at`, or now if that has
    /// already passed.
    pub fn add_node(&mut self, mut spec: NodeSpec) -> NodeId {
        spec.boot_at = spec.boot_at.max(self.current_time);
        let node = SimNode::new(spec, self.seed);
        let node_id = node.node_id();
        self.nodes.insert(node_id, node);
        self.schedule(spec.boot_at, Event::Boot { node: node_id });
        node_id
    }

    /// Get a reference to a node.
    pub fn node(&self, id: NodeId) -> Option<&SimNode<C>> {
        self.nodes.get(&id)
    }

    /// Get a mutable reference to a node.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SimNode<C>> {
        self.nodes.get_mut(&id)
    }

    /// Get all node IDs, sorted.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Get the current simulation time.
    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    /// Get the topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Get mutable topology.
    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    /// Get collected metrics.
    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Schedule an event.
    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    /// Schedule a scenario action.
    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Run simulation until specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while self
            .event_queue
            .peek()
            .is_some_and(|event| event.time <= end_time)
        {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.time, event.event);

            self.maybe_take_snapshot();
        }

        // Advance to end_time even if no more events
        self.advance_time(end_time);

        // Final snapshot
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.peek().is_none(),
        }
    }

    /// Run simulation for specified duration.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    /// Advance simulation time.
    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    /// Process a single event.
    fn process_event(&mut self, at: Timestamp, event: Event) {
        match event {
            Event::Boot { node } => self.boot(node),
            Event::FrameDelivery { to, frame, rssi } => self.deliver_frame(to, frame, rssi),
            Event::TimerFire { node } => self.fire_timer(node, at),
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    fn boot(&mut self, node_id: NodeId) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        node.boot();
        debug!("sim: node {} up at t={}", node_id, now.as_millis());
        self.reschedule(node_id, now);
    }

    /// Hand a frame to a node whose radio is on.
    fn deliver_frame(&mut self, to: NodeId, frame: Frame, rssi: Option<i16>) {
        let now = self.current_time;
        match self.nodes.get_mut(&to) {
            Some(node) if node.is_booted() => {
                node.handle_frame(Incoming::new(frame, rssi), now);
                self.metrics.messages_delivered += 1;
            }
            _ => {
                self.metrics.messages_dropped += 1;
                return;
            }
        }
        self.after_handler(to, now);
    }

    /// Fire a node's timer, unless it was rescheduled since this event was
    /// queued.
    fn fire_timer(&mut self, node_id: NodeId, scheduled_for: Timestamp) {
        if self.wakeups.get(&node_id) != Some(&scheduled_for) {
            return;
        }
        self.wakeups.remove(&node_id);

        let now = self.current_time;
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.handle_timer(now);
        }
        // Never fire twice at the same instant.
        self.after_handler(node_id, now + Duration::from_millis(1));
    }

    /// Route what the node sent, record what it reported, and re-arm its
    /// timer no earlier than `earliest`.
    fn after_handler(&mut self, node_id: NodeId, earliest: Timestamp) {
        self.collect_outgoing(node_id);
        self.collect_events(node_id);
        self.reschedule(node_id, earliest);
    }

    fn reschedule(&mut self, node_id: NodeId, earliest: Timestamp) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        let at = node.next_wakeup().max(earliest);
        if self.wakeups.get(&node_id) == Some(&at) {
            return;
        }
        self.wakeups.insert(node_id, at);
        self.schedule(at, Event::TimerFire { node: node_id });
    }

    /// Collect outgoing frames from a node and route them.
    fn collect_outgoing(&mut self, sender: NodeId) {
        let frames = match self.nodes.get(&sender) {
            Some(node) => node.take_outgoing(),
            None => return,
        };

        for frame in frames {
            self.route_frame(sender, frame);
        }
    }

    /// Fold the node's protocol events into the metrics.
    fn collect_events(&mut self, node_id: NodeId) {
        let events = match self.nodes.get(&node_id) {
            Some(node) => node.take_events(),
            None => return,
        };

        for event in events {
            match event {
                NodeEvent::EpochAggregate(report) => {
                    debug!(
                        "sim: root {} epoch {} max={} avg={:?} count={}",
                        node_id,
                        report.epoch,
                        report.max_seen,
                        report.average(),
                        report.count
                    );
                    self.metrics.reports.push(RootReport {
                        root: node_id,
                        at: self.current_time,
                        report,
                    });
                }
                NodeEvent::ParentChanged { .. } => self.metrics.parent_changes += 1,
                NodeEvent::ParentLost { .. } => self.metrics.parent_losses += 1,
            }
        }
    }

    /// Put a frame on the air. Broadcasts reach every active neighbor;
    /// unicasts only their addressee.
    fn route_frame(&mut self, sender: NodeId, frame: Frame) {
        self.metrics.messages_sent += 1;

        let receivers = match frame.dest {
            Destination::Broadcast => self.topology.neighbors(sender),
            Destination::Unicast(to) => vec![to],
        };
        let current_time = self.current_time;

        // Collect link info first to avoid borrow conflicts
        let mut deliveries = Vec::with_capacity(receivers.len());
        let mut dropped_count = 0u64;

        for receiver in receivers {
            let Some(link) = self.topology.get_link(sender, receiver) else {
                dropped_count += 1;
                continue;
            };
            if !link.active {
                dropped_count += 1;
                continue;
            }

            let loss_rate = link.loss_rate;
            let delay = link.delay;
            let rssi = link.rssi;

            if loss_rate > 0.0 && self.random_f64() < loss_rate {
                dropped_count += 1;
                continue;
            }

            deliveries.push((receiver, delay, rssi));
        }

        self.metrics.messages_dropped += dropped_count;

        for (receiver, delay, rssi) in deliveries {
            trace!(
                "sim: {} -> {} am={} at t={}",
                sender,
                receiver,
                frame.am_type,
                (current_time + delay).as_millis()
            );
            self.schedule(
                current_time + delay,
                Event::FrameDelivery {
                    to: receiver,
                    frame: frame.clone(),
                    rssi: Some(rssi),
                },
            );
        }
    }

    /// Execute a scenario action.
    fn execute_action(&mut self, action: ScenarioAction) {
        debug!("sim: t={} {:?}", self.current_time.as_millis(), action);
        match action {
            ScenarioAction::Partition { groups } => {
                self.topology.partition(&groups);
            }
            ScenarioAction::HealPartition => {
                self.topology.heal();
            }
            ScenarioAction::Isolate { node } => {
                self.topology.isolate(node);
            }
            ScenarioAction::DisableLink { from, to } => {
                self.topology.set_link_active(from, to, false);
            }
            ScenarioAction::EnableLink { from, to } => {
                self.topology.set_link_active(from, to, true);
            }
            ScenarioAction::SetLossRate { from, to, rate } => {
                self.topology.set_link_loss_rate(from, to, rate);
            }
            ScenarioAction::SetReading { node, value } => {
                if let Some(n) = self.nodes.get_mut(&node) {
                    n.set_reading(value);
                }
            }
            ScenarioAction::TakeSnapshot => {
                self.take_snapshot();
            }
        }
    }

    /// Check if we should take a snapshot and do so.
    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    /// Take a tree state snapshot of every booted node.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = TreeSnapshot::new(self.current_time);

        for (node_id, node) in self.nodes.iter().filter(|(_, n)| n.is_booted()) {
            snapshot.record_node(*node_id, node.tree_state(), node.parent(), node.depth());
        }

        self.metrics.add_snapshot(snapshot);
    }

    /// Generate a random f64 in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.rng_state >> 11) as f64 / (1u64 << 53) as f64
    }
}
