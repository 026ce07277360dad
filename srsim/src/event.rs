//! Event types and priority queue for discrete event simulation.

use std::cmp::Ordering;

use srtree::{Frame, NodeId, Timestamp};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Partition the network into isolated groups.
    Partition { groups: Vec<Vec<NodeId>> },
    /// Heal all partitions (restore full connectivity).
    HealPartition,
    /// Cut every link of one node.
    Isolate { node: NodeId },
    /// Disable the link between two nodes, both directions.
    DisableLink { from: NodeId, to: NodeId },
    /// Enable the link between two nodes, both directions.
    EnableLink { from: NodeId, to: NodeId },
    /// Set the loss rate between two nodes, both directions.
    SetLossRate { from: NodeId, to: NodeId, rate: f64 },
    /// Change what a node's sensor reports.
    SetReading { node: NodeId, value: u8 },
    /// Take a tree snapshot for metrics.
    TakeSnapshot,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// Power on a node.
    Boot { node: NodeId },
    /// Deliver a frame to a node.
    FrameDelivery {
        to: NodeId,
        frame: Frame,
        rssi: Option<i16>,
    },
    /// Fire a node's timer. Stale if the node rescheduled since.
    TimerFire { node: NodeId },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// When the event should occur.
    pub time: Timestamp,
    /// Sequence number for deterministic ordering of same-time events.
    pub seq: SequenceNumber,
    /// The event to process.
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// Implement ordering for min-heap (BinaryHeap is max-heap, so we reverse).
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earlier time first, then lower sequence number.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn timer(secs: u64, seq: u64) -> ScheduledEvent {
        ScheduledEvent::new(
            Timestamp::from_secs(secs),
            SequenceNumber::new(seq),
            Event::TimerFire { node: 1 },
        )
    }

    #[test]
    fn test_event_ordering() {
        let e1 = timer(10, 1);
        let e2 = timer(5, 2);

        // e2 has earlier time, so it should be "greater" in min-heap terms
        assert!(e2 > e1);
    }

    #[test]
    fn test_same_time_sequence_ordering() {
        let e1 = timer(10, 1);
        let e2 = timer(10, 2);

        // Same time, e1 has lower sequence, so e1 should be processed first
        assert!(e1 > e2);
    }

    #[test]
    fn test_heap_pops_in_time_order() {
        let mut heap = BinaryHeap::new();
        heap.push(timer(3, 0));
        heap.push(timer(1, 1));
        heap.push(timer(2, 2));
        heap.push(timer(1, 3));

        let order: Vec<(u64, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|e| (e.time.as_secs(), e.seq.value()))
            .collect();
        assert_eq!(order, vec![(1, 1), (1, 3), (2, 2), (3, 0)]);
    }
}
