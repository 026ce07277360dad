//! Core types and constants for the srtree protocol.

use alloc::vec::Vec;
use core::fmt;

use crate::time::Timestamp;

// Queue bounds (size the transport channel types)
pub const SENDER_QUEUE_SIZE: usize = 100;
pub const RECEIVER_QUEUE_SIZE: usize = 100;

// Transport-level type identifiers
pub const AM_SIMPLEROUTINGTREEMSG: u8 = 22;
pub const AM_ROUTINGMSG: u8 = 22;
pub const AM_MAXMSG: u8 = 24;
pub const AM_AVGMSG: u8 = 25;

/// Depth value meaning "unknown / disconnected".
pub const MAX_DEPTH: u8 = 200;

/// Depth of the root.
pub const ROOT_DEPTH: u8 = 0;

// Fixed payload widths
pub const ROUTING_MSG_SIZE: usize = 2;
pub const MAX_MSG_SIZE: usize = 1;
pub const AVG_MSG_SIZE: usize = 3;

/// 16-bit link-layer node address.
pub type NodeId = u16;

/// Raw frame payload.
pub type Payload = Vec<u8>;

/// Tree-control opcode.
///
/// Closed set: any other value on the wire is a format error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Periodic depth advertisement.
    Beacon = 0,
    /// Sender just lost its parent; its depth is `MAX_DEPTH`.
    ParentLost = 1,
}

impl Command {
    /// Opcode byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse an opcode byte.
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Command::Beacon),
            1 => Some(Command::ParentLost),
            _ => None,
        }
    }
}

/// Tree-control packet (beacon).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingMsg {
    /// Sender's depth at broadcast time.
    pub depth: u8,
    /// Control intent.
    pub cmd: Command,
}

impl RoutingMsg {
    pub const fn beacon(depth: u8) -> Self {
        Self {
            depth,
            cmd: Command::Beacon,
        }
    }

    pub const fn parent_lost() -> Self {
        Self {
            depth: MAX_DEPTH,
            cmd: Command::ParentLost,
        }
    }

    /// Whether the sender advertises a usable path to the root.
    pub fn is_connected(&self) -> bool {
        self.cmd == Command::Beacon && self.depth < MAX_DEPTH
    }
}

/// Max-aggregate packet: largest reading seen in the sender's subtree this epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataMaxMsg {
    pub data: u8,
}

/// Average-aggregate packet: partial sum and sample count of the sender's subtree.
///
/// The division happens only at the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataAvgMsg {
    pub sum: u16,
    pub count: u8,
}

/// Link-layer destination of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Broadcast,
    Unicast(NodeId),
}

impl Destination {
    /// Whether a node with the given address should accept this frame.
    pub fn accepts(&self, node: NodeId) -> bool {
        match *self {
            Destination::Broadcast => true,
            Destination::Unicast(to) => to == node,
        }
    }
}

/// Transport envelope. The type tag and addresses live here, not in the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Active-message type (`AM_*`).
    pub am_type: u8,
    /// Sending node.
    pub source: NodeId,
    /// Broadcast or single next hop.
    pub dest: Destination,
    /// Encoded packet.
    pub payload: Payload,
}

impl Frame {
    pub fn new(am_type: u8, source: NodeId, dest: Destination, payload: Payload) -> Self {
        Self {
            am_type,
            source,
            dest,
            payload,
        }
    }
}

/// Frame received from the radio, with optional signal strength.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub frame: Frame,
    pub rssi: Option<i16>,
}

impl Incoming {
    pub fn new(frame: Frame, rssi: Option<i16>) -> Self {
        Self { frame, rssi }
    }
}

/// Role configured out-of-band at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The single sink of the tree. Never elected, never leaves the root state.
    Root,
    /// Ordinary sensing node.
    Sensor,
}

/// Observable tree state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    Disconnected,
    HasParent,
    IsRoot,
}

/// Fully merged aggregate for one epoch, surfaced by the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochReport {
    /// Epoch index (`now / EPOCH_PERIOD`).
    pub epoch: u64,
    /// Largest reading in the tree.
    pub max_seen: u8,
    /// Exact sum of all readings.
    pub sum: u32,
    /// Number of readings.
    pub count: u32,
}

impl EpochReport {
    /// Integer average, `None` when nothing was collected.
    pub fn average(&self) -> Option<u32> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count)
        }
    }
}

/// Events emitted by the node for application handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Root only: merged aggregate for a finished epoch.
    EpochAggregate(EpochReport),
    /// Parent adopted or switched.
    ParentChanged {
        parent: NodeId,
        depth: u8,
        at: Timestamp,
    },
    /// Parent presumed lost; node is disconnected.
    ParentLost { former: NodeId, at: Timestamp },
}

/// Error returned when a frame cannot be queued for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// Outgoing queue is full (radio busy).
    QueueFull,
    /// Node is disconnected and has nowhere to send upward traffic.
    NoParent,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::QueueFull => write!(f, "outgoing queue full"),
            SendError::NoParent => write!(f, "no parent to send to"),
        }
    }
}

/// Per-node counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeMetrics {
    pub beacons_sent: u32,
    pub beacons_dropped: u32,
    pub aggregates_sent: u32,
    pub aggregates_dropped: u32,
    pub frames_received: u32,
    /// Frames that failed to decode or carried an out-of-range depth.
    pub malformed_dropped: u32,
    /// Epochs discarded because the node had no parent at flush time.
    pub epochs_dropped: u32,
    pub parent_changes: u32,
    pub parent_losses: u32,
    /// Events lost to a full event channel, epoch reports included.
    pub events_dropped: u32,
}

impl NodeMetrics {
    pub const fn new() -> Self {
        Self {
            beacons_sent: 0,
            beacons_dropped: 0,
            aggregates_sent: 0,
            aggregates_dropped: 0,
            frames_received: 0,
            malformed_dropped: 0,
            epochs_dropped: 0,
            parent_changes: 0,
            parent_losses: 0,
            events_dropped: 0,
        }
    }
}
