//! Network topology and link properties.

use std::fmt;

use hashbrown::HashMap;
use srtree::{Duration, NodeId};

/// Properties of a network link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Packet loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Propagation delay.
    pub delay: Duration,
    /// Whether the link is currently active.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            rssi: -70,
            loss_rate: 0.0,
            delay: Duration::from_millis(1),
            active: true,
        }
    }
}

impl Link {
    /// Create a new link with default properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the RSSI value.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    /// Set the loss rate.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Error parsing a gain-file topology.
#[derive(Debug, Clone, PartialEq)]
pub enum TopologyError {
    /// Line has fewer than three fields.
    MissingField { line: usize },
    /// A node id is not a valid 16-bit address.
    BadNodeId { line: usize, value: String },
    /// The gain is not a number.
    BadGain { line: usize, value: String },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::MissingField { line } => {
                write!(f, "line {}: expected `src dst gain`", line)
            }
            TopologyError::BadNodeId { line, value } => {
                write!(f, "line {}: invalid node id {:?}", line, value)
            }
            TopologyError::BadGain { line, value } => {
                write!(f, "line {}: invalid gain {:?}", line, value)
            }
        }
    }
}

impl std::error::Error for TopologyError {}

/// Network topology defining connectivity between nodes.
///
/// Links are directional: `(from, to)` carries frames sent by `from` to
/// `to` only. The generated layouts add both directions.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    links: HashMap<(NodeId, NodeId), Link>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fully connected topology for the given nodes.
    pub fn fully_connected(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.add_link(a, b, Link::default());
            }
        }
        topo
    }

    /// Create a chain topology (each node connected only to neighbors).
    pub fn chain(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        for window in nodes.windows(2) {
            topo.add_link(window[0], window[1], Link::default());
        }
        topo
    }

    /// Create a star topology (first node is hub, connected to all others).
    pub fn star(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        let Some((&hub, spokes)) = nodes.split_first() else {
            return topo;
        };
        for &spoke in spokes {
            topo.add_link(hub, spoke, Link::default());
        }
        topo
    }

    /// Create a grid, nodes laid out row by row, `width` per row. Each node
    /// hears its horizontal and vertical neighbors.
    pub fn grid(nodes: &[NodeId], width: usize) -> Self {
        let mut topo = Self::new();
        if width == 0 {
            return topo;
        }
        for (i, &a) in nodes.iter().enumerate() {
            if (i + 1) % width != 0 {
                if let Some(&right) = nodes.get(i + 1) {
                    topo.add_link(a, right, Link::default());
                }
            }
            if let Some(&below) = nodes.get(i + width) {
                topo.add_link(a, below, Link::default());
            }
        }
        topo
    }

    /// Parse a TOSSIM-style gain file: one `src dst gain_dbm` link per line.
    ///
    /// Each line is one direction, heard by `dst` when `src` transmits. Blank
    /// lines and lines starting with `#` are skipped. A direction listed twice
    /// keeps the gain of the last line.
    pub fn parse_gain_file(text: &str) -> Result<Self, TopologyError> {
        let mut topo = Self::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut fields = trimmed.split_whitespace();
            let (Some(src), Some(dst), Some(gain)) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(TopologyError::MissingField { line });
            };

            let parse_id = |s: &str| {
                s.parse::<NodeId>().map_err(|_| TopologyError::BadNodeId {
                    line,
                    value: s.to_string(),
                })
            };
            let src = parse_id(src)?;
            let dst = parse_id(dst)?;
            let gain: f64 = gain.parse().map_err(|_| TopologyError::BadGain {
                line,
                value: gain.to_string(),
            })?;
            if !gain.is_finite() {
                return Err(TopologyError::BadGain {
                    line,
                    value: gain.to_string(),
                });
            }

            let rssi = gain.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            topo.add_directed_link(src, dst, Link::new().with_rssi(rssi));
        }
        Ok(topo)
    }

    /// Add a link in both directions.
    pub fn add_link(&mut self, a: NodeId, b: NodeId, link: Link) {
        self.links.insert((b, a), link.clone());
        self.links.insert((a, b), link);
    }

    /// Add a link carrying frames from `from` to `to` only.
    pub fn add_directed_link(&mut self, from: NodeId, to: NodeId, link: Link) {
        self.links.insert((from, to), link);
    }

    /// The link `to` hears `from` over.
    pub fn get_link(&self, from: NodeId, to: NodeId) -> Option<&Link> {
        self.links.get(&(from, to))
    }

    pub fn get_link_mut(&mut self, from: NodeId, to: NodeId) -> Option<&mut Link> {
        self.links.get_mut(&(from, to))
    }

    /// Whether `to` currently hears `from`.
    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.get_link(from, to).is_some_and(|link| link.active)
    }

    /// Every node that hears `node` over an active link, sorted.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let mut result: Vec<NodeId> = self
            .links
            .iter()
            .filter(|(&(from, _), link)| from == node && link.active)
            .map(|(&(_, to), _)| to)
            .collect();
        result.sort_unstable();
        result
    }

    /// Enable or disable both directions between `a` and `b`.
    pub fn set_link_active(&mut self, a: NodeId, b: NodeId, active: bool) {
        for key in [(a, b), (b, a)] {
            if let Some(link) = self.links.get_mut(&key) {
                link.active = active;
            }
        }
    }

    /// Set the loss rate of both directions between `a` and `b`.
    pub fn set_link_loss_rate(&mut self, a: NodeId, b: NodeId, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for key in [(a, b), (b, a)] {
            if let Some(link) = self.links.get_mut(&key) {
                link.loss_rate = rate;
            }
        }
    }

    /// Every node that appears in a link, sorted.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.links.keys().flat_map(|&(a, b)| [a, b]).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Disable all links crossing between partition groups. Nodes listed in
    /// no group are cut off from everyone.
    pub fn partition(&mut self, groups: &[Vec<NodeId>]) {
        for (&(a, b), link) in self.links.iter_mut() {
            let a_group = groups.iter().position(|g| g.contains(&a));
            let b_group = groups.iter().position(|g| g.contains(&b));

            if a_group.is_none() || a_group != b_group {
                link.active = false;
            }
        }
    }

    /// Disable every link touching `node`.
    pub fn isolate(&mut self, node: NodeId) {
        for (&(a, b), link) in self.links.iter_mut() {
            if a == node || b == node {
                link.active = false;
            }
        }
    }

    /// Re-enable all links (heal partitions).
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    /// Set global loss rate for all links.
    pub fn set_global_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
    }

    /// Set the same propagation delay on all links.
    pub fn set_global_delay(&mut self, delay: Duration) {
        for link in self.links.values_mut() {
            link.delay = delay;
        }
    }
}
