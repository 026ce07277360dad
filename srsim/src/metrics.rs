//! Metrics collection for simulation analysis.

use hashbrown::HashMap;
use srtree::{EpochReport, NodeId, Timestamp, TreeState, ROOT_DEPTH};

/// One node's tree position at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeView {
    pub state: TreeState,
    pub parent: Option<NodeId>,
    pub depth: u8,
}

/// A snapshot of tree state at a point in time.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    /// When this snapshot was taken.
    pub time: Timestamp,
    /// Position of every booted node.
    pub nodes: HashMap<NodeId, NodeView>,
}

impl TreeSnapshot {
    /// Create a new empty snapshot.
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            nodes: HashMap::new(),
        }
    }

    /// Record a node's state.
    pub fn record_node(
        &mut self,
        node_id: NodeId,
        state: TreeState,
        parent: Option<NodeId>,
        depth: u8,
    ) {
        self.nodes.insert(
            node_id,
            NodeView {
                state,
                parent,
                depth,
            },
        );
    }

    pub fn get(&self, node_id: NodeId) -> Option<&NodeView> {
        self.nodes.get(&node_id)
    }

    /// Nodes in the root state, sorted.
    pub fn roots(&self) -> Vec<NodeId> {
        let mut roots: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, v)| v.state == TreeState::IsRoot)
            .map(|(&id, _)| id)
            .collect();
        roots.sort_unstable();
        roots
    }

    /// Nodes without a parent that are not the root, sorted.
    pub fn disconnected(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, v)| v.state == TreeState::Disconnected)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Every node is either the root or has a parent.
    pub fn all_connected(&self) -> bool {
        self.nodes
            .values()
            .all(|v| v.state != TreeState::Disconnected)
    }

    /// No directed cycle among parent relations.
    pub fn loop_free(&self) -> bool {
        let limit = self.nodes.len();
        self.nodes.keys().all(|&start| {
            let mut current = start;
            for _ in 0..=limit {
                match self.nodes.get(&current).and_then(|v| v.parent) {
                    Some(next) => current = next,
                    None => return true,
                }
            }
            false
        })
    }

    /// The root sits at depth 0 and every child is exactly one below its
    /// parent. Parents that were not recorded are skipped.
    pub fn depth_consistent(&self) -> bool {
        self.nodes.values().all(|v| match (v.state, v.parent) {
            (TreeState::IsRoot, _) => v.depth == ROOT_DEPTH,
            (_, Some(parent)) => self
                .nodes
                .get(&parent)
                .map_or(true, |p| p.depth.checked_add(1) == Some(v.depth)),
            (_, None) => true,
        })
    }

    /// Deepest connected node.
    pub fn max_depth(&self) -> u8 {
        self.nodes
            .values()
            .filter(|v| v.state != TreeState::Disconnected)
            .map(|v| v.depth)
            .max()
            .unwrap_or(0)
    }

    /// One root, everyone attached, no loops, depths consistent.
    pub fn is_converged(&self) -> bool {
        self.roots().len() == 1
            && self.all_connected()
            && self.loop_free()
            && self.depth_consistent()
    }
}

/// An epoch report surfaced by a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootReport {
    pub root: NodeId,
    pub at: Timestamp,
    pub report: EpochReport,
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Total frames put on the air.
    pub messages_sent: u64,
    /// Per-receiver copies lost to link loss or a missing link.
    pub messages_dropped: u64,
    /// Per-receiver copies handed to a booted node.
    pub messages_delivered: u64,
    /// Parent adoptions and switches, all nodes.
    pub parent_changes: u64,
    /// Parent losses, all nodes.
    pub parent_losses: u64,
    /// Epoch reports from the root, in order.
    pub reports: Vec<RootReport>,
    /// Tree snapshots taken at intervals.
    pub snapshots: Vec<TreeSnapshot>,
}

impl SimMetrics {
    /// Create new empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a snapshot.
    pub fn add_snapshot(&mut self, snapshot: TreeSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// Check if the network was converged at the first snapshot at or after
    /// `time`.
    pub fn converged_by(&self, time: Timestamp) -> bool {
        self.snapshots
            .iter()
            .find(|s| s.time >= time)
            .is_some_and(|s| s.is_converged())
    }

    /// Find first snapshot time at which the network was converged.
    pub fn convergence_time(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.is_converged())
            .map(|s| s.time)
    }

    /// Get the latest snapshot.
    pub fn latest_snapshot(&self) -> Option<&TreeSnapshot> {
        self.snapshots.last()
    }

    /// Report for `epoch`, if the root produced one.
    pub fn report_for(&self, epoch: u64) -> Option<&EpochReport> {
        self.reports
            .iter()
            .find(|r| r.report.epoch == epoch)
            .map(|r| &r.report)
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Final simulation time.
    pub end_time: Timestamp,
    /// Collected metrics.
    pub metrics: SimMetrics,
    /// Whether simulation ended due to event queue exhaustion (vs time limit).
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Check if the network ended as a single consistent tree.
    pub fn converged(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(|s| s.is_converged())
    }

    /// Maximum depth at end.
    pub fn final_max_depth(&self) -> u8 {
        self.metrics
            .latest_snapshot()
            .map(|s| s.max_depth())
            .unwrap_or(0)
    }

    pub fn reports(&self) -> impl Iterator<Item = &EpochReport> {
        self.metrics.reports.iter().map(|r| &r.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_snapshot(time: Timestamp) -> TreeSnapshot {
        let mut s = TreeSnapshot::new(time);
        s.record_node(0, TreeState::IsRoot, None, 0);
        s.record_node(1, TreeState::HasParent, Some(0), 1);
        s.record_node(2, TreeState::HasParent, Some(1), 2);
        s
    }

    #[test]
    fn test_converged_chain() {
        let s = chain_snapshot(Timestamp::ZERO);
        assert_eq!(s.roots(), vec![0]);
        assert!(s.all_connected());
        assert!(s.loop_free());
        assert!(s.depth_consistent());
        assert!(s.is_converged());
        assert_eq!(s.max_depth(), 2);
    }

    #[test]
    fn test_loop_detected() {
        let mut s = TreeSnapshot::new(Timestamp::ZERO);
        s.record_node(0, TreeState::IsRoot, None, 0);
        s.record_node(1, TreeState::HasParent, Some(2), 3);
        s.record_node(2, TreeState::HasParent, Some(1), 4);
        assert!(!s.loop_free());
        assert!(!s.depth_consistent());
        assert!(!s.is_converged());
    }

    #[test]
    fn test_disconnected_node() {
        let mut s = chain_snapshot(Timestamp::ZERO);
        s.record_node(3, TreeState::Disconnected, None, srtree::MAX_DEPTH);
        assert!(!s.all_connected());
        assert_eq!(s.disconnected(), vec![3]);
        assert!(s.loop_free());
        assert_eq!(s.max_depth(), 2);
    }

    #[test]
    fn test_stale_depth_not_consistent() {
        let mut s = chain_snapshot(Timestamp::ZERO);
        s.record_node(2, TreeState::HasParent, Some(1), 5);
        assert!(!s.depth_consistent());
    }

    #[test]
    fn test_convergence_time() {
        let mut metrics = SimMetrics::new();

        let mut s1 = TreeSnapshot::new(Timestamp::from_secs(10));
        s1.record_node(0, TreeState::IsRoot, None, 0);
        s1.record_node(1, TreeState::Disconnected, None, srtree::MAX_DEPTH);
        metrics.add_snapshot(s1);

        metrics.add_snapshot(chain_snapshot(Timestamp::from_secs(20)));

        assert_eq!(metrics.convergence_time(), Some(Timestamp::from_secs(20)));
        assert!(!metrics.converged_by(Timestamp::from_secs(5)));
        assert!(metrics.converged_by(Timestamp::from_secs(15)));
    }

    #[test]
    fn test_report_lookup() {
        let mut metrics = SimMetrics::new();
        metrics.reports.push(RootReport {
            root: 0,
            at: Timestamp::from_millis(39_300),
            report: EpochReport {
                epoch: 0,
                max_seen: 9,
                sum: 13,
                count: 2,
            },
        });
        assert_eq!(metrics.report_for(0).map(|r| r.average()), Some(Some(6)));
        assert!(metrics.report_for(1).is_none());
    }
}
