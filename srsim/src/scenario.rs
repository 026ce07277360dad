//! Scenario builder for setting up and running simulations.

use hashbrown::HashMap;
use srtree::config::{DefaultConfig, ProtocolConfig};
use srtree::{Duration, NodeId, Role, Timestamp};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::node::NodeSpec;
use crate::sim::Simulator;
use crate::topology::{Topology, TopologyError};

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    /// Fully connected topology.
    FullyConnected,
    /// Chain topology (each node connected only to neighbors).
    Chain,
    /// Star topology (first node is hub).
    Star,
    /// Grid, `width` nodes per row.
    Grid { width: usize },
    /// Custom topology provided by user.
    Custom(Topology),
}

/// Builder for simulation scenarios.
///
/// Nodes are `0..num_nodes` unless a custom topology names them. The
/// smallest id is the root unless another one is chosen. Node `i` (in id
/// order) boots `i * boot_stagger` after the start.
pub struct ScenarioBuilder {
    /// Number of nodes to create.
    num_nodes: usize,
    /// RNG seed for determinism.
    seed: u64,
    /// Topology type to generate (must be explicitly specified).
    topology_type: Option<TopologyType>,
    /// Root override.
    root: Option<NodeId>,
    /// Initial sensor readings; unlisted nodes read their id.
    readings: HashMap<NodeId, u8>,
    /// Delay between consecutive node boots.
    boot_stagger: Duration,
    /// Weakest RSSI a node accepts a beacon at.
    rssi_floor: Option<i16>,
    /// Global packet loss rate.
    loss_rate: f64,
    /// Link delay.
    delay: Duration,
    /// Scheduled actions.
    actions: Vec<(Timestamp, ScenarioAction)>,
    /// Snapshot interval.
    snapshot_interval: Option<Duration>,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// Create a new scenario with the specified number of nodes.
    ///
    /// Note: You MUST specify a topology before calling build().
    /// Use `.fully_connected()`, `.chain_topology()`, `.star_topology()`,
    /// `.grid_topology(width)` or `.topology(custom_topology)`.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seed: 42,
            topology_type: None,
            root: None,
            readings: HashMap::new(),
            boot_stagger: Duration::from_millis(1),
            rssi_floor: None,
            loss_rate: 0.0,
            delay: Duration::from_millis(1),
            actions: Vec::new(),
            snapshot_interval: None,
        }
    }

    /// Scenario over a TOSSIM-style gain file. The node set is every id the
    /// file mentions.
    pub fn from_gain_file(text: &str) -> Result<Self, TopologyError> {
        let topo = Topology::parse_gain_file(text)?;
        Ok(Self::new(topo.nodes().len()).topology(topo))
    }

    /// Set the RNG seed for deterministic simulation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set a custom network topology. Its nodes become the node set.
    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = Some(TopologyType::Custom(topo));
        self
    }

    /// Use fully connected topology.
    pub fn fully_connected(mut self) -> Self {
        self.topology_type = Some(TopologyType::FullyConnected);
        self
    }

    /// Use chain topology (each node connected only to neighbors).
    pub fn chain_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Chain);
        self
    }

    /// Use star topology (first node is hub).
    pub fn star_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Star);
        self
    }

    /// Use a grid with `width` nodes per row.
    pub fn grid_topology(mut self, width: usize) -> Self {
        self.topology_type = Some(TopologyType::Grid { width });
        self
    }

    /// Make `id` the root.
    pub fn with_root(mut self, id: NodeId) -> Self {
        self.root = Some(id);
        self
    }

    /// Initial sensor reading of one node.
    pub fn with_reading(mut self, id: NodeId, value: u8) -> Self {
        self.readings.insert(id, value);
        self
    }

    /// Delay between consecutive node boots.
    pub fn with_boot_stagger(mut self, stagger: Duration) -> Self {
        self.boot_stagger = stagger;
        self
    }

    /// Ignore beacons weaker than `floor` dBm.
    pub fn with_rssi_floor(mut self, floor: i16) -> Self {
        self.rssi_floor = Some(floor);
        self
    }

    /// Set global packet loss rate.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set link delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set snapshot interval for metrics collection.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Schedule a network partition at the specified time.
    pub fn partition_at(mut self, time: Timestamp, groups: Vec<Vec<NodeId>>) -> Self {
        self.actions
            .push((time, ScenarioAction::Partition { groups }));
        self
    }

    /// Schedule partition healing at the specified time.
    pub fn heal_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::HealPartition));
        self
    }

    /// Cut every link of `node` at the specified time.
    pub fn isolate_at(mut self, time: Timestamp, node: NodeId) -> Self {
        self.actions.push((time, ScenarioAction::Isolate { node }));
        self
    }

    /// Take down one link at the specified time.
    pub fn fail_link_at(mut self, time: Timestamp, from: NodeId, to: NodeId) -> Self {
        self.actions
            .push((time, ScenarioAction::DisableLink { from, to }));
        self
    }

    /// Bring one link back at the specified time.
    pub fn restore_link_at(mut self, time: Timestamp, from: NodeId, to: NodeId) -> Self {
        self.actions
            .push((time, ScenarioAction::EnableLink { from, to }));
        self
    }

    /// Change a node's reading at the specified time.
    pub fn reading_at(mut self, time: Timestamp, node: NodeId, value: u8) -> Self {
        self.actions
            .push((time, ScenarioAction::SetReading { node, value }));
        self
    }

    /// Schedule a snapshot at the specified time.
    pub fn snapshot_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::TakeSnapshot));
        self
    }

    /// Build the simulator with the default timing profile.
    pub fn build(self) -> (Simulator, Vec<NodeId>) {
        self.build_with_config::<DefaultConfig>()
    }

    /// Build the simulator with all nodes and topology.
    ///
    /// # Panics
    ///
    /// If no topology was chosen.
    pub fn build_with_config<C: ProtocolConfig>(self) -> (Simulator<C>, Vec<NodeId>) {
        let mut sim = Simulator::<C>::new(self.seed);

        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }

        let default_ids = || (0..self.num_nodes).map(|i| i as NodeId).collect::<Vec<_>>();

        let (mut topo, node_ids) = match self.topology_type {
            Some(TopologyType::FullyConnected) => {
                let ids = default_ids();
                (Topology::fully_connected(&ids), ids)
            }
            Some(TopologyType::Chain) => {
                let ids = default_ids();
                (Topology::chain(&ids), ids)
            }
            Some(TopologyType::Star) => {
                let ids = default_ids();
                (Topology::star(&ids), ids)
            }
            Some(TopologyType::Grid { width }) => {
                let ids = default_ids();
                (Topology::grid(&ids, width), ids)
            }
            Some(TopologyType::Custom(t)) => {
                let ids = t.nodes();
                (t, ids)
            }
            None => panic!(
                "Topology must be explicitly specified. \
                Use .fully_connected(), .chain_topology(), .star_topology(), \
                .grid_topology(), or .topology()"
            ),
        };

        // Apply global settings
        if self.loss_rate > 0.0 {
            topo.set_global_loss_rate(self.loss_rate);
        }
        topo.set_global_delay(self.delay);

        sim = sim.with_topology(topo);

        let root = self.root.or_else(|| node_ids.first().copied());
        for (i, &id) in node_ids.iter().enumerate() {
            let role = if Some(id) == root {
                Role::Root
            } else {
                Role::Sensor
            };
            let reading = self.readings.get(&id).copied().unwrap_or(id as u8);
            let spec = NodeSpec::new(id, role, reading)
                .boot_at(Timestamp::ZERO + self.boot_stagger.saturating_mul(i as u64))
                .rssi_floor(self.rssi_floor);
            sim.add_node(spec);
        }

        for (time, action) in self.actions {
            sim.schedule_action(time, action);
        }

        (sim, node_ids)
    }

    /// Build and run the simulation for the specified duration.
    pub fn run_for(self, duration: Duration) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_for(duration)
    }

    /// Build and run until the specified time.
    pub fn run_until(self, time: Timestamp) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_until(time)
    }
}

/// Convenience function to create a simple N-node fully connected scenario.
pub fn simple_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).fully_connected()
}

#[cfg(test)]
mod tests {
    use super::*;
    use srtree::TreeState;

    #[test]
    fn test_scenario_builder_basic() {
        let (sim, nodes) = ScenarioBuilder::new(3)
            .with_seed(123)
            .fully_connected()
            .build();

        assert_eq!(nodes, vec![0, 1, 2]);
        assert_eq!(sim.node_ids(), vec![0, 1, 2]);
        assert!(sim.node(0).unwrap().is_root());
        assert!(!sim.node(1).unwrap().is_root());
        assert_eq!(sim.node(2).unwrap().boot_at, Timestamp::from_millis(2));
    }

    #[test]
    fn test_root_override_and_readings() {
        let (sim, _) = ScenarioBuilder::new(3)
            .chain_topology()
            .with_root(2)
            .with_reading(0, 77)
            .build();

        assert!(sim.node(2).unwrap().is_root());
        assert_eq!(sim.node(0).unwrap().inner().sensor().value(), 77);
        assert_eq!(sim.node(1).unwrap().inner().sensor().value(), 1);
    }

    #[test]
    fn test_scenario_run_for() {
        let result = simple_scenario(2).run_for(Duration::from_secs(1));

        assert!(result.end_time >= Timestamp::from_secs(1));
        assert!(!result.metrics.snapshots.is_empty());
    }

    #[test]
    fn test_scenario_with_loss() {
        let (sim, nodes) = ScenarioBuilder::new(2)
            .fully_connected()
            .with_loss_rate(0.5)
            .with_delay(Duration::from_millis(3))
            .build();

        let link = sim.topology().get_link(nodes[0], nodes[1]).unwrap();
        assert_eq!(link.loss_rate, 0.5);
        assert_eq!(link.delay, Duration::from_millis(3));
    }

    #[test]
    fn test_scenario_partition() {
        let (mut sim, _) = ScenarioBuilder::new(4)
            .fully_connected()
            .partition_at(Timestamp::from_millis(500), vec![vec![0, 1], vec![2, 3]])
            .build();

        assert!(sim.topology().is_connected(0, 2));

        sim.run_for(Duration::from_secs(1));

        assert!(!sim.topology().is_connected(0, 2));
        assert!(sim.topology().is_connected(0, 1));
        assert!(sim.topology().is_connected(2, 3));
    }

    #[test]
    fn test_gain_file_scenario() {
        let text = "0 1 -60.0\n1 0 -61.0\n1 2 -70.0\n2 1 -70.5\n";
        let (mut sim, nodes) = ScenarioBuilder::from_gain_file(text).unwrap().build();
        assert_eq!(nodes, vec![0, 1, 2]);

        sim.run_for(Duration::from_secs(2));
        assert_eq!(sim.node(2).unwrap().tree_state(), TreeState::HasParent);
        assert_eq!(sim.node(2).unwrap().depth(), 2);
    }

    #[test]
    fn test_rssi_floor_blocks_weak_link() {
        let text = "0 1 -60.0\n1 0 -60.0\n1 2 -95.0\n2 1 -95.0\n";
        let (mut sim, _) = ScenarioBuilder::from_gain_file(text)
            .unwrap()
            .with_rssi_floor(-90)
            .build();

        sim.run_for(Duration::from_secs(30));
        assert_eq!(sim.node(1).unwrap().depth(), 1);
        assert_eq!(sim.node(2).unwrap().tree_state(), TreeState::Disconnected);
    }

    #[test]
    fn test_scheduled_reading_change() {
        let (mut sim, _) = ScenarioBuilder::new(2)
            .chain_topology()
            .with_reading(1, 5)
            .reading_at(Timestamp::from_secs(45), 1, 50)
            .build();

        let result = sim.run_for(Duration::from_secs(80));
        assert_eq!(result.metrics.report_for(0).map(|r| r.max_seen), Some(5));
        assert_eq!(result.metrics.report_for(1).map(|r| r.max_seen), Some(50));
    }
}
