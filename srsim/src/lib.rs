//! srsim - Discrete event network simulator for srtree protocol testing.
//!
//! This crate provides a deterministic, discrete-event simulator for testing the
//! srtree protocol at scale without real-time delays.
//!
//! # Features
//!
//! - **Discrete event simulation**: No real-time delays, deterministic ordering
//! - **Multiple nodes in single process**: Simulate entire networks efficiently
//! - **Configurable topology**: Fully connected, chain, star, grid, or a
//!   TOSSIM-style `src dst gain` file
//! - **Link properties**: RSSI, packet loss, delay per link
//! - **Scenario builder**: Staggered boots, readings, partitions, link failures
//! - **Metrics collection**: Tree snapshots, message counts, root epoch reports
//!
//! # Example
//!
//! ```
//! use srsim::{ScenarioBuilder, Duration};
//!
//! // Five nodes in a line, node 0 is the root
//! let result = ScenarioBuilder::new(5)
//!     .chain_topology()
//!     .run_for(Duration::from_secs(45));
//!
//! assert!(result.converged());
//! let report = result.metrics.report_for(0).unwrap();
//! assert_eq!(report.count, 4);
//! ```
//!
//! # Architecture
//!
//! The simulator uses a priority queue of events ordered by (time, sequence_number).
//! The main loop:
//! 1. Pop next event from queue
//! 2. Advance simulation time
//! 3. Process event (call node handlers)
//! 4. Collect outgoing frames and node events
//! 5. Route frames through the topology, re-arm the node's timer at its
//!    `next_wakeup()`
//!
//! Handlers are called directly (`handle_frame`, `handle_timer`) instead of
//! through the async `Node::run()` loop.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

// Re-export main types
pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{NodeView, RootReport, SimMetrics, SimulationResult, TreeSnapshot};
pub use node::{NodeSpec, SimNode};
pub use scenario::{simple_scenario, ScenarioBuilder};
pub use sim::Simulator;
pub use srtree::{Duration, NodeId, Timestamp};
pub use topology::{Link, Topology, TopologyError};

#[cfg(test)]
mod tests {
    use super::*;
    use srtree::{FastConfig, TreeState};

    #[test]
    fn test_single_root_stays_root() {
        let result = ScenarioBuilder::new(1)
            .fully_connected()
            .run_for(Duration::from_secs(5));

        let snapshot = result.metrics.latest_snapshot().unwrap();
        assert_eq!(snapshot.roots(), vec![0]);
        assert!(result.converged());
    }

    /// Root plus one child reading 10.
    #[test]
    fn test_single_child_epoch_report() {
        let result = ScenarioBuilder::new(2)
            .chain_topology()
            .with_reading(1, 10)
            .run_for(Duration::from_secs(40));

        let report = result.metrics.report_for(0).unwrap();
        assert_eq!(report.max_seen, 10);
        assert_eq!(report.sum, 10);
        assert_eq!(report.count, 1);
        assert_eq!(report.average(), Some(10));
    }

    /// Root plus two children reading 4 and 9.
    #[test]
    fn test_two_children_epoch_report() {
        let result = ScenarioBuilder::new(3)
            .star_topology()
            .with_reading(1, 4)
            .with_reading(2, 9)
            .run_for(Duration::from_secs(40));

        let report = result.metrics.report_for(0).unwrap();
        assert_eq!(report.max_seen, 9);
        assert_eq!(report.sum, 13);
        assert_eq!(report.count, 2);
        assert_eq!(report.average(), Some(6));
    }

    #[test]
    fn test_chain_topology_forms_tree() {
        let result = ScenarioBuilder::new(5)
            .chain_topology()
            .with_snapshot_interval(Duration::from_millis(500))
            .run_for(Duration::from_secs(45));

        assert!(result.converged(), "Chain should converge to single tree");
        assert_eq!(result.final_max_depth(), 4);
        assert!(result.metrics.converged_by(Timestamp::from_secs(1)));

        // Readings default to the node id: 1 + 2 + 3 + 4
        let report = result.metrics.report_for(0).unwrap();
        assert_eq!(report.max_seen, 4);
        assert_eq!(report.sum, 10);
        assert_eq!(report.count, 4);
    }

    #[test]
    fn test_star_topology_hub_is_parent_of_all() {
        let (mut sim, nodes) = ScenarioBuilder::new(11).star_topology().build();

        let hub = nodes[0];
        assert_eq!(sim.topology().neighbors(hub).len(), 10);

        let result = sim.run_for(Duration::from_secs(40));

        assert!(result.converged());
        assert_eq!(result.final_max_depth(), 1);
        for &spoke in &nodes[1..] {
            assert_eq!(sim.node(spoke).unwrap().parent(), Some(hub));
        }

        let report = result.metrics.report_for(0).unwrap();
        assert_eq!(report.count, 10);
        assert_eq!(report.sum, 55);
        assert_eq!(report.max_seen, 10);
    }

    #[test]
    fn test_grid_depths_are_hop_counts() {
        // 0 1 2
        // 3 4 5
        // 6 7 8
        let (mut sim, _) = ScenarioBuilder::new(9).grid_topology(3).build();
        let result = sim.run_for(Duration::from_secs(40));

        assert!(result.converged());
        let expected = [0u8, 1, 2, 1, 2, 3, 2, 3, 4];
        for (id, &depth) in expected.iter().enumerate() {
            assert_eq!(sim.node(id as NodeId).unwrap().depth(), depth, "node {}", id);
        }
        assert_eq!(result.metrics.report_for(0).map(|r| r.count), Some(8));
    }

    #[test]
    fn test_epochs_report_in_order() {
        let result = ScenarioBuilder::new(4)
            .chain_topology()
            .run_for(Duration::from_secs(200));

        let epochs: Vec<u64> = result.reports().map(|r| r.epoch).collect();
        assert_eq!(epochs, vec![0, 1, 2, 3, 4]);
        assert!(result.reports().all(|r| r.count == 3 && r.sum == 6));
    }

    #[test]
    fn test_lossy_links_still_converge() {
        let result = ScenarioBuilder::new(6)
            .with_seed(7)
            .fully_connected()
            .with_loss_rate(0.2)
            .run_for(Duration::from_secs(60));

        assert!(result.converged());
        assert_eq!(result.final_max_depth(), 1);
        assert!(result.metrics.messages_dropped > 0);
    }

    #[test]
    fn test_partition_disconnects_then_heals() {
        let (mut sim, _) = ScenarioBuilder::new(4)
            .fully_connected()
            .partition_at(Timestamp::from_secs(20), vec![vec![0, 1], vec![2, 3]])
            .heal_at(Timestamp::from_secs(110))
            .build();

        let result = sim.run_until(Timestamp::from_secs(100));
        let snapshot = result.metrics.latest_snapshot().unwrap();
        // Cut off from the root, the far side must not form its own tree
        assert_eq!(snapshot.disconnected(), vec![2, 3]);
        assert!(snapshot.loop_free());
        assert!(result.metrics.parent_losses >= 2);

        let result = sim.run_until(Timestamp::from_secs(140));
        assert!(result.converged());
    }

    #[test]
    fn test_repair_through_alternate_path() {
        // 0 1 2
        // 3 4 5
        // 6 7 8
        let (mut sim, _) = ScenarioBuilder::new(9)
            .grid_topology(3)
            .isolate_at(Timestamp::from_secs(100), 1)
            .build();

        let result = sim.run_until(Timestamp::from_secs(400));
        let snapshot = result.metrics.latest_snapshot().unwrap();

        assert_eq!(snapshot.disconnected(), vec![1]);
        assert!(snapshot.loop_free());
        assert!(snapshot.depth_consistent());

        let corner = snapshot.get(2).unwrap();
        assert_eq!(corner.parent, Some(5));
        assert_eq!(corner.depth, 4);
        assert_eq!(snapshot.get(4).unwrap().depth, 2);

        // Everyone but the isolated node reports again: 2 + 3 + ... + 8
        let report = result.metrics.report_for(9).unwrap();
        assert_eq!(report.count, 7);
        assert_eq!(report.sum, 35);
        assert_eq!(report.max_seen, 8);
    }

    /// Node 1 is cut off and later restored while links drop frames. No
    /// snapshot of the run may contain a parent cycle.
    #[test]
    fn test_lossy_repair_never_loops() {
        for (width, loss) in [(3usize, 0.3), (4, 0.4)] {
            for seed in 1..=4u64 {
                let (mut sim, _) = ScenarioBuilder::new(width * width)
                    .with_seed(seed)
                    .grid_topology(width)
                    .with_loss_rate(loss)
                    .with_snapshot_interval(Duration::from_millis(100))
                    .isolate_at(Timestamp::from_secs(30), 1)
                    .heal_at(Timestamp::from_secs(120))
                    .build();

                let result = sim.run_until(Timestamp::from_secs(250));
                assert!(result.metrics.snapshots.len() > 100);
                assert!(result.metrics.messages_dropped > 0);
                for snapshot in &result.metrics.snapshots {
                    assert!(
                        snapshot.loop_free(),
                        "{}x{} grid, seed {}: parent cycle at {} ms",
                        width,
                        width,
                        seed,
                        snapshot.time.as_millis()
                    );
                }
            }
        }
    }

    #[test]
    fn test_gain_file_network() {
        let text = "\
0 1 -54.0
1 0 -55.0
1 2 -60.0
2 1 -61.0
0 3 -70.0
3 2 -58.0
";
        let (mut sim, nodes) = ScenarioBuilder::from_gain_file(text).unwrap().build();
        assert_eq!(nodes, vec![0, 1, 2, 3]);

        let result = sim.run_for(Duration::from_secs(40));
        assert!(result.converged());
        assert_eq!(sim.node(2).unwrap().depth(), 2);
        // 3 hears the root directly, though the root never hears 3
        assert_eq!(sim.node(3).unwrap().tree_state(), TreeState::HasParent);
        assert_eq!(sim.node(3).unwrap().depth(), 1);
        assert!(!sim.topology().is_connected(3, 0));
        assert!(!sim.topology().is_connected(2, 3));
    }

    #[test]
    fn test_fast_profile() {
        let (mut sim, _) = ScenarioBuilder::new(5)
            .chain_topology()
            .build_with_config::<FastConfig>();

        let result = sim.run_for(Duration::from_secs(10));
        assert!(result.converged());
        // 4 s epochs: epochs 0 and 1 complete by 10 s
        assert_eq!(result.metrics.report_for(1).map(|r| r.count), Some(4));
    }
}
