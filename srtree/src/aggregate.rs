//! Upward aggregation: per-epoch max and sum/count accumulators.
//!
//! Children's aggregate packets are merged as they arrive. At the node's
//! flush instant the local reading is folded in once and the merged result
//! goes one hop up, or is surfaced as an [`EpochReport`] at the root.

use log::{debug, warn};

use crate::config::ProtocolConfig;
use crate::node::Node;
use crate::time::Timestamp;
use crate::traits::{Clock, Random, Sensor, Transport};
use crate::types::{
    DataAvgMsg, DataMaxMsg, Destination, EpochReport, Event, NodeId, SendError, TreeState,
};
use crate::wire::Message;

/// Running aggregate for the current epoch.
///
/// Wider than the wire so that merging never overflows; values are
/// saturated only when forwarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochAccumulator {
    max_seen: u8,
    sum: u32,
    count: u32,
}

impl EpochAccumulator {
    pub const fn new() -> Self {
        Self {
            max_seen: 0,
            sum: 0,
            count: 0,
        }
    }

    pub fn max_seen(&self) -> u8 {
        self.max_seen
    }

    pub fn sum(&self) -> u32 {
        self.sum
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0 && self.max_seen == 0
    }

    pub fn merge_max(&mut self, msg: DataMaxMsg) {
        self.max_seen = self.max_seen.max(msg.data);
    }

    pub fn merge_avg(&mut self, msg: DataAvgMsg) {
        self.sum = self.sum.saturating_add(msg.sum as u32);
        self.count = self.count.saturating_add(msg.count as u32);
    }

    /// Fold one local reading into both aggregates.
    pub fn add_sample(&mut self, value: u8) {
        self.merge_max(DataMaxMsg { data: value });
        self.sum = self.sum.saturating_add(value as u32);
        self.count = self.count.saturating_add(1);
    }

    pub fn max_msg(&self) -> DataMaxMsg {
        DataMaxMsg {
            data: self.max_seen,
        }
    }

    /// Average packet, saturated to the wire widths.
    pub fn avg_msg(&self) -> DataAvgMsg {
        DataAvgMsg {
            sum: self.sum.min(u16::MAX as u32) as u16,
            count: self.count.min(u8::MAX as u32) as u8,
        }
    }

    pub fn report(&self, epoch: u64) -> EpochReport {
        EpochReport {
            epoch,
            max_seen: self.max_seen,
            sum: self.sum,
            count: self.count,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl<T, R, Clk, S, C> Node<T, R, Clk, S, C>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    S: Sensor,
    C: ProtocolConfig,
{
    /// Handle a max-aggregate packet from a child.
    pub(crate) fn handle_max(&mut self, from: NodeId, msg: DataMaxMsg) {
        log::trace!("[{}] max {} from {}", self.node_id(), msg.data, from);
        self.accumulator_mut().merge_max(msg);
    }

    /// Handle an average-aggregate packet from a child.
    pub(crate) fn handle_avg(&mut self, from: NodeId, msg: DataAvgMsg) {
        log::trace!(
            "[{}] avg sum={} count={} from {}",
            self.node_id(),
            msg.sum,
            msg.count,
            from
        );
        self.accumulator_mut().merge_avg(msg);
    }

    /// Close `epoch`: sample, then forward, report, or drop; always reset.
    pub(crate) fn flush_epoch(&mut self, epoch: u64, now: Timestamp) {
        let state = self.tree_state();
        let samples = match state {
            TreeState::IsRoot => C::ROOT_SAMPLES,
            TreeState::HasParent => true,
            TreeState::Disconnected => false,
        };
        if samples {
            let value = self.sensor_mut().read();
            self.accumulator_mut().add_sample(value);
        }

        let acc = *self.accumulator();
        debug!(
            "[{}] epoch {}: flush max={} sum={} count={} depth={} t={}",
            self.node_id(),
            epoch,
            acc.max_seen(),
            acc.sum(),
            acc.count(),
            self.depth(),
            now.as_millis()
        );

        match state {
            TreeState::IsRoot => {
                self.push_event(Event::EpochAggregate(acc.report(epoch)));
            }
            TreeState::HasParent => {
                for msg in [Message::Max(acc.max_msg()), Message::Avg(acc.avg_msg())] {
                    match self.send_aggregate(msg) {
                        Ok(()) => self.metrics_mut().aggregates_sent += 1,
                        Err(e) => {
                            warn!(
                                "[{}] epoch {}: aggregate not sent: {}",
                                self.node_id(),
                                epoch,
                                e
                            );
                            self.metrics_mut().aggregates_dropped += 1;
                        }
                    }
                }
            }
            TreeState::Disconnected => {
                warn!(
                    "[{}] epoch {}: disconnected, dropping aggregate",
                    self.node_id(),
                    epoch
                );
                self.metrics_mut().epochs_dropped += 1;
            }
        }

        self.accumulator_mut().reset();
        self.scheduler_mut().flushed(epoch);
    }

    /// Unicast one aggregate packet to the current parent.
    fn send_aggregate(&mut self, msg: Message) -> Result<(), SendError> {
        let parent = self.parent().ok_or(SendError::NoParent)?;
        let frame = self.frame_for(&msg, Destination::Unicast(parent));
        self.enqueue(frame)
    }
}
