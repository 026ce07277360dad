//! Tree formation and maintenance.
//!
//! This module handles:
//! - Beacon creation and processing
//! - Parent adoption, switching and depth following
//! - Parent loss (staleness, poisoned routes) and repair after hold-down
//! - Neighbor table upkeep

use alloc::vec::Vec;
use log::{info, trace, warn};

use crate::config::ProtocolConfig;
use crate::node::{NeighborInfo, Node};
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, Random, Sensor, Transport};
use crate::types::{Destination, Event, NodeId, RoutingMsg, MAX_DEPTH};
use crate::wire::Message;

impl<T, R, Clk, S, C> Node<T, R, Clk, S, C>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    S: Sensor,
    C: ProtocolConfig,
{
    /// Handle a received tree-control packet.
    pub(crate) fn handle_routing(
        &mut self,
        from: NodeId,
        msg: RoutingMsg,
        rssi: Option<i16>,
        now: Timestamp,
    ) {
        trace!(
            "[{}] beacon from {} depth={} cmd={:?}",
            self.node_id(),
            from,
            msg.depth,
            msg.cmd
        );

        // The root never changes position.
        if self.is_root() {
            return;
        }

        if self.parent() == Some(from) {
            self.handle_parent_beacon(from, msg, rssi, now);
            return;
        }

        if !msg.is_connected() {
            // Sender has no route; it is not a candidate until it beacons again.
            self.neighbors_mut().remove(&from);
            return;
        }

        if !self.transport().is_acceptable_rssi(rssi) {
            return;
        }

        // Keep the table current even while we may not adopt.
        self.insert_neighbor(
            from,
            NeighborInfo {
                depth: msg.depth,
                last_seen: now,
                rssi,
            },
        );

        if self.in_hold_down(now) || self.guarded(msg.depth, now) {
            return;
        }

        // Strict improvement only; ties keep the current parent.
        let offered = msg.depth + 1;
        if offered < self.depth() {
            self.adopt_parent(from, msg.depth, now, now);
        }
    }

    /// Handle a beacon from the current parent.
    fn handle_parent_beacon(
        &mut self,
        parent: NodeId,
        msg: RoutingMsg,
        rssi: Option<i16>,
        now: Timestamp,
    ) {
        // Parent lost its route or got deeper: the path through it may now
        // loop back through us, so drop it.
        if !msg.is_connected() || msg.depth + 1 > self.depth() {
            info!(
                "[{}] parent {} advertised depth={} cmd={:?}, dropping it",
                self.node_id(),
                parent,
                msg.depth,
                msg.cmd
            );
            self.lose_parent(now);
            return;
        }

        self.set_last_parent_beacon(Some(now));
        self.insert_neighbor(
            parent,
            NeighborInfo {
                depth: msg.depth,
                last_seen: now,
                rssi,
            },
        );

        let depth = msg.depth + 1;
        if depth < self.depth() {
            info!(
                "[{}] parent {} moved up, depth {} -> {}",
                self.node_id(),
                parent,
                self.depth(),
                depth
            );
            self.set_depth(depth);
            self.scheduler_mut().schedule_proactive(now);
        }
    }

    /// Take `parent` (advertising `parent_depth`, last heard at `heard_at`).
    fn adopt_parent(
        &mut self,
        parent: NodeId,
        parent_depth: u8,
        heard_at: Timestamp,
        now: Timestamp,
    ) {
        let depth = parent_depth + 1;
        match self.parent() {
            Some(old) => info!(
                "[{}] switching parent {} -> {}, depth {} -> {}",
                self.node_id(),
                old,
                parent,
                self.depth(),
                depth
            ),
            None => info!(
                "[{}] adopted parent {}, depth {}",
                self.node_id(),
                parent,
                depth
            ),
        }

        self.set_parent(Some(parent));
        self.set_depth(depth);
        self.set_last_parent_beacon(Some(heard_at));
        self.set_loss_guard(None);
        self.metrics_mut().parent_changes += 1;
        self.scheduler_mut().stop_bootstrap();
        self.scheduler_mut().schedule_proactive(now);
        self.push_event(Event::ParentChanged {
            parent,
            depth,
            at: now,
        });
    }

    /// Drop the current parent, announce it, and start the hold-down.
    ///
    /// Former descendants that missed the announcement still advertise a
    /// depth deeper than the one we had. Until all of them have heard our
    /// `MAX_DEPTH` beacons or timed us out, candidates at or below that depth
    /// are refused.
    pub(crate) fn lose_parent(&mut self, now: Timestamp) {
        let Some(former) = self.parent() else {
            return;
        };
        let old_depth = self.depth();

        info!(
            "[{}] lost parent {} at depth {}",
            self.node_id(),
            former,
            old_depth
        );

        self.set_parent(None);
        self.set_depth(MAX_DEPTH);
        self.set_last_parent_beacon(None);
        self.set_hold_down_until(Some(now + C::hold_down()));
        self.set_loss_guard(Some((old_depth, now + C::loss_guard())));
        self.metrics_mut().parent_losses += 1;

        // Anything at our old depth or deeper may be our own descendant.
        self.neighbors_mut().remove(&former);
        self.neighbors_mut().retain(|_, n| n.depth < old_depth);

        self.push_event(Event::ParentLost { former, at: now });
        self.send_routing(RoutingMsg::parent_lost());
    }

    pub(crate) fn in_hold_down(&self, now: Timestamp) -> bool {
        self.hold_down_until().is_some_and(|until| now < until)
    }

    /// Whether a candidate advertising `depth` may still be one of our former
    /// descendants.
    pub(crate) fn guarded(&self, depth: u8, now: Timestamp) -> bool {
        self.loss_guard()
            .is_some_and(|(lost_depth, until)| now < until && depth >= lost_depth)
    }

    /// End the hold-down if it expired and re-elect from the neighbor table.
    pub(crate) fn handle_hold_down(&mut self, now: Timestamp) {
        match self.hold_down_until() {
            Some(until) if now >= until => {
                self.set_hold_down_until(None);
                self.select_best_parent(now);
            }
            _ => {}
        }
    }

    /// Adopt the shallowest fresh neighbor, if it improves on our depth.
    ///
    /// Only entries heard within the last beacon period count. The hold-down
    /// lasts as long, so an entry recorded before a neighbor lost its own
    /// parent can never outlive that neighbor's re-election.
    pub(crate) fn select_best_parent(&mut self, now: Timestamp) {
        if self.is_root() || self.parent().is_some() {
            return;
        }
        let fresh = C::beacon_period();
        let best = self
            .neighbors()
            .iter()
            .filter(|(_, n)| now.saturating_sub(n.last_seen) < fresh)
            .filter(|(_, n)| n.depth < MAX_DEPTH && !self.guarded(n.depth, now))
            .min_by_key(|(id, n)| (n.depth, core::cmp::Reverse(n.last_seen), **id))
            .map(|(id, n)| (*id, n.depth, n.last_seen));

        if let Some((id, depth, last_seen)) = best {
            if depth + 1 < self.depth() {
                self.adopt_parent(id, depth, last_seen, now);
            }
        }
    }

    /// Parent staleness check and neighbor expiry.
    pub(crate) fn handle_staleness(&mut self, now: Timestamp) {
        let window = C::staleness_window();

        if let Some(last) = self.last_parent_beacon() {
            if self.parent().is_some() && now.saturating_sub(last) > window {
                info!(
                    "[{}] parent silent for {} ms",
                    self.node_id(),
                    now.saturating_sub(last).as_millis()
                );
                self.lose_parent(now);
            }
        }

        let expired: Vec<NodeId> = self
            .neighbors()
            .iter()
            .filter(|(_, n)| now.saturating_sub(n.last_seen) > window)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.neighbors_mut().remove(&id);
        }
    }

    /// Instant at which the current parent becomes stale.
    pub(crate) fn parent_deadline(&self) -> Option<Timestamp> {
        self.parent()?;
        self.last_parent_beacon()
            .map(|last| last + C::staleness_window() + Duration::from_millis(1))
    }

    /// Broadcast our current depth.
    pub(crate) fn send_beacon(&mut self, now: Timestamp) {
        let msg = RoutingMsg::beacon(self.depth());
        trace!(
            "[{}] beacon depth={} t={}",
            self.node_id(),
            msg.depth,
            now.as_millis()
        );
        self.send_routing(msg);
    }

    /// Queue a tree-control packet for broadcast. A full queue drops it; the
    /// next periodic beacon supersedes it.
    fn send_routing(&mut self, msg: RoutingMsg) {
        let frame = self.frame_for(&Message::Routing(msg), Destination::Broadcast);
        if self.enqueue(frame).is_ok() {
            self.metrics_mut().beacons_sent += 1;
        } else {
            warn!("[{}] outgoing queue full, beacon dropped", self.node_id());
            self.metrics_mut().beacons_dropped += 1;
        }
    }
}
