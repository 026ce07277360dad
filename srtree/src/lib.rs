#![forbid(unsafe_code)]
//! srtree - Depth-based self-stabilizing routing tree with epoch aggregation
//!
//! Sensor nodes organize themselves into a tree rooted at a single sink by
//! advertising their hop count ("depth"). Once per epoch every node folds
//! its own reading into the max and sum/count aggregates received from its
//! children and forwards the result one hop toward the root, which surfaces
//! the fully merged maximum and average.
//!
//! This crate is `no_std` but **requires the `alloc` crate** (payload buffers
//! and the bounded neighbor table).
//!
//! # Key Properties
//!
//! - `depth(node) == depth(parent) + 1`; a parent is only taken if it
//!   strictly improves depth, which keeps parent relations loop-free
//! - A silent parent is dropped after a staleness window; a parent that
//!   advertises a worse depth is dropped at once
//! - After a loss the node announces it, waits out a hold-down, then
//!   re-elects from fresh neighbors
//! - Deeper nodes flush earlier inside an epoch, so the root's report for
//!   epoch `k` covers the whole tree
//!
//! # Example (integration pattern)
//!
//! ```text
//! use srtree::{Node, Role, DefaultConfig, Event};
//!
//! // Implement Transport, Random, Clock and Sensor for your platform...
//!
//! let mut node = Node::<_, _, _, _, DefaultConfig>::new(
//!     node_id, Role::Sensor, transport, random, clock, sensor,
//! );
//!
//! spawn(async move { node.run().await });
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Packets, frames, events, constants
//! - [`wire`] - Fixed-width big-endian packet codec
//! - [`traits`] - Transport, Clock, Random, Sensor traits
//! - [`node`] - Main Node struct and public API
//! - [`tree`] - Tree formation, loss detection and repair
//! - [`aggregate`] - Per-epoch max/average aggregation
//! - [`scheduler`] - Beacon, bootstrap and flush deadlines
//! - [`time`] - Timestamp and Duration types
//! - [`config`] - Compile-time timing profiles

#![no_std]

#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It only provides mock collaborators for tests and simulation."
);

extern crate alloc;

pub mod aggregate;
pub mod config;
pub mod node;
pub mod scheduler;
pub mod time;
pub mod traits;
pub mod tree;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use aggregate::EpochAccumulator;
pub use config::{DefaultConfig, FastConfig, ProtocolConfig};
pub use node::{NeighborInfo, Node};
pub use scheduler::EpochScheduler;
pub use time::{Duration, Timestamp};
pub use traits::{Clock, Random, Sensor, Transport};
pub use types::{
    Command, DataAvgMsg, DataMaxMsg, Destination, EpochReport, Event, Frame, Incoming, NodeId,
    NodeMetrics, Payload, Role, RoutingMsg, SendError, TreeState,
};
pub use wire::{Decode, DecodeError, Encode, Message};

// Re-export constants
pub use types::{
    AM_AVGMSG, AM_MAXMSG, AM_ROUTINGMSG, AM_SIMPLEROUTINGTREEMSG, MAX_DEPTH, RECEIVER_QUEUE_SIZE,
    ROOT_DEPTH, SENDER_QUEUE_SIZE,
};
