//! Boundary to the message-passing layer.
//!
//! The runtime needs reliable, per-pair FIFO channels between nodes, a way to
//! learn about joins, departures and crashes, and an election service. A
//! [`Transport`] provides the first two, a [`Registry`] the third.
//! [`local::LocalNetwork`] implements both in process.

pub mod local;

pub use local::{LocalNetwork, LocalTransport, NetworkMetrics};

use crate::error::Result;
use crate::protocol::Message;
use crate::types::{ClusterName, NodeId};
use core::fmt;
use std::time::Duration;

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A message from a peer.
    Message {
        /// Sender.
        from: NodeId,
        /// Payload.
        message: Message,
    },
    /// A raw frame from a byte transport, decoded by the runtime.
    Frame {
        /// Sender.
        from: NodeId,
        /// A [`Message`] as produced by [`Message::encode`].
        bytes: Vec<u8>,
    },
    /// A node joined the computation.
    Joined {
        /// The newcomer.
        node: NodeId,
        /// Its cluster.
        cluster: ClusterName,
    },
    /// A node left gracefully.
    Left(NodeId),
    /// A node crashed.
    Died(NodeId),
    /// This endpoint is shut; nothing more will arrive.
    Closed,
}

/// Point-to-point messaging for one node.
///
/// `send` must not wait for the receiver to process the message: the
/// scheduler sends while holding its lock.
pub trait Transport: Send + Sync + fmt::Debug {
    /// This node.
    fn local_id(&self) -> &NodeId;

    /// This node's cluster.
    fn cluster(&self) -> &ClusterName;

    /// Sends a message. Fails with `ConnectionLost` if the peer is gone.
    fn send(&self, to: &NodeId, message: Message) -> Result<()>;

    /// Next event, waiting at most `timeout`.
    fn recv_timeout(&self, timeout: Duration) -> Option<Inbound>;

    /// Next event if one is pending.
    fn try_recv(&self) -> Option<Inbound>;

    /// Leaves the computation gracefully.
    fn leave(&self);

    /// Drops off the network abruptly, as a crash would.
    fn crash(&self);
}

/// Role election.
pub trait Registry: Send + Sync + fmt::Debug {
    /// Returns the holder of `role`, making `candidate` the holder if the
    /// role is vacant.
    fn elect(&self, role: &str, candidate: &NodeId) -> Result<NodeId>;

    /// Reports that `node` may be dead, so roles it holds can be re-elected.
    fn maybe_dead(&self, node: &NodeId);
}
