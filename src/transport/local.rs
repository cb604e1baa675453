//! In-process network.
//!
//! Each member gets an inbox: a lock-free queue plus a condvar for blocking
//! receives. Sends to a crashed or departed member fail; membership changes
//! are broadcast to every live member after the change takes effect, so a
//! node learns of a crash only after the crashed node stopped accepting
//! messages.

use super::{Inbound, Registry, Transport};
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{Message, Opcode};
use crate::types::{ClusterName, NodeId};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inbox {
    queue: SegQueue<Inbound>,
    closed: Mutex<bool>,
    ready: Condvar,
}

impl Inbox {
    fn push(&self, event: Inbound) {
        self.queue.push(event);
        let _guard = self.closed.lock();
        self.ready.notify_one();
    }

    fn close(&self) {
        let mut closed = self.closed.lock();
        *closed = true;
        self.ready.notify_all();
    }

    fn pop(&self) -> Option<Inbound> {
        if *self.closed.lock() {
            return Some(Inbound::Closed);
        }
        self.queue.pop()
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<Inbound> {
        let deadline = Instant::now() + timeout;
        let mut closed = self.closed.lock();
        loop {
            if *closed {
                return Some(Inbound::Closed);
            }
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.ready.wait_until(&mut closed, deadline).timed_out() {
                return self.queue.pop();
            }
        }
    }
}

#[derive(Debug)]
struct Member {
    cluster: ClusterName,
    inbox: Arc<Inbox>,
    alive: bool,
}

/// Message counters of a [`LocalNetwork`].
#[derive(Debug, Default, Clone)]
pub struct NetworkMetrics {
    /// Messages delivered to an inbox.
    pub delivered: u64,
    /// Sends that failed because an endpoint was gone.
    pub failed: u64,
    /// Delivered messages per opcode.
    pub by_opcode: HashMap<Opcode, u64>,
}

impl NetworkMetrics {
    /// Delivered messages with the given opcode.
    #[must_use]
    pub fn count(&self, opcode: Opcode) -> u64 {
        self.by_opcode.get(&opcode).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct Hub {
    members: Mutex<BTreeMap<NodeId, Member>>,
    roles: Mutex<HashMap<String, NodeId>>,
    metrics: Mutex<NetworkMetrics>,
}

impl Hub {
    fn depart(&self, node: &NodeId, crashed: bool) {
        let mut members = self.members.lock();
        let Some(member) = members.get_mut(node) else {
            return;
        };
        if !member.alive {
            return;
        }
        member.alive = false;
        member.inbox.close();
        for (id, other) in members.iter() {
            if other.alive && id != node {
                other.inbox.push(if crashed {
                    Inbound::Died(node.clone())
                } else {
                    Inbound::Left(node.clone())
                });
            }
        }
        drop(members);
        if crashed {
            tracing::warn!(node = %node, "node crashed");
        } else {
            tracing::info!(node = %node, "node left");
        }
    }

    fn is_alive(&self, node: &NodeId) -> bool {
        self.members.lock().get(node).is_some_and(|m| m.alive)
    }
}

/// An in-process network of Satin nodes.
#[derive(Debug, Clone, Default)]
pub struct LocalNetwork {
    hub: Arc<Hub>,
}

impl LocalNetwork {
    /// An empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. Existing members learn about it, and it learns about
    /// them, through `Joined` events.
    pub fn join(&self, name: &str, cluster: &str) -> Result<Arc<LocalTransport>> {
        let me = NodeId::new(name);
        let cluster = ClusterName::from(cluster);
        let inbox = Arc::new(Inbox::default());
        let mut members = self.hub.members.lock();
        if members.get(&me).is_some_and(|m| m.alive) {
            return Err(Error::new(ErrorKind::Config)
                .with_message(format!("node {me} already joined"))
                .with_node(&me));
        }
        for (id, other) in members.iter().filter(|(_, m)| m.alive) {
            other.inbox.push(Inbound::Joined {
                node: me.clone(),
                cluster: cluster.clone(),
            });
            inbox.push(Inbound::Joined {
                node: id.clone(),
                cluster: other.cluster.clone(),
            });
        }
        members.insert(
            me.clone(),
            Member {
                cluster: cluster.clone(),
                inbox: Arc::clone(&inbox),
                alive: true,
            },
        );
        drop(members);
        tracing::debug!(node = %me, cluster = %cluster, "node joined");
        Ok(Arc::new(LocalTransport {
            hub: Arc::clone(&self.hub),
            me,
            cluster,
            inbox,
        }))
    }

    /// Crashes a node: its inbox closes and every other member gets `Died`.
    pub fn crash(&self, node: &NodeId) {
        self.hub.depart(node, true);
    }

    /// True if the node is a live member.
    #[must_use]
    pub fn is_alive(&self, node: &NodeId) -> bool {
        self.hub.is_alive(node)
    }

    /// Snapshot of the message counters.
    #[must_use]
    pub fn metrics(&self) -> NetworkMetrics {
        self.hub.metrics.lock().clone()
    }

    /// The election service of this network.
    #[must_use]
    pub fn registry(&self) -> Arc<dyn Registry> {
        Arc::new(self.clone())
    }
}

impl Registry for LocalNetwork {
    fn elect(&self, role: &str, candidate: &NodeId) -> Result<NodeId> {
        let mut roles = self.hub.roles.lock();
        if let Some(holder) = roles.get(role) {
            if self.hub.is_alive(holder) {
                return Ok(holder.clone());
            }
        }
        if !self.hub.is_alive(candidate) {
            return Err(Error::new(ErrorKind::ElectionFailed)
                .with_message(format!("candidate {candidate} for {role} is not alive"))
                .with_node(candidate));
        }
        roles.insert(role.to_string(), candidate.clone());
        tracing::info!(role, holder = %candidate, "role elected");
        Ok(candidate.clone())
    }

    fn maybe_dead(&self, node: &NodeId) {
        if !self.hub.is_alive(node) {
            self.hub.roles.lock().retain(|_, holder| holder != node);
        }
    }
}

/// One node's endpoint on a [`LocalNetwork`].
#[derive(Debug)]
pub struct LocalTransport {
    hub: Arc<Hub>,
    me: NodeId,
    cluster: ClusterName,
    inbox: Arc<Inbox>,
}

impl Transport for LocalTransport {
    fn local_id(&self) -> &NodeId {
        &self.me
    }

    fn cluster(&self) -> &ClusterName {
        &self.cluster
    }

    fn send(&self, to: &NodeId, message: Message) -> Result<()> {
        let opcode = message.opcode();
        let members = self.hub.members.lock();
        let sender_alive = members.get(&self.me).is_some_and(|m| m.alive);
        let target = members.get(to).filter(|m| m.alive && sender_alive);
        let Some(target) = target else {
            drop(members);
            self.hub.metrics.lock().failed += 1;
            return Err(Error::connection_lost(to));
        };
        target.inbox.push(Inbound::Message {
            from: self.me.clone(),
            message,
        });
        drop(members);
        let mut metrics = self.hub.metrics.lock();
        metrics.delivered += 1;
        *metrics.by_opcode.entry(opcode).or_insert(0) += 1;
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> Option<Inbound> {
        self.inbox.pop_timeout(timeout)
    }

    fn try_recv(&self) -> Option<Inbound> {
        self.inbox.pop()
    }

    fn leave(&self) {
        self.hub.depart(&self.me, false);
    }

    fn crash(&self) {
        self.hub.depart(&self.me, true);
    }
}

impl LocalTransport {
    /// Delivers undecoded bytes, the way a byte-stream transport would.
    pub fn send_frame(&self, to: &NodeId, bytes: Vec<u8>) -> Result<()> {
        let members = self.hub.members.lock();
        let Some(target) = members.get(to).filter(|m| m.alive) else {
            drop(members);
            self.hub.metrics.lock().failed += 1;
            return Err(Error::connection_lost(to));
        };
        target.inbox.push(Inbound::Frame {
            from: self.me.clone(),
            bytes,
        });
        drop(members);
        self.hub.metrics.lock().delivered += 1;
        Ok(())
    }
}
