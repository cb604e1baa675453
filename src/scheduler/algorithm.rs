//! Load-balancing algorithms.
//!
//! The balancer decides whom to steal from and keeps track of requests in
//! flight; it never touches the network itself. Each client iteration the
//! runtime asks for a [`ClientPlan`], performs the sends it names and reports
//! replies and crashes back through the `*_reply` and crash hooks.
//!
//! | Algorithm | Sync requests | Async requests |
//! |-----------|---------------|----------------|
//! | `Random` | one random peer per iteration | never |
//! | `ClusterAware` | one random peer of the own cluster | at most one to a remote cluster |
//! | `MasterWorker` | blocking request to the master (workers only) | never |

use crate::config::Algorithm;
use crate::protocol::StealKind;
use crate::scheduler::victims::VictimTable;
use crate::types::{NodeId, RecordId};
use crate::util::DetRng;

/// A synchronous (or blocking) steal request waiting for its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSteal {
    victim: NodeId,
    reply: Option<Option<RecordId>>,
    victim_crashed: bool,
}

impl SyncSteal {
    /// Node the request went to.
    #[must_use]
    pub fn victim(&self) -> &NodeId {
        &self.victim
    }
}

/// The single outstanding wide-area steal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncSteal {
    victim: NodeId,
    reply: Option<Option<RecordId>>,
}

impl AsyncSteal {
    /// Node the request went to.
    #[must_use]
    pub fn victim(&self) -> &NodeId {
        &self.victim
    }
}

/// What one client iteration should do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientPlan {
    /// A job delivered by an earlier asynchronous request, ready to run.
    pub ready: Option<RecordId>,
    /// Issue an asynchronous request to this node.
    pub async_victim: Option<NodeId>,
    /// Issue a request of this kind to this node and wait for the reply.
    pub sync_victim: Option<(NodeId, StealKind)>,
}

impl ClientPlan {
    /// True if the plan does nothing.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.ready.is_none() && self.async_victim.is_none() && self.sync_victim.is_none()
    }
}

/// Steal bookkeeping for one node.
#[derive(Debug)]
pub struct LoadBalancer {
    algorithm: Algorithm,
    sync: Option<SyncSteal>,
    async_steal: Option<AsyncSteal>,
}

impl LoadBalancer {
    /// Balancer running `algorithm`.
    #[must_use]
    pub const fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            sync: None,
            async_steal: None,
        }
    }

    /// The configured algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Plans one client iteration.
    ///
    /// `master` is the current master; `is_master` tells whether that is
    /// this node. A cluster-aware plan hands out a finished asynchronous
    /// reply first and only then issues new requests.
    pub fn plan(
        &mut self,
        victims: &VictimTable,
        rng: &mut DetRng,
        master: Option<&NodeId>,
        is_master: bool,
    ) -> ClientPlan {
        let mut plan = ClientPlan::default();
        match self.algorithm {
            Algorithm::Random => {
                plan.sync_victim = victims
                    .random_victim(rng)
                    .map(|victim| (victim, StealKind::Sync));
            }
            Algorithm::ClusterAware => {
                if let Some(job) = self.take_async_reply() {
                    if job.is_some() {
                        plan.ready = job;
                        return plan;
                    }
                }
                if self.async_steal.is_none() {
                    if let Some(victim) = victims.random_remote_victim(rng) {
                        self.async_steal = Some(AsyncSteal {
                            victim: victim.clone(),
                            reply: None,
                        });
                        plan.async_victim = Some(victim);
                    }
                }
                plan.sync_victim = victims
                    .random_local_victim(rng)
                    .map(|victim| (victim, StealKind::Sync));
            }
            Algorithm::MasterWorker => {
                if !is_master {
                    plan.sync_victim = master
                        .filter(|m| victims.contains(m))
                        .map(|m| (m.clone(), StealKind::Blocking));
                }
            }
        }
        plan
    }

    // ------------------------------------------------------------------
    // Synchronous requests
    // ------------------------------------------------------------------

    /// Records that a synchronous request to `victim` is in flight.
    pub fn begin_sync(&mut self, victim: NodeId) {
        self.sync = Some(SyncSteal {
            victim,
            reply: None,
            victim_crashed: false,
        });
    }

    /// The synchronous request in flight, if any.
    #[must_use]
    pub fn sync_steal(&self) -> Option<&SyncSteal> {
        self.sync.as_ref()
    }

    /// True once the pending synchronous request got a reply or its victim
    /// crashed.
    #[must_use]
    pub fn sync_settled(&self) -> bool {
        self.sync
            .as_ref()
            .map_or(true, |s| s.reply.is_some() || s.victim_crashed)
    }

    /// Delivers a synchronous reply.
    ///
    /// Returns the job back as `Err` when nobody waits for a reply from
    /// `from`; the caller then keeps the job as ordinary work.
    pub fn sync_reply(
        &mut self,
        from: &NodeId,
        job: Option<RecordId>,
    ) -> Result<(), Option<RecordId>> {
        match self.sync.as_mut() {
            Some(pending) if &pending.victim == from && pending.reply.is_none() => {
                pending.reply = Some(job);
                Ok(())
            }
            _ => Err(job),
        }
    }

    /// Ends the synchronous request, returning the stolen job, if any.
    pub fn end_sync(&mut self) -> Option<RecordId> {
        self.sync.take().and_then(|s| s.reply).flatten()
    }

    // ------------------------------------------------------------------
    // Asynchronous requests
    // ------------------------------------------------------------------

    /// True while an asynchronous request is unanswered or its answer has
    /// not been collected yet.
    #[must_use]
    pub fn async_in_progress(&self) -> bool {
        self.async_steal.is_some()
    }

    /// The asynchronous request, if any.
    #[must_use]
    pub fn async_steal(&self) -> Option<&AsyncSteal> {
        self.async_steal.as_ref()
    }

    /// Forgets an asynchronous request whose send failed.
    pub fn abandon_async(&mut self) {
        self.async_steal = None;
    }

    /// Delivers an asynchronous reply; `Err` gives back a late job.
    pub fn async_reply(
        &mut self,
        from: &NodeId,
        job: Option<RecordId>,
    ) -> Result<(), Option<RecordId>> {
        match self.async_steal.as_mut() {
            Some(pending) if &pending.victim == from && pending.reply.is_none() => {
                pending.reply = Some(job);
                Ok(())
            }
            _ => Err(job),
        }
    }

    /// Collects a finished asynchronous request. `None` while none is
    /// finished; `Some(None)` for a failed steal.
    pub fn take_async_reply(&mut self) -> Option<Option<RecordId>> {
        if self.async_steal.as_ref()?.reply.is_none() {
            return None;
        }
        self.async_steal.take().and_then(|s| s.reply)
    }

    // ------------------------------------------------------------------
    // Crash hooks
    // ------------------------------------------------------------------

    /// Unblocks a synchronous request to a crashed node.
    pub fn sync_victim_crashed(&mut self, node: &NodeId) -> bool {
        match self.sync.as_mut() {
            Some(pending) if &pending.victim == node => {
                pending.victim_crashed = true;
                true
            }
            _ => false,
        }
    }

    /// Cancels the asynchronous request if it went to `node`.
    ///
    /// A job that already arrived from the crashed node is handed back so
    /// the caller can drop it: whoever owned it will redo it.
    pub fn check_async_victim_crash(&mut self, node: &NodeId) -> Option<RecordId> {
        match &self.async_steal {
            Some(pending) if &pending.victim == node => {
                let stale = self.async_steal.take().and_then(|s| s.reply).flatten();
                tracing::debug!(victim = %node, stale = stale.is_some(), "async steal victim crashed");
                stale
            }
            _ => None,
        }
    }

    /// Both crash hooks at once; returns a stale asynchronous job.
    pub fn victim_crashed(&mut self, node: &NodeId) -> Option<RecordId> {
        self.sync_victim_crashed(node);
        self.check_async_victim_crash(node)
    }

    /// Drops all request state on shutdown.
    pub fn exit(&mut self) -> Option<RecordId> {
        self.sync = None;
        self.async_steal.take().and_then(|s| s.reply).flatten()
    }
}
