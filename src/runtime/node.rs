//! The `Satin` orchestrator.

use super::handler;
use super::state::SchedulerState;
use super::worker::{call_satin_function, client_iteration, idle, poll_inbox, wait};
use crate::computation::ComputationRegistry;
use crate::config::{Delivery, SatinConfig};
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::ft::table::{TableKey, TableValue};
use crate::protocol::Message;
use crate::record::InvocationRecord;
use crate::transport::{Inbound, Registry, Transport};
use crate::types::{NodeId, Payload, Stamp};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Registry role held by the master node.
pub const MASTER_ROLE: &str = "satin master";

/// How long the upcall thread blocks on the transport between stop checks.
const UPCALL_SLICE: Duration = Duration::from_millis(50);

/// Longest single wait inside a waiting loop.
pub(crate) const WAIT_SLICE: Duration = Duration::from_millis(10);

pub(crate) type Guard<'a> = MutexGuard<'a, SchedulerState>;

/// State shared by the worker thread, the upcall thread and blocking steal
/// servers.
pub(crate) struct Shared {
    pub(crate) me: NodeId,
    pub(crate) config: SatinConfig,
    pub(crate) state: Mutex<SchedulerState>,
    pub(crate) cond: Condvar,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) computations: ComputationRegistry,
    pub(crate) stop: AtomicBool,
}

impl Shared {
    pub(crate) fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) const fn polling(&self) -> bool {
        matches!(self.config.delivery, Delivery::Polling)
    }
}

/// Why [`Satin::run_worker`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The master ended the computation.
    Exited,
    /// The master crashed and this node was elected in its place; the caller
    /// should run the root computation again.
    BecameMaster,
    /// This node lost its connection to the computation.
    Disconnected,
}

/// Snapshot of a node's scheduler bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Jobs waiting in the queue.
    pub queued: usize,
    /// Frames on the running stack.
    pub running: usize,
    /// Jobs out on other nodes.
    pub outstanding: usize,
    /// Live invocation records.
    pub records: usize,
    /// Spawn counters not yet released.
    pub live_counters: usize,
    /// Jobs handed back after their thief crashed or left.
    pub recovered: u64,
}

/// One node of a Satin computation.
///
/// The master runs root jobs with [`Satin::run_root`]; every other node
/// calls [`Satin::run_worker`] and executes whatever it steals until the
/// master ends the computation.
pub struct Satin {
    shared: Arc<Shared>,
    upcalls: Option<JoinHandle<()>>,
}

impl Satin {
    /// Joins the computation through `transport` and elects the master.
    pub fn new(
        config: SatinConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn Registry>,
        computations: ComputationRegistry,
    ) -> Result<Self> {
        let mut config = config;
        config.normalize();
        let me = transport.local_id().clone();
        let master = registry
            .elect(MASTER_ROLE, &me)
            .context(format!("electing the master from {me}"))?;
        let state = SchedulerState::new(config.clone(), Arc::clone(&transport), master.clone());
        tracing::info!(
            node = %me,
            master = %master,
            algorithm = ?config.algorithm,
            fault_tolerance = ?config.fault_tolerance,
            delivery = ?config.delivery,
            "satin node started"
        );
        let shared = Arc::new(Shared {
            me,
            config,
            state: Mutex::new(state),
            cond: Condvar::new(),
            transport,
            registry,
            computations,
            stop: AtomicBool::new(false),
        });
        let upcalls = if shared.polling() {
            None
        } else {
            Some(spawn_upcall_thread(&shared)?)
        };
        Ok(Self { shared, upcalls })
    }

    /// This node.
    #[must_use]
    pub fn node(&self) -> &NodeId {
        &self.shared.me
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> &SatinConfig {
        &self.shared.config
    }

    /// True if this node is the master.
    #[must_use]
    pub fn is_master(&self) -> bool {
        self.shared.state.lock().is_master
    }

    /// The current master.
    #[must_use]
    pub fn master(&self) -> NodeId {
        self.shared.state.lock().master.clone()
    }

    /// Peers currently in the victim table.
    #[must_use]
    pub fn peers(&self) -> Vec<NodeId> {
        self.shared.state.lock().victims.nodes().to_vec()
    }

    /// What the global result table holds for `key` on this node.
    #[must_use]
    pub fn table_lookup(&self, key: &TableKey) -> Option<TableValue> {
        let state = self.shared.state.lock();
        state.table.as_ref()?.lookup(key).cloned()
    }

    /// Current scheduler bookkeeping.
    #[must_use]
    pub fn stats(&self) -> NodeStats {
        let state = self.shared.state.lock();
        NodeStats {
            queued: state.queue.len(),
            running: state.stack.len(),
            outstanding: state.outstanding.len(),
            records: state.records.len(),
            live_counters: state.records.live_counters(),
            recovered: state.recovered,
        }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Runs a root job on the master and returns its result.
    ///
    /// A failure that escapes every inlet comes back as an `Unhandled`
    /// error. After this node took over from a crashed master, the root is
    /// replayed: finished subtrees found in the result table are not
    /// recomputed.
    pub fn run_root(&self, computation: &str, params: Payload) -> Result<Payload> {
        let shared = &self.shared;
        let Some(name) = shared.computations.name(computation) else {
            return Err(Error::config(format!("unknown computation {computation:?}")));
        };
        let mut state = shared.state.lock();
        if !state.is_master {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_message(format!("root job on {} which is not the master", state.me)));
        }
        if state.exiting {
            return Err(Error::new(ErrorKind::Exiting).with_node(&state.me));
        }
        wait_for_pool(shared, &mut state)?;

        let stamp = Stamp::root(state.root_sequence);
        state.root_sequence += 1;
        let me = state.me.clone();
        let re_done = state.restarted;
        let id = state.records.insert_with(|id| {
            let mut record = InvocationRecord::new(id, stamp.clone(), me, name, params);
            record.re_done = re_done;
            record
        });
        tracing::info!(node = %state.me, stamp = %stamp, computation, re_done, "root job started");
        call_satin_function(shared, &mut state, id);

        let outcome = if state.disconnected {
            Err(Error::new(ErrorKind::Exiting)
                .with_message("node disconnected during the root job")
                .with_node(&state.me))
        } else {
            match state.records.get(id) {
                Some(record) => match (&record.eek, &record.result) {
                    (Some(failure), _) => Err(Error::unhandled(failure).with_stamp(&stamp)),
                    (None, Some(value)) => Ok(value.clone()),
                    (None, None) => Err(Error::new(ErrorKind::InvalidState)
                        .with_message("root job aborted")
                        .with_stamp(&stamp)),
                },
                None => Err(Error::new(ErrorKind::InvalidState)
                    .with_message("root record vanished")
                    .with_stamp(&stamp)),
            }
        };
        state.records.retire(id);
        match &outcome {
            Ok(_) => tracing::info!(node = %state.me, stamp = %stamp, "root job finished"),
            Err(err) => tracing::warn!(node = %state.me, stamp = %stamp, error = %err, "root job failed"),
        }
        outcome
    }

    /// Steals and runs jobs until the computation ends for this node.
    pub fn run_worker(&self) -> WorkerExit {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        tracing::debug!(node = %state.me, "worker loop started");
        let exit = loop {
            if shared.polling() {
                poll_inbox(shared, &mut state, Duration::ZERO);
            }
            state.process_delayed();
            if state.became_master {
                state.became_master = false;
                break WorkerExit::BecameMaster;
            }
            if state.disconnected {
                break WorkerExit::Disconnected;
            }
            if state.exiting {
                break WorkerExit::Exited;
            }
            let job = match state.queue.get_from_head() {
                Some(job) => Some(job),
                None => client_iteration(shared, &mut state),
            };
            match job {
                Some(job) => call_satin_function(shared, &mut state, job),
                None => idle(shared, &mut state),
            }
        };
        tracing::info!(node = %state.me, exit = ?exit, "worker loop ended");
        exit
    }

    /// Blocks until every node reached the barrier.
    pub fn barrier(&self) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.is_master {
            wait_for_pool(shared, &mut state)?;
            loop {
                if state.disconnected {
                    return Err(Error::new(ErrorKind::Exiting).with_node(&state.me));
                }
                state.process_delayed();
                let ready = state
                    .victims
                    .nodes()
                    .iter()
                    .all(|v| state.barrier_requests.contains(v));
                if ready {
                    break;
                }
                wait(shared, &mut state, WAIT_SLICE);
            }
            let waiting = std::mem::take(&mut state.barrier_requests);
            tracing::debug!(node = %state.me, workers = waiting.len(), "barrier released");
            for worker in &waiting {
                state.send(worker, Message::BarrierReply);
            }
            return Ok(());
        }

        let master = state.master.clone();
        state.barrier_released = false;
        if !state.send(&master, Message::BarrierRequest) {
            return Err(Error::node_unavailable(&master));
        }
        while !state.barrier_released {
            if state.exiting || state.disconnected {
                return Err(Error::new(ErrorKind::Exiting).with_node(&state.me));
            }
            if state.master != master {
                return Err(Error::node_unavailable(&master));
            }
            wait(shared, &mut state, WAIT_SLICE);
        }
        Ok(())
    }

    /// Handles pending messages. Only needed with polling delivery, from
    /// code that runs outside jobs for a long time.
    pub fn poll(&self) {
        let mut state = self.shared.state.lock();
        if self.shared.polling() {
            poll_inbox(&self.shared, &mut state, Duration::ZERO);
        }
        state.process_delayed();
    }

    /// Leaves the computation. The master first tells every worker to stop
    /// and waits, bounded by the exit timeout, for their replies.
    pub fn exit(self) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        state.exiting = true;
        if state.is_master && !state.disconnected {
            let peers = state.victims.nodes().to_vec();
            for peer in &peers {
                state.send(peer, Message::Exit);
            }
            shared.cond.notify_all();
            let deadline = Instant::now() + shared.config.exit_timeout;
            loop {
                let missing = state
                    .victims
                    .nodes()
                    .iter()
                    .filter(|v| !state.exit_replies.contains(*v))
                    .count();
                if missing == 0 {
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    tracing::warn!(node = %state.me, missing, "exit replies missing");
                    break;
                }
                wait(shared, &mut state, (deadline - now).min(WAIT_SLICE));
            }
        }
        if let Some(stale) = state.balancer.exit() {
            state.records.retire(stale);
        }
        shared.cond.notify_all();
        if !state.disconnected {
            state.transport.leave();
            state.disconnected = true;
        }
        tracing::info!(node = %state.me, "node exited");
    }
}

impl Drop for Satin {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.cond.notify_all();
        if let Some(handle) = self.upcalls.take() {
            if handle.join().is_err() {
                tracing::error!(node = %self.shared.me, "upcall thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Satin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Satin")
            .field("node", &self.shared.me)
            .field("delivery", &self.shared.config.delivery)
            .finish_non_exhaustive()
    }
}

/// Closed world: waits until the configured number of nodes has joined.
fn wait_for_pool(shared: &Arc<Shared>, state: &mut Guard<'_>) -> Result<()> {
    let Some(size) = shared.config.closed_world else {
        return Ok(());
    };
    while state.victims.len() + 1 < size {
        if state.disconnected || shared.stopping() {
            return Err(Error::new(ErrorKind::Exiting)
                .with_message(format!("pool incomplete: {} of {size}", state.victims.len() + 1)));
        }
        wait(shared, state, WAIT_SLICE);
    }
    Ok(())
}

fn spawn_upcall_thread(shared: &Arc<Shared>) -> Result<JoinHandle<()>> {
    let shared = Arc::clone(shared);
    std::thread::Builder::new()
        .name(format!("satin-upcalls-{}", shared.me))
        .spawn(move || upcall_loop(&shared))
        .map_err(|e| {
            Error::new(ErrorKind::InvalidState)
                .with_message("spawning the upcall thread")
                .with_source(e)
        })
}

fn upcall_loop(shared: &Arc<Shared>) {
    while !shared.stopping() {
        let Some(event) = shared.transport.recv_timeout(UPCALL_SLICE) else {
            continue;
        };
        let closed = event == Inbound::Closed;
        let mut state = shared.state.lock();
        handler::handle_inbound(shared, &mut state, event);
        if closed {
            break;
        }
    }
    tracing::trace!(node = %shared.me, "upcall thread stopped");
}
