//! The scheduler state of one node.
//!
//! Everything the worker thread and the message handlers share lives in one
//! [`SchedulerState`] behind one mutex: records and counters, the queue, the
//! stack, the outstanding list, the victim table, the balancer, the global
//! result table and the delayed-message lists. Every method here assumes the
//! caller holds that lock; none of them blocks.
//!
//! The abort protocol and crash handling add their own `impl` blocks in
//! [`crate::aborts`] and [`crate::ft`].

use crate::aborts::DelayedMessages;
use crate::config::{SatinConfig, ViolationResponse};
use crate::error::{Error, RecoveryAction, Result};
use crate::ft::table::{GlobalResultTable, TableKey};
use crate::protocol::Message;
use crate::record::{InvocationRecord, RecordTable, WireRecord};
use crate::scheduler::{IrStack, IrVector, JobQueue, LoadBalancer, VictimTable};
use crate::transport::Transport;
use crate::types::{NodeId, RecordId};
use crate::util::DetRng;
use core::fmt;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

/// Panic payload of the fail-fast path.
///
/// The runtime turns panics inside computations into job failures, except
/// this one: a broken scheduler invariant always unwinds to the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyViolation {
    message: String,
}

impl ConsistencyViolation {
    /// What was violated.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub(crate) struct SchedulerState {
    pub(crate) me: NodeId,
    pub(crate) config: SatinConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) records: RecordTable,
    pub(crate) queue: JobQueue,
    pub(crate) stack: IrStack,
    pub(crate) outstanding: IrVector,
    pub(crate) victims: VictimTable,
    pub(crate) balancer: LoadBalancer,
    pub(crate) table: Option<GlobalResultTable>,
    pub(crate) delayed: DelayedMessages,
    pub(crate) rng: DetRng,
    pub(crate) master: NodeId,
    pub(crate) is_master: bool,
    /// Set when this node won a re-election; cleared by `run_worker`.
    pub(crate) became_master: bool,
    /// Roots run from now on replay from the table.
    pub(crate) restarted: bool,
    pub(crate) got_table: bool,
    pub(crate) exiting: bool,
    pub(crate) disconnected: bool,
    pub(crate) exit_replies: BTreeSet<NodeId>,
    pub(crate) barrier_requests: BTreeSet<NodeId>,
    pub(crate) barrier_released: bool,
    pub(crate) root_sequence: u32,
    /// Jobs handed back after the thief running them went away.
    pub(crate) recovered: u64,
    pub(crate) started: Instant,
}

impl SchedulerState {
    pub(crate) fn new(config: SatinConfig, transport: Arc<dyn Transport>, master: NodeId) -> Self {
        let me = transport.local_id().clone();
        let hint = config.queue_size_hint;
        let table = config
            .uses_table()
            .then(|| GlobalResultTable::new(me.clone(), config.table_mode));
        Self {
            victims: VictimTable::new(me.clone(), Arc::clone(transport.cluster())),
            rng: DetRng::for_node(config.seed, me.as_str()),
            is_master: master == me,
            balancer: LoadBalancer::new(config.algorithm),
            records: RecordTable::with_capacity(hint),
            queue: JobQueue::with_capacity(hint),
            stack: IrStack::default(),
            outstanding: IrVector::with_capacity(hint),
            table,
            delayed: DelayedMessages::default(),
            master,
            became_master: false,
            restarted: false,
            got_table: false,
            exiting: false,
            disconnected: false,
            exit_replies: BTreeSet::new(),
            barrier_requests: BTreeSet::new(),
            barrier_released: false,
            root_sequence: 0,
            recovered: 0,
            started: Instant::now(),
            me,
            config,
            transport,
        }
    }

    /// Sends a message; a failed send is logged and reported as `false`.
    ///
    /// The transport announces the crash of an unreachable peer on its own,
    /// so a failed send needs no recovery of its own here.
    pub(crate) fn send(&self, to: &NodeId, message: Message) -> bool {
        let opcode = message.opcode();
        match self.transport.send(to, message) {
            Ok(()) => {
                tracing::trace!(node = %self.me, to = %to, %opcode, "sent");
                true
            }
            Err(err) => {
                tracing::debug!(node = %self.me, to = %to, %opcode, error = %err, "send failed");
                false
            }
        }
    }

    /// Decodes a frame from a byte transport. An unknown opcode goes to
    /// fail-fast; a malformed frame is dropped.
    pub(crate) fn decode_frame(&self, from: &NodeId, bytes: &[u8]) -> Option<Message> {
        match Message::decode(bytes) {
            Ok(message) => Some(message),
            Err(err) if err.kind().recovery_action() == RecoveryAction::FailFast => {
                self.fail_fast(&err.with_node(from))
            }
            Err(err) => {
                tracing::warn!(node = %self.me, from = %from, error = %err, "malformed frame dropped");
                None
            }
        }
    }

    /// True if the next steal request should ask for the table.
    pub(crate) fn wants_table(&self) -> bool {
        self.table.is_some() && !self.is_master && !self.got_table
    }

    pub(crate) fn adopt(&mut self, wire: WireRecord) -> RecordId {
        self.records
            .insert_with(|id| InvocationRecord::from_wire(id, wire))
    }

    /// Settles a finished local job: one decrement of its counter, a place
    /// on the parent's finished list, and the release of its own children.
    ///
    /// Settling a job twice is a consistency violation.
    pub(crate) fn complete_local(&mut self, id: RecordId) -> Result<()> {
        self.records.decrement(id)?;
        let parent = self.records.get(id).and_then(|r| r.parent);
        if let Some(parent) = parent.and_then(|p| self.records.get_mut(p)) {
            parent.finished_children.push(id);
        }
        self.release_frame(id);
        Ok(())
    }

    /// Retires the children and counters of a frame that ended.
    pub(crate) fn release_frame(&mut self, id: RecordId) {
        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        let children = std::mem::take(&mut record.children);
        let counters = std::mem::take(&mut record.counters);
        record.finished_children.clear();
        record.to_be_restarted.clear();
        for child in children {
            self.records.retire(child);
        }
        for counter in counters {
            if !self.records.release_counter(counter) {
                tracing::warn!(
                    node = %self.me,
                    value = self.records.counter_value(counter),
                    "frame ended with a pending spawn counter"
                );
            }
        }
    }

    /// The table key of a record under the configured scheme.
    pub(crate) fn table_key(&self, id: RecordId) -> Option<TableKey> {
        let record = self.records.get(id)?;
        Some(match self.config.table_key {
            crate::config::TableKeyScheme::Stamp => TableKey::Stamp(record.stamp.clone()),
            crate::config::TableKeyScheme::Invocation => TableKey::Invocation {
                computation: record.computation.to_string(),
                params: record.params.clone(),
            },
        })
    }

    // ------------------------------------------------------------------
    // Fail-fast
    // ------------------------------------------------------------------

    pub(crate) fn enforce(&self, result: Result<()>) {
        if let Err(err) = result {
            self.fail_fast(&err);
        }
    }

    /// Logs the scheduler state and applies the configured
    /// [`ViolationResponse`].
    pub(crate) fn fail_fast(&self, err: &Error) -> ! {
        let message = format!("consistency violation on {}: {err}", self.me);
        tracing::error!(
            node = %self.me,
            kind = ?err.kind(),
            stamp = ?err.context().stamp,
            queue = self.queue.len(),
            stack = self.stack.len(),
            outstanding = self.outstanding.len(),
            counters = self.records.live_counters(),
            dump = %self.dump(),
            "consistency violation (fail-fast)"
        );
        match self.config.violation_response {
            ViolationResponse::Panic => std::panic::panic_any(ConsistencyViolation { message }),
            ViolationResponse::Exit => std::process::exit(1),
        }
    }

    /// One-line rendering of the queue, stack and outstanding list.
    pub(crate) fn dump(&self) -> String {
        let mut out = String::new();
        let stamp = |id: RecordId| {
            self.records
                .stamp_of(id)
                .map_or_else(|| "?".to_string(), ToString::to_string)
        };
        out.push_str("queue=[");
        for (i, id) in self.queue.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&stamp(id));
        }
        out.push_str("] stack=[");
        for (i, id) in self.stack.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&stamp(id));
        }
        out.push_str("] outstanding=[");
        for (i, id) in self.outstanding.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let stealer = self
                .records
                .get(id)
                .and_then(InvocationRecord::stealer)
                .map_or_else(|| "?".to_string(), ToString::to_string);
            let _ = write!(out, "{}@{stealer}", stamp(id));
        }
        out.push(']');
        out
    }
}

impl fmt::Debug for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerState")
            .field("me", &self.me)
            .field("master", &self.master)
            .field("records", &self.records.len())
            .field("queue", &self.queue.len())
            .field("stack", &self.stack.len())
            .field("outstanding", &self.outstanding.len())
            .field("victims", &self.victims.len())
            .field("exiting", &self.exiting)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SatinConfig;
    use crate::error::ErrorKind;
    use crate::test_utils::{init_test_logging, insert_job};
    use crate::transport::LocalNetwork;
    use crate::types::Stamp;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn state() -> SchedulerState {
        let net = LocalNetwork::new();
        let transport = net.join("a", "vu").unwrap();
        SchedulerState::new(SatinConfig::default(), transport, NodeId::new("a"))
    }

    #[test]
    fn complete_local_settles_once_and_links_parent() {
        init_test("complete_local_settles_once_and_links_parent");
        let mut state = state();
        let me = state.me.clone();
        let root = insert_job(&mut state.records, &me, Stamp::root(0), None, false);
        let child = insert_job(&mut state.records, &me, Stamp::root(0).child(0), Some(root), true);
        state.records.get_mut(root).unwrap().children.push(child);

        state.complete_local(child).unwrap();
        let finished = &state.records.get(root).unwrap().finished_children;
        crate::assert_with_log!(finished.len() == 1, "linked to parent", 1, finished.len());
        assert!(state.records.get(child).unwrap().has_decremented());
        let again = state.records.decrement(child).unwrap_err();
        assert_eq!(again.kind(), ErrorKind::DoubleDecrement);
        crate::test_complete!("complete_local_settles_once_and_links_parent");
    }

    #[test]
    fn second_completion_is_a_violation() {
        init_test("second_completion_is_a_violation");
        let mut state = state();
        let me = state.me.clone();
        let job = insert_job(&mut state.records, &me, Stamp::root(0).child(0), None, true);
        state.complete_local(job).unwrap();

        let err = state.complete_local(job).unwrap_err();
        crate::assert_with_log!(
            err.kind() == ErrorKind::DoubleDecrement,
            "double settlement surfaces",
            ErrorKind::DoubleDecrement,
            err.kind()
        );
        crate::test_complete!("second_completion_is_a_violation");
    }

    #[test]
    fn fail_fast_panics_with_violation_payload() {
        init_test("fail_fast_panics_with_violation_payload");
        let mut state = state();
        let me = state.me.clone();
        let job = insert_job(&mut state.records, &me, Stamp::root(0).child(3), None, false);
        state.queue.add_to_head(job);
        let err = Error::new(ErrorKind::CounterUnderflow).with_stamp(&Stamp::root(0));

        let payload = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            state.fail_fast(&err);
        }))
        .unwrap_err();
        let violation = payload.downcast_ref::<ConsistencyViolation>().unwrap();
        assert!(violation.message().contains("CounterUnderflow"));
        assert_eq!(state.dump(), "queue=[0.3] stack=[] outstanding=[]");
        crate::test_complete!("fail_fast_panics_with_violation_payload");
    }

    #[test]
    fn table_follows_fault_tolerance_mode() {
        init_test("table_follows_fault_tolerance_mode");
        let net = LocalNetwork::new();
        let transport = net.join("a", "vu").unwrap();
        let config = SatinConfig::builder()
            .fault_tolerance(crate::config::FaultTolerance::Naive)
            .build();
        let state = SchedulerState::new(config, transport, NodeId::new("b"));
        assert!(state.table.is_none());
        assert!(!state.is_master);
        assert!(!state.wants_table());
        crate::test_complete!("table_follows_fault_tolerance_mode");
    }
}
