//! Spawn, sync and the scheduling loop.
//!
//! Everything here runs on the worker thread with the scheduler lock held,
//! except the body of a computation: [`call_satin_function`] releases the
//! lock while user code runs and the [`Worker`] methods take it again.
//!
//! A frame ends with an implicit sync on every counter it created, so a job
//! never outlives the frame that spawned it.

use super::handler;
use super::node::{Guard, Shared, WAIT_SLICE};
use super::state::{panic_message, ConsistencyViolation};
use crate::ft::RedoOutcome;
use crate::protocol::{JobOutcome, Message, StealKind};
use crate::record::{Inlet, InvocationRecord};
use crate::types::{CounterId, Failure, JobError, NodeId, Payload, RecordId, Stamp};
use parking_lot::MutexGuard;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A spawn counter: [`Worker::sync`] waits until every job spawned on it
/// has finished, failed or been aborted.
#[derive(Debug)]
pub struct SpawnCounter {
    id: CounterId,
}

/// Handle to a spawned job, valid until the spawning frame returns.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Option<RecordId>,
    stamp: Option<Stamp>,
}

impl JobHandle {
    const fn detached() -> Self {
        Self {
            id: None,
            stamp: None,
        }
    }

    /// Stamp of the job. `None` if the job was never created because its
    /// parent had already been aborted.
    #[must_use]
    pub fn stamp(&self) -> Option<&Stamp> {
        self.stamp.as_ref()
    }
}

/// The runtime as seen from inside a computation.
pub struct Worker<'a> {
    shared: &'a Arc<Shared>,
}

impl Worker<'_> {
    /// This node.
    #[must_use]
    pub fn node(&self) -> &NodeId {
        &self.shared.me
    }

    /// A new spawn counter owned by the current frame.
    pub fn counter(&mut self) -> SpawnCounter {
        let mut state = self.shared.state.lock();
        let id = state.records.new_counter();
        if let Some(top) = state.stack.top() {
            if let Some(frame) = state.records.get_mut(top) {
                frame.counters.push(id);
            }
        }
        SpawnCounter { id }
    }

    /// Spawns `computation` with `params`. A failure of the job aborts the
    /// current frame and its other children.
    pub fn spawn(&mut self, counter: &SpawnCounter, computation: &str, params: Payload) -> JobHandle {
        self.spawn_inner(counter, computation, params, None)
    }

    /// Spawns `computation` with an inlet for its failures.
    ///
    /// The inlet runs with the scheduler lock held and must not block.
    /// Returning `Ok(())` absorbs the failure; returning `Err` aborts the
    /// current frame with the returned failure.
    pub fn spawn_with_inlet<F>(
        &mut self,
        counter: &SpawnCounter,
        computation: &str,
        params: Payload,
        inlet: F,
    ) -> JobHandle
    where
        F: Fn(&Failure) -> Result<(), Failure> + Send + Sync + 'static,
    {
        self.spawn_inner(counter, computation, params, Some(Arc::new(inlet)))
    }

    fn spawn_inner(
        &mut self,
        counter: &SpawnCounter,
        computation: &str,
        params: Payload,
        inlet: Option<Inlet>,
    ) -> JobHandle {
        let shared = self.shared;
        let mut state = shared.state.lock();
        if shared.polling() {
            poll_inbox(shared, &mut state, Duration::ZERO);
        }
        let Some(parent) = state.stack.top() else {
            return JobHandle::detached();
        };
        let me = state.me.clone();
        let Some(frame) = state.records.get_mut(parent) else {
            return JobHandle::detached();
        };
        if frame.aborted {
            return JobHandle::detached();
        }
        let stamp = frame.next_child_stamp();
        let parent_stamp = frame.stamp.clone();
        let parent_owner = frame.owner.clone();
        let re_done = frame.re_done;
        let name = shared
            .computations
            .name(computation)
            .unwrap_or_else(|| Arc::from(computation));

        let id = state.records.insert_with(|id| {
            let mut record = InvocationRecord::new(id, stamp.clone(), me, name, params);
            record.parent = Some(parent);
            record.parent_stamp = Some(parent_stamp);
            record.parent_owner = Some(parent_owner);
            record.counter = Some(counter.id);
            record.inlet = inlet;
            record.re_done = re_done;
            record
        });
        state.records.increment(counter.id);
        if let Some(frame) = state.records.get_mut(parent) {
            frame.children.push(id);
        }
        tracing::trace!(node = %state.me, stamp = %stamp, computation, "spawn");

        if re_done && state.table.is_some() {
            match state.redo_check(id) {
                RedoOutcome::Hit => {
                    tracing::debug!(node = %state.me, stamp = %stamp, "redone job answered from table");
                    let result = state.complete_local(id);
                    state.enforce(result);
                    return JobHandle {
                        id: Some(id),
                        stamp: Some(stamp),
                    };
                }
                RedoOutcome::Fetch { key, owner } => {
                    if state.fetch_remote(id, key, &owner) {
                        return JobHandle {
                            id: Some(id),
                            stamp: Some(stamp),
                        };
                    }
                }
                RedoOutcome::Miss => {}
            }
        }
        state.queue.add_to_head(id);
        if matches!(shared.config.algorithm, crate::config::Algorithm::MasterWorker) {
            shared.cond.notify_all();
        }
        JobHandle {
            id: Some(id),
            stamp: Some(stamp),
        }
    }

    /// Waits until every job spawned on `counter` has settled, running
    /// queued and stolen work meanwhile.
    ///
    /// Returns `Err(JobError::Aborted)` when the current frame was aborted;
    /// the computation should then return that error.
    pub fn sync(&mut self, counter: &SpawnCounter) -> Result<(), JobError> {
        let mut state = self.shared.state.lock();
        sync_loop(self.shared, &mut state, counter.id)
    }

    /// Result of a synced job.
    pub fn result(&self, handle: &JobHandle) -> Result<Payload, JobError> {
        let Some(id) = handle.id else {
            return Err(JobError::Aborted);
        };
        let state = self.shared.state.lock();
        let Some(record) = state
            .records
            .get(id)
            .filter(|r| Some(&r.stamp) == handle.stamp.as_ref())
        else {
            return Err(JobError::Unavailable);
        };
        if let Some(failure) = &record.eek {
            return Err(JobError::Failed(failure.clone()));
        }
        if record.aborted {
            return Err(JobError::Aborted);
        }
        record.result.clone().ok_or(JobError::Unavailable)
    }

    /// Aborts every job the current frame spawned and everything below them,
    /// wherever they run.
    pub fn abort_children(&mut self) {
        let mut state = self.shared.state.lock();
        let Some(top) = state.stack.top() else {
            return;
        };
        tracing::debug!(node = %state.me, stamp = ?state.records.stamp_of(top), "explicit abort");
        let result = state.abort_frame_children(top);
        state.enforce(result);
    }

    /// Handles pending messages.
    pub fn poll(&mut self) {
        let mut state = self.shared.state.lock();
        if self.shared.polling() {
            poll_inbox(self.shared, &mut state, Duration::ZERO);
        }
        state.process_delayed();
    }

    /// True once the current frame was aborted. Long-running computations
    /// may check this to stop early.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        let state = self.shared.state.lock();
        state
            .stack
            .top()
            .and_then(|top| state.records.get(top))
            .is_some_and(InvocationRecord::is_aborted)
    }

    /// Stamp of the current frame.
    #[must_use]
    pub fn stamp(&self) -> Option<Stamp> {
        let state = self.shared.state.lock();
        state
            .stack
            .top()
            .and_then(|top| state.records.stamp_of(top).cloned())
    }
}

impl std::fmt::Debug for Worker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("node", &self.shared.me)
            .finish()
    }
}

// ----------------------------------------------------------------------
// Job execution
// ----------------------------------------------------------------------

/// Runs one job to completion and settles it.
pub(crate) fn call_satin_function(shared: &Arc<Shared>, state: &mut Guard<'_>, id: RecordId) {
    state.stack.push(id);
    state.process_delayed();
    let Some(record) = state.records.get(id) else {
        state.stack.pop();
        return;
    };
    let local = record.owner == state.me;
    let re_done = record.re_done;
    let stamp = record.stamp.clone();

    if record.aborted || state.records.parent_aborted(id) {
        tracing::trace!(node = %state.me, stamp = %stamp, "skipping aborted job");
        state.stack.pop();
        if local {
            if let Some(record) = state.records.get_mut(id) {
                record.abort();
            }
            let result = state.complete_local(id);
            state.enforce(result);
        } else {
            state.records.retire(id);
        }
        return;
    }

    if re_done && state.table.is_some() {
        match state.redo_check(id) {
            RedoOutcome::Hit => {
                state.stack.pop();
                tracing::debug!(node = %state.me, stamp = %stamp, "redone job answered from table");
                finish_from_table(state, id, local);
                return;
            }
            RedoOutcome::Fetch { key, owner } if local => {
                state.stack.pop();
                if state.fetch_remote(id, key, &owner) {
                    return;
                }
                state.stack.push(id);
            }
            _ => {}
        }
        if let Some(key) = state.table_key(id) {
            if let Some(table) = state.table.as_mut() {
                table.store_lock(key);
            }
        }
    }

    let outcome = run_computation(shared, state, id);
    end_frame(shared, state, id, outcome);
    state.stack.pop();

    if local {
        settle_local(state, id);
    } else {
        settle_remote(state, id);
    }
}

fn finish_from_table(state: &mut Guard<'_>, id: RecordId, local: bool) {
    if local {
        let result = state.complete_local(id);
        state.enforce(result);
        return;
    }
    if let Some(record) = state.records.get(id) {
        if let Some(value) = record.result.clone() {
            let owner = record.owner.clone();
            let message = Message::JobResult {
                stamp: record.stamp.clone(),
                owner: owner.clone(),
                outcome: JobOutcome::Normal(value),
            };
            state.send(&owner, message);
        }
    }
    state.records.retire(id);
}

fn run_computation(
    shared: &Arc<Shared>,
    state: &mut Guard<'_>,
    id: RecordId,
) -> Result<Payload, JobError> {
    let Some(record) = state.records.get(id) else {
        return Err(JobError::Unavailable);
    };
    let name = Arc::clone(&record.computation);
    let params = record.params.clone();
    let Some(computation) = shared.computations.get(&name) else {
        tracing::warn!(node = %state.me, computation = %name, "unknown computation");
        return Err(JobError::Failed(Failure::new(format!(
            "unknown computation {name:?}"
        ))));
    };
    let mut worker = Worker { shared };
    let outcome = MutexGuard::unlocked(state, || {
        catch_unwind(AssertUnwindSafe(|| computation.run(&mut worker, &params)))
    });
    match outcome {
        Ok(result) => result,
        Err(payload) => {
            if payload.is::<ConsistencyViolation>() {
                resume_unwind(payload);
            }
            let message = panic_message(payload.as_ref());
            tracing::debug!(node = %state.me, computation = %name, panic = %message, "computation panicked");
            Err(JobError::Failed(Failure::from_panic(message)))
        }
    }
}

/// Records the outcome and waits for (or kills) the frame's children.
fn end_frame(
    shared: &Arc<Shared>,
    state: &mut Guard<'_>,
    id: RecordId,
    outcome: Result<Payload, JobError>,
) {
    let Some(record) = state.records.get_mut(id) else {
        return;
    };
    match outcome {
        Ok(value) => {
            if !record.aborted {
                record.result = Some(value);
            }
        }
        Err(JobError::Aborted) => {}
        Err(JobError::Failed(failure)) => {
            if record.eek.is_none() && !record.aborted {
                record.eek = Some(failure);
            }
        }
        Err(JobError::Unavailable) => {
            if record.eek.is_none() && !record.aborted {
                record.eek = Some(Failure::new("job used an unavailable result"));
            }
        }
    }

    let stop_children = record.eek.is_some() || record.aborted;
    let counters = record.counters.clone();
    let mut result = Ok(());
    if stop_children {
        result = state.abort_frame_children(id);
    } else {
        for counter in counters {
            if state.records.counter_value(counter) == 0 {
                continue;
            }
            if sync_loop(shared, state, counter).is_err() {
                result = state.abort_frame_children(id);
                break;
            }
        }
    }
    state.enforce(result);
}

fn settle_local(state: &mut Guard<'_>, id: RecordId) {
    let Some(record) = state.records.get(id) else {
        return;
    };
    let failed = record.eek.is_some();
    let store = record.re_done && !record.aborted && !failed;
    let result = record.result.clone();
    if let (true, Some(value)) = (store, result) {
        if let (Some(key), Some(table)) = (state.table_key(id), state.table.as_mut()) {
            table.store_result(key, value);
        }
    }
    if failed {
        let result = state.handle_inlet(id);
        state.enforce(result);
    }
    let result = state.complete_local(id);
    state.enforce(result);
}

/// Reports a stolen job back to its owner, or keeps its result in the table
/// if the owner is gone.
fn settle_remote(state: &mut Guard<'_>, id: RecordId) {
    let Some(record) = state.records.get(id) else {
        return;
    };
    let owner = record.owner.clone();
    let stamp = record.stamp.clone();
    if record.sent_exception {
        tracing::trace!(node = %state.me, stamp = %stamp, "failure already reported");
    } else if record.orphan {
        if let Some(value) = record.result.clone() {
            tracing::debug!(node = %state.me, stamp = %stamp, owner = %owner, "orphan finished, storing result");
            if let (Some(key), Some(table)) = (state.table_key(id), state.table.as_mut()) {
                table.store_result(key, value);
            }
        }
    } else if let Some(failure) = record.eek.clone() {
        state.send(
            &owner,
            Message::JobResult {
                stamp,
                owner: owner.clone(),
                outcome: JobOutcome::Exception(failure),
            },
        );
    } else if record.aborted {
        tracing::trace!(node = %state.me, stamp = %stamp, "stolen job aborted");
    } else if let Some(value) = record.result.clone() {
        state.send(
            &owner,
            Message::JobResult {
                stamp,
                owner: owner.clone(),
                outcome: JobOutcome::Normal(value),
            },
        );
    }
    state.records.retire(id);
}

// ----------------------------------------------------------------------
// Sync and the client loop
// ----------------------------------------------------------------------

/// Runs work until `counter` reaches zero.
pub(crate) fn sync_loop(
    shared: &Arc<Shared>,
    state: &mut Guard<'_>,
    counter: CounterId,
) -> Result<(), JobError> {
    loop {
        if shared.polling() {
            poll_inbox(shared, state, Duration::ZERO);
        }
        state.process_delayed();
        let aborted = state
            .stack
            .top()
            .and_then(|top| state.records.get(top))
            .is_some_and(InvocationRecord::is_aborted);
        if aborted {
            return Err(JobError::Aborted);
        }
        if state.records.counter_value(counter) == 0 {
            return Ok(());
        }
        if state.disconnected || state.exiting {
            return Err(JobError::Unavailable);
        }
        let job = match state.queue.get_from_head() {
            Some(job) => Some(job),
            None => no_work_in_queue(shared, state),
        };
        match job {
            Some(job) => call_satin_function(shared, state, job),
            None => idle(shared, state),
        }
    }
}

/// The queue ran dry during a sync: restart children handed back by crash
/// recovery, then try to steal.
fn no_work_in_queue(shared: &Arc<Shared>, state: &mut Guard<'_>) -> Option<RecordId> {
    let waiting = state
        .stack
        .top()
        .and_then(|top| state.records.get_mut(top))
        .map(|frame| std::mem::take(&mut frame.to_be_restarted))
        .unwrap_or_default();
    for job in waiting {
        match state.redo_check(job) {
            RedoOutcome::Hit => {
                let result = state.complete_local(job);
                state.enforce(result);
            }
            RedoOutcome::Fetch { key, owner } => {
                if !state.fetch_remote(job, key, &owner) {
                    state.queue.add_to_tail(job);
                }
            }
            RedoOutcome::Miss => state.queue.add_to_tail(job),
        }
    }
    match state.queue.get_from_head() {
        Some(job) => Some(job),
        None => client_iteration(shared, state),
    }
}

/// One round of the load-balancing algorithm.
pub(crate) fn client_iteration(shared: &Arc<Shared>, state: &mut Guard<'_>) -> Option<RecordId> {
    if state.exiting {
        return None;
    }
    let s = &mut **state;
    let plan = s
        .balancer
        .plan(&s.victims, &mut s.rng, Some(&s.master), s.is_master);
    if let Some(job) = plan.ready {
        tracing::trace!(node = %s.me, "running asynchronously stolen job");
        return Some(job);
    }
    if let Some(victim) = plan.async_victim {
        let table = s.wants_table();
        tracing::trace!(node = %s.me, victim = %victim, "async steal request");
        let message = Message::StealRequest {
            kind: StealKind::Async,
            table,
        };
        if !s.send(&victim, message) {
            s.balancer.abandon_async();
        }
    }
    let (victim, kind) = plan.sync_victim?;
    steal_and_wait(shared, state, &victim, kind)
}

fn steal_and_wait(
    shared: &Arc<Shared>,
    state: &mut Guard<'_>,
    victim: &NodeId,
    kind: StealKind,
) -> Option<RecordId> {
    let table = state.wants_table();
    state.balancer.begin_sync(victim.clone());
    tracing::trace!(node = %state.me, victim = %victim, kind = ?kind, "steal request");
    if !state.send(victim, Message::StealRequest { kind, table }) {
        state.balancer.end_sync();
        return None;
    }
    let deadline = match kind {
        StealKind::Blocking => None,
        StealKind::Sync | StealKind::Async => Some(Instant::now() + shared.config.steal_wait_timeout),
    };
    while !state.balancer.sync_settled() && !state.exiting && !shared.stopping() {
        let slice = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    tracing::debug!(node = %state.me, victim = %victim, "steal request timed out");
                    break;
                }
                (deadline - now).min(WAIT_SLICE)
            }
            None => WAIT_SLICE,
        };
        wait(shared, state, slice);
    }
    let job = state.balancer.end_sync();
    if let Some(job) = job {
        tracing::debug!(node = %state.me, victim = %victim, stamp = ?state.records.stamp_of(job), "stole job");
    }
    job
}

// ----------------------------------------------------------------------
// Waiting
// ----------------------------------------------------------------------

/// Waits up to `timeout` for something to happen: a message in polling
/// mode, a notification otherwise.
pub(crate) fn wait(shared: &Arc<Shared>, state: &mut Guard<'_>, timeout: Duration) {
    if shared.polling() {
        poll_inbox(shared, state, timeout);
    } else {
        shared.cond.wait_for(state, timeout);
    }
}

/// Backs off after a fruitless scheduling round.
pub(crate) fn idle(shared: &Arc<Shared>, state: &mut Guard<'_>) {
    wait(shared, state, shared.config.idle_backoff);
}

/// Drains the inbox on the calling thread, waiting up to `timeout` for the
/// first event. The lock is released while waiting.
pub(crate) fn poll_inbox(shared: &Arc<Shared>, state: &mut Guard<'_>, timeout: Duration) {
    let transport = Arc::clone(&shared.transport);
    let mut next = if timeout.is_zero() {
        transport.try_recv()
    } else {
        MutexGuard::unlocked(state, || transport.recv_timeout(timeout))
    };
    while let Some(event) = next.take() {
        let closed = event == crate::transport::Inbound::Closed;
        handler::handle_inbound(shared, state, event);
        if closed {
            break;
        }
        next = transport.try_recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::ComputationRegistry;
    use crate::config::{Delivery, SatinConfig};
    use crate::ft::table::TableKey;
    use crate::runtime::Satin;
    use crate::test_utils::{init_test_logging, insert_job};
    use crate::transport::LocalNetwork;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    /// A polling node whose `job` computation counts its runs and returns
    /// its parameter.
    fn counting_node(runs: &Arc<AtomicUsize>) -> (LocalNetwork, Satin) {
        let net = LocalNetwork::new();
        let runs = Arc::clone(runs);
        let mut computations = ComputationRegistry::new();
        computations.register_fn("job", move |_worker, params| {
            runs.fetch_add(1, Ordering::SeqCst);
            let value: u64 = params.decode()?;
            Ok(Payload::encode(&value)?)
        });
        let transport = net.join("a", "vu").unwrap();
        let config = SatinConfig::builder().delivery(Delivery::Polling).build();
        let node = Satin::new(config, transport, net.registry(), computations).unwrap();
        (net, node)
    }

    /// Puts a redone root frame on the stack, as a replay after takeover
    /// would.
    fn redone_root(shared: &Arc<Shared>) -> RecordId {
        let mut state = shared.state.lock();
        let me = state.me.clone();
        let root = insert_job(&mut state.records, &me, Stamp::root(0), None, false);
        state.records.get_mut(root).unwrap().re_done = true;
        state.stack.push(root);
        root
    }

    fn stored(value: u64) -> Payload {
        Payload::encode(&value).unwrap()
    }

    fn decode(payload: &Payload) -> u64 {
        payload.decode().unwrap()
    }

    #[test]
    fn requeued_redone_job_with_stored_result_never_runs() {
        init_test("requeued_redone_job_with_stored_result_never_runs");
        let runs = Arc::new(AtomicUsize::new(0));
        let (_net, node) = counting_node(&runs);
        let shared = Arc::clone(node.shared());
        let root = redone_root(&shared);
        let stamp = Stamp::root(0).child(0);
        let (job, counter) = {
            let mut state = shared.state.lock();
            let me = state.me.clone();
            let job = insert_job(&mut state.records, &me, stamp.clone(), Some(root), true);
            let record = state.records.get_mut(job).unwrap();
            record.re_done = true;
            record.computation = Arc::from("job");
            record.params = stored(7);
            let counter = record.counter.unwrap();
            state.records.get_mut(root).unwrap().children.push(job);
            state.queue.add_to_tail(job);
            state
                .table
                .as_mut()
                .unwrap()
                .store_result(TableKey::Stamp(stamp.clone()), stored(70));
            (job, counter)
        };

        let mut worker = Worker { shared: &shared };
        worker.sync(&SpawnCounter { id: counter }).unwrap();

        let state = shared.state.lock();
        let record = state.records.get(job).unwrap();
        let ran = runs.load(Ordering::SeqCst);
        crate::assert_with_log!(ran == 0, "redone job not executed", 0, ran);
        assert!(record.has_decremented());
        assert_eq!(record.result.as_ref().map(decode), Some(70));
        assert_eq!(state.records.counter_value(counter), 0);
        assert!(state.queue.is_empty());
        crate::test_complete!("requeued_redone_job_with_stored_result_never_runs");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn redone_spawns_with_stored_results_are_not_rerun(
            hits in prop::collection::vec(any::<bool>(), 1..12),
        ) {
            init_test("redone_spawns_with_stored_results_are_not_rerun");
            let runs = Arc::new(AtomicUsize::new(0));
            let (_net, node) = counting_node(&runs);
            let shared = Arc::clone(node.shared());
            redone_root(&shared);
            {
                let mut state = shared.state.lock();
                let table = state.table.as_mut().unwrap();
                for (i, _) in hits.iter().enumerate().filter(|(_, hit)| **hit) {
                    let key = TableKey::Stamp(Stamp::root(0).child(i as u32));
                    table.store_result(key, stored(1000 + i as u64));
                }
            }

            let mut worker = Worker { shared: &shared };
            let counter = worker.counter();
            let handles: Vec<JobHandle> = (0..hits.len() as u64)
                .map(|i| worker.spawn(&counter, "job", stored(i)))
                .collect();
            {
                let state = shared.state.lock();
                for (handle, hit) in handles.iter().zip(&hits) {
                    let record = state.records.get(handle.id.unwrap()).unwrap();
                    prop_assert_eq!(record.has_decremented(), *hit);
                    prop_assert_eq!(state.queue.contains(record.id), !*hit);
                }
            }
            prop_assert_eq!(runs.load(Ordering::SeqCst), 0);

            worker.sync(&counter).unwrap();
            let misses = hits.iter().filter(|hit| !**hit).count();
            prop_assert_eq!(runs.load(Ordering::SeqCst), misses);
            for (i, (handle, hit)) in handles.iter().zip(&hits).enumerate() {
                let value = decode(&worker.result(handle).unwrap());
                let expected = if *hit { 1000 + i as u64 } else { i as u64 };
                prop_assert_eq!(value, expected);
            }
            prop_assert_eq!(shared.state.lock().records.counter_value(counter.id), 0);
            crate::test_complete!("redone_spawns_with_stored_results_are_not_rerun");
        }
    }
}
