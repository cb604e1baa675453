//! Inbound event dispatch.
//!
//! Runs on the upcall thread, or on the worker thread when polling, always
//! with the scheduler lock held. Steal requests, table traffic and the exit
//! and barrier protocols are answered right here. Job results, aborts and
//! crashes change records the worker may be looking at, so they are queued
//! on the delayed-message lists and applied by the worker at its next
//! scheduling point.

use super::node::{Shared, MASTER_ROLE};
use super::state::SchedulerState;
use crate::protocol::{Message, StealKind};
use crate::record::InvocationRecord;
use crate::transport::Inbound;
use crate::types::{NodeId, RecordId};
use std::sync::Arc;

/// Applies one transport event and wakes every waiter.
pub(crate) fn handle_inbound(shared: &Arc<Shared>, state: &mut SchedulerState, event: Inbound) {
    match event {
        Inbound::Message { from, message } => handle_message(shared, state, from, message),
        Inbound::Frame { from, bytes } => {
            if let Some(message) = state.decode_frame(&from, &bytes) {
                handle_message(shared, state, from, message);
            }
        }
        Inbound::Joined { node, cluster } => {
            if state.victims.add(node.clone(), Arc::clone(&cluster)) {
                tracing::debug!(node = %state.me, peer = %node, cluster = %cluster, "peer joined");
                if let Some(table) = state.table.as_mut() {
                    table.add_replica(node);
                }
            }
        }
        Inbound::Left(node) => node_gone(shared, state, &node, false),
        Inbound::Died(node) => node_gone(shared, state, &node, true),
        Inbound::Closed => {
            if !state.disconnected {
                tracing::info!(node = %state.me, "transport closed");
            }
            state.exiting = true;
            state.disconnected = true;
        }
    }
    shared.cond.notify_all();
}

fn handle_message(shared: &Arc<Shared>, state: &mut SchedulerState, from: NodeId, message: Message) {
    tracing::trace!(node = %state.me, from = %from, opcode = %message.opcode(), "received");
    match message {
        Message::StealRequest {
            kind: StealKind::Blocking,
            table,
        } => serve_blocking(shared, state, from, table),
        Message::StealRequest { kind, table } => serve_steal(state, &from, kind, table),
        Message::StealReply { kind, job, table } => {
            if let Some(entries) = table {
                if let Some(grt) = state.table.as_mut() {
                    grt.add_contents(entries);
                }
                state.got_table = true;
            }
            let job = job.map(|wire| state.adopt(wire));
            let delivered = match kind {
                StealKind::Async => state.balancer.async_reply(&from, job),
                StealKind::Sync | StealKind::Blocking => state.balancer.sync_reply(&from, job),
            };
            if let Err(Some(late)) = delivered {
                tracing::debug!(node = %state.me, victim = %from, "late steal reply queued");
                state.queue.add_to_tail(late);
            }
        }
        Message::JobResult {
            stamp,
            owner,
            outcome,
        } => state.delayed.results.push((stamp, owner, outcome)),
        Message::Abort { stamp, owner } => state.delayed.aborts.push((stamp, owner)),
        Message::AbortAndStore { stamp, owner } => {
            state.delayed.abort_and_store.push((stamp, owner));
        }
        Message::ResultRequest { key, stamp, owner } => {
            state.answer_result_request(&from, &key, stamp, owner);
        }
        Message::ResultMissing { stamp, owner } => state.handle_result_missing(&stamp, &owner),
        Message::ResultPush { entries } | Message::TableUpdate { entries } => {
            if let Some(table) = state.table.as_mut() {
                table.add_contents(entries);
            }
        }
        Message::Exit => {
            tracing::info!(node = %state.me, master = %from, "exit received");
            state.exiting = true;
            state.send(&from, Message::ExitReply);
        }
        Message::ExitReply => {
            state.exit_replies.insert(from);
        }
        Message::BarrierRequest => {
            state.barrier_requests.insert(from);
        }
        Message::BarrierReply => state.barrier_released = true,
    }
}

// ----------------------------------------------------------------------
// Membership
// ----------------------------------------------------------------------

fn node_gone(shared: &Arc<Shared>, state: &mut SchedulerState, node: &NodeId, crashed: bool) {
    let known = state.victims.remove(node);
    if !known && node != &state.master {
        return;
    }
    if crashed {
        tracing::warn!(node = %state.me, peer = %node, "peer crashed");
    } else {
        tracing::info!(node = %state.me, peer = %node, "peer left");
    }
    if let Some(stale) = state.balancer.victim_crashed(node) {
        state.records.retire(stale);
    }
    if let Some(table) = state.table.as_mut() {
        table.remove_replica(node);
    }
    state.barrier_requests.remove(node);
    shared.registry.maybe_dead(node);
    if node == &state.master && !state.exiting {
        reelect(shared, state);
    }
    state.delayed.crashes.push(node.clone());
}

fn reelect(shared: &Arc<Shared>, state: &mut SchedulerState) {
    match shared.registry.elect(MASTER_ROLE, &state.me) {
        Ok(master) => {
            if master == state.me && !state.is_master {
                tracing::info!(node = %state.me, old = %state.master, "elected master");
                state.is_master = true;
                state.became_master = true;
                state.restarted = true;
            } else {
                tracing::info!(node = %state.me, master = %master, "new master");
            }
            state.master = master;
        }
        Err(err) => {
            tracing::warn!(node = %state.me, error = %err, "master re-election failed");
        }
    }
}

// ----------------------------------------------------------------------
// Steal service
// ----------------------------------------------------------------------

/// Takes the job a thief gets: the locally owned job closest to the tail.
/// Jobs owned elsewhere are never passed on.
fn take_for_thief(state: &mut SchedulerState, thief: &NodeId) -> Option<RecordId> {
    let mut skipped = Vec::new();
    let found = loop {
        match state.queue.get_from_tail() {
            Some(job) if state.records.get(job).is_some_and(|r| r.owner == state.me) => {
                break Some(job);
            }
            Some(job) => skipped.push(job),
            None => break None,
        }
    };
    for job in skipped.into_iter().rev() {
        state.queue.add_to_tail(job);
    }
    let job = found?;
    if let Some(record) = state.records.get_mut(job) {
        record.stealer = Some(thief.clone());
    }
    state.outstanding.add(job);
    Some(job)
}

fn has_stealable(state: &SchedulerState) -> bool {
    state
        .queue
        .iter()
        .any(|job| state.records.get(job).is_some_and(|r| r.owner == state.me))
}

/// Answers a steal request.
fn serve_steal(state: &mut SchedulerState, thief: &NodeId, kind: StealKind, want_table: bool) {
    let job = take_for_thief(state, thief);
    let wire = job.and_then(|id| state.records.get(id).map(InvocationRecord::to_wire));
    let table = if want_table {
        state.table.as_ref().map(crate::ft::table::GlobalResultTable::contents)
    } else {
        None
    };
    let stamp = wire.as_ref().map(|w| w.stamp.clone());
    let sent = state.send(
        thief,
        Message::StealReply {
            kind,
            job: wire,
            table,
        },
    );
    match job {
        Some(_) if sent => {
            tracing::debug!(node = %state.me, thief = %thief, stamp = ?stamp, "job stolen");
        }
        Some(job) => {
            state.outstanding.remove_id(job);
            if let Some(record) = state.records.get_mut(job) {
                record.stealer = None;
            }
            state.queue.add_to_tail(job);
        }
        None => {}
    }
}

/// A blocking request is held until there is work, the node exits or the
/// thief disappears. The wait happens on a helper thread so the handler
/// stays free.
fn serve_blocking(shared: &Arc<Shared>, state: &mut SchedulerState, thief: NodeId, want_table: bool) {
    if state.exiting || has_stealable(state) {
        serve_steal(state, &thief, StealKind::Blocking, want_table);
        return;
    }
    let server = Arc::clone(shared);
    let waiting = thief.clone();
    let spawned = std::thread::Builder::new()
        .name("satin-blocking-steal".to_string())
        .spawn(move || blocking_steal_server(&server, &waiting, want_table));
    if let Err(err) = spawned {
        tracing::warn!(node = %state.me, error = %err, "cannot hold blocking steal request");
        serve_steal(state, &thief, StealKind::Blocking, want_table);
    }
}

fn blocking_steal_server(shared: &Arc<Shared>, thief: &NodeId, want_table: bool) {
    let mut state = shared.state.lock();
    loop {
        if !state.victims.contains(thief) {
            tracing::trace!(node = %state.me, thief = %thief, "blocking thief gone");
            return;
        }
        if state.exiting || shared.stopping() || has_stealable(&state) {
            serve_steal(&mut state, thief, StealKind::Blocking, want_table);
            return;
        }
        shared
            .cond
            .wait_for(&mut state, shared.config.steal_wait_timeout);
    }
}
