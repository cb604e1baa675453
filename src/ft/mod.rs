//! Crash recovery.
//!
//! A crash is reported by the transport and applied by the worker thread
//! from the delayed-message list. What happens to the crashed node's work
//! depends on [`FaultTolerance`]:
//!
//! | Mode | Jobs the node stole from us | Its jobs running here |
//! |------|-----------------------------|-----------------------|
//! | `Off` | fail with a crash failure, routed through inlets | aborted |
//! | `Naive` | re-queued, redone from scratch | aborted |
//! | `WithAborts` | re-queued as redone | aborted, finished children stored first |
//! | `WithoutAborts` | handed to the parent's restart list as redone | run to the end as orphans, result stored |
//!
//! A redone job consults the [`table::GlobalResultTable`] before running: a
//! stored result is copied in, a pointer to a live peer turns into a
//! RESULT_REQUEST tracked as an outstanding job, and anything else runs the
//! job again under a lock entry.

pub mod table;

use crate::config::FaultTolerance;
use crate::error::Result;
use crate::protocol::{JobOutcome, Message};
use crate::runtime::state::SchedulerState;
use crate::types::{Failure, NodeId, RecordId, Stamp};
use table::{TableKey, TableValue};

/// Outcome of the table check for a redone job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RedoOutcome {
    /// The result was in the table and has been copied into the record.
    Hit,
    /// The result lives on `owner`; fetch it.
    Fetch {
        /// Key to ask for.
        key: TableKey,
        /// Node holding the result.
        owner: NodeId,
    },
    /// Nothing usable; run the job.
    Miss,
}

impl SchedulerState {
    /// Looks a redone job up in the table.
    pub(crate) fn redo_check(&mut self, id: RecordId) -> RedoOutcome {
        let Some(key) = self.table_key(id) else {
            return RedoOutcome::Miss;
        };
        let Some(table) = self.table.as_ref() else {
            return RedoOutcome::Miss;
        };
        let outcome = match table.lookup(&key) {
            Some(TableValue::Result(value)) => {
                let value = value.clone();
                if let Some(record) = self.records.get_mut(id) {
                    record.result = Some(value);
                }
                RedoOutcome::Hit
            }
            Some(TableValue::Pointer(owner))
                if owner != &self.me && self.victims.contains(owner) =>
            {
                RedoOutcome::Fetch {
                    key,
                    owner: owner.clone(),
                }
            }
            _ => RedoOutcome::Miss,
        };
        tracing::trace!(node = %self.me, outcome = ?outcome, "redo check");
        outcome
    }

    /// Asks `holder` for the result of a local redone job. The job waits in
    /// the outstanding list like a stolen one. Returns false if the request
    /// could not be sent; the job is untouched then.
    pub(crate) fn fetch_remote(&mut self, id: RecordId, key: TableKey, holder: &NodeId) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            return false;
        };
        record.stealer = Some(holder.clone());
        let stamp = record.stamp.clone();
        let owner = record.owner.clone();
        self.outstanding.add(id);
        let sent = self.send(holder, Message::ResultRequest { key, stamp, owner });
        if !sent {
            self.outstanding.remove_id(id);
            if let Some(record) = self.records.get_mut(id) {
                record.stealer = None;
            }
        }
        sent
    }

    /// Serves a RESULT_REQUEST from `from`.
    pub(crate) fn answer_result_request(
        &self,
        from: &NodeId,
        key: &TableKey,
        stamp: Stamp,
        owner: NodeId,
    ) {
        let hit = match self.table.as_ref().and_then(|t| t.lookup(key)) {
            Some(TableValue::Result(value)) => Some(value.clone()),
            _ => None,
        };
        let reply = match hit {
            Some(value) => Message::JobResult {
                stamp,
                owner,
                outcome: JobOutcome::Normal(value),
            },
            None => {
                tracing::debug!(node = %self.me, from = %from, stamp = %stamp, "requested result missing");
                Message::ResultMissing { stamp, owner }
            }
        };
        self.send(from, reply);
    }

    /// The holder of a pointer no longer has the result: drop the pointer
    /// and run the job here.
    pub(crate) fn handle_result_missing(&mut self, stamp: &Stamp, owner: &NodeId) {
        let Some(id) = self.outstanding.remove(stamp, owner, &self.records) else {
            return;
        };
        if let Some(key) = self.table_key(id) {
            if let Some(table) = self.table.as_mut() {
                table.forget(&key);
            }
        }
        if let Some(record) = self.records.get_mut(id) {
            record.stealer = None;
        }
        self.queue.add_to_tail(id);
    }

    /// Stores the results of the finished children of `frame`.
    pub(crate) fn store_finished_children(&mut self, frame: RecordId) {
        if self.table.is_none() {
            return;
        }
        let finished = self
            .records
            .get(frame)
            .map(|r| r.finished_children.clone())
            .unwrap_or_default();
        for child in finished {
            let Some(result) = self
                .records
                .get(child)
                .filter(|r| !r.aborted && r.eek.is_none())
                .and_then(|r| r.result.clone())
            else {
                continue;
            };
            if let (Some(key), Some(table)) = (self.table_key(child), self.table.as_mut()) {
                table.store_result(key, result);
            }
        }
    }

    /// Like [`Self::kill_children_of`], but frames on the stack hand their
    /// finished children to the table before they unwind, and thieves are
    /// asked to do the same.
    pub(crate) fn kill_and_store_children_of(
        &mut self,
        target: &Stamp,
        owner: &NodeId,
    ) -> Result<()> {
        let frames = self.stack.kill_children_of(target, owner, &mut self.records);
        for &frame in &frames {
            self.store_finished_children(frame);
        }
        self.queue.kill_children_of(target, owner, &mut self.records)?;
        let notices = self
            .outstanding
            .kill_children_of(target, owner, &mut self.records)?;
        for notice in notices {
            self.send_abort(notice, true);
        }
        Ok(())
    }

    /// Recovers from the crash (or departure) of `node`.
    pub(crate) fn handle_crash(&mut self, node: &NodeId) -> Result<()> {
        let mode = self.config.fault_tolerance;
        tracing::info!(node = %self.me, crashed = %node, mode = ?mode, "handling crash");
        let stolen = self.outstanding.take_stolen_by(node, &mut self.records);
        self.recovered += stolen.len() as u64;

        match mode {
            FaultTolerance::Off => {
                for frame in self.stack.kill_owned_by(node, &mut self.records) {
                    self.kill_frame_subtree(frame)?;
                }
                for job in stolen {
                    let Some(record) = self.records.get_mut(job) else {
                        continue;
                    };
                    let failure = Failure::new(format!("job {} lost: {node} crashed", record.stamp));
                    record.eek = Some(failure);
                    self.handle_inlet(job)?;
                    self.complete_local(job)?;
                }
            }
            FaultTolerance::Naive => {
                for frame in self.stack.kill_owned_by(node, &mut self.records) {
                    self.kill_frame_subtree(frame)?;
                }
                for job in stolen {
                    self.queue.add_to_tail(job);
                }
            }
            FaultTolerance::WithAborts => {
                for frame in self.stack.kill_owned_by(node, &mut self.records) {
                    self.store_finished_children(frame);
                    if let Some(stamp) = self.records.stamp_of(frame).cloned() {
                        self.kill_and_store_children_of(&stamp, node)?;
                    }
                }
                for job in stolen {
                    if let Some(record) = self.records.get_mut(job) {
                        record.re_done = true;
                    }
                    self.queue.add_to_tail(job);
                }
            }
            FaultTolerance::WithoutAborts => {
                let orphans = self.stack.mark_orphans_of(node, &mut self.records);
                if !orphans.is_empty() {
                    tracing::info!(node = %self.me, crashed = %node, orphans = orphans.len(), "orphaned frames keep running");
                }
                for job in stolen {
                    let parent = self.records.get_mut(job).and_then(|record| {
                        record.re_done = true;
                        record.parent
                    });
                    match parent.and_then(|p| self.records.get_mut(p)) {
                        Some(parent) => parent.to_be_restarted.push(job),
                        None => self.queue.add_to_tail(job),
                    }
                }
            }
        }

        let dropped = self.queue.kill_owned_by(node, &mut self.records);
        if dropped > 0 {
            tracing::debug!(node = %self.me, crashed = %node, dropped, "dropped queued jobs of crashed owner");
        }
        Ok(())
    }

    fn kill_frame_subtree(&mut self, frame: RecordId) -> Result<()> {
        match self.records.get(frame) {
            Some(record) => {
                let (stamp, owner) = (record.stamp.clone(), record.owner.clone());
                self.kill_children_of(&stamp, &owner)
            }
            None => Ok(()),
        }
    }

    /// Sends batched table updates to every replica.
    pub(crate) fn flush_table_updates(&mut self) {
        let Some((replicas, entries)) = self.table.as_mut().and_then(|t| t.take_updates()) else {
            return;
        };
        tracing::trace!(node = %self.me, replicas = replicas.len(), entries = entries.len(), "table update");
        for replica in replicas {
            self.send(
                &replica,
                Message::TableUpdate {
                    entries: entries.clone(),
                },
            );
        }
    }

    /// Fires the crash and delete test timers.
    pub(crate) fn check_timers(&mut self) {
        if self.disconnected {
            return;
        }
        let elapsed = self.started.elapsed();
        if self.config.kill_after.is_some_and(|after| elapsed >= after) {
            tracing::warn!(node = %self.me, "kill timer expired, crashing");
            self.transport.crash();
            self.exiting = true;
            self.disconnected = true;
        } else if self.config.delete_after.is_some_and(|after| elapsed >= after) {
            tracing::info!(node = %self.me, "delete timer expired, leaving");
            self.leave_gracefully();
        }
    }

    /// Hands the locally held results to a random peer and leaves.
    pub(crate) fn leave_gracefully(&mut self) {
        let entries = self
            .table
            .as_ref()
            .map(table::GlobalResultTable::local_results)
            .unwrap_or_default();
        if !entries.is_empty() {
            if let Some(peer) = self.victims.random_victim(&mut self.rng) {
                tracing::debug!(node = %self.me, to = %peer, entries = entries.len(), "pushing results");
                self.send(&peer, Message::ResultPush { entries });
            }
        }
        self.transport.leave();
        self.exiting = true;
        self.disconnected = true;
    }
}
