//! Abort propagation and inlets.
//!
//! A failure that escapes a job is offered to the inlet of the spawn site
//! that created the job. An inlet either absorbs it or raises a failure of
//! its own; a raised failure, like a failure with no inlet at all, aborts the
//! parent frame together with every other descendant of that parent and is
//! then offered to the parent's own spawn site, one level up at a time. At
//! the spawn-tree root nothing is left to absorb it and the root reports it.
//!
//! Killing the descendants of a stamp visits the stack first, then the
//! queue, then the outstanding list. Stolen descendants are aborted remotely
//! with an `Abort` message to the thief; the thief runs the same kill on its
//! own structures.
//!
//! Messages that change records (results, aborts, crashes) are queued by the
//! handler and applied by the worker thread in
//! [`SchedulerState::handle_delayed_messages`].

use crate::error::Result;
use crate::protocol::{JobOutcome, Message};
use crate::runtime::state::{panic_message, SchedulerState};
use crate::scheduler::AbortNotice;
use crate::types::{Failure, NodeId, RecordId, Stamp};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Work queued by the message handler for the worker thread.
#[derive(Debug, Default)]
pub(crate) struct DelayedMessages {
    pub(crate) aborts: Vec<(Stamp, NodeId)>,
    pub(crate) abort_and_store: Vec<(Stamp, NodeId)>,
    pub(crate) results: Vec<(Stamp, NodeId, JobOutcome)>,
    pub(crate) crashes: Vec<NodeId>,
}

impl DelayedMessages {
    pub(crate) fn is_empty(&self) -> bool {
        self.aborts.is_empty()
            && self.abort_and_store.is_empty()
            && self.results.is_empty()
            && self.crashes.is_empty()
    }
}

impl SchedulerState {
    /// Applies everything the handler queued, in a fixed order: crashes,
    /// aborts, abort-and-store requests, job results. Pending table updates
    /// go out afterwards.
    pub(crate) fn handle_delayed_messages(&mut self) -> Result<()> {
        self.check_timers();
        if !self.delayed.is_empty() {
            for node in std::mem::take(&mut self.delayed.crashes) {
                self.handle_crash(&node)?;
            }
            for (stamp, owner) in std::mem::take(&mut self.delayed.aborts) {
                tracing::debug!(node = %self.me, stamp = %stamp, owner = %owner, "abort received");
                self.kill_children_of(&stamp, &owner)?;
            }
            for (stamp, owner) in std::mem::take(&mut self.delayed.abort_and_store) {
                tracing::debug!(node = %self.me, stamp = %stamp, owner = %owner, "abort-and-store received");
                self.kill_and_store_children_of(&stamp, &owner)?;
            }
            for (stamp, owner, outcome) in std::mem::take(&mut self.delayed.results) {
                self.handle_job_result(&stamp, &owner, outcome)?;
            }
        }
        self.flush_table_updates();
        Ok(())
    }

    /// [`Self::handle_delayed_messages`] with violations sent to fail-fast.
    pub(crate) fn process_delayed(&mut self) {
        let result = self.handle_delayed_messages();
        self.enforce(result);
    }

    /// Aborts every descendant of the job `(target, owner)` on this node.
    pub(crate) fn kill_children_of(&mut self, target: &Stamp, owner: &NodeId) -> Result<()> {
        let frames = self.stack.kill_children_of(target, owner, &mut self.records);
        let queued = self.queue.kill_children_of(target, owner, &mut self.records)?;
        let notices = self
            .outstanding
            .kill_children_of(target, owner, &mut self.records)?;
        if !frames.is_empty() || !queued.is_empty() || !notices.is_empty() {
            tracing::debug!(
                node = %self.me,
                stamp = %target,
                frames = frames.len(),
                queued = queued.len(),
                remote = notices.len(),
                "killed descendants"
            );
        }
        for notice in notices {
            self.send_abort(notice, false);
        }
        Ok(())
    }

    /// Sends an abort to a thief. Aborts to nodes no longer in the victim
    /// table are dropped: crash handling has taken care of those subtrees.
    pub(crate) fn send_abort(&self, notice: AbortNotice, store: bool) {
        if !self.victims.contains(&notice.stealer) {
            tracing::trace!(node = %self.me, stealer = %notice.stealer, "abort to departed node dropped");
            return;
        }
        let message = if store {
            Message::AbortAndStore {
                stamp: notice.stamp,
                owner: notice.owner,
            }
        } else {
            Message::Abort {
                stamp: notice.stamp,
                owner: notice.owner,
            }
        };
        self.send(&notice.stealer, message);
    }

    /// Kills what a frame that stops early leaves behind: its descendants
    /// and the children waiting to be restarted.
    pub(crate) fn abort_frame_children(&mut self, frame: RecordId) -> Result<()> {
        let Some(record) = self.records.get_mut(frame) else {
            return Ok(());
        };
        let stamp = record.stamp.clone();
        let owner = record.owner.clone();
        let waiting = std::mem::take(&mut record.to_be_restarted);
        self.kill_children_of(&stamp, &owner)?;
        for job in waiting {
            if let Some(record) = self.records.get_mut(job) {
                record.abort();
            }
            self.records.decrement(job)?;
        }
        Ok(())
    }

    /// Offers the failure of a finished local job to its spawn site.
    pub(crate) fn handle_inlet(&mut self, id: RecordId) -> Result<()> {
        let Some(record) = self.records.get_mut(id) else {
            return Ok(());
        };
        if record.inlet_executed {
            return Ok(());
        }
        record.inlet_executed = true;
        let Some(failure) = record.eek.clone() else {
            return Ok(());
        };
        let inlet = record.inlet.clone();
        let parent = record.parent;
        let stamp = record.stamp.clone();
        if self.records.parent_aborted(id) {
            tracing::trace!(node = %self.me, stamp = %stamp, "parent aborted, failure dropped");
            return Ok(());
        }

        let escaped = match inlet {
            Some(inlet) => match catch_unwind(AssertUnwindSafe(|| inlet(&failure))) {
                Ok(Ok(())) => {
                    tracing::debug!(node = %self.me, stamp = %stamp, failure = %failure, "inlet absorbed failure");
                    None
                }
                Ok(Err(raised)) => Some(raised),
                Err(payload) => Some(Failure::from_panic(panic_message(payload.as_ref()))),
            },
            None => Some(failure),
        };
        match (escaped, parent) {
            (Some(failure), Some(parent)) => self.propagate_failure(parent, failure),
            _ => Ok(()),
        }
    }

    /// Aborts `parent` with `failure` and all of its other descendants.
    ///
    /// The parent is running on this node's stack; its frame picks the
    /// failure up when it ends and offers it to its own spawn site. A parent
    /// stolen from another node reports the failure to its owner right away.
    fn propagate_failure(&mut self, parent: RecordId, failure: Failure) -> Result<()> {
        let me = self.me.clone();
        let Some(record) = self.records.get_mut(parent) else {
            return Ok(());
        };
        if record.aborted || record.eek.is_some() {
            return Ok(());
        }
        record.abort();
        record.eek = Some(failure.clone());
        let stamp = record.stamp.clone();
        let owner = record.owner.clone();
        let notify_owner = owner != me && !record.orphan && !record.sent_exception;
        if notify_owner {
            record.sent_exception = true;
        }
        tracing::debug!(node = %me, stamp = %stamp, failure = %failure, "failure propagated to parent");

        self.kill_children_of(&stamp, &owner)?;
        if notify_owner {
            self.send(
                &owner,
                Message::JobResult {
                    stamp,
                    owner: owner.clone(),
                    outcome: JobOutcome::Exception(failure),
                },
            );
        }
        Ok(())
    }

    /// Applies a result returned by a thief (or by a result fetch).
    ///
    /// A result for a job that is no longer outstanding belongs to a job
    /// aborted in the meantime and is dropped.
    pub(crate) fn handle_job_result(
        &mut self,
        stamp: &Stamp,
        owner: &NodeId,
        outcome: JobOutcome,
    ) -> Result<()> {
        let Some(id) = self.outstanding.remove(stamp, owner, &self.records) else {
            tracing::debug!(node = %self.me, stamp = %stamp, "result for unknown job discarded");
            return Ok(());
        };
        let Some(record) = self.records.get_mut(id) else {
            return Ok(());
        };
        record.stealer = None;
        match outcome {
            JobOutcome::Normal(value) => {
                tracing::trace!(node = %self.me, stamp = %stamp, "remote result");
                record.result = Some(value);
            }
            JobOutcome::Exception(failure) => {
                tracing::debug!(node = %self.me, stamp = %stamp, failure = %failure, "remote failure");
                record.eek = Some(failure);
                self.kill_children_of(stamp, owner)?;
                self.handle_inlet(id)?;
            }
        }
        self.complete_local(id)
    }
}
