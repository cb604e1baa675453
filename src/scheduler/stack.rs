//! Jobs currently executing on this node, innermost last.
//!
//! The stack never removes or settles anything on a kill: a running job
//! settles its own counter when its frame returns. Killing only raises the
//! abort flag so the frame stops at its next sync.

use crate::record::RecordTable;
use crate::types::{NodeId, RecordId, Stamp};

/// Call stack of executing invocation records.
#[derive(Debug, Default)]
pub struct IrStack {
    frames: Vec<RecordId>,
}

impl IrStack {
    /// Enters a frame.
    pub fn push(&mut self, job: RecordId) {
        self.frames.push(job);
    }

    /// Leaves the innermost frame.
    pub fn pop(&mut self) -> Option<RecordId> {
        self.frames.pop()
    }

    /// Innermost frame: the parent of anything spawned right now.
    #[must_use]
    pub fn top(&self) -> Option<RecordId> {
        self.frames.last().copied()
    }

    /// Stack depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when nothing is executing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True if the job is executing.
    #[must_use]
    pub fn contains(&self, job: RecordId) -> bool {
        self.frames.contains(&job)
    }

    /// Frames, outermost first.
    pub fn iter(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.frames.iter().copied()
    }

    /// Aborts every executing descendant of the job `(target, owner)`.
    /// Returns the frames that were newly aborted.
    pub fn kill_children_of(
        &self,
        target: &Stamp,
        owner: &NodeId,
        records: &mut RecordTable,
    ) -> Vec<RecordId> {
        let hits: Vec<RecordId> = self
            .frames
            .iter()
            .copied()
            .filter(|&job| records.is_abort_target(job, target, owner))
            .collect();
        abort_all(hits, records)
    }

    /// Aborts every executing job owned by `owner`, that is every job this
    /// node stole from it. Returns the frames that were newly aborted.
    pub fn kill_owned_by(&self, owner: &NodeId, records: &mut RecordTable) -> Vec<RecordId> {
        let hits = self.owned_by(owner, records);
        abort_all(hits, records)
    }

    /// Flags every executing job owned by `owner` as an orphan. Returns the
    /// flagged frames.
    pub fn mark_orphans_of(&self, owner: &NodeId, records: &mut RecordTable) -> Vec<RecordId> {
        let hits = self.owned_by(owner, records);
        for &job in &hits {
            if let Some(record) = records.get_mut(job) {
                record.orphan = true;
            }
        }
        hits
    }

    fn owned_by(&self, owner: &NodeId, records: &RecordTable) -> Vec<RecordId> {
        self.frames
            .iter()
            .copied()
            .filter(|&job| records.get(job).is_some_and(|r| &r.owner == owner))
            .collect()
    }
}

fn abort_all(hits: Vec<RecordId>, records: &mut RecordTable) -> Vec<RecordId> {
    hits.into_iter()
        .filter(|&job| records.get_mut(job).is_some_and(|r| r.abort()))
        .collect()
}
