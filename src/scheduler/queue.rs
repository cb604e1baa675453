//! The local job pool.
//!
//! The spawning worker pushes and pops at the head, so local execution
//! follows sequential recursion order. Thieves take from the tail, where the
//! oldest and usually largest jobs sit. All operations assume the scheduler
//! lock is held.

use crate::error::Result;
use crate::record::RecordTable;
use crate::types::{NodeId, RecordId, Stamp};
use std::collections::VecDeque;

/// Double-ended queue of runnable jobs.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<RecordId>,
}

impl JobQueue {
    /// Empty queue with room for `hint` jobs.
    #[must_use]
    pub fn with_capacity(hint: usize) -> Self {
        Self {
            jobs: VecDeque::with_capacity(hint),
        }
    }

    /// Pushes a freshly spawned job.
    pub fn add_to_head(&mut self, job: RecordId) {
        self.jobs.push_front(job);
    }

    /// Pushes a job to be run after everything already queued.
    pub fn add_to_tail(&mut self, job: RecordId) {
        self.jobs.push_back(job);
    }

    /// Next job for the local worker.
    pub fn get_from_head(&mut self) -> Option<RecordId> {
        self.jobs.pop_front()
    }

    /// Next job for a thief.
    pub fn get_from_tail(&mut self) -> Option<RecordId> {
        self.jobs.pop_back()
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// True if the job is queued.
    #[must_use]
    pub fn contains(&self, job: RecordId) -> bool {
        self.jobs.contains(&job)
    }

    /// Queued jobs, head first.
    pub fn iter(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.jobs.iter().copied()
    }

    /// Removes every queued descendant of the job `(target, owner)` (or job
    /// whose parent is already aborted), marks it aborted and settles its
    /// counter.
    ///
    /// Killed jobs owned by another node are retired on the spot; local ones
    /// stay in the pool so their spawner can observe the abort. Returns the
    /// killed jobs.
    pub fn kill_children_of(
        &mut self,
        target: &Stamp,
        owner: &NodeId,
        records: &mut RecordTable,
    ) -> Result<Vec<RecordId>> {
        let mut killed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.jobs.len());
        for job in self.jobs.drain(..) {
            if records.is_abort_target(job, target, owner) {
                killed.push(job);
            } else {
                kept.push_back(job);
            }
        }
        self.jobs = kept;
        settle_killed(&killed, records)?;
        Ok(killed)
    }

    /// Removes every queued job owned by `owner`. Those can only be late
    /// steal replies from that node; they are retired.
    pub fn kill_owned_by(&mut self, owner: &NodeId, records: &mut RecordTable) -> usize {
        let mut dropped = Vec::new();
        self.jobs.retain(|&job| {
            let owned = records.get(job).is_some_and(|r| &r.owner == owner);
            if owned {
                dropped.push(job);
            }
            !owned
        });
        for job in &dropped {
            records.retire(*job);
        }
        dropped.len()
    }
}

fn settle_killed(killed: &[RecordId], records: &mut RecordTable) -> Result<()> {
    for &job in killed {
        let local = match records.get_mut(job) {
            Some(record) => {
                record.abort();
                record.counter.is_some()
            }
            None => continue,
        };
        if local {
            records.decrement(job)?;
        } else {
            records.retire(job);
        }
    }
    Ok(())
}
