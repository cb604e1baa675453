//! Jobs handed to other nodes that have not reported back yet.
//!
//! Every record here is owned by this node and still counts against its
//! spawn counter; `stealer` names the node executing it.

use crate::error::Result;
use crate::record::RecordTable;
use crate::types::{NodeId, RecordId, Stamp};

/// Where to send an abort for a killed outstanding job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortNotice {
    /// Node executing the job.
    pub stealer: NodeId,
    /// Stamp whose descendants the stealer must kill.
    pub stamp: Stamp,
    /// Owner of that stamp.
    pub owner: NodeId,
}

/// Outstanding (stolen-away) jobs.
#[derive(Debug, Default)]
pub struct IrVector {
    jobs: Vec<RecordId>,
}

impl IrVector {
    /// Empty list with room for `hint` jobs.
    #[must_use]
    pub fn with_capacity(hint: usize) -> Self {
        Self {
            jobs: Vec::with_capacity(hint),
        }
    }

    /// Records a job handed out.
    pub fn add(&mut self, job: RecordId) {
        self.jobs.push(job);
    }

    /// Number of outstanding jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True when nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// True if the job is outstanding.
    #[must_use]
    pub fn contains(&self, job: RecordId) -> bool {
        self.jobs.contains(&job)
    }

    /// Outstanding jobs, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.jobs.iter().copied()
    }

    /// Removes the job identified by `(stamp, owner)`.
    pub fn remove(&mut self, stamp: &Stamp, owner: &NodeId, records: &RecordTable) -> Option<RecordId> {
        let pos = self.jobs.iter().position(|&job| {
            records
                .get(job)
                .is_some_and(|r| &r.stamp == stamp && &r.owner == owner)
        })?;
        Some(self.jobs.remove(pos))
    }

    /// Removes a specific job handle.
    pub fn remove_id(&mut self, job: RecordId) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|&j| j != job);
        before != self.jobs.len()
    }

    /// Removes every outstanding descendant of the job `(target, owner)`,
    /// marks it aborted and settles its counter. Returns one notice per killed job so the caller
    /// can tell the stealers.
    pub fn kill_children_of(
        &mut self,
        target: &Stamp,
        owner: &NodeId,
        records: &mut RecordTable,
    ) -> Result<Vec<AbortNotice>> {
        let hits: Vec<RecordId> = self
            .jobs
            .iter()
            .copied()
            .filter(|&job| records.is_abort_target(job, target, owner))
            .collect();
        self.jobs.retain(|job| !hits.contains(job));

        let mut notices = Vec::with_capacity(hits.len());
        for job in hits {
            let Some(record) = records.get_mut(job) else {
                continue;
            };
            record.abort();
            let stealer = record.stealer.take();
            let stamp = record.parent_stamp.clone();
            let owner = record.parent_owner.clone();
            records.decrement(job)?;
            if let (Some(stealer), Some(stamp), Some(owner)) = (stealer, stamp, owner) {
                notices.push(AbortNotice {
                    stealer,
                    stamp,
                    owner,
                });
            }
        }
        Ok(notices)
    }

    /// Removes and returns every job stolen by `stealer`, clearing the
    /// stealer field.
    pub fn take_stolen_by(&mut self, stealer: &NodeId, records: &mut RecordTable) -> Vec<RecordId> {
        let hits: Vec<RecordId> = self
            .jobs
            .iter()
            .copied()
            .filter(|&job| {
                records
                    .get(job)
                    .is_some_and(|r| r.stealer.as_ref() == Some(stealer))
            })
            .collect();
        self.jobs.retain(|job| !hits.contains(job));
        for &job in &hits {
            if let Some(record) = records.get_mut(job) {
                record.stealer = None;
            }
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, insert_job};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn stolen(records: &mut RecordTable, me: &NodeId, stamp: Stamp, by: &str) -> RecordId {
        let job = insert_job(records, me, stamp, None, true);
        records.get_mut(job).unwrap().stealer = Some(NodeId::new(by));
        job
    }

    #[test]
    fn kill_sends_parent_stamp_to_stealer() {
        init_test("kill_sends_parent_stamp_to_stealer");
        let me = NodeId::new("a");
        let mut records = RecordTable::default();
        let mut outstanding = IrVector::with_capacity(2);
        let parent = Stamp::root(0).child(2);
        let job = stolen(&mut records, &me, parent.child(0), "b");
        let other = stolen(&mut records, &me, Stamp::root(0).child(3), "c");
        outstanding.add(job);
        outstanding.add(other);

        let notices = outstanding.kill_children_of(&parent, &me, &mut records).unwrap();
        let expected = vec![AbortNotice {
            stealer: NodeId::new("b"),
            stamp: parent,
            owner: me.clone(),
        }];
        crate::assert_with_log!(notices == expected, "abort notice", expected, notices);
        assert!(records.get(job).unwrap().has_decremented());
        assert!(records.get(job).unwrap().stealer().is_none());
        assert_eq!(outstanding.iter().collect::<Vec<_>>(), vec![other]);
        crate::test_complete!("kill_sends_parent_stamp_to_stealer");
    }

    #[test]
    fn remove_matches_stamp_and_owner() {
        init_test("remove_matches_stamp_and_owner");
        let me = NodeId::new("a");
        let mut records = RecordTable::default();
        let mut outstanding = IrVector::default();
        let stamp = Stamp::root(0).child(0);
        let job = stolen(&mut records, &me, stamp.clone(), "b");
        outstanding.add(job);

        assert_eq!(outstanding.remove(&stamp, &NodeId::new("z"), &records), None);
        assert_eq!(outstanding.remove(&stamp, &me, &records), Some(job));
        assert!(outstanding.is_empty());
        crate::test_complete!("remove_matches_stamp_and_owner");
    }

    #[test]
    fn take_stolen_by_clears_stealer() {
        init_test("take_stolen_by_clears_stealer");
        let me = NodeId::new("a");
        let mut records = RecordTable::default();
        let mut outstanding = IrVector::default();
        let first = stolen(&mut records, &me, Stamp::root(0).child(0), "b");
        let second = stolen(&mut records, &me, Stamp::root(0).child(1), "c");
        outstanding.add(first);
        outstanding.add(second);

        let taken = outstanding.take_stolen_by(&NodeId::new("b"), &mut records);
        assert_eq!(taken, vec![first]);
        assert!(records.get(first).unwrap().stealer().is_none());
        assert!(!records.get(first).unwrap().has_decremented());
        assert!(outstanding.contains(second));
        crate::test_complete!("take_stolen_by_clears_stealer");
    }
}
