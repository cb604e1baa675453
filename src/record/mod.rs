//! Invocation records and spawn counters.
//!
//! An [`InvocationRecord`] is one node of the spawn tree. Records live in a
//! [`RecordTable`] and refer to each other by [`RecordId`]: the parent link,
//! the list of children a frame spawned, and the two fault-tolerance lists
//! (finished children, children to restart) are all index lists into the
//! same pool, so there are no reference cycles to manage.
//!
//! Only the stamp, owner, parent stamp/owner, computation name, parameters
//! and the redo flag cross the network ([`WireRecord`]); everything else is
//! local bookkeeping of the node holding the record.
//!
//! Spawn counters live in the same table. A counter is shared by a frame and
//! all its pending children. Every record that counts against a counter
//! decrements it exactly once over its lifetime, whichever of normal
//! completion, failure or abort settles it first.

use crate::error::{Error, ErrorKind, Result};
use crate::types::{CounterId, Failure, NodeId, Payload, RecordId, Stamp};
use crate::util::Arena;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Failure handler attached to a spawn site.
///
/// An inlet returning `Ok(())` absorbs the failure. Returning `Err` re-raises
/// a failure one level up: the spawning frame is aborted together with its
/// other children and the failure continues to that frame's own spawn site.
pub type Inlet = Arc<dyn Fn(&Failure) -> core::result::Result<(), Failure> + Send + Sync>;

/// One spawned invocation.
pub struct InvocationRecord {
    pub(crate) id: RecordId,
    pub(crate) stamp: Stamp,
    pub(crate) owner: NodeId,
    pub(crate) parent: Option<RecordId>,
    pub(crate) parent_stamp: Option<Stamp>,
    pub(crate) parent_owner: Option<NodeId>,
    pub(crate) computation: Arc<str>,
    pub(crate) params: Payload,
    pub(crate) counter: Option<CounterId>,
    pub(crate) decremented: bool,
    pub(crate) inlet: Option<Inlet>,
    pub(crate) aborted: bool,
    pub(crate) eek: Option<Failure>,
    pub(crate) result: Option<Payload>,
    pub(crate) stealer: Option<NodeId>,
    pub(crate) re_done: bool,
    pub(crate) orphan: bool,
    pub(crate) inlet_executed: bool,
    pub(crate) sent_exception: bool,
    pub(crate) next_child: u32,
    pub(crate) children: Vec<RecordId>,
    pub(crate) counters: Vec<CounterId>,
    pub(crate) finished_children: Vec<RecordId>,
    pub(crate) to_be_restarted: Vec<RecordId>,
}

impl InvocationRecord {
    /// A fresh, unparented record.
    #[must_use]
    pub fn new(
        id: RecordId,
        stamp: Stamp,
        owner: NodeId,
        computation: Arc<str>,
        params: Payload,
    ) -> Self {
        Self {
            id,
            stamp,
            owner,
            parent: None,
            parent_stamp: None,
            parent_owner: None,
            computation,
            params,
            counter: None,
            decremented: false,
            inlet: None,
            aborted: false,
            eek: None,
            result: None,
            stealer: None,
            re_done: false,
            orphan: false,
            inlet_executed: false,
            sent_exception: false,
            next_child: 0,
            children: Vec::new(),
            counters: Vec::new(),
            finished_children: Vec::new(),
            to_be_restarted: Vec::new(),
        }
    }

    /// Rebuilds a record that arrived in a steal reply.
    #[must_use]
    pub fn from_wire(id: RecordId, wire: WireRecord) -> Self {
        let mut record = Self::new(id, wire.stamp, wire.owner, wire.computation, wire.params);
        record.parent_stamp = wire.parent_stamp;
        record.parent_owner = wire.parent_owner;
        record.re_done = wire.re_done;
        record
    }

    /// The transmittable part of the record.
    #[must_use]
    pub fn to_wire(&self) -> WireRecord {
        WireRecord {
            stamp: self.stamp.clone(),
            owner: self.owner.clone(),
            parent_stamp: self.parent_stamp.clone(),
            parent_owner: self.parent_owner.clone(),
            computation: Arc::clone(&self.computation),
            params: self.params.clone(),
            re_done: self.re_done,
        }
    }

    /// Pool handle of this record.
    #[must_use]
    pub const fn id(&self) -> RecordId {
        self.id
    }

    /// Job stamp.
    #[must_use]
    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    /// Node that spawned the job.
    #[must_use]
    pub fn owner(&self) -> &NodeId {
        &self.owner
    }

    /// True once the job was aborted.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// True if the job is being replayed after a crash.
    #[must_use]
    pub const fn is_redone(&self) -> bool {
        self.re_done
    }

    /// Node currently executing the job on the owner's behalf.
    #[must_use]
    pub fn stealer(&self) -> Option<&NodeId> {
        self.stealer.as_ref()
    }

    /// True once the record settled its spawn counter.
    #[must_use]
    pub const fn has_decremented(&self) -> bool {
        self.decremented
    }

    /// Marks the record aborted. Returns false if it already was.
    pub(crate) fn abort(&mut self) -> bool {
        !core::mem::replace(&mut self.aborted, true)
    }

    /// Stamp for the next child this frame spawns.
    pub(crate) fn next_child_stamp(&mut self) -> Stamp {
        let stamp = self.stamp.child(self.next_child);
        self.next_child += 1;
        stamp
    }
}

impl fmt::Debug for InvocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationRecord")
            .field("stamp", &self.stamp)
            .field("owner", &self.owner)
            .field("computation", &self.computation)
            .field("aborted", &self.aborted)
            .field("stealer", &self.stealer)
            .field("re_done", &self.re_done)
            .field("orphan", &self.orphan)
            .field("decremented", &self.decremented)
            .field("eek", &self.eek)
            .finish_non_exhaustive()
    }
}

/// The part of a record that travels in steal replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    /// Job stamp.
    pub stamp: Stamp,
    /// Spawning node.
    pub owner: NodeId,
    /// Stamp of the spawning frame.
    pub parent_stamp: Option<Stamp>,
    /// Node running the spawning frame.
    pub parent_owner: Option<NodeId>,
    /// Registered computation to run.
    pub computation: Arc<str>,
    /// Encoded parameters.
    pub params: Payload,
    /// Replay after a crash.
    pub re_done: bool,
}

#[derive(Debug, Default)]
struct CounterSlot {
    value: u32,
}

/// Pool of invocation records and spawn counters of one node.
#[derive(Debug, Default)]
pub struct RecordTable {
    records: Arena<InvocationRecord>,
    counters: Arena<CounterSlot>,
}

impl RecordTable {
    /// Empty table sized for `hint` concurrent records.
    #[must_use]
    pub fn with_capacity(hint: usize) -> Self {
        Self {
            records: Arena::with_capacity(hint),
            counters: Arena::with_capacity(hint / 4 + 1),
        }
    }

    /// Inserts a record built from its own handle.
    pub fn insert_with<F>(&mut self, build: F) -> RecordId
    where
        F: FnOnce(RecordId) -> InvocationRecord,
    {
        RecordId::from_arena(
            self.records
                .insert_with(|index| build(RecordId::from_arena(index))),
        )
    }

    /// Shared access to a live record.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&InvocationRecord> {
        self.records.get(id.arena_index())
    }

    /// Exclusive access to a live record.
    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut InvocationRecord> {
        self.records.get_mut(id.arena_index())
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no record is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Live records.
    pub fn iter(&self) -> impl Iterator<Item = &InvocationRecord> {
        self.records.iter().map(|(_, record)| record)
    }

    /// Stamp of a live record.
    #[must_use]
    pub fn stamp_of(&self, id: RecordId) -> Option<&Stamp> {
        self.get(id).map(|r| &r.stamp)
    }

    /// True when the record's local parent has been aborted.
    #[must_use]
    pub fn parent_aborted(&self, id: RecordId) -> bool {
        self.get(id)
            .and_then(|r| r.parent)
            .and_then(|p| self.get(p))
            .is_some_and(|p| p.aborted)
    }

    /// True when the record lies strictly below the job `(target, owner)`,
    /// or its parent is already aborted.
    ///
    /// Redone work reuses stamps, so a prefix match alone can hit another
    /// owner's subtree. The record's ancestor one level below `target` must
    /// have been spawned by `owner`. When the local parent chain ends before
    /// that level the record is left alone; the node it was stolen from
    /// kills it with an abort of its own.
    #[must_use]
    pub fn is_abort_target(&self, id: RecordId, target: &Stamp, owner: &NodeId) -> bool {
        self.parent_aborted(id) || self.spawned_below(id, target, owner)
    }

    fn spawned_below(&self, id: RecordId, target: &Stamp, owner: &NodeId) -> bool {
        let Some(mut record) = self.get(id) else {
            return false;
        };
        if !record.stamp.is_descendant_of(target) {
            return false;
        }
        let anchor = target.depth() + 1;
        while record.stamp.depth() > anchor {
            match record.parent.and_then(|p| self.get(p)) {
                Some(parent) => record = parent,
                None => return false,
            }
        }
        record.parent_owner.as_ref() == Some(owner)
    }

    /// Frees a record together with every record it spawned.
    pub fn retire(&mut self, id: RecordId) {
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(record) = self.records.remove(next.arena_index()) {
                pending.extend(record.children);
                for counter in record.counters {
                    self.release_counter(counter);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Spawn counters
    // ------------------------------------------------------------------

    /// Allocates a counter at zero.
    pub fn new_counter(&mut self) -> CounterId {
        CounterId::from_arena(self.counters.insert(CounterSlot::default()))
    }

    /// Current value of a counter; dead counters read as zero.
    #[must_use]
    pub fn counter_value(&self, counter: CounterId) -> u32 {
        self.counters
            .get(counter.arena_index())
            .map_or(0, |c| c.value)
    }

    /// Number of live counters.
    #[must_use]
    pub fn live_counters(&self) -> usize {
        self.counters.len()
    }

    /// Counts one more pending child.
    pub fn increment(&mut self, counter: CounterId) {
        if let Some(c) = self.counters.get_mut(counter.arena_index()) {
            c.value += 1;
        }
    }

    /// Returns the counter to the free list if it is at zero.
    pub fn release_counter(&mut self, counter: CounterId) -> bool {
        if self.counter_value(counter) == 0 {
            self.counters.remove(counter.arena_index()).is_some()
        } else {
            false
        }
    }

    /// Settles the record's counter. Records without a counter (jobs owned
    /// elsewhere) are a no-op.
    ///
    /// A second settlement of the same record, or a counter that would drop
    /// below zero, is a consistency violation.
    pub fn decrement(&mut self, id: RecordId) -> Result<()> {
        let Some(record) = self.records.get_mut(id.arena_index()) else {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_message(format!("decrement of retired record {id:?}")));
        };
        let Some(counter) = record.counter else {
            return Ok(());
        };
        if record.decremented {
            return Err(Error::new(ErrorKind::DoubleDecrement)
                .with_message("spawn counter decremented twice")
                .with_stamp(&record.stamp));
        }
        record.decremented = true;
        let stamp = record.stamp.clone();
        match self.counters.get_mut(counter.arena_index()) {
            Some(c) if c.value > 0 => {
                c.value -= 1;
                Ok(())
            }
            _ => Err(Error::new(ErrorKind::CounterUnderflow)
                .with_message("spawn counter below zero")
                .with_stamp(&stamp)),
        }
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

    #[test]
    fn decrement_exactly_once() {
        init_test("decrement_exactly_once");
        let me = NodeId::new("a");
        let mut table = RecordTable::with_capacity(4);
        let job = insert_job(&mut table, &me, Stamp::root(0).child(0), None, true);
        let counter = table.get(job).and_then(|r| r.counter).unwrap();
        crate::assert_with_log!(
            table.counter_value(counter) == 1,
            "counter after spawn",
            1,
            table.counter_value(counter)
        );

        table.decrement(job).unwrap();
        assert_eq!(table.counter_value(counter), 0);
        let err = table.decrement(job).unwrap_err();
        crate::assert_with_log!(
            err.kind() == ErrorKind::DoubleDecrement,
            "second decrement",
            ErrorKind::DoubleDecrement,
            err.kind()
        );
        assert_eq!(table.counter_value(counter), 0);
        crate::test_complete!("decrement_exactly_once");
    }

    #[test]
    fn uncounted_record_decrement_is_noop() {
        init_test("uncounted_record_decrement_is_noop");
        let mut table = RecordTable::default();
        let job = insert_job(&mut table, &NodeId::new("b"), Stamp::root(0), None, false);
        table.decrement(job).unwrap();
        table.decrement(job).unwrap();
        crate::test_complete!("uncounted_record_decrement_is_noop");
    }

    #[test]
    fn counter_recycled_only_at_zero() {
        init_test("counter_recycled_only_at_zero");
        let mut table = RecordTable::default();
        let counter = table.new_counter();
        table.increment(counter);
        assert!(!table.release_counter(counter));
        assert_eq!(table.live_counters(), 1);
        let job = insert_job(&mut table, &NodeId::new("a"), Stamp::root(0), None, false);
        table.get_mut(job).unwrap().counter = Some(counter);
        table.decrement(job).unwrap();
        assert!(table.release_counter(counter));
        assert_eq!(table.live_counters(), 0);
        crate::test_complete!("counter_recycled_only_at_zero");
    }

    #[test]
    fn retire_frees_children_recursively() {
        init_test("retire_frees_children_recursively");
        let me = NodeId::new("a");
        let mut table = RecordTable::default();
        let root = insert_job(&mut table, &me, Stamp::root(0), None, false);
        let child = insert_job(&mut table, &me, Stamp::root(0).child(0), Some(root), false);
        let grandchild = insert_job(
            &mut table,
            &me,
            Stamp::root(0).child(0).child(0),
            Some(child),
            false,
        );
        table.get_mut(root).unwrap().children.push(child);
        table.get_mut(child).unwrap().children.push(grandchild);

        table.retire(root);
        crate::assert_with_log!(table.is_empty(), "all retired", 0, table.len());
        crate::test_complete!("retire_frees_children_recursively");
    }

    #[test]
    fn abort_target_covers_aborted_parent() {
        init_test("abort_target_covers_aborted_parent");
        let me = NodeId::new("a");
        let mut table = RecordTable::default();
        let parent = insert_job(&mut table, &me, Stamp::root(0).child(1), None, false);
        let child = insert_job(&mut table, &me, Stamp::root(0).child(1).child(0), Some(parent), true);
        let unrelated = Stamp::root(0).child(5);

        assert!(!table.is_abort_target(child, &unrelated, &me));
        table.get_mut(parent).unwrap().abort();
        assert!(table.is_abort_target(child, &unrelated, &me));
        crate::test_complete!("abort_target_covers_aborted_parent");
    }

    #[test]
    fn abort_target_requires_matching_lineage_owner() {
        init_test("abort_target_requires_matching_lineage_owner");
        let me = NodeId::new("a");
        let old = NodeId::new("w");
        let fresh = NodeId::new("m");
        let mut table = RecordTable::default();
        let target = Stamp::root(0).child(1);
        // stolen from `fresh`, same stamp the crashed `old` once handed out
        let frame = insert_job(&mut table, &fresh, target.child(3), None, false);
        let child = insert_job(&mut table, &me, target.child(3).child(0), Some(frame), true);
        table.get_mut(child).unwrap().parent_owner = Some(fresh.clone());
        // deep record whose local chain ends above the anchor level
        let loose = insert_job(&mut table, &fresh, target.child(4).child(0), None, false);

        for id in [frame, child, loose] {
            let hit = table.is_abort_target(id, &target, &old);
            crate::assert_with_log!(!hit, "other lineage untouched", false, hit);
        }
        assert!(table.is_abort_target(frame, &target, &fresh));
        assert!(table.is_abort_target(child, &target, &fresh));
        assert!(!table.is_abort_target(loose, &target, &fresh));
        assert!(table.is_abort_target(child, &target.child(3), &fresh));
        crate::test_complete!("abort_target_requires_matching_lineage_owner");
    }

    #[test]
    fn wire_round_trip_keeps_identity() {
        init_test("wire_round_trip_keeps_identity");
        let me = NodeId::new("a");
        let mut table = RecordTable::default();
        let job = insert_job(&mut table, &me, Stamp::root(0).child(2), None, true);
        table.get_mut(job).unwrap().re_done = true;
        let wire = table.get(job).unwrap().to_wire();
        let json = serde_json::to_string(&wire).unwrap();
        let back: WireRecord = serde_json::from_str(&json).unwrap();
        let copy = table.insert_with(|id| InvocationRecord::from_wire(id, back));
        let copy = table.get(copy).unwrap();
        assert_eq!(copy.stamp(), &Stamp::root(0).child(2));
        assert_eq!(copy.parent_stamp, Some(Stamp::root(0)));
        assert!(copy.is_redone());
        assert!(copy.counter.is_none());
        crate::test_complete!("wire_round_trip_keeps_identity");
    }
}
