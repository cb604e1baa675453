//! The global result table.
//!
//! Maps a job key to what is known about the job's result: a `Lock` while a
//! node re-executes it, the `Result` itself, or a `Pointer` to the node that
//! holds the result. Stores are batched and flushed to every replica as one
//! update message.
//!
//! Merge rules, applied to local stores and to remote updates alike:
//!
//! - a `Result` is never replaced by anything;
//! - a `Lock` never replaces a `Result`;
//! - a `Pointer` replaces `Lock` and other `Pointer`s.
//!
//! Lookups ignore pointers and locks whose owner is known to be dead.

use crate::config::TableMode;
use crate::types::{NodeId, Payload, Stamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Key under which a job's result is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableKey {
    /// The job stamp.
    Stamp(Stamp),
    /// Computation name plus encoded parameters.
    Invocation {
        /// Registered computation name.
        computation: String,
        /// Encoded parameters.
        params: Payload,
    },
}

/// What the table knows about one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableValue {
    /// The named node is re-executing the job.
    Lock(NodeId),
    /// The job's return value.
    Result(Payload),
    /// The named node holds the return value.
    Pointer(NodeId),
}

/// A table entry as carried in update messages.
pub type TableEntry = (TableKey, TableValue);

/// Replicated or pointer-distributed result table of one node.
#[derive(Debug)]
pub struct GlobalResultTable {
    me: NodeId,
    mode: TableMode,
    entries: HashMap<TableKey, TableValue>,
    replicas: BTreeSet<NodeId>,
    dead: HashSet<NodeId>,
    pending: Vec<TableEntry>,
}

impl GlobalResultTable {
    /// Empty table for node `me`.
    #[must_use]
    pub fn new(me: NodeId, mode: TableMode) -> Self {
        Self {
            me,
            mode,
            entries: HashMap::new(),
            replicas: BTreeSet::new(),
            dead: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current value for `key`. Pointers and locks held by dead nodes read
    /// as a miss.
    #[must_use]
    pub fn lookup(&self, key: &TableKey) -> Option<&TableValue> {
        match self.entries.get(key)? {
            TableValue::Pointer(owner) | TableValue::Lock(owner) if self.dead.contains(owner) => {
                None
            }
            value => Some(value),
        }
    }

    /// Stores a finished result and queues the update for the replicas.
    pub fn store_result(&mut self, key: TableKey, result: Payload) {
        let announced = match self.mode {
            TableMode::Replicated => TableValue::Result(result.clone()),
            TableMode::Distributed => TableValue::Pointer(self.me.clone()),
        };
        let fresh = !matches!(self.entries.get(&key), Some(TableValue::Result(_)));
        self.entries.insert(key.clone(), TableValue::Result(result));
        if fresh && !self.replicas.is_empty() {
            self.pending.push((key, announced));
        }
    }

    /// Marks the job as being re-executed here. Returns false if a result is
    /// already known.
    pub fn store_lock(&mut self, key: TableKey) -> bool {
        if matches!(self.entries.get(&key), Some(TableValue::Result(_))) {
            return false;
        }
        let lock = TableValue::Lock(self.me.clone());
        self.entries.insert(key.clone(), lock.clone());
        if !self.replicas.is_empty() {
            self.pending.push((key, lock));
        }
        true
    }

    /// Drops an entry that turned out to be stale.
    pub fn forget(&mut self, key: &TableKey) {
        if !matches!(self.entries.get(key), Some(TableValue::Result(_))) {
            self.entries.remove(key);
        }
    }

    /// Merges entries received from another node.
    pub fn add_contents(&mut self, entries: Vec<TableEntry>) {
        for (key, value) in entries {
            let have_result = matches!(self.entries.get(&key), Some(TableValue::Result(_)));
            let points_here = matches!(
                &value,
                TableValue::Pointer(owner) | TableValue::Lock(owner) if owner == &self.me
            );
            if !have_result && !points_here {
                self.entries.insert(key, value);
            }
        }
    }

    /// The whole table as handed to a newcomer: entries held here are
    /// rewritten as pointers to this node.
    #[must_use]
    pub fn contents(&self) -> Vec<TableEntry> {
        self.entries
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    TableValue::Result(_) | TableValue::Lock(_) => TableValue::Pointer(self.me.clone()),
                    TableValue::Pointer(owner) => TableValue::Pointer(owner.clone()),
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Results held locally, as pushed by a leaving node.
    #[must_use]
    pub fn local_results(&self) -> Vec<TableEntry> {
        self.entries
            .iter()
            .filter(|(_, value)| matches!(value, TableValue::Result(_)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Starts replicating to `node`.
    pub fn add_replica(&mut self, node: NodeId) {
        if node != self.me {
            self.dead.remove(&node);
            self.replicas.insert(node);
        }
    }

    /// Stops replicating to `node` and treats its pointers as stale.
    pub fn remove_replica(&mut self, node: &NodeId) {
        self.replicas.remove(node);
        self.dead.insert(node.clone());
    }

    /// True if `node` is known dead.
    #[must_use]
    pub fn is_dead(&self, node: &NodeId) -> bool {
        self.dead.contains(node)
    }

    /// Takes the batched updates and the replicas to send them to.
    pub fn take_updates(&mut self) -> Option<(Vec<NodeId>, Vec<TableEntry>)> {
        if self.pending.is_empty() {
            return None;
        }
        let updates = std::mem::take(&mut self.pending);
        if self.replicas.is_empty() {
            return None;
        }
        Some((self.replicas.iter().cloned().collect(), updates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn key(i: u32) -> TableKey {
        TableKey::Stamp(Stamp::root(0).child(i))
    }

    fn payload(v: u64) -> Payload {
        Payload::encode(&v).unwrap()
    }

    #[test]
    fn result_never_downgraded() {
        init_test("result_never_downgraded");
        let mut table = GlobalResultTable::new(NodeId::new("a"), TableMode::Replicated);
        table.store_result(key(1), payload(7));
        let locked = table.store_lock(key(1));
        crate::assert_with_log!(!locked, "lock refused over result", false, locked);
        table.add_contents(vec![
            (key(1), TableValue::Pointer(NodeId::new("b"))),
            (key(1), TableValue::Lock(NodeId::new("b"))),
        ]);
        assert_eq!(table.lookup(&key(1)), Some(&TableValue::Result(payload(7))));
        table.forget(&key(1));
        assert!(table.lookup(&key(1)).is_some());
        crate::test_complete!("result_never_downgraded");
    }

    #[test]
    fn replicated_updates_carry_results() {
        init_test("replicated_updates_carry_results");
        let mut table = GlobalResultTable::new(NodeId::new("a"), TableMode::Replicated);
        table.store_result(key(0), payload(1));
        assert!(table.take_updates().is_none());

        table.add_replica(NodeId::new("b"));
        table.add_replica(NodeId::new("a"));
        table.store_result(key(2), payload(2));
        table.store_result(key(2), payload(2));
        let (to, updates) = table.take_updates().unwrap();
        assert_eq!(to, vec![NodeId::new("b")]);
        assert_eq!(updates, vec![(key(2), TableValue::Result(payload(2)))]);
        assert!(table.take_updates().is_none());
        crate::test_complete!("replicated_updates_carry_results");
    }

    #[test]
    fn distributed_updates_carry_pointers() {
        init_test("distributed_updates_carry_pointers");
        let mut table = GlobalResultTable::new(NodeId::new("a"), TableMode::Distributed);
        table.add_replica(NodeId::new("b"));
        table.store_result(key(3), payload(3));
        let (_, updates) = table.take_updates().unwrap();
        assert_eq!(updates, vec![(key(3), TableValue::Pointer(NodeId::new("a")))]);
        assert_eq!(table.lookup(&key(3)), Some(&TableValue::Result(payload(3))));
        crate::test_complete!("distributed_updates_carry_pointers");
    }

    #[test]
    fn dead_pointer_is_a_miss() {
        init_test("dead_pointer_is_a_miss");
        let mut table = GlobalResultTable::new(NodeId::new("a"), TableMode::Distributed);
        let holder = NodeId::new("c");
        table.add_replica(holder.clone());
        table.add_contents(vec![(key(4), TableValue::Pointer(holder.clone()))]);
        assert_eq!(table.lookup(&key(4)), Some(&TableValue::Pointer(holder.clone())));
        table.remove_replica(&holder);
        let hit = table.lookup(&key(4));
        crate::assert_with_log!(hit.is_none(), "dead pointer", None::<&TableValue>, hit);
        crate::test_complete!("dead_pointer_is_a_miss");
    }

    #[test]
    fn contents_rewrites_local_entries_as_pointers() {
        init_test("contents_rewrites_local_entries_as_pointers");
        let me = NodeId::new("a");
        let mut table = GlobalResultTable::new(me.clone(), TableMode::Replicated);
        table.store_result(key(5), payload(5));
        table.add_contents(vec![(key(6), TableValue::Pointer(NodeId::new("d")))]);
        let mut contents = table.contents();
        contents.sort_by_key(|(k, _)| format!("{k:?}"));
        assert_eq!(
            contents,
            vec![
                (key(5), TableValue::Pointer(me)),
                (key(6), TableValue::Pointer(NodeId::new("d"))),
            ]
        );
        assert_eq!(table.local_results().len(), 1);
        crate::test_complete!("contents_rewrites_local_entries_as_pointers");
    }
}
