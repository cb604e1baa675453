//! Identifier types.
//!
//! [`NodeId`] names a participating process and travels on the wire.
//! [`RecordId`] and [`CounterId`] are local handles into the record and
//! counter pools; they never leave the node that issued them.

use crate::util::ArenaIndex;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identity of a node in the computation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Creates a node identity from its name.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The node name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Locality group a node belongs to.
pub type ClusterName = Arc<str>;

/// Handle to an invocation record in this node's record pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub(crate) ArenaIndex);

impl RecordId {
    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({:?})", self.0)
    }
}

/// Handle to a spawn counter in this node's counter pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterId(pub(crate) ArenaIndex);

impl CounterId {
    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }
}

impl fmt::Debug for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CounterId({:?})", self.0)
    }
}
