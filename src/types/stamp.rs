//! Hierarchical job stamps.
//!
//! A stamp is the path from the spawn-tree root to a job: the root gets a
//! one-level stamp and the `n`th child spawned by a job gets the parent's
//! stamp extended by `n`. Descendant tests are therefore a prefix check and
//! never need the parent chain, which is unavailable for stolen jobs.
//!
//! A job that is redone after a crash is re-spawned by the same parent at the
//! same position, so it gets the same stamp again; the global result table is
//! keyed on exactly that property.

use core::fmt;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Path of per-level spawn counters from the root to a job.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp(SmallVec<[u32; 8]>);

impl Stamp {
    /// Stamp for the `sequence`th root job of a node.
    #[must_use]
    pub fn root(sequence: u32) -> Self {
        let mut levels = SmallVec::new();
        levels.push(sequence);
        Self(levels)
    }

    /// Stamp of the `index`th child of this job.
    #[must_use]
    pub fn child(&self, index: u32) -> Self {
        let mut levels = self.0.clone();
        levels.push(index);
        Self(levels)
    }

    /// Stamp of the job that spawned this one, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(SmallVec::from_slice(&self.0[..self.0.len() - 1])))
    }

    /// Number of levels, 1 for a root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// The raw path.
    #[must_use]
    pub fn levels(&self) -> &[u32] {
        &self.0
    }

    /// True when `ancestor` is a strict prefix of this stamp.
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &Self) -> bool {
        self.0.len() > ancestor.0.len() && self.0.starts_with(&ancestor.0)
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for level in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{level}")?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stamp({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_extends_path() {
        let root = Stamp::root(0);
        let child = root.child(3);
        let grandchild = child.child(1);
        assert_eq!(grandchild.levels(), &[0, 3, 1]);
        assert_eq!(grandchild.to_string(), "0.3.1");
        assert_eq!(grandchild.parent(), Some(child.clone()));
        assert_eq!(root.parent(), None);
        assert_eq!(grandchild.depth(), 3);
    }

    #[test]
    fn descendant_is_strict_prefix() {
        let root = Stamp::root(2);
        let a = root.child(0);
        let b = root.child(1);
        let a1 = a.child(7);
        assert!(a1.is_descendant_of(&a));
        assert!(a1.is_descendant_of(&root));
        assert!(!a1.is_descendant_of(&b));
        assert!(!a.is_descendant_of(&a));
        assert!(!root.is_descendant_of(&a));
        assert!(!Stamp::root(3).child(0).is_descendant_of(&root));
    }

    #[test]
    fn redone_child_gets_same_stamp() {
        let parent = Stamp::root(0).child(4);
        assert_eq!(parent.child(2), parent.child(2));
    }
}
