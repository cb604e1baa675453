//! Known peers, grouped by cluster.
//!
//! Membership follows the transport's join, leave and crash notifications.
//! The local node is never a member of its own table.

use crate::types::{ClusterName, NodeId};
use crate::util::DetRng;
use std::collections::BTreeMap;

/// Peers this node may steal from.
#[derive(Debug)]
pub struct VictimTable {
    me: NodeId,
    my_cluster: ClusterName,
    victims: Vec<NodeId>,
    clusters: BTreeMap<ClusterName, Vec<NodeId>>,
    cluster_of: BTreeMap<NodeId, ClusterName>,
}

impl VictimTable {
    /// Empty table for node `me` in cluster `my_cluster`.
    #[must_use]
    pub fn new(me: NodeId, my_cluster: ClusterName) -> Self {
        Self {
            me,
            my_cluster,
            victims: Vec::new(),
            clusters: BTreeMap::new(),
            cluster_of: BTreeMap::new(),
        }
    }

    /// Adds a peer. Returns false for the local node or a known peer.
    pub fn add(&mut self, node: NodeId, cluster: ClusterName) -> bool {
        if node == self.me || self.cluster_of.contains_key(&node) {
            return false;
        }
        self.victims.push(node.clone());
        self.clusters
            .entry(cluster.clone())
            .or_default()
            .push(node.clone());
        self.cluster_of.insert(node, cluster);
        true
    }

    /// Removes a peer. Returns false if it was unknown.
    pub fn remove(&mut self, node: &NodeId) -> bool {
        let Some(cluster) = self.cluster_of.remove(node) else {
            return false;
        };
        self.victims.retain(|v| v != node);
        if let Some(members) = self.clusters.get_mut(&cluster) {
            members.retain(|v| v != node);
            if members.is_empty() {
                self.clusters.remove(&cluster);
            }
        }
        true
    }

    /// True if `node` is a known peer.
    #[must_use]
    pub fn contains(&self, node: &NodeId) -> bool {
        self.cluster_of.contains_key(node)
    }

    /// Number of peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.victims.len()
    }

    /// True when no peer is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }

    /// All peers in join order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.victims
    }

    /// Cluster of a peer.
    #[must_use]
    pub fn cluster_of(&self, node: &NodeId) -> Option<&ClusterName> {
        self.cluster_of.get(node)
    }

    /// Any peer, uniformly.
    pub fn random_victim(&self, rng: &mut DetRng) -> Option<NodeId> {
        rng.choose(&self.victims).cloned()
    }

    /// A peer in the local cluster.
    pub fn random_local_victim(&self, rng: &mut DetRng) -> Option<NodeId> {
        let members = self.clusters.get(&self.my_cluster)?;
        rng.choose(members).cloned()
    }

    /// A peer in another cluster: first a cluster, then a member of it.
    pub fn random_remote_victim(&self, rng: &mut DetRng) -> Option<NodeId> {
        let remote: Vec<&Vec<NodeId>> = self
            .clusters
            .iter()
            .filter(|(name, _)| **name != self.my_cluster)
            .map(|(_, members)| members)
            .collect();
        let members = rng.choose(&remote)?;
        rng.choose(members.as_slice()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use proptest::prelude::*;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn table() -> VictimTable {
        VictimTable::new(NodeId::new("a"), ClusterName::from("vu"))
    }

    #[test]
    fn self_is_never_a_victim() {
        init_test("self_is_never_a_victim");
        let mut victims = table();
        let added = victims.add(NodeId::new("a"), ClusterName::from("vu"));
        crate::assert_with_log!(!added, "self refused", false, added);
        assert!(victims.is_empty());
        let mut rng = DetRng::new(1);
        assert_eq!(victims.random_victim(&mut rng), None);
        crate::test_complete!("self_is_never_a_victim");
    }

    #[test]
    fn local_and_remote_selection_respect_clusters() {
        init_test("local_and_remote_selection_respect_clusters");
        let mut victims = table();
        assert!(victims.add(NodeId::new("b"), ClusterName::from("vu")));
        assert!(victims.add(NodeId::new("c"), ClusterName::from("uva")));
        assert!(!victims.add(NodeId::new("b"), ClusterName::from("vu")));
        let mut rng = DetRng::new(3);
        for _ in 0..20 {
            assert_eq!(victims.random_local_victim(&mut rng), Some(NodeId::new("b")));
            assert_eq!(victims.random_remote_victim(&mut rng), Some(NodeId::new("c")));
        }
        crate::test_complete!("local_and_remote_selection_respect_clusters");
    }

    #[test]
    fn remove_drops_empty_cluster() {
        init_test("remove_drops_empty_cluster");
        let mut victims = table();
        victims.add(NodeId::new("c"), ClusterName::from("uva"));
        assert!(victims.remove(&NodeId::new("c")));
        assert!(!victims.remove(&NodeId::new("c")));
        let mut rng = DetRng::new(3);
        assert_eq!(victims.random_remote_victim(&mut rng), None);
        assert_eq!(victims.cluster_of(&NodeId::new("c")), None);
        crate::test_complete!("remove_drops_empty_cluster");
    }

    proptest! {
        #[test]
        fn self_never_enters_under_any_membership_churn(
            ops in prop::collection::vec((any::<bool>(), 0usize..5, 0usize..2), 0..40),
            seed in any::<u64>(),
        ) {
            init_test("self_never_enters_under_any_membership_churn");
            let names = ["a", "b", "c", "d", "e"];
            let clusters = ["vu", "uva"];
            let me = NodeId::new("a");
            let mut victims = table();
            for (join, who, cluster) in ops {
                let node = NodeId::new(names[who]);
                if join {
                    victims.add(node, ClusterName::from(clusters[cluster]));
                } else {
                    victims.remove(&node);
                }
                prop_assert!(!victims.contains(&me));
                prop_assert!(!victims.nodes().contains(&me));
            }
            let mut rng = DetRng::new(seed);
            for _ in 0..8 {
                prop_assert_ne!(victims.random_victim(&mut rng), Some(me.clone()));
                prop_assert_ne!(victims.random_local_victim(&mut rng), Some(me.clone()));
                prop_assert_ne!(victims.random_remote_victim(&mut rng), Some(me.clone()));
            }
            let mut unique = victims.nodes().to_vec();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(unique.len(), victims.len());
            crate::test_complete!("self_never_enters_under_any_membership_churn");
        }
    }
}
