//! Clusters and the per-group partition.
//!
//! A [`ClusterSet`] owns every cluster of one last-name group as an arena
//! addressed by [`ClusterId`] handles. Merging is destructive and O(1) in
//! handle terms: the absorbed slot is emptied and its hate references are
//! rewritten to the survivor. Clusters are never split — a split is
//! expressed as a hate edge preventing the merge in the first place.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::catalog::Catalog;
use crate::error::EngineError;
use crate::signature::{PersonId, Signature};

/// Handle of a cluster inside its [`ClusterSet`]. Stale after the cluster
/// has been absorbed by a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterId(usize);

impl ClusterId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// A set of signatures currently believed to be one person, plus the
/// clusters it can never be merged with.
#[derive(Debug, Clone)]
pub struct Cluster {
    members: Vec<Signature>,
    hate: BTreeSet<ClusterId>,
}

impl Cluster {
    pub fn members(&self) -> &[Signature] {
        &self.members
    }

    pub fn hated(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.hate.iter().copied()
    }
}

/// The full partition of one last-name group.
///
/// Invariant: every signature of the group belongs to exactly one live
/// cluster at all times.
#[derive(Debug, Clone)]
pub struct ClusterSet {
    group: String,
    arena: Vec<Option<Cluster>>,
}

impl ClusterSet {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            arena: Vec::new(),
        }
    }

    /// Initial partition for a group: confirmed assignments pre-merge
    /// clusters per person, rejected assignments become hate edges between
    /// the rejecting person's cluster and the cluster now holding the
    /// signature, everything else starts as a singleton.
    pub fn from_catalog(
        group: &str,
        signatures: &[Signature],
        catalog: &dyn Catalog,
    ) -> Result<Self, EngineError> {
        let mut sorted: Vec<Signature> = signatures.to_vec();
        sorted.sort();
        for window in sorted.windows(2) {
            if window[0] == window[1] {
                return Err(EngineError::DuplicateSignature {
                    group: group.to_string(),
                    signature: window[0],
                });
            }
        }

        let mut set = Self::new(group);

        // Confirmed assignments, grouped by person, become pre-merged
        // clusters. BTreeMap keeps person iteration deterministic.
        let mut by_person: BTreeMap<PersonId, Vec<Signature>> = BTreeMap::new();
        for (sig, person) in catalog.confirmed(group) {
            if sorted.binary_search(&sig).is_ok() {
                by_person.entry(person).or_default().push(sig);
            }
        }

        let mut claimed: BTreeSet<Signature> = BTreeSet::new();
        let mut person_cluster: BTreeMap<PersonId, ClusterId> = BTreeMap::new();
        for (person, mut members) in by_person {
            members.sort();
            members.dedup();
            members.retain(|m| claimed.insert(*m));
            if members.is_empty() {
                continue;
            }
            let id = set.insert(members);
            person_cluster.insert(person, id);
        }

        for sig in &sorted {
            if !claimed.contains(sig) {
                set.insert(vec![*sig]);
            }
        }

        let owners = set.signature_owners();
        for (sig, person) in catalog.rejected(group) {
            let (Some(&sig_cluster), Some(&rejecting)) =
                (owners.get(&sig), person_cluster.get(&person))
            else {
                continue;
            };
            if sig_cluster != rejecting {
                set.add_hate(sig_cluster, rejecting);
            }
        }

        Ok(set)
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Insert a new cluster and return its handle.
    pub fn insert(&mut self, members: Vec<Signature>) -> ClusterId {
        let id = ClusterId(self.arena.len());
        self.arena.push(Some(Cluster {
            members,
            hate: BTreeSet::new(),
        }));
        id
    }

    /// Live cluster handles in creation order.
    pub fn ids(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.arena
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| ClusterId(i)))
    }

    /// Upper bound for handle indices, live or not.
    pub(crate) fn capacity(&self) -> usize {
        self.arena.len()
    }

    /// Number of live clusters.
    pub fn len(&self) -> usize {
        self.arena.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Access a live cluster. Panics on a stale handle — using one is a
    /// programming error, not a data condition.
    pub fn cluster(&self, id: ClusterId) -> &Cluster {
        self.arena[id.0]
            .as_ref()
            .expect("cluster handle is stale: cluster was absorbed")
    }

    /// Symmetric, run-permanent "never merge" constraint.
    pub fn add_hate(&mut self, a: ClusterId, b: ClusterId) {
        if a == b {
            return;
        }
        if let Some(cluster) = self.arena[a.0].as_mut() {
            cluster.hate.insert(b);
        }
        if let Some(cluster) = self.arena[b.0].as_mut() {
            cluster.hate.insert(a);
        }
    }

    pub fn hates(&self, a: ClusterId, b: ClusterId) -> bool {
        self.arena[a.0]
            .as_ref()
            .map(|c| c.hate.contains(&b))
            .unwrap_or(false)
    }

    /// Merge `absorbed` into `survivor`. The absorbed handle becomes
    /// stale; hate sets are unioned and back-references rewritten, so a
    /// constraint against either side survives the merge.
    pub fn merge_into(
        &mut self,
        survivor: ClusterId,
        absorbed: ClusterId,
    ) -> Result<(), EngineError> {
        if survivor == absorbed {
            return Ok(());
        }
        if self.hates(survivor, absorbed) {
            return Err(EngineError::MergeOfHatingClusters);
        }
        let Some(absorbed_cluster) = self.arena[absorbed.0].take() else {
            return Ok(());
        };
        for hated in &absorbed_cluster.hate {
            if let Some(cluster) = self.arena[hated.0].as_mut() {
                cluster.hate.remove(&absorbed);
                if *hated != survivor {
                    cluster.hate.insert(survivor);
                }
            }
        }
        if let Some(cluster) = self.arena[survivor.0].as_mut() {
            cluster.members.extend(absorbed_cluster.members);
            for hated in absorbed_cluster.hate {
                if hated != survivor {
                    cluster.hate.insert(hated);
                }
            }
        }
        Ok(())
    }

    /// Every signature of the partition, in cluster order.
    pub fn all_signatures(&self) -> Vec<Signature> {
        self.ids()
            .flat_map(|id| self.cluster(id).members().iter().copied())
            .collect()
    }

    /// Map each signature to the cluster currently holding it.
    pub fn signature_owners(&self) -> HashMap<Signature, ClusterId> {
        let mut owners = HashMap::new();
        for id in self.ids() {
            for sig in self.cluster(id).members() {
                owners.insert(*sig, id);
            }
        }
        owners
    }

    /// The partition as sorted signature sets, for output and for
    /// set-of-sets equality in tests.
    pub fn partitions(&self) -> Vec<Vec<Signature>> {
        let mut parts: Vec<Vec<Signature>> = self
            .ids()
            .map(|id| {
                let mut members = self.cluster(id).members().to_vec();
                members.sort();
                members
            })
            .collect();
        parts.sort();
        parts
    }

    /// Defect check: every signature in exactly one live cluster.
    pub fn verify(&self) -> Result<(), EngineError> {
        let mut seen = BTreeSet::new();
        for id in self.ids() {
            for sig in self.cluster(id).members() {
                if !seen.insert(*sig) {
                    return Err(EngineError::DuplicateSignature {
                        group: self.group.clone(),
                        signature: *sig,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;

    fn sig(r: u64) -> Signature {
        Signature::new(100, r, r)
    }

    #[test]
    fn merge_moves_members() {
        let mut set = ClusterSet::new("test");
        let a = set.insert(vec![sig(1)]);
        let b = set.insert(vec![sig(2)]);
        set.merge_into(a, b).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.cluster(a).members(), &[sig(1), sig(2)]);
    }

    #[test]
    fn merge_unions_hate_sets() {
        let mut set = ClusterSet::new("test");
        let a = set.insert(vec![sig(1)]);
        let b = set.insert(vec![sig(2)]);
        let c = set.insert(vec![sig(3)]);
        set.add_hate(a, c);
        set.add_hate(b, c);
        set.merge_into(a, b).unwrap();
        assert!(set.hates(a, c));
        assert!(set.hates(c, a));
        // The back-reference to the absorbed handle is gone.
        assert!(!set.cluster(c).hated().any(|h| h == b));
    }

    #[test]
    fn hate_survives_merge_of_unrelated_side() {
        let mut set = ClusterSet::new("test");
        let x = set.insert(vec![sig(1)]);
        let y = set.insert(vec![sig(2)]);
        let z = set.insert(vec![sig(3)]);
        set.add_hate(x, z);
        set.merge_into(x, y).unwrap();
        assert!(set.hates(x, z));
        assert!(set.merge_into(x, z).is_err());
    }

    #[test]
    fn merge_of_hating_clusters_is_rejected() {
        let mut set = ClusterSet::new("test");
        let a = set.insert(vec![sig(1)]);
        let b = set.insert(vec![sig(2)]);
        set.add_hate(a, b);
        assert!(matches!(
            set.merge_into(a, b),
            Err(EngineError::MergeOfHatingClusters)
        ));
    }

    #[test]
    fn from_catalog_premerges_confirmed() {
        let mut cat = InMemoryCatalog::new();
        cat.add_signature(Signature::new(100, 1, 10), "Ellis, J.");
        cat.add_signature(Signature::new(100, 2, 11), "Ellis, John");
        cat.add_signature(Signature::new(100, 3, 12), "Ellis, Jane");
        cat.confirm(Signature::new(100, 1, 10), PersonId(5));
        cat.confirm(Signature::new(100, 2, 11), PersonId(5));
        let sigs = [
            Signature::new(100, 1, 10),
            Signature::new(100, 2, 11),
            Signature::new(100, 3, 12),
        ];
        let set = ClusterSet::from_catalog("ellis", &sigs, &cat).unwrap();
        assert_eq!(set.len(), 2);
        let parts = set.partitions();
        assert!(parts.contains(&vec![
            Signature::new(100, 1, 10),
            Signature::new(100, 2, 11)
        ]));
    }

    #[test]
    fn from_catalog_rejection_becomes_hate() {
        let mut cat = InMemoryCatalog::new();
        cat.add_signature(Signature::new(100, 1, 10), "Ellis, J.");
        cat.add_signature(Signature::new(100, 2, 11), "Ellis, John");
        cat.confirm(Signature::new(100, 1, 10), PersonId(5));
        cat.reject(Signature::new(100, 2, 11), PersonId(5));
        let sigs = [Signature::new(100, 1, 10), Signature::new(100, 2, 11)];
        let set = ClusterSet::from_catalog("ellis", &sigs, &cat).unwrap();
        let owners = set.signature_owners();
        let a = owners[&Signature::new(100, 1, 10)];
        let b = owners[&Signature::new(100, 2, 11)];
        assert!(set.hates(a, b));
    }

    #[test]
    fn verify_catches_duplicates() {
        let mut set = ClusterSet::new("test");
        set.insert(vec![sig(1)]);
        set.insert(vec![sig(1)]);
        assert!(matches!(
            set.verify(),
            Err(EngineError::DuplicateSignature { .. })
        ));
    }

    #[test]
    fn duplicate_input_signatures_are_a_defect() {
        let cat = InMemoryCatalog::new();
        let sigs = [sig(1), sig(1)];
        assert!(ClusterSet::from_catalog("test", &sigs, &cat).is_err());
    }
}
