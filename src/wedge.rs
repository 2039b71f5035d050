//! The wedge clustering algorithm.
//!
//! Wedge refines a [`ClusterSet`] against a [`ProbabilityMatrix`]: assign
//! dense indices, meld each cluster's member edges into one vector, apply
//! the forced (`ForceSame`/`ForceDifferent`) edges, then walk the remaining
//! edges best-first and merge whenever the bidirectional compatibility sum
//! clears the threshold. Melding keeps per-merge cost proportional to the
//! number of clusters rather than the number of signatures.
//!
//! The decision constants (ε, the halved Gini-weighted average, the
//! `coverage/10` tie-break, the `threshold/4` edge cut) are empirically
//! tuned and load-bearing; treat them as part of the contract.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::cluster::{ClusterId, ClusterSet};
use crate::config::WedgeConfig;
use crate::error::EngineError;
use crate::matrix::{Entry, ProbabilityMatrix};
use crate::signature::Signature;

/// Scores whose cluster-pair average falls below this cannot support a
/// merge decision.
const EPS: f64 = 0.01;

/// Meld two edge vectors entrywise, weighting by cluster size.
///
/// Sentinels on either side win (left side first). An absent entry on one
/// side is a weight-zero contribution: the other side passes through
/// unchanged.
pub(crate) fn meld_edges(a: &[Entry], size_a: usize, b: &[Entry], size_b: usize) -> Vec<Entry> {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| meld_cell(x, size_a, y, size_b))
        .collect()
}

fn meld_cell(x: Entry, size_x: usize, y: Entry, size_y: usize) -> Entry {
    use Entry::*;
    match (x, y) {
        (ForceSame, _) | (ForceDifferent, _) => x,
        (_, ForceSame) | (_, ForceDifferent) => y,
        (Absent, other) | (other, Absent) => other,
        (Score(score_x, cov_x), Score(score_y, cov_y)) => {
            let wx = cov_x * size_x as f64;
            let wy = cov_y * size_y as f64;
            if wx + wy <= 0.0 {
                Score(0.0, 0.0)
            } else {
                Score(
                    (score_x * wx + score_y * wy) / (wx + wy),
                    (wx + wy) / (size_x + size_y) as f64,
                )
            }
        }
    }
}

struct WedgeState {
    dense: Vec<Signature>,
    dense_of: HashMap<Signature, usize>,
    /// Dense signature index -> cluster currently holding it.
    owner: Vec<ClusterId>,
    /// Melded edge vector per live cluster, indexed by handle.
    vectors: Vec<Option<Vec<Entry>>>,
}

struct Edge {
    a: usize,
    b: usize,
    score: f64,
    coverage: f64,
}

impl Edge {
    fn sort_key(&self) -> f64 {
        // probability + certainty / 10
        self.score + self.coverage / 10.0
    }
}

/// Run wedge over a cluster set. Deterministic for a fixed edge ordering
/// and threshold; the threshold is read once, here.
pub fn wedge(
    cluster_set: &mut ClusterSet,
    matrix: &ProbabilityMatrix,
    config: &WedgeConfig,
) -> Result<(), EngineError> {
    cluster_set.verify()?;
    let threshold = config.threshold;
    let edge_cut = threshold / 4.0;

    // Step 1a: dense indices over all signatures, in cluster order.
    let mut dense = Vec::new();
    let mut dense_of = HashMap::new();
    let mut owner = Vec::new();
    let ids: Vec<ClusterId> = cluster_set.ids().collect();
    for &id in &ids {
        let members = cluster_set.cluster(id).members();
        if members.is_empty() {
            return Err(EngineError::EmptyCluster {
                group: cluster_set.group().to_string(),
            });
        }
        for sig in members {
            dense_of.insert(*sig, dense.len());
            owner.push(id);
            dense.push(*sig);
        }
    }
    let n = dense.len();

    // Step 1b: one melded edge vector per cluster. Entries toward the
    // cluster's own members and toward hated clusters stay absent; an
    // absent cache value anywhere else means the cache was built for a
    // different cluster set and the group must fail.
    let mut vectors: Vec<Option<Vec<Entry>>> = vec![None; cluster_set.capacity()];
    for &id in &ids {
        let mut acc: Option<Vec<Entry>> = None;
        let mut acc_size = 0usize;
        for sig in cluster_set.cluster(id).members() {
            let mut pointer = vec![Entry::Absent; n];
            for &other in &ids {
                if other == id || cluster_set.hates(id, other) {
                    continue;
                }
                for target in cluster_set.cluster(other).members() {
                    let entry = matrix.get(sig, target)?;
                    if entry == Entry::Absent {
                        return Err(EngineError::MissingComparison {
                            a: *sig,
                            b: *target,
                        });
                    }
                    pointer[dense_of[target]] = entry;
                }
            }
            acc = Some(match acc {
                None => pointer,
                Some(prev) => meld_edges(&prev, acc_size, &pointer, 1),
            });
            acc_size += 1;
        }
        vectors[id.index()] = acc;
    }

    let mut state = WedgeState {
        dense,
        dense_of,
        owner,
        vectors,
    };

    // Step 2a: harvest edges from the initial vectors. One row per
    // cluster, one entry per target signature.
    let mut plus = Vec::new();
    let mut minus = Vec::new();
    let mut edges = Vec::new();
    for &id in &ids {
        let row = state.vectors[id.index()]
            .as_ref()
            .expect("live cluster has an edge vector");
        let a = state.dense_of[&cluster_set.cluster(id).members()[0]];
        for (b, cell) in row.iter().enumerate() {
            match *cell {
                Entry::Score(score, coverage) if score > edge_cut => edges.push(Edge {
                    a,
                    b,
                    score,
                    coverage,
                }),
                Entry::Score(..) | Entry::Absent => {}
                Entry::ForceSame => plus.push((a, b)),
                Entry::ForceDifferent => minus.push((a, b)),
            }
        }
    }
    debug!(
        group = cluster_set.group(),
        plus = plus.len(),
        minus = minus.len(),
        edges = edges.len(),
        "wedge_edges_grouped"
    );

    // Step 2b: agglomerate the obvious clusters, then divide the obvious
    // non-clusters.
    for (a, b) in plus {
        let (c1, c2) = (state.owner[a], state.owner[b]);
        if c1 != c2 && !cluster_set.hates(c1, c2) {
            join(cluster_set, &mut state, c1, c2)?;
        }
    }
    for (a, b) in minus {
        let (c1, c2) = (state.owner[a], state.owner[b]);
        if c1 != c2 && !cluster_set.hates(c1, c2) {
            cluster_set.add_hate(c1, c2);
        }
    }

    // Step 3: best edges first; sort_by is stable, so ties keep harvest
    // order and the whole walk stays deterministic.
    edges.sort_by(|x, y| y.sort_key().total_cmp(&x.sort_key()));

    // Step 4: greedy decisions. A pair that fails the threshold is not
    // revisited and gains no hate edge.
    let mut decided: HashSet<(ClusterId, ClusterId)> = HashSet::new();
    for edge in &edges {
        let (mut c1, mut c2) = (state.owner[edge.a], state.owner[edge.b]);
        if c1 == c2 || cluster_set.hates(c1, c2) {
            continue;
        }
        if c2 < c1 {
            std::mem::swap(&mut c1, &mut c2);
        }
        if decided.contains(&(c1, c2)) {
            continue;
        }
        let forward = compare_to(cluster_set, &state, c1, c2)?;
        let backward = compare_to(cluster_set, &state, c2, c1)?;
        if forward + backward > threshold {
            debug!(
                group = cluster_set.group(),
                score = forward + backward,
                "wedge_join"
            );
            join(cluster_set, &mut state, c1, c2)?;
        } else {
            decided.insert((c1, c2));
        }
    }

    // Step 5: transient state drops here; members were kept as real
    // signatures throughout.
    cluster_set.verify()?;
    Ok(())
}

/// Directional compatibility of `c1` toward `c2`, in [0, 0.5].
///
/// Inspects the raw melded pointers from `c1` to every member of `c2`:
/// any `ForceDifferent` vetoes, any `ForceSame` pins 0.5, otherwise the
/// value distribution is weighed by a Gini coefficient so that one strong
/// pointer among weak ones does not fake a confident match.
fn compare_to(
    cluster_set: &ClusterSet,
    state: &WedgeState,
    c1: ClusterId,
    c2: ClusterId,
) -> Result<f64, EngineError> {
    let row = state.vectors[c1.index()]
        .as_ref()
        .expect("live cluster has an edge vector");
    let members = cluster_set.cluster(c2).members();
    if members.is_empty() {
        return Err(EngineError::EdgelessClusterPair {
            group: cluster_set.group().to_string(),
        });
    }

    let mut pointers = Vec::with_capacity(members.len());
    let mut any_same = false;
    for sig in members {
        match row[state.dense_of[sig]] {
            Entry::ForceDifferent => return Ok(0.0),
            Entry::ForceSame => any_same = true,
            Entry::Score(score, coverage) => pointers.push((score, coverage)),
            Entry::Absent => {
                return Err(EngineError::MissingComparison {
                    a: cluster_set.cluster(c1).members()[0],
                    b: *sig,
                })
            }
        }
    }
    if any_same {
        return Ok(0.5);
    }
    if pointers.is_empty() {
        return Err(EngineError::EdgelessClusterPair {
            group: cluster_set.group().to_string(),
        });
    }

    let n = pointers.len() as f64;
    let avg = pointers.iter().map(|(score, _)| score).sum::<f64>() / n;
    if avg <= EPS {
        return Ok(0.0);
    }

    let mut weights: Vec<f64> = pointers
        .iter()
        .map(|(score, coverage)| (score / avg).powf(*coverage))
        .collect();
    weights.sort_by(|a, b| b.total_cmp(a));
    let dividend: f64 = weights
        .iter()
        .enumerate()
        .map(|(i, w)| w * (2 * i + 1) as f64)
        .sum();
    let gini = dividend / (n * weights.iter().sum::<f64>());

    let coverage_sum: f64 = pointers.iter().map(|(_, coverage)| coverage).sum();
    if coverage_sum <= 0.0 {
        return Ok(0.0);
    }
    let weighted_avg = pointers
        .iter()
        .map(|(score, coverage)| score * coverage)
        .sum::<f64>()
        / coverage_sum;

    Ok(gini * weighted_avg / 2.0)
}

/// Merge `absorbed` into `survivor`: meld vectors (sized by member
/// counts), retarget the absorbed members, and let the cluster set union
/// the hate sets.
fn join(
    cluster_set: &mut ClusterSet,
    state: &mut WedgeState,
    survivor: ClusterId,
    absorbed: ClusterId,
) -> Result<(), EngineError> {
    let size_a = cluster_set.cluster(survivor).members().len();
    let size_b = cluster_set.cluster(absorbed).members().len();
    let vec_a = state.vectors[survivor.index()]
        .take()
        .expect("live cluster has an edge vector");
    let vec_b = state.vectors[absorbed.index()]
        .take()
        .expect("live cluster has an edge vector");
    state.vectors[survivor.index()] = Some(meld_edges(&vec_a, size_a, &vec_b, size_b));

    for sig in cluster_set.cluster(absorbed).members() {
        state.owner[state.dense_of[sig]] = survivor;
    }
    cluster_set.merge_into(survivor, absorbed)
}
