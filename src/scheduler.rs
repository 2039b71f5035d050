//! The "tortoise" scheduler.
//!
//! Partitions the catalog's signatures into last-name groups and fans the
//! per-group work (cache build/refresh, wedge, persistence) out over a
//! fixed worker pool. Jobs are weighed by the empirical [`CostModel`]
//! rather than raw group size and handed greedily to the least-loaded
//! worker — exact optimality is not required, avoiding one worker stuck
//! with all the giant groups is.
//!
//! No mutable state crosses a group boundary: workers own their comparator
//! pipeline (and its memo), and every group job reads the catalog and
//! writes only its own artifacts. A failed group is logged and skipped;
//! its previous persisted clustering stays in place.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::sync::mpsc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::cluster::ClusterSet;
use crate::compare::ComparisonPipeline;
use crate::config::EngineConfig;
use crate::cost::{CostLog, CostModel, CostSample};
use crate::error::EngineError;
use crate::matrix::ProbabilityMatrix;
use crate::names;
use crate::signature::Signature;
use crate::wedge::wedge;

/// Which part of the per-group work to run. Cache building and clustering
/// are independently schedulable; `Wedge` still refreshes a stale or
/// missing cache first, because staleness is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Build or refresh the pairwise cache only.
    Matrix,
    /// Cluster (refreshing the cache if needed).
    Wedge,
    /// Both.
    Full,
}

/// One final cluster of a group: an opaque run-unique label and its
/// members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub label: String,
    pub members: Vec<Signature>,
}

/// Result of one group's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub group: String,
    pub clusters: Vec<ClusterAssignment>,
}

/// Partition signatures by canonical last-name group. Signatures without
/// a resolvable name are logged and skipped; they cannot be compared to
/// anything.
pub fn last_name_groups(catalog: &dyn Catalog) -> BTreeMap<String, Vec<Signature>> {
    let mut groups: BTreeMap<String, Vec<Signature>> = BTreeMap::new();
    for sig in catalog.signatures() {
        let Some(name) = catalog.name_of(&sig) else {
            warn!(signature = %sig, "signature_without_name_skipped");
            continue;
        };
        let key = names::last_name_group(&name);
        if key.is_empty() {
            warn!(signature = %sig, name, "signature_without_surname_skipped");
            continue;
        }
        groups.entry(key).or_default().push(sig);
    }
    for sigs in groups.values_mut() {
        sigs.sort();
        sigs.dedup();
    }
    groups
}

/// Greedy least-loaded assignment: jobs sorted by estimated cost,
/// heaviest first, each placed on the currently lightest worker. Returns
/// one job-index list per worker.
pub(crate) fn plan_assignments(costs: &[f64], workers: usize) -> Vec<Vec<usize>> {
    let workers = workers.max(1);
    let mut order: Vec<usize> = (0..costs.len()).collect();
    order.sort_by(|&a, &b| costs[b].total_cmp(&costs[a]));

    let mut bins: Vec<Vec<usize>> = vec![Vec::new(); workers];
    let mut loads = vec![0.0f64; workers];
    for idx in order {
        let lightest = loads
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
            .unwrap_or(0);
        bins[lightest].push(idx);
        loads[lightest] += costs[idx];
    }
    bins
}

/// The top-level driver.
pub struct Tortoise<'a, C: Catalog> {
    catalog: &'a C,
    config: EngineConfig,
}

impl<'a, C: Catalog> Tortoise<'a, C> {
    pub fn new(catalog: &'a C, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { catalog, config })
    }

    /// Run the requested phase over every last-name group. Returns the
    /// outcomes of the groups that succeeded, sorted by group name;
    /// failed groups are logged with their identity and skipped.
    pub fn run(&self, phase: Phase) -> Result<Vec<GroupOutcome>, EngineError> {
        let groups = last_name_groups(self.catalog);
        let cost_log = CostLog::new(&self.config.storage.cost_log);
        let model = CostModel::fit(&cost_log.load()?);
        info!(
            groups = groups.len(),
            cost_samples = model.samples(),
            workers = self.config.scheduler.workers,
            "tortoise_run_started"
        );

        let jobs: Vec<(String, Vec<Signature>)> = groups.into_iter().collect();
        let costs: Vec<f64> = jobs
            .iter()
            .map(|(_, sigs)| model.estimate(sigs.len()))
            .collect();
        let bins = plan_assignments(&costs, self.config.scheduler.workers);

        let (tx, rx) = mpsc::channel::<(GroupOutcome, CostSample)>();
        std::thread::scope(|scope| {
            for bin in &bins {
                if bin.is_empty() {
                    continue;
                }
                let tx = tx.clone();
                let jobs = &jobs;
                let config = &self.config;
                let catalog: &dyn Catalog = self.catalog;
                scope.spawn(move || {
                    // Each worker owns its pipeline: memoized verdicts
                    // never cross workers.
                    let mut pipeline = match ComparisonPipeline::from_config(&config.comparators)
                    {
                        Ok(pipeline) => pipeline,
                        Err(err) => {
                            warn!(error = %err, "worker_pipeline_init_failed");
                            return;
                        }
                    };
                    for &job in bin {
                        let (group, sigs) = &jobs[job];
                        let started = Instant::now();
                        match run_group(catalog, config, &mut pipeline, group, sigs, phase) {
                            Ok(outcome) => {
                                let sample = CostSample {
                                    size: sigs.len(),
                                    seconds: started.elapsed().as_secs_f64(),
                                };
                                debug!(group = %group, seconds = sample.seconds, "group_done");
                                if tx.send((outcome, sample)).is_err() {
                                    return;
                                }
                            }
                            Err(err) => warn!(group = %group, error = %err, "group_job_failed"),
                        }
                        // Reclaim per-group memory before the next job.
                        pipeline.clear();
                    }
                });
            }
        });
        drop(tx);

        let mut outcomes = Vec::new();
        for (outcome, sample) in rx.try_iter() {
            if let Err(err) = cost_log.append(sample) {
                warn!(error = %err, "cost_log_append_failed");
            }
            outcomes.push(outcome);
        }
        outcomes.sort_by(|a, b| a.group.cmp(&b.group));
        info!(
            completed = outcomes.len(),
            failed = jobs.len() - outcomes.len(),
            "tortoise_run_finished"
        );
        Ok(outcomes)
    }
}

fn run_group(
    catalog: &dyn Catalog,
    config: &EngineConfig,
    pipeline: &mut ComparisonPipeline,
    group: &str,
    signatures: &[Signature],
    phase: Phase,
) -> Result<GroupOutcome, EngineError> {
    let mut clusters = ClusterSet::from_catalog(group, signatures, catalog)?;
    let dir = config.storage.matrix_dir.as_path();

    let matrix = match ProbabilityMatrix::load(dir, group)? {
        Some(prior) if prior.covers(signatures) && !prior.is_stale(catalog) => prior,
        prior => {
            // The prior snapshot stays readable while the new one is
            // assembled; unchanged documents keep their cached pairs.
            let built = ProbabilityMatrix::build(&clusters, pipeline, catalog, prior.as_ref())?;
            built.store(dir)?;
            built
        }
    };

    if phase == Phase::Matrix {
        return Ok(GroupOutcome {
            group: group.to_string(),
            clusters: Vec::new(),
        });
    }

    wedge(&mut clusters, &matrix, &config.wedge)?;

    let outcome = GroupOutcome {
        group: group.to_string(),
        clusters: clusters
            .partitions()
            .into_iter()
            .enumerate()
            .map(|(i, members)| ClusterAssignment {
                label: format!("{group}.{i}"),
                members,
            })
            .collect(),
    };

    if let Some(results_dir) = &config.storage.results_dir {
        // Replaces the group's previous automatic clustering. Confirmed
        // and rejected assignments are inputs; they are never written.
        persist_outcome(results_dir, &outcome)?;
    }
    Ok(outcome)
}

fn persist_outcome(dir: &Path, outcome: &GroupOutcome) -> Result<(), EngineError> {
    let shard: String = outcome.group.chars().take(2).collect();
    let shard_dir = dir.join(if shard.is_empty() { "_".to_string() } else { shard });
    fs::create_dir_all(&shard_dir)?;
    let file = File::create(shard_dir.join(format!("{}.json", outcome.group)))?;
    serde_json::to_writer_pretty(BufWriter::new(file), outcome)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;

    #[test]
    fn groups_split_on_canonical_surname() {
        let mut cat = InMemoryCatalog::new();
        cat.add_signature(Signature::new(100, 1, 10), "Ellis, John");
        cat.add_signature(Signature::new(100, 2, 11), "ELLIS, J.");
        cat.add_signature(Signature::new(100, 3, 12), "O'Neil, Sean");
        let groups = last_name_groups(&cat);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["ellis"].len(), 2);
        assert_eq!(groups["oneil"].len(), 1);
    }

    #[test]
    fn plan_assigns_every_job_once() {
        let costs = [5.0, 4.0, 3.0, 3.0, 3.0];
        let bins = plan_assignments(&costs, 2);
        let mut all: Vec<usize> = bins.iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn plan_balances_by_cost() {
        let costs = [8.0, 7.0, 3.0, 2.0, 1.0, 1.0];
        let bins = plan_assignments(&costs, 2);
        let load = |bin: &Vec<usize>| bin.iter().map(|&i| costs[i]).sum::<f64>();
        let (a, b) = (load(&bins[0]), load(&bins[1]));
        // Greedy LPT keeps the spread within the largest single job.
        assert!((a - b).abs() <= 8.0, "loads {a} vs {b}");
        assert!(a > 0.0 && b > 0.0);
    }

    #[test]
    fn plan_with_more_workers_than_jobs_leaves_empty_bins() {
        let bins = plan_assignments(&[1.0], 4);
        assert_eq!(bins.iter().filter(|b| !b.is_empty()).count(), 1);
    }
}
