//! The comparator pipeline.
//!
//! A pipeline turns a signature pair into a [`Verdict`]: either a weighted
//! similarity with a coverage measure, or a forced sentinel. Sub-comparators
//! are pure and may abstain (`None`) when the data they need is missing;
//! the combiner weighs whatever did evaluate and reports how much of the
//! configured weight that was.

use std::collections::HashSet;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::catalog::Catalog;
use crate::config::{ComparatorsConfig, ConfigError};
use crate::names::{self, NameTables};
use crate::signature::Signature;

/// Outcome of comparing one signature pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// `score` is the weighted similarity, `coverage` the fraction of the
    /// configured comparator weight that could actually evaluate. Both in
    /// [0, 1].
    Score { score: f64, coverage: f64 },
    /// The pair is certainly the same person (e.g. a shared claimed id).
    ForceSame,
    /// The pair is certainly different people (e.g. same document).
    ForceDifferent,
}

/// A single similarity signal. Implementations must be pure: same inputs,
/// same answer, no side effects.
pub trait Comparator: Send {
    fn id(&self) -> &'static str;

    /// Similarity in [0, 1], or `None` when the needed data is missing.
    fn compare(&self, catalog: &dyn Catalog, a: &Signature, b: &Signature) -> Option<f64>;
}

/// Name-string similarity (see [`crate::names`]).
pub struct NameComparator {
    tables: NameTables,
}

impl NameComparator {
    pub fn new(tables: NameTables) -> Self {
        Self { tables }
    }
}

impl Comparator for NameComparator {
    fn id(&self) -> &'static str {
        "name"
    }

    fn compare(&self, catalog: &dyn Catalog, a: &Signature, b: &Signature) -> Option<f64> {
        let na = catalog.name_of(a)?;
        let nb = catalog.name_of(b)?;
        Some(names::compare_names(&na, &nb, &self.tables))
    }
}

/// Overlap of the two documents' co-author surname sets, excluding the
/// compared pair's own surname group.
pub struct CoauthorComparator;

impl CoauthorComparator {
    fn coauthor_groups(
        catalog: &dyn Catalog,
        sig: &Signature,
    ) -> Option<HashSet<String>> {
        let own = names::last_name_group(&catalog.name_of(sig)?);
        let groups: HashSet<String> = catalog
            .author_names(sig.document_id)
            .iter()
            .map(|n| names::last_name_group(n))
            .filter(|g| !g.is_empty() && *g != own)
            .collect();
        if groups.is_empty() {
            None
        } else {
            Some(groups)
        }
    }
}

impl Comparator for CoauthorComparator {
    fn id(&self) -> &'static str {
        "coauthors"
    }

    fn compare(&self, catalog: &dyn Catalog, a: &Signature, b: &Signature) -> Option<f64> {
        let ga = Self::coauthor_groups(catalog, a)?;
        let gb = Self::coauthor_groups(catalog, b)?;
        let shared = ga.intersection(&gb).count() as f64;
        let smaller = ga.len().min(gb.len()) as f64;
        Some((shared / smaller).min(1.0))
    }
}

/// Jaccard overlap of document keyword sets.
pub struct KeywordComparator;

impl Comparator for KeywordComparator {
    fn id(&self) -> &'static str {
        "keywords"
    }

    fn compare(&self, catalog: &dyn Catalog, a: &Signature, b: &Signature) -> Option<f64> {
        let ka: HashSet<String> = catalog
            .keywords(a.document_id)
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        let kb: HashSet<String> = catalog
            .keywords(b.document_id)
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        if ka.is_empty() || kb.is_empty() {
            return None;
        }
        let shared = ka.intersection(&kb).count() as f64;
        let union = ka.union(&kb).count() as f64;
        Some(shared / union)
    }
}

/// Shared collaboration tag: strong evidence either way once both
/// documents carry one.
pub struct CollaborationComparator;

impl Comparator for CollaborationComparator {
    fn id(&self) -> &'static str {
        "collaboration"
    }

    fn compare(&self, catalog: &dyn Catalog, a: &Signature, b: &Signature) -> Option<f64> {
        let ca = catalog.collaboration(a.document_id)?;
        let cb = catalog.collaboration(b.document_id)?;
        Some(if ca.eq_ignore_ascii_case(&cb) { 1.0 } else { 0.0 })
    }
}

struct Weighted {
    comparator: Box<dyn Comparator>,
    weight: f64,
}

/// A configured comparator stack with a bounded per-instance memo.
///
/// Pipelines are cheap to construct and deliberately not shareable: each
/// worker owns one, so memoized verdicts never cross process-like
/// boundaries.
pub struct ComparisonPipeline {
    comparators: Vec<Weighted>,
    total_weight: f64,
    memo: LruCache<(Signature, Signature), Verdict>,
}

impl ComparisonPipeline {
    /// Build the pipeline described by the configuration, with default
    /// name tables.
    pub fn from_config(cfg: &ComparatorsConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let mut comparators: Vec<(Box<dyn Comparator>, f64)> = Vec::new();
        for entry in &cfg.weights {
            let comparator: Box<dyn Comparator> = match entry.id.as_str() {
                "name" => Box::new(NameComparator::new(NameTables::default())),
                "coauthors" => Box::new(CoauthorComparator),
                "keywords" => Box::new(KeywordComparator),
                "collaboration" => Box::new(CollaborationComparator),
                other => {
                    return Err(ConfigError::Validation(format!(
                        "unknown comparator id '{other}'"
                    )))
                }
            };
            comparators.push((comparator, entry.weight));
        }
        Ok(Self::new(comparators, cfg.memo_capacity))
    }

    /// Build a pipeline from explicit comparators. Mostly for tests that
    /// inject counting or constant comparators.
    pub fn new(comparators: Vec<(Box<dyn Comparator>, f64)>, memo_capacity: usize) -> Self {
        let total_weight = comparators.iter().map(|(_, w)| *w).sum();
        let capacity = NonZeroUsize::new(memo_capacity.max(1))
            .expect("capacity is at least one");
        Self {
            comparators: comparators
                .into_iter()
                .map(|(comparator, weight)| Weighted { comparator, weight })
                .collect(),
            total_weight,
            memo: LruCache::new(capacity),
        }
    }

    /// Compare two signatures.
    pub fn compare(&mut self, catalog: &dyn Catalog, a: &Signature, b: &Signature) -> Verdict {
        // Two names on the same document are never the same occurrence of
        // a person; decided before any sub-comparator runs.
        if a.document_id == b.document_id {
            return Verdict::ForceDifferent;
        }

        // A claimed external id is authoritative in both directions.
        if let (Some(ia), Some(ib)) = (catalog.external_id(a), catalog.external_id(b)) {
            return if ia == ib {
                Verdict::ForceSame
            } else {
                Verdict::ForceDifferent
            };
        }

        let key = if a <= b { (*a, *b) } else { (*b, *a) };
        if let Some(verdict) = self.memo.get(&key) {
            return *verdict;
        }
        let verdict = self.combine(catalog, a, b);
        self.memo.put(key, verdict);
        verdict
    }

    fn combine(&self, catalog: &dyn Catalog, a: &Signature, b: &Signature) -> Verdict {
        let mut evaluated_weight = 0.0;
        let mut weighted_sum = 0.0;
        for entry in &self.comparators {
            if let Some(similarity) = entry.comparator.compare(catalog, a, b) {
                evaluated_weight += entry.weight;
                weighted_sum += similarity * entry.weight;
            }
        }
        if evaluated_weight == 0.0 {
            return Verdict::Score {
                score: 0.0,
                coverage: 0.0,
            };
        }
        Verdict::Score {
            score: weighted_sum / evaluated_weight,
            coverage: evaluated_weight / self.total_weight,
        }
    }

    /// Drop all memoized verdicts. Called between groups so long-lived
    /// workers stay bounded.
    pub fn clear(&mut self) {
        self.memo.clear();
    }

    /// Number of memoized verdicts currently held.
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}
