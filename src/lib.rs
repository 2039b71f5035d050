//! # ANDE — author-name disambiguation engine
//!
//! Given many signatures (name-field occurrences on documents) sharing a
//! surname, ANDE decides which occurrences belong to the same real-world
//! person, honoring authoritative manual overrides.
//!
//! The moving parts, leaf-first:
//!
//! - [`names`] — name parsing and the multi-signal name similarity.
//! - [`compare`] — the comparator pipeline producing pairwise
//!   [`Verdict`]s with coverage weighting and a bounded memo.
//! - [`matrix`] — the persisted per-group pairwise cache
//!   ("probability matrix") with staleness detection.
//! - [`cluster`] — the partition of one last-name group, with "hate"
//!   constraints forbidding specific merges.
//! - [`wedge`] — the clustering algorithm refining a [`ClusterSet`]
//!   against a cache.
//! - [`scheduler`] — the "tortoise" driver fanning group jobs across a
//!   cost-balanced worker pool.
//!
//! The catalog itself (documents, name strings, curation data) stays
//! behind the [`Catalog`] trait; [`InMemoryCatalog`] backs tests and the
//! demo binary.

pub mod catalog;
pub mod cluster;
pub mod compare;
pub mod config;
pub mod cost;
pub mod error;
pub mod matrix;
pub mod names;
pub mod scheduler;
pub mod signature;
pub mod wedge;

pub use catalog::{Catalog, DocumentRecord, InMemoryCatalog, SignatureRecord};
pub use cluster::{Cluster, ClusterId, ClusterSet};
pub use compare::{Comparator, ComparisonPipeline, Verdict};
pub use config::{
    ComparatorWeight, ComparatorsConfig, ConfigError, EngineConfig, SchedulerConfig,
    StorageConfig, WedgeConfig,
};
pub use cost::{CostLog, CostModel, CostSample};
pub use error::EngineError;
pub use matrix::{Entry, MatrixError, ProbabilityMatrix, MATRIX_FORMAT_VERSION};
pub use names::{compare_names, last_name_group, split_name_parts, NameTables, ParsedName};
pub use scheduler::{last_name_groups, ClusterAssignment, GroupOutcome, Phase, Tortoise};
pub use signature::{PersonId, Signature};
pub use wedge::wedge;
