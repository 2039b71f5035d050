use thiserror::Error;

use crate::matrix::MatrixError;
use crate::signature::Signature;

/// Errors surfaced by a per-group job. Data defects are deliberately
/// fatal for the group: a missing comparison or a signature in two
/// clusters means the cluster set and the cache do not describe the same
/// world, and patching over that silently corrupts assignments.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("result report is not serializable: {0}")]
    Report(#[from] serde_json::Error),

    #[error("cluster set for group '{group}' holds signature {signature} twice")]
    DuplicateSignature { group: String, signature: Signature },

    #[error("empty cluster in group '{group}' handed to wedge")]
    EmptyCluster { group: String },

    #[error("no comparable edge between two clusters in group '{group}'")]
    EdgelessClusterPair { group: String },

    #[error(
        "comparison for pair ({a}, {b}) absent at clustering time; \
         the cache does not match this cluster set"
    )]
    MissingComparison { a: Signature, b: Signature },

    #[error("cannot merge clusters that hate each other")]
    MergeOfHatingClusters,
}
