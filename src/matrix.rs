//! The per-group pairwise cache ("bib matrix").
//!
//! For one last-name group the matrix holds a comparator verdict for every
//! unordered signature pair, addressed through a stable dense index
//! (`bibmap`). Entries are a tagged variant — legitimate scores live in
//! [0,1], sentinels are tags, never out-of-range floats. Persistence is two
//! files per group: a small JSON map file (format version, creation
//! timestamp, bibmap) and a flat binary array, both under a shard
//! directory named after the group's first two characters.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::catalog::Catalog;
use crate::cluster::ClusterSet;
use crate::compare::{ComparisonPipeline, Verdict};
use crate::signature::Signature;

/// Bumped on any change to the map or array layout. A mismatch on load is
/// not an error: the cache is simply treated as absent and rebuilt.
pub const MATRIX_FORMAT_VERSION: u32 = 2;

const ENTRY_TAG_ABSENT: u8 = 0;
const ENTRY_TAG_SCORE: u8 = 1;
const ENTRY_TAG_FORCE_SAME: u8 = 2;
const ENTRY_TAG_FORCE_DIFFERENT: u8 = 3;

/// One cached comparison.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Entry {
    Score(f64, f64),
    ForceSame,
    ForceDifferent,
    #[default]
    Absent,
}

impl From<Verdict> for Entry {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Score { score, coverage } => Entry::Score(score, coverage),
            Verdict::ForceSame => Entry::ForceSame,
            Verdict::ForceDifferent => Entry::ForceDifferent,
        }
    }
}

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("map file is not valid JSON: {0}")]
    Map(#[from] serde_json::Error),

    #[error("array file carries unknown entry tag {tag:#04x}")]
    BadTag { tag: u8 },

    #[error("array file truncated: expected {expected} entries, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("signature {0} is not indexed in this matrix")]
    UnknownSignature(Signature),
}

#[derive(Debug, Serialize, Deserialize)]
struct MapFile {
    format_version: u32,
    created_at: DateTime<Utc>,
    bibmap: Vec<Signature>,
}

/// Symmetric sparse pair store for one last-name group.
#[derive(Debug, Clone)]
pub struct ProbabilityMatrix {
    group: String,
    created_at: DateTime<Utc>,
    order: Vec<Signature>,
    index: HashMap<Signature, usize>,
    cells: Vec<Entry>,
}

impl ProbabilityMatrix {
    /// An all-absent matrix over the given signatures.
    pub fn empty(group: impl Into<String>, mut order: Vec<Signature>) -> Self {
        order.sort();
        order.dedup();
        let index = order
            .iter()
            .enumerate()
            .map(|(i, sig)| (*sig, i))
            .collect();
        let n = order.len();
        Self {
            group: group.into(),
            created_at: Utc::now(),
            order,
            index,
            cells: vec![Entry::Absent; n * n.saturating_sub(1) / 2],
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.order
    }

    /// Flat index of the unordered dense pair (i, j), i < j.
    fn cell_index(i: usize, j: usize) -> usize {
        debug_assert!(i < j);
        i + j * (j - 1) / 2
    }

    fn dense(&self, sig: &Signature) -> Result<usize, MatrixError> {
        self.index
            .get(sig)
            .copied()
            .ok_or(MatrixError::UnknownSignature(*sig))
    }

    /// Cached verdict for a pair, in O(1). Symmetric by construction; a
    /// signature paired with itself reads as `ForceSame`.
    pub fn get(&self, a: &Signature, b: &Signature) -> Result<Entry, MatrixError> {
        let (i, j) = (self.dense(a)?, self.dense(b)?);
        match i.cmp(&j) {
            std::cmp::Ordering::Equal => Ok(Entry::ForceSame),
            std::cmp::Ordering::Less => Ok(self.cells[Self::cell_index(i, j)]),
            std::cmp::Ordering::Greater => Ok(self.cells[Self::cell_index(j, i)]),
        }
    }

    pub fn set(&mut self, a: &Signature, b: &Signature, entry: Entry) -> Result<(), MatrixError> {
        let (i, j) = (self.dense(a)?, self.dense(b)?);
        if i == j {
            return Ok(());
        }
        let idx = if i < j {
            Self::cell_index(i, j)
        } else {
            Self::cell_index(j, i)
        };
        self.cells[idx] = entry;
        Ok(())
    }

    /// True when the bibmap indexes exactly the given signatures. A
    /// snapshot for a different membership cannot be used, fresh or not.
    pub fn covers(&self, signatures: &[Signature]) -> bool {
        let mut sorted: Vec<Signature> = signatures.to_vec();
        sorted.sort();
        sorted.dedup();
        sorted == self.order
    }

    /// True when any referenced document changed after this matrix was
    /// created. Staleness is not an error; it triggers a rebuild.
    pub fn is_stale(&self, catalog: &dyn Catalog) -> bool {
        self.order.iter().any(|sig| {
            catalog
                .document_modified(sig.document_id)
                .map(|modified| modified > self.created_at)
                .unwrap_or(false)
        })
    }

    /// Build the matrix for a cluster set: every unordered pair whose
    /// clusters are distinct and not in a hate relation gets a pipeline
    /// verdict. When a prior snapshot is supplied, pairs whose documents
    /// are both unchanged since the prior's creation reuse the prior
    /// value instead of recomputing.
    pub fn build(
        cluster_set: &ClusterSet,
        pipeline: &mut ComparisonPipeline,
        catalog: &dyn Catalog,
        prior: Option<&ProbabilityMatrix>,
    ) -> Result<Self, MatrixError> {
        let mut matrix = Self::empty(cluster_set.group(), cluster_set.all_signatures());
        let owners = cluster_set.signature_owners();

        let doc_unchanged = |sig: &Signature, since: DateTime<Utc>| {
            catalog
                .document_modified(sig.document_id)
                .map(|modified| modified <= since)
                .unwrap_or(true)
        };

        let mut computed = 0usize;
        let mut reused = 0usize;
        for j in 1..matrix.order.len() {
            for i in 0..j {
                let (a, b) = (matrix.order[i], matrix.order[j]);
                let (ca, cb) = (owners[&a], owners[&b]);
                if ca == cb || cluster_set.hates(ca, cb) {
                    continue;
                }
                let entry = match prior {
                    Some(prior)
                        if doc_unchanged(&a, prior.created_at)
                            && doc_unchanged(&b, prior.created_at) =>
                    {
                        match prior.get(&a, &b) {
                            Ok(entry) if entry != Entry::Absent => {
                                reused += 1;
                                entry
                            }
                            _ => {
                                computed += 1;
                                pipeline.compare(catalog, &a, &b).into()
                            }
                        }
                    }
                    _ => {
                        computed += 1;
                        pipeline.compare(catalog, &a, &b).into()
                    }
                };
                matrix.cells[Self::cell_index(i, j)] = entry;
            }
        }
        debug!(
            group = %matrix.group,
            signatures = matrix.order.len(),
            computed,
            reused,
            "matrix_built"
        );
        Ok(matrix)
    }

    fn shard(group: &str) -> String {
        let shard: String = group.chars().take(2).collect();
        if shard.is_empty() {
            "_".to_string()
        } else {
            shard
        }
    }

    /// Deterministic file pair for a group under the storage root.
    pub fn paths(dir: &Path, group: &str) -> (PathBuf, PathBuf) {
        let base = dir.join(Self::shard(group));
        (
            base.join(format!("{group}.map")),
            base.join(format!("{group}.dat")),
        )
    }

    /// Persist map and array files.
    pub fn store(&self, dir: &Path) -> Result<(), MatrixError> {
        let (map_path, array_path) = Self::paths(dir, &self.group);
        if let Some(parent) = map_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let map = MapFile {
            format_version: MATRIX_FORMAT_VERSION,
            created_at: self.created_at,
            bibmap: self.order.clone(),
        };
        let mut map_out = BufWriter::new(File::create(&map_path)?);
        serde_json::to_writer(&mut map_out, &map)?;
        map_out.flush()?;

        let mut out = BufWriter::new(File::create(&array_path)?);
        out.write_all(&(self.cells.len() as u64).to_le_bytes())?;
        for cell in &self.cells {
            match cell {
                Entry::Absent => out.write_all(&[ENTRY_TAG_ABSENT])?,
                Entry::ForceSame => out.write_all(&[ENTRY_TAG_FORCE_SAME])?,
                Entry::ForceDifferent => out.write_all(&[ENTRY_TAG_FORCE_DIFFERENT])?,
                Entry::Score(score, coverage) => {
                    out.write_all(&[ENTRY_TAG_SCORE])?;
                    out.write_all(&score.to_le_bytes())?;
                    out.write_all(&coverage.to_le_bytes())?;
                }
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Load a group's matrix. `Ok(None)` when no usable snapshot exists —
    /// missing files and format-version mismatches both land there;
    /// corrupt data is a real error.
    pub fn load(dir: &Path, group: &str) -> Result<Option<Self>, MatrixError> {
        let (map_path, array_path) = Self::paths(dir, group);
        let map_file = match File::open(&map_path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let map: MapFile = serde_json::from_reader(BufReader::new(map_file))?;
        if map.format_version != MATRIX_FORMAT_VERSION {
            debug!(
                group,
                found = map.format_version,
                expected = MATRIX_FORMAT_VERSION,
                "matrix_format_mismatch"
            );
            return Ok(None);
        }

        let array_file = match File::open(&array_path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut reader = BufReader::new(array_file);
        let mut count_buf = [0u8; 8];
        reader.read_exact(&mut count_buf)?;
        let count = u64::from_le_bytes(count_buf) as usize;

        let n = map.bibmap.len();
        let expected = n * n.saturating_sub(1) / 2;
        if count != expected {
            return Err(MatrixError::Truncated {
                expected,
                found: count,
            });
        }

        let mut cells = Vec::with_capacity(count);
        let mut tag = [0u8; 1];
        let mut float_buf = [0u8; 8];
        for read_so_far in 0..count {
            if let Err(err) = reader.read_exact(&mut tag) {
                if err.kind() == ErrorKind::UnexpectedEof {
                    return Err(MatrixError::Truncated {
                        expected,
                        found: read_so_far,
                    });
                }
                return Err(err.into());
            }
            let cell = match tag[0] {
                ENTRY_TAG_ABSENT => Entry::Absent,
                ENTRY_TAG_FORCE_SAME => Entry::ForceSame,
                ENTRY_TAG_FORCE_DIFFERENT => Entry::ForceDifferent,
                ENTRY_TAG_SCORE => {
                    reader.read_exact(&mut float_buf)?;
                    let score = f64::from_le_bytes(float_buf);
                    reader.read_exact(&mut float_buf)?;
                    let coverage = f64::from_le_bytes(float_buf);
                    Entry::Score(score, coverage)
                }
                tag => return Err(MatrixError::BadTag { tag }),
            };
            cells.push(cell);
        }

        let index = map
            .bibmap
            .iter()
            .enumerate()
            .map(|(i, sig)| (*sig, i))
            .collect();
        Ok(Some(Self {
            group: group.to_string(),
            created_at: map.created_at,
            order: map.bibmap,
            index,
            cells,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    use crate::catalog::{DocumentRecord, InMemoryCatalog};

    fn sigs() -> Vec<Signature> {
        vec![
            Signature::new(100, 1, 10),
            Signature::new(100, 2, 11),
            Signature::new(700, 3, 12),
        ]
    }

    #[test]
    fn cell_index_is_triangular() {
        assert_eq!(ProbabilityMatrix::cell_index(0, 1), 0);
        assert_eq!(ProbabilityMatrix::cell_index(0, 2), 1);
        assert_eq!(ProbabilityMatrix::cell_index(1, 2), 2);
        assert_eq!(ProbabilityMatrix::cell_index(0, 3), 3);
        assert_eq!(ProbabilityMatrix::cell_index(2, 3), 5);
    }

    #[test]
    fn get_is_symmetric() {
        let mut matrix = ProbabilityMatrix::empty("test", sigs());
        let a = Signature::new(100, 1, 10);
        let b = Signature::new(700, 3, 12);
        matrix.set(&a, &b, Entry::Score(0.7, 0.9)).unwrap();
        assert_eq!(matrix.get(&a, &b).unwrap(), Entry::Score(0.7, 0.9));
        assert_eq!(matrix.get(&b, &a).unwrap(), Entry::Score(0.7, 0.9));
    }

    #[test]
    fn unknown_signature_is_an_error() {
        let matrix = ProbabilityMatrix::empty("test", sigs());
        let stranger = Signature::new(100, 99, 99);
        assert!(matches!(
            matrix.get(&stranger, &Signature::new(100, 1, 10)),
            Err(MatrixError::UnknownSignature(_))
        ));
    }

    #[test]
    fn roundtrip_preserves_entries() {
        let dir = TempDir::new().unwrap();
        let mut matrix = ProbabilityMatrix::empty("ellis", sigs());
        let all = sigs();
        matrix.set(&all[0], &all[1], Entry::ForceDifferent).unwrap();
        matrix.set(&all[0], &all[2], Entry::Score(0.9, 1.0)).unwrap();
        matrix.store(dir.path()).unwrap();

        let loaded = ProbabilityMatrix::load(dir.path(), "ellis")
            .unwrap()
            .expect("snapshot exists");
        assert_eq!(loaded.get(&all[0], &all[1]).unwrap(), Entry::ForceDifferent);
        assert_eq!(loaded.get(&all[0], &all[2]).unwrap(), Entry::Score(0.9, 1.0));
        assert_eq!(loaded.get(&all[1], &all[2]).unwrap(), Entry::Absent);
        assert_eq!(loaded.created_at(), matrix.created_at());
    }

    #[test]
    fn covers_checks_exact_membership() {
        let matrix = ProbabilityMatrix::empty("test", sigs());
        let mut all = sigs();
        assert!(matrix.covers(&all));
        all.pop();
        assert!(!matrix.covers(&all));
    }

    #[test]
    fn missing_files_load_as_none() {
        let dir = TempDir::new().unwrap();
        assert!(ProbabilityMatrix::load(dir.path(), "nobody")
            .unwrap()
            .is_none());
    }

    #[test]
    fn version_mismatch_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let matrix = ProbabilityMatrix::empty("ellis", sigs());
        matrix.store(dir.path()).unwrap();

        // Rewrite the map file with a version from the future.
        let (map_path, _) = ProbabilityMatrix::paths(dir.path(), "ellis");
        let mut map: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&map_path).unwrap()).unwrap();
        map["format_version"] = serde_json::json!(MATRIX_FORMAT_VERSION + 1);
        std::fs::write(&map_path, serde_json::to_string(&map).unwrap()).unwrap();

        assert!(ProbabilityMatrix::load(dir.path(), "ellis")
            .unwrap()
            .is_none());
    }

    #[test]
    fn shard_is_first_two_characters() {
        let dir = Path::new("/tmp/m");
        let (map, _) = ProbabilityMatrix::paths(dir, "ellis");
        assert_eq!(map, Path::new("/tmp/m/el/ellis.map"));
        let (short, _) = ProbabilityMatrix::paths(dir, "o");
        assert_eq!(short, Path::new("/tmp/m/o/o.map"));
    }

    #[test]
    fn staleness_tracks_document_modification() {
        let mut cat = InMemoryCatalog::new();
        let matrix = ProbabilityMatrix::empty("test", sigs());
        cat.add_document(
            10,
            DocumentRecord {
                modified: Some(matrix.created_at() - Duration::seconds(5)),
                ..Default::default()
            },
        );
        assert!(!matrix.is_stale(&cat));

        cat.add_document(
            11,
            DocumentRecord {
                modified: Some(matrix.created_at() + Duration::seconds(1)),
                ..Default::default()
            },
        );
        assert!(matrix.is_stale(&cat));
    }
}
