//! Determinism and threshold-refinement properties of the wedge pass.

use ande::{ClusterSet, Entry, ProbabilityMatrix, Signature, WedgeConfig};

fn sig(reference: u64, doc: u64) -> Signature {
    Signature::new(100, reference, doc)
}

/// A ten-signature group with a mixed score surface: two tight cliques, a
/// weak bridge between them, and one same-document exclusion.
fn fixture() -> (Vec<Signature>, ProbabilityMatrix) {
    let sigs: Vec<Signature> = (0..10).map(|i| sig(i, 100 + i)).collect();
    let mut matrix = ProbabilityMatrix::empty("fixture", sigs.clone());
    for i in 0..sigs.len() {
        for j in (i + 1)..sigs.len() {
            let same_clique = (i < 5) == (j < 5);
            let score = if same_clique { 0.85 } else { 0.25 };
            matrix
                .set(&sigs[i], &sigs[j], Entry::Score(score, 0.9))
                .unwrap();
        }
    }
    // A weak bridge and a forced exclusion crossing the cliques.
    matrix.set(&sigs[4], &sigs[5], Entry::Score(0.55, 0.8)).unwrap();
    matrix.set(&sigs[0], &sigs[9], Entry::ForceDifferent).unwrap();
    (sigs, matrix)
}

fn run(threshold: f64) -> Vec<Vec<Signature>> {
    let (sigs, matrix) = fixture();
    let mut set = ClusterSet::new("fixture");
    for s in &sigs {
        set.insert(vec![*s]);
    }
    ande::wedge(&mut set, &matrix, &WedgeConfig { threshold }).unwrap();
    set.partitions()
}

#[test]
fn repeated_runs_agree_exactly() {
    let first = run(0.5);
    for _ in 0..5 {
        assert_eq!(run(0.5), first);
    }
}

#[test]
fn raising_the_threshold_refines_the_partition() {
    let loose = run(0.5);
    let strict = run(0.95);

    assert!(strict.len() >= loose.len());
    // Every strict cluster sits entirely inside some loose cluster.
    for cluster in &strict {
        assert!(
            loose.iter().any(|bigger| {
                cluster.iter().all(|member| bigger.contains(member))
            }),
            "cluster {cluster:?} is not a refinement of {loose:?}"
        );
    }
}

#[test]
fn forced_exclusion_survives_any_threshold() {
    for threshold in [0.3, 0.5, 0.8] {
        let parts = run(threshold);
        let holder = |needle: &Signature| {
            parts
                .iter()
                .position(|cluster| cluster.contains(needle))
                .expect("every signature is assigned")
        };
        assert_ne!(holder(&sig(0, 100)), holder(&sig(9, 109)));
    }
}
