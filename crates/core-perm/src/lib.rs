//! Signed synteny-block permutations and their per-scale container.
//!
//! A permutation is the ordered, signed sequence of synteny blocks along one
//! reference chromosome or target contig, together with per-block genomic
//! coordinates. A [`PermutationContainer`] holds every permutation of one
//! block-size resolution after filtering.
//!
//! Invariants (must hold after `PermutationContainer::from_file`):
//! * Every block id appearing in a target permutation appears in at least one
//!   reference permutation.
//! * Every block id appears in at least `min_genomes` genomes.
//! * With `resolve_repeats = false`, no block id occurs twice within a genome.
//! * Permutations are sorted by `(genome, sequence)`; empty permutations are
//!   dropped.
//!
//! Containers are immutable after construction; chimera breaking produces a
//! derived container via [`Permutation::split_at`] and
//! [`PermutationContainer::from_parts`].

mod parser;

pub use parser::{parse_permutations_file, parse_permutations_str};

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PermutationError {
    #[error("cannot read permutations file \"{path}\": {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("permutations file, line {line}: {what}")]
    Syntax { line: usize, what: String },
    #[error("{genome}.{sequence}: {what}")]
    CoordMismatch {
        genome: String,
        sequence: String,
        what: String,
    },
}

/// One occurrence of a signed block on a sequence. The sign encodes strand;
/// negation reverses orientation. Coordinates are `[start, end)` in bp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOcc {
    pub signed_id: i64,
    pub start: u64,
    pub end: u64,
}

impl BlockOcc {
    pub fn block_id(&self) -> u64 {
        self.signed_id.unsigned_abs()
    }

    pub fn length(&self) -> u64 {
        self.end - self.start
    }
}

/// An ordered sequence of signed blocks on one chromosome (reference) or
/// contig (target). `[seq_start, seq_end)` is the covered sub-range of the
/// named sequence: whole sequences start at 0, fragments produced by chimera
/// breaking carry the range of the piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    pub genome: String,
    pub sequence: String,
    pub seq_start: u64,
    pub seq_end: u64,
    pub fragment: bool,
    pub blocks: Vec<BlockOcc>,
}

impl Permutation {
    /// Display label: the sequence name, with the covered sub-range appended
    /// for fragments (`ctg7[1200:4800]`).
    pub fn label(&self) -> String {
        if self.fragment {
            format!("{}[{}:{}]", self.sequence, self.seq_start, self.seq_end)
        } else {
            self.sequence.clone()
        }
    }

    pub fn span_bp(&self) -> u64 {
        self.seq_end - self.seq_start
    }

    /// Split before block `index`, producing two fragments. The cut position
    /// is the start of the first block of the right piece; block coordinates
    /// are preserved as-is.
    pub fn split_at(&self, index: usize) -> (Permutation, Permutation) {
        assert!(
            index > 0 && index < self.blocks.len(),
            "split index must be an interior junction"
        );
        let mut pieces = self.split_at_all(&[index]);
        let right = pieces.pop().expect("two pieces");
        let left = pieces.pop().expect("two pieces");
        (left, right)
    }

    /// Split before every block index in `cuts` (sorted, interior, unique).
    /// With no cuts the permutation is returned unchanged.
    pub fn split_at_all(&self, cuts: &[usize]) -> Vec<Permutation> {
        if cuts.is_empty() {
            return vec![self.clone()];
        }
        for pair in cuts.windows(2) {
            assert!(pair[0] < pair[1], "cut indices must be strictly increasing");
        }
        assert!(
            cuts[0] > 0 && cuts[cuts.len() - 1] < self.blocks.len(),
            "cuts must be interior junctions"
        );
        let mut pieces = Vec::with_capacity(cuts.len() + 1);
        let mut from = 0usize;
        let mut from_bp = self.seq_start;
        for &cut in cuts.iter().chain(std::iter::once(&self.blocks.len())) {
            let to_bp = if cut == self.blocks.len() {
                self.seq_end
            } else {
                self.blocks[cut].start
            };
            pieces.push(Permutation {
                genome: self.genome.clone(),
                sequence: self.sequence.clone(),
                seq_start: from_bp,
                seq_end: to_bp,
                fragment: true,
                blocks: self.blocks[from..cut].to_vec(),
            });
            from = cut;
            from_bp = to_bp;
        }
        pieces
    }
}

/// Filtering knobs applied while building a container.
#[derive(Debug, Clone, Copy)]
pub struct Filters {
    /// Drop blocks present in fewer than this many genomes.
    pub min_genomes: usize,
    /// `false`: drop any block occurring more than once in some genome.
    /// `true`: resolve instead, keeping the occurrence with the smallest
    /// `(sequence, start)` per genome and dropping the rest.
    pub resolve_repeats: bool,
    /// Merge runs of blocks that are collinear in every permutation into a
    /// single block (the "indels off" mode of the coarse stages).
    pub merge_collinear: bool,
}

impl Filters {
    /// Keep as much as possible; used when inferring a phylogeny.
    pub fn permissive() -> Self {
        Self {
            min_genomes: 1,
            resolve_repeats: false,
            merge_collinear: false,
        }
    }
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            min_genomes: 2,
            resolve_repeats: false,
            merge_collinear: true,
        }
    }
}

/// All permutations of one block-size resolution, split into references and
/// targets.
#[derive(Debug, Clone)]
pub struct PermutationContainer {
    pub ref_perms: Vec<Permutation>,
    pub target_perms: Vec<Permutation>,
    references: BTreeSet<String>,
    targets: BTreeSet<String>,
}

impl PermutationContainer {
    pub fn from_file(
        path: &Path,
        references: &[String],
        targets: &[String],
        filters: Filters,
    ) -> Result<Self, PermutationError> {
        let perms = parser::parse_permutations_file(path)?;
        Self::from_permutations(perms, references, targets, filters)
    }

    pub fn from_permutations(
        perms: Vec<Permutation>,
        references: &[String],
        targets: &[String],
        filters: Filters,
    ) -> Result<Self, PermutationError> {
        let references: BTreeSet<String> = references.iter().cloned().collect();
        let targets: BTreeSet<String> = targets.iter().cloned().collect();

        let mut ref_perms = Vec::new();
        let mut target_perms = Vec::new();
        for perm in perms {
            if references.contains(&perm.genome) {
                ref_perms.push(perm);
            } else if targets.contains(&perm.genome) {
                target_perms.push(perm);
            } else {
                warn!(
                    target: "permutations",
                    genome = perm.genome.as_str(),
                    sequence = perm.sequence.as_str(),
                    "permutation for a genome outside the recipe, skipping"
                );
            }
        }

        let mut container = Self {
            ref_perms,
            target_perms,
            references,
            targets,
        };
        container.apply_filters(filters);
        if container.target_perms.is_empty() {
            warn!(target: "permutations", "no target permutations left after filtering");
        }
        Ok(container)
    }

    /// Assemble a derived container (chimera breaking, tests) from existing
    /// permutations; no filters are re-applied.
    pub fn from_parts(
        ref_perms: Vec<Permutation>,
        target_perms: Vec<Permutation>,
        references: BTreeSet<String>,
        targets: BTreeSet<String>,
    ) -> Self {
        Self {
            ref_perms,
            target_perms,
            references,
            targets,
        }
    }

    pub fn references(&self) -> &BTreeSet<String> {
        &self.references
    }

    pub fn targets(&self) -> &BTreeSet<String> {
        &self.targets
    }

    pub fn is_target_genome(&self, genome: &str) -> bool {
        self.targets.contains(genome)
    }

    /// References first, then targets; both halves sorted.
    pub fn all_perms(&self) -> impl Iterator<Item = &Permutation> {
        self.ref_perms.iter().chain(self.target_perms.iter())
    }

    /// Distinct block ids across all permutations.
    pub fn block_ids(&self) -> BTreeSet<u64> {
        self.all_perms()
            .flat_map(|perm| perm.blocks.iter().map(BlockOcc::block_id))
            .collect()
    }

    /// Block ids per genome, used for the block-sharing distance matrix.
    pub fn blocks_by_genome(&self) -> BTreeMap<String, BTreeSet<u64>> {
        let mut by_genome: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();
        for perm in self.all_perms() {
            let set = by_genome.entry(perm.genome.clone()).or_default();
            set.extend(perm.blocks.iter().map(BlockOcc::block_id));
        }
        by_genome
    }

    fn apply_filters(&mut self, filters: Filters) {
        let before = self.count_blocks();

        // Blocks in too few genomes.
        let mut genome_sets: BTreeMap<u64, BTreeSet<&str>> = BTreeMap::new();
        for perm in self.all_perms() {
            for occ in &perm.blocks {
                genome_sets
                    .entry(occ.block_id())
                    .or_default()
                    .insert(perm.genome.as_str());
            }
        }
        let rare: BTreeSet<u64> = genome_sets
            .iter()
            .filter(|(_, genomes)| genomes.len() < filters.min_genomes)
            .map(|(&id, _)| id)
            .collect();
        self.retain_blocks(|id| !rare.contains(&id));

        // Repeats.
        let mut occurrences: BTreeMap<(String, u64), usize> = BTreeMap::new();
        for perm in self.all_perms() {
            for occ in &perm.blocks {
                *occurrences
                    .entry((perm.genome.clone(), occ.block_id()))
                    .or_default() += 1;
            }
        }
        let repeated: BTreeSet<u64> = occurrences
            .iter()
            .filter(|&(_, &count)| count > 1)
            .map(|((_, id), _)| *id)
            .collect();
        if filters.resolve_repeats {
            self.elect_single_occurrences(&repeated);
        } else {
            self.retain_blocks(|id| !repeated.contains(&id));
        }

        // Target blocks never seen in a reference cannot be placed.
        let ref_blocks: BTreeSet<u64> = self
            .ref_perms
            .iter()
            .flat_map(|perm| perm.blocks.iter().map(BlockOcc::block_id))
            .collect();
        for perm in &mut self.target_perms {
            perm.blocks.retain(|occ| ref_blocks.contains(&occ.block_id()));
        }

        if filters.merge_collinear {
            self.merge_collinear_runs();
        }

        self.ref_perms.retain(|perm| !perm.blocks.is_empty());
        self.target_perms.retain(|perm| !perm.blocks.is_empty());

        info!(
            target: "permutations",
            blocks_before = before,
            blocks_after = self.count_blocks(),
            references = self.ref_perms.len(),
            targets = self.target_perms.len(),
            "container filtered"
        );
    }

    fn count_blocks(&self) -> usize {
        self.all_perms().map(|perm| perm.blocks.len()).sum()
    }

    fn retain_blocks<F: Fn(u64) -> bool>(&mut self, keep: F) {
        for perm in self.ref_perms.iter_mut().chain(self.target_perms.iter_mut()) {
            perm.blocks.retain(|occ| keep(occ.block_id()));
        }
    }

    /// Repeat resolution: per genome, keep the occurrence of each repeated
    /// block with the smallest `(sequence, start)` and drop the rest.
    fn elect_single_occurrences(&mut self, repeated: &BTreeSet<u64>) {
        let mut elected: BTreeMap<(String, u64), (String, u64)> = BTreeMap::new();
        for perm in self.all_perms() {
            for occ in &perm.blocks {
                if !repeated.contains(&occ.block_id()) {
                    continue;
                }
                let key = (perm.genome.clone(), occ.block_id());
                let place = (perm.sequence.clone(), occ.start);
                match elected.get(&key) {
                    Some(best) if *best <= place => {}
                    _ => {
                        elected.insert(key, place);
                    }
                }
            }
        }
        for perm in self.ref_perms.iter_mut().chain(self.target_perms.iter_mut()) {
            let genome = perm.genome.clone();
            let sequence = perm.sequence.clone();
            perm.blocks.retain(|occ| {
                if !repeated.contains(&occ.block_id()) {
                    return true;
                }
                elected[&(genome.clone(), occ.block_id())] == (sequence.clone(), occ.start)
            });
        }
    }

    /// Merge collinear runs: a pair `(x, y)` merges when, across every
    /// permutation read in both directions, `x` is always followed by `y` and
    /// `y` is always preceded by `x`. Repeats until no pair qualifies.
    fn merge_collinear_runs(&mut self) {
        const END: i64 = i64::MAX;
        let mut merged_total = 0usize;
        loop {
            let mut succ: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
            for perm in self.all_perms() {
                let ids: Vec<i64> = perm.blocks.iter().map(|occ| occ.signed_id).collect();
                if let (Some(&first), Some(&last)) = (ids.first(), ids.last()) {
                    succ.entry(-first).or_default().insert(END);
                    succ.entry(last).or_default().insert(END);
                }
                for pair in ids.windows(2) {
                    succ.entry(pair[0]).or_default().insert(pair[1]);
                    succ.entry(-pair[1]).or_default().insert(-pair[0]);
                }
            }

            let mut mergeable: Vec<(i64, i64)> = Vec::new();
            for (&x, next) in &succ {
                if next.len() != 1 {
                    continue;
                }
                let y = *next.iter().next().expect("length checked above");
                if y == END || x.abs() >= y.abs() {
                    continue;
                }
                let back = succ.get(&-y);
                if back.is_some_and(|set| set.len() == 1 && set.contains(&-x)) {
                    mergeable.push((x, y));
                }
            }
            if mergeable.is_empty() {
                break;
            }

            // Apply pairwise-disjoint merges in one pass.
            let mut used: BTreeSet<u64> = BTreeSet::new();
            let mut batch: Vec<(i64, i64)> = Vec::new();
            for (x, y) in mergeable {
                if used.contains(&x.unsigned_abs()) || used.contains(&y.unsigned_abs()) {
                    continue;
                }
                used.insert(x.unsigned_abs());
                used.insert(y.unsigned_abs());
                batch.push((x, y));
            }
            for perm in self
                .ref_perms
                .iter_mut()
                .chain(self.target_perms.iter_mut())
            {
                merge_pairs_in_perm(perm, &batch);
            }
            merged_total += batch.len();
        }
        if merged_total > 0 {
            debug!(target: "permutations", merged = merged_total, "collinear runs merged");
        }
    }
}

/// Rewrite one permutation applying merges `(x, y) -> x`. A forward
/// occurrence `x, y` keeps `x`'s signed id; the reverse reading `-y, -x`
/// keeps `-x`. The merged span covers both occurrences.
fn merge_pairs_in_perm(perm: &mut Permutation, batch: &[(i64, i64)]) {
    let mut out: Vec<BlockOcc> = Vec::with_capacity(perm.blocks.len());
    for occ in &perm.blocks {
        if let Some(prev) = out.last_mut() {
            let forward = batch.contains(&(prev.signed_id, occ.signed_id));
            let reverse = batch.contains(&(-occ.signed_id, -prev.signed_id));
            if forward || reverse {
                // A forward run `x, y` keeps `x`; the reverse reading
                // `-y, -x` keeps `-x`, which is the second occurrence.
                if reverse {
                    prev.signed_id = occ.signed_id;
                }
                prev.end = occ.end;
                continue;
            }
        }
        out.push(*occ);
    }
    perm.blocks = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perm(genome: &str, sequence: &str, ids: &[i64]) -> Permutation {
        let blocks = ids
            .iter()
            .enumerate()
            .map(|(i, &signed_id)| BlockOcc {
                signed_id,
                start: i as u64 * 100,
                end: i as u64 * 100 + 80,
            })
            .collect::<Vec<_>>();
        let seq_end = blocks.last().map(|b| b.end).unwrap_or(0);
        Permutation {
            genome: genome.to_string(),
            sequence: sequence.to_string(),
            seq_start: 0,
            seq_end,
            fragment: false,
            blocks,
        }
    }

    fn build(
        perms: Vec<Permutation>,
        filters: Filters,
    ) -> Result<PermutationContainer, PermutationError> {
        PermutationContainer::from_permutations(
            perms,
            &["rf1".to_string(), "rf2".to_string()],
            &["tgt".to_string()],
            filters,
        )
    }

    #[test]
    fn target_only_blocks_are_dropped() {
        let container = build(
            vec![
                perm("rf1", "chr1", &[1, 2]),
                perm("rf2", "chr1", &[1, 2]),
                perm("tgt", "ctg1", &[1, 2, 9]),
            ],
            Filters {
                min_genomes: 1,
                resolve_repeats: false,
                merge_collinear: false,
            },
        )
        .unwrap();
        let target_ids: Vec<i64> = container.target_perms[0]
            .blocks
            .iter()
            .map(|b| b.signed_id)
            .collect();
        assert_eq!(target_ids, vec![1, 2]);
    }

    #[test]
    fn rare_blocks_are_dropped() {
        let container = build(
            vec![
                perm("rf1", "chr1", &[1, 2, 3]),
                perm("rf2", "chr1", &[1, 3]),
                perm("tgt", "ctg1", &[1, 3]),
            ],
            Filters {
                min_genomes: 2,
                resolve_repeats: false,
                merge_collinear: false,
            },
        )
        .unwrap();
        // Block 2 only lives in rf1.
        assert!(!container.block_ids().contains(&2));
    }

    #[test]
    fn repeats_are_dropped_by_default() {
        let container = build(
            vec![
                perm("rf1", "chr1", &[1, 2, 1]),
                perm("rf2", "chr1", &[1, 2]),
                perm("tgt", "ctg1", &[1, 2]),
            ],
            Filters {
                min_genomes: 1,
                resolve_repeats: false,
                merge_collinear: false,
            },
        )
        .unwrap();
        assert_eq!(container.block_ids(), BTreeSet::from([2]));
    }

    #[test]
    fn repeat_resolution_keeps_one_occurrence_per_genome() {
        let container = build(
            vec![
                perm("rf1", "chr1", &[1, 2, 1]),
                perm("rf2", "chr1", &[1, 2]),
                perm("tgt", "ctg1", &[1, 2]),
            ],
            Filters {
                min_genomes: 1,
                resolve_repeats: true,
                merge_collinear: false,
            },
        )
        .unwrap();
        let rf1_ids: Vec<u64> = container.ref_perms[0]
            .blocks
            .iter()
            .map(|b| b.block_id())
            .collect();
        assert_eq!(rf1_ids, vec![1, 2]);
    }

    #[test]
    fn collinear_runs_merge() {
        // 2 always follows 1 (and only 1 precedes 2) in every genome.
        let container = build(
            vec![
                perm("rf1", "chr1", &[1, 2, 3]),
                perm("rf2", "chr1", &[3, 1, 2]),
                perm("tgt", "ctg1", &[-2, -1]),
            ],
            Filters {
                min_genomes: 1,
                resolve_repeats: false,
                merge_collinear: true,
            },
        )
        .unwrap();
        assert_eq!(container.block_ids(), BTreeSet::from([1, 3]));
        let tgt_ids: Vec<i64> = container.target_perms[0]
            .blocks
            .iter()
            .map(|b| b.signed_id)
            .collect();
        assert_eq!(tgt_ids, vec![-1]);
    }

    #[test]
    fn split_preserves_coordinates() {
        let original = perm("tgt", "ctg1", &[1, 2, 3, 4]);
        let (left, right) = original.split_at(2);
        assert_eq!(left.blocks.len(), 2);
        assert_eq!(right.blocks.len(), 2);
        assert!(left.fragment && right.fragment);
        assert_eq!(left.seq_end, right.seq_start);
        assert_eq!(right.blocks[0].start, original.blocks[2].start);
        assert_eq!(left.label(), "ctg1[0:200]");
    }

    #[test]
    fn empty_target_is_not_an_error() {
        let container = build(
            vec![perm("rf1", "chr1", &[1, 2])],
            Filters::permissive(),
        )
        .unwrap();
        assert!(container.target_perms.is_empty());
    }
}
