//! Scaffold construction from inferred adjacencies.
//!
//! A scaffold is an ordered, signed list of target contigs with estimated
//! gaps. The inferred adjacencies form a near-matching over contig ends;
//! scaffolds are its maximal paths. Everything here iterates in sorted order
//! so two runs over the same inputs produce byte-identical scaffolds.

mod links;
mod merge;
mod refine;

pub use links::{parse_links, write_links};
pub use merge::merge_scaffolds;
pub use refine::{refine_scaffolds, AdjacencyRefiner};

use core_graph::Node;
use core_infer::Adjacency;
use core_perm::{Permutation, PermutationContainer};
use core_phylo::Phylogeny;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ScaffoldError {
    #[error("links file, line {line}: {what}")]
    Syntax { line: usize, what: String },
}

/// Gap written when no reference supports an adjacency directly.
pub const DEFAULT_GAP: i64 = 11;

/// One target contig piece, identified by its sequence name and the covered
/// sub-range (whole contigs cover `[0, len)` and are not fragments).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContigRef {
    pub sequence: String,
    pub start: u64,
    pub end: u64,
    pub fragment: bool,
}

impl ContigRef {
    pub fn of_permutation(perm: &Permutation) -> Self {
        Self {
            sequence: perm.sequence.clone(),
            start: perm.seq_start,
            end: perm.seq_end,
            fragment: perm.fragment,
        }
    }

    pub fn label(&self) -> String {
        if self.fragment {
            format!("{}[{}:{}]", self.sequence, self.start, self.end)
        } else {
            self.sequence.clone()
        }
    }
}

/// A contig placed in a scaffold: orientation plus the gap to the next
/// placed contig (0 on the last one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placed {
    pub contig: ContigRef,
    pub forward: bool,
    pub gap_after: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scaffold {
    pub name: String,
    pub contigs: Vec<Placed>,
}

impl Scaffold {
    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }
}

/// Ends of one target permutation in breakpoint-graph node terms.
pub(crate) fn perm_ends(perm: &Permutation) -> Option<(Node, Node)> {
    let first = perm.blocks.first()?;
    let last = perm.blocks.last()?;
    Some((Node::End(-first.signed_id), Node::End(last.signed_id)))
}

/// Unblocked overhang between the block boundary at `node` and the physical
/// contig end on that side; subtracted from reference gaps when estimating
/// inter-contig distances.
pub(crate) fn overhang(perm: &Permutation, front: bool) -> i64 {
    if front {
        let first = perm.blocks.first().expect("placed contigs have blocks");
        (first.start - perm.seq_start) as i64
    } else {
        let last = perm.blocks.last().expect("placed contigs have blocks");
        (perm.seq_end - last.end) as i64
    }
}

/// Weighted lower median of the supporting reference gaps, weights inverse
/// to the supporting genome's tree distance from the target.
pub fn estimate_gap(
    supports: &[(String, i64)],
    phylogeny: &Phylogeny,
    target: &str,
) -> Option<i64> {
    if supports.is_empty() {
        return None;
    }
    let mut weighted: Vec<(i64, f64)> = supports
        .iter()
        .map(|(genome, gap)| {
            let dist = phylogeny.distance(target, genome).unwrap_or(1.0);
            (*gap, 1.0 / dist.max(1e-9))
        })
        .collect();
    weighted.sort_by_key(|&(gap, _)| gap);
    let total: f64 = weighted.iter().map(|&(_, w)| w).sum();
    let mut acc = 0.0;
    for &(gap, weight) in &weighted {
        acc += weight;
        if acc * 2.0 >= total {
            return Some(gap);
        }
    }
    Some(weighted.last().expect("supports are non-empty").0)
}

/// Walk the inferred adjacency matching into maximal signed contig paths.
pub fn build_scaffolds(
    adjacencies: &[Adjacency],
    container: &PermutationContainer,
    phylogeny: &Phylogeny,
    target: &str,
) -> Vec<Scaffold> {
    // Contig-end node -> (permutation index, is_front).
    let mut end_of: BTreeMap<Node, (usize, bool)> = BTreeMap::new();
    for (idx, perm) in container.target_perms.iter().enumerate() {
        let Some((front, back)) = perm_ends(perm) else {
            continue;
        };
        for (node, is_front) in [(front, true), (back, false)] {
            if end_of.insert(node, (idx, is_front)).is_some() {
                warn!(
                    target: "scaffolder",
                    node = ?node,
                    contig = perm.label().as_str(),
                    "ambiguous contig end, keeping the later contig"
                );
            }
        }
    }

    // Partner map over contig-end nodes, with per-junction gap estimates.
    let mut partner: BTreeMap<Node, (Node, Option<i64>)> = BTreeMap::new();
    for adj in adjacencies {
        if adj.is_chromosome_bound() {
            continue;
        }
        if !end_of.contains_key(&adj.u) || !end_of.contains_key(&adj.v) {
            continue;
        }
        let gap = estimate_gap(&adj.supports, phylogeny, target);
        partner.insert(adj.u, (adj.v, gap));
        partner.insert(adj.v, (adj.u, gap));
    }

    let mut placed = vec![false; container.target_perms.len()];
    let mut scaffolds = Vec::new();

    let walk_from = |start_idx: usize,
                     enter_front: bool,
                     placed: &mut Vec<bool>|
     -> Vec<Placed> {
        let mut items = Vec::new();
        let mut idx = start_idx;
        let mut entered_front = enter_front;
        loop {
            placed[idx] = true;
            let perm = &container.target_perms[idx];
            let (front, back) = perm_ends(perm).expect("placed contigs have blocks");
            let exit_node = if entered_front { back } else { front };
            let next = partner.get(&exit_node).copied();
            let gap_after = match next {
                Some((_, gap)) => {
                    let raw = gap.unwrap_or(DEFAULT_GAP);
                    raw - overhang(perm, !entered_front)
                }
                None => 0,
            };
            items.push(Placed {
                contig: ContigRef::of_permutation(perm),
                forward: entered_front,
                gap_after: 0,
            });
            let position = items.len() - 1;
            match next {
                None => break,
                Some((partner_node, _)) => {
                    let Some(&(next_idx, next_front)) = end_of.get(&partner_node) else {
                        break;
                    };
                    if placed[next_idx] {
                        break;
                    }
                    // Deduct the entry-side overhang of the next contig too.
                    let next_perm = &container.target_perms[next_idx];
                    items[position].gap_after = gap_after - overhang(next_perm, next_front);
                    idx = next_idx;
                    entered_front = next_front;
                }
            }
        }
        items
    };

    // Path starts first: contigs with a free end. Then cycles, broken at the
    // smallest remaining contig.
    for pass in 0..2 {
        for idx in 0..container.target_perms.len() {
            if placed[idx] {
                continue;
            }
            let Some((front, back)) = perm_ends(&container.target_perms[idx]) else {
                continue;
            };
            let (enter_front, is_start) = if !partner.contains_key(&front) {
                (true, true)
            } else if !partner.contains_key(&back) {
                (false, true)
            } else {
                (true, false)
            };
            if pass == 0 && !is_start {
                continue;
            }
            if pass == 1 && !is_start {
                debug!(
                    target: "scaffolder",
                    contig = container.target_perms[idx].label().as_str(),
                    "breaking a scaffold cycle"
                );
            }
            let items = walk_from(idx, enter_front, &mut placed);
            scaffolds.push(Scaffold {
                name: format!("scaffold_{}", scaffolds.len() + 1),
                contigs: items,
            });
        }
    }

    info!(
        target: "scaffolder",
        scaffolds = scaffolds.len(),
        placed = placed.iter().filter(|&&p| p).count(),
        "scaffolds built"
    );
    scaffolds
}

/// Rename scaffolds after the `naming_ref` chromosome sharing the most
/// blocks with each scaffold; falls back to positional names. Duplicate
/// winners get a numeric suffix. Deterministic in scaffold order.
pub fn assign_scaffold_names(
    scaffolds: &mut [Scaffold],
    container: &PermutationContainer,
    naming_ref: &str,
) {
    // Block -> reference chromosome of the naming genome.
    let mut chrom_of_block: BTreeMap<u64, &str> = BTreeMap::new();
    for perm in &container.ref_perms {
        if perm.genome != naming_ref {
            continue;
        }
        for occ in &perm.blocks {
            chrom_of_block.entry(occ.block_id()).or_insert(&perm.sequence);
        }
    }
    let mut by_contig: BTreeMap<ContigRef, &Permutation> = BTreeMap::new();
    for perm in &container.target_perms {
        by_contig.insert(ContigRef::of_permutation(perm), perm);
    }

    let mut used: BTreeMap<String, usize> = BTreeMap::new();
    for (idx, scaffold) in scaffolds.iter_mut().enumerate() {
        let mut votes: BTreeMap<&str, usize> = BTreeMap::new();
        for placed in &scaffold.contigs {
            if let Some(perm) = by_contig.get(&placed.contig) {
                for occ in &perm.blocks {
                    if let Some(&chrom) = chrom_of_block.get(&occ.block_id()) {
                        *votes.entry(chrom).or_default() += 1;
                    }
                }
            }
        }
        let mut best: Option<(usize, &str)> = None;
        for (&chrom, &count) in &votes {
            let better = match best {
                None => true,
                Some((best_count, best_chrom)) => {
                    count > best_count || (count == best_count && chrom < best_chrom)
                }
            };
            if better {
                best = Some((count, chrom));
            }
        }
        let base = best
            .map(|(_, chrom)| format!("{chrom}_scaffold"))
            .unwrap_or_else(|| format!("scaffold_{}", idx + 1));
        let n = used.entry(base.clone()).or_default();
        *n += 1;
        scaffold.name = if *n == 1 { base } else { format!("{base}_{n}") };
    }
}

/// Target contigs of `container` that no scaffold places.
pub fn unplaced_contigs(
    scaffolds: &[Scaffold],
    container: &PermutationContainer,
) -> Vec<ContigRef> {
    let placed: BTreeSet<ContigRef> = scaffolds
        .iter()
        .flat_map(|s| s.contigs.iter().map(|p| p.contig.clone()))
        .collect();
    container
        .target_perms
        .iter()
        .map(ContigRef::of_permutation)
        .filter(|contig| !placed.contains(contig))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_graph::BreakpointGraph;
    use core_infer::AdjacencyInferer;
    use core_perm::{BlockOcc, Filters};

    fn perm(genome: &str, sequence: &str, ids: &[i64]) -> Permutation {
        let blocks = ids
            .iter()
            .enumerate()
            .map(|(i, &signed_id)| BlockOcc {
                signed_id,
                start: i as u64 * 1000,
                end: i as u64 * 1000 + 900,
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

    fn container(perms: Vec<Permutation>) -> PermutationContainer {
        PermutationContainer::from_permutations(
            perms,
            &["rf1".to_string(), "rf2".to_string()],
            &["tgt".to_string()],
            Filters {
                min_genomes: 1,
                resolve_repeats: false,
                merge_collinear: false,
            },
        )
        .unwrap()
    }

    fn pipeline(container: &PermutationContainer) -> Vec<Scaffold> {
        let graph = BreakpointGraph::build(container);
        let tree = Phylogeny::from_newick("((rf1:1,rf2:1):1,tgt:1);").unwrap();
        let adjacencies = AdjacencyInferer::new(&graph, &tree, "tgt").infer_adjacencies();
        build_scaffolds(&adjacencies, container, &tree, "tgt")
    }

    #[test]
    fn identity_target_yields_one_exact_scaffold() {
        let container = container(vec![
            perm("rf1", "chr1", &[1, 2, 3]),
            perm("rf2", "chr1", &[1, 2, 3]),
            perm("tgt", "ctg1", &[1, 2, 3]),
        ]);
        let scaffolds = pipeline(&container);
        assert_eq!(scaffolds.len(), 1);
        assert_eq!(scaffolds[0].contigs.len(), 1);
        assert!(scaffolds[0].contigs[0].forward);
        assert_eq!(scaffolds[0].contigs[0].contig.label(), "ctg1");
    }

    #[test]
    fn two_block_boundary_case_joins_the_contigs() {
        // One clear reference adjacency, blocks unique: a single scaffold of
        // length two.
        let container = container(vec![
            perm("rf1", "chr1", &[1, 2]),
            perm("rf2", "chr1", &[1, 2]),
            perm("tgt", "ctgA", &[1]),
            perm("tgt", "ctgB", &[2]),
        ]);
        let scaffolds = pipeline(&container);
        assert_eq!(scaffolds.len(), 1);
        let labels: Vec<String> = scaffolds[0]
            .contigs
            .iter()
            .map(|p| p.contig.label())
            .collect();
        assert_eq!(labels, vec!["ctgA", "ctgB"]);
        assert!(scaffolds[0].contigs.iter().all(|p| p.forward));
    }

    #[test]
    fn reversed_entry_flips_the_contig() {
        // ctgB carries its blocks on the opposite strand.
        let container = container(vec![
            perm("rf1", "chr1", &[1, 2, 3, 4]),
            perm("rf2", "chr1", &[1, 2, 3, 4]),
            perm("tgt", "ctgA", &[1, 2]),
            perm("tgt", "ctgB", &[-4, -3]),
        ]);
        let scaffolds = pipeline(&container);
        assert_eq!(scaffolds.len(), 1);
        let placed: Vec<(String, bool)> = scaffolds[0]
            .contigs
            .iter()
            .map(|p| (p.contig.label(), p.forward))
            .collect();
        assert_eq!(
            placed,
            vec![("ctgA".to_string(), true), ("ctgB".to_string(), false)]
        );
    }

    #[test]
    fn gaps_subtract_contig_overhangs() {
        // Reference gap between blocks 1 and 2 is 100 bp; each contig hangs
        // 50 bp over its blocked region, so the estimated gap is 0.
        let mut rf1 = perm("rf1", "chr1", &[1, 2]);
        rf1.blocks[1].start = 1000; // gap 100 after block 1 ends at 900
        rf1.blocks[1].end = 1900;
        rf1.seq_end = 1900;
        let mut rf2 = rf1.clone();
        rf2.genome = "rf2".to_string();
        let mut ctg_a = perm("tgt", "ctgA", &[1]);
        ctg_a.seq_end = 950; // 50 bp overhang past the block
        let mut ctg_b = perm("tgt", "ctgB", &[2]);
        ctg_b.blocks[0].start = 50; // 50 bp overhang before the block
        ctg_b.blocks[0].end = 950;
        ctg_b.seq_end = 950;
        let container = container(vec![rf1, rf2, ctg_a, ctg_b]);
        let scaffolds = pipeline(&container);
        assert_eq!(scaffolds.len(), 1);
        assert_eq!(scaffolds[0].contigs[0].gap_after, 0);
    }

    #[test]
    fn empty_container_yields_no_scaffolds() {
        let container = container(vec![perm("rf1", "chr1", &[1])]);
        let scaffolds = pipeline(&container);
        assert!(scaffolds.is_empty());
    }

    #[test]
    fn names_follow_the_reference_chromosomes() {
        let container = container(vec![
            perm("rf1", "chrA", &[1, 2]),
            perm("rf2", "chrA", &[1, 2]),
            perm("tgt", "ctg1", &[1, 2]),
        ]);
        let mut scaffolds = pipeline(&container);
        assign_scaffold_names(&mut scaffolds, &container, "rf1");
        assert_eq!(scaffolds[0].name, "chrA_scaffold");
    }
}
