//! The final refine stage: re-run adjacency inference on the all-broken,
//! smallest-scale container and splice previously filtered small contigs
//! back into accumulator gaps.
//!
//! A splice only happens when the inferred matching forms an unbroken chain
//! of unplaced contigs from the exit end of one placed contig to the entry
//! end of its scaffold neighbor; anything weaker leaves the gap alone.

use crate::merge::align;
use crate::{estimate_gap, overhang, perm_ends, ContigRef, Placed, Scaffold, DEFAULT_GAP};
use core_graph::{BreakpointGraph, Node};
use core_infer::{Adjacency, AdjacencyInferer};
use core_perm::{Permutation, PermutationContainer};
use core_phylo::Phylogeny;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Longest chain of small contigs spliced into a single gap.
const MAX_SPLICE_CHAIN: usize = 32;

pub struct AdjacencyRefiner<'a> {
    graph: &'a BreakpointGraph,
    phylogeny: &'a Phylogeny,
    container: &'a PermutationContainer,
    target: &'a str,
}

impl<'a> AdjacencyRefiner<'a> {
    pub fn new(
        graph: &'a BreakpointGraph,
        phylogeny: &'a Phylogeny,
        container: &'a PermutationContainer,
        target: &'a str,
    ) -> Self {
        Self {
            graph,
            phylogeny,
            container,
            target,
        }
    }
}

/// Splice refinable contig chains into the gaps of `scaffolds`.
pub fn refine_scaffolds(scaffolds: &[Scaffold], refiner: &AdjacencyRefiner<'_>) -> Vec<Scaffold> {
    let adjacencies =
        AdjacencyInferer::new(refiner.graph, refiner.phylogeny, refiner.target).infer_adjacencies();

    let mut partner: BTreeMap<Node, (Node, Option<i64>)> = BTreeMap::new();
    for adj in &adjacencies {
        if adj.is_chromosome_bound() {
            continue;
        }
        let gap = splice_gap(adj, refiner);
        partner.insert(adj.u, (adj.v, gap));
        partner.insert(adj.v, (adj.u, gap));
    }

    // End node -> (container permutation, entered at front).
    let mut end_of: BTreeMap<Node, (usize, bool)> = BTreeMap::new();
    for (idx, perm) in refiner.container.target_perms.iter().enumerate() {
        if let Some((front, back)) = perm_ends(perm) {
            end_of.entry(front).or_insert((idx, true));
            end_of.entry(back).or_insert((idx, false));
        }
    }
    let by_contig: BTreeMap<ContigRef, usize> = refiner
        .container
        .target_perms
        .iter()
        .enumerate()
        .map(|(idx, perm)| (ContigRef::of_permutation(perm), idx))
        .collect();

    let chains = align(scaffolds, refiner.container);
    let mut placed_perms: BTreeSet<usize> = chains
        .iter()
        .flat_map(|chain| chain.items.iter())
        .filter_map(|item| by_contig.get(&item.contig).copied())
        .collect();

    let mut spliced_total = 0usize;
    let mut out = Vec::with_capacity(chains.len());
    for chain in chains {
        let mut items: Vec<Placed> = Vec::new();
        for (pos, placed) in chain.items.iter().enumerate() {
            items.push(placed.clone());
            let Some(next) = chain.items.get(pos + 1) else {
                continue;
            };
            let Some((left_gap, splice)) = find_splice(
                placed,
                next,
                refiner,
                &partner,
                &end_of,
                &by_contig,
                &placed_perms,
            ) else {
                continue;
            };
            items
                .last_mut()
                .expect("the left contig was just pushed")
                .gap_after = left_gap;
            for (perm_idx, item) in splice {
                placed_perms.insert(perm_idx);
                spliced_total += 1;
                items.push(item);
            }
        }
        out.push(Scaffold {
            name: chain.name,
            contigs: items,
        });
    }

    if spliced_total > 0 {
        info!(target: "refine", spliced = spliced_total, "small contigs spliced into gaps");
    }
    out
}

/// Gap estimate for one inferred adjacency, before overhang correction.
fn splice_gap(adj: &Adjacency, refiner: &AdjacencyRefiner<'_>) -> Option<i64> {
    estimate_gap(&adj.supports, refiner.phylogeny, refiner.target)
}

type Splice = Vec<(usize, Placed)>;

/// Follow the inferred matching from the exit end of `left` and return the
/// chain of unplaced contigs it threads, provided it lands exactly on the
/// entry end of `right`. The returned `i64` is the corrected gap to store on
/// `left`; the splice items carry the remaining junction gaps.
#[allow(clippy::too_many_arguments)]
fn find_splice(
    left: &Placed,
    right: &Placed,
    refiner: &AdjacencyRefiner<'_>,
    partner: &BTreeMap<Node, (Node, Option<i64>)>,
    end_of: &BTreeMap<Node, (usize, bool)>,
    by_contig: &BTreeMap<ContigRef, usize>,
    placed_perms: &BTreeSet<usize>,
) -> Option<(i64, Splice)> {
    let perms = &refiner.container.target_perms;
    let left_idx = *by_contig.get(&left.contig)?;
    let right_idx = *by_contig.get(&right.contig)?;
    let (l_front, l_back) = perm_ends(&perms[left_idx])?;
    let (r_front, r_back) = perm_ends(&perms[right_idx])?;
    let exit = if left.forward { l_back } else { l_front };
    let goal = if right.forward { r_front } else { r_back };

    let mut splice: Splice = Vec::new();
    let mut gaps: Vec<i64> = Vec::new();
    let mut prev_perm = left_idx;
    let mut prev_exited_front = !left.forward;
    let mut cursor = exit;
    loop {
        if splice.len() > MAX_SPLICE_CHAIN {
            return None;
        }
        let &(next_node, raw_gap) = partner.get(&cursor)?;
        let raw = raw_gap.unwrap_or(DEFAULT_GAP);
        if next_node == goal {
            if splice.is_empty() {
                // The adjacency already holds; nothing to splice.
                return None;
            }
            let gap = raw
                - overhang(&perms[prev_perm], prev_exited_front)
                - overhang(&perms[right_idx], right.forward);
            gaps.push(gap);
            return Some(finish(splice, gaps, left));
        }
        let &(perm_idx, entered_front) = end_of.get(&next_node)?;
        if placed_perms.contains(&perm_idx) || splice.iter().any(|(idx, _)| *idx == perm_idx) {
            return None;
        }
        let perm = &perms[perm_idx];
        let gap = raw
            - overhang(&perms[prev_perm], prev_exited_front)
            - overhang(perm, entered_front);
        gaps.push(gap);
        splice.push((
            perm_idx,
            Placed {
                contig: ContigRef::of_permutation(perm),
                forward: entered_front,
                gap_after: 0,
            },
        ));
        let (front, back) = perm_ends(perm)?;
        cursor = if entered_front { back } else { front };
        prev_perm = perm_idx;
        prev_exited_front = !entered_front;
    }
}

/// Distribute the collected junction gaps: `gaps[0]` belongs on `left`,
/// the rest on the spliced contigs in order.
fn finish(mut splice: Splice, gaps: Vec<i64>, left: &Placed) -> (i64, Splice) {
    debug_assert_eq!(gaps.len(), splice.len() + 1, "one gap per junction");
    for (slot, gap) in splice.iter_mut().zip(gaps.iter().skip(1)) {
        slot.1.gap_after = *gap;
    }
    debug!(
        target: "refine",
        after = left.contig.label().as_str(),
        contigs = splice.len(),
        "gap spliced"
    );
    (gaps[0], splice)
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn unplaced_contig_chain_is_spliced_into_the_gap() {
        let container = PermutationContainer::from_permutations(
            vec![
                perm("rf1", "chr1", &[1, 2, 3]),
                perm("rf2", "chr1", &[1, 2, 3]),
                perm("tgt", "ctgA", &[1]),
                perm("tgt", "ctgB", &[2]),
                perm("tgt", "ctgC", &[3]),
            ],
            &["rf1".to_string(), "rf2".to_string()],
            &["tgt".to_string()],
            Filters {
                min_genomes: 1,
                resolve_repeats: false,
                merge_collinear: false,
            },
        )
        .unwrap();
        let graph = BreakpointGraph::build(&container);
        let tree = Phylogeny::from_newick("((rf1:1,rf2:1):1,tgt:1);").unwrap();
        let refiner = AdjacencyRefiner::new(&graph, &tree, &container, "tgt");

        // The coarse stages placed A and C but never saw B's block.
        let contig = |name: &str| {
            let perm = container
                .target_perms
                .iter()
                .find(|p| p.sequence == name)
                .unwrap();
            ContigRef::of_permutation(perm)
        };
        let scaffolds = vec![Scaffold {
            name: "chr1_scaffold".to_string(),
            contigs: vec![
                Placed {
                    contig: contig("ctgA"),
                    forward: true,
                    gap_after: 1000,
                },
                Placed {
                    contig: contig("ctgC"),
                    forward: true,
                    gap_after: 0,
                },
            ],
        }];

        let refined = refine_scaffolds(&scaffolds, &refiner);
        assert_eq!(refined.len(), 1);
        let labels: Vec<(String, i64)> = refined[0]
            .contigs
            .iter()
            .map(|p| (p.contig.label(), p.gap_after))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("ctgA".to_string(), 100),
                ("ctgB".to_string(), 100),
                ("ctgC".to_string(), 0),
            ]
        );
    }

    #[test]
    fn unrelated_gaps_are_left_alone() {
        // ctgB's block sits on another chromosome: the matching cannot
        // thread it between A and C.
        let container = PermutationContainer::from_permutations(
            vec![
                perm("rf1", "chr1", &[1, 3]),
                perm("rf1", "chr2", &[2]),
                perm("rf2", "chr1", &[1, 3]),
                perm("rf2", "chr2", &[2]),
                perm("tgt", "ctgA", &[1]),
                perm("tgt", "ctgB", &[2]),
                perm("tgt", "ctgC", &[3]),
            ],
            &["rf1".to_string(), "rf2".to_string()],
            &["tgt".to_string()],
            Filters {
                min_genomes: 1,
                resolve_repeats: false,
                merge_collinear: false,
            },
        )
        .unwrap();
        let graph = BreakpointGraph::build(&container);
        let tree = Phylogeny::from_newick("((rf1:1,rf2:1):1,tgt:1);").unwrap();
        let refiner = AdjacencyRefiner::new(&graph, &tree, &container, "tgt");

        let contig = |name: &str| {
            let perm = container
                .target_perms
                .iter()
                .find(|p| p.sequence == name)
                .unwrap();
            ContigRef::of_permutation(perm)
        };
        let scaffolds = vec![Scaffold {
            name: "chr1_scaffold".to_string(),
            contigs: vec![
                Placed {
                    contig: contig("ctgA"),
                    forward: true,
                    gap_after: 1000,
                },
                Placed {
                    contig: contig("ctgC"),
                    forward: true,
                    gap_after: 0,
                },
            ],
        }];
        let refined = refine_scaffolds(&scaffolds, &refiner);
        assert_eq!(refined[0].contigs.len(), 2);
        assert_eq!(refined[0].contigs[0].gap_after, 1000);
    }
}
