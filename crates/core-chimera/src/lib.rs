//! Cross-scale detection of chimeric target contigs.
//!
//! A junction between neighboring blocks `x`, `y` of a target contig is
//! suspect when, at some resolution, `head(x)` and `tail(y)` sit in
//! different reference-connected pieces of the raw breakpoint graph: the two
//! sides never co-occur in reference chromosome context, so the join is more
//! likely an assembly artifact than a true rearrangement. Junctions whose
//! blocks are simply absent at a resolution say nothing at that resolution.
//!
//! The detector precomputes one component map per stage from the *raw*
//! (unbroken) graphs; `break_contigs` is then a pure lookup and split, so
//! detection is deterministic for a given stage set.

use core_graph::{BreakpointGraph, Node};
use core_perm::{Permutation, PermutationContainer};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub struct ChimeraDetector {
    components: BTreeMap<String, BTreeMap<Node, usize>>,
}

impl ChimeraDetector {
    /// Build raw graphs for every stage container (in parallel, they share
    /// nothing) and keep their reference-connectivity maps.
    pub fn from_containers(stages: &[(String, &PermutationContainer)]) -> Self {
        let maps: Vec<(String, BTreeMap<Node, usize>)> = stages
            .par_iter()
            .map(|(name, container)| {
                let graph = BreakpointGraph::build(container);
                (name.clone(), graph.component_map_with_block_links())
            })
            .collect();
        Self {
            components: maps.into_iter().collect(),
        }
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    /// Derive a container where every target permutation is split at each
    /// junction some stage in `stages` flags. Reference permutations and
    /// block coordinates are preserved.
    pub fn break_contigs(
        &self,
        container: &PermutationContainer,
        stages: &[String],
    ) -> PermutationContainer {
        let mut broken_targets = Vec::new();
        let mut junctions = 0usize;
        for perm in &container.target_perms {
            let cuts = self.flagged_junctions(perm, stages);
            junctions += cuts.len();
            broken_targets.extend(perm.split_at_all(&cuts));
        }
        if junctions > 0 {
            info!(
                target: "chimera",
                junctions,
                contigs_before = container.target_perms.len(),
                contigs_after = broken_targets.len(),
                "chimeric junctions broken"
            );
        }
        PermutationContainer::from_parts(
            container.ref_perms.clone(),
            broken_targets,
            container.references().clone(),
            container.targets().clone(),
        )
    }

    fn flagged_junctions(&self, perm: &Permutation, stages: &[String]) -> Vec<usize> {
        let mut cuts = Vec::new();
        for index in 1..perm.blocks.len() {
            let x = perm.blocks[index - 1].signed_id;
            let y = perm.blocks[index].signed_id;
            let head = Node::End(x);
            let tail = Node::End(-y);
            let flagged = stages.iter().any(|stage| {
                let Some(map) = self.components.get(stage) else {
                    return false;
                };
                match (map.get(&head), map.get(&tail)) {
                    (Some(a), Some(b)) => a != b,
                    _ => false,
                }
            });
            if flagged {
                debug!(
                    target: "chimera",
                    contig = perm.label().as_str(),
                    junction = format!("{x}|{y}"),
                    "junction flagged"
                );
                cuts.push(index);
            }
        }
        cuts
    }
}
