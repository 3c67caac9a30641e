//! Target adjacency inference over the breakpoint graph.
//!
//! The unmatched nodes are the outer ends of the target contigs. The inferer
//! completes the target matching over them, one reference-connected
//! component at a time, minimizing the summed half-breakpoint parsimony cost
//! of the chosen partners. Components small enough are solved exactly by
//! branch and bound; larger ones fall back to a fewest-candidates-first
//! greedy.
//!
//! Determinism: components, unmatched nodes, and candidates are visited in
//! node order; cost ties fall back to (real partner before chromosome end,
//! shorter lower-median gap, smaller partner node). Components share nothing
//! mutable, so they are scored on a rayon pool.

use core_graph::{BreakpointGraph, Node};
use core_phylo::Phylogeny;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Components with more unmatched nodes than this are solved greedily.
const EXACT_COMPONENT_LIMIT: usize = 8;

/// One inferred target adjacency. `v` is an infinity node when the contig
/// end was placed at a chromosome boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjacency {
    pub u: Node,
    pub v: Node,
    /// Direct reference evidence: `(genome, gap)` for every reference that
    /// has this exact adjacency.
    pub supports: Vec<(String, i64)>,
}

impl Adjacency {
    pub fn is_chromosome_bound(&self) -> bool {
        self.u.is_infinity() || self.v.is_infinity()
    }
}

pub struct AdjacencyInferer<'a> {
    graph: &'a BreakpointGraph,
    phylogeny: &'a Phylogeny,
    target: &'a str,
}

impl<'a> AdjacencyInferer<'a> {
    pub fn new(graph: &'a BreakpointGraph, phylogeny: &'a Phylogeny, target: &'a str) -> Self {
        Self {
            graph,
            phylogeny,
            target,
        }
    }

    /// Complete the target matching; returns the chosen adjacencies sorted
    /// by their smaller endpoint.
    pub fn infer_adjacencies(&self) -> Vec<Adjacency> {
        if self.graph.is_empty() {
            return Vec::new();
        }
        let unmatched: BTreeSet<Node> = self
            .graph
            .unmatched_target_nodes()
            .into_iter()
            .map(|idx| self.graph.node(idx))
            .collect();
        if unmatched.is_empty() {
            return Vec::new();
        }

        let compressed = self.graph.compress_paths();
        let components = compressed.components_non_target();
        debug!(
            target: "inferer",
            unmatched = unmatched.len(),
            components = components.len(),
            "matching problem decomposed"
        );

        // Per component: the unmatched ends and one representative infinity
        // node. Pairing with "the chromosome end" is a state, not a slot, so
        // a single representative with unlimited capacity is enough.
        let tasks: Vec<(Vec<Node>, Option<Node>)> = components
            .iter()
            .map(|component| {
                let mut ends = Vec::new();
                let mut bound = None;
                for &idx in component {
                    let node = compressed.node(idx);
                    if unmatched.contains(&node) {
                        ends.push(node);
                    } else if node.is_infinity() && bound.is_none() {
                        bound = Some(node);
                    }
                }
                (ends, bound)
            })
            .filter(|(ends, _)| !ends.is_empty())
            .collect();

        let pairs: Vec<Vec<(Node, Node)>> = tasks
            .par_iter()
            .map(|(ends, bound)| {
                let mut solver = ComponentSolver::new(self, ends.clone(), *bound);
                solver.solve()
            })
            .collect();

        let mut adjacencies: Vec<Adjacency> = pairs
            .into_iter()
            .flatten()
            .map(|(u, v)| self.describe(u, v))
            .collect();
        adjacencies.sort_by_key(|adj| (adj.u, adj.v));
        info!(
            target: "inferer",
            adjacencies = adjacencies.len(),
            chromosome_bounds = adjacencies.iter().filter(|a| a.is_chromosome_bound()).count(),
            "target adjacencies inferred"
        );
        adjacencies
    }

    fn describe(&self, u: Node, v: Node) -> Adjacency {
        let (u, v) = if u <= v { (u, v) } else { (v, u) };
        let supports = match (self.graph.node_index(u), self.graph.node_index(v)) {
            (Some(ui), Some(vi)) => self
                .graph
                .direct_ref_gaps(ui, vi)
                .into_iter()
                .map(|(genome, gap)| (genome.to_string(), gap))
                .collect(),
            _ => Vec::new(),
        };
        Adjacency { u, v, supports }
    }

    /// Parsimony cost of pairing `u` with `v`: the states observed around
    /// each regular endpoint, with the target leaf fixed to the candidate
    /// partner. Symmetric in its arguments.
    fn pair_cost(&self, u: Node, v: Node) -> f64 {
        self.half_cost(u, v) + self.half_cost(v, u)
    }

    fn half_cost(&self, at: Node, partner: Node) -> f64 {
        let Some(idx) = self.graph.node_index(at) else {
            return 0.0;
        };
        if at.is_infinity() {
            return 0.0;
        }
        let mut states = self.graph.states_at(idx);
        states.insert(self.target, Some(partner.state_id()));
        self.phylogeny.score_leaf_states(&states)
    }

    /// Lower median of the direct reference gaps between two nodes;
    /// `i64::MAX` when no reference supports the adjacency.
    fn median_gap(&self, u: Node, v: Node) -> i64 {
        let (Some(ui), Some(vi)) = (self.graph.node_index(u), self.graph.node_index(v)) else {
            return i64::MAX;
        };
        let mut gaps: Vec<i64> = self
            .graph
            .direct_ref_gaps(ui, vi)
            .into_iter()
            .map(|(_, gap)| gap)
            .collect();
        if gaps.is_empty() {
            return i64::MAX;
        }
        gaps.sort_unstable();
        gaps[(gaps.len() - 1) / 2]
    }
}

/// Candidate ranking key: cost first, then the tie-break chain (real partner
/// before the chromosome end, then the shorter supported gap, then the
/// smaller partner node).
#[derive(Debug, Clone, Copy, PartialEq)]
struct RankKey {
    cost: f64,
    infinity_partner: bool,
    median_gap: i64,
    partner: Node,
}

impl RankKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.infinity_partner.cmp(&other.infinity_partner))
            .then_with(|| self.median_gap.cmp(&other.median_gap))
            .then_with(|| self.partner.cmp(&other.partner))
    }
}

struct ComponentSolver<'a, 'b> {
    inferer: &'b AdjacencyInferer<'a>,
    ends: Vec<Node>,
    bound: Option<Node>,
    cost_cache: BTreeMap<(Node, Node), f64>,
    best_cost: f64,
    best_pairs: Vec<(Node, Node)>,
}

impl<'a, 'b> ComponentSolver<'a, 'b> {
    fn new(inferer: &'b AdjacencyInferer<'a>, ends: Vec<Node>, bound: Option<Node>) -> Self {
        Self {
            inferer,
            ends,
            bound,
            cost_cache: BTreeMap::new(),
            best_cost: f64::INFINITY,
            best_pairs: Vec::new(),
        }
    }

    fn solve(&mut self) -> Vec<(Node, Node)> {
        if self.ends.len() <= EXACT_COMPONENT_LIMIT {
            let mut used: BTreeSet<Node> = BTreeSet::new();
            let mut pairs = Vec::new();
            self.branch(0.0, &mut used, &mut pairs);
            self.best_pairs.clone()
        } else {
            self.greedy()
        }
    }

    fn cost(&mut self, u: Node, v: Node) -> f64 {
        let key = if u <= v { (u, v) } else { (v, u) };
        if let Some(&cached) = self.cost_cache.get(&key) {
            return cached;
        }
        let cost = self.inferer.pair_cost(u, v);
        self.cost_cache.insert(key, cost);
        cost
    }

    fn rank(&mut self, u: Node, v: Node) -> RankKey {
        RankKey {
            cost: self.cost(u, v),
            infinity_partner: v.is_infinity(),
            median_gap: self.inferer.median_gap(u, v),
            partner: v,
        }
    }

    /// Free regular ends plus, when the component touches a chromosome
    /// boundary, the representative infinity partner. The latter is never
    /// consumed: any number of ends may stop at chromosome ends.
    fn candidates_for(&mut self, u: Node, used: &BTreeSet<Node>) -> Vec<(RankKey, Node)> {
        let mut nodes: Vec<Node> = self
            .ends
            .iter()
            .copied()
            .filter(|&v| v != u && !used.contains(&v))
            .collect();
        nodes.extend(self.bound);
        let mut candidates: Vec<(RankKey, Node)> = nodes
            .into_iter()
            .map(|v| (self.rank(u, v), v))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        candidates
    }

    /// Exact search: assign the first free end, branching over its ranked
    /// candidates, pruning on the running cost. An end with no candidate
    /// left stays an orphan (partial matchings are legal).
    fn branch(&mut self, cost_so_far: f64, used: &mut BTreeSet<Node>, pairs: &mut Vec<(Node, Node)>) {
        if cost_so_far >= self.best_cost {
            return;
        }
        let next = self.ends.iter().copied().find(|end| !used.contains(end));
        let Some(u) = next else {
            self.best_cost = cost_so_far;
            self.best_pairs = pairs.clone();
            return;
        };
        let candidates = self.candidates_for(u, used);
        if candidates.is_empty() {
            used.insert(u);
            self.branch(cost_so_far, used, pairs);
            used.remove(&u);
            return;
        }
        for (key, v) in candidates {
            used.insert(u);
            if !v.is_infinity() {
                used.insert(v);
            }
            pairs.push((u, v));
            self.branch(cost_so_far + key.cost, used, pairs);
            pairs.pop();
            if !v.is_infinity() {
                used.remove(&v);
            }
            used.remove(&u);
        }
    }

    /// Greedy fallback for large components: repeatedly fix the end with the
    /// fewest open candidates, choosing its best-ranked partner.
    fn greedy(&mut self) -> Vec<(Node, Node)> {
        let mut used: BTreeSet<Node> = BTreeSet::new();
        let mut pairs = Vec::new();
        loop {
            let mut scarcest: Option<(usize, Node)> = None;
            for &u in self.ends.clone().iter() {
                if used.contains(&u) {
                    continue;
                }
                let open = self.candidates_for(u, &used).len();
                if scarcest.is_none_or(|(count, _)| open < count) {
                    scarcest = Some((open, u));
                }
            }
            let Some((_, u)) = scarcest else {
                break;
            };
            used.insert(u);
            let candidates = self.candidates_for(u, &used);
            if let Some((_, v)) = candidates.into_iter().next() {
                if !v.is_infinity() {
                    used.insert(v);
                }
                pairs.push((u, v));
            }
            // No candidate: the end stays an orphan and its scaffold stops.
        }
        pairs
    }
}
