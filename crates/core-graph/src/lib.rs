//! Breakpoint graph over signed block endpoints.
//!
//! Nodes are signed block endpoints (`+b` is the head of block `b`, `-b` its
//! tail) plus one infinity sentinel per permutation extremity. For every
//! adjacent pair `(x, y)` in a permutation the graph carries an edge between
//! the exit endpoint of `x` (the node `x` itself) and the entry endpoint of
//! `y` (the node `-y`), colored by the genome and annotated with the gap in
//! bp between the two blocks (negative when they overlap).
//!
//! The graph is an arena: nodes and edges live in flat vectors and refer to
//! each other by index; a `BTreeMap` keyed by [`Node`] gives deterministic
//! lookup and iteration order. No floating point anywhere.
//!
//! Invariants:
//! * Edge count is `Σ (len(perm) − 1) + 2 · num_perms`: one edge per
//!   adjacency plus one infinity edge per permutation extremity.
//! * For every genome color, every node has at most one incident edge of
//!   that color (matching property per color; holds once repeats are
//!   filtered or resolved upstream).

use core_perm::PermutationContainer;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A node of the breakpoint graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Node {
    /// Signed block endpoint: `+b` head, `-b` tail.
    End(i64),
    /// Sentinel marking one permutation extremity.
    Infinity(u32),
}

impl Node {
    pub fn is_infinity(&self) -> bool {
        matches!(self, Node::Infinity(_))
    }

    /// Half-breakpoint state id of this node when it is somebody's partner:
    /// endpoints keep their signed id, every chromosome end maps to 0.
    pub fn state_id(&self) -> i64 {
        match self {
            Node::End(id) => *id,
            Node::Infinity(_) => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub u: usize,
    pub v: usize,
    pub genome: u16,
    pub sequence: u32,
    pub gap: i64,
}

impl Edge {
    pub fn other(&self, node: usize) -> usize {
        debug_assert!(node == self.u || node == self.v, "node must be an endpoint");
        if node == self.u { self.v } else { self.u }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BreakpointGraph {
    nodes: Vec<Node>,
    index: BTreeMap<Node, usize>,
    adjacency: Vec<Vec<usize>>,
    edges: Vec<Edge>,
    genomes: Vec<String>,
    target_genomes: BTreeSet<u16>,
    sequences: Vec<String>,
    infinity_count: u32,
}

impl BreakpointGraph {
    /// Build the graph for one permutation container. An empty container
    /// yields an empty graph.
    pub fn build(container: &PermutationContainer) -> Self {
        let mut graph = Self::default();
        for genome in container.references().iter().chain(container.targets()) {
            let idx = graph.genomes.len() as u16;
            graph.genomes.push(genome.clone());
            if container.is_target_genome(genome) {
                graph.target_genomes.insert(idx);
            }
        }

        for perm in container.all_perms() {
            if perm.blocks.is_empty() {
                continue;
            }
            let genome = graph
                .genome_index(&perm.genome)
                .expect("container genomes are registered above");
            let sequence = graph.sequences.len() as u32;
            graph.sequences.push(perm.label());

            let first = perm.blocks.first().expect("permutation is non-empty");
            let last = perm.blocks.last().expect("permutation is non-empty");
            let front = graph.fresh_infinity();
            graph.add_edge(
                front,
                Node::End(-first.signed_id),
                genome,
                sequence,
                (first.start as i64) - (perm.seq_start as i64),
            );
            for pair in perm.blocks.windows(2) {
                let (x, y) = (pair[0], pair[1]);
                graph.add_edge(
                    Node::End(x.signed_id),
                    Node::End(-y.signed_id),
                    genome,
                    sequence,
                    (y.start as i64) - (x.end as i64),
                );
            }
            let back = graph.fresh_infinity();
            graph.add_edge(
                Node::End(last.signed_id),
                back,
                genome,
                sequence,
                (perm.seq_end as i64) - (last.end as i64),
            );
        }
        debug!(
            target: "bpgraph",
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            genomes = graph.genomes.len(),
            "breakpoint graph built"
        );
        graph
    }

    fn fresh_infinity(&mut self) -> Node {
        let node = Node::Infinity(self.infinity_count);
        self.infinity_count += 1;
        node
    }

    fn ensure_node(&mut self, node: Node) -> usize {
        if let Some(&idx) = self.index.get(&node) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(node);
        self.adjacency.push(Vec::new());
        self.index.insert(node, idx);
        idx
    }

    fn add_edge(&mut self, u: Node, v: Node, genome: u16, sequence: u32, gap: i64) {
        let u = self.ensure_node(u);
        let v = self.ensure_node(v);
        let edge_idx = self.edges.len();
        self.edges.push(Edge {
            u,
            v,
            genome,
            sequence,
            gap,
        });
        self.adjacency[u].push(edge_idx);
        if v != u {
            self.adjacency[v].push(edge_idx);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, idx: usize) -> Node {
        self.nodes[idx]
    }

    pub fn node_index(&self, node: Node) -> Option<usize> {
        self.index.get(&node).copied()
    }

    /// Node indices in `Node` order.
    pub fn node_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.index.values().copied()
    }

    pub fn genomes(&self) -> &[String] {
        &self.genomes
    }

    pub fn genome_name(&self, genome: u16) -> &str {
        &self.genomes[genome as usize]
    }

    pub fn genome_index(&self, genome: &str) -> Option<u16> {
        self.genomes
            .iter()
            .position(|name| name == genome)
            .map(|idx| idx as u16)
    }

    pub fn sequence_name(&self, sequence: u32) -> &str {
        &self.sequences[sequence as usize]
    }

    pub fn is_target_color(&self, genome: u16) -> bool {
        self.target_genomes.contains(&genome)
    }

    pub fn incident(&self, node: usize) -> &[usize] {
        &self.adjacency[node]
    }

    /// `(neighbor, edge index)` pairs of the given color, sorted by neighbor.
    pub fn neighbors(&self, node: Node, genome: &str) -> Vec<(Node, usize)> {
        let Some(genome) = self.genome_index(genome) else {
            return Vec::new();
        };
        let Some(&idx) = self.index.get(&node) else {
            return Vec::new();
        };
        let mut out: Vec<(Node, usize)> = self.adjacency[idx]
            .iter()
            .filter(|&&e| self.edges[e].genome == genome)
            .map(|&e| (self.nodes[self.edges[e].other(idx)], e))
            .collect();
        out.sort_unstable();
        out
    }

    /// The set of infinity nodes.
    pub fn chromosome_ends(&self) -> Vec<Node> {
        self.index
            .keys()
            .copied()
            .filter(Node::is_infinity)
            .collect()
    }

    /// Half-breakpoint states observed at `node`: for every non-target
    /// genome, the partner this genome connects `node` to (`None` when the
    /// genome has no adjacency here).
    pub fn states_at(&self, node: usize) -> BTreeMap<&str, Option<i64>> {
        let mut states: BTreeMap<&str, Option<i64>> = BTreeMap::new();
        for (idx, name) in self.genomes.iter().enumerate() {
            if !self.is_target_color(idx as u16) {
                states.insert(name.as_str(), None);
            }
        }
        for &e in &self.adjacency[node] {
            let edge = &self.edges[e];
            if self.is_target_color(edge.genome) {
                continue;
            }
            let partner = self.nodes[edge.other(node)].state_id();
            let entry = states
                .get_mut(self.genomes[edge.genome as usize].as_str())
                .expect("genome registered");
            // Sorted adjacency is not guaranteed here; keep the smallest
            // partner for determinism should a repeat slip through.
            match entry {
                Some(existing) if *existing <= partner => {}
                _ => *entry = Some(partner),
            }
        }
        states
    }

    /// Reference-colored edges directly connecting `u` and `v`, as
    /// `(genome name, gap)` pairs sorted by genome.
    pub fn direct_ref_gaps(&self, u: usize, v: usize) -> Vec<(&str, i64)> {
        let mut out: Vec<(&str, i64)> = self.adjacency[u]
            .iter()
            .filter_map(|&e| {
                let edge = &self.edges[e];
                if self.is_target_color(edge.genome) {
                    return None;
                }
                if (edge.u == u && edge.v == v) || (edge.u == v && edge.v == u) {
                    Some((self.genome_name(edge.genome), edge.gap))
                } else {
                    None
                }
            })
            .collect();
        out.sort_unstable();
        out
    }

    /// Target endpoints still missing a target adjacency to a regular node:
    /// the outer ends of every target contig. Sorted by node.
    pub fn unmatched_target_nodes(&self) -> Vec<usize> {
        let mut touched: BTreeSet<usize> = BTreeSet::new();
        let mut matched: BTreeSet<usize> = BTreeSet::new();
        for edge in &self.edges {
            if !self.is_target_color(edge.genome) {
                continue;
            }
            let u_inf = self.nodes[edge.u].is_infinity();
            let v_inf = self.nodes[edge.v].is_infinity();
            if !u_inf {
                touched.insert(edge.u);
            }
            if !v_inf {
                touched.insert(edge.v);
            }
            if !u_inf && !v_inf {
                matched.insert(edge.u);
                matched.insert(edge.v);
            }
        }
        let mut out: Vec<usize> = touched.difference(&matched).copied().collect();
        out.sort_by_key(|&idx| self.nodes[idx]);
        out
    }

    fn edge_is_non_target(&self, edge: &Edge) -> bool {
        !self.is_target_color(edge.genome)
    }

    /// Connected components of the graph restricted to non-target edges,
    /// in deterministic (smallest-node-first) order. Nodes with no
    /// non-target edge form singleton components.
    pub fn components_non_target(&self) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.nodes.len()];
        let mut components = Vec::new();
        for start in self.node_indices() {
            if seen[start] {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = vec![start];
            seen[start] = true;
            while let Some(node) = queue.pop() {
                component.push(node);
                for &e in &self.adjacency[node] {
                    let edge = &self.edges[e];
                    if !self.edge_is_non_target(edge) {
                        continue;
                    }
                    let other = edge.other(node);
                    if !seen[other] {
                        seen[other] = true;
                        queue.push(other);
                    }
                }
            }
            component.sort_by_key(|&idx| self.nodes[idx]);
            components.push(component);
        }
        components
    }

    /// Component id per node under the non-target restriction.
    pub fn component_map_non_target(&self) -> BTreeMap<Node, usize> {
        let mut map = BTreeMap::new();
        for (id, component) in self.components_non_target().iter().enumerate() {
            for &node in component {
                map.insert(self.nodes[node], id);
            }
        }
        map
    }

    /// Component id per node under the non-target restriction, with the two
    /// endpoints of every block treated as linked. This is the connectivity
    /// the chimera detector asks about: two endpoints land in the same
    /// component exactly when some chain of reference adjacencies and block
    /// interiors connects them, i.e. when they co-occur in reference
    /// chromosome context at this scale.
    pub fn component_map_with_block_links(&self) -> BTreeMap<Node, usize> {
        let mut map: BTreeMap<Node, usize> = BTreeMap::new();
        let mut next_id = 0usize;
        for start in self.node_indices() {
            if map.contains_key(&self.nodes[start]) {
                continue;
            }
            let mut queue = vec![start];
            map.insert(self.nodes[start], next_id);
            while let Some(node) = queue.pop() {
                let mut push = |idx: usize, map: &mut BTreeMap<Node, usize>, queue: &mut Vec<usize>| {
                    if map.insert(self.nodes[idx], next_id).is_none() {
                        queue.push(idx);
                    }
                };
                for &e in &self.adjacency[node] {
                    let edge = &self.edges[e];
                    if !self.edge_is_non_target(edge) {
                        continue;
                    }
                    push(edge.other(node), &mut map, &mut queue);
                }
                if let Node::End(id) = self.nodes[node] {
                    if let Some(partner) = self.node_index(Node::End(-id)) {
                        push(partner, &mut map, &mut queue);
                    }
                }
            }
            next_id += 1;
        }
        map
    }

    /// Shrink the matching search space by contracting blocks the target
    /// does not constrain: a block whose endpoints carry no target edge and
    /// exactly one edge per incident color on each side is a pure
    /// pass-through for every reference path. Each such chain becomes one
    /// edge per color with summed gaps. The compressed graph is used for
    /// component decomposition only.
    pub fn compress_paths(&self) -> BreakpointGraph {
        let contracted: Vec<bool> = (0..self.nodes.len())
            .map(|idx| self.is_pass_through(idx))
            .collect();

        let mut out = BreakpointGraph {
            genomes: self.genomes.clone(),
            target_genomes: self.target_genomes.clone(),
            sequences: self.sequences.clone(),
            infinity_count: self.infinity_count,
            ..Default::default()
        };

        let mut consumed = vec![false; self.edges.len()];
        for anchor in self.node_indices() {
            if contracted[anchor] {
                continue;
            }
            out.ensure_node(self.nodes[anchor]);
            for &e in self.adjacency[anchor].iter() {
                if consumed[e] {
                    continue;
                }
                let edge = self.edges[e];
                let next = edge.other(anchor);
                if !contracted[next] {
                    // Copy plain anchor-anchor edges once, from either side.
                    consumed[e] = true;
                    out.add_edge(
                        self.nodes[edge.u],
                        self.nodes[edge.v],
                        edge.genome,
                        edge.sequence,
                        edge.gap,
                    );
                    continue;
                }
                let (end, gap) = self.walk_through(anchor, e, &contracted, &mut consumed);
                out.add_edge(
                    self.nodes[anchor],
                    self.nodes[end],
                    edge.genome,
                    edge.sequence,
                    gap,
                );
            }
        }
        debug!(
            target: "bpgraph",
            before = self.nodes.len(),
            after = out.nodes.len(),
            "paths compressed"
        );
        out
    }

    /// A node passes reference paths straight through when its block also
    /// does: no target edge on either endpoint of the block, and each color
    /// incident to either endpoint has exactly one edge on both.
    fn is_pass_through(&self, idx: usize) -> bool {
        let Node::End(id) = self.nodes[idx] else {
            return false;
        };
        let Some(partner) = self.node_index(Node::End(-id)) else {
            return false;
        };
        let mut colors: BTreeSet<u16> = BTreeSet::new();
        for &side in &[idx, partner] {
            for &e in &self.adjacency[side] {
                if self.is_target_color(self.edges[e].genome) {
                    return false;
                }
                colors.insert(self.edges[e].genome);
            }
        }
        colors.iter().all(|&color| {
            [idx, partner].iter().all(|&side| {
                self.adjacency[side]
                    .iter()
                    .filter(|&&e| self.edges[e].genome == color)
                    .count()
                    == 1
            })
        })
    }

    /// Follow one color from an anchor through a chain of contracted blocks
    /// (edge, implicit tail-head hop, edge, ...) until the next anchor.
    fn walk_through(
        &self,
        anchor: usize,
        first_edge: usize,
        contracted: &[bool],
        consumed: &mut [bool],
    ) -> (usize, i64) {
        let color = self.edges[first_edge].genome;
        let mut gap = self.edges[first_edge].gap;
        consumed[first_edge] = true;
        let mut cur = self.edges[first_edge].other(anchor);
        while contracted[cur] {
            let Node::End(id) = self.nodes[cur] else {
                unreachable!("contracted nodes are block endpoints");
            };
            let partner = self
                .node_index(Node::End(-id))
                .expect("pass-through blocks have both endpoints");
            let &next_edge = self.adjacency[partner]
                .iter()
                .find(|&&e| self.edges[e].genome == color && !consumed[e])
                .expect("pass-through endpoints have one edge per color");
            gap += self.edges[next_edge].gap;
            consumed[next_edge] = true;
            cur = self.edges[next_edge].other(partner);
        }
        (cur, gap)
    }
}
