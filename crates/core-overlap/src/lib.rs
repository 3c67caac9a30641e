//! Contig-overlap refinement from the external overlap graph.
//!
//! The overlap tool emits a DOT digraph whose nodes are contig orientations
//! (`"+ctg1"`, `"-ctg2"`) and whose edges carry the overlap length between
//! the suffix of one contig and the prefix of the next. Where a simple path
//! of unplaced contigs connects two scaffold neighbors and its walked length
//! agrees with the estimated gap, the path is spliced into the gap with
//! negative (overlap) gaps.

use core_scaffold::{Placed, Scaffold};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum OverlapError {
    #[error("overlap graph, line {line}: {what}")]
    Malformed { line: usize, what: String },
}

/// Hop limit for the path search between scaffold neighbors.
const MAX_PATH_HOPS: usize = 8;
/// Absolute slack allowed between walked path length and the estimated gap.
const GAP_TOLERANCE_BP: i64 = 500;

/// A signed contig orientation, the node of the overlap digraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Oriented<'a> {
    name: &'a str,
    forward: bool,
}

impl<'a> Oriented<'a> {
    fn parse(raw: &'a str) -> Option<Self> {
        let (sign, name) = raw.split_at_checked(1)?;
        match sign {
            "+" => Some(Self { name, forward: true }),
            "-" => Some(Self {
                name,
                forward: false,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct OverlapGraph {
    /// `"+ctg"` -> sorted `(successor, overlap bp)` pairs.
    edges: BTreeMap<String, Vec<(String, u64)>>,
    /// Contig name -> sequence length, taken from the emitted node lengths.
    lengths: BTreeMap<String, u64>,
}

impl OverlapGraph {
    /// Parse the DOT emitted by the overlap tool. Only edge statements are
    /// meaningful; everything else (graph header, node styling) is skipped.
    pub fn from_dot(text: &str, contig_lengths: &BTreeMap<String, u64>) -> Result<Self, OverlapError> {
        let edge_re = Regex::new(
            r#""([^"]+)"\s*->\s*"([^"]+)"\s*\[\s*label\s*=\s*"?(\d+)"?\s*\]"#,
        )
        .expect("the edge pattern is valid");
        let mut graph = Self {
            edges: BTreeMap::new(),
            lengths: contig_lengths.clone(),
        };
        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if !line.contains("->") {
                continue;
            }
            let captures = edge_re
                .captures(line)
                .ok_or_else(|| OverlapError::Malformed {
                    line: number + 1,
                    what: format!("unparseable edge \"{line}\""),
                })?;
            let from = captures.get(1).expect("group 1").as_str();
            let to = captures.get(2).expect("group 2").as_str();
            let overlap: u64 = captures
                .get(3)
                .expect("group 3")
                .as_str()
                .parse()
                .map_err(|_| OverlapError::Malformed {
                    line: number + 1,
                    what: "bad overlap length".to_string(),
                })?;
            for node in [from, to] {
                if Oriented::parse(node).is_none() {
                    return Err(OverlapError::Malformed {
                        line: number + 1,
                        what: format!("node \"{node}\" is not a signed contig"),
                    });
                }
            }
            graph
                .edges
                .entry(from.to_string())
                .or_default()
                .push((to.to_string(), overlap));
        }
        for successors in graph.edges.values_mut() {
            successors.sort();
        }
        info!(
            target: "overlap",
            edges = graph.edges.values().map(Vec::len).sum::<usize>(),
            "overlap graph parsed"
        );
        Ok(graph)
    }

    fn successors(&self, node: &str) -> &[(String, u64)] {
        self.edges.get(node).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn node_name(placed: &Placed) -> Option<String> {
    // Overlaps are defined on raw contigs; fragments of broken contigs have
    // no node in the graph.
    if placed.contig.fragment {
        return None;
    }
    let sign = if placed.forward { '+' } else { '-' };
    Some(format!("{sign}{}", placed.contig.sequence))
}

struct PathSearch<'a, 'b> {
    graph: &'b OverlapGraph,
    excluded: &'b BTreeSet<&'a str>,
    goal: String,
    budget: i64,
}

impl PathSearch<'_, '_> {
    /// Depth-first search for the first simple path of *intermediate*
    /// contigs whose walked length matches the budget within tolerance.
    /// Returns the path as `(node, gap into that contig)` plus the gap into
    /// the goal contig. Successors are sorted, so the first hit is
    /// deterministic.
    fn run(&self, from: &str) -> Option<(Vec<(String, i64)>, i64)> {
        let mut path: Vec<(String, i64)> = Vec::new();
        let closing = self.step(from, 0, &mut path)?;
        Some((path, closing))
    }

    fn step(&self, node: &str, walked: i64, path: &mut Vec<(String, i64)>) -> Option<i64> {
        if path.len() > MAX_PATH_HOPS {
            return None;
        }
        for (next, overlap) in self.graph.successors(node) {
            if *next == self.goal {
                let length = walked - (*overlap as i64);
                if !path.is_empty() && (length - self.budget).abs() <= GAP_TOLERANCE_BP {
                    return Some(-(*overlap as i64));
                }
                continue;
            }
            let Some(oriented) = Oriented::parse(next) else {
                continue;
            };
            if self.excluded.contains(oriented.name)
                || path.iter().any(|(taken, _)| {
                    Oriented::parse(taken).is_some_and(|t| t.name == oriented.name)
                })
            {
                continue;
            }
            let Some(&len) = self.graph.lengths.get(oriented.name) else {
                continue;
            };
            path.push((next.clone(), -(*overlap as i64)));
            let advanced = walked + (len as i64) - (*overlap as i64);
            if let Some(closing) = self.step(next, advanced, path) {
                return Some(closing);
            }
            path.pop();
        }
        None
    }
}

/// Splice overlap paths into scaffold gaps where the walked length agrees
/// with the estimated gap.
pub fn refine_with_overlaps(scaffolds: &[Scaffold], graph: &OverlapGraph) -> Vec<Scaffold> {
    let mut placed_names: BTreeSet<&str> = scaffolds
        .iter()
        .flat_map(|s| s.contigs.iter().map(|p| p.contig.sequence.as_str()))
        .collect();

    let mut spliced_total = 0usize;
    let mut out = Vec::with_capacity(scaffolds.len());
    for scaffold in scaffolds {
        let mut items: Vec<Placed> = Vec::new();
        for (pos, placed) in scaffold.contigs.iter().enumerate() {
            items.push(placed.clone());
            let Some(next) = scaffold.contigs.get(pos + 1) else {
                continue;
            };
            let (Some(from), Some(goal)) = (node_name(placed), node_name(next)) else {
                continue;
            };
            let result = PathSearch {
                graph,
                excluded: &placed_names,
                goal,
                budget: placed.gap_after,
            }
            .run(&from);
            let Some((path, closing_gap)) = result else {
                continue;
            };
            // The gap out of the left contig becomes the first overlap.
            items
                .last_mut()
                .expect("the left contig was just pushed")
                .gap_after = path[0].1;
            for (pos_in_path, (node, _)) in path.iter().enumerate() {
                let oriented = Oriented::parse(node).expect("search emits signed nodes");
                let len = graph.lengths[oriented.name];
                let gap_after = path
                    .get(pos_in_path + 1)
                    .map(|(_, gap)| *gap)
                    .unwrap_or(closing_gap);
                items.push(Placed {
                    contig: core_scaffold::ContigRef {
                        sequence: oriented.name.to_string(),
                        start: 0,
                        end: len,
                        fragment: false,
                    },
                    forward: oriented.forward,
                    gap_after,
                });
                spliced_total += 1;
            }
            // Mark the spliced contigs as placed for later gaps.
            for (node, _) in &path {
                if let Some(oriented) = Oriented::parse(node) {
                    if let Some((name, _)) = graph.lengths.get_key_value(oriented.name) {
                        placed_names.insert(name.as_str());
                    }
                }
            }
        }
        out.push(Scaffold {
            name: scaffold.name.clone(),
            contigs: items,
        });
    }
    if spliced_total > 0 {
        info!(target: "overlap", spliced = spliced_total, "contigs spliced from the overlap graph");
    } else {
        debug!(target: "overlap", "no overlap paths matched scaffold gaps");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_scaffold::ContigRef;

    fn placed(name: &str, len: u64, forward: bool, gap: i64) -> Placed {
        Placed {
            contig: ContigRef {
                sequence: name.to_string(),
                start: 0,
                end: len,
                fragment: false,
            },
            forward,
            gap_after: gap,
        }
    }

    fn lengths(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs
            .iter()
            .map(|(name, len)| (name.to_string(), *len))
            .collect()
    }

    const DOT: &str = r#"
digraph {
"+A" -> "+M" [label = "40"];
"+M" -> "+B" [label = "35"];
"+A" -> "+Z" [label = "33"];
}
"#;

    #[test]
    fn dot_edges_parse() {
        let graph = OverlapGraph::from_dot(DOT, &lengths(&[("A", 1000), ("M", 500), ("B", 800), ("Z", 100)])).unwrap();
        assert_eq!(graph.successors("+A").len(), 2);
        assert_eq!(graph.successors("+M"), &[("+B".to_string(), 35)]);
    }

    #[test]
    fn bad_edge_is_malformed() {
        let err = OverlapGraph::from_dot("\"+A\" -> B [label=x];\n", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, OverlapError::Malformed { .. }));
    }

    #[test]
    fn matching_path_is_spliced_into_the_gap() {
        let graph = OverlapGraph::from_dot(
            DOT,
            &lengths(&[("A", 1000), ("M", 500), ("B", 800), ("Z", 100)]),
        )
        .unwrap();
        // Walked length: 500 (M) - 40 - 35 = 425; gap estimate 400 is
        // within tolerance.
        let scaffolds = vec![Scaffold {
            name: "s1".to_string(),
            contigs: vec![placed("A", 1000, true, 400), placed("B", 800, true, 0)],
        }];
        let refined = refine_with_overlaps(&scaffolds, &graph);
        let labels: Vec<String> = refined[0]
            .contigs
            .iter()
            .map(|p| p.contig.label())
            .collect();
        assert_eq!(labels, vec!["A", "M", "B"]);
        // Overlap junctions become negative gaps.
        assert_eq!(refined[0].contigs[0].gap_after, -40);
    }

    #[test]
    fn mismatched_length_leaves_the_gap() {
        let graph = OverlapGraph::from_dot(
            DOT,
            &lengths(&[("A", 1000), ("M", 500), ("B", 800), ("Z", 100)]),
        )
        .unwrap();
        let scaffolds = vec![Scaffold {
            name: "s1".to_string(),
            contigs: vec![placed("A", 1000, true, 5000), placed("B", 800, true, 0)],
        }];
        let refined = refine_with_overlaps(&scaffolds, &graph);
        assert_eq!(refined[0].contigs.len(), 2);
    }
}
