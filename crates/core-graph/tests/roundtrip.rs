//! Round-trip law: walking one genome color from a chromosome end
//! reproduces the input permutation, up to reverse-complement when the walk
//! starts at the far end.

use core_graph::{BreakpointGraph, Node};
use core_perm::{BlockOcc, Filters, Permutation, PermutationContainer};

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

/// Follow `genome`-colored edges from an infinity node, alternating graph
/// edges with the implicit tail-head hop inside each block.
fn read_back(graph: &BreakpointGraph, start: Node, genome: &str) -> Vec<i64> {
    let mut blocks = Vec::new();
    let mut node = start;
    loop {
        // Each queried node (an infinity sentinel or a block exit endpoint)
        // has at most one edge of this color: the continuation of the walk.
        let Some((entry, _)) = graph.neighbors(node, genome).into_iter().next() else {
            break;
        };
        match entry {
            Node::Infinity(_) => break,
            Node::End(v) => {
                // `entry` is the entry endpoint of the next block read in
                // walk direction, so the signed block itself is `-v` and its
                // exit endpoint is `End(-v)`.
                blocks.push(-v);
                node = Node::End(-v);
            }
        }
    }
    blocks
}

fn reverse_complement(blocks: &[i64]) -> Vec<i64> {
    blocks.iter().rev().map(|&b| -b).collect()
}

#[test]
fn each_color_reproduces_its_permutations() {
    let inputs = vec![
        perm("rf1", "chr1", &[1, -2, 3, 4]),
        perm("rf1", "chr2", &[5, 6]),
        perm("rf2", "chr1", &[1, 2, -4, 3, 5, 6]),
        perm("tgt", "ctg1", &[1, -2, 3]),
        perm("tgt", "ctg2", &[4, 5, 6]),
    ];
    let container = PermutationContainer::from_permutations(
        inputs.clone(),
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

    for input in &inputs {
        let want = input
            .blocks
            .iter()
            .map(|b| b.signed_id)
            .collect::<Vec<_>>();
        let matches = graph
            .chromosome_ends()
            .into_iter()
            .map(|end| read_back(&graph, end, &input.genome))
            .filter(|got| *got == want || *got == reverse_complement(&want))
            .count();
        // One walk from each extremity of the sequence finds it: once
        // forward, once as the reverse complement.
        assert_eq!(matches, 2, "permutation {want:?} not recovered");
    }
}
