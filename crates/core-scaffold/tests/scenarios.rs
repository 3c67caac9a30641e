//! End-to-end scenarios over the core pipeline pieces: permutations file in,
//! scaffolds out, no external tools involved.

use core_chimera::ChimeraDetector;
use core_graph::BreakpointGraph;
use core_infer::AdjacencyInferer;
use core_perm::{parse_permutations_str, Filters, PermutationContainer};
use core_phylo::Phylogeny;
use core_scaffold::{
    build_scaffolds, merge_scaffolds, parse_links, write_links, Scaffold,
};

const REFS: [&str; 2] = ["rf1", "rf2"];
const TARGET: &str = "tgt";

fn container(perm_text: &str) -> PermutationContainer {
    let perms = parse_permutations_str(perm_text).unwrap();
    PermutationContainer::from_permutations(
        perms,
        &REFS.map(String::from),
        &[TARGET.to_string()],
        Filters {
            min_genomes: 2,
            resolve_repeats: false,
            merge_collinear: false,
        },
    )
    .unwrap()
}

fn tree() -> Phylogeny {
    Phylogeny::from_newick("((rf1:1,rf2:1):1,tgt:1);").unwrap()
}

fn scaffold_pipeline(container: &PermutationContainer) -> Vec<Scaffold> {
    let graph = BreakpointGraph::build(container);
    let phylogeny = tree();
    let adjacencies = AdjacencyInferer::new(&graph, &phylogeny, TARGET).infer_adjacencies();
    build_scaffolds(&adjacencies, container, &phylogeny, TARGET)
}

fn coords(genome: &str, sequence: &str, blocks: &[(u64, u64, u64, bool)]) -> String {
    blocks
        .iter()
        .map(|(id, start, end, fw)| {
            format!(
                "{id} {genome} {sequence} {start} {end} {}\n",
                if *fw { '+' } else { '-' }
            )
        })
        .collect()
}

/// One reference equals the target exactly: a single scaffold reproducing
/// the target, no joins, no breaks.
#[test]
fn trivial_identity() {
    let mut text = String::new();
    for genome in ["rf1", "rf2"] {
        text.push_str(&format!(">{genome}.chr1\n+1 +2 +3 $\n"));
        text.push_str(&coords(
            genome,
            "chr1",
            &[(1, 0, 900, true), (2, 1000, 1900, true), (3, 2000, 2900, true)],
        ));
    }
    text.push_str(">tgt.ctg1\n+1 +2 +3 $\n");
    text.push_str(&coords(
        "tgt",
        "ctg1",
        &[(1, 0, 900, true), (2, 1000, 1900, true), (3, 2000, 2900, true)],
    ));

    let container = container(&text);
    let scaffolds = scaffold_pipeline(&container);
    assert_eq!(scaffolds.len(), 1);
    assert_eq!(scaffolds[0].contigs.len(), 1);
    assert_eq!(scaffolds[0].contigs[0].contig.label(), "ctg1");
    assert!(scaffolds[0].contigs[0].forward);

    // Zero phylogenetic cost for the observed states.
    let graph = BreakpointGraph::build(&container);
    let phylogeny = tree();
    let node = graph.node_index(core_graph::Node::End(1)).unwrap();
    let mut states = graph.states_at(node);
    states.insert(TARGET, Some(-2));
    assert_eq!(phylogeny.score_leaf_states(&states), 0.0);
}

/// Both references keep two chromosomes apart; the target glues them. The
/// detector splits the contig and the final output has two scaffolds.
#[test]
fn chimeric_contig_is_split_end_to_end() {
    let mut text = String::new();
    for genome in ["rf1", "rf2"] {
        text.push_str(&format!(">{genome}.chrA\n+1 +2 +3 $\n"));
        text.push_str(&coords(
            genome,
            "chrA",
            &[(1, 0, 900, true), (2, 1000, 1900, true), (3, 2000, 2900, true)],
        ));
        text.push_str(&format!(">{genome}.chrB\n+4 +5 +6 $\n"));
        text.push_str(&coords(
            genome,
            "chrB",
            &[(4, 0, 900, true), (5, 1000, 1900, true), (6, 2000, 2900, true)],
        ));
    }
    text.push_str(">tgt.ctg1\n+1 +2 +3 +4 +5 +6 $\n");
    text.push_str(&coords(
        "tgt",
        "ctg1",
        &[
            (1, 0, 900, true),
            (2, 1000, 1900, true),
            (3, 2000, 2900, true),
            (4, 3000, 3900, true),
            (5, 4000, 4900, true),
            (6, 5000, 5900, true),
        ],
    ));

    let stage = container(&text);
    let detector = ChimeraDetector::from_containers(&[("5000".to_string(), &stage)]);
    let fixed = detector.break_contigs(&stage, &["5000".to_string()]);
    assert_eq!(fixed.target_perms.len(), 2);

    let scaffolds = scaffold_pipeline(&fixed);
    assert_eq!(scaffolds.len(), 2);
    let labels: Vec<String> = scaffolds
        .iter()
        .flat_map(|s| s.contigs.iter().map(|p| p.contig.label()))
        .collect();
    assert_eq!(labels, vec!["ctg1[0:3000]", "ctg1[3000:5900]"]);
}

/// A small contig only visible at the fine scale is inserted between its
/// coarse-scale flanks during the merge.
#[test]
fn multi_scale_merge_inserts_the_small_contig() {
    // Coarse scale: block 9 does not exist.
    let mut coarse = String::new();
    for genome in ["rf1", "rf2"] {
        coarse.push_str(&format!(">{genome}.chr1\n+1 +2 $\n"));
        coarse.push_str(&coords(
            genome,
            "chr1",
            &[(1, 0, 9000, true), (2, 20000, 29000, true)],
        ));
    }
    coarse.push_str(">tgt.c1\n+1 $\n");
    coarse.push_str(&coords("tgt", "c1", &[(1, 0, 9000, true)]));
    coarse.push_str(">tgt.c2\n+2 $\n");
    coarse.push_str(&coords("tgt", "c2", &[(2, 0, 9000, true)]));

    // Fine scale: block 9 sits between 1 and 2, carried by contig c3.
    let mut fine = String::new();
    for genome in ["rf1", "rf2"] {
        fine.push_str(&format!(">{genome}.chr1\n+1 +9 +2 $\n"));
        fine.push_str(&coords(
            genome,
            "chr1",
            &[
                (1, 0, 9000, true),
                (9, 10000, 18000, true),
                (2, 20000, 29000, true),
            ],
        ));
    }
    fine.push_str(">tgt.c1\n+1 $\n");
    fine.push_str(&coords("tgt", "c1", &[(1, 0, 9000, true)]));
    fine.push_str(">tgt.c2\n+2 $\n");
    fine.push_str(&coords("tgt", "c2", &[(2, 0, 9000, true)]));
    fine.push_str(">tgt.c3\n+9 $\n");
    fine.push_str(&coords("tgt", "c3", &[(9, 0, 8000, true)]));

    let coarse = container(&coarse);
    let fine = container(&fine);

    let accumulator = scaffold_pipeline(&coarse);
    assert_eq!(accumulator.len(), 1);
    assert_eq!(accumulator[0].contigs.len(), 2);

    let fresh = scaffold_pipeline(&fine);
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].contigs.len(), 3);

    let merged = merge_scaffolds(&accumulator, &fresh, &fine, true);
    assert_eq!(merged.len(), 1);
    let labels: Vec<String> = merged[0]
        .contigs
        .iter()
        .map(|p| p.contig.label())
        .collect();
    assert_eq!(labels, vec!["c1", "c3", "c2"]);
    // Gaps interpolate from the fine-scale reference coordinates.
    assert_eq!(merged[0].contigs[0].gap_after, 1000);
    assert_eq!(merged[0].contigs[1].gap_after, 2000);
}

/// Byte-identical output across shuffled input orders.
#[test]
fn shuffled_input_is_byte_deterministic() {
    let forward = "\
>rf1.chr1
+1 +2 $
>rf2.chr1
+1 +3 $
>rf1.chr2
+3 $
>rf2.chr2
+2 $
>tgt.ctg1
+1 $
>tgt.ctg2
+2 $
>tgt.ctg3
+3 $
1 rf1 chr1 0 900 +
2 rf1 chr1 1000 1900 +
1 rf2 chr1 0 900 +
3 rf2 chr1 1000 1900 +
3 rf1 chr2 0 900 +
2 rf2 chr2 0 900 +
1 tgt ctg1 0 900 +
2 tgt ctg2 0 900 +
3 tgt ctg3 0 900 +
";
    // Same stanzas, different file order.
    let shuffled = "\
>tgt.ctg3
+3 $
>rf2.chr2
+2 $
>rf1.chr1
+1 +2 $
>tgt.ctg1
+1 $
>rf2.chr1
+1 +3 $
>rf1.chr2
+3 $
>tgt.ctg2
+2 $
3 tgt ctg3 0 900 +
2 rf2 chr2 0 900 +
1 rf1 chr1 0 900 +
2 rf1 chr1 1000 1900 +
1 tgt ctg1 0 900 +
1 rf2 chr1 0 900 +
3 rf2 chr1 1000 1900 +
3 rf1 chr2 0 900 +
2 tgt ctg2 0 900 +
";
    let first = write_links(&scaffold_pipeline(&container(forward)));
    let second = write_links(&scaffold_pipeline(&container(shuffled)));
    assert_eq!(first, second);
    // And the written order re-parses to the same scaffolds.
    assert_eq!(
        parse_links(&first).unwrap(),
        scaffold_pipeline(&container(forward))
    );
}
