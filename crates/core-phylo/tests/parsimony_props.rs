//! Property tests for the weighted parsimony scorer.

use core_phylo::{LeafState, Phylogeny};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn star_tree(leaves: usize, length: f64) -> (Phylogeny, Vec<String>) {
    let labels: Vec<String> = (0..leaves).map(|i| format!("L{i}")).collect();
    let newick = format!(
        "({});",
        labels
            .iter()
            .map(|l| format!("{l}:{length}"))
            .collect::<Vec<_>>()
            .join(",")
    );
    (Phylogeny::from_newick(&newick).unwrap(), labels)
}

proptest! {
    // Shrinking the leaf-state set (merging one state into another) never
    // increases the parsimony score.
    #[test]
    fn merging_states_never_raises_the_score(raw in proptest::collection::vec(0u8..4, 3..12)) {
        let (tree, labels) = star_tree(raw.len(), 1.0);
        let states: BTreeMap<&str, LeafState> = labels
            .iter()
            .map(String::as_str)
            .zip(raw.iter().map(|&s| Some(i64::from(s) + 1)))
            .collect();
        let before = tree.score_leaf_states(&states);
        let merged: BTreeMap<&str, LeafState> = states
            .iter()
            .map(|(&leaf, &state)| (leaf, if state == Some(1) { Some(2) } else { state }))
            .collect();
        let after = tree.score_leaf_states(&merged);
        prop_assert!(after <= before + 1e-9, "after = {after}, before = {before}");
    }

    // Star-tree closed form: (k - 1) transitions, each 1 + exp(-mu * l).
    #[test]
    fn star_tree_matches_the_closed_form(
        distinct in 1usize..6,
        length in 0.1f64..10.0,
    ) {
        let (tree, labels) = star_tree(distinct, length);
        let states: BTreeMap<&str, LeafState> = labels
            .iter()
            .enumerate()
            .map(|(i, leaf)| (leaf.as_str(), Some(i as i64 + 1)))
            .collect();
        let score = tree.score_leaf_states(&states);
        let mu = tree.mu();
        let expected = (distinct as f64 - 1.0) * (1.0 + (-mu * length).exp());
        prop_assert!((score - expected).abs() < 1e-6, "score = {score}, expected = {expected}");
    }
}
