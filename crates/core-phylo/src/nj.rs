//! Phylogeny inference from synteny structure.
//!
//! When the recipe carries no tree, one is inferred from the smallest-scale
//! permutation container: pairwise Jaccard distances over per-genome block
//! sets, then plain neighbor-joining. Negative NJ branch estimates are
//! clamped to a small positive epsilon so the weighted parsimony stays
//! well-defined.

use crate::{Phylogeny, PhylogenyError, TreeNode};
use core_perm::PermutationContainer;
use tracing::info;

const MIN_BRANCH: f64 = 1e-7;

/// Infer a phylogeny from block sharing in `container`.
pub fn infer_from_container(
    container: &PermutationContainer,
) -> Result<Phylogeny, PhylogenyError> {
    let by_genome = container.blocks_by_genome();
    let genomes: Vec<String> = by_genome.keys().cloned().collect();
    if genomes.len() < 2 {
        return Err(PhylogenyError::TooFewGenomes);
    }

    let n = genomes.len();
    let mut dist = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let a = &by_genome[&genomes[i]];
            let b = &by_genome[&genomes[j]];
            let inter = a.intersection(b).count() as f64;
            let union = a.union(b).count() as f64;
            let d = if union == 0.0 { 1.0 } else { 1.0 - inter / union };
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    let tree = neighbor_joining(&genomes, dist)?;
    info!(target: "phylogeny", tree = tree.newick(), "phylogeny inferred from synteny blocks");
    Ok(tree)
}

fn neighbor_joining(
    genomes: &[String],
    mut d: Vec<Vec<f64>>,
) -> Result<Phylogeny, PhylogenyError> {
    let mut nodes: Vec<TreeNode> = genomes
        .iter()
        .map(|genome| TreeNode {
            parent: None,
            branch: f64::NAN,
            children: Vec::new(),
            label: Some(genome.clone()),
        })
        .collect();
    // `active[k]` is the arena index behind row/column k of `d`.
    let mut active: Vec<usize> = (0..genomes.len()).collect();

    while active.len() > 2 {
        let m = active.len();
        let row_sums: Vec<f64> = (0..m).map(|i| d[i].iter().sum()).collect();

        let mut best = (f64::INFINITY, 0usize, 1usize);
        for i in 0..m {
            for j in (i + 1)..m {
                let q = (m as f64 - 2.0) * d[i][j] - row_sums[i] - row_sums[j];
                // Strict `<` keeps the smallest (i, j) on ties.
                if q < best.0 {
                    best = (q, i, j);
                }
            }
        }
        let (_, i, j) = best;
        let dij = d[i][j];
        let li = (dij / 2.0 + (row_sums[i] - row_sums[j]) / (2.0 * (m as f64 - 2.0)))
            .max(MIN_BRANCH);
        let lj = (dij - li).max(MIN_BRANCH);

        let joined = nodes.len();
        nodes[active[i]].parent = Some(joined);
        nodes[active[i]].branch = li;
        nodes[active[j]].parent = Some(joined);
        nodes[active[j]].branch = lj;
        nodes.push(TreeNode {
            parent: None,
            branch: f64::NAN,
            children: vec![active[i], active[j]],
            label: None,
        });

        let keep: Vec<usize> = (0..m).filter(|&k| k != i && k != j).collect();
        let mut next = vec![vec![0.0f64; keep.len() + 1]; keep.len() + 1];
        for (a, &ka) in keep.iter().enumerate() {
            for (b, &kb) in keep.iter().enumerate() {
                next[a][b] = d[ka][kb];
            }
            let to_joined = ((d[i][ka] + d[j][ka] - dij) / 2.0).max(0.0);
            next[a][keep.len()] = to_joined;
            next[keep.len()][a] = to_joined;
        }
        active = keep.iter().map(|&k| active[k]).collect();
        active.push(joined);
        d = next;
    }

    let root = nodes.len();
    let half = (d[0][1] / 2.0).max(MIN_BRANCH);
    for &idx in &active {
        nodes[idx].parent = Some(root);
        nodes[idx].branch = half;
    }
    nodes.push(TreeNode {
        parent: None,
        branch: 0.0,
        children: active.clone(),
        label: None,
    });

    let newick = render_newick(&nodes, root);
    Phylogeny::from_arena(nodes, root, newick)
}

fn render_newick(nodes: &[TreeNode], root: usize) -> String {
    fn subtree(nodes: &[TreeNode], idx: usize, out: &mut String) {
        let node = &nodes[idx];
        if node.children.is_empty() {
            out.push_str(node.label.as_deref().unwrap_or(""));
        } else {
            out.push('(');
            for (pos, &child) in node.children.iter().enumerate() {
                if pos > 0 {
                    out.push(',');
                }
                subtree(nodes, child, out);
                out.push(':');
                out.push_str(&format!("{:.6}", nodes[child].branch));
            }
            out.push(')');
        }
    }
    let mut out = String::new();
    subtree(nodes, root, &mut out);
    out.push(';');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_perm::{BlockOcc, Filters, Permutation};

    fn perm(genome: &str, ids: &[i64]) -> Permutation {
        let blocks = ids
            .iter()
            .enumerate()
            .map(|(i, &signed_id)| BlockOcc {
                signed_id,
                start: i as u64 * 100,
                end: i as u64 * 100 + 90,
            })
            .collect::<Vec<_>>();
        let seq_end = blocks.last().map(|b| b.end).unwrap_or(0);
        Permutation {
            genome: genome.to_string(),
            sequence: "chr1".to_string(),
            seq_start: 0,
            seq_end,
            fragment: false,
            blocks,
        }
    }

    #[test]
    fn block_sharing_drives_the_topology() {
        let container = PermutationContainer::from_permutations(
            vec![
                perm("refA", &[1, 2, 3, 4, 5, 6, 7]),
                perm("refB", &[1, 2, 3, 4, 5, 6, 8]),
                perm("tgt", &[1, 2, 9, 10, 11, 12]),
            ],
            &["refA".to_string(), "refB".to_string()],
            &["tgt".to_string()],
            Filters::permissive(),
        )
        .unwrap();
        let tree = infer_from_container(&container).unwrap();
        for genome in ["refA", "refB", "tgt"] {
            assert!(tree.ensure_leaf(genome).is_ok());
        }
        let close = tree.distance("refA", "refB").unwrap();
        let far = tree.distance("refA", "tgt").unwrap();
        assert!(close < far, "close = {close}, far = {far}");
    }

    #[test]
    fn one_genome_is_too_few() {
        let container = PermutationContainer::from_permutations(
            vec![perm("refA", &[1, 2])],
            &["refA".to_string()],
            &["tgt".to_string()],
            Filters::permissive(),
        )
        .unwrap();
        assert!(matches!(
            infer_from_container(&container),
            Err(PhylogenyError::TooFewGenomes)
        ));
    }
}
