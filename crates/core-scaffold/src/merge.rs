//! Merging scaffolds across block-size scales.
//!
//! The accumulator (built from larger blocks) wins on conflicts; a fresh
//! stage only contributes where the accumulator is silent, agrees, or where
//! a chimera break invalidated the accumulator adjacency in question.
//!
//! Both sides are first *aligned* to the stage's all-breaks container: every
//! placed contig is replaced by the container pieces that cover its span, so
//! contig identities on both sides come from the same container and compare
//! exactly. Junctions introduced by this piece-splitting are *weak*: they
//! exist only because the two pieces were once one contig, and a fresh
//! adjacency may override them.

use crate::{ContigRef, Placed, Scaffold};
use core_perm::{Permutation, PermutationContainer};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Longest accumulator sub-path `rearrange` may flip at once.
const MAX_FLIP_SPAN: usize = 8;

#[derive(Debug, Clone)]
pub(crate) struct Chain {
    pub(crate) name: String,
    pub(crate) items: Vec<Placed>,
    /// `weak_after[i]`: the junction between items `i` and `i + 1` came from
    /// piece-splitting a broken contig.
    pub(crate) weak_after: Vec<bool>,
}

impl Chain {
    fn flip(&mut self) {
        let n = self.items.len();
        let mut items: Vec<Placed> = self.items.iter().rev().cloned().collect();
        for (i, item) in items.iter_mut().enumerate() {
            item.forward = !item.forward;
            item.gap_after = if i + 1 < n {
                self.items[n - 2 - i].gap_after
            } else {
                0
            };
        }
        let mut weak: Vec<bool> = vec![false; n];
        for (i, slot) in weak.iter_mut().enumerate() {
            if i + 1 < n {
                *slot = self.weak_after[n - 2 - i];
            }
        }
        self.items = items;
        self.weak_after = weak;
    }

    fn split_after(&mut self, pos: usize) -> Chain {
        let items = self.items.split_off(pos + 1);
        let weak = self.weak_after.split_off(pos + 1);
        self.items[pos].gap_after = 0;
        self.weak_after[pos] = false;
        Chain {
            name: format!("{}_part", self.name),
            items,
            weak_after: weak,
        }
    }
}

/// `contig -> (chain, position, forward)` over all chains.
fn build_index(chains: &[Chain]) -> BTreeMap<ContigRef, (usize, usize, bool)> {
    let mut index = BTreeMap::new();
    for (c, chain) in chains.iter().enumerate() {
        for (p, placed) in chain.items.iter().enumerate() {
            index.insert(placed.contig.clone(), (c, p, placed.forward));
        }
    }
    index
}

fn majority_overlap(piece: &Permutation, contig: &ContigRef) -> bool {
    let lo = piece.seq_start.max(contig.start);
    let hi = piece.seq_end.min(contig.end);
    let overlap = hi.saturating_sub(lo);
    2 * overlap > piece.span_bp()
}

/// Re-express every scaffold in terms of the pieces of `breaks`, marking the
/// piece junctions weak. A contig with no counterpart in `breaks` (filtered
/// at this scale) is kept as-is.
pub(crate) fn align(scaffolds: &[Scaffold], breaks: &PermutationContainer) -> Vec<Chain> {
    let mut by_seq: BTreeMap<&str, Vec<&Permutation>> = BTreeMap::new();
    for perm in &breaks.target_perms {
        by_seq.entry(perm.sequence.as_str()).or_default().push(perm);
    }
    for list in by_seq.values_mut() {
        list.sort_by_key(|p| p.seq_start);
    }

    let mut chains = Vec::with_capacity(scaffolds.len());
    for scaffold in scaffolds {
        let mut items: Vec<Placed> = Vec::new();
        let mut weak_after: Vec<bool> = Vec::new();
        for placed in &scaffold.contigs {
            let mut pieces: Vec<&Permutation> = by_seq
                .get(placed.contig.sequence.as_str())
                .map(|list| {
                    list.iter()
                        .copied()
                        .filter(|p| majority_overlap(p, &placed.contig))
                        .collect()
                })
                .unwrap_or_default();
            if pieces.is_empty() {
                items.push(placed.clone());
                weak_after.push(false);
                continue;
            }
            if !placed.forward {
                pieces.reverse();
            }
            let count = pieces.len();
            for (k, piece) in pieces.into_iter().enumerate() {
                let last = k == count - 1;
                items.push(Placed {
                    contig: ContigRef::of_permutation(piece),
                    forward: placed.forward,
                    gap_after: if last { placed.gap_after } else { 0 },
                });
                weak_after.push(!last);
            }
        }
        if let Some(flag) = weak_after.last_mut() {
            *flag = false;
        }
        chains.push(Chain {
            name: scaffold.name.clone(),
            items,
            weak_after,
        });
    }
    chains
}

/// Flip accumulator sub-paths whose internal order a fresh scaffold shows
/// exactly inverted between the same two flanks.
fn rearrange_chains(chains: &mut [Chain], fresh: &[Chain]) {
    let mut flips = 0usize;
    for fchain in fresh {
        for i in 0..fchain.items.len() {
            'spans: for j in (i + 2)..fchain.items.len().min(i + 2 + MAX_FLIP_SPAN) {
                let index = build_index(chains);
                let Some(&(c_l, p_l, fw_l)) = index.get(&fchain.items[i].contig) else {
                    continue;
                };
                let Some(&(c_r, p_r, fw_r)) = index.get(&fchain.items[j].contig) else {
                    continue;
                };
                if c_l != c_r || p_r != p_l + (j - i) {
                    continue;
                }
                if fw_l != fchain.items[i].forward || fw_r != fchain.items[j].forward {
                    continue;
                }
                // The accumulator segment must be exactly the fresh middle,
                // reversed and strand-flipped.
                let middle = &fchain.items[(i + 1)..j];
                let segment = &chains[c_l].items[(p_l + 1)..p_r];
                for (offset, fresh_item) in middle.iter().enumerate() {
                    let acc_item = &segment[segment.len() - 1 - offset];
                    if acc_item.contig != fresh_item.contig
                        || acc_item.forward == fresh_item.forward
                    {
                        continue 'spans;
                    }
                }
                for (offset, fresh_item) in middle.iter().enumerate() {
                    let slot = &mut chains[c_l].items[p_l + 1 + offset];
                    *slot = fresh_item.clone();
                }
                chains[c_l].items[p_l].gap_after = fchain.items[i].gap_after;
                flips += 1;
            }
        }
    }
    if flips > 0 {
        debug!(target: "merge", flips, "accumulator sub-paths rearranged");
    }
}

/// Insert fresh-only runs whose two flanks are adjacent in the accumulator.
fn insert_new_runs(chains: &mut [Chain], fresh: &[Chain]) -> usize {
    let mut inserted = 0usize;
    for fchain in fresh {
        let mut i = 0usize;
        while i < fchain.items.len() {
            let index = build_index(chains);
            if index.contains_key(&fchain.items[i].contig) {
                i += 1;
                continue;
            }
            // Maximal run of new contigs [run_start, run_end].
            let run_start = i;
            let mut run_end = i;
            while run_end + 1 < fchain.items.len()
                && !index.contains_key(&fchain.items[run_end + 1].contig)
            {
                run_end += 1;
            }
            i = run_end + 1;
            if run_start == 0 || run_end + 1 >= fchain.items.len() {
                continue;
            }
            let left = &fchain.items[run_start - 1];
            let right = &fchain.items[run_end + 1];
            let (Some(&(c_l, p_l, fw_l)), Some(&(c_r, p_r, fw_r))) =
                (index.get(&left.contig), index.get(&right.contig))
            else {
                continue;
            };
            if c_l != c_r {
                continue;
            }
            let run = &fchain.items[run_start..=run_end];
            if p_r == p_l + 1 && fw_l == left.forward && fw_r == right.forward {
                let chain = &mut chains[c_l];
                let mut pos = p_l;
                chain.items[pos].gap_after = left.gap_after;
                for item in run {
                    pos += 1;
                    chain.items.insert(pos, item.clone());
                    chain.weak_after.insert(pos, false);
                }
                inserted += run.len();
            } else if p_l == p_r + 1 && fw_l == !left.forward && fw_r == !right.forward {
                let chain = &mut chains[c_l];
                chain.items[p_r].gap_after = run[run.len() - 1].gap_after;
                let mut pos = p_r;
                for (offset, item) in run.iter().rev().enumerate() {
                    let mut flipped = item.clone();
                    flipped.forward = !flipped.forward;
                    flipped.gap_after = if offset + 1 < run.len() {
                        run[run.len() - 2 - offset].gap_after
                    } else {
                        left.gap_after
                    };
                    pos += 1;
                    chain.items.insert(pos, flipped);
                    chain.weak_after.insert(pos, false);
                }
                inserted += run.len();
            }
        }
    }
    inserted
}

/// Make the chain holding `anchor` end with it, oriented as the fresh stage
/// places it, so something can follow. Flips the chain when needed; splits a
/// weak junction when it is the only thing in the way. Returns the chain.
fn make_outgoing(chains: &mut Vec<Chain>, anchor: &Placed) -> Option<usize> {
    for _attempt in 0..2 {
        let index = build_index(chains);
        let &(c, p, fw) = index.get(&anchor.contig)?;
        let at_end = if fw == anchor.forward {
            p + 1 == chains[c].items.len()
        } else {
            p == 0
        };
        if at_end {
            if fw != anchor.forward {
                chains[c].flip();
            }
            return Some(c);
        }
        let weak_pos = if fw == anchor.forward { p } else { p - 1 };
        if chains[c].weak_after.get(weak_pos) == Some(&true) {
            let tail = chains[c].split_after(weak_pos);
            chains.push(tail);
            continue;
        }
        return None;
    }
    None
}

/// Mirror of [`make_outgoing`]: the chain must start with `anchor`, oriented
/// as the fresh stage places it, so something can precede it.
fn make_incoming(chains: &mut Vec<Chain>, anchor: &Placed) -> Option<usize> {
    for _attempt in 0..2 {
        let index = build_index(chains);
        let &(c, p, fw) = index.get(&anchor.contig)?;
        let at_start = if fw == anchor.forward {
            p == 0
        } else {
            p + 1 == chains[c].items.len()
        };
        if at_start {
            if fw != anchor.forward {
                chains[c].flip();
            }
            return Some(c);
        }
        let weak_pos = if fw == anchor.forward { p - 1 } else { p };
        if chains[c].weak_after.get(weak_pos) == Some(&true) {
            let tail = chains[c].split_after(weak_pos);
            chains.push(tail);
            continue;
        }
        return None;
    }
    None
}

/// Join accumulator chains across fresh adjacencies. A mid-chain contig only
/// participates when the blocking junction is weak (its contig was broken by
/// a chimera cut), in which case the chain splits there first.
fn join_chains(chains: &mut Vec<Chain>, fresh: &[Chain]) -> usize {
    let mut joins = 0usize;
    for fchain in fresh {
        for pair in 0..fchain.items.len().saturating_sub(1) {
            let left = fchain.items[pair].clone();
            let right = fchain.items[pair + 1].clone();
            {
                let index = build_index(chains);
                match (index.get(&left.contig), index.get(&right.contig)) {
                    (Some(&(c_l, ..)), Some(&(c_r, ..))) if c_l != c_r => {}
                    _ => continue,
                }
            }
            let Some(c_l) = make_outgoing(chains, &left) else {
                continue;
            };
            let Some(c_r) = make_incoming(chains, &right) else {
                continue;
            };
            if c_l == c_r {
                continue;
            }
            let mut tail = std::mem::replace(
                &mut chains[c_r],
                Chain {
                    name: String::new(),
                    items: Vec::new(),
                    weak_after: Vec::new(),
                },
            );
            let head = &mut chains[c_l];
            if let Some(last) = head.items.last_mut() {
                last.gap_after = left.gap_after;
            }
            if let Some(flag) = head.weak_after.last_mut() {
                *flag = false;
            }
            head.items.append(&mut tail.items);
            head.weak_after.append(&mut tail.weak_after);
            chains.retain(|chain| !chain.items.is_empty());
            joins += 1;
        }
    }
    joins
}

/// Attach one-sided runs of fresh-only contigs at scaffold edges: appended
/// after a known left flank or prepended before a known right flank.
fn extend_runs(chains: &mut Vec<Chain>, fresh: &[Chain]) -> usize {
    let mut extended = 0usize;
    for fchain in fresh {
        let mut i = 0usize;
        while i < fchain.items.len() {
            let index = build_index(chains);
            if index.contains_key(&fchain.items[i].contig) {
                i += 1;
                continue;
            }
            let run_start = i;
            let mut run_end = i;
            while run_end + 1 < fchain.items.len()
                && !index.contains_key(&fchain.items[run_end + 1].contig)
            {
                run_end += 1;
            }
            i = run_end + 1;
            let has_left = run_start > 0;
            let has_right = run_end + 1 < fchain.items.len();
            if has_left && !has_right {
                let left = fchain.items[run_start - 1].clone();
                let Some(c) = make_outgoing(chains, &left) else {
                    continue;
                };
                let chain = &mut chains[c];
                if let Some(last) = chain.items.last_mut() {
                    last.gap_after = left.gap_after;
                }
                for item in &fchain.items[run_start..=run_end] {
                    chain.items.push(item.clone());
                    chain.weak_after.push(false);
                }
                if let Some(last) = chain.items.last_mut() {
                    last.gap_after = 0;
                }
                extended += run_end - run_start + 1;
            } else if has_right && !has_left {
                let right = fchain.items[run_end + 1].clone();
                let Some(c) = make_incoming(chains, &right) else {
                    continue;
                };
                let chain = &mut chains[c];
                for item in fchain.items[run_start..=run_end].iter().rev() {
                    chain.items.insert(0, item.clone());
                    chain.weak_after.insert(0, false);
                }
                extended += run_end - run_start + 1;
            }
        }
    }
    extended
}

/// Merge `fresh` into `accumulator`, both aligned to the pieces of `breaks`.
pub fn merge_scaffolds(
    accumulator: &[Scaffold],
    fresh: &[Scaffold],
    breaks: &PermutationContainer,
    rearrange: bool,
) -> Vec<Scaffold> {
    let mut chains = align(accumulator, breaks);
    let fresh_chains = align(fresh, breaks);

    if rearrange {
        rearrange_chains(&mut chains, &fresh_chains);
    }
    let inserted = insert_new_runs(&mut chains, &fresh_chains);
    let joins = join_chains(&mut chains, &fresh_chains);
    let extended = extend_runs(&mut chains, &fresh_chains);

    // Fresh scaffolds made purely of contigs the accumulator never saw are
    // carried over whole.
    let index = build_index(&chains);
    let mut out: Vec<Chain> = chains;
    for fchain in &fresh_chains {
        if !fchain.items.is_empty()
            && fchain
                .items
                .iter()
                .all(|item| !index.contains_key(&item.contig))
        {
            out.push(fchain.clone());
        }
    }

    info!(
        target: "merge",
        inserted,
        joins,
        extended,
        scaffolds = out.len(),
        "stage merged into the accumulator"
    );
    out.into_iter()
        .filter(|chain| !chain.items.is_empty())
        .enumerate()
        .map(|(idx, chain)| Scaffold {
            name: if chain.name.is_empty() {
                format!("scaffold_{}", idx + 1)
            } else {
                chain.name
            },
            contigs: chain.items,
        })
        .collect()
}
