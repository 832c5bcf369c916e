//! Shared CFG and dominator analysis.
//!
//! Predecessor/successor lists are derived from block terminators, and
//! dominator trees are computed with the Cooper-Harvey-Kennedy algorithm over
//! a reverse postorder. Consumers are mem2reg (dominance frontiers for phi
//! placement, dominator tree for renaming) and the loop passes (back-edge
//! detection, hoist legality).
//!
//! All analyses here work on block indices, not labels. The analyses are
//! snapshots: any pass that edits the CFG must rebuild them before reuse.

use rustc_hash::{FxHashMap, FxHashSet};
use crate::ir::ir::{BlockId, IrFunction};

/// Sentinel for "no immediate dominator computed" (unreachable blocks).
pub const UNDEF: usize = usize::MAX;

/// Build a map from block label to block index.
pub fn build_label_map(func: &IrFunction) -> FxHashMap<BlockId, usize> {
    func.blocks
        .iter()
        .enumerate()
        .map(|(i, b)| (b.label, i))
        .collect()
}

/// Build predecessor and successor lists from the function's terminators.
/// Both lists are edge-deduplicated: a conditional branch with equal targets
/// contributes a single edge.
pub fn build_cfg(
    func: &IrFunction,
    label_to_idx: &FxHashMap<BlockId, usize>,
) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
    let n = func.blocks.len();
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut succs: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, block) in func.blocks.iter().enumerate() {
        for target in block.terminator.successors() {
            let j = label_to_idx[&target];
            succs[i].push(j);
            preds[j].push(i);
        }
    }

    (preds, succs)
}

/// Reverse postorder over blocks reachable from the entry (index 0).
pub fn reverse_postorder(num_blocks: usize, succs: &[Vec<usize>]) -> Vec<usize> {
    let mut visited = vec![false; num_blocks];
    let mut postorder = Vec::with_capacity(num_blocks);
    dfs_postorder(0, succs, &mut visited, &mut postorder);
    postorder.reverse();
    postorder
}

fn dfs_postorder(
    block: usize,
    succs: &[Vec<usize>],
    visited: &mut [bool],
    postorder: &mut Vec<usize>,
) {
    visited[block] = true;
    for &s in &succs[block] {
        if !visited[s] {
            dfs_postorder(s, succs, visited, postorder);
        }
    }
    postorder.push(block);
}

/// Compute immediate dominators (Cooper-Harvey-Kennedy).
///
/// Returns `idom` indexed by block: `idom[entry] == entry`, and
/// `idom[b] == UNDEF` for blocks unreachable from the entry.
pub fn compute_dominators(
    num_blocks: usize,
    preds: &[Vec<usize>],
    succs: &[Vec<usize>],
) -> Vec<usize> {
    let rpo = reverse_postorder(num_blocks, succs);
    let mut rpo_num = vec![UNDEF; num_blocks];
    for (i, &b) in rpo.iter().enumerate() {
        rpo_num[b] = i;
    }

    let mut idom = vec![UNDEF; num_blocks];
    idom[0] = 0;

    let mut changed = true;
    while changed {
        changed = false;
        for &b in rpo.iter().skip(1) {
            let mut new_idom = UNDEF;
            for &p in &preds[b] {
                if idom[p] == UNDEF {
                    continue;
                }
                new_idom = if new_idom == UNDEF {
                    p
                } else {
                    intersect(p, new_idom, &idom, &rpo_num)
                };
            }
            if new_idom != UNDEF && idom[b] != new_idom {
                idom[b] = new_idom;
                changed = true;
            }
        }
    }

    idom
}

fn intersect(mut a: usize, mut b: usize, idom: &[usize], rpo_num: &[usize]) -> usize {
    while a != b {
        while rpo_num[a] > rpo_num[b] {
            a = idom[a];
        }
        while rpo_num[b] > rpo_num[a] {
            b = idom[b];
        }
    }
    a
}

/// Does block `a` dominate block `b`? Walks `b` up the dominator tree.
/// Unreachable blocks dominate nothing and are dominated by nothing (except
/// themselves).
pub fn dominates(a: usize, b: usize, idom: &[usize]) -> bool {
    let mut cur = b;
    loop {
        if cur == a {
            return true;
        }
        let up = idom[cur];
        if up == UNDEF || up == cur {
            return false;
        }
        cur = up;
    }
}

/// Compute dominance frontiers. `df[b]` is the set of blocks where b's
/// dominance ends: joins that b reaches but does not strictly dominate.
pub fn compute_dominance_frontiers(
    num_blocks: usize,
    preds: &[Vec<usize>],
    idom: &[usize],
) -> Vec<FxHashSet<usize>> {
    let mut df: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); num_blocks];

    for b in 0..num_blocks {
        if idom[b] == UNDEF || preds[b].len() < 2 {
            continue;
        }
        for &p in &preds[b] {
            if idom[p] == UNDEF {
                continue;
            }
            let mut runner = p;
            while runner != idom[b] {
                df[runner].insert(b);
                runner = idom[runner];
            }
        }
    }

    df
}

/// Children lists of the dominator tree rooted at the entry block.
pub fn dom_tree_children(num_blocks: usize, idom: &[usize]) -> Vec<Vec<usize>> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); num_blocks];
    for b in 1..num_blocks {
        if idom[b] != UNDEF {
            children[idom[b]].push(b);
        }
    }
    children
}

/// Bundled per-function CFG analysis, built once per pass invocation.
pub struct CfgAnalysis {
    pub num_blocks: usize,
    pub label_to_idx: FxHashMap<BlockId, usize>,
    pub preds: Vec<Vec<usize>>,
    pub succs: Vec<Vec<usize>>,
    pub idom: Vec<usize>,
    pub dom_children: Vec<Vec<usize>>,
}

impl CfgAnalysis {
    pub fn build(func: &IrFunction) -> Self {
        let label_to_idx = build_label_map(func);
        let (preds, succs) = build_cfg(func, &label_to_idx);
        let num_blocks = func.blocks.len();
        let idom = compute_dominators(num_blocks, &preds, &succs);
        let dom_children = dom_tree_children(num_blocks, &idom);
        CfgAnalysis {
            num_blocks,
            label_to_idx,
            preds,
            succs,
            idom,
            dom_children,
        }
    }

    pub fn dominates(&self, a: usize, b: usize) -> bool {
        dominates(a, b, &self.idom)
    }
}
