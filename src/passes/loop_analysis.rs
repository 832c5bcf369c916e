//! Natural loop discovery.
//!
//! A back edge is an edge whose target dominates its source. Each back edge
//! `latch -> header` defines a natural loop: the header plus every block that
//! can reach the latch without passing through the header. Upstream loop
//! normalization guarantees one back edge per header; two back edges into the
//! same header violate that precondition and abort the pass.

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

use crate::ir::analysis::{dominates, UNDEF};

/// A natural loop, in block indices.
#[derive(Debug)]
pub struct NaturalLoop {
    pub header: usize,
    /// The single in-loop predecessor of the header.
    pub latch: usize,
    /// All blocks in the loop, header and latch included.
    pub body: FxHashSet<usize>,
}

/// Find every natural loop in the CFG. Loops are returned in header order.
pub fn find_natural_loops(
    num_blocks: usize,
    preds: &[Vec<usize>],
    succs: &[Vec<usize>],
    idom: &[usize],
) -> Vec<NaturalLoop> {
    let mut latches: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
    for b in 0..num_blocks {
        if b != 0 && idom[b] == UNDEF {
            continue;
        }
        for &s in &succs[b] {
            if dominates(s, b, idom) {
                latches.entry(s).or_default().push(b);
            }
        }
    }

    let mut headers: Vec<usize> = latches.keys().copied().collect();
    headers.sort_unstable();

    headers
        .into_iter()
        .map(|header| {
            let edges = &latches[&header];
            assert!(
                edges.len() == 1,
                "loop header {} has {} back edges, expected exactly one",
                header,
                edges.len()
            );
            let latch = edges[0];
            NaturalLoop {
                header,
                latch,
                body: loop_body(header, latch, preds),
            }
        })
        .collect()
}

/// Blocks that reach the latch without passing through the header.
fn loop_body(header: usize, latch: usize, preds: &[Vec<usize>]) -> FxHashSet<usize> {
    let mut body: FxHashSet<usize> = FxHashSet::default();
    body.insert(header);
    body.insert(latch);
    let mut stack = vec![latch];
    while let Some(b) = stack.pop() {
        if b == header {
            continue;
        }
        for &p in &preds[b] {
            if body.insert(p) {
                stack.push(p);
            }
        }
    }
    body
}

/// The loop's preheader: the unique predecessor of the header from outside
/// the body. None if the header has zero or several outside predecessors.
pub fn find_preheader(lp: &NaturalLoop, preds: &[Vec<usize>]) -> Option<usize> {
    let mut outside = preds[lp.header].iter().filter(|p| !lp.body.contains(p));
    match (outside.next(), outside.next()) {
        (Some(&p), None) => Some(p),
        _ => None,
    }
}

/// Blocks inside the loop with at least one successor outside it, sorted.
pub fn exiting_blocks(lp: &NaturalLoop, succs: &[Vec<usize>]) -> Vec<usize> {
    let mut out: Vec<usize> = lp
        .body
        .iter()
        .copied()
        .filter(|&b| succs[b].iter().any(|s| !lp.body.contains(s)))
        .collect();
    out.sort_unstable();
    out
}
