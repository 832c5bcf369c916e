//! Loop-invariant code motion.
//!
//! For each natural loop, instructions whose result cannot change across
//! iterations are moved to the preheader. Invariance is a recursive property:
//! an instruction is invariant when it is defined outside the loop, or when
//! it is a pure operation all of whose operands are invariant. The recursion
//! is memoized per loop, carries the original search root to reject values
//! that feed themselves across iterations, and gives up past a fixed depth.
//!
//! Calls are invariant candidates too, gated by a conservative side-effect
//! scan of the callee: any memory operation, indirect call, unknown callee,
//! or recursion past the depth bound reads as "has side effects".
//!
//! Beyond invariance, a candidate's block must not be the latch, must
//! dominate every loop-exiting block (so the hoisted computation executes
//! exactly when the original would have), and every operand still defined
//! inside the loop must leave in the same hoist. Candidate blocks are
//! visited in dominator-tree order, so definitions are scheduled before
//! their uses and land in the preheader in that order.
//!
//! Invariant header phis (those with an incoming edge from the latch) are not
//! moved: every use is replaced with the incoming value from the non-latch
//! edge and the phi is deleted.

use rustc_hash::{FxHashMap, FxHashSet};

use super::loop_analysis::{self, NaturalLoop};
use crate::ir::analysis::{CfgAnalysis, UNDEF};
use crate::ir::ir::*;

/// Depth bound shared by the invariance and side-effect recursions.
pub const LOOP_INVARIANT_RECURSION_MAX_DEPTH: usize = 32;

/// Run LICM over every defined function. Returns the number of instructions
/// hoisted or resolved.
pub fn run(module: &mut IrModule) -> usize {
    let mut total = 0;
    for idx in 0..module.functions.len() {
        let mut func = std::mem::take(&mut module.functions[idx]);
        if !func.is_declaration && !func.optnone && func.blocks.len() >= 2 {
            total += licm_function(&mut func, module);
        }
        module.functions[idx] = func;
    }
    total
}

/// Run LICM on one function. `module` supplies callee bodies for the
/// side-effect test; the function under transformation is taken out of it,
/// so self-recursive calls read as unknown callees, which is the
/// conservative answer anyway.
pub fn licm_function(func: &mut IrFunction, module: &IrModule) -> usize {
    let cfg = CfgAnalysis::build(func);
    let loops =
        loop_analysis::find_natural_loops(cfg.num_blocks, &cfg.preds, &cfg.succs, &cfg.idom);
    if loops.is_empty() {
        return 0;
    }

    // Innermost first, so inner-loop hoists can become outer-loop candidates.
    let mut loops = loops;
    loops.sort_by_key(|l| l.body.len());

    let mut total = 0;
    for lp in &loops {
        // Hoisting moves instructions but never adds or removes edges, so the
        // CFG analysis stays valid across loops of the same function.
        total += hoist_loop(func, lp, &cfg, module);
    }
    total
}

/// Analysis state for one loop invocation. Built fresh per loop and dropped
/// afterward; invariance facts do not transfer between loops.
struct LoopContext<'a> {
    lp: &'a NaturalLoop,
    /// Defining site of every value in the function.
    defs: FxHashMap<u32, (usize, usize)>,
    /// Values proven invariant for this loop. Only positive results are
    /// cached: a negative result can depend on the search root.
    invariant: FxHashSet<u32>,
    /// Side-effect verdict per callee name.
    callee_safety: FxHashMap<String, bool>,
    module: &'a IrModule,
}

fn hoist_loop(
    func: &mut IrFunction,
    lp: &NaturalLoop,
    cfg: &CfgAnalysis,
    module: &IrModule,
) -> usize {
    let Some(preheader) = loop_analysis::find_preheader(lp, &cfg.preds) else {
        return 0;
    };
    let exiting = loop_analysis::exiting_blocks(lp, &cfg.succs);
    let latch_label = func.blocks[lp.latch].label;

    let mut ctx = LoopContext {
        lp,
        defs: value_defs(func),
        invariant: FxHashSet::default(),
        callee_safety: FxHashMap::default(),
        module,
    };

    // A definition's block dominates every use's block, so walking the body
    // shallowest-first schedules defs before their uses and keeps the
    // preheader in definition order.
    let mut body_blocks: Vec<usize> = lp.body.iter().copied().collect();
    body_blocks.sort_unstable_by_key(|&b| (dom_depth(b, &cfg.idom), b));

    // (block, index) of instructions to move, in scheduling order.
    let mut moves: Vec<(usize, usize)> = Vec::new();
    // Invariant header phis: (block, index, dest, non-latch incoming).
    let mut resolutions: Vec<(usize, usize, Value, Operand)> = Vec::new();
    // Dest values leaving the loop in this hoist, moved or dissolved.
    let mut scheduled: FxHashSet<u32> = FxHashSet::default();

    for &b in &body_blocks {
        if b == lp.latch {
            continue;
        }
        if !exiting.iter().all(|&e| cfg.dominates(b, e)) {
            continue;
        }
        for (i, inst) in func.blocks[b].instructions.iter().enumerate() {
            let Some(dest) = inst.dest() else { continue };
            if !is_invariant(dest, dest, 0, func, &mut ctx) {
                continue;
            }
            if let Instruction::Phi { incoming, .. } = inst {
                if incoming.iter().any(|(_, l)| *l == latch_label) {
                    if let Some((op, _)) = incoming.iter().find(|(_, l)| *l != latch_label) {
                        resolutions.push((b, i, dest, *op));
                        scheduled.insert(dest.0);
                    }
                }
                // An invariant phi without a latch edge keeps its block: its
                // incoming list is tied to that block's predecessors.
            } else {
                // An operand still defined inside the loop must itself be
                // leaving in this hoist, or the moved instruction would read
                // a value the preheader never sees.
                let operands_leave = inst.used_values().into_iter().all(|u| {
                    scheduled.contains(&u.0)
                        || ctx
                            .defs
                            .get(&u.0)
                            .map_or(true, |&(db, _)| !ctx.lp.body.contains(&db))
                });
                if operands_leave {
                    moves.push((b, i));
                    scheduled.insert(dest.0);
                }
            }
        }
    }
    if moves.is_empty() && resolutions.is_empty() {
        return 0;
    }

    let hoisted: Vec<Instruction> = moves
        .iter()
        .map(|&(b, i)| func.blocks[b].instructions[i].clone())
        .collect();

    let mut remove: FxHashMap<usize, FxHashSet<usize>> = FxHashMap::default();
    for &(b, i) in &moves {
        remove.entry(b).or_default().insert(i);
    }
    for &(b, i, _, _) in &resolutions {
        remove.entry(b).or_default().insert(i);
    }
    for (b, indices) in remove {
        let old = std::mem::take(&mut func.blocks[b].instructions);
        func.blocks[b].instructions = old
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !indices.contains(i))
            .map(|(_, inst)| inst)
            .collect();
    }

    func.blocks[preheader].instructions.extend(hoisted);

    if !resolutions.is_empty() {
        let subst: FxHashMap<u32, Operand> = resolutions
            .iter()
            .map(|&(_, _, dest, op)| (dest.0, op))
            .collect();
        for block in &mut func.blocks {
            for inst in &mut block.instructions {
                inst.replace_uses(|v| subst.get(&v.0).copied());
            }
            block.terminator.replace_uses(|v| subst.get(&v.0).copied());
        }
    }

    let count = moves.len() + resolutions.len();
    log::debug!(
        "hoisted {} instructions out of loop at block {} in '{}'",
        count,
        lp.header,
        func.name
    );
    count
}

fn dom_depth(mut b: usize, idom: &[usize]) -> usize {
    let mut depth = 0;
    while idom[b] != b && idom[b] != UNDEF {
        b = idom[b];
        depth += 1;
    }
    depth
}

fn value_defs(func: &IrFunction) -> FxHashMap<u32, (usize, usize)> {
    let mut defs = FxHashMap::default();
    for (bi, block) in func.blocks.iter().enumerate() {
        for (ii, inst) in block.instructions.iter().enumerate() {
            if let Some(dest) = inst.dest() {
                defs.insert(dest.0, (bi, ii));
            }
        }
    }
    defs
}

/// The recursive invariance test. `root` is the value the outermost query
/// asked about: reaching it again means the value depends on its own
/// previous-iteration result.
fn is_invariant(
    v: Value,
    root: Value,
    depth: usize,
    func: &IrFunction,
    ctx: &mut LoopContext,
) -> bool {
    if depth >= LOOP_INVARIANT_RECURSION_MAX_DEPTH {
        return false;
    }
    if v == root && depth != 0 {
        return false;
    }
    if ctx.invariant.contains(&v.0) {
        return true;
    }
    // No defining instruction: a parameter, invariant by definition.
    let Some(&(db, di)) = ctx.defs.get(&v.0) else {
        return true;
    };
    if !ctx.lp.body.contains(&db) {
        ctx.invariant.insert(v.0);
        return true;
    }

    let inst = &func.blocks[db].instructions[di];
    let ok = match inst {
        Instruction::BinOp { .. }
        | Instruction::UnaryOp { .. }
        | Instruction::Cmp { .. }
        | Instruction::Cast { .. }
        | Instruction::Copy { .. }
        | Instruction::Select { .. }
        | Instruction::Phi { .. } => operands_invariant(inst, root, depth, func, ctx),
        Instruction::GlobalAddr { .. } => true,
        Instruction::Call { func: callee, .. } => {
            let callee = callee.clone();
            callee_is_side_effect_free(&callee, 0, ctx)
                && operands_invariant(&func.blocks[db].instructions[di], root, depth, func, ctx)
        }
        _ => false,
    };
    if ok {
        ctx.invariant.insert(v.0);
    }
    ok
}

fn operands_invariant(
    inst: &Instruction,
    root: Value,
    depth: usize,
    func: &IrFunction,
    ctx: &mut LoopContext,
) -> bool {
    inst.used_values()
        .into_iter()
        .all(|u| is_invariant(u, root, depth + 1, func, ctx))
}

/// Conservative side-effect scan of a callee's body. Safe only when the body
/// contains no memory operations and every call is, recursively, to a safe
/// direct callee. Unknown names, declarations, opaque functions, indirect
/// calls, and depth exhaustion are all unsafe.
fn callee_is_side_effect_free(name: &str, depth: usize, ctx: &mut LoopContext) -> bool {
    if depth >= LOOP_INVARIANT_RECURSION_MAX_DEPTH {
        return false;
    }
    if let Some(&cached) = ctx.callee_safety.get(name) {
        return cached;
    }
    let Some(callee) = ctx.module.find_function(name) else {
        ctx.callee_safety.insert(name.to_string(), false);
        return false;
    };
    if callee.is_declaration || callee.optnone {
        ctx.callee_safety.insert(name.to_string(), false);
        return false;
    }

    // Seed the cache so call cycles resolve to "unsafe" instead of
    // re-walking the cycle until the depth bound on every edge.
    ctx.callee_safety.insert(name.to_string(), false);

    let mut safe = true;
    'scan: for block in &callee.blocks {
        for inst in &block.instructions {
            if inst.is_memory_operation() {
                safe = false;
                break 'scan;
            }
            match inst {
                Instruction::Call { func: inner, .. } => {
                    let inner = inner.clone();
                    if !callee_is_side_effect_free(&inner, depth + 1, ctx) {
                        safe = false;
                        break 'scan;
                    }
                }
                Instruction::CallIndirect { .. } => {
                    safe = false;
                    break 'scan;
                }
                _ => {}
            }
        }
    }

    ctx.callee_safety.insert(name.to_string(), safe);
    safe
}
