//! SSA construction: promote entry-block stack slots to direct value flow.
//!
//! The pass implements the standard algorithm:
//! 1. Identify tracked slots (entry-block allocas that are only ever loaded
//!    from or stored to directly).
//! 2. Build the CFG, dominator tree, and dominance frontiers.
//! 3. Insert phi nodes at the iterated dominance frontier of each slot's
//!    defining blocks.
//! 4. Rename along a dominator tree walk, keeping a stack of reaching
//!    definitions per slot.
//! 5. Delete the promoted allocas and their loads and stores.
//!
//! Reference: "A Simple, Fast Dominance Algorithm" by Cooper, Harvey, Kennedy.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::common::types::IrType;
use crate::ir::analysis::{self, CfgAnalysis};
use crate::ir::ir::*;

/// Promote tracked stack slots in every defined function. Returns the total
/// number of slots promoted. Running the pass again on its own output finds
/// no tracked slots and changes nothing.
pub fn promote_stack_slots(module: &mut IrModule) -> usize {
    let mut promoted = 0;
    for func in &mut module.functions {
        if func.is_declaration || func.optnone || func.blocks.is_empty() {
            continue;
        }
        promoted += promote_function(func);
    }
    promoted
}

/// A stack slot eligible for promotion.
struct SlotInfo {
    slot: Value,
    ty: IrType,
    /// Blocks containing a store to this slot.
    def_blocks: FxHashSet<usize>,
}

fn promote_function(func: &mut IrFunction) -> usize {
    let slots = find_tracked_slots(func);
    if slots.is_empty() {
        return 0;
    }
    func.next_value_id = func.next_value_id.max(func.max_value_id() + 1);

    let cfg = CfgAnalysis::build(func);
    assert!(
        cfg.preds[0].is_empty(),
        "entry block of '{}' has predecessors",
        func.name
    );
    let df = analysis::compute_dominance_frontiers(cfg.num_blocks, &cfg.preds, &cfg.idom);

    let slot_of: FxHashMap<u32, usize> = slots
        .iter()
        .enumerate()
        .map(|(i, s)| (s.slot.0, i))
        .collect();

    // Place one phi per slot at each block of the slot's iterated dominance
    // frontier. Incoming lists start empty and are filled during renaming.
    let mut phi_slot: FxHashMap<u32, usize> = FxHashMap::default();
    for (slot_idx, slot) in slots.iter().enumerate() {
        for &block in &iterated_frontier(&slot.def_blocks, &df) {
            let dest = func.new_value();
            phi_slot.insert(dest.0, slot_idx);
            func.blocks[block].instructions.insert(
                0,
                Instruction::Phi {
                    dest,
                    ty: slot.ty,
                    incoming: Vec::new(),
                },
            );
        }
    }

    // Rename. Each slot's definition stack starts with a typed zero so that
    // reads on paths with no preceding store observe a defined value.
    let mut state = RenameState {
        slot_of,
        phi_slot,
        stacks: slots
            .iter()
            .map(|s| vec![Operand::Const(IrConst::zero(s.ty))])
            .collect(),
        subst: FxHashMap::default(),
    };
    rename_block(func, &cfg, 0, &mut state);

    // One function-wide rewrite replaces every use of a deleted load's result
    // with the operand that was reaching the load.
    let subst = state.subst;
    for block in &mut func.blocks {
        for inst in &mut block.instructions {
            inst.replace_uses(|v| subst.get(&v.0).copied());
        }
        block.terminator.replace_uses(|v| subst.get(&v.0).copied());
    }

    // Drop the promoted slots and every access through them.
    let tracked = &state.slot_of;
    for block in &mut func.blocks {
        block.instructions.retain(|inst| match inst {
            Instruction::Alloca { dest, .. } => !tracked.contains_key(&dest.0),
            Instruction::Load { ptr, .. } | Instruction::Store { ptr, .. } => {
                !tracked.contains_key(&ptr.0)
            }
            _ => true,
        });
    }

    log::debug!("promoted {} stack slots in '{}'", slots.len(), func.name);
    slots.len()
}

/// Entry-block allocas whose address never escapes: every use is either the
/// pointer of a direct load or the pointer of a direct store. Any other use
/// (call argument, GEP base, stored value, terminator operand) disqualifies
/// the slot.
fn find_tracked_slots(func: &IrFunction) -> Vec<SlotInfo> {
    let mut candidates: FxHashMap<u32, IrType> = FxHashMap::default();
    let mut order: Vec<Value> = Vec::new();
    for inst in &func.blocks[0].instructions {
        if let Instruction::Alloca { dest, ty, .. } = inst {
            candidates.insert(dest.0, *ty);
            order.push(*dest);
        }
    }
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut disqualified: FxHashSet<u32> = FxHashSet::default();
    let mut def_blocks: FxHashMap<u32, FxHashSet<usize>> = FxHashMap::default();
    for (bi, block) in func.blocks.iter().enumerate() {
        for inst in &block.instructions {
            match inst {
                Instruction::Load { .. } => {}
                Instruction::Store { val, ptr, .. } => {
                    if candidates.contains_key(&ptr.0) {
                        def_blocks.entry(ptr.0).or_default().insert(bi);
                    }
                    // Storing the slot's own address leaks it.
                    if let Some(v) = val.value() {
                        if candidates.contains_key(&v.0) {
                            disqualified.insert(v.0);
                        }
                    }
                }
                _ => inst.for_each_used_value(|v| {
                    if candidates.contains_key(&v.0) {
                        disqualified.insert(v.0);
                    }
                }),
            }
        }
        block.terminator.for_each_used_value(|v| {
            if candidates.contains_key(&v.0) {
                disqualified.insert(v.0);
            }
        });
    }

    order
        .into_iter()
        .filter(|slot| !disqualified.contains(&slot.0))
        .map(|slot| SlotInfo {
            slot,
            ty: candidates[&slot.0],
            def_blocks: def_blocks.remove(&slot.0).unwrap_or_default(),
        })
        .collect()
}

/// Iterated dominance frontier of a set of defining blocks, by worklist.
/// Blocks that receive a phi become definition sites themselves.
fn iterated_frontier(
    def_blocks: &FxHashSet<usize>,
    df: &[FxHashSet<usize>],
) -> Vec<usize> {
    let mut phi_blocks: FxHashSet<usize> = FxHashSet::default();
    let mut queued: FxHashSet<usize> = def_blocks.clone();
    let mut worklist: VecDeque<usize> = def_blocks.iter().copied().collect();

    while let Some(block) = worklist.pop_front() {
        for &join in &df[block] {
            if phi_blocks.insert(join) && queued.insert(join) {
                worklist.push_back(join);
            }
        }
    }

    let mut out: Vec<usize> = phi_blocks.into_iter().collect();
    out.sort_unstable();
    out
}

struct RenameState {
    /// Slot pointer value id -> slot index.
    slot_of: FxHashMap<u32, usize>,
    /// Placed phi dest id -> slot index.
    phi_slot: FxHashMap<u32, usize>,
    /// Reaching definition stack per slot. Entries are fully resolved: they
    /// never mention the result of a load being deleted.
    stacks: Vec<Vec<Operand>>,
    /// Deleted load result -> reaching operand.
    subst: FxHashMap<u32, Operand>,
}

fn rename_block(func: &mut IrFunction, cfg: &CfgAnalysis, block_idx: usize, st: &mut RenameState) {
    let depths: Vec<usize> = st.stacks.iter().map(|s| s.len()).collect();

    for i in 0..func.blocks[block_idx].instructions.len() {
        match &func.blocks[block_idx].instructions[i] {
            Instruction::Phi { dest, .. } => {
                if let Some(&slot) = st.phi_slot.get(&dest.0) {
                    let dest = *dest;
                    st.stacks[slot].push(Operand::Value(dest));
                }
            }
            Instruction::Load { dest, ptr, .. } => {
                if let Some(&slot) = st.slot_of.get(&ptr.0) {
                    let top = *st.stacks[slot].last().unwrap();
                    st.subst.insert(dest.0, top);
                }
            }
            Instruction::Store { val, ptr, .. } => {
                if let Some(&slot) = st.slot_of.get(&ptr.0) {
                    let resolved = match val {
                        Operand::Value(v) => st.subst.get(&v.0).copied().unwrap_or(*val),
                        c => *c,
                    };
                    st.stacks[slot].push(resolved);
                }
            }
            _ => {}
        }
    }

    // Fill the incoming entry for the edge from this block in each
    // successor's placed phis.
    let cur_label = func.blocks[block_idx].label;
    for s in 0..cfg.succs[block_idx].len() {
        let succ = cfg.succs[block_idx][s];
        for inst in &mut func.blocks[succ].instructions {
            let Instruction::Phi { dest, incoming, .. } = inst else {
                break;
            };
            if let Some(&slot) = st.phi_slot.get(&dest.0) {
                let top = *st.stacks[slot].last().unwrap();
                incoming.push((top, cur_label));
            }
        }
    }

    for c in 0..cfg.dom_children[block_idx].len() {
        rename_block(func, cfg, cfg.dom_children[block_idx][c], st);
    }

    for (slot, depth) in depths.into_iter().enumerate() {
        st.stacks[slot].truncate(depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify::verify_function;

    fn v(n: u32) -> Operand {
        Operand::Value(Value(n))
    }

    fn ci(n: i32) -> Operand {
        Operand::Const(IrConst::I32(n))
    }

    fn alloca(dest: u32) -> Instruction {
        Instruction::Alloca {
            dest: Value(dest),
            ty: IrType::I32,
            size: 4,
        }
    }

    fn store(val: Operand, ptr: u32) -> Instruction {
        Instruction::Store {
            val,
            ptr: Value(ptr),
            ty: IrType::I32,
        }
    }

    fn load(dest: u32, ptr: u32) -> Instruction {
        Instruction::Load {
            dest: Value(dest),
            ptr: Value(ptr),
            ty: IrType::I32,
        }
    }

    fn module_of(func: IrFunction) -> IrModule {
        IrModule {
            functions: vec![func],
        }
    }

    fn count_phis(func: &IrFunction) -> usize {
        func.blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| matches!(i, Instruction::Phi { .. }))
            .count()
    }

    fn count_memory_ops(func: &IrFunction) -> usize {
        func.blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| {
                matches!(
                    i,
                    Instruction::Alloca { .. } | Instruction::Load { .. } | Instruction::Store { .. }
                )
            })
            .count()
    }

    #[test]
    fn straight_line_slot_folds_to_constant() {
        let mut func = IrFunction::new("f", IrType::I32, vec![]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.instructions.push(alloca(0));
        bb.instructions.push(store(ci(42), 0));
        bb.instructions.push(load(1, 0));
        bb.terminator = Terminator::Return(Some(v(1)));
        func.blocks.push(bb);
        func.next_value_id = 2;

        let mut module = module_of(func);
        assert_eq!(promote_stack_slots(&mut module), 1);

        let func = &module.functions[0];
        assert_eq!(count_memory_ops(func), 0);
        assert_eq!(count_phis(func), 0);
        assert!(matches!(
            func.blocks[0].terminator,
            Terminator::Return(Some(Operand::Const(IrConst::I32(42))))
        ));
        assert!(verify_function(func).is_ok());
    }

    #[test]
    fn diamond_gets_single_binary_phi() {
        // One slot stored in both branches, read at the join.
        let mut func = IrFunction::new("f", IrType::I32, vec![]);

        let mut entry = BasicBlock::new(BlockId(0));
        entry.instructions.push(alloca(0));
        entry.terminator = Terminator::CondBranch {
            cond: ci(1),
            true_label: BlockId(1),
            false_label: BlockId(2),
        };
        let mut left = BasicBlock::new(BlockId(1));
        left.instructions.push(store(ci(1), 0));
        left.terminator = Terminator::Branch(BlockId(3));
        let mut right = BasicBlock::new(BlockId(2));
        right.instructions.push(store(ci(2), 0));
        right.terminator = Terminator::Branch(BlockId(3));
        let mut join = BasicBlock::new(BlockId(3));
        join.instructions.push(load(1, 0));
        join.terminator = Terminator::Return(Some(v(1)));

        func.blocks.extend([entry, left, right, join]);
        func.next_value_id = 2;

        let mut module = module_of(func);
        assert_eq!(promote_stack_slots(&mut module), 1);

        let func = &module.functions[0];
        assert_eq!(count_memory_ops(func), 0);
        assert_eq!(count_phis(func), 1);

        let Instruction::Phi { dest, incoming, .. } = &func.blocks[3].instructions[0] else {
            panic!("expected phi at join");
        };
        assert_eq!(incoming.len(), 2);
        let mut vals: Vec<(Operand, BlockId)> = incoming.clone();
        vals.sort_by_key(|(_, l)| *l);
        assert_eq!(vals[0], (ci(1), BlockId(1)));
        assert_eq!(vals[1], (ci(2), BlockId(2)));
        assert!(matches!(
            func.blocks[3].terminator,
            Terminator::Return(Some(Operand::Value(d))) if d == *dest
        ));
        assert!(verify_function(func).is_ok());
    }

    #[test]
    fn read_before_any_write_sees_zero() {
        let mut func = IrFunction::new("f", IrType::I32, vec![]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.instructions.push(alloca(0));
        bb.instructions.push(load(1, 0));
        bb.terminator = Terminator::Return(Some(v(1)));
        func.blocks.push(bb);
        func.next_value_id = 2;

        let mut module = module_of(func);
        promote_stack_slots(&mut module);

        assert!(matches!(
            module.functions[0].blocks[0].terminator,
            Terminator::Return(Some(Operand::Const(c))) if c.is_zero()
        ));
    }

    #[test]
    fn counter_loop_gets_header_phi() {
        // bb0: slot = 0; bb1: t = slot; t2 = t + 1; slot = t2; loop or exit.
        let mut func = IrFunction::new("f", IrType::I32, vec![]);

        let mut entry = BasicBlock::new(BlockId(0));
        entry.instructions.push(alloca(0));
        entry.instructions.push(store(ci(0), 0));
        entry.terminator = Terminator::Branch(BlockId(1));

        let mut header = BasicBlock::new(BlockId(1));
        header.instructions.push(load(1, 0));
        header.instructions.push(Instruction::BinOp {
            dest: Value(2),
            op: IrBinOp::Add,
            lhs: v(1),
            rhs: ci(1),
            ty: IrType::I32,
        });
        header.instructions.push(store(v(2), 0));
        header.terminator = Terminator::CondBranch {
            cond: ci(1),
            true_label: BlockId(1),
            false_label: BlockId(2),
        };

        let mut exit = BasicBlock::new(BlockId(2));
        exit.instructions.push(load(3, 0));
        exit.terminator = Terminator::Return(Some(v(3)));

        func.blocks.extend([entry, header, exit]);
        func.next_value_id = 4;

        let mut module = module_of(func);
        promote_stack_slots(&mut module);

        let func = &module.functions[0];
        assert_eq!(count_memory_ops(func), 0);
        assert_eq!(count_phis(func), 1);

        let Instruction::Phi { dest, incoming, .. } = &func.blocks[1].instructions[0] else {
            panic!("expected phi at loop header");
        };
        assert_eq!(incoming.len(), 2);
        assert!(incoming.contains(&(ci(0), BlockId(0))));
        assert!(incoming.contains(&(v(2), BlockId(1))));

        // The increment now consumes the phi directly.
        let Instruction::BinOp { lhs, .. } = &func.blocks[1].instructions[1] else {
            panic!("expected add after phi");
        };
        assert_eq!(*lhs, Operand::Value(*dest));
        assert!(matches!(
            func.blocks[2].terminator,
            Terminator::Return(Some(Operand::Value(Value(2))))
        ));
        assert!(verify_function(func).is_ok());
    }

    #[test]
    fn address_taken_slot_is_untouched() {
        let mut func = IrFunction::new("f", IrType::I32, vec![]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.instructions.push(alloca(0));
        bb.instructions.push(store(ci(7), 0));
        // The slot's address escapes into a call.
        bb.instructions.push(Instruction::Call {
            func: "observe".to_string(),
            info: CallInfo {
                dest: None,
                args: vec![v(0)],
                return_type: IrType::Void,
            },
        });
        bb.instructions.push(load(1, 0));
        bb.terminator = Terminator::Return(Some(v(1)));
        func.blocks.push(bb);
        func.next_value_id = 2;

        let mut module = module_of(func);
        assert_eq!(promote_stack_slots(&mut module), 0);
        assert_eq!(count_memory_ops(&module.functions[0]), 3);
    }

    #[test]
    fn promotion_is_idempotent() {
        let mut func = IrFunction::new("f", IrType::I32, vec![]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.instructions.push(alloca(0));
        bb.instructions.push(store(ci(5), 0));
        bb.instructions.push(load(1, 0));
        bb.terminator = Terminator::Return(Some(v(1)));
        func.blocks.push(bb);
        func.next_value_id = 2;

        let mut module = module_of(func);
        assert_eq!(promote_stack_slots(&mut module), 1);
        assert_eq!(promote_stack_slots(&mut module), 0);
    }
}
