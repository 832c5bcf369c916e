//! Function inlining.
//!
//! An accepted call site is replaced by a spliced copy of the callee's CFG:
//!
//! 1. The call's block is split; instructions before the call keep the block,
//!    instructions after it move to a fresh "after" block that inherits the
//!    original terminator.
//! 2. Callee blocks are cloned with every value id and block label shifted by
//!    a per-site offset, and formal parameters rewritten to the actual
//!    arguments (constant arguments are materialized as copies at the head of
//!    the cloned entry).
//! 3. Cloned returns become branches to the after block. If the call's result
//!    is used, one returning path feeds it through a copy; several returning
//!    paths feed a phi in the after block defining the call's original dest,
//!    so no other use sites need rewriting.
//! 4. Phis in the split block's original successors are retargeted to name
//!    the after block as their predecessor.
//!
//! Acceptance is delegated entirely to the [`InlineOracle`]; every accepted
//! site is inlined, with no cross-site budget.

use rustc_hash::FxHashMap;

use super::should_inline::{DefaultInlinePolicy, InlineOracle};
use crate::common::types::IrType;
use crate::ir::ir::*;

/// Inline with the default size-based policy.
pub fn run(module: &mut IrModule) -> usize {
    run_with_oracle(module, &DefaultInlinePolicy::default())
}

/// Inline every direct call site whose callee the oracle accepts. Returns the
/// number of call sites inlined.
pub fn run_with_oracle(module: &mut IrModule, oracle: &dyn InlineOracle) -> usize {
    let uses = count_direct_uses(module);

    // The oracle's verdict depends only on the callee, so it is evaluated
    // once per callee. Accepted bodies are snapshotted up front: a callee may
    // itself be a caller that gets edited later in the same run.
    let mut accepted: FxHashMap<String, CalleeBody> = FxHashMap::default();
    for func in &module.functions {
        if func.is_declaration || func.blocks.is_empty() {
            continue;
        }
        let n = match uses.get(&func.name) {
            Some(&n) => n,
            None => continue,
        };
        if oracle.should_inline(func, n) {
            accepted.insert(func.name.clone(), CalleeBody::snapshot(func));
        }
    }
    if accepted.is_empty() {
        return 0;
    }

    let mut total = 0;
    for func in &mut module.functions {
        if func.is_declaration || func.optnone {
            continue;
        }
        total += inline_in_function(func, &accepted);
    }
    total
}

fn count_direct_uses(module: &IrModule) -> FxHashMap<String, usize> {
    let mut uses: FxHashMap<String, usize> = FxHashMap::default();
    for func in &module.functions {
        for block in &func.blocks {
            for inst in &block.instructions {
                if let Instruction::Call { func: name, .. } = inst {
                    *uses.entry(name.clone()).or_default() += 1;
                }
            }
        }
    }
    uses
}

/// Frozen copy of a callee taken before any caller is edited.
struct CalleeBody {
    blocks: Vec<BasicBlock>,
    params: Vec<Value>,
    return_type: IrType,
    max_value_id: u32,
    max_block_id: u32,
}

impl CalleeBody {
    fn snapshot(func: &IrFunction) -> Self {
        CalleeBody {
            blocks: func.blocks.clone(),
            params: func.params.iter().map(|p| p.value).collect(),
            return_type: func.return_type,
            max_value_id: func.max_value_id(),
            max_block_id: func.max_block_id().unwrap_or(0),
        }
    }
}

fn inline_in_function(func: &mut IrFunction, accepted: &FxHashMap<String, CalleeBody>) -> usize {
    // Collect sites first; splitting a block shifts the indices after the
    // split point, so each block's sites are processed highest index first.
    let mut sites: Vec<(BlockId, usize, String)> = Vec::new();
    for block in &func.blocks {
        for (i, inst) in block.instructions.iter().enumerate() {
            if let Instruction::Call { func: name, .. } = inst {
                if accepted.contains_key(name) {
                    sites.push((block.label, i, name.clone()));
                }
            }
        }
    }

    let mut count = 0;
    for (label, idx, name) in sites.into_iter().rev() {
        if inline_call_site(func, label, idx, &accepted[&name]) {
            count += 1;
            log::debug!("inlined '{}' into '{}'", name, func.name);
        }
    }
    count
}

/// Per-site remapping of callee ids into the caller's namespace.
struct Remap {
    value_offset: u32,
    block_offset: u32,
    /// Formal parameter id -> actual argument. Only value arguments appear
    /// here; constant arguments go through a materialized copy instead.
    param_map: FxHashMap<u32, Operand>,
}

impl Remap {
    fn use_of(&self, v: Value) -> Operand {
        match self.param_map.get(&v.0) {
            Some(actual) => *actual,
            None => Operand::Value(Value(v.0 + self.value_offset)),
        }
    }

    fn block(&self, l: BlockId) -> BlockId {
        BlockId(l.0 + self.block_offset)
    }

    fn instruction(&self, inst: &Instruction) -> Instruction {
        let mut out = inst.clone();
        out.replace_uses(|v| Some(self.use_of(v)));
        if let Instruction::Phi { incoming, .. } = &mut out {
            for (_, label) in incoming.iter_mut() {
                *label = self.block(*label);
            }
        }
        self.shift_dest(&mut out);
        out
    }

    fn shift_dest(&self, inst: &mut Instruction) {
        match inst {
            Instruction::Alloca { dest, .. }
            | Instruction::Load { dest, .. }
            | Instruction::BinOp { dest, .. }
            | Instruction::UnaryOp { dest, .. }
            | Instruction::Cmp { dest, .. }
            | Instruction::GetElementPtr { dest, .. }
            | Instruction::Cast { dest, .. }
            | Instruction::Copy { dest, .. }
            | Instruction::GlobalAddr { dest, .. }
            | Instruction::Select { dest, .. }
            | Instruction::Phi { dest, .. }
            | Instruction::AtomicRmw { dest, .. }
            | Instruction::AtomicCmpxchg { dest, .. }
            | Instruction::AtomicLoad { dest, .. } => *dest = Value(dest.0 + self.value_offset),
            Instruction::Call { info, .. } | Instruction::CallIndirect { info, .. } => {
                if let Some(d) = &mut info.dest {
                    *d = Value(d.0 + self.value_offset);
                }
            }
            Instruction::Store { .. }
            | Instruction::AtomicStore { .. }
            | Instruction::Fence { .. } => {}
        }
    }

    fn terminator(&self, term: &Terminator) -> Terminator {
        let mut out = term.clone();
        out.replace_uses(|v| Some(self.use_of(v)));
        match &mut out {
            Terminator::Branch(target) => *target = self.block(*target),
            Terminator::CondBranch {
                true_label,
                false_label,
                ..
            } => {
                *true_label = self.block(*true_label);
                *false_label = self.block(*false_label);
            }
            Terminator::Switch { cases, default, .. } => {
                for (_, target) in cases.iter_mut() {
                    *target = self.block(*target);
                }
                *default = self.block(*default);
            }
            Terminator::Return(_) | Terminator::Unreachable => {}
        }
        out
    }
}

fn inline_call_site(
    caller: &mut IrFunction,
    label: BlockId,
    idx: usize,
    callee: &CalleeBody,
) -> bool {
    let Some(block_idx) = caller.block_index(label) else {
        return false;
    };
    let (dest, args) = match caller.blocks[block_idx].instructions.get(idx) {
        Some(Instruction::Call { info, .. }) => (info.dest, info.args.clone()),
        _ => return false,
    };

    let value_offset = caller.next_value_id.max(caller.max_value_id() + 1);
    let block_offset = caller.max_block_id().map_or(0, |m| m + 1);
    let after_label = BlockId(block_offset + callee.max_block_id + 1);

    let mut remap = Remap {
        value_offset,
        block_offset,
        param_map: FxHashMap::default(),
    };
    let mut const_copies: Vec<Instruction> = Vec::new();
    for (i, formal) in callee.params.iter().enumerate() {
        let Some(actual) = args.get(i) else { continue };
        match actual {
            Operand::Value(_) => {
                remap.param_map.insert(formal.0, *actual);
            }
            Operand::Const(_) => const_copies.push(Instruction::Copy {
                dest: Value(formal.0 + value_offset),
                src: *actual,
            }),
        }
    }

    let mut cloned: Vec<BasicBlock> = callee
        .blocks
        .iter()
        .map(|b| BasicBlock {
            label: remap.block(b.label),
            instructions: b.instructions.iter().map(|i| remap.instruction(i)).collect(),
            terminator: remap.terminator(&b.terminator),
        })
        .collect();
    for copy in const_copies.into_iter().rev() {
        cloned[0].instructions.insert(0, copy);
    }

    // Rewrite returns into edges to the after block, collecting the value
    // each returning path produces.
    let mut returned: Vec<(Operand, BlockId)> = Vec::new();
    for block in &mut cloned {
        if let Terminator::Return(op) = &block.terminator {
            if let Some(op) = op {
                returned.push((*op, block.label));
            }
            block.terminator = Terminator::Branch(after_label);
        }
    }

    // Split the call block around the call.
    let entry_label = cloned[0].label;
    let before = &mut caller.blocks[block_idx];
    let before_label = before.label;
    let mut tail = before.instructions.split_off(idx + 1);
    before.instructions.pop();
    let original_term = std::mem::replace(&mut before.terminator, Terminator::Branch(entry_label));

    // The call's dest is redefined in the after block, so existing uses of
    // the result stay valid untouched.
    let mut after_instructions: Vec<Instruction> = Vec::new();
    if let Some(d) = dest {
        match returned.len() {
            0 => {}
            1 => after_instructions.push(Instruction::Copy {
                dest: d,
                src: returned[0].0,
            }),
            _ => after_instructions.push(Instruction::Phi {
                dest: d,
                ty: callee.return_type,
                incoming: returned,
            }),
        }
    }
    after_instructions.append(&mut tail);
    let after = BasicBlock {
        label: after_label,
        instructions: after_instructions,
        terminator: original_term,
    };

    let mut insert_at = block_idx + 1;
    for block in cloned {
        caller.blocks.insert(insert_at, block);
        insert_at += 1;
    }
    caller.blocks.insert(insert_at, after);

    // The split block's outgoing edges now leave from the after block, so
    // phis in the original successors must name it as their predecessor.
    for block in &mut caller.blocks {
        for inst in &mut block.instructions {
            let Instruction::Phi { incoming, .. } = inst else {
                continue;
            };
            for (_, pred) in incoming.iter_mut() {
                if *pred == before_label {
                    *pred = after_label;
                }
            }
        }
    }

    caller.next_value_id = value_offset + callee.max_value_id + 1;
    true
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

    fn param(name: &str, n: u32) -> IrParam {
        IrParam {
            name: name.to_string(),
            ty: IrType::I32,
            value: Value(n),
        }
    }

    fn call(dest: u32, name: &str, args: Vec<Operand>) -> Instruction {
        Instruction::Call {
            func: name.to_string(),
            info: CallInfo {
                dest: Some(Value(dest)),
                args,
                return_type: IrType::I32,
            },
        }
    }

    /// double(x) = x * 2, one block, one return.
    fn double_func() -> IrFunction {
        let mut func = IrFunction::new("double", IrType::I32, vec![param("x", 0)]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.instructions.push(Instruction::BinOp {
            dest: Value(1),
            op: IrBinOp::Mul,
            lhs: v(0),
            rhs: ci(2),
            ty: IrType::I32,
        });
        bb.terminator = Terminator::Return(Some(v(1)));
        func.blocks.push(bb);
        func.next_value_id = 2;
        func
    }

    /// abs(x): two returning paths.
    fn abs_func() -> IrFunction {
        let mut func = IrFunction::new("abs", IrType::I32, vec![param("x", 0)]);
        let mut entry = BasicBlock::new(BlockId(0));
        entry.instructions.push(Instruction::Cmp {
            dest: Value(1),
            op: IrCmpOp::Lt,
            lhs: v(0),
            rhs: ci(0),
            ty: IrType::I32,
        });
        entry.terminator = Terminator::CondBranch {
            cond: v(1),
            true_label: BlockId(1),
            false_label: BlockId(2),
        };
        let mut neg = BasicBlock::new(BlockId(1));
        neg.instructions.push(Instruction::UnaryOp {
            dest: Value(2),
            op: IrUnaryOp::Neg,
            src: v(0),
            ty: IrType::I32,
        });
        neg.terminator = Terminator::Return(Some(v(2)));
        let mut pos = BasicBlock::new(BlockId(2));
        pos.terminator = Terminator::Return(Some(v(0)));
        func.blocks.extend([entry, neg, pos]);
        func.next_value_id = 3;
        func
    }

    fn count_phis(func: &IrFunction) -> usize {
        func.blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| matches!(i, Instruction::Phi { .. }))
            .count()
    }

    fn count_calls(func: &IrFunction) -> usize {
        func.blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| matches!(i, Instruction::Call { .. }))
            .count()
    }

    #[test]
    fn single_return_callee_needs_no_phi() {
        let mut caller = IrFunction::new("caller", IrType::I32, vec![param("a", 0)]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.instructions.push(call(1, "double", vec![v(0)]));
        bb.terminator = Terminator::Return(Some(v(1)));
        caller.blocks.push(bb);
        caller.next_value_id = 2;

        let mut module = IrModule {
            functions: vec![caller, double_func()],
        };
        assert_eq!(run(&mut module), 1);

        let caller = &module.functions[0];
        assert_eq!(count_calls(caller), 0);
        assert_eq!(count_phis(caller), 0);
        assert!(verify_function(caller).is_ok());

        // The body was spliced in: the multiply consumes the caller's
        // argument directly, and the result flows through a copy into the
        // call's original dest.
        let mul = caller
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .find_map(|i| match i {
                Instruction::BinOp { dest, lhs, .. } => Some((*dest, *lhs)),
                _ => None,
            })
            .expect("inlined multiply");
        assert_eq!(mul.1, v(0));
        let copy = caller
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .find_map(|i| match i {
                Instruction::Copy { dest, src } => Some((*dest, *src)),
                _ => None,
            })
            .expect("result copy");
        assert_eq!(copy.0, Value(1));
        assert_eq!(copy.1, Operand::Value(mul.0));
    }

    #[test]
    fn multi_return_callee_gets_merge_phi() {
        let mut caller = IrFunction::new("caller", IrType::I32, vec![param("a", 0)]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.instructions.push(call(1, "abs", vec![v(0)]));
        bb.terminator = Terminator::Return(Some(v(1)));
        caller.blocks.push(bb);
        caller.next_value_id = 2;

        let mut module = IrModule {
            functions: vec![caller, abs_func()],
        };
        assert_eq!(run(&mut module), 1);

        let caller = &module.functions[0];
        assert_eq!(count_calls(caller), 0);
        assert_eq!(count_phis(caller), 1);
        assert!(verify_function(caller).is_ok());

        let Some(Instruction::Phi { dest, incoming, .. }) = caller
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .find(|i| matches!(i, Instruction::Phi { .. }))
        else {
            unreachable!();
        };
        assert_eq!(*dest, Value(1));
        assert_eq!(incoming.len(), 2);
    }

    #[test]
    fn constant_argument_is_materialized_as_copy() {
        let mut caller = IrFunction::new("caller", IrType::I32, vec![]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.instructions.push(call(0, "double", vec![ci(21)]));
        bb.terminator = Terminator::Return(Some(v(0)));
        caller.blocks.push(bb);
        caller.next_value_id = 1;

        let mut module = IrModule {
            functions: vec![caller, double_func()],
        };
        assert_eq!(run(&mut module), 1);

        let caller = &module.functions[0];
        assert!(verify_function(caller).is_ok());
        // The cloned entry starts with the parameter copy feeding the mul.
        let entry_clone = &caller.blocks[1];
        let Instruction::Copy { dest, src } = &entry_clone.instructions[0] else {
            panic!("expected parameter copy first");
        };
        assert_eq!(*src, ci(21));
        let Instruction::BinOp { lhs, .. } = &entry_clone.instructions[1] else {
            panic!("expected multiply second");
        };
        assert_eq!(*lhs, Operand::Value(*dest));
    }

    #[test]
    fn successor_phis_are_retargeted_to_after_block() {
        // bb0 holds the call and conditionally branches to the join, which
        // merges the call result with a constant from bb2.
        let mut caller = IrFunction::new("caller", IrType::I32, vec![param("a", 0)]);
        let mut entry = BasicBlock::new(BlockId(0));
        entry.instructions.push(call(1, "double", vec![v(0)]));
        entry.terminator = Terminator::CondBranch {
            cond: v(0),
            true_label: BlockId(1),
            false_label: BlockId(2),
        };
        let mut side = BasicBlock::new(BlockId(2));
        side.terminator = Terminator::Branch(BlockId(1));
        let mut join = BasicBlock::new(BlockId(1));
        join.instructions.push(Instruction::Phi {
            dest: Value(2),
            ty: IrType::I32,
            incoming: vec![(v(1), BlockId(0)), (ci(0), BlockId(2))],
        });
        join.terminator = Terminator::Return(Some(v(2)));
        caller.blocks.extend([entry, join, side]);
        caller.next_value_id = 3;

        let mut module = IrModule {
            functions: vec![caller, double_func()],
        };
        assert_eq!(run(&mut module), 1);

        let caller = &module.functions[0];
        assert!(verify_function(caller).is_ok());
        let join = &caller.blocks[caller.block_index(BlockId(1)).unwrap()];
        let Instruction::Phi { incoming, .. } = &join.instructions[0] else {
            panic!("join phi missing");
        };
        assert!(incoming.iter().all(|(_, l)| *l != BlockId(0)));
        assert!(incoming.iter().any(|(op, _)| *op == v(1)));
    }

    #[test]
    fn rejected_callees_are_left_alone() {
        struct Never;
        impl InlineOracle for Never {
            fn should_inline(&self, _: &IrFunction, _: usize) -> bool {
                false
            }
        }

        let mut caller = IrFunction::new("caller", IrType::I32, vec![param("a", 0)]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.instructions.push(call(1, "double", vec![v(0)]));
        bb.terminator = Terminator::Return(Some(v(1)));
        caller.blocks.push(bb);
        caller.next_value_id = 2;

        let mut module = IrModule {
            functions: vec![caller, double_func()],
        };
        assert_eq!(run_with_oracle(&mut module, &Never), 0);
        assert_eq!(count_calls(&module.functions[0]), 1);
    }

    #[test]
    fn two_sites_in_one_block_both_inline() {
        struct Always;
        impl InlineOracle for Always {
            fn should_inline(&self, callee: &IrFunction, _: usize) -> bool {
                !callee.is_declaration && !callee.blocks.is_empty()
            }
        }

        let mut caller = IrFunction::new("caller", IrType::I32, vec![param("a", 0)]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.instructions.push(call(1, "double", vec![v(0)]));
        bb.instructions.push(call(2, "double", vec![v(1)]));
        bb.instructions.push(Instruction::BinOp {
            dest: Value(3),
            op: IrBinOp::Add,
            lhs: v(1),
            rhs: v(2),
            ty: IrType::I32,
        });
        bb.terminator = Terminator::Return(Some(v(3)));
        caller.blocks.push(bb);
        caller.next_value_id = 4;

        let mut module = IrModule {
            functions: vec![caller, double_func()],
        };
        assert_eq!(run_with_oracle(&mut module, &Always), 2);

        let caller = &module.functions[0];
        assert_eq!(count_calls(caller), 0);
        assert!(verify_function(caller).is_ok());
    }
}
