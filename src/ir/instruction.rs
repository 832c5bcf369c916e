//! Core IR building blocks: values, operands, instructions, terminators, and
//! basic blocks.
//!
//! The IR is value-indexed: a `Value` is a plain `u32` naming the result of at
//! most one instruction (or a function parameter). Blocks own their
//! instruction lists and carry exactly one terminator, stored separately from
//! the instruction vector so a block structurally cannot have zero or two
//! terminators. Predecessor and successor relationships are not stored; they
//! are derived from terminators by the analysis layer.

use crate::common::types::IrType;
use super::constants::IrConst;
use super::ops::{AtomicOrdering, AtomicRmwOp, IrBinOp, IrCmpOp, IrUnaryOp};

/// A basic block label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// An SSA value id. Each value is defined by exactly one instruction or is a
/// function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub u32);

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// An instruction operand: either a value reference or an immediate constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Value(Value),
    Const(IrConst),
}

impl Operand {
    pub fn value(&self) -> Option<Value> {
        match self {
            Operand::Value(v) => Some(*v),
            Operand::Const(_) => None,
        }
    }
}

/// Shared payload of direct and indirect calls.
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Destination value for the result, None for void calls or ignored results.
    pub dest: Option<Value>,
    pub args: Vec<Operand>,
    pub return_type: IrType,
}

/// IR instructions. All non-control-flow operations; control flow lives in
/// [`Terminator`].
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Reserve `size` bytes of stack memory; `dest` holds the address.
    Alloca {
        dest: Value,
        ty: IrType,
        size: usize,
    },
    Load {
        dest: Value,
        ptr: Value,
        ty: IrType,
    },
    Store {
        val: Operand,
        ptr: Value,
        ty: IrType,
    },
    BinOp {
        dest: Value,
        op: IrBinOp,
        lhs: Operand,
        rhs: Operand,
        ty: IrType,
    },
    UnaryOp {
        dest: Value,
        op: IrUnaryOp,
        src: Operand,
        ty: IrType,
    },
    /// Compare and produce a boolean (0 or 1) result.
    Cmp {
        dest: Value,
        op: IrCmpOp,
        lhs: Operand,
        rhs: Operand,
        ty: IrType,
    },
    /// Direct call to a named function.
    Call {
        func: String,
        info: CallInfo,
    },
    /// Call through a function pointer.
    CallIndirect {
        func_ptr: Operand,
        info: CallInfo,
    },
    /// Pointer arithmetic: dest = base + offset (byte offset).
    GetElementPtr {
        dest: Value,
        base: Value,
        offset: Operand,
        ty: IrType,
    },
    Cast {
        dest: Value,
        src: Operand,
        from_ty: IrType,
        to_ty: IrType,
    },
    Copy {
        dest: Value,
        src: Operand,
    },
    /// Materialize the address of a global symbol.
    GlobalAddr {
        dest: Value,
        name: String,
    },
    Select {
        dest: Value,
        cond: Operand,
        true_val: Operand,
        false_val: Operand,
        ty: IrType,
    },
    /// SSA merge: dest takes the incoming value matching the edge the block
    /// was entered through. One incoming entry per predecessor edge.
    Phi {
        dest: Value,
        ty: IrType,
        incoming: Vec<(Operand, BlockId)>,
    },
    AtomicRmw {
        dest: Value,
        op: AtomicRmwOp,
        ptr: Operand,
        val: Operand,
        ty: IrType,
        ordering: AtomicOrdering,
    },
    AtomicCmpxchg {
        dest: Value,
        ptr: Operand,
        expected: Operand,
        desired: Operand,
        ty: IrType,
        ordering: AtomicOrdering,
    },
    AtomicLoad {
        dest: Value,
        ptr: Operand,
        ty: IrType,
        ordering: AtomicOrdering,
    },
    AtomicStore {
        ptr: Operand,
        val: Operand,
        ty: IrType,
        ordering: AtomicOrdering,
    },
    Fence {
        ordering: AtomicOrdering,
    },
}

impl Instruction {
    /// The value this instruction defines, if any.
    pub fn dest(&self) -> Option<Value> {
        match self {
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
            | Instruction::AtomicLoad { dest, .. } => Some(*dest),
            Instruction::Call { info, .. } | Instruction::CallIndirect { info, .. } => info.dest,
            Instruction::Store { .. }
            | Instruction::AtomicStore { .. }
            | Instruction::Fence { .. } => None,
        }
    }

    /// Visit every value this instruction reads (not the one it defines).
    pub fn for_each_used_value<F: FnMut(Value)>(&self, mut f: F) {
        fn op<F: FnMut(Value)>(o: &Operand, f: &mut F) {
            if let Operand::Value(v) = o {
                f(*v);
            }
        }
        match self {
            Instruction::Alloca { .. }
            | Instruction::GlobalAddr { .. }
            | Instruction::Fence { .. } => {}
            Instruction::Load { ptr, .. } => f(*ptr),
            Instruction::Store { val, ptr, .. } => {
                op(val, &mut f);
                f(*ptr);
            }
            Instruction::BinOp { lhs, rhs, .. } | Instruction::Cmp { lhs, rhs, .. } => {
                op(lhs, &mut f);
                op(rhs, &mut f);
            }
            Instruction::UnaryOp { src, .. }
            | Instruction::Cast { src, .. }
            | Instruction::Copy { src, .. } => op(src, &mut f),
            Instruction::Call { info, .. } => {
                for arg in &info.args {
                    op(arg, &mut f);
                }
            }
            Instruction::CallIndirect { func_ptr, info } => {
                op(func_ptr, &mut f);
                for arg in &info.args {
                    op(arg, &mut f);
                }
            }
            Instruction::GetElementPtr { base, offset, .. } => {
                f(*base);
                op(offset, &mut f);
            }
            Instruction::Select {
                cond,
                true_val,
                false_val,
                ..
            } => {
                op(cond, &mut f);
                op(true_val, &mut f);
                op(false_val, &mut f);
            }
            Instruction::Phi { incoming, .. } => {
                for (o, _) in incoming {
                    op(o, &mut f);
                }
            }
            Instruction::AtomicRmw { ptr, val, .. } => {
                op(ptr, &mut f);
                op(val, &mut f);
            }
            Instruction::AtomicCmpxchg {
                ptr,
                expected,
                desired,
                ..
            } => {
                op(ptr, &mut f);
                op(expected, &mut f);
                op(desired, &mut f);
            }
            Instruction::AtomicLoad { ptr, .. } => op(ptr, &mut f),
            Instruction::AtomicStore { ptr, val, .. } => {
                op(ptr, &mut f);
                op(val, &mut f);
            }
        }
    }

    /// Collect the values this instruction reads.
    pub fn used_values(&self) -> Vec<Value> {
        let mut out = Vec::new();
        self.for_each_used_value(|v| out.push(v));
        out
    }

    /// Rewrite value uses in place. For each used value, `subst` may return a
    /// replacement operand. Positions that require a value (load/store
    /// addresses, GEP bases) only accept `Operand::Value` replacements; a
    /// constant replacement leaves such a position unchanged.
    pub fn replace_uses<F: Fn(Value) -> Option<Operand>>(&mut self, subst: F) {
        let rew_op = |o: &mut Operand| {
            if let Operand::Value(v) = o {
                if let Some(rep) = subst(*v) {
                    *o = rep;
                }
            }
        };
        let rew_val = |v: &mut Value| {
            if let Some(Operand::Value(nv)) = subst(*v) {
                *v = nv;
            }
        };
        match self {
            Instruction::Alloca { .. }
            | Instruction::GlobalAddr { .. }
            | Instruction::Fence { .. } => {}
            Instruction::Load { ptr, .. } => rew_val(ptr),
            Instruction::Store { val, ptr, .. } => {
                rew_op(val);
                rew_val(ptr);
            }
            Instruction::BinOp { lhs, rhs, .. } | Instruction::Cmp { lhs, rhs, .. } => {
                rew_op(lhs);
                rew_op(rhs);
            }
            Instruction::UnaryOp { src, .. }
            | Instruction::Cast { src, .. }
            | Instruction::Copy { src, .. } => rew_op(src),
            Instruction::Call { info, .. } => info.args.iter_mut().for_each(rew_op),
            Instruction::CallIndirect { func_ptr, info } => {
                rew_op(func_ptr);
                info.args.iter_mut().for_each(rew_op);
            }
            Instruction::GetElementPtr { base, offset, .. } => {
                rew_val(base);
                rew_op(offset);
            }
            Instruction::Select {
                cond,
                true_val,
                false_val,
                ..
            } => {
                rew_op(cond);
                rew_op(true_val);
                rew_op(false_val);
            }
            Instruction::Phi { incoming, .. } => {
                incoming.iter_mut().for_each(|(o, _)| rew_op(o))
            }
            Instruction::AtomicRmw { ptr, val, .. } => {
                rew_op(ptr);
                rew_op(val);
            }
            Instruction::AtomicCmpxchg {
                ptr,
                expected,
                desired,
                ..
            } => {
                rew_op(ptr);
                rew_op(expected);
                rew_op(desired);
            }
            Instruction::AtomicLoad { ptr, .. } => rew_op(ptr),
            Instruction::AtomicStore { ptr, val, .. } => {
                rew_op(ptr);
                rew_op(val);
            }
        }
    }

    /// True for instructions that touch memory or order memory accesses.
    /// Address computations (Alloca, GetElementPtr) count: a function that
    /// performs them may expose or derive pointers we cannot track.
    pub fn is_memory_operation(&self) -> bool {
        matches!(
            self,
            Instruction::Alloca { .. }
                | Instruction::Load { .. }
                | Instruction::Store { .. }
                | Instruction::GetElementPtr { .. }
                | Instruction::Fence { .. }
                | Instruction::AtomicRmw { .. }
                | Instruction::AtomicCmpxchg { .. }
                | Instruction::AtomicLoad { .. }
                | Instruction::AtomicStore { .. }
        )
    }
}

/// Block terminators. Every block has exactly one.
#[derive(Debug, Clone)]
pub enum Terminator {
    Return(Option<Operand>),
    Branch(BlockId),
    CondBranch {
        cond: Operand,
        true_label: BlockId,
        false_label: BlockId,
    },
    Switch {
        val: Operand,
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    },
    Unreachable,
}

impl Terminator {
    /// Successor labels, deduplicated in first-appearance order.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Return(_) | Terminator::Unreachable => Vec::new(),
            Terminator::Branch(target) => vec![*target],
            Terminator::CondBranch {
                true_label,
                false_label,
                ..
            } => {
                if true_label == false_label {
                    vec![*true_label]
                } else {
                    vec![*true_label, *false_label]
                }
            }
            Terminator::Switch { cases, default, .. } => {
                let mut out = vec![*default];
                for (_, target) in cases {
                    if !out.contains(target) {
                        out.push(*target);
                    }
                }
                out
            }
        }
    }

    pub fn for_each_used_value<F: FnMut(Value)>(&self, mut f: F) {
        let mut op = |o: &Operand| {
            if let Operand::Value(v) = o {
                f(*v);
            }
        };
        match self {
            Terminator::Return(Some(o)) => op(o),
            Terminator::CondBranch { cond, .. } => op(cond),
            Terminator::Switch { val, .. } => op(val),
            Terminator::Return(None) | Terminator::Branch(_) | Terminator::Unreachable => {}
        }
    }

    /// Rewrite value uses in place, mirroring [`Instruction::replace_uses`].
    pub fn replace_uses<F: Fn(Value) -> Option<Operand>>(&mut self, subst: F) {
        let rew_op = |o: &mut Operand| {
            if let Operand::Value(v) = o {
                if let Some(rep) = subst(*v) {
                    *o = rep;
                }
            }
        };
        match self {
            Terminator::Return(Some(o)) => rew_op(o),
            Terminator::CondBranch { cond, .. } => rew_op(cond),
            Terminator::Switch { val, .. } => rew_op(val),
            Terminator::Return(None) | Terminator::Branch(_) | Terminator::Unreachable => {}
        }
    }
}

/// A basic block: a label, a straight-line instruction list, and one
/// terminator.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub label: BlockId,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

impl BasicBlock {
    pub fn new(label: BlockId) -> Self {
        BasicBlock {
            label,
            instructions: Vec::new(),
            terminator: Terminator::Unreachable,
        }
    }
}
