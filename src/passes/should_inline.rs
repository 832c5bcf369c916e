//! The inlining decision, separated from the inlining mechanics.
//!
//! The inliner consults an [`InlineOracle`] per candidate call site and never
//! second-guesses it. The default policy is size-based; tests substitute
//! their own oracle to force or forbid inlining.

use crate::ir::ir::IrFunction;

/// Callees at most this many instructions long are inlined even when called
/// from several places.
pub const MAX_INLINE_INSTRUCTIONS: usize = 64;

/// Decides whether a callee should be inlined at a call site.
pub trait InlineOracle {
    /// `uses` is the number of direct call sites naming this callee across
    /// the whole module.
    fn should_inline(&self, callee: &IrFunction, uses: usize) -> bool;
}

/// Size-based policy: always inline single-use callees, otherwise inline
/// small ones.
#[derive(Debug, Clone, Copy)]
pub struct DefaultInlinePolicy {
    pub max_instructions: usize,
}

impl Default for DefaultInlinePolicy {
    fn default() -> Self {
        DefaultInlinePolicy {
            max_instructions: MAX_INLINE_INSTRUCTIONS,
        }
    }
}

impl InlineOracle for DefaultInlinePolicy {
    fn should_inline(&self, callee: &IrFunction, uses: usize) -> bool {
        if callee.is_declaration || callee.optnone || callee.blocks.is_empty() {
            return false;
        }
        if uses == 1 {
            return true;
        }
        let size = callee.instruction_count();
        size > 1 && size <= self.max_instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::IrType;
    use crate::ir::ir::*;

    fn func_with_instructions(n: usize) -> IrFunction {
        let mut f = IrFunction::new("g", IrType::I32, vec![]);
        let mut bb = BasicBlock::new(BlockId(0));
        for i in 0..n {
            bb.instructions.push(Instruction::BinOp {
                dest: Value(i as u32),
                op: IrBinOp::Add,
                lhs: Operand::Const(IrConst::I32(1)),
                rhs: Operand::Const(IrConst::I32(2)),
                ty: IrType::I32,
            });
        }
        bb.terminator = Terminator::Return(None);
        f.blocks.push(bb);
        f
    }

    #[test]
    fn single_use_callee_is_always_inlined() {
        let policy = DefaultInlinePolicy::default();
        let big = func_with_instructions(500);
        assert!(policy.should_inline(&big, 1));
        assert!(!policy.should_inline(&big, 2));
    }

    #[test]
    fn size_threshold_is_inclusive() {
        let policy = DefaultInlinePolicy::default();
        assert!(policy.should_inline(&func_with_instructions(MAX_INLINE_INSTRUCTIONS), 3));
        assert!(!policy.should_inline(&func_with_instructions(MAX_INLINE_INSTRUCTIONS + 1), 3));
    }

    #[test]
    fn declarations_and_optnone_are_rejected() {
        let policy = DefaultInlinePolicy::default();
        let mut decl = IrFunction::new("ext", IrType::I32, vec![]);
        decl.is_declaration = true;
        assert!(!policy.should_inline(&decl, 1));

        let mut pinned = func_with_instructions(4);
        pinned.optnone = true;
        assert!(!policy.should_inline(&pinned, 1));
    }
}
