//! Structural and SSA well-formedness checks.
//!
//! The verifier is a debugging aid for pass authors: every transformation is
//! expected to leave functions in a state where `verify_function` returns no
//! errors. It checks that branch targets exist, that each value has a single
//! definition, that definitions dominate uses, and that phi incoming lists
//! match predecessor edges exactly.

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::analysis::{self, CfgAnalysis, UNDEF};
use crate::ir::ir::{BlockId, Instruction, IrFunction, Value};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("value {0} defined more than once")]
    MultipleDefs(Value),
    #[error("value {value} used in {block} but never defined")]
    UndefinedUse { value: Value, block: BlockId },
    #[error("definition of {value} does not dominate its use in {block}")]
    UseNotDominated { value: Value, block: BlockId },
    #[error("phi {dest} in {block} has {actual} incoming entries for {expected} predecessors")]
    PhiArityMismatch {
        block: BlockId,
        dest: Value,
        expected: usize,
        actual: usize,
    },
    #[error("phi {dest} in {block} has no entry for predecessor {pred} (or a duplicate)")]
    PhiEdgeMismatch {
        block: BlockId,
        dest: Value,
        pred: BlockId,
    },
    #[error("{block} branches to nonexistent {target}")]
    UnknownTarget { block: BlockId, target: BlockId },
}

#[derive(Clone, Copy)]
enum DefSite {
    Param,
    Inst {
        block: usize,
        index: usize,
        is_phi: bool,
    },
}

/// Check one function. Returns every violation found, not just the first.
pub fn verify_function(func: &IrFunction) -> Result<(), Vec<VerifyError>> {
    let mut errors = Vec::new();

    if func.blocks.is_empty() {
        return Ok(());
    }

    let label_to_idx = analysis::build_label_map(func);

    // Branch targets must exist before the CFG can be built at all.
    for block in &func.blocks {
        for target in block.terminator.successors() {
            if !label_to_idx.contains_key(&target) {
                errors.push(VerifyError::UnknownTarget {
                    block: block.label,
                    target,
                });
            }
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let cfg = CfgAnalysis::build(func);

    // Single definition per value.
    let mut defs: FxHashMap<u32, DefSite> = FxHashMap::default();
    for param in &func.params {
        defs.insert(param.value.0, DefSite::Param);
    }
    for (bi, block) in func.blocks.iter().enumerate() {
        for (ii, inst) in block.instructions.iter().enumerate() {
            if let Some(dest) = inst.dest() {
                let site = DefSite::Inst {
                    block: bi,
                    index: ii,
                    is_phi: matches!(inst, Instruction::Phi { .. }),
                };
                if defs.insert(dest.0, site).is_some() {
                    errors.push(VerifyError::MultipleDefs(dest));
                }
            }
        }
    }

    for (bi, block) in func.blocks.iter().enumerate() {
        // Skip dominance checks inside unreachable blocks.
        let reachable = bi == 0 || cfg.idom[bi] != UNDEF;

        for (ii, inst) in block.instructions.iter().enumerate() {
            if let Instruction::Phi { dest, incoming, .. } = inst {
                check_phi(func, &cfg, bi, *dest, incoming, &mut errors);
                if !reachable {
                    continue;
                }
                // A phi use must be available at the end of the incoming edge's
                // predecessor, not at the phi itself.
                for (op, pred_label) in incoming {
                    let (Some(v), Some(&pred)) = (op.value(), cfg.label_to_idx.get(pred_label))
                    else {
                        continue;
                    };
                    check_use(v, pred, usize::MAX, &defs, &cfg, block.label, &mut errors);
                }
            } else if reachable {
                inst.for_each_used_value(|v| {
                    check_use(v, bi, ii, &defs, &cfg, block.label, &mut errors);
                });
            }
        }
        if reachable {
            block.terminator.for_each_used_value(|v| {
                check_use(v, bi, usize::MAX, &defs, &cfg, block.label, &mut errors);
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_phi(
    func: &IrFunction,
    cfg: &CfgAnalysis,
    bi: usize,
    dest: Value,
    incoming: &[(crate::ir::ir::Operand, BlockId)],
    errors: &mut Vec<VerifyError>,
) {
    let block = &func.blocks[bi];
    let preds = &cfg.preds[bi];
    if incoming.len() != preds.len() {
        errors.push(VerifyError::PhiArityMismatch {
            block: block.label,
            dest,
            expected: preds.len(),
            actual: incoming.len(),
        });
        return;
    }
    for &p in preds {
        let pred_label = func.blocks[p].label;
        let matching = incoming.iter().filter(|(_, l)| *l == pred_label).count();
        if matching != 1 {
            errors.push(VerifyError::PhiEdgeMismatch {
                block: block.label,
                dest,
                pred: pred_label,
            });
        }
    }
}

fn check_use(
    value: Value,
    use_block: usize,
    use_index: usize,
    defs: &FxHashMap<u32, DefSite>,
    cfg: &CfgAnalysis,
    report_block: BlockId,
    errors: &mut Vec<VerifyError>,
) {
    match defs.get(&value.0) {
        None => errors.push(VerifyError::UndefinedUse {
            value,
            block: report_block,
        }),
        Some(DefSite::Param) => {}
        Some(DefSite::Inst {
            block: def_block,
            index,
            is_phi,
        }) => {
            let dominated = if *def_block == use_block {
                // Phis conceptually execute at block entry.
                *is_phi || *index < use_index
            } else {
                cfg.dominates(*def_block, use_block)
            };
            if !dominated {
                errors.push(VerifyError::UseNotDominated {
                    value,
                    block: report_block,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::IrType;
    use crate::ir::ir::*;

    fn v(n: u32) -> Operand {
        Operand::Value(Value(n))
    }

    fn ci(n: i32) -> Operand {
        Operand::Const(IrConst::I32(n))
    }

    fn add(dest: u32, lhs: Operand, rhs: Operand) -> Instruction {
        Instruction::BinOp {
            dest: Value(dest),
            op: IrBinOp::Add,
            lhs,
            rhs,
            ty: IrType::I32,
        }
    }

    #[test]
    fn straight_line_function_verifies() {
        let mut func = IrFunction::new("f", IrType::I32, vec![]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.instructions.push(add(0, ci(1), ci(2)));
        bb.instructions.push(add(1, v(0), ci(3)));
        bb.terminator = Terminator::Return(Some(v(1)));
        func.blocks.push(bb);
        assert!(verify_function(&func).is_ok());
    }

    #[test]
    fn use_before_def_in_same_block_is_reported() {
        let mut func = IrFunction::new("f", IrType::I32, vec![]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.instructions.push(add(1, v(0), ci(3)));
        bb.instructions.push(add(0, ci(1), ci(2)));
        bb.terminator = Terminator::Return(Some(v(1)));
        func.blocks.push(bb);
        let errors = verify_function(&func).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, VerifyError::UseNotDominated { value: Value(0), .. })));
    }

    #[test]
    fn phi_arity_mismatch_is_reported() {
        // Diamond join with a phi carrying only one incoming entry.
        let mut func = IrFunction::new("f", IrType::I32, vec![]);
        let mut entry = BasicBlock::new(BlockId(0));
        entry.terminator = Terminator::CondBranch {
            cond: ci(1),
            true_label: BlockId(1),
            false_label: BlockId(2),
        };
        let mut left = BasicBlock::new(BlockId(1));
        left.terminator = Terminator::Branch(BlockId(3));
        let mut right = BasicBlock::new(BlockId(2));
        right.terminator = Terminator::Branch(BlockId(3));
        let mut join = BasicBlock::new(BlockId(3));
        join.instructions.push(Instruction::Phi {
            dest: Value(0),
            ty: IrType::I32,
            incoming: vec![(ci(1), BlockId(1))],
        });
        join.terminator = Terminator::Return(Some(v(0)));
        func.blocks.extend([entry, left, right, join]);

        let errors = verify_function(&func).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, VerifyError::PhiArityMismatch { actual: 1, expected: 2, .. })));
    }

    #[test]
    fn branch_to_missing_block_is_reported() {
        let mut func = IrFunction::new("f", IrType::Void, vec![]);
        let mut bb = BasicBlock::new(BlockId(0));
        bb.terminator = Terminator::Branch(BlockId(7));
        func.blocks.push(bb);
        let errors = verify_function(&func).unwrap_err();
        assert_eq!(
            errors[0],
            VerifyError::UnknownTarget {
                block: BlockId(0),
                target: BlockId(7)
            }
        );
    }
}
