/// Re-export hub for all IR types.
///
/// The IR is split into focused submodules:
/// - `constants`: IrConst
/// - `ops`: IrBinOp, IrCmpOp, IrUnaryOp, AtomicRmwOp, AtomicOrdering
/// - `instruction`: Instruction, Terminator, BasicBlock, BlockId, Value, Operand, CallInfo
/// - `module`: IrModule, IrFunction, IrParam
///
/// All types are re-exported here so consumers can `use crate::ir::ir::*`.
pub use super::constants::*;
pub use super::instruction::*;
pub use super::module::*;
pub use super::ops::*;
