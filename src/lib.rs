//! midopt: the transformation core of a function-level IR optimizer.
//!
//! The crate rewrites a program's intermediate representation in place while
//! preserving observable behavior. It contains the three transformations that
//! must reason about control-flow structure and dominance rather than single
//! instructions in isolation:
//!
//! - SSA construction ([`ir::mem2reg`]): promotes entry-block stack slots to
//!   direct value flow, inserting phi nodes at control-flow joins.
//! - Loop-invariant code motion ([`passes::licm`]): relocates computations
//!   whose result does not change across iterations to the loop preheader.
//! - Inlining ([`passes::inline`]): splices a callee's control-flow graph
//!   into the caller at accepted call sites.
//!
//! The IR itself ([`ir`]) is a small value-indexed SSA form: `Value` and
//! `BlockId` are plain `u32` indices, blocks own their instruction lists, and
//! predecessor/successor relationships are derived from terminators on demand.
//!
//! An external driver owns pass scheduling. It looks passes up by name in
//! [`passes::registry`], invokes them with exclusive access to the module, and
//! consumes the [`passes::PreservedAnalyses`] set each pass reports so that
//! stale analyses are recomputed before the next pass runs. The canonical
//! order is mem2reg, inline, licm.

pub mod common;
pub mod ir;
pub mod passes;
