//! Pass entry points and the name registry consumed by the driver.
//!
//! Each pass is a plain function over the whole module. On completion it
//! reports which analyses it left intact; the driver discards and recomputes
//! anything not reported as preserved before running the next pass. The
//! canonical pipeline order is mem2reg, inline, licm.

pub mod inline;
pub mod licm;
pub mod loop_analysis;
pub mod should_inline;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::common::error::PassError;
use crate::ir::ir::IrModule;
use crate::ir::mem2reg;

bitflags! {
    /// Analyses still valid after a pass ran.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PreservedAnalyses: u8 {
        const CFG = 1;
        const DOMINATORS = 1 << 1;
        const LOOPS = 1 << 2;
    }
}

/// What a pass did and what survived it.
#[derive(Debug, Clone, Copy)]
pub struct PassResult {
    /// Pass-specific unit: slots promoted, instructions hoisted, sites
    /// inlined.
    pub changes: usize,
    pub preserved: PreservedAnalyses,
}

pub type PassFn = fn(&mut IrModule) -> PassResult;

fn run_mem2reg(module: &mut IrModule) -> PassResult {
    // Promotion rewrites dataflow only; every edge stays where it was.
    PassResult {
        changes: mem2reg::promote_stack_slots(module),
        preserved: PreservedAnalyses::all(),
    }
}

fn run_inline(module: &mut IrModule) -> PassResult {
    PassResult {
        changes: inline::run(module),
        preserved: PreservedAnalyses::empty(),
    }
}

fn run_licm(module: &mut IrModule) -> PassResult {
    // Instructions move between existing blocks; the CFG shape is untouched.
    PassResult {
        changes: licm::run(module),
        preserved: PreservedAnalyses::all(),
    }
}

/// Name -> pass lookup table.
pub fn registry() -> FxHashMap<&'static str, PassFn> {
    let mut passes: FxHashMap<&'static str, PassFn> = FxHashMap::default();
    passes.insert("mem2reg", run_mem2reg as PassFn);
    passes.insert("inline", run_inline as PassFn);
    passes.insert("licm", run_licm as PassFn);
    passes
}

/// Run the named passes in order. Fails without touching the module if any
/// name is unknown.
pub fn run_pipeline(module: &mut IrModule, names: &[&str]) -> Result<Vec<PassResult>, PassError> {
    let passes = registry();
    let mut resolved = Vec::with_capacity(names.len());
    for &name in names {
        match passes.get(name) {
            Some(&pass) => resolved.push((name, pass)),
            None => return Err(PassError::UnknownPass(name.to_string())),
        }
    }

    let mut results = Vec::with_capacity(resolved.len());
    for (name, pass) in resolved {
        let result = pass(module);
        log::debug!("{}: {} changes", name, result.changes);
        results.push(result);
    }
    Ok(results)
}
