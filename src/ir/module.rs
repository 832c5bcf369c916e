//! Module-level IR containers: functions and parameters.

use crate::common::types::IrType;
use super::instruction::{BasicBlock, BlockId, Value};

/// A function parameter. Parameters are values with no defining instruction.
#[derive(Debug, Clone)]
pub struct IrParam {
    pub name: String,
    pub ty: IrType,
    pub value: Value,
}

/// A single function: named, with typed parameters and a list of basic
/// blocks. The first block is the entry block and must have no predecessors.
#[derive(Debug, Clone)]
pub struct IrFunction {
    pub name: String,
    pub return_type: IrType,
    pub params: Vec<IrParam>,
    pub blocks: Vec<BasicBlock>,
    /// Declared but not defined in this module (no body).
    pub is_declaration: bool,
    /// Opted out of all transformations.
    pub optnone: bool,
    /// Next unused value id. Passes that mint values bump this.
    pub next_value_id: u32,
}

impl IrFunction {
    pub fn new(name: &str, return_type: IrType, params: Vec<IrParam>) -> Self {
        let next_value_id = params.iter().map(|p| p.value.0 + 1).max().unwrap_or(0);
        IrFunction {
            name: name.to_string(),
            return_type,
            params,
            blocks: Vec::new(),
            is_declaration: false,
            optnone: false,
            next_value_id,
        }
    }

    /// Allocate a fresh value id.
    pub fn new_value(&mut self) -> Value {
        let v = Value(self.next_value_id);
        self.next_value_id += 1;
        v
    }

    pub fn block_index(&self, label: BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    /// Highest block id in use, or None for a body-less function.
    pub fn max_block_id(&self) -> Option<u32> {
        self.blocks.iter().map(|b| b.label.0).max()
    }

    /// Highest value id in use across parameters, definitions, and uses.
    pub fn max_value_id(&self) -> u32 {
        let mut max = 0u32;
        let mut see = |v: Value| max = max.max(v.0);
        for p in &self.params {
            see(p.value);
        }
        for block in &self.blocks {
            for inst in &block.instructions {
                if let Some(d) = inst.dest() {
                    see(d);
                }
                inst.for_each_used_value(&mut see);
            }
            block.terminator.for_each_used_value(&mut see);
        }
        max
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }

    pub fn is_param_value(&self, v: Value) -> bool {
        self.params.iter().any(|p| p.value == v)
    }
}

impl Default for IrFunction {
    fn default() -> Self {
        let mut f = IrFunction::new("", IrType::Void, Vec::new());
        f.is_declaration = true;
        f
    }
}

/// A whole translation unit.
#[derive(Debug, Clone, Default)]
pub struct IrModule {
    pub functions: Vec<IrFunction>,
}

impl IrModule {
    pub fn new() -> Self {
        IrModule::default()
    }

    pub fn find_function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}
