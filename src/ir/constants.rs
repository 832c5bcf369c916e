//! IR constants: compile-time numeric literals.

use crate::common::types::IrType;

/// A compile-time constant value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IrConst {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl IrConst {
    /// The zero value of the given type. Pointer-typed slots read before any
    /// store observe a null pointer, represented as I64(0).
    pub fn zero(ty: IrType) -> IrConst {
        match ty {
            IrType::I8 | IrType::U8 => IrConst::I8(0),
            IrType::I16 | IrType::U16 => IrConst::I16(0),
            IrType::I32 | IrType::U32 => IrConst::I32(0),
            IrType::F32 => IrConst::F32(0.0),
            IrType::F64 => IrConst::F64(0.0),
            _ => IrConst::I64(0),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            IrConst::I8(v) => *v == 0,
            IrConst::I16(v) => *v == 0,
            IrConst::I32(v) => *v == 0,
            IrConst::I64(v) => *v == 0,
            IrConst::F32(v) => *v == 0.0,
            IrConst::F64(v) => *v == 0.0,
        }
    }
}

impl std::fmt::Display for IrConst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IrConst::I8(v) => write!(f, "{}", v),
            IrConst::I16(v) => write!(f, "{}", v),
            IrConst::I32(v) => write!(f, "{}", v),
            IrConst::I64(v) => write!(f, "{}", v),
            IrConst::F32(v) => write!(f, "{}", v),
            IrConst::F64(v) => write!(f, "{}", v),
        }
    }
}
