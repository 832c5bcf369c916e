pub mod mem2reg;

pub use mem2reg::promote_stack_slots;
