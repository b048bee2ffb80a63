//! IR data model consumed by the gclint allocator analysis.
//!
//! The (external) loader produces one [`Module`] per compiled translation
//! unit: functions with named local storage slots, block-structured control
//! flow, and flat operands. There is no SSA form; values move through locals
//! via explicit [`Inst::Assign`] stores, the way the compiled C sources
//! present them.

mod body;
mod builder;
mod module;

pub use body::{
    BasicBlock, BasicBlockId, Body, Cmp, CmpOp, Inst, LocalData, LocalId, Operand, Rvalue,
    Terminator,
};
pub use builder::{FunctionBuilder, ModuleBuilder};
pub use module::{FunctionData, FunctionId, GlobalData, GlobalId, Module, Param, Ty};
