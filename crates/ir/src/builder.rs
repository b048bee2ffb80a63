//! Programmatic construction of modules and bodies, used by the loader and
//! by tests.

use rustc_hash::FxHashMap;

use crate::body::{
    BasicBlock, BasicBlockId, Body, Cmp, Inst, LocalData, LocalId, Operand, Rvalue, Terminator,
};
use crate::module::{FunctionData, FunctionId, GlobalData, GlobalId, Module, Param, Ty};

#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
    function_names: FxHashMap<String, FunctionId>,
    global_names: FxHashMap<String, GlobalId>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a function without a body; `define` attaches one later.
    pub fn declare_function(&mut self, name: &str, params: Vec<Param>, ret: Ty) -> FunctionId {
        let id = self.module.push_function(FunctionData {
            name: name.to_string(),
            params,
            ret,
            body: None,
        });
        self.function_names.insert(name.to_string(), id);
        id
    }

    pub fn declare_global(&mut self, name: &str, ty: Ty) -> GlobalId {
        let id = self.module.push_global(GlobalData {
            name: name.to_string(),
            ty,
        });
        self.global_names.insert(name.to_string(), id);
        id
    }

    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.function_names.get(name).copied()
    }

    pub fn global_by_name(&self, name: &str) -> Option<GlobalId> {
        self.global_names.get(name).copied()
    }

    /// Attach a fresh body (with its entry block) to `id` and return a
    /// builder positioned at the entry.
    pub fn define(&mut self, id: FunctionId) -> FunctionBuilder<'_> {
        let mut body = Body::new();
        let entry = body.push_block(BasicBlock::new());
        let fun = self.module.function_mut(id);
        fun.body = Some(body);
        FunctionBuilder {
            body: fun.body.as_mut().expect("body was just attached"),
            current: entry,
        }
    }

    pub fn build(self) -> Module {
        self.module
    }
}

/// Cursor-style builder over one function body.
#[derive(Debug)]
pub struct FunctionBuilder<'a> {
    body: &'a mut Body,
    current: BasicBlockId,
}

impl FunctionBuilder<'_> {
    pub fn local(&mut self, name: &str, ty: Ty) -> LocalId {
        self.body.alloc_local(LocalData {
            name: name.to_string(),
            ty,
        })
    }

    /// Append a new empty block (does not move the cursor).
    pub fn block(&mut self) -> BasicBlockId {
        self.body.push_block(BasicBlock::new())
    }

    pub fn switch_to(&mut self, block: BasicBlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> BasicBlockId {
        self.current
    }

    pub fn assign(&mut self, dst: LocalId, rvalue: Rvalue) {
        self.push(Inst::Assign {
            dst: Some(dst),
            rvalue,
        });
    }

    pub fn call(&mut self, dst: Option<LocalId>, callee: FunctionId, args: Vec<Operand>) {
        self.push(Inst::Assign {
            dst,
            rvalue: Rvalue::Call { callee, args },
        });
    }

    pub fn store_indirect(&mut self, addr: Operand, value: Operand) {
        self.push(Inst::StoreIndirect { addr, value });
    }

    pub fn ret(&mut self, value: Option<Rvalue>) {
        self.terminate(Terminator::Return { value });
    }

    pub fn goto(&mut self, target: BasicBlockId) {
        self.terminate(Terminator::Goto { target });
    }

    pub fn branch(&mut self, cond: Cmp, then_bb: BasicBlockId, else_bb: BasicBlockId) {
        self.terminate(Terminator::Branch {
            cond,
            then_bb,
            else_bb,
        });
    }

    fn push(&mut self, inst: Inst) {
        self.body.block_mut(self.current).push_inst(inst);
    }

    fn terminate(&mut self, term: Terminator) {
        self.body.block_mut(self.current).set_terminator(term);
    }
}
