//! Argument descriptors, interning, and the per-module called-function
//! registry.
//!
//! Every `(function, argument-context)` pair the analysis ever talks about is
//! interned here; handle equality is semantic equality, and handle order is
//! the canonical order of every analysis set.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};

use ir::{Body, FunctionId, GlobalId, Inst, LocalId, Module, Operand, Rvalue};

/// What is known about one argument at a call site.
///
/// The set of variants is open; new facts about arguments extend it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgDescriptor {
    Unknown,
    /// The argument is the runtime symbol with this printed name.
    Symbol(Box<str>),
}

impl ArgDescriptor {
    pub fn is_symbol(&self) -> bool {
        matches!(self, ArgDescriptor::Symbol(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u32);

/// Positional per-argument descriptors specializing one call: entry `i`
/// describes argument `i`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArgContext(pub Vec<DescriptorId>);

/// One function specialized by an argument context: the unit of analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalledFn {
    pub fun: FunctionId,
    pub ctx: ContextId,
}

/// Interned handle for a [`CalledFn`]. The id order (interning order) gives
/// sets of handles a stable, canonical iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalledFnId(pub(crate) u32);

impl CalledFnId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Content-keyed intern table mapping owned values to dense ids.
#[derive(Debug)]
struct InternTable<T> {
    items: Vec<T>,
    ids: FxHashMap<T, u32>,
}

impl<T> Default for InternTable<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            ids: FxHashMap::default(),
        }
    }
}

impl<T: Clone + Eq + Hash> InternTable<T> {
    fn intern(&mut self, value: T) -> u32 {
        if let Some(&id) = self.ids.get(&value) {
            return id;
        }
        let id = self.items.len() as u32;
        self.items.push(value.clone());
        self.ids.insert(value, id);
        id
    }

    fn resolve(&self, id: u32) -> &T {
        &self.items[id as usize]
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[derive(Debug, Default)]
struct InternState {
    descriptors: InternTable<ArgDescriptor>,
    contexts: InternTable<ArgContext>,
    called: InternTable<CalledFn>,
}

/// Names of module globals that hold canonical runtime symbols.
pub type SymbolMap = FxHashMap<GlobalId, String>;

pub type FunctionSet = FxHashSet<FunctionId>;

/// Distinguished runtime entry points and globals the analysis consults.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeGlobals {
    /// The canonical null value of the managed runtime.
    pub nil_value: GlobalId,
    /// The intern-a-string-and-return-its-symbol routine.
    pub install: FunctionId,
    /// The designated collector entry point.
    pub gc: FunctionId,
}

/// Per-module registry: the external facts from upstream passes plus the
/// intern tables for descriptors, contexts, and called-function handles.
///
/// Construction eagerly visits every call site in the module, so analysis-time
/// lookups are pure intern reads. The registry is per-module; a handle is
/// never meaningful outside the registry that produced it.
pub struct CalledModule<'m> {
    module: &'m Module,
    symbols: &'m SymbolMap,
    error_functions: &'m FunctionSet,
    globals: RuntimeGlobals,
    possible_allocators: &'m FunctionSet,
    allocating_functions: &'m FunctionSet,
    intern: RefCell<InternState>,
    gc_called: CalledFnId,
}

impl<'m> CalledModule<'m> {
    pub fn new(
        module: &'m Module,
        symbols: &'m SymbolMap,
        error_functions: &'m FunctionSet,
        globals: RuntimeGlobals,
        possible_allocators: &'m FunctionSet,
        allocating_functions: &'m FunctionSet,
    ) -> Self {
        let mut cm = Self {
            module,
            symbols,
            error_functions,
            globals,
            possible_allocators,
            allocating_functions,
            intern: RefCell::new(InternState::default()),
            gc_called: CalledFnId(0),
        };

        for fun in &module.functions {
            let Some(body) = fun.body.as_ref() else {
                continue;
            };
            for block in &body.blocks {
                for inst in &block.insts {
                    if let Inst::Assign { rvalue, .. } = inst {
                        cm.from_call(body, rvalue);
                    }
                }
                if let ir::Terminator::Return { value: Some(rvalue) } = &block.terminator {
                    cm.from_call(body, rvalue);
                }
            }
        }
        cm.gc_called = cm.from_function(globals.gc);
        cm
    }

    /// The no-context handle for `f`: all argument positions unknown.
    pub fn from_function(&self, f: FunctionId) -> CalledFnId {
        let arity = self.module.function(f).arity();
        let mut tables = self.intern.borrow_mut();
        let unknown = DescriptorId(tables.descriptors.intern(ArgDescriptor::Unknown));
        let ctx = ContextId(tables.contexts.intern(ArgContext(vec![unknown; arity])));
        CalledFnId(tables.called.intern(CalledFn { fun: f, ctx }))
    }

    /// Reconstruct the specialized handle for a direct call; `None` when the
    /// rvalue is not a call.
    pub fn from_call(&self, body: &Body, rvalue: &Rvalue) -> Option<CalledFnId> {
        let Rvalue::Call { callee, args } = rvalue else {
            return None;
        };
        let mut descriptors = Vec::with_capacity(args.len());
        for arg in args {
            descriptors.push(self.describe_argument(body, arg));
        }
        let mut tables = self.intern.borrow_mut();
        let ctx = ArgContext(
            descriptors
                .into_iter()
                .map(|d| DescriptorId(tables.descriptors.intern(d)))
                .collect(),
        );
        let ctx = ContextId(tables.contexts.intern(ctx));
        Some(CalledFnId(tables.called.intern(CalledFn { fun: *callee, ctx })))
    }

    fn describe_argument(&self, body: &Body, arg: &Operand) -> ArgDescriptor {
        match arg {
            Operand::Global(g) => match self.symbols.get(g) {
                Some(name) => ArgDescriptor::Symbol(name.as_str().into()),
                None => ArgDescriptor::Unknown,
            },
            Operand::Local(slot) => {
                match install_constant_through_slot(body, *slot, self.globals.install) {
                    Some(name) => ArgDescriptor::Symbol(name.into()),
                    None => ArgDescriptor::Unknown,
                }
            }
            _ => ArgDescriptor::Unknown,
        }
    }

    pub fn module(&self) -> &'m Module {
        self.module
    }

    pub fn globals(&self) -> RuntimeGlobals {
        self.globals
    }

    /// The no-context handle of the designated collector entry point.
    pub fn gc(&self) -> CalledFnId {
        self.gc_called
    }

    pub fn is_allocating(&self, f: FunctionId) -> bool {
        self.allocating_functions.contains(&f)
    }

    pub fn is_possible_allocator(&self, f: FunctionId) -> bool {
        self.possible_allocators.contains(&f)
    }

    pub fn error_functions(&self) -> &'m FunctionSet {
        self.error_functions
    }

    pub fn possible_allocators(&self) -> &'m FunctionSet {
        self.possible_allocators
    }

    pub fn allocating_functions(&self) -> &'m FunctionSet {
        self.allocating_functions
    }

    /// Printed name of the symbol a global holds, if any.
    pub fn symbol_name(&self, g: GlobalId) -> Option<Box<str>> {
        self.symbols.get(&g).map(|name| name.as_str().into())
    }

    pub fn called_fn(&self, id: CalledFnId) -> CalledFn {
        *self.intern.borrow().called.resolve(id.0)
    }

    pub fn context(&self, id: ContextId) -> ArgContext {
        self.intern.borrow().contexts.resolve(id.0).clone()
    }

    pub fn descriptor(&self, id: DescriptorId) -> ArgDescriptor {
        self.intern.borrow().descriptors.resolve(id.0).clone()
    }

    /// Symbol name of argument `index` under context `ctx`, if known.
    pub fn context_symbol(&self, ctx: ContextId, index: usize) -> Option<Box<str>> {
        let tables = self.intern.borrow();
        let context = tables.contexts.resolve(ctx.0);
        let did = context.0.get(index)?;
        match tables.descriptors.resolve(did.0) {
            ArgDescriptor::Symbol(name) => Some(name.clone()),
            ArgDescriptor::Unknown => None,
        }
    }

    /// Snapshot of every handle interned so far, in id order.
    pub fn called_fns(&self) -> Vec<CalledFnId> {
        (0..self.intern.borrow().called.len() as u32)
            .map(CalledFnId)
            .collect()
    }

    /// Context-decorated display name: `name(S:sym,?)`, with the suffix
    /// present only when at least one argument is a known symbol.
    pub fn display_name(&self, id: CalledFnId) -> String {
        let tables = self.intern.borrow();
        let cf = *tables.called.resolve(id.0);
        let mut res = self.module.function(cf.fun).name.clone();

        let context = tables.contexts.resolve(cf.ctx.0);
        let mut suffix = String::new();
        let mut known = 0;
        for (i, did) in context.0.iter().enumerate() {
            if i > 0 {
                suffix.push(',');
            }
            match tables.descriptors.resolve(did.0) {
                ArgDescriptor::Symbol(name) => {
                    let _ = write!(suffix, "S:{name}");
                    known += 1;
                }
                ArgDescriptor::Unknown => suffix.push('?'),
            }
        }
        if known > 0 {
            let _ = write!(res, "({suffix})");
        }
        res
    }
}

/// Match the intern-a-constant-string idiom: a direct call to the runtime's
/// install routine with a single string-literal argument.
pub fn install_constant(rvalue: &Rvalue, install: FunctionId) -> Option<&str> {
    if let Rvalue::Call { callee, args } = rvalue
        && *callee == install
        && let [Operand::Str(name)] = args.as_slice()
    {
        return Some(&**name);
    }
    None
}

/// The slot-indirected form of the install idiom: a slot whose single static
/// assignment in the body is an install-constant call.
fn install_constant_through_slot(
    body: &Body,
    slot: LocalId,
    install: FunctionId,
) -> Option<&str> {
    let mut found = None;
    let mut stores = 0usize;
    for block in &body.blocks {
        for inst in &block.insts {
            if let Inst::Assign {
                dst: Some(dst),
                rvalue,
            } = inst
                && *dst == slot
            {
                stores += 1;
                found = install_constant(rvalue, install);
            }
        }
    }
    if stores == 1 { found } else { None }
}
