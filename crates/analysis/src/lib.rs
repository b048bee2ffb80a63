//! Context-sensitive detection of called and wrapped managed-value
//! allocators.
//!
//! Given a [`Module`](ir::Module) and the facts upstream passes provide
//! (functions that never return, functions that may allocate, functions that
//! may return a fresh allocation, globals holding canonical runtime symbols),
//! this crate computes for every called function, specialized by what is
//! known about its arguments at each call site, the set of allocators it may
//! *call* and the set it may *wrap* (return the result of).
//!
//! The core is a worklist-based abstract interpreter over each function's
//! CFG. The symbolic state tracks integer and managed-value guards, the
//! allocating calls accumulated on the path, and per-slot origin sets;
//! content-addressed deduplication of states makes the exploration converge.
//! Transitive closure over the per-function summaries is left to callers.

mod allocators;
mod callables;
mod guards;
mod messenger;
mod scan;
mod state;

pub use allocators::{
    DEBUG, DUMP_STATES, DUMP_STATES_FUNCTION, FunctionSummary, MAX_STATES, ONLY_FUNCTION, TRACE,
    UNIQUE_MSG, VERBOSE_DUMP, analyze_module, called_and_wrapped, report_called_allocators,
    write_report,
};
pub use callables::{
    ArgContext, ArgDescriptor, CalledFn, CalledFnId, CalledModule, ContextId, DescriptorId,
    FunctionSet, RuntimeGlobals, SymbolMap, install_constant,
};
pub use guards::{
    GuardVarCache, IntGuardState, IntGuards, ManagedGuard, ManagedGuards, apply_int_guards,
    apply_managed_guards, branch_int_guards, branch_managed_guards,
};
pub use messenger::Messenger;
pub use scan::{BlockSet, find_error_basic_blocks, find_possibly_returned_vars};
pub use state::{AllocState, CallSet, StateSpace};
