//! End-to-end scenarios for the allocator analysis, built against a small
//! synthetic runtime: a null global, a symbol global, an install routine, a
//! collector entry point, two allocators, and a no-return error function.

use analysis::{
    CallSet, CalledFnId, CalledModule, FunctionSet, Messenger, RuntimeGlobals, SymbolMap,
    analyze_module, called_and_wrapped, write_report,
};
use ir::{Cmp, CmpOp, FunctionId, GlobalId, Module, ModuleBuilder, Operand, Param, Rvalue, Ty};

struct Runtime {
    mb: ModuleBuilder,
    nil: GlobalId,
    sym_dim: GlobalId,
    install: FunctionId,
    gc: FunctionId,
    alloc_node: FunctionId,
    alloc_list: FunctionId,
    fail: FunctionId,
}

impl Runtime {
    fn new() -> Self {
        let mut mb = ModuleBuilder::new();
        let nil = mb.declare_global("runtime_nil", Ty::Managed);
        let sym_dim = mb.declare_global("sym_dim", Ty::Managed);
        let install = mb.declare_function(
            "install",
            vec![Param {
                name: "name".to_string(),
                ty: Ty::Str,
            }],
            Ty::Managed,
        );
        let gc = mb.declare_function("collect_garbage", vec![], Ty::Void);
        let alloc_node = mb.declare_function("alloc_node", vec![], Ty::Managed);
        let alloc_list = mb.declare_function("alloc_list", vec![], Ty::Managed);
        let fail = mb.declare_function("fatal_error", vec![], Ty::Void);
        Runtime {
            mb,
            nil,
            sym_dim,
            install,
            gc,
            alloc_node,
            alloc_list,
            fail,
        }
    }

    fn finish(self) -> Built {
        let mut symbols = SymbolMap::default();
        symbols.insert(self.sym_dim, "dim".to_string());
        let mut errors = FunctionSet::default();
        errors.insert(self.fail);
        let mut possible = FunctionSet::default();
        possible.insert(self.alloc_node);
        possible.insert(self.alloc_list);
        let mut allocating = FunctionSet::default();
        allocating.insert(self.alloc_node);
        allocating.insert(self.alloc_list);
        allocating.insert(self.gc);
        Built {
            module: self.mb.build(),
            symbols,
            errors,
            possible,
            allocating,
            globals: RuntimeGlobals {
                nil_value: self.nil,
                install: self.install,
                gc: self.gc,
            },
        }
    }
}

struct Built {
    module: Module,
    symbols: SymbolMap,
    errors: FunctionSet,
    possible: FunctionSet,
    allocating: FunctionSet,
    globals: RuntimeGlobals,
}

impl Built {
    fn cm(&self) -> CalledModule<'_> {
        CalledModule::new(
            &self.module,
            &self.symbols,
            &self.errors,
            self.globals,
            &self.possible,
            &self.allocating,
        )
    }
}

fn quiet() -> Messenger<Vec<u8>> {
    Messenger::new(Vec::new(), false, false, true)
}

fn names(cm: &CalledModule<'_>, set: &CallSet) -> Vec<String> {
    let mut names: Vec<_> = set.iter().map(|&id| cm.display_name(id)).collect();
    names.sort();
    names
}

fn handle_named(cm: &CalledModule<'_>, name: &str) -> CalledFnId {
    cm.called_fns()
        .into_iter()
        .find(|&id| cm.display_name(id) == name)
        .unwrap_or_else(|| panic!("no interned handle named {name}"))
}

#[test]
fn declared_but_undefined_function_yields_empty_sets() {
    let mut rt = Runtime::new();
    let stub = rt.mb.declare_function("stub", vec![], Ty::Managed);
    let built = rt.finish();
    let cm = built.cm();

    let mut msg = Messenger::new(Vec::new(), true, true, true);
    let summary = called_and_wrapped(&cm, cm.from_function(stub), &mut msg);
    assert!(summary.called.is_empty());
    assert!(summary.wrapped.is_empty());
    assert!(msg.sink().is_empty(), "no diagnostics for an empty body");
}

#[test]
fn direct_allocator_call_is_called_and_wrapped() {
    let mut rt = Runtime::new();
    let f = rt.mb.declare_function("wrap_alloc", vec![], Ty::Managed);
    {
        let alloc_node = rt.alloc_node;
        let mut fb = rt.mb.define(f);
        let x = fb.local("x", Ty::Managed);
        fb.call(Some(x), alloc_node, vec![]);
        // a write the analysis does not model must not disturb the result
        fb.store_indirect(Operand::Local(x), Operand::Int(1));
        fb.ret(Some(Rvalue::Use(Operand::Local(x))));
    }
    let built = rt.finish();
    let cm = built.cm();

    let summary = called_and_wrapped(&cm, cm.from_function(f), &mut quiet());
    assert_eq!(names(&cm, &summary.called), vec!["alloc_node"]);
    assert_eq!(names(&cm, &summary.wrapped), vec!["alloc_node"]);
}

#[test]
fn origins_propagate_through_slot_copies() {
    let mut rt = Runtime::new();
    let f = rt.mb.declare_function("wrap_alloc_via_copy", vec![], Ty::Managed);
    {
        let alloc_node = rt.alloc_node;
        let mut fb = rt.mb.define(f);
        let x = fb.local("x", Ty::Managed);
        let y = fb.local("y", Ty::Managed);
        fb.call(Some(y), alloc_node, vec![]);
        fb.assign(x, Rvalue::Use(Operand::Local(y)));
        fb.ret(Some(Rvalue::Use(Operand::Local(x))));
    }
    let built = rt.finish();
    let cm = built.cm();

    let summary = called_and_wrapped(&cm, cm.from_function(f), &mut quiet());
    assert_eq!(names(&cm, &summary.called), vec!["alloc_node"]);
    assert_eq!(names(&cm, &summary.wrapped), vec!["alloc_node"]);
}

#[test]
fn managed_returning_function_calling_the_collector_wraps_it() {
    let mut rt = Runtime::new();
    let f = rt.mb.declare_function("touch_heap", vec![], Ty::Managed);
    {
        let (gc, nil) = (rt.gc, rt.nil);
        let mut fb = rt.mb.define(f);
        let r = fb.local("r", Ty::Managed);
        fb.assign(r, Rvalue::Use(Operand::Global(nil)));
        fb.call(None, gc, vec![]);
        fb.ret(Some(Rvalue::Use(Operand::Local(r))));
    }
    let built = rt.finish();
    let cm = built.cm();

    let summary = called_and_wrapped(&cm, cm.from_function(f), &mut quiet());
    assert_eq!(names(&cm, &summary.called), vec!["collect_garbage"]);
    assert_eq!(names(&cm, &summary.wrapped), vec!["collect_garbage"]);
}

#[test]
fn guarded_branch_collects_both_arms() {
    let mut rt = Runtime::new();
    let f = rt.mb.declare_function("pick_alloc", vec![], Ty::Managed);
    {
        let (alloc_node, alloc_list) = (rt.alloc_node, rt.alloc_list);
        let mut fb = rt.mb.define(f);
        let g = fb.local("g", Ty::Int);
        let then_bb = fb.block();
        let else_bb = fb.block();
        fb.branch(
            Cmp {
                op: CmpOp::Eq,
                lhs: g,
                rhs: Operand::Int(0),
            },
            then_bb,
            else_bb,
        );
        fb.switch_to(then_bb);
        fb.ret(Some(Rvalue::Call {
            callee: alloc_node,
            args: vec![],
        }));
        fb.switch_to(else_bb);
        fb.ret(Some(Rvalue::Call {
            callee: alloc_list,
            args: vec![],
        }));
    }
    let built = rt.finish();
    let cm = built.cm();

    let summary = called_and_wrapped(&cm, cm.from_function(f), &mut quiet());
    assert_eq!(names(&cm, &summary.called), vec!["alloc_list", "alloc_node"]);
    assert_eq!(names(&cm, &summary.wrapped), vec!["alloc_list", "alloc_node"]);
}

#[test]
fn error_paths_are_ignored() {
    let mut rt = Runtime::new();
    let f = rt.mb.declare_function("alloc_or_die", vec![], Ty::Managed);
    {
        let (alloc_node, fail, nil) = (rt.alloc_node, rt.fail, rt.nil);
        let mut fb = rt.mb.define(f);
        let g = fb.local("g", Ty::Int);
        let r = fb.local("r", Ty::Managed);
        fb.assign(r, Rvalue::Use(Operand::Global(nil)));
        let die_bb = fb.block();
        let ok_bb = fb.block();
        fb.branch(
            Cmp {
                op: CmpOp::Eq,
                lhs: g,
                rhs: Operand::Int(0),
            },
            die_bb,
            ok_bb,
        );
        // the error arm allocates, then never returns
        fb.switch_to(die_bb);
        fb.call(Some(r), alloc_node, vec![]);
        fb.call(None, fail, vec![]);
        fb.ret(Some(Rvalue::Use(Operand::Local(r))));
        fb.switch_to(ok_bb);
        fb.ret(Some(Rvalue::Use(Operand::Local(r))));
    }
    let built = rt.finish();
    let cm = built.cm();

    let summary = called_and_wrapped(&cm, cm.from_function(f), &mut quiet());
    assert!(
        summary.called.is_empty(),
        "allocations on provably-erroring paths are not collected"
    );
    assert!(summary.wrapped.is_empty());
}

#[test]
fn narrower_cfg_yields_a_subset() {
    // same arms as `guarded_branch_collects_both_arms`, minus one edge
    let mut rt = Runtime::new();
    let f = rt.mb.declare_function("pick_alloc", vec![], Ty::Managed);
    {
        let alloc_node = rt.alloc_node;
        let mut fb = rt.mb.define(f);
        let then_bb = fb.block();
        fb.goto(then_bb);
        fb.switch_to(then_bb);
        fb.ret(Some(Rvalue::Call {
            callee: alloc_node,
            args: vec![],
        }));
    }
    let built = rt.finish();
    let cm = built.cm();

    let summary = called_and_wrapped(&cm, cm.from_function(f), &mut quiet());
    assert_eq!(names(&cm, &summary.called), vec!["alloc_node"]);
    assert_eq!(names(&cm, &summary.wrapped), vec!["alloc_node"]);
}

#[test]
fn symbol_context_specializes_the_result() {
    let mut rt = Runtime::new();
    let wrap_sym = rt.mb.declare_function(
        "wrap_sym",
        vec![Param {
            name: "a".to_string(),
            ty: Ty::Managed,
        }],
        Ty::Managed,
    );
    {
        let (alloc_node, nil) = (rt.alloc_node, rt.nil);
        let mut fb = rt.mb.define(wrap_sym);
        let pa = fb.local("pa", Ty::Managed);
        fb.assign(pa, Rvalue::Use(Operand::Arg(0)));
        let null_bb = fb.block();
        let sym_bb = fb.block();
        fb.branch(
            Cmp {
                op: CmpOp::Eq,
                lhs: pa,
                rhs: Operand::Global(nil),
            },
            null_bb,
            sym_bb,
        );
        fb.switch_to(null_bb);
        fb.ret(Some(Rvalue::Call {
            callee: alloc_node,
            args: vec![],
        }));
        fb.switch_to(sym_bb);
        fb.ret(Some(Rvalue::Use(Operand::Local(pa))));
    }
    // a call site passing a known symbol interns the specialized handle
    let caller = rt.mb.declare_function("caller", vec![], Ty::Void);
    {
        let sym_dim = rt.sym_dim;
        let mut fb = rt.mb.define(caller);
        fb.call(None, wrap_sym, vec![Operand::Global(sym_dim)]);
        fb.ret(None);
    }
    let built = rt.finish();
    let cm = built.cm();

    let general = called_and_wrapped(&cm, cm.from_function(wrap_sym), &mut quiet());
    assert_eq!(names(&cm, &general.called), vec!["alloc_node"]);
    assert_eq!(names(&cm, &general.wrapped), vec!["alloc_node"]);

    let specialized =
        called_and_wrapped(&cm, handle_named(&cm, "wrap_sym(S:dim)"), &mut quiet());
    assert!(
        specialized.called.is_empty(),
        "a symbol argument cannot be null, so the allocating arm is dead"
    );
    assert!(specialized.wrapped.is_empty());
    assert!(specialized.called.is_subset(&general.called));
    assert!(specialized.wrapped.is_subset(&general.wrapped));
}

#[test]
fn analysis_is_idempotent() {
    let mut rt = Runtime::new();
    let f = rt.mb.declare_function("pick_alloc", vec![], Ty::Managed);
    {
        let (alloc_node, alloc_list) = (rt.alloc_node, rt.alloc_list);
        let mut fb = rt.mb.define(f);
        let g = fb.local("g", Ty::Int);
        let then_bb = fb.block();
        let else_bb = fb.block();
        fb.branch(
            Cmp {
                op: CmpOp::Eq,
                lhs: g,
                rhs: Operand::Int(0),
            },
            then_bb,
            else_bb,
        );
        fb.switch_to(then_bb);
        fb.ret(Some(Rvalue::Call {
            callee: alloc_node,
            args: vec![],
        }));
        fb.switch_to(else_bb);
        fb.ret(Some(Rvalue::Call {
            callee: alloc_list,
            args: vec![],
        }));
    }
    let built = rt.finish();
    let cm = built.cm();
    cm.from_function(f);

    let first = analyze_module(&cm, &mut quiet());
    let second = analyze_module(&cm, &mut quiet());
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn report_frames_called_and_wrapped_sections() {
    let mut rt = Runtime::new();
    let f = rt.mb.declare_function("wrap_alloc", vec![], Ty::Managed);
    {
        let alloc_node = rt.alloc_node;
        let mut fb = rt.mb.define(f);
        let x = fb.local("x", Ty::Managed);
        fb.call(Some(x), alloc_node, vec![]);
        fb.ret(Some(Rvalue::Use(Operand::Local(x))));
    }
    let built = rt.finish();
    let cm = built.cm();
    cm.from_function(f);

    let summaries = analyze_module(&cm, &mut quiet());
    let mut out = Vec::new();
    write_report(&cm, &summaries, &mut out).unwrap();
    let report = String::from_utf8(out).unwrap();
    assert!(report.contains("Detected (possible allocators) called by function wrap_alloc:"));
    assert!(report.contains("Detected (possible allocators) wrapped by function wrap_alloc:"));
    assert!(report.contains("\n   alloc_node\n"));
}
