//! The worklist engine: forward exploration of one function's CFG under one
//! argument context, harvesting called and wrapped allocators at each return,
//! plus the module driver and report writer.

use std::collections::BTreeMap;
use std::io::{self, Write};

use ir::{BasicBlockId, Inst, Operand, Rvalue, Terminator};

use crate::callables::{CalledFnId, CalledModule};
use crate::guards::{self, GuardVarCache};
use crate::messenger::Messenger;
use crate::scan::{find_error_basic_blocks, find_possibly_returned_vars};
use crate::state::{AllocState, CallSet, StateSpace};

/// Emit per-step debug commentary.
pub const DEBUG: bool = false;
/// Emit per-instruction trace commentary.
pub const TRACE: bool = false;
/// Suppress repeated identical diagnostic lines within one function.
pub const UNIQUE_MSG: bool = true;
/// Hard cap on distinct states explored per function.
pub const MAX_STATES: usize = 1_000_000;
/// Include guard maps and origin sets in state dumps.
pub const VERBOSE_DUMP: bool = false;
/// Dump every state popped off the worklist.
pub const DUMP_STATES: bool = false;
/// When non-empty, restrict `DUMP_STATES` to this function.
pub const DUMP_STATES_FUNCTION: &str = "";
/// When non-empty, restrict the analysis to this function.
pub const ONLY_FUNCTION: &str = "";

/// Per-(function, context) analysis result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSummary {
    /// Allocators invoked on some path from entry to a return.
    pub called: CallSet,
    /// Allocators whose freshly allocated result may itself be returned.
    pub wrapped: CallSet,
}

/// Walk one function under one argument context. Returns empty sets for
/// declared-but-undefined functions; on state exhaustion the partial result
/// accumulated so far is returned after one `error` diagnostic.
pub fn called_and_wrapped<W: Write>(
    cm: &CalledModule<'_>,
    f: CalledFnId,
    msg: &mut Messenger<W>,
) -> FunctionSummary {
    walk_function(cm, f, msg, MAX_STATES)
}

fn walk_function<W: Write>(
    cm: &CalledModule<'_>,
    f: CalledFnId,
    msg: &mut Messenger<W>,
    max_states: usize,
) -> FunctionSummary {
    let mut summary = FunctionSummary::default();
    let cf = cm.called_fn(f);
    let fun = cm.module().function(cf.fun);
    let Some(body) = fun.body.as_ref() else {
        return summary;
    };
    if body.blocks.is_empty() {
        return summary;
    }

    let mut cache = GuardVarCache::default();
    let error_blocks = find_error_basic_blocks(body, cm.error_functions());
    let returned_vars = find_possibly_returned_vars(body);
    let track_origins = fun.ret.is_managed();

    msg.new_function(cm.display_name(f));

    let mut space = StateSpace::new();
    space.admit(AllocState::entry(body.entry));

    while let Some(mut s) = space.pop() {
        if DUMP_STATES && (DUMP_STATES_FUNCTION.is_empty() || DUMP_STATES_FUNCTION == fun.name) {
            msg.trace("working on state", &at(s.block));
            s.dump(msg, VERBOSE_DUMP);
        }
        if error_blocks.contains(&s.block) {
            msg.debug("ignoring basic block on error path", &at(s.block));
            continue;
        }
        if space.explored() > max_states {
            msg.error("too many states (abstraction error?)", &at(s.block));
            return summary;
        }

        let block = body.block(s.block);
        for inst in &block.insts {
            msg.trace("visiting", &at(s.block));

            guards::apply_int_guards(body, &mut cache, &mut s.int_guards, inst);
            guards::apply_managed_guards(cm, body, cf.ctx, &mut s.managed_guards, inst);

            let call_target = match inst {
                Inst::Assign { rvalue, .. } => cm.from_call(body, rvalue),
                Inst::StoreIndirect { .. } => None,
            };
            let allocating_call =
                call_target.filter(|&tgt| cm.is_allocating(cm.called_fn(tgt).fun));
            if let Some(tgt) = allocating_call {
                if msg.debug_enabled() {
                    msg.debug(
                        &format!("recording call to {}", cm.display_name(tgt)),
                        &at(s.block),
                    );
                }
                s.called.insert(tgt);
            }

            if track_origins
                && let Inst::Assign {
                    dst: Some(dst),
                    rvalue,
                } = inst
                && returned_vars.contains(dst)
            {
                if let Rvalue::Use(Operand::Local(src)) = rvalue {
                    // copy: the source slot's origins flow into dst
                    if let Some(srcs) = s.var_origins.get(src).cloned() {
                        s.add_origins(*dst, srcs);
                    }
                } else if let Some(tgt) = allocating_call {
                    if msg.debug_enabled() {
                        msg.debug(
                            &format!(
                                "adding origin {} of {}",
                                cm.display_name(tgt),
                                body.local(*dst).name
                            ),
                            &at(s.block),
                        );
                    }
                    s.add_origins(*dst, [tgt]);
                }
            }
        }

        match &block.terminator {
            Terminator::Return { value } => {
                // a call in return position executes on this path too
                let ret_call = value.as_ref().and_then(|rvalue| cm.from_call(body, rvalue));
                if let Some(tgt) = ret_call
                    && cm.is_allocating(cm.called_fn(tgt).fun)
                {
                    s.called.insert(tgt);
                }
                msg.debug(
                    &format!("collecting {} calls at function return", s.called.len()),
                    &at(s.block),
                );
                summary.called.extend(s.called.iter().copied());

                if track_origins {
                    if summary.called.contains(&cm.gc()) {
                        // a managed-returning function that reaches the
                        // collector is treated as wrapping it
                        summary.wrapped.insert(cm.gc());
                    }
                    if let Some(Rvalue::Use(Operand::Local(src))) = value
                        && let Some(origins) = s.var_origins.get(src)
                    {
                        summary.wrapped.extend(origins.iter().copied());
                    }
                    if let Some(tgt) = ret_call
                        && cm.is_possible_allocator(cm.called_fn(tgt).fun)
                    {
                        summary.wrapped.insert(tgt);
                    }
                }
            }
            term @ Terminator::Branch { .. } => {
                // guard interpreters get first chance to narrow each edge
                if !guards::branch_managed_guards(cm, body, &s, &mut space, msg)
                    && !guards::branch_int_guards(body, &mut cache, &s, &mut space, msg)
                {
                    for succ in term.successors() {
                        if space.admit(s.clone_to(succ)) {
                            msg.trace("added successor", &at(succ));
                        }
                    }
                }
            }
            term => {
                for succ in term.successors() {
                    if space.admit(s.clone_to(succ)) {
                        msg.trace("added successor", &at(succ));
                    }
                }
            }
        }
    }
    summary
}

/// Analyze every called-function in the registry with a defined body,
/// returning summaries keyed by handle in canonical order.
pub fn analyze_module<W: Write>(
    cm: &CalledModule<'_>,
    msg: &mut Messenger<W>,
) -> BTreeMap<CalledFnId, FunctionSummary> {
    let mut summaries = BTreeMap::new();
    for f in cm.called_fns() {
        let cf = cm.called_fn(f);
        let fun = cm.module().function(cf.fun);
        if fun.body.as_ref().is_none_or(|body| body.blocks.is_empty()) {
            continue;
        }
        if !ONLY_FUNCTION.is_empty() && fun.name != ONLY_FUNCTION {
            continue;
        }
        tracing::debug!(target: "allocators", function = %cm.display_name(f), "analyzing called function");
        summaries.insert(f, called_and_wrapped(cm, f, msg));
    }
    summaries
}

/// Emit the per-function report of detected allocators.
pub fn write_report<W: Write>(
    cm: &CalledModule<'_>,
    summaries: &BTreeMap<CalledFnId, FunctionSummary>,
    out: &mut W,
) -> io::Result<()> {
    for (&f, summary) in summaries {
        if !summary.called.is_empty() {
            writeln!(out)?;
            writeln!(
                out,
                "Detected (possible allocators) called by function {}:",
                cm.display_name(f)
            )?;
            for &called in &summary.called {
                writeln!(out, "   {}", cm.display_name(called))?;
            }
        }
        if !summary.wrapped.is_empty() {
            writeln!(out)?;
            writeln!(
                out,
                "Detected (possible allocators) wrapped by function {}:",
                cm.display_name(f)
            )?;
            for &wrapped in &summary.wrapped {
                writeln!(out, "   {}", cm.display_name(wrapped))?;
            }
        }
    }
    Ok(())
}

/// Drive the analysis over the whole registry and write the report, with
/// diagnostics on stderr.
pub fn report_called_allocators<W: Write>(
    cm: &CalledModule<'_>,
    out: &mut W,
) -> io::Result<()> {
    let mut msg = Messenger::stderr(DEBUG, TRACE, UNIQUE_MSG);
    let summaries = analyze_module(cm, &mut msg);
    write_report(cm, &summaries, out)
}

fn at(block: BasicBlockId) -> String {
    format!("b{}", block.0)
}
