//! Guard interpreters: abstract values for integer and managed-value guard
//! slots, folded over straight-line instructions, and branch narrowing at
//! terminators.
//!
//! The terminator forms may consume a branch entirely: they enqueue one
//! tailored successor state per feasible edge and tell the engine not to add
//! its own.

use std::collections::BTreeMap;
use std::io::Write;

use rustc_hash::FxHashMap;

use ir::{BasicBlockId, Body, CmpOp, Inst, LocalId, Operand, Rvalue, Terminator, Ty};

use crate::callables::{CalledModule, ContextId, install_constant};
use crate::messenger::Messenger;
use crate::state::{AllocState, StateSpace};

/// Abstract value of an integer guard slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntGuardState {
    Unknown,
    Zero,
    NonZero,
}

/// Abstract value of a managed-value guard slot. The symbol name is carried
/// only in the `Symbol` state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ManagedGuard {
    Unknown,
    Null,
    NonNull,
    /// The slot holds the runtime symbol with this printed name.
    Symbol(Box<str>),
}

pub type IntGuards = BTreeMap<LocalId, IntGuardState>;
pub type ManagedGuards = BTreeMap<LocalId, ManagedGuard>;

/// Memoized classification of slots used as branch guards, scoped to one
/// function walk.
#[derive(Debug, Default)]
pub struct GuardVarCache {
    int_guards: FxHashMap<LocalId, bool>,
}

impl GuardVarCache {
    /// An int-typed slot qualifies as a guard when some branch in the body
    /// compares it.
    fn is_int_guard(&mut self, body: &Body, slot: LocalId) -> bool {
        if let Some(&cached) = self.int_guards.get(&slot) {
            return cached;
        }
        let guard = body.local(slot).ty == Ty::Int
            && body.blocks.iter().any(|block| {
                matches!(&block.terminator, Terminator::Branch { cond, .. } if cond.lhs == slot)
            });
        self.int_guards.insert(slot, guard);
        guard
    }
}

/// Fold one instruction's effect into the integer guard map.
pub fn apply_int_guards(
    body: &Body,
    cache: &mut GuardVarCache,
    guards: &mut IntGuards,
    inst: &Inst,
) {
    let Inst::Assign {
        dst: Some(dst),
        rvalue,
    } = inst
    else {
        return;
    };
    if !cache.is_int_guard(body, *dst) {
        return;
    }
    let next = match rvalue {
        Rvalue::Use(Operand::Int(0)) => IntGuardState::Zero,
        Rvalue::Use(Operand::Int(_)) => IntGuardState::NonZero,
        _ => IntGuardState::Unknown,
    };
    guards.insert(*dst, next);
}

/// Fold one instruction's effect into the managed guard map, consulting the
/// module's symbol globals and the function's argument context (a parameter
/// known to be a symbol propagates into the slot it is spilled to).
pub fn apply_managed_guards(
    cm: &CalledModule<'_>,
    body: &Body,
    ctx: ContextId,
    guards: &mut ManagedGuards,
    inst: &Inst,
) {
    let Inst::Assign {
        dst: Some(dst),
        rvalue,
    } = inst
    else {
        return;
    };
    if !body.local(*dst).ty.is_managed() {
        return;
    }
    let next = match rvalue {
        Rvalue::Use(Operand::Global(g)) if *g == cm.globals().nil_value => ManagedGuard::Null,
        Rvalue::Use(Operand::Global(g)) => match cm.symbol_name(*g) {
            Some(name) => ManagedGuard::Symbol(name),
            None => ManagedGuard::Unknown,
        },
        Rvalue::Use(Operand::Arg(i)) => match cm.context_symbol(ctx, *i as usize) {
            Some(name) => ManagedGuard::Symbol(name),
            None => ManagedGuard::Unknown,
        },
        Rvalue::Use(Operand::Local(src)) => guards
            .get(src)
            .cloned()
            .unwrap_or(ManagedGuard::Unknown),
        rvalue => match install_constant(rvalue, cm.globals().install) {
            Some(name) => ManagedGuard::Symbol(name.into()),
            None => ManagedGuard::Unknown,
        },
    };
    guards.insert(*dst, next);
}

/// Give the managed-guard interpreter first chance at a branch comparing a
/// managed slot against the runtime null or a known symbol global. Feasible
/// edges are enqueued with the slot narrowed; contradicted edges are pruned.
/// Returns whether the terminator was consumed.
pub fn branch_managed_guards<W: Write>(
    cm: &CalledModule<'_>,
    body: &Body,
    s: &AllocState,
    space: &mut StateSpace,
    msg: &mut Messenger<W>,
) -> bool {
    let Terminator::Branch {
        cond,
        then_bb,
        else_bb,
    } = &body.block(s.block).terminator
    else {
        return false;
    };
    if !body.local(cond.lhs).ty.is_managed() {
        return false;
    }
    let Operand::Global(rhs) = &cond.rhs else {
        return false;
    };
    let rhs = *rhs;

    let current = s
        .managed_guards
        .get(&cond.lhs)
        .cloned()
        .unwrap_or(ManagedGuard::Unknown);
    let (eq_bb, ne_bb) = match cond.op {
        CmpOp::Eq => (*then_bb, *else_bb),
        CmpOp::Ne => (*else_bb, *then_bb),
    };

    if rhs == cm.globals().nil_value {
        // equal edge: the slot is the runtime null there
        if matches!(current, ManagedGuard::NonNull | ManagedGuard::Symbol(_)) {
            msg.debug("skipping infeasible null-compare edge", &at(eq_bb));
        } else {
            let mut succ = s.clone_to(eq_bb);
            succ.managed_guards.insert(cond.lhs, ManagedGuard::Null);
            space.admit(succ);
        }
        // not-equal edge: the slot is non-null there
        if current == ManagedGuard::Null {
            msg.debug("skipping infeasible non-null edge", &at(ne_bb));
        } else {
            let mut succ = s.clone_to(ne_bb);
            if current == ManagedGuard::Unknown {
                succ.managed_guards.insert(cond.lhs, ManagedGuard::NonNull);
            }
            space.admit(succ);
        }
        return true;
    }

    if let Some(name) = cm.symbol_name(rhs) {
        // equal edge: the slot is that symbol there
        let eq_feasible = match &current {
            ManagedGuard::Null => false,
            ManagedGuard::Symbol(known) => *known == name,
            ManagedGuard::Unknown | ManagedGuard::NonNull => true,
        };
        if eq_feasible {
            let mut succ = s.clone_to(eq_bb);
            succ.managed_guards
                .insert(cond.lhs, ManagedGuard::Symbol(name.clone()));
            space.admit(succ);
        } else {
            msg.debug("skipping infeasible symbol-compare edge", &at(eq_bb));
        }
        // not-equal edge: learns nothing, but a matching symbol guard
        // contradicts it
        if current == ManagedGuard::Symbol(name) {
            msg.debug("skipping infeasible symbol-mismatch edge", &at(ne_bb));
        } else {
            space.admit(s.clone_to(ne_bb));
        }
        return true;
    }

    false
}

/// Integer counterpart of [`branch_managed_guards`] for comparisons of an
/// integer guard slot against a literal.
pub fn branch_int_guards<W: Write>(
    body: &Body,
    cache: &mut GuardVarCache,
    s: &AllocState,
    space: &mut StateSpace,
    msg: &mut Messenger<W>,
) -> bool {
    let Terminator::Branch {
        cond,
        then_bb,
        else_bb,
    } = &body.block(s.block).terminator
    else {
        return false;
    };
    if !cache.is_int_guard(body, cond.lhs) {
        return false;
    }
    let Operand::Int(k) = cond.rhs else {
        return false;
    };


    let current = s
        .int_guards
        .get(&cond.lhs)
        .copied()
        .unwrap_or(IntGuardState::Unknown);
    let (eq_bb, ne_bb) = match cond.op {
        CmpOp::Eq => (*then_bb, *else_bb),
        CmpOp::Ne => (*else_bb, *then_bb),
    };

    if k == 0 {
        if current == IntGuardState::NonZero {
            msg.debug("skipping infeasible zero edge", &at(eq_bb));
        } else {
            let mut succ = s.clone_to(eq_bb);
            succ.int_guards.insert(cond.lhs, IntGuardState::Zero);
            space.admit(succ);
        }
        if current == IntGuardState::Zero {
            msg.debug("skipping infeasible nonzero edge", &at(ne_bb));
        } else {
            let mut succ = s.clone_to(ne_bb);
            succ.int_guards.insert(cond.lhs, IntGuardState::NonZero);
            space.admit(succ);
        }
    } else {
        // equal edge of a nonzero literal implies the slot is nonzero; the
        // other edge learns nothing
        if current == IntGuardState::Zero {
            msg.debug("skipping infeasible literal-compare edge", &at(eq_bb));
        } else {
            let mut succ = s.clone_to(eq_bb);
            succ.int_guards.insert(cond.lhs, IntGuardState::NonZero);
            space.admit(succ);
        }
        space.admit(s.clone_to(ne_bb));
    }
    true
}

fn at(block: BasicBlockId) -> String {
    format!("b{}", block.0)
}
