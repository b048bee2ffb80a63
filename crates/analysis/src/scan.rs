//! One-shot body scans the engine runs before a walk: error-path blocks and
//! the slots whose contents may reach a return.

use rustc_hash::FxHashSet;

use ir::{BasicBlockId, Body, Inst, LocalId, Operand, Rvalue, Terminator};

use crate::callables::FunctionSet;

pub type BlockSet = FxHashSet<BasicBlockId>;

/// Blocks on paths that provably end in a no-return error function: a block
/// qualifies if it calls one directly, or if it has successors and all of
/// them qualify.
pub fn find_error_basic_blocks(body: &Body, error_functions: &FunctionSet) -> BlockSet {
    let mut error = vec![false; body.blocks.len()];
    for (i, block) in body.blocks.iter().enumerate() {
        error[i] = block.insts.iter().any(|inst| {
            matches!(
                inst,
                Inst::Assign {
                    rvalue: Rvalue::Call { callee, .. },
                    ..
                } if error_functions.contains(callee)
            )
        });
    }

    loop {
        let mut changed = false;
        for (i, block) in body.blocks.iter().enumerate() {
            if error[i] {
                continue;
            }
            let mut succs = block.terminator.successors().peekable();
            if succs.peek().is_some() && succs.all(|s| error[s.index()]) {
                error[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    error
        .iter()
        .enumerate()
        .filter_map(|(i, &is_error)| is_error.then_some(BasicBlockId(i as u32)))
        .collect()
}

/// Slots whose contents may reach a `Return`: directly returned slots plus
/// the backward closure over slot-to-slot copies. Origin tracking is
/// restricted to these.
pub fn find_possibly_returned_vars(body: &Body) -> FxHashSet<LocalId> {
    let mut returned = FxHashSet::default();
    for block in &body.blocks {
        if let Terminator::Return {
            value: Some(Rvalue::Use(Operand::Local(slot))),
        } = &block.terminator
        {
            returned.insert(*slot);
        }
    }

    loop {
        let mut changed = false;
        for block in &body.blocks {
            for inst in &block.insts {
                if let Inst::Assign {
                    dst: Some(dst),
                    rvalue: Rvalue::Use(Operand::Local(src)),
                } = inst
                    && returned.contains(dst)
                    && returned.insert(*src)
                {
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    returned
}
