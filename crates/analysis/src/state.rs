//! The per-program-point symbolic state of the allocator walk, and the
//! done-set/worklist pair that drives it.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::io::Write;

use rustc_hash::{FxHashSet, FxHasher};

use ir::{BasicBlockId, LocalId};

use crate::callables::CalledFnId;
use crate::guards::{IntGuards, ManagedGuards};
use crate::messenger::Messenger;

/// Deterministically ordered set of called-function handles.
pub type CallSet = BTreeSet<CalledFnId>;

/// Symbolic state at one program point: the block about to be interpreted,
/// the guard maps, the allocating calls accumulated on this path, and the
/// per-slot origin sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocState {
    pub block: BasicBlockId,
    pub int_guards: IntGuards,
    pub managed_guards: ManagedGuards,
    /// Allocating calls seen on this path.
    pub called: CallSet,
    /// For each tracked slot, the calls whose results may have flowed into it.
    pub var_origins: BTreeMap<LocalId, CallSet>,
}

impl AllocState {
    pub fn entry(block: BasicBlockId) -> Self {
        Self {
            block,
            int_guards: IntGuards::new(),
            managed_guards: ManagedGuards::new(),
            called: CallSet::new(),
            var_origins: BTreeMap::new(),
        }
    }

    /// Copy of this state re-anchored at a successor block.
    pub fn clone_to(&self, block: BasicBlockId) -> Self {
        let mut succ = self.clone();
        succ.block = block;
        succ
    }

    /// Union `srcs` into the origin set of `dst`, creating it if absent.
    pub fn add_origins(&mut self, dst: LocalId, srcs: impl IntoIterator<Item = CalledFnId>) {
        self.var_origins.entry(dst).or_default().extend(srcs);
    }

    /// Content hash in canonical field order: block, then each guard map
    /// (length and entries in key order), then the call set and origin map
    /// (lengths and entries in handle order).
    fn content_hash(&self) -> u64 {
        let mut h = FxHasher::default();
        self.block.hash(&mut h);
        self.int_guards.len().hash(&mut h);
        for (slot, g) in &self.int_guards {
            slot.hash(&mut h);
            g.hash(&mut h);
        }
        self.managed_guards.len().hash(&mut h);
        for (slot, g) in &self.managed_guards {
            slot.hash(&mut h);
            g.hash(&mut h);
        }
        self.called.len().hash(&mut h);
        for f in &self.called {
            f.hash(&mut h);
        }
        self.var_origins.len().hash(&mut h);
        for (slot, srcs) in &self.var_origins {
            slot.hash(&mut h);
            srcs.len().hash(&mut h);
            for f in srcs {
                f.hash(&mut h);
            }
        }
        h.finish()
    }

    pub fn dump<W: Write>(&self, msg: &mut Messenger<W>, verbose: bool) {
        msg.line(&format!("###### state at block b{}", self.block.0));
        if !verbose {
            return;
        }
        for (slot, g) in &self.int_guards {
            msg.line(&format!("  int guard l{}: {g:?}", slot.0));
        }
        for (slot, g) in &self.managed_guards {
            msg.line(&format!("  managed guard l{}: {g:?}", slot.0));
        }
        msg.line(&format!("  called: {} calls", self.called.len()));
        for (slot, srcs) in &self.var_origins {
            msg.line(&format!("  origins of l{}: {} calls", slot.0, srcs.len()));
        }
    }
}

/// A state admitted to the done set: the contents plus the hash frozen at
/// admission time. Rehashing on table growth replays the frozen value;
/// equality stays field-wise structural.
#[derive(Debug)]
struct SealedState {
    hash: u64,
    state: AllocState,
}

impl PartialEq for SealedState {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
    }
}

impl Eq for SealedState {}

impl Hash for SealedState {
    fn hash<H: Hasher>(&self, h: &mut H) {
        h.write_u64(self.hash);
    }
}

/// Done-set and worklist of one function walk. [`StateSpace::admit`] is the
/// sole deduplication point: a state's hash is computed exactly once, right
/// before the done-set probe.
#[derive(Debug, Default)]
pub struct StateSpace {
    done: FxHashSet<SealedState>,
    pending: Vec<AllocState>,
}

impl StateSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to admit `state`: on first sight it is retained and queued; a
    /// duplicate is dropped. Returns whether the state was new.
    pub fn admit(&mut self, state: AllocState) -> bool {
        let hash = state.content_hash();
        let sealed = SealedState { hash, state };
        if self.done.contains(&sealed) {
            return false;
        }
        let pending = sealed.state.clone();
        self.done.insert(sealed);
        self.pending.push(pending);
        true
    }

    pub fn pop(&mut self) -> Option<AllocState> {
        self.pending.pop()
    }

    /// Number of distinct states admitted so far.
    pub fn explored(&self) -> usize {
        self.done.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::IntGuardState;

    #[test]
    fn duplicate_contents_are_rejected() {
        let mut space = StateSpace::new();
        let a = AllocState::entry(BasicBlockId(0));
        assert!(space.admit(a.clone()));
        assert!(!space.admit(a.clone()), "same contents, same block");
        assert!(space.admit(a.clone_to(BasicBlockId(1))));
        assert_eq!(space.explored(), 2);

        let popped = space.pop().unwrap();
        assert_eq!(popped.block, BasicBlockId(1));
        assert!(
            !space.admit(popped),
            "the done set retains its own copy of popped states"
        );
    }

    #[test]
    fn guard_contents_distinguish_states() {
        let mut space = StateSpace::new();
        let base = AllocState::entry(BasicBlockId(0));
        let mut narrowed = base.clone();
        narrowed.int_guards.insert(LocalId(0), IntGuardState::Zero);

        assert!(space.admit(base));
        assert!(space.admit(narrowed.clone()));
        assert!(!space.admit(narrowed));
    }

    #[test]
    fn content_hash_tracks_structural_equality() {
        let mut a = AllocState::entry(BasicBlockId(3));
        let mut b = AllocState::entry(BasicBlockId(3));
        a.add_origins(LocalId(1), [CalledFnId(2), CalledFnId(0)]);
        b.add_origins(LocalId(1), [CalledFnId(0)]);
        b.add_origins(LocalId(1), [CalledFnId(2)]);
        assert_eq!(a, b);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), a.clone_to(BasicBlockId(4)).content_hash());
    }
}
