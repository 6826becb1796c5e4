// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The compiled program: a flat instruction array plus the patch-list
//! machinery used to build it, and the frozen [`Prog`] the rest of the
//! crate runs against.
//!
//! Once an expression is compiled, its `Prog` is immutable and will never
//! change — the matching engines only ever read it. `Prog` is cheap to
//! clone (it's just index arena data) and is the unit of sharing across
//! concurrent matches: each concurrent match needs its own
//! `Machine`, but every `Machine` can point at the same `Prog`.

use crate::config::CompileConfig;
use crate::error::{Error, Result};
use crate::inst::{Inst, Pc, FAIL_PC};

/// An as-yet-unresolved successor pointer, threaded through the pointer
/// slot it will eventually patch. `PatchList(0)` is the empty list — safe
/// because pc 0 is always `Fail`, which is never itself a patch target.
///
/// The encoding is the classical Thompson trick: `pc << 1 | which`, where
/// `which == 0` means "patch `insts[pc]`'s `out` slot" and `which == 1`
/// means "patch its `arg` slot".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchList(u32);

impl PatchList {
    /// The empty patch list.
    pub fn empty() -> PatchList {
        PatchList(0)
    }

    /// A one-element list pointing at `pc`'s `out` slot.
    pub fn out(pc: Pc) -> PatchList {
        PatchList(pc << 1)
    }

    /// A one-element list pointing at `pc`'s `arg` slot.
    pub fn arg(pc: Pc) -> PatchList {
        PatchList((pc << 1) | 1)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn pc(self) -> Pc {
        self.0 >> 1
    }

    fn is_arg_slot(self) -> bool {
        self.0 & 1 == 1
    }

    /// Read the value currently stored in this list's head slot — while
    /// the list is still a patch list, that slot holds the *next* link in
    /// the chain rather than a real successor (the unresolved future
    /// pointer doubles as list storage; see Design Notes).
    fn next(self, insts: &[Inst]) -> PatchList {
        if self.is_empty() {
            return PatchList::empty();
        }
        let inst = &insts[self.pc() as usize];
        let raw = if self.is_arg_slot() {
            inst.arg().expect("patch list node has no arg slot")
        } else {
            inst.out().expect("patch list node has no out slot")
        };
        PatchList(raw)
    }

    /// Write `target` into every slot in this list. O(|self|).
    pub fn patch(self, insts: &mut [Inst], target: Pc) {
        let mut l = self;
        while !l.is_empty() {
            let next = l.next(insts);
            let inst = &mut insts[l.pc() as usize];
            if l.is_arg_slot() {
                inst.set_arg(target);
            } else {
                inst.set_out(target);
            }
            l = next;
        }
    }

    /// Concatenate two patch lists in O(|l1|).
    pub fn append(self, insts: &mut [Inst], other: PatchList) -> PatchList {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let mut l = self;
        loop {
            let next = l.next(insts);
            if next.is_empty() {
                let inst = &mut insts[l.pc() as usize];
                if l.is_arg_slot() {
                    inst.set_arg(other.0);
                } else {
                    inst.set_out(other.0);
                }
                return self;
            }
            l = next;
        }
    }
}

/// A compile-time fragment: an entry pc plus the list of not-yet-patched
/// successor slots that should eventually point past this fragment.
#[derive(Clone, Copy, Debug)]
pub struct Frag {
    pub entry: Pc,
    pub out: PatchList,
}

impl Frag {
    /// The distinguished "failure" fragment: concatenating anything with
    /// it yields failure, and alternating with it degenerates to the
    /// other branch. Represented as entry = `FAIL_PC`.
    pub fn fail() -> Frag {
        Frag { entry: FAIL_PC, out: PatchList::empty() }
    }

    pub fn is_fail(&self) -> bool {
        self.entry == FAIL_PC
    }
}

/// A compiled, optimized, compacted regular expression program.
///
/// Immutable after construction — every field here is read-only from the
/// simulator's point of view. Concurrent `Machine`s may share a `Prog`
/// freely; nothing in `Prog` is interior-mutable.
#[derive(Clone, Debug)]
pub struct Prog {
    pub insts: Vec<Inst>,
    /// Initial program counter to start matching from.
    pub start: Pc,
    /// Number of capture slots, `2 * groups`, minimum 2 (group 0 is
    /// always present).
    pub num_cap: u32,
    /// Upper bound on the number of distinct tids in use; the capacity a
    /// `Machine`'s sparse-set queues must be allocated with.
    pub max_thread_num: u32,
    /// Precomputed epsilon-closure leaves for every pc. Empty for
    /// pcs that are not themselves epsilon-expandable (already leaves).
    pub add_list: Vec<Box<[Pc]>>,
    /// The config this program was compiled under, retained only for
    /// diagnostics (`Error::ProgramTooBig`) — never read at match time.
    pub config: CompileConfig,
}

impl Prog {
    /// Number of capture groups, including the implicit group 0.
    pub fn num_captures(&self) -> u32 {
        self.num_cap / 2
    }

    /// `true` iff the program is anchored at the start of text: the
    /// first real instruction at `start` is `EMPTY_WIDTH(BEGIN_TEXT)`.
    pub fn anchored_begin(&self) -> bool {
        matches!(
            self.insts.get(self.start as usize),
            Some(Inst::EmptyWidth { flags, .. })
                if flags.contains(crate::inst::EmptyFlags::BEGIN_TEXT)
        )
    }

    /// The single literal rune that must appear at the very start of any
    /// match, if the program's entry is (optionally through `Capture`
    /// opens) a `Rune1`/`AltRune1` dispatch on it. Used by the simulator
    /// to skip ahead via `MachineInput::index` instead of stepping one
    /// position at a time through non-matching text.
    pub fn required_first_rune(&self) -> Option<char> {
        let mut pc = self.start;
        loop {
            match self.insts[pc as usize] {
                Inst::Capture { out, .. } => pc = out,
                Inst::Rune1 { rune, .. } | Inst::AltRune1 { rune, .. } => return Some(rune),
                _ => return None,
            }
        }
    }

    /// Validate the structural invariants a compiled program must hold: pc 0 is
    /// `Fail`, every `out`/`arg` is in range, and (post-compaction) every
    /// pc is reachable from `start`. A defensive check run after
    /// optimization — failures here are optimizer bugs, not bad
    /// user input, so this is only wired up under `cfg(debug_assertions)`
    /// by `Compiler::compile`.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.insts.first(), Some(Inst::Fail)) {
            return Err(Error::InvariantViolation("pc 0 is not Fail"));
        }
        let n = self.insts.len() as Pc;
        for inst in &self.insts {
            if let Some(out) = inst.out() {
                if out >= n {
                    return Err(Error::InvariantViolation("out successor out of range"));
                }
            }
            if let Some(arg) = inst.arg() {
                if arg >= n {
                    return Err(Error::InvariantViolation("arg successor out of range"));
                }
            }
        }
        let mut reached = vec![false; self.insts.len()];
        reached[FAIL_PC as usize] = true;
        let mut stack = vec![self.start];
        reached[self.start as usize] = true;
        while let Some(pc) = stack.pop() {
            let inst = &self.insts[pc as usize];
            if let Some(out) = inst.out() {
                if !reached[out as usize] {
                    reached[out as usize] = true;
                    stack.push(out);
                }
            }
            if let Some(arg) = inst.arg() {
                if !reached[arg as usize] {
                    reached[arg as usize] = true;
                    stack.push(arg);
                }
            }
        }
        if reached.iter().any(|&r| !r) {
            return Err(Error::InvariantViolation("unreachable instruction after compaction"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::Tid;

    fn push(insts: &mut Vec<Inst>, inst: Inst) -> Pc {
        insts.push(inst);
        (insts.len() - 1) as Pc
    }

    #[test]
    fn patch_list_empty_is_safe_noop() {
        let mut insts = vec![Inst::Fail];
        let empty = PatchList::empty();
        empty.patch(&mut insts, 99);
        assert!(matches!(insts[0], Inst::Fail));
    }

    #[test]
    fn patch_list_single_slot() {
        let mut insts = vec![Inst::Fail];
        let pc = push(&mut insts, Inst::Nop { out: 0 });
        let l = PatchList::out(pc);
        l.patch(&mut insts, 42);
        assert_eq!(insts[pc as usize].out(), Some(42));
    }

    #[test]
    fn patch_list_append_chains_both() {
        let mut insts = vec![Inst::Fail];
        let a = push(&mut insts, Inst::Nop { out: 0 });
        let b = push(&mut insts, Inst::Nop { out: 0 });
        let la = PatchList::out(a);
        let lb = PatchList::out(b);
        let joined = la.append(&mut insts, lb);
        joined.patch(&mut insts, 7);
        assert_eq!(insts[a as usize].out(), Some(7));
        assert_eq!(insts[b as usize].out(), Some(7));
    }

    #[test]
    fn patch_list_append_with_arg_slots() {
        let mut insts = vec![Inst::Fail];
        let a = push(&mut insts, Inst::Alt { out: 0, arg: 0 });
        let la_out = PatchList::out(a);
        let la_arg = PatchList::arg(a);
        let joined = la_out.append(&mut insts, la_arg);
        joined.patch(&mut insts, 3);
        assert_eq!(insts[a as usize].out(), Some(3));
        assert_eq!(insts[a as usize].arg(), Some(3));
    }

    fn sample_prog() -> Prog {
        let tid: Tid = 0;
        let insts = vec![
            Inst::Fail,
            Inst::EmptyWidth {
                out: 2,
                flags: crate::inst::EmptyFlags::BEGIN_TEXT,
                delta: 0,
                tid,
            },
            Inst::Match { tid: 1 },
        ];
        Prog {
            insts,
            start: 1,
            num_cap: 2,
            max_thread_num: 2,
            add_list: vec![Box::new([]), Box::new([2]), Box::new([2])],
            config: CompileConfig::new(),
        }
    }

    #[test]
    fn validate_accepts_well_formed_program() {
        assert!(sample_prog().validate().is_ok());
    }

    #[test]
    fn validate_rejects_pc_zero_not_fail() {
        let mut p = sample_prog();
        p.insts[0] = Inst::Match { tid: 0 };
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_successor() {
        let mut p = sample_prog();
        p.insts[1] = Inst::EmptyWidth {
            out: 99,
            flags: crate::inst::EmptyFlags::BEGIN_TEXT,
            delta: 0,
            tid: 0,
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn anchored_begin_detects_leading_begin_text() {
        assert!(sample_prog().anchored_begin());
    }
}
