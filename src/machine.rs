// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Thompson NFA simulator: Pike's VM, run over a
//! [`Prog`] and a [`MachineInput`].
//!
//! Two sparse sets of threads (`clist`/`nlist`) are swapped position by
//! position; each is keyed by `tid`, not `pc`, so its capacity is exactly
//! `prog.max_thread_num` rather than the instruction count. `add()` walks
//! the epsilon closure of a pc into one of these sets, using
//! `prog.add_list` to skip straight to the leaves wherever the closure
//! has already been precomputed and falling back to a direct walk
//! of `out`/`arg` for the loop participants that precompute left
//! unresolved.

use crate::inst::{Inst, Pc, Tid};
use crate::input::MachineInput;
use crate::program::Prog;

/// How far from `start` a search is allowed to consider the match
/// beginning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Anchor {
    /// The match may begin anywhere at or after `start`.
    Unanchored,
    /// The match must begin exactly at `start`.
    AnchorStart,
    /// The match must begin at `start` and consume the input to
    /// `MachineInput::end_pos`.
    AnchorBoth,
}

/// Which of several simultaneously-possible matches to report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchKind {
    /// The match preferred by the program's own alternation and
    /// quantifier priority (Perl/PCRE-style greedy semantics).
    LeftmostFirst,
    /// Among all matches starting at the same (leftmost) position, the
    /// one that consumes the most input.
    Longest,
}

struct Thread {
    tid: Tid,
    pc: Pc,
    caps: Vec<Option<usize>>,
}

/// A sparse set of threads keyed by `Tid`, supporting O(1) membership
/// test and insertion with no per-search clearing cost.
struct SparseSet {
    dense: Vec<Thread>,
    sparse: Vec<u32>,
}

impl SparseSet {
    fn new(max_tid: usize) -> SparseSet {
        SparseSet { dense: Vec::with_capacity(max_tid), sparse: vec![0; max_tid] }
    }

    fn clear(&mut self) {
        self.dense.clear();
    }

    fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    fn contains(&self, tid: Tid) -> bool {
        let i = self.sparse[tid as usize] as usize;
        i < self.dense.len() && self.dense[i].tid == tid
    }

    /// Marks `tid` visited and gives it a dense slot, returning the slot
    /// index. Caller fills in `caps` for leaf opcodes; non-leaf
    /// epsilon-adjacent opcodes (`Capture`, `EmptyWidth`) leave it empty
    /// since `step` never reads it for them.
    fn insert(&mut self, tid: Tid, pc: Pc, ncaps: usize) -> usize {
        let idx = self.dense.len();
        self.sparse[tid as usize] = idx as u32;
        self.dense.push(Thread { tid, pc, caps: vec![None; ncaps] });
        idx
    }
}

/// A reusable simulator over a single [`Prog`].
///
/// Cheap to construct, but its sparse-set queues are sized to
/// `prog.max_thread_num` up front, so reusing one `Machine` across many
/// searches over the same program avoids reallocating them each time.
pub struct Machine<'r> {
    prog: &'r Prog,
    clist: SparseSet,
    nlist: SparseSet,
}

impl<'r> Machine<'r> {
    pub fn new(prog: &'r Prog) -> Machine<'r> {
        let n = prog.max_thread_num as usize;
        Machine { prog, clist: SparseSet::new(n), nlist: SparseSet::new(n) }
    }

    /// Search for a leftmost-first match. `start` is the byte offset to
    /// begin considering matches from.
    pub fn search<I: MachineInput>(
        &mut self,
        input: &I,
        start: usize,
        anchor: Anchor,
    ) -> Option<Vec<Option<usize>>> {
        self.search_with(input, start, anchor, MatchKind::LeftmostFirst)
    }

    pub fn search_with<I: MachineInput>(
        &mut self,
        input: &I,
        start: usize,
        anchor: Anchor,
        kind: MatchKind,
    ) -> Option<Vec<Option<usize>>> {
        let prog = self.prog;
        let ncaps = prog.num_cap as usize;
        self.clist.clear();
        self.nlist.clear();

        let anchored = matches!(anchor, Anchor::AnchorStart | Anchor::AnchorBoth);
        let prefix_rune = if input.can_check_prefix() { prog.required_first_rune() } else { None };

        let mut matched: Option<Vec<Option<usize>>> = None;
        let mut matched_end: Option<usize> = None;
        let mut seed_caps = vec![None; ncaps];
        let mut pos = start;

        loop {
            if self.clist.is_empty() {
                if matched.is_some() {
                    break;
                }
                if anchored && pos > start {
                    break;
                }
                if !anchored && pos < input.end_pos() {
                    if let Some(rune) = prefix_rune {
                        let here = input.step(pos).map(|(r, _)| r);
                        if here != Some(rune) {
                            match input.index(rune, pos) {
                                Some(found) => pos = found,
                                None => break,
                            }
                        }
                    }
                }
            }

            // Once some start position has produced a match, leftmost
            // priority forbids considering any later (or, for an
            // anchored search, any non-`start`) beginning — true for
            // both match kinds, since `Longest` only picks among
            // matches that share the same (leftmost) start.
            if matched.is_none() && (!anchored || pos == start) {
                add(prog, &mut self.clist, prog.start, pos, &mut seed_caps, input);
            }

            let step = input.step(pos);
            let rune = step.map(|(r, _)| r);
            let width = step.map(|(_, w)| w).unwrap_or(0);
            let next_pos = pos + width;

            let n = self.clist.dense.len();
            for i in 0..n {
                let pc = self.clist.dense[i].pc;
                match &prog.insts[pc as usize] {
                    Inst::Match { .. } => {
                        if matches!(anchor, Anchor::AnchorBoth) && pos != input.end_pos() {
                            continue;
                        }
                        // In Longest mode several threads can reach Match at
                        // the same pos in the same step; only the first one
                        // recorded here may set the captures — a later,
                        // lower-priority thread at the same end position must
                        // not silently overwrite them.
                        let should_record = match (kind, matched_end) {
                            (MatchKind::LeftmostFirst, _) => true,
                            (MatchKind::Longest, None) => true,
                            (MatchKind::Longest, Some(end)) => pos > end,
                        };
                        if should_record {
                            matched = Some(self.clist.dense[i].caps.clone());
                            matched_end = Some(pos);
                        }
                        if matches!(kind, MatchKind::LeftmostFirst) {
                            break;
                        }
                    }
                    Inst::Rune1 { rune: want, out, .. } => {
                        if rune == Some(*want) {
                            let out = *out;
                            let caps = &mut self.clist.dense[i].caps;
                            add(prog, &mut self.nlist, out, next_pos, caps, input);
                        }
                    }
                    Inst::Rune { runes, out, .. } => {
                        if let Some(r) = rune {
                            if runes.iter().any(|&(lo, hi)| r >= lo && r <= hi) {
                                let out = *out;
                                let caps = &mut self.clist.dense[i].caps;
                                add(prog, &mut self.nlist, out, next_pos, caps, input);
                            }
                        }
                    }
                    Inst::RuneAny { out, .. } => {
                        if rune.is_some() {
                            let out = *out;
                            let caps = &mut self.clist.dense[i].caps;
                            add(prog, &mut self.nlist, out, next_pos, caps, input);
                        }
                    }
                    Inst::RuneAnyNotNl { out, .. } => {
                        if let Some(r) = rune {
                            if r != '\n' {
                                let out = *out;
                                let caps = &mut self.clist.dense[i].caps;
                                add(prog, &mut self.nlist, out, next_pos, caps, input);
                            }
                        }
                    }
                    Inst::AltRune1 { rune: want, out, .. } => {
                        if rune == Some(*want) {
                            let out = *out;
                            let caps = &mut self.clist.dense[i].caps;
                            add(prog, &mut self.nlist, out, next_pos, caps, input);
                        }
                    }
                    Inst::AltRune { runes, out, .. } => {
                        if let Some(r) = rune {
                            if runes.iter().any(|&(lo, hi)| r >= lo && r <= hi) {
                                let out = *out;
                                let caps = &mut self.clist.dense[i].caps;
                                add(prog, &mut self.nlist, out, next_pos, caps, input);
                            }
                        }
                    }
                    _ => {}
                }
            }

            if pos >= input.end_pos() {
                break;
            }
            pos = next_pos;
            std::mem::swap(&mut self.clist, &mut self.nlist);
            self.nlist.clear();
        }

        matched
    }
}

/// Expands the epsilon closure of `pc` into `list`, recording capture
/// positions along the way. `caps` is the capture state of whichever
/// thread is driving this expansion; `Capture` mutates it for the
/// duration of its own recursion and restores it before returning, so a
/// single buffer can be threaded through the whole walk and reused by
/// the caller across repeated top-of-loop seedings.
fn add<I: MachineInput>(
    prog: &Prog,
    list: &mut SparseSet,
    pc: Pc,
    pos: usize,
    caps: &mut [Option<usize>],
    input: &I,
) {
    let inst = &prog.insts[pc as usize];

    if inst.is_epsilon() {
        if matches!(inst, Inst::Fail) {
            return;
        }
        if !prog.add_list[pc as usize].is_empty() {
            for i in 0..prog.add_list[pc as usize].len() {
                let leaf = prog.add_list[pc as usize][i];
                add(prog, list, leaf, pos, caps, input);
            }
            return;
        }
        match *inst {
            Inst::Nop { out } => add(prog, list, out, pos, caps, input),
            Inst::Alt { out, arg } | Inst::AltMatch { out, arg } => {
                add(prog, list, out, pos, caps, input);
                add(prog, list, arg, pos, caps, input);
            }
            _ => unreachable!("is_epsilon implies Fail, Nop, Alt or AltMatch"),
        }
        return;
    }

    let tid = inst.tid().expect("non-epsilon instruction always has a tid");
    if list.contains(tid) {
        return;
    }

    match *inst {
        Inst::Capture { out, group, offset, .. } => {
            list.insert(tid, pc, 0);
            let group = group as usize;
            let target = (pos as i64 + offset as i64) as usize;
            if group < caps.len() {
                let old = caps[group];
                caps[group] = Some(target);
                add(prog, list, out, pos, caps, input);
                caps[group] = old;
            } else {
                add(prog, list, out, pos, caps, input);
            }
        }
        Inst::EmptyWidth { out, flags, delta, .. } => {
            list.insert(tid, pc, 0);
            let ctx_pos = (pos as i64 + delta as i64).clamp(0, input.end_pos() as i64) as usize;
            if input.context(ctx_pos).contains(flags) {
                add(prog, list, out, pos, caps, input);
            }
        }
        Inst::Match { .. } => {
            let idx = list.insert(tid, pc, caps.len());
            list.dense[idx].caps.copy_from_slice(caps);
        }
        Inst::Rune1 { .. }
        | Inst::Rune { .. }
        | Inst::RuneAny { .. }
        | Inst::RuneAnyNotNl { .. } => {
            let idx = list.insert(tid, pc, caps.len());
            list.dense[idx].caps.copy_from_slice(caps);
        }
        Inst::AltRune1 { arg, .. } | Inst::AltRune { arg, .. } => {
            let idx = list.insert(tid, pc, caps.len());
            list.dense[idx].caps.copy_from_slice(caps);
            add(prog, list, arg, pos, caps, input);
        }
        Inst::Fail | Inst::Nop { .. } | Inst::Alt { .. } | Inst::AltMatch { .. } => {
            unreachable!("epsilon opcodes are handled above")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ast;
    use crate::compile::Compiler;
    use crate::config::CompileConfig;
    use crate::input::StrInput;

    fn compile(ast: &Ast) -> Prog {
        Compiler::new(CompileConfig::new()).compile(ast).unwrap()
    }

    fn find(prog: &Prog, text: &str) -> Option<Vec<Option<usize>>> {
        Machine::new(prog).search(&StrInput::new(text), 0, Anchor::Unanchored)
    }

    #[test]
    fn literal_matches_substring() {
        let prog = compile(&Ast::literal('a'));
        let caps = find(&prog, "xxax").expect("should match");
        assert_eq!(caps[0], Some(2));
        assert_eq!(caps[1], Some(3));
    }

    #[test]
    fn literal_no_match_returns_none() {
        let prog = compile(&Ast::literal('z'));
        assert!(find(&prog, "abc").is_none());
    }

    #[test]
    fn concat_matches_in_order() {
        let ast = Ast::concat(vec![Ast::literal('a'), Ast::literal('b'), Ast::literal('c')]);
        let prog = compile(&ast);
        let caps = find(&prog, "xxabcxx").expect("should match");
        assert_eq!(caps[0], Some(2));
        assert_eq!(caps[1], Some(5));
    }

    #[test]
    fn alternation_prefers_leftmost_first_branch() {
        let ast = Ast::alternate(vec![Ast::literal('a'), Ast::concat(vec![Ast::literal('a'), Ast::literal('b')])]);
        let prog = compile(&ast);
        let caps = find(&prog, "ab").expect("should match");
        // leftmost-first: the first alternative wins even though the
        // second would have matched more text.
        assert_eq!(caps[1], Some(1));
    }

    #[test]
    fn longest_match_prefers_more_input() {
        let ast = Ast::alternate(vec![Ast::literal('a'), Ast::concat(vec![Ast::literal('a'), Ast::literal('b')])]);
        let prog = compile(&ast);
        let caps = Machine::new(&prog)
            .search_with(&StrInput::new("ab"), 0, Anchor::Unanchored, MatchKind::Longest)
            .expect("should match");
        assert_eq!(caps[1], Some(2));
    }

    #[test]
    fn longest_does_not_let_a_same_position_thread_overwrite_the_first() {
        // a|(b=1:a): both branches reach Match at the same pos in the
        // same step; can_be_second_branch refuses to fuse them (they
        // share the leading rune 'a'), so they stay distinct threads.
        // The first (non-capturing) branch has priority and must win.
        let ast = Ast::alternate(vec![Ast::literal('a'), Ast::capture(1, Ast::literal('a'))]);
        let prog = compile(&ast);
        let caps = Machine::new(&prog)
            .search_with(&StrInput::new("a"), 0, Anchor::Unanchored, MatchKind::Longest)
            .expect("should match");
        assert_eq!(caps[0], Some(0));
        assert_eq!(caps[1], Some(1));
        assert_eq!(caps.get(2).copied().flatten(), None, "group 1 must not be set by the lower-priority thread");
    }

    #[test]
    fn star_is_greedy() {
        let ast = Ast::Star { sub: Box::new(Ast::literal('a')), flags: Default::default() };
        let prog = compile(&ast);
        let caps = find(&prog, "aaab").expect("should match");
        assert_eq!(caps[0], Some(0));
        assert_eq!(caps[1], Some(3));
    }

    #[test]
    fn anchor_start_rejects_match_not_at_start() {
        let prog = compile(&Ast::literal('b'));
        let mut m = Machine::new(&prog);
        assert!(m.search(&StrInput::new("ab"), 0, Anchor::AnchorStart).is_none());
        assert!(m.search(&StrInput::new("ab"), 1, Anchor::AnchorStart).is_some());
    }

    #[test]
    fn anchor_both_requires_full_consumption() {
        let prog = compile(&Ast::literal('a'));
        let mut m = Machine::new(&prog);
        assert!(m.search(&StrInput::new("ab"), 0, Anchor::AnchorBoth).is_none());
        assert!(m.search(&StrInput::new("a"), 0, Anchor::AnchorBoth).is_some());
    }

    #[test]
    fn capture_groups_record_spans() {
        let ast = Ast::capture(1, Ast::concat(vec![Ast::literal('a'), Ast::literal('b')]));
        let prog = compile(&ast);
        let caps = find(&prog, "xabx").expect("should match");
        assert_eq!(caps[2], Some(1));
        assert_eq!(caps[3], Some(3));
    }

    #[test]
    fn empty_pattern_matches_empty_string() {
        let prog = compile(&Ast::EmptyMatch);
        let caps = find(&prog, "").expect("should match");
        assert_eq!(caps[0], Some(0));
        assert_eq!(caps[1], Some(0));
    }
}
