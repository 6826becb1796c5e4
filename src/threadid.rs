// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Thread-id assignment.
//!
//! Every schedulable instruction (anything with a `tid` slot) needs a
//! dense id so the simulator's sparse-set queues can be sized to the
//! number of *distinct* threads a match can simultaneously hold, rather
//! than to the instruction count. A naive allocator gives every
//! schedulable pc its own id; this one additionally reuses an id across
//! instructions that are structurally guaranteed never to be enqueued
//! into the same sparse set at once.
//!
//! Algorithm: count incoming edges for every pc (a single linear scan
//! over the whole compact program, both `out` and `arg` slots). For each
//! schedulable pc, in pc order:
//!
//! - Two or more incoming edges: assign a fresh tid. With more than one
//!   path in, nothing guarantees mutual exclusivity, so there is nothing
//!   to reuse from.
//! - Exactly one incoming edge, and it is the `out` slot of a `Rune1`
//!   or `AltRune1` testing rune `r`: this pc is only ever reached the
//!   step after `r` was the rune actually read, which is the same
//!   precondition for any other pc reached the same way via a
//!   *different* rune — they can never both be live in one sparse set,
//!   because at most one rune is read per step. Reuse the
//!   currently-held "reusable" tid if its rune set doesn't already
//!   include `r` (extending the set with `r`); otherwise start a new
//!   reusable tid seeded with `r`.
//! - Anything else (zero incoming edges, or the sole predecessor isn't a
//!   single-rune test reached via its `out` slot): assign a fresh tid,
//!   and leave the currently-held reusable tid alone.
//!
//! `Fail`/`Nop`/`Alt`/`AltMatch` are never schedulable and receive no
//! tid at all.
//!
//! This deliberately never shares a tid between two *dispatch*
//! instructions themselves (e.g. the `AltRune1` for `'a'` and the
//! `AltRune1` for `'b'` in a fused `[abc]`-style cascade) even though
//! they're mutually exclusive in the rune they match: both are added to
//! the *same* sparse set in the *same* `add()` call (the cascade walks
//! into `arg` at the same position), so sharing a tid between them
//! would make the second insert look like a duplicate of the first and
//! silently drop it. Sharing only ever applies to what comes *after*
//! such a test succeeds — those continuations are reached in later,
//! disjoint `add()` calls and never coexist in one sparse set.
//!
//! This also resolves what to do about an `EmptyWidth` predecessor:
//! since only a `Rune1`/`AltRune1` reached via its `out` slot ever
//! produces a rune to share on, a pc whose sole predecessor is an
//! `EmptyWidth` always falls into the "assign a fresh tid" case. A
//! zero-width assertion doesn't consume input, so nothing about reaching
//! a pc through one says anything about which rune was last read —
//! there's no sound rune to reuse on.
use crate::inst::{Inst, Pc, Tid};
use crate::program::Prog;

/// The rune, if any, that `pc` is reached on the assumption it was just
/// matched — only true when `pred` is a `Rune1`/`AltRune1` and `pc` is
/// specifically its `out` successor (the "matched" branch, not the
/// `arg` fallthrough).
fn rune_gate(prog: &Prog, pred: Pc, pc: Pc) -> Option<char> {
    if prog.insts[pred as usize].out() != Some(pc) {
        return None;
    }
    match prog.insts[pred as usize] {
        Inst::Rune1 { rune, .. } | Inst::AltRune1 { rune, .. } => Some(rune),
        _ => None,
    }
}

pub fn assign_thread_ids(prog: &mut Prog) {
    let n = prog.insts.len();

    let mut indegree: Vec<u32> = vec![0; n];
    let mut pred: Vec<Pc> = vec![0; n];
    for pc in 0..n as Pc {
        let inst = &prog.insts[pc as usize];
        if let Some(out) = inst.out() {
            indegree[out as usize] += 1;
            pred[out as usize] = pc;
        }
        if let Some(arg) = inst.arg() {
            indegree[arg as usize] += 1;
            pred[arg as usize] = pc;
        }
    }

    let mut tid_for: Vec<Option<Tid>> = vec![None; n];
    let mut next_tid: Tid = 0;
    let mut reusable: Option<(Tid, std::collections::HashSet<char>)> = None;

    for pc in 0..n as Pc {
        if prog.insts[pc as usize].tid().is_none() {
            continue;
        }
        let gate = if indegree[pc as usize] == 1 {
            rune_gate(prog, pred[pc as usize], pc)
        } else {
            None
        };
        match gate {
            Some(r) => {
                let reuse = matches!(&reusable, Some((_, runes)) if !runes.contains(&r));
                if reuse {
                    let (t, runes) = reusable.as_mut().expect("just matched Some(..)");
                    runes.insert(r);
                    tid_for[pc as usize] = Some(*t);
                } else {
                    let t = next_tid;
                    next_tid += 1;
                    tid_for[pc as usize] = Some(t);
                    reusable = Some((t, std::collections::HashSet::from([r])));
                }
            }
            None => {
                let t = next_tid;
                next_tid += 1;
                tid_for[pc as usize] = Some(t);
            }
        }
    }

    for pc in 0..n as Pc {
        if let Some(t) = tid_for[pc as usize] {
            prog.insts[pc as usize].set_tid(t);
        }
    }
    prog.max_thread_num = next_tid;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ast;
    use crate::compile::Compiler;
    use crate::config::CompileConfig;

    fn compile(ast: &Ast) -> Prog {
        Compiler::new(CompileConfig::new()).compile(ast).unwrap()
    }

    #[test]
    fn every_schedulable_inst_gets_a_tid() {
        let ast = Ast::concat(vec![Ast::literal('a'), Ast::literal('b')]);
        let prog = compile(&ast);
        for inst in &prog.insts {
            if let Some(tid) = inst.tid() {
                assert!(tid < prog.max_thread_num, "tid {tid} not below max_thread_num");
            }
        }
    }

    #[test]
    fn disjoint_rune_dispatches_never_share_a_tid() {
        // a|b|c fuses into a cascade of AltRune1 nodes, all added to the
        // same sparse set in the same add() call. Sharing a tid among
        // them would make the second and third inserts look like
        // duplicates of the first and silently drop them.
        let ast = Ast::alternate(vec![Ast::literal('a'), Ast::literal('b'), Ast::literal('c')]);
        let prog = compile(&ast);
        let tids: Vec<Tid> =
            prog.insts.iter().filter(|i| i.required_rune1().is_some()).filter_map(|i| i.tid()).collect();
        assert!(tids.len() >= 2, "expected multiple rune tests in the alternation");
        let mut dedup = tids.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), tids.len(), "disjoint-rune dispatch instructions must not share a tid: {tids:?}");
    }

    #[test]
    fn continuations_after_disjoint_single_rune_branches_share_a_tid() {
        // a|b|c: the capture-close right after each branch's literal is
        // reached only the step after that branch's own disjoint rune
        // was read, so all three can safely share one tid.
        let ast = Ast::alternate(vec![
            Ast::capture(1, Ast::literal('a')),
            Ast::capture(2, Ast::literal('b')),
            Ast::capture(3, Ast::literal('c')),
        ]);
        let prog = compile(&ast);
        let close_tids: Vec<Tid> = prog
            .insts
            .iter()
            .filter_map(|i| match i {
                Inst::Capture { group, tid, .. } if group % 2 == 1 && *group > 0 => Some(*tid),
                _ => None,
            })
            .collect();
        assert!(close_tids.iter().all(|&t| t != crate::inst::NO_TID));
        assert_eq!(close_tids.len(), 3, "expected one capture-close per branch");
        let first = close_tids[0];
        assert!(
            close_tids.iter().all(|&t| t == first),
            "continuations gated by disjoint runes should share a tid: {close_tids:?}"
        );
    }

    #[test]
    fn max_thread_num_is_at_least_one_for_any_match() {
        let prog = compile(&Ast::EmptyMatch);
        assert!(prog.max_thread_num >= 1);
    }
}
