// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The peephole optimizer and post-optimize compaction.
//!
//! Every rewrite here must be a semantic no-op: it only ever changes
//! *how* the program reaches the same verdict, never *whether* it does.
//! The driver iterates every rewrite to a fixed point, then compacts.

use std::collections::HashSet;

use log::trace;

use crate::inst::{Inst, Pc, RuneRange, FAIL_PC, NO_TID};
use crate::program::Prog;

/// Bound on the `can_be_second_branch` oracle's walk. The oracle must
/// terminate even on a pathologically large alternation; past this many
/// steps it gives up and conservatively answers "cannot prove disjoint".
const MAX_ORACLE_STEPS: usize = 256;

/// Runs the optimizer to a fixed point, then compacts the program.
pub fn optimize(prog: &mut Prog) {
    let mut round = 0u32;
    loop {
        round += 1;
        let mut changes = 0u32;
        let len = prog.insts.len() as Pc;
        for pc in 0..len {
            if rewrite_nop_elimination(prog, pc) {
                changes += 1;
            }
            if rewrite_delay_capture(prog, pc) {
                changes += 1;
            }
            if rewrite_empty_width_rune_reorder(prog, pc) {
                changes += 1;
            }
            if rewrite_alt_to_alt_rune(prog, pc) {
                changes += 1;
            }
            if rewrite_overlapping_alt_split(prog, pc) {
                changes += 1;
            }
            if rewrite_restructure_bubble(prog, pc) {
                changes += 1;
            }
            if rewrite_branch_order(prog, pc) {
                changes += 1;
            }
            if rewrite_associativity(prog, pc) {
                changes += 1;
            }
        }
        if strip_start_nop(prog) {
            changes += 1;
        }
        trace!("optimizer round {round}: {changes} rewrite applications");
        if changes == 0 {
            break;
        }
    }
    compact(prog);
}

// --- 1. NOP elimination -------------------------------------------------

fn rewrite_nop_elimination(prog: &mut Prog, pc: Pc) -> bool {
    let mut changed = false;
    if let Some(out) = prog.insts[pc as usize].out() {
        if let Some(target) = skip_nop_chain(prog, out) {
            if target != out {
                prog.insts[pc as usize].set_out(target);
                changed = true;
            }
        }
    }
    if let Some(arg) = prog.insts[pc as usize].arg() {
        if let Some(target) = skip_nop_chain(prog, arg) {
            if target != arg {
                prog.insts[pc as usize].set_arg(target);
                changed = true;
            }
        }
    }
    changed
}

/// `None` if `pc` is not itself a `Nop` (nothing to skip). Otherwise the
/// pc a chain of `Nop`s ultimately lands on. A self-loop `Nop` is
/// reported as itself, leaving the reference unchanged — self-loop NOPs
/// are left alone to guarantee termination.
fn skip_nop_chain(prog: &Prog, start: Pc) -> Option<Pc> {
    if !matches!(prog.insts[start as usize], Inst::Nop { .. }) {
        return None;
    }
    let mut pc = start;
    loop {
        match prog.insts[pc as usize] {
            Inst::Nop { out } if out == pc => return Some(pc),
            Inst::Nop { out } => {
                if out == start {
                    return Some(pc); // a Nop cycle; stop, don't loop forever
                }
                pc = out;
            }
            _ => return Some(pc),
        }
    }
}

// --- 2. Start-NOP strip --------------------------------------------------

fn strip_start_nop(prog: &mut Prog) -> bool {
    let mut changed = false;
    loop {
        match prog.insts[prog.start as usize] {
            Inst::Nop { out } if out != prog.start => {
                prog.start = out;
                changed = true;
            }
            _ => break,
        }
    }
    changed
}

// --- 3 & 10. Delay-capture / EMPTY_WIDTH-RUNE reorder --------------------
//
// Both rewrites move a position-dependent, non-consuming instruction
// (`Capture`, `EmptyWidth`) to *after* the rune test that used to follow
// it, so a failed rune test never pays for the bookkeeping. Implemented
// as one relocation primitive: clone the consuming instruction's matcher
// into the host pc (so every existing predecessor of the host now hits
// the rune test first), and push a fresh trailing node — carrying the
// adjusted offset/delta — after it. The original consumer pc is left in
// place (possibly still reachable from elsewhere) and swept by `compact`
// if nothing points to it anymore.

/// Relocates a `Rune1` consumer to `host_pc`'s slot and pushes a fresh
/// trailing node built from `out2` and the consumer's exact UTF-8 byte
/// width (known statically only because the consumer is a single literal
/// rune — `Rune`/`RuneAny`/`RuneAnyNotNl` match runes of varying width,
/// so the byte-precise offset arithmetic this needs doesn't generalize
/// to them; this is a deliberate narrowing of the general rewrite to its
/// unconditionally-safe sub-case, see DESIGN.md).
fn relocate_rune1_before_trailer(
    prog: &mut Prog,
    host_pc: Pc,
    consumer_pc: Pc,
    make_trailer: impl FnOnce(Pc, i32) -> Inst,
) -> bool {
    let (rune, out2) = match prog.insts[consumer_pc as usize] {
        Inst::Rune1 { rune, out, .. } => (rune, out),
        _ => return false,
    };
    let width = rune.len_utf8() as i32;
    let trailer_pc = prog.insts.len() as Pc;
    prog.insts.push(make_trailer(out2, width));
    prog.insts[host_pc as usize] = Inst::Rune1 { out: trailer_pc, rune, tid: NO_TID };
    true
}

fn rewrite_delay_capture(prog: &mut Prog, pc: Pc) -> bool {
    let (out, group, offset) = match prog.insts[pc as usize] {
        Inst::Capture { out, group, offset, .. } => (out, group, offset),
        _ => return false,
    };
    relocate_rune1_before_trailer(prog, pc, out, |out2, width| Inst::Capture {
        out: out2,
        group,
        offset: offset - width,
        tid: NO_TID,
    })
}

fn rewrite_empty_width_rune_reorder(prog: &mut Prog, pc: Pc) -> bool {
    let (out, flags, delta) = match prog.insts[pc as usize] {
        Inst::EmptyWidth { out, flags, delta, .. } => (out, flags, delta),
        _ => return false,
    };
    relocate_rune1_before_trailer(prog, pc, out, |out2, width| Inst::EmptyWidth {
        out: out2,
        flags,
        delta: delta - width,
        tid: NO_TID,
    })
}

// --- 4 & 7. ALT → ALT_RUNE1 / ALT_RUNE fusion ----------------------------
//
// Rule 7 (trailing single-rune loop collapse) is structurally a special
// case of rule 4 under this representation: when `out`'s rune successor
// happens to point back at `pc` itself, fusing it produces exactly
// `loop: ALT_RUNEx(loop, tail)` — no separate rewrite is needed.

fn rewrite_alt_to_alt_rune(prog: &mut Prog, pc: Pc) -> bool {
    let (out, arg) = match prog.insts[pc as usize] {
        Inst::Alt { out, arg } => (out, arg),
        _ => return false,
    };
    match prog.insts[out as usize].clone() {
        Inst::Rune1 { rune, out: out2, .. } => {
            if can_be_second_branch(prog, arg, &[(rune, rune)]) {
                prog.insts[pc as usize] = Inst::AltRune1 { rune, out: out2, arg, tid: NO_TID };
                return true;
            }
        }
        Inst::Rune { runes, out: out2, .. } => {
            if can_be_second_branch(prog, arg, &runes) {
                prog.insts[pc as usize] = Inst::AltRune { runes, out: out2, arg, tid: NO_TID };
                return true;
            }
        }
        _ => {}
    }
    false
}

/// The must-not-overlap oracle: conservatively answers whether the
/// branch entered at `entry` can be proven to never accept any rune in
/// `forbidden` as its first consumed rune. Walks through `AltRune*`
/// chains and single-successor `Capture`/`Alt`/`Nop` nodes; any
/// unrecognized shape — notably `EmptyWidth`, whose interaction with a
/// zero-width assertion on the other branch is not provably safe to
/// ignore — forces a conservative `false`.
fn can_be_second_branch(prog: &Prog, entry: Pc, forbidden: &[RuneRange]) -> bool {
    let mut stack = vec![entry];
    let mut seen = HashSet::new();
    let mut steps = 0usize;
    while let Some(pc) = stack.pop() {
        steps += 1;
        if steps > MAX_ORACLE_STEPS {
            return false;
        }
        if !seen.insert(pc) {
            continue;
        }
        match &prog.insts[pc as usize] {
            Inst::Fail => {}
            Inst::Match { .. } => {}
            Inst::Nop { out } => stack.push(*out),
            Inst::Capture { out, .. } => stack.push(*out),
            Inst::Alt { out, arg } | Inst::AltMatch { out, arg } => {
                stack.push(*out);
                stack.push(*arg);
            }
            Inst::Rune1 { rune, .. } => {
                if ranges_contain(forbidden, *rune) {
                    return false;
                }
            }
            Inst::Rune { runes, .. } => {
                if ranges_overlap(forbidden, runes) {
                    return false;
                }
            }
            Inst::RuneAny { .. } => return false,
            Inst::RuneAnyNotNl { .. } => {
                // Accepts everything except '\n'; overlaps with
                // `forbidden` unless `forbidden` is exactly {'\n'}.
                if !ranges_are_only(forbidden, '\n') {
                    return false;
                }
            }
            Inst::AltRune1 { rune, arg, .. } => {
                if ranges_contain(forbidden, *rune) {
                    return false;
                }
                stack.push(*arg);
            }
            Inst::AltRune { runes, arg, .. } => {
                if ranges_overlap(forbidden, runes) {
                    return false;
                }
                stack.push(*arg);
            }
            Inst::EmptyWidth { .. } => return false,
        }
    }
    true
}

fn ranges_contain(ranges: &[RuneRange], r: char) -> bool {
    ranges.iter().any(|&(lo, hi)| r >= lo && r <= hi)
}

fn ranges_overlap(a: &[RuneRange], b: &[RuneRange]) -> bool {
    a.iter().any(|&(lo, hi)| b.iter().any(|&(lo2, hi2)| lo <= hi2 && lo2 <= hi))
}

/// `true` iff `ranges` contains nothing but the single rune `excl` — used
/// to test overlap against "every rune except `excl`" without
/// materializing that (possibly huge) complementary range set.
fn ranges_are_only(ranges: &[RuneRange], excl: char) -> bool {
    ranges.iter().all(|&(lo, hi)| lo == hi && lo == excl)
}

// --- 5. Overlapping ALT split (reduced) ----------------------------------
//
// Full generality also hoists when "A's tail always accepts"; that
// sub-case is not implemented here (a documented
// simplification — see DESIGN.md). The implemented sub-case handles the
// unconditionally-safe shape: both branches are the exact same single
// rune, so the `Alt`'s priority is observationally irrelevant and the
// two branches can be merged into one dispatch on the shared rune.
fn rewrite_overlapping_alt_split(prog: &mut Prog, pc: Pc) -> bool {
    let (out, arg) = match prog.insts[pc as usize] {
        Inst::Alt { out, arg } => (out, arg),
        _ => return false,
    };
    let (r1, out2) = match prog.insts[out as usize] {
        Inst::Rune1 { rune, out: o, .. } => (rune, o),
        _ => return false,
    };
    let (r2, arg2) = match prog.insts[arg as usize] {
        Inst::Rune1 { rune, out: o, .. } => (rune, o),
        _ => return false,
    };
    if r1 != r2 {
        return false;
    }
    prog.insts[pc as usize] = Inst::Rune1 { out: 0, rune: r1, tid: NO_TID };
    let merge = prog.insts.len() as Pc;
    prog.insts.push(Inst::Alt { out: out2, arg: arg2 });
    prog.insts[pc as usize].set_out(merge);
    true
}

// --- 6. Restructure: bubble ALT_RUNE* outward ----------------------------

fn rewrite_restructure_bubble(prog: &mut Prog, pc: Pc) -> bool {
    let (out, z) = match prog.insts[pc as usize] {
        Inst::Alt { out, arg } => (out, arg),
        _ => return false,
    };
    match prog.insts[out as usize].clone() {
        Inst::AltRune1 { rune, out: t, arg: x, .. } => {
            let new_alt = prog.insts.len() as Pc;
            prog.insts.push(Inst::Alt { out: x, arg: z });
            prog.insts[pc as usize] = Inst::AltRune1 { rune, out: t, arg: new_alt, tid: NO_TID };
            true
        }
        Inst::AltRune { runes, out: t, arg: x, .. } => {
            let new_alt = prog.insts.len() as Pc;
            prog.insts.push(Inst::Alt { out: x, arg: z });
            prog.insts[pc as usize] = Inst::AltRune { runes, out: t, arg: new_alt, tid: NO_TID };
            true
        }
        _ => false,
    }
}

// --- 8. Branch-order canonicalization ------------------------------------
//
// Safe precisely because the two branches are provably mutually
// exclusive (distinct literal runes can't both match the same
// position), so swapping which one `Alt` prefers has no observable
// effect on leftmost-first semantics.
fn rewrite_branch_order(prog: &mut Prog, pc: Pc) -> bool {
    let (out, arg) = match prog.insts[pc as usize] {
        Inst::Alt { out, arg } => (out, arg),
        _ => return false,
    };
    let r1 = match prog.insts[out as usize] {
        Inst::Rune1 { rune, .. } => rune,
        _ => return false,
    };
    let r2 = match prog.insts[arg as usize] {
        Inst::Rune1 { rune, .. } => rune,
        _ => return false,
    };
    if r1 > r2 {
        prog.insts[pc as usize] = Inst::Alt { out: arg, arg: out };
        true
    } else {
        false
    }
}

// --- 9. Associativity rewrite ---------------------------------------------

fn rewrite_associativity(prog: &mut Prog, pc: Pc) -> bool {
    let (out, z) = match prog.insts[pc as usize] {
        Inst::Alt { out, arg } => (out, arg),
        _ => return false,
    };
    let (x, y) = match prog.insts[out as usize] {
        Inst::Alt { out: x, arg: y } => (x, y),
        _ => return false,
    };
    if matches!(prog.insts[x as usize], Inst::Alt { .. }) {
        return false; // inside-out: only rewrite once X is not itself an Alt
    }
    let new_alt = prog.insts.len() as Pc;
    prog.insts.push(Inst::Alt { out: y, arg: z });
    prog.insts[pc as usize] = Inst::Alt { out: x, arg: new_alt };
    true
}

// --- 4.4 Compaction --------------------------------------------------------

/// Depth-first reachability from `start` (reserving pc 0 for `Fail`),
/// reassigning pcs in visit order and rewriting every successor through
/// the resulting map.
pub fn compact(prog: &mut Prog) {
    let n = prog.insts.len();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);

    visited[FAIL_PC as usize] = true;
    order.push(FAIL_PC);

    let mut stack = vec![prog.start];
    while let Some(pc) = stack.pop() {
        if visited[pc as usize] {
            continue;
        }
        visited[pc as usize] = true;
        order.push(pc);
        let inst = &prog.insts[pc as usize];
        // Push `arg` before `out` so `out` — the higher-priority branch
        // — is popped (and thus numbered) first.
        if let Some(arg) = inst.arg() {
            if !visited[arg as usize] {
                stack.push(arg);
            }
        }
        if let Some(out) = inst.out() {
            if !visited[out as usize] {
                stack.push(out);
            }
        }
    }

    let mut remap = vec![0u32; n];
    for (new_pc, &old_pc) in order.iter().enumerate() {
        remap[old_pc as usize] = new_pc as u32;
    }

    let mut new_insts = Vec::with_capacity(order.len());
    for &old_pc in &order {
        let mut inst = prog.insts[old_pc as usize].clone();
        if let Some(out) = inst.out() {
            inst.set_out(remap[out as usize]);
        }
        if let Some(arg) = inst.arg() {
            inst.set_arg(remap[arg as usize]);
        }
        new_insts.push(inst);
    }
    prog.start = remap[prog.start as usize];
    prog.insts = new_insts;
}

#[cfg(test)]
mod tests {
    use quickcheck::{quickcheck, TestResult};

    use super::*;
    use crate::ast::Ast;
    use crate::compile::Compiler;
    use crate::config::CompileConfig;
    use crate::input::StrInput;
    use crate::machine::{Anchor, Machine};

    fn matches(prog: &Prog, text: &str) -> bool {
        Machine::new(prog).search(&StrInput::new(text), 0, Anchor::Unanchored).is_some()
    }

    #[test]
    fn compaction_drops_unreachable_and_keeps_semantics() {
        let ast = Ast::concat(vec![Ast::literal('a'), Ast::literal('b')]);
        let prog = Compiler::new(CompileConfig::new()).compile(&ast).expect("compiles");
        assert!(prog.validate().is_ok());
        assert!(matches(&prog, "ab"));
        assert!(!matches(&prog, "ac"));
    }

    #[test]
    fn optimizer_is_idempotent() {
        let ast = Ast::Star {
            sub: Box::new(Ast::CharClass {
                ranges: vec![('a', 'c'), ('x', 'z')],
                flags: Default::default(),
            }),
            flags: Default::default(),
        };
        let mut prog = Compiler::new(CompileConfig::new()).compile(&ast).unwrap();
        let before = format!("{:?}", prog.insts);
        optimize(&mut prog);
        let after = format!("{:?}", prog.insts);
        assert_eq!(before, after);
    }

    #[test]
    fn alternation_of_literals_still_leftmost_first() {
        // /(a|ab)/ on "ab" must match "a", not "ab".
        let ast = Ast::alternate(vec![
            Ast::capture(1, Ast::literal('a')),
            Ast::capture(1, Ast::concat(vec![Ast::literal('a'), Ast::literal('b')])),
        ]);
        let prog = Compiler::new(CompileConfig::new()).compile(&ast).unwrap();
        let mut m = Machine::new(&prog);
        let caps = m.search(&StrInput::new("ab"), 0, Anchor::Unanchored).unwrap();
        assert_eq!((caps[0], caps[1]), (Some(0), Some(1)));
    }

    quickcheck! {
        /// The optimized, compacted program an arbitrary literal word
        /// compiles to must still find that exact word wherever it occurs
        /// in a padded haystack, and must not claim a match in a haystack
        /// that never contains it.
        fn prop_literal_survives_optimization(word: String, prefix: String, suffix: String) -> TestResult {
            let joined = format!("{prefix}{suffix}");
            if word.is_empty() || joined.contains(&word[..]) {
                return TestResult::discard();
            }
            let ast = Ast::Literal { runes: word.chars().collect(), flags: Default::default() };
            let prog = match Compiler::new(CompileConfig::new()).compile(&ast) {
                Ok(prog) => prog,
                Err(_) => return TestResult::discard(),
            };
            assert!(prog.validate().is_ok());

            let haystack = format!("{prefix}{word}{suffix}");
            let found = matches(&prog, &haystack);
            let not_found = !matches(&prog, &joined);
            TestResult::from_bool(found && not_found)
        }
    }
}
