// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Epsilon-closure precompute: for every epsilon-class
//! instruction (`Fail`, `Nop`, `Alt`, `AltMatch`), the flattened set of
//! non-epsilon pcs reachable by following only epsilon edges — so the
//! simulator's `add()` never has to walk the graph at match time.
//!
//! `Capture` and `EmptyWidth` are leaves here even though they have a
//! single successor of their own: their effect (recording a slot,
//! testing a zero-width condition) is a side effect that must happen at
//! actual `add()` time, not precompute time, so the precompute stops at
//! them rather than chasing through.
//!
//! Programs built from a quantifier over a sub-expression that can match
//! the empty string (e.g. `(a?)*`) can contain a genuine zero-width loop
//! in the epsilon subgraph. Flattening through such a loop would not
//! terminate, so this pass first finds the subgraph's strongly connected
//! components (Tarjan, run iteratively to bound stack depth on deep
//! programs) and leaves every loop participant's add-list empty — the
//! simulator detects the empty list on an epsilon pc and falls back to
//! walking its `out`/`arg` edges directly, the same way it always did
//! before this pass existed, relying on its own per-step thread dedup to
//! terminate.
//!
//! A second, independent condition also postpones flattening: an
//! epsilon pc reachable by two or more other epsilon pcs (other than the
//! program's own `start`) is left unresolved too, even when it sits
//! outside any loop. Flattening it would duplicate its leaf set into
//! every one of its predecessors' add-lists, which is still correct but
//! throws away the sharing a single dynamic expansion at `add()` time
//! would give for a node with several incoming paths. `start` itself is
//! exempt — nothing upstream of the whole program points into it, so
//! its own in-degree inside the epsilon subgraph is definitionally
//! irrelevant to this rule.
//!
//! This module also carries a deliberately naive `simple_epsilon_closure`
//! alongside the hardened one above, used only by tests: a direct,
//! unmemoized recursive walk with no SCC/in-degree awareness at all.
//! Wherever the hardened pass actually resolves a pc's add-list (leaves
//! it non-empty), the two must agree — that agreement is the add-list
//! soundness property this module is built to preserve.

use std::collections::HashSet;

use crate::inst::{Inst, Pc};
use crate::program::Prog;

/// Successors of `pc` within the epsilon subgraph: empty for any
/// non-epsilon (leaf) instruction, since leaves are collected, not
/// traversed further.
fn epsilon_succs(prog: &Prog, pc: Pc) -> Vec<Pc> {
    match prog.insts[pc as usize] {
        Inst::Fail => vec![],
        Inst::Nop { out } => vec![out],
        Inst::Alt { out, arg } | Inst::AltMatch { out, arg } => vec![out, arg],
        _ => vec![],
    }
}

/// Iterative Tarjan SCC over the epsilon subgraph. Returns components in
/// the order Tarjan closes them — a component's successors (in a
/// different component) are always closed before it is, which is
/// exactly the order `precompute_add_lists` needs to resolve bottom-up.
fn epsilon_sccs(prog: &Prog) -> Vec<Vec<Pc>> {
    let n = prog.insts.len();
    let adj: Vec<Vec<Pc>> = (0..n as Pc).map(|pc| epsilon_succs(prog, pc)).collect();
    let mut index: Vec<i64> = vec![-1; n];
    let mut lowlink: Vec<u32> = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<Pc> = Vec::new();
    let mut counter: u32 = 0;
    let mut sccs: Vec<Vec<Pc>> = Vec::new();
    let mut work: Vec<(Pc, usize)> = Vec::new();

    for start in 0..n as Pc {
        if !prog.insts[start as usize].is_epsilon() || index[start as usize] != -1 {
            continue;
        }
        index[start as usize] = counter as i64;
        lowlink[start as usize] = counter;
        counter += 1;
        stack.push(start);
        on_stack[start as usize] = true;
        work.push((start, 0));

        while let Some(&mut (v, ref mut ci)) = work.last_mut() {
            if *ci < adj[v as usize].len() {
                let w = adj[v as usize][*ci];
                *ci += 1;
                if index[w as usize] == -1 {
                    index[w as usize] = counter as i64;
                    lowlink[w as usize] = counter;
                    counter += 1;
                    stack.push(w);
                    on_stack[w as usize] = true;
                    work.push((w, 0));
                } else if on_stack[w as usize] {
                    lowlink[v as usize] = lowlink[v as usize].min(index[w as usize] as u32);
                }
            } else {
                work.pop();
                if let Some(&(parent, _)) = work.last() {
                    lowlink[parent as usize] = lowlink[parent as usize].min(lowlink[v as usize]);
                }
                if lowlink[v as usize] == index[v as usize] as u32 {
                    let mut comp = Vec::new();
                    loop {
                        let w = stack.pop().expect("scc stack underflow");
                        on_stack[w as usize] = false;
                        comp.push(w);
                        if w == v {
                            break;
                        }
                    }
                    sccs.push(comp);
                }
            }
        }
    }
    sccs
}

/// In-degree of every pc within the epsilon subgraph: how many distinct
/// epsilon pcs name it as one of their `epsilon_succs`.
fn epsilon_indegree(prog: &Prog) -> Vec<u32> {
    let n = prog.insts.len();
    let mut indegree = vec![0u32; n];
    for pc in 0..n as Pc {
        if !prog.insts[pc as usize].is_epsilon() {
            continue;
        }
        for succ in epsilon_succs(prog, pc) {
            indegree[succ as usize] += 1;
        }
    }
    indegree
}

/// The naive reference variant: a direct, unmemoized, visited-guarded
/// recursive walk through epsilon edges with no SCC or in-degree
/// analysis. Used only to check the hardened pass above against, never
/// at match time.
pub fn simple_epsilon_closure(prog: &Prog, pc: Pc) -> Vec<Pc> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    simple_walk(prog, pc, &mut out, &mut seen);
    out
}

fn simple_walk(prog: &Prog, pc: Pc, out: &mut Vec<Pc>, seen: &mut HashSet<Pc>) {
    if !seen.insert(pc) {
        return;
    }
    if !prog.insts[pc as usize].is_epsilon() {
        out.push(pc);
        return;
    }
    for succ in epsilon_succs(prog, pc) {
        simple_walk(prog, succ, out, seen);
    }
}

/// Flattens the leaf set reachable from `pc` by epsilon edges, reusing
/// already-resolved `add_list` entries where available and falling back
/// to a raw, visited-guarded walk for loop participants.
fn collect_leaves(prog: &Prog, pc: Pc, add_list: &[Box<[Pc]>], out: &mut Vec<Pc>, seen: &mut HashSet<Pc>) {
    if !seen.insert(pc) {
        return;
    }
    if !prog.insts[pc as usize].is_epsilon() {
        out.push(pc);
        return;
    }
    if !add_list[pc as usize].is_empty() {
        for &leaf in add_list[pc as usize].iter() {
            if seen.insert(leaf) {
                out.push(leaf);
            }
        }
        return;
    }
    for succ in epsilon_succs(prog, pc) {
        collect_leaves(prog, succ, add_list, out, seen);
    }
}

/// Populates `prog.add_list`. Must run after optimization and compaction
/// (so pcs are final); ordering relative to thread-id assignment doesn't
/// matter, but `Compiler::compile` runs it last regardless.
pub fn precompute_add_lists(prog: &mut Prog) {
    let n = prog.insts.len();
    let indegree = epsilon_indegree(prog);
    let start = prog.start;
    let mut add_list: Vec<Box<[Pc]>> = vec![Box::new([]) as Box<[Pc]>; n];
    for comp in epsilon_sccs(prog) {
        if comp.len() > 1 {
            continue; // genuine zero-width loop: leave empty, resolved dynamically
        }
        let pc = comp[0];
        if epsilon_succs(prog, pc).contains(&pc) {
            continue; // self-loop epsilon node: same deal
        }
        if !prog.insts[pc as usize].is_epsilon() {
            continue;
        }
        if pc != start && indegree[pc as usize] >= 2 {
            continue; // multiple incoming epsilon edges: leave for dynamic expansion
        }
        let mut leaves = Vec::new();
        let mut seen = HashSet::new();
        for succ in epsilon_succs(prog, pc) {
            collect_leaves(prog, succ, &add_list, &mut leaves, &mut seen);
        }
        add_list[pc as usize] = leaves.into_boxed_slice();
    }
    prog.add_list = add_list;
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
    fn leaf_pcs_have_empty_add_lists() {
        let prog = compile(&Ast::literal('a'));
        for (pc, inst) in prog.insts.iter().enumerate() {
            if !inst.is_epsilon() {
                assert!(prog.add_list[pc].is_empty(), "leaf pc {pc} should have no add_list");
            }
        }
    }

    #[test]
    fn epsilon_pcs_resolve_to_non_epsilon_leaves() {
        let ast = Ast::alternate(vec![Ast::literal('a'), Ast::literal('b')]);
        let prog = compile(&ast);
        for (pc, inst) in prog.insts.iter().enumerate() {
            if inst.is_epsilon() {
                for &leaf in prog.add_list[pc].iter() {
                    assert!(!prog.insts[leaf as usize].is_epsilon(), "add_list must only contain leaves");
                }
            }
        }
    }

    #[test]
    fn zero_width_loop_leaves_its_alt_unresolved() {
        // (a?)* can revisit its own Alt with no progress; that Alt's
        // add_list must be left empty for the simulator to expand live.
        let ast = Ast::Star {
            sub: Box::new(Ast::Quest { sub: Box::new(Ast::literal('a')), flags: Default::default() }),
            flags: Default::default(),
        };
        let prog = compile(&ast);
        let found_unresolved_alt = prog
            .insts
            .iter()
            .enumerate()
            .any(|(pc, inst)| inst.is_epsilon() && prog.add_list[pc].is_empty());
        assert!(found_unresolved_alt, "expected at least one loop-participant Alt left unresolved");
    }

    #[test]
    fn shared_epsilon_target_is_left_for_dynamic_expansion() {
        // Two distinct Alt nodes (1 and 2) both epsilon into pc 3 (a
        // third Alt, standing in for whatever real construct produces a
        // multi-predecessor join): pc 3 has epsilon in-degree 2 and must
        // be left unresolved even though it isn't part of any loop.
        use crate::inst::NO_TID;
        let mut prog = Prog {
            insts: vec![
                Inst::Fail,                                      // 0
                Inst::Alt { out: 3, arg: 4 },                     // 1
                Inst::Alt { out: 3, arg: 5 },                     // 2
                Inst::Alt { out: 4, arg: 5 },                     // 3: joined from 1 and 2
                Inst::Rune1 { out: 6, rune: 'a', tid: NO_TID },    // 4
                Inst::Rune1 { out: 6, rune: 'b', tid: NO_TID },    // 5
                Inst::Match { tid: NO_TID },                      // 6
            ],
            start: 1,
            num_cap: 2,
            max_thread_num: 1,
            add_list: Vec::new(),
            config: CompileConfig::new(),
        };
        precompute_add_lists(&mut prog);
        assert!(prog.add_list[3].is_empty(), "pc 3 has two epsilon predecessors and must stay unresolved");
        assert!(!prog.add_list[1].is_empty(), "pc 1 has a single predecessor (none) and should resolve");
    }

    /// Wherever the hardened pass resolves a pc's add-list (leaves it
    /// non-empty), it must agree exactly with what a direct,
    /// unmemoized walk from the same epsilon successors computes — the
    /// add-list soundness property this whole precompute exists for.
    #[test]
    fn hardened_add_lists_agree_with_the_simple_walk_wherever_resolved() {
        let progs = [
            compile(&Ast::literal('a')),
            compile(&Ast::concat(vec![Ast::literal('a'), Ast::literal('b')])),
            compile(&Ast::alternate(vec![Ast::literal('a'), Ast::literal('b'), Ast::literal('c')])),
            compile(&Ast::concat(vec![
                Ast::alternate(vec![Ast::literal('a'), Ast::literal('b')]),
                Ast::alternate(vec![Ast::literal('c'), Ast::literal('d')]),
            ])),
            compile(&Ast::Star { sub: Box::new(Ast::literal('a')), flags: Default::default() }),
            compile(&Ast::Star {
                sub: Box::new(Ast::Quest { sub: Box::new(Ast::literal('a')), flags: Default::default() }),
                flags: Default::default(),
            }),
        ];

        for prog in &progs {
            for (pc, inst) in prog.insts.iter().enumerate() {
                if !inst.is_epsilon() || prog.add_list[pc].is_empty() {
                    continue;
                }
                let mut expected = Vec::new();
                let mut seen = HashSet::new();
                for succ in epsilon_succs(prog, pc as Pc) {
                    let leaves = simple_epsilon_closure(prog, succ);
                    for leaf in leaves {
                        if seen.insert(leaf) {
                            expected.push(leaf);
                        }
                    }
                }
                let mut actual: Vec<Pc> = prog.add_list[pc].to_vec();
                let mut expected_sorted = expected.clone();
                actual.sort_unstable();
                expected_sorted.sort_unstable();
                assert_eq!(
                    actual, expected_sorted,
                    "pc {pc} hardened add_list disagrees with the simple walk"
                );
            }
        }
    }
}
