// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! AST → bytecode compilation via Thompson fragments.
//!
//! Each `Ast` node compiles to a [`Frag`]: an entry pc plus an unpatched
//! out-list. Composing fragments (`cat`, `alt`, `quest`, `star`, `plus`)
//! never needs to know the final address anything jumps to — the
//! patch-list machinery in `crate::program` resolves every jump once, at
//! the end.

use log::debug;

use crate::ast::{Ast, AstFlags, GroupIndex};
use crate::config::CompileConfig;
use crate::error::{Error, Result};
use crate::inst::{EmptyFlags, Inst, Pc, RuneRange, FAIL_PC, NO_TID};
use crate::program::{Frag, PatchList, Prog};

fn any_char_range() -> RuneRange {
    ('\u{0}', char::MAX)
}

fn any_char_not_nl_ranges() -> Vec<RuneRange> {
    vec![('\u{0}', '\u{9}'), ('\u{b}', char::MAX)]
}

/// Builds a [`Prog`] from an [`Ast`].
pub struct Compiler {
    config: CompileConfig,
    insts: Vec<Inst>,
    max_group: GroupIndex,
}

impl Compiler {
    /// Creates a new compiler under the given size/capture limits.
    pub fn new(config: CompileConfig) -> Compiler {
        Compiler { config, insts: vec![Inst::Fail], max_group: 0 }
    }

    /// Compiles `ast` into a complete, optimized, compacted program.
    ///
    /// The whole expression is implicitly wrapped in capture group 0
    /// (matching the AST contract's convention that group 0 is never
    /// named explicitly), then followed by a `Match`.
    pub fn compile(mut self, ast: &Ast) -> Result<Prog> {
        let body = self.c(ast)?;
        let whole = self.cap(0, body)?;
        let matched = self.push(Inst::Match { tid: NO_TID });
        let start = if whole.is_fail() {
            FAIL_PC
        } else {
            whole.out.patch(&mut self.insts, matched);
            whole.entry
        };
        debug!("compiled {} raw instructions, {} capture groups", self.insts.len(), self.max_group + 1);

        let mut prog = Prog {
            insts: self.insts,
            start,
            num_cap: (self.max_group + 1) * 2,
            max_thread_num: 0,
            add_list: Vec::new(),
            config: self.config,
        };

        crate::optimize::optimize(&mut prog);
        debug!("optimized and compacted to {} instructions", prog.insts.len());
        crate::threadid::assign_thread_ids(&mut prog);
        crate::closure::precompute_add_lists(&mut prog);

        if prog.insts.len() > prog.config.size_limit {
            return Err(Error::ProgramTooBig {
                limit: prog.config.size_limit,
                actual: prog.insts.len(),
            });
        }

        #[cfg(debug_assertions)]
        prog.validate()?;

        Ok(prog)
    }

    fn push(&mut self, inst: Inst) -> Pc {
        self.insts.push(inst);
        (self.insts.len() - 1) as Pc
    }

    // --- Frag constructors ----------------------------------------------

    fn nop(&mut self) -> Frag {
        let pc = self.push(Inst::Nop { out: 0 });
        Frag { entry: pc, out: PatchList::out(pc) }
    }

    fn empty(&mut self, flags: EmptyFlags) -> Frag {
        let pc = self.push(Inst::EmptyWidth { out: 0, flags, delta: 0, tid: NO_TID });
        Frag { entry: pc, out: PatchList::out(pc) }
    }

    /// `FOLD_CASE` is dropped: this crate owns no Unicode case-folding
    /// tables, so a caller that wants case-insensitive matching must
    /// have already expanded `runes` to include the folded variants.
    fn rune(&mut self, mut runes: Vec<RuneRange>, _flags: AstFlags) -> Frag {
        runes.sort();
        let inst = if runes.len() == 1 && runes[0] == any_char_range() {
            Inst::RuneAny { out: 0, tid: NO_TID }
        } else if runes == any_char_not_nl_ranges() {
            Inst::RuneAnyNotNl { out: 0, tid: NO_TID }
        } else if runes.len() == 1 && runes[0].0 == runes[0].1 {
            Inst::Rune1 { out: 0, rune: runes[0].0, tid: NO_TID }
        } else {
            Inst::Rune { out: 0, runes: runes.into_boxed_slice(), tid: NO_TID }
        };
        let pc = self.push(inst);
        Frag { entry: pc, out: PatchList::out(pc) }
    }

    fn cap(&mut self, group: GroupIndex, a: Frag) -> Result<Frag> {
        if group > self.config.max_captures {
            return Err(Error::TooManyCaptures { limit: self.config.max_captures, found: group });
        }
        self.max_group = self.max_group.max(group);
        if a.is_fail() {
            return Ok(Frag::fail());
        }
        let open = self.push(Inst::Capture { out: 0, group: group * 2, offset: 0, tid: NO_TID });
        let close = self.push(Inst::Capture { out: 0, group: group * 2 + 1, offset: 0, tid: NO_TID });
        self.insts[open as usize].set_out(a.entry);
        a.out.patch(&mut self.insts, close);
        Ok(Frag { entry: open, out: PatchList::out(close) })
    }

    fn cat(&mut self, a: Frag, b: Frag) -> Frag {
        if a.is_fail() || b.is_fail() {
            return Frag::fail();
        }
        a.out.patch(&mut self.insts, b.entry);
        Frag { entry: a.entry, out: b.out }
    }

    fn alt(&mut self, a: Frag, b: Frag) -> Frag {
        if a.is_fail() {
            return b;
        }
        if b.is_fail() {
            return a;
        }
        let pc = self.push(Inst::Alt { out: a.entry, arg: b.entry });
        let out = a.out.append(&mut self.insts, b.out);
        Frag { entry: pc, out }
    }

    fn quest(&mut self, a: Frag, nongreedy: bool) -> Frag {
        if a.is_fail() {
            // `sub?` where `sub` can never match degenerates to an
            // unconditional empty match (zero occurrences is forced).
            return self.nop();
        }
        let pc = if nongreedy {
            self.push(Inst::Alt { out: 0, arg: a.entry })
        } else {
            self.push(Inst::Alt { out: a.entry, arg: 0 })
        };
        let skip_slot = if nongreedy { PatchList::out(pc) } else { PatchList::arg(pc) };
        let out = skip_slot.append(&mut self.insts, a.out);
        Frag { entry: pc, out }
    }

    fn star(&mut self, a: Frag, nongreedy: bool) -> Frag {
        if a.is_fail() {
            // `sub*` where `sub` can never match degenerates the same way
            // as `sub?` with a failing sub: zero reps, always.
            return self.nop();
        }
        let pc = if nongreedy {
            self.push(Inst::Alt { out: 0, arg: a.entry })
        } else {
            self.push(Inst::Alt { out: a.entry, arg: 0 })
        };
        a.out.patch(&mut self.insts, pc);
        let out = if nongreedy { PatchList::out(pc) } else { PatchList::arg(pc) };
        Frag { entry: pc, out }
    }

    fn plus(&mut self, a: Frag, nongreedy: bool) -> Frag {
        if a.is_fail() {
            return Frag::fail();
        }
        let pc = if nongreedy {
            self.push(Inst::Alt { out: 0, arg: a.entry })
        } else {
            self.push(Inst::Alt { out: a.entry, arg: 0 })
        };
        a.out.patch(&mut self.insts, pc);
        let out = if nongreedy { PatchList::out(pc) } else { PatchList::arg(pc) };
        Frag { entry: a.entry, out }
    }

    // --- AST walk ------------------------------------------------------

    fn c(&mut self, ast: &Ast) -> Result<Frag> {
        match ast {
            Ast::NoMatch => Ok(Frag::fail()),
            Ast::EmptyMatch => Ok(self.nop()),
            Ast::Literal { runes, flags } => {
                let mut acc: Option<Frag> = None;
                for &r in runes {
                    let f = self.rune(vec![(r, r)], *flags);
                    acc = Some(match acc {
                        None => f,
                        Some(prev) => self.cat(prev, f),
                    });
                }
                Ok(acc.unwrap_or_else(|| self.nop()))
            }
            Ast::CharClass { ranges, flags } => Ok(self.rune(ranges.clone(), *flags)),
            Ast::AnyChar => Ok(self.rune(vec![any_char_range()], AstFlags::empty())),
            Ast::AnyCharNotNl => Ok(self.rune(any_char_not_nl_ranges(), AstFlags::empty())),
            Ast::BeginLine => Ok(self.empty(EmptyFlags::BEGIN_LINE)),
            Ast::EndLine => Ok(self.empty(EmptyFlags::END_LINE)),
            Ast::BeginText => Ok(self.empty(EmptyFlags::BEGIN_TEXT)),
            Ast::EndText => Ok(self.empty(EmptyFlags::END_TEXT)),
            Ast::WordBoundary => Ok(self.empty(EmptyFlags::WORD_BOUNDARY)),
            Ast::NoWordBoundary => Ok(self.empty(EmptyFlags::NO_WORD_BOUNDARY)),
            Ast::Capture { sub, group } => {
                let inner = self.c(sub)?;
                self.cap(*group, inner)
            }
            Ast::Star { sub, flags } => {
                let inner = self.c(sub)?;
                Ok(self.star(inner, flags.contains(AstFlags::NON_GREEDY)))
            }
            Ast::Plus { sub, flags } => {
                let inner = self.c(sub)?;
                Ok(self.plus(inner, flags.contains(AstFlags::NON_GREEDY)))
            }
            Ast::Quest { sub, flags } => {
                let inner = self.c(sub)?;
                Ok(self.quest(inner, flags.contains(AstFlags::NON_GREEDY)))
            }
            Ast::Concat(parts) => {
                let mut acc = self.nop();
                for p in parts {
                    let f = self.c(p)?;
                    acc = self.cat(acc, f);
                }
                Ok(acc)
            }
            Ast::Alternate(parts) => {
                let mut iter = parts.iter();
                let Some(first) = iter.next() else {
                    return Ok(Frag::fail());
                };
                let mut acc = self.c(first)?;
                for p in iter {
                    let f = self.c(p)?;
                    acc = self.alt(acc, f);
                }
                Ok(acc)
            }
        }
    }
}
