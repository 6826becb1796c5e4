// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The abstract-syntax-tree contract the [`crate::compile::Compiler`]
//! consumes.
//!
//! This crate has no regex syntax parser of its own — callers build an
//! [`Ast`] directly (or generate one from whatever parser they like) and
//! hand it to [`crate::compile::Compiler::compile`].

use bitflags::bitflags;

bitflags! {
    /// Per-node compile flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct AstFlags: u8 {
        /// Case-insensitive match. Dropped by the compiler unless the
        /// caller has already folded the node's rune ranges — this crate
        /// owns no Unicode case-folding tables.
        const FOLD_CASE = 1 << 0;
        /// Prefer the non-greedy (lazy) branch for `Star`/`Plus`/`Quest`.
        const NON_GREEDY = 1 << 1;
    }
}

/// Index of a capture group. Group 0 is the whole match and is implicit —
/// it is never named explicitly in an `Ast::Capture` node.
pub type GroupIndex = u32;

/// A parsed regular expression, in the shape the compiler expects.
#[derive(Clone, Debug, PartialEq)]
pub enum Ast {
    /// Never matches.
    NoMatch,
    /// Matches the empty string unconditionally.
    EmptyMatch,
    /// A literal run of runes.
    Literal { runes: Vec<char>, flags: AstFlags },
    /// A character class: matches if the current rune falls in any of the
    /// inclusive ranges.
    CharClass { ranges: Vec<(char, char)>, flags: AstFlags },
    /// `.` including newline.
    AnyChar,
    /// `.` excluding newline.
    AnyCharNotNl,
    /// `^` in multi-line mode (or start of text outside it).
    BeginLine,
    /// `$` in multi-line mode (or end of text outside it).
    EndLine,
    /// `\A`.
    BeginText,
    /// `\z`.
    EndText,
    /// `\b`.
    WordBoundary,
    /// `\B`.
    NoWordBoundary,
    /// A capturing group.
    Capture { sub: Box<Ast>, group: GroupIndex },
    /// `sub*`.
    Star { sub: Box<Ast>, flags: AstFlags },
    /// `sub+`.
    Plus { sub: Box<Ast>, flags: AstFlags },
    /// `sub?`.
    Quest { sub: Box<Ast>, flags: AstFlags },
    /// Sequential composition.
    Concat(Vec<Ast>),
    /// Ordered choice; earlier alternatives have priority.
    Alternate(Vec<Ast>),
}

impl Ast {
    /// Convenience constructor for a single literal rune.
    pub fn literal(c: char) -> Ast {
        Ast::Literal { runes: vec![c], flags: AstFlags::empty() }
    }

    /// Convenience constructor for an unnamed capture group.
    pub fn capture(group: GroupIndex, sub: Ast) -> Ast {
        Ast::Capture { sub: Box::new(sub), group }
    }

    /// Wrap `self` in `Concat`, flattening if `self` is already one.
    pub fn concat(mut parts: Vec<Ast>) -> Ast {
        if parts.len() == 1 {
            return parts.pop().unwrap();
        }
        Ast::Concat(parts)
    }

    /// Wrap `self` in `Alternate`, flattening if `self` is already one.
    pub fn alternate(mut parts: Vec<Ast>) -> Ast {
        if parts.len() == 1 {
            return parts.pop().unwrap();
        }
        Ast::Alternate(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_of_one_unwraps() {
        let a = Ast::concat(vec![Ast::literal('a')]);
        assert_eq!(a, Ast::literal('a'));
    }

    #[test]
    fn concat_of_many_stays_wrapped() {
        let a = Ast::concat(vec![Ast::literal('a'), Ast::literal('b')]);
        assert!(matches!(a, Ast::Concat(ref v) if v.len() == 2));
    }

    #[test]
    fn flags_are_independent_bits() {
        let f = AstFlags::FOLD_CASE | AstFlags::NON_GREEDY;
        assert!(f.contains(AstFlags::FOLD_CASE));
        assert!(f.contains(AstFlags::NON_GREEDY));
        assert!(!AstFlags::FOLD_CASE.contains(AstFlags::NON_GREEDY));
    }
}
