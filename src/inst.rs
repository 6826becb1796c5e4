// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The instruction set of the compiled bytecode program.
//!
//! An [`Inst`] is one node in the flat instruction array that makes up a
//! [`crate::program::Prog`]. Unlike a C or Go translation of this same
//! design (which tends to use one struct with a handful of overloaded
//! fields), each opcode gets its own variant here — that's the natural
//! Rust shape for a closed, tagged union, and a `match` on `Inst` can't
//! forget a field that doesn't apply to the opcode at hand.

use bitflags::bitflags;

/// Index into the instruction array of a [`crate::program::Prog`].
pub type Pc = u32;

/// pc 0 is always [`Inst::Fail`] — reserved as the patch-list terminator
/// and as the target of a failed alternative.
pub const FAIL_PC: Pc = 0;

/// Dense sparse-set slot assigned to an instruction by the thread-id
/// allocator (`crate::threadid`). [`NO_TID`] marks an instruction that is
/// never itself scheduled as a thread (`Fail`, `Nop`, `Alt`, `AltMatch`).
pub type Tid = u32;

/// Sentinel for "this instruction is never scheduled as a thread".
pub const NO_TID: Tid = u32::MAX;

bitflags! {
    /// Zero-width assertion conditions, as a bitmask.
    ///
    /// `EMPTY_WIDTH(flags, delta)` succeeds iff the zero-width context at
    /// `pos + delta` satisfies every bit set in `flags`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EmptyFlags: u8 {
        const BEGIN_LINE       = 1 << 0;
        const END_LINE         = 1 << 1;
        const BEGIN_TEXT       = 1 << 2;
        const END_TEXT         = 1 << 3;
        const WORD_BOUNDARY    = 1 << 4;
        const NO_WORD_BOUNDARY = 1 << 5;
    }
}

impl EmptyFlags {
    /// All zero-width conditions at once. A compiled `EMPTY_WIDTH` whose
    /// flags equal `ALL` can never be satisfied (e.g. `\b` and `\B` both
    /// required at the same position).
    pub const ALL: EmptyFlags = EmptyFlags::from_bits_truncate(
        EmptyFlags::BEGIN_LINE.bits()
            | EmptyFlags::END_LINE.bits()
            | EmptyFlags::BEGIN_TEXT.bits()
            | EmptyFlags::END_TEXT.bits()
            | EmptyFlags::WORD_BOUNDARY.bits()
            | EmptyFlags::NO_WORD_BOUNDARY.bits(),
    );

    /// `true` iff no `context()` bitmask could ever satisfy `self`.
    pub fn is_unsatisfiable(self) -> bool {
        self == EmptyFlags::ALL
    }
}

/// A half-open, inclusive-pair rune range, e.g. `('a', 'z')`.
pub type RuneRange = (char, char);

/// An instruction in a compiled program.
///
/// `out` (and, for two-successor opcodes, `arg`) are program counters into
/// the same `Vec<Inst>`. A value that was never patched indicates a
/// compiler bug, not a valid empty branch (empty branches are represented
/// by patching to `Match` or another real pc, never left dangling).
#[derive(Clone, Debug)]
pub enum Inst {
    /// Fixed at pc 0. No successors. Also doubles as the patch-list
    /// terminator: a `PatchList` value of 0 means "empty list".
    Fail,
    /// Terminal accept state.
    Match { tid: Tid },
    /// Single successor, eliminated by the optimizer's NOP-elimination
    /// pass. A self-loop `Nop` (`out == self`) is left in place so that
    /// closure computation still terminates.
    Nop { out: Pc },
    /// Records `pos + offset` into capture slot `group`.
    Capture { out: Pc, group: u32, offset: i32, tid: Tid },
    /// Succeeds iff the zero-width context at `pos + delta` satisfies
    /// every bit of `flags`.
    EmptyWidth { out: Pc, flags: EmptyFlags, delta: i32, tid: Tid },
    /// Matches if the current rune falls in any of `runes`' inclusive
    /// pairs. `runes` is kept sorted in ascending order (invariant iii).
    Rune { out: Pc, runes: Box<[RuneRange]>, tid: Tid },
    /// A single literal rune. Specialization of `Rune` for a one-element,
    /// one-wide range.
    Rune1 { out: Pc, rune: char, tid: Tid },
    /// `.` including newline.
    RuneAny { out: Pc, tid: Tid },
    /// `.` excluding newline.
    RuneAnyNotNl { out: Pc, tid: Tid },
    /// Two successors; `out` is the preferred (higher-priority) branch.
    Alt { out: Pc, arg: Pc },
    /// An `Alt` where one branch is statically known to accept
    /// immediately (used by the trailing-single-rune-loop rewrite).
    AltMatch { out: Pc, arg: Pc },
    /// Fused `Alt` of a `Rune1` and a non-overlapping alternative `arg`:
    /// on a rune mismatch, control falls through to `arg` without an
    /// intervening `Alt` dispatch.
    AltRune1 { rune: char, out: Pc, arg: Pc, tid: Tid },
    /// Same fusion as `AltRune1` but for a rune range.
    AltRune { runes: Box<[RuneRange]>, out: Pc, arg: Pc, tid: Tid },
}

impl Inst {
    /// The primary successor, if this opcode has one. `Fail` and `Match`
    /// have none.
    pub fn out(&self) -> Option<Pc> {
        use Inst::*;
        match *self {
            Fail => None,
            Match { .. } => None,
            Nop { out }
            | Capture { out, .. }
            | EmptyWidth { out, .. }
            | Rune { out, .. }
            | Rune1 { out, .. }
            | RuneAny { out, .. }
            | RuneAnyNotNl { out, .. }
            | Alt { out, .. }
            | AltMatch { out, .. }
            | AltRune1 { out, .. }
            | AltRune { out, .. } => Some(out),
        }
    }

    /// Overwrite the primary successor slot. Panics on opcodes with no
    /// `out` slot — those are never patch-list targets.
    pub fn set_out(&mut self, pc: Pc) {
        use Inst::*;
        match self {
            Nop { out }
            | Capture { out, .. }
            | EmptyWidth { out, .. }
            | Rune { out, .. }
            | Rune1 { out, .. }
            | RuneAny { out, .. }
            | RuneAnyNotNl { out, .. }
            | Alt { out, .. }
            | AltMatch { out, .. }
            | AltRune1 { out, .. }
            | AltRune { out, .. } => *out = pc,
            Fail | Match { .. } => {
                panic!("Inst::set_out on an opcode with no out slot")
            }
        }
    }

    /// The secondary (`arg`) successor, for two-successor opcodes.
    pub fn arg(&self) -> Option<Pc> {
        use Inst::*;
        match *self {
            Alt { arg, .. }
            | AltMatch { arg, .. }
            | AltRune1 { arg, .. }
            | AltRune { arg, .. } => Some(arg),
            _ => None,
        }
    }

    /// Overwrite the `arg` slot. Panics on opcodes with no `arg` slot.
    pub fn set_arg(&mut self, pc: Pc) {
        use Inst::*;
        match self {
            Alt { arg, .. } | AltMatch { arg, .. } | AltRune1 { arg, .. } | AltRune { arg, .. } => {
                *arg = pc
            }
            _ => panic!("Inst::set_arg on an opcode with no arg slot"),
        }
    }

    /// The thread-id slot, for schedulable opcodes. `None` for `Fail`,
    /// `Nop`, `Alt` and `AltMatch` (invariant vi).
    pub fn tid(&self) -> Option<Tid> {
        use Inst::*;
        match *self {
            Match { tid }
            | Capture { tid, .. }
            | EmptyWidth { tid, .. }
            | Rune { tid, .. }
            | Rune1 { tid, .. }
            | RuneAny { tid, .. }
            | RuneAnyNotNl { tid, .. }
            | AltRune1 { tid, .. }
            | AltRune { tid, .. } => Some(tid),
            Fail | Nop { .. } | Alt { .. } | AltMatch { .. } => None,
        }
    }

    /// Assign a thread-id. Panics if this opcode has no tid slot.
    pub fn set_tid(&mut self, new_tid: Tid) {
        use Inst::*;
        match self {
            Match { tid }
            | Capture { tid, .. }
            | EmptyWidth { tid, .. }
            | Rune { tid, .. }
            | Rune1 { tid, .. }
            | RuneAny { tid, .. }
            | RuneAnyNotNl { tid, .. }
            | AltRune1 { tid, .. }
            | AltRune { tid, .. } => *tid = new_tid,
            Fail | Nop { .. } | Alt { .. } | AltMatch { .. } => {
                panic!("Inst::set_tid on an opcode with no tid slot")
            }
        }
    }

    /// `true` for the control-flow opcodes a thread never directly
    /// occupies: `Fail`, `Nop`, `Alt`, `AltMatch`. These are exactly the
    /// opcodes epsilon-closure expansion walks through.
    pub fn is_epsilon(&self) -> bool {
        matches!(self, Inst::Fail | Inst::Nop { .. } | Inst::Alt { .. } | Inst::AltMatch { .. })
    }

    /// `true` for an opcode that consumes an input rune.
    pub fn is_consuming(&self) -> bool {
        matches!(
            self,
            Inst::Rune { .. }
                | Inst::Rune1 { .. }
                | Inst::RuneAny { .. }
                | Inst::RuneAnyNotNl { .. }
                | Inst::AltRune1 { .. }
                | Inst::AltRune { .. }
        )
    }

    /// If this is a `Rune1`/`AltRune1`, the single required rune.
    pub fn required_rune1(&self) -> Option<char> {
        match *self {
            Inst::Rune1 { rune, .. } | Inst::AltRune1 { rune, .. } => Some(rune),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_has_no_slots() {
        assert_eq!(Inst::Fail.out(), None);
        assert_eq!(Inst::Fail.arg(), None);
        assert_eq!(Inst::Fail.tid(), None);
    }

    #[test]
    fn match_has_tid_but_no_successor() {
        let m = Inst::Match { tid: 3 };
        assert_eq!(m.out(), None);
        assert_eq!(m.tid(), Some(3));
    }

    #[test]
    fn alt_round_trips_out_and_arg() {
        let mut alt = Inst::Alt { out: 1, arg: 2 };
        assert_eq!(alt.out(), Some(1));
        assert_eq!(alt.arg(), Some(2));
        alt.set_out(5);
        alt.set_arg(6);
        assert_eq!(alt.out(), Some(5));
        assert_eq!(alt.arg(), Some(6));
        assert_eq!(alt.tid(), None);
    }

    #[test]
    fn is_epsilon_classifies_control_flow_opcodes() {
        assert!(Inst::Fail.is_epsilon());
        assert!(Inst::Nop { out: 0 }.is_epsilon());
        assert!(Inst::Alt { out: 0, arg: 0 }.is_epsilon());
        assert!(Inst::AltMatch { out: 0, arg: 0 }.is_epsilon());
        assert!(!Inst::Match { tid: 0 }.is_epsilon());
        assert!(!Inst::Rune1 { out: 0, rune: 'a', tid: 0 }.is_epsilon());
    }

    #[test]
    fn empty_flags_all_is_unsatisfiable() {
        assert!(EmptyFlags::ALL.is_unsatisfiable());
        assert!(!EmptyFlags::BEGIN_TEXT.is_unsatisfiable());
    }

    #[test]
    fn required_rune1_only_on_rune1_variants() {
        assert_eq!(Inst::Rune1 { out: 0, rune: 'x', tid: 0 }.required_rune1(), Some('x'));
        assert_eq!(
            Inst::AltRune1 { rune: 'y', out: 0, arg: 0, tid: 0 }.required_rune1(),
            Some('y')
        );
        assert_eq!(Inst::RuneAny { out: 0, tid: 0 }.required_rune1(), None);
    }
}
