// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Errors raised while compiling an [`crate::ast::Ast`] into a
//! [`crate::program::Prog`].
//!
//! There are no recoverable errors at match time: `Machine::search`
//! returns a boolean plus submatch spans, full stop. Everything here is a
//! compile-time condition.

use thiserror::Error;

/// Compile-time failure modes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An `Ast` node shape the compiler has no rule for. Since `Ast` is a
    /// closed enum owned by this crate, this only happens if a variant
    /// is added without a matching arm in `Compiler::c` — a programmer
    /// error, not something a caller's input can trigger.
    #[error("compiler has no rule for this AST node")]
    UnsupportedAst,

    /// More capture groups were requested than `CompileConfig` allows.
    #[error("too many capture groups: limit is {limit}, found group index {found}")]
    TooManyCaptures { limit: u32, found: u32 },

    /// The compiled program exceeds `CompileConfig::size_limit`
    /// instructions.
    #[error("compiled program has {actual} instructions, exceeding the limit of {limit}")]
    ProgramTooBig { limit: usize, actual: usize },

    /// A post-optimize validation pass found a structurally broken
    /// program (invariant (i)/(ii)/(iv) violated). This indicates an
    /// optimizer bug, not bad user input; see
    /// `crate::program::Prog::validate`.
    #[error("compiled program failed validation: {0}")]
    InvariantViolation(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
