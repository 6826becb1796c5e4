// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A linear-time Thompson-NFA regular expression bytecode engine.
//!
//! This crate has no syntax of its own: callers hand the compiler an
//! [`ast::Ast`] directly. From there:
//!
//! 1. [`compile::Compiler`] turns the `Ast` into a raw [`program::Prog`]
//!    of [`inst::Inst`]s via Thompson-construction fragments.
//! 2. [`optimize`] runs a fixed-point peephole pass over the raw
//!    program, then compacts away anything it made unreachable.
//! 3. [`threadid`] assigns every schedulable instruction a dense thread
//!    id, sharing one across provably mutually-exclusive alternatives.
//! 4. [`closure`] precomputes each epsilon-class instruction's flattened
//!    closure, so the simulator doesn't have to walk it at match time.
//! 5. [`machine::Machine`] runs Pike's VM over the finished program and
//!    a [`input::MachineInput`], in guaranteed O(text length × program
//!    size) time regardless of the pattern.
//!
//! `Compiler::compile` runs steps 2–4 itself; a caller only ever touches
//! step 1 and step 5 directly.

pub mod ast;
pub mod closure;
pub mod compile;
pub mod config;
pub mod error;
pub mod input;
pub mod inst;
pub mod machine;
pub mod optimize;
pub mod program;
pub mod threadid;

pub use ast::Ast;
pub use compile::Compiler;
pub use config::CompileConfig;
pub use error::{Error, Result};
pub use input::{MachineInput, StrInput};
pub use machine::{Anchor, Machine, MatchKind};
pub use program::Prog;
