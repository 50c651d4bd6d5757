//! Embedded restricted interpreter.
//!
//! Untrusted tool code is executed by a purpose-built interpreter rather than
//! a general-purpose runtime. The language has no import mechanism, no
//! attribute access, no filesystem or network surface. The only capabilities
//! a program can reach are the entries of the fixed builtin table in
//! [`builtins`], and name resolution happens at compile time, so a reference
//! to anything outside that table is rejected before evaluation starts.
//!
//! Pipeline: [`token`] lexes, [`parser`] builds the [`ast`], [`compile`]
//! resolves names and produces a [`compile::CompiledUnit`], and [`eval`] runs
//! it under an [`eval::EvalBudget`].

pub mod ast;
pub mod builtins;
pub mod compile;
pub mod env;
pub mod eval;
pub mod parser;
pub mod token;
pub mod value;

pub use compile::{compile_restricted, CompiledUnit};
pub use eval::{EvalBudget, Interpreter};
pub use value::Value;
