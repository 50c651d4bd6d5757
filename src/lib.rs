//! Tool Sandbox
//!
//! A one-shot executor for untrusted tool code. The process reads a single
//! JSON request from stdin, runs the embedded restricted interpreter under
//! fixed resource ceilings, and writes exactly one JSON response envelope to
//! stdout before exiting.
//!
//! # Security Boundaries
//!
//! - Language: no imports, no attribute access, allow-listed builtins only
//! - Names: resolved at compile time; anything outside the table is rejected
//! - Memory: 256 MiB, charged in-band before allocation, rlimit backstop
//! - CPU: 60 s rlimit; wall clock: 120 s watchdog plus evaluator deadline
//! - I/O: stdout carries the envelope, logs are pinned to stderr

pub mod entry;
pub mod error;
pub mod limits;
pub mod logging;
pub mod protocol;
pub mod runner;
pub mod sandbox;
pub mod watchdog;

pub use error::SandboxError;
pub use protocol::{decode_request, encode_result, ExecutionRequest, ExecutionResult};
pub use runner::{execute_request, run_supervised};
pub use sandbox::{EvalBudget, Interpreter};
