//! Autonomous task dispatcher with human review gates.
//!
//! This crate implements a work loop that drains a durable task queue by
//! delegating each task to an agent CLI in two phases, planning and execution,
//! with a human approval gate after each. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (selection, classification,
//!   quota, forest invariants). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (task store, config, git, agent
//!   subprocess, status and progress files). Isolated to enable mocking in
//!   tests.
//!
//! Orchestration modules ([`step`], [`gate`], [`session`], [`looping`])
//! coordinate core logic with I/O to implement the CLI commands.

pub mod core;
pub mod digest;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod logging;
pub mod looping;
pub mod session;
pub mod step;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
