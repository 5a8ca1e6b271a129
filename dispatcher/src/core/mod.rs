//! Deterministic, pure logic with no I/O.

pub mod classifier;
pub mod forest;
pub mod quota;
pub mod selector;
