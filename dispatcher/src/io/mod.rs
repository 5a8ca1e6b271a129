//! Filesystem, process and subprocess boundaries.

pub mod agent;
pub mod config;
pub mod git;
pub mod init;
pub mod process;
pub mod progress;
pub mod prompt;
pub mod status;
pub mod store;
