//! Command-line surface of the node.

pub mod commands;

pub use commands::run_cli;
