include!(concat!(env!("OUT_DIR"), "/messages.rs"));

/// Argument parsing, the command table and command bodies.
pub mod cli;
/// File names, keys and defaults shared across modules.
pub mod constants;
/// Configuration resolution, the invoker and recipes.
pub mod core;
/// Plain data types passed between modules.
pub mod models;
/// Running external programs.
pub mod system;
