//! # System Interaction Layer
//!
//! The boundary between orchestration logic and the operating system.
//!
//! - **`executor`**: spawns external command lines (composer, drush, git, rsync...) with
//!   the project's environment and reports their exit codes.

/// Spawning external command lines.
pub mod executor;
