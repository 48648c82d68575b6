// src/cli/handlers/mod.rs

// Command bodies. Each one has the `CommandHandler` signature and is listed in the
// dispatcher's registry.

/// `artifact:*`
pub mod artifact;
/// Helpers shared by the handlers.
pub mod commons;
/// `config:dump`
pub mod config;
/// `drupal:*`
pub mod drupal;
/// `list`
pub mod list;
