// src/core/mod.rs

/// One resolved snapshot per running command.
pub mod config_stack;
/// Merging contexts into a queryable snapshot.
pub mod context_processor;
/// Where configuration contexts come from.
pub mod context_provider;
/// In-process publish/subscribe.
pub mod events;
pub mod invoker;
/// Named command sequences.
pub mod recipes;
/// Command lookup by name or alias.
pub mod registry;
