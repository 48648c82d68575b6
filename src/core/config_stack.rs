// src/core/config_stack.rs

use crate::core::context_processor::ConfigSnapshot;
use crate::models::ContextRequest;
use thiserror::Error;

/// Errors from reading the stack.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StackError {
    /// No command is running.
    #[error("Configuration was read while no command was running (the configuration stack is empty).")]
    Empty,
}

/// Resolved configuration for every active command invocation, innermost last.
///
/// The top entry is the configuration the running command sees. Entries are only ever
/// replaced whole, never edited in place.
#[derive(Debug, Default)]
pub struct ConfigurationStack {
    entries: Vec<ConfigSnapshot>,
}

impl ConfigurationStack {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `snapshot` the active configuration.
    pub fn push(&mut self, snapshot: ConfigSnapshot) {
        log::trace!(
            "Pushing configuration generation {} (depth {} -> {})",
            snapshot.generation(),
            self.entries.len(),
            self.entries.len() + 1
        );
        self.entries.push(snapshot);
    }

    /// Drops the active configuration. Popping an empty stack only logs a warning.
    pub fn pop(&mut self) -> Option<ConfigSnapshot> {
        let popped = self.entries.pop();
        if popped.is_none() {
            log::warn!("Attempted to pop an empty configuration stack.");
        }
        popped
    }

    /// The active configuration.
    pub fn current(&self) -> Result<&ConfigSnapshot, StackError> {
        self.entries.last().ok_or(StackError::Empty)
    }

    /// Number of snapshots held.
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from the outermost invocation to the innermost.
    pub fn iter(&self) -> impl Iterator<Item = &ConfigSnapshot> {
        self.entries.iter()
    }

    /// Recomputes the top entry and replaces it. `resolve` receives the request the
    /// current top was built from. Entries below the top are left exactly as they were,
    /// even if they were derived from files the recomputation now reads differently.
    ///
    /// Returns `Ok(false)` without calling `resolve` when the stack is empty.
    pub fn reprocess<F, E>(&mut self, resolve: F) -> Result<bool, E>
    where
        F: FnOnce(&ContextRequest) -> Result<ConfigSnapshot, E>,
    {
        let depth = self.entries.len();
        let Some(top) = self.entries.last_mut() else {
            return Ok(false);
        };
        let fresh = resolve(top.request())?;
        log::debug!(
            "Reprocessed configuration at depth {}: generation {} -> {}",
            depth,
            top.generation(),
            fresh.generation()
        );
        *top = fresh;
        Ok(true)
    }
}
