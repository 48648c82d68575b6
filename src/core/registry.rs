// src/core/registry.rs

use crate::core::invoker::CommandInvoker;
use crate::models::Input;
use anyhow::Result;
use std::fmt;

/// The signature every command body implements. The returned value is the exit code.
pub type CommandHandler = fn(&Input, &mut CommandInvoker) -> Result<i32>;

/// A command, its aliases, and its handler.
pub struct CommandDefinition {
    /// Canonical `namespace:command` name.
    pub name: &'static str,
    /// Other names that resolve to this command.
    pub aliases: &'static [&'static str],
    /// One line for `list`.
    pub description: &'static str,
    /// The command body.
    pub handler: CommandHandler,
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

/// A command the registry has agreed to run, identified by its canonical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    /// The canonical name, even when resolved through an alias.
    pub name: String,
}

/// Where the invoker looks commands up and runs them.
///
/// `run` receives the invoker so a command body can invoke further commands.
pub trait CommandRegistry {
    /// Finds a command by name or alias.
    fn resolve(&self, name: &str) -> Option<ResolvedCommand>;

    /// Runs a resolved command and returns its exit code.
    fn run(
        &self,
        command: &ResolvedCommand,
        input: &Input,
        invoker: &mut CommandInvoker,
    ) -> Result<i32>;

    /// `(name, description)` pairs for listings, sorted by name.
    fn describe(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// A registry backed by a static table of [`CommandDefinition`]s.
#[derive(Debug, Clone, Copy)]
pub struct StaticRegistry {
    commands: &'static [CommandDefinition],
}

impl StaticRegistry {
    /// Wraps a static command table.
    pub const fn new(commands: &'static [CommandDefinition]) -> Self {
        Self { commands }
    }

    /// Finds a command definition by its name or alias.
    pub fn find(&self, name: &str) -> Option<&'static CommandDefinition> {
        self.commands
            .iter()
            .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
    }
}

impl CommandRegistry for StaticRegistry {
    fn resolve(&self, name: &str) -> Option<ResolvedCommand> {
        self.find(name).map(|cmd| ResolvedCommand {
            name: cmd.name.to_string(),
        })
    }

    fn run(
        &self,
        command: &ResolvedCommand,
        input: &Input,
        invoker: &mut CommandInvoker,
    ) -> Result<i32> {
        let definition = self
            .find(&command.name)
            .ok_or_else(|| anyhow::anyhow!("Command '{}' vanished from the registry.", command.name))?;
        (definition.handler)(input, invoker)
    }

    fn describe(&self) -> Vec<(String, String)> {
        let mut listing: Vec<_> = self
            .commands
            .iter()
            .map(|cmd| (cmd.name.to_string(), cmd.description.to_string()))
            .collect();
        listing.sort();
        listing
    }
}
