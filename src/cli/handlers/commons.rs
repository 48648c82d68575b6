// src/cli/handlers/commons.rs

// Shared helpers for command bodies.

use anyhow::Result;
use std::path::PathBuf;

use crate::core::context_processor::ConfigSnapshot;
use crate::core::invoker::CommandInvoker;
use crate::core::recipes;
use crate::models::{Command, Input};

/// The artifact directory: `--deploy-dir` when given, else `deploy.dir`.
pub fn deploy_dir(input: &Input, config: &ConfigSnapshot) -> Result<PathBuf> {
    if let Some(dir) = input.option("--deploy-dir").filter(|d| !d.is_empty()) {
        let dir = PathBuf::from(shellexpand::tilde(&dir).into_owned());
        return Ok(if dir.is_absolute() {
            dir
        } else {
            config.request().repo_root.join(dir)
        });
    }
    Ok(config.require_path("deploy.dir")?)
}

/// `drush` with the configured site alias, ready to take a subcommand.
pub fn drush(config: &ConfigSnapshot) -> Result<String> {
    let bin = config.require_str("drush.bin")?;
    Ok(match config.get_str("drush.alias") {
        Some(alias) => format!("{} {}", bin, alias),
        None => bin.to_string(),
    })
}

/// Runs literal command lines in order through the recipe runner. Returns the exit code
/// for the calling command body.
pub fn run_lines<I>(invoker: &mut CommandInvoker, input: &Input, lines: I) -> Result<i32>
where
    I: IntoIterator<Item = String>,
{
    let commands: Vec<Command> = lines.into_iter().map(Command::exec).collect();
    recipes::invoke_commands(invoker, input, &commands)?;
    Ok(0)
}

/// `--yes` unless the run can prompt.
pub fn yes_flag(input: &Input) -> &'static str {
    if input.is_interactive() { "" } else { " --yes" }
}
