// src/bin/strata.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use std::io::IsTerminal;
use std::rc::Rc;
use strata::{
    cli::{Cli, dispatcher, find_repo_root},
    core::{context_provider::ContextResolver, invoker::CommandInvoker, invoker::InvocationError},
    models::{ArgMap, Input},
    t,
};

/// Sets up logging, runs the requested command, and turns its outcome into the
/// process exit code.
fn main() {
    env_logger::init();

    match run_cli(Cli::parse()) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if let Some(InvocationError::Failed {
                command,
                arguments,
                exit_code,
            }) = e.downcast_ref::<InvocationError>()
            {
                let line = if arguments.is_empty() {
                    command.clone()
                } else {
                    format!("{} {}", command, arguments)
                };
                eprintln!("\n{}", t!("cli.error.failed_step").red().bold());
                eprintln!("  {}", line.red());
                std::process::exit(*exit_code);
            }

            eprintln!("\n{}: {:#}", t!("cli.error.label").red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn run_cli(cli: Cli) -> Result<i32> {
    log::debug!("CLI args parsed: {:?}", cli);

    let Some(command) = cli.command.clone() else {
        println!("{}", t!("cli.no_command"));
        return Ok(0);
    };

    let cwd = std::env::current_dir()?;
    let repo_root = find_repo_root(&cwd).unwrap_or_else(|| {
        log::debug!("No .strata directory above '{}'", cwd.display());
        cwd.clone()
    });
    let request = cli.context_request(&repo_root)?;
    let interactive = !cli.no_interaction && std::io::stdin().is_terminal();

    let mut invoker = CommandInvoker::new(
        Rc::new(dispatcher::registry()),
        ContextResolver::with_builtin_providers(),
        request,
    );
    invoker.invoke(
        &Input::new(ArgMap::new(), interactive),
        &command,
        cli.command_args(),
    )
}
