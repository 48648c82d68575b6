// src/cli/handlers/list.rs

use anyhow::Result;
use colored::*;

use crate::constants::COMMAND_SEPARATOR;
use crate::core::invoker::CommandInvoker;
use crate::models::Input;

/// `list`: every registered command, grouped by namespace. Commands switched off in
/// `disable-targets` are marked.
pub fn handle(_input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    let commands = invoker.registry().describe();
    let width = commands.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

    println!("{}", t!("cli.list.title").yellow().bold());
    let mut current_group = None;
    for (name, description) in &commands {
        let group = namespace(name);
        if current_group != Some(group) {
            println!("  {}", group.green().bold());
            current_group = Some(group);
        }
        let marker = if invoker.is_disabled(name)? {
            format!(" {}", t!("cli.list.disabled")).dimmed().to_string()
        } else {
            String::new()
        };
        let padded = format!("{:<width$}", name, width = width);
        println!("    {}  {}{}", padded.cyan(), description, marker);
    }
    Ok(0)
}

fn namespace(name: &str) -> &str {
    name.split_once(COMMAND_SEPARATOR)
        .map_or(name, |(group, _)| group)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace() {
        assert_eq!(namespace("artifact:build:frontend"), "artifact");
        assert_eq!(namespace("list"), "list");
    }
}
