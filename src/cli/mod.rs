use clap::Parser;
use std::path::{Path, PathBuf};

use crate::constants::PROJECT_DIR;
use crate::core::context_provider::parse_definition;
use crate::models::{ArgMap, ContextRequest};

/// The commands `strata` ships.
pub mod dispatcher;
/// Command bodies.
pub mod handlers;

/// Builds the color-aware help string from the localized template.
fn build_help_string() -> &'static str {
    let use_colors = colored::control::SHOULD_COLORIZE.should_colorize();
    let template = t!("cli.help.template");

    let title = if use_colors { "\x1b[1;33m" } else { "" }; // Bold Yellow
    let hl = if use_colors { "\x1b[1;36m" } else { "" }; // Bold Cyan
    let cmd = if use_colors { "\x1b[36m" } else { "" }; // Cyan
    let group = if use_colors { "\x1b[1;32m" } else { "" }; // Bold Green
    let dim = if use_colors { "\x1b[2m" } else { "" };
    let reset = if use_colors { "\x1b[0m" } else { "" };

    let formatted = template
        .replace("<title>", title)
        .replace("</title>", reset)
        .replace("<hl>", hl)
        .replace("</hl>", reset)
        .replace("<cmd>", cmd)
        .replace("</cmd>", reset)
        .replace("<group>", group)
        .replace("</group>", reset)
        .replace("<dim>", dim)
        .replace("</dim>", reset);

    Box::leak(formatted.into_boxed_str())
}

/// strata: layered-configuration build and deploy orchestration.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    help_template = { build_help_string() },
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Environment whose `.strata/<name>.project.yml` is layered on top.
    #[arg(short = 'e', long)]
    pub environment: Option<String>,

    /// Overrides a configuration value for this run.
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
    pub define: Vec<String>,

    /// Never prompt.
    #[arg(short = 'n', long)]
    pub no_interaction: bool,

    /// The command to run, e.g. `artifact:build`.
    pub command: Option<String>,

    /// Arguments for the command.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// The request the outermost invocation resolves its configuration from.
    pub fn context_request(&self, repo_root: &Path) -> anyhow::Result<ContextRequest> {
        let mut request = ContextRequest::new(repo_root);
        if let Some(environment) = self.environment.as_deref().filter(|e| !e.is_empty()) {
            request = request.with_environment(environment);
        }
        for definition in &self.define {
            let (key, value) = parse_definition(definition)?;
            request.overrides.insert(key, value);
        }
        Ok(request)
    }

    /// The command's own arguments.
    pub fn command_args(&self) -> ArgMap {
        parse_command_args(&self.args)
    }
}

/// Turns trailing command-line words into an argument map.
///
/// `--name=value` becomes an option, `--name` and `-x` become flags, and anything else
/// is positional (`arg1`, `arg2`, ...). Options take their value only through `=`.
pub fn parse_command_args(args: &[String]) -> ArgMap {
    let mut map = ArgMap::new();
    let mut position = 0;
    for arg in args {
        if arg.starts_with('-') && arg.len() > 1 {
            match arg.split_once('=') {
                Some((name, value)) => map.insert(name.to_string(), value.to_string()),
                None => map.insert(arg.clone(), String::new()),
            };
        } else {
            position += 1;
            map.insert(format!("arg{}", position), arg.clone());
        }
    }
    map
}

/// The nearest directory at or above `start` that holds a `.strata` directory.
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let start = dunce::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
    start
        .ancestors()
        .find(|dir| dir.join(PROJECT_DIR).is_dir())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_command_args() {
        let args = parse_command_args(&words(&[
            "--environment=prod",
            "--no-dev",
            "-v",
            "deploy",
            "--commit-msg=Release 1=2",
            "-",
        ]));

        assert_eq!(args.get("--environment").map(String::as_str), Some("prod"));
        assert_eq!(args.get("--no-dev").map(String::as_str), Some(""));
        assert_eq!(args.get("-v").map(String::as_str), Some(""));
        assert_eq!(args.get("arg1").map(String::as_str), Some("deploy"));
        assert_eq!(args.get("--commit-msg").map(String::as_str), Some("Release 1=2"));
        assert_eq!(args.get("arg2").map(String::as_str), Some("-"));
    }

    #[test]
    fn test_global_options_and_trailing_arguments() {
        let cli = Cli::try_parse_from([
            "strata",
            "-e",
            "prod",
            "-D",
            "deploy.dir=/tmp/out",
            "-n",
            "artifact:build",
            "--deploy-dir=/tmp/other",
        ])
        .unwrap();

        assert_eq!(cli.command.as_deref(), Some("artifact:build"));
        assert!(cli.no_interaction);

        let request = cli.context_request(Path::new("/repo")).unwrap();
        assert_eq!(request.environment, "prod");
        assert_eq!(
            request.overrides.get("deploy.dir").map(String::as_str),
            Some("/tmp/out")
        );
        assert_eq!(
            cli.command_args().get("--deploy-dir").map(String::as_str),
            Some("/tmp/other")
        );
    }

    #[test]
    fn test_malformed_definition_is_rejected() {
        let cli = Cli::try_parse_from(["strata", "-D", "novalue", "list"]).unwrap();
        assert!(cli.context_request(Path::new("/repo")).is_err());
    }

    #[test]
    fn test_find_repo_root_walks_up() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".strata")).unwrap();
        let nested = dir.path().join("web/modules/custom");
        fs::create_dir_all(&nested).unwrap();

        let root = find_repo_root(&nested).unwrap();
        assert_eq!(root, dunce::canonicalize(dir.path()).unwrap());

        let elsewhere = TempDir::new().unwrap();
        assert!(
            find_repo_root(elsewhere.path())
                .is_none_or(|found| found != dunce::canonicalize(elsewhere.path()).unwrap())
        );
    }
}
