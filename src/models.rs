// src/models.rs

use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use crate::constants::{DEFAULT_ENVIRONMENT, ENVIRONMENT_OPTION};

/// A nested configuration mapping, as parsed from any supported file format.
pub type ConfigMap = Map<String, Value>;

/// Arguments handed to a command: `--option` keys and named positional keys.
/// An empty value on an option key renders as a bare flag.
pub type ArgMap = BTreeMap<String, String>;

// --- CONFIGURATION CONTEXTS ---

/// The tier a context belongs to. Later tiers override earlier ones on key collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContextPriority {
    /// Fixed filesystem locations (repo root, docroot, temp dir...).
    System,
    /// Defaults shipped with the tool and the user's own defaults file.
    ToolDefaults,
    /// Defaults contributed by discovered extensions.
    ExtensionDefaults,
    /// The project's own configuration file.
    ProjectFile,
    /// The file named after the selected environment.
    ProjectEnvironmentFile,
    /// `-D key=value` definitions given on the command line.
    Runtime,
}

impl ContextPriority {
    /// A short label used in logs and `config:dump`.
    pub fn label(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::ToolDefaults => "tool-defaults",
            Self::ExtensionDefaults => "extension-defaults",
            Self::ProjectFile => "project-file",
            Self::ProjectEnvironmentFile => "project-environment-file",
            Self::Runtime => "runtime",
        }
    }
}

/// One named source of configuration values.
///
/// Contexts never change once collected. Recomputing configuration produces new
/// contexts with a higher `generation`, so `(id, generation)` identifies one exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigContext {
    pub id: String,
    pub priority: ContextPriority,
    pub generation: u64,
    pub values: ConfigMap,
}

impl ConfigContext {
    /// A context at generation 0; the resolver stamps the real generation.
    pub fn new(id: impl Into<String>, priority: ContextPriority, values: ConfigMap) -> Self {
        Self {
            id: id.into(),
            priority,
            generation: 0,
            values,
        }
    }
}

/// Everything context providers need to know to compute a set of contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRequest {
    /// The directory holding `.strata`.
    pub repo_root: PathBuf,
    /// Selects the `<environment>.project.yml` file.
    pub environment: String,
    /// Dotted `key -> raw value` pairs from `-D` flags.
    pub overrides: BTreeMap<String, String>,
}

impl ContextRequest {
    /// A request for the default environment with no overrides.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            overrides: BTreeMap::new(),
        }
    }

    /// Same request, other environment.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Derives the request for a nested invocation: same project, but the
    /// environment follows the sub-input's `--environment` when it carries one.
    pub fn for_input(&self, input: &Input) -> Self {
        match input.option(ENVIRONMENT_OPTION) {
            Some(environment) if !environment.is_empty() => {
                self.clone().with_environment(environment)
            }
            _ => self.clone(),
        }
    }
}

// --- COMMAND INPUT ---

/// The arguments a command runs with.
///
/// Clones share the same argument map, so a value set through one handle is visible
/// through every other. Live option pins rely on this.
#[derive(Debug, Clone, Default)]
pub struct Input {
    args: Rc<RefCell<ArgMap>>,
    interactive: bool,
}

impl Input {
    /// `interactive` decides whether commands may prompt.
    pub fn new(args: ArgMap, interactive: bool) -> Self {
        Self {
            args: Rc::new(RefCell::new(args)),
            interactive,
        }
    }

    /// Whether prompting is allowed.
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Returns the value for `name` (e.g. `--environment` or `target`), if set.
    pub fn option(&self, name: &str) -> Option<String> {
        self.args.borrow().get(name).cloned()
    }

    /// Bare flags are stored with an empty value.
    pub fn has_flag(&self, name: &str) -> bool {
        self.args.borrow().contains_key(name)
    }

    /// Visible through every clone of this input.
    pub fn set_option(&self, name: impl Into<String>, value: impl Into<String>) {
        self.args.borrow_mut().insert(name.into(), value.into());
    }

    /// A copy of the current argument map.
    pub fn args(&self) -> ArgMap {
        self.args.borrow().clone()
    }

    /// Renders the arguments the way they would be typed on a command line.
    pub fn render(&self) -> String {
        render_args(&self.args.borrow())
    }
}

/// Renders an argument map as a command-line string. Options come out as
/// `--name=value` (or `--name` for flags), positional values quoted when needed.
/// Positionals follow the options, `arg2` before `arg10`.
pub fn render_args(args: &ArgMap) -> String {
    let mut entries: Vec<_> = args.iter().collect();
    entries.sort_by_key(|(key, _)| (!key.starts_with('-'), positional_index(key)));
    entries
        .into_iter()
        .map(|(key, value)| {
            if key.starts_with('-') {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{}={}", key, quote_arg(value))
                }
            } else {
                quote_arg(value)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn positional_index(key: &str) -> usize {
    key.strip_prefix("arg")
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Quotes `value` for a POSIX shell command line when it needs quoting.
pub fn quote_arg(value: &str) -> String {
    shlex::try_quote(value)
        .map(|quoted| quoted.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

// --- COMMAND DESCRIPTORS ---

/// One step of a workflow.
///
/// An invokable command is run by name through the command invoker; any other
/// command is a literal external command line. Built once by a recipe and then
/// only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: ArgMap,
    invokable: bool,
}

impl Command {
    /// A step dispatched through the invoker (e.g. `artifact:build:sanitize`).
    pub fn invokable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: ArgMap::new(),
            invokable: true,
        }
    }

    /// A step executed verbatim as an external command line.
    pub fn exec(command_line: impl Into<String>) -> Self {
        Self {
            name: command_line.into(),
            args: ArgMap::new(),
            invokable: false,
        }
    }

    /// Adds an argument. Ignored by literal commands when they are run.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// The command name, or the whole line for a literal command.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments for an invokable command.
    pub fn args(&self) -> &ArgMap {
        &self.args
    }

    /// `true` when the step runs through the invoker.
    pub fn is_invokable(&self) -> bool {
        self.invokable
    }

    /// The full command line for literal commands, `name args` for invokable ones.
    pub fn render(&self) -> String {
        let args = render_args(&self.args);
        if args.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, args)
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_args_options_flags_and_positionals() {
        let mut args = ArgMap::new();
        args.insert("--environment".to_string(), "prod".to_string());
        args.insert("--no-dev".to_string(), String::new());
        args.insert("target".to_string(), "my site".to_string());

        assert_eq!(render_args(&args), "--environment=prod --no-dev 'my site'");
    }

    #[test]
    fn test_render_args_keeps_positionals_in_typed_order() {
        let args: ArgMap = (1..=11)
            .map(|n| (format!("arg{}", n), format!("p{}", n)))
            .chain([("--yes".to_string(), String::new())])
            .collect();

        assert_eq!(
            render_args(&args),
            "--yes p1 p2 p3 p4 p5 p6 p7 p8 p9 p10 p11"
        );
    }

    #[test]
    fn test_input_clones_share_arguments() {
        let input = Input::new(ArgMap::new(), true);
        let clone = input.clone();

        clone.set_option("--environment", "dev");

        assert_eq!(input.option("--environment").as_deref(), Some("dev"));
        assert!(input.is_interactive());
    }

    #[test]
    fn test_request_for_input_follows_environment_option() {
        let base = ContextRequest::new("/repo");
        let mut args = ArgMap::new();
        args.insert("--environment".to_string(), "prod".to_string());

        let nested = base.for_input(&Input::new(args, false));
        assert_eq!(nested.environment, "prod");
        assert_eq!(base.for_input(&Input::default()).environment, "local");
    }

    #[test]
    fn test_command_render() {
        let copy = Command::invokable("artifact:copy").with_arg("--deploy-dir", "/tmp/deploy");
        assert!(copy.is_invokable());
        assert_eq!(copy.render(), "artifact:copy --deploy-dir=/tmp/deploy");

        let push = Command::exec("git push origin main");
        assert!(!push.is_invokable());
        assert_eq!(push.to_string(), "git push origin main");
    }
}
