//! # Recipes
//!
//! A recipe turns the active configuration into an ordered list of [`Command`]s.
//! Every required key is checked before the first command is produced, so a recipe
//! either fails up front or returns a complete sequence.
//!
//! [`invoke_commands`] runs such a sequence: invokable steps go through the
//! [`CommandInvoker`], literal steps run as external processes in the repo root. The
//! first failing step stops the sequence. Steps already run are not undone.

use crate::core::context_processor::{ConfigError, ConfigSnapshot};
use crate::core::invoker::{CommandInvoker, InvocationError};
use crate::models::{Command, Input, quote_arg as quote};
use crate::system::executor;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// A named, configuration-driven sequence of commands.
pub trait Recipe {
    fn name(&self) -> &'static str;

    fn commands(&self, config: &ConfigSnapshot) -> Result<Vec<Command>, ConfigError>;
}

fn path_arg(path: &Path) -> String {
    quote(&dunce::simplified(path).to_string_lossy())
}

/// Builds the artifact into `deploy.dir`: front-end assets, copy, composer, sanitize.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommonBuildRecipe;

impl Recipe for CommonBuildRecipe {
    fn name(&self) -> &'static str {
        "common-build"
    }

    fn commands(&self, config: &ConfigSnapshot) -> Result<Vec<Command>, ConfigError> {
        let deploy_dir = config.require_path("deploy.dir")?;
        Ok(vec![
            Command::invokable("artifact:build:frontend"),
            Command::invokable("artifact:copy")
                .with_arg("--deploy-dir", dunce::simplified(&deploy_dir).to_string_lossy()),
            Command::invokable("artifact:composer:install"),
            Command::invokable("artifact:build:sanitize"),
        ])
    }
}

/// Commits the built artifact, optionally tags it, then pushes to every remote.
#[derive(Debug, Default, Clone)]
pub struct GitCommitTagRecipe {
    /// Overrides `deploy.commit_msg`.
    pub commit_message: Option<String>,
    /// Overrides `deploy.dir`.
    pub deploy_dir: Option<PathBuf>,
}

impl Recipe for GitCommitTagRecipe {
    fn name(&self) -> &'static str {
        "git-commit-tag"
    }

    fn commands(&self, config: &ConfigSnapshot) -> Result<Vec<Command>, ConfigError> {
        let deploy_dir = match &self.deploy_dir {
            Some(dir) => dir.clone(),
            None => config.require_path("deploy.dir")?,
        };
        let remotes = config
            .get_string_list("git.remotes")
            .filter(|remotes| !remotes.is_empty())
            .ok_or_else(|| ConfigError::MissingKey {
                key: "git.remotes".to_string(),
            })?;
        let branch = config.get_str("deploy.branch");
        let tag = config.get_str("deploy.tag");
        if branch.is_none() && tag.is_none() {
            return Err(ConfigError::MissingKey {
                key: "deploy.branch".to_string(),
            });
        }
        let message = match &self.commit_message {
            Some(message) if !message.trim().is_empty() => message.clone(),
            _ => config.require_str("deploy.commit_msg")?.to_string(),
        };

        let git = format!("git -C {}", path_arg(&deploy_dir));
        let mut commands = vec![Command::exec(format!("{} init --quiet", git))];
        if let Some(branch) = branch {
            commands.push(Command::exec(format!("{} checkout -B {}", git, quote(branch))));
        }
        commands.push(Command::exec(format!("{} add -A", git)));
        commands.push(Command::exec(format!(
            "{} commit --quiet -m {}",
            git,
            quote(&message)
        )));
        if let Some(tag) = tag {
            commands.push(Command::exec(format!(
                "{} tag -a {} -m {}",
                git,
                quote(tag),
                quote(&message)
            )));
        }
        for remote in &remotes {
            if let Some(branch) = branch {
                commands.push(Command::exec(format!(
                    "{} push {} {}",
                    git,
                    quote(remote),
                    quote(branch)
                )));
            }
            if let Some(tag) = tag {
                commands.push(Command::exec(format!(
                    "{} push {} refs/tags/{}",
                    git,
                    quote(remote),
                    quote(tag)
                )));
            }
        }
        Ok(commands)
    }
}

/// Pulls the database (and optionally files) from `sync.remote`, then runs updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncRecipe;

impl Recipe for SyncRecipe {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn commands(&self, config: &ConfigSnapshot) -> Result<Vec<Command>, ConfigError> {
        let remote = config.require_str("sync.remote")?;
        let drush = config.require_str("drush.bin")?;
        let local = config.get_str("drush.alias").unwrap_or("@self");

        let mut commands = vec![Command::exec(format!(
            "{} sql-sync {} {} --yes",
            drush,
            quote(remote),
            quote(local)
        ))];
        if config.get_bool("sync.files").unwrap_or(false) {
            commands.push(Command::exec(format!(
                "{} rsync {}:%files {}:%files --yes",
                drush,
                quote(remote),
                quote(local)
            )));
        }
        commands.push(Command::invokable("drupal:update"));
        Ok(commands)
    }
}

/// Installs the site and imports its configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetupRecipe;

impl Recipe for SetupRecipe {
    fn name(&self) -> &'static str {
        "setup"
    }

    fn commands(&self, _config: &ConfigSnapshot) -> Result<Vec<Command>, ConfigError> {
        Ok(vec![
            Command::invokable("drupal:install"),
            Command::invokable("drupal:config:import"),
        ])
    }
}

/// Runs `commands` in order and stops at the first failure.
///
/// Literal commands run in the repo root with the configured `env` map, and their
/// nonzero exit codes are reported as [`InvocationError::Failed`] like any other step.
pub fn invoke_commands(
    invoker: &mut CommandInvoker,
    parent: &Input,
    commands: &[Command],
) -> Result<()> {
    if commands.is_empty() {
        log::info!("{}", t!("recipe.empty"));
        return Ok(());
    }

    for command in commands {
        if command.is_invokable() {
            invoker.invoke(parent, command.name(), command.args().clone())?;
            continue;
        }

        let config = invoker.config()?;
        let cwd = config.request().repo_root.clone();
        let env = config.env_vars();
        let line = command.render();
        println!("{} {}", ">".repeat(invoker.depth() + 1), line);

        let exit_code = executor::execute_command(&line, &cwd, &env)
            .with_context(|| format!("Failed to run `{}`", line))?;
        if exit_code != 0 {
            return Err(InvocationError::Failed {
                command: line,
                arguments: String::new(),
                exit_code,
            }
            .into());
        }
    }
    Ok(())
}

/// Resolves `recipe` against the running command's configuration and runs it.
pub fn run_recipe(
    invoker: &mut CommandInvoker,
    parent: &Input,
    recipe: &dyn Recipe,
) -> Result<()> {
    let commands = recipe
        .commands(invoker.config()?)
        .with_context(|| format!("Recipe '{}' is not fully configured", recipe.name()))?;
    log::debug!("Recipe '{}' expands to {} step(s)", recipe.name(), commands.len());
    invoke_commands(invoker, parent, &commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context_provider::{ContextResolver, ProjectFileProvider};
    use crate::core::events::EventBus;
    use crate::core::registry::{CommandRegistry, ResolvedCommand};
    use crate::models::{ArgMap, ContextRequest};
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn snapshot(dir: &TempDir, project_yml: &str) -> ConfigSnapshot {
        let strata = dir.path().join(".strata");
        fs::create_dir_all(&strata).unwrap();
        fs::write(strata.join("project.yml"), project_yml).unwrap();
        let mut resolver = ContextResolver::new();
        resolver.register(ProjectFileProvider);
        resolver
            .resolve(&ContextRequest::new(dir.path()), &EventBus::new())
            .unwrap()
    }

    fn names(commands: &[Command]) -> Vec<String> {
        commands.iter().map(Command::render).collect()
    }

    #[test]
    fn test_common_build_order() {
        let dir = TempDir::new().unwrap();
        let config = snapshot(&dir, "deploy:\n  dir: /tmp/artifact\n");

        let commands = CommonBuildRecipe.commands(&config).unwrap();
        assert_eq!(
            names(&commands),
            vec![
                "artifact:build:frontend",
                "artifact:copy --deploy-dir=/tmp/artifact",
                "artifact:composer:install",
                "artifact:build:sanitize",
            ]
        );
        assert!(commands.iter().all(Command::is_invokable));
    }

    #[test]
    fn test_common_build_requires_deploy_dir() {
        let dir = TempDir::new().unwrap();
        let config = snapshot(&dir, "project:\n  machine_name: acme\n");
        assert!(matches!(
            CommonBuildRecipe.commands(&config),
            Err(ConfigError::MissingKey { ref key }) if key == "deploy.dir"
        ));
    }

    #[test]
    fn test_git_recipe_pushes_only_after_local_steps() {
        let dir = TempDir::new().unwrap();
        let config = snapshot(
            &dir,
            "deploy:\n  dir: /tmp/artifact\n  branch: main-build\n  tag: 1.0.0\n  commit_msg: Build\ngit:\n  remotes:\n    - git@example.com:acme/a.git\n    - git@example.com:acme/b.git\n",
        );

        let commands = GitCommitTagRecipe::default().commands(&config).unwrap();
        let lines = names(&commands);
        let git = "git -C /tmp/artifact";
        assert_eq!(
            lines,
            vec![
                format!("{} init --quiet", git),
                format!("{} checkout -B main-build", git),
                format!("{} add -A", git),
                format!("{} commit --quiet -m Build", git),
                format!("{} tag -a 1.0.0 -m Build", git),
                format!("{} push git@example.com:acme/a.git main-build", git),
                format!("{} push git@example.com:acme/a.git refs/tags/1.0.0", git),
                format!("{} push git@example.com:acme/b.git main-build", git),
                format!("{} push git@example.com:acme/b.git refs/tags/1.0.0", git),
            ]
        );
    }

    #[test]
    fn test_git_recipe_validates_before_producing_commands() {
        let dir = TempDir::new().unwrap();
        let no_remotes = snapshot(&dir, "deploy:\n  dir: /tmp/a\n  branch: main\n  commit_msg: x\n");
        assert!(matches!(
            GitCommitTagRecipe::default().commands(&no_remotes),
            Err(ConfigError::MissingKey { ref key }) if key == "git.remotes"
        ));

        let dir = TempDir::new().unwrap();
        let no_target = snapshot(
            &dir,
            "deploy:\n  dir: /tmp/a\n  commit_msg: x\ngit:\n  remotes: [origin]\n",
        );
        assert!(GitCommitTagRecipe::default().commands(&no_target).is_err());
    }

    #[test]
    fn test_git_recipe_message_override_is_quoted() {
        let dir = TempDir::new().unwrap();
        let config = snapshot(
            &dir,
            "deploy:\n  dir: /tmp/a\n  tag: v2\ngit:\n  remotes: [origin]\n",
        );
        let recipe = GitCommitTagRecipe {
            commit_message: Some("Release v2".to_string()),
            deploy_dir: None,
        };
        let lines = names(&recipe.commands(&config).unwrap());
        assert!(lines.contains(&"git -C /tmp/a commit --quiet -m 'Release v2'".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("git -C /tmp/a push origin refs/tags/v2"));
    }

    #[test]
    fn test_git_recipe_deploy_dir_override() {
        let dir = TempDir::new().unwrap();
        let config = snapshot(
            &dir,
            "deploy:\n  branch: main\n  commit_msg: Build\ngit:\n  remotes: [origin]\n",
        );
        let recipe = GitCommitTagRecipe {
            commit_message: None,
            deploy_dir: Some(PathBuf::from("/srv/out")),
        };
        let lines = names(&recipe.commands(&config).unwrap());
        assert!(lines.iter().all(|line| line.starts_with("git -C /srv/out ")));
    }

    #[test]
    fn test_sync_recipe_optional_files_step() {
        let dir = TempDir::new().unwrap();
        let config = snapshot(
            &dir,
            "drush:\n  bin: drush\n  alias: '@self'\nsync:\n  remote: '@prod'\n  files: true\n",
        );
        let commands = SyncRecipe.commands(&config).unwrap();
        assert_eq!(
            names(&commands),
            vec![
                "drush sql-sync @prod @self --yes",
                "drush rsync @prod:%files @self:%files --yes",
                "drupal:update",
            ]
        );
        assert!(commands.last().is_some_and(Command::is_invokable));

        let dir = TempDir::new().unwrap();
        let without_remote = snapshot(&dir, "drush:\n  bin: drush\n");
        assert!(SyncRecipe.commands(&without_remote).is_err());
    }

    struct Recording {
        calls: Rc<RefCell<Vec<String>>>,
        failing: &'static str,
    }

    impl CommandRegistry for Recording {
        fn resolve(&self, name: &str) -> Option<ResolvedCommand> {
            Some(ResolvedCommand {
                name: name.to_string(),
            })
        }

        fn run(
            &self,
            command: &ResolvedCommand,
            _input: &Input,
            _invoker: &mut CommandInvoker,
        ) -> Result<i32> {
            self.calls.borrow_mut().push(command.name.clone());
            Ok(if command.name == self.failing { 2 } else { 0 })
        }
    }

    fn recording_invoker(
        dir: &TempDir,
        failing: &'static str,
    ) -> (CommandInvoker, Rc<RefCell<Vec<String>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let registry = Recording {
            calls: Rc::clone(&calls),
            failing,
        };
        let mut resolver = ContextResolver::new();
        resolver.register(ProjectFileProvider);
        let invoker =
            CommandInvoker::new(Rc::new(registry), resolver, ContextRequest::new(dir.path()));
        (invoker, calls)
    }

    #[test]
    fn test_invoke_commands_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let (mut invoker, calls) = recording_invoker(&dir, "artifact:copy");

        let commands = vec![
            Command::invokable("artifact:build:frontend"),
            Command::invokable("artifact:copy"),
            Command::invokable("artifact:composer:install"),
        ];
        let err = invoke_commands(&mut invoker, &Input::default(), &commands).unwrap_err();

        assert_eq!(
            err.downcast_ref::<InvocationError>().and_then(InvocationError::exit_code),
            Some(2)
        );
        assert_eq!(*calls.borrow(), vec!["artifact:build:frontend", "artifact:copy"]);
        assert_eq!(invoker.stack().depth(), 0);
    }

    #[test]
    fn test_invoke_commands_passes_arguments() {
        let dir = TempDir::new().unwrap();
        let (mut invoker, calls) = recording_invoker(&dir, "");
        let commands = vec![Command::invokable("artifact:copy").with_arg("--deploy-dir", "/x")];

        invoke_commands(&mut invoker, &Input::new(ArgMap::new(), false), &commands).unwrap();
        assert_eq!(*calls.borrow(), vec!["artifact:copy"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_literal_commands_need_a_running_command() {
        let dir = TempDir::new().unwrap();
        let (mut invoker, _) = recording_invoker(&dir, "");
        let commands = vec![Command::exec("sh -c 'exit 4'")];

        // Outside any command there is no configuration to take the cwd from.
        assert!(invoke_commands(&mut invoker, &Input::default(), &commands).is_err());
    }

    /// Runs a fixed list of steps as the body of `runner`.
    struct Steps(Vec<Command>);

    impl CommandRegistry for Steps {
        fn resolve(&self, name: &str) -> Option<ResolvedCommand> {
            (name == "runner").then(|| ResolvedCommand {
                name: name.to_string(),
            })
        }

        fn run(
            &self,
            _command: &ResolvedCommand,
            input: &Input,
            invoker: &mut CommandInvoker,
        ) -> Result<i32> {
            invoke_commands(invoker, input, &self.0)?;
            Ok(0)
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_literal_step_stops_the_rest_and_reports_its_code() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("second-step-ran");
        let registry = Steps(vec![
            Command::exec("sh -c 'exit 4'"),
            Command::exec(format!("touch {}", quote(&marker.to_string_lossy()))),
        ]);
        let mut resolver = ContextResolver::new();
        resolver.register(ProjectFileProvider);
        let mut invoker =
            CommandInvoker::new(Rc::new(registry), resolver, ContextRequest::new(dir.path()));

        let err = invoker
            .invoke(&Input::default(), "runner", ArgMap::new())
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<InvocationError>(),
            Some(&InvocationError::Failed {
                command: "sh -c 'exit 4'".to_string(),
                arguments: String::new(),
                exit_code: 4,
            })
        );
        assert!(!marker.exists());
        assert_eq!(invoker.stack().depth(), 0);
        assert_eq!(invoker.depth(), 0);
    }
}
