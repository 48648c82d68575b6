// src/cli/handlers/drupal.rs

use anyhow::Result;
use colored::*;

use super::commons;
use crate::constants::ENVIRONMENT_OPTION;
use crate::core::invoker::{CommandInvoker, InvocationError};
use crate::core::recipes::{self, SetupRecipe, SyncRecipe};
use crate::models::{ArgMap, Input, quote_arg};

/// `drupal:install`
pub fn install(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    let config = invoker.config()?;
    let drush = commons::drush(config)?;
    let profile = config.require_str("project.profile.name")?;
    let mut line = format!(
        "{} site:install {} --site-name={}{}",
        drush,
        quote_arg(profile),
        quote_arg(config.require_str("project.machine_name")?),
        commons::yes_flag(input)
    );
    if config.get_str("cm.strategy").is_some_and(|s| s != "none") {
        line.push_str(" --existing-config");
    }
    commons::run_lines(invoker, input, [line])
}

/// `drupal:config:import`: imports through config split, falling back to a plain core
/// import when the split import fails.
pub fn config_import(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    let strategy = invoker
        .config()?
        .get_str("cm.strategy")
        .unwrap_or("none")
        .to_string();

    match strategy.as_str() {
        "none" => {
            log::info!("Configuration management is disabled (cm.strategy: none).");
            Ok(0)
        }
        "core-only" => invoker.invoke(input, "drupal:config:import:core", ArgMap::new()),
        _ => match invoker.invoke(input, "drupal:config:import:split", ArgMap::new()) {
            Err(e) if matches!(
                e.downcast_ref::<InvocationError>(),
                Some(InvocationError::Failed { .. })
            ) =>
            {
                println!(
                    "{} {}",
                    "Split import failed, retrying with a core import:".yellow(),
                    e
                );
                invoker.invoke(input, "drupal:config:import:core", ArgMap::new())
            }
            other => other,
        },
    }
}

/// `drupal:config:import:split`
pub fn config_import_split(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    let drush = commons::drush(invoker.config()?)?;
    commons::run_lines(
        invoker,
        input,
        [
            format!("{} config-split:import{}", drush, commons::yes_flag(input)),
            format!("{} cache:rebuild", drush),
        ],
    )
}

/// `drupal:config:import:core`
pub fn config_import_core(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    let drush = commons::drush(invoker.config()?)?;
    commons::run_lines(
        invoker,
        input,
        [
            format!("{} config:import{}", drush, commons::yes_flag(input)),
            format!("{} cache:rebuild", drush),
        ],
    )
}

/// `drupal:update`: database updates, then a cache rebuild.
pub fn update(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    let drush = commons::drush(invoker.config()?)?;
    commons::run_lines(
        invoker,
        input,
        [
            format!("{} updatedb{}", drush, commons::yes_flag(input)),
            format!("{} cache:rebuild", drush),
        ],
    )
}

/// `drupal:sync`: pulls data from `sync.remote`. The environment this command runs in
/// is pinned for every nested step, however deep.
pub fn sync(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    let environment = invoker.config()?.environment().to_string();
    invoker.pin_global(ENVIRONMENT_OPTION, environment);
    let result = recipes::run_recipe(invoker, input, &SyncRecipe);
    invoker.unpin_global(ENVIRONMENT_OPTION);
    result?;
    Ok(0)
}

/// `drupal:setup`: install, then import configuration.
pub fn setup(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    recipes::run_recipe(invoker, input, &SetupRecipe)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context_provider::{ContextResolver, ProjectFileProvider};
    use crate::core::registry::{CommandRegistry, ResolvedCommand};
    use crate::models::ContextRequest;
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Runs the real `drupal:config:import` body with scripted import steps.
    struct ImportRegistry {
        split_exit_code: i32,
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl CommandRegistry for ImportRegistry {
        fn resolve(&self, name: &str) -> Option<ResolvedCommand> {
            Some(ResolvedCommand {
                name: name.to_string(),
            })
        }

        fn run(
            &self,
            command: &ResolvedCommand,
            input: &Input,
            invoker: &mut CommandInvoker,
        ) -> Result<i32> {
            self.calls.borrow_mut().push(command.name.clone());
            match command.name.as_str() {
                "drupal:config:import" => config_import(input, invoker),
                "drupal:config:import:split" => Ok(self.split_exit_code),
                _ => Ok(0),
            }
        }
    }

    fn run_import(strategy: &str, split_exit_code: i32) -> (Result<i32>, Vec<String>) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".strata")).unwrap();
        fs::write(
            dir.path().join(".strata/project.yml"),
            format!("cm:\n  strategy: {}\n", strategy),
        )
        .unwrap();

        let calls = Rc::new(RefCell::new(Vec::new()));
        let registry = ImportRegistry {
            split_exit_code,
            calls: Rc::clone(&calls),
        };
        let mut resolver = ContextResolver::new();
        resolver.register(ProjectFileProvider);
        let mut invoker =
            CommandInvoker::new(Rc::new(registry), resolver, ContextRequest::new(dir.path()));

        let result = invoker.invoke(&Input::default(), "drupal:config:import", ArgMap::new());
        assert_eq!(invoker.stack().depth(), 0);
        let calls = calls.borrow().clone();
        (result, calls)
    }

    #[test]
    fn test_failed_split_import_falls_back_to_core() {
        let (result, calls) = run_import("config-split", 1);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(
            calls,
            vec![
                "drupal:config:import",
                "drupal:config:import:split",
                "drupal:config:import:core"
            ]
        );
    }

    #[test]
    fn test_successful_split_import_skips_core() {
        let (result, calls) = run_import("config-split", 0);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(calls, vec!["drupal:config:import", "drupal:config:import:split"]);
    }

    #[test]
    fn test_strategy_none_imports_nothing() {
        let (result, calls) = run_import("none", 1);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(calls, vec!["drupal:config:import"]);
    }

    /// Runs the real `drupal:sync` body with a failing update step.
    struct SyncRegistry {
        seen_environment: Rc<RefCell<Vec<String>>>,
    }

    impl CommandRegistry for SyncRegistry {
        fn resolve(&self, name: &str) -> Option<ResolvedCommand> {
            Some(ResolvedCommand {
                name: name.to_string(),
            })
        }

        fn run(
            &self,
            command: &ResolvedCommand,
            input: &Input,
            invoker: &mut CommandInvoker,
        ) -> Result<i32> {
            match command.name.as_str() {
                "drupal:sync" => sync(input, invoker),
                "drupal:update" => {
                    self.seen_environment
                        .borrow_mut()
                        .push(input.option(ENVIRONMENT_OPTION).unwrap_or_default());
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_sync_releases_its_environment_pin() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".strata")).unwrap();
        fs::write(
            dir.path().join(".strata/project.yml"),
            "drush:\n  bin: 'true'\nsync:\n  remote: '@prod'\n",
        )
        .unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let registry = SyncRegistry {
            seen_environment: Rc::clone(&seen),
        };
        let mut resolver = ContextResolver::new();
        resolver.register(ProjectFileProvider);
        let mut invoker =
            CommandInvoker::new(Rc::new(registry), resolver, ContextRequest::new(dir.path()));

        let err = invoker
            .invoke(&Input::default(), "drupal:sync", ArgMap::new())
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<InvocationError>(),
            Some(InvocationError::Failed { command, exit_code: 1, .. }) if command == "drupal:update"
        ));
        assert_eq!(*seen.borrow(), vec!["local"]);
        assert!(!invoker.has_global_pins());
        assert_eq!(invoker.stack().depth(), 0);
    }
}
