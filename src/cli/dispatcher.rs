// src/cli/dispatcher.rs

use crate::cli::handlers::{artifact, config, drupal, list};
use crate::core::registry::{CommandDefinition, StaticRegistry};

/// Every command `strata` ships.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "artifact:build",
        aliases: &["build"],
        description: "Build a deployment artifact in deploy.dir",
        handler: artifact::build,
    },
    CommandDefinition {
        name: "artifact:build:frontend",
        aliases: &[],
        description: "Run the frontend.build commands",
        handler: artifact::build_frontend,
    },
    CommandDefinition {
        name: "artifact:build:sanitize",
        aliases: &[],
        description: "Strip deploy.sanitize entries and nested .git directories",
        handler: artifact::sanitize,
    },
    CommandDefinition {
        name: "artifact:composer:install",
        aliases: &[],
        description: "Install production composer dependencies into the artifact",
        handler: artifact::composer_install,
    },
    CommandDefinition {
        name: "artifact:copy",
        aliases: &[],
        description: "Mirror the repository into the artifact directory",
        handler: artifact::copy,
    },
    CommandDefinition {
        name: "artifact:deploy",
        aliases: &["deploy"],
        description: "Build, commit, tag and push the artifact",
        handler: artifact::deploy,
    },
    CommandDefinition {
        name: "config:dump",
        aliases: &["config"],
        description: "Print the resolved configuration",
        handler: config::dump,
    },
    CommandDefinition {
        name: "drupal:config:import",
        aliases: &["cim"],
        description: "Import configuration (split, falling back to core)",
        handler: drupal::config_import,
    },
    CommandDefinition {
        name: "drupal:config:import:core",
        aliases: &[],
        description: "Import configuration with core only",
        handler: drupal::config_import_core,
    },
    CommandDefinition {
        name: "drupal:config:import:split",
        aliases: &[],
        description: "Import configuration through config split",
        handler: drupal::config_import_split,
    },
    CommandDefinition {
        name: "drupal:install",
        aliases: &[],
        description: "Install the site",
        handler: drupal::install,
    },
    CommandDefinition {
        name: "drupal:setup",
        aliases: &["setup"],
        description: "Install the site and import its configuration",
        handler: drupal::setup,
    },
    CommandDefinition {
        name: "drupal:sync",
        aliases: &["sync"],
        description: "Sync database and files from sync.remote",
        handler: drupal::sync,
    },
    CommandDefinition {
        name: "drupal:update",
        aliases: &["updb"],
        description: "Run database updates and rebuild caches",
        handler: drupal::update,
    },
    CommandDefinition {
        name: "list",
        aliases: &[],
        description: "List every command",
        handler: list::handle,
    },
];

/// The registry the binary runs commands from.
pub fn registry() -> StaticRegistry {
    StaticRegistry::new(COMMAND_REGISTRY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::CommandRegistry;
    use std::collections::HashSet;

    #[test]
    fn test_names_and_aliases_are_unique() {
        let mut seen = HashSet::new();
        for command in COMMAND_REGISTRY {
            assert!(seen.insert(command.name), "duplicate {}", command.name);
            for alias in command.aliases {
                assert!(seen.insert(*alias), "duplicate alias {}", alias);
            }
        }
    }

    #[test]
    fn test_recipe_steps_are_registered() {
        let registry = registry();
        for name in [
            "artifact:build:frontend",
            "artifact:copy",
            "artifact:composer:install",
            "artifact:build:sanitize",
            "drupal:install",
            "drupal:config:import",
            "drupal:update",
        ] {
            assert!(registry.resolve(name).is_some(), "{} is not registered", name);
        }
    }
}
