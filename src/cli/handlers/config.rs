// src/cli/handlers/config.rs

use anyhow::Result;
use colored::*;
use serde_json::Value;

use crate::core::context_processor::ConfigSnapshot;
use crate::core::invoker::CommandInvoker;
use crate::models::Input;

/// `config:dump [prefix] [--with-sources]`: prints the effective configuration the
/// running command sees, one dotted key per line.
pub fn dump(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    let config = invoker.config()?;
    let prefix = input.option("arg1").unwrap_or_default();
    let with_sources = input.has_flag("--with-sources");

    println!(
        "{} {} (generation {})",
        "Environment:".bold(),
        config.environment().cyan(),
        config.generation()
    );
    for line in dump_lines(config, &prefix, with_sources) {
        println!("{}", line);
    }
    Ok(0)
}

fn dump_lines(config: &ConfigSnapshot, prefix: &str, with_sources: bool) -> Vec<String> {
    config
        .flattened()
        .into_iter()
        .filter(|(key, _)| {
            prefix.is_empty() || key == prefix || key.starts_with(&format!("{}.", prefix))
        })
        .map(|(key, value)| {
            let rendered = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !with_sources {
                return format!("{}: {}", key, rendered);
            }
            let source = config
                .defining_context(&key)
                .map_or("default", |context| context.id.as_str());
            format!("{}: {}  [{}]", key, rendered, source)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context_provider::{ContextResolver, ProjectFileProvider};
    use crate::core::events::EventBus;
    use crate::models::ContextRequest;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_dump_filters_by_prefix_and_names_sources() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".strata")).unwrap();
        fs::write(
            dir.path().join(".strata/project.yml"),
            "deploy:\n  dir: /srv/a\n  exclude: [.git]\ndeployment: x\n",
        )
        .unwrap();
        let mut resolver = ContextResolver::new();
        resolver.register(ProjectFileProvider);
        let config = resolver
            .resolve(&ContextRequest::new(dir.path()), &EventBus::new())
            .unwrap();

        assert_eq!(
            dump_lines(&config, "deploy", true),
            vec![
                "deploy.dir: /srv/a  [project-file]",
                "deploy.exclude: [\".git\"]  [project-file]",
            ]
        );
        assert!(
            dump_lines(&config, "", false)
                .contains(&"environment: local".to_string())
        );
    }
}
