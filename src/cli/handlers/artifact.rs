// src/cli/handlers/artifact.rs

use anyhow::{Context, Result, bail};
use colored::*;
use dialoguer::{Input as Prompt, theme::ColorfulTheme};
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use super::commons;
use crate::core::context_processor::ConfigSnapshot;
use crate::core::invoker::{CommandInvoker, PinnedOptions};
use crate::core::recipes::{self, CommonBuildRecipe, GitCommitTagRecipe, Recipe};
use crate::models::{ArgMap, Input, quote_arg};
use crate::system::executor;

/// Options every artifact step forwards to the steps it invokes.
const FORWARDED_OPTIONS: &[&str] = &["--deploy-dir"];

/// `artifact:build`
pub fn build(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    invoker.pin_options(PinnedOptions::from_input(input, FORWARDED_OPTIONS));
    recipes::run_recipe(invoker, input, &CommonBuildRecipe)?;

    let dir = commons::deploy_dir(input, invoker.config()?)?;
    println!("{} {}", "Artifact built in".green(), dir.display());
    Ok(0)
}

/// `artifact:build:frontend`: runs every `frontend.build` command line.
pub fn build_frontend(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    let lines = invoker
        .config()?
        .get_string_list("frontend.build")
        .unwrap_or_default();
    if lines.is_empty() {
        log::info!("No front-end build commands configured.");
        return Ok(0);
    }
    commons::run_lines(invoker, input, lines)
}

/// `artifact:copy`: mirrors the repository into the deploy directory.
pub fn copy(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    let config = invoker.config()?;
    let dir = commons::deploy_dir(input, config)?;
    let root = config.request().repo_root.clone();
    let excludes = config.get_string_list("deploy.exclude").unwrap_or_default();

    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create deploy directory '{}'", dir.display()))?;
    let line = rsync_line(&root, &dir, &excludes);
    commons::run_lines(invoker, input, [line])
}

/// Builds the rsync call that mirrors `source` into `dest`. A `dest` inside `source`
/// is excluded from the copy.
fn rsync_line(source: &Path, dest: &Path, excludes: &[String]) -> String {
    let source = dunce::simplified(source);
    let dest = dunce::simplified(dest);

    let mut line = String::from("rsync -a --delete");
    for exclude in excludes {
        line.push_str(&format!(" --exclude={}", quote_arg(exclude)));
    }
    if let Ok(inside) = dest.strip_prefix(source)
        && !inside.as_os_str().is_empty()
    {
        line.push_str(&format!(
            " --exclude={}",
            quote_arg(&format!("/{}/", inside.to_string_lossy()))
        ));
    }
    line.push_str(&format!(
        " {} {}",
        quote_arg(&format!("{}/", source.to_string_lossy())),
        quote_arg(&format!("{}/", dest.to_string_lossy()))
    ));
    line
}

/// `artifact:composer:install`: production dependencies only.
pub fn composer_install(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    let config = invoker.config()?;
    let dir = commons::deploy_dir(input, config)?;
    let composer = config.require_str("composer.bin")?;
    let line = format!(
        "{} install --no-dev --optimize-autoloader --no-interaction --working-dir={}",
        composer,
        quote_arg(&dunce::simplified(&dir).to_string_lossy())
    );
    commons::run_lines(invoker, input, [line])
}

/// `artifact:build:sanitize`: strips `deploy.sanitize` entries and nested `.git`
/// directories from the artifact.
pub fn sanitize(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    let config = invoker.config()?;
    let dir = commons::deploy_dir(input, config)?;
    let entries = config.get_string_list("deploy.sanitize").unwrap_or_default();

    let removed = sanitize_dir(&dir, &entries)?;
    for path in &removed {
        log::debug!("Removed '{}'", path.display());
    }
    println!("{} {} path(s) removed.", "Sanitized:".green(), removed.len());
    Ok(0)
}

pub(crate) fn sanitize_dir(dir: &Path, entries: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("Deploy directory '{}' does not exist.", dir.display());
    }

    let mut targets = Vec::new();
    for entry in entries {
        let relative = Path::new(entry);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            log::warn!("Ignoring sanitize entry '{}' outside the artifact.", entry);
            continue;
        }
        targets.push(dir.join(relative));
    }

    // The artifact's own repository lives at the top; any deeper one came from a package.
    targets.extend(
        WalkDir::new(dir)
            .into_iter()
            .filter_entry(|e| !(e.depth() == 1 && e.file_name() == ".git"))
            .filter_map(|e| e.ok())
            .filter(|e| e.depth() >= 2 && e.file_name() == ".git")
            .map(|e| e.into_path()),
    );

    let mut removed = Vec::new();
    for target in targets {
        let Ok(metadata) = target.symlink_metadata() else {
            continue;
        };
        let result = if metadata.is_dir() {
            fs::remove_dir_all(&target)
        } else {
            fs::remove_file(&target)
        };
        result.with_context(|| format!("Failed to remove '{}'", target.display()))?;
        removed.push(target);
    }
    Ok(removed)
}

/// `artifact:deploy`: builds the artifact, then commits, tags and pushes it.
pub fn deploy(input: &Input, invoker: &mut CommandInvoker) -> Result<i32> {
    invoker.pin_options(PinnedOptions::from_input(input, FORWARDED_OPTIONS));

    let config = invoker.config()?;
    let recipe = GitCommitTagRecipe {
        commit_message: commit_message(input, config)?,
        deploy_dir: Some(commons::deploy_dir(input, config)?),
    };
    // Refuse to build anything the push step could not handle.
    recipe
        .commands(config)
        .with_context(|| format!("Recipe '{}' is not fully configured", recipe.name()))?;

    match executor::execute_and_capture_output(
        "git rev-parse --short HEAD",
        &config.request().repo_root,
        &config.env_vars(),
    ) {
        Ok(revision) => println!("{} {}", "Deploying source revision".green(), revision.trim()),
        Err(e) => log::debug!("Source revision unavailable: {}", e),
    }

    invoker.invoke(input, "artifact:build", ArgMap::new())?;
    recipes::run_recipe(invoker, input, &recipe)?;
    Ok(0)
}

fn commit_message(input: &Input, config: &ConfigSnapshot) -> Result<Option<String>> {
    if let Some(message) = input.option("--commit-msg").filter(|m| !m.trim().is_empty()) {
        return Ok(Some(message));
    }
    if !input.is_interactive() {
        return Ok(None);
    }
    let message: String = Prompt::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("deploy.commit_prompt"))
        .default(config.get_str("deploy.commit_msg").unwrap_or_default().to_string())
        .interact_text()?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_removes_entries_and_nested_repositories() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join(".github/workflows")).unwrap();
        fs::create_dir_all(root.join("vendor/acme/lib/.git/objects")).unwrap();
        fs::write(root.join("CHANGELOG.txt"), "x").unwrap();
        fs::write(root.join("index.php"), "<?php").unwrap();

        let entries = vec![
            ".github".to_string(),
            "CHANGELOG.txt".to_string(),
            "README.md".to_string(),
            "../outside".to_string(),
        ];
        let removed = sanitize_dir(root, &entries).unwrap();

        assert_eq!(removed.len(), 3);
        assert!(root.join(".git").is_dir());
        assert!(root.join("index.php").is_file());
        assert!(!root.join(".github").exists());
        assert!(!root.join("CHANGELOG.txt").exists());
        assert!(!root.join("vendor/acme/lib/.git").exists());
        assert!(root.join("vendor/acme/lib").is_dir());
    }

    #[test]
    fn test_sanitize_requires_existing_directory() {
        let dir = TempDir::new().unwrap();
        assert!(sanitize_dir(&dir.path().join("missing"), &[]).is_err());
    }

    #[test]
    fn test_rsync_line_excludes_nested_deploy_dir() {
        let line = rsync_line(
            Path::new("/srv/site"),
            Path::new("/srv/site/build/artifact"),
            &[".git".to_string(), "node_modules".to_string()],
        );
        assert_eq!(
            line,
            "rsync -a --delete --exclude=.git --exclude=node_modules \
             --exclude=/build/artifact/ /srv/site/ /srv/site/build/artifact/"
        );

        let outside = rsync_line(Path::new("/srv/site"), Path::new("/tmp/artifact"), &[]);
        assert_eq!(outside, "rsync -a --delete /srv/site/ /tmp/artifact/");
    }
}
