//! # Context Provider
//!
//! Computes the named configuration contexts a snapshot is built from.
//!
//! Providers are registered explicitly, each declaring the [`ContextPriority`] tier it
//! feeds. [`ContextResolver::collect`] runs them in tier order, lets event subscribers
//! append contexts ([`Event::CollectContexts`]), sorts the result by tier, and then lets
//! subscribers replace the list wholesale ([`Event::AlterContexts`]).
//!
//! Optional files that do not exist are skipped. A file that exists but cannot be parsed
//! aborts collection.

use crate::constants::{
    CONFIG_FILE_EXTENSIONS, EXTENSION_MANIFEST_FILENAME, EXTENSION_SEARCH_DEPTH,
    EXTENSION_SEARCH_DIR, PROJECT_DIR, PROJECT_FILE_STEM, USER_DEFAULTS_FILENAME,
};
use crate::core::context_processor::{ConfigError, ConfigSnapshot, expand_dotted, merge_into};
use crate::core::events::{Event, EventBus};
use crate::models::{ConfigContext, ConfigMap, ContextPriority, ContextRequest};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// The tool defaults compiled into the binary.
const EMBEDDED_DEFAULTS: &str = include_str!("../../config/defaults.yml");

/// A source of zero or more configuration contexts.
pub trait ContextProvider: fmt::Debug {
    /// A stable name used in logs.
    fn id(&self) -> &str;

    /// The tier every context from this provider belongs to.
    fn priority(&self) -> ContextPriority;

    fn collect(&self, request: &ContextRequest) -> Result<Vec<ConfigContext>, ConfigError>;
}

// --- FILE LOADING ---

/// Returns the first existing `<dir>/<stem>.<ext>` for the supported extensions.
pub fn find_config_file(dir: &Path, stem: &str) -> Option<PathBuf> {
    CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", stem, ext)))
        .find(|candidate| candidate.is_file())
}

/// Loads a configuration file into a nested map. A missing file yields `None`.
pub fn load_config_file(path: &Path) -> Result<Option<ConfigMap>, ConfigError> {
    if !path.is_file() {
        log::debug!("Optional config file '{}' not present", path.display());
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    parse_config_str(&content, path).map(Some)
}

/// Parses file content by the file's extension. YAML is the default format.
pub fn parse_config_str(content: &str, path: &Path) -> Result<ConfigMap, ConfigError> {
    let label = path.display().to_string();
    let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");

    let value: Value = if is_toml {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: label.clone(),
            message: e.to_string(),
        })?
    } else {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: label.clone(),
            message: e.to_string(),
        })?
    };

    match value {
        Value::Object(map) => Ok(map),
        // An empty YAML document is an empty configuration.
        Value::Null => Ok(ConfigMap::new()),
        _ => Err(ConfigError::NotAMap { path: label }),
    }
}

/// Splits a `-D key=value` definition.
pub fn parse_definition(definition: &str) -> Result<(String, String), ConfigError> {
    definition
        .split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .ok_or_else(|| ConfigError::InvalidDefinition {
            definition: definition.to_string(),
        })
}

fn path_string(path: &Path) -> String {
    dunce::simplified(path).to_string_lossy().into_owned()
}

fn project_dir(request: &ContextRequest) -> PathBuf {
    request.repo_root.join(PROJECT_DIR)
}

// --- BUILT-IN PROVIDERS ---

/// Well-known filesystem locations, filtered to those that exist.
#[derive(Debug, Default)]
pub struct SystemPathsProvider;

impl ContextProvider for SystemPathsProvider {
    fn id(&self) -> &str {
        "system"
    }

    fn priority(&self) -> ContextPriority {
        ContextPriority::System
    }

    fn collect(&self, request: &ContextRequest) -> Result<Vec<ConfigContext>, ConfigError> {
        let tool_root = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));

        let candidates: [(&str, Option<PathBuf>); 5] = [
            ("repo.root", Some(request.repo_root.clone())),
            ("docroot", Some(request.repo_root.join("docroot"))),
            ("composer.bin_dir", Some(request.repo_root.join("vendor").join("bin"))),
            ("tool.root", tool_root),
            ("tmp.dir", Some(std::env::temp_dir())),
        ];

        let flat: BTreeMap<String, Value> = candidates
            .into_iter()
            .filter_map(|(key, path)| path.filter(|p| p.exists()).map(|p| (key, p)))
            .map(|(key, path)| (key.to_string(), Value::String(path_string(&path))))
            .collect();

        Ok(vec![ConfigContext::new(
            self.id(),
            self.priority(),
            expand_dotted(&flat),
        )])
    }
}

/// Defaults embedded in the binary, then the user's own defaults file.
#[derive(Debug)]
pub struct ToolDefaultsProvider {
    embedded: &'static str,
    user_file: Option<PathBuf>,
}

impl Default for ToolDefaultsProvider {
    fn default() -> Self {
        Self {
            embedded: EMBEDDED_DEFAULTS,
            user_file: dirs::config_dir()
                .map(|dir| dir.join("strata").join(USER_DEFAULTS_FILENAME)),
        }
    }
}

impl ToolDefaultsProvider {
    /// `user_file` is optional and may point at a file that does not exist.
    pub fn new(embedded: &'static str, user_file: Option<PathBuf>) -> Self {
        Self {
            embedded,
            user_file,
        }
    }
}

impl ContextProvider for ToolDefaultsProvider {
    fn id(&self) -> &str {
        "tool-defaults"
    }

    fn priority(&self) -> ContextPriority {
        ContextPriority::ToolDefaults
    }

    fn collect(&self, _request: &ContextRequest) -> Result<Vec<ConfigContext>, ConfigError> {
        let mut contexts = vec![ConfigContext::new(
            self.id(),
            self.priority(),
            parse_config_str(self.embedded, Path::new("defaults.yml"))?,
        )];

        if let Some(user_file) = &self.user_file
            && let Some(values) = load_config_file(user_file)?
        {
            contexts.push(ConfigContext::new("user-defaults", self.priority(), values));
        }
        Ok(contexts)
    }
}

/// Defaults shipped by extensions found under `vendor/`.
///
/// Each extension contributes its manifest as `extension.<name>` and an identity
/// context recording where it lives.
#[derive(Debug, Default)]
pub struct ExtensionDefaultsProvider;

impl ContextProvider for ExtensionDefaultsProvider {
    fn id(&self) -> &str {
        "extension-defaults"
    }

    fn priority(&self) -> ContextPriority {
        ContextPriority::ExtensionDefaults
    }

    fn collect(&self, request: &ContextRequest) -> Result<Vec<ConfigContext>, ConfigError> {
        let search_root = request.repo_root.join(EXTENSION_SEARCH_DIR);
        if !search_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut manifests: Vec<PathBuf> = WalkDir::new(&search_root)
            .max_depth(EXTENSION_SEARCH_DEPTH + 1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Skipping unreadable path while discovering extensions: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_name() == EXTENSION_MANIFEST_FILENAME)
            .map(|entry| entry.into_path())
            .collect();
        manifests.sort();

        let mut contexts = Vec::with_capacity(manifests.len() * 2);
        for manifest in manifests {
            let Some(values) = load_config_file(&manifest)? else {
                continue;
            };
            let Some(root) = manifest.parent() else {
                continue;
            };
            let name = values
                .get("extension")
                .and_then(|ext| ext.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    root.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                })
                .unwrap_or_else(|| "unnamed".to_string());

            log::debug!("Discovered extension '{}' at '{}'", name, root.display());

            let mut location = ConfigMap::new();
            location.insert("root".to_string(), Value::String(path_string(root)));
            let mut by_name = ConfigMap::new();
            by_name.insert(name.clone(), Value::Object(location));
            let mut identity = ConfigMap::new();
            identity.insert("extensions".to_string(), Value::Object(by_name));

            contexts.push(ConfigContext::new(
                format!("extension.{}", name),
                self.priority(),
                values,
            ));
            contexts.push(ConfigContext::new(
                format!("extension.{}.identity", name),
                self.priority(),
                identity,
            ));
        }
        Ok(contexts)
    }
}

/// `.strata/project.yml`.
#[derive(Debug, Default)]
pub struct ProjectFileProvider;

impl ContextProvider for ProjectFileProvider {
    fn id(&self) -> &str {
        "project-file"
    }

    fn priority(&self) -> ContextPriority {
        ContextPriority::ProjectFile
    }

    fn collect(&self, request: &ContextRequest) -> Result<Vec<ConfigContext>, ConfigError> {
        let Some(path) = find_config_file(&project_dir(request), PROJECT_FILE_STEM) else {
            return Ok(Vec::new());
        };
        Ok(load_config_file(&path)?
            .map(|values| ConfigContext::new(self.id(), self.priority(), values))
            .into_iter()
            .collect())
    }
}

/// `.strata/<environment>.project.yml` for the selected environment.
#[derive(Debug, Default)]
pub struct ProjectEnvironmentFileProvider;

impl ContextProvider for ProjectEnvironmentFileProvider {
    fn id(&self) -> &str {
        "project-environment-file"
    }

    fn priority(&self) -> ContextPriority {
        ContextPriority::ProjectEnvironmentFile
    }

    fn collect(&self, request: &ContextRequest) -> Result<Vec<ConfigContext>, ConfigError> {
        let environment = request.environment.trim();
        if environment.is_empty() || environment.contains(['/', '\\']) {
            log::warn!("Ignoring environment file for invalid environment name '{}'", environment);
            return Ok(Vec::new());
        }

        let stem = format!("{}.{}", environment, PROJECT_FILE_STEM);
        let Some(path) = find_config_file(&project_dir(request), &stem) else {
            return Ok(Vec::new());
        };
        Ok(load_config_file(&path)?
            .map(|values| {
                ConfigContext::new(
                    format!("{}.{}", self.id(), environment),
                    self.priority(),
                    values,
                )
            })
            .into_iter()
            .collect())
    }
}

/// `-D key=value` definitions from the command line. Values are read as YAML scalars,
/// so `-D sync.files=true` yields a boolean.
#[derive(Debug, Default)]
pub struct RuntimeDefinitionsProvider;

impl ContextProvider for RuntimeDefinitionsProvider {
    fn id(&self) -> &str {
        "runtime"
    }

    fn priority(&self) -> ContextPriority {
        ContextPriority::Runtime
    }

    fn collect(&self, request: &ContextRequest) -> Result<Vec<ConfigContext>, ConfigError> {
        if request.overrides.is_empty() {
            return Ok(Vec::new());
        }
        let flat: BTreeMap<String, Value> = request
            .overrides
            .iter()
            .map(|(key, raw)| {
                let value = serde_yaml::from_str::<Value>(raw)
                    .ok()
                    .filter(|v| !v.is_object())
                    .unwrap_or_else(|| Value::String(raw.clone()));
                (key.clone(), value)
            })
            .collect();
        Ok(vec![ConfigContext::new(
            self.id(),
            self.priority(),
            expand_dotted(&flat),
        )])
    }
}

// --- RESOLVER ---

/// Runs the registered providers and turns their output into snapshots.
#[derive(Debug, Default)]
pub struct ContextResolver {
    providers: Vec<Box<dyn ContextProvider>>,
    defaults: ConfigMap,
    generation: Cell<u64>,
}

impl ContextResolver {
    /// A resolver with no providers. Useful when a caller wants full control.
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver with every built-in provider registered.
    pub fn with_builtin_providers() -> Self {
        let mut resolver = Self::new();
        resolver.register(SystemPathsProvider);
        resolver.register(ToolDefaultsProvider::default());
        resolver.register(ExtensionDefaultsProvider);
        resolver.register(ProjectFileProvider);
        resolver.register(ProjectEnvironmentFileProvider);
        resolver.register(RuntimeDefinitionsProvider);
        resolver
    }

    /// Adds a provider. Providers run ordered by tier, then by registration.
    pub fn register(&mut self, provider: impl ContextProvider + 'static) {
        self.providers.push(Box::new(provider));
        self.providers.sort_by_key(|p| p.priority());
    }

    /// Seed values consulted when no context defines a key.
    pub fn with_defaults(mut self, defaults: ConfigMap) -> Self {
        self.defaults = defaults;
        self
    }

    /// How many times contexts have been computed so far.
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Collects every context for `request`, in merge order.
    pub fn collect(&self, request: &ContextRequest, bus: &EventBus) -> Result<Vec<ConfigContext>> {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let mut contexts = Vec::new();
        for provider in &self.providers {
            let collected = provider
                .collect(request)
                .with_context(|| format!("Context provider '{}' failed", provider.id()))?;
            log::debug!(
                "Provider '{}' contributed {} context(s)",
                provider.id(),
                collected.len()
            );
            contexts.extend(collected);
        }

        bus.publish(&mut Event::CollectContexts {
            request,
            contexts: &mut contexts,
        })?;
        contexts.sort_by_key(|context| context.priority);

        bus.publish(&mut Event::AlterContexts {
            request,
            contexts: &mut contexts,
        })?;

        for context in &mut contexts {
            context.generation = generation;
        }
        Ok(contexts)
    }

    /// Collects and merges a fresh snapshot for `request`.
    pub fn resolve(&self, request: &ContextRequest, bus: &EventBus) -> Result<ConfigSnapshot> {
        let contexts = self.collect(request, bus)?;
        let generation = self.generation.get();

        let mut defaults = match json!({
            "environment": request.environment,
            "repo": { "root": path_string(&request.repo_root) },
        }) {
            Value::Object(map) => map,
            _ => ConfigMap::new(),
        };
        merge_into(&mut defaults, &self.defaults);

        let snapshot = ConfigSnapshot::build(request.clone(), generation, contexts, defaults)?;
        log::debug!(
            "Resolved configuration generation {} for environment '{}' ({} contexts)",
            generation,
            request.environment,
            snapshot.contexts().len()
        );
        Ok(snapshot)
    }
}
