//! # Context Processor
//!
//! Collapses an ordered list of [`ConfigContext`]s into a single [`ConfigSnapshot`].
//!
//! Contexts are merged in ascending priority: nested maps merge key by key, anything
//! else (scalars, lists) is replaced outright by the later context. After merging,
//! `${dotted.key}` placeholders inside string values are expanded against the result.
//!
//! The dotted-key helpers [`flatten_dotted`] and [`expand_dotted`] are exact inverses
//! for maps whose keys contain no `.`.

use crate::constants::{KEY_SEPARATOR, MAX_EXPANSION_DEPTH};
use crate::models::{ConfigContext, ConfigMap, ContextRequest};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use thiserror::Error;

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\$\{([^}]+)\}").expect("static regex");
}

/// Errors raised while reading or querying configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error parsing configuration file '{path}': {message}")]
    Parse { path: String, message: String },
    #[error("Configuration file '{path}' must contain a map at its root.")]
    NotAMap { path: String },
    #[error("Required configuration key '{key}' is not set.")]
    MissingKey { key: String },
    #[error("Configuration key '{key}' has an unexpected type: {message}")]
    InvalidType { key: String, message: String },
    #[error("Invalid runtime definition '{definition}'. Expected KEY=VALUE.")]
    InvalidDefinition { definition: String },
    #[error("Placeholder expansion did not settle after {depth} passes (last changed: '{key}').")]
    ExpansionDepth { depth: u32, key: String },
}

// --- MERGING ---

/// Merges `contexts` in the order given; later contexts win on collision.
pub fn merge(contexts: &[ConfigContext]) -> ConfigMap {
    let mut merged = ConfigMap::new();
    for context in contexts {
        log::trace!(
            "Merging context '{}' (generation {}, {})",
            context.id,
            context.generation,
            context.priority.label()
        );
        merge_into(&mut merged, &context.values);
    }
    merged
}

/// Recursively merges `overlay` into `base`.
pub fn merge_into(base: &mut ConfigMap, overlay: &ConfigMap) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

// --- DOTTED KEYS ---

/// Flattens a nested map into `a.b.c -> leaf` pairs.
pub fn flatten_dotted(map: &ConfigMap) -> BTreeMap<String, Value> {
    flatten_with(map, KEY_SEPARATOR)
}

/// Flattens a nested map, joining keys with `separator`.
/// Empty nested maps are kept as leaves so the result can be expanded back.
pub fn flatten_with(map: &ConfigMap, separator: &str) -> BTreeMap<String, Value> {
    let mut flat = BTreeMap::new();
    flatten_recursive(map, None, separator, &mut flat);
    flat
}

fn flatten_recursive(
    map: &ConfigMap,
    prefix: Option<&str>,
    separator: &str,
    flat: &mut BTreeMap<String, Value>,
) {
    for (key, value) in map {
        let full_key = match prefix {
            Some(prefix) => format!("{}{}{}", prefix, separator, key),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => {
                flatten_recursive(nested, Some(&full_key), separator, flat);
            }
            leaf => {
                flat.insert(full_key, leaf.clone());
            }
        }
    }
}

/// Expands `a.b.c -> leaf` pairs back into a nested map.
pub fn expand_dotted(flat: &BTreeMap<String, Value>) -> ConfigMap {
    let mut root = ConfigMap::new();
    for (key, value) in flat {
        let mut segments = key.split(KEY_SEPARATOR).peekable();
        let mut current = &mut root;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                match (current.get_mut(segment), value) {
                    (Some(Value::Object(existing)), Value::Object(incoming)) => {
                        merge_into(existing, incoming);
                    }
                    _ => {
                        current.insert(segment.to_string(), value.clone());
                    }
                }
                break;
            }
            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(ConfigMap::new()));
            if !slot.is_object() {
                *slot = Value::Object(ConfigMap::new());
            }
            current = match slot {
                Value::Object(next) => next,
                _ => break,
            };
        }
    }
    root
}

/// Looks up a dotted path inside a nested map.
pub fn lookup<'a>(map: &'a ConfigMap, path: &str) -> Option<&'a Value> {
    let mut segments = path.split(KEY_SEPARATOR);
    let first = segments.next()?;
    let mut current = map.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

// --- PLACEHOLDERS ---

/// Renders a scalar the way it appears inside a larger string.
pub fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn expand_placeholders(values: &mut ConfigMap, defaults: &ConfigMap) -> Result<(), ConfigError> {
    let mut last_changed = String::new();
    for pass in 0..MAX_EXPANSION_DEPTH {
        let reference = values.clone();
        let resolve = |path: &str| lookup(&reference, path).or_else(|| lookup(defaults, path));

        let mut changed = false;
        for (key, value) in values.iter_mut() {
            if expand_value(value, &resolve) {
                changed = true;
                last_changed = key.clone();
            }
        }
        if !changed {
            log::trace!("Placeholder expansion settled after {} pass(es)", pass);
            return Ok(());
        }
    }
    Err(ConfigError::ExpansionDepth {
        depth: MAX_EXPANSION_DEPTH,
        key: last_changed,
    })
}

fn whole_placeholder<'a, F>(text: &str, resolve: &F) -> Option<Value>
where
    F: Fn(&str) -> Option<&'a Value>,
{
    let caps = PLACEHOLDER_RE.captures(text)?;
    if caps.get(0)?.as_str().len() != text.len() {
        return None;
    }
    resolve(caps.get(1)?.as_str().trim())
        .filter(|found| !found.is_null())
        .cloned()
}

/// Expands placeholders in `value` in place. Returns whether anything changed.
fn expand_value<'a, F>(value: &mut Value, resolve: &F) -> bool
where
    F: Fn(&str) -> Option<&'a Value>,
{
    // A string that is exactly one placeholder takes the referenced value as-is,
    // which lets lists and maps be referenced too.
    if let Value::String(text) = &*value
        && let Some(replacement) = whole_placeholder(text, resolve)
    {
        let changed = *value != replacement;
        *value = replacement;
        return changed;
    }

    match value {
        Value::String(text) => {
            let expanded = PLACEHOLDER_RE.replace_all(text, |caps: &Captures<'_>| {
                let original = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                caps.get(1)
                    .and_then(|path| resolve(path.as_str().trim()))
                    .and_then(render_scalar)
                    .unwrap_or_else(|| original.to_string())
            });
            if expanded.as_ref() != text.as_str() {
                *text = expanded.into_owned();
                true
            } else {
                false
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, item| expand_value(item, resolve) || changed),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |changed, item| expand_value(item, resolve) || changed),
        _ => false,
    }
}

// --- SNAPSHOT ---

/// The fully merged configuration a command runs against.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    request: ContextRequest,
    generation: u64,
    contexts: Vec<ConfigContext>,
    values: ConfigMap,
    defaults: ConfigMap,
}

impl ConfigSnapshot {
    /// Merges `contexts` (already in priority order) and expands placeholders.
    pub fn build(
        request: ContextRequest,
        generation: u64,
        contexts: Vec<ConfigContext>,
        defaults: ConfigMap,
    ) -> Result<Self, ConfigError> {
        let mut values = merge(&contexts);
        expand_placeholders(&mut values, &defaults)?;
        Ok(Self {
            request,
            generation,
            contexts,
            values,
            defaults,
        })
    }

    /// The request this snapshot was resolved from.
    pub fn request(&self) -> &ContextRequest {
        &self.request
    }

    /// Incremented on every resolution, reprocessing included.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Shorthand for `request().environment`.
    pub fn environment(&self) -> &str {
        &self.request.environment
    }

    /// The contexts that were merged, in merge order.
    pub fn contexts(&self) -> &[ConfigContext] {
        &self.contexts
    }

    /// The merged values, without defaults.
    pub fn values(&self) -> &ConfigMap {
        &self.values
    }

    /// Looks up a dotted path, falling back to the defaults.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.values, path).or_else(|| lookup(&self.defaults, path))
    }

    /// Whether `path` resolves to anything, defaults included.
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// A string value. Empty strings count as unset.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Also accepts `yes`/`no`, `1`/`0` and numbers.
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        match self.get(path)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" | "" => Some(false),
                _ => None,
            },
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            _ => None,
        }
    }

    /// A path value with `~` and `$VARS` expanded. Relative paths are taken
    /// from the repo root.
    pub fn get_path(&self, path: &str) -> Option<PathBuf> {
        let raw = self.get_str(path)?;
        let expanded = shellexpand::full(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| shellexpand::tilde(raw).into_owned());
        let expanded = PathBuf::from(expanded);
        if expanded.is_absolute() {
            Some(expanded)
        } else {
            Some(self.request.repo_root.join(expanded))
        }
    }

    /// A list of strings. A single scalar is treated as a one-element list.
    pub fn get_string_list(&self, path: &str) -> Option<Vec<String>> {
        match self.get(path)? {
            Value::Array(items) => Some(items.iter().filter_map(render_scalar).collect()),
            Value::Null => None,
            scalar => render_scalar(scalar).map(|s| vec![s]),
        }
    }

    /// Deserializes the value at `path` into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ConfigError> {
        self.get(path)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidType {
                    key: path.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    /// [`get_str`](Self::get_str), with a missing value as an error.
    pub fn require_str(&self, path: &str) -> Result<&str, ConfigError> {
        self.get_str(path).ok_or_else(|| ConfigError::MissingKey {
            key: path.to_string(),
        })
    }

    /// [`get_path`](Self::get_path), with a missing value as an error.
    pub fn require_path(&self, path: &str) -> Result<PathBuf, ConfigError> {
        self.get_path(path).ok_or_else(|| ConfigError::MissingKey {
            key: path.to_string(),
        })
    }

    /// The highest-priority context that defines `path`, if any.
    pub fn defining_context(&self, path: &str) -> Option<&ConfigContext> {
        self.contexts
            .iter()
            .rev()
            .find(|context| lookup(&context.values, path).is_some())
    }

    /// Every effective `dotted.key -> value`, defaults included.
    pub fn flattened(&self) -> BTreeMap<String, Value> {
        let mut everything = self.defaults.clone();
        merge_into(&mut everything, &self.values);
        flatten_dotted(&everything)
    }

    /// Environment variables for external commands, from the `env` map.
    pub fn env_vars(&self) -> HashMap<String, String> {
        self.get("env")
            .and_then(Value::as_object)
            .map(|env| {
                env.iter()
                    .filter_map(|(k, v)| render_scalar(v).map(|v| (k.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }
}
