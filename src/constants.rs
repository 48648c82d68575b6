// src/constants.rs

/// The name of the directory holding a project's strata configuration.
pub const PROJECT_DIR: &str = ".strata";

/// Base name of the project configuration file (inside `.strata/`).
pub const PROJECT_FILE_STEM: &str = "project";

/// Extensions tried, in order, when looking up a configuration file by stem.
pub const CONFIG_FILE_EXTENSIONS: &[&str] = &["yml", "yaml", "toml"];

/// The file an extension ships its defaults in.
pub const EXTENSION_MANIFEST_FILENAME: &str = "strata-extension.yml";

/// The directory scanned for extensions, relative to the repo root.
pub const EXTENSION_SEARCH_DIR: &str = "vendor";

/// How deep below `vendor/` an extension manifest may live.
pub const EXTENSION_SEARCH_DEPTH: usize = 3;

/// The name of the user-level defaults file (in `~/.config/strata/`).
pub const USER_DEFAULTS_FILENAME: &str = "defaults.yml";

/// Environment used when `--environment` is not given.
pub const DEFAULT_ENVIRONMENT: &str = "local";

/// The CLI option selecting the environment file.
pub const ENVIRONMENT_OPTION: &str = "--environment";

/// Configuration key holding the disabled command paths.
pub const DISABLE_TARGETS_KEY: &str = "disable-targets";

/// Separator used when flattening `disable-targets` into command names.
pub const COMMAND_SEPARATOR: &str = ":";

/// Separator used for dotted configuration keys.
pub const KEY_SEPARATOR: &str = ".";

/// Placeholder expansion (`${a.b}`) gives up after this many passes.
pub const MAX_EXPANSION_DEPTH: u32 = 10;
