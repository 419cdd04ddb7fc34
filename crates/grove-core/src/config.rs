use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::pkg::outdated::OutdatedOptions;
use crate::pkg::registry::{DEFAULT_REGISTRY, REGISTRY_ENV};
use crate::pkg::resolve::{ResolveOptions, MAX_CONCURRENT_FETCHES};

/// Per-project settings file, merged over the defaults when present.
pub const CONFIG_FILE_NAME: &str = ".grove.json";

/// Environment variable enabling strict peer dependency checks.
pub const STRICT_PEER_ENV: &str = "GROVE_STRICT_PEER_DEPS";

/// Environment variable overriding the global install prefix.
pub const GLOBAL_DIR_ENV: &str = "GROVE_GLOBAL_DIR";

/// Runtime configuration for the grove CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory (the project prefix).
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = WARN, 1 = INFO, 2 = DEBUG, 3+ = TRACE).
    pub verbosity: u8,

    /// Operate on the global install space instead of the project.
    pub global: bool,

    /// Directory holding the global `node_modules`.
    pub global_dir: PathBuf,

    /// Registry base URL.
    pub registry: String,

    /// Treat unresolvable dependencies as fatal.
    pub strict: bool,

    /// Treat peer dependency mismatches as fatal.
    pub strict_peer_deps: bool,

    /// Skip lifecycle scripts.
    pub ignore_scripts: bool,

    pub include_dev: bool,
    pub include_optional: bool,
    pub include_peer: bool,

    /// Maximum concurrent packument fetches.
    pub concurrency: usize,

    /// Dist-tag used when no range is given.
    pub default_tag: String,
}

/// Optional overrides read from [`CONFIG_FILE_NAME`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ConfigFile {
    registry: Option<String>,
    strict: Option<bool>,
    strict_peer_deps: Option<bool>,
    ignore_scripts: Option<bool>,
    concurrency: Option<usize>,
    default_tag: Option<String>,
    global_dir: Option<PathBuf>,
}

fn default_global_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".grove")
        .join("lib")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            global: false,
            global_dir: default_global_dir(),
            registry: DEFAULT_REGISTRY.to_string(),
            strict: false,
            strict_peer_deps: false,
            ignore_scripts: false,
            include_dev: true,
            include_optional: true,
            include_peer: true,
            concurrency: MAX_CONCURRENT_FETCHES,
            default_tag: "latest".to_string(),
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Apply environment overrides (`GROVE_NPM_REGISTRY`, `GROVE_STRICT_PEER_DEPS`,
    /// `GROVE_GLOBAL_DIR`).
    #[must_use]
    pub fn with_env(mut self) -> Self {
        if let Ok(url) = std::env::var(REGISTRY_ENV) {
            if !url.trim().is_empty() {
                self.registry = url;
            }
        }
        if let Ok(v) = std::env::var(STRICT_PEER_ENV) {
            self.strict_peer_deps = matches!(v.as_str(), "1" | "true");
        }
        if let Ok(dir) = std::env::var(GLOBAL_DIR_ENV) {
            self.global_dir = PathBuf::from(dir);
        }
        self
    }

    /// Merge settings from a JSON config file.
    ///
    /// A missing file leaves the config unchanged.
    pub fn with_file(mut self, path: &Path) -> Result<Self, Error> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(self),
            Err(source) => {
                return Err(Error::ConfigRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let file: ConfigFile =
            serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(registry) = file.registry {
            self.registry = registry;
        }
        if let Some(strict) = file.strict {
            self.strict = strict;
        }
        if let Some(strict_peer) = file.strict_peer_deps {
            self.strict_peer_deps = strict_peer;
        }
        if let Some(ignore) = file.ignore_scripts {
            self.ignore_scripts = ignore;
        }
        if let Some(concurrency) = file.concurrency {
            if concurrency == 0 {
                return Err(Error::ConfigValue {
                    key: "concurrency",
                    value: concurrency.to_string(),
                });
            }
            self.concurrency = concurrency;
        }
        if let Some(tag) = file.default_tag {
            self.default_tag = tag;
        }
        if let Some(dir) = file.global_dir {
            self.global_dir = dir;
        }
        Ok(self)
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set global mode.
    #[must_use]
    pub fn with_global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    /// Set the registry URL.
    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    #[must_use]
    pub fn with_ignore_scripts(mut self, ignore: bool) -> Self {
        self.ignore_scripts = ignore;
        self
    }

    #[must_use]
    pub fn with_strict_peer_deps(mut self, strict: bool) -> Self {
        self.strict_peer_deps = strict || self.strict_peer_deps;
        self
    }

    /// The directory commands operate on: the project, or the global prefix.
    #[must_use]
    pub fn prefix(&self) -> &Path {
        if self.global {
            &self.global_dir
        } else {
            &self.cwd
        }
    }

    /// Resolver options derived from this config.
    #[must_use]
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            include_dev: self.include_dev,
            include_optional: self.include_optional,
            include_peer: self.include_peer,
            strict: self.strict,
            strict_peer_deps: self.strict_peer_deps,
        }
    }

    /// Outdated options derived from this config.
    #[must_use]
    pub fn outdated_options(&self) -> OutdatedOptions {
        OutdatedOptions {
            global: self.global,
            ..OutdatedOptions::default()
        }
    }
}
