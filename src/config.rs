//! Configuration loading.
//!
//! Built-in defaults are deep-merged with the user's TOML file (when one
//! exists), then paths are expanded and consumer tables are normalized into
//! [`ConsumerDefinition`]s. The result is immutable for the rest of the run.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;

/// Defaults applied underneath every user config.
pub const DEFAULT_CONFIG: &str = r#"
[vault]
root = "~/notes"
capture_dir = "capture/raw_capture"

[state]
dir = "~/.local/state/para-organize"
database = "automations.db"

[logging]
level = "INFO"

[consumers.taskwarrior]
type = "taskwarrior"
enabled = true
marker_tag = "todo"
strip_tags = ["todo"]
remove_unknown_tags = true
project_tag_prefix = "project:"
additional_tags = []
review_tag = "not_reviewed"
annotation_template = "Captured from {path}"
data_directory = "~/.task"
taskrc_path = "~/.taskrc"

[consumers.taskwarrior.backup]
enabled = true
directory = "backups/taskwarrior"
"#;

/// Fully resolved run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub vault_root: PathBuf,
    pub capture_dir: PathBuf,
    pub state_dir: PathBuf,
    pub database_path: PathBuf,
    pub log_level: String,
    /// Consumer definitions in configuration order (ascending name).
    pub consumers: Vec<ConsumerDefinition>,
}

/// One `[consumers.<name>]` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerDefinition {
    pub name: String,
    pub type_name: String,
    pub enabled: bool,
    /// Every key of the table except `type` and `enabled`.
    pub options: toml::Table,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    vault: VaultSection,
    state: StateSection,
    #[serde(default)]
    logging: LoggingSection,
    #[serde(default)]
    consumers: toml::Table,
}

#[derive(Debug, Deserialize)]
struct VaultSection {
    root: String,
    capture_dir: String,
}

#[derive(Debug, Deserialize)]
struct StateSection {
    dir: String,
    #[serde(default = "default_database")]
    database: String,
}

fn default_database() -> String {
    "automations.db".to_string()
}

#[derive(Debug, Deserialize)]
struct LoggingSection {
    #[serde(default = "default_level")]
    level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "INFO".to_string()
}

impl Config {
    /// Parse a TOML document layered over [`DEFAULT_CONFIG`].
    ///
    /// Does not touch the filesystem; see [`load_config`] for the variant
    /// that reads a file and prepares state directories.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let overlay = text
            .parse::<toml::Table>()
            .map_err(|e| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                message: e.to_string(),
            })?;
        Self::from_overlay(overlay)
    }

    fn from_overlay(overlay: toml::Table) -> Result<Self, ConfigError> {
        let mut merged = default_table()?;
        deep_merge(&mut merged, overlay);

        let raw: RawConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: PathBuf::from("<merged>"),
                message: e.to_string(),
            })?;

        let vault_root = expand_path(&raw.vault.root, None);
        let capture_dir = expand_path(&raw.vault.capture_dir, Some(&vault_root));
        let state_dir = expand_path(&raw.state.dir, None);
        let database_path = expand_path(&raw.state.database, Some(&state_dir));

        Ok(Self {
            vault_root,
            capture_dir,
            state_dir,
            database_path,
            log_level: raw.logging.level.to_uppercase(),
            consumers: normalise_consumers(raw.consumers)?,
        })
    }

    /// Create the state directory, the ledger's parent and the shared
    /// backups directory.
    pub fn ensure_state_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("Failed to create state dir: {}", self.state_dir.display()))?;
        if let Some(parent) = self.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(self.state_dir.join("backups"))?;
        Ok(())
    }

    /// Definitions with `enabled = true`, in configuration order.
    pub fn enabled_consumers(&self) -> impl Iterator<Item = &ConsumerDefinition> {
        self.consumers.iter().filter(|c| c.enabled)
    }
}

/// Default location of the user config file.
pub fn default_config_path() -> PathBuf {
    expand_path("~/.config/para-organize/automations.toml", None)
}

/// Load the config at `path` (or the default location). A missing file is
/// not an error: the built-in defaults are used on their own.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);

    let overlay = if path.exists() {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        content
            .parse::<toml::Table>()
            .map_err(|e| ConfigError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?
    } else {
        toml::Table::new()
    };

    let config = Config::from_overlay(overlay)?;
    config.ensure_state_dirs()?;
    Ok(config)
}

fn default_table() -> Result<toml::Table, ConfigError> {
    DEFAULT_CONFIG
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<defaults>"),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`, recursing into tables present on both sides.
fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => deep_merge(existing, incoming),
                _ => {
                    base.insert(key, toml::Value::Table(incoming));
                }
            },
            other => {
                base.insert(key, other);
            }
        }
    }
}

fn normalise_consumers(table: toml::Table) -> Result<Vec<ConsumerDefinition>, ConfigError> {
    // toml::Table iterates in key order, which is the configuration order.
    let mut consumers = Vec::with_capacity(table.len());
    for (name, payload) in table {
        let toml::Value::Table(mut options) = payload else {
            return Err(ConfigError::InvalidConsumer { consumer: name });
        };

        let type_name = match options.remove("type") {
            Some(toml::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => return Err(ConfigError::MissingType { consumer: name }),
        };

        let enabled = match options.remove("enabled") {
            None => true,
            Some(toml::Value::Boolean(b)) => b,
            Some(other) => {
                return Err(ConfigError::InvalidOption {
                    consumer: name,
                    reason: format!("'enabled' must be a boolean, got {other}"),
                })
            }
        };

        consumers.push(ConsumerDefinition {
            name,
            type_name,
            enabled,
            options,
        });
    }
    Ok(consumers)
}

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// Expand `~` and `$VAR`/`${VAR}`, then anchor relative paths at `base`
/// (or the current directory).
pub fn expand_path(raw: &str, base: Option<&Path>) -> PathBuf {
    let with_vars = ENV_VAR
        .replace_all(raw, |caps: &regex::Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned();

    let path = match with_vars.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs_next::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(&with_vars),
        },
        _ => PathBuf::from(&with_vars),
    };

    let path = match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    };
    std::path::absolute(&path).unwrap_or(path)
}
