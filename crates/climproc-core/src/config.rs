//! Configuration store and typed settings.
//!
//! Settings live in a TOML file grouped by section:
//!
//! ```toml
//! [climproc]
//! esmval_root = "/opt/esmvaltool"
//! ncarg_root = "/opt/ncl"
//! obs_root = "/data/obs"
//! esgsearch_url = "https://esgf-data.dkrz.de/esg-search"
//! ```
//!
//! Any value can be overridden from the environment: `CLIMPROC_<KEY>` for the
//! `climproc` section, `CLIMPROC_<SECTION>_<KEY>` for the others.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigurationError;
use crate::resolver::SearchOptions;

/// Section holding the pipeline settings.
pub const DEFAULT_SECTION: &str = "climproc";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "CLIMPROC";

/// Opaque `section -> key -> value` lookup.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    values: BTreeMap<String, BTreeMap<String, String>>,
    env_overrides: bool,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            env_overrides: true,
        }
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text. Top-level scalars go into the default section.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigurationError> {
        let table: toml::Table = text.parse().map_err(|e: toml::de::Error| {
            ConfigurationError::Load {
                path: PathBuf::from("<inline>"),
                reason: e.to_string(),
            }
        })?;

        let mut store = ConfigStore::new();
        for (name, value) in table {
            match value {
                toml::Value::Table(section) => {
                    for (key, value) in section {
                        store.set(&name, &key, scalar_to_string(&value));
                    }
                }
                other => store.set(DEFAULT_SECTION, &name, scalar_to_string(&other)),
            }
        }
        Ok(store)
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "loaded configuration");
        Self::from_toml_str(&text).map_err(|e| match e {
            ConfigurationError::Load { reason, .. } => ConfigurationError::Load {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Ignore environment overrides.
    pub fn without_env(mut self) -> Self {
        self.env_overrides = false;
        self
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.values
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, section: &str, key: &str, value: impl Into<String>) -> Self {
        self.set(section, key, value);
        self
    }

    pub fn env_key(section: &str, key: &str) -> String {
        let name = if section == DEFAULT_SECTION {
            format!("{ENV_PREFIX}_{key}")
        } else {
            format!("{ENV_PREFIX}_{section}_{key}")
        };
        name.to_uppercase().replace(['-', '.'], "_")
    }

    /// Environment first, then the file. Blank values count as unset in
    /// both places.
    pub fn get_opt(&self, section: &str, key: &str) -> Option<String> {
        let from_env = if self.env_overrides {
            std::env::var(Self::env_key(section, key)).ok()
        } else {
            None
        };
        from_env
            .as_deref()
            .and_then(non_blank)
            .or_else(|| {
                self.values
                    .get(section)
                    .and_then(|s| s.get(key))
                    .map(String::as_str)
                    .and_then(non_blank)
            })
    }

    pub fn get(&self, section: &str, key: &str) -> Result<String, ConfigurationError> {
        self.get_opt(section, key)
            .ok_or_else(|| ConfigurationError::MissingValue {
                section: section.to_string(),
                key: key.to_string(),
            })
    }

    pub fn get_or(&self, section: &str, key: &str, default: &str) -> String {
        self.get_opt(section, key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Parse an optional value.
    pub fn get_parsed<T>(&self, section: &str, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_opt(section, key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigurationError::InvalidValue {
                    section: section.to_string(),
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Settings the diagnostic pipeline needs from the configuration store.
#[derive(Debug, Clone)]
pub struct DiagnosticSettings {
    /// Installation root of the analysis tool (holds `esmval.sh`)
    pub esmval_root: PathBuf,
    /// NCL installation the tool's scripts run with
    pub ncarg_root: PathBuf,
    /// Observational data referenced by the namelists
    pub obs_root: PathBuf,
    pub esgsearch_url: String,
    /// Local replica of the ESGF archive
    pub archive_root: Option<PathBuf>,
    /// Parent of all run workspaces
    pub workspace_root: PathBuf,
    pub cache_dir: PathBuf,
    /// `None` lets the tool run indefinitely
    pub tool_timeout: Option<Duration>,
    pub strict_tool_failures: bool,
    pub search: SearchOptions,
}

impl DiagnosticSettings {
    pub fn from_store(store: &ConfigStore) -> Result<Self, ConfigurationError> {
        let section = DEFAULT_SECTION;
        let workspace_root = PathBuf::from(store.get_or(section, "workspace_root", "./workspaces"));
        let cache_dir = store
            .get_opt(section, "cache_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace_root.join("cache"));
        let defaults = SearchOptions::default();

        Ok(DiagnosticSettings {
            esmval_root: PathBuf::from(store.get(section, "esmval_root")?),
            ncarg_root: PathBuf::from(store.get(section, "ncarg_root")?),
            obs_root: PathBuf::from(store.get(section, "obs_root")?),
            esgsearch_url: store.get(section, "esgsearch_url")?,
            archive_root: store.get_opt(section, "archive_root").map(PathBuf::from),
            workspace_root,
            cache_dir,
            tool_timeout: store
                .get_parsed::<u64>(section, "tool_timeout_secs")?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            strict_tool_failures: store
                .get_parsed(section, "strict_tool_failures")?
                .unwrap_or(false),
            search: SearchOptions {
                distrib: store.get_parsed(section, "distrib")?.unwrap_or(defaults.distrib),
                replica: store.get_parsed(section, "replica")?.unwrap_or(defaults.replica),
                limit: store.get_parsed(section, "search_limit")?.unwrap_or(defaults.limit),
            },
        })
    }
}
