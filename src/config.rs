//! Configuration for pipewright, read from `.pipewright/pipewright.toml`.
//!
//! Layered file → environment → CLI:
//!
//! ```toml
//! [store]
//! db_path = ".pipewright/state.sqlite"
//! namespace = ""
//!
//! [logging]
//! level = "info"
//! format = "pretty"   # or "json"
//! dir = ".pipewright/logs"
//! ```
//!
//! `PIPEWRIGHT_DB` overrides the database path and `PIPEWRIGHT_LOG` the log
//! level; `--db` and `--verbose` override both.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::store::DbHandle;

pub const PIPEWRIGHT_DIR: &str = ".pipewright";
pub const CONFIG_FILE: &str = "pipewright.toml";
pub const DB_ENV: &str = "PIPEWRIGHT_DB";
pub const LOG_ENV: &str = "PIPEWRIGHT_LOG";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid log format: {}. Use pretty or json", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSection {
    /// SQLite file, relative to the project directory unless absolute.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Checkpoint namespace within each thread.
    #[serde(default)]
    pub namespace: String,
}

fn default_db_path() -> String {
    format!("{}/state.sqlite", PIPEWRIGHT_DIR)
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            namespace: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write JSON logs to a daily-rolling file in this directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

/// The on-disk `pipewright.toml` model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipewrightToml {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl PipewrightToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pipewright.toml")
    }

    /// Load `pipewright.toml` from `pipewright_dir`, or defaults when absent.
    pub fn load_or_default(pipewright_dir: &Path) -> Result<Self> {
        let config_path = pipewright_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize pipewright.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Problems that would not stop loading but are likely mistakes.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.store.db_path.trim().is_empty() {
            warnings.push("store.db_path is empty".to_string());
        }
        if !is_valid_level(&self.logging.level) {
            warnings.push(format!(
                "Invalid logging.level '{}': expected one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }
        if let Some(dir) = &self.logging.dir
            && dir.trim().is_empty()
        {
            warnings.push("logging.dir is set but empty".to_string());
        }
        warnings
    }
}

fn is_valid_level(level: &str) -> bool {
    LOG_LEVELS.contains(&level.to_lowercase().as_str())
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub pipewright_dir: PathBuf,
    pub toml: PipewrightToml,
    pub db_path: PathBuf,
    pub namespace: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        Self::with_cli_args(project_dir, None, false)
    }

    /// Resolve file settings, then environment, then CLI overrides.
    pub fn with_cli_args(project_dir: PathBuf, db: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let pipewright_dir = project_dir.join(PIPEWRIGHT_DIR);
        let toml = PipewrightToml::load_or_default(&pipewright_dir)?;

        let db_path = db
            .or_else(|| std::env::var(DB_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(&toml.store.db_path));
        let db_path = resolve(&project_dir, db_path);

        let log_level = if verbose {
            "debug".to_string()
        } else {
            std::env::var(LOG_ENV).unwrap_or_else(|_| toml.logging.level.clone())
        };
        let log_dir = toml
            .logging
            .dir
            .as_ref()
            .map(|dir| resolve(&project_dir, PathBuf::from(dir)));

        Ok(Self {
            namespace: toml.store.namespace.clone(),
            log_format: toml.logging.format,
            project_dir,
            pipewright_dir,
            db_path,
            log_level,
            log_dir,
            toml,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.pipewright_dir.join(CONFIG_FILE)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if !is_valid_level(&self.log_level) && self.log_level != self.toml.logging.level {
            warnings.push(format!("Invalid {} value '{}'", LOG_ENV, self.log_level));
        }
        warnings
    }

    /// Open (creating if needed) the configured database.
    pub fn open_db(&self) -> Result<DbHandle> {
        DbHandle::open(&self.db_path)
            .with_context(|| format!("Failed to open database {}", self.db_path.display()))
    }
}

fn resolve(project_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        project_dir.join(path)
    }
}
