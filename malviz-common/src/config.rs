//! Bootstrap configuration loading and storage root resolution
//!
//! The TOML file is optional. Every field in it is optional as well, so a
//! service can layer command-line arguments and environment variables on
//! top of whatever the file provides and fall back to compiled defaults.
//!
//! Example `gateway.toml`:
//!
//! ```toml
//! storage_root = "/var/lib/malviz/uploads"
//! bind = "0.0.0.0:8000"
//!
//! [engine]
//! program = "python3"
//! script = "/opt/malviz/ai_engine.py"
//! timeout_secs = 120
//!
//! [storage]
//! retention = "delete"
//!
//! [http]
//! cors_origins = ["http://127.0.0.1:5173"]
//!
//! [logging]
//! level = "debug"
//! ```

use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "MALVIZ_CONFIG";

/// Bootstrap configuration loaded from TOML file
///
/// Read once at startup. The service must restart to pick up changes.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TomlConfig {
    /// Directory where uploads are staged before analysis
    pub storage_root: Option<PathBuf>,

    /// Socket address the HTTP server binds to (e.g. "127.0.0.1:8000")
    pub bind: Option<String>,

    /// External analysis engine invocation
    pub engine: EngineSection,

    /// Staging storage behavior
    pub storage: StorageSection,

    /// HTTP surface options
    pub http: HttpSection,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// `[engine]` section
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    /// Engine executable (looked up in PATH when not absolute)
    pub program: Option<String>,
    /// Fixed analysis script passed as the first argument
    pub script: Option<PathBuf>,
    /// Maximum engine runtime in seconds (0 disables the bound)
    pub timeout_secs: Option<u64>,
}

/// `[storage]` section
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    /// What happens to staged files once the engine has finished
    pub retention: Option<RetentionPolicy>,
    /// Upper bound on request body size; unlimited when absent
    pub max_upload_bytes: Option<u64>,
}

/// `[http]` section
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    /// Origins allowed by CORS; empty means any origin
    pub cors_origins: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Staged file retention policy
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Staged files stay on disk after the request; an external process owns cleanup
    #[default]
    Keep,
    /// The request's staging directory is removed once the engine has finished
    Delete,
}

impl FromStr for RetentionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "delete" => Ok(Self::Delete),
            other => Err(format!(
                "invalid retention policy '{}' (expected 'keep' or 'delete')",
                other
            )),
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => f.write_str("keep"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// Parse TOML configuration text
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Load TOML configuration from a file that must exist
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Read TOML failed ({}): {}", path.display(), e))
    })?;
    parse_toml_config(&content)
}

/// Where the bootstrap configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Loaded from this file
    File(PathBuf),
    /// No file found at this default location; compiled defaults in effect
    Missing(PathBuf),
    /// No configuration directory on this platform; compiled defaults in effect
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Missing(path) => write!(f, "defaults (no file at {})", path.display()),
            Self::Defaults => f.write_str("defaults"),
        }
    }
}

/// Load the bootstrap configuration
///
/// An explicitly requested file (argument or `MALVIZ_CONFIG`) must exist and
/// parse. Without one, the platform default location is tried; a missing
/// file there is not an error and yields the compiled defaults.
///
/// Called before logging is initialized, so the caller reports the source.
pub fn load_or_default(
    explicit: Option<&Path>,
    module_name: &str,
) -> Result<(TomlConfig, ConfigSource)> {
    let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);

    if let Some(path) = explicit.map(Path::to_path_buf).or(env_path) {
        let config = load_toml_config(&path)?;
        return Ok((config, ConfigSource::File(path)));
    }

    match default_config_path(module_name) {
        Some(path) if path.exists() => {
            let config = load_toml_config(&path)?;
            Ok((config, ConfigSource::File(path)))
        }
        Some(path) => Ok((TomlConfig::default(), ConfigSource::Missing(path))),
        None => Ok((TomlConfig::default(), ConfigSource::Defaults)),
    }
}

/// Platform configuration file location: `<config_dir>/malviz/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("malviz").join(format!("{}.toml", module_name)))
}

/// OS-dependent default storage root
pub fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("malviz").join("uploads"))
        .unwrap_or_else(|| PathBuf::from("./malviz_data/uploads"))
}

/// Storage root resolution, highest priority first:
/// 1. Command-line argument / environment variable (already merged by clap)
/// 2. TOML config file
/// 3. OS-dependent compiled default
pub fn resolve_storage_root(cli_or_env: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_or_env {
        return path.to_path_buf();
    }

    if let Some(path) = &toml.storage_root {
        return path.clone();
    }

    default_storage_root()
}

/// Create the storage root (and parents) if missing
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        info!("Created storage directory: {}", path.display());
    }
    if !path.is_dir() {
        return Err(Error::Config(format!(
            "Storage root is not a directory: {}",
            path.display()
        )));
    }
    Ok(())
}
