//! Configuration resolution for malviz-gateway
//!
//! Every setting resolves in the same order:
//! command-line argument → environment variable → TOML file → compiled default.
//! clap merges the first two, `malviz_common::config` supplies the TOML layer.

use clap::Parser;
use malviz_common::config::{resolve_storage_root, RetentionPolicy, TomlConfig};
use malviz_common::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default listen address (the original frontend talks to port 8000)
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

/// Default engine executable
pub const DEFAULT_ENGINE_PROGRAM: &str = "python3";

/// Default engine entry point, passed before the staged file path
pub const DEFAULT_ENGINE_SCRIPT: &str = "ai_engine.py";

/// Default engine runtime bound
pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 300;

/// Command-line arguments for malviz-gateway
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "malviz-gateway")]
#[command(about = "File analysis gateway: stages uploads and runs the AI engine")]
#[command(version)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "MALVIZ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "MALVIZ_BIND")]
    pub bind: Option<String>,

    /// Directory where uploads are staged
    #[arg(short, long, env = "MALVIZ_STORAGE_ROOT")]
    pub storage_root: Option<PathBuf>,

    /// Engine executable
    #[arg(long, env = "MALVIZ_ENGINE_PROGRAM")]
    pub engine_program: Option<String>,

    /// Engine analysis script (first engine argument)
    #[arg(long, env = "MALVIZ_ENGINE_SCRIPT")]
    pub engine_script: Option<PathBuf>,

    /// Engine timeout in seconds, 0 for none
    #[arg(long, env = "MALVIZ_ENGINE_TIMEOUT_SECS")]
    pub engine_timeout_secs: Option<u64>,

    /// Staged file retention: keep or delete
    #[arg(long, env = "MALVIZ_RETENTION")]
    pub retention: Option<RetentionPolicy>,

    /// Maximum request body size in bytes (unlimited when unset)
    #[arg(long, env = "MALVIZ_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: Option<u64>,

    /// Allowed CORS origin, repeatable (comma-separated in the environment)
    #[arg(long = "cors-origin", env = "MALVIZ_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "MALVIZ_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Engine invocation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Executable to launch
    pub program: String,
    /// Fixed script argument; `None` when the program is the engine itself
    pub script: Option<PathBuf>,
    /// Maximum runtime; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

/// Fully resolved gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    pub storage_root: PathBuf,
    pub engine: EngineSettings,
    pub retention: RetentionPolicy,
    pub max_upload_bytes: Option<u64>,
    pub cors_origins: Vec<String>,
    pub log_level: String,
}

impl GatewayConfig {
    /// Merge command-line/environment values over the TOML file
    pub fn resolve(args: &Args, toml: &TomlConfig) -> Result<Self> {
        let bind_str = args
            .bind
            .clone()
            .or_else(|| toml.bind.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_str
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("Invalid bind address '{}': {}", bind_str, e)))?;

        let program = args
            .engine_program
            .clone()
            .or_else(|| toml.engine.program.clone())
            .unwrap_or_else(|| DEFAULT_ENGINE_PROGRAM.to_string());
        if program.trim().is_empty() {
            return Err(Error::Config("Engine program must not be empty".to_string()));
        }

        // An explicitly empty script means "no script argument"
        let script = args
            .engine_script
            .clone()
            .or_else(|| toml.engine.script.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_SCRIPT));
        let script = (!script.as_os_str().is_empty()).then_some(script);

        let timeout_secs = args
            .engine_timeout_secs
            .or(toml.engine.timeout_secs)
            .unwrap_or(DEFAULT_ENGINE_TIMEOUT_SECS);
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

        let log_level = args
            .log_level
            .clone()
            .unwrap_or_else(|| toml.logging.level.clone());

        Ok(Self {
            bind,
            storage_root: resolve_storage_root(args.storage_root.as_deref(), toml),
            engine: EngineSettings {
                program,
                script,
                timeout,
            },
            retention: args
                .retention
                .or(toml.storage.retention)
                .unwrap_or_default(),
            max_upload_bytes: args.max_upload_bytes.or(toml.storage.max_upload_bytes),
            cors_origins: if args.cors_origins.is_empty() {
                toml.http.cors_origins.clone()
            } else {
                args.cors_origins.clone()
            },
            log_level,
        })
    }
}
