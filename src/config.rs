// Configuration for the SDK and the ingest server.
//
// The SDK side (InitConfig) is plain data passed to init() by the host
// application. The server side is loaded in order of precedence:
// 1. Environment variables (highest priority)
// 2. Config file (~/.config/bilan/config.toml)
// 3. Built-in defaults (lowest priority)

use crate::error::InitError;
use crate::privacy::PrivacyConfig;
use crate::queue::BatchingConfig;
use crate::turn::DEFAULT_TIMEOUT_MS;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where flushed batches are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Append to the local store under `events:<user_id>`
    #[default]
    Local,
    /// POST to a remote ingest endpoint
    Server,
}

/// SDK initialization parameters
#[derive(Debug, Clone)]
pub struct InitConfig {
    pub mode: Mode,

    /// Opaque, stable identifier for the end user
    pub user_id: String,

    /// Ingest server base URL (server mode)
    pub endpoint: Option<String>,

    /// API key for the ingest server (server mode)
    pub api_key: Option<String>,

    /// Debug mode re-raises tracking failures instead of swallowing them
    pub debug: bool,

    pub privacy: PrivacyConfig,
    pub batching: BatchingConfig,

    /// AI call timeout for track_turn
    pub timeout_ms: u64,

    /// Directory for the local key-value store; defaults to the platform
    /// data dir under `bilan/`
    pub data_dir: Option<PathBuf>,
}

impl InitConfig {
    /// Local-mode config with defaults
    pub fn local(user_id: impl Into<String>) -> Self {
        Self {
            mode: Mode::Local,
            user_id: user_id.into(),
            endpoint: None,
            api_key: None,
            debug: false,
            privacy: PrivacyConfig::default(),
            batching: BatchingConfig::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            data_dir: None,
        }
    }

    /// Server-mode config with defaults
    pub fn server(
        user_id: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            mode: Mode::Server,
            endpoint: Some(endpoint.into()),
            api_key: Some(api_key.into()),
            ..Self::local(user_id)
        }
    }

    /// Surface configuration mistakes before any component is built
    pub fn validate(&self) -> Result<(), InitError> {
        if self.user_id.trim().is_empty() {
            return Err(InitError::MissingUserId);
        }
        if self.batching.batch_size == 0 || self.batching.max_batches == 0 {
            return Err(InitError::InvalidBatching);
        }
        if self.mode == Mode::Server {
            let endpoint = self
                .endpoint
                .as_deref()
                .filter(|e| !e.trim().is_empty())
                .ok_or(InitError::MissingEndpoint)?;
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(InitError::InvalidEndpoint(endpoint.to_string()));
            }
            if self
                .api_key
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
            {
                return Err(InitError::MissingApiKey);
            }
        }
        Ok(())
    }

    /// Effective data directory for the local store
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("bilan")
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingest server configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Deployment environment; gates development-only code paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Ingest server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the ingest server to
    pub bind_addr: SocketAddr,

    /// API key clients must present as `Authorization: Bearer <key>`
    pub api_key: String,

    /// Path to the SQLite event store
    pub db_path: PathBuf,

    /// Directory for server log files
    pub log_dir: PathBuf,

    /// Deployment environment (BILAN_ENV); production disables raw SQL
    pub environment: Environment,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
struct FileLogging {
    level: Option<String>,
}

/// Config file structure (subset of ServerConfig that makes sense to persist)
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    bind_addr: Option<String>,
    api_key: Option<String>,
    db_path: Option<String>,
    log_dir: Option<String>,

    /// Optional [logging] section
    logging: Option<FileLogging>,
}

impl ServerConfig {
    /// Get the config file path: ~/.config/bilan/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("bilan").join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist
    /// Called during startup to help users discover configuration options
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        // Don't overwrite existing config
        if path.exists() {
            return;
        }

        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // Silently fail - config is optional
            }
        }

        // Use ServerConfig::default().to_toml() as single source of truth
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Load file config if it exists
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                FileConfig::default()
            }),
            Err(_) => FileConfig::default(), // File doesn't exist, use defaults
        }
    }

    /// Serialize config to TOML string (single source of truth for format)
    pub fn to_toml(&self) -> String {
        format!(
            r#"# bilan ingest server configuration

# Bind address for the ingest endpoint
bind_addr = "{bind}"

# API key clients must present (Authorization: Bearer <key>)
api_key = "{api_key}"

# SQLite event store location
db_path = "{db_path}"

# Log directory for server log files
log_dir = "{log_dir}"

# Logging configuration (RUST_LOG env var overrides)
[logging]
level = "{log_level}"
"#,
            bind = self.bind_addr,
            api_key = self.api_key,
            db_path = self.db_path.display(),
            log_dir = self.log_dir.display(),
            log_level = self.logging.level,
        )
    }

    /// Save current configuration to file
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = Self::config_path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config path",
            ));
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&path, self.to_toml())
    }

    /// Load configuration: env vars -> file -> defaults
    pub fn from_env() -> Self {
        let file = Self::load_file_config();

        // Bind address: env > file > default
        let bind_addr = std::env::var("BILAN_BIND")
            .ok()
            .or(file.bind_addr)
            .unwrap_or_else(|| "127.0.0.1:3001".to_string())
            .parse()
            .expect("Invalid bind address");

        // API key: env > file > default (empty; start-up validation rejects)
        let api_key = std::env::var("BILAN_API_KEY")
            .ok()
            .or(file.api_key)
            .unwrap_or_default();

        // Database path: env > file > default
        let db_path = std::env::var("BILAN_DB_PATH")
            .ok()
            .or(file.db_path)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/bilan.db"));

        // Log directory: env > file > default
        let log_dir = std::env::var("BILAN_LOG_DIR")
            .ok()
            .or(file.log_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./logs"));

        // Environment: env only (deployment flag, never persisted)
        let environment = std::env::var("BILAN_ENV")
            .map(|v| Environment::parse(&v))
            .unwrap_or_default();

        // Logging settings: file config only (RUST_LOG handled in main.rs)
        let file_logging = file.logging.unwrap_or_default();
        let logging = LoggingConfig {
            level: file_logging.level.unwrap_or_else(|| "info".to_string()),
        };

        Self {
            bind_addr,
            api_key,
            db_path,
            log_dir,
            environment,
            logging,
        }
    }

    /// Startup validation with actionable messages
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!(
                "api_key is required - set BILAN_API_KEY or api_key in {}",
                Self::config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "the config file".to_string())
            );
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".parse().unwrap(),
            api_key: String::new(),
            db_path: PathBuf::from("./data/bilan.db"),
            log_dir: PathBuf::from("./logs"),
            environment: Environment::Development,
            logging: LoggingConfig::default(),
        }
    }
}
