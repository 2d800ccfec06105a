//! Layered configuration for the CAD backend.
//!
//! Values are resolved in order, later layers winning:
//! defaults → `cadnlp.toml` → environment (including `.env`) → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 8000
//! api_prefix = "/api/v1"
//! db_path = ".cadnlp/cadnlp.db"
//! access_token_expire_minutes = 11520
//! cors_origins = ["http://localhost:5173"]
//! seed_defaults = true
//! log_dir = ".cadnlp/logs"
//! json_logs = false
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default config file looked up in the working directory.
pub const CONFIG_FILE: &str = "cadnlp.toml";

const ENV_PREFIX: &str = "CADNLP_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub api_prefix: String,
    pub db_path: PathBuf,
    /// Lifetime of issued access tokens (8 days by default).
    pub access_token_expire_minutes: i64,
    pub cors_origins: Vec<String>,
    /// Create the admin user, a default project and its layer on an empty database.
    pub seed_defaults: bool,
    /// When set, logs are also written to daily-rolling files in this directory.
    pub log_dir: Option<PathBuf>,
    pub json_logs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            api_prefix: "/api/v1".to_string(),
            db_path: PathBuf::from(".cadnlp/cadnlp.db"),
            access_token_expire_minutes: 60 * 24 * 8,
            cors_origins: vec!["http://localhost:5173".to_string()],
            seed_defaults: true,
            log_dir: None,
            json_logs: false,
        }
    }
}

/// Overrides coming from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    /// Parse settings from a TOML string; missing keys keep their defaults.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse cadnlp.toml")
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Resolve the full layer stack.
    ///
    /// An explicit `config_path` must exist; otherwise `cadnlp.toml` in the
    /// working directory is used when present.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> Result<Self> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();

        let mut settings = match config_path {
            Some(path) => Self::load_file(path)?,
            None if Path::new(CONFIG_FILE).exists() => Self::load_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.apply_cli(cli);
        Ok(settings)
    }

    /// Apply `CADNLP_*` variables looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("HOST") {
            self.host = v;
        }
        if let Some(v) = var("PORT") {
            self.port = v.trim().parse().with_context(|| format!("Invalid CADNLP_PORT: {}", v))?;
        }
        if let Some(v) = var("API_PREFIX") {
            self.api_prefix = v;
        }
        if let Some(v) = var("DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("ACCESS_TOKEN_EXPIRE_MINUTES") {
            self.access_token_expire_minutes = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid CADNLP_ACCESS_TOKEN_EXPIRE_MINUTES: {}", v))?;
        }
        if let Some(v) = var("CORS_ORIGINS") {
            self.cors_origins = parse_origins(&v)?;
        }
        if let Some(v) = var("SEED_DEFAULTS") {
            self.seed_defaults = parse_flag(&v);
        }
        if let Some(v) = var("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("JSON_LOGS") {
            self.json_logs = parse_flag(&v);
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(ref host) = cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(ref db_path) = cli.db_path {
            self.db_path = db_path.clone();
        }
        if let Some(ref log_dir) = cli.log_dir {
            self.log_dir = Some(log_dir.clone());
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings")
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.api_prefix.is_empty() {
            warnings.push("api_prefix is empty: API routes will be mounted at the root".to_string());
        } else if !self.api_prefix.starts_with('/') {
            warnings.push(format!(
                "api_prefix '{}' should start with '/'",
                self.api_prefix
            ));
        }
        if self.access_token_expire_minutes <= 0 {
            warnings.push(format!(
                "access_token_expire_minutes is {}: every issued token is already expired",
                self.access_token_expire_minutes
            ));
        }
        for origin in &self.cors_origins {
            if !(origin.starts_with("http://") || origin.starts_with("https://")) {
                warnings.push(format!("CORS origin '{}' is not an http(s) URL", origin));
            }
        }

        warnings
    }
}

/// Accept either a JSON array (`["http://a", "http://b"]`) or a comma list.
fn parse_origins(value: &str) -> Result<Vec<String>> {
    let value = value.trim();
    if value.starts_with('[') {
        return serde_json::from_str(value)
            .with_context(|| format!("Invalid CADNLP_CORS_ORIGINS: {}", value));
    }
    Ok(value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
