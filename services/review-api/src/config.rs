//! Configuration types and loading
//!
//! Config precedence: CLI `--config` > `CONFIG_PATH` env > default file >
//! built-in defaults. API keys come from `GEMINI_API_KEYS` (or the single
//! `GEMINI_API_KEY`), falling back to `provider.api_keys_file`. They are
//! never stored in the TOML directly to avoid leaking secrets.

use key_pool::{ApiKey, RetryPolicy, SelectionPolicy, load_keys};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "code-review-gateway.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub rotation: RotationConfig,
    #[serde(skip)]
    pub api_keys: Vec<ApiKey>,
}

/// Inbound HTTP settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub max_connections: usize,
    /// Review requests accepted per one-minute window, process wide.
    pub requests_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            max_connections: 1000,
            requests_per_minute: 30,
        }
    }
}

/// Upstream model API settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// File with comma or newline separated keys (alternative to GEMINI_API_KEYS)
    pub api_keys_file: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: provider::gemini::DEFAULT_BASE_URL.to_string(),
            model: provider::gemini::DEFAULT_MODEL.to_string(),
            timeout_secs: 120,
            api_keys_file: None,
        }
    }
}

/// Key rotation and wait-cycle settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub cooldown_secs: u64,
    pub max_error_count: usize,
    pub error_window_secs: u64,
    pub max_wait_cycles: u32,
    pub wait_base_secs: u64,
    pub wait_step_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 30,
            max_error_count: 3,
            error_window_secs: 120,
            max_wait_cycles: 3,
            wait_base_secs: 45,
            wait_step_secs: 20,
        }
    }
}

impl RotationConfig {
    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            cooldown: Duration::from_secs(self.cooldown_secs),
            max_error_count: self.max_error_count,
            error_window: Duration::from_secs(self.error_window_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_wait_cycles: self.max_wait_cycles,
            wait_base: Duration::from_secs(self.wait_base_secs),
            wait_step: Duration::from_secs(self.wait_step_secs),
        }
    }
}

impl Config {
    /// Load the resolved config file, or built-in defaults when no path was
    /// given and the default file does not exist.
    pub fn resolve(cli_path: Option<&str>) -> common::Result<Self> {
        let explicit = cli_path.is_some() || std::env::var_os("CONFIG_PATH").is_some();
        let path = Self::resolve_path(cli_path);
        if !explicit && !path.exists() {
            return Self::from_toml("");
        }
        Self::load(&path)
    }

    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| common::Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse, overlay environment variables, resolve keys, validate.
    pub fn from_toml(contents: &str) -> common::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.apply_env()?;
        config.api_keys = config.read_keys()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> common::Result<()> {
        if let Some(port) = non_empty_env("PORT") {
            let port: u16 = port.parse().map_err(|e| common::Error::Env {
                var: "PORT".into(),
                reason: format!("{e}"),
            })?;
            self.server.listen_addr.set_port(port);
        }
        if let Some(model) = non_empty_env("GEMINI_MODEL") {
            self.provider.model = model;
        }
        Ok(())
    }

    /// Key resolution order:
    /// 1. GEMINI_API_KEYS env var
    /// 2. GEMINI_API_KEY env var
    /// 3. api_keys_file path from config
    fn read_keys(&self) -> common::Result<Vec<ApiKey>> {
        if let Some(raw) = non_empty_env("GEMINI_API_KEYS").or_else(|| non_empty_env("GEMINI_API_KEY"))
        {
            return Ok(load_keys(&raw));
        }
        match &self.provider.api_keys_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    common::Error::Config(format!(
                        "failed to read api_keys_file {}: {e}",
                        path.display()
                    ))
                })?;
                Ok(load_keys(&raw))
            }
            None => Ok(Vec::new()),
        }
    }

    fn validate(&self) -> common::Result<()> {
        let base_url = &self.provider.base_url;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {base_url}"
            )));
        }
        if self.provider.model.trim().is_empty() {
            return Err(common::Error::Config("model must not be empty".into()));
        }
        if self.provider.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.server.requests_per_minute == 0 {
            return Err(common::Error::Config(
                "requests_per_minute must be greater than 0".into(),
            ));
        }
        if self.rotation.max_error_count == 0 {
            return Err(common::Error::Config(
                "max_error_count must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
