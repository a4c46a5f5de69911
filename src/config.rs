// Application configuration
// Built once at startup (defaults -> TOML file -> environment) and passed
// explicitly to the orchestrator, provider and server.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::vault::TokenCipher;

// ============================================================================
// PLAID
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaidEnvironment {
    Sandbox,
    Development,
    Production,
}

impl PlaidEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            PlaidEnvironment::Sandbox => "https://sandbox.plaid.com",
            PlaidEnvironment::Development => "https://development.plaid.com",
            PlaidEnvironment::Production => "https://production.plaid.com",
        }
    }
}

impl FromStr for PlaidEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" => Ok(PlaidEnvironment::Sandbox),
            "development" => Ok(PlaidEnvironment::Development),
            "production" => Ok(PlaidEnvironment::Production),
            other => Err(anyhow!("Unknown Plaid environment: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaidConfig {
    pub client_id: String,
    pub secret: String,
    pub environment: PlaidEnvironment,
    /// Overrides the environment URL (mock servers)
    pub base_url: Option<String>,
}

impl Default for PlaidConfig {
    fn default() -> Self {
        PlaidConfig {
            client_id: String::new(),
            secret: String::new(),
            environment: PlaidEnvironment::Sandbox,
            base_url: None,
        }
    }
}

impl PlaidConfig {
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.environment.base_url().to_string())
    }

    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.secret.is_empty()
    }
}

// ============================================================================
// SYNC
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Transactions requested per page (Plaid allows 1..=500)
    pub page_size: u32,
    /// Budget for a single page request
    pub page_timeout_secs: u64,
    /// Per-account lease lifetime; renewed before every page
    pub lease_ttl_secs: u64,
    /// Pagination restarts allowed after upstream mutation before giving up
    pub max_pagination_restarts: u32,
    pub retry: RetrySettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            page_size: 100,
            page_timeout_secs: 30,
            lease_ttl_secs: 120,
            max_pagination_restarts: 3,
            retry: RetrySettings::default(),
        }
    }
}

impl SyncSettings {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    /// Base64 AES-256 key that seals access tokens at rest
    pub token_key: Option<String>,
    pub plaid: PlaidConfig,
    pub sync: SyncSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("finsync.db"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            token_key: None,
            plaid: PlaidConfig::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML config file; missing keys fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        let mut config = AppConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn token_cipher(&self) -> Result<TokenCipher> {
        let key = self
            .token_key
            .as_deref()
            .ok_or_else(|| anyhow!("Token key missing: set FINSYNC_TOKEN_KEY (see `finsync gen-key`)"))?;
        TokenCipher::from_base64(key)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("FINSYNC_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("FINSYNC_BIND_ADDR") {
            self.bind_addr = addr
                .parse()
                .with_context(|| format!("Invalid FINSYNC_BIND_ADDR: {}", addr))?;
        }
        if let Some(key) = lookup("FINSYNC_TOKEN_KEY") {
            self.token_key = Some(key);
        }
        if let Some(client_id) = lookup("PLAID_CLIENT_ID") {
            self.plaid.client_id = client_id;
        }
        if let Some(secret) = lookup("PLAID_SECRET") {
            self.plaid.secret = secret;
        }
        if let Some(env) = lookup("PLAID_ENV") {
            self.plaid.environment = env.parse()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.database_path, PathBuf::from("finsync.db"));
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.plaid.environment, PlaidEnvironment::Sandbox);
        assert_eq!(config.plaid.base_url(), "https://sandbox.plaid.com");
        assert!(!config.plaid.has_credentials());
        assert!(config.token_cipher().is_err());
        assert_eq!(config.sync.page_size, 100);
        assert_eq!(config.sync.page_timeout(), Duration::from_secs(30));
        assert!(config.sync.lease_ttl() > config.sync.page_timeout());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
database_path = "/var/lib/finsync/data.db"

[plaid]
environment = "production"

[sync]
page_size = 500
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/finsync/data.db"));
        assert_eq!(config.plaid.environment, PlaidEnvironment::Production);
        assert_eq!(config.plaid.base_url(), "https://production.plaid.com");
        assert_eq!(config.sync.page_size, 500);
        assert_eq!(config.sync.page_timeout_secs, 30);
        assert_eq!(config.sync.retry.max_attempts, 5);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PLAID_CLIENT_ID", "client-123"),
            ("PLAID_SECRET", "secret-456"),
            ("PLAID_ENV", "Development"),
            ("FINSYNC_BIND_ADDR", "0.0.0.0:8080"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_vars(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert!(config.plaid.has_credentials());
        assert_eq!(config.plaid.environment, PlaidEnvironment::Development);
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.database_path, PathBuf::from("finsync.db"));
    }

    #[test]
    fn test_token_key_from_env() {
        let key = TokenCipher::generate_key();
        let mut config = AppConfig::default();
        config
            .apply_vars(|name| (name == "FINSYNC_TOKEN_KEY").then(|| key.clone()))
            .unwrap();

        let cipher = config.token_cipher().unwrap();
        let sealed = cipher.seal("access-sandbox").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), "access-sandbox");
    }

    #[test]
    fn test_invalid_env_is_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_vars(|key| {
            (key == "PLAID_ENV").then(|| "staging".to_string())
        });

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("staging"));
    }

    #[test]
    fn test_base_url_override() {
        let plaid = PlaidConfig {
            base_url: Some("http://127.0.0.1:9999".to_string()),
            ..PlaidConfig::default()
        };
        assert_eq!(plaid.base_url(), "http://127.0.0.1:9999");
    }
}
