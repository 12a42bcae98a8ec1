//! Configuration: TOML file, then environment overrides, then defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlConnectOptions;

pub const DEFAULT_CONFIG_FILE: &str = "dealer-insights.toml";

/// Sessions last at most ten years.
pub const MAX_EXPIRY_DAYS: i64 = 3650;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub report: ReportConfig,
    pub auth: AuthConfig,
}

/// Either `url` or the individual connection parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: 3306,
            user: None,
            password: None,
            name: None,
            max_connections: 5,
            connect_timeout_secs: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> anyhow::Result<MySqlConnectOptions> {
        if let Some(url) = &self.url {
            return url
                .parse::<MySqlConnectOptions>()
                .context("DATABASE_URL is not a valid MySQL connection string");
        }

        let host = self
            .host
            .as_deref()
            .context("database host is not configured; set DATABASE_URL or DB_HOST")?;
        let user = self
            .user
            .as_deref()
            .context("database user is not configured; set DB_USER")?;
        let name = self
            .name
            .as_deref()
            .context("database name is not configured; set DB_NAME")?;

        let mut options = MySqlConnectOptions::new()
            .host(host)
            .port(self.port)
            .username(user)
            .database(name);
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// 0 keeps results for the life of the process.
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<std::time::Duration> {
        (self.ttl_secs > 0).then(|| std::time::Duration::from_secs(self.ttl_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportConfig {
    pub page_size: usize,
    pub top_n: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            top_n: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub cookie_key: Option<String>,
    pub expiry_days: i64,
    pub session_dir: PathBuf,
    pub users: BTreeMap<String, UserConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "dealer_insights_session".to_string(),
            cookie_key: None,
            expiry_days: 30,
            session_dir: PathBuf::from("."),
            users: BTreeMap::new(),
        }
    }
}

impl AuthConfig {
    pub fn session_path(&self) -> PathBuf {
        self.session_dir.join(format!("{}.json", self.cookie_name))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserConfig {
    pub name: String,
    pub email: Option<String>,
    pub password_hash: String,
}

impl Config {
    /// Reads `path`, or `dealer-insights.toml` when present, then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if default_path.exists() => Self::from_file(default_path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = lookup("DB_HOST") {
            self.database.host = Some(host);
        }
        if let Some(port) = lookup("DB_PORT") {
            self.database.port = port
                .parse()
                .with_context(|| format!("DB_PORT `{port}` is not a valid port"))?;
        }
        if let Some(user) = lookup("DB_USER") {
            self.database.user = Some(user);
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            self.database.password = Some(password);
        }
        if let Some(name) = lookup("DB_NAME") {
            self.database.name = Some(name);
        }
        if let Some(key) = lookup("DASHBOARD_COOKIE_KEY") {
            self.auth.cookie_key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.report.page_size == 0 {
            bail!("report.page_size must be at least 1");
        }
        if self.report.top_n == 0 {
            bail!("report.top_n must be at least 1");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be at least 1");
        }
        if !(1..=MAX_EXPIRY_DAYS).contains(&self.auth.expiry_days) {
            bail!("auth.expiry_days must be between 1 and {MAX_EXPIRY_DAYS}");
        }
        Ok(())
    }
}
