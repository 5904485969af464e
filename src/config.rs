//! Configuration loader and validator for the release watcher.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default = "Provider::github")]
    pub github: Provider,
    #[serde(default = "Provider::codeberg")]
    pub codeberg: Provider,
    #[serde(default)]
    pub notifications: Notifications,
}

/// Process mode; only `production` starts the background poller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Production,
    Development,
    Test,
    Build,
}

impl RunMode {
    pub fn parse(value: &str) -> Option<RunMode> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(RunMode::Production),
            "development" | "dev" => Some(RunMode::Development),
            "test" => Some(RunMode::Test),
            "build" => Some(RunMode::Build),
            _ => None,
        }
    }
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

fn default_http_timeout() -> u64 {
    30
}

/// Hosting provider API access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provider {
    #[serde(default)]
    pub token: Option<String>,
    pub api_base: String,
}

impl Provider {
    fn github() -> Self {
        Self {
            token: None,
            api_base: "https://api.github.com/".into(),
        }
    }

    fn codeberg() -> Self {
        Self {
            token: None,
            api_base: "https://codeberg.org/".into(),
        }
    }

    /// Token with blank values treated as absent.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notifications {
    #[serde(default)]
    pub push: Option<Push>,
    #[serde(default)]
    pub email: Option<Email>,
}

/// Generic push webhook (e.g. an Apprise API endpoint).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Push {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    #[default]
    Starttls,
    Tls,
    #[serde(rename = "none")]
    Plain,
}

/// SMTP delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Email {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: SmtpTls,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
    pub to: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Apply `RELEASE_WATCH_MODE`, `GITHUB_TOKEN` and `CODEBERG_TOKEN`.
    pub fn apply_env(&mut self) {
        if let Some(mode) = std::env::var("RELEASE_WATCH_MODE")
            .ok()
            .and_then(|v| RunMode::parse(&v))
        {
            self.app.mode = mode;
        }
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Ok(token) = std::env::var("CODEBERG_TOKEN") {
            self.codeberg.token = Some(token);
        }
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/releases.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.http_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("app.http_timeout_seconds must be > 0"));
    }

    if reqwest::Url::parse(&cfg.github.api_base).is_err() {
        return Err(ConfigError::Invalid("github.api_base must be a valid URL"));
    }
    if reqwest::Url::parse(&cfg.codeberg.api_base).is_err() {
        return Err(ConfigError::Invalid("codeberg.api_base must be a valid URL"));
    }

    if let Some(push) = &cfg.notifications.push {
        if reqwest::Url::parse(push.url.trim()).is_err() {
            return Err(ConfigError::Invalid("notifications.push.url must be a valid URL"));
        }
    }

    if let Some(email) = &cfg.notifications.email {
        if email.host.trim().is_empty() {
            return Err(ConfigError::Invalid("notifications.email.host must be non-empty"));
        }
        if email.port == 0 {
            return Err(ConfigError::Invalid("notifications.email.port must be > 0"));
        }
        if email.from.trim().is_empty() {
            return Err(ConfigError::Invalid("notifications.email.from must be non-empty"));
        }
        if email.to.trim().is_empty() {
            return Err(ConfigError::Invalid("notifications.email.to must be non-empty"));
        }
        if email.username.is_some() != email.password.is_some() {
            return Err(ConfigError::Invalid(
                "notifications.email.username and password must be set together",
            ));
        }
    }

    Ok(())
}

/// Returns a complete example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  mode: production
  http_timeout_seconds: 30

github:
  token: "YOUR_GITHUB_TOKEN"
  api_base: "https://api.github.com/"

codeberg:
  api_base: "https://codeberg.org/"

notifications:
  push:
    url: "https://apprise.example.com/notify/releases"
  email:
    host: "smtp.example.com"
    port: 587
    tls: starttls
    username: "watchbot"
    password: "YOUR_SMTP_PASSWORD"
    from: "Release Watch <watchbot@example.com>"
    to: "you@example.com"
"#
}
