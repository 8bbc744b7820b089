//! Configuration parsing and validation.
//!
//! Banana Vision is configured via a TOML file (default `config/bvs.toml`).
//! Data platform credentials may be omitted from the file and supplied
//! through the environment instead, which is the recommended setup:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `SUPABASE_URL` | `platform.url` |
//! | `SUPABASE_KEY` | `platform.anon_key` |
//! | `SUPABASE_SERVICE_KEY` | `platform.service_key` |
//!
//! # Example
//!
//! ```toml
//! [platform]
//! url = "https://xyzcompany.supabase.co"
//! timeout_secs = 30
//!
//! [server]
//! bind = "0.0.0.0:8000"
//! api_prefix = "/api/v1"
//!
//! [dashboard]
//! window_weeks = 6
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use banana_vision_core::aggregate::{DEFAULT_WINDOW_WEEKS, MAX_WINDOW_WEEKS};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    #[serde(default)]
    pub url: String,
    /// Standard-privilege key, subject to row-level security.
    #[serde(default)]
    pub anon_key: String,
    /// Elevated key, bypasses row-level security. Server-side only.
    #[serde(default)]
    pub service_key: String,
    #[serde(default = "default_platform_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            service_key: String::new(),
            timeout_secs: default_platform_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_platform_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_project_name")]
    pub project_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_prefix: default_api_prefix(),
            project_name: default_project_name(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_api_prefix() -> String {
    "/api/v1".to_string()
}
fn default_project_name() -> String {
    "Banana Vision Service".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    #[serde(default = "default_window_weeks")]
    pub window_weeks: usize,
    #[serde(default = "default_dashboard_timeout")]
    pub timeout_secs: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            window_weeks: default_window_weeks(),
            timeout_secs: default_dashboard_timeout(),
        }
    }
}

fn default_window_weeks() -> usize {
    DEFAULT_WINDOW_WEEKS
}
fn default_dashboard_timeout() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_access_max_age")]
    pub access_cookie_max_age: i64,
    #[serde(default = "default_refresh_max_age")]
    pub refresh_cookie_max_age: i64,
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_cookie_max_age: default_access_max_age(),
            refresh_cookie_max_age: default_refresh_max_age(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

fn default_access_max_age() -> i64 {
    3600
}
fn default_refresh_max_age() -> i64 {
    604_800
}
fn default_secure_cookies() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Parse a config from TOML text, overlay the environment, and validate.
    pub fn from_toml(content: &str) -> Result<Self> {
        Self::from_toml_with_env(content, |key| std::env::var(key).ok())
    }

    /// Like [`Config::from_toml`], reading overrides from `env` instead of the
    /// process environment.
    pub fn from_toml_with_env(
        content: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config file")?;

        if let Some(url) = env("SUPABASE_URL") {
            config.platform.url = url;
        }
        if let Some(key) = env("SUPABASE_KEY") {
            config.platform.anon_key = key;
        }
        if let Some(key) = env("SUPABASE_SERVICE_KEY") {
            config.platform.service_key = key;
        }

        config.platform.url = config.platform.url.trim().trim_end_matches('/').to_string();
        config.server.api_prefix = normalize_prefix(&config.server.api_prefix);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.platform.url.is_empty() {
            bail!("platform.url must be set (or SUPABASE_URL)");
        }
        if !self.platform.url.starts_with("http://") && !self.platform.url.starts_with("https://")
        {
            bail!(
                "platform.url must start with http:// or https:// (got '{}')",
                self.platform.url
            );
        }
        if self.platform.anon_key.trim().is_empty() {
            bail!("platform.anon_key must be set (or SUPABASE_KEY)");
        }
        if self.platform.service_key.trim().is_empty() {
            bail!("platform.service_key must be set (or SUPABASE_SERVICE_KEY)");
        }
        if self.platform.timeout_secs == 0 {
            bail!("platform.timeout_secs must be > 0");
        }
        if !(1..=MAX_WINDOW_WEEKS).contains(&self.dashboard.window_weeks) {
            bail!(
                "dashboard.window_weeks must be in [1, {}]",
                MAX_WINDOW_WEEKS
            );
        }
        if self.dashboard.timeout_secs == 0 {
            bail!("dashboard.timeout_secs must be > 0");
        }
        if self.auth.access_cookie_max_age <= 0 || self.auth.refresh_cookie_max_age <= 0 {
            bail!("auth cookie lifetimes must be > 0");
        }
        Ok(())
    }

    /// A printable copy with credential keys masked.
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        copy.platform.anon_key = redact(&copy.platform.anon_key);
        copy.platform.service_key = redact(&copy.platform.service_key);
        copy
    }
}

/// Ensure a route prefix starts with `/` and has no trailing `/`.
/// An empty or bare `/` prefix mounts the API at the root.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

fn redact(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{}…", visible)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[platform]
url = "https://demo.supabase.co/"
anon_key = "anon-123"
service_key = "service-456"
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = Config::from_toml_with_env(MINIMAL, no_env).unwrap();
        assert_eq!(cfg.platform.url, "https://demo.supabase.co");
        assert_eq!(cfg.platform.timeout_secs, 30);
        assert_eq!(cfg.server.bind, "0.0.0.0:8000");
        assert_eq!(cfg.server.api_prefix, "/api/v1");
        assert_eq!(cfg.server.project_name, "Banana Vision Service");
        assert_eq!(cfg.dashboard.window_weeks, 6);
        assert_eq!(cfg.auth.access_cookie_max_age, 3600);
        assert_eq!(cfg.auth.refresh_cookie_max_age, 604_800);
        assert!(cfg.auth.secure_cookies);
    }

    #[test]
    fn test_env_overrides_file() {
        let cfg = Config::from_toml_with_env(MINIMAL, |key| match key {
            "SUPABASE_URL" => Some("http://localhost:54321".to_string()),
            "SUPABASE_SERVICE_KEY" => Some("env-service".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.platform.url, "http://localhost:54321");
        assert_eq!(cfg.platform.anon_key, "anon-123");
        assert_eq!(cfg.platform.service_key, "env-service");
    }

    #[test]
    fn test_credentials_may_come_only_from_env() {
        let cfg = Config::from_toml_with_env("", |key| match key {
            "SUPABASE_URL" => Some("https://x.supabase.co".to_string()),
            "SUPABASE_KEY" => Some("a".to_string()),
            "SUPABASE_SERVICE_KEY" => Some("s".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.platform.url, "https://x.supabase.co");
        assert_eq!(cfg.platform.timeout_secs, 30);
        assert_eq!(cfg.platform.max_retries, 2);
    }

    #[test]
    fn test_platform_default_matches_serde_defaults() {
        let cfg = PlatformConfig::default();
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.max_retries, 2);
        assert!(cfg.url.is_empty());
    }

    #[test]
    fn test_missing_keys_rejected() {
        let err = Config::from_toml_with_env(
            "[platform]\nurl = \"https://x.supabase.co\"\nanon_key = \"a\"\n",
            no_env,
        )
        .unwrap_err();
        assert!(err.to_string().contains("service_key"));
    }

    #[test]
    fn test_bad_url_rejected() {
        let toml = MINIMAL.replace("https://demo.supabase.co/", "demo.supabase.co");
        assert!(Config::from_toml_with_env(&toml, no_env).is_err());
    }

    #[test]
    fn test_window_bounds() {
        let toml = format!("{}\n[dashboard]\nwindow_weeks = 12\n", MINIMAL);
        assert_eq!(
            Config::from_toml_with_env(&toml, no_env).unwrap().dashboard.window_weeks,
            12
        );

        let toml = format!("{}\n[dashboard]\nwindow_weeks = 0\n", MINIMAL);
        assert!(Config::from_toml_with_env(&toml, no_env).is_err());

        let toml = format!("{}\n[dashboard]\nwindow_weeks = 60\n", MINIMAL);
        assert!(Config::from_toml_with_env(&toml, no_env).is_err());
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("api/v1"), "/api/v1");
        assert_eq!(normalize_prefix("/api/v1/"), "/api/v1");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix(""), "");
    }

    #[test]
    fn test_redacted_masks_keys() {
        let cfg = Config::from_toml_with_env(MINIMAL, no_env).unwrap().redacted();
        assert_eq!(cfg.platform.anon_key, "anon…");
        assert_eq!(cfg.platform.service_key, "serv…");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bvs.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        // Process environment may carry SUPABASE_* in CI; only assert on
        // values the environment cannot override.
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.dashboard.window_weeks, 6);

        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
