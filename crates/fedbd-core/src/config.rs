//! Startup configuration, built once and passed by reference.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

pub const REQUIRED_KEYS: [&str; 10] = [
    "APP_ENV",
    "TIMEZONE",
    "OPENAI_API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_CLIENT_ID",
    "GOOGLE_CLIENT_SECRET",
    "GOOGLE_REDIRECT_URI",
    "SMTP_HOST",
    "SMTP_USER",
    "SMTP_PASS",
];

pub const SENSITIVE_KEYS: [&str; 6] = [
    "OPENAI_API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_CLIENT_SECRET",
    "SMTP_PASS",
    "GOOGLE_DRIVE_ACCESS_TOKEN",
    "DATABASE_URL",
];

const REDACTED: &str = "********";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration keys: {}", .0.join(", "))]
    MissingRequired(Vec<String>),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub app_env: String,
    pub timezone: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub web_port: u16,
    pub artifacts_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_redirect_uri: Option<String>,
    pub google_drive_folder_id: Option<String>,
    pub google_drive_access_token: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub drive_sync_cooldown_secs: i64,
    pub scheduler_enabled: bool,
    pub drive_sync_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub loglevel: String,
    raw: BTreeMap<String, String>,
}

impl PortalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut raw = BTreeMap::new();
        for key in REQUIRED_KEYS.into_iter().chain(OPTIONAL_KEYS) {
            if let Some(value) = get(key) {
                raw.insert(key.to_string(), value);
            }
        }

        let database_url = get("DATABASE_URL").unwrap_or_else(|| {
            let path = get("DB_PATH").unwrap_or_else(|| "fedbd.db".to_string());
            format!("sqlite://{path}")
        });

        Ok(Self {
            app_env: get("APP_ENV").unwrap_or_else(|| "development".to_string()),
            timezone: get("TIMEZONE").unwrap_or_else(|| "America/New_York".to_string()),
            database_url,
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 5)?,
            web_port: parse_or(&get, "FEDBD_WEB_PORT", 8000)?,
            artifacts_dir: get("ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./artifacts")),
            workspace_root: get("FEDBD_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            openai_api_key: get("OPENAI_API_KEY"),
            gemini_api_key: get("GEMINI_API_KEY"),
            google_client_id: get("GOOGLE_CLIENT_ID"),
            google_client_secret: get("GOOGLE_CLIENT_SECRET"),
            google_redirect_uri: get("GOOGLE_REDIRECT_URI"),
            google_drive_folder_id: get("GOOGLE_DRIVE_FOLDER_ID"),
            google_drive_access_token: get("GOOGLE_DRIVE_ACCESS_TOKEN"),
            smtp_host: get("SMTP_HOST"),
            smtp_user: get("SMTP_USER"),
            smtp_pass: get("SMTP_PASS"),
            drive_sync_cooldown_secs: parse_or(&get, "DRIVE_SYNC_COOLDOWN_SECS", 300)?,
            scheduler_enabled: get("FEDBD_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            drive_sync_cron: get("DRIVE_SYNC_CRON").unwrap_or_else(|| "0 0 */6 * * *".to_string()),
            user_agent: get("FEDBD_USER_AGENT").unwrap_or_else(|| "fedbd-portal/0.1".to_string()),
            http_timeout_secs: parse_or(&get, "FEDBD_HTTP_TIMEOUT_SECS", 20)?,
            loglevel: get("LOGLEVEL").unwrap_or_else(|| "info".to_string()),
            raw,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn missing_required(&self) -> Vec<String> {
        REQUIRED_KEYS
            .iter()
            .filter(|key| !self.raw.contains_key(**key))
            .map(|key| (*key).to_string())
            .collect()
    }

    /// Fails only in production; elsewhere missing keys surface as a degraded health check.
    pub fn ensure_required(&self) -> Result<(), ConfigError> {
        let missing = self.missing_required();
        if self.is_production() && !missing.is_empty() {
            return Err(ConfigError::MissingRequired(missing));
        }
        Ok(())
    }

    pub fn redacted(&self) -> BTreeMap<String, String> {
        self.raw
            .iter()
            .map(|(key, value)| {
                let shown = if SENSITIVE_KEYS.contains(&key.as_str()) {
                    REDACTED.to_string()
                } else {
                    value.clone()
                };
                (key.clone(), shown)
            })
            .collect()
    }
}

const OPTIONAL_KEYS: [&str; 14] = [
    "DATABASE_URL",
    "DB_PATH",
    "DB_MAX_CONNECTIONS",
    "FEDBD_WEB_PORT",
    "ARTIFACTS_DIR",
    "FEDBD_WORKSPACE_ROOT",
    "GOOGLE_DRIVE_FOLDER_ID",
    "GOOGLE_DRIVE_ACCESS_TOKEN",
    "DRIVE_SYNC_COOLDOWN_SECS",
    "FEDBD_SCHEDULER_ENABLED",
    "DRIVE_SYNC_CRON",
    "FEDBD_USER_AGENT",
    "FEDBD_HTTP_TIMEOUT_SECS",
    "LOGLEVEL",
];

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<PortalConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        PortalConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_optional_keys_are_absent() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.database_url, "sqlite://fedbd.db");
        assert_eq!(cfg.web_port, 8000);
        assert_eq!(cfg.drive_sync_cooldown_secs, 300);
        assert!(!cfg.scheduler_enabled);
        assert_eq!(cfg.missing_required().len(), REQUIRED_KEYS.len());
    }

    #[test]
    fn production_requires_every_required_key() {
        let cfg = config_from(&[("APP_ENV", "production"), ("TIMEZONE", "UTC")]).unwrap();
        let err = cfg.ensure_required().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("OPENAI_API_KEY"));
        assert!(!message.contains("TIMEZONE"));

        let dev = config_from(&[("APP_ENV", "development")]).unwrap();
        assert!(dev.ensure_required().is_ok());
    }

    #[test]
    fn blank_values_count_as_missing() {
        let cfg = config_from(&[("SMTP_HOST", "   ")]).unwrap();
        assert!(cfg.smtp_host.is_none());
        assert!(cfg.missing_required().contains(&"SMTP_HOST".to_string()));
    }

    #[test]
    fn sensitive_values_are_redacted() {
        let cfg = config_from(&[("OPENAI_API_KEY", "sk-live"), ("TIMEZONE", "UTC")]).unwrap();
        let shown = cfg.redacted();
        assert_eq!(shown.get("OPENAI_API_KEY").map(String::as_str), Some("********"));
        assert_eq!(shown.get("TIMEZONE").map(String::as_str), Some("UTC"));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = config_from(&[("FEDBD_WEB_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
