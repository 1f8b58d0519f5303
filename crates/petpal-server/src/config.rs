use std::path::PathBuf;

use anyhow::Context;
use petpal_social::RetentionPolicy;
use petpal_social::notifications::MAX_RETENTION_DAYS;

/// Placeholder JWT secrets that MUST NOT be used.
pub const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    /// Base URL blob URLs are minted under, e.g. `https://petpal.example`.
    pub public_url: String,
    pub retention: RetentionPolicy,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = var("PETPAL_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("PETPAL_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("PETPAL_PORT must be a port number")?;
        let public_url = var("PETPAL_PUBLIC_URL").unwrap_or_else(|| format!("http://localhost:{}", port));

        let defaults = RetentionPolicy::default();
        let retention = RetentionPolicy {
            max_per_recipient: parse_or(&var, "PETPAL_NOTIFICATION_CAP", defaults.max_per_recipient)?,
            max_age_days: parse_or(&var, "PETPAL_NOTIFICATION_MAX_AGE_DAYS", defaults.max_age_days)?,
        };
        if retention.max_per_recipient == 0 {
            anyhow::bail!("PETPAL_NOTIFICATION_CAP must be at least 1");
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&retention.max_age_days) {
            anyhow::bail!("PETPAL_NOTIFICATION_MAX_AGE_DAYS must be between 1 and {}", MAX_RETENTION_DAYS);
        }

        Ok(Self {
            host,
            port,
            jwt_secret: var("PETPAL_JWT_SECRET").unwrap_or_default(),
            db_path: var("PETPAL_DB_PATH").unwrap_or_else(|| "petpal.db".into()).into(),
            storage_dir: var("PETPAL_STORAGE_DIR").unwrap_or_else(|| "./blob-storage".into()).into(),
            public_url: public_url.trim_end_matches('/').to_string(),
            retention,
            sweep_interval_secs: parse_or(&var, "PETPAL_SWEEP_INTERVAL_SECS", 3600)?,
        })
    }

    pub fn has_usable_secret(&self) -> bool {
        !self.jwt_secret.is_empty() && !PLACEHOLDER_SECRETS.contains(&self.jwt_secret.as_str())
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{} has an invalid value", key)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.public_url, "http://localhost:3000");
        assert_eq!(config.retention, RetentionPolicy::default());
        assert_eq!(config.sweep_interval_secs, 3600);
        assert!(!config.has_usable_secret());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PETPAL_PORT", "8080"),
            ("PETPAL_PUBLIC_URL", "https://pets.example/"),
            ("PETPAL_NOTIFICATION_CAP", "50"),
            ("PETPAL_JWT_SECRET", "a-real-secret"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.public_url, "https://pets.example");
        assert_eq!(config.retention.max_per_recipient, 50);
        assert_eq!(config.retention.max_age_days, 90);
        assert!(config.has_usable_secret());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(config(&[("PETPAL_PORT", "http")]).is_err());
        assert!(config(&[("PETPAL_NOTIFICATION_CAP", "0")]).is_err());
        assert!(config(&[("PETPAL_NOTIFICATION_MAX_AGE_DAYS", "soon")]).is_err());
        assert!(config(&[("PETPAL_NOTIFICATION_MAX_AGE_DAYS", "0")]).is_err());
        assert!(config(&[("PETPAL_NOTIFICATION_MAX_AGE_DAYS", "-1")]).is_err());
        assert!(config(&[("PETPAL_NOTIFICATION_MAX_AGE_DAYS", "9999999999999")]).is_err());
        assert_eq!(
            config(&[("PETPAL_NOTIFICATION_MAX_AGE_DAYS", "36500")]).unwrap().retention.max_age_days,
            36_500
        );
        assert!(!config(&[("PETPAL_JWT_SECRET", "dev-secret-change-me")]).unwrap().has_usable_secret());
    }
}
