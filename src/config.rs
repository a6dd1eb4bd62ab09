use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use anyhow::Context;
use tracing::{info, warn};

pub const DEFAULT_PLANS_PORT: &str = "3000";
pub const DEFAULT_PLANS_DB_PATH: &str = "plans.sqlite3";
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:5173";
pub const DEFAULT_PLAN_STORE_URL: &str = "http://127.0.0.1:3000";

/// Plan store service settings (`plansd`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// `*` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        Ok(Self {
            port: try_load("PLANS_PORT", DEFAULT_PLANS_PORT)?,
            db_path: try_load("PLANS_DB_PATH", DEFAULT_PLANS_DB_PATH)?,
            allowed_origins: split_list(&load_string("PLANS_ALLOWED_ORIGINS", DEFAULT_ALLOWED_ORIGINS)),
        })
    }
}

/// Exam tracker sidecar settings (`librettod`).
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub plan_store_url: String,
}

impl TrackerConfig {
    pub fn load() -> Self {
        Self {
            plan_store_url: load_string("LIBRETTO_PLANS_URL", DEFAULT_PLAN_STORE_URL),
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn load_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = load_string(key, default);
    raw.trim()
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            anyhow::anyhow!("{e}")
        })
        .with_context(|| format!("environment misconfigured: {key}={raw}"))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_lists_are_trimmed() {
        assert_eq!(
            split_list(" http://a.test , ,http://b.test"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
        assert!(split_list("").is_empty());
    }
}
